//! Human-facing status output
//!
//! A spinner shows the chunk currently being worked on. Heartbeats and other
//! status lines are printed above it, or straight to stderr when the spinner
//! is disabled.

use crate::chunk::ChunkStatus;
use crate::db::ChunkRecord;
use crate::listing::Heartbeat;
use crate::runner::RunSummary;
use console::style;
use humansize::{format_size, BINARY};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::time::Duration;

/// Status line writer with an optional spinner
pub struct ProgressReporter {
    bar: Option<ProgressBar>,
}

impl ProgressReporter {
    /// Create a reporter with a spinner
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();

        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
        );

        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar: Some(bar) }
    }

    /// Create a reporter that only prints lines
    pub fn quiet() -> Self {
        Self { bar: None }
    }

    /// Replace the spinner message
    pub fn set_status(&self, status: &str) {
        if let Some(bar) = &self.bar {
            bar.set_message(status.to_string());
        }
    }

    /// Print a status line
    pub fn line(&self, message: &str) {
        match &self.bar {
            Some(bar) => bar.println(message),
            None => eprintln!("{}", message),
        }
    }

    /// Run `f` with the spinner hidden
    pub fn suspend<F: FnOnce() -> R, R>(&self, f: F) -> R {
        match &self.bar {
            Some(bar) => bar.suspend(f),
            None => f(),
        }
    }

    /// Print a listing heartbeat
    pub fn heartbeat(&self, heartbeat: &Heartbeat) {
        self.line(&format_heartbeat(heartbeat));
    }

    /// Finish and clear the spinner
    pub fn finish_and_clear(&self) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// One heartbeat line
pub fn format_heartbeat(heartbeat: &Heartbeat) -> String {
    format!(
        "[{}] {} still listing: {} elapsed, {} written",
        heartbeat.source,
        heartbeat.chunk,
        format_elapsed(heartbeat.elapsed),
        format_size(heartbeat.bytes, BINARY),
    )
}

/// Format a duration as HH:MM:SS
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

/// Format a number with thousands separators
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let bytes: Vec<_> = s.bytes().rev().collect();

    let chunks: Vec<String> = bytes
        .chunks(3)
        .map(|chunk| chunk.iter().rev().map(|&b| b as char).collect::<String>())
        .collect();

    chunks.into_iter().rev().collect::<Vec<_>>().join(",")
}

/// Print a header at the start of a run
pub fn print_header(
    run_id: &str,
    sources: &[String],
    output: &str,
    hash_partitions: u32,
    max_parallel: usize,
) {
    println!();
    println!(
        "{} {}",
        style("remote-catalog").cyan().bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Run ID:").bold(), run_id);
    for source in sources {
        println!("  {} {}", style("Source:").bold(), source);
    }
    println!("  {} {}", style("Output:").bold(), output);
    if hash_partitions > 1 {
        println!(
            "  {} {} (max {} parallel)",
            style("Partitions:").bold(),
            hash_partitions,
            max_parallel
        );
    }
    println!();
}

/// Print the per-source results of a run
pub fn print_summary(summary: &RunSummary, duration: Duration, db_path: &str, db_size: Option<u64>) {
    let title = if summary.interrupted {
        style("Run Interrupted").yellow().bold()
    } else if summary.success() {
        style("Run Complete").green().bold()
    } else {
        style("Run Finished With Errors").red().bold()
    };

    println!();
    println!("{}", title);
    println!("{}", style("─".repeat(50)).dim());

    for source in &summary.sources {
        println!("  {}", style(&source.label).cyan().bold());
        if let Some(error) = &source.probe_error {
            println!("    {} {}", style("Probe failed:").red().bold(), error);
            continue;
        }
        println!(
            "    {} {} ({} skipped, {} listed, {} ingested)",
            style("Chunks:").bold(),
            format_number(source.chunks as u64),
            format_number(source.skipped as u64),
            format_number(source.listed as u64),
            format_number(source.ingested as u64),
        );
        println!(
            "    {} {}",
            style("New rows:").bold(),
            format_number(source.rows_inserted)
        );
        if source.failed > 0 {
            println!(
                "    {} {}",
                style("Failed:").yellow().bold(),
                format_number(source.failed as u64)
            );
        }
    }

    println!(
        "  {} {:.1}s",
        style("Duration:").bold(),
        duration.as_secs_f64()
    );
    if let Some(size) = db_size {
        println!(
            "  {} {} ({})",
            style("Database:").bold(),
            db_path,
            format_size(size, BINARY)
        );
    } else {
        println!("  {} {}", style("Database:").bold(), db_path);
    }
    println!();
}

/// Print the chunk table of a run
pub fn print_chunk_status(run_id: &str, records: &[ChunkRecord], file_count: u64) {
    println!();
    println!("{} {}", style("Run").cyan().bold(), run_id);
    println!("{}", style("─".repeat(50)).dim());

    if records.is_empty() {
        println!("  No chunks recorded for this run");
        println!();
        return;
    }

    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for record in records {
        *counts.entry(record.status.as_str()).or_default() += 1;

        let status = match record.status {
            ChunkStatus::Ingested => style(record.status.as_str()).green(),
            ChunkStatus::Listed => style(record.status.as_str()).cyan(),
            ChunkStatus::Listing => style(record.status.as_str()).yellow(),
            ChunkStatus::Error => style(record.status.as_str()).red(),
        };
        println!(
            "  {:<12} {:<10} {}  {}",
            record.source,
            status,
            record.chunk_name,
            style(&record.updated_at).dim()
        );
    }

    println!("{}", style("─".repeat(50)).dim());
    for status in ChunkStatus::ALL {
        if let Some(count) = counts.get(status.as_str()) {
            println!(
                "  {} {}",
                style(format!("{}:", status)).bold(),
                format_number(*count as u64)
            );
        }
    }
    println!("  {} {}", style("Files:").bold(), format_number(file_count));
    println!();
}
