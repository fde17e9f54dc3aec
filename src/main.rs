//! remote-catalog - Resumable, chunked cataloging of remote storage
//!
//! Entry point for the CLI application.

use anyhow::{bail, Context, Result};
use clap::Parser;
use remote_catalog::chunk::{ChunkRef, ChunkStatus};
use remote_catalog::config::{CliArgs, Command, IngestArgs, RunArgs, StatusArgs, StatusFormat};
use remote_catalog::db::{Catalog, ChunkEntry, ChunkRecord, IngestRequest};
use remote_catalog::layout::{validate_run_id, OutputLayout};
use remote_catalog::progress::{print_chunk_status, print_header, print_summary, ProgressReporter};
use remote_catalog::{shutdown, RunConfig, RunDriver};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Exit code after an interrupt
const EXIT_INTERRUPTED: u8 = 130;

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<ExitCode> {
    // Parse CLI arguments
    let args = CliArgs::parse();

    // Setup logging
    setup_logging(args.verbose)?;

    match args.command {
        Command::Run(run_args) => run_catalog(run_args),
        Command::Ingest(ingest_args) => run_ingest(ingest_args),
        Command::Status(status_args) => run_status(status_args),
    }
}

/// `run`: list and ingest every chunk of every source
fn run_catalog(args: RunArgs) -> Result<ExitCode> {
    // Validate and create config
    let config = RunConfig::from_args(args).context("Invalid configuration")?;
    let show_progress = config.show_progress;

    // Create tokio runtime
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create async runtime")?;

    // Setup signal handler; a second Ctrl+C exits immediately
    let (trigger, shutdown) = shutdown::channel();
    ctrlc::set_handler(move || {
        if trigger.is_triggered() {
            eprintln!("\nForced exit");
            std::process::exit(EXIT_INTERRUPTED as i32);
        }
        eprintln!("\nInterrupt received, stopping listings (Ctrl+C again to force)...");
        trigger.trigger();
    })
    .context("Failed to set signal handler")?;

    let reporter = Arc::new(if show_progress {
        ProgressReporter::new()
    } else {
        ProgressReporter::quiet()
    });

    let sources: Vec<String> = config.sources.iter().map(|s| s.to_string()).collect();
    let (hash_partitions, max_parallel) = (config.hash_partitions, config.max_parallel);
    let out_dir = config.out_dir.display().to_string();

    let driver = RunDriver::new(config, Arc::clone(&reporter), shutdown)
        .context("Failed to initialize run")?;

    if show_progress {
        reporter.suspend(|| {
            print_header(driver.run_id(), &sources, &out_dir, hash_partitions, max_parallel)
        });
    }

    let started = Instant::now();
    let summary = runtime
        .block_on(driver.run())
        .context("Run failed")?;

    reporter.finish_and_clear();

    if show_progress {
        let db_path = driver.layout().db_path();
        let db_size = std::fs::metadata(&db_path).ok().map(|m| m.len());
        print_summary(
            &summary,
            started.elapsed(),
            &db_path.display().to_string(),
            db_size,
        );
    }

    if summary.interrupted {
        println!(
            "Interrupted. Run ID: {} (re-run with --resume to continue)",
            summary.run_id
        );
        return Ok(ExitCode::from(EXIT_INTERRUPTED));
    }

    println!("Done. Run ID: {}", summary.run_id);
    if summary.success() {
        Ok(ExitCode::SUCCESS)
    } else {
        info!(failed = summary.failed_chunks(), "Run completed with errors");
        Ok(ExitCode::FAILURE)
    }
}

/// `ingest`: parse one raw listing, or record a chunk status only
fn run_ingest(args: IngestArgs) -> Result<ExitCode> {
    validate_run_id(&args.run_id).context("Invalid run id")?;

    let db_dir = args
        .db
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    std::fs::create_dir_all(db_dir)
        .with_context(|| format!("Failed to create '{}'", db_dir.display()))?;

    let catalog = Catalog::open(&args.db).context("Failed to open catalog")?;

    if let Some(status) = &args.chunk_status {
        let status: ChunkStatus = status.parse().context("Invalid --chunk-status")?;
        let chunk_name = args
            .chunk_name
            .context("--chunk-status requires --chunk-name")?;

        let entry = ChunkEntry {
            run_id: args.run_id,
            source: args.source,
            chunk_name,
            raw_file: args.raw_file.display().to_string(),
            command: args.rclone_command,
        };
        let applied = catalog
            .set_chunk_status(&entry, status)
            .context("Failed to record chunk status")?;

        if applied {
            println!("Chunk {} status: {}", entry.chunk_name, status);
        } else {
            println!(
                "Chunk {} is already ingested; status left unchanged",
                entry.chunk_name
            );
        }
        return Ok(ExitCode::SUCCESS);
    }

    let path_prefix = args
        .chunk_name
        .as_deref()
        .and_then(|name| name.parse::<ChunkRef>().ok())
        .and_then(|chunk| chunk.directory_path().map(String::from));
    let error_log = db_dir.join(format!("parse_errors_{}_{}.log", args.source, args.run_id));

    let request = IngestRequest {
        run_id: args.run_id,
        source: args.source,
        remote: args.remote,
        raw_file: args.raw_file,
        command: args.rclone_command,
        chunk_name: args.chunk_name,
        path_prefix,
        error_log: Some(error_log),
    };

    let summary = catalog
        .ingest_listing(&request)
        .context("Ingestion failed")?;

    println!(
        "Ingested {} records from {} lines ({} new, {} rejected).",
        summary.accepted, summary.lines, summary.inserted, summary.rejected
    );
    Ok(ExitCode::SUCCESS)
}

/// JSON shape of `status --format json`
#[derive(Serialize)]
struct StatusReport<'a> {
    run_id: &'a str,
    files: u64,
    counts: BTreeMap<&'static str, usize>,
    chunks: &'a [ChunkRecord],
}

/// `status`: show the chunk table of a run
fn run_status(args: StatusArgs) -> Result<ExitCode> {
    let layout = OutputLayout::new(&args.out, &args.db_name);

    let run_id = match args.run_id {
        Some(id) => id,
        None => layout
            .read_last_run()
            .with_context(|| format!("No --run-id given and no last run in '{}'", args.out.display()))?,
    };

    let db_path = layout.db_path();
    if !db_path.exists() {
        bail!("No catalog at '{}'", db_path.display());
    }

    let catalog = Catalog::open(&db_path).context("Failed to open catalog")?;
    let records = catalog
        .chunks_for_run(&run_id)
        .context("Failed to read chunk states")?;
    let files = catalog
        .file_count(&run_id, None)
        .context("Failed to count files")?;

    match args.format {
        StatusFormat::Text => print_chunk_status(&run_id, &records, files),
        StatusFormat::Json => {
            let mut counts = BTreeMap::new();
            for record in &records {
                *counts.entry(record.status.as_str()).or_insert(0) += 1;
            }
            let report = StatusReport {
                run_id: &run_id,
                files,
                counts,
                chunks: &records,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn setup_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("remote_catalog=debug,warn")
    } else {
        EnvFilter::new("remote_catalog=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    Ok(())
}
