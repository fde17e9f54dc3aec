//! Bounded task pool for concurrent listings
//!
//! `submit` waits for a free slot before spawning, so at most `max_in_flight`
//! tasks of a pool run at once. `join_all` waits for every task submitted
//! since the last join and reports each failure; one failure never hides
//! another.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::warn;

/// Default cap on concurrent listings
pub const DEFAULT_MAX_PARALLEL: usize = 4;

/// Handle returned by [`TaskPool::submit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(usize);

/// Why a pooled task did not produce a value
#[derive(Debug)]
pub enum TaskFailure<E> {
    /// The task returned an error
    Failed(E),
    /// The task panicked or was cancelled
    Aborted(String),
}

impl<E: Display> Display for TaskFailure<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskFailure::Failed(e) => write!(f, "{}", e),
            TaskFailure::Aborted(reason) => write!(f, "task aborted: {}", reason),
        }
    }
}

/// Outcome of one task in a joined batch
#[derive(Debug)]
pub struct TaskResult<T, E> {
    pub id: TaskId,
    pub label: String,
    pub result: Result<T, TaskFailure<E>>,
}

/// All outcomes of a joined batch, in submission order
#[derive(Debug)]
pub struct BatchReport<T, E> {
    pub results: Vec<TaskResult<T, E>>,
}

impl<T, E> BatchReport<T, E> {
    /// Tasks that did not succeed
    pub fn failures(&self) -> impl Iterator<Item = &TaskResult<T, E>> {
        self.results.iter().filter(|r| r.result.is_err())
    }

    /// First failure in submission order
    pub fn first_failure(&self) -> Option<&TaskResult<T, E>> {
        self.failures().next()
    }

    /// True when every task succeeded
    pub fn all_succeeded(&self) -> bool {
        self.first_failure().is_none()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

struct Pending<T, E> {
    id: TaskId,
    label: String,
    handle: JoinHandle<Result<T, E>>,
}

/// Pool that caps the number of concurrently running tasks
pub struct TaskPool<T, E> {
    slots: Arc<Semaphore>,
    max_in_flight: usize,
    pending: Vec<Pending<T, E>>,
    next_id: usize,
}

impl<T, E> TaskPool<T, E>
where
    T: Send + 'static,
    E: Display + Send + 'static,
{
    /// Create a pool; a cap of 0 is treated as 1
    pub fn new(max_in_flight: usize) -> Self {
        let max_in_flight = max_in_flight.max(1);
        Self {
            slots: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
            pending: Vec::new(),
            next_id: 0,
        }
    }

    /// Number of tasks currently holding a slot
    pub fn in_flight(&self) -> usize {
        self.max_in_flight - self.slots.available_permits()
    }

    /// Spawn a task once a slot is free
    pub async fn submit<F>(&mut self, label: impl Into<String>, task: F) -> TaskId
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
    {
        // The semaphore is owned by the pool and never closed
        let permit = match Arc::clone(&self.slots).acquire_owned().await {
            Ok(permit) => Some(permit),
            Err(_) => None,
        };

        let handle = tokio::spawn(async move {
            let result = task.await;
            drop(permit);
            result
        });

        let id = TaskId(self.next_id);
        self.next_id += 1;
        self.pending.push(Pending {
            id,
            label: label.into(),
            handle,
        });
        id
    }

    /// Wait for every submitted task and collect their outcomes
    pub async fn join_all(&mut self) -> BatchReport<T, E> {
        let mut results = Vec::with_capacity(self.pending.len());

        for pending in self.pending.drain(..) {
            let result = match pending.handle.await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(TaskFailure::Failed(e)),
                Err(join_err) => Err(TaskFailure::Aborted(join_err.to_string())),
            };

            if let Err(failure) = &result {
                warn!(task = %pending.label, error = %failure, "Pooled task failed");
            }

            results.push(TaskResult {
                id: pending.id,
                label: pending.label,
                result,
            });
        }

        BatchReport { results }
    }
}
