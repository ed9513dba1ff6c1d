//! Biomatch Core - Bounded Parallel Executor
//!
//! Fan-out/join for CPU-bound jobs. Each job runs on the blocking pool
//! under a semaphore permit and a per-task timeout. The semaphore belongs
//! to the executor, so every clone and every concurrent batch draws from
//! the same `max_workers` permits. A job that fails,
//! panics or times out yields its own outcome and never aborts its
//! siblings. Cancellation aborts the whole batch and returns no partial
//! results.

use std::sync::Arc;
use std::time::Duration;

use sysinfo::System;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;

use crate::error::{CoreError, CoreResult};

/// Worker pool settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExecutorConfig {
    /// Maximum jobs running at once
    pub max_workers: usize,
    /// Deadline for a single job once it has a worker
    pub task_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            task_timeout: Duration::from_secs(5),
        }
    }
}

impl ExecutorConfig {
    /// Worker bound taken from the host CPU count
    pub fn auto_tuned() -> Self {
        let sys = System::new_all();
        let cpus = sys.cpus().len().clamp(1, 16);
        log::debug!("auto-tuned executor to {} workers", cpus);
        Self {
            max_workers: cpus,
            ..Self::default()
        }
    }
}

/// Cooperative cancellation shared by every task of one request
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once `cancel` has been called
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Result of one job
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome<T> {
    Completed(T),
    /// Job ran but had nothing to return
    Empty,
    TimedOut,
    Failed(String),
}

impl<T> TaskOutcome<T> {
    pub fn into_option(self) -> Option<T> {
        match self {
            Self::Completed(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

/// Semaphore-bounded executor over the blocking thread pool
#[derive(Debug, Clone)]
pub struct BoundedExecutor {
    config: ExecutorConfig,
    permits: Arc<Semaphore>,
}

impl Default for BoundedExecutor {
    fn default() -> Self {
        Self::new(ExecutorConfig::default())
    }
}

impl BoundedExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_workers.max(1)));
        Self { config, permits }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run every job; outcomes come back in job order
    pub async fn run_all<T, F>(
        &self,
        jobs: impl IntoIterator<Item = F>,
        cancel: &CancelToken,
    ) -> CoreResult<Vec<TaskOutcome<T>>>
    where
        T: Send + 'static,
        F: FnOnce() -> Option<T> + Send + 'static,
    {
        self.run_all_observed(jobs, cancel, |_, _| {}).await
    }

    /// Like `run_all`, calling `on_done` as each job finishes
    pub async fn run_all_observed<T, F>(
        &self,
        jobs: impl IntoIterator<Item = F>,
        cancel: &CancelToken,
        mut on_done: impl FnMut(usize, &TaskOutcome<T>),
    ) -> CoreResult<Vec<TaskOutcome<T>>>
    where
        T: Send + 'static,
        F: FnOnce() -> Option<T> + Send + 'static,
    {
        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }

        let semaphore = self.permits.clone();
        let timeout = self.config.task_timeout;
        let mut set = JoinSet::new();
        let mut count = 0usize;

        for (index, job) in jobs.into_iter().enumerate() {
            let semaphore = semaphore.clone();
            set.spawn(async move {
                let permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return (index, TaskOutcome::Failed("worker pool closed".into())),
                };
                // The permit lives as long as the blocking job, even past
                // its deadline, so timed-out work still counts against the bound.
                let handle = tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    job()
                });
                let outcome = match tokio::time::timeout(timeout, handle).await {
                    Ok(Ok(Some(value))) => TaskOutcome::Completed(value),
                    Ok(Ok(None)) => TaskOutcome::Empty,
                    Ok(Err(e)) => TaskOutcome::Failed(e.to_string()),
                    Err(_) => TaskOutcome::TimedOut,
                };
                (index, outcome)
            });
            count += 1;
        }

        let mut slots: Vec<Option<TaskOutcome<T>>> = (0..count).map(|_| None).collect();
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    set.abort_all();
                    log::debug!("executor batch of {} cancelled", count);
                    return Err(CoreError::Cancelled);
                }
                joined = set.join_next() => match joined {
                    None => break,
                    Some(Ok((index, outcome))) => {
                        on_done(index, &outcome);
                        slots[index] = Some(outcome);
                    }
                    Some(Err(e)) => log::warn!("executor task did not finish: {}", e),
                },
            }
        }

        Ok(slots
            .into_iter()
            .map(|slot| slot.unwrap_or_else(|| TaskOutcome::Failed("task lost".into())))
            .collect())
    }
}
