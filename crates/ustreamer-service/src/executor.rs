// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Strictly sequential execution context.
//!
//! A single tokio task drains a queue of futures, running each to completion
//! before starting the next. Dispatch-table mutations and handler side-effect
//! publishes are submitted here, so they never race each other.

use crate::status::{UCode, UStatus};
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Single-worker FIFO executor.
pub struct SerialExecutor {
    name: String,
    queue: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SerialExecutor {
    /// Spawn the worker task on the current runtime.
    ///
    /// # Panics
    /// Panics if called outside a tokio runtime.
    pub fn spawn(name: impl Into<String>) -> Self {
        let name = name.into();
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();

        let worker_name = name.clone();
        let worker = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job.await;
            }
            tracing::debug!("Executor '{}' drained", worker_name);
        });

        Self {
            name,
            queue: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Queue a job without waiting for it.
    ///
    /// Fails with `Unavailable` once the executor is shut down.
    pub fn execute<F>(&self, job: F) -> Result<(), UStatus>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let queue = self.queue.lock();
        let tx = queue.as_ref().ok_or_else(|| self.rejected())?;
        tx.send(Box::pin(job)).map_err(|_| self.rejected())
    }

    /// Queue a job and wait for its result.
    pub async fn submit<F, T>(&self, job: F) -> Result<T, UStatus>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.execute(async move {
            let _ = reply_tx.send(job.await);
        })?;
        reply_rx.await.map_err(|_| {
            UStatus::fail_with_code(
                UCode::Aborted,
                format!("executor '{}' dropped the job", self.name),
            )
        })
    }

    /// Stop accepting jobs. Already-queued jobs still run.
    pub fn shutdown(&self) {
        if self.queue.lock().take().is_some() {
            tracing::debug!("Executor '{}' shutting down", self.name);
        }
    }

    /// Check if the executor stopped accepting jobs.
    pub fn is_shutdown(&self) -> bool {
        self.queue.lock().is_none()
    }

    /// Wait up to `timeout` for queued jobs to finish. Returns `true` when drained.
    ///
    /// Only meaningful after [`shutdown`](Self::shutdown).
    pub async fn join(&self, timeout: Duration) -> bool {
        let Some(worker) = self.worker.lock().take() else {
            return true;
        };
        match tokio::time::timeout(timeout, worker).await {
            Ok(_) => true,
            Err(_) => {
                tracing::warn!(
                    "Executor '{}' did not drain within {:?}",
                    self.name,
                    timeout
                );
                false
            }
        }
    }

    /// Executor name.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn rejected(&self) -> UStatus {
        UStatus::fail_with_code(
            UCode::Unavailable,
            format!("executor '{}' is shut down", self.name),
        )
    }
}

impl Drop for SerialExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn jobs_run_in_submission_order() {
        let executor = SerialExecutor::spawn("test-order");
        let log = Arc::new(Mutex::new(Vec::new()));

        for i in 0..20 {
            let log = log.clone();
            executor
                .execute(async move {
                    // Later jobs must not overtake a job that yields.
                    if i % 3 == 0 {
                        tokio::task::yield_now().await;
                    }
                    log.lock().push(i);
                })
                .expect("execute");
        }

        executor.shutdown();
        assert!(executor.join(Duration::from_secs(5)).await);
        assert_eq!(*log.lock(), (0..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn submit_returns_result() {
        let executor = SerialExecutor::spawn("test-submit");
        let value = executor.submit(async { 40 + 2 }).await.expect("submit");
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn shutdown_rejects_new_jobs_but_drains_queue() {
        let executor = SerialExecutor::spawn("test-shutdown");
        let ran = Arc::new(Mutex::new(false));
        let flag = ran.clone();
        executor
            .execute(async move {
                *flag.lock() = true;
            })
            .expect("execute");

        executor.shutdown();
        assert!(executor.is_shutdown());

        let err = executor.execute(async {}).unwrap_err();
        assert_eq!(err.code, UCode::Unavailable);
        let err = executor.submit(async { 1 }).await.unwrap_err();
        assert_eq!(err.code, UCode::Unavailable);

        assert!(executor.join(Duration::from_secs(5)).await);
        assert!(*ran.lock());
        // Joining twice is harmless.
        assert!(executor.join(Duration::from_millis(10)).await);
    }
}
