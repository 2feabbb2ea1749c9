//! Background job dispatcher.
//!
//! Polls the store every `poll_interval` for queued jobs at automated stages
//! and hands each one to the [`StageRunner`] on its own task. A semaphore
//! bounds how many jobs this process runs at once; the store's versioned
//! writes decide the winner when two workers pick the same job.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use forma_core::types::DbId;
use forma_db::{JobStore, StoreError};
use forma_pipeline::StageRunner;

pub struct JobDispatcher {
    store: Arc<dyn JobStore>,
    runner: Arc<StageRunner>,
    semaphore: Arc<Semaphore>,
    /// Jobs with a task already spawned in this process.
    in_flight: Arc<Mutex<HashSet<DbId>>>,
    tasks: TaskTracker,
    poll_interval: Duration,
}

impl JobDispatcher {
    pub fn new(
        store: Arc<dyn JobStore>,
        runner: Arc<StageRunner>,
        max_concurrent_jobs: usize,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            runner,
            semaphore: Arc::new(Semaphore::new(max_concurrent_jobs.max(1))),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            tasks: TaskTracker::new(),
            poll_interval,
        }
    }

    /// Run the dispatcher loop until the cancellation token is triggered,
    /// then wait for the jobs already running to stop at their next write.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        tracing::info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            worker = self.runner.worker_name(),
            "Job dispatcher started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Job dispatcher shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    match self.try_dispatch().await {
                        Ok(0) => {}
                        Ok(spawned) => tracing::debug!(spawned, "Dispatch cycle"),
                        Err(e) => tracing::error!(error = %e, "Dispatch cycle failed"),
                    }
                }
            }
        }

        self.tasks.close();
        self.tasks.wait().await;
        tracing::info!("Job dispatcher stopped");
    }

    /// One dispatch cycle: fill the free slots with runnable jobs. Returns
    /// how many jobs were handed to the runner.
    pub async fn try_dispatch(&self) -> Result<usize, StoreError> {
        let available = self.semaphore.available_permits();
        if available == 0 {
            return Ok(0);
        }

        let jobs = self.store.list_runnable(None, available as i64).await?;
        let mut spawned = 0;
        for job in jobs {
            let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() else {
                break;
            };
            if !self.mark_in_flight(job.id) {
                continue;
            }

            let runner = Arc::clone(&self.runner);
            let in_flight = Arc::clone(&self.in_flight);
            let job_id = job.id;
            self.tasks.spawn(async move {
                let _permit = permit;
                match runner.run(job_id).await {
                    Ok(job) => tracing::info!(
                        job_id,
                        stage = %job.stage,
                        status = %job.status,
                        "Job run finished",
                    ),
                    // Another worker got there first.
                    Err(e) if e.is_conflict() || e.code() == "GUARD_VIOLATION" => {
                        tracing::debug!(job_id, error = %e, "Job claimed elsewhere")
                    }
                    Err(e) => tracing::error!(job_id, error = %e, "Job run failed"),
                }
                if let Ok(mut set) = in_flight.lock() {
                    set.remove(&job_id);
                }
            });
            spawned += 1;
        }
        Ok(spawned)
    }

    /// Jobs this process is currently running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().map(|set| set.len()).unwrap_or(0)
    }

    fn mark_in_flight(&self, job_id: DbId) -> bool {
        match self.in_flight.lock() {
            Ok(mut set) => set.insert(job_id),
            Err(_) => false,
        }
    }
}
