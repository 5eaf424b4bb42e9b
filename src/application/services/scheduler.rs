//! Timer scheduling for monitor tasks
//!
//! Every job runs on its own tokio task. Ticks of one job never overlap:
//! the loop awaits the job future before waiting for the next tick, and a
//! slow tick delays the schedule instead of bursting. Cancelling a job
//! signals its loop rather than aborting it, so a job may cancel itself
//! from inside its own tick.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, trace};

use crate::shared::error::{AppError, AppResult};

/// Job body. Called once per tick.
pub type Job = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// One-shot stop flag that async code can wait on.
#[derive(Clone)]
pub struct StopSignal {
    inner: Arc<StopInner>,
}

struct StopInner {
    fired: AtomicBool,
    tx: watch::Sender<bool>,
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            inner: Arc::new(StopInner {
                fired: AtomicBool::new(false),
                tx,
            }),
        }
    }

    /// Fire the signal. Only the first call returns true.
    pub fn fire(&self) -> bool {
        if self.inner.fired.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.inner.tx.send_replace(true);
        true
    }

    pub fn is_fired(&self) -> bool {
        self.inner.fired.load(Ordering::Acquire)
    }

    /// Resolves once the signal has fired.
    pub async fn fired(&self) {
        let mut rx = self.inner.tx.subscribe();
        let _ = rx.wait_for(|fired| *fired).await;
    }
}

/// Periodic and one-shot timers keyed by job id.
pub trait Scheduler: Send + Sync {
    /// Run `job` every `interval`, first one interval from now.
    fn every(&self, job_id: &str, interval: Duration, job: Job) -> AppResult<()>;

    /// Run `job` once after `delay`.
    fn after(&self, job_id: &str, delay: Duration, job: Job) -> AppResult<()>;

    /// Stop further runs. Returns whether the job was scheduled.
    fn cancel(&self, job_id: &str) -> bool;

    fn is_scheduled(&self, job_id: &str) -> bool;

    fn active_jobs(&self) -> usize;
}

struct ScheduledJob {
    generation: u64,
    stop: StopSignal,
}

/// [`Scheduler`] on the tokio timer wheel.
#[derive(Clone, Default)]
pub struct TokioScheduler {
    jobs: Arc<Mutex<HashMap<String, ScheduledJob>>>,
    generation: Arc<AtomicU64>,
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, job_id: &str) -> AppResult<(u64, StopSignal)> {
        let mut jobs = self
            .jobs
            .lock()
            .map_err(|_| AppError::Internal("scheduler lock poisoned".to_string()))?;

        if jobs.contains_key(job_id) {
            return Err(AppError::Validation(format!("job {} is already scheduled", job_id)));
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let stop = StopSignal::new();
        jobs.insert(
            job_id.to_string(),
            ScheduledJob {
                generation,
                stop: stop.clone(),
            },
        );
        Ok((generation, stop))
    }

    /// Drop the entry if it still belongs to this run of the job.
    fn release(jobs: &Mutex<HashMap<String, ScheduledJob>>, job_id: &str, generation: u64) {
        if let Ok(mut jobs) = jobs.lock() {
            if jobs.get(job_id).is_some_and(|j| j.generation == generation) {
                jobs.remove(job_id);
            }
        }
    }
}

impl Scheduler for TokioScheduler {
    fn every(&self, job_id: &str, interval: Duration, job: Job) -> AppResult<()> {
        if interval.is_zero() {
            return Err(AppError::Configuration(format!(
                "job {} needs a non-zero interval",
                job_id
            )));
        }

        let (generation, stop) = self.register(job_id)?;
        let jobs = Arc::clone(&self.jobs);
        let job_id = job_id.to_string();

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = stop.fired() => break,
                    _ = ticker.tick() => {
                        trace!(job_id = %job_id, "Tick");
                        job().await;
                        if stop.is_fired() {
                            break;
                        }
                    }
                }
            }

            debug!(job_id = %job_id, "Periodic job finished");
            Self::release(&jobs, &job_id, generation);
        });

        Ok(())
    }

    fn after(&self, job_id: &str, delay: Duration, job: Job) -> AppResult<()> {
        let (generation, stop) = self.register(job_id)?;
        let jobs = Arc::clone(&self.jobs);
        let job_id = job_id.to_string();

        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = stop.fired() => {}
                _ = tokio::time::sleep(delay) => {
                    trace!(job_id = %job_id, "Delayed job firing");
                    job().await;
                }
            }
            Self::release(&jobs, &job_id, generation);
        });

        Ok(())
    }

    fn cancel(&self, job_id: &str) -> bool {
        let removed = match self.jobs.lock() {
            Ok(mut jobs) => jobs.remove(job_id),
            Err(_) => None,
        };

        match removed {
            Some(job) => {
                job.stop.fire();
                debug!(job_id = %job_id, "Job cancelled");
                true
            }
            None => false,
        }
    }

    fn is_scheduled(&self, job_id: &str) -> bool {
        self.jobs
            .lock()
            .map(|jobs| jobs.contains_key(job_id))
            .unwrap_or(false)
    }

    fn active_jobs(&self) -> usize {
        self.jobs.lock().map(|jobs| jobs.len()).unwrap_or(0)
    }
}
