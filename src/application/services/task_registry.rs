//! Registry of running monitor tasks
//!
//! At most one running task exists per key. Starting a key that already
//! has a running task returns that task instead of creating another.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::domain::orders::CancelOutcome;
use crate::infrastructure::adapters::monitoring::ReconciliationMetrics;
use crate::shared::error::{AppError, AppResult};

/// Dedup key of a monitor task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MonitorKey {
    /// Per-order monitor, keyed by system order id
    Order(i64),
    /// Merchant sweep, keyed by merchant id
    Merchant(i64),
}

impl std::fmt::Display for MonitorKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MonitorKey::Order(id) => write!(f, "order:{}", id),
            MonitorKey::Merchant(id) => write!(f, "merchant:{}", id),
        }
    }
}

/// A task the registry can start, stop and hand out.
#[async_trait]
pub trait MonitorJob: Send + Sync {
    fn task_id(&self) -> &str;

    fn key(&self) -> MonitorKey;

    /// Register the task's timers.
    fn start(self: Arc<Self>) -> AppResult<()>;

    /// Halt all timers. Idempotent.
    fn stop(&self);

    fn is_running(&self) -> bool;

    /// Cancel the monitored order. Tasks that do not own a single order
    /// return `None`.
    async fn cancel(&self) -> Option<CancelOutcome> {
        None
    }
}

pub struct TaskRegistry {
    tasks: Mutex<HashMap<MonitorKey, Arc<dyn MonitorJob>>>,
    metrics: Arc<ReconciliationMetrics>,
}

impl TaskRegistry {
    pub fn new(metrics: Arc<ReconciliationMetrics>) -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            metrics,
        }
    }

    fn lock(&self) -> AppResult<MutexGuard<'_, HashMap<MonitorKey, Arc<dyn MonitorJob>>>> {
        self.tasks
            .lock()
            .map_err(|_| AppError::Internal("task registry lock poisoned".to_string()))
    }

    /// Return the running task for `key`, or build, start and register one.
    ///
    /// The check and the insert happen under one lock, so concurrent
    /// callers for the same key observe a single task.
    pub fn start_or_get<T, F>(&self, key: MonitorKey, factory: F) -> AppResult<Arc<dyn MonitorJob>>
    where
        T: MonitorJob + 'static,
        F: FnOnce() -> Arc<T>,
    {
        let mut tasks = self.lock()?;

        if let Some(existing) = tasks.get(&key) {
            if existing.is_running() {
                debug!(key = %key, task_id = %existing.task_id(), "Task already running");
                return Ok(Arc::clone(existing));
            }
        }

        let task: Arc<dyn MonitorJob> = factory();
        Arc::clone(&task).start()?;
        tasks.insert(key, Arc::clone(&task));
        self.metrics.set_active_tasks(tasks.len());

        info!(key = %key, task_id = %task.task_id(), "Monitor task started");
        Ok(task)
    }

    /// Stop and remove the task for `key`. Returns whether one existed.
    pub fn stop(&self, key: MonitorKey) -> bool {
        let removed = match self.lock() {
            Ok(mut tasks) => {
                let removed = tasks.remove(&key);
                self.metrics.set_active_tasks(tasks.len());
                removed
            }
            Err(_) => None,
        };

        match removed {
            Some(task) => {
                task.stop();
                true
            }
            None => false,
        }
    }

    /// Remove `key` only while it still maps to `task_id`. Called by a task
    /// that stopped itself.
    pub fn forget(&self, key: MonitorKey, task_id: &str) {
        if let Ok(mut tasks) = self.lock() {
            if tasks.get(&key).is_some_and(|t| t.task_id() == task_id) {
                tasks.remove(&key);
                self.metrics.set_active_tasks(tasks.len());
            }
        }
    }

    pub fn get(&self, key: MonitorKey) -> Option<Arc<dyn MonitorJob>> {
        self.lock().ok().and_then(|tasks| tasks.get(&key).cloned())
    }

    pub fn contains(&self, key: MonitorKey) -> bool {
        self.get(key).is_some_and(|t| t.is_running())
    }

    pub fn len(&self) -> usize {
        self.lock().map(|tasks| tasks.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<MonitorKey> {
        self.lock()
            .map(|tasks| tasks.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Stop every task. Returns how many were stopped.
    pub fn stop_all(&self) -> usize {
        let drained: Vec<Arc<dyn MonitorJob>> = match self.lock() {
            Ok(mut tasks) => {
                let drained = tasks.drain().map(|(_, t)| t).collect();
                self.metrics.set_active_tasks(0);
                drained
            }
            Err(_) => Vec::new(),
        };

        for task in &drained {
            task.stop();
        }
        info!(count = drained.len(), "Stopped all monitor tasks");
        drained.len()
    }
}
