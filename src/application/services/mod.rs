//! Application services - reservation, sessions, scheduling and monitoring

pub mod allocator;
pub mod callback_dispatcher;
pub mod merchant_sweep;
pub mod monitor_context;
pub mod order_monitor;
pub mod scheduler;
pub mod session_manager;
pub mod task_registry;

pub use allocator::AmountAllocator;
pub use callback_dispatcher::CallbackDispatcher;
pub use merchant_sweep::{MerchantSweepTask, SweepAction};
pub use monitor_context::{MonitorContext, MonitorSettings};
pub use order_monitor::OrderMonitorTask;
pub use scheduler::{Job, Scheduler, StopSignal, TokioScheduler};
pub use session_manager::SessionManager;
pub use task_registry::{MonitorJob, MonitorKey, TaskRegistry};
