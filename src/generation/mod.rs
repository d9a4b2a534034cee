pub mod jobs;
pub mod lock;
pub mod orchestrator;
pub mod scheduler;

pub use jobs::JobTracker;
pub use lock::{UserLockGuard, UserLocks};
pub use orchestrator::{GenerationReport, TimelineGenerator};
pub use scheduler::{run_realtime_tick, RealtimeScheduler, TickSummary};
