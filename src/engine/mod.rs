//! Scheduling engine: worker health, retries, dispatch and preemption, and
//! the loop that runs them.

pub mod dispatch;
pub mod heartbeat;
pub mod preempt;
pub mod retry;
pub mod scheduler;

pub use scheduler::Scheduler;
