//! Sync machinery: reconciliation, retries, mirror queue, outbox, coordinator
//! and the background scheduler.

mod mirror_queue;
mod outbox;
mod reconciliation;
mod retry_policy;
mod sync_coordinator;
mod sync_runtime;
mod sync_scheduler;

pub use mirror_queue::*;
pub use outbox::*;
pub use reconciliation::*;
pub use retry_policy::*;
pub use sync_coordinator::*;
pub use sync_runtime::*;
pub use sync_scheduler::*;
