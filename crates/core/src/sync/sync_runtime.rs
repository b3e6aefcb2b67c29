//! Runtime state shared by repositories and the sync coordinator of one session.

use tokio::sync::RwLock;

use crate::config::SyncConfig;

use super::mirror_queue::MirrorQueue;
use super::outbox::MirrorOutbox;
use super::retry_policy::RetryPolicy;

/// Shared pieces of the dual-write machinery.
///
/// The write gate serializes sync pulls against user mutations: repository
/// writes hold it shared, pull/apply and bulk replace hold it exclusively.
pub struct SyncRuntime {
    retry: RetryPolicy,
    mirror_queue: MirrorQueue,
    outbox: MirrorOutbox,
    write_gate: RwLock<()>,
    outbox_max_attempts: u32,
}

impl SyncRuntime {
    pub fn new(retry: RetryPolicy, outbox_max_attempts: u32) -> Self {
        Self {
            retry,
            mirror_queue: MirrorQueue::new(),
            outbox: MirrorOutbox::new(),
            write_gate: RwLock::new(()),
            outbox_max_attempts: outbox_max_attempts.max(1),
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(
            RetryPolicy::from_config(&config.retry),
            config.outbox_max_attempts,
        )
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn mirror_queue(&self) -> &MirrorQueue {
        &self.mirror_queue
    }

    pub fn outbox(&self) -> &MirrorOutbox {
        &self.outbox
    }

    pub fn write_gate(&self) -> &RwLock<()> {
        &self.write_gate
    }

    pub fn outbox_max_attempts(&self) -> u32 {
        self.outbox_max_attempts
    }
}

impl Default for SyncRuntime {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}
