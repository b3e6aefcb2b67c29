//! Per-entity FIFO execution of background mirror jobs.
//!
//! Jobs submitted under the same key run one after another in submission
//! order; jobs under different keys run concurrently. Callers never wait on a
//! job unless they hold on to its [`MirrorTicket`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::{join_all, BoxFuture, FutureExt, Shared};

type MirrorTask = Shared<BoxFuture<'static, ()>>;
type Tails = Arc<Mutex<HashMap<String, (u64, MirrorTask)>>>;

/// Handle to a submitted job.
#[must_use = "drop the ticket to fire and forget"]
pub struct MirrorTicket(MirrorTask);

impl MirrorTicket {
    /// Resolves once the job (and everything queued before it) has finished.
    pub async fn finished(self) {
        self.0.await
    }
}

#[derive(Default)]
pub struct MirrorQueue {
    tails: Tails,
    next_seq: AtomicU64,
}

fn lock_tails(tails: &Tails) -> std::sync::MutexGuard<'_, HashMap<String, (u64, MirrorTask)>> {
    match tails.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl MirrorQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `job` behind every earlier job for `key` and spawn it.
    pub fn submit<F>(&self, key: impl Into<String>, job: F) -> MirrorTicket
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.submit_behind(key, None, job)
    }

    /// Like [`Self::submit`], but the job also waits for the jobs already
    /// queued under `after`. Later jobs for `after` do not wait for this one.
    pub fn submit_behind<F>(&self, key: impl Into<String>, after: Option<&str>, job: F) -> MirrorTicket
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let key = key.into();
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let cleanup_tails = Arc::clone(&self.tails);
        let cleanup_key = key.clone();

        let mut tails = lock_tails(&self.tails);
        let previous = tails.get(&key).map(|(_, task)| task.clone());
        let dependency = after
            .filter(|after| *after != key)
            .and_then(|after| tails.get(after))
            .map(|(_, task)| task.clone());
        let task: MirrorTask = async move {
            if let Some(previous) = previous {
                previous.await;
            }
            if let Some(dependency) = dependency {
                dependency.await;
            }
            job.await;
            let mut tails = lock_tails(&cleanup_tails);
            if tails.get(&cleanup_key).map(|(tail_seq, _)| *tail_seq) == Some(seq) {
                tails.remove(&cleanup_key);
            }
        }
        .boxed()
        .shared();
        tails.insert(key, (seq, task.clone()));
        drop(tails);

        tokio::spawn(task.clone());
        MirrorTicket(task)
    }

    /// Number of keys with unfinished jobs.
    pub fn in_flight(&self) -> usize {
        lock_tails(&self.tails).len()
    }

    /// Wait until every job submitted so far (and any queued meanwhile) has run.
    pub async fn wait_idle(&self) {
        loop {
            let tasks: Vec<MirrorTask> = lock_tails(&self.tails)
                .values()
                .map(|(_, task)| task.clone())
                .collect();
            if tasks.is_empty() {
                return;
            }
            join_all(tasks).await;
        }
    }
}
