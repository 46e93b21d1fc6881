//! Per-job async mutexes.
//!
//! Every mutation of a job (dispatch, worker callbacks, cancellation,
//! download charging) runs while holding that job's lock, so two code paths
//! never race on the same row. Entries are removed once the last holder or
//! waiter lets go.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use sonora_core::types::JobId;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockMap = HashMap<JobId, Arc<AsyncMutex<()>>>;

#[derive(Default)]
pub struct JobLocks {
    map: Arc<Mutex<LockMap>>,
}

/// Held for the duration of one job mutation.
pub struct JobLockGuard {
    guard: Option<OwnedMutexGuard<()>>,
    map: Arc<Mutex<LockMap>>,
    job_id: JobId,
}

impl JobLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `job_id`.
    pub async fn lock(&self, job_id: JobId) -> JobLockGuard {
        let mutex = {
            let mut map = lock_map(&self.map);
            Arc::clone(map.entry(job_id).or_default())
        };
        let guard = mutex.lock_owned().await;
        JobLockGuard {
            guard: Some(guard),
            map: Arc::clone(&self.map),
            job_id,
        }
    }

    /// Number of jobs with a live lock entry.
    pub fn len(&self) -> usize {
        lock_map(&self.map).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for JobLockGuard {
    fn drop(&mut self) {
        let mut map = lock_map(&self.map);
        drop(self.guard.take());
        // Only the map's own reference left: nobody holds or waits.
        if map
            .get(&self.job_id)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            map.remove(&self.job_id);
        }
    }
}

fn lock_map(map: &Mutex<LockMap>) -> std::sync::MutexGuard<'_, LockMap> {
    map.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn entries_removed_after_release() {
        let locks = JobLocks::new();
        let id = JobId::now_v7();
        {
            let _guard = locks.lock(id).await;
            assert_eq!(locks.len(), 1);
        }
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn same_job_is_serialized() {
        let locks = Arc::new(JobLocks::new());
        let id = JobId::now_v7();
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let active = Arc::clone(&active);
                let max_seen = Arc::clone(&max_seen);
                tokio::spawn(async move {
                    let _guard = locks.lock(id).await;
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn different_jobs_do_not_block() {
        let locks = JobLocks::new();
        let _a = locks.lock(JobId::now_v7()).await;
        let b = tokio::time::timeout(Duration::from_millis(50), locks.lock(JobId::now_v7())).await;
        assert!(b.is_ok());
        assert_eq!(locks.len(), 2);
    }
}
