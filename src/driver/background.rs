//! Tracked background sync threads

use crate::core::SyncReport;
use crate::error::{OverlaySyncError, Result};
use std::sync::{Mutex, PoisonError};
use std::thread::JoinHandle;

struct BackgroundSync {
    volume_id: String,
    handle: JoinHandle<Result<SyncReport>>,
}

/// Set of background syncs that shutdown can wait on
#[derive(Default)]
pub struct BackgroundSyncs {
    tasks: Mutex<Vec<BackgroundSync>>,
}

impl BackgroundSyncs {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `job` on a new named thread and track it
    pub fn spawn<F>(&self, volume_id: &str, job: F) -> Result<()>
    where
        F: FnOnce() -> Result<SyncReport> + Send + 'static,
    {
        let handle = std::thread::Builder::new()
            .name(format!("bg-sync-{}", volume_id))
            .spawn(job)
            .map_err(|e| OverlaySyncError::ThreadPoolError(e.to_string()))?;

        self.lock().push(BackgroundSync {
            volume_id: volume_id.to_string(),
            handle,
        });
        tracing::debug!("Started background sync for volume {}", volume_id);
        Ok(())
    }

    /// Number of tracked syncs still running
    pub fn outstanding(&self) -> usize {
        self.lock().iter().filter(|t| !t.handle.is_finished()).count()
    }

    /// Number of tracked syncs, finished or not
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check if nothing is tracked
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Collect the results of syncs that already finished
    pub fn reap_finished(&self) -> Vec<(String, Result<SyncReport>)> {
        let finished: Vec<BackgroundSync> = {
            let mut tasks = self.lock();
            let (done, running): (Vec<_>, Vec<_>) = std::mem::take(&mut *tasks)
                .into_iter()
                .partition(|t| t.handle.is_finished());
            *tasks = running;
            done
        };
        finished.into_iter().map(Self::join).collect()
    }

    /// Wait for every tracked sync
    pub fn wait_all(&self) -> Vec<(String, Result<SyncReport>)> {
        let tasks = std::mem::take(&mut *self.lock());
        if !tasks.is_empty() {
            tracing::info!("Waiting for {} background sync(s)", tasks.len());
        }
        tasks.into_iter().map(Self::join).collect()
    }

    fn join(task: BackgroundSync) -> (String, Result<SyncReport>) {
        let result = task
            .handle
            .join()
            .unwrap_or_else(|_| Err(OverlaySyncError::TaskPanicked(format!("sync {}", task.volume_id))));
        (task.volume_id, result)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<BackgroundSync>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_wait_all_collects_results() {
        let syncs = BackgroundSyncs::new();
        syncs.spawn("ok", || Ok(SyncReport::default())).unwrap();
        syncs
            .spawn("bad", || Err(OverlaySyncError::remote("upload", "/x", "denied")))
            .unwrap();
        syncs.spawn("boom", || panic!("sync blew up")).unwrap();
        assert_eq!(syncs.len(), 3);

        let mut results = syncs.wait_all();
        results.sort_by(|a, b| a.0.cmp(&b.0));

        assert!(results[0].0 == "bad" && results[0].1.is_err());
        assert!(matches!(results[1].1, Err(OverlaySyncError::TaskPanicked(_))));
        assert!(results[2].0 == "ok" && results[2].1.is_ok());
        assert!(syncs.is_empty());
    }

    #[test]
    fn test_reap_only_finished() {
        let syncs = BackgroundSyncs::new();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        syncs.spawn("fast", || Ok(SyncReport::default())).unwrap();
        syncs
            .spawn("slow", move || {
                let _ = release_rx.recv();
                Ok(SyncReport::default())
            })
            .unwrap();

        // give the fast one time to finish
        while syncs.outstanding() > 1 {
            std::thread::sleep(Duration::from_millis(5));
        }

        let reaped = syncs.reap_finished();
        assert_eq!(reaped.len(), 1);
        assert_eq!(reaped[0].0, "fast");
        assert_eq!(syncs.len(), 1);
        assert_eq!(syncs.outstanding(), 1);

        release_tx.send(()).unwrap();
        let rest = syncs.wait_all();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].0, "slow");
    }
}
