// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Mutual exclusion on a named resource.
//!
//! [`FileLocker`] takes an advisory, cross-process lock on a sidecar
//! `<resource>.lock` file. It is cooperative: only holders going through the
//! same mechanism are excluded. [`MemoryLocker`] offers the same contract
//! inside a single process.

use std::collections::HashMap;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use fs4::FileExt;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

use crate::context::Context;
use crate::errors::{StoreError, StoreResult};

const LOCK_SUFFIX: &str = ".lock";

/// Sidecar lock file path for a resource.
pub fn lock_path_for(resource: &Path) -> PathBuf {
    let mut name = resource
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(LOCK_SUFFIX);
    resource.with_file_name(name)
}

pub(crate) fn is_lock_file(name: &str) -> bool {
    name.ends_with(LOCK_SUFFIX)
}

/// A single non-blocking lock attempt. Polling and deadlines live in [`acquire`].
///
/// Implementations may do blocking filesystem work; [`acquire`] runs them on
/// the blocking thread pool.
pub trait Locker: Send + Sync + fmt::Debug {
    /// `Ok(None)` when another holder has the resource.
    fn try_lock(&self, resource: &Path) -> StoreResult<Option<LockGuard>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FileLocker;

impl Locker for FileLocker {
    fn try_lock(&self, resource: &Path) -> StoreResult<Option<LockGuard>> {
        let path = lock_path_for(resource);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| StoreError::io("open lock file", &path, e))?;

        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => Ok(Some(LockGuard::new(resource, Held::File(file)))),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(StoreError::io("lock file", path, e)),
        }
    }
}

/// In-process locker keyed by resource path.
#[derive(Debug, Default)]
pub struct MemoryLocker {
    locks: Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>,
}

impl MemoryLocker {
    pub fn new() -> Self {
        MemoryLocker::default()
    }
}

impl Locker for MemoryLocker {
    fn try_lock(&self, resource: &Path) -> StoreResult<Option<LockGuard>> {
        let mutex = self
            .locks
            .lock()
            .entry(resource.to_path_buf())
            .or_default()
            .clone();

        Ok(mutex
            .try_lock_owned()
            .ok()
            .map(|guard| LockGuard::new(resource, Held::Memory(guard))))
    }
}

enum Held {
    File(File),
    Memory(OwnedMutexGuard<()>),
}

/// Proof of holding the lock on a resource. Released on [`LockGuard::release`] or drop.
pub struct LockGuard {
    resource: PathBuf,
    held: Option<Held>,
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard")
            .field("resource", &self.resource)
            .field("held", &self.held.is_some())
            .finish()
    }
}

impl LockGuard {
    fn new(resource: &Path, held: Held) -> Self {
        LockGuard {
            resource: resource.to_path_buf(),
            held: Some(held),
        }
    }

    pub fn resource(&self) -> &Path {
        &self.resource
    }

    /// Release explicitly, surfacing unlock failures.
    pub fn release(mut self) -> StoreResult<()> {
        self.unlock()
    }

    fn unlock(&mut self) -> StoreResult<()> {
        match self.held.take() {
            Some(Held::File(file)) => FileExt::unlock(&file)
                .map_err(|e| StoreError::io("unlock file", lock_path_for(&self.resource), e)),
            Some(Held::Memory(guard)) => {
                drop(guard);
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = self.unlock() {
            warn!(resource = %self.resource.display(), error = %e, "failed to release lock");
        }
    }
}

/// Poll `locker` until the lock is obtained, the wait bound passes, or `ctx` is cancelled.
///
/// The wait bound is the earlier of `timeout` and the context deadline.
pub async fn acquire(
    locker: &Arc<dyn Locker>,
    resource: &Path,
    ctx: &Context,
    timeout: Duration,
    poll: Duration,
) -> StoreResult<LockGuard> {
    const OP: &str = "acquire lock";

    let started = Instant::now();
    let deadline = match ctx.deadline() {
        Some(d) => d.min(started + timeout),
        None => started + timeout,
    };

    loop {
        if ctx.is_cancelled() {
            return Err(StoreError::Cancelled { op: OP });
        }

        if let Some(guard) = try_lock_blocking(locker, resource).await? {
            debug!(resource = %resource.display(), waited = ?started.elapsed(), "lock acquired");
            return Ok(guard);
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(StoreError::LockTimeout {
                path: resource.to_path_buf(),
                waited: now - started,
            });
        }

        tokio::select! {
            _ = ctx.token().cancelled() => return Err(StoreError::Cancelled { op: OP }),
            _ = sleep(poll.min(deadline - now)) => {}
        }
    }
}

async fn try_lock_blocking(locker: &Arc<dyn Locker>, resource: &Path) -> StoreResult<Option<LockGuard>> {
    let task = {
        let locker = Arc::clone(locker);
        let resource = resource.to_path_buf();
        tokio::task::spawn_blocking(move || locker.try_lock(&resource))
    };
    task.await
        .map_err(|e| StoreError::io("lock task", lock_path_for(resource), std::io::Error::other(e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind as StoreErrorKind;
    use tracing_test::traced_test;

    const TIMEOUT: Duration = Duration::from_millis(300);
    const POLL: Duration = Duration::from_millis(20);

    fn lockers() -> Vec<Arc<dyn Locker>> {
        vec![Arc::new(FileLocker), Arc::new(MemoryLocker::new())]
    }

    #[test]
    fn test_lock_path_for() {
        assert_eq!(
            lock_path_for(Path::new("/s/certs/metadata.json")),
            PathBuf::from("/s/certs/metadata.json.lock")
        );
        assert!(is_lock_file("metadata.json.lock"));
        assert!(!is_lock_file("metadata.json"));
    }

    #[test]
    fn test_try_lock_excludes_second_holder() {
        let dir = tempfile::tempdir().unwrap();
        let resource = dir.path().join("metadata.json");

        for locker in lockers() {
            let guard = locker.try_lock(&resource).unwrap().expect("free lock");
            assert_eq!(guard.resource(), resource.as_path());
            assert!(locker.try_lock(&resource).unwrap().is_none(), "{locker:?}");

            guard.release().unwrap();
            let again = locker.try_lock(&resource).unwrap();
            assert!(again.is_some(), "{locker:?}");
        }
    }

    #[test]
    fn test_drop_releases() {
        let dir = tempfile::tempdir().unwrap();
        let resource = dir.path().join("metadata.json");

        for locker in lockers() {
            {
                let _guard = locker.try_lock(&resource).unwrap().unwrap();
            }
            assert!(locker.try_lock(&resource).unwrap().is_some());
        }
    }

    #[test]
    fn test_distinct_resources_do_not_conflict() {
        let dir = tempfile::tempdir().unwrap();

        for locker in lockers() {
            let _a = locker.try_lock(&dir.path().join("a")).unwrap().unwrap();
            assert!(locker.try_lock(&dir.path().join("b")).unwrap().is_some());
        }
    }

    #[test]
    fn test_file_lock_in_missing_directory_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let resource = dir.path().join("missing").join("metadata.json");

        let err = FileLocker.try_lock(&resource).unwrap_err();
        assert_eq!(err.kind(), StoreErrorKind::Io);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_acquire_times_out_while_held() {
        let dir = tempfile::tempdir().unwrap();
        let resource = dir.path().join("metadata.json");

        for locker in lockers() {
            let held = locker.try_lock(&resource).unwrap().unwrap();

            let started = std::time::Instant::now();
            let err = acquire(&locker, &resource, &Context::new(), TIMEOUT, POLL)
                .await
                .unwrap_err();
            assert_eq!(err.kind(), StoreErrorKind::LockTimeout);
            assert!(started.elapsed() >= TIMEOUT);

            held.release().unwrap();
            let guard = acquire(&locker, &resource, &Context::new(), TIMEOUT, POLL).await;
            assert!(guard.is_ok());
        }
    }

    #[tokio::test]
    async fn test_acquire_honours_context_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let resource = dir.path().join("metadata.json");
        let locker: Arc<dyn Locker> = Arc::new(MemoryLocker::new());
        let _held = locker.try_lock(&resource).unwrap().unwrap();

        let ctx = Context::with_timeout(Duration::from_millis(50));
        let started = std::time::Instant::now();
        let err = acquire(&locker, &resource, &ctx, Duration::from_secs(30), POLL)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), StoreErrorKind::LockTimeout);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_acquire_cancelled_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let resource = dir.path().join("metadata.json");
        let ctx = Context::new();
        ctx.cancel();

        for locker in lockers() {
            let err = acquire(&locker, &resource, &ctx, TIMEOUT, POLL)
                .await
                .unwrap_err();
            assert_eq!(err.kind(), StoreErrorKind::Cancelled);
        }
    }

    #[tokio::test]
    async fn test_acquire_cancelled_while_waiting() {
        let dir = tempfile::tempdir().unwrap();
        let resource = dir.path().join("metadata.json");
        let _held = FileLocker.try_lock(&resource).unwrap().unwrap();
        let locker: Arc<dyn Locker> = Arc::new(FileLocker);

        let ctx = Context::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let err = acquire(&locker, &resource, &ctx, Duration::from_secs(30), POLL)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), StoreErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn test_acquire_waits_for_release() {
        let dir = tempfile::tempdir().unwrap();
        let resource = dir.path().join("metadata.json");
        let held = FileLocker.try_lock(&resource).unwrap().unwrap();

        tokio::spawn(async move {
            sleep(Duration::from_millis(60)).await;
            held.release().unwrap();
        });

        let locker: Arc<dyn Locker> = Arc::new(FileLocker);
        let guard = acquire(&locker, &resource, &Context::new(), Duration::from_secs(5), POLL)
            .await
            .unwrap();
        assert_eq!(guard.resource(), resource.as_path());
    }

    /// Blocks the calling thread before delegating, like a lock file on a slow disk.
    #[derive(Debug, Default)]
    struct SlowLocker {
        inner: MemoryLocker,
    }

    impl Locker for SlowLocker {
        fn try_lock(&self, resource: &Path) -> StoreResult<Option<LockGuard>> {
            std::thread::sleep(Duration::from_millis(200));
            self.inner.try_lock(resource)
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_acquire_does_not_block_the_runtime() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let dir = tempfile::tempdir().unwrap();
        let resource = dir.path().join("metadata.json");
        let locker: Arc<dyn Locker> = Arc::new(SlowLocker::default());

        let ticks = Arc::new(AtomicUsize::new(0));
        let ticker = {
            let ticks = Arc::clone(&ticks);
            tokio::spawn(async move {
                loop {
                    sleep(Duration::from_millis(10)).await;
                    ticks.fetch_add(1, Ordering::Relaxed);
                }
            })
        };

        let guard = acquire(&locker, &resource, &Context::new(), Duration::from_secs(5), POLL)
            .await
            .unwrap();
        ticker.abort();

        assert_eq!(guard.resource(), resource.as_path());
        assert!(ticks.load(Ordering::Relaxed) >= 5, "runtime stalled during lock attempt");
    }
}
