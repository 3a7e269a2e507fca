use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per output path.
///
/// Files are already published with an atomic rename; the lock additionally
/// keeps two writers in this process from regenerating the same file at once.
#[derive(Debug, Clone, Default)]
pub struct PathLocks {
    locks: Arc<DashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `path`.
    pub async fn lock(&self, path: &Path) -> OwnedMutexGuard<()> {
        let mutex = self
            .locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_path_is_exclusive() {
        let locks = PathLocks::new();
        let path = PathBuf::from("/tmp/etalab.nt");

        let guard = locks.lock(&path).await;
        let waiting = {
            let locks = locks.clone();
            let path = path.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(&path).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiting.is_finished());
        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiting)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn distinct_paths_do_not_block() {
        let locks = PathLocks::new();
        let _a = locks.lock(Path::new("/tmp/a.csv")).await;
        let b = tokio::time::timeout(Duration::from_secs(1), locks.lock(Path::new("/tmp/b.csv")));
        assert!(b.await.is_ok());
    }
}
