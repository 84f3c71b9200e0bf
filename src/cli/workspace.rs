use anyhow::{anyhow, Context, Result};
use fd_lock::RwLock;
use prodflow::{InMemoryStore, WorkspaceSnapshot};
use std::fs::{self, OpenOptions};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

pub fn load_snapshot(path: &Path) -> Result<WorkspaceSnapshot> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read workspace {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Workspace {} is not a valid snapshot", path.display()))
}

/// Write via a sibling temp file so a crash never leaves a torn snapshot
pub fn save_snapshot(path: &Path, snapshot: &WorkspaceSnapshot) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, serde_json::to_string_pretty(snapshot)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Run `f` against the workspace store while holding the workspace lock.
/// The snapshot is written back only when `persist` is set and `f` succeeded.
pub async fn with_workspace<F, Fut, R>(path: &Path, persist: bool, f: F) -> Result<R>
where
    F: FnOnce(Arc<InMemoryStore>) -> Fut,
    Fut: Future<Output = Result<R>>,
{
    let lock_file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(lock_path(path))?;
    let mut lock = RwLock::new(lock_file);
    let _guard = lock.try_write().map_err(|_| {
        anyhow!(
            "Workspace {} is in use by another prodflow process",
            path.display()
        )
    })?;

    let store = Arc::new(InMemoryStore::new(load_snapshot(path)?));
    let result = f(store.clone()).await?;

    if persist {
        save_snapshot(path, &store.snapshot().await)?;
        debug!(workspace = %path.display(), "Workspace saved");
    }
    Ok(result)
}
