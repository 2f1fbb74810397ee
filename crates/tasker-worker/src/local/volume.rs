// Directory-backed volumes and the store that keeps task caches between
// builds of the same job.

use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tasker_common::Volume;

use super::fs;

/// A volume is a directory on the host.
#[derive(Debug)]
pub struct LocalVolume {
    handle: String,
    path: PathBuf,
    caches: Arc<TaskCacheStore>,
}

impl LocalVolume {
    pub(crate) fn new(handle: String, path: PathBuf, caches: Arc<TaskCacheStore>) -> Self {
        Self {
            handle,
            path,
            caches,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Volume for LocalVolume {
    fn handle(&self) -> &str {
        &self.handle
    }

    async fn initialize_task_cache(
        &self,
        job_id: i32,
        step_name: &str,
        path: &str,
        _privileged: bool,
    ) -> Result<()> {
        self.caches.persist(job_id, step_name, path, &self.path).await
    }
}

// ---------------------------------------------------------------------------
// TaskCacheStore
// ---------------------------------------------------------------------------

/// Cache contents keyed by (job, step name, cache path).
#[derive(Debug)]
pub struct TaskCacheStore {
    root: PathBuf,
}

impl TaskCacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn location(&self, job_id: i32, step_name: &str, path: &str) -> PathBuf {
        self.root
            .join(format!("job-{job_id}"))
            .join(escape(step_name))
            .join(escape(path))
    }

    /// Keep `contents` as the cache for `path`, replacing what was there.
    pub async fn persist(&self, job_id: i32, step_name: &str, path: &str, contents: &Path) -> Result<()> {
        let location = self.location(job_id, step_name, path);
        tracing::debug!(target: "tasker::local", job_id, step_name, path, location = %location.display(), "persisting task cache");
        fs::replace_dir(contents.to_path_buf(), location).await
    }

    /// Copy the cache for `path` into `into`. Returns whether one existed.
    pub async fn seed(&self, job_id: i32, step_name: &str, path: &str, into: &Path) -> Result<bool> {
        let location = self.location(job_id, step_name, path);
        if !location.is_dir() {
            return Ok(false);
        }
        fs::copy_dir(location, into.to_path_buf()).await?;
        Ok(true)
    }
}

/// Encode `component` as a single path element that stays inside its
/// parent: separators, `.`, `..` and the empty string are all escaped.
fn escape(component: &str) -> String {
    match component {
        "" => "%".to_string(),
        "." => "%2E".to_string(),
        ".." => "%2E%2E".to_string(),
        other => other.replace('%', "%25").replace('/', "%2F"),
    }
}
