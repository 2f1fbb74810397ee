// The local host as the only worker of a pool.

use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use tasker_common::{
    Container, ContainerMetadata, ContainerOwner, ContainerSpec, ImageSource, Pool, StepContext,
    VolumeMount, Worker, WorkerSpec,
};
use tasker_sdk::PathUtil;

use super::container::LocalContainer;
use super::fs::{self, host_path};
use super::volume::{LocalVolume, TaskCacheStore};

pub struct LocalWorker {
    name: String,
    platform: String,
    work_dir: PathBuf,
    caches: Arc<TaskCacheStore>,
    // Entries live as long as the worker. The CLI runs one step per worker,
    // so nothing is reclaimed here; container roots stay under `work_dir`.
    volumes: DashMap<String, Arc<LocalVolume>>,
    containers: DashMap<ContainerOwner, Arc<LocalContainer>>,
}

impl LocalWorker {
    /// A worker keeping containers, volumes and caches under `work_dir`.
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        let work_dir = work_dir.into();
        let name = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| "local".to_string());
        Self {
            name,
            platform: host_platform().to_string(),
            caches: Arc::new(TaskCacheStore::new(work_dir.join("caches"))),
            work_dir,
            volumes: DashMap::new(),
            containers: DashMap::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Expose an existing host directory as a volume, e.g. to feed it to a
    /// task as an input.
    pub fn import_volume(&self, dir: impl Into<PathBuf>) -> Arc<LocalVolume> {
        self.register_volume(dir.into())
    }

    pub fn volume(&self, handle: &str) -> Option<Arc<LocalVolume>> {
        self.volumes.get(handle).map(|v| v.clone())
    }

    fn register_volume(&self, path: PathBuf) -> Arc<LocalVolume> {
        let handle = Uuid::new_v4().to_string();
        let volume = Arc::new(LocalVolume::new(handle.clone(), path, self.caches.clone()));
        self.volumes.insert(handle, volume.clone());
        volume
    }

    async fn create_container(
        &self,
        metadata: &ContainerMetadata,
        spec: &ContainerSpec,
    ) -> Result<LocalContainer> {
        let handle = Uuid::new_v4().to_string();
        let root = self.work_dir.join("containers").join(&handle);
        tokio::fs::create_dir_all(&root)
            .await
            .with_context(|| format!("failed to create container root {}", root.display()))?;

        if spec.image_spec.source != ImageSource::WorkerDefault {
            tracing::warn!(target: "tasker::local", image = ?spec.image_spec.source, "local runtime ignores the task image and runs on the host");
        }
        tracing::debug!(target: "tasker::local", limits = ?spec.limits, "container limits are not enforced locally");

        let mut mounts = Vec::new();

        for input in &spec.inputs {
            let source = self
                .volume(input.volume_handle())
                .with_context(|| format!("volume {} not found on worker {}", input.volume_handle(), self.name))?;
            let dest = host_path(&root, &input.destination_path);
            fs::copy_dir(source.path().to_path_buf(), dest.clone())
                .await
                .with_context(|| format!("failed to stream input to {}", input.destination_path))?;
            mounts.push(VolumeMount {
                volume: self.register_volume(dest),
                mount_path: input.destination_path.clone(),
            });
        }

        for path in spec.outputs.values() {
            let dir = host_path(&root, path);
            tokio::fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("failed to create output dir {}", dir.display()))?;
            mounts.push(VolumeMount {
                volume: self.register_volume(dir),
                mount_path: path.clone(),
            });
        }

        for cache in &spec.caches {
            let mount_path = PathUtil::join(&spec.dir, cache);
            let dir = host_path(&root, &mount_path);
            tokio::fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("failed to create cache dir {}", dir.display()))?;
            if metadata.job_id != 0 {
                let seeded = self.caches.seed(metadata.job_id, &metadata.step_name, cache, &dir).await?;
                tracing::debug!(target: "tasker::local", cache = %cache, seeded, "prepared task cache");
            }
            mounts.push(VolumeMount {
                volume: self.register_volume(dir),
                mount_path,
            });
        }

        tracing::info!(target: "tasker::local", container = %handle, root = %root.display(), mounts = mounts.len(), "created container");
        Ok(LocalContainer::new(handle, root, &spec.env, mounts))
    }

    /// Record `container` for `owner`. When another caller got there first,
    /// the existing container wins and this one's root and volumes are
    /// discarded.
    async fn install(&self, owner: &ContainerOwner, container: LocalContainer) -> Arc<LocalContainer> {
        let container = Arc::new(container);
        let winner = self
            .containers
            .entry(owner.clone())
            .or_insert_with(|| container.clone())
            .clone();
        if Arc::ptr_eq(&winner, &container) {
            return winner;
        }

        for mount in container.volume_mounts() {
            self.volumes.remove(mount.volume.handle());
        }
        if let Err(err) = tokio::fs::remove_dir_all(container.root()).await {
            tracing::warn!(target: "tasker::local", container = container.handle(), error = %err, "failed to remove unused container root");
        }
        winner
    }
}

#[async_trait]
impl Worker for LocalWorker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn find_or_create_container(
        &self,
        _ctx: &StepContext,
        owner: &ContainerOwner,
        metadata: &ContainerMetadata,
        spec: &ContainerSpec,
    ) -> Result<Arc<dyn Container>> {
        if let Some(existing) = self.containers.get(owner) {
            tracing::debug!(target: "tasker::local", owner = %owner, "reusing container");
            return Ok(existing.clone() as Arc<dyn Container>);
        }

        let container = self.create_container(metadata, spec).await?;
        Ok(self.install(owner, container).await as Arc<dyn Container>)
    }
}

/// Platform name workers advertise for this host.
pub fn host_platform() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    }
}

// ---------------------------------------------------------------------------
// LocalPool
// ---------------------------------------------------------------------------

/// A pool with the local worker as its only member.
pub struct LocalPool {
    worker: Arc<LocalWorker>,
}

impl LocalPool {
    pub fn new(worker: Arc<LocalWorker>) -> Self {
        Self { worker }
    }

    pub fn worker(&self) -> &Arc<LocalWorker> {
        &self.worker
    }
}

#[async_trait]
impl Pool for LocalPool {
    async fn find_or_select_worker(
        &self,
        _ctx: &StepContext,
        owner: &ContainerOwner,
        spec: &WorkerSpec,
        _metadata: &ContainerMetadata,
    ) -> Result<Arc<dyn Worker>> {
        if spec.platform != self.worker.platform() {
            anyhow::bail!(
                "no workers satisfying: platform '{}' (local worker runs '{}')",
                spec.platform,
                self.worker.platform()
            );
        }
        if !spec.tags.is_empty() {
            anyhow::bail!("no workers satisfying: tags [{}]", spec.tags.join(", "));
        }

        tracing::debug!(target: "tasker::local", owner = %owner, worker = self.worker.name(), "selected local worker");
        Ok(self.worker.clone() as Arc<dyn Worker>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tasker_common::{ContainerInput, PlanId};

    fn owner() -> ContainerOwner {
        ContainerOwner::build_step(1, PlanId::new("42"), 1)
    }

    fn metadata(job_id: i32) -> ContainerMetadata {
        ContainerMetadata {
            working_directory: "some-artifact-root".into(),
            step_name: "some-step".into(),
            job_id,
            ..Default::default()
        }
    }

    fn spec() -> ContainerSpec {
        ContainerSpec {
            dir: "some-artifact-root".into(),
            outputs: [("out".to_string(), "some-artifact-root/out/".to_string())]
                .into_iter()
                .collect(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn losing_container_is_cleaned_up() {
        let work = tempfile::tempdir().unwrap();
        let worker = LocalWorker::new(work.path());

        let first = worker.create_container(&metadata(0), &spec()).await.unwrap();
        let second = worker.create_container(&metadata(0), &spec()).await.unwrap();
        let first_handle = first.handle().to_string();
        let second_root = second.root().to_path_buf();
        let second_volumes: Vec<String> = second
            .volume_mounts()
            .iter()
            .map(|m| m.volume.handle().to_string())
            .collect();

        assert_eq!(worker.install(&owner(), first).await.handle(), first_handle);
        let kept = worker.install(&owner(), second).await;

        assert_eq!(kept.handle(), first_handle);
        assert!(kept.root().is_dir());
        assert!(!second_root.exists());
        assert!(second_volumes.iter().all(|h| worker.volume(h).is_none()));
    }

    #[tokio::test]
    async fn creates_container_with_inputs_and_outputs() {
        let work = tempfile::tempdir().unwrap();
        let src = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("file"), "input").unwrap();

        let worker = LocalWorker::new(work.path()).with_name("local-test");
        let input = worker.import_volume(src.path());
        let mut spec = spec();
        spec.inputs = vec![ContainerInput {
            volume: input,
            destination_path: "some-artifact-root/in".into(),
        }];

        let container = worker
            .find_or_create_container(&StepContext::new(), &owner(), &metadata(0), &spec)
            .await
            .unwrap();

        let mounts = container.volume_mounts();
        let paths: Vec<_> = mounts.iter().map(|m| m.mount_path.as_str()).collect();
        assert_eq!(paths, vec!["some-artifact-root/in", "some-artifact-root/out/"]);

        let root = work.path().join("containers").join(container.handle());
        assert_eq!(
            std::fs::read_to_string(root.join("some-artifact-root/in/file")).unwrap(),
            "input"
        );
        assert!(root.join("some-artifact-root/out").is_dir());

        let output = worker.volume(mounts[1].volume.handle()).unwrap();
        assert_eq!(output.path(), root.join("some-artifact-root/out"));
    }

    #[tokio::test]
    async fn same_owner_reuses_container() {
        let work = tempfile::tempdir().unwrap();
        let worker = LocalWorker::new(work.path());
        let ctx = StepContext::new();

        let first = worker
            .find_or_create_container(&ctx, &owner(), &metadata(0), &spec())
            .await
            .unwrap();
        let second = worker
            .find_or_create_container(&ctx, &owner(), &metadata(0), &spec())
            .await
            .unwrap();
        assert_eq!(first.handle(), second.handle());
    }

    #[tokio::test]
    async fn unknown_input_volume_is_an_error() {
        let work = tempfile::tempdir().unwrap();
        let other = LocalWorker::new(work.path().join("other"));
        let worker = LocalWorker::new(work.path());

        let mut spec = spec();
        spec.inputs = vec![ContainerInput {
            volume: other.import_volume(work.path()),
            destination_path: "some-artifact-root/in".into(),
        }];

        let err = worker
            .find_or_create_container(&StepContext::new(), &owner(), &metadata(0), &spec)
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("not found on worker"), "{err:#}");
    }

    #[tokio::test]
    async fn task_caches_carry_over_between_builds_of_a_job() {
        let work = tempfile::tempdir().unwrap();
        let worker = LocalWorker::new(work.path());
        let mut spec = spec();
        spec.caches = vec!["some-path-1".into()];

        let first = worker
            .find_or_create_container(&StepContext::new(), &owner(), &metadata(12), &spec)
            .await
            .unwrap();
        let cache = first
            .volume_mounts()
            .into_iter()
            .find(|m| m.mount_path == "some-artifact-root/some-path-1")
            .unwrap();
        let cache_dir = worker.volume(cache.volume.handle()).unwrap().path().to_path_buf();
        std::fs::write(cache_dir.join("warm"), "yes").unwrap();
        cache
            .volume
            .initialize_task_cache(12, "some-step", "some-path-1", false)
            .await
            .unwrap();

        let next_build = ContainerOwner::build_step(2, PlanId::new("42"), 1);
        let second = worker
            .find_or_create_container(&StepContext::new(), &next_build, &metadata(12), &spec)
            .await
            .unwrap();
        let root = work.path().join("containers").join(second.handle());
        assert_eq!(
            std::fs::read_to_string(root.join("some-artifact-root/some-path-1/warm")).unwrap(),
            "yes"
        );
    }

    #[tokio::test]
    async fn pool_checks_platform_and_tags() {
        let work = tempfile::tempdir().unwrap();
        let pool = LocalPool::new(Arc::new(LocalWorker::new(work.path()).with_name("here")));
        let ctx = StepContext::new();

        let mut spec = WorkerSpec {
            platform: host_platform().into(),
            ..Default::default()
        };
        let worker = pool
            .find_or_select_worker(&ctx, &owner(), &spec, &metadata(0))
            .await
            .unwrap();
        assert_eq!(worker.name(), "here");

        spec.tags = vec!["gpu".into()];
        assert!(pool.find_or_select_worker(&ctx, &owner(), &spec, &metadata(0)).await.is_err());

        spec.tags.clear();
        spec.platform = "plan9".into();
        let err = pool
            .find_or_select_worker(&ctx, &owner(), &spec, &metadata(0))
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("platform 'plan9'"));
    }
}
