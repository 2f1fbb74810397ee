// Artifact repository: volumes produced during a build, keyed by name.
// Shared by every step of the build; later steps read what earlier steps
// registered.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::runtime::Volume;

pub type ArtifactName = String;

#[derive(Default)]
pub struct ArtifactRepository {
    artifacts: RwLock<HashMap<ArtifactName, Arc<dyn Volume>>>,
}

impl ArtifactRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `volume` under `name`, replacing any earlier artifact.
    pub fn register_artifact(&self, name: impl Into<ArtifactName>, volume: Arc<dyn Volume>) {
        let name = name.into();
        tracing::debug!(target: "tasker::artifacts", artifact = %name, volume = volume.handle(), "registering artifact");
        self.artifacts.write().insert(name, volume);
    }

    pub fn artifact_for(&self, name: &str) -> Option<Arc<dyn Volume>> {
        self.artifacts.read().get(name).cloned()
    }

    /// Look up several names under one read lock.
    pub fn resolve_all<'a, I>(&self, names: I) -> Vec<Option<Arc<dyn Volume>>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let artifacts = self.artifacts.read();
        names
            .into_iter()
            .map(|name| artifacts.get(name).cloned())
            .collect()
    }

    /// Snapshot of the current contents.
    pub fn as_map(&self) -> HashMap<ArtifactName, Arc<dyn Volume>> {
        self.artifacts.read().clone()
    }

    pub fn len(&self) -> usize {
        self.artifacts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.read().is_empty()
    }
}

impl std::fmt::Debug for ArtifactRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let artifacts = self.artifacts.read();
        let mut names: Vec<_> = artifacts.keys().collect();
        names.sort();
        f.debug_struct("ArtifactRepository")
            .field("artifacts", &names)
            .finish()
    }
}

/// Build-wide state handed to every step.
#[derive(Debug, Clone, Default)]
pub struct RunState {
    repository: Arc<ArtifactRepository>,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_repository(repository: Arc<ArtifactRepository>) -> Self {
        Self { repository }
    }

    pub fn artifact_repository(&self) -> &Arc<ArtifactRepository> {
        &self.repository
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct NamedVolume(String);

    #[async_trait]
    impl Volume for NamedVolume {
        fn handle(&self) -> &str {
            &self.0
        }

        async fn initialize_task_cache(
            &self,
            _job_id: i32,
            _step_name: &str,
            _path: &str,
            _privileged: bool,
        ) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn volume(handle: &str) -> Arc<dyn Volume> {
        Arc::new(NamedVolume(handle.to_string()))
    }

    #[test]
    fn register_and_lookup() {
        let repo = ArtifactRepository::new();
        assert!(repo.is_empty());
        assert!(repo.artifact_for("some-input").is_none());

        repo.register_artifact("some-input", volume("input1"));
        assert_eq!(repo.len(), 1);
        assert_eq!(repo.artifact_for("some-input").unwrap().handle(), "input1");
    }

    #[test]
    fn registering_again_replaces() {
        let repo = ArtifactRepository::new();
        repo.register_artifact("out", volume("first"));
        repo.register_artifact("out", volume("second"));
        assert_eq!(repo.len(), 1);
        assert_eq!(repo.artifact_for("out").unwrap().handle(), "second");
    }

    #[test]
    fn resolve_all_keeps_order() {
        let repo = ArtifactRepository::new();
        repo.register_artifact("a", volume("va"));
        let resolved = repo.resolve_all(["missing", "a"]);
        assert!(resolved[0].is_none());
        assert_eq!(resolved[1].as_ref().unwrap().handle(), "va");
    }

    #[test]
    fn run_state_shares_repository() {
        let state = RunState::new();
        let clone = state.clone();
        clone
            .artifact_repository()
            .register_artifact("shared", volume("v"));
        assert!(state.artifact_repository().artifact_for("shared").is_some());
        assert_eq!(format!("{:?}", state.artifact_repository()), r#"ArtifactRepository { artifacts: ["shared"] }"#);
    }
}
