// Maps a task's declared inputs, outputs and caches onto artifacts and
// container paths.
//
// Before the container exists, inputs are looked up in the artifact
// repository and every path is placed under the working directory. Once it
// exists, its mounts are indexed by path so outputs can be registered and
// caches initialized from the volumes actually mounted there.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::Context;
use tasker_common::{
    ArtifactRepository, ContainerInput, TaskConfig, TaskPlan, Volume, VolumeMount,
};
use tasker_sdk::PathUtil;

use crate::errors::TaskStepError;

/// Resolve every declared input against the repository.
///
/// Optional inputs that are absent are skipped. All required inputs that
/// are absent are reported together, by their declared names.
pub fn resolve_inputs(
    plan: &TaskPlan,
    config: &TaskConfig,
    repository: &ArtifactRepository,
    working_dir: &str,
) -> Result<Vec<ContainerInput>, TaskStepError> {
    let sources = repository.resolve_all(config.inputs.iter().map(|i| plan.input_source(&i.name)));

    let mut inputs = Vec::with_capacity(config.inputs.len());
    let mut missing = Vec::new();

    for (input, volume) in config.inputs.iter().zip(sources) {
        match volume {
            Some(volume) => inputs.push(ContainerInput {
                volume,
                destination_path: PathUtil::join(working_dir, input.relative_path()),
            }),
            None if input.optional => {
                tracing::debug!(target: "tasker::io", input = %input.name, "optional input not present, skipping");
            }
            None => missing.push(input.name.clone()),
        }
    }

    if !missing.is_empty() {
        return Err(TaskStepError::MissingInputs { inputs: missing });
    }

    Ok(inputs)
}

/// Output name → directory it is collected from, with a trailing separator.
pub fn output_paths(config: &TaskConfig, working_dir: &str) -> BTreeMap<String, String> {
    config
        .outputs
        .iter()
        .map(|output| {
            (
                output.name.clone(),
                PathUtil::join_dir(working_dir, output.relative_path()),
            )
        })
        .collect()
}

/// Cache paths as configured. The runtime places them under the working
/// directory.
pub fn cache_paths(config: &TaskConfig) -> Vec<String> {
    config.caches.iter().map(|c| c.path.clone()).collect()
}

/// Volumes mounted into a container, keyed by normalized mount path.
#[derive(Default)]
pub struct MountIndex {
    by_path: HashMap<String, Arc<dyn Volume>>,
}

impl MountIndex {
    pub fn new(mounts: &[VolumeMount]) -> Self {
        let by_path = mounts
            .iter()
            .map(|m| (PathUtil::comparison_key(&m.mount_path), m.volume.clone()))
            .collect();
        Self { by_path }
    }

    pub fn volume_at(&self, path: &str) -> Option<&Arc<dyn Volume>> {
        self.by_path.get(&PathUtil::comparison_key(path))
    }

    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }
}

/// Register each output's mounted volume, under its mapped name.
/// Returns how many outputs were registered.
pub fn register_outputs(
    plan: &TaskPlan,
    config: &TaskConfig,
    working_dir: &str,
    mounts: &MountIndex,
    repository: &ArtifactRepository,
) -> usize {
    let mut registered = 0;
    for output in &config.outputs {
        let path = PathUtil::join(working_dir, output.relative_path());
        match mounts.volume_at(&path) {
            Some(volume) => {
                repository.register_artifact(plan.output_destination(&output.name), volume.clone());
                registered += 1;
            }
            None => {
                tracing::warn!(target: "tasker::io", output = %output.name, path = %path, "no volume mounted for output");
            }
        }
    }
    registered
}

/// Mark each cache's mounted volume as the job's task cache for that path.
/// One-off builds (`job_id == 0`) have no caches to keep.
pub async fn initialize_caches(
    config: &TaskConfig,
    working_dir: &str,
    mounts: &MountIndex,
    job_id: i32,
    step_name: &str,
    privileged: bool,
) -> anyhow::Result<()> {
    if job_id == 0 {
        return Ok(());
    }

    for cache in &config.caches {
        let path = PathUtil::join(working_dir, &cache.path);
        let Some(volume) = mounts.volume_at(&path) else {
            tracing::warn!(target: "tasker::io", cache = %cache.path, "no volume mounted for cache");
            continue;
        };

        volume
            .initialize_task_cache(job_id, step_name, &cache.path, privileged)
            .await
            .with_context(|| format!("cache '{}' on volume {}", cache.path, volume.handle()))?;
    }

    Ok(())
}
