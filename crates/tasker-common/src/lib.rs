// tasker-common: Shared model and infrastructure for the task step engine.
// Depends on `tasker-sdk`. Holds the task plan model, the runtime contracts
// the engine talks to, the per-build artifact repository and the settings
// store.

pub mod artifact_repository;
pub mod config_store;
pub mod constants;
pub mod context;
pub mod metadata;
pub mod plan;
pub mod runtime;
pub mod step_result;
pub mod task_config;
pub mod trace_context;
pub mod worker_resource_cache;

// ---------------------------------------------------------------------------
// Re-exports for convenient access
// ---------------------------------------------------------------------------

pub use artifact_repository::{ArtifactName, ArtifactRepository, RunState};
pub use config_store::{EngineSettings, LogFormat, SettingsStore};
pub use context::{ContextError, StepContext};
pub use metadata::{ContainerMetadata, ContainerOwner, ContainerType, StepMetadata};
pub use plan::{
    ContainerLimits, ImageResource, PlanId, ResourceType, TaskPlan, VersionedResourceType,
    VersionedResourceTypes,
};
pub use runtime::{
    Container, ContainerInput, ContainerSpec, ExitStatus, FetchedImage, ImageSource, ImageSpec,
    Pool, ProcessIo, ProcessResult, ProcessSpec, TtySpec, Volume, VolumeMount, WindowSize, Worker,
    WorkerSpec,
};
pub use step_result::StepResult;
pub use task_config::{
    TaskCacheConfig, TaskConfig, TaskInputConfig, TaskOutputConfig, TaskRunConfig,
    TaskValidationError,
};
pub use trace_context::{SpanContext, TracingConfig};
pub use worker_resource_cache::{
    ResourceCacheError, UsedResourceCache, UsedWorkerResourceCache, WorkerResourceCache,
    WorkerResourceCacheTable,
};
