// Contracts between the engine and the container runtime.
// The engine only talks to workers, containers and volumes through these
// traits; the production runtime and the local host runtime implement them.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::sync::Arc;

use crate::context::StepContext;
use crate::metadata::{ContainerMetadata, ContainerOwner};
use crate::plan::{ContainerLimits, Tags};

/// Exit status of a finished process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExitStatus(pub i32);

impl ExitStatus {
    pub fn success(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Either the exit status of the process or the error that kept it from
/// producing one.
pub type ProcessResult = anyhow::Result<ExitStatus>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSize {
    pub columns: u16,
    pub rows: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtySpec {
    pub window_size: WindowSize,
}

/// The process to run inside a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessSpec {
    pub id: String,
    pub path: String,
    pub args: Vec<String>,
    pub dir: String,
    pub user: Option<String>,
    pub tty: Option<TtySpec>,
}

/// Sinks the process output is streamed into.
pub struct ProcessIo {
    pub stdout: Box<dyn Write + Send>,
    pub stderr: Box<dyn Write + Send>,
}

impl fmt::Debug for ProcessIo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessIo").finish_non_exhaustive()
    }
}

/// An image that was fetched from an image resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedImage {
    /// Handle of the volume holding the image's root filesystem.
    pub volume: String,
}

/// Where a container's root filesystem comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ImageSource {
    /// A volume produced earlier in the build.
    Artifact { volume: String },
    Fetched(FetchedImage),
    RootfsUri(String),
    #[default]
    WorkerDefault,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageSpec {
    pub source: ImageSource,
    pub privileged: bool,
}

/// A storage volume on a worker.
#[async_trait]
pub trait Volume: Send + Sync {
    fn handle(&self) -> &str;

    /// Mark this volume as the persistent cache for `path` of the given
    /// job's step, so later builds of the job start from its contents.
    async fn initialize_task_cache(
        &self,
        job_id: i32,
        step_name: &str,
        path: &str,
        privileged: bool,
    ) -> anyhow::Result<()>;
}

impl fmt::Debug for dyn Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Volume({})", self.handle())
    }
}

/// An input volume and where it is mounted.
#[derive(Clone)]
pub struct ContainerInput {
    pub volume: Arc<dyn Volume>,
    pub destination_path: String,
}

impl ContainerInput {
    pub fn volume_handle(&self) -> &str {
        self.volume.handle()
    }
}

impl PartialEq for ContainerInput {
    fn eq(&self, other: &Self) -> bool {
        self.volume.handle() == other.volume.handle()
            && self.destination_path == other.destination_path
    }
}

impl fmt::Debug for ContainerInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerInput")
            .field("volume", &self.volume.handle())
            .field("destination_path", &self.destination_path)
            .finish()
    }
}

/// A volume mounted into a created container.
#[derive(Clone)]
pub struct VolumeMount {
    pub volume: Arc<dyn Volume>,
    pub mount_path: String,
}

impl fmt::Debug for VolumeMount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VolumeMount")
            .field("volume", &self.volume.handle())
            .field("mount_path", &self.mount_path)
            .finish()
    }
}

/// Everything a worker needs to create the container for a step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerSpec {
    pub team_id: i32,
    pub dir: String,
    /// `KEY=VALUE` pairs.
    pub env: Vec<String>,
    pub image_spec: ImageSpec,
    pub inputs: Vec<ContainerInput>,
    /// Output name → path the output volume is mounted at.
    pub outputs: BTreeMap<String, String>,
    /// Cache paths, relative to `dir` unless absolute.
    pub caches: Vec<String>,
    pub limits: ContainerLimits,
}

/// Requirements a worker must satisfy to run a step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerSpec {
    pub platform: String,
    pub tags: Tags,
    pub team_id: i32,
    /// Resource type the worker must provide to fetch the image.
    pub resource_type: Option<String>,
}

#[async_trait]
pub trait Container: Send + Sync {
    fn handle(&self) -> &str;

    /// Volumes mounted into the container, known once it exists.
    fn volume_mounts(&self) -> Vec<VolumeMount>;

    /// Run a process and wait for it. Implementations stop the process when
    /// `ctx` is done and return an error describing why.
    async fn run(&self, ctx: &StepContext, spec: ProcessSpec, io: ProcessIo) -> ProcessResult;
}

#[async_trait]
pub trait Worker: Send + Sync {
    fn name(&self) -> &str;

    async fn find_or_create_container(
        &self,
        ctx: &StepContext,
        owner: &ContainerOwner,
        metadata: &ContainerMetadata,
        spec: &ContainerSpec,
    ) -> anyhow::Result<Arc<dyn Container>>;
}

/// The worker fleet.
#[async_trait]
pub trait Pool: Send + Sync {
    /// Reuse the worker that already holds a container for `owner`, or pick
    /// one satisfying `spec`.
    async fn find_or_select_worker(
        &self,
        ctx: &StepContext,
        owner: &ContainerOwner,
        spec: &WorkerSpec,
        metadata: &ContainerMetadata,
    ) -> anyhow::Result<Arc<dyn Worker>>;
}
