// In-memory runtime and delegate fakes for exercising the engine.
// Every fake records how it was called so tests can assert on it.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use tasker_common::{
    Container, ContainerMetadata, ContainerOwner, ContainerSpec, ExitStatus, FetchedImage,
    ImageResource, PlanId, Pool, ProcessIo, ProcessResult, ProcessSpec, RunState, SpanContext,
    StepContext, TaskConfig, VersionedResourceTypes, Volume, VolumeMount, Worker, WorkerSpec,
};

use crate::delegate::{TaskDelegate, TaskDelegateFactory};

// ---------------------------------------------------------------------------
// SharedBuffer
// ---------------------------------------------------------------------------

/// A `Write` sink whose contents can be read back from another handle.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FakeVolume
// ---------------------------------------------------------------------------

pub type TaskCacheCall = (i32, String, String, bool);

#[derive(Debug, Default)]
pub struct FakeVolume {
    handle: String,
    task_cache_error: Option<String>,
    task_cache_calls: Mutex<Vec<TaskCacheCall>>,
}

impl FakeVolume {
    pub fn new(handle: impl Into<String>) -> Self {
        Self {
            handle: handle.into(),
            ..Default::default()
        }
    }

    /// Make `initialize_task_cache` fail with `message`.
    pub fn failing_task_cache(mut self, message: impl Into<String>) -> Self {
        self.task_cache_error = Some(message.into());
        self
    }

    pub fn task_cache_initialized(&self) -> bool {
        !self.task_cache_calls.lock().is_empty()
    }

    pub fn task_cache_calls(&self) -> Vec<TaskCacheCall> {
        self.task_cache_calls.lock().clone()
    }
}

#[async_trait]
impl Volume for FakeVolume {
    fn handle(&self) -> &str {
        &self.handle
    }

    async fn initialize_task_cache(
        &self,
        job_id: i32,
        step_name: &str,
        path: &str,
        privileged: bool,
    ) -> anyhow::Result<()> {
        if let Some(message) = &self.task_cache_error {
            anyhow::bail!("{message}");
        }
        self.task_cache_calls
            .lock()
            .push((job_id, step_name.to_string(), path.to_string(), privileged));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ProcessStub
// ---------------------------------------------------------------------------

/// Called when the stubbed process starts; an error fails the run.
pub type RunHook = Arc<dyn Fn(&StepContext, &ProcessSpec) -> anyhow::Result<()> + Send + Sync>;

/// Scripted behaviour of the process a [`FakeContainer`] runs.
#[derive(Clone, Default)]
pub struct ProcessStub {
    exit_status: i32,
    error: Option<String>,
    wait: Option<Duration>,
    stdout: Option<String>,
    on_run: Option<RunHook>,
}

impl ProcessStub {
    pub fn exit(status: i32) -> Self {
        Self {
            exit_status: status,
            ..Default::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }

    /// Run for `duration`, or fail early with the context's error once the
    /// context is done.
    pub fn wait_for_context(duration: Duration) -> Self {
        Self {
            wait: Some(duration),
            ..Default::default()
        }
    }

    pub fn with_stdout(mut self, output: impl Into<String>) -> Self {
        self.stdout = Some(output.into());
        self
    }

    pub fn on_run<F>(mut self, hook: F) -> Self
    where
        F: Fn(&StepContext, &ProcessSpec) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_run = Some(Arc::new(hook));
        self
    }

    async fn run(&self, ctx: &StepContext, spec: &ProcessSpec, mut io: ProcessIo) -> ProcessResult {
        if let Some(hook) = &self.on_run {
            hook(ctx, spec)?;
        }

        if let Some(output) = &self.stdout {
            io.stdout.write_all(output.as_bytes())?;
        }

        if let Some(wait) = self.wait {
            tokio::select! {
                reason = ctx.done() => anyhow::bail!("wrapped: {reason}"),
                _ = tokio::time::sleep(wait) => {}
            }
        }

        if let Some(message) = &self.error {
            anyhow::bail!("{message}");
        }
        Ok(ExitStatus(self.exit_status))
    }
}

// ---------------------------------------------------------------------------
// FakeContainer
// ---------------------------------------------------------------------------

pub struct FakeContainer {
    handle: String,
    stub: Mutex<ProcessStub>,
    expected_process: Mutex<Option<ProcessSpec>>,
    mounts: Mutex<Vec<VolumeMount>>,
    spec: Mutex<Option<ContainerSpec>>,
    processes: Mutex<Vec<ProcessSpec>>,
}

impl Default for FakeContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeContainer {
    pub fn new() -> Self {
        Self {
            handle: "fake-container".to_string(),
            stub: Mutex::new(ProcessStub::default()),
            expected_process: Mutex::new(None),
            mounts: Mutex::new(Vec::new()),
            spec: Mutex::new(None),
            processes: Mutex::new(Vec::new()),
        }
    }

    pub fn with_process(self, stub: ProcessStub) -> Self {
        *self.stub.lock() = stub;
        self
    }

    pub fn set_process(&self, stub: ProcessStub) {
        *self.stub.lock() = stub;
    }

    /// Fail runs whose spec differs from `spec`.
    pub fn expect_process(&self, spec: ProcessSpec) {
        *self.expected_process.lock() = Some(spec);
    }

    pub fn set_mounts(&self, mounts: Vec<VolumeMount>) {
        *self.mounts.lock() = mounts;
    }

    /// The spec the container was created with.
    pub fn spec(&self) -> Option<ContainerSpec> {
        self.spec.lock().clone()
    }

    /// Specs of every process that was run.
    pub fn processes(&self) -> Vec<ProcessSpec> {
        self.processes.lock().clone()
    }
}

#[async_trait]
impl Container for FakeContainer {
    fn handle(&self) -> &str {
        &self.handle
    }

    fn volume_mounts(&self) -> Vec<VolumeMount> {
        self.mounts.lock().clone()
    }

    async fn run(&self, ctx: &StepContext, spec: ProcessSpec, io: ProcessIo) -> ProcessResult {
        if let Some(expected) = self.expected_process.lock().as_ref() {
            if *expected != spec {
                anyhow::bail!("unexpected process spec: {spec:?}");
            }
        }
        self.processes.lock().push(spec.clone());
        let stub = self.stub.lock().clone();
        stub.run(ctx, &spec, io).await
    }
}

// ---------------------------------------------------------------------------
// FakeWorker / FakePool
// ---------------------------------------------------------------------------

pub struct FakeWorker {
    name: String,
    container: Arc<FakeContainer>,
    create_error: Mutex<Option<String>>,
    created_for: Mutex<Vec<(ContainerOwner, ContainerMetadata)>>,
}

impl FakeWorker {
    pub fn new(name: impl Into<String>, container: Arc<FakeContainer>) -> Self {
        Self {
            name: name.into(),
            container,
            create_error: Mutex::new(None),
            created_for: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_container_creation(&self, message: impl Into<String>) {
        *self.create_error.lock() = Some(message.into());
    }

    pub fn container(&self) -> &Arc<FakeContainer> {
        &self.container
    }

    pub fn created_for(&self) -> Vec<(ContainerOwner, ContainerMetadata)> {
        self.created_for.lock().clone()
    }
}

#[async_trait]
impl Worker for FakeWorker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn find_or_create_container(
        &self,
        _ctx: &StepContext,
        owner: &ContainerOwner,
        metadata: &ContainerMetadata,
        spec: &ContainerSpec,
    ) -> anyhow::Result<Arc<dyn Container>> {
        if let Some(message) = self.create_error.lock().as_ref() {
            anyhow::bail!("{message}");
        }
        self.created_for
            .lock()
            .push((owner.clone(), metadata.clone()));
        *self.container.spec.lock() = Some(spec.clone());
        Ok(self.container.clone() as Arc<dyn Container>)
    }
}

/// Arguments of one `find_or_select_worker` call.
#[derive(Debug, Clone)]
pub struct SelectWorkerCall {
    pub had_deadline: bool,
    pub owner: ContainerOwner,
    pub spec: WorkerSpec,
    pub metadata: ContainerMetadata,
}

pub struct FakePool {
    worker: Mutex<Result<Arc<FakeWorker>, String>>,
    calls: Mutex<Vec<SelectWorkerCall>>,
}

impl FakePool {
    pub fn new(worker: Arc<FakeWorker>) -> Self {
        Self {
            worker: Mutex::new(Ok(worker)),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_selection(&self, message: impl Into<String>) {
        *self.worker.lock() = Err(message.into());
    }

    pub fn find_or_select_worker_call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn find_or_select_worker_args_for_call(&self, i: usize) -> SelectWorkerCall {
        self.calls.lock()[i].clone()
    }
}

#[async_trait]
impl Pool for FakePool {
    async fn find_or_select_worker(
        &self,
        ctx: &StepContext,
        owner: &ContainerOwner,
        spec: &WorkerSpec,
        metadata: &ContainerMetadata,
    ) -> anyhow::Result<Arc<dyn Worker>> {
        self.calls.lock().push(SelectWorkerCall {
            had_deadline: ctx.deadline().is_some(),
            owner: owner.clone(),
            spec: spec.clone(),
            metadata: metadata.clone(),
        });
        match &*self.worker.lock() {
            Ok(worker) => Ok(worker.clone() as Arc<dyn Worker>),
            Err(message) => anyhow::bail!("{message}"),
        }
    }
}

// ---------------------------------------------------------------------------
// FakeDelegate
// ---------------------------------------------------------------------------

/// Arguments of one `fetch_image` call.
#[derive(Debug, Clone)]
pub struct FetchImageCall {
    pub image: ImageResource,
    pub resource_types: VersionedResourceTypes,
    pub privileged: bool,
}

#[derive(Default)]
struct DelegateCalls {
    events: Vec<String>,
    initializing: usize,
    selected_workers: Vec<String>,
    task_configs: Vec<TaskConfig>,
    fetch_images: Vec<FetchImageCall>,
    errored: Vec<String>,
    finished: Vec<ExitStatus>,
}

pub struct FakeDelegate {
    calls: Mutex<DelegateCalls>,
    fetch_result: Mutex<Result<FetchedImage, String>>,
    span: Mutex<Option<SpanContext>>,
    stdout: SharedBuffer,
    stderr: SharedBuffer,
}

impl Default for FakeDelegate {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeDelegate {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(DelegateCalls::default()),
            fetch_result: Mutex::new(Ok(FetchedImage {
                volume: "fetched-image".to_string(),
            })),
            span: Mutex::new(None),
            stdout: SharedBuffer::new(),
            stderr: SharedBuffer::new(),
        }
    }

    pub fn fetch_image_returns(&self, result: Result<FetchedImage, String>) {
        *self.fetch_result.lock() = result;
    }

    /// Make `start_span` return a context carrying `span`.
    pub fn start_span_returns(&self, span: SpanContext) {
        *self.span.lock() = Some(span);
    }

    /// Names of the callbacks received, in order.
    pub fn events(&self) -> Vec<String> {
        self.calls.lock().events.clone()
    }

    pub fn initializing_call_count(&self) -> usize {
        self.calls.lock().initializing
    }

    pub fn selected_workers(&self) -> Vec<String> {
        self.calls.lock().selected_workers.clone()
    }

    pub fn task_configs(&self) -> Vec<TaskConfig> {
        self.calls.lock().task_configs.clone()
    }

    pub fn fetch_image_call_count(&self) -> usize {
        self.calls.lock().fetch_images.len()
    }

    pub fn fetch_image_args_for_call(&self, i: usize) -> FetchImageCall {
        self.calls.lock().fetch_images[i].clone()
    }

    pub fn errored_messages(&self) -> Vec<String> {
        self.calls.lock().errored.clone()
    }

    pub fn finished_statuses(&self) -> Vec<ExitStatus> {
        self.calls.lock().finished.clone()
    }

    pub fn stdout_contents(&self) -> String {
        self.stdout.contents()
    }

    pub fn stderr_contents(&self) -> String {
        self.stderr.contents()
    }

    fn record(&self, event: &str) {
        self.calls.lock().events.push(event.to_string());
    }
}

#[async_trait]
impl TaskDelegate for FakeDelegate {
    fn start_span(&self, ctx: &StepContext, _component: &str) -> (StepContext, tracing::Span) {
        self.record("start_span");
        let ctx = match self.span.lock().clone() {
            Some(span) => ctx.with_span(span),
            None => ctx.clone(),
        };
        (ctx, tracing::Span::none())
    }

    fn set_task_config(&self, config: &TaskConfig) {
        self.record("set_task_config");
        self.calls.lock().task_configs.push(config.clone());
    }

    fn initializing(&self, _ctx: &StepContext) {
        self.record("initializing");
        self.calls.lock().initializing += 1;
    }

    fn selected_worker(&self, _ctx: &StepContext, worker_name: &str) {
        self.record("selected_worker");
        self.calls
            .lock()
            .selected_workers
            .push(worker_name.to_string());
    }

    async fn fetch_image(
        &self,
        _ctx: &StepContext,
        image: ImageResource,
        resource_types: &VersionedResourceTypes,
        privileged: bool,
    ) -> anyhow::Result<FetchedImage> {
        self.record("fetch_image");
        self.calls.lock().fetch_images.push(FetchImageCall {
            image,
            resource_types: resource_types.clone(),
            privileged,
        });
        self.fetch_result
            .lock()
            .clone()
            .map_err(|message| anyhow::anyhow!(message))
    }

    fn stdout(&self) -> Box<dyn Write + Send> {
        Box::new(self.stdout.clone())
    }

    fn stderr(&self) -> Box<dyn Write + Send> {
        Box::new(self.stderr.clone())
    }

    fn errored(&self, _ctx: &StepContext, message: &str) {
        self.record("errored");
        self.calls.lock().errored.push(message.to_string());
    }

    fn finished(&self, _ctx: &StepContext, status: ExitStatus) {
        self.record("finished");
        self.calls.lock().finished.push(status);
    }
}

/// Hands out the same delegate for every plan and records the plan ids.
pub struct FakeDelegateFactory {
    delegate: Arc<FakeDelegate>,
    plan_ids: Mutex<Vec<PlanId>>,
}

impl FakeDelegateFactory {
    pub fn new(delegate: Arc<FakeDelegate>) -> Self {
        Self {
            delegate,
            plan_ids: Mutex::new(Vec::new()),
        }
    }

    pub fn plan_ids(&self) -> Vec<PlanId> {
        self.plan_ids.lock().clone()
    }
}

impl TaskDelegateFactory for FakeDelegateFactory {
    fn task_delegate(&self, _state: &RunState, plan_id: &PlanId) -> Arc<dyn TaskDelegate> {
        self.plan_ids.lock().push(plan_id.clone());
        self.delegate.clone()
    }
}
