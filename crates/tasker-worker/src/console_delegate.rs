// ConsoleDelegate: a TaskDelegate for running a step outside a build.
// Process output goes straight to the terminal and lifecycle events are
// logged.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::io::Write;
use std::sync::Arc;

use tasker_common::{
    ExitStatus, FetchedImage, ImageResource, PlanId, RunState, StepContext, TaskConfig,
    VersionedResourceTypes,
};

use crate::delegate::{start_step_span, TaskDelegate, TaskDelegateFactory};

/// Produces a fresh writer each time the step asks for a log sink.
pub type SinkFactory = Arc<dyn Fn() -> Box<dyn Write + Send> + Send + Sync>;

#[derive(Default)]
struct Progress {
    initialized_at: Option<DateTime<Utc>>,
    worker: Option<String>,
    exit_status: Option<ExitStatus>,
    error: Option<String>,
}

pub struct ConsoleDelegate {
    plan_id: PlanId,
    stdout: SinkFactory,
    stderr: SinkFactory,
    progress: Mutex<Progress>,
}

impl ConsoleDelegate {
    pub fn new(plan_id: PlanId) -> Self {
        Self::with_sinks(
            plan_id,
            Arc::new(|| Box::new(std::io::stdout()) as Box<dyn Write + Send>),
            Arc::new(|| Box::new(std::io::stderr()) as Box<dyn Write + Send>),
        )
    }

    pub fn with_sinks(plan_id: PlanId, stdout: SinkFactory, stderr: SinkFactory) -> Self {
        Self {
            plan_id,
            stdout,
            stderr,
            progress: Mutex::new(Progress::default()),
        }
    }

    pub fn selected_worker_name(&self) -> Option<String> {
        self.progress.lock().worker.clone()
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.progress.lock().exit_status
    }

    /// The message of the last `errored` event.
    pub fn error(&self) -> Option<String> {
        self.progress.lock().error.clone()
    }

    fn elapsed_ms(&self) -> Option<i64> {
        self.progress
            .lock()
            .initialized_at
            .map(|start| (Utc::now() - start).num_milliseconds())
    }
}

#[async_trait]
impl TaskDelegate for ConsoleDelegate {
    fn start_span(&self, ctx: &StepContext, component: &str) -> (StepContext, tracing::Span) {
        start_step_span(ctx, component, &self.plan_id)
    }

    fn set_task_config(&self, config: &TaskConfig) {
        tracing::debug!(
            target: "tasker::console",
            plan_id = %self.plan_id,
            platform = %config.platform,
            path = %config.run.path,
            inputs = config.inputs.len(),
            outputs = config.outputs.len(),
            "task config"
        );
    }

    fn initializing(&self, _ctx: &StepContext) {
        let now = Utc::now();
        self.progress.lock().initialized_at = Some(now);
        tracing::info!(target: "tasker::console", plan_id = %self.plan_id, at = %now.to_rfc3339(), "initializing");
    }

    fn selected_worker(&self, _ctx: &StepContext, worker_name: &str) {
        self.progress.lock().worker = Some(worker_name.to_string());
        tracing::info!(target: "tasker::console", plan_id = %self.plan_id, worker = worker_name, "selected worker");
    }

    async fn fetch_image(
        &self,
        _ctx: &StepContext,
        image: ImageResource,
        _resource_types: &VersionedResourceTypes,
        _privileged: bool,
    ) -> anyhow::Result<FetchedImage> {
        anyhow::bail!(
            "fetching image resources is not supported by the local runtime (type '{}')",
            image.resource_type
        )
    }

    fn stdout(&self) -> Box<dyn Write + Send> {
        (self.stdout)()
    }

    fn stderr(&self) -> Box<dyn Write + Send> {
        (self.stderr)()
    }

    fn errored(&self, _ctx: &StepContext, message: &str) {
        let elapsed_ms = self.elapsed_ms();
        self.progress.lock().error = Some(message.to_string());
        tracing::error!(target: "tasker::console", plan_id = %self.plan_id, elapsed_ms, "{message}");
    }

    fn finished(&self, _ctx: &StepContext, status: ExitStatus) {
        let elapsed_ms = self.elapsed_ms();
        self.progress.lock().exit_status = Some(status);
        tracing::info!(target: "tasker::console", plan_id = %self.plan_id, exit_status = status.0, elapsed_ms, "finished");
    }
}

/// Hands out a [`ConsoleDelegate`] per plan and remembers the last one.
pub struct ConsoleDelegateFactory {
    stdout: SinkFactory,
    stderr: SinkFactory,
    last: Mutex<Option<Arc<ConsoleDelegate>>>,
}

impl Default for ConsoleDelegateFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleDelegateFactory {
    pub fn new() -> Self {
        Self::with_sinks(
            Arc::new(|| Box::new(std::io::stdout()) as Box<dyn Write + Send>),
            Arc::new(|| Box::new(std::io::stderr()) as Box<dyn Write + Send>),
        )
    }

    pub fn with_sinks(stdout: SinkFactory, stderr: SinkFactory) -> Self {
        Self {
            stdout,
            stderr,
            last: Mutex::new(None),
        }
    }

    pub fn last_delegate(&self) -> Option<Arc<ConsoleDelegate>> {
        self.last.lock().clone()
    }
}

impl TaskDelegateFactory for ConsoleDelegateFactory {
    fn task_delegate(&self, _state: &RunState, plan_id: &PlanId) -> Arc<dyn TaskDelegate> {
        let delegate = Arc::new(ConsoleDelegate::with_sinks(
            plan_id.clone(),
            self.stdout.clone(),
            self.stderr.clone(),
        ));
        *self.last.lock() = Some(delegate.clone());
        delegate
    }
}
