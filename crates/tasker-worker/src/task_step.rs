// TaskStep: runs one task of a build plan.
//
// Flow: validate config → parse timeout → resolve image → select worker →
// resolve inputs → create container → run process → register outputs and
// caches → report the terminal event.

use std::sync::Arc;

use tasker_common::constants::{spans, DEFAULT_TTY_COLUMNS, DEFAULT_TTY_ROWS};
use tasker_common::{
    ContainerLimits, ContainerMetadata, ContainerOwner, PlanId, Pool, ProcessIo, RunState,
    StepContext, StepMetadata, TaskPlan, TracingConfig, WindowSize,
};
use tasker_sdk::parse_duration;
use tracing::Instrument;

use crate::container_spec_builder::ContainerSpecBuilder;
use crate::delegate::{TaskDelegate, TaskDelegateFactory};
use crate::errors::TaskStepError;
use crate::image_resolver::resolve_image;
use crate::io_mapper::{self, MountIndex};
use crate::process_runner::run_process;
use crate::result_classifier::{classify, RunOutcome, TerminalEvent};

pub struct TaskStep {
    plan_id: PlanId,
    plan: TaskPlan,
    default_limits: ContainerLimits,
    metadata: StepMetadata,
    container_metadata: ContainerMetadata,
    pool: Arc<dyn Pool>,
    delegate_factory: Arc<dyn TaskDelegateFactory>,
    tracing: TracingConfig,
    window_size: WindowSize,
}

impl TaskStep {
    pub fn new(
        plan_id: PlanId,
        plan: TaskPlan,
        default_limits: ContainerLimits,
        metadata: StepMetadata,
        container_metadata: ContainerMetadata,
        pool: Arc<dyn Pool>,
        delegate_factory: Arc<dyn TaskDelegateFactory>,
    ) -> Self {
        Self {
            plan_id,
            plan,
            default_limits,
            metadata,
            container_metadata,
            pool,
            delegate_factory,
            tracing: TracingConfig::default(),
            window_size: WindowSize {
                columns: DEFAULT_TTY_COLUMNS,
                rows: DEFAULT_TTY_ROWS,
            },
        }
    }

    /// Propagate the step's span into the task process.
    pub fn with_tracing(mut self, tracing: TracingConfig) -> Self {
        self.tracing = tracing;
        self
    }

    pub fn with_window_size(mut self, window_size: WindowSize) -> Self {
        self.window_size = window_size;
        self
    }

    pub fn plan(&self) -> &TaskPlan {
        &self.plan
    }

    /// Run the task.
    ///
    /// `Ok(true)` when the process exited zero; `Ok(false)` when it exited
    /// non-zero or ran out of time; `Err` for configuration or runtime
    /// faults and for cancellation.
    pub async fn run(&self, ctx: &StepContext, state: &RunState) -> Result<bool, TaskStepError> {
        let delegate = self.delegate_factory.task_delegate(state, &self.plan_id);
        let (ctx, span) = delegate.start_span(ctx, spans::TASK);

        let result = self
            .run_task(&ctx, state, delegate.as_ref())
            .instrument(span)
            .await;

        match &result {
            Ok(succeeded) => {
                tracing::info!(target: "tasker::task_step", plan_id = %self.plan_id, succeeded, "task finished")
            }
            Err(err) if err.is_canceled() => {
                tracing::info!(target: "tasker::task_step", plan_id = %self.plan_id, "task interrupted")
            }
            Err(err) => {
                tracing::error!(target: "tasker::task_step", plan_id = %self.plan_id, error = %err, "task errored")
            }
        }
        result
    }

    async fn run_task(
        &self,
        ctx: &StepContext,
        state: &RunState,
        delegate: &dyn TaskDelegate,
    ) -> Result<bool, TaskStepError> {
        let config = self.plan.config.as_ref().ok_or(TaskStepError::MissingConfig)?;
        config.validate()?;
        delegate.set_task_config(config);

        let timeout = match self.plan.timeout() {
            Some(raw) => Some(parse_duration(raw).map_err(|e| TaskStepError::ParseTimeout(e.to_string()))?),
            None => None,
        };

        let repository = state.artifact_repository();
        let working_dir = self.container_metadata.working_directory.as_str();
        let builder = ContainerSpecBuilder::new(&self.plan, config, working_dir)
            .with_team_id(self.metadata.team_id)
            .with_default_limits(self.default_limits)
            .with_tracing(self.tracing);

        let image = resolve_image(ctx, &self.plan, config, repository, delegate).await?;
        let worker_spec = builder.worker_spec(image.resource_type.clone());
        let owner = ContainerOwner::build_step(self.metadata.build_id, self.plan_id.clone(), self.metadata.team_id);

        let worker = self
            .pool
            .find_or_select_worker(ctx, &owner, &worker_spec, &self.container_metadata)
            .await
            .map_err(TaskStepError::Worker)?;
        tracing::info!(target: "tasker::task_step", worker = worker.name(), "selected worker");
        delegate.selected_worker(ctx, worker.name());

        let inputs = io_mapper::resolve_inputs(&self.plan, config, repository, working_dir)?;
        let container_spec = builder.container_spec(ctx, image.image_spec, inputs);

        let container = worker
            .find_or_create_container(ctx, &owner, &self.container_metadata, &container_spec)
            .await
            .map_err(TaskStepError::Worker)?;
        tracing::debug!(target: "tasker::task_step", container = container.handle(), "container ready");

        delegate.initializing(ctx);

        let run_ctx = match timeout {
            Some(timeout) => ctx.with_timeout(timeout),
            None => ctx.child(),
        };
        let io = ProcessIo {
            stdout: delegate.stdout(),
            stderr: delegate.stderr(),
        };
        let outcome = run_process(
            ctx,
            &run_ctx,
            container.as_ref(),
            builder.process_spec(self.window_size),
            io,
        )
        .await;

        if outcome.is_terminal() {
            let mounts = MountIndex::new(&container.volume_mounts());
            io_mapper::register_outputs(&self.plan, config, working_dir, &mounts, repository);

            if let Err(err) = io_mapper::initialize_caches(
                config,
                working_dir,
                &mounts,
                self.metadata.job_id,
                &self.container_metadata.step_name,
                self.plan.privileged,
            )
            .await
            {
                let err = match &outcome {
                    RunOutcome::Failed(run_err) => {
                        err.context(format!("task process also failed: {run_err:#}"))
                    }
                    _ => err,
                };
                let err = TaskStepError::TaskCache(err);
                delegate.errored(ctx, &err.to_string());
                return Err(err);
            }
        }

        let (result, event) = classify(outcome);
        match event {
            TerminalEvent::Finished(status) => delegate.finished(ctx, status),
            TerminalEvent::Errored(message) => delegate.errored(ctx, &message),
            TerminalEvent::None => {}
        }
        result
    }
}
