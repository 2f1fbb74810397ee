// Assembles the worker, container and process specifications for a task.
// Pure: nothing here touches the runtime or the artifact repository.

use tasker_common::constants::TASK_PROCESS_ID;
use tasker_common::{
    ContainerInput, ContainerLimits, ContainerSpec, ImageSpec, ProcessSpec, StepContext,
    TaskConfig, TaskPlan, TracingConfig, TtySpec, WindowSize, WorkerSpec,
};
use tasker_sdk::PathUtil;

use crate::io_mapper;

pub struct ContainerSpecBuilder<'a> {
    plan: &'a TaskPlan,
    config: &'a TaskConfig,
    working_dir: &'a str,
    team_id: i32,
    default_limits: ContainerLimits,
    tracing: TracingConfig,
}

impl<'a> ContainerSpecBuilder<'a> {
    pub fn new(plan: &'a TaskPlan, config: &'a TaskConfig, working_dir: &'a str) -> Self {
        Self {
            plan,
            config,
            working_dir,
            team_id: 0,
            default_limits: ContainerLimits::default(),
            tracing: TracingConfig::default(),
        }
    }

    pub fn with_team_id(mut self, team_id: i32) -> Self {
        self.team_id = team_id;
        self
    }

    pub fn with_default_limits(mut self, limits: ContainerLimits) -> Self {
        self.default_limits = limits;
        self
    }

    pub fn with_tracing(mut self, tracing: TracingConfig) -> Self {
        self.tracing = tracing;
        self
    }

    /// Engine defaults, then the task config's limits, then the plan's.
    pub fn limits(&self) -> ContainerLimits {
        self.default_limits
            .overridden_by(self.config.container_limits.as_ref())
            .overridden_by(self.plan.limits.as_ref())
    }

    /// `KEY=VALUE` pairs sorted by key, followed by the trace propagation
    /// variable when tracing is enabled and `ctx` carries a span.
    pub fn env(&self, ctx: &StepContext) -> Vec<String> {
        let mut env: Vec<String> = self
            .config
            .params
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();
        if let Some(traceparent) = self.tracing.propagation_env(ctx) {
            env.push(traceparent);
        }
        env
    }

    pub fn worker_spec(&self, resource_type: Option<String>) -> WorkerSpec {
        WorkerSpec {
            platform: self.config.platform.clone(),
            tags: self.plan.tags.clone(),
            team_id: self.team_id,
            resource_type,
        }
    }

    pub fn container_spec(
        &self,
        ctx: &StepContext,
        image_spec: ImageSpec,
        inputs: Vec<ContainerInput>,
    ) -> ContainerSpec {
        ContainerSpec {
            team_id: self.team_id,
            dir: self.working_dir.to_string(),
            env: self.env(ctx),
            image_spec,
            inputs,
            outputs: io_mapper::output_paths(self.config, self.working_dir),
            caches: io_mapper::cache_paths(self.config),
            limits: self.limits(),
        }
    }

    /// The task's process. A relative `run.dir` is taken from the working
    /// directory.
    pub fn process_spec(&self, window_size: WindowSize) -> ProcessSpec {
        let run = &self.config.run;
        let dir = match run.dir.as_deref().filter(|d| !d.is_empty()) {
            Some(dir) => PathUtil::resolve(self.working_dir, dir),
            None => self.working_dir.to_string(),
        };

        ProcessSpec {
            id: TASK_PROCESS_ID.to_string(),
            path: run.path.clone(),
            args: run.args.clone(),
            dir,
            user: run.user.clone().filter(|u| !u.is_empty()),
            tty: Some(TtySpec { window_size }),
        }
    }
}
