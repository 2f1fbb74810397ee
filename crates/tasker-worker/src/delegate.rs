// TaskDelegate: the step's channel to the build's event stream.
// Every lifecycle event, log sink, span and image fetch goes through the
// delegate, so the engine itself never talks to the build directly.

use async_trait::async_trait;
use std::io::Write;
use std::sync::Arc;

use tasker_common::{
    ExitStatus, FetchedImage, ImageResource, PlanId, RunState, SpanContext, StepContext,
    TaskConfig, VersionedResourceTypes,
};

#[async_trait]
pub trait TaskDelegate: Send + Sync {
    /// Open a span for `component` and return a context carrying it.
    fn start_span(&self, ctx: &StepContext, component: &str) -> (StepContext, tracing::Span);

    /// The resolved configuration the step is about to run.
    fn set_task_config(&self, config: &TaskConfig);

    /// The container exists and the process is about to start.
    fn initializing(&self, ctx: &StepContext);

    fn selected_worker(&self, ctx: &StepContext, worker_name: &str);

    /// Fetch the image described by `image` and return the volume holding it.
    async fn fetch_image(
        &self,
        ctx: &StepContext,
        image: ImageResource,
        resource_types: &VersionedResourceTypes,
        privileged: bool,
    ) -> anyhow::Result<FetchedImage>;

    fn stdout(&self) -> Box<dyn Write + Send>;

    fn stderr(&self) -> Box<dyn Write + Send>;

    /// The step ended without an exit status.
    fn errored(&self, ctx: &StepContext, message: &str);

    fn finished(&self, ctx: &StepContext, status: ExitStatus);
}

pub trait TaskDelegateFactory: Send + Sync {
    fn task_delegate(&self, state: &RunState, plan_id: &PlanId) -> Arc<dyn TaskDelegate>;
}

/// Open a `tracing` span for `component` and derive the propagated span
/// context from the one already active in `ctx`.
pub fn start_step_span(
    ctx: &StepContext,
    component: &str,
    plan_id: &PlanId,
) -> (StepContext, tracing::Span) {
    let span_context = match ctx.span_context() {
        Some(parent) => parent.child(),
        None => SpanContext::new_root(),
    };
    let span = tracing::info_span!(
        target: "tasker::step",
        "step",
        component = component,
        plan_id = %plan_id,
        trace_id = %span_context.trace_id(),
        span_id = %span_context.span_id(),
    );
    (ctx.with_span(span_context), span)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_span_continues_existing_trace() {
        let root = SpanContext::new_root();
        let ctx = StepContext::new().with_span(root.clone());

        let (child_ctx, _span) = start_step_span(&ctx, "task", &PlanId::new("42"));
        let child = child_ctx.span_context().unwrap();
        assert_eq!(child.trace_id(), root.trace_id());
        assert_ne!(child.span_id(), root.span_id());
    }

    #[test]
    fn step_span_starts_trace_when_none_active() {
        let (ctx, _span) = start_step_span(&StepContext::new(), "task", &PlanId::new("1"));
        assert!(ctx.span_context().is_some());
    }
}
