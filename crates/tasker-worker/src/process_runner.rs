// Runs the task process, racing it against the step's deadline and outside
// cancellation.

use tasker_common::{Container, ProcessIo, ProcessSpec, StepContext};

use crate::result_classifier::RunOutcome;

/// Run `spec` in `container` until it exits, `run_ctx`'s deadline passes or
/// `outer` is cancelled, whichever happens first.
///
/// `run_ctx` is handed to the runtime; it is derived from `outer` and may
/// carry a deadline and the step's span.
pub async fn run_process(
    outer: &StepContext,
    run_ctx: &StepContext,
    container: &dyn Container,
    spec: ProcessSpec,
    io: ProcessIo,
) -> RunOutcome {
    let started = tokio::time::Instant::now();
    tracing::debug!(target: "tasker::process", container = container.handle(), path = %spec.path, dir = %spec.dir, "running task process");

    let run = container.run(run_ctx, spec, io);

    let outcome = tokio::select! {
        biased;
        _ = outer.cancelled() => RunOutcome::Canceled,
        _ = run_ctx.deadline_elapsed() => RunOutcome::TimedOut,
        result = run => match result {
            Ok(status) => RunOutcome::Exited(status),
            // The runtime gave up because the context ended; report why.
            Err(_) if outer.is_cancelled() => RunOutcome::Canceled,
            Err(_) if run_ctx.deadline_exceeded() => RunOutcome::TimedOut,
            Err(err) => RunOutcome::Failed(err),
        },
    };

    tracing::debug!(target: "tasker::process", outcome = ?outcome, elapsed = ?started.elapsed(), "task process ended");
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeContainer, ProcessStub};
    use std::time::Duration;
    use tasker_common::ExitStatus;

    fn io() -> ProcessIo {
        ProcessIo {
            stdout: Box::new(std::io::sink()),
            stderr: Box::new(std::io::sink()),
        }
    }

    #[tokio::test]
    async fn exit_status_is_reported() {
        let container = FakeContainer::new().with_process(ProcessStub::exit(3));
        let ctx = StepContext::new();
        let outcome = run_process(&ctx, &ctx, &container, ProcessSpec::default(), io()).await;
        assert!(matches!(outcome, RunOutcome::Exited(ExitStatus(3))));
        assert_eq!(container.processes().len(), 1);
    }

    #[tokio::test]
    async fn runtime_error_is_a_failure() {
        let container = FakeContainer::new().with_process(ProcessStub::error("failed to run the task"));
        let ctx = StepContext::new();
        let outcome = run_process(&ctx, &ctx, &container, ProcessSpec::default(), io()).await;
        match outcome {
            RunOutcome::Failed(err) => assert_eq!(err.to_string(), "failed to run the task"),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn deadline_times_out() {
        let container = FakeContainer::new().with_process(ProcessStub::wait_for_context(Duration::from_millis(100)));
        let outer = StepContext::new();
        let run_ctx = outer.with_timeout(Duration::from_millis(1));
        let outcome = run_process(&outer, &run_ctx, &container, ProcessSpec::default(), io()).await;
        assert!(matches!(outcome, RunOutcome::TimedOut));
        assert!(outer.err().is_none());
    }

    #[tokio::test]
    async fn outer_cancellation_wins() {
        let container = FakeContainer::new().with_process(ProcessStub::wait_for_context(Duration::from_secs(1)));
        let outer = StepContext::new();
        outer.cancel();
        let run_ctx = outer.with_timeout(Duration::from_millis(1));
        let outcome = run_process(&outer, &run_ctx, &container, ProcessSpec::default(), io()).await;
        assert!(matches!(outcome, RunOutcome::Canceled));
    }

    #[tokio::test]
    async fn cancellation_during_run() {
        let container = FakeContainer::new().with_process(ProcessStub::wait_for_context(Duration::from_secs(5)));
        let outer = StepContext::new();
        let trigger = outer.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let run_ctx = outer.child();
        let outcome = run_process(&outer, &run_ctx, &container, ProcessSpec::default(), io()).await;
        assert!(matches!(outcome, RunOutcome::Canceled));
    }
}
