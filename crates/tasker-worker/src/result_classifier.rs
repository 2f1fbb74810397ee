// Maps how the process phase ended to the step's result and the terminal
// event the delegate receives.

use tasker_common::{ContextError, ExitStatus};

use crate::errors::TaskStepError;

/// Logged as the step's error when the process ran out of time.
pub const TIMEOUT_LOG_MESSAGE: &str = "//TIMEOUT EXCEEDED//";

/// How the process phase ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// The process exited with a status.
    Exited(ExitStatus),
    /// The runtime could not run the process to completion.
    Failed(anyhow::Error),
    /// The step's timeout passed first.
    TimedOut,
    /// The step was interrupted from outside.
    Canceled,
}

impl RunOutcome {
    /// Whether the process reached an end state of its own. Only then are
    /// outputs and caches kept.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunOutcome::Exited(_) | RunOutcome::Failed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalEvent {
    Finished(ExitStatus),
    Errored(String),
    None,
}

pub fn classify(outcome: RunOutcome) -> (Result<bool, TaskStepError>, TerminalEvent) {
    match outcome {
        RunOutcome::Exited(status) => (Ok(status.success()), TerminalEvent::Finished(status)),
        RunOutcome::Failed(err) => {
            let message = format!("{err:#}");
            (Err(TaskStepError::Process(err)), TerminalEvent::Errored(message))
        }
        RunOutcome::TimedOut => (
            Ok(false),
            TerminalEvent::Errored(TIMEOUT_LOG_MESSAGE.to_string()),
        ),
        RunOutcome::Canceled => (
            Err(TaskStepError::Context(ContextError::Canceled)),
            TerminalEvent::None,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_exit_succeeds() {
        let (result, event) = classify(RunOutcome::Exited(ExitStatus(0)));
        assert!(result.unwrap());
        assert_eq!(event, TerminalEvent::Finished(ExitStatus(0)));
    }

    #[test]
    fn non_zero_exit_fails_without_error() {
        let (result, event) = classify(RunOutcome::Exited(ExitStatus(1)));
        assert!(!result.unwrap());
        assert_eq!(event, TerminalEvent::Finished(ExitStatus(1)));
    }

    #[test]
    fn timeout_fails_without_error() {
        let (result, event) = classify(RunOutcome::TimedOut);
        assert!(!result.unwrap());
        assert_eq!(event, TerminalEvent::Errored("//TIMEOUT EXCEEDED//".into()));
    }

    #[test]
    fn cancellation_is_returned_verbatim() {
        let (result, event) = classify(RunOutcome::Canceled);
        assert!(result.unwrap_err().is_canceled());
        assert_eq!(event, TerminalEvent::None);
    }

    #[test]
    fn run_failure_is_wrapped() {
        let (result, event) = classify(RunOutcome::Failed(anyhow::anyhow!("failed to run the task")));
        let err = result.unwrap_err();
        assert!(matches!(err, TaskStepError::Process(_)));
        assert_eq!(err.to_string(), "run task process: failed to run the task");
        assert_eq!(event, TerminalEvent::Errored("failed to run the task".into()));
    }

    #[test]
    fn terminal_states() {
        assert!(RunOutcome::Exited(ExitStatus(3)).is_terminal());
        assert!(RunOutcome::Failed(anyhow::anyhow!("x")).is_terminal());
        assert!(!RunOutcome::TimedOut.is_terminal());
        assert!(!RunOutcome::Canceled.is_terminal());
    }
}
