// StepResult: the overall result of a step and its process exit code.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum StepResult {
    Succeeded = 0,
    Failed = 1,
    Errored = 2,
    Aborted = 3,
}

impl StepResult {
    /// Classify a step outcome. `is_abort` decides whether an error means the
    /// step was interrupted rather than broken.
    pub fn from_outcome<E>(outcome: &Result<bool, E>, is_abort: impl FnOnce(&E) -> bool) -> Self {
        match outcome {
            Ok(true) => StepResult::Succeeded,
            Ok(false) => StepResult::Failed,
            Err(err) => {
                if is_abort(err) {
                    StepResult::Aborted
                } else {
                    StepResult::Errored
                }
            }
        }
    }

    /// Exit code of a process reporting this result.
    pub fn exit_code(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for StepResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepResult::Succeeded => write!(f, "succeeded"),
            StepResult::Failed => write!(f, "failed"),
            StepResult::Errored => write!(f, "errored"),
            StepResult::Aborted => write!(f, "aborted"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_outcome() {
        let never_abort = |_: &&str| false;
        assert_eq!(
            StepResult::from_outcome(&Ok::<_, &str>(true), never_abort),
            StepResult::Succeeded
        );
        assert_eq!(
            StepResult::from_outcome(&Ok::<_, &str>(false), never_abort),
            StepResult::Failed
        );
        assert_eq!(
            StepResult::from_outcome(&Err::<bool, _>("boom"), never_abort),
            StepResult::Errored
        );
        assert_eq!(
            StepResult::from_outcome(&Err::<bool, _>("canceled"), |e| *e == "canceled"),
            StepResult::Aborted
        );
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(StepResult::Succeeded.exit_code(), 0);
        assert_eq!(StepResult::Failed.exit_code(), 1);
        assert_eq!(StepResult::Errored.exit_code(), 2);
        assert_eq!(StepResult::Aborted.exit_code(), 3);
    }
}
