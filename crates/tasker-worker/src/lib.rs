// tasker-worker: Task step execution engine.
// Depends on `tasker-sdk` and `tasker-common`.
//
// Architecture:
//   TaskStep::run → resolve_image → Pool::find_or_select_worker
//     → Worker::find_or_create_container → run_process → classify
//
// `local` provides a runtime that executes tasks on this host; the
// `tasker-step` binary wires it to a `ConsoleDelegate`.

pub mod console_delegate;
pub mod container_spec_builder;
pub mod delegate;
pub mod errors;
pub mod image_resolver;
pub mod io_mapper;
pub mod local;
pub mod process_runner;
pub mod result_classifier;
pub mod task_step;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use console_delegate::{ConsoleDelegate, ConsoleDelegateFactory};
pub use delegate::{TaskDelegate, TaskDelegateFactory};
pub use errors::TaskStepError;
pub use local::{LocalPool, LocalWorker};
pub use task_step::TaskStep;
