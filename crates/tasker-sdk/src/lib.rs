// tasker-sdk: Foundation layer for the task step engine.
// This crate has ZERO dependencies on other tasker crates and provides
// tracing helpers, duration parsing, container path handling and a host
// process invoker.

pub mod duration_util;
pub mod path_util;
pub mod process_invoker;
pub mod trace;

// Re-export commonly used items at crate root
pub use duration_util::{parse_duration, DurationParseError};
pub use path_util::PathUtil;
pub use process_invoker::{ProcessDataReceivedEventArgs, ProcessInvoker};
pub use trace::TraceWriter;
