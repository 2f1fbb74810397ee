// Well-known names shared across the tasker crates.

/// Environment variable carrying the W3C trace propagation header into the
/// task process.
pub const TRACEPARENT_ENV: &str = "TRACEPARENT";

/// Process id used for the single process a task step runs.
pub const TASK_PROCESS_ID: &str = "task";

/// Default terminal geometry given to task processes.
pub const DEFAULT_TTY_COLUMNS: u16 = 500;
pub const DEFAULT_TTY_ROWS: u16 = 500;

/// Environment variables that override the settings file.
pub mod variables {
    pub const TRACING_ENABLED: &str = "TASKER_TRACING_ENABLED";
    pub const WORK_DIR: &str = "TASKER_WORK_DIR";
    pub const LOG_FORMAT: &str = "TASKER_LOG_FORMAT";
    pub const TTY_COLUMNS: &str = "TASKER_TTY_COLUMNS";
    pub const TTY_ROWS: &str = "TASKER_TTY_ROWS";
}

/// Names of the spans the engine opens.
pub mod spans {
    pub const TASK: &str = "task";
}
