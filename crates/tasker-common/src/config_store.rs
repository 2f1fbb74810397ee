// SettingsStore: loading and saving engine settings.
// Settings come from an optional JSON file and are then overridden by
// `TASKER_*` environment variables.

use crate::constants::{variables, DEFAULT_TTY_COLUMNS, DEFAULT_TTY_ROWS};
use crate::plan::ContainerLimits;
use crate::trace_context::TracingConfig;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

// ---------------------------------------------------------------------------
// EngineSettings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => anyhow::bail!("unknown log format '{other}'"),
        }
    }
}

/// Persisted engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Propagate the active span into task processes via `TRACEPARENT`.
    #[serde(default, rename = "TracingEnabled")]
    pub tracing_enabled: bool,

    /// Limits applied when neither the task config nor the plan set them.
    #[serde(default, rename = "DefaultLimits")]
    pub default_limits: ContainerLimits,

    #[serde(default = "default_tty_columns", rename = "TtyColumns")]
    pub tty_columns: u16,

    #[serde(default = "default_tty_rows", rename = "TtyRows")]
    pub tty_rows: u16,

    /// Where the local runtime keeps containers, volumes and caches.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "WorkDirectory"
    )]
    pub work_directory: Option<PathBuf>,

    #[serde(default, rename = "LogFormat")]
    pub log_format: LogFormat,
}

fn default_tty_columns() -> u16 {
    DEFAULT_TTY_COLUMNS
}

fn default_tty_rows() -> u16 {
    DEFAULT_TTY_ROWS
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            tracing_enabled: false,
            default_limits: ContainerLimits::default(),
            tty_columns: DEFAULT_TTY_COLUMNS,
            tty_rows: DEFAULT_TTY_ROWS,
            work_directory: None,
            log_format: LogFormat::Text,
        }
    }
}

impl EngineSettings {
    pub fn tracing(&self) -> TracingConfig {
        TracingConfig {
            enabled: self.tracing_enabled,
        }
    }

    /// Apply overrides from environment variables looked up through `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(variables::TRACING_ENABLED) {
            self.tracing_enabled = parse_bool(&value).with_context(|| {
                format!("invalid value '{value}' for {}", variables::TRACING_ENABLED)
            })?;
        }

        if let Some(value) = lookup(variables::WORK_DIR) {
            if !value.is_empty() {
                self.work_directory = Some(PathBuf::from(value));
            }
        }

        if let Some(value) = lookup(variables::LOG_FORMAT) {
            self.log_format = value
                .parse()
                .with_context(|| format!("invalid value for {}", variables::LOG_FORMAT))?;
        }

        if let Some(value) = lookup(variables::TTY_COLUMNS) {
            self.tty_columns = value.trim().parse().with_context(|| {
                format!("invalid value '{value}' for {}", variables::TTY_COLUMNS)
            })?;
        }

        if let Some(value) = lookup(variables::TTY_ROWS) {
            self.tty_rows = value.trim().parse().with_context(|| {
                format!("invalid value '{value}' for {}", variables::TTY_ROWS)
            })?;
        }

        Ok(())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// SettingsStore
// ---------------------------------------------------------------------------

/// Loads and saves [`EngineSettings`]. The loaded value is cached.
pub struct SettingsStore {
    settings_file_path: Option<PathBuf>,
    settings: Mutex<Option<EngineSettings>>,
}

impl SettingsStore {
    /// A store backed by `path`. Without a path only defaults and the
    /// environment apply.
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            settings_file_path: path,
            settings: Mutex::new(None),
        }
    }

    pub fn settings_file_path(&self) -> Option<&Path> {
        self.settings_file_path.as_deref()
    }

    pub fn is_configured(&self) -> bool {
        self.settings_file_path
            .as_deref()
            .is_some_and(|p| p.exists())
    }

    /// Load settings from the file (if any) and the process environment.
    pub fn get_settings(&self) -> Result<EngineSettings> {
        self.get_settings_with_env(|key| std::env::var(key).ok())
    }

    pub fn get_settings_with_env<F>(&self, lookup: F) -> Result<EngineSettings>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut guard = self.settings.lock();
        if let Some(ref settings) = *guard {
            return Ok(settings.clone());
        }

        let mut settings = match self.settings_file_path.as_deref() {
            Some(path) if path.exists() => {
                let json = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read settings from {path:?}"))?;
                serde_json::from_str(&json)
                    .with_context(|| format!("Failed to deserialize engine settings in {path:?}"))?
            }
            Some(path) => {
                tracing::debug!(target: "tasker::config", path = %path.display(), "settings file not found, using defaults");
                EngineSettings::default()
            }
            None => EngineSettings::default(),
        };

        settings.apply_env_overrides(lookup)?;

        *guard = Some(settings.clone());
        Ok(settings)
    }

    /// Save settings to the backing file.
    pub fn save_settings(&self, settings: &EngineSettings) -> Result<()> {
        let Some(path) = self.settings_file_path.as_deref() else {
            anyhow::bail!("no settings file configured");
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory {parent:?}"))?;
            }
        }

        let json = serde_json::to_string_pretty(settings)?;
        fs::write(path, &json).with_context(|| format!("Failed to write settings to {path:?}"))?;

        *self.settings.lock() = Some(settings.clone());
        Ok(())
    }
}
