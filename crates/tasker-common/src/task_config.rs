// Task configuration model and validation.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

use crate::plan::{ContainerLimits, ImageResource};

/// Resolved configuration of a task: what to run and with which artifacts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    #[serde(default)]
    pub platform: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_resource: Option<ImageResource>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rootfs_uri: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_limits: Option<ContainerLimits>,

    /// Environment given to the process.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,

    #[serde(default)]
    pub run: TaskRunConfig,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<TaskInputConfig>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<TaskOutputConfig>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub caches: Vec<TaskCacheConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRunConfig {
    #[serde(default)]
    pub path: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInputConfig {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    #[serde(default)]
    pub optional: bool,
}

impl TaskInputConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Path relative to the working directory the input is placed at.
    pub fn relative_path(&self) -> &str {
        non_empty(self.path.as_deref()).unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOutputConfig {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl TaskOutputConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: None,
        }
    }

    /// Path relative to the working directory the output is collected from.
    pub fn relative_path(&self) -> &str {
        non_empty(self.path.as_deref()).unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCacheConfig {
    pub path: String,
}

impl TaskCacheConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

/// All problems found in a task configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskValidationError {
    pub errors: Vec<String>,
}

impl fmt::Display for TaskValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "invalid task configuration:")?;
        for (i, error) in self.errors.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "  {error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for TaskValidationError {}

impl TaskConfig {
    /// Check the configuration, reporting every problem found at once.
    pub fn validate(&self) -> Result<(), TaskValidationError> {
        let mut errors = Vec::new();

        if self.platform.is_empty() {
            errors.push("missing 'platform'".to_string());
        }

        if self.run.path.is_empty() {
            errors.push("missing path to executable to run".to_string());
        }

        let mut seen = HashSet::new();
        for (i, input) in self.inputs.iter().enumerate() {
            if input.name.is_empty() {
                errors.push(format!("input in position {i} has no name"));
            } else if !seen.insert(input.name.as_str()) {
                errors.push(format!("duplicate input name '{}'", input.name));
            }
        }

        let mut seen = HashSet::new();
        for (i, output) in self.outputs.iter().enumerate() {
            if output.name.is_empty() {
                errors.push(format!("output in position {i} has no name"));
            } else if !seen.insert(output.name.as_str()) {
                errors.push(format!("duplicate output name '{}'", output.name));
            }
        }

        for (i, cache) in self.caches.iter().enumerate() {
            if cache.path.is_empty() {
                errors.push(format!("cache in position {i} has no path"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(TaskValidationError { errors })
        }
    }
}
