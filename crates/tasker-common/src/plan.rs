// Task plan model.
// A `TaskPlan` describes one task step of a build plan. It is produced by the
// planner, is immutable, and is only read by the engine.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::task_config::TaskConfig;

/// Arbitrary resource configuration (`source:` blocks).
pub type Source = BTreeMap<String, serde_json::Value>;

/// Arbitrary resource parameters (`params:` blocks).
pub type Params = BTreeMap<String, serde_json::Value>;

/// A resource version.
pub type Version = BTreeMap<String, String>;

/// Worker tags used for placement.
pub type Tags = Vec<String>;

/// Identifier of a plan node within a build plan.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanId(pub String);

impl PlanId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PlanId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// CPU shares and memory (bytes) limits for a container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerLimits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<u64>,
}

impl ContainerLimits {
    /// Overlay `other` on top of `self`; fields set in `other` win.
    pub fn overridden_by(self, other: Option<&ContainerLimits>) -> ContainerLimits {
        match other {
            None => self,
            Some(other) => ContainerLimits {
                cpu: other.cpu.or(self.cpu),
                memory: other.memory.or(self.memory),
            },
        }
    }
}

/// Descriptor of the resource providing a task's image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageResource {
    #[serde(rename = "type")]
    pub resource_type: String,

    #[serde(default)]
    pub source: Source,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: Params,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Version>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Tags,
}

/// A custom resource type declared by the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceType {
    pub name: String,

    #[serde(rename = "type")]
    pub resource_type: String,

    #[serde(default)]
    pub source: Source,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: Params,

    #[serde(default)]
    pub privileged: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Tags,
}

/// A resource type pinned to the version the build resolved for it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VersionedResourceType {
    #[serde(flatten)]
    pub resource_type: ResourceType,

    #[serde(default)]
    pub version: Version,
}

pub type VersionedResourceTypes = Vec<VersionedResourceType>;

/// One task step of a build plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskPlan {
    pub name: String,

    #[serde(default)]
    pub privileged: bool,

    /// Overrides for the container limits, applied over the task config's.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<ContainerLimits>,

    /// The resolved task configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<TaskConfig>,

    /// Name of an artifact produced earlier in the build to use as the image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_artifact_name: Option<String>,

    /// Declared input name → artifact name to read it from.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub input_mapping: BTreeMap<String, String>,

    /// Declared output name → artifact name to register it as.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub output_mapping: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Tags,

    /// Timeout for the process, e.g. `"1h30m"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_types: VersionedResourceTypes,
}

impl TaskPlan {
    /// The artifact name an input declared as `name` is read from.
    pub fn input_source<'a>(&'a self, name: &'a str) -> &'a str {
        self.input_mapping
            .get(name)
            .map(String::as_str)
            .unwrap_or(name)
    }

    /// The artifact name an output declared as `name` is registered as.
    pub fn output_destination<'a>(&'a self, name: &'a str) -> &'a str {
        self.output_mapping
            .get(name)
            .map(String::as_str)
            .unwrap_or(name)
    }

    /// The configured timeout, ignoring an empty string.
    pub fn timeout(&self) -> Option<&str> {
        self.timeout.as_deref().filter(|t| !t.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_overlay_per_field() {
        let defaults = ContainerLimits {
            cpu: Some(512),
            memory: Some(1024),
        };
        let overrides = ContainerLimits {
            cpu: None,
            memory: Some(4096),
        };

        let merged = defaults.overridden_by(Some(&overrides));
        assert_eq!(merged.cpu, Some(512));
        assert_eq!(merged.memory, Some(4096));
        assert_eq!(defaults.overridden_by(None), defaults);
    }

    #[test]
    fn mappings_default_to_identity() {
        let mut plan = TaskPlan::default();
        plan.input_mapping
            .insert("remapped-input".into(), "remapped-input-src".into());
        plan.output_mapping
            .insert("some-other-output".into(), "some-remapped-output".into());

        assert_eq!(plan.input_source("remapped-input"), "remapped-input-src");
        assert_eq!(plan.input_source("plain"), "plain");
        assert_eq!(
            plan.output_destination("some-other-output"),
            "some-remapped-output"
        );
        assert_eq!(plan.output_destination("some-output"), "some-output");
    }

    #[test]
    fn empty_timeout_is_unset() {
        let mut plan = TaskPlan::default();
        assert_eq!(plan.timeout(), None);
        plan.timeout = Some(String::new());
        assert_eq!(plan.timeout(), None);
        plan.timeout = Some("1ms".into());
        assert_eq!(plan.timeout(), Some("1ms"));
    }

    #[test]
    fn deserializes_plan_from_yaml() {
        let yaml = r#"
name: unit
privileged: true
tags: [linux, large]
timeout: 30m
input_mapping:
  repo: source-code
resource_types:
  - name: custom-resource
    type: custom-type
    source: { some-custom: value }
    version: { some-custom: version }
config:
  platform: linux
  run:
    path: make
    args: [test]
"#;
        let plan: TaskPlan = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(plan.name, "unit");
        assert!(plan.privileged);
        assert_eq!(plan.tags, vec!["linux", "large"]);
        assert_eq!(plan.input_source("repo"), "source-code");
        assert_eq!(plan.resource_types[0].resource_type.name, "custom-resource");
        assert_eq!(
            plan.resource_types[0].version.get("some-custom").map(String::as_str),
            Some("version")
        );
        let config = plan.config.unwrap();
        assert_eq!(config.run.path, "make");
        assert_eq!(config.run.args, vec!["test"]);
    }
}
