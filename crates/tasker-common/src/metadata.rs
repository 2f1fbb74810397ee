// Identity of a running step and of the containers it creates.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::plan::PlanId;

/// Build-level identity of the step being executed.
///
/// `job_id` is zero for one-off builds, which never populate task caches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepMetadata {
    pub team_id: i32,
    #[serde(default)]
    pub team_name: String,
    pub build_id: i32,
    #[serde(default)]
    pub build_name: String,
    #[serde(default)]
    pub pipeline_id: i32,
    #[serde(default)]
    pub pipeline_name: String,
    #[serde(default)]
    pub job_id: i32,
    #[serde(default)]
    pub job_name: String,
}

impl StepMetadata {
    pub fn belongs_to_job(&self) -> bool {
        self.job_id != 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerType {
    Check,
    Get,
    Put,
    #[default]
    Task,
}

impl fmt::Display for ContainerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ContainerType::Check => "check",
            ContainerType::Get => "get",
            ContainerType::Put => "put",
            ContainerType::Task => "task",
        };
        f.write_str(name)
    }
}

/// Descriptive metadata attached to a container when it is created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerMetadata {
    /// Root directory inside the container that inputs, outputs and caches
    /// are placed under.
    pub working_directory: String,
    #[serde(rename = "type")]
    pub container_type: ContainerType,
    #[serde(default)]
    pub step_name: String,
    #[serde(default)]
    pub attempt: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub team_id: i32,
    #[serde(default)]
    pub team_name: String,
    #[serde(default)]
    pub pipeline_id: i32,
    #[serde(default)]
    pub pipeline_name: String,
    #[serde(default)]
    pub job_id: i32,
    #[serde(default)]
    pub job_name: String,
    #[serde(default)]
    pub build_id: i32,
    #[serde(default)]
    pub build_name: String,
}

/// Who owns a container; containers are found again by owner.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContainerOwner {
    BuildStep {
        build_id: i32,
        plan_id: PlanId,
        team_id: i32,
    },
}

impl ContainerOwner {
    pub fn build_step(build_id: i32, plan_id: PlanId, team_id: i32) -> Self {
        ContainerOwner::BuildStep {
            build_id,
            plan_id,
            team_id,
        }
    }
}

impl fmt::Display for ContainerOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerOwner::BuildStep {
                build_id,
                plan_id,
                team_id,
            } => write!(f, "build {build_id} plan {plan_id} team {team_id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_off_builds_do_not_belong_to_a_job() {
        let mut metadata = StepMetadata {
            team_id: 123,
            build_id: 1234,
            ..Default::default()
        };
        assert!(!metadata.belongs_to_job());
        metadata.job_id = 12345;
        assert!(metadata.belongs_to_job());
    }

    #[test]
    fn owner_display_names_build_and_plan() {
        let owner = ContainerOwner::build_step(1234, PlanId::new("42"), 123);
        assert_eq!(owner.to_string(), "build 1234 plan 42 team 123");
    }

    #[test]
    fn container_type_serializes_lowercase() {
        let json = serde_json::to_string(&ContainerType::Task).unwrap();
        assert_eq!(json, "\"task\"");
    }
}
