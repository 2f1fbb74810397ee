// Image resolution: picks where the task container's root filesystem
// comes from.
//
// Precedence: image artifact > image resource > rootfs URI > worker default.

use tasker_common::{
    ArtifactRepository, ImageSource, ImageSpec, StepContext, TaskConfig, TaskPlan,
};

use crate::delegate::TaskDelegate;
use crate::errors::TaskStepError;

/// The image decision and what it demands of the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedImage {
    pub image_spec: ImageSpec,
    /// Resource type the worker must provide, if any.
    pub resource_type: Option<String>,
}

pub async fn resolve_image(
    ctx: &StepContext,
    plan: &TaskPlan,
    config: &TaskConfig,
    repository: &ArtifactRepository,
    delegate: &dyn TaskDelegate,
) -> Result<ResolvedImage, TaskStepError> {
    let privileged = plan.privileged;

    if let Some(name) = plan.image_artifact_name.as_deref().filter(|n| !n.is_empty()) {
        let volume = repository
            .artifact_for(name)
            .ok_or_else(|| TaskStepError::MissingTaskImageSource {
                name: name.to_string(),
            })?;

        tracing::debug!(target: "tasker::image", artifact = name, volume = volume.handle(), "using image artifact");
        return Ok(ResolvedImage {
            image_spec: ImageSpec {
                source: ImageSource::Artifact {
                    volume: volume.handle().to_string(),
                },
                privileged,
            },
            resource_type: None,
        });
    }

    if let Some(image_resource) = config.image_resource.as_ref() {
        let mut image_resource = image_resource.clone();
        if image_resource.tags.is_empty() {
            image_resource.tags = plan.tags.clone();
        }
        let resource_type = image_resource.resource_type.clone();

        tracing::debug!(target: "tasker::image", resource_type = %resource_type, tags = ?image_resource.tags, "fetching image resource");
        let fetched = delegate
            .fetch_image(ctx, image_resource, &plan.resource_types, privileged)
            .await
            .map_err(TaskStepError::FetchImage)?;

        return Ok(ResolvedImage {
            image_spec: ImageSpec {
                source: ImageSource::Fetched(fetched),
                privileged,
            },
            resource_type: Some(resource_type),
        });
    }

    let source = match config.rootfs_uri.as_deref().filter(|u| !u.is_empty()) {
        Some(uri) => ImageSource::RootfsUri(uri.to_string()),
        None => ImageSource::WorkerDefault,
    };

    Ok(ResolvedImage {
        image_spec: ImageSpec { source, privileged },
        resource_type: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeDelegate, FakeVolume};
    use std::sync::Arc;
    use tasker_common::{FetchedImage, ImageResource};

    fn plan_and_config() -> (TaskPlan, TaskConfig) {
        let plan = TaskPlan {
            name: "some-task".into(),
            ..Default::default()
        };
        let config = TaskConfig {
            platform: "some-platform".into(),
            ..Default::default()
        };
        (plan, config)
    }

    fn docker_image() -> ImageResource {
        ImageResource {
            resource_type: "docker".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn worker_default_without_any_image() {
        let (plan, config) = plan_and_config();
        let delegate = FakeDelegate::new();
        let resolved = resolve_image(&StepContext::new(), &plan, &config, &ArtifactRepository::new(), &delegate)
            .await
            .unwrap();
        assert_eq!(resolved.image_spec.source, ImageSource::WorkerDefault);
        assert_eq!(resolved.resource_type, None);
        assert_eq!(delegate.fetch_image_call_count(), 0);
    }

    #[tokio::test]
    async fn rootfs_uri_is_used_verbatim() {
        let (mut plan, mut config) = plan_and_config();
        plan.privileged = true;
        config.rootfs_uri = Some("some-image".into());
        let delegate = FakeDelegate::new();

        let resolved = resolve_image(&StepContext::new(), &plan, &config, &ArtifactRepository::new(), &delegate)
            .await
            .unwrap();
        assert_eq!(
            resolved.image_spec,
            ImageSpec {
                source: ImageSource::RootfsUri("some-image".into()),
                privileged: true,
            }
        );
    }

    #[tokio::test]
    async fn artifact_wins_over_everything() {
        let (mut plan, mut config) = plan_and_config();
        plan.image_artifact_name = Some("some-image-artifact".into());
        config.rootfs_uri = Some("some-image".into());
        config.image_resource = Some(docker_image());

        let repo = ArtifactRepository::new();
        repo.register_artifact("some-image-artifact", Arc::new(FakeVolume::new("image-volume")));
        let delegate = FakeDelegate::new();

        let resolved = resolve_image(&StepContext::new(), &plan, &config, &repo, &delegate)
            .await
            .unwrap();
        assert_eq!(
            resolved.image_spec.source,
            ImageSource::Artifact {
                volume: "image-volume".into()
            }
        );
        assert_eq!(resolved.resource_type, None);
        assert_eq!(delegate.fetch_image_call_count(), 0);
    }

    #[tokio::test]
    async fn missing_artifact_is_fatal() {
        let (mut plan, config) = plan_and_config();
        plan.image_artifact_name = Some("some-image-artifact".into());
        let delegate = FakeDelegate::new();

        let err = resolve_image(&StepContext::new(), &plan, &config, &ArtifactRepository::new(), &delegate)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TaskStepError::MissingTaskImageSource { ref name } if name == "some-image-artifact"
        ));
    }

    #[tokio::test]
    async fn image_resource_is_fetched_with_plan_tags() {
        let (mut plan, mut config) = plan_and_config();
        plan.tags = vec!["plan".into(), "tags".into()];
        config.image_resource = Some(docker_image());
        config.rootfs_uri = Some("some-image".into());

        let delegate = FakeDelegate::new();
        delegate.fetch_image_returns(Ok(FetchedImage {
            volume: "some-volume".into(),
        }));

        let resolved = resolve_image(&StepContext::new(), &plan, &config, &ArtifactRepository::new(), &delegate)
            .await
            .unwrap();
        assert_eq!(
            resolved.image_spec.source,
            ImageSource::Fetched(FetchedImage {
                volume: "some-volume".into()
            })
        );
        assert_eq!(resolved.resource_type.as_deref(), Some("docker"));

        let call = delegate.fetch_image_args_for_call(0);
        assert_eq!(call.image.tags, vec!["plan", "tags"]);
    }

    #[tokio::test]
    async fn image_resource_tags_win_over_plan_tags() {
        let (mut plan, mut config) = plan_and_config();
        plan.tags = vec!["plan".into(), "tags".into()];
        let mut image = docker_image();
        image.tags = vec!["image".into(), "tags".into()];
        config.image_resource = Some(image);

        let delegate = FakeDelegate::new();
        resolve_image(&StepContext::new(), &plan, &config, &ArtifactRepository::new(), &delegate)
            .await
            .unwrap();
        assert_eq!(delegate.fetch_image_args_for_call(0).image.tags, vec!["image", "tags"]);
    }

    #[tokio::test]
    async fn fetch_failure_is_propagated() {
        let (plan, mut config) = plan_and_config();
        config.image_resource = Some(docker_image());
        let delegate = FakeDelegate::new();
        delegate.fetch_image_returns(Err("registry unavailable".into()));

        let err = resolve_image(&StepContext::new(), &plan, &config, &ArtifactRepository::new(), &delegate)
            .await
            .unwrap_err();
        assert!(matches!(err, TaskStepError::FetchImage(_)));
        assert_eq!(err.to_string(), "registry unavailable");
    }
}
