//! Build job construction

use std::time::Duration;

use crate::config::settings::BuildSettings;
use crate::deploy::naming::{image_name, source_object};
use crate::models::{BuildSpec, BuildStep, StorageSource};

/// The single-step container build for an agent's uploaded source
pub fn image_build_spec(
    settings: &BuildSettings,
    project_id: &str,
    owner_id: &str,
    agent_id: &str,
) -> BuildSpec {
    let image = image_name(
        &settings.registry_host,
        project_id,
        &settings.image_prefix,
        agent_id,
    );

    BuildSpec {
        source: Some(StorageSource {
            bucket: settings.source_bucket.clone(),
            object: source_object(owner_id, agent_id, &settings.source_archive),
        }),
        steps: vec![BuildStep {
            name: settings.builder_image.clone(),
            args: vec![
                "build".to_string(),
                "-t".to_string(),
                image.clone(),
                ".".to_string(),
            ],
            env: vec![],
            script: None,
        }],
        images: vec![image],
        timeout: Duration::from_secs(settings.timeout_secs),
    }
}
