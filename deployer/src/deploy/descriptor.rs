//! Workload descriptor construction

use std::collections::BTreeMap;

use crate::config::settings::{ResourceQuantities, WorkloadSettings};
use crate::models::manifest::{
    Container, DeploymentDescriptor, DeploymentSpec, EnvVar, LabelSelector, ObjectMeta, PodSpec,
    PodTemplateSpec, ResourceRequirements, DEPLOYMENT_API_VERSION, DEPLOYMENT_KIND,
};

/// Label carrying the agent ID on every object of the workload
pub const AGENT_ID_LABEL: &str = "agent-id";

fn quantities(q: &ResourceQuantities) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("cpu".to_string(), q.cpu.clone()),
        ("memory".to_string(), q.memory.clone()),
    ])
}

/// The Deployment running an agent's image
pub fn agent_descriptor(
    workload: &WorkloadSettings,
    namespace: &str,
    name: &str,
    image: &str,
    agent_id: &str,
) -> DeploymentDescriptor {
    let labels = BTreeMap::from([
        ("app".to_string(), workload.app_label.clone()),
        (AGENT_ID_LABEL.to_string(), agent_id.to_string()),
    ]);

    let env = workload
        .secret_env
        .iter()
        .map(|var| EnvVar::from_secret(&var.env, &workload.secret_name, &var.key))
        .collect();

    DeploymentDescriptor {
        api_version: DEPLOYMENT_API_VERSION.to_string(),
        kind: DEPLOYMENT_KIND.to_string(),
        metadata: ObjectMeta {
            name: name.to_string(),
            namespace: Some(namespace.to_string()),
            labels: labels.clone(),
        },
        spec: DeploymentSpec {
            replicas: workload.replicas,
            selector: LabelSelector {
                match_labels: labels.clone(),
            },
            template: PodTemplateSpec {
                metadata: ObjectMeta {
                    labels,
                    ..ObjectMeta::default()
                },
                spec: PodSpec {
                    containers: vec![Container {
                        name: workload.container_name.clone(),
                        image: image.to_string(),
                        env,
                        resources: ResourceRequirements {
                            requests: quantities(&workload.resources.requests),
                            limits: quantities(&workload.resources.limits),
                        },
                    }],
                },
            },
        },
    }
}
