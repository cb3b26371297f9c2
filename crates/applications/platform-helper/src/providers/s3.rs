//! Container definition templates stored in S3
//!
//! Every platform service has its container definitions rendered by the
//! service Terraform into
//! `s3://ecs-container-definitions-{app}-{env}/{app}/{env}/{service}.json`.
//! The deployment monitor reads them back to register a new task definition
//! revision.

use crate::error::{PlatformError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Placeholder replaced with the resolved image tag
pub const IMAGE_TAG_PLACEHOLDER: &str = "${IMAGE_TAG}";

/// Raw object storage read
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Body of `s3://{bucket}/{key}`
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;
}

// Every struct denies unknown keys; a template field this model lacks must
// fail the deploy before registration.

/// `name`/`value` pair of a container environment variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeyValue {
    pub name: String,
    pub value: String,
}

/// Secret injected from SSM or Secrets Manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Secret {
    pub name: String,
    pub value_from: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PortMapping {
    pub container_port: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_port: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LogConfiguration {
    pub log_driver: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secret_options: Vec<Secret>,
}

/// Container-level health check; intervals are in seconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HealthCheck {
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_period: Option<i32>,
}

/// Start ordering against another container of the task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ContainerDependency {
    pub container_name: String,
    /// `START`, `COMPLETE`, `SUCCESS` or `HEALTHY`
    pub condition: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MountPoint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_volume: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_only: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Ulimit {
    pub name: String,
    pub soft_limit: i32,
    pub hard_limit: i32,
}

/// FireLens log router settings of a `fluentbit`/`fluentd` sidecar
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FirelensConfiguration {
    #[serde(rename = "type")]
    pub router_type: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,
}

/// One container of an ECS task definition, in the `containerDefinitions`
/// JSON shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ContainerDefinition {
    pub name: String,
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub essential: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_reservation: Option<i32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub port_mappings: Vec<PortMapping>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub environment: Vec<KeyValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<Secret>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entry_point: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readonly_root_filesystem: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheck>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<ContainerDependency>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mount_points: Vec<MountPoint>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub docker_labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ulimits: Vec<Ulimit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_timeout: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_timeout: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_configuration: Option<LogConfiguration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firelens_configuration: Option<FirelensConfiguration>,
}

/// Bucket holding container definitions for an application/environment
pub fn container_definitions_bucket(app: &str, env: &str) -> String {
    format!("ecs-container-definitions-{}-{}", app, env)
}

/// Object key of one service's container definitions
pub fn container_definitions_key(app: &str, env: &str, service: &str) -> String {
    format!("{}/{}/{}.json", app, env, service)
}

/// Reads container definition templates
pub struct ContainerDefinitionStore<O> {
    client: O,
}

impl<O: ObjectStore> ContainerDefinitionStore<O> {
    pub fn new(client: O) -> Self {
        Self { client }
    }

    #[cfg(test)]
    pub(crate) fn client_ref(&self) -> &O {
        &self.client
    }

    /// Fetch and parse the container definitions for a service
    pub async fn get_container_definitions(
        &self,
        app: &str,
        env: &str,
        service: &str,
    ) -> Result<Vec<ContainerDefinition>> {
        let bucket = container_definitions_bucket(app, env);
        let key = container_definitions_key(app, env, service);
        debug!(bucket = %bucket, key = %key, "Fetching container definitions");

        let not_found = |reason: String| PlatformError::ContainerDefinitionsNotFound {
            bucket: bucket.clone(),
            key: key.clone(),
            reason,
        };

        let body = self
            .client
            .get_object(&bucket, &key)
            .await
            .map_err(|e| not_found(e.to_string()))?;

        let stored: serde_json::Value = serde_json::from_slice(&body).map_err(|e| not_found(e.to_string()))?;
        let definitions = match stored {
            serde_json::Value::Object(mut wrapper) => wrapper
                .remove("containerDefinitions")
                .ok_or_else(|| not_found("no containerDefinitions in object".to_string()))?,
            list => list,
        };

        serde_json::from_value(definitions).map_err(|e| not_found(e.to_string()))
    }
}

/// Substitute the image tag into every container image
///
/// Images without the placeholder are left as they are, but at least one
/// image must take the tag or the deploy would not change anything.
pub fn apply_image_tag(definitions: &mut [ContainerDefinition], service: &str, image_tag: &str) -> Result<()> {
    let mut applied = 0;
    for def in definitions {
        if def.image.contains(IMAGE_TAG_PLACEHOLDER) {
            def.image = def.image.replace(IMAGE_TAG_PLACEHOLDER, image_tag);
            applied += 1;
        }
    }

    if applied == 0 {
        return Err(PlatformError::ImageTagNotApplied {
            service: service.to_string(),
            image_tag: image_tag.to_string(),
        });
    }
    Ok(())
}
