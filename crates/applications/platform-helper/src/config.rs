//! Platform and service configuration files
//!
//! `platform-config.yml` describes the application and its environments. The
//! `"*"` environment holds defaults; every named environment is merged over
//! it field by field when the file is loaded, so callers only ever see
//! enriched environments.
//!
//! `service-config.yml` is generated by the service Terraform under
//! `terraform/services/{environment}/{service}/` and carries what the
//! deployment monitor needs about one service.

use crate::error::{PlatformError, Result};
use serde::{Deserialize, Deserializer};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default location of the platform configuration
pub const PLATFORM_CONFIG_FILE: &str = "platform-config.yml";

const DEFAULTS_KEY: &str = "*";

/// How traffic and rules are routed for an environment's services
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceDeploymentMode {
    #[default]
    Copilot,
    Platform,
    DualDeployCopilotTraffic,
    DualDeployPlatformTraffic,
}

impl ServiceDeploymentMode {
    /// Platform rules should mirror the copilot rules
    pub fn routes_platform_traffic(self) -> bool {
        matches!(self, Self::Platform | Self::DualDeployPlatformTraffic)
    }

    /// Platform rules should be removed
    pub fn routes_copilot_traffic(self) -> bool {
        matches!(self, Self::Copilot | Self::DualDeployCopilotTraffic)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Copilot => "copilot",
            Self::Platform => "platform",
            Self::DualDeployCopilotTraffic => "dual-deploy-copilot-traffic",
            Self::DualDeployPlatformTraffic => "dual-deploy-platform-traffic",
        }
    }
}

impl fmt::Display for ServiceDeploymentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// AWS account reference
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Account {
    pub name: String,
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Accounts {
    pub deploy: Option<Account>,
    pub dns: Option<Account>,
}

/// One enriched environment
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EnvironmentConfig {
    #[serde(default)]
    pub service_deployment_mode: ServiceDeploymentMode,
    #[serde(default)]
    pub accounts: Accounts,
    pub vpc: Option<String>,
}

#[derive(Deserialize)]
struct RawPlatformConfig {
    application: String,
    #[serde(default)]
    environments: BTreeMap<String, Option<Value>>,
}

/// Enriched `platform-config.yml`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformConfig {
    pub application: String,
    pub environments: BTreeMap<String, EnvironmentConfig>,
}

impl PlatformConfig {
    /// Load and enrich a config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| PlatformError::config(format!("Unable to read {}: {}", path.display(), e)))?;
        debug!(path = %path.display(), "Loaded platform config");
        Self::from_yaml(&contents)
    }

    /// Parse and enrich config contents
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let raw: RawPlatformConfig = serde_yaml::from_str(contents)?;
        let defaults = raw
            .environments
            .get(DEFAULTS_KEY)
            .cloned()
            .flatten()
            .map(into_mapping)
            .transpose()?
            .unwrap_or_default();

        let mut environments = BTreeMap::new();
        for (name, body) in raw.environments {
            if name == DEFAULTS_KEY {
                continue;
            }
            let mut merged = defaults.clone();
            if let Some(body) = body {
                for (key, value) in into_mapping(body)? {
                    merged.insert(key, value);
                }
            }
            let env: EnvironmentConfig = serde_yaml::from_value(Value::Mapping(merged))?;
            environments.insert(name, env);
        }

        Ok(Self {
            application: raw.application,
            environments,
        })
    }

    /// Enriched config for `name`
    pub fn environment(&self, name: &str) -> Result<&EnvironmentConfig> {
        self.environments
            .get(name)
            .ok_or_else(|| PlatformError::EnvironmentNotFound {
                application: self.application.clone(),
                environment: name.to_string(),
            })
    }
}

fn into_mapping(value: Value) -> Result<Mapping> {
    match value {
        Value::Mapping(m) => Ok(m),
        Value::Null => Ok(Mapping::new()),
        other => Err(PlatformError::config(format!(
            "Environment configuration must be a mapping, got {:?}",
            other
        ))),
    }
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Str(String),
        Num(u64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Str(s) => s,
        Id::Num(n) => n.to_string(),
    })
}

fn default_count() -> u32 {
    1
}

fn default_cpu() -> u32 {
    256
}

fn default_memory() -> u32 {
    512
}

/// Generated `service-config.yml`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub service_type: String,
    /// Desired number of running tasks
    #[serde(default = "default_count")]
    pub count: u32,
    #[serde(default = "default_cpu")]
    pub cpu: u32,
    #[serde(default = "default_memory")]
    pub memory: u32,
}

impl ServiceConfig {
    /// `{base}/terraform/services/{environment}/{service}/service-config.yml`
    pub fn path(base_dir: &Path, environment: &str, service: &str) -> PathBuf {
        base_dir
            .join("terraform")
            .join("services")
            .join(environment)
            .join(service)
            .join("service-config.yml")
    }

    pub fn load(base_dir: &Path, environment: &str, service: &str) -> Result<Self> {
        let path = Self::path(base_dir, environment, service);
        let contents = std::fs::read_to_string(&path)
            .map_err(|e| PlatformError::config(format!("Unable to read {}: {}", path.display(), e)))?;
        Ok(serde_yaml::from_str(&contents)?)
    }
}
