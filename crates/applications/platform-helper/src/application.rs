//! Application and environment model stored in SSM by copilot
//!
//! ```text
//! /copilot/applications/{app}                      application marker
//! /copilot/applications/{app}/environments/{env}   {"name": .., "accountID": ..}
//! /copilot/applications/{app}/components/{svc}     {"name": .., "type": ..}
//! ```

use crate::error::{PlatformError, Result};
use crate::providers::parameter_store::{ParameterStore, ParameterStoreProvider};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Environment {
    pub name: String,
    #[serde(rename = "accountID", default)]
    pub account_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Service {
    pub name: String,
    #[serde(rename = "type")]
    pub service_type: String,
}

/// An application with its deployed environments and services
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Application {
    pub name: String,
    pub environments: BTreeMap<String, Environment>,
    pub services: BTreeMap<String, Service>,
}

impl Application {
    /// A deployed environment, `EnvironmentNotFound` otherwise
    pub fn environment(&self, name: &str) -> Result<&Environment> {
        self.environments
            .get(name)
            .ok_or_else(|| PlatformError::EnvironmentNotFound {
                application: self.name.clone(),
                environment: name.to_string(),
            })
    }
}

/// Loads [`Application`]s from Parameter Store
pub struct ApplicationLoader<P> {
    parameters: ParameterStoreProvider<P>,
}

impl<P: ParameterStore> ApplicationLoader<P> {
    pub fn new(client: P) -> Self {
        Self {
            parameters: ParameterStoreProvider::new(client),
        }
    }

    pub async fn load(&self, app: &str) -> Result<Application> {
        let root = format!("/copilot/applications/{}", app);

        self.parameters
            .get_parameter(&root)
            .await
            .map_err(|e| match e {
                PlatformError::ParameterNotFound { .. } => PlatformError::ApplicationNotFound {
                    application: app.to_string(),
                },
                other => other,
            })?;

        let mut environments = BTreeMap::new();
        for parameter in self
            .parameters
            .get_parameters_by_path(&format!("{}/environments/", root), false)
            .await?
        {
            let env: Environment = serde_json::from_str(&parameter.value)?;
            environments.insert(env.name.clone(), env);
        }

        let mut services = BTreeMap::new();
        for parameter in self
            .parameters
            .get_parameters_by_path(&format!("{}/components", root), false)
            .await?
        {
            let svc: Service = serde_json::from_str(&parameter.value)?;
            services.insert(svc.name.clone(), svc);
        }

        debug!(
            application = %app,
            environments = environments.len(),
            services = services.len(),
            "Loaded application"
        );

        Ok(Application {
            name: app.to_string(),
            environments,
            services,
        })
    }
}
