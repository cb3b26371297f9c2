//! SSM Parameter Store client

use super::sdk_error;
use crate::error::{PlatformError, Result};
use crate::providers::Page;
use crate::providers::parameter_store::{Parameter, ParameterStore};
use async_trait::async_trait;
use aws_sdk_ssm::Client;

pub struct SsmClient {
    client: Client,
}

impl SsmClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn to_parameter(parameter: &aws_sdk_ssm::types::Parameter) -> Parameter {
    Parameter {
        name: parameter.name().unwrap_or_default().to_string(),
        value: parameter.value().unwrap_or_default().to_string(),
    }
}

#[async_trait]
impl ParameterStore for SsmClient {
    async fn get_parameter(&self, name: &str) -> Result<Parameter> {
        let response = self
            .client
            .get_parameter()
            .name(name)
            .with_decryption(true)
            .send()
            .await
            .map_err(|e| match sdk_error("GetParameter", e) {
                err if err.aws_code() == Some("ParameterNotFound") => PlatformError::ParameterNotFound {
                    name: name.to_string(),
                },
                err => err,
            })?;

        response
            .parameter()
            .map(to_parameter)
            .ok_or_else(|| PlatformError::ParameterNotFound { name: name.to_string() })
    }

    async fn get_parameters_by_path(
        &self,
        path: &str,
        recursive: bool,
        next_token: Option<String>,
    ) -> Result<Page<Parameter>> {
        let response = self
            .client
            .get_parameters_by_path()
            .path(path)
            .recursive(recursive)
            .with_decryption(true)
            .set_next_token(next_token)
            .send()
            .await
            .map_err(|e| sdk_error("GetParametersByPath", e))?;

        Ok(Page {
            items: response.parameters().iter().map(to_parameter).collect(),
            next_marker: response.next_token().map(str::to_string),
        })
    }
}
