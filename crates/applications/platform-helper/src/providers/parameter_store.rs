//! SSM Parameter Store reads

use super::Page;
use crate::error::Result;
use async_trait::async_trait;

/// A single SSM parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    pub value: String,
}

/// Raw SSM operations
#[async_trait]
pub trait ParameterStore: Send + Sync {
    /// Fetch one parameter; `ParameterNotFound` when it does not exist
    async fn get_parameter(&self, name: &str) -> Result<Parameter>;

    /// One page of parameters under `path`
    async fn get_parameters_by_path(
        &self,
        path: &str,
        recursive: bool,
        next_token: Option<String>,
    ) -> Result<Page<Parameter>>;
}

/// Parameter Store provider
pub struct ParameterStoreProvider<P> {
    client: P,
}

impl<P: ParameterStore> ParameterStoreProvider<P> {
    pub fn new(client: P) -> Self {
        Self { client }
    }

    pub async fn get_parameter(&self, name: &str) -> Result<Parameter> {
        self.client.get_parameter(name).await
    }

    /// Every parameter under `path`, following `NextToken`
    pub async fn get_parameters_by_path(&self, path: &str, recursive: bool) -> Result<Vec<Parameter>> {
        let mut parameters = Vec::new();
        let mut token = None;
        loop {
            let page = self
                .client
                .get_parameters_by_path(path, recursive, token)
                .await?;
            parameters.extend(page.items);
            token = page.next_marker;
            if token.is_none() {
                return Ok(parameters);
            }
        }
    }
}
