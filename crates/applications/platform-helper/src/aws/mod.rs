//! AWS SDK implementations of the provider traits
//!
//! All clients are built from one shared [`SdkConfig`], so a run talks to a
//! single account and region. Each adapter converts SDK shapes into the
//! normalised model of [`crate::providers`] and nothing else.

pub mod ecs;
pub mod elbv2;
pub mod logs;
pub mod s3;
pub mod ssm;

use crate::error::PlatformError;
use aws_config::BehaviorVersion;
use aws_sdk_ecs::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_types::SdkConfig;
use aws_types::region::Region;
use tracing::debug;

/// One client per AWS service used by the helper
pub struct AwsClients {
    pub elbv2: elbv2::ElbClient,
    pub ecs: ecs::EcsClient,
    pub logs: logs::LogsClient,
    pub s3: s3::S3Client,
    pub ssm: ssm::SsmClient,
}

impl AwsClients {
    /// Resolve credentials and region from the environment, optionally
    /// overridden by `region` and a named `profile`
    pub async fn load(region: Option<String>, profile: Option<String>) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(Region::new(region));
        }
        if let Some(profile) = profile {
            loader = loader.profile_name(profile);
        }

        let config = loader.load().await;
        debug!(region = ?config.region(), "Loaded AWS config");
        Self::from_config(&config)
    }

    pub fn from_config(config: &SdkConfig) -> Self {
        Self {
            elbv2: elbv2::ElbClient::new(aws_sdk_elasticloadbalancingv2::Client::new(config)),
            ecs: ecs::EcsClient::new(aws_sdk_ecs::Client::new(config)),
            logs: logs::LogsClient::new(aws_sdk_cloudwatchlogs::Client::new(config)),
            s3: s3::S3Client::new(aws_sdk_s3::Client::new(config)),
            ssm: ssm::SsmClient::new(aws_sdk_ssm::Client::new(config)),
        }
    }
}

/// Convert an SDK failure into [`PlatformError::Aws`], keeping the service
/// error code so callers can branch on it
pub(crate) fn sdk_error<E, R>(operation: &str, err: SdkError<E, R>) -> PlatformError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let code = err.code().map(str::to_string);
    let message = err
        .message()
        .map(str::to_string)
        .unwrap_or_else(|| DisplayErrorContext(&err).to_string());
    PlatformError::aws(operation, code, message)
}

/// Error for a response missing a field AWS always sets
pub(crate) fn missing(operation: &str, field: &str) -> PlatformError {
    PlatformError::aws(operation, None, format!("response did not include {}", field))
}
