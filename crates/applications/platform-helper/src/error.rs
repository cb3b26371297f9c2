//! Error types for the platform helper
//!
//! Every failure the reconciler, the deployment monitor or the providers can
//! produce is a variant of [`PlatformError`], so the CLI boundary can catch
//! them uniformly and print the message without a backtrace.

use std::time::Duration;
use thiserror::Error;

/// Platform helper result type
pub type Result<T> = std::result::Result<T, PlatformError>;

/// Coarse failure category, used by callers that need to branch on the kind
/// of failure rather than on the exact variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A resource looked up by tag or name does not exist
    NotFound,
    /// Raised before any mutating AWS call; safe to retry after fixing the cause
    Precondition,
    /// A batch of mutations failed partway and was compensated
    PartialFailure,
    /// A bounded poll ran out of time
    Timeout,
    /// ECS reported a failed deployment
    Deployment,
    /// Unclassified AWS API failure
    Aws,
    /// Local configuration or file problem
    Config,
}

/// Errors that can occur in the platform helper
#[derive(Error, Debug)]
pub enum PlatformError {
    // ------------------------------------------------------------------
    // Not found
    // ------------------------------------------------------------------
    /// No load balancer tagged for the application/environment
    #[error("No load balancer found for environment {environment} in the application {application}.")]
    LoadBalancerNotFound {
        application: String,
        environment: String,
    },

    /// Load balancer has no HTTPS listener
    #[error("No HTTPS listener found for environment {environment} in the application {application}.")]
    ListenerNotFound {
        application: String,
        environment: String,
    },

    #[error("No listener rule conditions found for listener ARN: {listener_arn}")]
    ListenerRuleConditionsNotFound { listener_arn: String },

    #[error("No certificate found with domain name matching environment {environment}.")]
    CertificateNotFound { environment: String },

    #[error("No ECS cluster found for \"{application}\" in \"{environment}\" environment.")]
    ClusterNotFound {
        application: String,
        environment: String,
    },

    #[error("Parameter {name} not found.")]
    ParameterNotFound { name: String },

    #[error("The AWS account does not contain the application \"{application}\"; ensure you have set the environment variable \"AWS_PROFILE\" correctly.")]
    ApplicationNotFound { application: String },

    #[error("The environment \"{environment}\" either does not exist or has not been deployed for the application {application}.")]
    EnvironmentNotFound {
        application: String,
        environment: String,
    },

    /// A copilot service has no platform-managed target group to move to
    #[error("No platform target group found for service {service} in {application}/{environment}.")]
    TargetGroupNotFound {
        application: String,
        environment: String,
        service: String,
    },

    #[error("Failed to fetch container definitions from s3://{bucket}/{key}: {reason}")]
    ContainerDefinitionsNotFound {
        bucket: String,
        key: String,
        reason: String,
    },

    // ------------------------------------------------------------------
    // Precondition
    // ------------------------------------------------------------------
    /// Rules outside either automation's ownership block the run
    #[error("The following rules have been created manually please review and if required set the rules priority to the copilot range after priority: {threshold}.\nRules: {rule_arns:?}")]
    ManualRulesPresent {
        rule_arns: Vec<String>,
        threshold: u32,
    },

    #[error("No image tag provided. Pass --image-tag or set the IMAGE_TAG environment variable.")]
    ImageTagMissing,

    #[error("Unable to find primary ECS deployment for service {service} in cluster {cluster}.")]
    NoPrimaryDeployment { service: String, cluster: String },

    #[error("Host headers {host_headers:?} need {rules} rules which exceeds the {capacity} priority slots available per group.")]
    PriorityBandExceeded {
        host_headers: Vec<String>,
        rules: usize,
        capacity: u32,
    },

    #[error("Priority {priority} in use but no matching platform rule found.")]
    PriorityInUse { priority: u32 },

    /// No container image carried the image tag placeholder
    #[error("Image tag {image_tag} was not applied to any container of service {service}; no image contains \"${{IMAGE_TAG}}\".")]
    ImageTagNotApplied { service: String, image_tag: String },

    /// A copilot rule matches on conditions a platform rule cannot reproduce
    #[error("Rule {rule_arn} uses conditions that cannot be copied to a platform rule: {fields:?}")]
    UnsupportedRuleConditions { rule_arn: String, fields: Vec<String> },

    // ------------------------------------------------------------------
    // Partial failure
    // ------------------------------------------------------------------
    /// Mutations failed and every completed step was compensated
    #[error("{cause}\nRolled back rules by creating: {rolled_back_by_creation:?}\n and deleting {rolled_back_by_deletion:?}")]
    RolledBack {
        cause: Box<PlatformError>,
        rolled_back_by_creation: Vec<String>,
        rolled_back_by_deletion: Vec<String>,
    },

    /// Compensation itself failed; AWS state needs manual review
    #[error("Rollback failed after: {cause}\nRollback partially failed: {}\nRolled back rules by creating: {rolled_back_by_creation:?}\n and deleting {rolled_back_by_deletion:?}", failures.join("\n"))]
    RollbackFailed {
        cause: Box<PlatformError>,
        failures: Vec<String>,
        rolled_back_by_creation: Vec<String>,
        rolled_back_by_deletion: Vec<String>,
    },

    // ------------------------------------------------------------------
    // Timeout
    // ------------------------------------------------------------------
    #[error("Timed out waiting for {expected} RUNNING ECS task(s) for service {service} in cluster {cluster}; found {found} after {}s.", waited.as_secs())]
    TaskStartTimeout {
        service: String,
        cluster: String,
        expected: usize,
        found: usize,
        waited: Duration,
    },

    #[error("Timed out after {}s waiting for the following log streams in {log_group} to create: {missing:?}", waited.as_secs())]
    LogStreamsTimeout {
        log_group: String,
        missing: Vec<String>,
        waited: Duration,
    },

    #[error("Timed out waiting for ECS deployment of service {service} to complete after {}s.", waited.as_secs())]
    DeploymentTimeout { service: String, waited: Duration },

    #[error("ECS exec agent never reached \"RUNNING\" status")]
    ExecAgentNotRunning,

    // ------------------------------------------------------------------
    // Deployment
    // ------------------------------------------------------------------
    #[error("ECS deployment failed: {reason}")]
    DeploymentFailed { service: String, reason: String },

    #[error("Failed to fetch ECS rollout state: {reason}")]
    RolloutStateUnavailable { service: String, reason: String },

    #[error("ECS error: {0}")]
    Ecs(String),

    // ------------------------------------------------------------------
    // AWS / local
    // ------------------------------------------------------------------
    /// AWS API error with its service error code when one was returned
    #[error("AWS error calling {operation}: {message}")]
    Aws {
        operation: String,
        code: Option<String>,
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PlatformError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an ECS error
    pub fn ecs(msg: impl Into<String>) -> Self {
        Self::Ecs(msg.into())
    }

    /// Create an AWS error carrying a service error code
    pub fn aws(
        operation: impl Into<String>,
        code: Option<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Aws {
            operation: operation.into(),
            code,
            message: message.into(),
        }
    }

    /// AWS error code, if this is an AWS API error that carried one
    pub fn aws_code(&self) -> Option<&str> {
        match self {
            Self::Aws { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Failure category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::LoadBalancerNotFound { .. }
            | Self::ListenerNotFound { .. }
            | Self::ListenerRuleConditionsNotFound { .. }
            | Self::CertificateNotFound { .. }
            | Self::ClusterNotFound { .. }
            | Self::ParameterNotFound { .. }
            | Self::ApplicationNotFound { .. }
            | Self::EnvironmentNotFound { .. }
            | Self::TargetGroupNotFound { .. }
            | Self::ContainerDefinitionsNotFound { .. } => ErrorKind::NotFound,

            Self::ManualRulesPresent { .. }
            | Self::ImageTagMissing
            | Self::NoPrimaryDeployment { .. }
            | Self::PriorityBandExceeded { .. }
            | Self::PriorityInUse { .. }
            | Self::ImageTagNotApplied { .. }
            | Self::UnsupportedRuleConditions { .. } => ErrorKind::Precondition,

            Self::RolledBack { .. } | Self::RollbackFailed { .. } => ErrorKind::PartialFailure,

            Self::TaskStartTimeout { .. }
            | Self::LogStreamsTimeout { .. }
            | Self::DeploymentTimeout { .. }
            | Self::ExecAgentNotRunning => ErrorKind::Timeout,

            Self::DeploymentFailed { .. } | Self::RolloutStateUnavailable { .. } | Self::Ecs(_) => {
                ErrorKind::Deployment
            }

            Self::Aws { .. } => ErrorKind::Aws,

            Self::Config(_) | Self::Io(_) | Self::Yaml(_) | Self::Json(_) => ErrorKind::Config,
        }
    }
}
