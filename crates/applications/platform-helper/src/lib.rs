//! # Platform Helper
//!
//! Deployment platform tooling for services migrating from AWS Copilot to
//! platform-managed Terraform.
//!
//! ## Architecture
//!
//! ```text
//! main.rs (CLI)
//! ├── domain::update_alb_rules   ALB listener rule reconciliation
//! ├── domain::internal           ECS deploy + rollout monitor
//! │
//! ├── providers                  pagination, chunking, polling
//! │   ├── load_balancers   ─────  ElbApi
//! │   ├── ecs              ─────  EcsApi
//! │   ├── logs             ─────  LogsApi
//! │   ├── s3               ─────  ObjectStore
//! │   └── parameter_store  ─────  ParameterStore
//! │
//! └── aws                        aws-sdk-* implementations of the traits
//! ```
//!
//! Every AWS call is awaited in sequence. Mutations of ALB rules are
//! compensated in reverse order when any of them fails, see
//! [`domain::update_alb_rules`].

#![warn(clippy::all)]

pub mod application;
pub mod aws;
pub mod config;
pub mod domain;
pub mod error;
pub mod poll;
pub mod providers;

#[cfg(test)]
mod testing;

// Error handling
pub use error::{ErrorKind, PlatformError, Result};

// Configuration
pub use config::{PlatformConfig, ServiceConfig, ServiceDeploymentMode};

// Reconciler and deployment monitor
pub use domain::internal::DeploymentManager;
pub use domain::update_alb_rules::{AlbRuleUpdater, RuleChanges};

// AWS wiring
pub use aws::AwsClients;
