//! ECS cluster, task definition and service operations

use super::Page;
use super::load_balancers::{Tags, tag_is};
use super::s3::ContainerDefinition;
use crate::config::ServiceConfig;
use crate::error::{PlatformError, Result};
use crate::poll::{PollOutcome, PollSchedule, Step, poll_until};
use async_trait::async_trait;
use std::fmt;
use tracing::{debug, info};

/// Seconds between attempts of the short ECS waits
pub const SECONDS_BEFORE_RETRY: u64 = 3;

/// Attempts made by [`EcsProvider::wait_for_task_to_register`]
pub const TASK_REGISTER_ATTEMPTS: u64 = 20;

/// Attempts made by [`EcsProvider::ecs_exec_is_available`]
pub const EXEC_AGENT_ATTEMPTS: u64 = 25;

const EXECUTE_COMMAND_AGENT: &str = "ExecuteCommandAgent";

/// Which tasks `list_tasks` should return
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    pub family: Option<String>,
    pub started_by: Option<String>,
    /// `RUNNING`, `PENDING` or `STOPPED`
    pub desired_status: Option<String>,
}

impl TaskFilter {
    /// Running tasks started by an ECS deployment
    pub fn running_for_deployment(deployment_id: &str) -> Self {
        Self {
            family: None,
            started_by: Some(deployment_id.to_string()),
            desired_status: Some("RUNNING".to_string()),
        }
    }

    /// Running tasks of a task definition family
    pub fn running_for_family(family: &str) -> Self {
        Self {
            family: Some(family.to_string()),
            started_by: None,
            desired_status: Some("RUNNING".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cluster {
    pub arn: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedAgent {
    pub name: String,
    pub last_status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    pub name: String,
    pub managed_agents: Vec<ManagedAgent>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub arn: String,
    pub containers: Vec<Container>,
}

/// Task definition revision to register
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDefinition {
    pub family: String,
    pub task_role_arn: String,
    pub execution_role_arn: String,
    pub network_mode: String,
    pub requires_compatibilities: Vec<String>,
    pub cpu: String,
    pub memory: String,
    pub container_definitions: Vec<ContainerDefinition>,
}

/// ECS rollout state of one service deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RolloutState {
    InProgress,
    Completed,
    Failed,
    /// Any state this helper does not act on
    Other(String),
}

impl RolloutState {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "IN_PROGRESS" => Self::InProgress,
            "COMPLETED" => Self::Completed,
            "FAILED" => Self::Failed,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for RolloutState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InProgress => f.write_str("IN_PROGRESS"),
            Self::Completed => f.write_str("COMPLETED"),
            Self::Failed => f.write_str("FAILED"),
            Self::Other(s) => f.write_str(s),
        }
    }
}

/// One entry of a service's `deployments` list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDeployment {
    pub id: String,
    /// `PRIMARY`, `ACTIVE` or `INACTIVE`
    pub status: String,
    pub rollout_state: Option<String>,
    pub rollout_state_reason: Option<String>,
}

impl ServiceDeployment {
    pub fn is_primary(&self) -> bool {
        self.status == "PRIMARY"
    }
}

/// Raw ECS operations
#[async_trait]
pub trait EcsApi: Send + Sync {
    async fn describe_clusters(&self, cluster_names: &[String]) -> Result<Vec<Cluster>>;

    async fn list_clusters(&self, next_token: Option<String>) -> Result<Page<String>>;

    async fn list_tags_for_resource(&self, resource_arn: &str) -> Result<Tags>;

    /// Register a revision and return its ARN
    async fn register_task_definition(&self, task_definition: &TaskDefinition) -> Result<String>;

    /// Point the service at a task definition; returns the service's deployments
    async fn update_service(
        &self,
        cluster: &str,
        service: &str,
        task_definition_arn: &str,
    ) -> Result<Vec<ServiceDeployment>>;

    async fn list_tasks(
        &self,
        cluster: &str,
        filter: &TaskFilter,
        next_token: Option<String>,
    ) -> Result<Page<String>>;

    async fn describe_tasks(&self, cluster: &str, task_arns: &[String]) -> Result<Vec<Task>>;

    /// Current deployments of a service
    async fn describe_services(&self, cluster: &str, service: &str) -> Result<Vec<ServiceDeployment>>;
}

/// ECS cluster name for an application/environment
pub fn cluster_name(app: &str, env: &str) -> String {
    format!("{}-{}-cluster", app, env)
}

/// ECS service name for a platform service
pub fn ecs_service_name(app: &str, env: &str, service: &str) -> String {
    format!("{}-{}-{}", app, env, service)
}

/// Task definition family for a platform service
pub fn task_definition_family(app: &str, env: &str, service: &str) -> String {
    format!("{}-{}-{}-task-def", app, env, service)
}

fn no_cluster(app: &str, env: &str) -> PlatformError {
    PlatformError::ClusterNotFound {
        application: app.to_string(),
        environment: env.to_string(),
    }
}

/// ECS provider
pub struct EcsProvider<C> {
    client: C,
}

impl<C: EcsApi> EcsProvider<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    #[cfg(test)]
    pub(crate) fn client_ref(&self) -> &C {
        &self.client
    }

    /// ARN of the `{app}-{env}-cluster` cluster
    pub async fn get_cluster_arn_by_name(&self, app: &str, env: &str) -> Result<String> {
        let clusters = self.client.describe_clusters(&[cluster_name(app, env)]).await?;

        match clusters.as_slice() {
            [cluster] if !cluster.arn.is_empty() => Ok(cluster.arn.clone()),
            _ => Err(no_cluster(app, env)),
        }
    }

    /// Cluster created by copilot for an application/environment
    pub async fn get_cluster_arn_by_copilot_tag(&self, app: &str, env: &str) -> Result<String> {
        let mut token = None;
        loop {
            let page = self.client.list_clusters(token).await?;
            for arn in page.items {
                let tags = self.client.list_tags_for_resource(&arn).await?;
                if tag_is(&tags, "copilot-application", app)
                    && tag_is(&tags, "copilot-environment", env)
                    && tag_is(&tags, "aws:cloudformation:logical-id", "Cluster")
                {
                    return Ok(arn);
                }
            }
            token = page.next_marker;
            if token.is_none() {
                return Err(no_cluster(app, env));
            }
        }
    }

    /// Every task ARN matching `filter`
    pub async fn get_ecs_task_arns(&self, cluster: &str, filter: &TaskFilter) -> Result<Vec<String>> {
        let mut arns = Vec::new();
        let mut token = None;
        loop {
            let page = self.client.list_tasks(cluster, filter, token).await?;
            arns.extend(page.items);
            token = page.next_marker;
            if token.is_none() {
                return Ok(arns);
            }
        }
    }

    /// Register a Fargate task definition revision for a service
    pub async fn register_task_definition(
        &self,
        app: &str,
        env: &str,
        service: &ServiceConfig,
        account_id: &str,
        container_definitions: Vec<ContainerDefinition>,
    ) -> Result<String> {
        let prefix = ecs_service_name(app, env, &service.name);
        let task_definition = TaskDefinition {
            family: task_definition_family(app, env, &service.name),
            task_role_arn: format!("arn:aws:iam::{}:role/{}-ecs-task-role", account_id, prefix),
            execution_role_arn: format!(
                "arn:aws:iam::{}:role/{}-ecs-task-execution-role",
                account_id, prefix
            ),
            network_mode: "awsvpc".to_string(),
            requires_compatibilities: vec!["FARGATE".to_string()],
            cpu: service.cpu.to_string(),
            memory: service.memory.to_string(),
            container_definitions,
        };

        let arn = self.client.register_task_definition(&task_definition).await?;
        info!(task_definition = %arn, "Registered task definition");
        Ok(arn)
    }

    /// Update the service and return the id of its PRIMARY deployment
    pub async fn update_service(&self, cluster: &str, service: &str, task_definition_arn: &str) -> Result<String> {
        let deployments = self
            .client
            .update_service(cluster, service, task_definition_arn)
            .await?;

        deployments
            .into_iter()
            .find(ServiceDeployment::is_primary)
            .map(|d| d.id)
            .ok_or_else(|| PlatformError::NoPrimaryDeployment {
                service: service.to_string(),
                cluster: cluster.to_string(),
            })
    }

    /// Unique container names across `task_arns`, in first-seen order
    pub async fn get_container_names_from_ecs_tasks(&self, cluster: &str, task_arns: &[String]) -> Result<Vec<String>> {
        let tasks = self.client.describe_tasks(cluster, task_arns).await?;

        let mut names: Vec<String> = Vec::new();
        for container in tasks.into_iter().flat_map(|t| t.containers) {
            if !names.contains(&container.name) {
                names.push(container.name);
            }
        }
        Ok(names)
    }

    /// Rollout state and reason of one deployment of a service
    pub async fn get_service_rollout_state(
        &self,
        cluster: &str,
        service: &str,
        deployment_id: &str,
    ) -> Result<(RolloutState, Option<String>)> {
        let unavailable = |reason: String| PlatformError::RolloutStateUnavailable {
            service: service.to_string(),
            reason,
        };

        let deployments = self
            .client
            .describe_services(cluster, service)
            .await
            .map_err(|e| unavailable(e.to_string()))?;

        let deployment = deployments
            .into_iter()
            .find(|d| d.id == deployment_id)
            .ok_or_else(|| unavailable(format!("deployment {} not found", deployment_id)))?;

        let state = deployment
            .rollout_state
            .as_deref()
            .map(RolloutState::parse)
            .ok_or_else(|| unavailable(format!("deployment {} has no rollout state", deployment_id)))?;

        Ok((state, deployment.rollout_state_reason))
    }

    /// Wait for a task of `task_family` to be running
    pub async fn wait_for_task_to_register(&self, cluster: &str, task_family: &str) -> Result<Vec<String>> {
        let filter = TaskFilter::running_for_family(task_family);
        let filter = &filter;
        let schedule = PollSchedule::new(
            SECONDS_BEFORE_RETRY,
            SECONDS_BEFORE_RETRY * TASK_REGISTER_ATTEMPTS,
        );

        let outcome = poll_until(schedule, (), move |()| async move {
            let arns = self.get_ecs_task_arns(cluster, filter).await?;
            Ok(if arns.is_empty() {
                Step::Continue(())
            } else {
                Step::Done(arns)
            })
        })
        .await?;

        match outcome {
            PollOutcome::Done(arns) => Ok(arns),
            PollOutcome::TimedOut { .. } => Err(PlatformError::ecs("ECS task did not register in time")),
        }
    }

    /// Wait for the exec agent of the first container to report `RUNNING`
    ///
    /// Missing tasks or agents are retried until the attempts run out.
    pub async fn ecs_exec_is_available(&self, cluster: &str, task_arns: &[String]) -> Result<()> {
        if task_arns.is_empty() {
            return Err(PlatformError::config("No task ARNs provided"));
        }

        let client = &self.client;
        let schedule = PollSchedule::new(SECONDS_BEFORE_RETRY, SECONDS_BEFORE_RETRY * EXEC_AGENT_ATTEMPTS);

        let outcome = poll_until(schedule, (), move |()| async move {
            let tasks = client.describe_tasks(cluster, task_arns).await?;
            let agent_status = tasks
                .first()
                .and_then(|t| t.containers.first())
                .and_then(|c| c.managed_agents.iter().find(|a| a.name == EXECUTE_COMMAND_AGENT))
                .and_then(|a| a.last_status.clone());

            debug!(status = ?agent_status, "Exec agent status");
            Ok(if agent_status.as_deref() == Some("RUNNING") {
                Step::Done(())
            } else {
                Step::Continue(())
            })
        })
        .await?;

        match outcome {
            PollOutcome::Done(()) => Ok(()),
            PollOutcome::TimedOut { .. } => Err(PlatformError::ExecAgentNotRunning),
        }
    }
}
