//! ECS client

use super::{missing, sdk_error};
use crate::error::{PlatformError, Result};
use crate::providers::Page;
use crate::providers::ecs::{
    Cluster, Container, EcsApi, ManagedAgent, ServiceDeployment, Task, TaskDefinition, TaskFilter,
};
use crate::providers::load_balancers::Tags;
use crate::providers::s3::{ContainerDefinition, Secret as TemplateSecret};
use async_trait::async_trait;
use aws_sdk_ecs::Client;
use aws_sdk_ecs::types::{
    Compatibility, ContainerCondition, ContainerDefinition as SdkContainerDefinition, ContainerDependency,
    Deployment, DesiredStatus, FirelensConfiguration, FirelensConfigurationType, HealthCheck, KeyValuePair,
    LogConfiguration, LogDriver, MountPoint, NetworkMode, PortMapping, Secret, TransportProtocol, Ulimit,
    UlimitName,
};

pub struct EcsClient {
    client: Client,
}

impl EcsClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn build_error(e: impl std::fmt::Display) -> PlatformError {
    PlatformError::aws("RegisterTaskDefinition", None, e.to_string())
}

fn to_sdk_container(definition: &ContainerDefinition) -> Result<SdkContainerDefinition> {
    let port_mappings = definition
        .port_mappings
        .iter()
        .map(|p| {
            PortMapping::builder()
                .container_port(p.container_port)
                .set_host_port(p.host_port)
                .set_protocol(p.protocol.as_deref().map(TransportProtocol::from))
                .build()
        })
        .collect();

    let environment = definition
        .environment
        .iter()
        .map(|kv| KeyValuePair::builder().name(&kv.name).value(&kv.value).build())
        .collect();

    let secrets = to_sdk_secrets(&definition.secrets)?;

    let log_configuration = definition
        .log_configuration
        .as_ref()
        .map(|l| -> Result<LogConfiguration> {
            let secret_options = to_sdk_secrets(&l.secret_options)?;
            LogConfiguration::builder()
                .log_driver(LogDriver::from(l.log_driver.as_str()))
                .set_options(Some(l.options.clone().into_iter().collect()))
                .set_secret_options((!secret_options.is_empty()).then_some(secret_options))
                .build()
                .map_err(build_error)
        })
        .transpose()?;

    let health_check = definition
        .health_check
        .as_ref()
        .map(|h| {
            HealthCheck::builder()
                .set_command(Some(h.command.clone()))
                .set_interval(h.interval)
                .set_timeout(h.timeout)
                .set_retries(h.retries)
                .set_start_period(h.start_period)
                .build()
                .map_err(build_error)
        })
        .transpose()?;

    let depends_on = definition
        .depends_on
        .iter()
        .map(|d| {
            ContainerDependency::builder()
                .container_name(&d.container_name)
                .condition(ContainerCondition::from(d.condition.as_str()))
                .build()
                .map_err(build_error)
        })
        .collect::<Result<Vec<_>>>()?;

    let mount_points = definition
        .mount_points
        .iter()
        .map(|m| {
            MountPoint::builder()
                .set_source_volume(m.source_volume.clone())
                .set_container_path(m.container_path.clone())
                .set_read_only(m.read_only)
                .build()
        })
        .collect::<Vec<_>>();

    let ulimits = definition
        .ulimits
        .iter()
        .map(|u| {
            Ulimit::builder()
                .name(UlimitName::from(u.name.as_str()))
                .soft_limit(u.soft_limit)
                .hard_limit(u.hard_limit)
                .build()
                .map_err(build_error)
        })
        .collect::<Result<Vec<_>>>()?;

    let firelens_configuration = definition
        .firelens_configuration
        .as_ref()
        .map(|f| {
            FirelensConfiguration::builder()
                .r#type(FirelensConfigurationType::from(f.router_type.as_str()))
                .set_options((!f.options.is_empty()).then(|| f.options.clone().into_iter().collect()))
                .build()
                .map_err(build_error)
        })
        .transpose()?;

    Ok(SdkContainerDefinition::builder()
        .name(&definition.name)
        .image(&definition.image)
        .set_essential(definition.essential)
        .set_cpu(definition.cpu)
        .set_memory(definition.memory)
        .set_memory_reservation(definition.memory_reservation)
        .set_port_mappings(Some(port_mappings))
        .set_environment(Some(environment))
        .set_secrets(Some(secrets))
        .set_command((!definition.command.is_empty()).then(|| definition.command.clone()))
        .set_entry_point((!definition.entry_point.is_empty()).then(|| definition.entry_point.clone()))
        .set_working_directory(definition.working_directory.clone())
        .set_user(definition.user.clone())
        .set_readonly_root_filesystem(definition.readonly_root_filesystem)
        .set_health_check(health_check)
        .set_depends_on((!depends_on.is_empty()).then_some(depends_on))
        .set_mount_points((!mount_points.is_empty()).then_some(mount_points))
        .set_docker_labels(
            (!definition.docker_labels.is_empty()).then(|| definition.docker_labels.clone().into_iter().collect()),
        )
        .set_ulimits((!ulimits.is_empty()).then_some(ulimits))
        .set_start_timeout(definition.start_timeout)
        .set_stop_timeout(definition.stop_timeout)
        .set_log_configuration(log_configuration)
        .set_firelens_configuration(firelens_configuration)
        .build())
}

fn to_sdk_secrets(secrets: &[TemplateSecret]) -> Result<Vec<Secret>> {
    secrets
        .iter()
        .map(|s| {
            Secret::builder()
                .name(&s.name)
                .value_from(&s.value_from)
                .build()
                .map_err(build_error)
        })
        .collect()
}

fn to_deployment(deployment: &Deployment) -> ServiceDeployment {
    ServiceDeployment {
        id: deployment.id().unwrap_or_default().to_string(),
        status: deployment.status().unwrap_or_default().to_string(),
        rollout_state: deployment.rollout_state().map(|s| s.as_str().to_string()),
        rollout_state_reason: deployment.rollout_state_reason().map(str::to_string),
    }
}

#[async_trait]
impl EcsApi for EcsClient {
    async fn describe_clusters(&self, cluster_names: &[String]) -> Result<Vec<Cluster>> {
        let response = self
            .client
            .describe_clusters()
            .set_clusters(Some(cluster_names.to_vec()))
            .send()
            .await
            .map_err(|e| sdk_error("DescribeClusters", e))?;

        Ok(response
            .clusters()
            .iter()
            .map(|c| Cluster {
                arn: c.cluster_arn().unwrap_or_default().to_string(),
                name: c.cluster_name().unwrap_or_default().to_string(),
            })
            .collect())
    }

    async fn list_clusters(&self, next_token: Option<String>) -> Result<Page<String>> {
        let response = self
            .client
            .list_clusters()
            .set_next_token(next_token)
            .send()
            .await
            .map_err(|e| sdk_error("ListClusters", e))?;

        Ok(Page {
            items: response.cluster_arns().to_vec(),
            next_marker: response.next_token().map(str::to_string),
        })
    }

    async fn list_tags_for_resource(&self, resource_arn: &str) -> Result<Tags> {
        let response = self
            .client
            .list_tags_for_resource()
            .resource_arn(resource_arn)
            .send()
            .await
            .map_err(|e| sdk_error("ListTagsForResource", e))?;

        Ok(response
            .tags()
            .iter()
            .filter_map(|t| Some((t.key()?.to_string(), t.value().unwrap_or_default().to_string())))
            .collect())
    }

    async fn register_task_definition(&self, task_definition: &TaskDefinition) -> Result<String> {
        let containers = task_definition
            .container_definitions
            .iter()
            .map(to_sdk_container)
            .collect::<Result<Vec<_>>>()?;

        let response = self
            .client
            .register_task_definition()
            .family(&task_definition.family)
            .task_role_arn(&task_definition.task_role_arn)
            .execution_role_arn(&task_definition.execution_role_arn)
            .network_mode(NetworkMode::from(task_definition.network_mode.as_str()))
            .set_requires_compatibilities(Some(
                task_definition
                    .requires_compatibilities
                    .iter()
                    .map(|c| Compatibility::from(c.as_str()))
                    .collect(),
            ))
            .cpu(&task_definition.cpu)
            .memory(&task_definition.memory)
            .set_container_definitions(Some(containers))
            .send()
            .await
            .map_err(|e| sdk_error("RegisterTaskDefinition", e))?;

        response
            .task_definition()
            .and_then(|td| td.task_definition_arn())
            .map(str::to_string)
            .ok_or_else(|| missing("RegisterTaskDefinition", "taskDefinitionArn"))
    }

    async fn update_service(
        &self,
        cluster: &str,
        service: &str,
        task_definition_arn: &str,
    ) -> Result<Vec<ServiceDeployment>> {
        let response = self
            .client
            .update_service()
            .cluster(cluster)
            .service(service)
            .task_definition(task_definition_arn)
            .send()
            .await
            .map_err(|e| sdk_error("UpdateService", e))?;

        Ok(response
            .service()
            .map(|s| s.deployments().iter().map(to_deployment).collect())
            .unwrap_or_default())
    }

    async fn list_tasks(&self, cluster: &str, filter: &TaskFilter, next_token: Option<String>) -> Result<Page<String>> {
        let response = self
            .client
            .list_tasks()
            .cluster(cluster)
            .set_family(filter.family.clone())
            .set_started_by(filter.started_by.clone())
            .set_desired_status(filter.desired_status.as_deref().map(DesiredStatus::from))
            .set_next_token(next_token)
            .send()
            .await
            .map_err(|e| sdk_error("ListTasks", e))?;

        Ok(Page {
            items: response.task_arns().to_vec(),
            next_marker: response.next_token().map(str::to_string),
        })
    }

    async fn describe_tasks(&self, cluster: &str, task_arns: &[String]) -> Result<Vec<Task>> {
        let response = self
            .client
            .describe_tasks()
            .cluster(cluster)
            .set_tasks(Some(task_arns.to_vec()))
            .send()
            .await
            .map_err(|e| sdk_error("DescribeTasks", e))?;

        Ok(response
            .tasks()
            .iter()
            .map(|task| Task {
                arn: task.task_arn().unwrap_or_default().to_string(),
                containers: task
                    .containers()
                    .iter()
                    .map(|c| Container {
                        name: c.name().unwrap_or_default().to_string(),
                        managed_agents: c
                            .managed_agents()
                            .iter()
                            .map(|a| ManagedAgent {
                                name: a.name().map(|n| n.as_str().to_string()).unwrap_or_default(),
                                last_status: a.last_status().map(str::to_string),
                            })
                            .collect(),
                    })
                    .collect(),
            })
            .collect())
    }

    async fn describe_services(&self, cluster: &str, service: &str) -> Result<Vec<ServiceDeployment>> {
        let response = self
            .client
            .describe_services()
            .cluster(cluster)
            .services(service)
            .send()
            .await
            .map_err(|e| sdk_error("DescribeServices", e))?;

        let found = response
            .services()
            .first()
            .ok_or_else(|| PlatformError::ecs(format!("Service {} not found in cluster {}", service, cluster)))?;
        Ok(found.deployments().iter().map(to_deployment).collect())
    }
}
