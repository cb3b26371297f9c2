//! ECS service deployment with rollout monitoring
//!
//! A deploy registers a new task definition revision from the stored
//! container definitions, points the ECS service at it and then watches the
//! rollout:
//!
//! ```text
//! register ─→ update_service ─→ wait for N RUNNING tasks ─→ wait for log streams
//!                  │                                              │
//!             PRIMARY id                                          ▼
//!                                             tail logs + poll rollout state
//!                                             COMPLETED → Ok
//!                                             FAILED    → DeploymentFailed
//!                                             deadline  → DeploymentTimeout
//! ```

use crate::application::ApplicationLoader;
use crate::config::ServiceConfig;
use crate::error::{PlatformError, Result};
use crate::poll::{PollOutcome, PollSchedule, Step, poll_until};
use crate::providers::ecs::{EcsApi, EcsProvider, RolloutState, TaskFilter, cluster_name, ecs_service_name};
use crate::providers::logs::{LogEvent, LogsApi, LogsProvider};
use crate::providers::parameter_store::ParameterStore;
use crate::providers::s3::{ContainerDefinitionStore, ObjectStore, apply_image_tag};
use chrono::DateTime;
use std::io::Write;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Environment variable consulted when no image tag is passed
pub const IMAGE_TAG_ENV: &str = "IMAGE_TAG";

/// Prefix of every platform service log stream
pub const LOG_STREAM_PREFIX: &str = "platform";

/// Deadline for the new tasks to reach RUNNING
pub const TASK_START_TIMEOUT_SECS: u64 = 600;

/// Deadline for ECS to report a terminal rollout state
pub const ROLLOUT_TIMEOUT_SECS: u64 = 600;

/// Explicit tag first, then the environment; empty values count as absent
pub fn resolve_image_tag(image_tag_override: Option<&str>, from_env: Option<String>) -> Result<String> {
    image_tag_override
        .map(str::to_string)
        .or(from_env)
        .filter(|tag| !tag.is_empty())
        .ok_or(PlatformError::ImageTagMissing)
}

/// CloudWatch log group of a platform service
pub fn service_log_group(app: &str, env: &str, service: &str) -> String {
    format!("/platform/ecs/service/{}/{}/{}", app, env, service)
}

/// Task id from a task ARN (`arn:aws:ecs:..:task/{cluster}/{id}`)
pub fn task_id(task_arn: &str) -> &str {
    task_arn.rsplit('/').next().unwrap_or(task_arn)
}

/// Expected stream names, every container of the first task, then the next task
pub fn expected_log_streams(task_arns: &[String], container_names: &[String]) -> Vec<String> {
    task_arns
        .iter()
        .flat_map(|arn| {
            container_names
                .iter()
                .map(move |container| format!("{}/{}/{}", LOG_STREAM_PREFIX, container, task_id(arn)))
        })
        .collect()
}

/// `[stream] [YYYY-mm-dd HH:MM:SS] message`
pub fn format_log_event(event: &LogEvent) -> String {
    let time = DateTime::from_timestamp_millis(event.timestamp)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| event.timestamp.to_string());
    format!("[{}] [{}] {}", event.log_stream_name, time, event.message.trim_end())
}

/// Drives one service deployment end to end
pub struct DeploymentManager<C, L, O, P> {
    ecs: EcsProvider<C>,
    logs: LogsProvider<L>,
    container_definitions: ContainerDefinitionStore<O>,
    applications: ApplicationLoader<P>,
    base_dir: PathBuf,
    output: Mutex<Box<dyn Write + Send>>,
    task_schedule: PollSchedule,
    rollout_schedule: PollSchedule,
}

impl<C, L, O, P> DeploymentManager<C, L, O, P>
where
    C: EcsApi,
    L: LogsApi,
    O: ObjectStore,
    P: ParameterStore,
{
    pub fn new(
        ecs: EcsProvider<C>,
        logs: LogsProvider<L>,
        container_definitions: ContainerDefinitionStore<O>,
        applications: ApplicationLoader<P>,
    ) -> Self {
        Self {
            ecs,
            logs,
            container_definitions,
            applications,
            base_dir: PathBuf::from("."),
            output: Mutex::new(Box::new(std::io::stdout())),
            task_schedule: PollSchedule::with_timeout(TASK_START_TIMEOUT_SECS),
            rollout_schedule: PollSchedule::with_timeout(ROLLOUT_TIMEOUT_SECS),
        }
    }

    /// Directory holding the generated `terraform/` tree
    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }

    /// Where tailed log events are written (stdout by default)
    pub fn with_output(mut self, output: Box<dyn Write + Send>) -> Self {
        self.output = Mutex::new(output);
        self
    }

    /// Deploy `service` and wait for ECS to finish rolling it out
    pub async fn deploy(
        &self,
        service: &str,
        environment: &str,
        application: &str,
        image_tag_override: Option<&str>,
    ) -> Result<()> {
        let image_tag = resolve_image_tag(image_tag_override, std::env::var(IMAGE_TAG_ENV).ok())?;

        let service_config = ServiceConfig::load(&self.base_dir, environment, service)?;
        let app = self.applications.load(application).await?;
        let account_id = app.environment(environment)?.account_id.clone();

        let mut definitions = self
            .container_definitions
            .get_container_definitions(application, environment, service)
            .await?;
        apply_image_tag(&mut definitions, service, &image_tag)?;

        let task_definition_arn = self
            .ecs
            .register_task_definition(application, environment, &service_config, &account_id, definitions)
            .await?;

        let cluster = cluster_name(application, environment);
        let ecs_service = ecs_service_name(application, environment, &service_config.name);
        let deployment_id = self
            .ecs
            .update_service(&cluster, &ecs_service, &task_definition_arn)
            .await?;
        info!(
            service = %ecs_service,
            deployment = %deployment_id,
            image_tag = %image_tag,
            "Updated ECS service"
        );

        let task_arns = self
            .wait_for_running_tasks(&cluster, &ecs_service, &deployment_id, service_config.count as usize)
            .await?;

        let log_group = service_log_group(application, environment, service);
        let log_streams = if task_arns.is_empty() {
            info!(service = %ecs_service, "Service scaled to zero, no logs to follow");
            Vec::new()
        } else {
            let container_names = self
                .ecs
                .get_container_names_from_ecs_tasks(&cluster, &task_arns)
                .await?;
            let log_streams = expected_log_streams(&task_arns, &container_names);
            self.logs
                .check_log_streams_present(&log_group, &log_streams)
                .await?;
            log_streams
        };

        self.monitor_rollout(&cluster, &ecs_service, &deployment_id, &log_group, &log_streams)
            .await
    }

    /// Poll until `expected` tasks started by the deployment are RUNNING
    async fn wait_for_running_tasks(
        &self,
        cluster: &str,
        ecs_service: &str,
        deployment_id: &str,
        expected: usize,
    ) -> Result<Vec<String>> {
        let ecs = &self.ecs;
        let filter = TaskFilter::running_for_deployment(deployment_id);
        let filter = &filter;
        info!("Waiting for {} RUNNING ECS task(s) for deployment {}", expected, deployment_id);

        let outcome = poll_until(self.task_schedule, 0usize, move |_| async move {
            let arns = ecs.get_ecs_task_arns(cluster, filter).await?;
            debug!(found = arns.len(), expected, "Polled ECS tasks");
            Ok(if arns.len() >= expected {
                Step::Done(arns)
            } else {
                Step::Continue(arns.len())
            })
        })
        .await?;

        match outcome {
            PollOutcome::Done(arns) => Ok(arns),
            PollOutcome::TimedOut { state, elapsed } => Err(PlatformError::TaskStartTimeout {
                service: ecs_service.to_string(),
                cluster: cluster.to_string(),
                expected,
                found: state,
                waited: elapsed,
            }),
        }
    }

    /// Tail the service's logs until the rollout reaches a terminal state
    async fn monitor_rollout(
        &self,
        cluster: &str,
        ecs_service: &str,
        deployment_id: &str,
        log_group: &str,
        log_streams: &[String],
    ) -> Result<()> {
        let ecs = &self.ecs;
        let logs = &self.logs;
        let output = &self.output;

        let outcome = poll_until(self.rollout_schedule, 0i64, move |watermark| async move {
            let events = if log_streams.is_empty() {
                Vec::new()
            } else {
                logs.filter_log_events(log_group, log_streams, watermark).await?
            };
            let next_watermark = events.last().map_or(watermark, |e| e.timestamp + 1);
            if !events.is_empty() {
                let mut out = output.lock().await;
                for event in &events {
                    writeln!(out, "{}", format_log_event(event))?;
                }
                out.flush()?;
            }

            let (state, reason) = ecs
                .get_service_rollout_state(cluster, ecs_service, deployment_id)
                .await?;
            debug!(state = %state, "ECS rollout state");

            match state {
                RolloutState::Completed => Ok(Step::Done(())),
                RolloutState::Failed => Err(PlatformError::DeploymentFailed {
                    service: ecs_service.to_string(),
                    reason: reason.unwrap_or_else(|| "unknown reason".to_string()),
                }),
                RolloutState::InProgress | RolloutState::Other(_) => Ok(Step::Continue(next_watermark)),
            }
        })
        .await?;

        match outcome {
            PollOutcome::Done(()) => {
                info!("ECS deployment of {} completed", ecs_service);
                Ok(())
            }
            PollOutcome::TimedOut { elapsed, .. } => Err(PlatformError::DeploymentTimeout {
                service: ecs_service.to_string(),
                waited: elapsed,
            }),
        }
    }
}
