//! In-memory fakes of the AWS API traits
//!
//! Each fake records every call so tests can assert on exactly what would
//! have been sent to AWS, and supports injecting AWS error codes on the
//! n-th call of an operation.

use crate::error::{PlatformError, Result};
use crate::providers::Page;
use crate::providers::ecs::{
    Cluster, Container, EcsApi, ManagedAgent, ServiceDeployment, Task, TaskDefinition, TaskFilter,
};
use crate::providers::load_balancers::{
    Certificate, Conditions, ElbApi, HOST_HEADER, Listener, ListenerRule, MANAGED_BY_PLATFORM_TERRAFORM,
    PATH_PATTERN, RuleAction, RuleDefinition, RulePriority, TagDescription, Tags, TargetGroup,
    WeightedTargetGroup,
};
use crate::providers::logs::{LogEvent, LogsApi};
use crate::providers::parameter_store::{Parameter, ParameterStore};
use crate::providers::s3::ObjectStore;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io::Write;
use std::sync::{Arc, Mutex};

/// Build a tag map
pub fn tags(pairs: &[(&str, &str)]) -> Tags {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Build a rule from `(host, path)` pairs and tags
pub fn rule(arn: &str, priority: &str, host_paths: &[(&str, &str)], tag_pairs: &[(&str, &str)]) -> ListenerRule {
    let mut conditions = Conditions::new();
    for (host, path) in host_paths {
        let hosts = conditions.entry(HOST_HEADER.to_string()).or_default();
        if !hosts.iter().any(|h| h == host) {
            hosts.push(host.to_string());
        }
        conditions
            .entry(PATH_PATTERN.to_string())
            .or_default()
            .push(path.to_string());
    }

    ListenerRule {
        arn: arn.to_string(),
        priority: RulePriority::parse(priority).unwrap(),
        conditions,
        http_header_name: None,
        unsupported_conditions: Vec::new(),
        actions: Vec::new(),
        tags: tags(tag_pairs),
    }
}

impl ListenerRule {
    /// Forward to `target_group_arn` the way copilot writes its actions
    pub fn with_forward(mut self, target_group_arn: &str) -> Self {
        self.actions = vec![RuleAction::Forward {
            target_group_arn: Some(target_group_arn.to_string()),
            weighted: vec![WeightedTargetGroup {
                target_group_arn: target_group_arn.to_string(),
                weight: Some(1),
            }],
            order: None,
        }];
        self
    }
}

fn aws_error(operation: &str, code: &str) -> PlatformError {
    PlatformError::aws(operation, Some(code.to_string()), format!("{} failed with {}", operation, code))
}

/// Writer whose contents tests can read back
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

// ============================================================================
// ELBv2
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElbCall {
    DescribeLoadBalancers,
    DescribeListeners { load_balancer_arn: String },
    DescribeRules { marker: Option<String> },
    DescribeTargetGroups,
    DescribeTags { arns: Vec<String> },
    DescribeListenerCertificates,
    CreateRule { priority: u32 },
    DeleteRule { arn: String },
}

impl ElbCall {
    pub fn is_mutation(&self) -> bool {
        matches!(self, Self::CreateRule { .. } | Self::DeleteRule { .. })
    }
}

#[derive(Default)]
struct ElbState {
    load_balancers: Vec<String>,
    listeners: Vec<Listener>,
    certificates: Vec<Certificate>,
    rule_pages: Vec<(Vec<ListenerRule>, Option<String>)>,
    target_groups: Vec<TargetGroup>,
    tags: HashMap<String, Tags>,
    created_arns: VecDeque<String>,
    create_failures: HashMap<usize, String>,
    delete_failures: HashMap<usize, String>,
    create_calls: usize,
    delete_calls: usize,
    created: Vec<RuleDefinition>,
    deleted: Vec<String>,
    calls: Vec<ElbCall>,
}

#[derive(Default)]
pub struct FakeElb {
    state: Mutex<ElbState>,
}

impl FakeElb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Platform ALB for `app`/`env` with one HTTPS listener
    pub fn with_alb(app: &str, env: &str, alb_arn: &str, listener_arn: &str) -> Self {
        let elb = Self::new();
        elb.add_load_balancer(
            alb_arn,
            tags(&[
                ("copilot-application", app),
                ("copilot-environment", env),
                ("managed-by", MANAGED_BY_PLATFORM_TERRAFORM),
            ]),
        );
        elb.add_listener(Listener {
            arn: listener_arn.to_string(),
            protocol: Some("HTTPS".to_string()),
        });
        elb
    }

    pub fn add_load_balancer(&self, arn: &str, lb_tags: Tags) {
        let mut state = self.state.lock().unwrap();
        state.load_balancers.push(arn.to_string());
        state.tags.insert(arn.to_string(), lb_tags);
    }

    pub fn add_listener(&self, listener: Listener) {
        self.state.lock().unwrap().listeners.push(listener);
    }

    pub fn add_certificate(&self, certificate: Certificate) {
        self.state.lock().unwrap().certificates.push(certificate);
    }

    pub fn add_target_group(&self, arn: &str, tg_tags: Tags) {
        let mut state = self.state.lock().unwrap();
        state.target_groups.push(TargetGroup {
            arn: arn.to_string(),
            name: format!("{}-name", arn),
            health_check: Default::default(),
            tags: Tags::new(),
        });
        state.tags.insert(arn.to_string(), tg_tags);
    }

    pub fn remove_target_group(&self, arn: &str) {
        self.state.lock().unwrap().target_groups.retain(|tg| tg.arn != arn);
    }

    pub fn set_tags(&self, arn: &str, resource_tags: Tags) {
        self.state
            .lock()
            .unwrap()
            .tags
            .insert(arn.to_string(), resource_tags);
    }

    /// Append a page of rules; rule tags are served through `describe_tags`
    pub fn push_rules_page(&self, rules: Vec<ListenerRule>, next_marker: Option<&str>) {
        let mut state = self.state.lock().unwrap();
        let rules = rules
            .into_iter()
            .map(|mut r| {
                state.tags.insert(r.arn.clone(), std::mem::take(&mut r.tags));
                r
            })
            .collect();
        state.rule_pages.push((rules, next_marker.map(str::to_string)));
    }

    /// Insert a rule at the start of the first page
    pub fn push_front_rule(&self, mut rule: ListenerRule) {
        let mut state = self.state.lock().unwrap();
        state.tags.insert(rule.arn.clone(), std::mem::take(&mut rule.tags));
        if state.rule_pages.is_empty() {
            state.rule_pages.push((Vec::new(), None));
        }
        state.rule_pages[0].0.insert(0, rule);
    }

    /// Every rule across all pages with tags merged back in
    pub fn all_rules(&self) -> Vec<ListenerRule> {
        let state = self.state.lock().unwrap();
        state
            .rule_pages
            .iter()
            .flat_map(|(rules, _)| rules.iter().cloned())
            .map(|mut r| {
                r.tags = state.tags.get(&r.arn).cloned().unwrap_or_default();
                r
            })
            .collect()
    }

    /// ARNs handed out by successful `create_rule` calls, in order
    pub fn queue_created_arns(&self, arns: &[&str]) {
        self.state
            .lock()
            .unwrap()
            .created_arns
            .extend(arns.iter().map(|a| a.to_string()));
    }

    /// Fail the `n`-th (1-based) `create_rule` call with `code`
    pub fn fail_create_call(&self, n: usize, code: &str) {
        self.state
            .lock()
            .unwrap()
            .create_failures
            .insert(n, code.to_string());
    }

    /// Fail the `n`-th (1-based) `delete_rule` call with `code`
    pub fn fail_delete_call(&self, n: usize, code: &str) {
        self.state
            .lock()
            .unwrap()
            .delete_failures
            .insert(n, code.to_string());
    }

    pub fn calls(&self) -> Vec<ElbCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn describe_tags_chunk_sizes(&self) -> Vec<usize> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ElbCall::DescribeTags { arns } => Some(arns.len()),
                _ => None,
            })
            .collect()
    }

    /// Definitions passed to successful `create_rule` calls
    pub fn created_definitions(&self) -> Vec<RuleDefinition> {
        self.state.lock().unwrap().created.clone()
    }

    /// ARNs of successfully deleted rules
    pub fn deleted_rules(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted.clone()
    }
}

#[async_trait]
impl ElbApi for FakeElb {
    async fn describe_load_balancers(&self, _marker: Option<String>) -> Result<Page<String>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(ElbCall::DescribeLoadBalancers);
        Ok(Page::last(state.load_balancers.clone()))
    }

    async fn describe_listeners(&self, load_balancer_arn: &str, _marker: Option<String>) -> Result<Page<Listener>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(ElbCall::DescribeListeners {
            load_balancer_arn: load_balancer_arn.to_string(),
        });
        Ok(Page::last(state.listeners.clone()))
    }

    async fn describe_rules(&self, _listener_arn: &str, marker: Option<String>) -> Result<Page<ListenerRule>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(ElbCall::DescribeRules { marker: marker.clone() });

        let index = match &marker {
            None => 0,
            Some(m) => match state.rule_pages.iter().position(|(_, next)| next.as_ref() == Some(m)) {
                Some(i) => i + 1,
                None => return Ok(Page::last(Vec::new())),
            },
        };
        Ok(match state.rule_pages.get(index) {
            Some((rules, next)) => Page {
                items: rules.clone(),
                next_marker: next.clone(),
            },
            None => Page::last(Vec::new()),
        })
    }

    async fn describe_target_groups(&self, _marker: Option<String>) -> Result<Page<TargetGroup>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(ElbCall::DescribeTargetGroups);
        Ok(Page::last(state.target_groups.clone()))
    }

    async fn describe_tags(&self, resource_arns: &[String]) -> Result<Vec<TagDescription>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(ElbCall::DescribeTags {
            arns: resource_arns.to_vec(),
        });
        Ok(resource_arns
            .iter()
            .map(|arn| TagDescription {
                resource_arn: arn.clone(),
                tags: state.tags.get(arn).cloned().unwrap_or_default(),
            })
            .collect())
    }

    async fn describe_listener_certificates(
        &self,
        _listener_arn: &str,
        _marker: Option<String>,
    ) -> Result<Page<Certificate>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(ElbCall::DescribeListenerCertificates);
        Ok(Page::last(state.certificates.clone()))
    }

    async fn create_rule(&self, _listener_arn: &str, rule: &RuleDefinition) -> Result<ListenerRule> {
        let mut state = self.state.lock().unwrap();
        state.create_calls += 1;
        let n = state.create_calls;
        state.calls.push(ElbCall::CreateRule {
            priority: rule.priority,
        });

        if let Some(code) = state.create_failures.get(&n) {
            return Err(aws_error("CreateRule", code));
        }

        let arn = state
            .created_arns
            .pop_front()
            .unwrap_or_else(|| format!("created-rule-{}", n));
        state.created.push(rule.clone());

        Ok(ListenerRule {
            arn,
            priority: RulePriority::Number(rule.priority),
            conditions: rule.conditions.clone(),
            http_header_name: rule.http_header_name.clone(),
            unsupported_conditions: Vec::new(),
            actions: rule.actions.clone(),
            tags: rule.tags.clone(),
        })
    }

    async fn delete_rule(&self, rule_arn: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.delete_calls += 1;
        let n = state.delete_calls;
        state.calls.push(ElbCall::DeleteRule {
            arn: rule_arn.to_string(),
        });

        if let Some(code) = state.delete_failures.get(&n) {
            return Err(aws_error("DeleteRule", code));
        }
        state.deleted.push(rule_arn.to_string());
        Ok(())
    }
}

// ============================================================================
// ECS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EcsCall {
    DescribeClusters { names: Vec<String> },
    ListClusters,
    ListTagsForResource { arn: String },
    RegisterTaskDefinition { family: String },
    UpdateService {
        cluster: String,
        service: String,
        task_definition_arn: String,
    },
    ListTasks { cluster: String, filter: TaskFilter },
    DescribeTasks { cluster: String, task_arns: Vec<String> },
    DescribeServices { cluster: String, service: String },
}

/// Replays queued values, repeating the last one once the queue runs dry
struct Sticky<T: Clone> {
    queue: VecDeque<T>,
    last: Option<T>,
}

impl<T: Clone> Default for Sticky<T> {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
            last: None,
        }
    }
}

impl<T: Clone> Sticky<T> {
    fn push(&mut self, value: T) {
        self.queue.push_back(value);
    }

    fn next(&mut self) -> Option<T> {
        if let Some(value) = self.queue.pop_front() {
            self.last = Some(value);
        }
        self.last.clone()
    }
}

#[derive(Default)]
struct EcsState {
    clusters: Vec<(Cluster, Tags)>,
    tasks: BTreeMap<String, Task>,
    task_arns: Sticky<Vec<String>>,
    rollout_states: Sticky<(String, Option<String>)>,
    update_deployments: Option<Vec<ServiceDeployment>>,
    describe_services_failure: Option<String>,
    registered: Vec<TaskDefinition>,
    calls: Vec<EcsCall>,
}

#[derive(Default)]
pub struct FakeEcs {
    state: Mutex<EcsState>,
}

const PRIMARY_DEPLOYMENT: &str = "ecs-svc/primary";

impl FakeEcs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_cluster(&self, name: &str, arn: &str, cluster_tags: Tags) {
        self.state.lock().unwrap().clusters.push((
            Cluster {
                arn: arn.to_string(),
                name: name.to_string(),
            },
            cluster_tags,
        ));
    }

    pub fn add_task(&self, arn: &str, containers: &[&str]) {
        let task = Task {
            arn: arn.to_string(),
            containers: containers
                .iter()
                .map(|name| Container {
                    name: name.to_string(),
                    managed_agents: Vec::new(),
                })
                .collect(),
        };
        self.state.lock().unwrap().tasks.insert(arn.to_string(), task);
    }

    pub fn add_task_with_agent(&self, arn: &str, container: &str, status: &str) {
        let task = Task {
            arn: arn.to_string(),
            containers: vec![Container {
                name: container.to_string(),
                managed_agents: vec![ManagedAgent {
                    name: "ExecuteCommandAgent".to_string(),
                    last_status: Some(status.to_string()),
                }],
            }],
        };
        self.state.lock().unwrap().tasks.insert(arn.to_string(), task);
    }

    /// Result of the next `list_tasks` call
    pub fn push_task_arns(&self, arns: Vec<String>) {
        self.state.lock().unwrap().task_arns.push(arns);
    }

    /// Rollout state reported by the next `describe_services` call
    pub fn push_rollout_state(&self, state: &str, reason: Option<&str>) {
        self.state
            .lock()
            .unwrap()
            .rollout_states
            .push((state.to_string(), reason.map(str::to_string)));
    }

    pub fn set_update_deployments(&self, deployments: Vec<ServiceDeployment>) {
        self.state.lock().unwrap().update_deployments = Some(deployments);
    }

    pub fn fail_describe_services(&self, code: &str) {
        self.state.lock().unwrap().describe_services_failure = Some(code.to_string());
    }

    pub fn registered(&self) -> Vec<TaskDefinition> {
        self.state.lock().unwrap().registered.clone()
    }

    pub fn calls(&self) -> Vec<EcsCall> {
        self.state.lock().unwrap().calls.clone()
    }
}

#[async_trait]
impl EcsApi for FakeEcs {
    async fn describe_clusters(&self, cluster_names: &[String]) -> Result<Vec<Cluster>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(EcsCall::DescribeClusters {
            names: cluster_names.to_vec(),
        });
        Ok(state
            .clusters
            .iter()
            .filter(|(c, _)| cluster_names.contains(&c.name))
            .map(|(c, _)| c.clone())
            .collect())
    }

    async fn list_clusters(&self, _next_token: Option<String>) -> Result<Page<String>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(EcsCall::ListClusters);
        Ok(Page::last(state.clusters.iter().map(|(c, _)| c.arn.clone()).collect()))
    }

    async fn list_tags_for_resource(&self, resource_arn: &str) -> Result<Tags> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(EcsCall::ListTagsForResource {
            arn: resource_arn.to_string(),
        });
        Ok(state
            .clusters
            .iter()
            .find(|(c, _)| c.arn == resource_arn)
            .map(|(_, t)| t.clone())
            .unwrap_or_default())
    }

    async fn register_task_definition(&self, task_definition: &TaskDefinition) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(EcsCall::RegisterTaskDefinition {
            family: task_definition.family.clone(),
        });
        state.registered.push(task_definition.clone());
        Ok(format!(
            "arn:aws:ecs:eu-west-2:123456789012:task-definition/{}:{}",
            task_definition.family,
            state.registered.len()
        ))
    }

    async fn update_service(
        &self,
        cluster: &str,
        service: &str,
        task_definition_arn: &str,
    ) -> Result<Vec<ServiceDeployment>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(EcsCall::UpdateService {
            cluster: cluster.to_string(),
            service: service.to_string(),
            task_definition_arn: task_definition_arn.to_string(),
        });
        Ok(state.update_deployments.clone().unwrap_or_else(|| {
            vec![ServiceDeployment {
                id: PRIMARY_DEPLOYMENT.to_string(),
                status: "PRIMARY".to_string(),
                rollout_state: Some("IN_PROGRESS".to_string()),
                rollout_state_reason: None,
            }]
        }))
    }

    async fn list_tasks(&self, cluster: &str, filter: &TaskFilter, _next_token: Option<String>) -> Result<Page<String>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(EcsCall::ListTasks {
            cluster: cluster.to_string(),
            filter: filter.clone(),
        });
        Ok(Page::last(state.task_arns.next().unwrap_or_default()))
    }

    async fn describe_tasks(&self, cluster: &str, task_arns: &[String]) -> Result<Vec<Task>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(EcsCall::DescribeTasks {
            cluster: cluster.to_string(),
            task_arns: task_arns.to_vec(),
        });
        Ok(task_arns
            .iter()
            .filter_map(|arn| state.tasks.get(arn).cloned())
            .collect())
    }

    async fn describe_services(&self, cluster: &str, service: &str) -> Result<Vec<ServiceDeployment>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(EcsCall::DescribeServices {
            cluster: cluster.to_string(),
            service: service.to_string(),
        });
        if let Some(code) = &state.describe_services_failure {
            return Err(aws_error("DescribeServices", code));
        }

        let (rollout_state, reason) = state
            .rollout_states
            .next()
            .unwrap_or_else(|| ("IN_PROGRESS".to_string(), None));
        Ok(vec![ServiceDeployment {
            id: PRIMARY_DEPLOYMENT.to_string(),
            status: "PRIMARY".to_string(),
            rollout_state: Some(rollout_state),
            rollout_state_reason: reason,
        }])
    }
}

// ============================================================================
// CloudWatch Logs
// ============================================================================

#[derive(Default)]
struct LogsState {
    /// Stream name -> describe calls that miss before it becomes visible
    streams: BTreeMap<String, usize>,
    describe_counts: HashMap<String, usize>,
    describe_failures: VecDeque<String>,
    events: Vec<LogEvent>,
    events_page_size: Option<usize>,
    /// Also serve the newest event older than `start_time`
    replay_last: bool,
    describe_calls: Vec<String>,
    filter_start_times: Vec<i64>,
}

#[derive(Default)]
pub struct FakeLogs {
    state: Mutex<LogsState>,
}

impl FakeLogs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_stream_now(&self, name: &str) {
        self.add_stream_after(name, 0);
    }

    /// Stream becomes visible after `misses` describe calls for it
    pub fn add_stream_after(&self, name: &str, misses: usize) {
        self.state.lock().unwrap().streams.insert(name.to_string(), misses);
    }

    /// Fail the next `times` describe calls with `code`
    pub fn fail_describe_with(&self, code: &str, times: usize) {
        let mut state = self.state.lock().unwrap();
        for _ in 0..times {
            state.describe_failures.push_back(code.to_string());
        }
    }

    pub fn add_event(&self, stream: &str, timestamp: i64, message: &str) {
        self.state.lock().unwrap().events.push(LogEvent {
            log_stream_name: stream.to_string(),
            timestamp,
            message: message.to_string(),
        });
    }

    pub fn set_events_page_size(&self, size: usize) {
        self.state.lock().unwrap().events_page_size = Some(size);
    }

    /// Every filter call repeats the last event already delivered
    pub fn replay_last_event(&self) {
        self.state.lock().unwrap().replay_last = true;
    }

    /// Prefix of every `describe_log_streams` call
    pub fn describe_calls(&self) -> Vec<String> {
        self.state.lock().unwrap().describe_calls.clone()
    }

    /// `start_time` of every first-page `filter_log_events` call
    pub fn filter_start_times(&self) -> Vec<i64> {
        self.state.lock().unwrap().filter_start_times.clone()
    }
}

#[async_trait]
impl LogsApi for FakeLogs {
    async fn describe_log_streams(&self, _log_group: &str, prefix: &str, limit: i32) -> Result<Vec<String>> {
        let mut state = self.state.lock().unwrap();
        state.describe_calls.push(prefix.to_string());
        if let Some(code) = state.describe_failures.pop_front() {
            return Err(aws_error("DescribeLogStreams", &code));
        }

        let seen = state.describe_counts.entry(prefix.to_string()).or_insert(0);
        let prior = *seen;
        *seen += 1;

        Ok(state
            .streams
            .iter()
            .filter(|(name, misses)| name.starts_with(prefix) && prior >= **misses)
            .map(|(name, _)| name.clone())
            .take(limit as usize)
            .collect())
    }

    async fn filter_log_events(
        &self,
        _log_group: &str,
        log_streams: &[String],
        start_time: i64,
        next_token: Option<String>,
    ) -> Result<Page<LogEvent>> {
        let mut state = self.state.lock().unwrap();
        if next_token.is_none() {
            state.filter_start_times.push(start_time);
        }

        let in_streams = |e: &&LogEvent| log_streams.contains(&e.log_stream_name);
        let mut matching: Vec<LogEvent> = Vec::new();
        if state.replay_last {
            let replayed = state
                .events
                .iter()
                .filter(in_streams)
                .filter(|e| e.timestamp < start_time)
                .max_by_key(|e| e.timestamp);
            matching.extend(replayed.cloned());
        }
        matching.extend(
            state
                .events
                .iter()
                .filter(in_streams)
                .filter(|e| e.timestamp >= start_time)
                .cloned(),
        );

        let offset: usize = next_token.and_then(|t| t.parse().ok()).unwrap_or(0);
        let end = state
            .events_page_size
            .map_or(matching.len(), |size| (offset + size).min(matching.len()));
        Ok(Page {
            items: matching[offset..end].to_vec(),
            next_marker: (end < matching.len()).then(|| end.to_string()),
        })
    }
}

// ============================================================================
// S3
// ============================================================================

#[derive(Default)]
pub struct FakeObjectStore {
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
}

impl FakeObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, bucket: &str, key: &str, body: &str) {
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()), body.as_bytes().to_vec());
    }
}

#[async_trait]
impl ObjectStore for FakeObjectStore {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| aws_error("GetObject", "NoSuchKey"))
    }
}

// ============================================================================
// SSM
// ============================================================================

#[derive(Default)]
struct SsmState {
    parameters: BTreeMap<String, String>,
    page_size: Option<usize>,
    path_calls: usize,
}

#[derive(Default)]
pub struct FakeParameterStore {
    state: Mutex<SsmState>,
}

impl FakeParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, name: &str, value: &str) {
        self.state
            .lock()
            .unwrap()
            .parameters
            .insert(name.to_string(), value.to_string());
    }

    pub fn set_page_size(&self, size: usize) {
        self.state.lock().unwrap().page_size = Some(size);
    }

    pub fn path_calls(&self) -> usize {
        self.state.lock().unwrap().path_calls
    }
}

#[async_trait]
impl ParameterStore for FakeParameterStore {
    async fn get_parameter(&self, name: &str) -> Result<Parameter> {
        self.state
            .lock()
            .unwrap()
            .parameters
            .get(name)
            .map(|value| Parameter {
                name: name.to_string(),
                value: value.clone(),
            })
            .ok_or_else(|| PlatformError::ParameterNotFound { name: name.to_string() })
    }

    async fn get_parameters_by_path(
        &self,
        path: &str,
        recursive: bool,
        next_token: Option<String>,
    ) -> Result<Page<Parameter>> {
        let mut state = self.state.lock().unwrap();
        state.path_calls += 1;

        let prefix = format!("{}/", path.trim_end_matches('/'));
        let matching: Vec<Parameter> = state
            .parameters
            .iter()
            .filter(|(name, _)| {
                name.strip_prefix(&prefix)
                    .is_some_and(|rest| !rest.is_empty() && (recursive || !rest.contains('/')))
            })
            .map(|(name, value)| Parameter {
                name: name.clone(),
                value: value.clone(),
            })
            .collect();

        let offset: usize = next_token.and_then(|t| t.parse().ok()).unwrap_or(0);
        let end = state
            .page_size
            .map_or(matching.len(), |size| (offset + size).min(matching.len()));
        Ok(Page {
            items: matching[offset..end].to_vec(),
            next_marker: (end < matching.len()).then(|| end.to_string()),
        })
    }
}
