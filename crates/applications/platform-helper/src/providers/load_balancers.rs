//! Application load balancer reads and rule mutations
//!
//! Wraps the ELBv2 listener/rule/target-group APIs behind [`ElbApi`] and
//! layers the things every caller needs on top:
//!
//! - transparent pagination of `describe_*` calls
//! - `describe_tags` batched in chunks of [`DESCRIBE_TAGS_CHUNK_SIZE`] ARNs
//!   (AWS hard limit) and merged back onto each resource by ARN
//! - tag lookups for the load balancer, listener and target groups of an
//!   application/environment
//!
//! Tags and conditions arrive from [`ElbApi`] already normalised into plain
//! maps ([`Tags`], [`Conditions`]); nothing above this module sees the
//! `[{Key, Value}]` shape.

use super::Page;
use crate::error::{PlatformError, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::{debug, warn};

/// `describe_tags` accepts at most 20 resource ARNs per call
pub const DESCRIBE_TAGS_CHUNK_SIZE: usize = 20;

/// Tag set on ALBs provisioned by the platform environment Terraform
pub const MANAGED_BY_PLATFORM_TERRAFORM: &str = "DBT Platform - Terraform";

/// Normalised resource tags (`key -> value`)
pub type Tags = BTreeMap<String, String>;

/// Normalised rule conditions (`field -> values`), e.g. `host-header -> [..]`
pub type Conditions = BTreeMap<String, Vec<String>>;

pub const HOST_HEADER: &str = "host-header";
pub const PATH_PATTERN: &str = "path-pattern";
pub const HTTP_HEADER: &str = "http-header";
pub const SOURCE_IP: &str = "source-ip";

/// Rule priority as reported by ELBv2 (`"1".."50000"` or `"default"`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RulePriority {
    /// The listener's catch-all rule
    Default,
    /// Explicit numeric priority
    Number(u32),
}

impl RulePriority {
    /// Parse the string form returned by `describe_rules`
    pub fn parse(raw: &str) -> Result<Self> {
        if raw == "default" {
            return Ok(Self::Default);
        }
        raw.parse::<u32>()
            .map(Self::Number)
            .map_err(|_| PlatformError::config(format!("Invalid listener rule priority: {}", raw)))
    }

    /// Numeric priority, `None` for the default rule
    pub fn number(&self) -> Option<u32> {
        match self {
            Self::Default => None,
            Self::Number(n) => Some(*n),
        }
    }
}

impl fmt::Display for RulePriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => f.write_str("default"),
            Self::Number(n) => write!(f, "{}", n),
        }
    }
}

/// Target group entry of a weighted forward action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightedTargetGroup {
    pub target_group_arn: String,
    pub weight: Option<i32>,
}

/// Listener rule action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleAction {
    /// Forward to a single target group, or to weighted target groups
    Forward {
        target_group_arn: Option<String>,
        weighted: Vec<WeightedTargetGroup>,
        order: Option<i32>,
    },
    /// Fixed HTTP response
    FixedResponse {
        status_code: String,
        content_type: Option<String>,
        message_body: Option<String>,
        order: Option<i32>,
    },
    /// Action type this helper never creates (redirect, authenticate-*)
    Other { action_type: String, order: Option<i32> },
}

impl RuleAction {
    /// Plain forward action to one target group
    pub fn forward(target_group_arn: impl Into<String>) -> Self {
        Self::Forward {
            target_group_arn: Some(target_group_arn.into()),
            weighted: Vec::new(),
            order: None,
        }
    }

    /// Target group this action forwards to, if it is a forward action
    pub fn forward_target_group(&self) -> Option<&str> {
        match self {
            Self::Forward {
                target_group_arn: Some(arn),
                ..
            } => Some(arn),
            Self::Forward { weighted, .. } => weighted.first().map(|w| w.target_group_arn.as_str()),
            _ => None,
        }
    }
}

/// A listener rule with its tags merged in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerRule {
    pub arn: String,
    pub priority: RulePriority,
    pub conditions: Conditions,
    /// Header name for an `http-header` condition
    pub http_header_name: Option<String>,
    /// Condition fields present on the rule that `conditions` cannot hold
    pub unsupported_conditions: Vec<String>,
    pub actions: Vec<RuleAction>,
    pub tags: Tags,
}

impl ListenerRule {
    /// Sorted, de-duplicated host-header values
    pub fn host_headers(&self) -> Vec<String> {
        let mut hosts = self.conditions.get(HOST_HEADER).cloned().unwrap_or_default();
        hosts.sort();
        hosts.dedup();
        hosts
    }

    /// Path-pattern values in their original order
    pub fn path_patterns(&self) -> &[String] {
        self.conditions
            .get(PATH_PATTERN)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// First target group any forward action points at
    pub fn forward_target_group(&self) -> Option<&str> {
        self.actions.iter().find_map(RuleAction::forward_target_group)
    }

    /// Definition to re-create this rule, `None` for the default rule
    pub fn to_definition(&self) -> Option<RuleDefinition> {
        Some(RuleDefinition {
            priority: self.priority.number()?,
            conditions: self.conditions.clone(),
            http_header_name: self.http_header_name.clone(),
            actions: self.actions.clone(),
            tags: self.tags.clone(),
        })
    }
}

/// Everything `create_rule` needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleDefinition {
    pub priority: u32,
    pub conditions: Conditions,
    pub http_header_name: Option<String>,
    pub actions: Vec<RuleAction>,
    pub tags: Tags,
}

/// Load balancer listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listener {
    pub arn: String,
    pub protocol: Option<String>,
}

/// Target group health check settings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthCheck {
    pub protocol: Option<String>,
    pub port: Option<String>,
    pub path: Option<String>,
    pub interval_seconds: Option<i32>,
    pub healthy_threshold: Option<i32>,
    pub unhealthy_threshold: Option<i32>,
}

/// Target group with its tags merged in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetGroup {
    pub arn: String,
    pub name: String,
    pub health_check: HealthCheck,
    pub tags: Tags,
}

/// Listener certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    pub arn: String,
    pub is_default: bool,
}

/// Tags of one resource as returned by `describe_tags`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagDescription {
    pub resource_arn: String,
    pub tags: Tags,
}

/// Raw ELBv2 operations, one call per method
///
/// Implemented over the AWS SDK in [`crate::aws::elbv2`] and by in-memory
/// fakes in tests.
#[async_trait]
pub trait ElbApi: Send + Sync {
    /// One page of load balancer ARNs
    async fn describe_load_balancers(&self, marker: Option<String>) -> Result<Page<String>>;

    async fn describe_listeners(
        &self,
        load_balancer_arn: &str,
        marker: Option<String>,
    ) -> Result<Page<Listener>>;

    /// One page of rules; `tags` is always empty
    async fn describe_rules(
        &self,
        listener_arn: &str,
        marker: Option<String>,
    ) -> Result<Page<ListenerRule>>;

    /// One page of target groups; `tags` is always empty
    async fn describe_target_groups(&self, marker: Option<String>) -> Result<Page<TargetGroup>>;

    /// Tags for at most [`DESCRIBE_TAGS_CHUNK_SIZE`] resources
    async fn describe_tags(&self, resource_arns: &[String]) -> Result<Vec<TagDescription>>;

    async fn describe_listener_certificates(
        &self,
        listener_arn: &str,
        marker: Option<String>,
    ) -> Result<Page<Certificate>>;

    /// Create a rule and return it as AWS reports it
    async fn create_rule(&self, listener_arn: &str, rule: &RuleDefinition) -> Result<ListenerRule>;

    async fn delete_rule(&self, rule_arn: &str) -> Result<()>;
}

/// Load balancer provider for ALB listener and rule operations
pub struct LoadBalancerProvider<E> {
    client: E,
}

impl<E: ElbApi> LoadBalancerProvider<E> {
    /// Create a new load balancer provider
    pub fn new(client: E) -> Self {
        Self { client }
    }

    #[cfg(test)]
    pub(crate) fn client_ref(&self) -> &E {
        &self.client
    }

    /// All load balancer ARNs in the account/region
    pub async fn get_load_balancers(&self) -> Result<Vec<String>> {
        let mut arns = Vec::new();
        let mut marker = None;
        loop {
            let page = self.client.describe_load_balancers(marker).await?;
            arns.extend(page.items);
            marker = page.next_marker;
            if marker.is_none() {
                return Ok(arns);
            }
        }
    }

    /// Tags for any number of resources, chunked to the `describe_tags` limit
    pub async fn get_tags_for_resources(&self, resource_arns: &[String]) -> Result<HashMap<String, Tags>> {
        let mut tags = HashMap::with_capacity(resource_arns.len());
        for chunk in resource_arns.chunks(DESCRIBE_TAGS_CHUNK_SIZE) {
            for description in self.client.describe_tags(chunk).await? {
                tags.insert(description.resource_arn, description.tags);
            }
        }
        Ok(tags)
    }

    /// ARN of the platform-managed ALB tagged for `app`/`env`
    pub async fn get_load_balancer_for_application(&self, app: &str, env: &str) -> Result<String> {
        let load_balancers = self.get_load_balancers().await?;
        let tags = self.get_tags_for_resources(&load_balancers).await?;

        // Keep describe order so the first matching ALB wins
        for arn in &load_balancers {
            let Some(lb_tags) = tags.get(arn) else {
                continue;
            };
            if tag_is(lb_tags, "copilot-application", app)
                && tag_is(lb_tags, "copilot-environment", env)
                && tag_is(lb_tags, "managed-by", MANAGED_BY_PLATFORM_TERRAFORM)
            {
                debug!(load_balancer = %arn, "Found load balancer for application");
                return Ok(arn.clone());
            }
        }

        Err(PlatformError::LoadBalancerNotFound {
            application: app.to_string(),
            environment: env.to_string(),
        })
    }

    pub async fn get_listeners_for_load_balancer(&self, load_balancer_arn: &str) -> Result<Vec<Listener>> {
        let mut listeners = Vec::new();
        let mut marker = None;
        loop {
            let page = self
                .client
                .describe_listeners(load_balancer_arn, marker)
                .await?;
            listeners.extend(page.items);
            marker = page.next_marker;
            if marker.is_none() {
                return Ok(listeners);
            }
        }
    }

    /// ARN of the HTTPS listener on the application's load balancer
    pub async fn get_https_listener_for_application(&self, app: &str, env: &str) -> Result<String> {
        let load_balancer_arn = self.get_load_balancer_for_application(app, env).await?;
        let listeners = self.get_listeners_for_load_balancer(&load_balancer_arn).await?;

        listeners
            .into_iter()
            .find(|l| l.protocol.as_deref() == Some("HTTPS"))
            .map(|l| l.arn)
            .ok_or_else(|| PlatformError::ListenerNotFound {
                application: app.to_string(),
                environment: env.to_string(),
            })
    }

    /// Default certificate attached to a listener
    pub async fn get_https_certificate_for_listener(&self, listener_arn: &str, env: &str) -> Result<String> {
        let mut marker = None;
        loop {
            let page = self
                .client
                .describe_listener_certificates(listener_arn, marker)
                .await?;
            if let Some(cert) = page.items.into_iter().find(|c| c.is_default) {
                return Ok(cert.arn);
            }
            marker = page.next_marker;
            if marker.is_none() {
                return Err(PlatformError::CertificateNotFound {
                    environment: env.to_string(),
                });
            }
        }
    }

    pub async fn get_https_certificate_for_application(&self, app: &str, env: &str) -> Result<String> {
        let listener_arn = self.get_https_listener_for_application(app, env).await?;
        self.get_https_certificate_for_listener(&listener_arn, env).await
    }

    /// Every rule on a listener, without tags
    pub async fn get_listener_rules_by_listener_arn(&self, listener_arn: &str) -> Result<Vec<ListenerRule>> {
        let mut rules = Vec::new();
        let mut marker = None;
        loop {
            let page = self.client.describe_rules(listener_arn, marker).await?;
            rules.extend(page.items);
            marker = page.next_marker;
            if marker.is_none() {
                return Ok(rules);
            }
        }
    }

    /// Every rule on a listener with its tags merged in
    pub async fn get_rules_with_tags_by_listener_arn(&self, listener_arn: &str) -> Result<Vec<ListenerRule>> {
        let mut rules = self.get_listener_rules_by_listener_arn(listener_arn).await?;
        let arns: Vec<String> = rules.iter().map(|r| r.arn.clone()).collect();
        let mut tags = self.get_tags_for_resources(&arns).await?;

        for rule in &mut rules {
            rule.tags = tags.remove(&rule.arn).unwrap_or_default();
        }
        Ok(rules)
    }

    /// Every target group in the account/region, without tags
    pub async fn get_target_groups(&self) -> Result<Vec<TargetGroup>> {
        let mut groups = Vec::new();
        let mut marker = None;
        loop {
            let page = self.client.describe_target_groups(marker).await?;
            groups.extend(page.items);
            marker = page.next_marker;
            if marker.is_none() {
                return Ok(groups);
            }
        }
    }

    /// Target groups with tags merged in
    ///
    /// An empty `target_group_arns` means every target group.
    pub async fn get_target_groups_with_tags(&self, target_group_arns: &[String]) -> Result<Vec<TargetGroup>> {
        let mut groups = self.get_target_groups().await?;
        if !target_group_arns.is_empty() {
            groups.retain(|tg| target_group_arns.contains(&tg.arn));
        }

        let arns: Vec<String> = groups.iter().map(|tg| tg.arn.clone()).collect();
        let mut tags = self.get_tags_for_resources(&arns).await?;
        for group in &mut groups {
            group.tags = tags.remove(&group.arn).unwrap_or_default();
        }
        Ok(groups)
    }

    /// Copilot-managed target group for a service, if one exists
    pub async fn find_target_group(&self, app: &str, env: &str, svc: &str) -> Result<Option<String>> {
        let found = self
            .get_target_groups_with_tags(&[])
            .await?
            .into_iter()
            .find(|tg| {
                tag_is(&tg.tags, "copilot-application", app)
                    && tag_is(&tg.tags, "copilot-environment", env)
                    && tag_is(&tg.tags, "copilot-service", svc)
            })
            .map(|tg| tg.arn);

        if found.is_none() {
            warn!(
                application = %app,
                environment = %env,
                service = %svc,
                "No target group found"
            );
        }
        Ok(found)
    }

    /// Host-header values of the rule forwarding to `target_group_arn`
    pub async fn get_host_header_conditions(
        &self,
        listener_arn: &str,
        target_group_arn: &str,
    ) -> Result<Vec<String>> {
        let rules = self.get_listener_rules_by_listener_arn(listener_arn).await?;

        rules
            .iter()
            .rev()
            .find(|rule| {
                rule.actions
                    .iter()
                    .any(|a| a.forward_target_group() == Some(target_group_arn))
            })
            .and_then(|rule| rule.conditions.get(HOST_HEADER).cloned())
            .ok_or_else(|| PlatformError::ListenerRuleConditionsNotFound {
                listener_arn: listener_arn.to_string(),
            })
    }

    pub async fn create_rule(&self, listener_arn: &str, rule: &RuleDefinition) -> Result<ListenerRule> {
        debug!(
            listener = %listener_arn,
            priority = rule.priority,
            "Creating listener rule"
        );
        self.client.create_rule(listener_arn, rule).await
    }

    pub async fn delete_listener_rule_by_resource_arn(&self, rule_arn: &str) -> Result<()> {
        debug!(rule = %rule_arn, "Deleting listener rule");
        self.client.delete_rule(rule_arn).await
    }

    /// Delete every rule whose `name` tag equals `tag_name`
    pub async fn delete_listener_rule_by_tags(
        &self,
        tag_descriptions: &[TagDescription],
        tag_name: &str,
    ) -> Result<Vec<String>> {
        let mut deleted = Vec::new();
        for description in tag_descriptions {
            if tag_is(&description.tags, "name", tag_name) && !description.resource_arn.is_empty() {
                self.client.delete_rule(&description.resource_arn).await?;
                deleted.push(description.resource_arn.clone());
            }
        }
        Ok(deleted)
    }
}

/// `tags[key] == value`
pub(crate) fn tag_is(tags: &Tags, key: &str, value: &str) -> bool {
    tags.get(key).map(String::as_str) == Some(value)
}
