//! ALB listener rule migration between copilot and platform routing
//!
//! Every rule on the environment's HTTPS listener is classified by who owns
//! it. Depending on the environment's `service-deployment-mode` the updater
//! either mirrors each copilot rule as a platform rule pointing at the
//! platform target group, or removes the platform rules so copilot routing
//! takes over again.
//!
//! ## Priority bands
//!
//! Platform rules are grouped by their sorted host-header set. Each group
//! gets its own band of [`PRIORITY_BAND`] priorities starting at
//! [`PLATFORM_RULE_STARTING_PRIORITY`]; inside a band rules are spaced by
//! [`RULE_PRIORITY_INCREMENT`], deepest path first:
//!
//! ```text
//! web.example  /secondary-service/*  10000
//! web.example  /*                    10100
//! api.example  /*                    11000
//! ```
//!
//! ## Rollback
//!
//! Everything that can fail without touching AWS (target group resolution,
//! priority assignment) runs before the first mutation. Mutations are then
//! applied as a saga: each successful create or delete records how to undo
//! it, and the first failure replays those undo steps in reverse.

use crate::config::{PlatformConfig, ServiceDeploymentMode};
use crate::error::{PlatformError, Result};
use crate::providers::load_balancers::{
    ElbApi, HOST_HEADER, ListenerRule, LoadBalancerProvider, RuleAction, RuleDefinition, Tags, TargetGroup,
    tag_is,
};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, error, info, warn};

/// Lowest priority copilot assigns to its rules
pub const COPILOT_RULE_PRIORITY: u32 = 48000;

/// First priority handed to a platform rule
pub const PLATFORM_RULE_STARTING_PRIORITY: u32 = 10000;

/// Gap between consecutive platform rules in one band
pub const RULE_PRIORITY_INCREMENT: u32 = 100;

/// Priorities reserved per host-header group
pub const PRIORITY_BAND: u32 = 1000;

/// `managed-by` tag of rules owned by this updater
pub const MANAGED_BY_PLATFORM: &str = "DBT Platform";

/// `managed-by` tag of target groups created by the service Terraform
pub const MANAGED_BY_SERVICE_TERRAFORM: &str = "DBT Platform - Service Terraform";

/// `name` tag values of rules owned by the maintenance page tooling
pub const MAINTENANCE_RULE_NAMES: [&str; 4] = ["MaintenancePage", "AllowedIps", "BypassIpFilter", "AllowedSourceIps"];

const PRIORITY_IN_USE: &str = "PriorityInUse";

/// Who owns a listener rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleType {
    Platform,
    Maintenance,
    Default,
    Copilot,
    Manual,
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Platform => "platform",
            Self::Maintenance => "maintenance",
            Self::Default => "default",
            Self::Copilot => "copilot",
            Self::Manual => "manual",
        })
    }
}

/// Classify one rule; the checks apply in order and the first match wins
pub fn classify(rule: &ListenerRule) -> RuleType {
    if rule.tags.get("managed-by").map(String::as_str) == Some(MANAGED_BY_PLATFORM) {
        return RuleType::Platform;
    }
    if rule
        .tags
        .get("name")
        .is_some_and(|name| MAINTENANCE_RULE_NAMES.contains(&name.as_str()))
    {
        return RuleType::Maintenance;
    }
    match rule.priority.number() {
        None => RuleType::Default,
        Some(p) if p >= COPILOT_RULE_PRIORITY => RuleType::Copilot,
        Some(_) => RuleType::Manual,
    }
}

/// Listener rules partitioned by [`RuleType`], each list in listener order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassifiedRules {
    pub platform: Vec<ListenerRule>,
    pub maintenance: Vec<ListenerRule>,
    pub default: Vec<ListenerRule>,
    pub copilot: Vec<ListenerRule>,
    pub manual: Vec<ListenerRule>,
}

impl ClassifiedRules {
    pub fn new(rules: Vec<ListenerRule>) -> Self {
        let mut classified = Self::default();
        for rule in rules {
            match classify(&rule) {
                RuleType::Platform => classified.platform.push(rule),
                RuleType::Maintenance => classified.maintenance.push(rule),
                RuleType::Default => classified.default.push(rule),
                RuleType::Copilot => classified.copilot.push(rule),
                RuleType::Manual => classified.manual.push(rule),
            }
        }
        classified
    }
}

/// Path depth of a rule: the most non-empty segments of any path pattern
pub fn path_depth(rule: &ListenerRule) -> usize {
    rule.path_patterns()
        .iter()
        .map(|p| p.split('/').filter(|s| !s.is_empty()).count())
        .max()
        .unwrap_or(0)
}

/// A platform rule to create for one copilot rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedRule {
    /// Copilot rule this one mirrors
    pub copilot_rule_arn: String,
    pub service: String,
    pub depth: usize,
    pub definition: RuleDefinition,
}

/// Rules sharing one host-header set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleGroup {
    pub host_headers: Vec<String>,
    pub rules: Vec<PlannedRule>,
}

/// Group rules by host-header set, keeping first-seen group order
pub fn group_by_host_headers(rules: Vec<PlannedRule>) -> Vec<RuleGroup> {
    let mut groups: Vec<RuleGroup> = Vec::new();
    for rule in rules {
        let hosts = host_headers(&rule.definition);
        match groups.iter_mut().find(|g| g.host_headers == hosts) {
            Some(group) => group.rules.push(rule),
            None => groups.push(RuleGroup {
                host_headers: hosts,
                rules: vec![rule],
            }),
        }
    }
    groups
}

/// Assign band priorities to every group, deepest path first within a group
///
/// Fails with `PriorityBandExceeded` when a group has more rules than fit in
/// one band.
pub fn assign_priorities(groups: Vec<RuleGroup>) -> Result<Vec<PlannedRule>> {
    let capacity = PRIORITY_BAND / RULE_PRIORITY_INCREMENT;
    let mut band_start = PLATFORM_RULE_STARTING_PRIORITY;
    let mut assigned = Vec::new();

    for mut group in groups {
        if group.rules.len() > capacity as usize {
            return Err(PlatformError::PriorityBandExceeded {
                host_headers: group.host_headers,
                rules: group.rules.len(),
                capacity,
            });
        }

        // Stable, so equal depths keep listener order
        group.rules.sort_by(|a, b| b.depth.cmp(&a.depth));

        let mut priority = band_start;
        let mut last = band_start;
        for mut rule in group.rules {
            rule.definition.priority = priority;
            last = priority;
            priority += RULE_PRIORITY_INCREMENT;
            assigned.push(rule);
        }

        band_start = (last / PRIORITY_BAND + 1) * PRIORITY_BAND;
    }

    Ok(assigned)
}

fn host_headers(definition: &RuleDefinition) -> Vec<String> {
    let mut hosts = definition
        .conditions
        .get(HOST_HEADER)
        .cloned()
        .unwrap_or_default();
    hosts.sort();
    hosts.dedup();
    hosts
}

/// Rules created and deleted by one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleChanges {
    pub created: Vec<ListenerRule>,
    pub deleted: Vec<ListenerRule>,
}

impl RuleChanges {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.deleted.is_empty()
    }
}

/// How to undo one applied mutation
#[derive(Debug, Clone)]
enum Compensation {
    /// Undo a create
    Delete { rule_arn: String },
    /// Undo a delete
    Recreate { rule: ListenerRule },
}

/// Applied mutations of one run plus their compensations
struct RuleSaga<'a, E> {
    load_balancer: &'a LoadBalancerProvider<E>,
    listener_arn: &'a str,
    compensations: Vec<Compensation>,
    changes: RuleChanges,
}

impl<'a, E: ElbApi> RuleSaga<'a, E> {
    fn new(load_balancer: &'a LoadBalancerProvider<E>, listener_arn: &'a str) -> Self {
        Self {
            load_balancer,
            listener_arn,
            compensations: Vec::new(),
            changes: RuleChanges::default(),
        }
    }

    async fn create(&mut self, definition: &RuleDefinition) -> Result<ListenerRule> {
        let rule = self
            .load_balancer
            .create_rule(self.listener_arn, definition)
            .await?;
        self.compensations.push(Compensation::Delete {
            rule_arn: rule.arn.clone(),
        });
        self.changes.created.push(rule.clone());
        Ok(rule)
    }

    async fn delete(&mut self, rule: &ListenerRule) -> Result<()> {
        if let Err(e) = self
            .load_balancer
            .delete_listener_rule_by_resource_arn(&rule.arn)
            .await
        {
            error!(rule = %rule.arn, "Failed to delete existing rule {}: {}", rule.arn, e);
            return Err(e);
        }
        debug!(rule = %rule.arn, "Deleted existing rule");
        self.compensations.push(Compensation::Recreate { rule: rule.clone() });
        self.changes.deleted.push(rule.clone());
        Ok(())
    }

    fn is_untouched(&self) -> bool {
        self.compensations.is_empty()
    }

    /// Replay compensations newest first and wrap `cause` with the outcome
    async fn roll_back(self, cause: PlatformError) -> PlatformError {
        error!("Error during rule update: {}", cause);
        warn!("Rolling back");

        let mut rolled_back_by_creation = Vec::new();
        let mut rolled_back_by_deletion = Vec::new();
        let mut failures = Vec::new();

        for compensation in self.compensations.into_iter().rev() {
            match compensation {
                Compensation::Delete { rule_arn } => {
                    debug!(rule = %rule_arn, "Rolling back: deleting created rule");
                    match self
                        .load_balancer
                        .delete_listener_rule_by_resource_arn(&rule_arn)
                        .await
                    {
                        Ok(()) => rolled_back_by_deletion.push(rule_arn),
                        Err(e) => failures.push(format!(
                            "Failed to delete rule {} during rollback: {}",
                            rule_arn, e
                        )),
                    }
                }
                Compensation::Recreate { rule } => {
                    debug!(rule = %rule.arn, "Rolling back: recreating deleted rule");
                    let Some(definition) = rule.to_definition() else {
                        failures.push(format!(
                            "Failed to recreate rule {} during rollback: default rules cannot be created",
                            rule.arn
                        ));
                        continue;
                    };
                    match self.load_balancer.create_rule(self.listener_arn, &definition).await {
                        Ok(recreated) => rolled_back_by_creation.push(recreated.arn),
                        Err(e) => failures.push(format!(
                            "Failed to recreate rule {} during rollback: {}",
                            rule.arn, e
                        )),
                    }
                }
            }
        }

        if failures.is_empty() {
            info!("Rollback completed successfully");
            info!(
                "Rolled back rules by creating: {:?} \n and deleting {:?}",
                rolled_back_by_creation, rolled_back_by_deletion
            );
            PlatformError::RolledBack {
                cause: Box::new(cause),
                rolled_back_by_creation,
                rolled_back_by_deletion,
            }
        } else {
            warn!("Some rollback operations failed. Manual intervention may be required.");
            PlatformError::RollbackFailed {
                cause: Box::new(cause),
                failures,
                rolled_back_by_creation,
                rolled_back_by_deletion,
            }
        }
    }
}

/// Reconciles one environment's listener rules with its deployment mode
pub struct AlbRuleUpdater<E> {
    load_balancer: LoadBalancerProvider<E>,
    config: PlatformConfig,
}

impl<E: ElbApi> AlbRuleUpdater<E> {
    pub fn new(load_balancer: LoadBalancerProvider<E>, config: PlatformConfig) -> Self {
        Self { load_balancer, config }
    }

    /// Bring the listener rules of `environment` in line with its mode
    ///
    /// Nothing is mutated when manual rules are present or when the platform
    /// rules cannot be fully planned. A failure after the first mutation is
    /// rolled back and reported as `RolledBack` or `RollbackFailed`.
    pub async fn update_alb_rules(&self, environment: &str) -> Result<RuleChanges> {
        let application = self.config.application.as_str();
        let mode = self.config.environment(environment)?.service_deployment_mode;
        info!("Deployment Mode: {}", mode);

        let listener_arn = self
            .load_balancer
            .get_https_listener_for_application(application, environment)
            .await?;
        info!("ARN: {}", listener_arn);

        let rules = self
            .load_balancer
            .get_rules_with_tags_by_listener_arn(&listener_arn)
            .await?;
        let classified = ClassifiedRules::new(rules);

        if !classified.manual.is_empty() {
            return Err(PlatformError::ManualRulesPresent {
                rule_arns: classified.manual.iter().map(|r| r.arn.clone()).collect(),
                threshold: COPILOT_RULE_PRIORITY,
            });
        }

        let planned = if mode.routes_platform_traffic() {
            let target_groups = self.load_balancer.get_target_groups_with_tags(&[]).await?;
            let planned = self.plan_platform_rules(environment, &classified.copilot, &target_groups)?;
            assign_priorities(group_by_host_headers(planned))?
        } else {
            Vec::new()
        };

        let mut saga = RuleSaga::new(&self.load_balancer, &listener_arn);
        match self.apply(mode, &planned, &classified, &mut saga).await {
            Ok(()) => {
                report_changes(&saga.changes);
                Ok(saga.changes)
            }
            Err(e) if saga.is_untouched() => Err(e),
            Err(e) => Err(saga.roll_back(e).await),
        }
    }

    /// Mirror each copilot rule onto its service's platform target group
    fn plan_platform_rules(
        &self,
        environment: &str,
        copilot_rules: &[ListenerRule],
        target_groups: &[TargetGroup],
    ) -> Result<Vec<PlannedRule>> {
        let application = self.config.application.as_str();
        let platform_target_groups = platform_target_groups(application, environment, target_groups);
        let copilot_services: HashMap<&str, &str> = target_groups
            .iter()
            .filter_map(|tg| Some((tg.arn.as_str(), tg.tags.get("copilot-service")?.as_str())))
            .collect();

        let mut planned = Vec::new();
        for rule in copilot_rules {
            info!("Building platform rule for corresponding copilot rule: {}", rule.arn);

            let Some(copilot_tg) = rule.forward_target_group() else {
                warn!(rule = %rule.arn, "Copilot rule has no forward action, skipping");
                continue;
            };
            let Some(&service) = copilot_services.get(copilot_tg) else {
                warn!(rule = %rule.arn, target_group = %copilot_tg, "Target group has no 'copilot-service' tag, skipping");
                continue;
            };
            let Some(platform_tg) = platform_target_groups.get(service) else {
                return Err(PlatformError::TargetGroupNotFound {
                    application: application.to_string(),
                    environment: environment.to_string(),
                    service: service.to_string(),
                });
            };
            if !rule.unsupported_conditions.is_empty() {
                return Err(PlatformError::UnsupportedRuleConditions {
                    rule_arn: rule.arn.clone(),
                    fields: rule.unsupported_conditions.clone(),
                });
            }
            info!("Updated forward action for service {} to use: {}", service, platform_tg);

            let tags: Tags = [
                ("application", application),
                ("environment", environment),
                ("service", service),
                ("reason", "service"),
                ("managed-by", MANAGED_BY_PLATFORM),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

            planned.push(PlannedRule {
                copilot_rule_arn: rule.arn.clone(),
                service: service.to_string(),
                depth: path_depth(rule),
                definition: RuleDefinition {
                    priority: 0,
                    conditions: rule.conditions.clone(),
                    http_header_name: rule.http_header_name.clone(),
                    actions: vec![RuleAction::forward(platform_tg.clone())],
                    tags,
                },
            });
        }
        Ok(planned)
    }

    async fn apply(
        &self,
        mode: ServiceDeploymentMode,
        planned: &[PlannedRule],
        classified: &ClassifiedRules,
        saga: &mut RuleSaga<'_, E>,
    ) -> Result<()> {
        if mode.routes_platform_traffic() {
            for rule in planned {
                info!(
                    "Creating platform rule for corresponding copilot rule: {}",
                    rule.copilot_rule_arn
                );
                self.create_replacing(rule, &classified.platform, saga).await?;
            }

            // Platform rules this run did not replace no longer match a copilot rule
            for rule in &classified.platform {
                if !saga.changes.deleted.iter().any(|d| d.arn == rule.arn) {
                    info!("Deleting platform rule: {}", rule.arn);
                    saga.delete(rule).await?;
                }
            }
        }

        if mode.routes_copilot_traffic() {
            for rule in &classified.platform {
                info!("Deleting platform rule: {}", rule.arn);
                saga.delete(rule).await?;
            }
        }

        Ok(())
    }

    /// Create a rule, replacing a platform rule that already holds its priority
    async fn create_replacing(
        &self,
        rule: &PlannedRule,
        existing_platform: &[ListenerRule],
        saga: &mut RuleSaga<'_, E>,
    ) -> Result<ListenerRule> {
        match saga.create(&rule.definition).await {
            Err(e) if e.aws_code() == Some(PRIORITY_IN_USE) => {
                let priority = rule.definition.priority;
                let holder = existing_platform
                    .iter()
                    .find(|r| r.priority.number() == Some(priority))
                    .ok_or(PlatformError::PriorityInUse { priority })?;

                debug!(priority, rule = %holder.arn, "Replacing platform rule holding priority");
                saga.delete(holder).await?;
                saga.create(&rule.definition).await
            }
            other => other,
        }
    }
}

/// Platform target groups of an application/environment keyed by service
fn platform_target_groups(application: &str, environment: &str, target_groups: &[TargetGroup]) -> HashMap<String, String> {
    let mut by_service = HashMap::new();
    for tg in target_groups {
        if !(tag_is(&tg.tags, "application", application)
            && tag_is(&tg.tags, "environment", environment)
            && tag_is(&tg.tags, "managed-by", MANAGED_BY_SERVICE_TERRAFORM))
        {
            continue;
        }
        match tg.tags.get("service").filter(|s| !s.is_empty()) {
            Some(service) => {
                by_service.insert(service.clone(), tg.arn.clone());
            }
            None => warn!("Target group {} has no 'service' tag", tg.name),
        }
    }
    by_service
}

fn report_changes(changes: &RuleChanges) {
    if !changes.created.is_empty() {
        let arns: Vec<&str> = changes.created.iter().map(|r| r.arn.as_str()).collect();
        info!("Created rules: {:?}", arns);
        changes.created.iter().for_each(report_rule);
    }
    if !changes.deleted.is_empty() {
        let arns: Vec<&str> = changes.deleted.iter().map(|r| r.arn.as_str()).collect();
        info!("Deleted rules: {:?}", arns);
        changes.deleted.iter().for_each(report_rule);
    }
}

fn report_rule(rule: &ListenerRule) {
    info!("ARN: {}", rule.arn);
    info!("Priority: {}", rule.priority);
    info!("Hosts: {}", rule.host_headers().join(","));
    info!("Paths: {}", rule.path_patterns().join(","));
}
