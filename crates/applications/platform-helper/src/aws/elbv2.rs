//! ELBv2 client

use super::{missing, sdk_error};
use crate::error::{PlatformError, Result};
use crate::providers::Page;
use crate::providers::load_balancers::{
    Certificate, Conditions, ElbApi, HOST_HEADER, HTTP_HEADER, HealthCheck, Listener, ListenerRule,
    PATH_PATTERN, RuleAction, RuleDefinition, RulePriority, SOURCE_IP, TagDescription, Tags, TargetGroup,
    WeightedTargetGroup,
};
use async_trait::async_trait;
use aws_sdk_elasticloadbalancingv2::Client;
use aws_sdk_elasticloadbalancingv2::types::{
    Action, ActionTypeEnum, FixedResponseActionConfig, ForwardActionConfig, HostHeaderConditionConfig,
    HttpHeaderConditionConfig, PathPatternConditionConfig, Rule, RuleCondition, SourceIpConditionConfig,
    Tag, TargetGroupTuple,
};

pub struct ElbClient {
    client: Client,
}

impl ElbClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn to_listener_rule(rule: &Rule) -> Result<ListenerRule> {
    let arn = rule
        .rule_arn()
        .ok_or_else(|| missing("DescribeRules", "RuleArn"))?;
    let priority = RulePriority::parse(rule.priority().unwrap_or("default"))?;

    let mut conditions = Conditions::new();
    let mut http_header_name = None;
    let mut unsupported_conditions: Vec<String> = Vec::new();
    for condition in rule.conditions() {
        let Some(field) = condition.field() else {
            continue;
        };

        let values = match field {
            HOST_HEADER => condition.host_header_config().map(|c| c.values().to_vec()),
            PATH_PATTERN => condition.path_pattern_config().map(|c| c.values().to_vec()),
            SOURCE_IP => condition.source_ip_config().map(|c| c.values().to_vec()),
            // Only one header condition fits the normalized model
            HTTP_HEADER if http_header_name.is_none() && !conditions.contains_key(HTTP_HEADER) => {
                condition.http_header_config().map(|c| {
                    http_header_name = c.http_header_name().map(str::to_string);
                    c.values().to_vec()
                })
            }
            _ => {
                if !unsupported_conditions.iter().any(|f| f == field) {
                    unsupported_conditions.push(field.to_string());
                }
                continue;
            }
        }
        .unwrap_or_else(|| condition.values().to_vec());

        conditions.entry(field.to_string()).or_default().extend(values);
    }

    let actions = rule.actions().iter().map(to_rule_action).collect();

    Ok(ListenerRule {
        arn: arn.to_string(),
        priority,
        conditions,
        http_header_name,
        unsupported_conditions,
        actions,
        tags: Tags::new(),
    })
}

fn to_rule_action(action: &Action) -> RuleAction {
    let order = action.order();
    match action.r#type() {
        Some(ActionTypeEnum::Forward) => RuleAction::Forward {
            target_group_arn: action.target_group_arn().map(str::to_string),
            weighted: action
                .forward_config()
                .map(|config| {
                    config
                        .target_groups()
                        .iter()
                        .filter_map(|tg| {
                            Some(WeightedTargetGroup {
                                target_group_arn: tg.target_group_arn()?.to_string(),
                                weight: tg.weight(),
                            })
                        })
                        .collect()
                })
                .unwrap_or_default(),
            order,
        },
        Some(ActionTypeEnum::FixedResponse) => {
            let config = action.fixed_response_config();
            RuleAction::FixedResponse {
                status_code: config
                    .and_then(|c| c.status_code())
                    .map(str::to_string)
                    .unwrap_or_default(),
                content_type: config.and_then(|c| c.content_type()).map(str::to_string),
                message_body: config.and_then(|c| c.message_body()).map(str::to_string),
                order,
            }
        }
        other => RuleAction::Other {
            action_type: other.map(|t| t.as_str()).unwrap_or_default().to_string(),
            order,
        },
    }
}

fn to_sdk_condition(field: &str, values: &[String], http_header_name: Option<&str>) -> RuleCondition {
    let values = Some(values.to_vec());
    let condition = RuleCondition::builder().field(field);
    match field {
        HOST_HEADER => condition.host_header_config(HostHeaderConditionConfig::builder().set_values(values).build()),
        PATH_PATTERN => condition.path_pattern_config(PathPatternConditionConfig::builder().set_values(values).build()),
        SOURCE_IP => condition.source_ip_config(SourceIpConditionConfig::builder().set_values(values).build()),
        HTTP_HEADER => condition.http_header_config(
            HttpHeaderConditionConfig::builder()
                .set_http_header_name(http_header_name.map(str::to_string))
                .set_values(values)
                .build(),
        ),
        _ => condition.set_values(values),
    }
    .build()
}

fn to_sdk_action(action: &RuleAction) -> Result<Action> {
    match action {
        RuleAction::Forward {
            target_group_arn,
            weighted,
            order,
        } => {
            let mut builder = Action::builder()
                .r#type(ActionTypeEnum::Forward)
                .set_target_group_arn(target_group_arn.clone())
                .set_order(*order);
            // AWS rejects both a target group ARN and a forward config naming it
            if target_group_arn.is_none() && !weighted.is_empty() {
                let tuples = weighted
                    .iter()
                    .map(|tg| {
                        TargetGroupTuple::builder()
                            .target_group_arn(&tg.target_group_arn)
                            .set_weight(tg.weight)
                            .build()
                    })
                    .collect();
                builder = builder.forward_config(ForwardActionConfig::builder().set_target_groups(Some(tuples)).build());
            }
            Ok(builder.build())
        }
        RuleAction::FixedResponse {
            status_code,
            content_type,
            message_body,
            order,
        } => {
            let config = FixedResponseActionConfig::builder()
                .status_code(status_code)
                .set_content_type(content_type.clone())
                .set_message_body(message_body.clone())
                .build();
            Ok(Action::builder()
                .r#type(ActionTypeEnum::FixedResponse)
                .fixed_response_config(config)
                .set_order(*order)
                .build())
        }
        RuleAction::Other { action_type, .. } => Err(PlatformError::config(format!(
            "Cannot create a rule with a {} action",
            action_type
        ))),
    }
}

fn to_sdk_tags(tags: &Tags) -> Vec<Tag> {
    tags.iter()
        .map(|(key, value)| Tag::builder().key(key).value(value).build())
        .collect()
}

#[async_trait]
impl ElbApi for ElbClient {
    async fn describe_load_balancers(&self, marker: Option<String>) -> Result<Page<String>> {
        let response = self
            .client
            .describe_load_balancers()
            .set_marker(marker)
            .send()
            .await
            .map_err(|e| sdk_error("DescribeLoadBalancers", e))?;

        Ok(Page {
            items: response
                .load_balancers()
                .iter()
                .filter_map(|lb| lb.load_balancer_arn().map(str::to_string))
                .collect(),
            next_marker: response.next_marker().map(str::to_string),
        })
    }

    async fn describe_listeners(&self, load_balancer_arn: &str, marker: Option<String>) -> Result<Page<Listener>> {
        let response = self
            .client
            .describe_listeners()
            .load_balancer_arn(load_balancer_arn)
            .set_marker(marker)
            .send()
            .await
            .map_err(|e| sdk_error("DescribeListeners", e))?;

        Ok(Page {
            items: response
                .listeners()
                .iter()
                .filter_map(|l| {
                    Some(Listener {
                        arn: l.listener_arn()?.to_string(),
                        protocol: l.protocol().map(|p| p.as_str().to_string()),
                    })
                })
                .collect(),
            next_marker: response.next_marker().map(str::to_string),
        })
    }

    async fn describe_rules(&self, listener_arn: &str, marker: Option<String>) -> Result<Page<ListenerRule>> {
        let response = self
            .client
            .describe_rules()
            .listener_arn(listener_arn)
            .set_marker(marker)
            .send()
            .await
            .map_err(|e| sdk_error("DescribeRules", e))?;

        Ok(Page {
            items: response
                .rules()
                .iter()
                .map(to_listener_rule)
                .collect::<Result<_>>()?,
            next_marker: response.next_marker().map(str::to_string),
        })
    }

    async fn describe_target_groups(&self, marker: Option<String>) -> Result<Page<TargetGroup>> {
        let response = self
            .client
            .describe_target_groups()
            .set_marker(marker)
            .send()
            .await
            .map_err(|e| sdk_error("DescribeTargetGroups", e))?;

        Ok(Page {
            items: response
                .target_groups()
                .iter()
                .filter_map(|tg| {
                    Some(TargetGroup {
                        arn: tg.target_group_arn()?.to_string(),
                        name: tg.target_group_name().unwrap_or_default().to_string(),
                        health_check: HealthCheck {
                            protocol: tg.health_check_protocol().map(|p| p.as_str().to_string()),
                            port: tg.health_check_port().map(str::to_string),
                            path: tg.health_check_path().map(str::to_string),
                            interval_seconds: tg.health_check_interval_seconds(),
                            healthy_threshold: tg.healthy_threshold_count(),
                            unhealthy_threshold: tg.unhealthy_threshold_count(),
                        },
                        tags: Tags::new(),
                    })
                })
                .collect(),
            next_marker: response.next_marker().map(str::to_string),
        })
    }

    async fn describe_tags(&self, resource_arns: &[String]) -> Result<Vec<TagDescription>> {
        let response = self
            .client
            .describe_tags()
            .set_resource_arns(Some(resource_arns.to_vec()))
            .send()
            .await
            .map_err(|e| sdk_error("DescribeTags", e))?;

        Ok(response
            .tag_descriptions()
            .iter()
            .filter_map(|description| {
                Some(TagDescription {
                    resource_arn: description.resource_arn()?.to_string(),
                    tags: description
                        .tags()
                        .iter()
                        .filter_map(|t| Some((t.key()?.to_string(), t.value().unwrap_or_default().to_string())))
                        .collect(),
                })
            })
            .collect())
    }

    async fn describe_listener_certificates(
        &self,
        listener_arn: &str,
        marker: Option<String>,
    ) -> Result<Page<Certificate>> {
        let response = self
            .client
            .describe_listener_certificates()
            .listener_arn(listener_arn)
            .set_marker(marker)
            .send()
            .await
            .map_err(|e| sdk_error("DescribeListenerCertificates", e))?;

        Ok(Page {
            items: response
                .certificates()
                .iter()
                .filter_map(|c| {
                    Some(Certificate {
                        arn: c.certificate_arn()?.to_string(),
                        is_default: c.is_default().unwrap_or(false),
                    })
                })
                .collect(),
            next_marker: response.next_marker().map(str::to_string),
        })
    }

    async fn create_rule(&self, listener_arn: &str, rule: &RuleDefinition) -> Result<ListenerRule> {
        let conditions = rule
            .conditions
            .iter()
            .map(|(field, values)| to_sdk_condition(field, values, rule.http_header_name.as_deref()))
            .collect();
        let actions = rule.actions.iter().map(to_sdk_action).collect::<Result<Vec<_>>>()?;

        let response = self
            .client
            .create_rule()
            .listener_arn(listener_arn)
            .priority(rule.priority as i32)
            .set_conditions(Some(conditions))
            .set_actions(Some(actions))
            .set_tags(Some(to_sdk_tags(&rule.tags)))
            .send()
            .await
            .map_err(|e| sdk_error("CreateRule", e))?;

        let created = response
            .rules()
            .first()
            .ok_or_else(|| missing("CreateRule", "Rules"))?;
        let mut created = to_listener_rule(created)?;
        created.tags = rule.tags.clone();
        Ok(created)
    }

    async fn delete_rule(&self, rule_arn: &str) -> Result<()> {
        self.client
            .delete_rule()
            .rule_arn(rule_arn)
            .send()
            .await
            .map_err(|e| sdk_error("DeleteRule", e))?;
        Ok(())
    }
}
