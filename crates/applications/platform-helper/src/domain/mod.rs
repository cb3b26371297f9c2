//! The two reconciliation flows: ALB rule migration and ECS service deployment

pub mod internal;
pub mod update_alb_rules;
