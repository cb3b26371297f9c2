//! AWS-facing providers
//!
//! Each provider wraps one API trait and owns the pagination, chunking and
//! normalisation for that service. Real clients live in [`crate::aws`].

pub mod ecs;
pub mod load_balancers;
pub mod logs;
pub mod parameter_store;
pub mod s3;

/// One page of a paginated AWS response
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Marker or `nextToken` for the following page
    pub next_marker: Option<String>,
}

impl<T> Page<T> {
    /// Final page
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_marker: None,
        }
    }
}
