use serde::{Deserialize, Serialize};

use crate::Aggregate;

/// Default page size for aggregate listings.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Criteria for listing aggregates known to the event store.
///
/// Results are ordered by aggregate type, then id. `token` is the
/// continuation token returned by the previous page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListAggregatesCriteria {
    /// Filter by aggregate type.
    pub aggregate_type: Option<String>,

    /// Continuation token from a previous page.
    pub token: Option<String>,

    /// Maximum number of aggregates to return.
    pub page_size: usize,
}

impl ListAggregatesCriteria {
    /// Creates criteria matching every aggregate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates criteria for aggregates of one type.
    pub fn for_type(aggregate_type: impl Into<String>) -> Self {
        Self {
            aggregate_type: Some(aggregate_type.into()),
            ..Default::default()
        }
    }

    /// Continues after a previous page.
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Sets the page size. A size of 0 is treated as 1.
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }
}

impl Default for ListAggregatesCriteria {
    fn default() -> Self {
        Self {
            aggregate_type: None,
            token: None,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// One page of an aggregate listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListAggregatesResult {
    /// The aggregates on this page, with their current versions.
    pub aggregates: Vec<Aggregate>,

    /// Token for the next page; `None` on the last page.
    pub next_token: Option<String>,
}
