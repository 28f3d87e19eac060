//! Subscriptions: an id plus the filters sent with it.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::filter::Filter;

/// A standing query. Filters are OR'ed together by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub filters: Vec<Filter>,
}

impl Subscription {
    /// Subscribe under a freshly generated UUIDv4 id.
    pub fn new(filters: Vec<Filter>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            filters,
        }
    }

    pub fn with_id(id: impl Into<String>, filters: Vec<Filter>) -> Self {
        Self {
            id: id.into(),
            filters,
        }
    }
}
