use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, instrument};

use crate::batch::types::Limit;
use crate::category::Category;
use crate::store::{Candidate, FilterExpr, RecordStore, StoreError};

/// Candidate lookup for a category failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Failed to fetch items for {category}: {source}")]
pub struct SelectionError {
    /// Category whose lookup failed
    pub category: String,
    /// Underlying store failure
    #[source]
    pub source: StoreError,
}

/// Builds category filters and fetches candidates from the store
#[derive(Clone)]
pub struct Selector {
    store: Arc<dyn RecordStore>,
}

impl Selector {
    /// Selector reading from `store`
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Membership filter for `category`, excluding records whose `skip_field` is populated
    pub fn filter_for(category: &Category, skip_field: Option<&str>) -> FilterExpr {
        let membership = category.membership_filter();
        match skip_field {
            Some(field) if !field.is_empty() => membership.and(FilterExpr::is_null(field)),
            _ => membership,
        }
    }

    /// Fetch the ordered candidates of `category`, at most `limit` of them
    #[instrument(skip(self), fields(category = %category))]
    pub async fn select(
        &self,
        category: &Category,
        skip_field: Option<&str>,
        limit: Limit,
    ) -> Result<Vec<Candidate>, SelectionError> {
        let filter = Self::filter_for(category, skip_field);
        let projection = category.projection();
        debug!(filter = ?filter, limit = ?limit.as_option(), "Selecting candidates");

        let candidates = self
            .store
            .find_many(category.collection(), &filter, &projection, limit.as_option())
            .await
            .map_err(|source| SelectionError {
                category: category.to_string(),
                source,
            })?;

        debug!(selected = candidates.len(), "Candidates selected");
        Ok(candidates)
    }
}
