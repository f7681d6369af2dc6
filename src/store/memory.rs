use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use dashmap::{DashMap, DashSet};
use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::{
    Candidate, ContentTypeSchema, FilterExpr, Mutation, Projection, RecordId, RecordStore,
    StoreError, UpdatedRecord, UPDATED_AT_FIELD,
};

/// In-memory record store
///
/// Records live per collection in id order. Failures and latency can be
/// injected, and call counts are exposed so callers can assert when the store
/// was (or was not) touched.
#[derive(Clone, Default)]
pub struct MemoryRecordStore {
    collections: Arc<DashMap<String, BTreeMap<RecordId, Value>>>,
    content_types: Arc<RwLock<Vec<ContentTypeSchema>>>,
    failing_queries: Arc<DashSet<String>>,
    failing_filters: Arc<RwLock<Vec<(String, FilterExpr)>>>,
    failing_updates: Arc<DashSet<(String, RecordId)>>,
    failing_schema: Arc<AtomicBool>,
    update_latency: Arc<RwLock<Option<Duration>>>,
    query_calls: Arc<AtomicUsize>,
    update_calls: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
}

impl MemoryRecordStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record; `id` is written into the record body
    pub fn insert(&self, collection: &str, id: impl Into<RecordId>, record: Value) {
        let id = id.into();
        let mut body = match record {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        body.insert("id".to_string(), json!(id.0));

        self.collections
            .entry(collection.to_string())
            .or_default()
            .insert(id, Value::Object(body));
    }

    /// Register a content type schema and make sure its collection exists
    pub fn add_content_type(&self, schema: ContentTypeSchema) {
        self.collections.entry(schema.uid.clone()).or_default();
        self.content_types.write().push(schema);
    }

    /// Current body of a record
    pub fn get(&self, collection: &str, id: impl Into<RecordId>) -> Option<Value> {
        let id = id.into();
        self.collections
            .get(collection)
            .and_then(|records| records.get(&id).cloned())
    }

    /// Number of records in a collection
    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .get(collection)
            .map(|records| records.len())
            .unwrap_or(0)
    }

    /// Whether a collection is empty or unknown
    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    /// Make every `find_many` on `collection` fail
    pub fn fail_queries_for(&self, collection: &str) {
        self.failing_queries.insert(collection.to_string());
    }

    /// Make `find_many` on `collection` fail when its filter is, or contains, `filter`
    pub fn fail_queries_matching(&self, collection: &str, filter: FilterExpr) {
        self.failing_filters
            .write()
            .push((collection.to_string(), filter));
    }

    fn query_rejected(&self, collection: &str, filter: &FilterExpr) -> bool {
        if self.failing_queries.contains(collection) {
            return true;
        }
        self.failing_filters.read().iter().any(|(c, f)| {
            c == collection
                && (f == filter || matches!(filter, FilterExpr::And(parts) if parts.contains(f)))
        })
    }

    /// Make updates of `id` in `collection` fail
    pub fn fail_updates_for(&self, collection: &str, id: impl Into<RecordId>) {
        self.failing_updates.insert((collection.to_string(), id.into()));
    }

    /// Make `content_types` fail
    pub fn fail_content_types(&self) {
        self.failing_schema.store(true, Ordering::SeqCst);
    }

    /// Delay every update by `latency`
    pub fn set_update_latency(&self, latency: Duration) {
        *self.update_latency.write() = Some(latency);
    }

    /// Number of `find_many` calls so far
    pub fn query_count(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    /// Number of `update_record` calls so far
    pub fn update_count(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    /// Highest number of updates observed in flight at once
    pub fn peak_concurrent_updates(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn apply(&self, collection: &str, id: RecordId, mutation: Mutation) -> Result<Value, StoreError> {
        let mut records = self
            .collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::NotFound(format!("collection {}", collection)))?;
        let record = records
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("{} in {}", id, collection)))?;

        let Value::Object(body) = record else {
            return Err(StoreError::Update(format!("record {} is not an object", id)));
        };
        match mutation {
            Mutation::Touch => {
                let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
                body.insert(UPDATED_AT_FIELD.to_string(), json!(now));
            }
            Mutation::Set { field, value } => {
                body.insert(field, value);
            }
        }
        Ok(record.clone())
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn find_many(
        &self,
        collection: &str,
        filter: &FilterExpr,
        projection: &Projection,
        limit: Option<usize>,
    ) -> Result<Vec<Candidate>, StoreError> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);

        if self.query_rejected(collection, filter) {
            return Err(StoreError::Query(format!(
                "lookup on {} rejected",
                collection
            )));
        }

        let Some(records) = self.collections.get(collection) else {
            return Err(StoreError::Query(format!("unknown collection {}", collection)));
        };

        let candidates: Vec<Candidate> = records
            .iter()
            .filter(|(_, record)| filter.matches(record))
            .take(limit.unwrap_or(usize::MAX))
            .map(|(id, record)| {
                projection.fields.iter().fold(Candidate::new(*id), |candidate, field| {
                    let value = record.get(field).cloned().unwrap_or(Value::Null);
                    candidate.with_field(field.clone(), value)
                })
            })
            .collect();

        debug!(
            collection = %collection,
            matched = candidates.len(),
            limit = ?limit,
            "find_many"
        );
        Ok(candidates)
    }

    async fn update_record(
        &self,
        collection: &str,
        id: RecordId,
        mutation: Mutation,
    ) -> Result<UpdatedRecord, StoreError> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        let latency = *self.update_latency.read();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if self.failing_updates.contains(&(collection.to_string(), id)) {
            return Err(StoreError::Update(format!("record {} rejected the update", id)));
        }

        let record = self.apply(collection, id, mutation)?;
        Ok(UpdatedRecord { id, record })
    }

    async fn content_types(&self) -> Result<Vec<ContentTypeSchema>, StoreError> {
        if self.failing_schema.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("content type registry".to_string()));
        }
        Ok(self.content_types.read().clone())
    }
}
