//! Record store seam
//!
//! The engine never talks to a database directly. Everything it needs from
//! persistent storage goes through [`RecordStore`]: list the candidates that
//! match a filter, update one record by identifier, and describe the content
//! types the store knows about.

mod filter;
mod memory;

pub use filter::{FilterExpr, Projection};
pub use memory::MemoryRecordStore;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors raised by record store implementations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The lookup could not be executed (bad filter, unknown collection, ...)
    #[error("Query failed: {0}")]
    Query(String),

    /// The record does not exist
    #[error("Record not found: {0}")]
    NotFound(String),

    /// The update was rejected by the store
    #[error("Update failed: {0}")]
    Update(String),

    /// The store could not be reached
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The call did not finish in time
    #[error("Operation timed out after {0}ms")]
    Timeout(u64),
}

/// Identifier of a record inside its collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub u64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for RecordId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// A record selected for possible update: its identifier plus projected fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Record identifier
    pub id: RecordId,
    /// Projected fields, never the full payload
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl Candidate {
    /// Candidate with no projected fields
    pub fn new(id: impl Into<RecordId>) -> Self {
        Self {
            id: id.into(),
            fields: Map::new(),
        }
    }

    /// Attach a projected field
    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Look up a projected field
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

/// Change applied to a single record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Mutation {
    /// Set `updatedAt` to the store's current time, re-triggering lifecycle hooks
    Touch,
    /// Set `field` to `value`
    Set {
        /// Target field
        field: String,
        /// New value
        value: Value,
    },
}

/// Field written by [`Mutation::Touch`]
pub const UPDATED_AT_FIELD: &str = "updatedAt";

/// Record as returned by the store after an update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdatedRecord {
    /// Record identifier
    pub id: RecordId,
    /// Full record after the mutation
    pub record: Value,
}

/// Whether a content type holds many entries or a single one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContentTypeKind {
    /// Many entries
    CollectionType,
    /// Exactly one entry
    SingleType,
}

/// Schema information a store exposes about one content type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentTypeSchema {
    /// Unique identifier, e.g. `api::article.article`
    pub uid: String,
    /// Singular display name
    pub singular_name: Option<String>,
    /// Plural display name
    pub plural_name: Option<String>,
    /// Collection or single type
    pub kind: ContentTypeKind,
}

/// External storage capability consumed by the engine
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// List candidates in `collection` matching `filter`, at most `limit` of them
    async fn find_many(
        &self,
        collection: &str,
        filter: &FilterExpr,
        projection: &Projection,
        limit: Option<usize>,
    ) -> Result<Vec<Candidate>, StoreError>;

    /// Apply `mutation` to the record `id` in `collection`
    async fn update_record(
        &self,
        collection: &str,
        id: RecordId,
        mutation: Mutation,
    ) -> Result<UpdatedRecord, StoreError>;

    /// Every content type the store knows about
    async fn content_types(&self) -> Result<Vec<ContentTypeSchema>, StoreError>;
}
