//! Client abstractions

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::ClientResult;

/// A stored document
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub key: String,
    pub rev: String,
    /// Full body, including the `_key`, `_id` and `_rev` system attributes
    pub body: Value,
}

/// Collection listing entry
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CollectionInfo {
    pub name: String,

    #[serde(rename = "isSystem", default)]
    pub is_system: bool,
}

/// What an insert does when the key already exists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverwriteMode {
    /// Fail with a unique constraint violation
    Conflict,
    /// Replace the stored document in one write
    Replace,
}

impl OverwriteMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverwriteMode::Conflict => "conflict",
            OverwriteMode::Replace => "replace",
        }
    }
}

/// Per-query options
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Run inside this stream transaction
    pub transaction_id: Option<String>,

    /// Server-side runtime limit
    pub max_runtime: Option<Duration>,
}

/// Server-level operations
#[async_trait]
pub trait ArangoClient: Send + Sync {
    /// Endpoint this client talks to, for logging
    fn endpoint(&self) -> &str;

    async fn database_exists(&self, name: &str) -> ClientResult<bool>;

    async fn create_database(&self, name: &str) -> ClientResult<()>;

    /// Bind a handle to an existing database
    async fn database(&self, name: &str) -> ClientResult<Arc<dyn ArangoDatabase>>;

    /// Refuse new requests and wait for in-flight ones to finish
    async fn shutdown(&self) -> ClientResult<()>;
}

/// Operations scoped to one database
#[async_trait]
pub trait ArangoDatabase: Send + Sync {
    fn name(&self) -> &str;

    /// All collections, system ones included
    async fn collections(&self) -> ClientResult<Vec<CollectionInfo>>;

    async fn create_collection(&self, name: &str) -> ClientResult<()>;

    async fn drop_collection(&self, name: &str) -> ClientResult<()>;

    /// `Ok(None)` when the document does not exist; a missing collection is an error
    async fn read_document(&self, collection: &str, key: &str) -> ClientResult<Option<Document>>;

    /// Insert `body` (which carries `_key`) and return the new revision
    async fn insert_document(
        &self,
        collection: &str,
        body: &Value,
        overwrite: OverwriteMode,
    ) -> ClientResult<String>;

    /// Replace an existing document, only at revision `if_match`, and return the new revision
    async fn replace_document(
        &self,
        collection: &str,
        key: &str,
        body: &Value,
        if_match: &str,
    ) -> ClientResult<String>;

    /// Remove a document, optionally only at revision `if_match`.
    /// Returns `false` if there was nothing to remove.
    async fn remove_document(
        &self,
        collection: &str,
        key: &str,
        if_match: Option<&str>,
    ) -> ClientResult<bool>;

    /// Run one AQL statement to completion and collect its results
    async fn query(&self, aql: &str, options: &QueryOptions) -> ClientResult<Vec<Value>>;

    /// Begin a stream transaction writing to `write_collections`, returning its id
    async fn begin_transaction(&self, write_collections: &[String]) -> ClientResult<String>;

    async fn commit_transaction(&self, id: &str) -> ClientResult<()>;

    async fn abort_transaction(&self, id: &str) -> ClientResult<()>;
}
