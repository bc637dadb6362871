//! In-process ArangoDB stand-in for tests
//!
//! [`InMemoryServer`] keeps databases, collections and documents in memory
//! and answers with the same status codes and error numbers as a real
//! server. AQL is not evaluated: statements are recorded in an execution
//! log, staged per stream transaction until commit, and can be made to
//! fail with [`InMemoryServer::fail_statements_containing`].

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::connection::{ArangoClient, ArangoDatabase, CollectionInfo, Document, OverwriteMode, QueryOptions};
use crate::errors::{error_num, ClientError, ClientResult};

const SYSTEM_DATABASE: &str = "_system";
const SYSTEM_COLLECTIONS: &[&str] = &["_analyzers", "_graphs"];

#[derive(Debug, Default)]
struct CollectionState {
    is_system: bool,
    documents: BTreeMap<String, Value>,
}

#[derive(Debug, Default)]
struct DatabaseState {
    collections: BTreeMap<String, CollectionState>,
    executed: Vec<String>,
    transactions: HashMap<String, Vec<String>>,
}

impl DatabaseState {
    fn with_system_collections() -> Self {
        let mut state = Self::default();
        for name in SYSTEM_COLLECTIONS {
            state.collections.insert(
                name.to_string(),
                CollectionState {
                    is_system: true,
                    documents: BTreeMap::new(),
                },
            );
        }
        state
    }

    fn collection_mut(&mut self, name: &str) -> ClientResult<&mut CollectionState> {
        self.collections.get_mut(name).ok_or_else(|| collection_not_found(name))
    }
}

#[derive(Debug, Default)]
struct ServerState {
    databases: BTreeMap<String, DatabaseState>,
    failing_statements: Vec<String>,
    database_creation_failure: Option<(u16, i64, String)>,
    revision: u64,
}

impl ServerState {
    fn database_mut(&mut self, name: &str) -> ClientResult<&mut DatabaseState> {
        self.databases.get_mut(name).ok_or_else(|| database_not_found(name))
    }

    fn next_revision(&mut self) -> String {
        self.revision += 1;
        format!("_r{}", self.revision)
    }
}

fn database_not_found(name: &str) -> ClientError {
    ClientError::server(404, error_num::DATABASE_NOT_FOUND, format!("database not found: {}", name))
}

fn collection_not_found(name: &str) -> ClientError {
    ClientError::server(
        404,
        error_num::DATA_SOURCE_NOT_FOUND,
        format!("collection or view not found: {}", name),
    )
}

fn document_not_found(key: &str) -> ClientError {
    ClientError::server(404, error_num::DOCUMENT_NOT_FOUND, format!("document not found: {}", key))
}

fn transaction_not_found(id: &str) -> ClientError {
    ClientError::server(404, error_num::TRANSACTION_NOT_FOUND, format!("transaction '{}' not found", id))
}

fn valid_database_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && !name.starts_with('_')
        && !name.contains(['/', ':'])
        && !name.chars().any(char::is_control)
}

/// Shared in-memory server; clone freely, every clone sees the same data
#[derive(Debug, Clone, Default)]
pub struct InMemoryServer {
    state: Arc<Mutex<ServerState>>,
}

impl InMemoryServer {
    /// A server holding only the `_system` database
    pub fn new() -> Self {
        let server = Self::default();
        server
            .state
            .lock()
            .databases
            .insert(SYSTEM_DATABASE.to_string(), DatabaseState::with_system_collections());
        server
    }

    /// A fresh client connected to this server
    pub fn client(&self) -> InMemoryClient {
        InMemoryClient {
            state: self.state.clone(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn has_database(&self, name: &str) -> bool {
        self.state.lock().databases.contains_key(name)
    }

    /// Create a database directly, bypassing failure injection
    pub fn create_database(&self, name: &str) {
        self.state
            .lock()
            .databases
            .entry(name.to_string())
            .or_insert_with(DatabaseState::with_system_collections);
    }

    /// Remove a database with everything in it
    pub fn drop_database(&self, name: &str) {
        self.state.lock().databases.remove(name);
    }

    /// Create a user collection directly, as a migration would
    pub fn create_collection(&self, database: &str, name: &str) {
        let mut state = self.state.lock();
        if let Some(db) = state.databases.get_mut(database) {
            db.collections.entry(name.to_string()).or_default();
        }
    }

    /// Collection names in `database`, system ones included
    pub fn collection_names(&self, database: &str) -> Vec<String> {
        self.state
            .lock()
            .databases
            .get(database)
            .map(|db| db.collections.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Stored body of a document, system attributes included
    pub fn document(&self, database: &str, collection: &str, key: &str) -> Option<Value> {
        self.state
            .lock()
            .databases
            .get(database)
            .and_then(|db| db.collections.get(collection))
            .and_then(|c| c.documents.get(key))
            .cloned()
    }

    /// Statements that took effect in `database`, in order
    pub fn executed_statements(&self, database: &str) -> Vec<String> {
        self.state
            .lock()
            .databases
            .get(database)
            .map(|db| db.executed.clone())
            .unwrap_or_default()
    }

    /// Number of stream transactions neither committed nor aborted
    pub fn open_transactions(&self, database: &str) -> usize {
        self.state
            .lock()
            .databases
            .get(database)
            .map(|db| db.transactions.len())
            .unwrap_or(0)
    }

    /// Reject every statement containing `fragment` with a parse error
    pub fn fail_statements_containing(&self, fragment: impl Into<String>) {
        self.state.lock().failing_statements.push(fragment.into());
    }

    /// Make database creation fail with the given status and error number
    pub fn fail_database_creation(&self, status: u16, error_num: i64, message: impl Into<String>) {
        self.state.lock().database_creation_failure = Some((status, error_num, message.into()));
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.failing_statements.clear();
        state.database_creation_failure = None;
    }
}

/// Client handle onto an [`InMemoryServer`]
#[derive(Debug, Clone)]
pub struct InMemoryClient {
    state: Arc<Mutex<ServerState>>,
    closed: Arc<AtomicBool>,
}

impl InMemoryClient {
    fn check_open(&self) -> ClientResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(ClientError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ArangoClient for InMemoryClient {
    fn endpoint(&self) -> &str {
        "memory://"
    }

    async fn database_exists(&self, name: &str) -> ClientResult<bool> {
        self.check_open()?;
        Ok(self.state.lock().databases.contains_key(name))
    }

    async fn create_database(&self, name: &str) -> ClientResult<()> {
        self.check_open()?;
        let mut state = self.state.lock();

        if let Some((status, num, message)) = &state.database_creation_failure {
            return Err(ClientError::server(*status, *num, message.clone()));
        }
        if !valid_database_name(name) {
            return Err(ClientError::server(
                400,
                error_num::DATABASE_NAME_INVALID,
                format!("database name invalid: {}", name),
            ));
        }
        if state.databases.contains_key(name) {
            return Err(ClientError::server(409, error_num::DUPLICATE_NAME, "duplicate database name"));
        }

        state
            .databases
            .insert(name.to_string(), DatabaseState::with_system_collections());
        debug!("In-memory server created database '{}'", name);
        Ok(())
    }

    async fn database(&self, name: &str) -> ClientResult<Arc<dyn ArangoDatabase>> {
        self.check_open()?;
        if !self.state.lock().databases.contains_key(name) {
            return Err(database_not_found(name));
        }
        Ok(Arc::new(InMemoryDatabase {
            client: self.clone(),
            name: name.to_string(),
        }))
    }

    async fn shutdown(&self) -> ClientResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// Database handle bound by [`InMemoryClient`]
pub struct InMemoryDatabase {
    client: InMemoryClient,
    name: String,
}

impl InMemoryDatabase {
    /// Run `f` against this database's state under the server lock
    fn with_state<T>(
        &self,
        f: impl FnOnce(&mut ServerState, &str) -> ClientResult<T>,
    ) -> ClientResult<T> {
        self.client.check_open()?;
        let mut state = self.client.state.lock();
        state.database_mut(&self.name)?;
        f(&mut *state, &self.name)
    }
}

#[async_trait]
impl ArangoDatabase for InMemoryDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    async fn collections(&self) -> ClientResult<Vec<CollectionInfo>> {
        self.with_state(|state, db| {
            Ok(state
                .database_mut(db)?
                .collections
                .iter()
                .map(|(name, c)| CollectionInfo {
                    name: name.clone(),
                    is_system: c.is_system,
                })
                .collect())
        })
    }

    async fn create_collection(&self, name: &str) -> ClientResult<()> {
        self.with_state(|state, db| {
            let db = state.database_mut(db)?;
            if db.collections.contains_key(name) {
                return Err(ClientError::server(409, error_num::DUPLICATE_NAME, "duplicate name"));
            }
            db.collections.insert(
                name.to_string(),
                CollectionState {
                    is_system: name.starts_with('_'),
                    documents: BTreeMap::new(),
                },
            );
            Ok(())
        })
    }

    async fn drop_collection(&self, name: &str) -> ClientResult<()> {
        self.with_state(|state, db| {
            let db = state.database_mut(db)?;
            let collection = db.collections.get(name).ok_or_else(|| collection_not_found(name))?;
            if collection.is_system {
                return Err(ClientError::server(403, error_num::FORBIDDEN, "forbidden"));
            }
            db.collections.remove(name);
            Ok(())
        })
    }

    async fn read_document(&self, collection: &str, key: &str) -> ClientResult<Option<Document>> {
        self.with_state(|state, db| {
            let collection = state.database_mut(db)?.collection_mut(collection)?;
            Ok(collection.documents.get(key).map(|body| Document {
                key: key.to_string(),
                rev: body["_rev"].as_str().unwrap_or_default().to_string(),
                body: body.clone(),
            }))
        })
    }

    async fn insert_document(
        &self,
        collection: &str,
        body: &Value,
        overwrite: OverwriteMode,
    ) -> ClientResult<String> {
        let mut stored = match body {
            Value::Object(_) => body.clone(),
            _ => return Err(ClientError::server(400, 1227, "invalid document type")),
        };

        self.with_state(|state, db| {
            let rev = state.next_revision();
            let coll = state.database_mut(db)?.collection_mut(collection)?;

            let key = match stored.get("_key").and_then(Value::as_str) {
                Some(key) => key.to_string(),
                None => uuid::Uuid::new_v4().simple().to_string(),
            };
            if coll.documents.contains_key(&key) && overwrite == OverwriteMode::Conflict {
                return Err(ClientError::server(
                    409,
                    error_num::UNIQUE_CONSTRAINT_VIOLATED,
                    "unique constraint violated - in index primary",
                ));
            }

            stored["_key"] = json!(key);
            stored["_id"] = json!(format!("{}/{}", collection, key));
            stored["_rev"] = json!(rev);
            coll.documents.insert(key, stored);
            Ok(rev)
        })
    }

    async fn replace_document(
        &self,
        collection: &str,
        key: &str,
        body: &Value,
        if_match: &str,
    ) -> ClientResult<String> {
        let mut stored = match body {
            Value::Object(_) => body.clone(),
            _ => return Err(ClientError::server(400, 1227, "invalid document type")),
        };

        self.with_state(|state, db| {
            let rev = state.next_revision();
            let coll = state.database_mut(db)?.collection_mut(collection)?;
            let existing = coll.documents.get(key).ok_or_else(|| document_not_found(key))?;
            if existing["_rev"].as_str() != Some(if_match) {
                return Err(ClientError::server(412, error_num::CONFLICT, "conflict, _rev values do not match"));
            }

            stored["_key"] = json!(key);
            stored["_id"] = json!(format!("{}/{}", collection, key));
            stored["_rev"] = json!(rev);
            coll.documents.insert(key.to_string(), stored);
            Ok(rev)
        })
    }

    async fn remove_document(
        &self,
        collection: &str,
        key: &str,
        if_match: Option<&str>,
    ) -> ClientResult<bool> {
        self.with_state(|state, db| {
            let coll = state.database_mut(db)?.collection_mut(collection)?;
            let Some(existing) = coll.documents.get(key) else {
                return Ok(false);
            };
            if let Some(expected) = if_match {
                if existing["_rev"].as_str() != Some(expected) {
                    return Err(ClientError::server(412, error_num::CONFLICT, "conflict, _rev values do not match"));
                }
            }
            coll.documents.remove(key);
            Ok(true)
        })
    }

    async fn query(&self, aql: &str, options: &QueryOptions) -> ClientResult<Vec<Value>> {
        self.with_state(|state, db| {
            if state.failing_statements.iter().any(|f| aql.contains(f.as_str())) {
                return Err(ClientError::server(
                    400,
                    error_num::QUERY_PARSE,
                    format!("AQL: syntax error near '{}'", aql.trim()),
                ));
            }

            let db = state.database_mut(db)?;
            match &options.transaction_id {
                Some(id) => db
                    .transactions
                    .get_mut(id)
                    .ok_or_else(|| transaction_not_found(id))?
                    .push(aql.to_string()),
                None => db.executed.push(aql.to_string()),
            }
            Ok(Vec::new())
        })
    }

    async fn begin_transaction(&self, write_collections: &[String]) -> ClientResult<String> {
        self.with_state(|state, db| {
            let db = state.database_mut(db)?;
            if let Some(missing) = write_collections.iter().find(|c| !db.collections.contains_key(*c)) {
                return Err(collection_not_found(missing));
            }
            let id = uuid::Uuid::new_v4().to_string();
            db.transactions.insert(id.clone(), Vec::new());
            Ok(id)
        })
    }

    async fn commit_transaction(&self, id: &str) -> ClientResult<()> {
        self.with_state(|state, db| {
            let db = state.database_mut(db)?;
            let mut staged = db.transactions.remove(id).ok_or_else(|| transaction_not_found(id))?;
            db.executed.append(&mut staged);
            Ok(())
        })
    }

    async fn abort_transaction(&self, id: &str) -> ClientResult<()> {
        self.with_state(|state, db| {
            let db = state.database_mut(db)?;
            db.transactions.remove(id).ok_or_else(|| transaction_not_found(id))?;
            Ok(())
        })
    }
}
