//! Version record storage
//!
//! The record is a single document `_key = "version"` holding
//! `{ "version": i64, "dirty": bool }` in the migrations collection. Writes
//! replace the whole document in one request, so readers never observe a
//! version from one write and a dirty flag from another.

use migrate_client::{ArangoDatabase, ClientError, OverwriteMode};
use migrate_core::{DriverError, DriverResult, VersionRecord, NIL_VERSION};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::ClientResultExt;

/// Document key of the version record
pub const VERSION_KEY: &str = "version";

pub struct VersionStore {
    database: Arc<dyn ArangoDatabase>,
    collection: String,
    collection_ready: bool,
}

impl VersionStore {
    pub fn new(database: Arc<dyn ArangoDatabase>, collection: impl Into<String>) -> Self {
        Self {
            database,
            collection: collection.into(),
            collection_ready: false,
        }
    }

    /// Current record, [`VersionRecord::nil`] if none was ever written
    pub async fn read(&self) -> DriverResult<VersionRecord> {
        let document = match self.database.read_document(&self.collection, VERSION_KEY).await {
            Ok(document) => document,
            Err(err) if err.is_collection_not_found() => return Ok(VersionRecord::nil()),
            Err(err) => return Err(err).or_state("version"),
        };

        let Some(document) = document else {
            return Ok(VersionRecord::nil());
        };

        serde_json::from_value::<VersionRecord>(document.body)
            .map_err(|e| DriverError::state("version", format!("malformed version record: {}", e)))
    }

    /// Overwrite the record. `(-1, false)` removes it.
    pub async fn write(&mut self, version: i64, dirty: bool) -> DriverResult<()> {
        if version < NIL_VERSION {
            return Err(DriverError::state(
                "set_version",
                format!("invalid version {}", version),
            ));
        }

        let record = VersionRecord::new(version, dirty);
        if record == VersionRecord::nil() {
            return self.clear().await;
        }

        let body = json!({
            "_key": VERSION_KEY,
            "version": record.version,
            "dirty": record.dirty,
        });

        self.ensure_collection().await?;
        let written = match self.replace(&body).await {
            Err(err) if err.is_collection_not_found() => {
                // Dropped behind our back; create it again and retry once
                self.collection_ready = false;
                self.ensure_collection().await?;
                self.replace(&body).await
            }
            other => other,
        };
        written.or_state("set_version")?;

        info!("Set migration version to {}", record);
        Ok(())
    }

    /// Forget that the collection was created, e.g. after it was dropped
    pub fn reset(&mut self) {
        self.collection_ready = false;
    }

    async fn replace(&self, body: &serde_json::Value) -> Result<String, ClientError> {
        self.database
            .insert_document(&self.collection, body, OverwriteMode::Replace)
            .await
    }

    async fn clear(&mut self) -> DriverResult<()> {
        match self.database.remove_document(&self.collection, VERSION_KEY, None).await {
            Ok(removed) => {
                if removed {
                    info!("Cleared migration version");
                }
                Ok(())
            }
            Err(err) if err.is_collection_not_found() => {
                self.collection_ready = false;
                Ok(())
            }
            Err(err) => Err(err).or_state("set_version"),
        }
    }

    async fn ensure_collection(&mut self) -> DriverResult<()> {
        if self.collection_ready {
            return Ok(());
        }

        match self.database.create_collection(&self.collection).await {
            Ok(()) => debug!("Created version collection '{}'", self.collection),
            Err(err) if err.is_duplicate_name() => {}
            Err(err) => return Err(err).or_state("set_version"),
        }

        self.collection_ready = true;
        Ok(())
    }
}
