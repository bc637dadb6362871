//! Applying migration scripts
//!
//! ArangoDB runs each AQL statement atomically, but a script of several
//! statements is only atomic in [`ExecutionMode::Transactional`], where all
//! of them share one stream transaction. Collection creation and removal
//! cannot happen inside a stream transaction, so scripts doing DDL must use
//! [`ExecutionMode::Sequential`]. The executor never retries.

use migrate_client::{ArangoDatabase, ClientError, QueryOptions};
use migrate_core::{DriverError, DriverResult};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::config::{ExecutionConfig, ExecutionMode};
use crate::error::ClientResultExt;
use crate::script::MigrationScript;

pub struct MigrationExecutor {
    database: Arc<dyn ArangoDatabase>,
    config: ExecutionConfig,
    /// Never declared as a write collection of a migration transaction
    lock_collection: String,
}

impl MigrationExecutor {
    pub fn new(
        database: Arc<dyn ArangoDatabase>,
        config: ExecutionConfig,
        lock_collection: impl Into<String>,
    ) -> Self {
        Self {
            database,
            config,
            lock_collection: lock_collection.into(),
        }
    }

    /// Apply every statement of `script`
    pub async fn execute(&self, script: &MigrationScript) -> DriverResult<()> {
        if script.is_empty() {
            debug!("Migration script has no statements");
            return Ok(());
        }

        match self.config.mode {
            ExecutionMode::Sequential => self.execute_sequential(script).await,
            ExecutionMode::Transactional => self.execute_transactional(script).await,
        }?;

        info!(
            "Applied {} statement(s) to '{}' ({:?})",
            script.len(),
            self.database.name(),
            self.config.mode
        );
        Ok(())
    }

    async fn execute_sequential(&self, script: &MigrationScript) -> DriverResult<()> {
        let options = QueryOptions {
            transaction_id: None,
            max_runtime: self.config.statement_timeout,
        };
        self.run_statements(script, &options).await
    }

    async fn execute_transactional(&self, script: &MigrationScript) -> DriverResult<()> {
        let write_collections = self.write_collections().await?;
        let id = self
            .database
            .begin_transaction(&write_collections)
            .await
            .or_connection("run")?;
        debug!(
            "Began migration transaction {} writing {:?}",
            id, write_collections
        );

        let options = QueryOptions {
            transaction_id: Some(id.clone()),
            max_runtime: self.config.statement_timeout,
        };

        if let Err(err) = self.run_statements(script, &options).await {
            if let Err(abort_err) = self.database.abort_transaction(&id).await {
                error!("Failed to abort migration transaction {}: {}", id, abort_err);
            } else {
                info!("Aborted migration transaction {}", id);
            }
            return Err(err);
        }

        self.database
            .commit_transaction(&id)
            .await
            .map_err(|e| commit_error(e, script.len()))
    }

    async fn run_statements(&self, script: &MigrationScript, options: &QueryOptions) -> DriverResult<()> {
        for (index, statement) in script.statements().iter().enumerate() {
            debug!("Executing statement {}: {}", index + 1, statement);
            self.database
                .query(statement, options)
                .await
                .map_err(|e| statement_error(e, index + 1))?;
        }
        Ok(())
    }

    /// Every user collection except the lock collection
    async fn write_collections(&self) -> DriverResult<Vec<String>> {
        let collections = self.database.collections().await.or_connection("run")?;
        Ok(collections
            .into_iter()
            .filter(|c| !c.is_system && c.name != self.lock_collection)
            .map(|c| c.name)
            .collect())
    }
}

fn statement_error(err: ClientError, statement: usize) -> DriverError {
    match err {
        ClientError::Closed => DriverError::Closed,
        err if err.is_network() => DriverError::connection("run", err),
        err => DriverError::Execution {
            statement,
            message: err.to_string(),
        },
    }
}

fn commit_error(err: ClientError, statements: usize) -> DriverError {
    match err {
        ClientError::Closed => DriverError::Closed,
        err if err.is_network() => DriverError::connection("run", err),
        err => DriverError::Execution {
            statement: statements,
            message: format!("commit failed: {}", err),
        },
    }
}
