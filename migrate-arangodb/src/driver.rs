//! The ArangoDB migration driver

use async_trait::async_trait;
use migrate_client::{ArangoClient, ClientError, HttpClient};
use migrate_core::{Driver, DriverError, DriverFactory, DriverRegistry, DriverResult, VersionRecord};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, warn};

use crate::config::{DriverConfig, DropScope};
use crate::dsn::ConnectionParams;
use crate::error::ClientResultExt;
use crate::executor::MigrationExecutor;
use crate::lock::{LockCancelHandle, LockManager};
use crate::script::MigrationScript;
use crate::session::Session;
use crate::version::VersionStore;

/// Descriptor scheme this driver registers under
pub const SCHEME: &str = "arangodb";

/// Register the ArangoDB driver. Returns `false` if `arangodb` was already taken.
pub fn register(registry: &DriverRegistry) -> bool {
    registry.register(SCHEME, Arc::new(ArangoDriverFactory::default()))
}

/// Opens [`ArangoDriver`]s from `arangodb://` descriptors
#[derive(Debug, Clone, Default)]
pub struct ArangoDriverFactory {
    /// Base configuration, before environment and descriptor options
    config: DriverConfig,
}

impl ArangoDriverFactory {
    pub fn new(config: DriverConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl DriverFactory for ArangoDriverFactory {
    async fn open(&self, dsn: &str) -> DriverResult<Box<dyn Driver>> {
        let driver = ArangoDriver::open_with_config(dsn, self.config.clone()).await?;
        Ok(Box::new(driver))
    }
}

/// Migration driver bound to one ArangoDB database
pub struct ArangoDriver {
    config: DriverConfig,
    session: Session,
    versions: VersionStore,
    lock: LockManager,
    executor: MigrationExecutor,
    closed: bool,
}

impl ArangoDriver {
    /// Open a driver from a descriptor with the default configuration
    pub async fn open(dsn: &str) -> DriverResult<Self> {
        Self::open_with_config(dsn, DriverConfig::default()).await
    }

    /// Open a driver from a descriptor.
    ///
    /// `config` is overridden by `ARANGO_MIGRATE_*` environment variables and
    /// then by the descriptor's `x-*` options. The database name always comes
    /// from the descriptor.
    pub async fn open_with_config(dsn: &str, mut config: DriverConfig) -> DriverResult<Self> {
        let params = ConnectionParams::parse(dsn)?;

        config.database_name = params.database.clone();
        config.apply_env_overrides()?;
        config.apply_options(
            params
                .driver_options
                .iter()
                .map(|(key, value)| (key.as_str(), value.as_str())),
        )?;

        config.validate()?;

        info!("Opening ArangoDB migration driver for {}", params.redacted());

        let client = HttpClient::new(params.client_config(&config.client)).map_err(|e| match e {
            ClientError::InvalidUrl(message) | ClientError::ConfigError(message) => {
                DriverError::InvalidDescriptor(message)
            }
            other => DriverError::connection("open", other),
        })?;

        Self::with_instance(Arc::new(client), config).await
    }

    /// Bind a driver to an existing client, creating the database if needed
    pub async fn with_instance(client: Arc<dyn ArangoClient>, config: DriverConfig) -> DriverResult<Self> {
        config.validate()?;

        let session = tokio::time::timeout(
            config.connect_timeout,
            Session::bootstrap(client, &config.database_name),
        )
        .await
        .map_err(|_| {
            DriverError::connection(
                "open",
                format!("timed out after {:?}", config.connect_timeout),
            )
        })??;

        let database = session.database().clone();
        let versions = VersionStore::new(database.clone(), &config.migrations_collection);
        let lock = LockManager::new(database.clone(), config.lock.clone());
        let executor = MigrationExecutor::new(database, config.execution.clone(), &config.lock.collection);

        info!(
            "ArangoDB migration driver ready for '{}' on {} (lock: {}, execution: {:?})",
            config.database_name,
            session.client().endpoint(),
            config.lock.mode,
            config.execution.mode
        );

        Ok(Self {
            config,
            session,
            versions,
            lock,
            executor,
            closed: false,
        })
    }

    pub fn database_name(&self) -> &str {
        &self.config.database_name
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_held()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Handle that aborts a `lock` call blocked on another holder
    pub fn cancel_handle(&self) -> LockCancelHandle {
        self.lock.cancel_handle()
    }

    fn check_open(&self) -> DriverResult<()> {
        if self.closed {
            Err(DriverError::Closed)
        } else {
            Ok(())
        }
    }

    /// Collections removed by `drop_all` under the configured scope
    async fn droppable_collections(&self) -> DriverResult<Vec<String>> {
        match self.config.drop_scope {
            DropScope::MigrationState => Ok(vec![self.config.migrations_collection.clone()]),
            DropScope::All => {
                let collections = self.session.database().collections().await.or_state("drop")?;
                Ok(collections
                    .into_iter()
                    .filter(|c| !c.is_system && c.name != self.config.lock.collection)
                    .map(|c| c.name)
                    .collect())
            }
        }
    }
}

#[async_trait]
impl Driver for ArangoDriver {
    async fn close(&mut self) -> DriverResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let released = if self.lock.is_held() {
            let result = self.lock.release().await;
            if let Err(err) = &result {
                warn!("Failed to release migration lock while closing: {}", err);
            }
            result
        } else {
            Ok(())
        };

        let shut_down = self.session.client().shutdown().await.or_connection("close");
        info!("Closed ArangoDB migration driver for '{}'", self.config.database_name);
        released.and(shut_down)
    }

    async fn lock(&mut self) -> DriverResult<()> {
        self.check_open()?;
        self.lock.acquire().await
    }

    async fn unlock(&mut self) -> DriverResult<()> {
        self.check_open()?;
        self.lock.release().await
    }

    async fn run(&mut self, migration: &mut (dyn AsyncRead + Send + Unpin)) -> DriverResult<()> {
        self.check_open()?;
        self.lock.check_lease()?;

        let mut bytes = Vec::new();
        migration.read_to_end(&mut bytes).await?;
        let script = MigrationScript::from_bytes(&bytes)?;
        debug!("Running migration of {} statement(s)", script.len());

        self.executor.execute(&script).await
    }

    async fn set_version(&mut self, version: i64, dirty: bool) -> DriverResult<()> {
        self.check_open()?;
        self.lock.check_lease()?;
        self.versions.write(version, dirty).await
    }

    async fn version(&mut self) -> DriverResult<VersionRecord> {
        self.check_open()?;
        self.versions.read().await
    }

    async fn drop_all(&mut self) -> DriverResult<()> {
        self.check_open()?;
        self.lock.check_lease()?;

        let collections = self.droppable_collections().await?;
        let database = self.session.database().clone();
        for name in &collections {
            match database.drop_collection(name).await {
                Ok(()) => debug!("Dropped collection '{}'", name),
                Err(err) if err.is_collection_not_found() => {}
                Err(err) => return Err(err).or_state("drop"),
            }
        }

        self.versions.reset();
        info!(
            "Dropped {} collection(s) from '{}' ({:?} scope)",
            collections.len(),
            self.config.database_name,
            self.config.drop_scope
        );
        Ok(())
    }
}

impl Drop for ArangoDriver {
    fn drop(&mut self) {
        if !self.closed && self.lock.is_held() {
            warn!(
                "ArangoDB migration driver for '{}' dropped while holding the lock; \
                 it stays held until its lease expires",
                self.config.database_name
            );
        }
    }
}
