//! The operations a migration runner calls on a driver

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::{DriverResult, VersionRecord};

/// A database driver bound to one logical database.
///
/// The runner calls `lock`, then `set_version(v, true)`, `run`,
/// `set_version(v, false)` for each pending migration, then `unlock`, and
/// finally `close`. A driver is owned by a single runner, so every operation
/// takes `&mut self`.
#[async_trait]
pub trait Driver: Send {
    /// Shut the underlying client down, waiting for in-flight requests
    async fn close(&mut self) -> DriverResult<()>;

    /// Take the database's migration lock
    async fn lock(&mut self) -> DriverResult<()>;

    /// Release the database's migration lock
    async fn unlock(&mut self) -> DriverResult<()>;

    /// Apply the full content of one migration script
    async fn run(&mut self, migration: &mut (dyn AsyncRead + Send + Unpin)) -> DriverResult<()>;

    /// Overwrite the version record
    async fn set_version(&mut self, version: i64, dirty: bool) -> DriverResult<()>;

    /// Read the version record, [`VersionRecord::nil`] if none was ever written
    async fn version(&mut self) -> DriverResult<VersionRecord>;

    /// Remove all migration-relevant state, leaving the version record nil
    async fn drop_all(&mut self) -> DriverResult<()>;
}

/// Opens drivers from connection descriptors of one scheme
#[async_trait]
pub trait DriverFactory: Send + Sync {
    async fn open(&self, dsn: &str) -> DriverResult<Box<dyn Driver>>;
}
