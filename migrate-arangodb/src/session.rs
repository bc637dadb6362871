//! Session bootstrap: make sure the target database exists and bind to it

use migrate_client::{ArangoClient, ArangoDatabase};
use migrate_core::DriverResult;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::ClientResultExt;

/// A client plus the database it is bound to
#[derive(Clone)]
pub struct Session {
    client: Arc<dyn ArangoClient>,
    database: Arc<dyn ArangoDatabase>,
}

impl Session {
    /// Ensure `name` exists, creating it if absent, and bind to it.
    ///
    /// Safe to call repeatedly and from concurrent instances: losing the
    /// creation race to another instance is not an error. Any other
    /// creation failure is returned.
    pub async fn bootstrap(client: Arc<dyn ArangoClient>, name: &str) -> DriverResult<Self> {
        let exists = client.database_exists(name).await.or_connection("open")?;

        if exists {
            debug!("Database '{}' already exists", name);
        } else {
            match client.create_database(name).await {
                Ok(()) => info!("Created database '{}' on {}", name, client.endpoint()),
                Err(err) if err.is_duplicate_name() || err.status() == Some(409) => {
                    debug!("Database '{}' was created concurrently", name);
                }
                Err(err) => return Err::<Self, _>(err).or_connection("open"),
            }
        }

        let database = client.database(name).await.or_connection("open")?;
        Ok(Self { client, database })
    }

    pub fn client(&self) -> &Arc<dyn ArangoClient> {
        &self.client
    }

    pub fn database(&self) -> &Arc<dyn ArangoDatabase> {
        &self.database
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use migrate_client::errors::error_num;
    use migrate_client::{ClientResult, InMemoryClient, InMemoryServer};
    use migrate_core::{DriverError, ErrorKind};

    #[tokio::test]
    async fn test_bootstrap_creates_missing_database() {
        let server = InMemoryServer::new();
        let session = Session::bootstrap(Arc::new(server.client()), "testMigration")
            .await
            .unwrap();

        assert_eq!(session.database().name(), "testMigration");
        assert!(server.has_database("testMigration"));
    }

    #[tokio::test]
    async fn test_bootstrap_is_idempotent() {
        let server = InMemoryServer::new();
        let client: Arc<dyn ArangoClient> = Arc::new(server.client());

        Session::bootstrap(client.clone(), "app").await.unwrap();
        // Creation would fail now, but the database is seen to exist first
        server.fail_database_creation(403, error_num::FORBIDDEN, "forbidden");
        let second = Session::bootstrap(client, "app").await.unwrap();
        assert_eq!(second.database().name(), "app");
    }

    /// Reports every database as missing, as if another instance created it
    /// between the existence check and the creation request
    struct RacingClient(InMemoryClient);

    #[async_trait]
    impl ArangoClient for RacingClient {
        fn endpoint(&self) -> &str {
            self.0.endpoint()
        }

        async fn database_exists(&self, _name: &str) -> ClientResult<bool> {
            Ok(false)
        }

        async fn create_database(&self, name: &str) -> ClientResult<()> {
            self.0.create_database(name).await
        }

        async fn database(&self, name: &str) -> ClientResult<Arc<dyn ArangoDatabase>> {
            self.0.database(name).await
        }

        async fn shutdown(&self) -> ClientResult<()> {
            self.0.shutdown().await
        }
    }

    #[tokio::test]
    async fn test_lost_creation_race_is_tolerated() {
        let server = InMemoryServer::new();
        server.create_database("app");

        let client = Arc::new(RacingClient(server.client()));
        let session = Session::bootstrap(client, "app").await.unwrap();
        assert_eq!(session.database().name(), "app");
    }

    #[tokio::test]
    async fn test_creation_failure_is_propagated() {
        let server = InMemoryServer::new();
        server.fail_database_creation(500, 4, "disk full");

        let err = Session::bootstrap(Arc::new(server.client()), "app")
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert!(err.to_string().contains("disk full"));
        assert!(!server.has_database("app"));
    }

    #[tokio::test]
    async fn test_creation_forbidden() {
        let server = InMemoryServer::new();
        server.fail_database_creation(403, error_num::FORBIDDEN, "forbidden");

        let err = Session::bootstrap(Arc::new(server.client()), "app")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DriverError::Connection { operation: "open", .. }));
    }
}
