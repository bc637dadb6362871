//! Migration lock
//!
//! In distributed mode the lock is a document `_key = "lock"` in the lock
//! collection. Inserting it succeeds for exactly one instance; everybody
//! else gets a unique constraint violation and either fails fast or polls.
//! The document carries an expiry so a crashed holder does not block the
//! database forever: once `expires_at` has passed, the next contender
//! removes it (guarded by its revision) and takes over.
//!
//! A live holder never looks stale. While the lock is held a background
//! heartbeat pushes `expires_at` forward every third of the lease, replacing
//! the document only at the revision it last wrote. If that replace finds a
//! different revision or no document, the lease is lost and every further
//! [`LockManager::check_lease`] reports it.

use chrono::{DateTime, Utc};
use migrate_client::{ArangoDatabase, ClientError, OverwriteMode};
use migrate_core::{DriverError, DriverResult};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{LockConfig, LockMode};
use crate::error::ClientResultExt;

/// Document key of the lock
pub const LOCK_KEY: &str = "lock";

/// Body of the lock document
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockDocument {
    owner: String,
    acquired_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl LockDocument {
    fn to_body(&self) -> serde_json::Value {
        serde_json::json!({
            "_key": LOCK_KEY,
            "owner": self.owner,
            "acquired_at": self.acquired_at,
            "expires_at": self.expires_at,
        })
    }
}

/// `from + lease`, or a config error when that is not a representable time
fn lease_expiry(from: DateTime<Utc>, lease: Duration) -> DriverResult<DateTime<Utc>> {
    chrono::Duration::from_std(lease)
        .ok()
        .and_then(|lease| from.checked_add_signed(lease))
        .ok_or_else(|| DriverError::Config(format!("lock lease {:?} is out of range", lease)))
}

/// Aborts a `lock` call that is waiting for another holder
#[derive(Debug, Clone)]
pub struct LockCancelHandle {
    sender: Arc<watch::Sender<u64>>,
}

impl LockCancelHandle {
    /// Wake every waiting acquisition of the owning driver with `LockCancelled`
    pub fn cancel(&self) {
        self.sender.send_modify(|generation| *generation += 1);
    }
}

enum Attempt {
    Acquired(String, LockDocument),
    Held,
}

/// Renews the lease of a held lock document in the background
struct Heartbeat {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
    lost: Arc<AtomicBool>,
}

impl Heartbeat {
    fn start(
        database: Arc<dyn ArangoDatabase>,
        collection: String,
        lease: Duration,
        mut document: LockDocument,
        mut rev: String,
    ) -> Self {
        let (stop, mut stopped) = oneshot::channel::<()>();
        let lost = Arc::new(AtomicBool::new(false));
        let flag = lost.clone();
        let period = (lease / 3).max(Duration::from_millis(1));

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut stopped => break,
                    _ = tokio::time::sleep(period) => {}
                }

                document.expires_at = match lease_expiry(Utc::now(), lease) {
                    Ok(expires_at) => expires_at,
                    Err(err) => {
                        warn!("Cannot renew migration lock lease: {}", err);
                        continue;
                    }
                };
                match database
                    .replace_document(&collection, LOCK_KEY, &document.to_body(), &rev)
                    .await
                {
                    Ok(renewed) => {
                        debug!(
                            "Renewed migration lock on '{}' until {}",
                            database.name(),
                            document.expires_at
                        );
                        rev = renewed;
                    }
                    Err(err) if err.is_conflict() || err.is_not_found() => {
                        warn!(
                            "Lost migration lock on '{}' held by {}: {}",
                            database.name(),
                            document.owner,
                            err
                        );
                        flag.store(true, Ordering::Release);
                        break;
                    }
                    Err(err) => warn!(
                        "Failed to renew migration lock on '{}', retrying: {}",
                        database.name(),
                        err
                    ),
                }
            }
        });

        Self { stop, task, lost }
    }

    fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }

    /// Stop renewing and wait until no renewal is in flight
    async fn stop(self) {
        let _ = self.stop.send(());
        if let Err(err) = self.task.await {
            warn!("Migration lock heartbeat ended abnormally: {}", err);
        }
    }
}

pub struct LockManager {
    database: Arc<dyn ArangoDatabase>,
    config: LockConfig,
    owner: String,
    held: bool,
    collection_ready: bool,
    cancel: Arc<watch::Sender<u64>>,
    heartbeat: Option<Heartbeat>,
}

impl LockManager {
    pub fn new(database: Arc<dyn ArangoDatabase>, config: LockConfig) -> Self {
        if config.mode == LockMode::Disabled {
            warn!(
                "Migration lock is disabled: concurrent runners against '{}' are not excluded, \
                 only use this with a single writer",
                database.name()
            );
        }

        let (cancel, _) = watch::channel(0);
        Self {
            database,
            config,
            owner: Uuid::new_v4().to_string(),
            held: false,
            collection_ready: false,
            cancel: Arc::new(cancel),
            heartbeat: None,
        }
    }

    /// Identity written into the lock document
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    pub fn cancel_handle(&self) -> LockCancelHandle {
        LockCancelHandle {
            sender: self.cancel.clone(),
        }
    }

    /// Fails once the held lock's lease has been lost to another instance
    pub fn check_lease(&self) -> DriverResult<()> {
        match &self.heartbeat {
            Some(heartbeat) if heartbeat.is_lost() => Err(DriverError::lock(
                "lock",
                format!(
                    "lease on '{}' was lost, another runner may hold the lock",
                    self.database.name()
                ),
            )),
            _ => Ok(()),
        }
    }

    /// Take the lock, waiting for the current holder if configured to
    pub async fn acquire(&mut self) -> DriverResult<()> {
        if self.held {
            return Err(DriverError::AlreadyLocked);
        }

        if self.config.mode == LockMode::Disabled {
            self.held = true;
            return Ok(());
        }

        let mut cancelled = self.cancel.subscribe();
        let deadline = Instant::now().checked_add(self.config.timeout).ok_or_else(|| {
            DriverError::Config(format!("lock timeout {:?} is out of range", self.config.timeout))
        })?;

        loop {
            if let Attempt::Acquired(rev, document) = self.try_acquire().await? {
                self.held = true;
                info!(
                    "Acquired migration lock on '{}' (owner {}, rev {}, lease until {})",
                    self.database.name(),
                    self.owner,
                    rev,
                    document.expires_at
                );
                self.heartbeat = Some(Heartbeat::start(
                    self.database.clone(),
                    self.config.collection.clone(),
                    self.config.lease,
                    document,
                    rev,
                ));
                return Ok(());
            }

            if !self.config.wait {
                return Err(DriverError::AlreadyLocked);
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(
                    "Gave up waiting for migration lock on '{}' after {:?}",
                    self.database.name(),
                    self.config.timeout
                );
                return Err(DriverError::LockTimeout(self.config.timeout));
            }

            let pause = self.poll_delay().min(deadline - now);
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                changed = cancelled.changed() => {
                    if changed.is_ok() {
                        info!("Lock acquisition on '{}' cancelled", self.database.name());
                        return Err(DriverError::LockCancelled);
                    }
                }
            }
        }
    }

    /// Give the lock back
    pub async fn release(&mut self) -> DriverResult<()> {
        if !self.held {
            return Err(DriverError::NotLocked);
        }

        if self.config.mode == LockMode::Disabled {
            self.held = false;
            return Ok(());
        }

        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.stop().await;
        }

        let collection = &self.config.collection;
        let document = match self.database.read_document(collection, LOCK_KEY).await {
            Ok(document) => document,
            Err(err) if err.is_collection_not_found() => None,
            Err(err) => return Err(err).or_lock("unlock"),
        };

        let Some(document) = document else {
            warn!(
                "Migration lock on '{}' vanished before release",
                self.database.name()
            );
            self.held = false;
            return Ok(());
        };

        let body = parse_lock(document.body)?;
        if body.owner != self.owner {
            self.held = false;
            return Err(DriverError::lock(
                "unlock",
                format!("lock was taken over by {} after its lease expired", body.owner),
            ));
        }

        match self
            .database
            .remove_document(collection, LOCK_KEY, Some(&document.rev))
            .await
        {
            Ok(_) => {}
            Err(err) if err.is_conflict() => {
                self.held = false;
                return Err(DriverError::lock("unlock", "lock changed while releasing it"));
            }
            Err(err) => return Err(err).or_lock("unlock"),
        }

        self.held = false;
        info!("Released migration lock on '{}'", self.database.name());
        Ok(())
    }

    async fn try_acquire(&mut self) -> DriverResult<Attempt> {
        self.ensure_collection().await?;

        let document = self.new_document()?;
        let inserted = match self.insert(&document).await {
            Err(err) if err.is_collection_not_found() => {
                // Dropped behind our back
                self.collection_ready = false;
                self.ensure_collection().await?;
                self.insert(&document).await
            }
            other => other,
        };
        match inserted {
            Ok(rev) => return Ok(Attempt::Acquired(rev, document)),
            Err(err) if err.is_conflict() => {}
            Err(err) => return Err(err).or_lock("lock"),
        }

        if !self.take_over_stale().await? {
            return Ok(Attempt::Held);
        }

        let document = self.new_document()?;
        match self.insert(&document).await {
            Ok(rev) => Ok(Attempt::Acquired(rev, document)),
            Err(err) if err.is_conflict() => Ok(Attempt::Held),
            Err(err) => Err(err).or_lock("lock"),
        }
    }

    fn new_document(&self) -> DriverResult<LockDocument> {
        let now = Utc::now();
        Ok(LockDocument {
            owner: self.owner.clone(),
            acquired_at: now,
            expires_at: lease_expiry(now, self.config.lease)?,
        })
    }

    async fn insert(&self, document: &LockDocument) -> Result<String, ClientError> {
        self.database
            .insert_document(&self.config.collection, &document.to_body(), OverwriteMode::Conflict)
            .await
    }

    /// Remove the current lock document if its lease ran out.
    /// Returns `true` when the lock is now free to take.
    async fn take_over_stale(&self) -> DriverResult<bool> {
        let collection = &self.config.collection;
        let Some(document) = self
            .database
            .read_document(collection, LOCK_KEY)
            .await
            .or_lock("lock")?
        else {
            // Released between our insert and this read
            return Ok(true);
        };

        let body = parse_lock(document.body)?;
        if body.expires_at > Utc::now() {
            debug!(
                "Migration lock on '{}' held by {} until {}",
                self.database.name(),
                body.owner,
                body.expires_at
            );
            return Ok(false);
        }

        warn!(
            "Taking over stale migration lock on '{}' held by {} since {}",
            self.database.name(),
            body.owner,
            body.acquired_at
        );
        match self
            .database
            .remove_document(collection, LOCK_KEY, Some(&document.rev))
            .await
        {
            Ok(_) => Ok(true),
            Err(err) if err.is_conflict() => Ok(false),
            Err(err) => Err(err).or_lock("lock"),
        }
    }

    async fn ensure_collection(&mut self) -> DriverResult<()> {
        if self.collection_ready {
            return Ok(());
        }

        match self.database.create_collection(&self.config.collection).await {
            Ok(()) => debug!("Created lock collection '{}'", self.config.collection),
            Err(err) if err.is_duplicate_name() => {}
            Err(err) => return Err(err).or_lock("lock"),
        }

        self.collection_ready = true;
        Ok(())
    }

    /// Poll interval with ±25% jitter so waiting instances spread out
    fn poll_delay(&self) -> Duration {
        let base = self.config.poll_interval.as_millis() as u64;
        let jitter_range = base / 4;
        let jitter = fastrand::u64(0..=jitter_range * 2) as i64 - jitter_range as i64;
        Duration::from_millis((base as i64 + jitter).max(1) as u64)
    }
}

fn parse_lock(body: serde_json::Value) -> DriverResult<LockDocument> {
    serde_json::from_value(body)
        .map_err(|e| DriverError::lock("lock", format!("malformed lock document: {}", e)))
}
