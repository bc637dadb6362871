use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::driver::{Driver, DriverFactory};
use crate::error::{DriverError, DriverResult};

/// Maps descriptor schemes to driver factories.
///
/// Built once at process start and handed to whatever resolves descriptors.
/// Registration is idempotent per scheme: the first factory wins.
#[derive(Default)]
pub struct DriverRegistry {
    factories: RwLock<HashMap<String, Arc<dyn DriverFactory>>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for `scheme`. Returns `false` if the scheme was already taken.
    pub fn register(&self, scheme: &str, factory: Arc<dyn DriverFactory>) -> bool {
        let scheme = scheme.to_ascii_lowercase();
        let mut factories = self.factories.write();

        if factories.contains_key(&scheme) {
            debug!("Driver for scheme '{}' already registered, skipping", scheme);
            return false;
        }

        info!("Registering migration driver for scheme '{}'", scheme);
        factories.insert(scheme, factory);
        true
    }

    pub fn is_registered(&self, scheme: &str) -> bool {
        self.factories.read().contains_key(&scheme.to_ascii_lowercase())
    }

    pub fn schemes(&self) -> Vec<String> {
        let mut schemes: Vec<String> = self.factories.read().keys().cloned().collect();
        schemes.sort();
        schemes
    }

    /// Resolve the descriptor's scheme and open a driver with its factory
    pub async fn open(&self, dsn: &str) -> DriverResult<Box<dyn Driver>> {
        let scheme = scheme_of(dsn)?;

        // Clone the factory out so the guard is not held across the await
        let factory = self
            .factories
            .read()
            .get(&scheme)
            .cloned()
            .ok_or_else(|| DriverError::UnknownScheme(scheme.clone()))?;

        factory.open(dsn).await
    }
}

fn scheme_of(dsn: &str) -> DriverResult<String> {
    let url = url::Url::parse(dsn).map_err(|e| DriverError::InvalidDescriptor(e.to_string()))?;
    Ok(url.scheme().to_string())
}
