//! Driver configuration
//!
//! Values are layered: [`DriverConfig::default`], then environment variables
//! prefixed with `ARANGO_MIGRATE_`, then `x-*` options from the connection
//! descriptor. Every setting has the same name in both places, e.g.
//! `ARANGO_MIGRATE_LOCK_TIMEOUT` and `x-lock-timeout`.

use migrate_core::{DriverError, DriverResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::dsn::DRIVER_OPTION_PREFIX;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "ARANGO_MIGRATE";

/// Upper bound for every configured duration
pub const MAX_DURATION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Setting names understood by [`DriverConfig::set`]
pub const SETTINGS: &[&str] = &[
    "migrations-collection",
    "lock-collection",
    "lock-mode",
    "lock-wait",
    "lock-timeout",
    "lock-poll-interval-ms",
    "lock-lease",
    "statement-timeout",
    "connect-timeout",
    "exec-mode",
    "drop-scope",
    "request-timeout",
    "conn-limit",
    "verify-ssl",
    "shutdown-timeout",
];

/// Serde helper module for Duration serialization as seconds
pub mod serde_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let seconds = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(seconds))
    }
}

/// Serde helper module for optional Duration serialization as seconds
pub mod serde_duration_option {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let seconds: Option<u64> = Option::deserialize(deserializer)?;
        Ok(seconds.map(Duration::from_secs))
    }
}

/// Serde helper module for Duration serialization as milliseconds
pub mod serde_duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// How the migration lock is enforced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockMode {
    /// Lock document in the target database, exclusive across processes
    #[default]
    Distributed,
    /// In-process bookkeeping only; safe for a single writer
    Disabled,
}

/// How a migration script's statements are applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// One request per statement; earlier statements stay applied on failure
    #[default]
    Sequential,
    /// All statements in one stream transaction, aborted on failure
    Transactional,
}

/// What `drop_all` removes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DropScope {
    /// Every non-system collection except the lock collection
    #[default]
    All,
    /// Only the version collection
    #[serde(rename = "state")]
    MigrationState,
}

macro_rules! impl_setting_enum {
    ($ty:ty { $($name:literal => $variant:expr),+ $(,)? }) => {
        impl FromStr for $ty {
            type Err = DriverError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_ascii_lowercase().as_str() {
                    $($name => Ok($variant),)+
                    other => Err(DriverError::Config(format!(
                        "unknown {} '{}'",
                        stringify!($ty),
                        other
                    ))),
                }
            }
        }
    };
}

impl_setting_enum!(LockMode { "distributed" => LockMode::Distributed, "disabled" => LockMode::Disabled });
impl_setting_enum!(ExecutionMode {
    "sequential" => ExecutionMode::Sequential,
    "transactional" => ExecutionMode::Transactional,
});
impl_setting_enum!(DropScope { "all" => DropScope::All, "state" => DropScope::MigrationState });

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockMode::Distributed => write!(f, "distributed"),
            LockMode::Disabled => write!(f, "disabled"),
        }
    }
}

/// Lock manager settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub mode: LockMode,

    /// Collection holding the lock document
    pub collection: String,

    /// Block until the lock is free instead of failing fast
    pub wait: bool,

    /// Longest time a blocking `lock` waits
    #[serde(with = "serde_duration")]
    pub timeout: Duration,

    /// Pause between acquisition attempts
    #[serde(with = "serde_duration_millis")]
    pub poll_interval: Duration,

    /// How long a lock document outlives its last renewal before it counts as abandoned
    #[serde(with = "serde_duration")]
    pub lease: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            mode: LockMode::Distributed,
            collection: "schema_migrations_lock".to_string(),
            wait: true,
            timeout: Duration::from_secs(15),
            poll_interval: Duration::from_millis(100),
            lease: Duration::from_secs(600),
        }
    }
}

/// Migration executor settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub mode: ExecutionMode,

    /// Server-side runtime limit per statement
    #[serde(with = "serde_duration_option")]
    pub statement_timeout: Option<Duration>,
}

/// HTTP client settings; endpoint and credentials come from the descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// Timeout of a single request
    #[serde(with = "serde_duration")]
    pub request_timeout: Duration,

    /// Maximum number of concurrent requests
    pub conn_limit: u32,

    /// Whether to verify TLS certificates
    pub verify_ssl: bool,

    /// How long `close` waits for in-flight requests
    #[serde(with = "serde_duration")]
    pub shutdown_timeout: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            conn_limit: 32,
            verify_ssl: true,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// ArangoDB driver configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Target database
    pub database_name: String,

    /// Collection holding the version record
    pub migrations_collection: String,

    /// Deadline for connecting and bootstrapping the database
    #[serde(with = "serde_duration")]
    pub connect_timeout: Duration,

    pub lock: LockConfig,

    pub execution: ExecutionConfig,

    pub drop_scope: DropScope,

    pub client: ClientSettings,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            database_name: String::new(),
            migrations_collection: "schema_migrations".to_string(),
            connect_timeout: Duration::from_secs(30),
            lock: LockConfig::default(),
            execution: ExecutionConfig::default(),
            drop_scope: DropScope::All,
            client: ClientSettings::default(),
        }
    }
}

impl DriverConfig {
    pub fn new(database_name: impl Into<String>) -> Self {
        Self {
            database_name: database_name.into(),
            ..Default::default()
        }
    }

    /// Apply one named setting, e.g. `("lock-timeout", "30")`
    pub fn set(&mut self, name: &str, value: &str) -> DriverResult<()> {
        match name {
            "migrations-collection" => self.migrations_collection = value.to_string(),
            "lock-collection" => self.lock.collection = value.to_string(),
            "lock-mode" => self.lock.mode = value.parse()?,
            "lock-wait" => self.lock.wait = parse_bool(name, value)?,
            "lock-timeout" => self.lock.timeout = parse_seconds(name, value)?,
            "lock-poll-interval-ms" => {
                self.lock.poll_interval = Duration::from_millis(parse_u64(name, value)?)
            }
            "lock-lease" => self.lock.lease = parse_seconds(name, value)?,
            "statement-timeout" => {
                let timeout = parse_seconds(name, value)?;
                self.execution.statement_timeout = (!timeout.is_zero()).then_some(timeout);
            }
            "connect-timeout" => self.connect_timeout = parse_seconds(name, value)?,
            "exec-mode" => self.execution.mode = value.parse()?,
            "drop-scope" => self.drop_scope = value.parse()?,
            "request-timeout" => self.client.request_timeout = parse_seconds(name, value)?,
            "conn-limit" => {
                self.client.conn_limit = value
                    .trim()
                    .parse()
                    .map_err(|e| DriverError::Config(format!("invalid {} '{}': {}", name, value, e)))?
            }
            "verify-ssl" => self.client.verify_ssl = parse_bool(name, value)?,
            "shutdown-timeout" => self.client.shutdown_timeout = parse_seconds(name, value)?,
            other => return Err(DriverError::Config(format!("unknown setting '{}'", other))),
        }
        Ok(())
    }

    /// Apply `ARANGO_MIGRATE_*` environment overrides
    pub fn apply_env_overrides(&mut self) -> DriverResult<()> {
        for name in SETTINGS {
            if let Ok(value) = std::env::var(env_var_name(name)) {
                self.set(name, &value)?;
            }
        }
        Ok(())
    }

    /// Apply `x-*` descriptor options. Unknown `x-*` keys are an error.
    pub fn apply_options<'a, I>(&mut self, options: I) -> DriverResult<()>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        for (key, value) in options {
            let name = key.strip_prefix(DRIVER_OPTION_PREFIX).ok_or_else(|| {
                DriverError::Config(format!("'{}' is not a driver option", key))
            })?;
            if !SETTINGS.contains(&name) {
                return Err(DriverError::Config(format!("unknown driver option '{}'", key)));
            }
            self.set(name, value)?;
        }
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> DriverResult<()> {
        if self.database_name.is_empty() {
            return Err(DriverError::NoDatabaseName);
        }

        validate_collection_name("migrations collection", &self.migrations_collection)?;
        validate_collection_name("lock collection", &self.lock.collection)?;

        if self.migrations_collection == self.lock.collection {
            return Err(DriverError::Config(
                "migrations collection and lock collection must differ".to_string(),
            ));
        }

        if self.lock.poll_interval.is_zero() {
            return Err(DriverError::Config("lock poll interval must be greater than 0".to_string()));
        }

        if self.lock.lease.is_zero() {
            return Err(DriverError::Config("lock lease must be greater than 0".to_string()));
        }

        if self.connect_timeout.is_zero() {
            return Err(DriverError::Config("connect timeout must be greater than 0".to_string()));
        }

        if self.client.request_timeout.is_zero() {
            return Err(DriverError::Config("request timeout must be greater than 0".to_string()));
        }

        if self.client.conn_limit == 0 {
            return Err(DriverError::Config("conn limit must be greater than 0".to_string()));
        }

        let bounded = [
            ("lock timeout", Some(self.lock.timeout)),
            ("lock poll interval", Some(self.lock.poll_interval)),
            ("lock lease", Some(self.lock.lease)),
            ("connect timeout", Some(self.connect_timeout)),
            ("statement timeout", self.execution.statement_timeout),
            ("request timeout", Some(self.client.request_timeout)),
            ("shutdown timeout", Some(self.client.shutdown_timeout)),
        ];
        for (what, value) in bounded {
            if let Some(value) = value.filter(|value| *value > MAX_DURATION) {
                return Err(DriverError::Config(format!(
                    "{} {:?} exceeds the maximum of {:?}",
                    what, value, MAX_DURATION
                )));
            }
        }

        Ok(())
    }
}

fn env_var_name(setting: &str) -> String {
    format!("{}_{}", ENV_PREFIX, setting.to_ascii_uppercase().replace('-', "_"))
}

fn validate_collection_name(what: &str, name: &str) -> DriverResult<()> {
    let valid = !name.is_empty()
        && name.len() <= 256
        && !name.starts_with('_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');

    if valid {
        Ok(())
    } else {
        Err(DriverError::Config(format!("invalid {} name '{}'", what, name)))
    }
}

fn parse_u64(name: &str, value: &str) -> DriverResult<u64> {
    value
        .trim()
        .parse()
        .map_err(|e| DriverError::Config(format!("invalid {} '{}': {}", name, value, e)))
}

fn parse_seconds(name: &str, value: &str) -> DriverResult<Duration> {
    parse_u64(name, value).map(Duration::from_secs)
}

fn parse_bool(name: &str, value: &str) -> DriverResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(DriverError::Config(format!("invalid {} '{}'", name, value))),
    }
}
