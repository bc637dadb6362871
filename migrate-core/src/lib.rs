//! Driver contract for schema migration runners
//!
//! A migration runner applies versioned, ordered change scripts through a
//! database-specific [`Driver`]. This crate holds the fixed boundary between
//! the two: the driver operations, the [`DriverRegistry`] that resolves
//! `scheme://` connection descriptors to driver factories, the version record
//! shared by every driver and the error type they all report through.

pub mod driver;
pub mod error;
pub mod logging;
pub mod registry;
pub mod types;

// Re-export the contract at the crate root
pub use driver::{Driver, DriverFactory};
pub use error::{DriverError, DriverResult, ErrorKind};
pub use registry::DriverRegistry;
pub use types::{VersionRecord, NIL_VERSION};
