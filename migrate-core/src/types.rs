//! Version bookkeeping types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Version reported when no migration has ever been recorded
pub const NIL_VERSION: i64 = -1;

/// The schema state of one logical database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    /// Last migration version that was started, or [`NIL_VERSION`]
    pub version: i64,

    /// Whether that migration may have left the database partially modified
    pub dirty: bool,
}

impl VersionRecord {
    pub fn new(version: i64, dirty: bool) -> Self {
        Self { version, dirty }
    }

    /// The record of a database that was never migrated
    pub fn nil() -> Self {
        Self::new(NIL_VERSION, false)
    }

    pub fn is_nil(&self) -> bool {
        self.version == NIL_VERSION
    }
}

impl Default for VersionRecord {
    fn default() -> Self {
        Self::nil()
    }
}

impl From<VersionRecord> for (i64, bool) {
    fn from(record: VersionRecord) -> Self {
        (record.version, record.dirty)
    }
}

impl fmt::Display for VersionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.is_nil(), self.dirty) {
            (true, false) => write!(f, "no version"),
            (true, true) => write!(f, "no version (dirty)"),
            (false, false) => write!(f, "{}", self.version),
            (false, true) => write!(f, "{} (dirty)", self.version),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_nil() {
        let record = VersionRecord::default();
        assert!(record.is_nil());
        assert!(!record.dirty);
        assert_eq!(<(i64, bool)>::from(record), (-1, false));
    }

    #[test]
    fn test_display() {
        assert_eq!(VersionRecord::nil().to_string(), "no version");
        assert_eq!(VersionRecord::new(3, true).to_string(), "3 (dirty)");
        assert_eq!(VersionRecord::new(5, false).to_string(), "5");
    }
}
