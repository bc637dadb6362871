//! ArangoDB client for the migration driver
//!
//! The driver only needs a small slice of ArangoDB: database existence and
//! creation, collections, single documents, AQL cursors and stream
//! transactions. That slice is described by the [`ArangoClient`] and
//! [`ArangoDatabase`] traits, implemented over the REST API by
//! [`HttpClient`] and in process by [`InMemoryServer`].

pub mod config;
pub mod connection;
pub mod errors;
pub mod http;
pub mod memory;

// Re-export main types for convenience
pub use config::{ClientConfig, Credentials};
pub use connection::{ArangoClient, ArangoDatabase, CollectionInfo, Document, OverwriteMode, QueryOptions};
pub use errors::{ClientError, ClientResult};
pub use http::HttpClient;
pub use memory::{InMemoryClient, InMemoryServer};
