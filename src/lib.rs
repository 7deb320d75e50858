//! CKB block ingestion and normalization pipeline.
//!
//! Raw blocks fetched from a node are decomposed into a relational model
//! (blocks, uncle blocks, transactions, cell inputs/outputs, scripts,
//! addresses) and persisted atomically: a partially-applied import is never
//! visible, and re-importing a committed block hash is rejected whole.

pub mod address;
pub mod config;
pub mod entities;
pub mod error;
pub mod fees;
pub mod import;
pub mod models;
pub mod node;
pub mod script;
pub mod store;

pub use address::Network;
pub use config::Config;
pub use entities::{SyncLane, SyncStatus};
pub use error::{Error, Result};
pub use import::BlockImporter;
pub use node::NodeRpc;
pub use store::Store;
