//! Infrastructure layer for the gateway
//!
//! Persistence for the audit trail and file storage for binary artifacts.

pub mod audit_store;
pub mod database;
pub mod file_store;
pub mod memory;

pub use audit_store::{AuditStore, StoreError, StoreResult};
pub use database::SqliteAuditStore;
pub use file_store::FileStore;
pub use memory::InMemoryAuditStore;
