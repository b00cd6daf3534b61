//! Persistence layer: libSQL-backed storage for the step catalog, records,
//! quotas, FAQ entries and contacts.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{Database, QuotaChange};
