//! Persistence: the transactional record store collaborator.

pub mod libsql;
pub mod migrations;
pub mod traits;

pub use libsql::LibSqlStore;
pub use traits::RecordStore;
