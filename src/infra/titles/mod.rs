// Storage engines for the title store.

mod in_memory;
mod mysql_store;
mod sqlite_store;

pub use in_memory::InMemoryTitleStore;
pub use mysql_store::MySqlTitleStore;
pub use sqlite_store::SqliteTitleStore;

use crate::core::titles::StoreError;

/// Shared sqlx error mapping: pool exhaustion is its own failure kind so the
/// logs distinguish "database is slow" from "query is broken".
pub(crate) fn store_err(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::PoolTimedOut => StoreError::PoolTimeout,
        other => StoreError::Failure(other.to_string()),
    }
}
