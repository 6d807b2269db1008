//! Loader: idempotent persistence of reconstructed transactions
//!
//! - `schema` - ordered schema files, applied once each
//! - `sqlite_pragma` - connection tuning
//! - `upsert` - row-level insert-or-fetch / insert-or-merge
//! - `store` - `TransactionStore` repository and its SQLite backend

pub mod schema;
pub mod sqlite_pragma;
pub mod store;
pub mod upsert;

pub use store::{SqliteStore, TransactionStore};
pub use upsert::AddressRow;
