//! Relational storage for the FortifyMIS portal.
//!
//! [`FortifyStore`] wraps a SeaORM connection (SQLite by default) and exposes
//! one `impl` block per resource under [`store`]. Every mutation runs in a
//! transaction together with its audit-log row.

pub mod auth;
pub mod entities;
pub mod error;
pub mod store;

#[cfg(test)]
mod tests;

pub use error::StorageError;
pub use sea_orm::DbErr;
pub use store::{Actor, FortifyStore};
