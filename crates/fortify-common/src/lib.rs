//! Shared vocabulary for the FortifyMIS portal: ids, roles, status enums with
//! their transition tables, and the record types exchanged between the
//! storage layer and the HTTP API.

pub mod id;
pub mod models;
pub mod types;
