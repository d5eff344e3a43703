//! Wire and domain types shared between the storage layer, the API handlers
//! and the server binary.

pub mod api;
pub mod models;
