//! HTTP surface of the dispatcher. Every endpoint maps 1:1 to a service
//! primitive; validation happens here, before anything touches the store.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod types;
pub mod validation;

pub use routes::{create_router, AppState};
