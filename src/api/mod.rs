//! HTTP control surface
//!
//! Plain-text control endpoints plus JSON health and status.

pub mod handlers;
pub mod routes;
pub mod server;

pub use server::{ApiServer, AppState};
