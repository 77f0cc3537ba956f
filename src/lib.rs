//! Xray Helper - subscription driven node selection for the Xray engine
//!
//! Fetches a `vmess://` subscription, generates the engine configuration
//! directory, probes every endpoint through the running engine and keeps it
//! running with the fastest ones behind a balancer.
//!
//! ## Features
//!
//! - Base64 JSON and legacy `vmess://` share links
//! - tcp (with HTTP camouflage), mKCP, WebSocket, gRPC and HTTP/2 transports
//! - TLS, XTLS and REALITY security
//! - Concurrent latency probing bounded by one deadline
//! - Engine process supervision with periodic refresh
//! - Small HTTP control surface

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod probe;
pub mod services;
pub mod subscription;

pub use config::Config;
pub use engine::Supervisor;
pub use error::{HelperError, Result};
