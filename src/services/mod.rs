//! Background services

pub mod refresh;

pub use refresh::{RefreshConfig, RefreshHandle, RefreshService};
