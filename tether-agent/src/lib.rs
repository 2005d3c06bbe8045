//! # tether-agent: remote device agent service
//!
//! Keeps a channel to the controller alive, serves its orders through the
//! `tether-core` dispatcher, and records one audit session per connection.
//!
//! ## Layout
//!
//! - **config**: TOML configuration (`[controller]`, `[security]`,
//!   `[reconnect]`, `[logging]`).
//! - **platform**: host implementations of the device, capture and input seams.
//! - **service**: `AgentService`, the event loop tying it together.

pub mod config;
pub mod platform;
pub mod service;
