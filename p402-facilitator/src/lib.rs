//! HTTP facilitator server for the p402 payment protocol.
//!
//! Exposes `/verify`, `/settle`, `/supported` and `/health` over axum, and
//! dispatches each payment to the EVM facilitator of its network.
//!
//! # Modules
//!
//! - [`config`] - TOML configuration with environment variable expansion
//! - [`error`] - HTTP error responses
//! - [`handlers`] - Route handlers and router
//! - [`local`] - Per-network dispatch and chain setup
//! - [`telemetry`] - Logging and optional OpenTelemetry export
//! - [`util`] - Graceful shutdown

pub mod config;
pub mod error;
pub mod handlers;
pub mod local;
pub mod telemetry;
pub mod util;

pub use config::FacilitatorConfig;
pub use handlers::{FacilitatorState, facilitator_router};
pub use local::LocalFacilitator;
pub use telemetry::Telemetry;
pub use util::SigDown;
