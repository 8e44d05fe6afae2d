//! Process supervisor for uploaded user projects.
//!
//! Keeps at most one live instance per `(owner, project)`, restarts crashed
//! programs, installs modules they report missing, and fans their output out
//! to any number of console viewers.

pub mod commands;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod state;
pub mod utils;

pub use config::{SupervisorConfig, ToolchainConfig};
pub use error::{SupervisorError, SupervisorResult};
pub use state::AppState;
