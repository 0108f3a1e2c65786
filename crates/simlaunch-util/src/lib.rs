//! Shared utilities for simlaunch
//!
//! This crate provides:
//! - Run identifiers (used to name per-run scratch directories)
//! - Default paths for the config file and the stdio FIFO directory
//! - Path expansion for user-supplied paths
//! - The failure taxonomy and its stable exit codes

mod error;
mod ids;
mod paths;

pub use error::*;
pub use ids::*;
pub use paths::*;
