//! simlaunch command-line front end
//!
//! Parses the CLI, loads defaults, and dispatches to the launch pipeline or
//! one of the read-only listing verbs.

pub mod cli;
pub mod commands;
pub mod launch;
pub mod logging;
pub mod signals;
