//! `xcrun simctl` device adapter for simlaunch
//!
//! Provides:
//! - Device discovery and selection from `simctl list` JSON
//! - Boot, install and launch with stdio redirected into the run's FIFOs
//! - A liveness monitor that reports the launched pid's death
//! - Runtime, device type and installed app listings

mod adapter;
mod catalog;
mod process;

pub use adapter::*;
pub use catalog::*;
pub use process::*;
