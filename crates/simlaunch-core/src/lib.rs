//! Session supervision core for simlaunch
//!
//! This crate is the heart of simlaunch, containing:
//! - The stdio bridge (FIFOs streamed to the console or files)
//! - The simulator session (start/stop against a device adapter)
//! - The supervisor state machine
//!   (Idle -> SessionStarting -> AppLaunching -> Running -> Terminating -> Terminated | Failed)
//! - Timeout, keepalive and exit-on-startup policy, with a single teardown path

mod events;
mod session;
mod stdio;
mod supervisor;

pub use events::*;
pub use session::*;
pub use stdio::*;
pub use supervisor::*;
