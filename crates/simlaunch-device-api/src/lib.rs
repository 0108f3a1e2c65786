//! Device adapter trait interfaces for simlaunch
//!
//! This crate defines the boundary between the supervising core and whatever
//! actually drives simulated devices. It contains no platform code itself:
//! the core only sees [`DeviceAdapter`], the five lifecycle [`DeviceEvent`]s,
//! and opaque [`DeviceHandle`]s.

mod capabilities;
mod catalog;
mod handle;
mod mock;
mod traits;

pub use capabilities::*;
pub use catalog::*;
pub use handle::*;
pub use mock::*;
pub use traits::*;
