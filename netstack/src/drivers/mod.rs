//! Concrete link drivers. A driver is a thin `DeviceOps` implementation
//! plus, where it needs one, its own receive thread that pushes frames
//! onto the engine's link-input queue — everything past that small
//! transmit/receive contract is this module's private business (see
//! `spec.md` §1's Out of scope).

pub mod loopback;

#[cfg(feature = "tap")]
pub mod tap;

pub use loopback::LoopbackDevice;

#[cfg(feature = "tap")]
pub use tap::TapDevice;
