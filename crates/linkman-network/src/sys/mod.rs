//! Kernel interface layer: control sockets and raw ioctls.
//!
//! Everything above this module is ioctl-free; everything in it is blocking
//! and runs on device workers (or briefly on the main context for short
//! getters, mirroring the serialization rules in the engine).

pub(crate) mod ethtool;
pub(crate) mod netdev;
pub(crate) mod socket;
pub(crate) mod wext;

pub use wext::FrequencyEntry;
