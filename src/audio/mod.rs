//! Audio subsystem module

pub mod device;
pub mod duplex;
pub mod ring;

pub use device::{list_devices, AudioDeviceInfo};
pub use duplex::{DuplexStreams, StreamSpec};
pub use ring::SampleRing;
