//! Audio subsystem module

pub mod buffer;
pub mod catalog;
pub mod device;
pub mod driver;
pub mod port;
pub mod simulated;

pub use buffer::RingBuffer;
pub use catalog::{CapabilityCatalog, ChannelInfo, DeviceInfo};
pub use device::CpalDriver;
pub use driver::{ChannelHandle, HardwareDriver};
pub use port::{HardwarePort, PortRole, SampleFormat};
pub use simulated::SimulatedDriver;
