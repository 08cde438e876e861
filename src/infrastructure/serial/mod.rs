// Serial module - Host driver seam, open handles and the port registry
pub mod client;
pub mod driver;
pub mod fake;
pub mod registry;

pub use client::{ReadEvent, SerialClient};
pub use driver::{NativeSerialDriver, PortInfo, PortKind, PortSettings, SerialDriver, SerialHandle};
pub use fake::FakeSerialDriver;
pub use registry::PortRegistry;
