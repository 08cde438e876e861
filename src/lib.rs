//! uart2uart Library
//!
//! Dual serial port bridge with data forwarding, plus firmware flashing for
//! STM8 and ESP32 targets through external tools.

pub mod cli;
pub mod core;
pub mod domain;
pub mod infrastructure;

pub use core::flash::{FlashEvent, FlashRequest, FlashRunner, JobId, JobOutcome, JobState, TargetFamily};
pub use core::session::{
    ForwardDirection, ForwardingLink, ForwardingMode, SendFraming, SessionEvent, SessionId,
    SessionManager, SessionState, SessionStatus,
};
pub use domain::config::BridgeConfig;
pub use domain::error::{BridgeError, BridgeResult};
pub use infrastructure::serial::{FakeSerialDriver, NativeSerialDriver, PortInfo, SerialDriver};
