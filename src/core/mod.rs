// Core module - Session management and firmware flashing
pub mod flash;
pub mod session;
