// Session module - Serial session management and forwarding
pub mod forwarding;
pub mod manager;
pub mod state;

pub use forwarding::{ForwardDirection, ForwardingConfig, ForwardingLink, ForwardingMode};
pub use manager::{SendFraming, SessionEvent, SessionManager};
pub use state::{ActivityType, SessionId, SessionState, SessionStatistics, SessionStatus};
