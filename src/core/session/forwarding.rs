use crate::core::session::state::SessionId;
use crate::domain::error::{BridgeError, BridgeResult};
use serde::{Deserialize, Serialize};

/// Whether sessions are cross-wired
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForwardingMode {
    /// Sessions are independent
    #[default]
    Single,
    /// Data received on one linked session is relayed to the other
    Dual,
}

/// Which way a link relays data
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForwardDirection {
    AToB,
    BToA,
    #[default]
    Bidirectional,
}

/// Binding between two distinct sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardingLink {
    pub a: SessionId,
    pub b: SessionId,
    pub direction: ForwardDirection,
}

impl ForwardingLink {
    /// Bidirectional link between `a` and `b`
    pub fn between(a: SessionId, b: SessionId) -> Self {
        Self {
            a,
            b,
            direction: ForwardDirection::Bidirectional,
        }
    }

    pub fn with_direction(mut self, direction: ForwardDirection) -> Self {
        self.direction = direction;
        self
    }

    pub fn validate(&self) -> BridgeResult<()> {
        if self.a == self.b {
            return Err(BridgeError::InvalidLink(format!(
                "session {} cannot forward to itself",
                self.a
            )));
        }
        Ok(())
    }

    /// Peer that data received on `source` should be written to
    pub fn target_for(&self, source: SessionId) -> Option<SessionId> {
        match self.direction {
            ForwardDirection::AToB if source == self.a => Some(self.b),
            ForwardDirection::BToA if source == self.b => Some(self.a),
            ForwardDirection::Bidirectional if source == self.a => Some(self.b),
            ForwardDirection::Bidirectional if source == self.b => Some(self.a),
            _ => None,
        }
    }
}

/// Forwarding policy consulted for every received chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardingConfig {
    pub mode: ForwardingMode,
    pub link: Option<ForwardingLink>,
    /// Operator toggle; dual mode relays nothing while this is off
    pub auto_forward: bool,
}

impl Default for ForwardingConfig {
    fn default() -> Self {
        Self {
            mode: ForwardingMode::Single,
            link: None,
            auto_forward: true,
        }
    }
}

impl ForwardingConfig {
    /// Peer for a chunk received on `source`, if forwarding applies
    pub fn target_for(&self, source: SessionId) -> Option<SessionId> {
        if self.mode != ForwardingMode::Dual || !self.auto_forward {
            return None;
        }
        self.link.and_then(|link| link.target_for(source))
    }
}
