//! Peer identity types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Identifier of a peer on the bus (e.g. `Abc.Service.0`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Creates a peer identifier.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PeerId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(CoreError::EmptyPeerId);
        }
        Ok(Self::new(trimmed))
    }
}

impl From<&str> for PeerId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for PeerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A peer as known by the directory: its identity and where to reach it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    /// The peer identifier.
    pub id: PeerId,
    /// Transport endpoint (e.g. `tcp://host:port`).
    pub endpoint: String,
    /// Whether the peer is started.
    #[serde(default = "default_true")]
    pub is_up: bool,
    /// Whether the peer answers heartbeats.
    #[serde(default = "default_true")]
    pub is_responding: bool,
}

fn default_true() -> bool {
    true
}

impl Peer {
    /// Creates a peer that is up and responding.
    pub fn new(id: impl Into<PeerId>, endpoint: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            endpoint: endpoint.into(),
            is_up: true,
            is_responding: true,
        }
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.id, self.endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_peer_id() {
        let id: PeerId = " Abc.Service.0 ".parse().unwrap();
        assert_eq!(id.as_str(), "Abc.Service.0");
        assert!(matches!("  ".parse::<PeerId>(), Err(CoreError::EmptyPeerId)));
    }

    #[test]
    fn test_peer_display() {
        let peer = Peer::new("Abc.Service.0", "tcp://host:123");
        assert_eq!(peer.to_string(), "Abc.Service.0 [tcp://host:123]");
    }
}
