//! Host-side error types for the LightBridge sandbox.
//!
//! `HostError` covers two families. Usage errors (`StackExhausted`,
//! `InvalidHandle`, `DoubleDrop`, `ClosureDestroyed`) mean the bridge contract
//! was violated and are never recovered from. Environment and transport errors
//! come from the outside world and are surfaced to the sandbox as thrown
//! host exceptions.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    /// The borrowed-value stack has no free slot left.
    StackExhausted,
    /// A handle that is not currently assigned was dereferenced.
    InvalidHandle(u32),
    /// A handle was released twice.
    DoubleDrop(u32),
    /// A closure was invoked after its destructor ran.
    ClosureDestroyed,
    /// Randomness or clock failure.
    Environment(String),
    /// WebSocket transport failure.
    Transport(String),
    /// Anything else that should never happen.
    Internal(String),
}

impl HostError {
    pub fn invalid_handle(raw: u32) -> Self {
        Self::InvalidHandle(raw)
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn environment(msg: impl Into<String>) -> Self {
        Self::Environment(msg.into())
    }

    /// True when the error signals a broken bridge contract rather than a
    /// failure of the host environment.
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            Self::StackExhausted
                | Self::InvalidHandle(_)
                | Self::DoubleDrop(_)
                | Self::ClosureDestroyed
                | Self::Internal(_)
        )
    }
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StackExhausted => write!(f, "out of host stack"),
            Self::InvalidHandle(raw) => write!(f, "invalid handle {}", raw),
            Self::DoubleDrop(raw) => write!(f, "handle {} released twice", raw),
            Self::ClosureDestroyed => {
                write!(f, "closure invoked recursively or after being dropped")
            }
            Self::Environment(msg) => write!(f, "environment error: {}", msg),
            Self::Transport(msg) => write!(f, "transport error: {}", msg),
            Self::Internal(msg) => write!(f, "internal host error: {}", msg),
        }
    }
}

impl std::error::Error for HostError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_classification() {
        assert!(HostError::StackExhausted.is_usage());
        assert!(HostError::invalid_handle(200).is_usage());
        assert!(HostError::DoubleDrop(130).is_usage());
        assert!(HostError::ClosureDestroyed.is_usage());
        assert!(!HostError::transport("refused").is_usage());
        assert!(!HostError::environment("no entropy").is_usage());
    }

    #[test]
    fn test_display() {
        assert_eq!(HostError::StackExhausted.to_string(), "out of host stack");
        assert_eq!(HostError::invalid_handle(7).to_string(), "invalid handle 7");
        let s = HostError::transport("connection refused").to_string();
        assert!(s.contains("connection refused"));
    }
}
