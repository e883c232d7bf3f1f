//! Marshalling errors.
//!
//! Raised when a value cannot be moved across the boundary. These are never
//! retried; the bridge surfaces them to the caller immediately.

/// Failure converting between host values and sandbox memory.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MarshalError {
    /// Sandbox bytes are not valid UTF-8. Decoding is strict; no replacement characters.
    #[error("invalid UTF-8 at byte {valid_up_to} of {len}-byte string")]
    InvalidUtf8 { valid_up_to: usize, len: usize },

    /// The host value has no representation for the requested conversion.
    #[error("cannot marshal {found} as {expected}")]
    Unsupported {
        expected: &'static str,
        found: &'static str,
    },

    /// A pointer/length pair falls outside linear memory.
    #[error("range {ptr:#x}+{len} is outside linear memory ({size} bytes)")]
    OutOfBounds { ptr: u32, len: u32, size: usize },

    /// A length does not fit the 32-bit boundary.
    #[error("length {0} exceeds the 32-bit address space")]
    TooLarge(usize),
}

impl MarshalError {
    pub fn unsupported(expected: &'static str, found: &'static str) -> Self {
        Self::Unsupported { expected, found }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = MarshalError::InvalidUtf8 { valid_up_to: 3, len: 5 };
        assert_eq!(err.to_string(), "invalid UTF-8 at byte 3 of 5-byte string");

        let err = MarshalError::unsupported("string", "number");
        assert!(err.to_string().contains("number"));

        let err = MarshalError::OutOfBounds { ptr: 0x10, len: 4, size: 8 };
        assert!(err.to_string().contains("0x10"));
    }
}
