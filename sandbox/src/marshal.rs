//! Strings and byte sequences across the boundary.
//!
//! Every variable-length transfer goes through the sandbox's own allocator
//! exports. Host → sandbox copies land in a buffer the sandbox then owns.
//! Sandbox → host copies are read out and, when the sandbox handed over
//! ownership, freed immediately on every exit path.

use lightbridge_primitives::MarshalError;

use crate::error::SandboxError;
use crate::memory::{view, view_mut};
use crate::state::{call_guest, exports, Cx};

/// A buffer in linear memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuestSlice {
    pub ptr: u32,
    pub len: u32,
}

impl GuestSlice {
    pub fn new(ptr: u32, len: u32) -> Self {
        Self { ptr, len }
    }
}

/// Narrow a host length to the 32-bit boundary.
pub fn guest_len(len: usize) -> Result<u32, MarshalError> {
    u32::try_from(len).map_err(|_| MarshalError::TooLarge(len))
}

/// Strict UTF-8 decode. Never substitutes replacement characters.
pub fn decode_utf8(bytes: &[u8]) -> Result<String, MarshalError> {
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|e| MarshalError::InvalidUtf8 {
            valid_up_to: e.valid_up_to(),
            len: bytes.len(),
        })
}

// ── Allocator ──

pub fn malloc(cx: &mut Cx<'_>, len: u32) -> Result<u32, SandboxError> {
    let malloc = exports(cx)?.malloc;
    call_guest(cx, &malloc, len)
}

pub fn free(cx: &mut Cx<'_>, slice: GuestSlice) -> Result<(), SandboxError> {
    let free = exports(cx)?.free;
    call_guest(cx, &free, (slice.ptr, slice.len))
}

// ── Host → sandbox ──

/// Copy bytes into a fresh sandbox allocation.
pub fn pass_bytes(cx: &mut Cx<'_>, data: &[u8]) -> Result<GuestSlice, SandboxError> {
    let len = guest_len(data.len())?;
    let ptr = malloc(cx, len)?;
    view_mut(cx)?.write(ptr, data)?;
    Ok(GuestSlice::new(ptr, len))
}

/// Encode a string into a fresh sandbox allocation.
///
/// The buffer is first sized to the UTF-16 length and filled with the ASCII
/// prefix. On the first non-ASCII character it is grown to the worst case
/// for the remainder (three bytes per UTF-16 unit), and shrunk to the bytes
/// actually written at the end. Without a `bridge_realloc` export the whole
/// string is encoded in one pass.
pub fn pass_string(cx: &mut Cx<'_>, s: &str) -> Result<GuestSlice, SandboxError> {
    let exports = exports(cx)?;
    let Some(realloc) = exports.realloc else {
        return pass_bytes(cx, s.as_bytes());
    };

    let bytes = s.as_bytes();
    let mut capacity = guest_len(s.encode_utf16().count())?;
    let mut ptr = call_guest(cx, &exports.malloc, capacity)?;

    let ascii = bytes.iter().position(|b| !b.is_ascii()).unwrap_or(bytes.len());
    view_mut(cx)?.write(ptr, &bytes[..ascii])?;
    if ascii == bytes.len() {
        return Ok(GuestSlice::new(ptr, capacity));
    }

    let rest = &s[ascii..];
    let worst_case = guest_len(ascii + rest.encode_utf16().count() * 3)?;
    ptr = call_guest(cx, &realloc, (ptr, capacity, worst_case))?;
    capacity = worst_case;
    view_mut(cx)?.write(ptr + ascii as u32, rest.as_bytes())?;

    let written = guest_len(bytes.len())?;
    if written != capacity {
        ptr = call_guest(cx, &realloc, (ptr, capacity, written))?;
    }
    tracing::trace!(ptr, ascii, written, "passed string");
    Ok(GuestSlice::new(ptr, written))
}

// ── Sandbox → host ──

pub fn read_bytes(cx: &mut Cx<'_>, slice: GuestSlice) -> Result<Vec<u8>, SandboxError> {
    Ok(view(cx)?.read(slice.ptr, slice.len)?.to_vec())
}

pub fn read_string(cx: &mut Cx<'_>, slice: GuestSlice) -> Result<String, SandboxError> {
    Ok(decode_utf8(view(cx)?.read(slice.ptr, slice.len)?)?)
}

/// Run `op` on a sandbox-owned buffer, then free it whatever `op` returned.
pub fn with_guest_buffer<T>(
    cx: &mut Cx<'_>,
    slice: GuestSlice,
    op: impl FnOnce(&mut Cx<'_>, GuestSlice) -> Result<T, SandboxError>,
) -> Result<T, SandboxError> {
    let result = op(cx, slice);
    let freed = free(cx, slice);
    match (result, freed) {
        (Ok(value), Ok(())) => Ok(value),
        (Err(e), _) | (Ok(_), Err(e)) => Err(e),
    }
}

/// Decode a sandbox-owned string and free it.
pub fn take_string(cx: &mut Cx<'_>, slice: GuestSlice) -> Result<String, SandboxError> {
    with_guest_buffer(cx, slice, read_string)
}

/// Copy out sandbox-owned bytes and free them.
pub fn take_bytes(cx: &mut Cx<'_>, slice: GuestSlice) -> Result<Vec<u8>, SandboxError> {
    with_guest_buffer(cx, slice, read_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_utf8_strict() {
        assert_eq!(decode_utf8(b"hello").unwrap(), "hello");
        assert_eq!(decode_utf8("héllo".as_bytes()).unwrap(), "héllo");
        assert_eq!(
            decode_utf8(&[b'a', 0xC3]),
            Err(MarshalError::InvalidUtf8 { valid_up_to: 1, len: 2 })
        );
        assert!(decode_utf8(&[0xFF, 0xFE]).is_err());
        assert_eq!(decode_utf8(&[]).unwrap(), "");
    }

    #[test]
    fn test_guest_len() {
        assert_eq!(guest_len(12).unwrap(), 12);
        assert!(guest_len(usize::MAX).is_err());
    }
}
