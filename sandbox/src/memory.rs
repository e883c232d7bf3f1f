//! Bounds-checked access to the sandbox's linear memory.
//!
//! Views borrow the store, so the borrow checker keeps them from outliving
//! the call they were taken in. The [`ViewCache`] records the buffer length
//! each time a view is taken; a change means the sandbox grew its memory and
//! every previously derived pointer arithmetic must be redone.

use lightbridge_primitives::MarshalError;

use crate::error::SandboxError;
use crate::state::{exports, BridgeState, Cx};

#[derive(Debug, Default)]
pub struct ViewCache {
    byte_len: usize,
    generation: u64,
}

impl ViewCache {
    /// Record the current buffer length. Returns true if the views had to be rebuilt.
    pub fn observe(&mut self, byte_len: usize) -> bool {
        if byte_len == self.byte_len {
            return false;
        }
        tracing::trace!(
            from = self.byte_len,
            to = byte_len,
            generation = self.generation + 1,
            "memory views rebuilt"
        );
        self.byte_len = byte_len;
        self.generation += 1;
        true
    }

    /// Incremented on every observed resize.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn byte_len(&self) -> usize {
        self.byte_len
    }
}

/// Byte range `ptr..ptr + len` of a memory of `size` bytes.
pub fn check_range(
    size: usize,
    ptr: u32,
    len: u32,
) -> Result<std::ops::Range<usize>, MarshalError> {
    let start = ptr as usize;
    let end = start
        .checked_add(len as usize)
        .filter(|end| *end <= size)
        .ok_or(MarshalError::OutOfBounds { ptr, len, size })?;
    Ok(start..end)
}

/// Read `len` bytes from guest memory at `ptr`.
pub fn read_bytes(mem: &[u8], ptr: u32, len: u32) -> Result<&[u8], MarshalError> {
    let range = check_range(mem.len(), ptr, len)?;
    Ok(&mem[range])
}

/// Write `data` bytes to guest memory at `ptr`.
pub fn write_bytes(mem: &mut [u8], ptr: u32, data: &[u8]) -> Result<(), MarshalError> {
    let size = mem.len();
    let len = u32::try_from(data.len()).map_err(|_| MarshalError::TooLarge(data.len()))?;
    let start = ptr as usize;
    let end = start
        .checked_add(data.len())
        .filter(|end| *end <= size)
        .ok_or(MarshalError::OutOfBounds { ptr, len, size })?;
    mem[start..end].copy_from_slice(data);
    Ok(())
}

fn read_array<const N: usize>(mem: &[u8], ptr: u32) -> Result<[u8; N], MarshalError> {
    let mut out = [0u8; N];
    out.copy_from_slice(read_bytes(mem, ptr, N as u32)?);
    Ok(out)
}

/// Read an i32 value (little-endian) from guest memory at `ptr`.
pub fn read_i32(mem: &[u8], ptr: u32) -> Result<i32, MarshalError> {
    read_array(mem, ptr).map(i32::from_le_bytes)
}

/// Write an i32 value (little-endian) to guest memory at `ptr`.
pub fn write_i32(mem: &mut [u8], ptr: u32, value: i32) -> Result<(), MarshalError> {
    write_bytes(mem, ptr, &value.to_le_bytes())
}

/// Read-only view over linear memory.
pub struct MemoryView<'a> {
    data: &'a [u8],
}

impl<'a> MemoryView<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn read(&self, ptr: u32, len: u32) -> Result<&'a [u8], MarshalError> {
        read_bytes(self.data, ptr, len)
    }

    pub fn u8(&self, ptr: u32) -> Result<u8, MarshalError> {
        Ok(read_array::<1>(self.data, ptr)?[0])
    }

    pub fn i32(&self, ptr: u32) -> Result<i32, MarshalError> {
        read_i32(self.data, ptr)
    }

    pub fn u32(&self, ptr: u32) -> Result<u32, MarshalError> {
        read_array(self.data, ptr).map(u32::from_le_bytes)
    }

    pub fn i64(&self, ptr: u32) -> Result<i64, MarshalError> {
        read_array(self.data, ptr).map(i64::from_le_bytes)
    }

    pub fn f64(&self, ptr: u32) -> Result<f64, MarshalError> {
        read_array(self.data, ptr).map(f64::from_le_bytes)
    }
}

/// Mutable view over linear memory.
pub struct MemoryViewMut<'a> {
    data: &'a mut [u8],
}

impl<'a> MemoryViewMut<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn write(&mut self, ptr: u32, bytes: &[u8]) -> Result<(), MarshalError> {
        write_bytes(self.data, ptr, bytes)
    }

    /// Writable window over `ptr..ptr + len`.
    pub fn range_mut(&mut self, ptr: u32, len: u32) -> Result<&mut [u8], MarshalError> {
        let range = check_range(self.data.len(), ptr, len)?;
        Ok(&mut self.data[range])
    }

    pub fn set_i32(&mut self, ptr: u32, value: i32) -> Result<(), MarshalError> {
        write_i32(self.data, ptr, value)
    }

    pub fn set_u32(&mut self, ptr: u32, value: u32) -> Result<(), MarshalError> {
        self.write(ptr, &value.to_le_bytes())
    }

    pub fn set_i64(&mut self, ptr: u32, value: i64) -> Result<(), MarshalError> {
        self.write(ptr, &value.to_le_bytes())
    }

    pub fn set_f64(&mut self, ptr: u32, value: f64) -> Result<(), MarshalError> {
        self.write(ptr, &value.to_le_bytes())
    }
}

/// Current read-only view, refreshing the cache if memory was resized.
pub fn view<'a>(cx: &'a mut Cx<'_>) -> Result<MemoryView<'a>, SandboxError> {
    let memory = exports(cx)?.memory;
    let size = memory.data_size(&*cx);
    cx.data_mut().views.observe(size);
    let cx: &'a Cx<'_> = cx;
    Ok(MemoryView::new(memory.data(cx)))
}

/// Current mutable view, refreshing the cache if memory was resized.
pub fn view_mut<'a>(cx: &'a mut Cx<'_>) -> Result<MemoryViewMut<'a>, SandboxError> {
    let memory = exports(cx)?.memory;
    let size = memory.data_size(&*cx);
    cx.data_mut().views.observe(size);
    Ok(MemoryViewMut::new(memory.data_mut(cx)))
}

/// Bounds-checked guest range together with the bridge state, so host
/// services can write straight into sandbox memory without staging a copy.
pub fn range_and_state_mut<'a>(
    cx: &'a mut Cx<'_>,
    ptr: u32,
    len: u32,
) -> Result<(&'a mut [u8], &'a mut BridgeState), SandboxError> {
    let memory = exports(cx)?.memory;
    let (data, state) = memory.data_and_store_mut(cx);
    state.views.observe(data.len());
    let range = check_range(data.len(), ptr, len)?;
    Ok((&mut data[range], state))
}
