// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Buffer headers and the single-owner claim slot.
//!
//! A [`BufferHeader`] is a value: whoever holds it owns it. Claiming moves it
//! out of a kernel queue and releasing moves it back, so there is never more
//! than one owner of a header at any time.

use bytes::BytesMut;

use crate::error::Result;
use crate::kernel::Kernel;

/// Buffer flag bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferFlags(u32);

impl BufferFlags {
    pub const EOS: Self = Self(0x0000_0001);
    pub const END_OF_FRAME: Self = Self(0x0000_0010);
    pub const CODEC_CONFIG: Self = Self(0x0000_0080);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

/// One unit of media data in flight.
///
/// The payload is `data[offset .. offset + filled_len]`.
#[derive(Debug)]
pub struct BufferHeader {
    id: u64,
    data: BytesMut,
    pub filled_len: usize,
    pub offset: usize,
    pub flags: BufferFlags,
    pub timestamp: i64,
}

impl BufferHeader {
    pub fn new(id: u64, alloc_len: usize) -> Self {
        Self {
            id,
            data: BytesMut::zeroed(alloc_len),
            filled_len: 0,
            offset: 0,
            flags: BufferFlags::empty(),
            timestamp: 0,
        }
    }

    pub const fn id(&self) -> u64 {
        self.id
    }

    pub fn alloc_len(&self) -> usize {
        self.data.len()
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[self.offset..self.offset + self.filled_len]
    }

    /// Bytes that can still be appended after the current payload.
    pub fn remaining_capacity(&self) -> usize {
        self.alloc_len().saturating_sub(self.offset + self.filled_len)
    }

    pub fn is_full(&self) -> bool {
        self.remaining_capacity() == 0
    }

    /// Appends as much of `bytes` as fits, returning the number of bytes written.
    pub fn append(&mut self, bytes: &[u8]) -> usize {
        let n = bytes.len().min(self.remaining_capacity());
        let start = self.offset + self.filled_len;
        self.data[start..start + n].copy_from_slice(&bytes[..n]);
        self.filled_len += n;
        n
    }

    /// Copies payload bytes into `dst` and consumes them.
    pub fn read_into(&mut self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.filled_len);
        dst[..n].copy_from_slice(&self.data[self.offset..self.offset + n]);
        self.consume(n);
        n
    }

    /// Drops `n` bytes from the front of the payload.
    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.filled_len);
        self.offset += n;
        self.filled_len -= n;
    }

    /// Empties the header and clears its flags.
    pub fn reset(&mut self) {
        self.filled_len = 0;
        self.offset = 0;
        self.flags = BufferFlags::empty();
        self.timestamp = 0;
    }
}

/// Owned-optional handle for the one header a processor may hold on a port.
#[derive(Debug)]
pub struct HeaderSlot {
    port: u32,
    header: Option<BufferHeader>,
}

impl HeaderSlot {
    pub const fn new(port: u32) -> Self {
        Self { port, header: None }
    }

    pub const fn port(&self) -> u32 {
        self.port
    }

    pub const fn is_held(&self) -> bool {
        self.header.is_some()
    }

    pub const fn get(&self) -> Option<&BufferHeader> {
        self.header.as_ref()
    }

    pub fn get_mut(&mut self) -> Option<&mut BufferHeader> {
        self.header.as_mut()
    }

    /// Returns the held header, claiming one from the kernel first if needed.
    ///
    /// # Errors
    ///
    /// Propagates kernel claim failures.
    pub fn claim(&mut self, kernel: &mut dyn Kernel) -> Result<Option<&mut BufferHeader>> {
        if self.header.is_none() {
            self.header = kernel.claim_buffer(self.port)?;
            if let Some(hdr) = &self.header {
                tracing::trace!(
                    component = %kernel.component_name(),
                    port = self.port,
                    header = hdr.id(),
                    filled_len = hdr.filled_len,
                    "Claimed header"
                );
            }
        }
        Ok(self.header.as_mut())
    }

    /// Hands the held header back to the kernel. Returns whether one was held.
    ///
    /// # Errors
    ///
    /// Propagates kernel release failures.
    pub fn release(&mut self, kernel: &mut dyn Kernel) -> Result<bool> {
        match self.header.take() {
            Some(hdr) => {
                tracing::trace!(
                    component = %kernel.component_name(),
                    port = self.port,
                    header = hdr.id(),
                    filled_len = hdr.filled_len,
                    "Releasing header"
                );
                kernel.release_buffer(self.port, hdr)?;
                Ok(true)
            },
            None => Ok(false),
        }
    }
}
