// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Byte-addressable memory image.
//!
//! The Glulx memory map is a single contiguous byte array. Addresses below
//! `ramstart` are read-only (the compiled game text and code live there and
//! the path compiler relies on their immutability); everything above is RAM.
//! Multi-byte accesses are big-endian and need not be aligned.
//!
//! The map can grow and shrink at runtime in 256-byte steps, never below
//! the original size from the header. A protected range survives restart
//! and undo operations.

#[cfg(test)]
mod memory_test;

use byteorder::{BigEndian, ByteOrder};

use crate::error::VmError;

/// Memory size granularity. Every memory map length is a multiple of this.
pub const MEM_ALIGN: u32 = 256;

/// Read a big-endian value of `width` bytes (1, 2 or 4) out of a buffer.
///
/// Returns `None` when the access does not fit.
#[must_use]
pub fn read_be(buf: &[u8], off: usize, width: u8) -> Option<u32> {
    let end = off.checked_add(width as usize)?;
    if end > buf.len() {
        return None;
    }
    Some(match width {
        1 => u32::from(buf[off]),
        2 => u32::from(BigEndian::read_u16(&buf[off..end])),
        _ => BigEndian::read_u32(&buf[off..end]),
    })
}

/// Write the low `width` bytes (1, 2 or 4) of `val` big-endian into a buffer.
///
/// Returns `None` when the access does not fit.
pub fn write_be(buf: &mut [u8], off: usize, width: u8, val: u32) -> Option<()> {
    let end = off.checked_add(width as usize)?;
    if end > buf.len() {
        return None;
    }
    match width {
        1 => buf[off] = val as u8,
        2 => BigEndian::write_u16(&mut buf[off..end], val as u16),
        _ => BigEndian::write_u32(&mut buf[off..end], val),
    }
    Some(())
}

/// The Glulx memory map.
#[derive(Debug)]
pub struct MemMap {
    bytes: Vec<u8>,
    ramstart: u32,
    origendmem: u32,
}

impl MemMap {
    /// Build a memory map from the image bytes, extended with zeroes up to
    /// `origendmem`.
    #[must_use]
    pub fn new(image: &[u8], ramstart: u32, origendmem: u32) -> Self {
        let mut bytes = vec![0u8; origendmem as usize];
        bytes[..image.len()].copy_from_slice(image);
        Self {
            bytes,
            ramstart,
            origendmem,
        }
    }

    /// Current end of memory (`endmem`).
    #[must_use]
    pub fn len(&self) -> u32 {
        self.bytes.len() as u32
    }

    /// Whether the map is empty. Never true for a loaded image.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Start of the writable segment.
    #[must_use]
    pub const fn ramstart(&self) -> u32 {
        self.ramstart
    }

    /// Original end of memory from the header.
    #[must_use]
    pub const fn origendmem(&self) -> u32 {
        self.origendmem
    }

    /// Read `width` bytes (1, 2 or 4) big-endian at `addr`, zero-extended.
    pub fn read(&self, addr: u32, width: u8) -> Result<u32, VmError> {
        read_be(&self.bytes, addr as usize, width).ok_or(VmError::AddressOutOfRange(addr))
    }

    /// Read one byte at `addr`.
    pub fn read_u8(&self, addr: u32) -> Result<u32, VmError> {
        self.read(addr, 1)
    }

    /// Read a big-endian 16-bit value at `addr`.
    pub fn read_u16(&self, addr: u32) -> Result<u32, VmError> {
        self.read(addr, 2)
    }

    /// Read a big-endian 32-bit value at `addr`.
    pub fn read_u32(&self, addr: u32) -> Result<u32, VmError> {
        self.read(addr, 4)
    }

    /// Write the low `width` bytes of `val` big-endian at `addr`.
    ///
    /// Writes below `ramstart` are faults: the segment is ROM.
    pub fn write(&mut self, addr: u32, width: u8, val: u32) -> Result<(), VmError> {
        if addr < self.ramstart {
            return Err(VmError::WriteToRom(addr));
        }
        write_be(&mut self.bytes, addr as usize, width, val)
            .ok_or(VmError::AddressOutOfRange(addr))
    }

    /// Write one byte at `addr`.
    pub fn write_u8(&mut self, addr: u32, val: u32) -> Result<(), VmError> {
        self.write(addr, 1, val)
    }

    /// Write a big-endian 16-bit value at `addr`.
    pub fn write_u16(&mut self, addr: u32, val: u32) -> Result<(), VmError> {
        self.write(addr, 2, val)
    }

    /// Write a big-endian 32-bit value at `addr`.
    pub fn write_u32(&mut self, addr: u32, val: u32) -> Result<(), VmError> {
        self.write(addr, 4, val)
    }

    /// Borrow `len` bytes starting at `addr`.
    pub fn read_bytes(&self, addr: u32, len: u32) -> Result<&[u8], VmError> {
        let start = addr as usize;
        let end = start
            .checked_add(len as usize)
            .ok_or(VmError::AddressOutOfRange(addr))?;
        self.bytes
            .get(start..end)
            .ok_or(VmError::AddressOutOfRange(addr))
    }

    /// Zero `len` bytes starting at `addr` (the `mzero` opcode).
    pub fn zero_range(&mut self, addr: u32, len: u32) -> Result<(), VmError> {
        if len == 0 {
            return Ok(());
        }
        if addr < self.ramstart {
            return Err(VmError::WriteToRom(addr));
        }
        let start = addr as usize;
        let end = start
            .checked_add(len as usize)
            .ok_or(VmError::AddressOutOfRange(addr))?;
        let slice = self
            .bytes
            .get_mut(start..end)
            .ok_or(VmError::AddressOutOfRange(addr))?;
        slice.fill(0);
        Ok(())
    }

    /// Copy `len` bytes from `src` to `dest` with overlap handling
    /// (the `mcopy` opcode).
    pub fn copy_range(&mut self, src: u32, dest: u32, len: u32) -> Result<(), VmError> {
        if len == 0 {
            return Ok(());
        }
        if dest < self.ramstart {
            return Err(VmError::WriteToRom(dest));
        }
        let src_end = (src as usize)
            .checked_add(len as usize)
            .ok_or(VmError::AddressOutOfRange(src))?;
        let dest_end = (dest as usize)
            .checked_add(len as usize)
            .ok_or(VmError::AddressOutOfRange(dest))?;
        if src_end > self.bytes.len() {
            return Err(VmError::AddressOutOfRange(src));
        }
        if dest_end > self.bytes.len() {
            return Err(VmError::AddressOutOfRange(dest));
        }
        self.bytes
            .copy_within(src as usize..src_end, dest as usize);
        Ok(())
    }

    /// Change the memory size to `newlen`.
    ///
    /// `internal` resizes come from the heap and the undo machinery and
    /// bypass the heap-active guard. Added bytes are zeroed.
    pub fn resize(&mut self, newlen: u32, internal: bool, heap_active: bool) -> Result<(), VmError> {
        if newlen < self.origendmem {
            return Err(VmError::MemSizeBelowOriginal(newlen));
        }
        if newlen % MEM_ALIGN != 0 {
            return Err(VmError::MemSizeUnaligned(newlen));
        }
        if heap_active && !internal {
            return Err(VmError::MemSizeHeapActive);
        }
        log::debug!("memory resize {:#x} -> {:#x}", self.len(), newlen);
        self.bytes.resize(newlen as usize, 0);
        Ok(())
    }

    /// Snapshot the writable segment `[ramstart, endmem)`.
    #[must_use]
    pub fn ram_snapshot(&self) -> Vec<u8> {
        self.bytes[self.ramstart as usize..].to_vec()
    }

    /// Overwrite the writable segment with a snapshot taken at the current
    /// memory size.
    pub fn restore_ram(&mut self, ram: &[u8]) -> Result<(), VmError> {
        let start = self.ramstart as usize;
        if start + ram.len() != self.bytes.len() {
            return Err(VmError::AddressOutOfRange(self.len()));
        }
        self.bytes[start..].copy_from_slice(ram);
        Ok(())
    }

    /// Reinitialize from the image bytes: image contents, then zeroes up to
    /// `origendmem`. Used by restart.
    pub fn reset_from(&mut self, image: &[u8]) {
        self.bytes.clear();
        self.bytes.resize(self.origendmem as usize, 0);
        self.bytes[..image.len()].copy_from_slice(image);
    }

    /// Copy the protected range `[start, start+len)`, zero-padded where it
    /// extends past the current end of memory.
    #[must_use]
    pub fn copy_protected(&self, start: u32, len: u32) -> Vec<u8> {
        let mut out = vec![0u8; len as usize];
        for (i, byte) in out.iter_mut().enumerate() {
            let addr = start.wrapping_add(i as u32) as usize;
            if let Some(b) = self.bytes.get(addr) {
                *byte = *b;
            }
        }
        out
    }

    /// Write a protected range back, clipping writes past the current end
    /// of memory.
    pub fn paste_protected(&mut self, start: u32, bytes: &[u8]) {
        for (i, byte) in bytes.iter().enumerate() {
            let addr = start.wrapping_add(i as u32) as usize;
            if let Some(b) = self.bytes.get_mut(addr) {
                *b = *byte;
            }
        }
    }
}
