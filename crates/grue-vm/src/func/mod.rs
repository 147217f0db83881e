// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Per-function metadata.
//!
//! A Glulx function begins with a type byte (0xC0 stack-args, 0xC1
//! local-args) followed by the locals format: `(size, count)` byte pairs
//! terminated by `(0, 0)`. Locals of size 2 and 4 are aligned to their
//! size; the locals segment as a whole is padded to a 4-byte boundary.
//!
//! Functions in ROM are parsed once and memoized by the VM; functions in
//! RAM are parsed on every call because the underlying bytes may change.


use crate::error::VmError;
use crate::memory::MemMap;

/// Function type byte for stack-argument functions.
pub const FUNC_STACK_ARGS: u8 = 0xC0;

/// Function type byte for local-argument functions.
pub const FUNC_LOCAL_ARGS: u8 = 0xC1;

/// First and last type bytes of the function range.
pub const FUNC_TAG_RANGE: core::ops::RangeInclusive<u8> = 0xC0..=0xDF;

/// One declared local variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalSlot {
    /// Byte position inside the locals segment.
    pub pos: u32,
    /// Size in bytes (1, 2 or 4).
    pub size: u8,
}

/// Parsed metadata of one Glulx function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmFunc {
    /// Address of the function's type byte.
    pub addr: u32,
    /// 0xC0 or 0xC1.
    pub functype: u8,
    /// The raw locals-format bytes including the terminator pair, zero-padded
    /// to a 4-byte boundary. Used when frames are serialized.
    pub raw_format: Vec<u8>,
    /// One entry per declared local, in declaration order.
    pub locals: Vec<LocalSlot>,
    /// Total length of the locals segment, padded to 4 bytes.
    pub locals_len: u32,
    /// Address of the first instruction.
    pub start_pc: u32,
}

impl VmFunc {
    /// Parse the function header at `addr`.
    pub fn parse(mem: &MemMap, addr: u32) -> Result<Self, VmError> {
        let tag = mem.read_u8(addr)? as u8;
        if tag != FUNC_STACK_ARGS && tag != FUNC_LOCAL_ARGS {
            return Err(VmError::NotAFunction { addr, tag });
        }

        let mut raw_format = Vec::new();
        let mut locals = Vec::new();
        let mut pos: u32 = 0;
        let mut at = addr.wrapping_add(1);
        loop {
            let size = mem.read_u8(at)? as u8;
            let count = mem.read_u8(at.wrapping_add(1))? as u8;
            raw_format.push(size);
            raw_format.push(count);
            at = at.wrapping_add(2);
            if size == 0 && count == 0 {
                break;
            }
            if !matches!(size, 1 | 2 | 4) || count == 0 {
                return Err(VmError::BadLocalsFormat { addr });
            }
            // Align the first local of this group to its size.
            pos = pos.next_multiple_of(u32::from(size));
            for _ in 0..count {
                locals.push(LocalSlot { pos, size });
                pos += u32::from(size);
            }
        }

        let locals_len = pos.next_multiple_of(4);
        while raw_format.len() % 4 != 0 {
            raw_format.push(0);
        }

        Ok(Self {
            addr,
            functype: tag,
            raw_format,
            locals,
            locals_len,
            start_pc: at,
        })
    }

    /// Frame length: 8 bytes of metadata, the padded format, the padded
    /// locals segment.
    #[must_use]
    pub fn framelen(&self) -> u32 {
        8 + self.raw_format.len() as u32 + self.locals_len
    }
}
