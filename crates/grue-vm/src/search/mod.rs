// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Search opcodes over packed arrays in main memory.
//!
//! All three primitives locate a key inside fixed-size structures. Keys
//! compare byte-wise, which for big-endian storage is the same as unsigned
//! numeric comparison. A direct key is the operand value itself truncated
//! to `keysize` bytes; an indirect key is `keysize` bytes read from the
//! operand address.


use bitflags::bitflags;

use crate::error::VmError;
use crate::memory::MemMap;

bitflags! {
    /// Option bits of the search opcodes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SearchOptions: u32 {
        /// The key operand is the address of the key bytes.
        const KEY_INDIRECT = 0x01;
        /// Stop at a structure whose key field is all zeroes.
        const ZERO_KEY_TERMINATES = 0x02;
        /// Return the structure index instead of its address.
        const RETURN_INDEX = 0x04;
    }
}

/// Marker for an unbounded `numstructs` operand.
const UNBOUNDED: u32 = 0xFFFF_FFFF;

/// Resolve the key operand into its big-endian byte representation.
fn key_bytes(
    mem: &MemMap,
    key: u32,
    keysize: u32,
    options: SearchOptions,
) -> Result<Vec<u8>, VmError> {
    if options.contains(SearchOptions::KEY_INDIRECT) {
        Ok(mem.read_bytes(key, keysize)?.to_vec())
    } else {
        if !matches!(keysize, 1 | 2 | 4) {
            return Err(VmError::BadSearchKeySize(keysize));
        }
        let be = key.to_be_bytes();
        Ok(be[4 - keysize as usize..].to_vec())
    }
}

/// Encode a miss: 0 for address results, -1 for index results.
fn miss(options: SearchOptions) -> u32 {
    if options.contains(SearchOptions::RETURN_INDEX) {
        UNBOUNDED
    } else {
        0
    }
}

/// Encode a hit at structure `index` / address `addr`.
fn hit(options: SearchOptions, addr: u32, index: u32) -> u32 {
    if options.contains(SearchOptions::RETURN_INDEX) {
        index
    } else {
        addr
    }
}

/// The `linearsearch` opcode: scan structures in order, first match wins.
#[allow(clippy::too_many_arguments)]
pub fn linear(
    mem: &MemMap,
    key: u32,
    keysize: u32,
    start: u32,
    structsize: u32,
    numstructs: u32,
    keyoffset: u32,
    options: SearchOptions,
) -> Result<u32, VmError> {
    let needle = key_bytes(mem, key, keysize, options)?;
    let zeroterm = options.contains(SearchOptions::ZERO_KEY_TERMINATES);

    let mut index: u32 = 0;
    loop {
        if numstructs != UNBOUNDED && index >= numstructs {
            return Ok(miss(options));
        }
        let addr = start.wrapping_add(index.wrapping_mul(structsize));
        let field = mem.read_bytes(addr.wrapping_add(keyoffset), keysize)?;
        if field == needle.as_slice() {
            return Ok(hit(options, addr, index));
        }
        if zeroterm && field.iter().all(|b| *b == 0) {
            return Ok(miss(options));
        }
        if structsize == 0 {
            // A zero stride would scan the same structure forever.
            return Ok(miss(options));
        }
        index = index.wrapping_add(1);
    }
}

/// The `binarysearch` opcode: midpoint search over a sorted array.
///
/// The zero-terminator option does not apply here.
#[allow(clippy::too_many_arguments)]
pub fn binary(
    mem: &MemMap,
    key: u32,
    keysize: u32,
    start: u32,
    structsize: u32,
    numstructs: u32,
    keyoffset: u32,
    options: SearchOptions,
) -> Result<u32, VmError> {
    let needle = key_bytes(mem, key, keysize, options)?;

    let mut lo: u32 = 0;
    let mut hi: u32 = numstructs;
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        let addr = start.wrapping_add(mid.wrapping_mul(structsize));
        let field = mem.read_bytes(addr.wrapping_add(keyoffset), keysize)?;
        match field.cmp(needle.as_slice()) {
            core::cmp::Ordering::Equal => return Ok(hit(options, addr, mid)),
            core::cmp::Ordering::Less => lo = mid + 1,
            core::cmp::Ordering::Greater => hi = mid,
        }
    }
    Ok(miss(options))
}

/// The `linkedsearch` opcode: follow next-pointers until a zero link.
///
/// Index results make no sense here, so a miss is always 0.
pub fn linked(
    mem: &MemMap,
    key: u32,
    keysize: u32,
    start: u32,
    keyoffset: u32,
    nextoffset: u32,
    options: SearchOptions,
) -> Result<u32, VmError> {
    let needle = key_bytes(mem, key, keysize, options)?;
    let zeroterm = options.contains(SearchOptions::ZERO_KEY_TERMINATES);

    let mut addr = start;
    while addr != 0 {
        let field = mem.read_bytes(addr.wrapping_add(keyoffset), keysize)?;
        if field == needle.as_slice() {
            return Ok(addr);
        }
        if zeroterm && field.iter().all(|b| *b == 0) {
            return Ok(0);
        }
        addr = mem.read_u32(addr.wrapping_add(nextoffset))?;
    }
    Ok(0)
}
