// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Fatal error surface of the virtual machine.
//!
//! Every fault terminates execution; nothing is caught inside the VM.
//! Glulx-level `throw` is not an error - it is a non-local return handled
//! by the call-stack discipline. Each variant renders as a short message
//! with the relevant integer parameter, which is what the host sees.

use crate::loader::LoadError;

/// A fatal virtual machine error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmError {
    /// The image failed validation at load time.
    Load(LoadError),
    /// Unknown or unsupported opcode number.
    InvalidOpcode {
        /// Address of the instruction.
        pc: u32,
        /// The offending opcode number.
        opcode: u32,
    },
    /// Unrecognized operand addressing mode nibble.
    InvalidOperandMode {
        /// Address of the instruction.
        pc: u32,
        /// The offending mode nibble.
        mode: u8,
    },
    /// A function header carries a malformed locals format.
    BadLocalsFormat {
        /// Address of the function.
        addr: u32,
    },
    /// A call targeted an object that is not a function.
    NotAFunction {
        /// Address of the object.
        addr: u32,
        /// Its leading type byte.
        tag: u8,
    },
    /// Integer division or modulo by zero.
    DivisionByZero,
    /// Memory access beyond the current memory map.
    AddressOutOfRange(u32),
    /// Write into the read-only segment below ramstart.
    WriteToRom(u32),
    /// Value stack underflow (pop or peek past the frame base).
    StackUnderflow,
    /// Call stack exceeded the stack size declared in the header.
    StackOverflow,
    /// A call stub's frame pointer does not match the resumed frame.
    FrameMismatch {
        /// Frame start recorded in the stub.
        expected: u32,
        /// Frame start of the actual frame.
        found: u32,
    },
    /// A string-terminator stub surfaced at a function return.
    StrayStringStub,
    /// Unknown call stub destination type.
    BadDestType(u32),
    /// `throw` token does not denote a live stack position.
    BadThrowTarget(u32),
    /// Local variable access outside the frame's locals segment.
    BadLocalOffset(u32),
    /// Memory resize below the original memory size.
    MemSizeBelowOriginal(u32),
    /// Memory resize to a length that is not a multiple of 256.
    MemSizeUnaligned(u32),
    /// Explicit memory resize while the heap is active.
    MemSizeHeapActive,
    /// `mfree` of an address that is not an allocated block.
    HeapCorruption(u32),
    /// Attempt to print an object that is not a string.
    NotAString {
        /// Address of the object.
        addr: u32,
        /// Its leading type byte.
        tag: u8,
    },
    /// Unknown node type in the string decoding tree.
    BadTreeNode {
        /// Address of the node.
        addr: u32,
        /// Its type byte.
        tag: u8,
    },
    /// `setiosys` to an unsupported I/O system.
    BadIoSys(u32),
    /// Direct search key size outside {1, 2, 4}.
    BadSearchKeySize(u32),
    /// The host dispatcher returned a malformed result.
    GlkFailure {
        /// Selector of the offending call.
        selector: u32,
    },
    /// The game executed `debugtrap`.
    DebugTrap(u32),
}

impl core::fmt::Display for VmError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Load(e) => write!(f, "{e}"),
            Self::InvalidOpcode { pc, opcode } => {
                write!(f, "invalid opcode {opcode:#x} at {pc:#x}")
            }
            Self::InvalidOperandMode { pc, mode } => {
                write!(f, "invalid operand mode {mode:#x} at {pc:#x}")
            }
            Self::BadLocalsFormat { addr } => {
                write!(f, "malformed locals format in function at {addr:#x}")
            }
            Self::NotAFunction { addr, tag } => {
                write!(f, "call of non-function at {addr:#x} (type {tag:#x})")
            }
            Self::DivisionByZero => write!(f, "integer division by zero"),
            Self::AddressOutOfRange(addr) => write!(f, "memory access out of range at {addr:#x}"),
            Self::WriteToRom(addr) => write!(f, "memory write to read-only address {addr:#x}"),
            Self::StackUnderflow => write!(f, "value stack underflow"),
            Self::StackOverflow => write!(f, "call stack overflow"),
            Self::FrameMismatch { expected, found } => {
                write!(f, "call stub frame mismatch (stub {expected:#x}, frame {found:#x})")
            }
            Self::StrayStringStub => write!(f, "string terminator stub at function return"),
            Self::BadDestType(t) => write!(f, "unknown call stub destination type {t:#x}"),
            Self::BadThrowTarget(t) => write!(f, "throw to invalid stack position {t:#x}"),
            Self::BadLocalOffset(off) => write!(f, "local access outside frame at offset {off}"),
            Self::MemSizeBelowOriginal(len) => {
                write!(f, "memory resize to {len:#x} below original size")
            }
            Self::MemSizeUnaligned(len) => write!(f, "memory resize to unaligned size {len:#x}"),
            Self::MemSizeHeapActive => write!(f, "memory resize while the heap is active"),
            Self::HeapCorruption(addr) => write!(f, "free of unallocated heap block {addr:#x}"),
            Self::NotAString { addr, tag } => {
                write!(f, "printing non-string at {addr:#x} (type {tag:#x})")
            }
            Self::BadTreeNode { addr, tag } => {
                write!(f, "unknown string table node type {tag:#x} at {addr:#x}")
            }
            Self::BadIoSys(mode) => write!(f, "unsupported I/O system {mode}"),
            Self::BadSearchKeySize(n) => write!(f, "invalid direct search key size {n}"),
            Self::GlkFailure { selector } => {
                write!(f, "malformed host result for glk selector {selector:#x}")
            }
            Self::DebugTrap(v) => write!(f, "debugtrap executed with value {v:#x}"),
        }
    }
}

impl std::error::Error for VmError {}

impl From<LoadError> for VmError {
    fn from(e: LoadError) -> Self {
        Self::Load(e)
    }
}
