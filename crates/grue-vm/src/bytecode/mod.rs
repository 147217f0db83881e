// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Glulx opcode numbers and operand signatures.
//!
//! Opcode numbers use a variable-length encoding: one byte below 0x80, two
//! bytes below 0xC000 (minus 0x8000), otherwise four bytes (minus
//! 0xC0000000). Each opcode carries a fixed operand list; operands are
//! loads, stores, or call-stub destinations, and some opcodes access memory
//! at a narrower width (`copys`, `copyb`).


use crate::error::VmError;
use crate::memory::MemMap;

/// Opcode numbers.
pub mod op {
    /// No operation.
    pub const NOP: u32 = 0x00;
    /// Add: `L1 + L2 -> S1`
    pub const ADD: u32 = 0x10;
    /// Subtract: `L1 - L2 -> S1`
    pub const SUB: u32 = 0x11;
    /// Signed multiply.
    pub const MUL: u32 = 0x12;
    /// Signed divide, truncating toward zero.
    pub const DIV: u32 = 0x13;
    /// Signed remainder; the sign follows the dividend.
    pub const MOD: u32 = 0x14;
    /// Two's-complement negate.
    pub const NEG: u32 = 0x15;
    /// Bitwise and.
    pub const BITAND: u32 = 0x18;
    /// Bitwise or.
    pub const BITOR: u32 = 0x19;
    /// Bitwise xor.
    pub const BITXOR: u32 = 0x1A;
    /// Bitwise not.
    pub const BITNOT: u32 = 0x1B;
    /// Shift left; shifts of 32 or more produce zero.
    pub const SHIFTL: u32 = 0x1C;
    /// Arithmetic shift right.
    pub const SSHIFTR: u32 = 0x1D;
    /// Logical shift right.
    pub const USHIFTR: u32 = 0x1E;
    /// Unconditional branch.
    pub const JUMP: u32 = 0x20;
    /// Branch if zero.
    pub const JZ: u32 = 0x22;
    /// Branch if nonzero.
    pub const JNZ: u32 = 0x23;
    /// Branch if equal.
    pub const JEQ: u32 = 0x24;
    /// Branch if not equal.
    pub const JNE: u32 = 0x25;
    /// Branch if less than (signed).
    pub const JLT: u32 = 0x26;
    /// Branch if greater or equal (signed).
    pub const JGE: u32 = 0x27;
    /// Branch if greater than (signed).
    pub const JGT: u32 = 0x28;
    /// Branch if less or equal (signed).
    pub const JLE: u32 = 0x29;
    /// Branch if less than (unsigned).
    pub const JLTU: u32 = 0x2A;
    /// Branch if greater or equal (unsigned).
    pub const JGEU: u32 = 0x2B;
    /// Branch if greater than (unsigned).
    pub const JGTU: u32 = 0x2C;
    /// Branch if less or equal (unsigned).
    pub const JLEU: u32 = 0x2D;
    /// Call with argument count taken from the stack.
    pub const CALL: u32 = 0x30;
    /// Return from the current function.
    pub const RETURN: u32 = 0x31;
    /// Push a catch stub and branch.
    pub const CATCH: u32 = 0x32;
    /// Unwind to a catch token.
    pub const THROW: u32 = 0x33;
    /// Tail call: replace the current frame.
    pub const TAILCALL: u32 = 0x34;
    /// Copy a 32-bit value.
    pub const COPY: u32 = 0x40;
    /// Copy a 16-bit value.
    pub const COPYS: u32 = 0x41;
    /// Copy an 8-bit value.
    pub const COPYB: u32 = 0x42;
    /// Sign-extend the low 16 bits.
    pub const SEXS: u32 = 0x44;
    /// Sign-extend the low 8 bits.
    pub const SEXB: u32 = 0x45;
    /// Load a 32-bit array element.
    pub const ALOAD: u32 = 0x48;
    /// Load a 16-bit array element.
    pub const ALOADS: u32 = 0x49;
    /// Load an 8-bit array element.
    pub const ALOADB: u32 = 0x4A;
    /// Load a single bit; the bit index is signed.
    pub const ALOADBIT: u32 = 0x4B;
    /// Store a 32-bit array element.
    pub const ASTORE: u32 = 0x4C;
    /// Store a 16-bit array element.
    pub const ASTORES: u32 = 0x4D;
    /// Store an 8-bit array element.
    pub const ASTOREB: u32 = 0x4E;
    /// Store a single bit; the bit index is signed.
    pub const ASTOREBIT: u32 = 0x4F;
    /// Count of values on the current value stack.
    pub const STKCOUNT: u32 = 0x50;
    /// Peek below the stack top.
    pub const STKPEEK: u32 = 0x51;
    /// Swap the top two stack values.
    pub const STKSWAP: u32 = 0x52;
    /// Rotate the top N stack values.
    pub const STKROLL: u32 = 0x53;
    /// Duplicate the top N stack values.
    pub const STKCOPY: u32 = 0x54;
    /// Print one character.
    pub const STREAMCHAR: u32 = 0x70;
    /// Print a signed decimal number.
    pub const STREAMNUM: u32 = 0x71;
    /// Print a string object.
    pub const STREAMSTR: u32 = 0x72;
    /// Print one Unicode character.
    pub const STREAMUNICHAR: u32 = 0x73;
    /// Query interpreter capabilities.
    pub const GESTALT: u32 = 0x100;
    /// Fatal breakpoint.
    pub const DEBUGTRAP: u32 = 0x101;
    /// Read the current end of memory.
    pub const GETMEMSIZE: u32 = 0x102;
    /// Resize memory.
    pub const SETMEMSIZE: u32 = 0x103;
    /// Jump to an absolute address.
    pub const JUMPABS: u32 = 0x104;
    /// Random number in a range.
    pub const RANDOM: u32 = 0x110;
    /// Seed the random number generator.
    pub const SETRANDOM: u32 = 0x111;
    /// Stop the virtual machine.
    pub const QUIT: u32 = 0x120;
    /// Verify the image checksum.
    pub const VERIFY: u32 = 0x121;
    /// Restart the game from the original image.
    pub const RESTART: u32 = 0x122;
    /// Save the game state (routed externally; reports failure here).
    pub const SAVE: u32 = 0x123;
    /// Restore a saved state (routed externally; reports failure here).
    pub const RESTORE: u32 = 0x124;
    /// Push an undo snapshot.
    pub const SAVEUNDO: u32 = 0x125;
    /// Pop and apply the latest undo snapshot.
    pub const RESTOREUNDO: u32 = 0x126;
    /// Protect a memory range across restart/undo.
    pub const PROTECT: u32 = 0x127;
    /// Call the host Glk dispatcher.
    pub const GLK: u32 = 0x130;
    /// Read the current string decoding table address.
    pub const GETSTRINGTBL: u32 = 0x140;
    /// Set the string decoding table address.
    pub const SETSTRINGTBL: u32 = 0x141;
    /// Read the current I/O system mode and rock.
    pub const GETIOSYS: u32 = 0x148;
    /// Set the I/O system mode and rock.
    pub const SETIOSYS: u32 = 0x149;
    /// Linear search over packed structs.
    pub const LINEARSEARCH: u32 = 0x150;
    /// Binary search over sorted packed structs.
    pub const BINARYSEARCH: u32 = 0x151;
    /// Search along a linked list.
    pub const LINKEDSEARCH: u32 = 0x152;
    /// Call with zero arguments.
    pub const CALLF: u32 = 0x160;
    /// Call with one argument.
    pub const CALLFI: u32 = 0x161;
    /// Call with two arguments.
    pub const CALLFII: u32 = 0x162;
    /// Call with three arguments.
    pub const CALLFIII: u32 = 0x163;
    /// Zero a memory range.
    pub const MZERO: u32 = 0x170;
    /// Copy a memory range with overlap handling.
    pub const MCOPY: u32 = 0x171;
    /// Allocate a heap block.
    pub const MALLOC: u32 = 0x178;
    /// Free a heap block.
    pub const MFREE: u32 = 0x179;
    /// Request function acceleration (accepted, ignored).
    pub const ACCELFUNC: u32 = 0x180;
    /// Set an acceleration parameter (accepted, ignored).
    pub const ACCELPARAM: u32 = 0x181;
}

/// Fetch an opcode number at `pc`, returning the number and the address of
/// the mode bytes that follow.
pub fn fetch_opcode(mem: &MemMap, pc: u32) -> Result<(u32, u32), VmError> {
    let b0 = mem.read_u8(pc)?;
    if b0 < 0x80 {
        Ok((b0, pc.wrapping_add(1)))
    } else if b0 < 0xC0 {
        let val = mem.read_u16(pc)?;
        Ok((val - 0x8000, pc.wrapping_add(2)))
    } else {
        let val = mem.read_u32(pc)?;
        Ok((val.wrapping_sub(0xC000_0000), pc.wrapping_add(4)))
    }
}

/// One operand slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arg {
    /// A value read by the opcode.
    Load,
    /// A location the opcode writes to.
    Store,
    /// A store location captured as call-stub destination fields.
    Stub,
}

/// Static operand signature of an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpSig {
    /// The operand slots in instruction order.
    pub args: &'static [Arg],
    /// Memory access width of the operands (4 except `copys`/`copyb`).
    pub argsize: u8,
    /// Whether the final load operand is a branch offset.
    pub branches: bool,
}

const fn sig(args: &'static [Arg], argsize: u8, branches: bool) -> OpSig {
    OpSig {
        args,
        argsize,
        branches,
    }
}

use Arg::{Load as L, Store as S, Stub as C};

const SIG_NONE: OpSig = sig(&[], 4, false);
const SIG_L: OpSig = sig(&[L], 4, false);
const SIG_L_BR: OpSig = sig(&[L], 4, true);
const SIG_S: OpSig = sig(&[S], 4, false);
const SIG_C: OpSig = sig(&[C], 4, false);
const SIG_LL: OpSig = sig(&[L, L], 4, false);
const SIG_LL_BR: OpSig = sig(&[L, L], 4, true);
const SIG_LS: OpSig = sig(&[L, S], 4, false);
const SIG_LS_2: OpSig = sig(&[L, S], 2, false);
const SIG_LS_1: OpSig = sig(&[L, S], 1, false);
const SIG_SS: OpSig = sig(&[S, S], 4, false);
const SIG_LLL: OpSig = sig(&[L, L, L], 4, false);
const SIG_LLL_BR: OpSig = sig(&[L, L, L], 4, true);
const SIG_LLS: OpSig = sig(&[L, L, S], 4, false);
const SIG_LLC: OpSig = sig(&[L, L, C], 4, false);
const SIG_LC: OpSig = sig(&[L, C], 4, false);
const SIG_LLLC: OpSig = sig(&[L, L, L, C], 4, false);
const SIG_LLLLC: OpSig = sig(&[L, L, L, L, C], 4, false);
const SIG_CL_BR: OpSig = sig(&[C, L], 4, true);
const SIG_SEARCH7: OpSig = sig(&[L, L, L, L, L, L, L, S], 4, false);
const SIG_SEARCH6: OpSig = sig(&[L, L, L, L, L, L, S], 4, false);

/// The operand signature of `opcode`, or `None` for an unknown opcode.
#[must_use]
pub fn signature(opcode: u32) -> Option<OpSig> {
    let sig = match opcode {
        op::NOP | op::STKSWAP | op::QUIT | op::RESTART => SIG_NONE,
        op::ADD
        | op::SUB
        | op::MUL
        | op::DIV
        | op::MOD
        | op::BITAND
        | op::BITOR
        | op::BITXOR
        | op::SHIFTL
        | op::SSHIFTR
        | op::USHIFTR
        | op::ALOAD
        | op::ALOADS
        | op::ALOADB
        | op::ALOADBIT
        | op::GESTALT
        | op::GLK => SIG_LLS,
        op::NEG | op::BITNOT | op::SEXS | op::SEXB | op::STKPEEK | op::RANDOM | op::MALLOC
        | op::SAVE | op::RESTORE | op::SETMEMSIZE => SIG_LS,
        op::COPY => SIG_LS,
        op::COPYS => SIG_LS_2,
        op::COPYB => SIG_LS_1,
        op::JUMP => SIG_L_BR,
        op::JZ | op::JNZ => SIG_LL_BR,
        op::JEQ | op::JNE | op::JLT | op::JGE | op::JGT | op::JLE | op::JLTU | op::JGEU
        | op::JGTU | op::JLEU => SIG_LLL_BR,
        op::JUMPABS
        | op::RETURN
        | op::SETSTRINGTBL
        | op::MFREE
        | op::STKCOPY
        | op::STREAMCHAR
        | op::STREAMNUM
        | op::STREAMSTR
        | op::STREAMUNICHAR
        | op::DEBUGTRAP
        | op::SETRANDOM => SIG_L,
        op::CALL => SIG_LLC,
        op::CATCH => SIG_CL_BR,
        op::THROW | op::TAILCALL | op::PROTECT | op::MZERO | op::SETIOSYS | op::STKROLL
        | op::ACCELFUNC | op::ACCELPARAM => SIG_LL,
        op::ASTORE | op::ASTORES | op::ASTOREB | op::ASTOREBIT | op::MCOPY => SIG_LLL,
        op::STKCOUNT | op::GETMEMSIZE | op::GETSTRINGTBL | op::VERIFY => SIG_S,
        op::SAVEUNDO | op::RESTOREUNDO => SIG_C,
        op::GETIOSYS => SIG_SS,
        op::CALLF => SIG_LC,
        op::CALLFI => SIG_LLC,
        op::CALLFII => SIG_LLLC,
        op::CALLFIII => SIG_LLLLC,
        op::LINEARSEARCH | op::BINARYSEARCH => SIG_SEARCH7,
        op::LINKEDSEARCH => SIG_SEARCH6,
        _ => return None,
    };
    Some(sig)
}
