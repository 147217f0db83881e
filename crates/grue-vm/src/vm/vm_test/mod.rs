// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! End-to-end tests: real Glulx images built in memory and executed
//! against the recording mock dispatcher.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod arithmetic_test;
mod function_test;
mod heap_test;
mod memory_test;
mod search_test;

use byteorder::{BigEndian, ByteOrder};

use crate::glk::MockGlk;
use crate::loader::MAGIC;
use crate::vm::{Stop, Vm, VmOptions};

/// Glk selector for `glk_put_char`, as emitted by test images.
pub const GLK_PUT_CHAR: i32 = 0x80;

/// One assembler operand of the test image builder.
#[derive(Debug, Clone, Copy)]
pub enum A {
    /// A constant in its smallest encoding.
    Imm(i32),
    /// A constant forced to the 4-byte encoding (patchable).
    Imm4(i32),
    /// Absolute main-memory address (4-byte field).
    Mem(u32),
    /// Local variable at a byte offset.
    Local(u32),
    /// Stack pop/push.
    Stack,
    /// Store-discard (or the constant zero in load position).
    Discard,
}

fn encode(a: A) -> (u8, Vec<u8>) {
    match a {
        A::Imm(v) if (-128..=127).contains(&v) => (0x1, vec![v as u8]),
        A::Imm(v) if (-32768..=32767).contains(&v) => (0x2, (v as i16).to_be_bytes().to_vec()),
        A::Imm(v) | A::Imm4(v) => (0x3, v.to_be_bytes().to_vec()),
        A::Mem(addr) => (0x7, addr.to_be_bytes().to_vec()),
        A::Local(off) if off < 0x100 => (0x9, vec![off as u8]),
        A::Local(off) => (0xA, (off as u16).to_be_bytes().to_vec()),
        A::Stack => (0x8, Vec::new()),
        A::Discard => (0x0, Vec::new()),
    }
}

/// Builds a minimal valid Glulx image: header page, code, optional RAM
/// payload, correct checksum.
pub struct ImageBuilder {
    buf: Vec<u8>,
    ramstart: Option<u32>,
    start: u32,
    stringtable: u32,
}

impl ImageBuilder {
    pub fn new() -> Self {
        Self {
            buf: vec![0u8; 0x100],
            ramstart: None,
            start: 0,
            stringtable: 0,
        }
    }

    /// Current emission address.
    pub fn pos(&self) -> u32 {
        self.buf.len() as u32
    }

    pub fn bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn byte(&mut self, byte: u8) {
        self.buf.push(byte);
    }

    pub fn word(&mut self, word: u32) {
        self.buf.extend_from_slice(&word.to_be_bytes());
    }

    pub fn set_start(&mut self, addr: u32) {
        self.start = addr;
    }

    pub fn set_stringtable(&mut self, addr: u32) {
        self.stringtable = addr;
    }

    /// Everything emitted after this call lands in RAM.
    pub fn mark_ramstart(&mut self) {
        while self.buf.len() % 0x100 != 0 {
            self.buf.push(0);
        }
        self.ramstart = Some(self.buf.len() as u32);
    }

    /// Emit a function header with `nlocals` 4-byte locals, arguments
    /// copied into locals (type 0xC1). Returns the function address.
    pub fn func_locals(&mut self, nlocals: u8) -> u32 {
        let addr = self.pos();
        self.byte(0xC1);
        if nlocals > 0 {
            self.byte(4);
            self.byte(nlocals);
        }
        self.byte(0);
        self.byte(0);
        addr
    }

    /// Emit a type 0xC0 function header (arguments on the stack).
    pub fn func_stackargs(&mut self) -> u32 {
        let addr = self.pos();
        self.byte(0xC0);
        self.byte(0);
        self.byte(0);
        addr
    }

    fn opcode(&mut self, opcode: u32) {
        if opcode < 0x80 {
            self.byte(opcode as u8);
        } else if opcode < 0x4000 {
            self.bytes(&((opcode + 0x8000) as u16).to_be_bytes());
        } else {
            self.word(opcode + 0xC000_0000);
        }
    }

    /// Emit one instruction. Returns the address after it (`next_pc`).
    pub fn instr(&mut self, opcode: u32, ops: &[A]) -> u32 {
        self.opcode(opcode);
        let encoded: Vec<(u8, Vec<u8>)> = ops.iter().map(|a| encode(*a)).collect();
        for pair in encoded.chunks(2) {
            let lo = pair[0].0;
            let hi = pair.get(1).map_or(0, |p| p.0);
            self.byte(lo | (hi << 4));
        }
        for (_, data) in &encoded {
            self.bytes(data);
        }
        self.pos()
    }

    /// Patch the 4-byte branch field of an instruction whose last operand
    /// was `A::Imm4`, given that instruction's `next_pc`, to branch to
    /// `target`.
    pub fn patch_branch(&mut self, next_pc: u32, target: u32) {
        let offset = target.wrapping_sub(next_pc).wrapping_add(2);
        let at = (next_pc - 4) as usize;
        self.buf[at..at + 4].copy_from_slice(&offset.to_be_bytes());
    }

    /// Emit `setiosys glk`.
    pub fn glk_mode(&mut self) {
        self.instr(crate::bytecode::op::SETIOSYS, &[A::Imm(2), A::Imm(0)]);
    }

    /// Emit code printing one character through the raw glk opcode.
    pub fn emit_put_char(&mut self, ch: u8) {
        self.instr(crate::bytecode::op::COPY, &[A::Imm(i32::from(ch)), A::Stack]);
        self.instr(
            crate::bytecode::op::GLK,
            &[A::Imm(GLK_PUT_CHAR), A::Imm(1), A::Discard],
        );
    }

    /// Finalize: pad, fill in the header, compute the checksum.
    pub fn finish(mut self) -> Vec<u8> {
        while self.buf.len() % 0x100 != 0 {
            self.buf.push(0);
        }
        let endgamefile = self.buf.len() as u32;
        let ramstart = self.ramstart.unwrap_or(endgamefile);
        let origendmem = endgamefile + 0x100;

        BigEndian::write_u32(&mut self.buf[0..4], MAGIC);
        BigEndian::write_u32(&mut self.buf[4..8], 0x0003_0102);
        BigEndian::write_u32(&mut self.buf[8..12], ramstart);
        BigEndian::write_u32(&mut self.buf[12..16], endgamefile);
        BigEndian::write_u32(&mut self.buf[16..20], origendmem);
        BigEndian::write_u32(&mut self.buf[20..24], 0x1000); // stacksize
        BigEndian::write_u32(&mut self.buf[24..28], self.start);
        BigEndian::write_u32(&mut self.buf[28..32], self.stringtable);
        BigEndian::write_u32(&mut self.buf[32..36], 0);

        let mut sum = 0u32;
        for chunk in self.buf.chunks_exact(4) {
            sum = sum.wrapping_add(BigEndian::read_u32(chunk));
        }
        BigEndian::write_u32(&mut self.buf[32..36], sum);
        self.buf
    }
}

/// Build the image and run it to its first stop.
pub fn run_image(builder: ImageBuilder) -> (Vm, MockGlk, Stop) {
    let file = builder.finish();
    let mut glk = MockGlk::new();
    let (vm, stop) = Vm::init(&file, &VmOptions::default(), &mut glk).expect("image runs");
    (vm, glk, stop)
}

/// Build, run, and hand back only the captured output.
pub fn run_output(builder: ImageBuilder) -> String {
    let (_, glk, _) = run_image(builder);
    glk.output
}
