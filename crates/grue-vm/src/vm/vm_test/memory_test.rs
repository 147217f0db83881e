// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Memory opcodes, restart and the protected range, end to end.

use super::{run_image, run_output, A, ImageBuilder};
use crate::bytecode::op;

#[test]
fn array_loads_and_stores() {
    let mut b = ImageBuilder::new();
    b.mark_ramstart();
    let data = b.pos() as i32;
    b.word(0);
    b.word(0);
    let main = b.func_locals(1);
    b.set_start(main);
    b.glk_mode();
    b.instr(op::ASTORE, &[A::Imm(data), A::Imm(1), A::Imm(0x0102_0304)]);
    b.instr(op::ALOADB, &[A::Imm(data), A::Imm(5), A::Local(0)]);
    b.instr(op::STREAMNUM, &[A::Local(0)]);
    b.instr(op::ALOADS, &[A::Imm(data), A::Imm(3), A::Stack]);
    b.instr(op::STREAMNUM, &[A::Stack]);
    b.instr(op::QUIT, &[]);

    // aloadb index 5 = second byte of the stored word (0x02);
    // aloads index 3 = its low half (0x0304 = 772)
    assert_eq!(run_output(b), "2772");
}

#[test]
fn bit_addressing_is_signed() {
    let mut b = ImageBuilder::new();
    b.mark_ramstart();
    let data = b.pos() as i32;
    b.word(0);
    b.word(0);
    let main = b.func_locals(0);
    b.set_start(main);
    b.glk_mode();
    // Bit -7 counted from data+2 is bit 1 of the byte at data+1
    b.instr(op::ASTOREBIT, &[A::Imm(data + 2), A::Imm(-7), A::Imm(1)]);
    b.instr(op::ALOADB, &[A::Imm(data), A::Imm(1), A::Stack]);
    b.instr(op::STREAMNUM, &[A::Stack]);
    b.instr(op::ALOADBIT, &[A::Imm(data + 2), A::Imm(-7), A::Stack]);
    b.instr(op::STREAMNUM, &[A::Stack]);
    b.instr(op::QUIT, &[]);

    assert_eq!(run_output(b), "21");
}

#[test]
fn mzero_and_mcopy() {
    let mut b = ImageBuilder::new();
    b.mark_ramstart();
    let data = b.pos() as i32;
    b.bytes(&[1, 2, 3, 4, 5, 6, 7, 8]);
    let main = b.func_locals(0);
    b.set_start(main);
    b.glk_mode();
    // Overlapping forward copy: bytes become 1 2 1 2 3 4 7 8
    b.instr(op::MCOPY, &[A::Imm(4), A::Imm(data), A::Imm(data + 2)]);
    b.instr(op::ALOADB, &[A::Imm(data), A::Imm(5), A::Stack]);
    b.instr(op::STREAMNUM, &[A::Stack]);
    b.instr(op::MZERO, &[A::Imm(2), A::Imm(data)]);
    b.instr(op::ALOADB, &[A::Imm(data), A::Imm(0), A::Stack]);
    b.instr(op::STREAMNUM, &[A::Stack]);
    b.instr(op::QUIT, &[]);

    assert_eq!(run_output(b), "40");
}

#[test]
fn getmemsize_and_setmemsize() {
    let mut b = ImageBuilder::new();
    let main = b.func_locals(2);
    b.set_start(main);
    b.glk_mode();
    b.instr(op::GETMEMSIZE, &[A::Local(0)]);
    b.instr(op::ADD, &[A::Local(0), A::Imm(0x200), A::Stack]);
    b.instr(op::SETMEMSIZE, &[A::Stack, A::Local(4)]);
    b.instr(op::STREAMNUM, &[A::Local(4)]);
    b.instr(op::QUIT, &[]);

    let (vm, glk, _) = run_image(b);
    // setmemsize reports success...
    assert_eq!(glk.output, "0");
    // ...and the map actually grew by 0x200 over the original size
    assert_eq!(vm.mem.len(), vm.mem.origendmem() + 0x200);
}

#[test]
fn restart_preserves_only_the_protected_range() {
    let mut b = ImageBuilder::new();
    b.mark_ramstart();
    let flag = b.pos();
    b.word(0);
    let main = b.func_locals(0);
    b.set_start(main);
    b.glk_mode();
    // If the flag survived a restart, finish; otherwise set and protect
    // it, then restart.
    let jnz_next = b.instr(op::JNZ, &[A::Mem(flag), A::Imm4(0)]);
    b.instr(op::ASTORE, &[A::Imm(flag as i32), A::Imm(0), A::Imm(1)]);
    b.instr(op::PROTECT, &[A::Imm(flag as i32), A::Imm(4)]);
    b.instr(op::RESTART, &[]);

    let done = b.pos();
    b.patch_branch(jnz_next, done);
    b.instr(op::STREAMNUM, &[A::Imm(7)]);
    b.instr(op::QUIT, &[]);

    assert_eq!(run_output(b), "7");
}
