// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Heap opcodes driven through real images.

use super::{run_image, A, ImageBuilder};
use crate::bytecode::op;
use crate::error::VmError;
use crate::vm::{Vm, VmOptions};

#[test]
fn malloc_free_reuses_the_first_fit_block() {
    let mut b = ImageBuilder::new();
    let main = b.func_locals(3);
    b.set_start(main);
    b.instr(op::MALLOC, &[A::Imm(100), A::Local(0)]);
    b.instr(op::MALLOC, &[A::Imm(50), A::Local(4)]);
    b.instr(op::MFREE, &[A::Local(0)]);
    b.instr(op::MALLOC, &[A::Imm(100), A::Local(8)]);
    b.instr(op::QUIT, &[]);

    let (vm, _, _) = run_image(b);
    let frame = &vm.frames[0];
    let a = frame.read_local(0, 4).unwrap();
    let b_ = frame.read_local(4, 4).unwrap();
    let c = frame.read_local(8, 4).unwrap();
    assert_ne!(a, 0);
    assert_ne!(a, b_);
    // The freed first block is handed out again
    assert_eq!(a, c);
    assert_eq!(vm.heap.block_count(), 2);
}

#[test]
fn heap_count_drops_between_free_and_realloc() {
    let mut b = ImageBuilder::new();
    let main = b.func_locals(2);
    b.set_start(main);
    b.instr(op::MALLOC, &[A::Imm(100), A::Local(0)]);
    b.instr(op::MALLOC, &[A::Imm(50), A::Local(4)]);
    b.instr(op::MFREE, &[A::Local(0)]);
    b.instr(op::QUIT, &[]);

    let (vm, _, _) = run_image(b);
    assert_eq!(vm.heap.block_count(), 1);
    assert!(vm.heap.active());
}

#[test]
fn gestalt_reports_the_heap_start() {
    let mut b = ImageBuilder::new();
    let main = b.func_locals(2);
    b.set_start(main);
    // Before any allocation the heap selector answers 0
    b.instr(op::GESTALT, &[A::Imm(8), A::Imm(0), A::Local(0)]);
    b.instr(op::MALLOC, &[A::Imm(16), A::Discard]);
    b.instr(op::GESTALT, &[A::Imm(8), A::Imm(0), A::Local(4)]);
    b.instr(op::QUIT, &[]);

    let (vm, _, _) = run_image(b);
    let frame = &vm.frames[0];
    assert_eq!(frame.read_local(0, 4).unwrap(), 0);
    assert_eq!(frame.read_local(4, 4).unwrap(), vm.heap.heapstart());
    assert_ne!(vm.heap.heapstart(), 0);
}

#[test]
fn freeing_everything_truncates_memory() {
    let mut b = ImageBuilder::new();
    let main = b.func_locals(2);
    b.set_start(main);
    b.instr(op::GETMEMSIZE, &[A::Local(0)]);
    b.instr(op::MALLOC, &[A::Imm(4096), A::Local(4)]);
    b.instr(op::MFREE, &[A::Local(4)]);
    b.instr(op::QUIT, &[]);

    let (vm, _, _) = run_image(b);
    let before = vm.frames[0].read_local(0, 4).unwrap();
    assert!(!vm.heap.active());
    assert_eq!(vm.mem.len(), before);
}

#[test]
fn freeing_unknown_address_is_heap_corruption() {
    let mut b = ImageBuilder::new();
    let main = b.func_locals(0);
    b.set_start(main);
    b.instr(op::MALLOC, &[A::Imm(16), A::Discard]);
    b.instr(op::MFREE, &[A::Imm(0x44)]);
    b.instr(op::QUIT, &[]);

    let file = b.finish();
    let mut glk = crate::glk::MockGlk::new();
    let err = Vm::init(&file, &VmOptions::default(), &mut glk).unwrap_err();
    assert_eq!(err, VmError::HeapCorruption(0x44));
}

#[test]
fn explicit_resize_fails_while_heap_is_active() {
    let mut b = ImageBuilder::new();
    let main = b.func_locals(0);
    b.set_start(main);
    b.instr(op::MALLOC, &[A::Imm(16), A::Discard]);
    b.instr(op::SETMEMSIZE, &[A::Imm(0x10000), A::Discard]);
    b.instr(op::QUIT, &[]);

    let file = b.finish();
    let mut glk = crate::glk::MockGlk::new();
    let err = Vm::init(&file, &VmOptions::default(), &mut glk).unwrap_err();
    assert_eq!(err, VmError::MemSizeHeapActive);
}
