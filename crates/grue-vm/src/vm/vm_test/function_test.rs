// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Calls, returns, tail calls and argument passing.

use super::{run_image, run_output, A, ImageBuilder};
use crate::bytecode::op;
use crate::vm::Stop;

#[test]
fn call_multiplies_and_returns() {
    let mut b = ImageBuilder::new();

    // F(a, b) { return a * b }
    let f = b.func_locals(2);
    b.instr(op::MUL, &[A::Local(0), A::Local(4), A::Stack]);
    b.instr(op::RETURN, &[A::Stack]);

    let main = b.func_locals(1);
    b.set_start(main);
    b.glk_mode();
    b.instr(op::CALLFII, &[A::Imm(f as i32), A::Imm(6), A::Imm(7), A::Local(0)]);
    b.instr(op::STREAMNUM, &[A::Local(0)]);
    b.instr(op::QUIT, &[]);

    assert_eq!(run_output(b), "42");
}

#[test]
fn stack_args_function_receives_count() {
    let mut b = ImageBuilder::new();

    // A type-0xC0 function: pops the count, then adds the two arguments.
    let f = b.func_stackargs();
    b.instr(op::COPY, &[A::Stack, A::Discard]); // drop argc
    b.instr(op::ADD, &[A::Stack, A::Stack, A::Stack]);
    b.instr(op::RETURN, &[A::Stack]);

    let main = b.func_locals(1);
    b.set_start(main);
    b.glk_mode();
    // call with two stack arguments, pushed then counted
    b.instr(op::COPY, &[A::Imm(30), A::Stack]);
    b.instr(op::COPY, &[A::Imm(12), A::Stack]);
    b.instr(op::CALL, &[A::Imm(f as i32), A::Imm(2), A::Local(0)]);
    b.instr(op::STREAMNUM, &[A::Local(0)]);
    b.instr(op::QUIT, &[]);

    assert_eq!(run_output(b), "42");
}

#[test]
fn tailcall_returns_to_the_original_caller() {
    let mut b = ImageBuilder::new();

    // F { return 9 }
    let f = b.func_locals(0);
    b.instr(op::RETURN, &[A::Imm(9)]);

    // G { tailcall F with 0 args } - G's frame is replaced
    let g = b.func_locals(0);
    b.instr(op::TAILCALL, &[A::Imm(f as i32), A::Imm(0)]);

    let main = b.func_locals(1);
    b.set_start(main);
    b.glk_mode();
    b.instr(op::CALLF, &[A::Imm(g as i32), A::Local(0)]);
    b.instr(op::STREAMNUM, &[A::Local(0)]);
    b.instr(op::QUIT, &[]);

    let (vm, glk, _) = run_image(b);
    assert_eq!(glk.output, "9");
    // Only the start frame remains
    assert_eq!(vm.frames.len(), 1);
}

#[test]
fn extra_arguments_are_dropped() {
    let mut b = ImageBuilder::new();

    // F(a) { return a } with one local, called with three arguments.
    let f = b.func_locals(1);
    b.instr(op::RETURN, &[A::Local(0)]);

    let main = b.func_locals(1);
    b.set_start(main);
    b.glk_mode();
    b.instr(
        op::CALLFIII,
        &[A::Imm(f as i32), A::Imm(5), A::Imm(6), A::Imm(7), A::Local(0)],
    );
    b.instr(op::STREAMNUM, &[A::Local(0)]);
    b.instr(op::QUIT, &[]);

    assert_eq!(run_output(b), "5");
}

#[test]
fn start_function_return_stops_the_machine() {
    let mut b = ImageBuilder::new();
    let main = b.func_locals(0);
    b.set_start(main);
    b.instr(op::RETURN, &[A::Imm(0)]);

    let (vm, _, stop) = run_image(b);
    assert_eq!(stop, Stop::Quit);
    assert!(vm.frames.is_empty());
}

#[test]
fn rom_paths_are_cached_and_reusable() {
    let mut b = ImageBuilder::new();

    // F prints one character through glk.
    let f = b.func_locals(0);
    b.emit_put_char(b'x');
    b.instr(op::RETURN, &[A::Imm(0)]);

    let main = b.func_locals(0);
    b.set_start(main);
    b.glk_mode();
    b.instr(op::CALLF, &[A::Imm(f as i32), A::Discard]);
    b.instr(op::CALLF, &[A::Imm(f as i32), A::Discard]);
    b.instr(op::QUIT, &[]);

    let (vm, glk, _) = run_image(b);
    // Same output twice from the same cached path
    assert_eq!(glk.output, "xx");
    assert!(!vm.paths.is_empty());
}

#[test]
fn call_of_non_function_is_fatal() {
    let mut b = ImageBuilder::new();
    let main = b.func_locals(0);
    b.set_start(main);
    // Address 0x40 holds header bytes, not a function
    b.instr(op::CALLF, &[A::Imm(0x40), A::Discard]);
    b.instr(op::QUIT, &[]);

    let file = b.finish();
    let mut glk = crate::glk::MockGlk::new();
    let err = crate::vm::Vm::init(&file, &crate::vm::VmOptions::default(), &mut glk).unwrap_err();
    assert!(matches!(err, crate::error::VmError::NotAFunction { .. }));
}
