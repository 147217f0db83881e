// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Arithmetic semantics, end to end and as value-level properties.

use proptest::prelude::*;

use super::{run_image, run_output, A, ImageBuilder};
use crate::bytecode::op;
use crate::compiler::step::{BinOp, UnOp};
use crate::error::VmError;
use crate::vm::exec::{bin_value, un_value};
use crate::vm::Stop;

#[test]
fn add_and_streamnum() {
    let mut b = ImageBuilder::new();
    let main = b.func_locals(1);
    b.set_start(main);
    b.glk_mode();
    b.instr(op::ADD, &[A::Imm(7), A::Imm(5), A::Local(0)]);
    b.instr(op::STREAMNUM, &[A::Local(0)]);
    b.instr(op::QUIT, &[]);

    let (_, glk, stop) = run_image(b);
    assert_eq!(glk.output, "12");
    assert_eq!(stop, Stop::Quit);
}

#[test]
fn signed_divide_rounds_toward_zero() {
    let mut b = ImageBuilder::new();
    let main = b.func_locals(1);
    b.set_start(main);
    b.glk_mode();
    b.instr(op::DIV, &[A::Imm(-7), A::Imm(2), A::Local(0)]);
    b.instr(op::STREAMNUM, &[A::Local(0)]);
    b.instr(op::QUIT, &[]);

    assert_eq!(run_output(b), "-3");
}

#[test]
fn signed_divide_through_locals() {
    // Same computation, but through a local so the division runs at
    // execution time instead of being folded away.
    let mut b = ImageBuilder::new();
    let main = b.func_locals(2);
    b.set_start(main);
    b.glk_mode();
    b.instr(op::COPY, &[A::Imm(-7), A::Local(0)]);
    b.instr(op::DIV, &[A::Local(0), A::Imm(2), A::Local(4)]);
    b.instr(op::STREAMNUM, &[A::Local(4)]);
    b.instr(op::QUIT, &[]);

    assert_eq!(run_output(b), "-3");
}

#[test]
fn modulo_sign_follows_dividend() {
    let mut b = ImageBuilder::new();
    let main = b.func_locals(1);
    b.set_start(main);
    b.glk_mode();
    b.instr(op::COPY, &[A::Imm(-7), A::Local(0)]);
    b.instr(op::MOD, &[A::Local(0), A::Imm(2), A::Stack]);
    b.instr(op::STREAMNUM, &[A::Stack]);
    b.instr(op::QUIT, &[]);

    assert_eq!(run_output(b), "-1");
}

#[test]
fn division_by_zero_is_fatal() {
    let mut b = ImageBuilder::new();
    let main = b.func_locals(1);
    b.set_start(main);
    b.instr(op::COPY, &[A::Imm(0), A::Local(0)]);
    b.instr(op::DIV, &[A::Imm(1), A::Local(0), A::Stack]);
    b.instr(op::QUIT, &[]);

    let file = b.finish();
    let mut glk = crate::glk::MockGlk::new();
    let err = crate::vm::Vm::init(&file, &crate::vm::VmOptions::default(), &mut glk).unwrap_err();
    assert_eq!(err, VmError::DivisionByZero);
}

#[test]
fn wrapping_arithmetic_end_to_end() {
    let mut b = ImageBuilder::new();
    let main = b.func_locals(1);
    b.set_start(main);
    b.glk_mode();
    // 0x7FFFFFFF + 1 wraps to the most negative value
    b.instr(op::ADD, &[A::Imm(0x7FFF_FFFF), A::Imm(1), A::Local(0)]);
    b.instr(op::STREAMNUM, &[A::Local(0)]);
    b.instr(op::QUIT, &[]);

    assert_eq!(run_output(b), "-2147483648");
}

#[test]
fn sign_extension_opcodes() {
    let mut b = ImageBuilder::new();
    let main = b.func_locals(1);
    b.set_start(main);
    b.glk_mode();
    b.instr(op::COPY, &[A::Imm(0xFFFF), A::Local(0)]);
    b.instr(op::SEXS, &[A::Local(0), A::Stack]);
    b.instr(op::STREAMNUM, &[A::Stack]);
    b.instr(op::QUIT, &[]);

    assert_eq!(run_output(b), "-1");
}

proptest! {
    #[test]
    fn results_are_truncated_to_32_bits(a: u32, b: u32) {
        prop_assert_eq!(bin_value(BinOp::Add, a, b).unwrap(), (u64::from(a) + u64::from(b)) as u32);
        prop_assert_eq!(bin_value(BinOp::Sub, a, b).unwrap(), a.wrapping_sub(b));
        prop_assert_eq!(
            bin_value(BinOp::Mul, a, b).unwrap(),
            (u64::from(a).wrapping_mul(u64::from(b))) as u32
        );
    }

    #[test]
    fn division_truncates_toward_zero(a: i32, b in prop::num::i32::ANY.prop_filter("nonzero", |b| *b != 0)) {
        let got = bin_value(BinOp::Div, a as u32, b as u32).unwrap();
        prop_assert_eq!(got, a.wrapping_div(b) as u32);
        let rem = bin_value(BinOp::Mod, a as u32, b as u32).unwrap() as i32;
        // The remainder's sign follows the dividend
        if rem != 0 {
            prop_assert_eq!(rem < 0, a < 0);
        }
    }

    #[test]
    fn shifts_saturate_at_32(a: u32, by in 32u32..) {
        prop_assert_eq!(bin_value(BinOp::ShiftL, a, by).unwrap(), 0);
        prop_assert_eq!(bin_value(BinOp::UShiftR, a, by).unwrap(), 0);
        let fill = if (a as i32) < 0 { u32::MAX } else { 0 };
        prop_assert_eq!(bin_value(BinOp::SShiftR, a, by).unwrap(), fill);
    }

    #[test]
    fn involution_laws(x: u32) {
        prop_assert_eq!(un_value(UnOp::BitNot, un_value(UnOp::BitNot, x)), x);
        prop_assert_eq!(un_value(UnOp::Neg, un_value(UnOp::Neg, x)), x);
        // Sign extension is idempotent
        let s = un_value(UnOp::SexS, x);
        prop_assert_eq!(un_value(UnOp::SexS, s), s);
        let b = un_value(UnOp::SexB, x);
        prop_assert_eq!(un_value(UnOp::SexB, b), b);
    }
}
