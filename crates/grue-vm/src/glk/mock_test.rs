// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Tests for the mock dispatcher and the output helpers.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use grue_glk::{selector, GlkDispatch, GlkResult};

use super::{put_char, put_char_uni, put_literal, MockGlk};
use crate::error::VmError;

#[test]
fn captures_character_output() {
    let mut glk = MockGlk::new();
    put_char(&mut glk, u32::from(b'h')).unwrap();
    put_char(&mut glk, u32::from(b'i')).unwrap();
    put_char_uni(&mut glk, 0x263A).unwrap();
    assert_eq!(glk.output, "hi\u{263A}");
    assert_eq!(glk.calls.len(), 3);
}

#[test]
fn put_char_truncates_to_latin1() {
    let mut glk = MockGlk::new();
    put_char(&mut glk, 0x1FF).unwrap();
    assert_eq!(glk.calls[0], (selector::PUT_CHAR, vec![0xFF]));
}

#[test]
fn literal_output_picks_the_narrow_call() {
    let mut glk = MockGlk::new();
    put_literal(&mut glk, "aé\u{263A}").unwrap();
    assert_eq!(glk.calls[0].0, selector::PUT_CHAR);
    assert_eq!(glk.calls[1].0, selector::PUT_CHAR);
    assert_eq!(glk.calls[2].0, selector::PUT_CHAR_UNI);
    assert_eq!(glk.output, "aé\u{263A}");
}

#[test]
fn blocking_selectors_suspend() {
    let mut glk = MockGlk::new();
    assert_eq!(glk.call(selector::SELECT, &[0]), GlkResult::DidNotReturn);
    assert!(glk.may_not_return(selector::EXIT));
    assert!(!glk.may_not_return(selector::PUT_CHAR));
}

#[test]
fn suspension_on_output_is_a_fault() {
    let mut glk = MockGlk::new();
    glk.blocking.push(selector::PUT_CHAR);
    assert_eq!(
        put_char(&mut glk, 65),
        Err(VmError::GlkFailure {
            selector: selector::PUT_CHAR
        })
    );
}
