// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Recording Glk dispatcher for tests and harnesses.

use grue_glk::{selector, GlkDispatch, GlkResult};

/// A dispatcher that records every call, captures character output and
/// suspends on the configured selectors.
#[derive(Debug, Default)]
pub struct MockGlk {
    /// Every dispatched `(selector, args)` pair in order.
    pub calls: Vec<(u32, Vec<u32>)>,
    /// Captured output from the character selectors.
    pub output: String,
    /// Selectors answered with `DidNotReturn` (defaults to select/exit).
    pub blocking: Vec<u32>,
    /// Result value for non-blocking, non-output selectors.
    pub result: u32,
}

impl MockGlk {
    /// A mock that blocks on `glk_select` and `glk_exit`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            blocking: vec![selector::SELECT, selector::EXIT],
            ..Self::default()
        }
    }

    /// Drain the captured output.
    pub fn take_output(&mut self) -> String {
        core::mem::take(&mut self.output)
    }
}

impl GlkDispatch for MockGlk {
    fn call(&mut self, sel: u32, args: &[u32]) -> GlkResult {
        self.calls.push((sel, args.to_vec()));
        if self.blocking.contains(&sel) {
            return GlkResult::DidNotReturn;
        }
        match sel {
            selector::PUT_CHAR => {
                self.output.push(char::from(args.first().copied().unwrap_or(0) as u8));
                GlkResult::Value(0)
            }
            selector::PUT_CHAR_UNI => {
                let ch = char::from_u32(args.first().copied().unwrap_or(0))
                    .unwrap_or(char::REPLACEMENT_CHARACTER);
                self.output.push(ch);
                GlkResult::Value(0)
            }
            _ => GlkResult::Value(self.result),
        }
    }

    fn may_not_return(&self, sel: u32) -> bool {
        self.blocking.contains(&sel)
    }
}
