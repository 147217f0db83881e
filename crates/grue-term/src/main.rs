// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Minimal terminal front-end.
//!
//! Loads a story file (bare `.ulx` or Blorb-wrapped), runs it with an
//! output-only Glk dispatcher over stdout, and exits when the game quits
//! or blocks on input. Input plumbing needs a real Glk implementation and
//! is deliberately out of scope here.

use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use grue_glk::{selector, GlkDispatch, GlkResult};
use grue_vm::{Stop, Vm, VmOptions};

/// Run a Glulx story file on a dumb terminal.
#[derive(Parser, Debug)]
#[command(name = "grue", version = grue_vm::VERSION)]
struct Args {
    /// The story file (.ulx or .gblorb).
    story: PathBuf,

    /// Fixed random seed for reproducible runs.
    #[arg(long)]
    seed: Option<u32>,

    /// Print the game signature and exit.
    #[arg(long)]
    signature: bool,
}

/// Output-only Glk: characters go to stdout, blocking calls suspend.
#[derive(Default)]
struct TermGlk {
    out: Vec<u8>,
}

impl TermGlk {
    fn flush(&mut self) {
        if !self.out.is_empty() {
            let _ = std::io::stdout().write_all(&self.out);
            let _ = std::io::stdout().flush();
            self.out.clear();
        }
    }
}

impl GlkDispatch for TermGlk {
    fn call(&mut self, sel: u32, args: &[u32]) -> GlkResult {
        match sel {
            selector::PUT_CHAR => {
                self.out.push(args.first().copied().unwrap_or(0) as u8);
                GlkResult::Value(0)
            }
            selector::PUT_CHAR_UNI => {
                let ch = char::from_u32(args.first().copied().unwrap_or(0))
                    .unwrap_or(char::REPLACEMENT_CHARACTER);
                let mut buf = [0u8; 4];
                self.out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
                GlkResult::Value(0)
            }
            selector::EXIT | selector::SELECT => GlkResult::DidNotReturn,
            _ => {
                log::debug!("unimplemented glk selector {sel:#x}, returning 0");
                GlkResult::Value(0)
            }
        }
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let file = std::fs::read(&args.story)
        .with_context(|| format!("reading {}", args.story.display()))?;

    let options = VmOptions {
        seed: args.seed,
        ..VmOptions::default()
    };

    if args.signature {
        let vm = Vm::new(&file, &options)?;
        println!("{}", vm.signature());
        return Ok(());
    }

    let mut glk = TermGlk::default();
    let (_, stop) = Vm::init(&file, &options, &mut glk)?;
    glk.flush();

    match stop {
        Stop::Quit => {}
        Stop::Suspended => {
            eprintln!();
            eprintln!("[the game is waiting for input; this front-end is output-only]");
        }
    }
    Ok(())
}
