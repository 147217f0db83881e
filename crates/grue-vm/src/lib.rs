// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! # grue-vm
//!
//! Core of a Glulx virtual machine: the 32-bit stack machine that runs
//! interactive-fiction story files.
//!
//! This crate provides:
//! - Memory image with image loading, validation and checksum verify
//! - Operand decoding and a path compiler with an offstack optimization
//! - Call frames, call stubs, catch/throw and the re-entrant string
//!   printers built on them
//! - Heap allocation inside the memory map, search opcodes, undo
//!   snapshots and a seedable random stream
//!
//! I/O is not part of the core. Every `glk` opcode and every printed
//! character goes through the [`grue_glk::GlkDispatch`] trait the host
//! implements; [`glk::MockGlk`] is a recording implementation for tests
//! and harnesses.
//!
//! ```no_run
//! use grue_vm::{Vm, VmOptions};
//!
//! let file = std::fs::read("story.ulx").unwrap();
//! let mut glk = grue_vm::glk::MockGlk::new();
//! let (vm, stop) = Vm::init(&file, &VmOptions::default(), &mut glk).unwrap();
//! println!("{stop:?} at pc {:#x}: {}", vm.pc(), glk.output);
//! ```

pub mod bytecode;
pub mod compiler;
pub mod error;
pub mod func;
pub mod glk;
pub mod heap;
pub mod loader;
pub mod memory;
pub mod operand;
pub mod random;
pub mod search;
pub mod stack;
pub mod string;
pub mod undo;
pub mod vm;

// Re-export the host-facing surface at the crate root.
pub use error::VmError;
pub use loader::LoadError;
pub use operand::IoSys;
pub use vm::{Stop, Vm, VmOptions, VmStatus};

/// Crate version.
pub const VERSION: &str = match option_env!("GRUE_VERSION") {
    Some(v) => v,
    None => env!("CARGO_PKG_VERSION"),
};
