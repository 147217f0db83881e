// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! The virtual machine record and its dispatch loop.
//!
//! All machine state lives in one owning [`Vm`] value: memory, registers,
//! the call stack, the heap, the undo ring, the random stream and every
//! compile cache. Execution is a single non-recursive loop: look up (or
//! compile) the path for the current program counter under the current I/O
//! system, run it, repeat. Control leaves the loop when a host call
//! suspends the machine or the game stops.
//!
//! The host's Glk dispatcher is not part of the record; it is threaded
//! through every execution call, so the same machine can be driven by any
//! host.

pub(crate) mod exec;

#[cfg(test)]
pub(crate) mod vm_test;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use grue_glk::GlkDispatch;

use crate::compiler::{self, step::Path};
use crate::error::VmError;
use crate::func::VmFunc;
use crate::heap::Heap;
use crate::loader::{self, Header};
use crate::memory::MemMap;
use crate::operand::IoSys;
use crate::random::Pcg32;
use crate::stack::StackFrame;
use crate::string::TextEnv;
use crate::undo::{Snapshot, UndoStack, DEFAULT_UNDO_SLOTS};

use exec::Outcome;

/// Interpreter version reported by gestalt selector 1.
const TERP_VERSION: u32 = 0x0000_0100;

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct VmOptions {
    /// Capacity of the undo snapshot ring.
    pub undo_slots: usize,
    /// Fixed random seed for reproducible transcripts; `None` or zero uses
    /// host entropy.
    pub seed: Option<u32>,
    /// Overrides the computed game signature (Blorb packaging).
    pub signature: Option<String>,
}

impl Default for VmOptions {
    fn default() -> Self {
        Self {
            undo_slots: DEFAULT_UNDO_SLOTS,
            seed: None,
            signature: None,
        }
    }
}

/// Lifecycle state of the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmStatus {
    /// Loaded and runnable.
    Ready,
    /// Waiting for the host after a blocking Glk call.
    Suspended,
    /// Stopped for good (quit, start function returned, or a fault).
    Done,
}

/// Why control came back to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stop {
    /// A blocking Glk call suspended the machine; `resume` continues it.
    Suspended,
    /// The machine stopped for good.
    Quit,
}

/// The Glulx virtual machine.
#[derive(Debug)]
pub struct Vm {
    /// The memory map.
    pub(crate) mem: MemMap,
    /// The original image bytes (restart, verify, signature).
    pub(crate) image: Vec<u8>,
    /// The parsed header.
    pub(crate) header: Header,
    /// Program counter: the next instruction to dispatch.
    pub(crate) pc: u32,
    /// Current string decoding table address.
    pub(crate) stringtable: u32,
    /// Current I/O system mode.
    pub(crate) iosysmode: IoSys,
    /// Rock of the I/O system (the filter function address).
    pub(crate) iosysrock: u32,
    /// Protected memory range as `(start, len)`.
    pub(crate) protect: Option<(u32, u32)>,
    /// The call stack.
    pub(crate) frames: Vec<StackFrame>,
    /// The heap allocator.
    pub(crate) heap: Heap,
    /// The undo snapshot ring.
    pub(crate) undo: UndoStack,
    /// The random stream.
    pub(crate) rng: Pcg32,
    /// Memoized ROM functions.
    pub(crate) funcs: HashMap<u32, Arc<VmFunc>>,
    /// Cached ROM paths per `(function, iosysmode, pc)`.
    pub(crate) paths: HashMap<(u32, u8, u32), Arc<Path>>,
    /// Known path entry addresses per function.
    pub(crate) entries: HashMap<u32, HashSet<u32>>,
    /// String decode environments per table address.
    pub(crate) textenvs: HashMap<u32, TextEnv>,
    /// Shared scratch buffer for call arguments.
    pub(crate) tempcallargs: Vec<u32>,
    /// Lifecycle state.
    pub(crate) status: VmStatus,
    /// The game signature.
    pub(crate) sig: String,
}

impl Vm {
    /// Load an image (bare or in a Blorb container), validate it and set
    /// up the start function. Does not execute anything yet.
    pub fn new(file: &[u8], options: &VmOptions) -> Result<Self, VmError> {
        let image = loader::unwrap_container(file)?.to_vec();
        let header = loader::parse_header(&image)?;
        let sig = options
            .signature
            .clone()
            .unwrap_or_else(|| loader::signature(&image));
        let rng = match options.seed {
            Some(seed) if seed != 0 => Pcg32::seeded(u64::from(seed)),
            _ => Pcg32::from_entropy(),
        };

        let mut vm = Self {
            mem: MemMap::new(&image, header.ramstart, header.origendmem),
            image,
            header,
            pc: 0,
            stringtable: header.origstringtable,
            iosysmode: IoSys::Null,
            iosysrock: 0,
            protect: None,
            frames: Vec::new(),
            heap: Heap::new(),
            undo: UndoStack::new(options.undo_slots),
            rng,
            funcs: HashMap::new(),
            paths: HashMap::new(),
            entries: HashMap::new(),
            textenvs: HashMap::new(),
            tempcallargs: Vec::new(),
            status: VmStatus::Ready,
            sig,
        };
        let start = vm.header.startfuncaddr;
        vm.enter_function(start, &[])?;
        Ok(vm)
    }

    /// Load an image and run it until the first suspension point.
    pub fn init<G: GlkDispatch>(
        file: &[u8],
        options: &VmOptions,
        glk: &mut G,
    ) -> Result<(Self, Stop), VmError> {
        let mut vm = Self::new(file, options)?;
        let stop = vm.run(glk)?;
        Ok((vm, stop))
    }

    /// Execute until the machine suspends or stops.
    pub fn run<G: GlkDispatch>(&mut self, glk: &mut G) -> Result<Stop, VmError> {
        if self.status == VmStatus::Done {
            return Ok(Stop::Quit);
        }
        self.status = VmStatus::Ready;
        loop {
            let path = self.path_for_pc()?;
            match exec::run_path(self, glk, &path) {
                Ok(Outcome::Continue) => {}
                Ok(Outcome::Suspend) => {
                    self.status = VmStatus::Suspended;
                    return Ok(Stop::Suspended);
                }
                Ok(Outcome::Quit) => {
                    self.status = VmStatus::Done;
                    return Ok(Stop::Quit);
                }
                Err(err) => {
                    self.status = VmStatus::Done;
                    log::error!("fatal error: {err}");
                    return Err(err);
                }
            }
        }
    }

    /// Re-enter execution after a suspension.
    pub fn resume<G: GlkDispatch>(&mut self, glk: &mut G) -> Result<Stop, VmError> {
        self.run(glk)
    }

    /// Lifecycle state.
    #[must_use]
    pub fn status(&self) -> VmStatus {
        self.status
    }

    /// The game signature (hex of the leading image bytes, or the
    /// configured override).
    #[must_use]
    pub fn signature(&self) -> &str {
        &self.sig
    }

    /// The Glulx version word of the loaded image.
    #[must_use]
    pub fn version(&self) -> u32 {
        self.header.version
    }

    /// The current program counter.
    #[must_use]
    pub fn pc(&self) -> u32 {
        self.pc
    }

    /// The memory map, for host-side inspection.
    #[must_use]
    pub fn memory(&self) -> &MemMap {
        &self.mem
    }

    /// Look up the cached path for the current program counter, compiling
    /// it if needed. RAM code is compiled fresh on every visit.
    fn path_for_pc(&mut self) -> Result<Arc<Path>, VmError> {
        let func_addr = self.frame()?.func.addr;
        let pc = self.pc;
        let mode = self.iosysmode;
        let in_rom = func_addr < self.mem.ramstart();
        let key = (func_addr, mode as u8, pc);
        if in_rom {
            if let Some(path) = self.paths.get(&key) {
                return Ok(path.clone());
            }
        }
        let path = Arc::new(compiler::compile_path(self, func_addr, pc, mode)?);
        if in_rom && path.cacheable {
            self.paths.insert(key, path.clone());
        }
        Ok(path)
    }

    /// Function metadata for `addr`; ROM functions are memoized, RAM
    /// functions are parsed per call.
    pub(crate) fn func_for(&mut self, addr: u32) -> Result<Arc<VmFunc>, VmError> {
        if addr < self.mem.ramstart() {
            if let Some(func) = self.funcs.get(&addr) {
                return Ok(func.clone());
            }
            let func = Arc::new(VmFunc::parse(&self.mem, addr)?);
            self.funcs.insert(addr, func.clone());
            Ok(func)
        } else {
            Ok(Arc::new(VmFunc::parse(&self.mem, addr)?))
        }
    }

    /// The `gestalt` opcode.
    pub(crate) fn gestalt(&self, sel: u32, extra: u32) -> u32 {
        match sel {
            0 => 0x0003_0102,
            1 => TERP_VERSION,
            2 | 3 | 6 | 7 => 1,
            4 => u32::from(extra <= 2),
            5 => 1,
            8 => self.heap.heapstart(),
            _ => 0,
        }
    }

    /// The `restart` opcode: pristine RAM from the image, empty stack,
    /// start function re-entered. The protected range and the undo ring
    /// survive.
    pub(crate) fn vm_restart(&mut self) -> Result<(), VmError> {
        log::info!("restart");
        let protected = self
            .protect
            .map(|(start, len)| (start, self.mem.copy_protected(start, len)));
        self.mem.reset_from(&self.image);
        self.heap = Heap::new();
        self.stringtable = self.header.origstringtable;
        self.iosysmode = IoSys::Null;
        self.iosysrock = 0;
        if let Some((start, bytes)) = protected {
            self.mem.paste_protected(start, &bytes);
        }
        self.frames.clear();
        let start = self.header.startfuncaddr;
        self.enter_function(start, &[])
    }

    /// Capture the mutable machine state for the undo ring.
    pub(crate) fn capture_snapshot(&self) -> Snapshot {
        Snapshot {
            ram: self.mem.ram_snapshot(),
            endmem: self.mem.len(),
            pc: self.pc,
            frames: self.frames.clone(),
            heap: self.heap.clone(),
        }
    }

    /// Apply a snapshot, re-applying the protected range on top.
    pub(crate) fn apply_snapshot(&mut self, snap: Snapshot) -> Result<(), VmError> {
        let protected = self
            .protect
            .map(|(start, len)| (start, self.mem.copy_protected(start, len)));
        self.mem.resize(snap.endmem, true, false)?;
        self.mem.restore_ram(&snap.ram)?;
        self.frames = snap.frames;
        self.pc = snap.pc;
        self.heap = snap.heap;
        if let Some((start, bytes)) = protected {
            self.mem.paste_protected(start, &bytes);
        }
        Ok(())
    }
}
