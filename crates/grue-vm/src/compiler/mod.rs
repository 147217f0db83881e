// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! The path compiler.
//!
//! A path is one linear run of opcodes compiled into typed micro-
//! instructions (see [`step`]). Compilation starts at a program counter and
//! stops at anything that transfers control non-locally - returns, calls,
//! unconditional jumps, quit/restart, undo traffic, glk calls, string
//! printing that can suspend - or when it reaches an address already known
//! to be a path entry.
//!
//! The compiler tracks an *offstack*: values that logically sit on top of
//! the value stack but have not been pushed yet, as constants or path
//! temporaries. A push-mode store feeds the offstack, a pop-mode load
//! consumes it, and a push/pop pair compiles to nothing at all. Before any
//! step that observes the real stack the offstack is unloaded (pushed in
//! order); where control leaves the current frame for good it is simply
//! discarded.
//!
//! Paths compiled for functions below `ramstart` are cached per
//! `(function, iosysmode, pc)`; RAM may change under the compiler's feet,
//! so RAM paths are rebuilt on every visit. A `setiosys` with a constant
//! mode switches the compiler's own mode and continues; a dynamic one ends
//! the path uncacheable.

pub mod step;


use std::collections::HashSet;

use crate::bytecode::{self, op};
use crate::error::VmError;
use crate::memory::MemMap;
use crate::operand::{DestType, InstrDecoder, IoSys, LoadOperand, StoreOperand};
use crate::vm::Vm;

use step::{ArgList, BinOp, BranchDest, Cond, Dst, Path, Src, Step, UnOp};

/// Argument-count limit for harvesting call/glk arguments at compile time.
const MAX_KNOWN_ARGS: u32 = 16;

/// One offstack entry: a value not yet pushed for real.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OffEntry {
    /// A constant.
    Const(u32),
    /// A path temporary.
    Temp(u16),
}

impl OffEntry {
    fn src(self) -> Src {
        match self {
            Self::Const(v) => Src::Imm(v),
            Self::Temp(t) => Src::Temp(t),
        }
    }
}

/// Compile the path starting at `start` in the function at `func_addr`.
pub(crate) fn compile_path(
    vm: &mut Vm,
    func_addr: u32,
    start: u32,
    mode: IoSys,
) -> Result<Path, VmError> {
    log::trace!("compiling path at {start:#x} (iosys {mode:?})");
    let Vm {
        ref mem,
        ref mut entries,
        ..
    } = *vm;
    let entries = entries.entry(func_addr).or_default();

    let mut compiler = Compiler {
        mem,
        entries,
        mode,
        pc: start,
        steps: Vec::new(),
        offstack: Vec::new(),
        ntemps: 0,
        cacheable: true,
        done: false,
    };
    while !compiler.done {
        if compiler.pc != start && compiler.entries.contains(&compiler.pc) {
            // Fall-through into another path: hand over cleanly.
            let target = compiler.pc;
            compiler.unload_offstack();
            compiler.emit(Step::Jump {
                dest: BranchDest::Const(target),
            });
            break;
        }
        compiler.compile_instr()?;
    }
    Ok(Path {
        start,
        steps: compiler.steps,
        ntemps: compiler.ntemps as usize,
        cacheable: compiler.cacheable,
    })
}

struct Compiler<'a> {
    mem: &'a MemMap,
    entries: &'a mut HashSet<u32>,
    mode: IoSys,
    pc: u32,
    steps: Vec<Step>,
    offstack: Vec<OffEntry>,
    ntemps: u16,
    cacheable: bool,
    done: bool,
}

impl Compiler<'_> {
    fn emit(&mut self, step: Step) {
        self.steps.push(step);
    }

    fn temp(&mut self) -> u16 {
        let t = self.ntemps;
        self.ntemps += 1;
        t
    }

    fn register_entry(&mut self, target: u32) {
        self.entries.insert(target);
    }

    /// Turn a decoded load into a step source, consuming the offstack for
    /// pop-mode operands.
    fn src_of(&mut self, operand: LoadOperand) -> Src {
        match operand {
            LoadOperand::Const(v) => Src::Imm(v),
            LoadOperand::Mem { addr, width } => Src::Mem { addr, width },
            LoadOperand::Local { off, width } => Src::Local { off, width },
            LoadOperand::Pop => match self.offstack.pop() {
                Some(entry) => entry.src(),
                None => Src::Pop,
            },
        }
    }

    /// Push every pending offstack entry for real, in order.
    fn unload_offstack(&mut self) {
        let entries: Vec<OffEntry> = self.offstack.drain(..).collect();
        for entry in entries {
            self.emit(Step::Push { src: entry.src() });
        }
    }

    /// Drop the offstack without pushing: the frame is going away.
    fn discard_offstack(&mut self) {
        self.offstack.clear();
    }

    /// Emit a computed result into a store operand, routing push-mode
    /// stores through a fresh temporary onto the offstack.
    fn emit_store(&mut self, store: StoreOperand, make: impl FnOnce(Dst) -> Step) {
        match store {
            StoreOperand::Discard => self.emit(make(Dst::Discard)),
            StoreOperand::Mem { addr, width } => self.emit(make(Dst::Mem { addr, width })),
            StoreOperand::Local { off, width } => self.emit(make(Dst::Local { off, width })),
            StoreOperand::Push => {
                let t = self.temp();
                self.emit(make(Dst::Temp(t)));
                self.offstack.push(OffEntry::Temp(t));
            }
        }
    }

    /// Deliver a compile-time constant into a store operand without
    /// emitting a computation.
    fn emit_const(&mut self, store: StoreOperand, val: u32) {
        match store {
            StoreOperand::Discard => {}
            StoreOperand::Mem { addr, width } => self.emit(Step::Copy {
                src: Src::Imm(val),
                dst: Dst::Mem { addr, width },
            }),
            StoreOperand::Local { off, width } => self.emit(Step::Copy {
                src: Src::Imm(val),
                dst: Dst::Local { off, width },
            }),
            StoreOperand::Push => self.offstack.push(OffEntry::Const(val)),
        }
    }

    /// Map a store operand straight to a destination. Only valid after the
    /// offstack has been unloaded (a direct push must not bypass it).
    fn direct_dst(store: StoreOperand) -> Dst {
        match store {
            StoreOperand::Discard => Dst::Discard,
            StoreOperand::Mem { addr, width } => Dst::Mem { addr, width },
            StoreOperand::Local { off, width } => Dst::Local { off, width },
            StoreOperand::Push => Dst::Push,
        }
    }

    /// Emit a discard for a source whose evaluation has a side effect.
    fn discard_src(&mut self, src: Src) {
        if matches!(src, Src::Pop) {
            self.emit(Step::Copy {
                src,
                dst: Dst::Discard,
            });
        }
    }

    fn compile_instr(&mut self) -> Result<(), VmError> {
        let instr_pc = self.pc;
        let (opcode, operands_pc) = bytecode::fetch_opcode(self.mem, instr_pc)?;
        let sig = bytecode::signature(opcode).ok_or(VmError::InvalidOpcode {
            pc: instr_pc,
            opcode,
        })?;
        let mut d = InstrDecoder::new(self.mem, instr_pc, operands_pc, sig.args.len())?;

        match opcode {
            op::NOP => {}

            op::ADD => self.bin_op(BinOp::Add, &mut d)?,
            op::SUB => self.bin_op(BinOp::Sub, &mut d)?,
            op::MUL => self.bin_op(BinOp::Mul, &mut d)?,
            op::DIV => self.bin_op(BinOp::Div, &mut d)?,
            op::MOD => self.bin_op(BinOp::Mod, &mut d)?,
            op::BITAND => self.bin_op(BinOp::And, &mut d)?,
            op::BITOR => self.bin_op(BinOp::Or, &mut d)?,
            op::BITXOR => self.bin_op(BinOp::Xor, &mut d)?,
            op::SHIFTL => self.bin_op(BinOp::ShiftL, &mut d)?,
            op::SSHIFTR => self.bin_op(BinOp::SShiftR, &mut d)?,
            op::USHIFTR => self.bin_op(BinOp::UShiftR, &mut d)?,

            op::NEG => self.un_op(UnOp::Neg, &mut d)?,
            op::BITNOT => self.un_op(UnOp::BitNot, &mut d)?,
            op::SEXS => self.un_op(UnOp::SexS, &mut d)?,
            op::SEXB => self.un_op(UnOp::SexB, &mut d)?,

            op::JUMP => {
                let offset = d.next_load(4)?;
                let next_pc = d.pc;
                self.compile_branch(None, offset, next_pc);
            }
            op::JZ | op::JNZ => {
                let a = self.src_of(d.next_load(4)?);
                let offset = d.next_load(4)?;
                let next_pc = d.pc;
                let cond = if opcode == op::JZ { Cond::Eq } else { Cond::Ne };
                self.compile_branch(Some((cond, a, Src::Imm(0))), offset, next_pc);
            }
            op::JEQ | op::JNE | op::JLT | op::JGE | op::JGT | op::JLE | op::JLTU | op::JGEU
            | op::JGTU | op::JLEU => {
                let a = self.src_of(d.next_load(4)?);
                let b = self.src_of(d.next_load(4)?);
                let offset = d.next_load(4)?;
                let next_pc = d.pc;
                let cond = match opcode {
                    op::JEQ => Cond::Eq,
                    op::JNE => Cond::Ne,
                    op::JLT => Cond::LtS,
                    op::JGE => Cond::GeS,
                    op::JGT => Cond::GtS,
                    op::JLE => Cond::LeS,
                    op::JLTU => Cond::LtU,
                    op::JGEU => Cond::GeU,
                    op::JGTU => Cond::GtU,
                    _ => Cond::LeU,
                };
                self.compile_branch(Some((cond, a, b)), offset, next_pc);
            }
            op::JUMPABS => {
                match d.next_load(4)? {
                    LoadOperand::Const(target) => {
                        self.register_entry(target);
                        self.unload_offstack();
                        self.emit(Step::Jump {
                            dest: BranchDest::Const(target),
                        });
                    }
                    other => {
                        let target = self.src_of(other);
                        self.unload_offstack();
                        self.emit(Step::Jump {
                            dest: BranchDest::Abs(target),
                        });
                    }
                }
                self.done = true;
            }

            op::CALL => self.call_op(&mut d, true, false)?,
            op::TAILCALL => self.call_op(&mut d, false, true)?,
            op::CALLF => self.callf_op(&mut d, 0)?,
            op::CALLFI => self.callf_op(&mut d, 1)?,
            op::CALLFII => self.callf_op(&mut d, 2)?,
            op::CALLFIII => self.callf_op(&mut d, 3)?,

            op::RETURN => {
                let src = self.src_of(d.next_load(4)?);
                self.discard_offstack();
                self.emit(Step::Return { src });
                self.done = true;
            }
            op::CATCH => {
                let (desttype, destaddr) = d.next_stub()?;
                let offset = self.src_of(d.next_load(4)?);
                let next_pc = d.pc;
                if let Src::Imm(k) = offset {
                    if k != 0 && k != 1 {
                        self.register_entry(next_pc.wrapping_add(k).wrapping_sub(2));
                    }
                }
                self.unload_offstack();
                self.emit(Step::Catch {
                    desttype: desttype as u32,
                    destaddr,
                    offset,
                    next_pc,
                });
                self.done = true;
            }
            op::THROW => {
                let value = self.src_of(d.next_load(4)?);
                let token = self.src_of(d.next_load(4)?);
                self.unload_offstack();
                self.emit(Step::Throw { value, token });
                self.done = true;
            }

            op::COPY => self.copy_op(&mut d, 4)?,
            op::COPYS => self.copy_op(&mut d, 2)?,
            op::COPYB => self.copy_op(&mut d, 1)?,

            op::ALOAD | op::ALOADS | op::ALOADB => {
                let width = match opcode {
                    op::ALOAD => 4,
                    op::ALOADS => 2,
                    _ => 1,
                };
                let base = self.src_of(d.next_load(4)?);
                let index = self.src_of(d.next_load(4)?);
                let store = d.next_store(4)?;
                self.emit_store(store, |dst| Step::ALoad {
                    base,
                    index,
                    width,
                    dst,
                });
            }
            op::ALOADBIT => {
                let base = self.src_of(d.next_load(4)?);
                let index = self.src_of(d.next_load(4)?);
                let store = d.next_store(4)?;
                self.emit_store(store, |dst| Step::ALoadBit { base, index, dst });
            }
            op::ASTORE | op::ASTORES | op::ASTOREB => {
                let width = match opcode {
                    op::ASTORE => 4,
                    op::ASTORES => 2,
                    _ => 1,
                };
                let base = self.src_of(d.next_load(4)?);
                let index = self.src_of(d.next_load(4)?);
                let val = self.src_of(d.next_load(4)?);
                self.emit(Step::AStore {
                    base,
                    index,
                    width,
                    val,
                });
            }
            op::ASTOREBIT => {
                let base = self.src_of(d.next_load(4)?);
                let index = self.src_of(d.next_load(4)?);
                let val = self.src_of(d.next_load(4)?);
                self.emit(Step::AStoreBit { base, index, val });
            }

            op::STKCOUNT => {
                let store = d.next_store(4)?;
                let extra = self.offstack.len() as u32;
                self.emit_store(store, |dst| Step::StkCount { extra, dst });
            }
            op::STKPEEK => self.stkpeek_op(&mut d)?,
            op::STKSWAP => {
                if self.offstack.len() >= 2 {
                    let len = self.offstack.len();
                    self.offstack.swap(len - 1, len - 2);
                } else {
                    self.unload_offstack();
                    self.emit(Step::StkSwap);
                }
            }
            op::STKROLL => {
                let count = self.src_of(d.next_load(4)?);
                let shift = self.src_of(d.next_load(4)?);
                self.unload_offstack();
                self.emit(Step::StkRoll { count, shift });
            }
            op::STKCOPY => self.stkcopy_op(&mut d)?,

            op::STREAMCHAR | op::STREAMUNICHAR => {
                let src = self.src_of(d.next_load(4)?);
                let next_pc = d.pc;
                let unicode = opcode == op::STREAMUNICHAR;
                if self.mode == IoSys::Null {
                    self.discard_src(src);
                } else {
                    self.unload_offstack();
                    self.emit(Step::StreamChar {
                        src,
                        next_pc,
                        unicode,
                    });
                    if self.mode == IoSys::Filter {
                        self.done = true;
                    }
                }
            }
            op::STREAMNUM => {
                let src = self.src_of(d.next_load(4)?);
                let next_pc = d.pc;
                if self.mode == IoSys::Null {
                    self.discard_src(src);
                } else {
                    self.unload_offstack();
                    self.emit(Step::StreamNum { src, next_pc });
                    if self.mode == IoSys::Filter {
                        self.done = true;
                    }
                }
            }
            op::STREAMSTR => {
                // Strings can invoke sub-functions in every mode, so the
                // path always ends here.
                let src = self.src_of(d.next_load(4)?);
                let next_pc = d.pc;
                self.unload_offstack();
                self.emit(Step::StreamStr { src, next_pc });
                self.done = true;
            }

            op::GESTALT => {
                let sel = self.src_of(d.next_load(4)?);
                let extra = self.src_of(d.next_load(4)?);
                let store = d.next_store(4)?;
                self.emit_store(store, |dst| Step::Gestalt { sel, extra, dst });
            }
            op::DEBUGTRAP => {
                let src = self.src_of(d.next_load(4)?);
                self.emit(Step::DebugTrap { src });
                self.done = true;
            }
            op::GETMEMSIZE => {
                let store = d.next_store(4)?;
                self.emit_store(store, |dst| Step::GetMemSize { dst });
            }
            op::SETMEMSIZE => {
                let size = self.src_of(d.next_load(4)?);
                let store = d.next_store(4)?;
                self.emit_store(store, |dst| Step::SetMemSize { size, dst });
            }

            op::RANDOM => {
                let range = self.src_of(d.next_load(4)?);
                let store = d.next_store(4)?;
                self.emit_store(store, |dst| Step::Random { range, dst });
            }
            op::SETRANDOM => {
                let seed = self.src_of(d.next_load(4)?);
                self.emit(Step::SetRandom { seed });
            }

            op::QUIT => {
                self.discard_offstack();
                self.emit(Step::Quit);
                self.done = true;
            }
            op::RESTART => {
                self.discard_offstack();
                self.emit(Step::Restart);
                self.done = true;
            }
            op::VERIFY => {
                let store = d.next_store(4)?;
                self.unload_offstack();
                self.emit_store(store, |dst| Step::Verify { dst });
            }
            op::SAVE | op::RESTORE => {
                // Real save/restore is host territory; report failure.
                let stream = self.src_of(d.next_load(4)?);
                self.discard_src(stream);
                let store = d.next_store(4)?;
                log::warn!("save/restore is not wired to external storage, reporting failure");
                self.emit_const(store, 1);
            }
            op::SAVEUNDO => {
                let (desttype, destaddr) = d.next_stub()?;
                let next_pc = d.pc;
                self.unload_offstack();
                self.emit(Step::SaveUndo {
                    desttype: desttype as u32,
                    destaddr,
                    next_pc,
                });
                self.done = true;
            }
            op::RESTOREUNDO => {
                let (desttype, destaddr) = d.next_stub()?;
                let next_pc = d.pc;
                self.unload_offstack();
                self.emit(Step::RestoreUndo {
                    desttype: desttype as u32,
                    destaddr,
                    next_pc,
                });
                self.done = true;
            }
            op::PROTECT => {
                let start = self.src_of(d.next_load(4)?);
                let len = self.src_of(d.next_load(4)?);
                self.emit(Step::Protect { start, len });
            }

            op::GLK => {
                let selector = self.src_of(d.next_load(4)?);
                let args = self.arg_list(&mut d)?;
                let store = d.next_store(4)?;
                let next_pc = d.pc;
                self.unload_offstack();
                self.emit(Step::Glk {
                    selector,
                    args,
                    dst: Self::direct_dst(store),
                    next_pc,
                });
                self.done = true;
            }

            op::GETSTRINGTBL => {
                let store = d.next_store(4)?;
                self.emit_store(store, |dst| Step::GetStringTbl { dst });
            }
            op::SETSTRINGTBL => {
                let src = self.src_of(d.next_load(4)?);
                self.emit(Step::SetStringTbl { src });
            }
            op::GETIOSYS => {
                let mode_store = d.next_store(4)?;
                let rock_store = d.next_store(4)?;
                self.unload_offstack();
                self.emit(Step::GetIoSys {
                    mode_dst: Self::direct_dst(mode_store),
                    rock_dst: Self::direct_dst(rock_store),
                });
            }
            op::SETIOSYS => {
                let mode = self.src_of(d.next_load(4)?);
                let rock = self.src_of(d.next_load(4)?);
                let next_pc = d.pc;
                self.unload_offstack();
                self.emit(Step::SetIoSys { mode, rock });
                if let Src::Imm(m) = mode {
                    match IoSys::try_from(m) {
                        Ok(new_mode) => self.mode = new_mode,
                        // The step faults at run time; nothing follows.
                        Err(_) => self.done = true,
                    }
                } else {
                    // Mode unknown until run time: recompile from here.
                    self.register_entry(next_pc);
                    self.emit(Step::Jump {
                        dest: BranchDest::Const(next_pc),
                    });
                    self.cacheable = false;
                    self.done = true;
                }
            }

            op::LINEARSEARCH | op::BINARYSEARCH | op::LINKEDSEARCH => {
                self.search_op(opcode, &mut d)?;
            }

            op::MZERO => {
                let len = self.src_of(d.next_load(4)?);
                let addr = self.src_of(d.next_load(4)?);
                self.emit(Step::MZero { len, addr });
            }
            op::MCOPY => {
                let len = self.src_of(d.next_load(4)?);
                let src_addr = self.src_of(d.next_load(4)?);
                let dst_addr = self.src_of(d.next_load(4)?);
                self.emit(Step::MCopy {
                    len,
                    src_addr,
                    dst_addr,
                });
            }
            op::MALLOC => {
                let size = self.src_of(d.next_load(4)?);
                let store = d.next_store(4)?;
                self.emit_store(store, |dst| Step::Malloc { size, dst });
            }
            op::MFREE => {
                let addr = self.src_of(d.next_load(4)?);
                self.emit(Step::MFree { addr });
            }

            op::ACCELFUNC | op::ACCELPARAM => {
                // Acceleration is a hint; the gestalt selectors report it
                // unsupported, so dropping the request is conforming.
                let a = self.src_of(d.next_load(4)?);
                let b = self.src_of(d.next_load(4)?);
                self.discard_src(a);
                self.discard_src(b);
                log::debug!("acceleration request at {instr_pc:#x} ignored");
            }

            _ => {
                return Err(VmError::InvalidOpcode {
                    pc: instr_pc,
                    opcode,
                })
            }
        }

        self.pc = d.pc;
        Ok(())
    }

    fn bin_op(&mut self, op2: BinOp, d: &mut InstrDecoder<'_>) -> Result<(), VmError> {
        let a = self.src_of(d.next_load(4)?);
        let b = self.src_of(d.next_load(4)?);
        let store = d.next_store(4)?;
        if let (Src::Imm(x), Src::Imm(y)) = (a, b) {
            // Faulting constants (division by zero) stay in the path so the
            // fault happens at execution, not compilation.
            if let Ok(v) = crate::vm::exec::bin_value(op2, x, y) {
                self.emit_const(store, v);
                return Ok(());
            }
        }
        self.emit_store(store, |dst| Step::Bin { op: op2, a, b, dst });
        Ok(())
    }

    fn un_op(&mut self, op2: UnOp, d: &mut InstrDecoder<'_>) -> Result<(), VmError> {
        let a = self.src_of(d.next_load(4)?);
        let store = d.next_store(4)?;
        if let Src::Imm(x) = a {
            let v = crate::vm::exec::un_value(op2, x);
            self.emit_const(store, v);
            return Ok(());
        }
        self.emit_store(store, |dst| Step::Un { op: op2, a, dst });
        Ok(())
    }

    fn copy_op(&mut self, d: &mut InstrDecoder<'_>, argsize: u8) -> Result<(), VmError> {
        let src = self.src_of(d.next_load(argsize)?);
        let store = d.next_store(argsize)?;
        let mask = match argsize {
            1 => 0xFF,
            2 => 0xFFFF,
            _ => u32::MAX,
        };
        match (src, store) {
            (Src::Imm(v), store) => self.emit_const(store, v & mask),
            // A narrow copy pushed on the stack must truncate at run time.
            (src, store @ StoreOperand::Push) if argsize < 4 => {
                self.emit_store(store, |dst| Step::Bin {
                    op: BinOp::And,
                    a: src,
                    b: Src::Imm(mask),
                    dst,
                });
            }
            // A full-width temporary pushed again is just an offstack entry.
            (Src::Temp(t), StoreOperand::Push) => self.offstack.push(OffEntry::Temp(t)),
            (src, store) => self.emit_store(store, |dst| Step::Copy { src, dst }),
        }
        Ok(())
    }

    fn compile_branch(
        &mut self,
        cond: Option<(Cond, Src, Src)>,
        offset: LoadOperand,
        next_pc: u32,
    ) {
        let dest = match offset {
            LoadOperand::Const(k) if k == 0 || k == 1 => BranchDest::Ret(k),
            LoadOperand::Const(k) => {
                let target = next_pc.wrapping_add(k).wrapping_sub(2);
                self.register_entry(target);
                BranchDest::Const(target)
            }
            other => BranchDest::Dyn {
                off: self.src_of(other),
                next_pc,
            },
        };
        self.unload_offstack();
        match cond {
            Some((cond, a, b)) => self.emit(Step::Branch { cond, a, b, dest }),
            None => {
                self.emit(Step::Jump { dest });
                self.done = true;
            }
        }
    }

    /// Harvest a counted argument list, preferring offstack values when the
    /// count is a small constant.
    fn arg_list(&mut self, d: &mut InstrDecoder<'_>) -> Result<ArgList, VmError> {
        Ok(match d.next_load(4)? {
            LoadOperand::Const(n) if n <= MAX_KNOWN_ARGS => {
                let mut args = Vec::with_capacity(n as usize);
                for _ in 0..n {
                    args.push(match self.offstack.pop() {
                        Some(entry) => entry.src(),
                        None => Src::Pop,
                    });
                }
                ArgList::Known(args)
            }
            LoadOperand::Const(n) => ArgList::Counted(Src::Imm(n)),
            other => ArgList::Counted(self.src_of(other)),
        })
    }

    fn call_op(
        &mut self,
        d: &mut InstrDecoder<'_>,
        has_stub: bool,
        tail: bool,
    ) -> Result<(), VmError> {
        let func = self.src_of(d.next_load(4)?);
        let args = self.arg_list(d)?;
        let (desttype, destaddr) = if has_stub {
            d.next_stub()?
        } else {
            (DestType::Discard, 0)
        };
        let next_pc = d.pc;
        if tail {
            self.discard_offstack();
        } else {
            self.unload_offstack();
        }
        self.emit(Step::Call {
            func,
            args,
            desttype: desttype as u32,
            destaddr,
            next_pc,
            tail,
        });
        self.done = true;
        Ok(())
    }

    fn callf_op(&mut self, d: &mut InstrDecoder<'_>, nargs: usize) -> Result<(), VmError> {
        let func = self.src_of(d.next_load(4)?);
        let mut args = Vec::with_capacity(nargs);
        for _ in 0..nargs {
            args.push(self.src_of(d.next_load(4)?));
        }
        let (desttype, destaddr) = d.next_stub()?;
        let next_pc = d.pc;
        self.unload_offstack();
        self.emit(Step::Call {
            func,
            args: ArgList::Known(args),
            desttype: desttype as u32,
            destaddr,
            next_pc,
            tail: false,
        });
        self.done = true;
        Ok(())
    }

    fn stkpeek_op(&mut self, d: &mut InstrDecoder<'_>) -> Result<(), VmError> {
        match d.next_load(4)? {
            LoadOperand::Const(k) if (k as usize) < self.offstack.len() => {
                let entry = self.offstack[self.offstack.len() - 1 - k as usize];
                let store = d.next_store(4)?;
                match entry {
                    OffEntry::Const(v) => self.emit_const(store, v),
                    OffEntry::Temp(t) => self.emit_store(store, |dst| Step::Copy {
                        src: Src::Temp(t),
                        dst,
                    }),
                }
            }
            LoadOperand::Const(k) => {
                // Peeks below the offstack index straight into the real stack.
                let rel = k - self.offstack.len() as u32;
                let store = d.next_store(4)?;
                self.emit_store(store, |dst| Step::StkPeek {
                    index: Src::Imm(rel),
                    dst,
                });
            }
            other => {
                let index = self.src_of(other);
                self.unload_offstack();
                let store = d.next_store(4)?;
                self.emit_store(store, |dst| Step::StkPeek { index, dst });
            }
        }
        Ok(())
    }

    fn stkcopy_op(&mut self, d: &mut InstrDecoder<'_>) -> Result<(), VmError> {
        match d.next_load(4)? {
            LoadOperand::Const(n)
                if n <= MAX_KNOWN_ARGS && (n as usize) <= self.offstack.len() =>
            {
                let len = self.offstack.len();
                let dup: Vec<OffEntry> = self.offstack[len - n as usize..].to_vec();
                self.offstack.extend(dup);
            }
            LoadOperand::Const(n) => {
                self.unload_offstack();
                self.emit(Step::StkCopy {
                    count: Src::Imm(n),
                });
            }
            other => {
                let count = self.src_of(other);
                self.unload_offstack();
                self.emit(Step::StkCopy { count });
            }
        }
        Ok(())
    }

    fn search_op(&mut self, opcode: u32, d: &mut InstrDecoder<'_>) -> Result<(), VmError> {
        let nloads = if opcode == op::LINKEDSEARCH { 6 } else { 7 };
        let mut srcs = Vec::with_capacity(nloads);
        for _ in 0..nloads {
            srcs.push(self.src_of(d.next_load(4)?));
        }
        let store = d.next_store(4)?;
        self.emit_store(store, |dst| Step::Search {
            which: opcode,
            args: srcs,
            dst,
        });
        Ok(())
    }
}
