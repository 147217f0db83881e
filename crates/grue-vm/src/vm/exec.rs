// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! The step interpreter: runs compiled paths against the VM state.

use grue_glk::{GlkDispatch, GlkResult};

use crate::bytecode::op;
use crate::compiler::step::{ArgList, BinOp, BranchDest, Dst, Path, Src, Step, UnOp};
use crate::error::VmError;
use crate::loader;
use crate::operand::IoSys;
use crate::search::{self, SearchOptions};
use crate::string;
use crate::vm::Vm;

/// What the dispatcher does after a path finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    /// Keep dispatching from the current program counter.
    Continue,
    /// A host call did not return; wait for the host to resume us.
    Suspend,
    /// The machine stopped (quit, or the start function returned).
    Quit,
}

/// Evaluate a step source. Pops happen here, so sources must be evaluated
/// in operand order.
fn eval(vm: &mut Vm, temps: &[u32], src: Src) -> Result<u32, VmError> {
    match src {
        Src::Imm(v) => Ok(v),
        Src::Mem { addr, width } => vm.mem.read(addr, width),
        Src::Local { off, width } => vm.frame()?.read_local(off, width),
        Src::Pop => vm
            .frame_mut()?
            .valstack
            .pop()
            .ok_or(VmError::StackUnderflow),
        Src::Temp(t) => Ok(temps[t as usize]),
    }
}

/// Deliver a value into a step destination.
fn put(vm: &mut Vm, temps: &mut [u32], dst: Dst, val: u32) -> Result<(), VmError> {
    match dst {
        Dst::Discard => Ok(()),
        Dst::Mem { addr, width } => vm.mem.write(addr, width, val),
        Dst::Local { off, width } => vm.frame_mut()?.write_local(off, width, val),
        Dst::Push => {
            vm.frame_mut()?.valstack.push(val);
            Ok(())
        }
        Dst::Temp(t) => {
            temps[t as usize] = val;
            Ok(())
        }
    }
}

/// Apply a binary opcode to two values.
pub(crate) fn bin_value(op2: BinOp, a: u32, b: u32) -> Result<u32, VmError> {
    Ok(match op2 {
        BinOp::Add => a.wrapping_add(b),
        BinOp::Sub => a.wrapping_sub(b),
        BinOp::Mul => a.wrapping_mul(b),
        BinOp::Div => {
            if b == 0 {
                return Err(VmError::DivisionByZero);
            }
            (a as i32).wrapping_div(b as i32) as u32
        }
        BinOp::Mod => {
            if b == 0 {
                return Err(VmError::DivisionByZero);
            }
            (a as i32).wrapping_rem(b as i32) as u32
        }
        BinOp::And => a & b,
        BinOp::Or => a | b,
        BinOp::Xor => a ^ b,
        BinOp::ShiftL => {
            if b >= 32 {
                0
            } else {
                a << b
            }
        }
        BinOp::UShiftR => {
            if b >= 32 {
                0
            } else {
                a >> b
            }
        }
        BinOp::SShiftR => {
            if b >= 32 {
                ((a as i32) >> 31) as u32
            } else {
                ((a as i32) >> b) as u32
            }
        }
    })
}

/// Apply a unary opcode to a value.
pub(crate) fn un_value(op2: UnOp, a: u32) -> u32 {
    match op2 {
        UnOp::Neg => (a as i32).wrapping_neg() as u32,
        UnOp::BitNot => !a,
        UnOp::SexS => a as u16 as i16 as i32 as u32,
        UnOp::SexB => a as u8 as i8 as i32 as u32,
    }
}

/// Leave the current function and deliver `val` through the caller's stub.
pub(crate) fn do_return<G: GlkDispatch>(
    vm: &mut Vm,
    glk: &mut G,
    val: u32,
) -> Result<Outcome, VmError> {
    vm.leave_function();
    if vm.frames.is_empty() {
        log::debug!("start function returned, machine stops");
        return Ok(Outcome::Quit);
    }
    vm.pop_callstub(glk, val)?;
    Ok(Outcome::Continue)
}

/// Apply the branch-offset convention: 0 and 1 return from the current
/// function, everything else lands at `next_pc + offset - 2`.
fn take_branch<G: GlkDispatch>(
    vm: &mut Vm,
    glk: &mut G,
    offset: u32,
    next_pc: u32,
) -> Result<Outcome, VmError> {
    if offset == 0 || offset == 1 {
        do_return(vm, glk, offset)
    } else {
        vm.pc = next_pc.wrapping_add(offset).wrapping_sub(2);
        Ok(Outcome::Continue)
    }
}

/// Collect call/glk arguments into `buf`.
fn collect_args(
    vm: &mut Vm,
    temps: &[u32],
    args: &ArgList,
    buf: &mut Vec<u32>,
) -> Result<(), VmError> {
    match args {
        ArgList::Known(srcs) => {
            for src in srcs {
                let v = eval(vm, temps, *src)?;
                buf.push(v);
            }
        }
        ArgList::Counted(count) => {
            let n = eval(vm, temps, *count)?;
            for _ in 0..n {
                let v = vm
                    .frame_mut()?
                    .valstack
                    .pop()
                    .ok_or(VmError::StackUnderflow)?;
                buf.push(v);
            }
        }
    }
    Ok(())
}

/// Run one compiled path. Returns when the path transfers control.
pub(crate) fn run_path<G: GlkDispatch>(
    vm: &mut Vm,
    glk: &mut G,
    path: &Path,
) -> Result<Outcome, VmError> {
    let mut temps = vec![0u32; path.ntemps];

    for step in &path.steps {
        match step {
            Step::Copy { src, dst } => {
                let v = eval(vm, &temps, *src)?;
                put(vm, &mut temps, *dst, v)?;
            }
            Step::Bin { op, a, b, dst } => {
                let av = eval(vm, &temps, *a)?;
                let bv = eval(vm, &temps, *b)?;
                let v = bin_value(*op, av, bv)?;
                put(vm, &mut temps, *dst, v)?;
            }
            Step::Un { op, a, dst } => {
                let av = eval(vm, &temps, *a)?;
                put(vm, &mut temps, *dst, un_value(*op, av))?;
            }
            Step::ALoad {
                base,
                index,
                width,
                dst,
            } => {
                let basev = eval(vm, &temps, *base)?;
                let indexv = eval(vm, &temps, *index)?;
                let addr = basev.wrapping_add(indexv.wrapping_mul(u32::from(*width)));
                let v = vm.mem.read(addr, *width)?;
                put(vm, &mut temps, *dst, v)?;
            }
            Step::AStore {
                base,
                index,
                width,
                val,
            } => {
                let basev = eval(vm, &temps, *base)?;
                let indexv = eval(vm, &temps, *index)?;
                let v = eval(vm, &temps, *val)?;
                let addr = basev.wrapping_add(indexv.wrapping_mul(u32::from(*width)));
                vm.mem.write(addr, *width, v)?;
            }
            Step::ALoadBit { base, index, dst } => {
                let basev = eval(vm, &temps, *base)?;
                let bit = eval(vm, &temps, *index)? as i32;
                let addr = basev.wrapping_add((bit >> 3) as u32);
                let byte = vm.mem.read_u8(addr)?;
                put(vm, &mut temps, *dst, (byte >> (bit & 7)) & 1)?;
            }
            Step::AStoreBit { base, index, val } => {
                let basev = eval(vm, &temps, *base)?;
                let bit = eval(vm, &temps, *index)? as i32;
                let v = eval(vm, &temps, *val)?;
                let addr = basev.wrapping_add((bit >> 3) as u32);
                let mask = 1u32 << (bit & 7);
                let byte = vm.mem.read_u8(addr)?;
                let byte = if v != 0 { byte | mask } else { byte & !mask };
                vm.mem.write_u8(addr, byte)?;
            }
            Step::StkCount { extra, dst } => {
                let count = vm.frame()?.valstack.len() as u32 + extra;
                put(vm, &mut temps, *dst, count)?;
            }
            Step::StkPeek { index, dst } => {
                let idx = eval(vm, &temps, *index)?;
                let v = vm.stk_peek(idx)?;
                put(vm, &mut temps, *dst, v)?;
            }
            Step::StkSwap => vm.stk_swap()?,
            Step::StkRoll { count, shift } => {
                let countv = eval(vm, &temps, *count)?;
                let shiftv = eval(vm, &temps, *shift)? as i32;
                vm.stk_roll(countv, shiftv)?;
            }
            Step::StkCopy { count } => {
                let countv = eval(vm, &temps, *count)?;
                vm.stk_copy(countv)?;
            }
            Step::Push { src } => {
                let v = eval(vm, &temps, *src)?;
                vm.frame_mut()?.valstack.push(v);
            }

            Step::Branch { cond, a, b, dest } => {
                let av = eval(vm, &temps, *a)?;
                let bv = eval(vm, &temps, *b)?;
                // Operand evaluation happens whether or not we branch.
                let dynv = match dest {
                    BranchDest::Dyn { off, .. } => Some(eval(vm, &temps, *off)?),
                    BranchDest::Abs(src) => Some(eval(vm, &temps, *src)?),
                    _ => None,
                };
                if cond.holds(av, bv) {
                    return match dest {
                        BranchDest::Const(target) => {
                            vm.pc = *target;
                            Ok(Outcome::Continue)
                        }
                        BranchDest::Ret(v) => do_return(vm, glk, *v),
                        BranchDest::Abs(_) => {
                            vm.pc = dynv.unwrap_or(0);
                            Ok(Outcome::Continue)
                        }
                        BranchDest::Dyn { next_pc, .. } => {
                            take_branch(vm, glk, dynv.unwrap_or(0), *next_pc)
                        }
                    };
                }
            }
            Step::Jump { dest } => {
                return match dest {
                    BranchDest::Const(target) => {
                        vm.pc = *target;
                        Ok(Outcome::Continue)
                    }
                    BranchDest::Ret(v) => do_return(vm, glk, *v),
                    BranchDest::Abs(src) => {
                        vm.pc = eval(vm, &temps, *src)?;
                        Ok(Outcome::Continue)
                    }
                    BranchDest::Dyn { off, next_pc } => {
                        let offv = eval(vm, &temps, *off)?;
                        take_branch(vm, glk, offv, *next_pc)
                    }
                };
            }

            Step::Call {
                func,
                args,
                desttype,
                destaddr,
                next_pc,
                tail,
            } => {
                let fnaddr = eval(vm, &temps, *func)?;
                let mut buf = core::mem::take(&mut vm.tempcallargs);
                buf.clear();
                collect_args(vm, &temps, args, &mut buf)?;
                if *tail {
                    vm.leave_function();
                } else {
                    vm.push_stub(*desttype, *destaddr, *next_pc)?;
                }
                let entered = vm.enter_function(fnaddr, &buf);
                vm.tempcallargs = buf;
                entered?;
                return Ok(Outcome::Continue);
            }
            Step::Return { src } => {
                let v = eval(vm, &temps, *src)?;
                return do_return(vm, glk, v);
            }
            Step::Catch {
                desttype,
                destaddr,
                offset,
                next_pc,
            } => {
                let offv = eval(vm, &temps, *offset)?;
                vm.push_stub(*desttype, *destaddr, *next_pc)?;
                let token = vm.frame()?.stack_ptr();
                vm.store_dest(*desttype, *destaddr, token)?;
                return take_branch(vm, glk, offv, *next_pc);
            }
            Step::Throw { value, token } => {
                let v = eval(vm, &temps, *value)?;
                let t = eval(vm, &temps, *token)?;
                vm.do_throw(glk, v, t)?;
                return Ok(Outcome::Continue);
            }

            Step::StreamChar {
                src,
                next_pc,
                unicode,
            } => {
                let ch = eval(vm, &temps, *src)?;
                string::stream_char(vm, glk, ch, *next_pc, *unicode)?;
            }
            Step::StreamNum { src, next_pc } => {
                let v = eval(vm, &temps, *src)?;
                if vm.iosysmode == IoSys::Filter {
                    vm.pc = *next_pc;
                }
                string::stream_num(vm, glk, v, false, 0)?;
            }
            Step::StreamStr { src, next_pc } => {
                let addr = eval(vm, &temps, *src)?;
                vm.pc = *next_pc;
                string::stream_string(vm, glk, addr, 0, 0)?;
            }

            Step::SetIoSys { mode, rock } => {
                let m = eval(vm, &temps, *mode)?;
                let r = eval(vm, &temps, *rock)?;
                let parsed = IoSys::try_from(m).map_err(|_| VmError::BadIoSys(m))?;
                vm.iosysmode = parsed;
                vm.iosysrock = r;
            }
            Step::GetIoSys { mode_dst, rock_dst } => {
                let m = vm.iosysmode as u32;
                let r = vm.iosysrock;
                put(vm, &mut temps, *mode_dst, m)?;
                put(vm, &mut temps, *rock_dst, r)?;
            }
            Step::GetStringTbl { dst } => {
                let table = vm.stringtable;
                put(vm, &mut temps, *dst, table)?;
            }
            Step::SetStringTbl { src } => {
                vm.stringtable = eval(vm, &temps, *src)?;
            }

            Step::Gestalt { sel, extra, dst } => {
                let selv = eval(vm, &temps, *sel)?;
                let extrav = eval(vm, &temps, *extra)?;
                let v = vm.gestalt(selv, extrav);
                put(vm, &mut temps, *dst, v)?;
            }
            Step::Random { range, dst } => {
                let rangev = eval(vm, &temps, *range)?;
                let v = vm.rng.in_range(rangev);
                put(vm, &mut temps, *dst, v)?;
            }
            Step::SetRandom { seed } => {
                let seedv = eval(vm, &temps, *seed)?;
                vm.rng = if seedv == 0 {
                    crate::random::Pcg32::from_entropy()
                } else {
                    crate::random::Pcg32::seeded(u64::from(seedv))
                };
            }

            Step::GetMemSize { dst } => {
                let len = vm.mem.len();
                put(vm, &mut temps, *dst, len)?;
            }
            Step::SetMemSize { size, dst } => {
                let sizev = eval(vm, &temps, *size)?;
                let heap_active = vm.heap.active();
                vm.mem.resize(sizev, false, heap_active)?;
                put(vm, &mut temps, *dst, 0)?;
            }
            Step::Malloc { size, dst } => {
                let sizev = eval(vm, &temps, *size)?;
                let addr = {
                    let Vm {
                        ref mut heap,
                        ref mut mem,
                        ..
                    } = *vm;
                    heap.alloc(mem, sizev)?
                };
                put(vm, &mut temps, *dst, addr)?;
            }
            Step::MFree { addr } => {
                let addrv = eval(vm, &temps, *addr)?;
                let Vm {
                    ref mut heap,
                    ref mut mem,
                    ..
                } = *vm;
                heap.free(mem, addrv)?;
            }
            Step::MZero { len, addr } => {
                let lenv = eval(vm, &temps, *len)?;
                let addrv = eval(vm, &temps, *addr)?;
                vm.mem.zero_range(addrv, lenv)?;
            }
            Step::MCopy {
                len,
                src_addr,
                dst_addr,
            } => {
                let lenv = eval(vm, &temps, *len)?;
                let srcv = eval(vm, &temps, *src_addr)?;
                let dstv = eval(vm, &temps, *dst_addr)?;
                vm.mem.copy_range(srcv, dstv, lenv)?;
            }

            Step::Search { which, args, dst } => {
                let mut vals = [0u32; 7];
                for (slot, src) in vals.iter_mut().zip(args.iter()) {
                    *slot = eval(vm, &temps, *src)?;
                }
                let opts = SearchOptions::from_bits_truncate(vals[args.len() - 1]);
                let result = match *which {
                    op::LINEARSEARCH => search::linear(
                        &vm.mem, vals[0], vals[1], vals[2], vals[3], vals[4], vals[5], opts,
                    )?,
                    op::BINARYSEARCH => search::binary(
                        &vm.mem, vals[0], vals[1], vals[2], vals[3], vals[4], vals[5], opts,
                    )?,
                    _ => search::linked(&vm.mem, vals[0], vals[1], vals[2], vals[3], vals[4], opts)?,
                };
                put(vm, &mut temps, *dst, result)?;
            }

            Step::Protect { start, len } => {
                let startv = eval(vm, &temps, *start)?;
                let lenv = eval(vm, &temps, *len)?;
                vm.protect = if lenv == 0 { None } else { Some((startv, lenv)) };
            }
            Step::Verify { dst } => {
                let code = loader::verify_image(&vm.image);
                put(vm, &mut temps, *dst, code)?;
            }

            Step::SaveUndo {
                desttype,
                destaddr,
                next_pc,
            } => {
                vm.pc = *next_pc;
                vm.push_stub(*desttype, *destaddr, *next_pc)?;
                let snap = vm.capture_snapshot();
                vm.undo.push(snap);
                log::info!("undo snapshot saved ({} held)", vm.undo.len());
                vm.pop_callstub(glk, 0)?;
                return Ok(Outcome::Continue);
            }
            Step::RestoreUndo {
                desttype,
                destaddr,
                next_pc,
            } => {
                vm.pc = *next_pc;
                if let Some(snap) = vm.undo.pop() {
                    vm.apply_snapshot(snap)?;
                    log::info!("undo snapshot restored ({} left)", vm.undo.len());
                    vm.pop_callstub(glk, 0xFFFF_FFFF)?;
                } else {
                    vm.store_dest(*desttype, *destaddr, 1)?;
                }
                return Ok(Outcome::Continue);
            }

            Step::Quit => return Ok(Outcome::Quit),
            Step::Restart => {
                vm.vm_restart()?;
                return Ok(Outcome::Continue);
            }

            Step::Glk {
                selector,
                args,
                dst,
                next_pc,
            } => {
                let sel = eval(vm, &temps, *selector)?;
                let mut buf = Vec::new();
                collect_args(vm, &temps, args, &mut buf)?;
                log::trace!("glk {sel:#x} with {} args", buf.len());
                return match glk.call(sel, &buf) {
                    GlkResult::Value(v) => {
                        vm.pc = *next_pc;
                        put(vm, &mut temps, *dst, v)?;
                        Ok(Outcome::Continue)
                    }
                    GlkResult::DidNotReturn => {
                        vm.pc = *next_pc;
                        put(vm, &mut temps, *dst, 0)?;
                        Ok(Outcome::Suspend)
                    }
                };
            }

            Step::DebugTrap { src } => {
                let v = eval(vm, &temps, *src)?;
                return Err(VmError::DebugTrap(v));
            }
        }
    }

    Ok(Outcome::Continue)
}
