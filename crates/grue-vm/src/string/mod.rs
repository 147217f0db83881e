// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! String printing: plain, Unicode and compressed strings.
//!
//! Glulx strings are tagged objects: 0xE0 is a zero-terminated byte string,
//! 0xE2 a zero-terminated string of 32-bit characters, 0xE1 a compressed
//! stream decoded bit-by-bit against the Huffman-style table at the
//! `stringtable` register.
//!
//! Printing is re-entrant but stackful in the VM, not in the host: when a
//! character must be filtered through a game function, or a tree leaf
//! references a sub-string or sub-function, the printer pushes a resume
//! stub (types 0x10-0x14) and a terminator stub (0x11) under the first one,
//! enters the function and returns to the dispatcher. When the function
//! returns, the stub re-enters the printer exactly where it left off.
//!
//! Per string table the VM keeps a `TextEnv`: a prebuilt decoding tree when
//! the table lies wholly in ROM, plus literal expansions of pure ROM
//! strings (no sub-references), which serve glk output directly and let
//! null mode skip the decode entirely.


use std::collections::HashMap;
use std::sync::Arc;

use grue_glk::GlkDispatch;

use crate::error::VmError;
use crate::glk;
use crate::memory::MemMap;
use crate::operand::{DestType, IoSys};
use crate::vm::Vm;

/// Per-string-table decode caches.
#[derive(Debug, Default)]
pub struct TextEnv {
    /// The decoding tree, prebuilt iff the table lies wholly in ROM.
    rom_tree: Option<HashMap<u32, Node>>,
    /// Literal expansions of top-level ROM strings; `None` marks strings
    /// that need dynamic decoding (sub-references).
    literals: HashMap<u32, Option<Arc<str>>>,
}

/// One decoding-tree node.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    /// Interior node with left/right children.
    Branch(u32, u32),
    /// End of string.
    Terminator,
    /// A single Latin-1 character.
    Char(u8),
    /// A single Unicode character.
    UniChar(u32),
    /// An embedded zero-terminated byte string.
    CStr(u32),
    /// An embedded zero-terminated Unicode string.
    UniCStr(u32),
    /// Reference to a string or function object.
    Indirect(u32),
    /// Reference through a memory cell holding the object address.
    DblIndirect(u32),
    /// Reference with an argument list.
    IndirectArgs(u32, Vec<u32>),
    /// Double-indirect reference with an argument list.
    DblIndirectArgs(u32, Vec<u32>),
}

fn parse_node(mem: &MemMap, addr: u32) -> Result<Node, VmError> {
    let tag = mem.read_u8(addr)? as u8;
    Ok(match tag {
        0x00 => Node::Branch(
            mem.read_u32(addr.wrapping_add(1))?,
            mem.read_u32(addr.wrapping_add(5))?,
        ),
        0x01 => Node::Terminator,
        0x02 => Node::Char(mem.read_u8(addr.wrapping_add(1))? as u8),
        0x03 => Node::CStr(addr.wrapping_add(1)),
        0x04 => Node::UniChar(mem.read_u32(addr.wrapping_add(1))?),
        0x05 => Node::UniCStr(addr.wrapping_add(1)),
        0x08 => Node::Indirect(mem.read_u32(addr.wrapping_add(1))?),
        0x09 => Node::DblIndirect(mem.read_u32(addr.wrapping_add(1))?),
        0x0A | 0x0B => {
            let target = mem.read_u32(addr.wrapping_add(1))?;
            let argc = mem.read_u32(addr.wrapping_add(5))?;
            let mut args = Vec::with_capacity(argc.min(32) as usize);
            for i in 0..argc {
                args.push(mem.read_u32(addr.wrapping_add(9).wrapping_add(i * 4))?);
            }
            if tag == 0x0A {
                Node::IndirectArgs(target, args)
            } else {
                Node::DblIndirectArgs(target, args)
            }
        }
        _ => return Err(VmError::BadTreeNode { addr, tag }),
    })
}

fn build_tree(mem: &MemMap, table: u32) -> Result<HashMap<u32, Node>, VmError> {
    let numnodes = mem.read_u32(table.wrapping_add(4))?;
    let root = mem.read_u32(table.wrapping_add(8))?;
    let mut nodes = HashMap::new();
    let mut work = vec![root];
    while let Some(addr) = work.pop() {
        if nodes.contains_key(&addr) || nodes.len() as u32 >= numnodes.saturating_add(1) {
            continue;
        }
        let node = parse_node(mem, addr)?;
        if let Node::Branch(left, right) = node {
            work.push(left);
            work.push(right);
        }
        nodes.insert(addr, node);
    }
    Ok(nodes)
}

/// Make sure a `TextEnv` exists for the current string table.
fn ensure_env(vm: &mut Vm) -> Result<(), VmError> {
    let table = vm.stringtable;
    if table == 0 || vm.textenvs.contains_key(&table) {
        return Ok(());
    }
    let len = vm.mem.read_u32(table)?;
    let in_rom = table
        .checked_add(len)
        .is_some_and(|end| end <= vm.mem.ramstart());
    let rom_tree = if in_rom {
        let tree = build_tree(&vm.mem, table)?;
        log::trace!("prebuilt ROM string table {table:#x} ({} nodes)", tree.len());
        Some(tree)
    } else {
        log::trace!("string table {table:#x} is in RAM, decoding directly");
        None
    };
    vm.textenvs.insert(
        table,
        TextEnv {
            rom_tree,
            literals: HashMap::new(),
        },
    );
    Ok(())
}

/// Look up a tree node, preferring the prebuilt ROM tree.
fn node_at(vm: &Vm, addr: u32) -> Result<Node, VmError> {
    if let Some(env) = vm.textenvs.get(&vm.stringtable) {
        if let Some(tree) = &env.rom_tree {
            if let Some(node) = tree.get(&addr) {
                return Ok(node.clone());
            }
        }
    }
    parse_node(&vm.mem, addr)
}

/// Decode the compressed string at `addr` into a literal, or `None` when
/// it references sub-strings or sub-functions.
fn decode_literal(vm: &Vm, addr: u32) -> Result<Option<String>, VmError> {
    let root = vm.mem.read_u32(vm.stringtable.wrapping_add(8))?;
    let mut text = String::new();
    let mut pos = addr.wrapping_add(1);
    let mut bitnum = 0u32;
    let mut node_addr = root;
    loop {
        match node_at(vm, node_addr)? {
            Node::Branch(left, right) => {
                let byte = vm.mem.read_u8(pos)?;
                let bit = (byte >> bitnum) & 1;
                bitnum += 1;
                if bitnum == 8 {
                    bitnum = 0;
                    pos = pos.wrapping_add(1);
                }
                node_addr = if bit == 0 { left } else { right };
                continue;
            }
            Node::Terminator => return Ok(Some(text)),
            Node::Char(ch) => text.push(char::from(ch)),
            Node::UniChar(ch) => match char::from_u32(ch) {
                Some(c) => text.push(c),
                None => return Ok(None),
            },
            Node::CStr(mut p) => loop {
                let ch = vm.mem.read_u8(p)?;
                if ch == 0 {
                    break;
                }
                text.push(char::from(ch as u8));
                p = p.wrapping_add(1);
            },
            Node::UniCStr(mut p) => loop {
                let ch = vm.mem.read_u32(p)?;
                if ch == 0 {
                    break;
                }
                match char::from_u32(ch) {
                    Some(c) => text.push(c),
                    None => return Ok(None),
                }
                p = p.wrapping_add(4);
            },
            Node::Indirect(_)
            | Node::DblIndirect(_)
            | Node::IndirectArgs(..)
            | Node::DblIndirectArgs(..) => return Ok(None),
        }
        node_addr = root;
    }
}

/// Fetch (or compute) the literal expansion for a top-level ROM string.
fn cached_literal(vm: &mut Vm, addr: u32) -> Result<Option<Arc<str>>, VmError> {
    if addr >= vm.mem.ramstart() || vm.stringtable == 0 {
        return Ok(None);
    }
    if vm.mem.read_u8(addr)? != 0xE1 {
        return Ok(None);
    }
    ensure_env(vm)?;
    let table = vm.stringtable;
    let has_rom_tree = vm
        .textenvs
        .get(&table)
        .is_some_and(|env| env.rom_tree.is_some());
    if !has_rom_tree {
        return Ok(None);
    }
    if let Some(env) = vm.textenvs.get(&table) {
        if let Some(entry) = env.literals.get(&addr) {
            return Ok(entry.clone());
        }
    }
    let literal = decode_literal(vm, addr)?.map(Arc::<str>::from);
    if let Some(env) = vm.textenvs.get_mut(&table) {
        env.literals.insert(addr, literal.clone());
    }
    Ok(literal)
}

/// Push the terminator marker stub under the first sub-invocation of a
/// string. Returns the new substring flag.
fn begin_sub(vm: &mut Vm, substring: bool) -> Result<bool, VmError> {
    if !substring {
        let pc = vm.pc;
        vm.push_stub(DestType::StringTerminator as u32, 0, pc)?;
    }
    Ok(true)
}

/// Pop the terminator stub once the outermost string completes.
fn finish_marker(vm: &mut Vm) -> Result<(), VmError> {
    let stub = vm.pop_stub()?;
    let framestart = vm.frame()?.framestart;
    if stub.framestart != framestart {
        return Err(VmError::FrameMismatch {
            expected: stub.framestart,
            found: framestart,
        });
    }
    if stub.desttype != DestType::StringTerminator as u32 {
        return Err(VmError::BadDestType(stub.desttype));
    }
    vm.pc = stub.pc;
    Ok(())
}

/// Print the string object at `addr`.
///
/// `inmiddle` is 0 for a fresh string or the string type being resumed
/// (0xE0/0xE1/0xE2); `bitnum` is the bit position for compressed resumes.
/// On suspension (a sub-function was entered) this returns with the
/// resume stubs pushed and the PC pointing at the function.
pub(crate) fn stream_string<G: GlkDispatch>(
    vm: &mut Vm,
    glk: &mut G,
    addr: u32,
    inmiddle: u32,
    bitnum: u32,
) -> Result<(), VmError> {
    // Pure ROM strings short-circuit outside filter mode.
    if inmiddle == 0 && vm.iosysmode != IoSys::Filter {
        if let Some(text) = cached_literal(vm, addr)? {
            if vm.iosysmode == IoSys::Glk {
                glk::put_literal(glk, &text)?;
            }
            return Ok(());
        }
    }

    let mut addr = addr;
    let mut bitnum = bitnum;
    let mut inmiddle = inmiddle;
    let mut substring = inmiddle != 0;

    'strings: loop {
        let strtype: u8 = if inmiddle == 0 {
            bitnum = 0;
            let tag = vm.mem.read_u8(addr)? as u8;
            addr = addr.wrapping_add(1);
            if tag == 0xE2 {
                // Three padding bytes after the type byte.
                addr = addr.wrapping_add(3);
            }
            tag
        } else {
            inmiddle as u8
        };

        match strtype {
            0xE1 => {
                if vm.stringtable == 0 {
                    return Err(VmError::NotAString { addr, tag: 0xE1 });
                }
                ensure_env(vm)?;
                let root = vm.mem.read_u32(vm.stringtable.wrapping_add(8))?;
                let mut node_addr = root;
                loop {
                    let node = node_at(vm, node_addr)?;
                    node_addr = root;

                    // The four indirect-reference leaves share one path.
                    let indirect = match &node {
                        Node::Indirect(t) => Some((*t, Vec::new(), false)),
                        Node::DblIndirect(t) => Some((*t, Vec::new(), true)),
                        Node::IndirectArgs(t, a) => Some((*t, a.clone(), false)),
                        Node::DblIndirectArgs(t, a) => Some((*t, a.clone(), true)),
                        _ => None,
                    };
                    if let Some((target, args, double)) = indirect {
                        let obj = if double {
                            vm.mem.read_u32(target)?
                        } else {
                            target
                        };
                        substring = begin_sub(vm, substring)?;
                        vm.push_stub(DestType::ResumeCompressed as u32, bitnum, addr)?;
                        let tag = vm.mem.read_u8(obj)? as u8;
                        if (0xE0..=0xFF).contains(&tag) {
                            addr = obj;
                            inmiddle = 0;
                            continue 'strings;
                        }
                        if (0xC0..=0xDF).contains(&tag) {
                            return vm.enter_function(obj, &args);
                        }
                        return Err(VmError::NotAString { addr: obj, tag });
                    }

                    match node {
                        Node::Branch(left, right) => {
                            let byte = vm.mem.read_u8(addr)?;
                            let bit = (byte >> bitnum) & 1;
                            bitnum += 1;
                            if bitnum == 8 {
                                bitnum = 0;
                                addr = addr.wrapping_add(1);
                            }
                            node_addr = if bit == 0 { left } else { right };
                        }
                        Node::Terminator => break,
                        Node::Char(ch) => match vm.iosysmode {
                            IoSys::Null => {}
                            IoSys::Glk => glk::put_char(glk, u32::from(ch))?,
                            IoSys::Filter => {
                                begin_sub(vm, substring)?;
                                vm.push_stub(DestType::ResumeCompressed as u32, bitnum, addr)?;
                                let rock = vm.iosysrock;
                                return vm.enter_function(rock, &[u32::from(ch)]);
                            }
                        },
                        Node::UniChar(ch) => match vm.iosysmode {
                            IoSys::Null => {}
                            IoSys::Glk => glk::put_char_uni(glk, ch)?,
                            IoSys::Filter => {
                                begin_sub(vm, substring)?;
                                vm.push_stub(DestType::ResumeCompressed as u32, bitnum, addr)?;
                                let rock = vm.iosysrock;
                                return vm.enter_function(rock, &[ch]);
                            }
                        },
                        Node::CStr(p) => match vm.iosysmode {
                            IoSys::Null => {}
                            IoSys::Glk => {
                                let mut p = p;
                                loop {
                                    let ch = vm.mem.read_u8(p)?;
                                    if ch == 0 {
                                        break;
                                    }
                                    glk::put_char(glk, ch)?;
                                    p = p.wrapping_add(1);
                                }
                            }
                            IoSys::Filter => {
                                // Print the embedded string as a substring;
                                // its termination resumes us via the stub.
                                substring = begin_sub(vm, substring)?;
                                vm.push_stub(DestType::ResumeCompressed as u32, bitnum, addr)?;
                                addr = p;
                                inmiddle = 0xE0;
                                continue 'strings;
                            }
                        },
                        Node::UniCStr(p) => match vm.iosysmode {
                            IoSys::Null => {}
                            IoSys::Glk => {
                                let mut p = p;
                                loop {
                                    let ch = vm.mem.read_u32(p)?;
                                    if ch == 0 {
                                        break;
                                    }
                                    glk::put_char_uni(glk, ch)?;
                                    p = p.wrapping_add(4);
                                }
                            }
                            IoSys::Filter => {
                                substring = begin_sub(vm, substring)?;
                                vm.push_stub(DestType::ResumeCompressed as u32, bitnum, addr)?;
                                addr = p;
                                inmiddle = 0xE2;
                                continue 'strings;
                            }
                        },
                        Node::Indirect(_)
                        | Node::DblIndirect(_)
                        | Node::IndirectArgs(..)
                        | Node::DblIndirectArgs(..) => {}
                    }
                }
            }
            0xE0 => match vm.iosysmode {
                IoSys::Null => {}
                IoSys::Glk => loop {
                    let ch = vm.mem.read_u8(addr)?;
                    addr = addr.wrapping_add(1);
                    if ch == 0 {
                        break;
                    }
                    glk::put_char(glk, ch)?;
                },
                IoSys::Filter => {
                    let ch = vm.mem.read_u8(addr)?;
                    addr = addr.wrapping_add(1);
                    if ch != 0 {
                        begin_sub(vm, substring)?;
                        vm.push_stub(DestType::ResumeCString as u32, 0, addr)?;
                        let rock = vm.iosysrock;
                        return vm.enter_function(rock, &[ch]);
                    }
                }
            },
            0xE2 => match vm.iosysmode {
                IoSys::Null => {}
                IoSys::Glk => loop {
                    let ch = vm.mem.read_u32(addr)?;
                    addr = addr.wrapping_add(4);
                    if ch == 0 {
                        break;
                    }
                    glk::put_char_uni(glk, ch)?;
                },
                IoSys::Filter => {
                    let ch = vm.mem.read_u32(addr)?;
                    addr = addr.wrapping_add(4);
                    if ch != 0 {
                        begin_sub(vm, substring)?;
                        vm.push_stub(DestType::ResumeUniCString as u32, 0, addr)?;
                        let rock = vm.iosysrock;
                        return vm.enter_function(rock, &[ch]);
                    }
                }
            },
            tag => {
                return Err(VmError::NotAString {
                    addr: addr.wrapping_sub(1),
                    tag,
                })
            }
        }

        // The current string is done. Without stubs we simply return;
        // otherwise the next stub either resumes an outer string or is the
        // terminator marker.
        if !substring {
            return Ok(());
        }
        let stub = vm.pop_stub()?;
        let framestart = vm.frame()?.framestart;
        if stub.framestart != framestart {
            return Err(VmError::FrameMismatch {
                expected: stub.framestart,
                found: framestart,
            });
        }
        match DestType::try_from(stub.desttype) {
            Ok(DestType::StringTerminator) => {
                vm.pc = stub.pc;
                return Ok(());
            }
            Ok(DestType::ResumeCompressed) => {
                addr = stub.pc;
                bitnum = stub.destaddr;
                inmiddle = 0xE1;
            }
            Ok(DestType::ResumeCString) => {
                addr = stub.pc;
                inmiddle = 0xE0;
            }
            Ok(DestType::ResumeUniCString) => {
                addr = stub.pc;
                inmiddle = 0xE2;
            }
            _ => return Err(VmError::BadDestType(stub.desttype)),
        }
    }
}

/// Print `value` as a signed decimal number.
///
/// `inmiddle` marks a resumption after a filter call; `charnum` is the next
/// character index to print.
pub(crate) fn stream_num<G: GlkDispatch>(
    vm: &mut Vm,
    glk: &mut G,
    value: u32,
    inmiddle: bool,
    charnum: u32,
) -> Result<(), VmError> {
    let text = (value as i32).to_string();
    let bytes = text.as_bytes();

    match vm.iosysmode {
        IoSys::Null => {
            if inmiddle {
                finish_marker(vm)?;
            }
        }
        IoSys::Glk => {
            for byte in bytes.iter().skip(charnum as usize) {
                glk::put_char(glk, u32::from(*byte))?;
            }
            if inmiddle {
                finish_marker(vm)?;
            }
        }
        IoSys::Filter => {
            let idx = charnum as usize;
            if idx < bytes.len() {
                if !inmiddle {
                    let pc = vm.pc;
                    vm.push_stub(DestType::StringTerminator as u32, 0, pc)?;
                }
                // The stub's pc slot carries the number itself.
                vm.push_stub(DestType::ResumeNumber as u32, charnum.wrapping_add(1), value)?;
                let rock = vm.iosysrock;
                vm.enter_function(rock, &[u32::from(bytes[idx])])?;
            } else if inmiddle {
                finish_marker(vm)?;
            }
        }
    }
    Ok(())
}

/// Print one character (the `streamchar`/`streamunichar` opcodes).
pub(crate) fn stream_char<G: GlkDispatch>(
    vm: &mut Vm,
    glk: &mut G,
    ch: u32,
    next_pc: u32,
    unicode: bool,
) -> Result<(), VmError> {
    match vm.iosysmode {
        IoSys::Null => Ok(()),
        IoSys::Glk => {
            if unicode {
                glk::put_char_uni(glk, ch)
            } else {
                glk::put_char(glk, ch)
            }
        }
        IoSys::Filter => {
            vm.pc = next_pc;
            vm.push_stub(DestType::Discard as u32, 0, next_pc)?;
            let rock = vm.iosysrock;
            let arg = if unicode { ch } else { ch & 0xFF };
            vm.enter_function(rock, &[arg])
        }
    }
}
