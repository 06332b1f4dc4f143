//! Opcodes, IR operations, and the bytecode serializer.
//!
//! IR generation produces a linear list of [`IrOp`]s whose operands may
//! still name global symbols. Serialization flattens the list into the
//! final byte stream, resolving symbol operands through the globals table
//! into absolute stack indices or bytecode addresses.

use serde::{Deserialize, Serialize};
use strum::{Display, FromRepr, IntoStaticStr};

use crate::{
    error::{EngineError, ErrorKind},
    symbol::SymbolTable,
};

/// Dense instruction set. Each instruction is the 1-byte opcode followed by
/// its typed operand (see [`Opcode::operand_type`]). The numbering is stable
/// within one engine build only; bytecode is an in-process artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr, Display, IntoStaticStr, Serialize, Deserialize)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum Opcode {
    Exit,
    NoOp,
    Pop,
    PushNone,
    PushBool,
    PushInt,
    PushChar,
    PushFloat,
    PushString,
    PushArray,
    PushMap,
    PushFunc,
    PushLocal,
    PushGlobal,
    PushElement,
    PushIterator,
    PushRange,
    LoadLocal,
    LoadGlobal,
    LoadElement,
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Mod,
    And,
    Or,
    Not,
    Neg,
    Lt,
    Lte,
    Eq,
    Neq,
    ApproxEq,
    Gt,
    Gte,
    Jump,
    JumpZero,
    JumpNzero,
    Iterate,
    CallFrame,
    ArgCount,
    Call,
    CallTop,
    CallLocal,
    CallGlobal,
    CallExt,
    EnterFunc,
    ReturnFunc,
    ImportLib,
}

/// Shape of an opcode's operand in the encoded stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OperandType {
    None,
    Bool,
    Char,
    Int,
    Float,
    Bytes,
}

impl Opcode {
    pub(crate) fn operand_type(self) -> OperandType {
        match self {
            Self::PushBool => OperandType::Bool,
            Self::PushChar => OperandType::Char,
            Self::PushFloat => OperandType::Float,
            Self::PushString | Self::ImportLib => OperandType::Bytes,
            Self::Pop
            | Self::PushInt
            | Self::PushArray
            | Self::PushMap
            | Self::PushFunc
            | Self::PushLocal
            | Self::PushGlobal
            | Self::LoadLocal
            | Self::LoadGlobal
            | Self::Jump
            | Self::JumpZero
            | Self::JumpNzero
            | Self::Iterate
            | Self::CallFrame
            | Self::ArgCount
            | Self::Call
            | Self::CallLocal
            | Self::CallGlobal
            | Self::CallExt
            | Self::EnterFunc
            | Self::ReturnFunc => OperandType::Int,
            _ => OperandType::None,
        }
    }
}

/// An IR operand. `Symbol` operands are resolved to ints at serialization
/// time, which is what allows forward references to globals.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Operand {
    None,
    Bool(bool),
    Char(u8),
    Int(i32),
    Float(f32),
    /// Raw bytes, encoded with a zero terminator.
    Bytes(Vec<u8>),
    /// A global symbol name, encoded as its resolved int offset.
    Symbol(String),
}

impl Operand {
    /// Encoded size in bytes, excluding the opcode byte.
    pub fn size(&self) -> u32 {
        match self {
            Self::None => 0,
            Self::Bool(_) | Self::Char(_) => 1,
            Self::Int(_) | Self::Float(_) | Self::Symbol(_) => 4,
            Self::Bytes(bytes) => bytes.len() as u32 + 1,
        }
    }
}

/// One linear IR operation with its final bytecode offset.
#[derive(Debug, Clone)]
pub(crate) struct IrOp {
    pub opcode: Opcode,
    pub operand: Operand,
    pub bytecode_offset: u32,
}

impl IrOp {
    /// Total encoded size: opcode byte plus operand bytes.
    pub fn size(&self) -> u32 {
        1 + self.operand.size()
    }
}

/// Associates a bytecode address with diagnostic context: either the symbol
/// involved in a call or load, or the source position of a faultable
/// operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Marker {
    pub addr: u32,
    pub detail: MarkerDetail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) enum MarkerDetail {
    /// Offending symbol name, for call-site diagnostics.
    Symbol(String),
    /// Source site, for runtime faults in arithmetic and element access.
    Source { file: String, line: u32, col: u32 },
}

/// A compiled script: bytecode, the globals symbol table, and the trace
/// markers. This is the cacheable compilation artifact; it holds no runtime
/// state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Program {
    pub(crate) bytecode: Vec<u8>,
    pub(crate) globals: SymbolTable,
    pub(crate) markers: Vec<Marker>,
}

impl Program {
    #[must_use]
    pub fn bytecode(&self) -> &[u8] {
        &self.bytecode
    }

    /// Serializes the compiled program to a binary blob, so hosts can cache
    /// compilation across runs.
    pub fn dump(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    /// Restores a program previously produced by [`Program::dump`].
    pub fn load(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }

    /// Finds the marker recorded at `addr`, if any.
    pub(crate) fn marker_at(&self, addr: u32) -> Option<&Marker> {
        self.markers.iter().find(|marker| marker.addr == addr)
    }

    /// Renders a human-readable instruction listing, prefixed with the
    /// globals table.
    #[must_use]
    pub fn disassemble(&self) -> String {
        use std::fmt::Write as _;

        let mut out = String::new();
        let _ = writeln!(out, "; {} global symbol(s)", self.globals.len());
        let mut symbols: Vec<_> = self.globals.iter().collect();
        symbols.sort_by_key(|symbol| symbol.offset);
        for symbol in symbols {
            let _ = writeln!(
                out,
                "; {:?} {:?} {} -> {}",
                symbol.scope, symbol.kind, symbol.name, symbol.offset
            );
        }

        let bytes = &self.bytecode;
        let mut addr = 0usize;
        while addr < bytes.len() {
            let Some(opcode) = Opcode::from_repr(bytes[addr]) else {
                let _ = writeln!(out, "{addr:>6}  <bad opcode {:#04x}>", bytes[addr]);
                break;
            };
            let _ = write!(out, "{addr:>6}  {opcode}");
            addr += 1;
            match opcode.operand_type() {
                OperandType::None => {}
                OperandType::Bool => {
                    let _ = write!(out, " {}", bytes[addr] != 0);
                    addr += 1;
                }
                OperandType::Char => {
                    let _ = write!(out, " {:?}", bytes[addr] as char);
                    addr += 1;
                }
                OperandType::Int => {
                    let value = read_i32(bytes, addr);
                    let _ = write!(out, " {value}");
                    addr += 4;
                }
                OperandType::Float => {
                    let value = f32::from_le_bytes([bytes[addr], bytes[addr + 1], bytes[addr + 2], bytes[addr + 3]]);
                    let _ = write!(out, " {value}");
                    addr += 4;
                }
                OperandType::Bytes => {
                    let start = addr;
                    while addr < bytes.len() && bytes[addr] != 0 {
                        addr += 1;
                    }
                    let text = String::from_utf8_lossy(&bytes[start..addr]);
                    let _ = write!(out, " {text:?}");
                    addr += 1; // terminator
                }
            }
            out.push('\n');
        }
        out
    }
}

fn read_i32(bytes: &[u8], addr: usize) -> i32 {
    i32::from_le_bytes([bytes[addr], bytes[addr + 1], bytes[addr + 2], bytes[addr + 3]])
}

/// Flattens IR operations into the final byte stream, resolving symbol
/// operands through the globals table.
pub(crate) fn serialize_ops(ops: &[IrOp], globals: &SymbolTable) -> Result<Vec<u8>, EngineError> {
    let total: u32 = ops.iter().map(IrOp::size).sum();
    let mut bytecode = Vec::with_capacity(total as usize);

    for op in ops {
        bytecode.push(op.opcode as u8);
        match &op.operand {
            Operand::None => {}
            Operand::Bool(b) => bytecode.push(u8::from(*b)),
            Operand::Char(c) => bytecode.push(*c),
            Operand::Int(i) => bytecode.extend_from_slice(&i.to_le_bytes()),
            Operand::Float(f) => bytecode.extend_from_slice(&f.to_le_bytes()),
            Operand::Bytes(bytes) => {
                bytecode.extend_from_slice(bytes);
                bytecode.push(0);
            }
            Operand::Symbol(name) => {
                let Some(symbol) = globals.get(name) else {
                    return Err(EngineError::new(
                        ErrorKind::Serialize,
                        format!("unresolved global symbol {name}"),
                    ));
                };
                bytecode.extend_from_slice(&symbol.offset.to_le_bytes());
            }
        }
    }

    Ok(bytecode)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::symbol::{SymKind, SymScope, Symbol};

    fn op(opcode: Opcode, operand: Operand, bytecode_offset: u32) -> IrOp {
        IrOp {
            opcode,
            operand,
            bytecode_offset,
        }
    }

    #[test]
    fn opcode_round_trips_through_repr() {
        assert_eq!(Opcode::from_repr(Opcode::ReturnFunc as u8), Some(Opcode::ReturnFunc));
        assert_eq!(Opcode::from_repr(Opcode::Exit as u8), Some(Opcode::Exit));
        assert_eq!(Opcode::from_repr(0xFF), None);
    }

    #[test]
    fn serializes_typed_operands_little_endian() {
        let ops = vec![
            op(Opcode::PushInt, Operand::Int(0x0102_0304), 0),
            op(Opcode::PushBool, Operand::Bool(true), 5),
            op(Opcode::PushString, Operand::Bytes(b"hi".to_vec()), 7),
        ];
        let bytecode = serialize_ops(&ops, &SymbolTable::new()).unwrap();
        assert_eq!(
            bytecode,
            vec![
                Opcode::PushInt as u8,
                0x04,
                0x03,
                0x02,
                0x01,
                Opcode::PushBool as u8,
                1,
                Opcode::PushString as u8,
                b'h',
                b'i',
                0,
            ]
        );
    }

    #[test]
    fn symbol_operands_resolve_through_globals() {
        let mut globals = SymbolTable::new();
        globals.insert(Symbol {
            name: "main".to_owned(),
            scope: SymScope::Global,
            kind: SymKind::Func,
            offset: 42,
            argc: 0,
        });
        let ops = vec![op(Opcode::Call, Operand::Symbol("main".to_owned()), 0)];
        let bytecode = serialize_ops(&ops, &globals).unwrap();
        assert_eq!(bytecode, vec![Opcode::Call as u8, 42, 0, 0, 0]);
    }

    #[test]
    fn unresolved_symbol_aborts_serialization() {
        let ops = vec![op(Opcode::Call, Operand::Symbol("missing".to_owned()), 0)];
        let err = serialize_ops(&ops, &SymbolTable::new()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Serialize);
    }

    #[test]
    fn operand_sizes_match_encoding() {
        assert_eq!(Operand::None.size(), 0);
        assert_eq!(Operand::Bool(false).size(), 1);
        assert_eq!(Operand::Int(7).size(), 4);
        assert_eq!(Operand::Float(1.0).size(), 4);
        assert_eq!(Operand::Bytes(b"abc".to_vec()).size(), 4);
        assert_eq!(Operand::Symbol("x".to_owned()).size(), 4);
    }

    #[test]
    fn disassembles_operands() {
        let ops = vec![
            op(Opcode::PushInt, Operand::Int(7), 0),
            op(Opcode::Exit, Operand::None, 5),
        ];
        let program = Program {
            bytecode: serialize_ops(&ops, &SymbolTable::new()).unwrap(),
            globals: SymbolTable::new(),
            markers: Vec::new(),
        };
        let listing = program.disassemble();
        assert!(listing.contains("PUSH_INT 7"));
        assert!(listing.contains("EXIT"));
    }
}
