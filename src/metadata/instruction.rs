//! Method body instructions.
//!
//! Method bodies are stored as a flat list of [`Instruction`]s drawn from a compact opcode set
//! ([`OpCode`]). Opcode byte values follow their CIL counterparts so that dumps stay familiar.
//! Operands referencing other metadata use indices into the owning module's member reference
//! and type reference tables; they are resolved to readable names only when needed.
//!
//! # Text Form
//!
//! Rewrite rules describe inserted code textually, one instruction per string:
//!
//! ```text
//! nop
//! ldc.i4 42
//! ldstr "hello world"
//! call System.Void Celeste.Player::Die(System.Boolean)
//! castclass Celeste.Player
//! ```
//!
//! Member and type operands are interned into the target module through
//! [`crate::metadata::module::ModuleDefinition::import_member`] and
//! [`crate::metadata::module::ModuleDefinition::import_type`].

use std::fmt;

use strum::{Display, EnumString, FromRepr};

use crate::{
    file::{ByteWriter, Parser},
    metadata::module::ModuleDefinition,
    Result,
};

/// Supported instruction opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, FromRepr)]
#[repr(u8)]
pub enum OpCode {
    /// No operation
    #[strum(serialize = "nop")]
    Nop = 0x00,
    /// Load an argument by index
    #[strum(serialize = "ldarg")]
    Ldarg = 0x0E,
    /// Push a null reference
    #[strum(serialize = "ldnull")]
    Ldnull = 0x14,
    /// Push a 32-bit integer constant
    #[strum(serialize = "ldc.i4")]
    LdcI4 = 0x20,
    /// Discard the top of the stack
    #[strum(serialize = "pop")]
    Pop = 0x26,
    /// Call a method
    #[strum(serialize = "call")]
    Call = 0x28,
    /// Return from the current method
    #[strum(serialize = "ret")]
    Ret = 0x2A,
    /// Call a method virtually
    #[strum(serialize = "callvirt")]
    Callvirt = 0x6F,
    /// Push a string literal
    #[strum(serialize = "ldstr")]
    Ldstr = 0x72,
    /// Construct a new object
    #[strum(serialize = "newobj")]
    Newobj = 0x73,
    /// Cast to a type
    #[strum(serialize = "castclass")]
    Castclass = 0x74,
    /// Load an instance field
    #[strum(serialize = "ldfld")]
    Ldfld = 0x7B,
    /// Store an instance field
    #[strum(serialize = "stfld")]
    Stfld = 0x7D,
    /// Box a value type
    #[strum(serialize = "box")]
    Box = 0x8C,
}

/// Shape of the operand an opcode carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    /// No operand
    None,
    /// Signed 32-bit immediate
    Int32,
    /// String literal
    String,
    /// Index into the member reference table
    Member,
    /// Index into the type reference table
    Type,
}

impl OpCode {
    /// The operand shape this opcode expects.
    #[must_use]
    pub fn operand_kind(self) -> OperandKind {
        match self {
            OpCode::Nop | OpCode::Ldnull | OpCode::Pop | OpCode::Ret => OperandKind::None,
            OpCode::Ldarg | OpCode::LdcI4 => OperandKind::Int32,
            OpCode::Ldstr => OperandKind::String,
            OpCode::Call | OpCode::Callvirt | OpCode::Newobj | OpCode::Ldfld | OpCode::Stfld => {
                OperandKind::Member
            }
            OpCode::Castclass | OpCode::Box => OperandKind::Type,
        }
    }
}

/// An instruction operand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    /// No operand
    None,
    /// Immediate integer
    Int32(i32),
    /// String literal
    String(String),
    /// Member reference index
    Member(u32),
    /// Type reference index
    Type(u32),
}

impl Operand {
    fn kind(&self) -> OperandKind {
        match self {
            Operand::None => OperandKind::None,
            Operand::Int32(_) => OperandKind::Int32,
            Operand::String(_) => OperandKind::String,
            Operand::Member(_) => OperandKind::Member,
            Operand::Type(_) => OperandKind::Type,
        }
    }
}

/// A single instruction in a method body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    /// The opcode
    pub opcode: OpCode,
    /// The operand, matching [`OpCode::operand_kind`]
    pub operand: Operand,
}

impl Instruction {
    /// Create an instruction, checking that the operand matches the opcode.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the operand shape is wrong for `opcode`.
    pub fn new(opcode: OpCode, operand: Operand) -> Result<Self> {
        if opcode.operand_kind() != operand.kind() {
            return Err(malformed_error!(
                "Opcode {} expects a {:?} operand, got {:?}",
                opcode,
                opcode.operand_kind(),
                operand
            ));
        }
        Ok(Self { opcode, operand })
    }

    /// Create an operand-less instruction.
    #[must_use]
    pub fn simple(opcode: OpCode) -> Self {
        Self {
            opcode,
            operand: Operand::None,
        }
    }

    /// Parse the text form of an instruction, interning referenced members and types into
    /// `module`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for an unknown opcode or an invalid operand.
    pub fn parse(text: &str, module: &mut ModuleDefinition) -> Result<Self> {
        let text = text.trim();
        let (mnemonic, rest) = match text.split_once(char::is_whitespace) {
            Some((mnemonic, rest)) => (mnemonic, rest.trim()),
            None => (text, ""),
        };

        let opcode: OpCode = mnemonic
            .parse()
            .map_err(|_| malformed_error!("Unknown opcode '{}'", mnemonic))?;

        let operand = match opcode.operand_kind() {
            OperandKind::None => {
                if !rest.is_empty() {
                    return Err(malformed_error!("Opcode {} takes no operand", opcode));
                }
                Operand::None
            }
            OperandKind::Int32 => Operand::Int32(
                rest.parse::<i32>()
                    .map_err(|_| malformed_error!("Invalid integer operand '{}'", rest))?,
            ),
            OperandKind::String => {
                let literal = rest
                    .strip_prefix('"')
                    .and_then(|s| s.strip_suffix('"'))
                    .ok_or_else(|| malformed_error!("String operand must be quoted: {}", rest))?;
                Operand::String(literal.to_string())
            }
            OperandKind::Member => Operand::Member(module.import_member(rest)?),
            OperandKind::Type => {
                if rest.is_empty() {
                    return Err(malformed_error!("Opcode {} requires a type operand", opcode));
                }
                Operand::Type(module.import_type(rest, None))
            }
        };

        Ok(Self { opcode, operand })
    }

    /// Render the text form, resolving reference operands against `module`.
    #[must_use]
    pub fn display<'a>(&'a self, module: &'a ModuleDefinition) -> InstructionDisplay<'a> {
        InstructionDisplay {
            instruction: self,
            module,
        }
    }

    pub(crate) fn read(parser: &mut Parser) -> Result<Self> {
        let raw = parser.read_le::<u8>()?;
        let opcode =
            OpCode::from_repr(raw).ok_or_else(|| malformed_error!("Invalid opcode {:#04x}", raw))?;

        let operand = match opcode.operand_kind() {
            OperandKind::None => Operand::None,
            OperandKind::Int32 => Operand::Int32(parser.read_le::<i32>()?),
            OperandKind::String => Operand::String(parser.read_prefixed_string_utf8()?),
            OperandKind::Member => Operand::Member(parser.read_compressed_uint()?),
            OperandKind::Type => Operand::Type(parser.read_compressed_uint()?),
        };

        Ok(Self { opcode, operand })
    }

    pub(crate) fn write(&self, writer: &mut ByteWriter) -> Result<()> {
        writer.write_le(self.opcode as u8);
        match &self.operand {
            Operand::None => {}
            Operand::Int32(value) => writer.write_le(*value),
            Operand::String(value) => writer.write_prefixed_string_utf8(value)?,
            Operand::Member(index) | Operand::Type(index) => writer.write_compressed_uint(*index)?,
        }
        Ok(())
    }
}

/// Helper returned by [`Instruction::display`].
pub struct InstructionDisplay<'a> {
    instruction: &'a Instruction,
    module: &'a ModuleDefinition,
}

impl fmt::Display for InstructionDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let opcode = self.instruction.opcode;
        match &self.instruction.operand {
            Operand::None => write!(f, "{opcode}"),
            Operand::Int32(value) => write!(f, "{opcode} {value}"),
            Operand::String(value) => write!(f, "{opcode} \"{value}\""),
            Operand::Member(index) => match self.module.member_ref_id(*index) {
                Some(id) => write!(f, "{opcode} {id}"),
                None => write!(f, "{opcode} <member {index}>"),
            },
            Operand::Type(index) => match self.module.type_ref_full_name(*index) {
                Some(name) => write!(f, "{opcode} {name}"),
                None => write!(f, "{opcode} <type {index}>"),
            },
        }
    }
}
