//! Binary container codec
//!
//! Serializes a [`ClassNode`] to a compact binary form and back. The container
//! carries a magic number, a format version, and a crc32 checksum over the
//! payload, verified on decode. This codec is the stock implementation of the
//! engine's class-format seam; hosts with their own on-disk format substitute
//! theirs.

use crate::class::{ClassNode, FieldNode};
use crate::descriptor::{ClassName, DescriptorError, MethodSig, TypeDesc};
use crate::insn::{Insn, InvokeKind, Label, MethodBody, SlotKind};
use thiserror::Error;

/// Magic number for Weaver class containers: "WEAV"
pub const MAGIC: [u8; 4] = *b"WEAV";

/// Current container version
pub const VERSION: u32 = 1;

/// Errors that can occur while decoding a container
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Unexpected end of input
    #[error("Unexpected end of input at offset {0}")]
    UnexpectedEnd(usize),

    /// Invalid UTF-8 string
    #[error("Invalid UTF-8 string at offset {0}")]
    InvalidUtf8(usize),

    /// Invalid opcode byte
    #[error("Invalid opcode {0:#04x} at offset {1}")]
    InvalidOpcode(u8, usize),

    /// Invalid operand tag (slot kind, invoke kind, return kind)
    #[error("Invalid operand tag {0:#04x} at offset {1}")]
    InvalidTag(u8, usize),

    /// Invalid magic number
    #[error("Invalid magic number: expected WEAV, got {0:?}")]
    InvalidMagic([u8; 4]),

    /// Unsupported container version
    #[error("Unsupported version: {0} (current: {VERSION})")]
    UnsupportedVersion(u32),

    /// Checksum mismatch
    #[error("Checksum mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch {
        /// Checksum recorded in the container
        expected: u32,
        /// Checksum computed over the payload
        actual: u32,
    },

    /// An embedded descriptor string failed to parse
    #[error("Bad descriptor in container: {0}")]
    BadDescriptor(#[from] DescriptorError),
}

mod op {
    pub const NOP: u8 = 0x00;
    pub const DUP: u8 = 0x01;
    pub const POP: u8 = 0x02;
    pub const SWAP: u8 = 0x03;
    pub const PUSH_INT: u8 = 0x10;
    pub const PUSH_LONG: u8 = 0x11;
    pub const PUSH_FLOAT: u8 = 0x12;
    pub const PUSH_DOUBLE: u8 = 0x13;
    pub const PUSH_STR: u8 = 0x14;
    pub const PUSH_NULL: u8 = 0x15;
    pub const LOAD: u8 = 0x20;
    pub const STORE: u8 = 0x21;
    pub const NEW: u8 = 0x30;
    pub const CHECK_CAST: u8 = 0x31;
    pub const GET_FIELD: u8 = 0x32;
    pub const PUT_FIELD: u8 = 0x33;
    pub const GET_STATIC: u8 = 0x34;
    pub const PUT_STATIC: u8 = 0x35;
    pub const INVOKE: u8 = 0x40;
    pub const JUMP: u8 = 0x50;
    pub const JUMP_IF_ZERO: u8 = 0x51;
    pub const MARK: u8 = 0x52;
    pub const RETURN: u8 = 0x60;
}

const RETURN_VOID: u8 = 0xFF;

/// Writer for encoding container payloads
pub struct BytecodeWriter {
    buffer: Vec<u8>,
}

impl Default for BytecodeWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl BytecodeWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Consume the writer and return the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Emit a raw byte.
    pub fn emit_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Emit a 16-bit unsigned integer (little-endian).
    pub fn emit_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 32-bit unsigned integer (little-endian).
    pub fn emit_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 32-bit signed integer (little-endian).
    pub fn emit_i32(&mut self, value: i32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 64-bit signed integer (little-endian).
    pub fn emit_i64(&mut self, value: i64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 32-bit float (little-endian).
    pub fn emit_f32(&mut self, value: f32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 64-bit float (little-endian).
    pub fn emit_f64(&mut self, value: f64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a length-prefixed UTF-8 string.
    pub fn emit_str(&mut self, value: &str) {
        self.emit_u32(value.len() as u32);
        self.buffer.extend_from_slice(value.as_bytes());
    }
}

/// Reader for decoding container payloads
pub struct BytecodeReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> BytecodeReader<'a> {
    /// Create a reader over the given bytes.
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    /// Current read offset.
    pub fn offset(&self) -> usize {
        self.offset
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if self.offset + len > self.bytes.len() {
            return Err(DecodeError::UnexpectedEnd(self.offset));
        }
        let slice = &self.bytes[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    /// Read a raw byte.
    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    /// Read a 16-bit unsigned integer.
    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    /// Read a 32-bit unsigned integer.
    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a 32-bit signed integer.
    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a 64-bit signed integer.
    pub fn read_i64(&mut self) -> Result<i64, DecodeError> {
        let b = self.take(8)?;
        Ok(i64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    /// Read a 32-bit float.
    pub fn read_f32(&mut self) -> Result<f32, DecodeError> {
        let b = self.take(4)?;
        Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a 64-bit float.
    pub fn read_f64(&mut self) -> Result<f64, DecodeError> {
        let b = self.take(8)?;
        Ok(f64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    /// Read a length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Result<String, DecodeError> {
        let start = self.offset;
        let len = self.read_u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidUtf8(start))
    }
}

fn slot_kind_tag(kind: SlotKind) -> u8 {
    match kind {
        SlotKind::Int => 0,
        SlotKind::Long => 1,
        SlotKind::Float => 2,
        SlotKind::Double => 3,
        SlotKind::Ref => 4,
    }
}

fn slot_kind_from(tag: u8, offset: usize) -> Result<SlotKind, DecodeError> {
    Ok(match tag {
        0 => SlotKind::Int,
        1 => SlotKind::Long,
        2 => SlotKind::Float,
        3 => SlotKind::Double,
        4 => SlotKind::Ref,
        other => return Err(DecodeError::InvalidTag(other, offset)),
    })
}

fn invoke_kind_tag(kind: InvokeKind) -> u8 {
    match kind {
        InvokeKind::Virtual => 0,
        InvokeKind::Special => 1,
        InvokeKind::Static => 2,
        InvokeKind::Interface => 3,
    }
}

fn invoke_kind_from(tag: u8, offset: usize) -> Result<InvokeKind, DecodeError> {
    Ok(match tag {
        0 => InvokeKind::Virtual,
        1 => InvokeKind::Special,
        2 => InvokeKind::Static,
        3 => InvokeKind::Interface,
        other => return Err(DecodeError::InvalidTag(other, offset)),
    })
}

impl Insn {
    fn encode(&self, w: &mut BytecodeWriter) {
        match self {
            Insn::Nop => w.emit_u8(op::NOP),
            Insn::Dup => w.emit_u8(op::DUP),
            Insn::Pop => w.emit_u8(op::POP),
            Insn::Swap => w.emit_u8(op::SWAP),
            Insn::PushInt(v) => {
                w.emit_u8(op::PUSH_INT);
                w.emit_i32(*v);
            }
            Insn::PushLong(v) => {
                w.emit_u8(op::PUSH_LONG);
                w.emit_i64(*v);
            }
            Insn::PushFloat(v) => {
                w.emit_u8(op::PUSH_FLOAT);
                w.emit_f32(*v);
            }
            Insn::PushDouble(v) => {
                w.emit_u8(op::PUSH_DOUBLE);
                w.emit_f64(*v);
            }
            Insn::PushStr(s) => {
                w.emit_u8(op::PUSH_STR);
                w.emit_str(s);
            }
            Insn::PushNull => w.emit_u8(op::PUSH_NULL),
            Insn::Load { kind, slot } => {
                w.emit_u8(op::LOAD);
                w.emit_u8(slot_kind_tag(*kind));
                w.emit_u16(*slot);
            }
            Insn::Store { kind, slot } => {
                w.emit_u8(op::STORE);
                w.emit_u8(slot_kind_tag(*kind));
                w.emit_u16(*slot);
            }
            Insn::New { class } => {
                w.emit_u8(op::NEW);
                w.emit_str(class.as_str());
            }
            Insn::CheckCast { ty } => {
                w.emit_u8(op::CHECK_CAST);
                w.emit_str(&ty.to_string());
            }
            Insn::GetField { owner, name, ty } => {
                w.emit_u8(op::GET_FIELD);
                encode_field_ref(w, owner, name, ty);
            }
            Insn::PutField { owner, name, ty } => {
                w.emit_u8(op::PUT_FIELD);
                encode_field_ref(w, owner, name, ty);
            }
            Insn::GetStatic { owner, name, ty } => {
                w.emit_u8(op::GET_STATIC);
                encode_field_ref(w, owner, name, ty);
            }
            Insn::PutStatic { owner, name, ty } => {
                w.emit_u8(op::PUT_STATIC);
                encode_field_ref(w, owner, name, ty);
            }
            Insn::Invoke {
                kind,
                owner,
                name,
                sig,
            } => {
                w.emit_u8(op::INVOKE);
                w.emit_u8(invoke_kind_tag(*kind));
                w.emit_str(owner.as_str());
                w.emit_str(name);
                w.emit_str(&sig.to_string());
            }
            Insn::Jump { target } => {
                w.emit_u8(op::JUMP);
                w.emit_u32(target.0);
            }
            Insn::JumpIfZero { target } => {
                w.emit_u8(op::JUMP_IF_ZERO);
                w.emit_u32(target.0);
            }
            Insn::Mark(label) => {
                w.emit_u8(op::MARK);
                w.emit_u32(label.0);
            }
            Insn::Return(kind) => {
                w.emit_u8(op::RETURN);
                match kind {
                    Some(k) => w.emit_u8(slot_kind_tag(*k)),
                    None => w.emit_u8(RETURN_VOID),
                }
            }
        }
    }

    fn decode(r: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let at = r.offset();
        let opcode = r.read_u8()?;
        Ok(match opcode {
            op::NOP => Insn::Nop,
            op::DUP => Insn::Dup,
            op::POP => Insn::Pop,
            op::SWAP => Insn::Swap,
            op::PUSH_INT => Insn::PushInt(r.read_i32()?),
            op::PUSH_LONG => Insn::PushLong(r.read_i64()?),
            op::PUSH_FLOAT => Insn::PushFloat(r.read_f32()?),
            op::PUSH_DOUBLE => Insn::PushDouble(r.read_f64()?),
            op::PUSH_STR => Insn::PushStr(r.read_string()?),
            op::PUSH_NULL => Insn::PushNull,
            op::LOAD => {
                let tag_at = r.offset();
                let kind = slot_kind_from(r.read_u8()?, tag_at)?;
                Insn::Load {
                    kind,
                    slot: r.read_u16()?,
                }
            }
            op::STORE => {
                let tag_at = r.offset();
                let kind = slot_kind_from(r.read_u8()?, tag_at)?;
                Insn::Store {
                    kind,
                    slot: r.read_u16()?,
                }
            }
            op::NEW => Insn::New {
                class: ClassName::new(r.read_string()?),
            },
            op::CHECK_CAST => Insn::CheckCast {
                ty: TypeDesc::parse(&r.read_string()?)?,
            },
            op::GET_FIELD => {
                let (owner, name, ty) = decode_field_ref(r)?;
                Insn::GetField { owner, name, ty }
            }
            op::PUT_FIELD => {
                let (owner, name, ty) = decode_field_ref(r)?;
                Insn::PutField { owner, name, ty }
            }
            op::GET_STATIC => {
                let (owner, name, ty) = decode_field_ref(r)?;
                Insn::GetStatic { owner, name, ty }
            }
            op::PUT_STATIC => {
                let (owner, name, ty) = decode_field_ref(r)?;
                Insn::PutStatic { owner, name, ty }
            }
            op::INVOKE => {
                let tag_at = r.offset();
                let kind = invoke_kind_from(r.read_u8()?, tag_at)?;
                Insn::Invoke {
                    kind,
                    owner: ClassName::new(r.read_string()?),
                    name: r.read_string()?,
                    sig: MethodSig::parse(&r.read_string()?)?,
                }
            }
            op::JUMP => Insn::Jump {
                target: Label(r.read_u32()?),
            },
            op::JUMP_IF_ZERO => Insn::JumpIfZero {
                target: Label(r.read_u32()?),
            },
            op::MARK => Insn::Mark(Label(r.read_u32()?)),
            op::RETURN => {
                let tag_at = r.offset();
                let tag = r.read_u8()?;
                if tag == RETURN_VOID {
                    Insn::Return(None)
                } else {
                    Insn::Return(Some(slot_kind_from(tag, tag_at)?))
                }
            }
            other => return Err(DecodeError::InvalidOpcode(other, at)),
        })
    }
}

fn encode_field_ref(w: &mut BytecodeWriter, owner: &ClassName, name: &str, ty: &TypeDesc) {
    w.emit_str(owner.as_str());
    w.emit_str(name);
    w.emit_str(&ty.to_string());
}

fn decode_field_ref(
    r: &mut BytecodeReader<'_>,
) -> Result<(ClassName, String, TypeDesc), DecodeError> {
    let owner = ClassName::new(r.read_string()?);
    let name = r.read_string()?;
    let ty = TypeDesc::parse(&r.read_string()?)?;
    Ok((owner, name, ty))
}

impl MethodBody {
    fn encode(&self, w: &mut BytecodeWriter) {
        w.emit_u16(self.access);
        w.emit_str(&self.name);
        w.emit_str(&self.sig.to_string());
        w.emit_u16(self.max_locals);
        w.emit_u32(self.insns.len() as u32);
        for insn in &self.insns {
            insn.encode(w);
        }
    }

    fn decode(r: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let access = r.read_u16()?;
        let name = r.read_string()?;
        let sig = MethodSig::parse(&r.read_string()?)?;
        let max_locals = r.read_u16()?;
        let count = r.read_u32()? as usize;
        let mut insns = Vec::with_capacity(count);
        for _ in 0..count {
            insns.push(Insn::decode(r)?);
        }
        Ok(Self {
            access,
            name,
            sig,
            max_locals,
            insns,
        })
    }
}

impl FieldNode {
    fn encode(&self, w: &mut BytecodeWriter) {
        w.emit_u16(self.access);
        w.emit_str(&self.name);
        w.emit_str(&self.ty.to_string());
    }

    fn decode(r: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            access: r.read_u16()?,
            name: r.read_string()?,
            ty: TypeDesc::parse(&r.read_string()?)?,
        })
    }
}

impl ClassNode {
    /// Encode this class into container bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut payload = BytecodeWriter::new();
        payload.emit_u16(self.access);
        payload.emit_str(self.name.as_str());
        payload.emit_str(self.super_name.as_str());
        payload.emit_u32(self.fields.len() as u32);
        for field in &self.fields {
            field.encode(&mut payload);
        }
        payload.emit_u32(self.methods.len() as u32);
        for method in &self.methods {
            method.encode(&mut payload);
        }
        let payload = payload.into_bytes();

        let mut w = BytecodeWriter::new();
        w.emit_u8(MAGIC[0]);
        w.emit_u8(MAGIC[1]);
        w.emit_u8(MAGIC[2]);
        w.emit_u8(MAGIC[3]);
        w.emit_u32(VERSION);
        w.emit_u32(crc32fast::hash(&payload));
        let mut bytes = w.into_bytes();
        bytes.extend_from_slice(&payload);
        bytes
    }

    /// Decode a class from container bytes, verifying magic, version and
    /// checksum.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut r = BytecodeReader::new(bytes);
        let magic = [r.read_u8()?, r.read_u8()?, r.read_u8()?, r.read_u8()?];
        if magic != MAGIC {
            return Err(DecodeError::InvalidMagic(magic));
        }
        let version = r.read_u32()?;
        if version != VERSION {
            return Err(DecodeError::UnsupportedVersion(version));
        }
        let expected = r.read_u32()?;
        let payload = &bytes[r.offset()..];
        let actual = crc32fast::hash(payload);
        if expected != actual {
            return Err(DecodeError::ChecksumMismatch { expected, actual });
        }

        let access = r.read_u16()?;
        let name = ClassName::new(r.read_string()?);
        let super_name = ClassName::new(r.read_string()?);
        let field_count = r.read_u32()? as usize;
        let mut fields = Vec::with_capacity(field_count);
        for _ in 0..field_count {
            fields.push(FieldNode::decode(&mut r)?);
        }
        let method_count = r.read_u32()? as usize;
        let mut methods = Vec::with_capacity(method_count);
        for _ in 0..method_count {
            methods.push(MethodBody::decode(&mut r)?);
        }
        Ok(Self {
            access,
            name,
            super_name,
            fields,
            methods,
        })
    }
}
