//! Decoded message bodies.
//!
//! A [`Message`] always matches its template: blocks and values are checked
//! as they are pushed, so anything that can be built can also be encoded.

use crate::error::TemplateError;
use crate::template::{BlockTemplate, FieldKind, MessageTemplate, Quantity};
use std::net::Ipv4Addr;
use uuid::Uuid;

/// One field value. Byte-string kinds (`Fixed`, `Variable1`, `Variable2`)
/// all carry [`Value::Bytes`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    S8(i8),
    S16(i16),
    S32(i32),
    F32(f32),
    F64(f64),
    Bool(bool),
    Uuid(Uuid),
    Vector3([f32; 3]),
    Quaternion([f32; 4]),
    IpAddr(Ipv4Addr),
    IpPort(u16),
    Bytes(Vec<u8>),
}

impl Value {
    /// NUL-terminated text, the usual encoding for names and chat.
    pub fn text(s: &str) -> Self {
        let mut bytes = Vec::with_capacity(s.len() + 1);
        bytes.extend_from_slice(s.as_bytes());
        bytes.push(0);
        Value::Bytes(bytes)
    }

    /// Whether this value can be written as a field of `kind`.
    pub fn fits(&self, kind: FieldKind) -> bool {
        match (self, kind) {
            (Value::U8(_), FieldKind::U8)
            | (Value::U16(_), FieldKind::U16)
            | (Value::U32(_), FieldKind::U32)
            | (Value::U64(_), FieldKind::U64)
            | (Value::S8(_), FieldKind::S8)
            | (Value::S16(_), FieldKind::S16)
            | (Value::S32(_), FieldKind::S32)
            | (Value::F32(_), FieldKind::F32)
            | (Value::F64(_), FieldKind::F64)
            | (Value::Bool(_), FieldKind::Bool)
            | (Value::Uuid(_), FieldKind::Uuid)
            | (Value::Vector3(_), FieldKind::Vector3)
            | (Value::Quaternion(_), FieldKind::Quaternion)
            | (Value::IpAddr(_), FieldKind::IpAddr)
            | (Value::IpPort(_), FieldKind::IpPort) => true,
            (Value::Bytes(b), FieldKind::Fixed(n)) => b.len() == n,
            (Value::Bytes(b), FieldKind::Variable1 | FieldKind::Variable2) => {
                b.len() <= kind.max_len()
            }
            _ => false,
        }
    }

    pub fn as_u8(&self) -> Option<u8> {
        match self {
            Value::U8(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Value::U32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::S32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Value::F32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Value::Uuid(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(v) => Some(v),
            _ => None,
        }
    }

    /// Byte string as text, without the trailing NUL.
    pub fn as_text(&self) -> Option<String> {
        let bytes = self.as_bytes()?;
        let trimmed = bytes.strip_suffix(&[0]).unwrap_or(bytes);
        Some(String::from_utf8_lossy(trimmed).into_owned())
    }
}

/// One instance of a block.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    template: &'static BlockTemplate,
    values: Vec<Value>,
}

impl Block {
    /// Checks `values` against `template` field by field.
    pub fn new(template: &'static BlockTemplate, values: Vec<Value>) -> Result<Self, TemplateError> {
        if values.len() != template.fields.len() {
            return Err(TemplateError::FieldCount {
                block: template.name,
                expected: template.fields.len(),
                got: values.len(),
            });
        }
        for (field, value) in template.fields.iter().zip(&values) {
            if !value.fits(field.kind) {
                return Err(TemplateError::FieldKind {
                    field: field.name,
                    expected: field.kind,
                });
            }
        }
        Ok(Self { template, values })
    }

    /// Used by the decoder, which reads values straight from the template.
    pub(crate) fn from_decoded(template: &'static BlockTemplate, values: Vec<Value>) -> Self {
        Self { template, values }
    }

    pub fn template(&self) -> &'static BlockTemplate {
        self.template
    }

    pub fn name(&self) -> &'static str {
        self.template.name
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.template.field_index(field).map(|i| &self.values[i])
    }
}

/// A message body: template plus the block instances for each template block.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    template: &'static MessageTemplate,
    // One entry per template block, in template order.
    blocks: Vec<Vec<Block>>,
}

impl Message {
    pub fn new(template: &'static MessageTemplate) -> Self {
        Self {
            template,
            blocks: vec![Vec::new(); template.blocks.len()],
        }
    }

    pub fn template(&self) -> &'static MessageTemplate {
        self.template
    }

    pub fn name(&self) -> &'static str {
        self.template.name
    }

    /// Appends one instance of the named block.
    pub fn push_block(&mut self, name: &str, values: Vec<Value>) -> Result<&mut Self, TemplateError> {
        let index = self
            .template
            .block_index(name)
            .ok_or_else(|| TemplateError::UnknownBlock {
                message: self.template.name,
                block: name.to_string(),
            })?;
        let block_template = &self.template.blocks[index];

        let max = block_template.quantity.max_instances();
        if self.blocks[index].len() >= max {
            return Err(TemplateError::BlockFull {
                block: block_template.name,
                max,
            });
        }

        let block = Block::new(block_template, values)?;
        self.blocks[index].push(block);
        Ok(self)
    }

    /// Builder form of [`push_block`](Self::push_block).
    pub fn with_block(mut self, name: &str, values: Vec<Value>) -> Result<Self, TemplateError> {
        self.push_block(name, values)?;
        Ok(self)
    }

    pub(crate) fn push_decoded(&mut self, index: usize, block: Block) {
        self.blocks[index].push(block);
    }

    /// All instances of the named block; empty when the name is unknown.
    pub fn blocks(&self, name: &str) -> &[Block] {
        match self.template.block_index(name) {
            Some(i) => &self.blocks[i],
            None => &[],
        }
    }

    /// First instance of the named block.
    pub fn block(&self, name: &str) -> Option<&Block> {
        self.blocks(name).first()
    }

    /// Shorthand for `block(block)?.get(field)`.
    pub fn field(&self, block: &str, field: &str) -> Option<&Value> {
        self.block(block)?.get(field)
    }

    /// Blocks in template order, paired with their template.
    pub(crate) fn block_groups(&self) -> impl Iterator<Item = (&'static BlockTemplate, &[Block])> {
        self.template
            .blocks
            .iter()
            .zip(self.blocks.iter().map(Vec::as_slice))
    }

    /// Whether every fixed-quantity block holds exactly its declared count.
    pub fn is_complete(&self) -> bool {
        self.block_groups().all(|(template, blocks)| match template.quantity {
            Quantity::Single => blocks.len() == 1,
            Quantity::Multiple(n) => blocks.len() == n as usize,
            Quantity::Variable => true,
        })
    }
}
