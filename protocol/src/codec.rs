//! Packet framing.
//!
//! Encoding is split in two steps so a body can be built once and framed
//! many times with different sequence numbers and ack lists:
//! [`encode_body`] serializes (and possibly zero-codes) the message, and
//! [`frame`] wraps it with a header and trailing acks.

use crate::error::{DecodeError, EncodeError};
use crate::header::{MessageId, PacketFlags, PacketHeader};
use crate::message::{Block, Message, Value};
use crate::template::{FieldKind, MessageTemplate, Quantity, TemplateRegistry};
use crate::zerocode;
use std::net::Ipv4Addr;
use uuid::Uuid;

/// A full datagram: header, message and appended acks.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    /// Only `RELIABLE` and `RESENT` are honoured on encode; `ZEROCODED` and
    /// `ACK` are derived from the template and the ack list.
    pub flags: PacketFlags,
    pub sequence: u32,
    pub extra: Vec<u8>,
    pub message: Message,
    pub acks: Vec<u32>,
}

impl Packet {
    pub fn new(sequence: u32, message: Message) -> Self {
        Self {
            flags: PacketFlags::empty(),
            sequence,
            extra: Vec::new(),
            message,
            acks: Vec::new(),
        }
    }

    pub fn reliable(sequence: u32, message: Message) -> Self {
        let mut packet = Self::new(sequence, message);
        packet.flags |= PacketFlags::RELIABLE;
        packet
    }

    pub fn is_reliable(&self) -> bool {
        self.flags.contains(PacketFlags::RELIABLE)
    }

    pub fn is_resent(&self) -> bool {
        self.flags.contains(PacketFlags::RESENT)
    }

    pub fn name(&self) -> &'static str {
        self.message.name()
    }
}

/// Serialized message id and blocks, ready to be framed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedBody {
    pub bytes: Vec<u8>,
    pub zerocoded: bool,
}

/// Serializes a message body, zero-coding it when the template allows and
/// the result is strictly smaller.
pub fn encode_body(message: &Message) -> Result<EncodedBody, EncodeError> {
    let template = message.template();
    if !message.is_complete() {
        let missing = message
            .block_groups()
            .find(|(block, instances)| match block.quantity {
                Quantity::Single => instances.len() != 1,
                Quantity::Multiple(n) => instances.len() != n as usize,
                Quantity::Variable => false,
            })
            .map(|(block, _)| block.name)
            .unwrap_or_default();
        return Err(EncodeError::MissingBlock {
            message: template.name,
            block: missing,
        });
    }

    let mut raw = Vec::with_capacity(64);
    template.id.write_to(&mut raw);
    for (block_template, instances) in message.block_groups() {
        if block_template.quantity == Quantity::Variable {
            raw.push(instances.len() as u8);
        }
        for block in instances {
            for (field, value) in block_template.fields.iter().zip(block.values()) {
                write_field(&mut raw, field.kind, value);
            }
        }
    }

    if template.zerocoded {
        let coded = zerocode::encode(&raw);
        if coded.len() < raw.len() {
            return Ok(EncodedBody {
                bytes: coded,
                zerocoded: true,
            });
        }
    }
    Ok(EncodedBody {
        bytes: raw,
        zerocoded: false,
    })
}

/// Wraps an encoded body with a header and appended acks.
pub fn frame(
    flags: PacketFlags,
    sequence: u32,
    extra: &[u8],
    body: &EncodedBody,
    acks: &[u32],
) -> Result<Vec<u8>, EncodeError> {
    if acks.len() > u8::MAX as usize {
        return Err(EncodeError::TooManyAcks { count: acks.len() });
    }

    let mut flags = flags & (PacketFlags::RELIABLE | PacketFlags::RESENT);
    flags.set(PacketFlags::ZEROCODED, body.zerocoded);
    flags.set(PacketFlags::ACK, !acks.is_empty());
    let header = PacketHeader {
        flags,
        sequence,
        extra: extra.to_vec(),
    };

    let mut out = Vec::with_capacity(header.wire_len() + body.bytes.len() + acks.len() * 4 + 1);
    header.write_to(&mut out)?;
    out.extend_from_slice(&body.bytes);
    if !acks.is_empty() {
        for ack in acks {
            out.extend_from_slice(&ack.to_be_bytes());
        }
        out.push(acks.len() as u8);
    }
    Ok(out)
}

pub fn encode(packet: &Packet) -> Result<Vec<u8>, EncodeError> {
    let body = encode_body(&packet.message)?;
    frame(
        packet.flags,
        packet.sequence,
        &packet.extra,
        &body,
        &packet.acks,
    )
}

/// Sets the resent flag on an already framed datagram.
pub fn mark_resent(datagram: &mut [u8]) {
    if let Some(flags) = datagram.first_mut() {
        *flags |= PacketFlags::RESENT.bits();
    }
}

pub fn decode(data: &[u8], registry: &TemplateRegistry) -> Result<Packet, DecodeError> {
    let header = PacketHeader::parse(data)?;
    let body_start = header.wire_len();

    // Acks are plain bytes at the tail; strip them before zero-decoding.
    let mut body_end = data.len();
    let mut acks = Vec::new();
    if header.flags.contains(PacketFlags::ACK) {
        let count = data[data.len() - 1] as usize;
        let available = data.len() - 1 - body_start;
        // At least one body byte must remain for the message id.
        if count * 4 >= available {
            return Err(DecodeError::AckOverrun { count, available });
        }
        body_end = data.len() - 1 - count * 4;
        acks = data[body_end..data.len() - 1]
            .chunks_exact(4)
            .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
    }

    let raw = &data[body_start..body_end];
    let decoded;
    let body: &[u8] = if header.flags.contains(PacketFlags::ZEROCODED) {
        decoded = zerocode::decode(raw)?;
        &decoded
    } else {
        raw
    };

    let (id, id_len) = MessageId::read(body)?;
    let template = registry
        .by_id(id)
        .ok_or(DecodeError::UnknownMessage { id })?;
    let message = decode_blocks(template, &body[id_len..])?;

    Ok(Packet {
        flags: header.flags,
        sequence: header.sequence,
        extra: header.extra,
        message,
        acks,
    })
}

fn decode_blocks(template: &'static MessageTemplate, body: &[u8]) -> Result<Message, DecodeError> {
    let mut reader = Reader::new(body);
    let mut message = Message::new(template);

    for (index, block_template) in template.blocks.iter().enumerate() {
        let count = match block_template.quantity {
            Quantity::Single => 1,
            Quantity::Multiple(n) => n as usize,
            Quantity::Variable => reader.u8("block count")? as usize,
        };
        for _ in 0..count {
            let mut values = Vec::with_capacity(block_template.fields.len());
            for field in block_template.fields {
                values.push(reader.value(field.kind)?);
            }
            message.push_decoded(index, Block::from_decoded(block_template, values));
        }
    }

    if reader.remaining() > 0 {
        return Err(DecodeError::TrailingBytes {
            message: template.name,
            remaining: reader.remaining(),
        });
    }
    Ok(message)
}

fn write_field(out: &mut Vec<u8>, kind: FieldKind, value: &Value) {
    match value {
        Value::U8(v) => out.push(*v),
        Value::U16(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::U32(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::U64(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::S8(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::S16(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::S32(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::F32(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::F64(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::Bool(v) => out.push(*v as u8),
        Value::Uuid(v) => out.extend_from_slice(v.as_bytes()),
        Value::Vector3(v) => v.iter().for_each(|c| out.extend_from_slice(&c.to_le_bytes())),
        Value::Quaternion(v) => v.iter().for_each(|c| out.extend_from_slice(&c.to_le_bytes())),
        Value::IpAddr(v) => out.extend_from_slice(&v.octets()),
        Value::IpPort(v) => out.extend_from_slice(&v.to_be_bytes()),
        Value::Bytes(bytes) => {
            match kind {
                FieldKind::Variable1 => out.push(bytes.len() as u8),
                FieldKind::Variable2 => out.extend_from_slice(&(bytes.len() as u16).to_le_bytes()),
                _ => {}
            }
            out.extend_from_slice(bytes);
        }
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, len: usize, context: &'static str) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < len {
            return Err(DecodeError::Truncated { context });
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self, context: &'static str) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, context)?);
        Ok(out)
    }

    fn u8(&mut self, context: &'static str) -> Result<u8, DecodeError> {
        Ok(self.take(1, context)?[0])
    }

    fn f32s<const N: usize>(&mut self) -> Result<[f32; N], DecodeError> {
        let mut out = [0f32; N];
        for slot in out.iter_mut() {
            *slot = f32::from_le_bytes(self.array("float")?);
        }
        Ok(out)
    }

    fn value(&mut self, kind: FieldKind) -> Result<Value, DecodeError> {
        let value = match kind {
            FieldKind::U8 => Value::U8(self.u8("u8")?),
            FieldKind::U16 => Value::U16(u16::from_le_bytes(self.array("u16")?)),
            FieldKind::U32 => Value::U32(u32::from_le_bytes(self.array("u32")?)),
            FieldKind::U64 => Value::U64(u64::from_le_bytes(self.array("u64")?)),
            FieldKind::S8 => Value::S8(i8::from_le_bytes(self.array("s8")?)),
            FieldKind::S16 => Value::S16(i16::from_le_bytes(self.array("s16")?)),
            FieldKind::S32 => Value::S32(i32::from_le_bytes(self.array("s32")?)),
            FieldKind::F32 => Value::F32(f32::from_le_bytes(self.array("f32")?)),
            FieldKind::F64 => Value::F64(f64::from_le_bytes(self.array("f64")?)),
            FieldKind::Bool => Value::Bool(self.u8("bool")? != 0),
            FieldKind::Uuid => Value::Uuid(Uuid::from_bytes(self.array("uuid")?)),
            FieldKind::Vector3 => Value::Vector3(self.f32s()?),
            FieldKind::Quaternion => Value::Quaternion(self.f32s()?),
            FieldKind::IpAddr => Value::IpAddr(Ipv4Addr::from(self.array::<4>("ip address")?)),
            FieldKind::IpPort => Value::IpPort(u16::from_be_bytes(self.array("ip port")?)),
            FieldKind::Fixed(n) => Value::Bytes(self.take(n, "fixed field")?.to_vec()),
            FieldKind::Variable1 => {
                let len = self.u8("variable length")? as usize;
                Value::Bytes(self.take(len, "variable field")?.to_vec())
            }
            FieldKind::Variable2 => {
                let len = u16::from_le_bytes(self.array("variable length")?) as usize;
                Value::Bytes(self.take(len, "variable field")?.to_vec())
            }
        };
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::{
        BlockTemplate, FieldTemplate, AGENT_THROTTLE, CHAT_FROM_SIMULATOR, CLOSE_CIRCUIT,
        LOGOUT_REPLY, LOGOUT_REQUEST, OBJECT_NAME, PACKET_ACK, STANDARD_TEMPLATES, START_PING_CHECK,
        USE_CIRCUIT_CODE,
    };
    use proptest::prelude::*;

    fn registry() -> TemplateRegistry {
        TemplateRegistry::standard()
    }

    fn object_name(local_id: u32, name: &str) -> Message {
        Message::new(&OBJECT_NAME)
            .with_block(
                "AgentData",
                vec![Value::Uuid(Uuid::nil()), Value::Uuid(Uuid::nil())],
            )
            .unwrap()
            .with_block("ObjectData", vec![Value::U32(local_id), Value::text(name)])
            .unwrap()
    }

    fn ping(id: u8) -> Message {
        Message::new(&START_PING_CHECK)
            .with_block("PingID", vec![Value::U8(id), Value::U32(0)])
            .unwrap()
    }

    #[test]
    fn test_unreliable_ping_layout() {
        let bytes = encode(&Packet::new(5, ping(9))).unwrap();
        assert_eq!(bytes, vec![0x00, 0, 0, 0, 5, 0, 0x01, 9, 0, 0, 0, 0]);
    }

    #[test]
    fn test_roundtrip_with_acks() {
        let mut packet = Packet::reliable(77, object_name(1, "helloooo"));
        packet.acks = vec![3, 4, 0x0102_0304];

        let bytes = encode(&packet).unwrap();
        let flags = PacketFlags::from_bits_truncate(bytes[0]);
        assert!(flags.contains(PacketFlags::RELIABLE | PacketFlags::ACK | PacketFlags::ZEROCODED));
        assert_eq!(*bytes.last().unwrap(), 3);

        let decoded = decode(&bytes, &registry()).unwrap();
        assert_eq!(decoded.sequence, 77);
        assert_eq!(decoded.acks, vec![3, 4, 0x0102_0304]);
        assert_eq!(decoded.message, packet.message);
        assert!(decoded.is_reliable());
        assert!(!decoded.is_resent());
    }

    #[test]
    fn test_zerocode_skipped_when_not_smaller() {
        let msg = Message::new(&AGENT_THROTTLE)
            .with_block(
                "AgentData",
                vec![
                    Value::Uuid(Uuid::from_bytes([7; 16])),
                    Value::Uuid(Uuid::from_bytes([9; 16])),
                    Value::U32(0x01010101),
                ],
            )
            .unwrap()
            .with_block("Throttle", vec![Value::U32(0x01010101), Value::Bytes(vec![1; 28])])
            .unwrap();

        // Low ids start with 0xFF 0xFF 0x00, so one zero exists; coding it
        // costs a byte and gains nothing.
        let body = encode_body(&msg).unwrap();
        assert!(!body.zerocoded);
    }

    #[test]
    fn test_zero_coded_body_leaves_header_and_acks_raw() {
        let mut packet = Packet::reliable(0x0000_0100, object_name(0, ""));
        packet.acks = vec![0];
        let bytes = encode(&packet).unwrap();

        assert_eq!(&bytes[1..5], &[0, 0, 1, 0]);
        assert_eq!(&bytes[bytes.len() - 5..], &[0, 0, 0, 0, 1]);
        let decoded = decode(&bytes, &registry()).unwrap();
        assert_eq!(decoded.acks, vec![0]);
    }

    #[test]
    fn test_flag_bits_derived_not_trusted() {
        let mut packet = Packet::new(1, ping(1));
        packet.flags = PacketFlags::ZEROCODED | PacketFlags::ACK;
        let bytes = encode(&packet).unwrap();
        assert_eq!(bytes[0], 0);
    }

    #[test]
    fn test_fixed_id_without_blocks() {
        let bytes = encode(&Packet::new(2, Message::new(&CLOSE_CIRCUIT))).unwrap();
        assert_eq!(&bytes[6..], &[0xFF, 0xFF, 0xFF, 0xFD]);
        assert_eq!(decode(&bytes, &registry()).unwrap().name(), "CloseCircuit");
    }

    #[test]
    fn test_missing_single_block() {
        let err = encode(&Packet::new(1, Message::new(&USE_CIRCUIT_CODE))).unwrap_err();
        assert_eq!(
            err,
            EncodeError::MissingBlock {
                message: "UseCircuitCode",
                block: "CircuitCode"
            }
        );
    }

    #[test]
    fn test_too_many_acks() {
        let mut packet = Packet::new(1, ping(1));
        packet.acks = (0..256).collect();
        assert_eq!(encode(&packet), Err(EncodeError::TooManyAcks { count: 256 }));
    }

    #[test]
    fn test_mark_resent() {
        let mut bytes = encode(&Packet::reliable(3, ping(1))).unwrap();
        mark_resent(&mut bytes);
        let decoded = decode(&bytes, &registry()).unwrap();
        assert!(decoded.is_resent());
        assert!(decoded.is_reliable());
    }

    #[test]
    fn test_malformed_inputs() {
        let reg = registry();
        assert!(matches!(decode(&[1, 2, 3, 4], &reg), Err(DecodeError::TooShort { .. })));

        // Ack flag with a count larger than the datagram.
        let bad_acks = [0x10, 0, 0, 0, 1, 0, 0x01, 9, 0, 0, 0, 0, 50];
        assert!(matches!(decode(&bad_acks, &reg), Err(DecodeError::AckOverrun { .. })));

        // Unknown high id.
        assert!(matches!(
            decode(&[0, 0, 0, 0, 1, 0, 0x7E], &reg),
            Err(DecodeError::UnknownMessage { .. })
        ));

        // Ping missing its OldestUnacked field.
        assert!(matches!(
            decode(&[0, 0, 0, 0, 1, 0, 0x01, 9, 0], &reg),
            Err(DecodeError::Truncated { .. })
        ));

        // Trailing junk after the last block.
        assert!(matches!(
            decode(&[0, 0, 0, 0, 1, 0, 0x02, 9, 1], &reg),
            Err(DecodeError::TrailingBytes { .. })
        ));

        // Zero-coded body ending in a bare zero.
        assert!(matches!(
            decode(&[0x80, 0, 0, 0, 1, 0, 0x02, 0], &reg),
            Err(DecodeError::ZeroRunTruncated)
        ));
    }

    #[test]
    fn test_variable_count_overrun() {
        // PacketAck claiming 5 ids with room for one.
        let bytes = [0, 0, 0, 0, 1, 0, 0xFF, 0xFF, 0xFF, 0xFB, 5, 1, 0, 0, 0];
        assert!(matches!(
            decode(&bytes, &registry()),
            Err(DecodeError::Truncated { .. })
        ));
    }

    #[test]
    fn test_multiple_quantity_block() {
        static PAIR: MessageTemplate = MessageTemplate {
            name: "Pair",
            id: crate::header::MessageId::Medium(3),
            zerocoded: false,
            blocks: &[BlockTemplate {
                name: "Entry",
                quantity: Quantity::Multiple(2),
                fields: &[FieldTemplate {
                    name: "Value",
                    kind: FieldKind::S16,
                }],
            }],
        };
        let mut reg = registry();
        reg.register(&PAIR).unwrap();

        let one = Message::new(&PAIR)
            .with_block("Entry", vec![Value::S16(-2)])
            .unwrap();
        assert!(encode(&Packet::new(1, one.clone())).is_err());

        let both = one.with_block("Entry", vec![Value::S16(300)]).unwrap();
        let bytes = encode(&Packet::new(1, both.clone())).unwrap();
        assert_eq!(&bytes[6..], &[0xFF, 3, 0xFE, 0xFF, 0x2C, 0x01]);
        assert_eq!(decode(&bytes, &reg).unwrap().message, both);
    }

    #[test]
    fn test_standard_messages_roundtrip() {
        let agent = Uuid::new_v4();
        let session = Uuid::new_v4();
        let messages = vec![
            Message::new(&PACKET_ACK)
                .with_block("Packets", vec![Value::U32(10)])
                .unwrap()
                .with_block("Packets", vec![Value::U32(11)])
                .unwrap(),
            Message::new(&USE_CIRCUIT_CODE)
                .with_block(
                    "CircuitCode",
                    vec![Value::U32(123456), Value::Uuid(session), Value::Uuid(agent)],
                )
                .unwrap(),
            Message::new(&CHAT_FROM_SIMULATOR)
                .with_block(
                    "ChatData",
                    vec![
                        Value::text("Region"),
                        Value::Uuid(agent),
                        Value::Uuid(agent),
                        Value::U8(2),
                        Value::U8(1),
                        Value::U8(1),
                        Value::Vector3([128.0, 128.5, 22.25]),
                        Value::text("hi there"),
                    ],
                )
                .unwrap(),
            Message::new(&LOGOUT_REPLY)
                .with_block("AgentData", vec![Value::Uuid(agent), Value::Uuid(session)])
                .unwrap(),
        ];

        for message in messages {
            let bytes = encode(&Packet::reliable(9, message.clone())).unwrap();
            let decoded = decode(&bytes, &registry()).unwrap();
            assert_eq!(decoded.message, message, "{}", message.name());
        }
    }

    fn sample_value(kind: FieldKind, seed: u8) -> Value {
        match kind {
            FieldKind::U8 => Value::U8(seed),
            FieldKind::U16 => Value::U16(0x0100 | u16::from(seed)),
            FieldKind::U32 => Value::U32(0x0001_0000 | u32::from(seed)),
            FieldKind::U64 => Value::U64(0x1_0000_0000 | u64::from(seed)),
            FieldKind::S8 => Value::S8(-(seed as i8 & 0x3f)),
            FieldKind::S16 => Value::S16(-300 - i16::from(seed)),
            FieldKind::S32 => Value::S32(-70_000 - i32::from(seed)),
            FieldKind::F32 => Value::F32(f32::from(seed) + 0.5),
            FieldKind::F64 => Value::F64(f64::from(seed) * 0.25),
            FieldKind::Bool => Value::Bool(seed % 2 == 1),
            FieldKind::Uuid => Value::Uuid(Uuid::from_u128(0xabcd_0000 + u128::from(seed))),
            FieldKind::Vector3 => Value::Vector3([1.5, f32::from(seed), -2.0]),
            FieldKind::Quaternion => Value::Quaternion([0.0, 0.5, f32::from(seed), 1.0]),
            FieldKind::IpAddr => Value::IpAddr(Ipv4Addr::new(10, 0, 0, seed)),
            FieldKind::IpPort => Value::IpPort(9000 + u16::from(seed)),
            FieldKind::Fixed(n) => Value::Bytes((0..n).map(|i| (i as u8) ^ seed).collect()),
            FieldKind::Variable1 => Value::Bytes(vec![seed, 0, 7, 0]),
            FieldKind::Variable2 => Value::Bytes((0..300u16).map(|i| (i % 5) as u8 * seed).collect()),
        }
    }

    #[test]
    fn test_every_standard_template_roundtrip() {
        for template in STANDARD_TEMPLATES {
            let mut message = Message::new(template);
            let mut seed = 1u8;
            for block in template.blocks {
                let instances = match block.quantity {
                    Quantity::Single => 1,
                    Quantity::Multiple(n) => usize::from(n),
                    Quantity::Variable => 3,
                };
                for _ in 0..instances {
                    let values = block.fields.iter().map(|f| sample_value(f.kind, seed)).collect();
                    message.push_block(block.name, values).unwrap();
                    seed = seed.wrapping_add(1);
                }
            }

            let mut packet = Packet::reliable(77, message.clone());
            packet.acks = vec![5, 6];
            let bytes = encode(&packet).unwrap();
            let decoded = decode(&bytes, &registry()).unwrap();
            assert_eq!(decoded.message, message, "{}", template.name);
            assert_eq!(decoded.acks, vec![5, 6], "{}", template.name);
            assert_eq!(decoded.message.template().id, template.id);
        }
    }

    #[test]
    fn test_frame_rejects_oversized_extra() {
        let mut packet = Packet::reliable(1, Message::new(&LOGOUT_REQUEST)
            .with_block("AgentData", vec![Value::Uuid(Uuid::nil()), Value::Uuid(Uuid::nil())])
            .unwrap());
        packet.extra = vec![1; 256];
        assert!(matches!(encode(&packet), Err(EncodeError::ExtraTooLong { len: 256 })));

        packet.extra.truncate(255);
        let decoded = decode(&encode(&packet).unwrap(), &registry()).unwrap();
        assert_eq!(decoded.extra.len(), 255);
    }

    proptest! {
        #[test]
        fn prop_object_name_roundtrip(
            sequence in 1u32..0x00FF_FFFF,
            names in proptest::collection::vec(("[a-z ]{0,40}", any::<u32>()), 0..20),
            acks in proptest::collection::vec(any::<u32>(), 0..10),
            reliable in any::<bool>(),
        ) {
            let mut message = Message::new(&OBJECT_NAME)
                .with_block("AgentData", vec![Value::Uuid(Uuid::nil()), Value::Uuid(Uuid::nil())])
                .unwrap();
            for (name, id) in &names {
                message.push_block("ObjectData", vec![Value::U32(*id), Value::text(name)]).unwrap();
            }
            let mut packet = if reliable { Packet::reliable(sequence, message) } else { Packet::new(sequence, message) };
            packet.acks = acks.clone();

            let decoded = decode(&encode(&packet).unwrap(), &registry()).unwrap();
            prop_assert_eq!(decoded.sequence, sequence);
            prop_assert_eq!(&decoded.acks, &acks);
            prop_assert_eq!(decoded.is_reliable(), reliable);
            prop_assert_eq!(decoded.message, packet.message);
        }

        #[test]
        fn prop_decode_never_panics(data in proptest::collection::vec(any::<u8>(), 0..256)) {
            let _ = decode(&data, &registry());
        }
    }
}
