//! Builders for the circuit-control and session messages both ends send.
//!
//! Inputs are typed, so every value fits its field; text is clipped to the
//! field's length limit.

use crate::message::{Block, Message, Value};
use crate::template::{
    FieldKind, AGENT_THROTTLE, CHAT_FROM_SIMULATOR, CHAT_FROM_VIEWER,
    CLOSE_CIRCUIT, COMPLETE_AGENT_MOVEMENT, COMPLETE_PING_CHECK, LOGOUT_REPLY, LOGOUT_REQUEST,
    OBJECT_NAME, PACKET_ACK, START_PING_CHECK, USE_CIRCUIT_CODE,
};
use uuid::Uuid;

/// Most ids a single PacketAck can carry.
pub const MAX_ACKS_PER_PACKET: usize = u8::MAX as usize;

/// Number of throttle categories carried by AgentThrottle.
pub const THROTTLE_CATEGORIES: usize = 7;

fn push(message: &mut Message, name: &str, values: Vec<Value>) {
    let template = message.template();
    if let Some(index) = template.block_index(name) {
        let block_template = &template.blocks[index];
        debug_assert!(Block::new(block_template, values.clone()).is_ok());
        message.push_decoded(index, Block::from_decoded(block_template, values));
    }
}

fn clipped_text(text: &str, kind: FieldKind) -> Value {
    let max = kind.max_len().saturating_sub(1);
    let mut end = text.len().min(max);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    Value::text(&text[..end])
}

fn agent_data(message: &mut Message, agent: Uuid, session: Uuid) {
    push(message, "AgentData", vec![Value::Uuid(agent), Value::Uuid(session)]);
}

/// PacketAck for up to [`MAX_ACKS_PER_PACKET`] ids; extra ids are ignored.
pub fn packet_ack(acks: &[u32]) -> Message {
    let mut message = Message::new(&PACKET_ACK);
    for ack in acks.iter().take(MAX_ACKS_PER_PACKET) {
        push(&mut message, "Packets", vec![Value::U32(*ack)]);
    }
    message
}

pub fn close_circuit() -> Message {
    Message::new(&CLOSE_CIRCUIT)
}

pub fn start_ping_check(ping_id: u8, oldest_unacked: u32) -> Message {
    let mut message = Message::new(&START_PING_CHECK);
    push(
        &mut message,
        "PingID",
        vec![Value::U8(ping_id), Value::U32(oldest_unacked)],
    );
    message
}

pub fn complete_ping_check(ping_id: u8) -> Message {
    let mut message = Message::new(&COMPLETE_PING_CHECK);
    push(&mut message, "PingID", vec![Value::U8(ping_id)]);
    message
}

pub fn use_circuit_code(code: u32, session: Uuid, agent: Uuid) -> Message {
    let mut message = Message::new(&USE_CIRCUIT_CODE);
    push(
        &mut message,
        "CircuitCode",
        vec![Value::U32(code), Value::Uuid(session), Value::Uuid(agent)],
    );
    message
}

pub fn complete_agent_movement(agent: Uuid, session: Uuid, code: u32) -> Message {
    let mut message = Message::new(&COMPLETE_AGENT_MOVEMENT);
    push(
        &mut message,
        "AgentData",
        vec![Value::Uuid(agent), Value::Uuid(session), Value::U32(code)],
    );
    message
}

pub fn logout_request(agent: Uuid, session: Uuid) -> Message {
    let mut message = Message::new(&LOGOUT_REQUEST);
    agent_data(&mut message, agent, session);
    message
}

pub fn logout_reply(agent: Uuid, session: Uuid) -> Message {
    let mut message = Message::new(&LOGOUT_REPLY);
    agent_data(&mut message, agent, session);
    message
}

pub fn chat_from_viewer(agent: Uuid, session: Uuid, text: &str, chat_type: u8, channel: i32) -> Message {
    let mut message = Message::new(&CHAT_FROM_VIEWER);
    agent_data(&mut message, agent, session);
    push(
        &mut message,
        "ChatData",
        vec![
            clipped_text(text, FieldKind::Variable2),
            Value::U8(chat_type),
            Value::S32(channel),
        ],
    );
    message
}

pub struct SimulatorChat<'a> {
    pub from_name: &'a str,
    pub source: Uuid,
    pub owner: Uuid,
    pub source_type: u8,
    pub chat_type: u8,
    pub position: [f32; 3],
    pub text: &'a str,
}

pub fn chat_from_simulator(chat: &SimulatorChat<'_>) -> Message {
    let mut message = Message::new(&CHAT_FROM_SIMULATOR);
    push(
        &mut message,
        "ChatData",
        vec![
            clipped_text(chat.from_name, FieldKind::Variable1),
            Value::Uuid(chat.source),
            Value::Uuid(chat.owner),
            Value::U8(chat.source_type),
            Value::U8(chat.chat_type),
            Value::U8(1),
            Value::Vector3(chat.position),
            clipped_text(chat.text, FieldKind::Variable2),
        ],
    );
    message
}

/// ObjectName for up to 255 `(local id, name)` pairs.
pub fn object_name(agent: Uuid, session: Uuid, objects: &[(u32, &str)]) -> Message {
    let mut message = Message::new(&OBJECT_NAME);
    agent_data(&mut message, agent, session);
    for (local_id, name) in objects.iter().take(u8::MAX as usize) {
        push(
            &mut message,
            "ObjectData",
            vec![Value::U32(*local_id), clipped_text(name, FieldKind::Variable1)],
        );
    }
    message
}

/// AgentThrottle carrying seven bit-per-second rates, in the order
/// resend, land, wind, cloud, task, texture, asset.
pub fn agent_throttle(
    agent: Uuid,
    session: Uuid,
    code: u32,
    generation: u32,
    bits_per_second: [f32; THROTTLE_CATEGORIES],
) -> Message {
    let mut rates = Vec::with_capacity(THROTTLE_CATEGORIES * 4);
    for rate in bits_per_second {
        rates.extend_from_slice(&rate.to_le_bytes());
    }

    let mut message = Message::new(&AGENT_THROTTLE);
    push(
        &mut message,
        "AgentData",
        vec![Value::Uuid(agent), Value::Uuid(session), Value::U32(code)],
    );
    push(
        &mut message,
        "Throttle",
        vec![Value::U32(generation), Value::Bytes(rates)],
    );
    message
}

/// Reads the seven rates back out of an AgentThrottle. `None` when the
/// payload is shorter than seven floats.
pub fn throttle_rates(message: &Message) -> Option<[f32; THROTTLE_CATEGORIES]> {
    let bytes = message.field("Throttle", "Throttles")?.as_bytes()?;
    if bytes.len() < THROTTLE_CATEGORIES * 4 {
        return None;
    }
    let mut rates = [0f32; THROTTLE_CATEGORIES];
    for (rate, chunk) in rates.iter_mut().zip(bytes.chunks_exact(4)) {
        *rate = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    Some(rates)
}

/// Sequence numbers listed in a PacketAck.
pub fn acked_sequences(message: &Message) -> Vec<u32> {
    message
        .blocks("Packets")
        .iter()
        .filter_map(|b| b.get("ID").and_then(Value::as_u32))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode, encode, Packet};
    use crate::template::TemplateRegistry;

    #[test]
    fn test_builders_encode() {
        let agent = Uuid::new_v4();
        let session = Uuid::new_v4();
        let built = vec![
            packet_ack(&[1, 2, 3]),
            close_circuit(),
            start_ping_check(1, 0),
            complete_ping_check(1),
            use_circuit_code(123456, session, agent),
            complete_agent_movement(agent, session, 123456),
            logout_request(agent, session),
            logout_reply(agent, session),
            chat_from_viewer(agent, session, "hello", 1, 0),
            object_name(agent, session, &[(1, "helloooo")]),
            agent_throttle(agent, session, 123456, 0, [1.0; THROTTLE_CATEGORIES]),
            chat_from_simulator(&SimulatorChat {
                from_name: "Region",
                source: agent,
                owner: agent,
                source_type: 1,
                chat_type: 1,
                position: [0.0; 3],
                text: "hi",
            }),
        ];

        let registry = TemplateRegistry::standard();
        for message in built {
            assert!(message.is_complete(), "{}", message.name());
            let bytes = encode(&Packet::new(1, message.clone())).unwrap();
            assert_eq!(decode(&bytes, &registry).unwrap().message, message);
        }
    }

    #[test]
    fn test_packet_ack_caps_at_255() {
        let ids: Vec<u32> = (0..300).collect();
        let message = packet_ack(&ids);
        assert_eq!(acked_sequences(&message).len(), MAX_ACKS_PER_PACKET);
        assert_eq!(acked_sequences(&message)[254], 254);
    }

    #[test]
    fn test_throttle_rates_roundtrip() {
        let rates = [100.0, 200.0, 300.0, 400.0, 500.0, 600.0, 700.0];
        let message = agent_throttle(Uuid::nil(), Uuid::nil(), 1, 3, rates);
        assert_eq!(throttle_rates(&message), Some(rates));
    }

    #[test]
    fn test_long_text_clipped() {
        let long = "x".repeat(400);
        let message = object_name(Uuid::nil(), Uuid::nil(), &[(7, long.as_str())]);
        let name = message.field("ObjectData", "Name").unwrap();
        assert_eq!(name.as_bytes().unwrap().len(), 255);
        assert_eq!(name.as_text().unwrap().len(), 254);
    }
}
