//! Message layouts.
//!
//! Every message id maps to a static [`MessageTemplate`] describing its blocks
//! and fields. The codec walks the template to read or write a body, so the
//! table here is the single source of truth for message shapes.

use crate::error::TemplateError;
use crate::header::MessageId;
use std::collections::HashMap;

/// Wire type of a single field. Numerics are little-endian unless noted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    U8,
    U16,
    U32,
    U64,
    S8,
    S16,
    S32,
    F32,
    F64,
    Bool,
    Uuid,
    Vector3,
    Quaternion,
    IpAddr,
    /// Big-endian u16.
    IpPort,
    Fixed(usize),
    /// Byte string with a one-byte length prefix.
    Variable1,
    /// Byte string with a two-byte little-endian length prefix.
    Variable2,
}

impl FieldKind {
    /// Encoded width for fixed-size kinds, `None` for length-prefixed ones.
    pub fn fixed_len(&self) -> Option<usize> {
        let len = match self {
            FieldKind::U8 | FieldKind::S8 | FieldKind::Bool => 1,
            FieldKind::U16 | FieldKind::S16 | FieldKind::IpPort => 2,
            FieldKind::U32 | FieldKind::S32 | FieldKind::F32 | FieldKind::IpAddr => 4,
            FieldKind::U64 | FieldKind::F64 => 8,
            FieldKind::Vector3 => 12,
            FieldKind::Uuid | FieldKind::Quaternion => 16,
            FieldKind::Fixed(n) => *n,
            FieldKind::Variable1 | FieldKind::Variable2 => return None,
        };
        Some(len)
    }

    /// Longest byte string a length-prefixed kind can carry.
    pub fn max_len(&self) -> usize {
        match self {
            FieldKind::Variable1 => u8::MAX as usize,
            FieldKind::Variable2 => u16::MAX as usize,
            other => other.fixed_len().unwrap_or(0),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct FieldTemplate {
    pub name: &'static str,
    pub kind: FieldKind,
}

/// How many instances of a block a message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantity {
    Single,
    Multiple(u8),
    /// Count is written as one byte ahead of the instances.
    Variable,
}

impl Quantity {
    pub fn max_instances(&self) -> usize {
        match self {
            Quantity::Single => 1,
            Quantity::Multiple(n) => *n as usize,
            Quantity::Variable => u8::MAX as usize,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct BlockTemplate {
    pub name: &'static str,
    pub quantity: Quantity,
    pub fields: &'static [FieldTemplate],
}

impl BlockTemplate {
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct MessageTemplate {
    pub name: &'static str,
    pub id: MessageId,
    /// Body may be zero-coded when that makes it smaller.
    pub zerocoded: bool,
    pub blocks: &'static [BlockTemplate],
}

impl MessageTemplate {
    pub fn block_index(&self, name: &str) -> Option<usize> {
        self.blocks.iter().position(|b| b.name == name)
    }
}

macro_rules! field {
    ($name:expr, $kind:expr $(,)?) => {
        FieldTemplate {
            name: $name,
            kind: $kind,
        }
    };
}

macro_rules! block {
    ($name:expr, $quantity:expr, $fields:expr $(,)?) => {
        BlockTemplate {
            name: $name,
            quantity: $quantity,
            fields: $fields,
        }
    };
}

const AGENT_SESSION: &[FieldTemplate] = &[
    field!("AgentID", FieldKind::Uuid),
    field!("SessionID", FieldKind::Uuid),
];

pub static PACKET_ACK: MessageTemplate = MessageTemplate {
    name: "PacketAck",
    id: MessageId::Fixed(0xFB),
    zerocoded: false,
    blocks: &[block!(
        "Packets",
        Quantity::Variable,
        &[field!("ID", FieldKind::U32)],
    )],
};

pub static OPEN_CIRCUIT: MessageTemplate = MessageTemplate {
    name: "OpenCircuit",
    id: MessageId::Fixed(0xFC),
    zerocoded: false,
    blocks: &[block!(
        "CircuitInfo",
        Quantity::Single,
        &[field!("IP", FieldKind::IpAddr), field!("Port", FieldKind::IpPort)],
    )],
};

pub static CLOSE_CIRCUIT: MessageTemplate = MessageTemplate {
    name: "CloseCircuit",
    id: MessageId::Fixed(0xFD),
    zerocoded: false,
    blocks: &[],
};

pub static START_PING_CHECK: MessageTemplate = MessageTemplate {
    name: "StartPingCheck",
    id: MessageId::High(1),
    zerocoded: false,
    blocks: &[block!(
        "PingID",
        Quantity::Single,
        &[
            field!("PingID", FieldKind::U8),
            field!("OldestUnacked", FieldKind::U32),
        ],
    )],
};

pub static COMPLETE_PING_CHECK: MessageTemplate = MessageTemplate {
    name: "CompletePingCheck",
    id: MessageId::High(2),
    zerocoded: false,
    blocks: &[block!(
        "PingID",
        Quantity::Single,
        &[field!("PingID", FieldKind::U8)],
    )],
};

pub static AGENT_UPDATE: MessageTemplate = MessageTemplate {
    name: "AgentUpdate",
    id: MessageId::High(4),
    zerocoded: true,
    blocks: &[block!(
        "AgentData",
        Quantity::Single,
        &[
            field!("AgentID", FieldKind::Uuid),
            field!("SessionID", FieldKind::Uuid),
            field!("BodyRotation", FieldKind::Quaternion),
            field!("HeadRotation", FieldKind::Quaternion),
            field!("State", FieldKind::U8),
            field!("CameraCenter", FieldKind::Vector3),
            field!("CameraAtAxis", FieldKind::Vector3),
            field!("CameraLeftAxis", FieldKind::Vector3),
            field!("CameraUpAxis", FieldKind::Vector3),
            field!("Far", FieldKind::F32),
            field!("ControlFlags", FieldKind::U32),
            field!("Flags", FieldKind::U8),
        ],
    )],
};

pub static LAYER_DATA: MessageTemplate = MessageTemplate {
    name: "LayerData",
    id: MessageId::High(11),
    zerocoded: false,
    blocks: &[
        block!("LayerID", Quantity::Single, &[field!("Type", FieldKind::U8)]),
        block!(
            "LayerData",
            Quantity::Single,
            &[field!("Data", FieldKind::Variable2)],
        ),
    ],
};

pub static IMPROVED_TERSE_OBJECT_UPDATE: MessageTemplate = MessageTemplate {
    name: "ImprovedTerseObjectUpdate",
    id: MessageId::High(15),
    zerocoded: false,
    blocks: &[
        block!(
            "RegionData",
            Quantity::Single,
            &[
                field!("RegionHandle", FieldKind::U64),
                field!("TimeDilation", FieldKind::U16),
            ],
        ),
        block!(
            "ObjectData",
            Quantity::Variable,
            &[
                field!("Data", FieldKind::Variable1),
                field!("TextureEntry", FieldKind::Variable2),
            ],
        ),
    ],
};

pub static KILL_OBJECT: MessageTemplate = MessageTemplate {
    name: "KillObject",
    id: MessageId::High(16),
    zerocoded: false,
    blocks: &[block!(
        "ObjectData",
        Quantity::Variable,
        &[field!("ID", FieldKind::U32)],
    )],
};

pub static USE_CIRCUIT_CODE: MessageTemplate = MessageTemplate {
    name: "UseCircuitCode",
    id: MessageId::Low(3),
    zerocoded: false,
    blocks: &[block!(
        "CircuitCode",
        Quantity::Single,
        &[
            field!("Code", FieldKind::U32),
            field!("SessionID", FieldKind::Uuid),
            field!("ID", FieldKind::Uuid),
        ],
    )],
};

pub static CHAT_FROM_VIEWER: MessageTemplate = MessageTemplate {
    name: "ChatFromViewer",
    id: MessageId::Low(80),
    zerocoded: true,
    blocks: &[
        block!("AgentData", Quantity::Single, AGENT_SESSION),
        block!(
            "ChatData",
            Quantity::Single,
            &[
                field!("Message", FieldKind::Variable2),
                field!("Type", FieldKind::U8),
                field!("Channel", FieldKind::S32),
            ],
        ),
    ],
};

pub static AGENT_THROTTLE: MessageTemplate = MessageTemplate {
    name: "AgentThrottle",
    id: MessageId::Low(81),
    zerocoded: true,
    blocks: &[
        block!(
            "AgentData",
            Quantity::Single,
            &[
                field!("AgentID", FieldKind::Uuid),
                field!("SessionID", FieldKind::Uuid),
                field!("CircuitCode", FieldKind::U32),
            ],
        ),
        block!(
            "Throttle",
            Quantity::Single,
            &[
                field!("GenCounter", FieldKind::U32),
                field!("Throttles", FieldKind::Variable1),
            ],
        ),
    ],
};

pub static OBJECT_NAME: MessageTemplate = MessageTemplate {
    name: "ObjectName",
    id: MessageId::Low(107),
    zerocoded: true,
    blocks: &[
        block!("AgentData", Quantity::Single, AGENT_SESSION),
        block!(
            "ObjectData",
            Quantity::Variable,
            &[
                field!("LocalID", FieldKind::U32),
                field!("Name", FieldKind::Variable1),
            ],
        ),
    ],
};

pub static CHAT_FROM_SIMULATOR: MessageTemplate = MessageTemplate {
    name: "ChatFromSimulator",
    id: MessageId::Low(139),
    zerocoded: false,
    blocks: &[block!(
        "ChatData",
        Quantity::Single,
        &[
            field!("FromName", FieldKind::Variable1),
            field!("SourceID", FieldKind::Uuid),
            field!("OwnerID", FieldKind::Uuid),
            field!("SourceType", FieldKind::U8),
            field!("ChatType", FieldKind::U8),
            field!("Audible", FieldKind::U8),
            field!("Position", FieldKind::Vector3),
            field!("Message", FieldKind::Variable2),
        ],
    )],
};

pub static COMPLETE_AGENT_MOVEMENT: MessageTemplate = MessageTemplate {
    name: "CompleteAgentMovement",
    id: MessageId::Low(249),
    zerocoded: false,
    blocks: &[block!(
        "AgentData",
        Quantity::Single,
        &[
            field!("AgentID", FieldKind::Uuid),
            field!("SessionID", FieldKind::Uuid),
            field!("CircuitCode", FieldKind::U32),
        ],
    )],
};

pub static LOGOUT_REQUEST: MessageTemplate = MessageTemplate {
    name: "LogoutRequest",
    id: MessageId::Low(252),
    zerocoded: false,
    blocks: &[block!("AgentData", Quantity::Single, AGENT_SESSION)],
};

pub static LOGOUT_REPLY: MessageTemplate = MessageTemplate {
    name: "LogoutReply",
    id: MessageId::Low(253),
    zerocoded: true,
    blocks: &[
        block!("AgentData", Quantity::Single, AGENT_SESSION),
        block!(
            "InventoryData",
            Quantity::Variable,
            &[field!("ItemID", FieldKind::Uuid)],
        ),
    ],
};

/// Every template that ships with the protocol.
pub static STANDARD_TEMPLATES: &[&MessageTemplate] = &[
    &PACKET_ACK,
    &OPEN_CIRCUIT,
    &CLOSE_CIRCUIT,
    &START_PING_CHECK,
    &COMPLETE_PING_CHECK,
    &AGENT_UPDATE,
    &LAYER_DATA,
    &IMPROVED_TERSE_OBJECT_UPDATE,
    &KILL_OBJECT,
    &USE_CIRCUIT_CODE,
    &CHAT_FROM_VIEWER,
    &AGENT_THROTTLE,
    &OBJECT_NAME,
    &CHAT_FROM_SIMULATOR,
    &COMPLETE_AGENT_MOVEMENT,
    &LOGOUT_REQUEST,
    &LOGOUT_REPLY,
];

/// Lookup table from message id and name to template.
///
/// Built once at startup and then only read, so it can be shared freely
/// behind an `Arc` or cloned.
#[derive(Debug, Clone, Default)]
pub struct TemplateRegistry {
    by_id: HashMap<MessageId, &'static MessageTemplate>,
    by_name: HashMap<&'static str, &'static MessageTemplate>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding [`STANDARD_TEMPLATES`].
    pub fn standard() -> Self {
        let mut registry = Self::new();
        for template in STANDARD_TEMPLATES {
            registry.by_id.insert(template.id, template);
            registry.by_name.insert(template.name, template);
        }
        registry
    }

    /// Adds a template. Both its id and name must be unused.
    pub fn register(&mut self, template: &'static MessageTemplate) -> Result<(), TemplateError> {
        if self.by_id.contains_key(&template.id) {
            return Err(TemplateError::DuplicateId(template.id));
        }
        if self.by_name.contains_key(template.name) {
            return Err(TemplateError::DuplicateName(template.name));
        }
        self.by_id.insert(template.id, template);
        self.by_name.insert(template.name, template);
        Ok(())
    }

    pub fn by_id(&self, id: MessageId) -> Option<&'static MessageTemplate> {
        self.by_id.get(&id).copied()
    }

    pub fn by_name(&self, name: &str) -> Option<&'static MessageTemplate> {
        self.by_name.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &'static MessageTemplate> + '_ {
        self.by_id.values().copied()
    }
}
