//! Circuit authorization.
//!
//! Login hands the region a circuit code plus the agent and session ids it
//! issued. The first `UseCircuitCode` from a client must present the same
//! triple before a circuit is created.

use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

/// What login told us about an expected agent.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentCircuitData {
    pub circuit_code: u32,
    pub agent_id: Uuid,
    pub session_id: Uuid,
    pub secure_session_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub start_position: [f32; 3],
    /// Agent is a child presence for a neighbouring region.
    pub child: bool,
}

impl AgentCircuitData {
    pub fn new(circuit_code: u32, agent_id: Uuid, session_id: Uuid) -> Self {
        Self {
            circuit_code,
            agent_id,
            session_id,
            secure_session_id: Uuid::nil(),
            first_name: String::new(),
            last_name: String::new(),
            start_position: [128.0, 128.0, 70.0],
            child: false,
        }
    }
}

/// Source of pending circuit codes.
pub trait Authorizer: Send + Sync {
    /// Login data for `code` if a client is expected to use it.
    fn is_pending_circuit(&self, code: u32) -> Option<AgentCircuitData>;

    /// Looks `code` up once and checks the presented ids against it.
    fn authenticate(&self, code: u32, agent_id: Uuid, session_id: Uuid) -> Option<AgentCircuitData> {
        self.is_pending_circuit(code)
            .filter(|data| data.agent_id == agent_id && data.session_id == session_id)
    }
}

/// In-process table of expected circuits.
#[derive(Debug, Default)]
pub struct AgentCircuitManager {
    circuits: RwLock<HashMap<u32, AgentCircuitData>>,
}

impl AgentCircuitManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the expected agent for a circuit code.
    pub fn add_new_circuit(&self, data: AgentCircuitData) {
        self.circuits.write().insert(data.circuit_code, data);
    }

    pub fn remove_circuit(&self, code: u32) -> Option<AgentCircuitData> {
        self.circuits.write().remove(&code)
    }

    /// Refreshes name and start position for a known code.
    pub fn update_agent_data(&self, data: &AgentCircuitData) -> bool {
        match self.circuits.write().get_mut(&data.circuit_code) {
            Some(existing) => {
                existing.first_name = data.first_name.clone();
                existing.last_name = data.last_name.clone();
                existing.start_position = data.start_position;
                true
            }
            None => false,
        }
    }

    pub fn set_child_status(&self, code: u32, child: bool) -> bool {
        match self.circuits.write().get_mut(&code) {
            Some(existing) => {
                existing.child = child;
                true
            }
            None => false,
        }
    }

    pub fn child_status(&self, code: u32) -> bool {
        self.circuits.read().get(&code).map_or(false, |c| c.child)
    }

    pub fn start_position(&self, code: u32) -> Option<[f32; 3]> {
        self.circuits.read().get(&code).map(|c| c.start_position)
    }

    pub fn len(&self) -> usize {
        self.circuits.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.circuits.read().is_empty()
    }
}

impl Authorizer for AgentCircuitManager {
    fn is_pending_circuit(&self, code: u32) -> Option<AgentCircuitData> {
        self.circuits.read().get(&code).cloned()
    }
}

/// Accepts every circuit code with whatever ids are presented.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenAuthorizer;

impl Authorizer for OpenAuthorizer {
    fn is_pending_circuit(&self, code: u32) -> Option<AgentCircuitData> {
        Some(AgentCircuitData::new(code, Uuid::nil(), Uuid::nil()))
    }

    fn authenticate(&self, code: u32, agent_id: Uuid, session_id: Uuid) -> Option<AgentCircuitData> {
        Some(AgentCircuitData::new(code, agent_id, session_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authenticate_requires_matching_ids() {
        let manager = AgentCircuitManager::new();
        let agent = Uuid::new_v4();
        let session = Uuid::new_v4();
        manager.add_new_circuit(AgentCircuitData::new(123456, agent, session));

        assert!(manager.authenticate(123456, agent, session).is_some());
        assert!(manager.authenticate(123456, agent, Uuid::new_v4()).is_none());
        assert!(manager.authenticate(123456, Uuid::new_v4(), session).is_none());
        assert!(manager.authenticate(999, agent, session).is_none());
    }

    #[test]
    fn test_add_replaces_existing() {
        let manager = AgentCircuitManager::new();
        let first = AgentCircuitData::new(7, Uuid::new_v4(), Uuid::new_v4());
        let second = AgentCircuitData::new(7, Uuid::new_v4(), Uuid::new_v4());
        manager.add_new_circuit(first);
        manager.add_new_circuit(second.clone());

        assert_eq!(manager.len(), 1);
        assert_eq!(manager.is_pending_circuit(7), Some(second));
    }

    #[test]
    fn test_update_and_child_status() {
        let manager = AgentCircuitManager::new();
        let mut data = AgentCircuitData::new(9, Uuid::new_v4(), Uuid::new_v4());
        manager.add_new_circuit(data.clone());

        data.first_name = "Test".into();
        data.start_position = [1.0, 2.0, 3.0];
        assert!(manager.update_agent_data(&data));
        assert_eq!(manager.start_position(9), Some([1.0, 2.0, 3.0]));

        assert!(!manager.child_status(9));
        assert!(manager.set_child_status(9, true));
        assert!(manager.child_status(9));
        assert!(!manager.set_child_status(10, true));

        assert!(manager.remove_circuit(9).is_some());
        assert!(manager.is_empty());
    }
}
