use crate::address::ServerKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerId(pub(crate) u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub(crate) u64);

/// What peers see of a client: its name and last identification data
///
/// `data` is absent once the client is gone, which is how removals are
/// reported in update deltas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientRecord {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// One logical game server, possibly known under several addresses
#[derive(Debug)]
pub struct ServerEntry {
    pub id: ServerId,
    /// Every key in here maps back to this entry in the registry's key index
    pub addresses: HashSet<ServerKey>,
    /// Player names the master listing currently reports on this server
    pub valid_names: HashSet<String>,
    pub clients: HashSet<ClientId>,
}

impl ServerEntry {
    pub(crate) fn new(id: ServerId, addresses: HashSet<ServerKey>, valid_names: HashSet<String>) -> Self {
        Self {
            id,
            addresses,
            valid_names,
            clients: HashSet::new(),
        }
    }
}

/// A third-party identity registered on a server
#[derive(Debug)]
pub struct ClientEntry {
    pub id: ClientId,
    pub token: String,
    pub server: ServerId,
    pub name: String,
    pub data: Value,
    /// Peers that changed since the last poll, with their names so a peer
    /// that has since been deleted can still be reported
    pub(crate) pending_updates: HashMap<ClientId, String>,
}

impl ClientEntry {
    pub(crate) fn new(id: ClientId, token: String, server: ServerId, name: String, data: Value) -> Self {
        Self {
            id,
            token,
            server,
            name,
            data,
            pending_updates: HashMap::new(),
        }
    }

    pub fn record(&self) -> ClientRecord {
        ClientRecord {
            name: self.name.clone(),
            data: Some(self.data.clone()),
        }
    }

    /// Queue a peer's change for the next poll; repeated changes coalesce
    pub(crate) fn notify(&mut self, peer: ClientId, peer_name: &str) {
        if peer != self.id {
            self.pending_updates.insert(peer, peer_name.to_string());
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending_updates.len()
    }
}

/// Identification data must be an object carrying a truthy `iden` field
pub fn validate_data(data: &Value) -> Result<(), &'static str> {
    let object = data.as_object().ok_or("Data is not an object")?;

    match object.get("iden") {
        Some(iden) if is_truthy(iden) => Ok(()),
        _ => Err("Data is missing iden"),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
