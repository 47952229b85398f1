use crate::address::ServerKey;
use crate::entry::{validate_data, ClientEntry, ClientId, ClientRecord, ServerEntry, ServerId};
use crate::error::{RegistryError, Result};
use crate::token;
use log::debug;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Result of a successful registration
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub token: String,
    /// Every other client on the server
    pub clients: Vec<ClientRecord>,
}

/// Where [`Registry::adjoin_or_create`] put a set of addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Adjoined {
    pub id: ServerId,
    pub created: bool,
    /// Clients dropped while merging entries
    pub revoked: usize,
}

/// In-memory servers and clients
///
/// Servers are indexed by every address they are known under, clients by
/// their token. Entities are removed from their arena when deleted, so a
/// second delete of the same id is a no-op.
#[derive(Debug, Default)]
pub struct Registry {
    pub(crate) servers: HashMap<ServerId, ServerEntry>,
    pub(crate) server_keys: HashMap<ServerKey, ServerId>,
    clients: HashMap<ClientId, ClientEntry>,
    tokens: HashMap<String, ClientId>,
    next_server_id: u64,
    next_client_id: u64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct logical servers
    pub fn server_count(&self) -> usize {
        self.servers.len()
    }

    /// Number of addresses servers are known under
    pub fn key_count(&self) -> usize {
        self.server_keys.len()
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn server(&self, address: &str) -> Option<&ServerEntry> {
        let id = self.server_keys.get(crate::address::normalize(address))?;
        self.servers.get(id)
    }

    pub fn client(&self, token: &str) -> Option<&ClientEntry> {
        let id = self.tokens.get(token)?;
        self.clients.get(id)
    }

    fn server_id(&self, address: &str) -> Result<ServerId> {
        self.server_keys
            .get(crate::address::normalize(address))
            .copied()
            .ok_or(RegistryError::ServerNotFound)
    }

    fn client_id(&self, token: &str) -> Result<ClientId> {
        self.tokens.get(token).copied().ok_or(RegistryError::InvalidToken)
    }

    fn records(&self, server: ServerId, except: Option<ClientId>) -> Vec<ClientRecord> {
        let Some(server) = self.servers.get(&server) else {
            return Vec::new();
        };

        server
            .clients
            .iter()
            .filter(|id| Some(**id) != except)
            .filter_map(|id| self.clients.get(id))
            .map(ClientEntry::record)
            .collect()
    }

    fn find_by_name(&self, server: ServerId, name: &str) -> Option<&ClientEntry> {
        self.servers
            .get(&server)?
            .clients
            .iter()
            .filter_map(|id| self.clients.get(id))
            .find(|client| client.name == name)
    }

    pub fn list_clients(&self, address: &str) -> Result<Vec<ClientRecord>> {
        let server = self.server_id(address)?;
        Ok(self.records(server, None))
    }

    pub fn lookup_by_name(&self, address: &str, name: &str) -> Result<ClientRecord> {
        let server = self.server_id(address)?;
        self.find_by_name(server, name)
            .map(ClientEntry::record)
            .ok_or(RegistryError::NameNotFound)
    }

    /// Claim `name` on the server at `address`
    ///
    /// Existing peers get the newcomer queued in their next poll.
    pub fn register(&mut self, address: &str, name: &str, data: Value) -> Result<Registration> {
        let server_id = self.server_id(address)?;
        validate_data(&data).map_err(RegistryError::InvalidData)?;

        let server = self.servers.get(&server_id).ok_or(RegistryError::ServerNotFound)?;
        if !server.valid_names.contains(name) {
            return Err(RegistryError::NameNotRegisterable);
        }
        if self.find_by_name(server_id, name).is_some() {
            return Err(RegistryError::NameAlreadyTaken);
        }

        let token = token::allocate(|t| self.tokens.contains_key(t))?;
        let id = ClientId(self.next_client_id);
        self.next_client_id += 1;

        let client = ClientEntry::new(id, token.clone(), server_id, name.to_string(), data);
        self.clients.insert(id, client);
        self.tokens.insert(token.clone(), id);
        if let Some(server) = self.servers.get_mut(&server_id) {
            server.clients.insert(id);
        }
        self.notify_peers(server_id, id, name);

        debug!("Registered {:?} on server {:?}", name, server_id);

        Ok(Registration {
            token,
            clients: self.records(server_id, Some(id)),
        })
    }

    /// Drain the caller's pending peer updates
    pub fn poll(&mut self, token: &str) -> Result<Vec<ClientRecord>> {
        let id = self.client_id(token)?;
        let pending = match self.clients.get_mut(&id) {
            Some(client) => std::mem::take(&mut client.pending_updates),
            None => return Err(RegistryError::InvalidToken),
        };

        Ok(pending
            .into_iter()
            .map(|(peer, name)| match self.clients.get(&peer) {
                Some(peer) => peer.record(),
                None => ClientRecord { name, data: None },
            })
            .collect())
    }

    /// Replace the caller's data, or delete the caller when `data` is absent
    pub fn set_data(&mut self, token: &str, data: Option<Value>) -> Result<()> {
        let id = self.client_id(token)?;

        let data = match data {
            None | Some(Value::Null) => {
                self.delete_client(id);
                return Ok(());
            }
            Some(data) => data,
        };
        validate_data(&data).map_err(RegistryError::InvalidData)?;

        let Some(client) = self.clients.get_mut(&id) else {
            return Err(RegistryError::InvalidToken);
        };
        client.data = data;
        let (server, name) = (client.server, client.name.clone());
        self.notify_peers(server, id, &name);

        Ok(())
    }

    fn notify_peers(&mut self, server: ServerId, changed: ClientId, name: &str) {
        let Some(server) = self.servers.get(&server) else {
            return;
        };
        for peer in &server.clients {
            if let Some(peer) = self.clients.get_mut(peer) {
                peer.notify(changed, name);
            }
        }
    }

    /// Remove a client and report the removal to its remaining peers
    pub(crate) fn delete_client(&mut self, id: ClientId) -> bool {
        let Some(client) = self.clients.remove(&id) else {
            return false;
        };
        self.tokens.remove(&client.token);
        if let Some(server) = self.servers.get_mut(&client.server) {
            server.clients.remove(&id);
        }
        self.notify_peers(client.server, id, &client.name);

        debug!("Deleted client {:?} from server {:?}", client.name, client.server);
        true
    }

    /// Remove a server together with all of its addresses and clients
    pub(crate) fn delete_server(&mut self, id: ServerId) -> bool {
        let Some(server) = self.servers.remove(&id) else {
            return false;
        };
        for key in &server.addresses {
            if self.server_keys.get(key) == Some(&id) {
                self.server_keys.remove(key);
            }
        }
        for client in &server.clients {
            if let Some(client) = self.clients.remove(client) {
                self.tokens.remove(&client.token);
            }
        }

        debug!("Deleted server {:?} ({} clients)", id, server.clients.len());
        true
    }

    /// Replace a server's valid names, deleting clients whose name is gone
    ///
    /// Returns how many clients were revoked.
    pub(crate) fn replace_valid_names(&mut self, id: ServerId, names: HashSet<String>) -> usize {
        let Some(server) = self.servers.get_mut(&id) else {
            return 0;
        };
        server.valid_names = names;

        let revoked: Vec<ClientId> = server
            .clients
            .iter()
            .copied()
            .filter(|client| {
                self.clients
                    .get(client)
                    .map_or(false, |c| !server.valid_names.contains(&c.name))
            })
            .collect();

        revoked.into_iter().filter(|id| self.delete_client(*id)).count()
    }

    /// Find the entry any of `addresses` already belongs to and bind all of
    /// them to it, or create a new entry if none is known yet
    ///
    /// When the addresses are spread over several entries the oldest one
    /// takes them all, and an entry left without addresses is merged into it.
    pub(crate) fn adjoin_or_create(&mut self, addresses: HashSet<ServerKey>, names: HashSet<String>) -> Adjoined {
        let existing = addresses
            .iter()
            .filter_map(|key| self.server_keys.get(key).copied())
            .min();

        if let Some(id) = existing {
            let revoked = addresses.into_iter().map(|key| self.bind_key(key, id)).sum();
            return Adjoined { id, created: false, revoked };
        }

        let id = ServerId(self.next_server_id);
        self.next_server_id += 1;
        for key in &addresses {
            self.server_keys.insert(key.clone(), id);
        }
        self.servers.insert(id, ServerEntry::new(id, addresses, names));

        debug!("Created server {:?}", id);
        Adjoined { id, created: true, revoked: 0 }
    }

    /// Point `key` at `id`, merging the entry it used to belong to if that
    /// was its last address
    ///
    /// Returns how many clients the merge revoked.
    fn bind_key(&mut self, key: ServerKey, id: ServerId) -> usize {
        let previous = self.server_keys.insert(key.clone(), id);
        if let Some(server) = self.servers.get_mut(&id) {
            server.addresses.insert(key.clone());
        }

        let Some(previous) = previous.filter(|previous| *previous != id) else {
            return 0;
        };
        let orphaned = match self.servers.get_mut(&previous) {
            Some(server) => {
                server.addresses.remove(&key);
                server.addresses.is_empty()
            }
            None => false,
        };

        if orphaned {
            self.merge_server(previous, id)
        } else {
            0
        }
    }

    /// Move every client of `from` over to `into` and drop `from`
    ///
    /// A moved client whose name is already held on `into` is revoked, and
    /// only its old peers hear about it. Residents and newcomers get each
    /// other queued as updates. Returns how many clients were revoked.
    fn merge_server(&mut self, from: ServerId, into: ServerId) -> usize {
        if !self.servers.contains_key(&into) {
            self.delete_server(from);
            return 0;
        }

        let duplicates: Vec<ClientId> = match self.servers.get(&from) {
            Some(orphan) => orphan
                .clients
                .iter()
                .copied()
                .filter(|id| {
                    self.clients
                        .get(id)
                        .map_or(false, |client| self.find_by_name(into, &client.name).is_some())
                })
                .collect(),
            None => return 0,
        };
        let revoked = duplicates.into_iter().filter(|id| self.delete_client(*id)).count();

        let Some(orphan) = self.servers.remove(&from) else {
            return revoked;
        };
        let residents: Vec<ClientId> = self
            .servers
            .get(&into)
            .map(|server| server.clients.iter().copied().collect())
            .unwrap_or_default();

        for moved in &orphan.clients {
            if let Some(client) = self.clients.get_mut(moved) {
                client.server = into;
            }
        }
        if let Some(server) = self.servers.get_mut(&into) {
            server.clients.extend(orphan.clients.iter().copied());
            server.valid_names.extend(orphan.valid_names);
        }
        for &moved in &orphan.clients {
            for &resident in &residents {
                self.introduce(moved, resident);
                self.introduce(resident, moved);
            }
        }

        debug!("Merged server {:?} into {:?} ({} clients moved)", from, into, orphan.clients.len());
        revoked
    }

    /// Queue `peer`'s current state in `to`'s next poll
    fn introduce(&mut self, to: ClientId, peer: ClientId) {
        let Some(name) = self.clients.get(&peer).map(|peer| peer.name.clone()) else {
            return;
        };
        if let Some(client) = self.clients.get_mut(&to) {
            client.notify(peer, &name);
        }
    }

    /// Forget one address; the server goes away with its last address
    ///
    /// Returns true if that deleted the server.
    pub(crate) fn detach_key(&mut self, key: &ServerKey) -> bool {
        match self.server_keys.remove(key) {
            Some(id) => self.release_key(id, key),
            None => false,
        }
    }

    fn release_key(&mut self, id: ServerId, key: &ServerKey) -> bool {
        let orphaned = match self.servers.get_mut(&id) {
            Some(server) => {
                server.addresses.remove(key);
                server.addresses.is_empty()
            }
            None => false,
        };

        orphaned && self.delete_server(id)
    }
}
