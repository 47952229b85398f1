//! Bringing the registry in line with the master listing
//!
//! A pass indexes every reported address, splits the registry's current keys
//! against the reported ones, and applies the minimal set of changes:
//!
//! - keys no longer reported are detached; a server whose last address is
//!   gone is deleted together with all of its clients
//! - every reported record binds all of its addresses to one server: a new
//!   one, or the oldest entry any of them already belongs to; an entry left
//!   without addresses by that is merged in with its clients
//! - existing servers get their valid names replaced, which deletes every
//!   client whose name is no longer on the server

use crate::address::ServerKey;
use crate::entry::ServerId;
use crate::master::{MasterListing, MasterServer};
use crate::state::Registry;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// Three-way split of two key sets
#[derive(Debug, Default, PartialEq, Eq)]
pub struct KeyDiff<K> {
    /// Only in the previous set
    pub removed: Vec<K>,
    /// Only in the next set
    pub added: Vec<K>,
    /// In both
    pub kept: Vec<K>,
}

pub fn key_diff<K, A, B>(previous: &HashMap<K, A>, next: &HashMap<K, B>) -> KeyDiff<K>
where
    K: Eq + Hash + Clone,
{
    let mut diff = KeyDiff {
        removed: Vec::new(),
        added: Vec::new(),
        kept: Vec::new(),
    };

    for key in previous.keys() {
        if next.contains_key(key) {
            diff.kept.push(key.clone());
        } else {
            diff.removed.push(key.clone());
        }
    }
    for key in next.keys() {
        if !previous.contains_key(key) {
            diff.added.push(key.clone());
        }
    }

    diff
}

/// Map every normalized address of every reported server to its record
///
/// If two records claim the same address, the later one wins.
pub fn index_listings(listings: &[MasterListing]) -> HashMap<ServerKey, &MasterServer> {
    listings
        .iter()
        .flat_map(|listing| &listing.servers)
        .flat_map(|server| server.addresses.iter().map(move |address| (ServerKey::new(address), server)))
        .collect()
}

/// What a pass changed
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Clients deleted because their name left the server
    pub revoked: usize,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl Registry {
    /// Apply one fetched master listing to the registry
    pub fn reconcile(&mut self, listings: &[MasterListing]) -> ReconcileReport {
        let next = index_listings(listings);
        let diff = key_diff(&self.server_keys, &next);
        let mut report = ReconcileReport::default();

        for key in &diff.removed {
            if self.detach_key(key) {
                report.deleted += 1;
            }
        }

        // Every reported record is bound as a whole, so addresses that used
        // to be separate entries end up merged into one
        let mut updated: HashSet<ServerId> = HashSet::new();
        let mut bound: HashSet<&ServerKey> = HashSet::new();
        for key in diff.added.iter().chain(&diff.kept) {
            if bound.contains(key) {
                continue;
            }
            let server = next[key];
            let addresses: HashSet<ServerKey> = server.addresses.iter().map(|a| ServerKey::new(a)).collect();
            bound.extend(next.keys().filter(|k| addresses.contains(*k)));

            let adjoined = self.adjoin_or_create(addresses, server.names());
            report.revoked += adjoined.revoked;
            if adjoined.created {
                report.created += 1;
                updated.insert(adjoined.id);
            } else if updated.insert(adjoined.id) {
                report.revoked += self.replace_valid_names(adjoined.id, server.names());
                report.updated += 1;
            }
        }

        report
    }
}
