//! Registry of third-party client identities on live game servers
//!
//! Servers and the player names allowed on them come from the master server
//! listing, which is re-fetched on a timer and diffed against local state.
//! Clients register one of those names, get a bearer token back, and poll
//! for the changes their peers made since the last poll.

pub mod address;
pub mod entry;
pub mod error;
pub mod master;
pub mod protocol;
pub mod reconcile;
pub mod schedule;
pub mod service;
pub mod state;
pub mod token;

// Re-export commonly used types for convenience
pub use address::{normalize, ServerKey};
pub use entry::{ClientEntry, ClientRecord, ServerEntry};
pub use error::RegistryError;
pub use master::{HttpMasterSource, MasterListing, MasterServer, MasterSource};
pub use protocol::{ClientsResponse, InitRequest, InitResponse, SetRequest, UpdatesRequest};
pub use reconcile::ReconcileReport;
pub use schedule::{DEFAULT_DEBOUNCE, DEFAULT_INTERVAL};
pub use service::{PassOutcome, RegistryService};
pub use state::{Registration, Registry};
