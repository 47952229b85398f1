use crate::entry::ClientRecord;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of `/api/init`
///
/// - address only: list the server's clients
/// - address and name: look up one client
/// - address, name and data: register
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InitRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InitResponse {
    /// Only present for a new registration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub clients: Vec<ClientRecord>,
}

/// Body of `/api/updates`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdatesRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Body of `/api/set`; no data deletes the caller's registration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SetRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientsResponse {
    pub clients: Vec<ClientRecord>,
}

/// Treat empty strings like missing fields
pub(crate) fn present(field: Option<String>) -> Option<String> {
    field.filter(|value| !value.is_empty())
}
