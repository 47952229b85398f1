use thiserror::Error;

pub type Result<T, E = RegistryError> = std::result::Result<T, E>;

/// Errors returned by registry operations
///
/// Every variant except [`RegistryError::ExhaustedKeyspace`] is the caller's
/// to handle: fix the request, re-query, or re-register.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Missing address")]
    MissingAddress,
    #[error("Data present but name is not")]
    DataWithoutName,
    #[error("{0}")]
    InvalidData(&'static str),
    #[error("Server not found")]
    ServerNotFound,
    #[error("Name not found")]
    NameNotFound,
    #[error("Name is not on the server")]
    NameNotRegisterable,
    #[error("Name already registered")]
    NameAlreadyTaken,
    #[error("Missing token")]
    MissingToken,
    #[error("Invalid token")]
    InvalidToken,
    #[error("Token keyspace exhausted")]
    ExhaustedKeyspace,
}
