//! Error types for the placement engine

use shared_types::{DocumentKey, FieldName, GeometryError, Role, SigneeId};
use thiserror::Error;

use crate::reconciler::LoadState;

/// Failure reported by the document engine itself
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("Failed to load document: {0}")]
    Load(String),

    #[error("Unknown engine handle: {0}")]
    UnknownHandle(u64),

    #[error("Unknown engine object: {0}")]
    UnknownObject(String),

    #[error("Engine operation failed: {0}")]
    Operation(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransformError {
    #[error("No ready engine handle for the current document")]
    EngineNotReady,

    #[error("Engine could not project rectangle: {0}")]
    Engine(#[from] EngineError),

    #[error("Engine produced invalid page geometry: {0}")]
    Geometry(#[from] GeometryError),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Session storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum RosterError {
    #[error("Roster already has an {0:?}; policy allows only one")]
    DuplicateRole(Role),

    #[error("Unknown signee: {0}")]
    UnknownSignee(SigneeId),

    #[error("Color palette is empty")]
    EmptyPalette,
}

#[derive(Debug, Error)]
pub enum PlacementError {
    #[error("Viewer is not live (state: {0:?})")]
    NotReady(LoadState),

    #[error("Load of {0} was superseded by a newer load or teardown")]
    Superseded(DocumentKey),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error("Malformed drag payload: {0}")]
    InvalidPayload(String),

    #[error("No active signee")]
    NoActiveSignee,

    #[error("Unknown field: {0}")]
    UnknownField(FieldName),

    #[error("Signee {signee} may not edit {field}")]
    NotAuthorized { signee: SigneeId, field: FieldName },

    #[error(transparent)]
    Roster(#[from] RosterError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Failure reported by a signing service implementation
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SigningServiceError {
    #[error("Signing service rejected the request (status {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Signing service unreachable: {0}")]
    Transport(String),

    #[error("Signing service not configured: {0}")]
    NotConfigured(String),
}

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("Document is not live")]
    NotReady,

    #[error("A signing request for {0} is already in flight")]
    SigningInProgress(DocumentKey),

    #[error("Unknown field: {0}")]
    UnknownField(FieldName),

    #[error("Signing failed: {cause}")]
    Failed { cause: String },

    #[error("Signed {key} but the viewer moved on before it could be loaded")]
    Superseded { key: DocumentKey, document: Vec<u8> },

    #[error("Signed document could not be reloaded: {source}")]
    Reload {
        document: Vec<u8>,
        #[source]
        source: PlacementError,
    },
}

impl SigningError {
    /// Signed output carried by errors raised after the service succeeded
    pub fn signed_document(&self) -> Option<&[u8]> {
        match self {
            SigningError::Superseded { document, .. } | SigningError::Reload { document, .. } => {
                Some(document)
            }
            _ => None,
        }
    }
}

impl From<SigningServiceError> for SigningError {
    fn from(err: SigningServiceError) -> Self {
        SigningError::Failed {
            cause: err.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}
