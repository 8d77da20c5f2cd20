use common::{DatastoreId, JobKind};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("{method}: transport error: {source}")]
    Transport {
        method: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{method}: server answered HTTP {status}: {body}")]
    Status {
        method: String,
        status: u16,
        body: String,
    },
    #[error("{method}: {message}")]
    Server { method: String, message: String },
    #[error("{method}: could not decode reply: {source}")]
    Decode {
        method: String,
        #[source]
        source: serde_json::Error,
    },
}

impl RpcError {
    pub fn method(&self) -> &str {
        match self {
            RpcError::Transport { method, .. }
            | RpcError::Status { method, .. }
            | RpcError::Server { method, .. }
            | RpcError::Decode { method, .. } => method,
        }
    }
}

#[derive(Error, Debug)]
pub enum PollerError {
    #[error("no job named {0:?}")]
    UnknownJob(String),
    #[error("a job named {0:?} already exists")]
    DuplicateName(String),
    #[error("job name must not be empty")]
    EmptyName,
    #[error("failed to load {kind} jobs: {source}")]
    Load {
        kind: JobKind,
        #[source]
        source: RpcError,
    },
    #[error("failed to save {kind} jobs: {source}")]
    Persist {
        kind: JobKind,
        #[source]
        source: RpcError,
    },
    #[error("failed to launch {name:?}: {source}")]
    Launch {
        name: String,
        #[source]
        source: RpcError,
    },
    #[error("failed to clear task {id}: {source}")]
    Clear {
        id: DatastoreId,
        #[source]
        source: RpcError,
    },
    #[error("invalid launch options: {0}")]
    Options(#[from] serde_json::Error),
}
