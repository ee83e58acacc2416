use thiserror::Error;

/// Failure kinds callers may want to tell apart. Functions in this crate
/// return `anyhow::Result`; recover the kind with `err.downcast_ref::<NetworkError>()`.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum NetworkError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("boundary walk for split {split} revisited node {node}")]
    NodeRevisited { split: usize, node: usize },
    #[error("boundary walk for split {split} wrapped around node {node} without reaching taxon {target}")]
    Wraparound {
        split: usize,
        node: usize,
        target: usize,
    },
    #[error("computation cancelled")]
    Cancelled,
}

impl NetworkError {
    pub fn invalid<S: Into<String>>(msg: S) -> Self {
        NetworkError::InvalidInput(msg.into())
    }
}

/// True when `err` carries `NetworkError::Cancelled` anywhere in its chain.
pub fn is_cancelled(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<NetworkError>(),
            Some(NetworkError::Cancelled)
        )
    })
}
