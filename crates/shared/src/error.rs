use thiserror::Error;

/// Failure taxonomy shared by both ports. Room resolution reporting an
/// absent room is not an error; the repository returns `Ok(None)` for that
/// case and `NotFound` is reserved for lookups that must succeed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChatError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("not found")]
    NotFound,
    #[error("unauthorized")]
    Unauthorized,
    #[error("conflict: {0}")]
    Conflict(String),
}

impl ChatError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }
}
