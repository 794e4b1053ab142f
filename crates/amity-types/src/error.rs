use thiserror::Error;

/// Unified error taxonomy for the chat core. HTTP handlers and the
/// WebSocket gateway both map these; storage failures are always fatal to
/// the current operation and never partially applied.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("not authenticated")]
    Unauthenticated,

    #[error("not authorized for this action")]
    Forbidden,

    #[error("message has no text and no image")]
    InvalidMessage,

    #[error("cannot send a friend request to yourself")]
    SelfRequest,

    #[error("a friend request for this pair already exists")]
    DuplicateRequest,

    #[error("friend request already resolved")]
    AlreadyResolved,

    #[error("not found")]
    NotFound,

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl ChatError {
    /// Stable machine-readable code, used in gateway `Error` events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Forbidden => "forbidden",
            Self::InvalidMessage => "invalid_message",
            Self::SelfRequest => "self_request",
            Self::DuplicateRequest => "duplicate_request",
            Self::AlreadyResolved => "already_resolved",
            Self::NotFound => "not_found",
            Self::Storage(_) => "storage_error",
        }
    }
}
