use thiserror::Error;

/// Errors raised by a coordination service client.
#[derive(Debug, Error)]
pub enum CoordinationError {
    #[error("coordination session is closed")]
    ConnectionLost,
    #[error("node already exists: {0}")]
    NodeExists(String),
    #[error("no node at {0}")]
    NoNode(String),
    #[error("parent node missing for {0}")]
    NoParent(String),
    #[error("coordination request timed out")]
    Timeout,
    #[error("coordination error: {0}")]
    Other(String),
}

/// Failure to upsert a command with the platform.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("platform rejected command '{name}': {source}")]
    Platform {
        name: String,
        #[source]
        source: serenity::Error,
    },
    #[error("failed to register command '{name}': {reason}")]
    Rejected { name: String, reason: String },
}

/// Programmer errors raised by UI session helpers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session already activated")]
    AlreadyActive,
    #[error("button handler needs either a label or an emoji")]
    MissingLabel,
    #[error("reaction {0} is unknown to Discord")]
    UnknownReaction(String),
    #[error("components need {0} action rows, a message holds at most 5")]
    TooManyRows(usize),
}
