use std::fmt;

use thiserror::Error;

use crate::message::Message;

/// Why a [`Context`](crate::Context) fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum Cancelled {
    #[error("context canceled")]
    Canceled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Cancelled(#[from] Cancelled),

    /// The receiving task has been dropped.
    #[error("mailbox closed")]
    Closed,

    /// The responder (or reply slot) was dropped without a value.
    #[error("no response: responder dropped before responding")]
    NoResponse,

    #[error("send rejected after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },
}

impl Error {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled(_))
    }
}

/// A message that could not be enqueued. The message is handed back so the
/// caller can retry without cloning it.
#[derive(Error)]
pub enum SendError<T> {
    #[error("mailbox full")]
    Full(Message<T>),

    #[error("mailbox closed")]
    Closed(Message<T>),
}

impl<T> SendError<T> {
    pub fn is_full(&self) -> bool {
        matches!(self, SendError::Full(_))
    }

    pub fn into_inner(self) -> Message<T> {
        match self {
            SendError::Full(message) | SendError::Closed(message) => message,
        }
    }

    pub fn map(self, f: impl FnOnce(Message<T>) -> Message<T>) -> Self {
        match self {
            SendError::Full(message) => SendError::Full(f(message)),
            SendError::Closed(message) => SendError::Closed(f(message)),
        }
    }
}

// payload は Debug を要求しない
impl<T> fmt::Debug for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::Full(_) => f.write_str("SendError::Full(..)"),
            SendError::Closed(_) => f.write_str("SendError::Closed(..)"),
        }
    }
}
