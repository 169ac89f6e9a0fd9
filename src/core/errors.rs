//! Domain error types
//!
//! These errors represent session-level misuse, distinct from fragment
//! source and transport failures.

use crate::picker::PickerError;
use thiserror::Error;

/// Errors related to the chat session
#[derive(Debug, Error)]
pub enum SessionError {
    /// A turn was started while another one is streaming
    #[error("A turn is already in progress")]
    TurnInProgress,

    /// A turn was finished without being started
    #[error("No turn in progress")]
    NoTurnInProgress,

    /// Nothing to send
    #[error("Message is empty")]
    EmptyMessage,

    /// Choice index out of range for the current list
    #[error("No choice numbered {0}")]
    UnknownChoice(usize),

    #[error(transparent)]
    Picker(#[from] PickerError),
}
