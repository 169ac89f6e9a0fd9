//! Fragment sources: where assistant turns come from
//!
//! A fragment source turns the conversation so far into an ordered stream of
//! text fragments for one assistant turn. End of stream ends the turn; an
//! `Err` item ends it early.

mod error;
mod gemini;
pub mod prompt;
mod scripted;
pub mod streaming;
mod types;

pub use error::LlmError;
pub use gemini::GeminiSource;
pub use scripted::{chunk_text, ScriptedSource, TURN_SEPARATOR};
pub use types::{Message, Role};

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

/// Ordered fragments of one assistant turn
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// Trait for anything that can produce an assistant turn
#[async_trait]
pub trait FragmentSource: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Start one assistant turn for `messages`
    ///
    /// Errors returned here happen before any fragment was produced; errors
    /// inside the stream happen mid-turn.
    async fn stream_turn(&self, messages: &[Message]) -> Result<FragmentStream, LlmError>;
}
