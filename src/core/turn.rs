//! Turn driver
//!
//! Feeds one assistant turn from a fragment source through the segment
//! parser, reporting every intermediate view. A failing source or an
//! interrupt ends the turn early; whatever was parsed up to then stands.

use crate::llm::{FragmentSource, Message};
use crate::segments::{SegmentParser, SegmentView};
use futures::StreamExt;
use std::future::Future;

/// Result of one assistant turn
#[derive(Debug, Clone, Default)]
pub struct TurnOutcome {
    /// Final view of the accumulated text
    pub view: SegmentView,
    /// Accumulated text exactly as streamed, markers included
    pub raw_text: String,
    /// Reason the source failed, if it did
    pub error: Option<String>,
    /// Whether the user stopped the turn
    pub interrupted: bool,
    pub fragments: usize,
}

impl TurnOutcome {
    /// Display text with the failure message appended, if any
    pub fn display_text(&self) -> String {
        let mut text = self.view.display_text.clone();
        if let Some(error) = &self.error {
            if !text.is_empty() {
                text.push_str("\n\n");
            }
            text.push_str(&format!("Error: {}. Please check your API key.", error));
        }
        text
    }

    /// Whether the source ran to completion
    pub fn is_complete(&self) -> bool {
        self.error.is_none() && !self.interrupted
    }
}

/// Run one turn of `source` over `messages`
///
/// `on_update` sees the view after every non-empty fragment. The turn ends
/// at end of stream, at the first stream error, or when `interrupt`
/// resolves.
pub async fn run_turn<F>(
    source: &dyn FragmentSource,
    messages: &[Message],
    parser: &mut SegmentParser,
    interrupt: impl Future<Output = ()>,
    mut on_update: F,
) -> TurnOutcome
where
    F: FnMut(&SegmentView),
{
    parser.reset();
    let mut outcome = TurnOutcome::default();
    tokio::pin!(interrupt);

    tracing::debug!("Starting turn from {}", source.name());
    let mut stream = tokio::select! {
        biased;
        _ = &mut interrupt => {
            outcome.interrupted = true;
            return outcome;
        }
        started = source.stream_turn(messages) => match started {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!("{} failed to start turn: {}", source.name(), e);
                outcome.error = Some(e.to_string());
                return outcome;
            }
        },
    };

    loop {
        tokio::select! {
            biased;
            _ = &mut interrupt => {
                tracing::info!("Turn interrupted after {} fragments", outcome.fragments);
                outcome.interrupted = true;
                break;
            }
            item = stream.next() => match item {
                Some(Ok(fragment)) => {
                    if fragment.is_empty() {
                        continue;
                    }
                    outcome.fragments += 1;
                    on_update(parser.apply(&fragment));
                }
                Some(Err(e)) => {
                    tracing::warn!("{} failed mid-turn: {}", source.name(), e);
                    outcome.error = Some(e.to_string());
                    break;
                }
                None => break,
            },
        }
    }

    outcome.view = parser.view().clone();
    outcome.raw_text = parser.text().to_string();
    outcome
}
