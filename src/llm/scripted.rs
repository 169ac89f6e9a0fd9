//! Offline fragment source replaying canned turns

use super::{FragmentSource, FragmentStream, LlmError, Message};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Line separating turns in a script file
pub const TURN_SEPARATOR: &str = "---8<---";

#[derive(Debug, Clone)]
struct ScriptedTurn {
    fragments: Vec<String>,
    /// Fail with this reason after emitting `n` fragments
    failure: Option<(usize, String)>,
}

/// Replays one scripted turn per `stream_turn` call
///
/// Once every turn has been played the last one repeats.
#[derive(Debug)]
pub struct ScriptedSource {
    turns: Vec<ScriptedTurn>,
    next: AtomicUsize,
}

impl ScriptedSource {
    /// A source whose single turn is `fragments`
    pub fn new<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_turns(vec![fragments.into_iter().map(Into::into).collect()])
    }

    pub fn with_turns(turns: Vec<Vec<String>>) -> Self {
        Self {
            turns: turns
                .into_iter()
                .map(|fragments| ScriptedTurn {
                    fragments,
                    failure: None,
                })
                .collect(),
            next: AtomicUsize::new(0),
        }
    }

    /// Split `text` into turns on [`TURN_SEPARATOR`] lines, then each turn
    /// into fragments of `chunk_size` characters
    pub fn from_script(text: &str, chunk_size: usize) -> Self {
        let mut turns = Vec::new();
        let mut current = String::new();
        for line in text.split_inclusive('\n') {
            if line.trim_end_matches(['\r', '\n']) == TURN_SEPARATOR {
                turns.push(chunk_text(&std::mem::take(&mut current), chunk_size));
            } else {
                current.push_str(line);
            }
        }
        turns.push(chunk_text(&current, chunk_size));
        Self::with_turns(turns)
    }

    /// Make every turn fail after emitting `after` fragments
    pub fn failing_after(mut self, after: usize, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        for turn in &mut self.turns {
            turn.failure = Some((after, reason.clone()));
        }
        self
    }

    pub fn turn_count(&self) -> usize {
        self.turns.len()
    }
}

/// Split `text` into pieces of at most `chunk_size` characters
pub fn chunk_text(text: &str, chunk_size: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(chunk_size)
        .map(|chunk| chunk.iter().collect())
        .collect()
}

#[async_trait]
impl FragmentSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream_turn(&self, _messages: &[Message]) -> Result<FragmentStream, LlmError> {
        let index = self.next.fetch_add(1, Ordering::Relaxed);
        let Some(turn) = self.turns.get(index).or_else(|| self.turns.last()) else {
            return Err(LlmError::Other(anyhow::anyhow!("script has no turns")));
        };

        let mut items: Vec<Result<String, LlmError>> = match &turn.failure {
            Some((after, _)) => turn.fragments.iter().take(*after).cloned().map(Ok).collect(),
            None => turn.fragments.iter().cloned().map(Ok).collect(),
        };
        if let Some((_, reason)) = &turn.failure {
            items.push(Err(LlmError::Network(reason.clone())));
        }

        tracing::debug!("Replaying scripted turn {} ({} items)", index, items.len());
        Ok(Box::pin(futures::stream::iter(items)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    async fn collect(source: &ScriptedSource) -> Vec<Result<String, LlmError>> {
        source.stream_turn(&[]).await.unwrap().collect().await
    }

    #[test]
    fn test_chunk_text_respects_chars() {
        assert_eq!(chunk_text("héllo", 2), vec!["hé", "ll", "o"]);
        assert_eq!(chunk_text("abc", 0), vec!["a", "b", "c"]);
        assert!(chunk_text("", 4).is_empty());
    }

    #[tokio::test]
    async fn test_replays_fragments_in_order() {
        let source = ScriptedSource::new(["Hel", "lo"]);
        let items: Vec<String> = collect(&source)
            .await
            .into_iter()
            .map(|item| item.unwrap())
            .collect();
        assert_eq!(items, vec!["Hel", "lo"]);
    }

    #[tokio::test]
    async fn test_failing_after() {
        let source = ScriptedSource::new(["a", "b", "c"]).failing_after(2, "connection reset");
        let items = collect(&source).await;
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].as_ref().unwrap(), "a");
        assert_eq!(items[1].as_ref().unwrap(), "b");
        assert!(matches!(&items[2], Err(LlmError::Network(m)) if m == "connection reset"));
    }

    #[tokio::test]
    async fn test_script_turns_advance_then_repeat() {
        let script = "first turn\n---8<---\nsecond\n";
        let source = ScriptedSource::from_script(script, 100);
        assert_eq!(source.turn_count(), 2);

        let first: Vec<_> = collect(&source).await.into_iter().flatten().collect();
        let second: Vec<_> = collect(&source).await.into_iter().flatten().collect();
        let third: Vec<_> = collect(&source).await.into_iter().flatten().collect();
        assert_eq!(first, vec!["first turn\n"]);
        assert_eq!(second, vec!["second\n"]);
        assert_eq!(third, second);
    }
}
