//! Incremental marker-delimited segment parsing
//!
//! The generation service emits one continuous text stream that mixes prose
//! with two embedded blocks:
//! - a payload block (the generated document) between `<<<CODE_START>>>` and
//!   `<<<CODE_END>>>`
//! - a choice-list block (JSON array of follow-up options) between
//!   `<<<OPTIONS_START>>>` and `<<<OPTIONS_END>>>`
//!
//! [`SegmentParser`] accumulates fragments for one assistant turn and, after
//! every fragment, re-derives a [`SegmentView`] from the whole accumulated
//! text. Recomputing from scratch keeps the view identical no matter where
//! the fragment boundaries fall, including inside a marker literal.

mod choices;

pub use choices::{parse_choices, Choice, ChoiceDispatcher, ChoiceIntent};

use serde::Serialize;

/// Opening marker of the payload block
pub const PAYLOAD_OPEN: &str = "<<<CODE_START>>>";
/// Closing marker of the payload block
pub const PAYLOAD_CLOSE: &str = "<<<CODE_END>>>";
/// Opening marker of the choice-list block
pub const CHOICES_OPEN: &str = "<<<OPTIONS_START>>>";
/// Closing marker of the choice-list block
pub const CHOICES_CLOSE: &str = "<<<OPTIONS_END>>>";

/// Shown in place of a payload block that is still streaming
pub const GENERATING_PLACEHOLDER: &str = "\n\n*Generating website…*\n\n";
/// Shown in place of a completed payload block
pub const UPDATED_PLACEHOLDER: &str = "\n\n*Website updated.*\n\n";

/// Lifecycle of one marker pair within the accumulated text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerState {
    /// Opening marker not seen yet
    #[default]
    Absent,
    /// Opening marker seen, closing marker not yet
    Opened,
    /// Both markers seen
    Closed,
}

/// Generated-document text seen so far
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PayloadBlock {
    pub content: String,
    /// `false` while only the opening marker has been seen
    pub complete: bool,
}

/// One parser output element
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Segment {
    DisplayText { text: String },
    PayloadBlock { content: String, complete: bool },
    ChoiceList { items: Vec<Choice> },
}

/// Best-known decomposition of the accumulated text
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SegmentView {
    /// Narrative text with block spans masked or removed
    pub display_text: String,
    /// Payload block, if its opening marker has been seen
    pub payload: Option<PayloadBlock>,
    /// State of the choice-list marker pair
    pub choices_state: MarkerState,
    /// Parsed choices; only populated once the block is closed
    pub choices: Vec<Choice>,
}

impl SegmentView {
    pub fn payload_state(&self) -> MarkerState {
        match &self.payload {
            None => MarkerState::Absent,
            Some(block) if block.complete => MarkerState::Closed,
            Some(_) => MarkerState::Opened,
        }
    }

    /// Content of the payload block once both markers have been seen
    pub fn completed_payload(&self) -> Option<&str> {
        self.payload
            .as_ref()
            .filter(|block| block.complete)
            .map(|block| block.content.as_str())
    }

    /// Whether a payload block is open but not yet closed
    pub fn is_generating(&self) -> bool {
        self.payload_state() == MarkerState::Opened
    }

    /// The view as ordered segments: display text, payload, then choices
    ///
    /// A choice list that is only opened is omitted entirely.
    pub fn segments(&self) -> Vec<Segment> {
        let mut segments = vec![Segment::DisplayText {
            text: self.display_text.clone(),
        }];
        if let Some(block) = &self.payload {
            segments.push(Segment::PayloadBlock {
                content: block.content.clone(),
                complete: block.complete,
            });
        }
        if self.choices_state == MarkerState::Closed {
            segments.push(Segment::ChoiceList {
                items: self.choices.clone(),
            });
        }
        segments
    }
}

/// Byte span of a marker-delimited block within a string
#[derive(Debug, Clone, Copy)]
struct BlockSpan {
    /// Start of the opening marker
    open: usize,
    body_start: usize,
    body_end: usize,
    /// End of the closing marker, or end of text while unclosed
    end: usize,
    closed: bool,
}

/// Find the first `open`..`close` pair; later opening markers are literal text.
fn locate_block(text: &str, open: &str, close: &str) -> Option<BlockSpan> {
    let open_at = text.find(open)?;
    let body_start = open_at + open.len();
    let span = match text[body_start..].find(close) {
        Some(rel) => BlockSpan {
            open: open_at,
            body_start,
            body_end: body_start + rel,
            end: body_start + rel + close.len(),
            closed: true,
        },
        None => BlockSpan {
            open: open_at,
            body_start,
            body_end: text.len(),
            end: text.len(),
            closed: false,
        },
    };
    Some(span)
}

/// Parse a complete accumulated text in one call
///
/// Payload masking runs first on the raw text; choice detection and
/// stripping then run on the masked result, so a payload span always wins
/// over an overlapping choice span.
pub fn parse(text: &str) -> SegmentView {
    let (masked, payload) = match locate_block(text, PAYLOAD_OPEN, PAYLOAD_CLOSE) {
        None => (text.to_string(), None),
        Some(span) => {
            let mut masked = String::with_capacity(text.len());
            masked.push_str(&text[..span.open]);
            if span.closed {
                masked.push_str(UPDATED_PLACEHOLDER);
                masked.push_str(&text[span.end..]);
            } else {
                masked.push_str(GENERATING_PLACEHOLDER);
            }
            let block = PayloadBlock {
                content: text[span.body_start..span.body_end].trim().to_string(),
                complete: span.closed,
            };
            (masked, Some(block))
        }
    };

    let (display, choices_state, choices) =
        match locate_block(&masked, CHOICES_OPEN, CHOICES_CLOSE) {
            None => (masked, MarkerState::Absent, Vec::new()),
            Some(span) if span.closed => {
                let items = parse_choices(&masked[span.body_start..span.body_end]);
                let mut display = String::with_capacity(masked.len());
                display.push_str(&masked[..span.open]);
                display.push_str(&masked[span.end..]);
                (display, MarkerState::Closed, items)
            }
            // Half-received choice JSON is never shown as prose
            Some(span) => (
                masked[..span.open].to_string(),
                MarkerState::Opened,
                Vec::new(),
            ),
        };

    SegmentView {
        display_text: display.trim().to_string(),
        payload,
        choices_state,
        choices,
    }
}

/// Accumulates the fragments of one assistant turn
///
/// The parser has no notion of waiting: it is fed synchronously, once per
/// fragment, in arrival order, and always answers with the view of the whole
/// text received so far.
#[derive(Debug, Default)]
pub struct SegmentParser {
    accumulated: String,
    view: SegmentView,
}

impl SegmentParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one fragment and recompute the view
    pub fn apply(&mut self, fragment: &str) -> &SegmentView {
        if !fragment.is_empty() {
            self.accumulated.push_str(fragment);
            self.view = parse(&self.accumulated);
        }
        &self.view
    }

    /// Feed every fragment of a pull-based source and return the final view
    pub fn drive<I, S>(&mut self, fragments: I) -> &SegmentView
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for fragment in fragments {
            self.apply(fragment.as_ref());
        }
        &self.view
    }

    /// Start a new turn
    pub fn reset(&mut self) {
        self.accumulated.clear();
        self.view = SegmentView::default();
    }

    pub fn view(&self) -> &SegmentView {
        &self.view
    }

    /// Raw accumulated text, markers included
    pub fn text(&self) -> &str {
        &self.accumulated
    }
}
