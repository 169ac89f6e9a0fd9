//! Chat session - the owned state of one conversation
//!
//! Holds the history, the rendered document, the host side of the picker
//! and the current choices. Nothing here performs I/O; the transport passes
//! the session explicitly to whatever needs it.

use super::errors::SessionError;
use super::turn::TurnOutcome;
use crate::llm::prompt::GREETING;
use crate::llm::Message;
use crate::picker::{
    decode, DocumentGeneration, HandleOutcome, HostPicker, Outbound, PickedElement, SandboxMessage,
};
use crate::segments::{ChoiceDispatcher, ChoiceIntent, SegmentView};

/// The document currently shown to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDocument {
    pub generation: DocumentGeneration,
    pub markup: String,
}

/// A new document instance must replace the current one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSwap {
    pub generation: DocumentGeneration,
    pub markup: String,
    /// Messages the new instance must receive once it is running
    pub outbound: Vec<Outbound>,
}

#[derive(Debug)]
pub struct ChatSession {
    id: String,
    history: Vec<Message>,
    document: Option<RenderedDocument>,
    picker: HostPicker,
    choices: ChoiceDispatcher,
    turn_in_progress: bool,
    /// At most one document swap per turn
    swapped_this_turn: bool,
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ChatSession {
    /// Start a session with the greeting as its first message
    pub fn new(rearm_on_swap: bool) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            history: vec![Message::assistant(GREETING)],
            document: None,
            picker: HostPicker::new(rearm_on_swap),
            choices: ChoiceDispatcher::default(),
            turn_in_progress: false,
            swapped_this_turn: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn document(&self) -> Option<&RenderedDocument> {
        self.document.as_ref()
    }

    pub fn picker(&self) -> &HostPicker {
        &self.picker
    }

    pub fn choices(&self) -> &ChoiceDispatcher {
        &self.choices
    }

    pub fn is_turn_in_progress(&self) -> bool {
        self.turn_in_progress
    }

    /// Record the user's message and return the conversation to send
    ///
    /// A picked element is folded into the message as context and consumed.
    /// The previous choices are withdrawn.
    pub fn begin_turn(&mut self, user_text: &str) -> Result<Vec<Message>, SessionError> {
        if self.turn_in_progress {
            return Err(SessionError::TurnInProgress);
        }
        let text = user_text.trim();
        if text.is_empty() {
            return Err(SessionError::EmptyMessage);
        }

        let content = match self.picker.take_picked() {
            Some(element) => format!("{}\n\n{}", element.as_context(), text),
            None => text.to_string(),
        };
        self.history.push(Message::user(content));
        self.choices = ChoiceDispatcher::default();
        self.turn_in_progress = true;
        self.swapped_this_turn = false;

        tracing::info!(
            "Session {}: turn {} started",
            self.id,
            self.history.len()
        );
        Ok(self.history.clone())
    }

    /// Inspect an intermediate view; returns a swap the first time the
    /// turn's payload block is complete
    pub fn observe(&mut self, view: &SegmentView) -> Option<DocumentSwap> {
        if !self.turn_in_progress || self.swapped_this_turn {
            return None;
        }
        let markup = view.completed_payload()?.to_string();
        self.swapped_this_turn = true;

        let (generation, outbound) = self.picker.replace_document();
        self.document = Some(RenderedDocument {
            generation,
            markup: markup.clone(),
        });
        tracing::info!("Session {}: rendered document {}", self.id, generation);
        Some(DocumentSwap {
            generation,
            markup,
            outbound,
        })
    }

    /// Close the turn: store the raw text and publish the final choices
    ///
    /// Returns the swap if the final view completed a payload that no
    /// intermediate view had.
    pub fn finish_turn(
        &mut self,
        outcome: &TurnOutcome,
    ) -> Result<Option<DocumentSwap>, SessionError> {
        if !self.turn_in_progress {
            return Err(SessionError::NoTurnInProgress);
        }
        let swap = self.observe(&outcome.view);

        // A turn that failed before any fragment leaves no assistant message
        if !outcome.raw_text.is_empty() {
            self.history.push(Message::assistant(outcome.raw_text.clone()));
        }
        self.choices = ChoiceDispatcher::new(outcome.view.choices.clone());
        self.turn_in_progress = false;

        tracing::info!(
            "Session {}: turn finished ({} fragments, {} choices)",
            self.id,
            outcome.fragments,
            self.choices.len()
        );
        Ok(swap)
    }

    /// Text to submit for the choice numbered `number` (one-based)
    pub fn activate_choice(&self, number: usize) -> Result<String, SessionError> {
        if self.turn_in_progress {
            return Err(SessionError::TurnInProgress);
        }
        match number.checked_sub(1).and_then(|i| self.choices.activate(i)) {
            Some(ChoiceIntent::SubmitTurn(value)) => Ok(value),
            None => Err(SessionError::UnknownChoice(number)),
        }
    }

    /// Text to submit for the choice labelled `label`, if there is one
    pub fn activate_choice_label(&self, label: &str) -> Option<String> {
        if self.turn_in_progress {
            return None;
        }
        match self.choices.activate_label(label)? {
            ChoiceIntent::SubmitTurn(value) => Some(value),
        }
    }

    pub fn start_picking(&mut self) -> Result<Vec<Outbound>, SessionError> {
        Ok(self.picker.start()?)
    }

    pub fn cancel_picking(&mut self) -> Option<Outbound> {
        self.picker.cancel()
    }

    /// Process a raw report from the sandbox instance `from`
    ///
    /// `None` when the message is undecodable or its kind is not understood.
    pub fn handle_report(
        &mut self,
        from: DocumentGeneration,
        raw: &str,
    ) -> Option<HandleOutcome> {
        match decode::<SandboxMessage>(raw) {
            Ok(Some(message)) => Some(self.picker.handle(from, message)),
            Ok(None) => {
                tracing::debug!("Ignoring unknown message from document {}", from);
                None
            }
            Err(e) => {
                tracing::debug!("Ignoring malformed message from document {}: {}", from, e);
                None
            }
        }
    }

    pub fn selection(&self) -> Option<&PickedElement> {
        self.picker.picked()
    }

    pub fn clear_selection(&mut self) {
        self.picker.clear_picked();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Role;
    use crate::picker::{encode, HostMessage};
    use crate::segments::parse;

    fn outcome(raw: &str) -> TurnOutcome {
        TurnOutcome {
            view: parse(raw),
            raw_text: raw.to_string(),
            error: None,
            interrupted: false,
            fragments: 1,
        }
    }

    fn picked_report(session: &ChatSession) -> String {
        let element = PickedElement::new(
            "h1".to_string(),
            "hero-title".to_string(),
            "title big".to_string(),
            "Welcome".to_string(),
            "<h1 id=\"hero-title\" class=\"title big\">Welcome</h1>".to_string(),
            "h1#hero-title.title.big".to_string(),
        );
        encode(&SandboxMessage::ElementPicked {
            element,
            cycle: session.picker().current_cycle(),
        })
        .unwrap()
    }

    const SITE: &str = "Here it is<<<CODE_START>>><h1>Hi</h1><<<CODE_END>>>";

    #[test]
    fn test_new_session_starts_with_greeting() {
        let session = ChatSession::default();
        assert_eq!(session.history().len(), 1);
        assert_eq!(session.history()[0].role, Role::Assistant);
        assert_eq!(session.history()[0].content, GREETING);
        assert!(session.document().is_none());
    }

    #[test]
    fn test_turn_lifecycle() {
        let mut session = ChatSession::default();
        let messages = session.begin_turn("  a bakery site ").unwrap();
        assert_eq!(messages.last().unwrap().content, "a bakery site");
        assert!(matches!(
            session.begin_turn("again"),
            Err(SessionError::TurnInProgress)
        ));

        session
            .finish_turn(&outcome("Pick one:<<<OPTIONS_START>>>[{\"label\":\"Modern\"},{\"label\":\"Classic\",\"value\":\"classic\"}]<<<OPTIONS_END>>>"))
            .unwrap();
        assert_eq!(session.history().len(), 3);
        assert!(session.history()[2].content.contains("<<<OPTIONS_START>>>"));
        assert_eq!(session.activate_choice(2).unwrap(), "classic");
        assert_eq!(
            session.activate_choice_label("modern").as_deref(),
            Some("Modern")
        );
        assert_eq!(session.activate_choice_label("Retro"), None);
        assert!(matches!(
            session.activate_choice(0),
            Err(SessionError::UnknownChoice(0))
        ));
        assert!(matches!(
            session.finish_turn(&outcome("late")),
            Err(SessionError::NoTurnInProgress)
        ));
    }

    #[test]
    fn test_empty_message_rejected() {
        let mut session = ChatSession::default();
        assert!(matches!(
            session.begin_turn("   "),
            Err(SessionError::EmptyMessage)
        ));
        assert!(!session.is_turn_in_progress());
    }

    #[test]
    fn test_choices_withdrawn_when_turn_begins() {
        let mut session = ChatSession::default();
        session.begin_turn("hi").unwrap();
        session
            .finish_turn(&outcome("<<<OPTIONS_START>>>[{\"label\":\"A\"}]<<<OPTIONS_END>>>"))
            .unwrap();
        assert_eq!(session.choices().len(), 1);
        session.begin_turn("A").unwrap();
        assert!(session.choices().is_empty());
    }

    #[test]
    fn test_observe_swaps_once_per_turn() {
        let mut session = ChatSession::default();
        session.begin_turn("build it").unwrap();

        assert!(session.observe(&parse("<<<CODE_START>>><h1>")).is_none());
        let swap = session.observe(&parse(SITE)).unwrap();
        assert_eq!(swap.markup, "<h1>Hi</h1>");
        assert!(swap.outbound.is_empty());
        assert!(session.observe(&parse(SITE)).is_none());

        // Already swapped mid-turn, so finishing does not swap again
        assert!(session.finish_turn(&outcome(SITE)).unwrap().is_none());
        assert_eq!(
            session.document().unwrap().generation,
            swap.generation
        );
    }

    #[test]
    fn test_finish_turn_swaps_if_not_observed() {
        let mut session = ChatSession::default();
        session.begin_turn("build it").unwrap();
        let swap = session.finish_turn(&outcome(SITE)).unwrap().unwrap();
        assert_eq!(session.document().unwrap().markup, swap.markup);
    }

    #[test]
    fn test_picked_element_folded_into_next_message() {
        let mut session = ChatSession::default();
        session.begin_turn("build it").unwrap();
        let swap = session.finish_turn(&outcome(SITE)).unwrap().unwrap();

        assert!(session.start_picking().is_ok());
        let report = picked_report(&session);
        let handled = session.handle_report(swap.generation, &report);
        assert_eq!(handled, Some(HandleOutcome::Picked));
        assert!(session.selection().is_some());

        let messages = session.begin_turn("make it red").unwrap();
        let sent = &messages.last().unwrap().content;
        assert!(sent.starts_with("[Selected element: h1#hero-title.title.big]"));
        assert!(sent.ends_with("\n\nmake it red"));
        assert!(session.selection().is_none());
    }

    #[test]
    fn test_picking_requires_a_document() {
        let mut session = ChatSession::default();
        assert!(matches!(
            session.start_picking(),
            Err(SessionError::Picker(_))
        ));
    }

    #[test]
    fn test_swap_while_picking_rearms_new_document() {
        let mut session = ChatSession::default();
        session.begin_turn("build it").unwrap();
        let first = session.finish_turn(&outcome(SITE)).unwrap().unwrap();
        session.start_picking().unwrap();

        session.begin_turn("again").unwrap();
        let second = session.finish_turn(&outcome(SITE)).unwrap().unwrap();
        assert_eq!(
            second.outbound,
            vec![Outbound {
                generation: second.generation,
                message: HostMessage::SetPicking {
                    active: true,
                    cycle: 2
                },
            }]
        );

        let report = picked_report(&session);
        let stale = session.handle_report(first.generation, &report);
        assert_eq!(stale, Some(HandleOutcome::Stale));
        assert!(session.selection().is_none());
    }

    #[test]
    fn test_unknown_or_undecodable_report_ignored() {
        let mut session = ChatSession::default();
        session.begin_turn("build it").unwrap();
        let swap = session.finish_turn(&outcome(SITE)).unwrap().unwrap();
        session.start_picking().unwrap();

        assert_eq!(
            session.handle_report(swap.generation, r#"{"kind":"SCROLLED"}"#),
            None
        );
        assert_eq!(session.handle_report(swap.generation, "not json"), None);
        assert_eq!(
            session.handle_report(swap.generation, r#"{"kind":"ELEMENT_PICKED"}"#),
            None
        );
        // Still picking; nothing was stored
        assert!(session.picker().is_picking());
        assert!(session.selection().is_none());
    }

    #[test]
    fn test_failed_turn_without_text_adds_no_reply() {
        let mut session = ChatSession::default();
        session.begin_turn("hi").unwrap();
        let failed = TurnOutcome {
            view: SegmentView::default(),
            raw_text: String::new(),
            error: Some("Unauthorized: bad key".to_string()),
            interrupted: false,
            fragments: 0,
        };
        session.finish_turn(&failed).unwrap();
        assert_eq!(session.history().len(), 2);
        assert!(!session.is_turn_in_progress());
    }
}
