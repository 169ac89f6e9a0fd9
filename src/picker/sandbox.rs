//! Sandboxed side of the picker protocol
//!
//! State machine: `Inactive -> Armed -> Reported`. While armed, pointer
//! movement highlights the element under the pointer and the next primary
//! click is intercepted and reported. Leaving `Armed` always tears down the
//! highlight, whichever way picking ends.

use super::document::{build_selector, truncate_chars, DocumentError, ElementId, PickDocument};
use super::{ArmingCycle, HostMessage, PickedElement, SandboxMessage};

/// Outline applied to the element under the pointer while armed
pub const DEFAULT_HIGHLIGHT_OUTLINE: &str = "2px solid #3b82f6";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxState {
    /// Not observing the pointer
    Inactive,
    /// Observing the pointer; the next primary click is reported
    Armed,
    /// Reported one element; needs a fresh `SET_PICKING` to arm again
    Reported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerButton {
    Primary,
    Secondary,
    Auxiliary,
}

/// Bounds applied to a picked element's description
#[derive(Debug, Clone)]
pub struct DescribeLimits {
    pub max_visible_text: usize,
    pub max_outer_markup: usize,
}

impl Default for DescribeLimits {
    fn default() -> Self {
        Self {
            max_visible_text: 200,
            max_outer_markup: 1000,
        }
    }
}

/// Result of delivering a click to the sandboxed document
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ClickOutcome {
    /// The click's default action (navigation, submit) was suppressed
    pub default_prevented: bool,
    /// Report to send to the host, if the click was intercepted
    pub report: Option<SandboxMessage>,
}

#[derive(Debug)]
struct Highlight {
    element: ElementId,
    prior_outline: Option<String>,
}

/// Picker handler living inside the sandboxed context
#[derive(Debug)]
pub struct SandboxPicker {
    state: SandboxState,
    highlight: Option<Highlight>,
    limits: DescribeLimits,
    outline: String,
    /// Cycle of the last activation, echoed in the report
    cycle: ArmingCycle,
}

impl Default for SandboxPicker {
    fn default() -> Self {
        Self::new(DescribeLimits::default(), DEFAULT_HIGHLIGHT_OUTLINE)
    }
}

impl SandboxPicker {
    pub fn new(limits: DescribeLimits, outline: impl Into<String>) -> Self {
        Self {
            state: SandboxState::Inactive,
            highlight: None,
            limits,
            outline: outline.into(),
            cycle: 0,
        }
    }

    pub fn state(&self) -> SandboxState {
        self.state
    }

    /// Element currently carrying the highlight
    pub fn highlighted(&self) -> Option<ElementId> {
        self.highlight.as_ref().map(|h| h.element)
    }

    pub fn handle_message<D: PickDocument>(&mut self, doc: &mut D, message: HostMessage) {
        match message {
            HostMessage::SetPicking {
                active: true,
                cycle,
            } => {
                // Every activation starts a fresh arming cycle
                self.clear_highlight(doc);
                self.state = SandboxState::Armed;
                self.cycle = cycle;
                tracing::debug!("Picker armed (cycle {})", cycle);
            }
            HostMessage::SetPicking { active: false, .. } => {
                if self.state == SandboxState::Armed {
                    self.teardown(doc, SandboxState::Inactive);
                    tracing::debug!("Picker disarmed before a click");
                } else {
                    self.state = SandboxState::Inactive;
                }
            }
        }
    }

    /// Pointer moved onto `target` (or off every element)
    pub fn pointer_move<D: PickDocument>(&mut self, doc: &mut D, target: Option<ElementId>) {
        if self.state != SandboxState::Armed || self.highlighted() == target {
            return;
        }
        self.clear_highlight(doc);
        let Some(element) = target else { return };

        let prior_outline = match doc.outline(element) {
            Ok(prior) => prior,
            Err(e) => {
                tracing::debug!("Not highlighting element {}: {}", element, e);
                return;
            }
        };
        match doc.set_outline(element, Some(self.outline.clone())) {
            Ok(()) => {
                self.highlight = Some(Highlight {
                    element,
                    prior_outline,
                });
            }
            Err(e) => tracing::debug!("Failed to highlight element {}: {}", element, e),
        }
    }

    /// Deliver a click on `target`
    ///
    /// Only a primary click while armed is intercepted; anything else passes
    /// through with its default action intact.
    pub fn click<D: PickDocument>(
        &mut self,
        doc: &mut D,
        target: ElementId,
        button: PointerButton,
    ) -> ClickOutcome {
        if self.state != SandboxState::Armed || button != PointerButton::Primary {
            return ClickOutcome::default();
        }

        // Restore the target's own styling before its markup is captured
        self.clear_highlight(doc);
        let element = describe(doc, target, &self.limits);
        self.teardown(doc, SandboxState::Reported);
        tracing::debug!("Picked {}", element.css_selector());

        ClickOutcome {
            default_prevented: true,
            report: Some(SandboxMessage::ElementPicked {
                element,
                cycle: self.cycle,
            }),
        }
    }

    fn teardown<D: PickDocument>(&mut self, doc: &mut D, next: SandboxState) {
        self.clear_highlight(doc);
        self.state = next;
    }

    fn clear_highlight<D: PickDocument>(&mut self, doc: &mut D) {
        if let Some(highlight) = self.highlight.take() {
            if let Err(e) = doc.set_outline(highlight.element, highlight.prior_outline) {
                tracing::debug!("Failed to restore outline on {}: {}", highlight.element, e);
            }
        }
    }
}

/// Describe `element`, falling back to an empty value for any field that
/// cannot be read
pub fn describe<D: PickDocument>(
    doc: &D,
    element: ElementId,
    limits: &DescribeLimits,
) -> PickedElement {
    let tag_name = field(doc.tag_name(element), "tagName").to_lowercase();
    let dom_id = field(doc.dom_id(element), "id");
    let class_name = field(doc.class_name(element), "className");
    let visible_text = truncate_chars(
        &field(doc.text_content(element), "textContent"),
        limits.max_visible_text,
    );
    let outer_markup = truncate_chars(
        &field(doc.outer_markup(element), "outerHTML"),
        limits.max_outer_markup,
    );
    let css_selector = build_selector(&tag_name, &dom_id, &class_name);

    PickedElement::new(
        tag_name,
        dom_id,
        class_name,
        visible_text,
        outer_markup,
        css_selector,
    )
}

fn field(result: Result<String, DocumentError>, name: &str) -> String {
    result.unwrap_or_else(|e| {
        tracing::debug!("Picked element field '{}' unavailable: {}", name, e);
        String::new()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::picker::StaticDocument;

    const PAGE: &str = r#"<body><h1 id="hero-title" class="title big">Fresh bread, every day</h1><a id="cta" href="/order" style="outline: none">Order</a><p>Plain</p></body>"#;

    fn activate(cycle: ArmingCycle) -> HostMessage {
        HostMessage::SetPicking {
            active: true,
            cycle,
        }
    }

    fn deactivate() -> HostMessage {
        HostMessage::SetPicking {
            active: false,
            cycle: 1,
        }
    }

    fn armed(doc: &mut StaticDocument) -> SandboxPicker {
        let mut picker = SandboxPicker::default();
        picker.handle_message(doc, activate(1));
        picker
    }

    fn picked(outcome: ClickOutcome) -> PickedElement {
        match outcome.report {
            Some(SandboxMessage::ElementPicked { element, .. }) => element,
            None => panic!("expected a report"),
        }
    }

    /// Document whose class attribute can never be read
    struct FlakyDocument(StaticDocument);

    impl PickDocument for FlakyDocument {
        fn tag_name(&self, e: ElementId) -> Result<String, DocumentError> {
            self.0.tag_name(e)
        }
        fn dom_id(&self, e: ElementId) -> Result<String, DocumentError> {
            self.0.dom_id(e)
        }
        fn class_name(&self, e: ElementId) -> Result<String, DocumentError> {
            Err(DocumentError::Unreadable {
                element: e,
                property: "className",
            })
        }
        fn text_content(&self, e: ElementId) -> Result<String, DocumentError> {
            self.0.text_content(e)
        }
        fn outer_markup(&self, e: ElementId) -> Result<String, DocumentError> {
            self.0.outer_markup(e)
        }
        fn outline(&self, e: ElementId) -> Result<Option<String>, DocumentError> {
            self.0.outline(e)
        }
        fn set_outline(&mut self, e: ElementId, o: Option<String>) -> Result<(), DocumentError> {
            self.0.set_outline(e, o)
        }
    }

    #[test]
    fn test_click_while_armed_reports_once() {
        let mut doc = StaticDocument::parse(PAGE);
        let mut picker = armed(&mut doc);
        let h1 = doc.find_by_dom_id("hero-title").unwrap();

        let outcome = picker.click(&mut doc, h1, PointerButton::Primary);
        assert!(outcome.default_prevented);
        let element = picked(outcome);
        assert_eq!(element.css_selector(), "h1#hero-title.title.big");
        assert_eq!(element.tag_name(), "h1");
        assert_eq!(element.visible_text(), "Fresh bread, every day");
        assert_eq!(picker.state(), SandboxState::Reported);

        let second = picker.click(&mut doc, h1, PointerButton::Primary);
        assert_eq!(second, ClickOutcome::default());
    }

    #[test]
    fn test_rearm_allows_exactly_one_more_report() {
        let mut doc = StaticDocument::parse(PAGE);
        let mut picker = armed(&mut doc);
        let h1 = doc.find_by_dom_id("hero-title").unwrap();
        let cta = doc.find_by_dom_id("cta").unwrap();

        assert!(picker.click(&mut doc, h1, PointerButton::Primary).report.is_some());
        picker.handle_message(&mut doc, activate(2));
        assert_eq!(picker.state(), SandboxState::Armed);

        let element = picked(picker.click(&mut doc, cta, PointerButton::Primary));
        assert_eq!(element.css_selector(), "a#cta");
        assert!(picker.click(&mut doc, cta, PointerButton::Primary).report.is_none());
    }

    #[test]
    fn test_report_echoes_arming_cycle() {
        let mut doc = StaticDocument::parse(PAGE);
        let mut picker = SandboxPicker::default();
        let h1 = doc.find_by_dom_id("hero-title").unwrap();

        picker.handle_message(&mut doc, activate(7));
        let outcome = picker.click(&mut doc, h1, PointerButton::Primary);
        assert!(matches!(
            outcome.report,
            Some(SandboxMessage::ElementPicked { cycle: 7, .. })
        ));

        picker.handle_message(&mut doc, activate(8));
        let outcome = picker.click(&mut doc, h1, PointerButton::Primary);
        assert!(matches!(
            outcome.report,
            Some(SandboxMessage::ElementPicked { cycle: 8, .. })
        ));
    }

    #[test]
    fn test_click_while_inactive_passes_through() {
        let mut doc = StaticDocument::parse(PAGE);
        let mut picker = SandboxPicker::default();
        let h1 = doc.find_by_dom_id("hero-title").unwrap();
        let outcome = picker.click(&mut doc, h1, PointerButton::Primary);
        assert!(!outcome.default_prevented);
        assert!(outcome.report.is_none());
    }

    #[test]
    fn test_secondary_click_is_not_intercepted() {
        let mut doc = StaticDocument::parse(PAGE);
        let mut picker = armed(&mut doc);
        let h1 = doc.find_by_dom_id("hero-title").unwrap();
        assert_eq!(
            picker.click(&mut doc, h1, PointerButton::Secondary),
            ClickOutcome::default()
        );
        assert_eq!(picker.state(), SandboxState::Armed);
    }

    #[test]
    fn test_hover_highlights_and_restores_previous() {
        let mut doc = StaticDocument::parse(PAGE);
        let mut picker = armed(&mut doc);
        let h1 = doc.find_by_dom_id("hero-title").unwrap();
        let cta = doc.find_by_dom_id("cta").unwrap();

        picker.pointer_move(&mut doc, Some(cta));
        assert_eq!(doc.outline(cta).unwrap().as_deref(), Some(DEFAULT_HIGHLIGHT_OUTLINE));

        picker.pointer_move(&mut doc, Some(h1));
        assert_eq!(doc.outline(cta).unwrap().as_deref(), Some("none"));
        assert_eq!(doc.outline(h1).unwrap().as_deref(), Some(DEFAULT_HIGHLIGHT_OUTLINE));
        assert_eq!(picker.highlighted(), Some(h1));

        picker.pointer_move(&mut doc, None);
        assert_eq!(doc.outline(h1).unwrap(), None);
        assert_eq!(picker.highlighted(), None);
    }

    #[test]
    fn test_hover_ignored_while_inactive() {
        let mut doc = StaticDocument::parse(PAGE);
        let mut picker = SandboxPicker::default();
        let h1 = doc.find_by_dom_id("hero-title").unwrap();
        picker.pointer_move(&mut doc, Some(h1));
        assert_eq!(doc.outline(h1).unwrap(), None);
    }

    #[test]
    fn test_click_clears_highlight() {
        let mut doc = StaticDocument::parse(PAGE);
        let mut picker = armed(&mut doc);
        let cta = doc.find_by_dom_id("cta").unwrap();

        picker.pointer_move(&mut doc, Some(cta));
        let element = picked(picker.click(&mut doc, cta, PointerButton::Primary));
        assert_eq!(doc.outline(cta).unwrap().as_deref(), Some("none"));
        assert_eq!(picker.highlighted(), None);
        assert!(!element.outer_markup().contains(DEFAULT_HIGHLIGHT_OUTLINE));
    }

    #[test]
    fn test_deactivate_before_click_clears_highlight() {
        let mut doc = StaticDocument::parse(PAGE);
        let mut picker = armed(&mut doc);
        let h1 = doc.find_by_dom_id("hero-title").unwrap();

        picker.pointer_move(&mut doc, Some(h1));
        picker.handle_message(&mut doc, deactivate());
        assert_eq!(picker.state(), SandboxState::Inactive);
        assert_eq!(doc.outline(h1).unwrap(), None);
        assert!(picker.click(&mut doc, h1, PointerButton::Primary).report.is_none());
    }

    #[test]
    fn test_unreadable_field_is_empty_but_reported() {
        let mut doc = FlakyDocument(StaticDocument::parse(PAGE));
        let mut picker = SandboxPicker::default();
        picker.handle_message(&mut doc, activate(1));
        let h1 = doc.0.find_by_dom_id("hero-title").unwrap();

        picker.pointer_move(&mut doc, Some(h1));
        let element = picked(picker.click(&mut doc, h1, PointerButton::Primary));
        assert_eq!(element.class_name(), "");
        assert_eq!(element.css_selector(), "h1#hero-title");
        assert_eq!(picker.state(), SandboxState::Reported);
        assert_eq!(doc.outline(h1).unwrap(), None);
    }

    #[test]
    fn test_missing_element_still_reports() {
        let mut doc = StaticDocument::parse(PAGE);
        let mut picker = armed(&mut doc);
        let element = picked(picker.click(&mut doc, ElementId(999), PointerButton::Primary));
        assert_eq!(element, PickedElement::default());
        assert_eq!(picker.state(), SandboxState::Reported);
    }

    #[test]
    fn test_description_is_bounded() {
        let long_text = "word ".repeat(200);
        let page = format!("<div id=\"long\">{long_text}</div>");
        let mut doc = StaticDocument::parse(page);
        let mut picker = SandboxPicker::new(
            DescribeLimits {
                max_visible_text: 20,
                max_outer_markup: 30,
            },
            DEFAULT_HIGHLIGHT_OUTLINE,
        );
        picker.handle_message(&mut doc, activate(1));
        let div = doc.find_by_dom_id("long").unwrap();
        let element = picked(picker.click(&mut doc, div, PointerButton::Primary));
        assert_eq!(element.visible_text().chars().count(), 20);
        assert_eq!(element.outer_markup().chars().count(), 30);
    }
}
