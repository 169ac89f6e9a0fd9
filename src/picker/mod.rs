//! Element picker protocol between the host and a sandboxed document
//!
//! The generated document is rendered in a context the host does not trust.
//! The two sides share no state; they only exchange JSON messages with a
//! `kind` discriminator:
//! - host → sandbox: `{"kind":"SET_PICKING","active":true,"cycle":3}`
//! - sandbox → host: `{"kind":"ELEMENT_PICKED","element":{...},"cycle":3}`
//!
//! `cycle` numbers each arming of the sandbox. The sandbox echoes the cycle
//! it was armed with, so a report still in flight when picking restarts is
//! told apart from one belonging to the new session.
//!
//! [`HostPicker`] and [`SandboxPicker`] are plain state machines; the
//! [`runtime`] module wires a sandboxed instance to channels.

mod document;
mod host;
pub mod runtime;
mod sandbox;

pub use document::{
    build_selector, truncate_chars, DocumentError, ElementId, ElementSummary, PickDocument,
    StaticDocument,
};
pub use host::{HandleOutcome, HostPicker, HostState, Outbound};
pub use runtime::{spawn_sandbox, PointerEvent, Report, SandboxHandle, SandboxSettings};
pub use sandbox::{
    describe, ClickOutcome, DescribeLimits, PointerButton, SandboxPicker, SandboxState,
    DEFAULT_HIGHLIGHT_OUTLINE,
};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifies one rendered instance of the generated document
///
/// The host allocates a new generation every time it replaces the sandboxed
/// document; every report is tagged with the generation that produced it.
pub type DocumentGeneration = u64;

/// Numbers one arming of the sandbox within a document instance
///
/// Peers that omit the field are treated as cycle 0.
pub type ArmingCycle = u64;

/// Errors raised by the picker plumbing
#[derive(Debug, Error)]
pub enum PickerError {
    /// Picking requested before any document was rendered
    #[error("No rendered document to pick from")]
    NoDocument,

    /// The sandboxed instance is gone (replaced or crashed)
    #[error("Sandboxed document {0} is no longer running")]
    SandboxClosed(DocumentGeneration),

    /// A message could not be serialized or deserialized
    #[error("Malformed picker message: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Messages the host sends into the sandbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HostMessage {
    SetPicking {
        active: bool,
        #[serde(default)]
        cycle: ArmingCycle,
    },
}

/// Messages the sandbox sends back to the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SandboxMessage {
    ElementPicked {
        element: PickedElement,
        #[serde(default)]
        cycle: ArmingCycle,
    },
}

/// A message type carried over the cross-context transport
pub trait WireMessage: Serialize + DeserializeOwned {
    /// Discriminators this type understands
    const KINDS: &'static [&'static str];
}

impl WireMessage for HostMessage {
    const KINDS: &'static [&'static str] = &["SET_PICKING"];
}

impl WireMessage for SandboxMessage {
    const KINDS: &'static [&'static str] = &["ELEMENT_PICKED"];
}

pub fn encode<M: WireMessage>(message: &M) -> Result<String, PickerError> {
    Ok(serde_json::to_string(message)?)
}

/// Decode a raw message
///
/// Returns `Ok(None)` for messages whose `kind` is missing or not one this
/// side understands; those are ignored rather than treated as errors.
pub fn decode<M: WireMessage>(raw: &str) -> Result<Option<M>, PickerError> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    let known = value
        .get("kind")
        .and_then(serde_json::Value::as_str)
        .is_some_and(|kind| M::KINDS.contains(&kind));
    if !known {
        return Ok(None);
    }
    Ok(Some(serde_json::from_value(value)?))
}

/// Description of the element the user picked
///
/// Built once by the sandboxed side and never modified afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PickedElement {
    tag_name: String,
    dom_id: String,
    class_name: String,
    visible_text: String,
    outer_markup: String,
    css_selector: String,
}

impl PickedElement {
    pub fn new(
        tag_name: String,
        dom_id: String,
        class_name: String,
        visible_text: String,
        outer_markup: String,
        css_selector: String,
    ) -> Self {
        Self {
            tag_name,
            dom_id,
            class_name,
            visible_text,
            outer_markup,
            css_selector,
        }
    }

    pub fn tag_name(&self) -> &str {
        &self.tag_name
    }

    pub fn dom_id(&self) -> &str {
        &self.dom_id
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn visible_text(&self) -> &str {
        &self.visible_text
    }

    pub fn outer_markup(&self) -> &str {
        &self.outer_markup
    }

    pub fn css_selector(&self) -> &str {
        &self.css_selector
    }

    /// Block prepended to the next user message so the model knows which
    /// element the user means
    pub fn as_context(&self) -> String {
        format!(
            "[Selected element: {}]\n```html\n{}\n```",
            self.css_selector, self.outer_markup
        )
    }
}
