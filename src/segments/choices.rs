//! Choice-list blocks and their dispatch
//!
//! The body between the options markers is a JSON array of
//! `{"label": ..., "value": ...}` objects. Parsing is lenient: anything that
//! is not a usable array yields an empty list instead of an error.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One selectable follow-up intent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub label: String,
    /// Submitted when the choice is activated; defaults to `label`
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Choice {
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
            id: None,
        }
    }

    fn from_json(item: &Value) -> Option<Self> {
        let obj = item.as_object()?;
        let label = obj.get("label")?.as_str()?.to_string();
        let value = obj
            .get("value")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| label.clone());
        let id = obj.get("id").and_then(|id| match id {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        });
        Some(Self { label, value, id })
    }
}

/// Parse a choice-list body
///
/// Tries the whole body first, then the slice between the first `[` and the
/// last `]` (models like to wrap JSON in code fences). Items without a string
/// `label` are skipped.
pub fn parse_choices(body: &str) -> Vec<Choice> {
    let body = body.trim();
    let parsed = serde_json::from_str::<Value>(body).ok().or_else(|| {
        let start = body.find('[')?;
        let end = body.rfind(']')?;
        if end < start {
            return None;
        }
        serde_json::from_str::<Value>(&body[start..=end]).ok()
    });

    match parsed {
        Some(Value::Array(items)) => items.iter().filter_map(Choice::from_json).collect(),
        Some(_) => {
            tracing::debug!("Choice block is not a JSON array, ignoring");
            Vec::new()
        }
        None => {
            tracing::debug!("Malformed choice block JSON ({} bytes), ignoring", body.len());
            Vec::new()
        }
    }
}

/// What activating a choice asks the application to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChoiceIntent {
    /// Submit a new user turn with this text
    SubmitTurn(String),
}

/// Addressable view over a closed choice list
#[derive(Debug, Clone, Default)]
pub struct ChoiceDispatcher {
    choices: Vec<Choice>,
}

impl ChoiceDispatcher {
    pub fn new(choices: Vec<Choice>) -> Self {
        Self { choices }
    }

    pub fn choices(&self) -> &[Choice] {
        &self.choices
    }

    pub fn is_empty(&self) -> bool {
        self.choices.is_empty()
    }

    pub fn len(&self) -> usize {
        self.choices.len()
    }

    /// Activate the choice at `index` (zero-based)
    pub fn activate(&self, index: usize) -> Option<ChoiceIntent> {
        self.choices
            .get(index)
            .map(|c| ChoiceIntent::SubmitTurn(c.value.clone()))
    }

    /// Activate the first choice whose label matches, ignoring ASCII case
    pub fn activate_label(&self, label: &str) -> Option<ChoiceIntent> {
        self.choices
            .iter()
            .find(|c| c.label.eq_ignore_ascii_case(label.trim()))
            .map(|c| ChoiceIntent::SubmitTurn(c.value.clone()))
    }
}
