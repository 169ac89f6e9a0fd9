//! Sandboxed document instances on their own tasks
//!
//! Each rendered document lives in a spawned task that exclusively owns it.
//! The host reaches it only through JSON strings on a channel; pointer
//! input from the user arrives on a separate channel; reports come back as
//! `(generation, json)` pairs on a channel shared by all instances, so the
//! host can tell stale instances apart.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::document::{ElementId, PickDocument};
use super::sandbox::{DescribeLimits, PointerButton, SandboxPicker};
use super::{decode, encode, DocumentGeneration, HostMessage, PickerError};

/// Raw report leaving a sandboxed instance
pub type Report = (DocumentGeneration, String);

/// Pointer input delivered to the sandboxed document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerEvent {
    /// Pointer now over `Some(element)`, or over nothing
    Move(Option<ElementId>),
    Click {
        target: ElementId,
        button: PointerButton,
    },
}

/// Settings for the picker inside a sandboxed instance
#[derive(Debug, Clone)]
pub struct SandboxSettings {
    pub limits: DescribeLimits,
    pub highlight_outline: String,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            limits: DescribeLimits::default(),
            highlight_outline: super::sandbox::DEFAULT_HIGHLIGHT_OUTLINE.to_string(),
        }
    }
}

/// Host's handle on one running sandboxed instance
///
/// Dropping the handle discards the instance.
pub struct SandboxHandle {
    generation: DocumentGeneration,
    inbox: mpsc::UnboundedSender<String>,
    pointer: mpsc::UnboundedSender<PointerEvent>,
    task: JoinHandle<()>,
}

impl SandboxHandle {
    pub fn generation(&self) -> DocumentGeneration {
        self.generation
    }

    /// Post a protocol message into the instance
    pub fn post(&self, message: &HostMessage) -> Result<(), PickerError> {
        self.post_raw(encode(message)?)
    }

    /// Post an already-encoded message
    pub fn post_raw(&self, raw: String) -> Result<(), PickerError> {
        self.inbox
            .send(raw)
            .map_err(|_| PickerError::SandboxClosed(self.generation))
    }

    /// Deliver pointer input to the document
    pub fn pointer(&self, event: PointerEvent) -> Result<(), PickerError> {
        self.pointer
            .send(event)
            .map_err(|_| PickerError::SandboxClosed(self.generation))
    }
}

impl Drop for SandboxHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Start a sandboxed instance owning `document`
///
/// Must be called from within a Tokio runtime.
pub fn spawn_sandbox<D>(
    generation: DocumentGeneration,
    document: D,
    settings: SandboxSettings,
    reports: mpsc::UnboundedSender<Report>,
) -> SandboxHandle
where
    D: PickDocument + Send + 'static,
{
    let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
    let (pointer_tx, pointer_rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run_sandbox(
        generation, document, settings, inbox_rx, pointer_rx, reports,
    ));
    SandboxHandle {
        generation,
        inbox: inbox_tx,
        pointer: pointer_tx,
        task,
    }
}

async fn run_sandbox<D: PickDocument>(
    generation: DocumentGeneration,
    mut document: D,
    settings: SandboxSettings,
    mut inbox: mpsc::UnboundedReceiver<String>,
    mut pointer: mpsc::UnboundedReceiver<PointerEvent>,
    reports: mpsc::UnboundedSender<Report>,
) {
    let mut picker = SandboxPicker::new(settings.limits, settings.highlight_outline);
    tracing::debug!("Sandboxed document {} started", generation);

    loop {
        tokio::select! {
            // Host messages already queued are applied before pointer input
            biased;

            raw = inbox.recv() => {
                let Some(raw) = raw else { break };
                match decode::<HostMessage>(&raw) {
                    Ok(Some(message)) => picker.handle_message(&mut document, message),
                    Ok(None) => tracing::debug!("Sandbox {} ignoring unknown message", generation),
                    Err(e) => tracing::debug!("Sandbox {} ignoring malformed message: {}", generation, e),
                }
            }
            event = pointer.recv() => {
                let Some(event) = event else { break };
                match event {
                    PointerEvent::Move(target) => picker.pointer_move(&mut document, target),
                    PointerEvent::Click { target, button } => {
                        let outcome = picker.click(&mut document, target, button);
                        let Some(report) = outcome.report else { continue };
                        match encode(&report) {
                            Ok(json) => {
                                if reports.send((generation, json)).is_err() {
                                    break;
                                }
                            }
                            Err(e) => tracing::warn!("Sandbox {} failed to encode report: {}", generation, e),
                        }
                    }
                }
            }
        }
    }

    tracing::debug!("Sandboxed document {} stopped", generation);
}
