//! Host side of the picker protocol
//!
//! The host owns the picking session (`Idle` / `Picking`) and the notion of
//! which document instance is current. It never assumes the sandbox kept
//! any state across a report or a document swap: every transition that
//! matters is re-sent explicitly.
//!
//! Each activation opens a new arming cycle. Reports are accepted only from
//! the current document instance and the current cycle.

use super::{
    ArmingCycle, DocumentGeneration, HostMessage, PickedElement, PickerError, SandboxMessage,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    Idle,
    Picking,
}

/// A message addressed to one sandboxed document instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub generation: DocumentGeneration,
    pub message: HostMessage,
}

impl Outbound {
    fn set_picking(generation: DocumentGeneration, active: bool, cycle: ArmingCycle) -> Self {
        Self {
            generation,
            message: HostMessage::SetPicking { active, cycle },
        }
    }
}

/// What the host did with an incoming sandbox message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleOutcome {
    /// The element was stored and the session ended
    Picked,
    /// The message came from a document instance that has been replaced
    Stale,
    /// The message answered an arming cycle that picking has since
    /// restarted past
    Superseded,
    /// No picking session was active
    NotPicking,
}

#[derive(Debug)]
pub struct HostPicker {
    state: HostState,
    generation: Option<DocumentGeneration>,
    next_generation: DocumentGeneration,
    cycle: ArmingCycle,
    picked: Option<PickedElement>,
    rearm_on_swap: bool,
}

impl Default for HostPicker {
    fn default() -> Self {
        Self::new(true)
    }
}

impl HostPicker {
    /// `rearm_on_swap`: when the document is replaced mid-session, re-arm
    /// the new instance (`true`) or end the session (`false`)
    pub fn new(rearm_on_swap: bool) -> Self {
        Self {
            state: HostState::Idle,
            generation: None,
            next_generation: 1,
            cycle: 0,
            picked: None,
            rearm_on_swap,
        }
    }

    pub fn state(&self) -> HostState {
        self.state
    }

    pub fn is_picking(&self) -> bool {
        self.state == HostState::Picking
    }

    /// Generation of the document instance currently rendered
    pub fn current_generation(&self) -> Option<DocumentGeneration> {
        self.generation
    }

    /// Cycle of the most recent activation
    pub fn current_cycle(&self) -> ArmingCycle {
        self.cycle
    }

    /// Begin a picking session on the current document
    ///
    /// An unreported session already in progress is superseded: the sandbox
    /// is told to deactivate, then to activate again under a new cycle. A
    /// report from the old cycle that is still in flight is then ignored.
    pub fn start(&mut self) -> Result<Vec<Outbound>, PickerError> {
        let generation = self.generation.ok_or(PickerError::NoDocument)?;
        let mut outbound = Vec::with_capacity(2);
        if self.state == HostState::Picking {
            tracing::debug!(
                "Superseding picking cycle {} on document {}",
                self.cycle,
                generation
            );
            outbound.push(Outbound::set_picking(generation, false, self.cycle));
        }
        outbound.push(self.arm(generation));
        self.state = HostState::Picking;
        Ok(outbound)
    }

    fn arm(&mut self, generation: DocumentGeneration) -> Outbound {
        self.cycle += 1;
        Outbound::set_picking(generation, true, self.cycle)
    }

    /// Cancel the current session; `None` if nothing was being picked
    pub fn cancel(&mut self) -> Option<Outbound> {
        if self.state != HostState::Picking {
            return None;
        }
        self.state = HostState::Idle;
        let generation = self.generation?;
        tracing::debug!("Picking cancelled on document {}", generation);
        Some(Outbound::set_picking(generation, false, self.cycle))
    }

    /// Allocate a generation for a freshly rendered document instance
    ///
    /// Returns the new generation and the messages the new instance needs.
    /// The old instance is forgotten; anything it reports from now on is
    /// stale.
    pub fn replace_document(&mut self) -> (DocumentGeneration, Vec<Outbound>) {
        let generation = self.next_generation;
        self.next_generation += 1;
        let previous = self.generation.replace(generation);
        tracing::debug!("Document {:?} replaced by {}", previous, generation);

        let mut outbound = Vec::new();
        if self.state == HostState::Picking {
            if self.rearm_on_swap {
                outbound.push(self.arm(generation));
            } else {
                self.state = HostState::Idle;
            }
        }
        (generation, outbound)
    }

    /// Process a message from the sandbox instance `from`
    pub fn handle(&mut self, from: DocumentGeneration, message: SandboxMessage) -> HandleOutcome {
        if self.generation != Some(from) {
            tracing::warn!(
                "Ignoring report from stale document {} (current: {:?})",
                from,
                self.generation
            );
            return HandleOutcome::Stale;
        }
        match message {
            SandboxMessage::ElementPicked { element, cycle } => {
                if self.state != HostState::Picking {
                    tracing::debug!("Ignoring report while not picking");
                    return HandleOutcome::NotPicking;
                }
                if cycle != self.cycle {
                    tracing::debug!(
                        "Ignoring report from superseded cycle {} (current: {})",
                        cycle,
                        self.cycle
                    );
                    return HandleOutcome::Superseded;
                }
                tracing::info!("Element picked: {}", element.css_selector());
                self.picked = Some(element);
                self.state = HostState::Idle;
                HandleOutcome::Picked
            }
        }
    }

    pub fn picked(&self) -> Option<&PickedElement> {
        self.picked.as_ref()
    }

    /// Hand the picked element over, leaving none behind
    pub fn take_picked(&mut self) -> Option<PickedElement> {
        self.picked.take()
    }

    pub fn clear_picked(&mut self) {
        self.picked = None;
    }
}
