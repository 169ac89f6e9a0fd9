//! Core domain modules
//!
//! The session state container and the turn driver that feeds a fragment
//! stream through the segment parser.

pub mod errors;
mod session;
mod turn;

pub use errors::SessionError;
pub use session::{ChatSession, DocumentSwap, RenderedDocument};
pub use turn::{run_turn, TurnOutcome};
