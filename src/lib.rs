//! flowr: conversational website builder
//!
//! This library provides:
//! - Incremental parsing of marker-delimited segments in a streamed turn
//! - The host/sandbox element picker protocol for the rendered document
//! - Fragment sources (Google Gemini, scripted replay) and the turn driver
//! - A terminal front end

pub mod config;
pub mod core;
pub mod llm;
pub mod picker;
pub mod segments;
pub mod transport;

pub use config::Config;
pub use segments::{SegmentParser, SegmentView};
