//! Categorisation pipeline.
//!
//! Every transcript flows through:
//! 1. `Normalizer`: lowercase, segment, lemmatise
//! 2. `TranscriptProcessor`: one `Strategy` per slot, each with its own dictionary
//! 3. `ResultEnvelope`: the structured result handed to the publisher

pub mod comparator;
pub mod processor;
pub mod strategy;
pub mod types;

pub use processor::{SlotBinding, TranscriptProcessor};
pub use types::{AnalysisResult, InboundMessage, ResultEnvelope, Slot};
