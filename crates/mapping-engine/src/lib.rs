//! Mapping engine.
//!
//! Ties the registry, matcher, and unknown-field tracker together into the
//! ingestion-facing surface: apply confirmed rules to a raw payload, propose
//! mappings for a sample payload, and turn human confirmations into durable
//! rules, aliases, and new fields.

mod apply;
mod engine;
mod errors;

pub use apply::apply_rules;
pub use engine::{ConfirmOutcome, IngestOutcome, MappingEngine};
pub use errors::{MappingError, MappingResult};
