//! Domain layer types and invariants.

pub mod amp;
pub mod pass;
