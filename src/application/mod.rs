//! Application services: the transform sequencer and its passes.

pub mod assets;
pub mod error;
pub mod optimizer;
pub mod passes;
