//! Compact targets, chain work and header proof-of-work checks.

pub mod difficulty;
pub mod validation;
