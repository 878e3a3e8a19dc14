//! Domain layer types and invariants.

pub mod error;
pub mod renders;
pub mod tasks;
pub mod types;
