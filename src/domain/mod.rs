//! Domain layer types and invariants.

pub mod descriptor;
pub mod entities;
pub mod error;
pub mod types;
