//! Infrastructure adapters and runtime bootstrap.

pub mod db;
pub mod error;
pub mod memory;
pub mod seed;
pub mod telemetry;
