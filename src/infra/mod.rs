//! Infrastructure adapters and runtime bootstrap.

pub mod env_scope;
pub mod error;
pub mod fetch;
pub mod telemetry;
