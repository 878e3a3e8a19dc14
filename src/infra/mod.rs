//! Infrastructure adapters and runtime bootstrap.

pub mod db;
pub mod docker;
pub mod error;
pub mod http;
pub mod telemetry;
