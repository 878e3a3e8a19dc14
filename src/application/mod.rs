//! Application services layer.

pub mod error;
pub mod executor;
pub mod jobs;
pub mod renders;
pub mod repos;
