//! Shared domain enumerations aligned with persisted database enums.

pub use vellum_api_types::{RenderState, SourceType};
