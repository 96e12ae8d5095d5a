//! Document validation: per-chunk content memory and county/parish
//! jurisdiction checks.

pub mod content_memory;
pub mod location;

pub use content_memory::{ContentMemoryValidator, KeywordHeuristic};
pub use location::CountyValidator;
