pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod heuristics;
pub mod store;
pub mod text_source;
pub mod training;
pub mod validation;

pub use config::Config;
pub use context::AppContext;
pub use heuristics::{ExtractionResult, FieldExtractor, PatternLibrary};
pub use validation::{CrossFieldValidator, ValidationReport};
