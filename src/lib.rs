pub mod archive;
pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod normalize;
pub mod parser;
pub mod pipeline;
pub mod sources;
pub mod storage;
pub mod types;

pub use error::{PipelineError, Result};
pub use pipeline::ImportOrchestrator;
pub use types::{
    CanonicalEvent, ImportError, ImportResult, ImportStats, Layer, SourceFile, SourceKind,
};
