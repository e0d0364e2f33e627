//! End-to-end pipeline: document text in, Turtle out.
//!
//! The orchestrator chunks the normalized document, runs each chunk
//! through extraction and grounding under bounded parallelism, folds the
//! resulting fragments in a single reducer task as they arrive, resolves
//! cross-chunk coreferences, and serializes the final graph. One chunk's
//! failure never ends the run - the chunk contributes an empty fragment
//! and the failure lands in the run report.

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod report;

pub use config::{LlmSettings, OntologySettings, PipelineConfig, RuntimeSettings};
pub use error::PipelineError;
pub use orchestrator::{Pipeline, PipelineOutput};
pub use report::{ChunkDisposition, ChunkReport, RunReport};
