//! Run reporting.

use serde::{Deserialize, Serialize};

use ontograph_extract::ChunkStats;
use ontograph_graph::MergeConflict;
use ontograph_llm::TokenUsage;

/// How one chunk ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChunkDisposition {
    /// Contributed entities and/or relations.
    Succeeded,
    /// Ended on a short-circuit (no mentions, no classes, no entities).
    Empty,
    /// Failed after gateway retries; replaced by an empty fragment.
    Failed { cause: String },
    /// Cancellation reached the chunk before it finished.
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkReport {
    pub index: usize,
    pub disposition: ChunkDisposition,
    #[serde(default)]
    pub stats: ChunkStats,
}

/// Everything a run produced besides the graph itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    pub chunks: Vec<ChunkReport>,
    pub usage: TokenUsage,
    pub conflicts: Vec<MergeConflict>,
    pub entity_count: usize,
    pub relation_count: usize,
}

impl RunReport {
    pub fn failed_chunks(&self) -> impl Iterator<Item = &ChunkReport> {
        self.chunks
            .iter()
            .filter(|c| matches!(c.disposition, ChunkDisposition::Failed { .. }))
    }

    pub fn succeeded_chunks(&self) -> usize {
        self.chunks
            .iter()
            .filter(|c| c.disposition == ChunkDisposition::Succeeded)
            .count()
    }
}
