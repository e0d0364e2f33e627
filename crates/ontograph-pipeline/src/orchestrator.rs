//! The bounded-concurrency orchestrator.
//!
//! Workers and the reducer run concurrently: each chunk task acquires a
//! semaphore permit, extracts, and sends its fragment over a bounded
//! channel (capacity `2 × concurrency`, so workers block when the reducer
//! falls behind). The reducer folds fragments as they arrive - arrival
//! order is unordered; the merge's associativity and commutativity make
//! the fold order-independent. Cancellation is cooperative: no new chunk
//! starts once the token fires, in-flight LLM attempts are abandoned, and
//! the reducer drains what was already produced before yielding.

use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use ontograph_extract::{
    chunk_text, extract_chunk, normalize_text, ExtractError, ExtractorContext, TextChunk,
};
use ontograph_graph::{
    emit_turtle, merge_tracked, resolve_entities, KnowledgeGraph,
};
use ontograph_index::HybridIndex;
use ontograph_llm::gateway::LlmGateway;
use ontograph_llm::providers::build_client;
use ontograph_llm::LlmClient;
use ontograph_ontology::{load_ontology, OntologyContext};

use crate::config::PipelineConfig;
use crate::error::{bound, PipelineError};
use crate::report::{ChunkDisposition, ChunkReport, RunReport};

/// A constructed pipeline: ontology loaded, index built, gateway ready.
pub struct Pipeline {
    config: PipelineConfig,
    extractor: ExtractorContext,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline").finish_non_exhaustive()
    }
}

/// The result of a successful run.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub turtle: String,
    pub graph: KnowledgeGraph,
    pub report: RunReport,
}

enum ChunkMessage {
    Produced {
        index: usize,
        outcome: ontograph_extract::ChunkOutcome,
    },
    Failed {
        index: usize,
        cause: String,
    },
    Cancelled {
        index: usize,
    },
}

impl Pipeline {
    /// Builds the pipeline from configuration, constructing the provider
    /// named in `config.llm`.
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        let client = build_client(&config.provider_settings()).map_err(|e| {
            PipelineError::InvalidConfiguration {
                message: bound(&e.to_string()),
            }
        })?;
        Self::with_client(config, client)
    }

    /// Builds the pipeline around an externally supplied client (offline
    /// runs, tests).
    pub fn with_client(
        config: PipelineConfig,
        client: Arc<dyn LlmClient>,
    ) -> Result<Self, PipelineError> {
        config
            .validate()
            .map_err(|message| PipelineError::InvalidConfiguration { message })?;

        let ontology =
            Arc::new(load_ontology(&config.ontology.path).map_err(PipelineError::from_ontology)?);
        Self::assemble(config, ontology, client)
    }

    /// Builds the pipeline over an already-loaded ontology.
    pub fn with_ontology(
        config: PipelineConfig,
        ontology: Arc<OntologyContext>,
        client: Arc<dyn LlmClient>,
    ) -> Result<Self, PipelineError> {
        config
            .validate()
            .map_err(|message| PipelineError::InvalidConfiguration { message })?;
        Self::assemble(config, ontology, client)
    }

    fn assemble(
        config: PipelineConfig,
        ontology: Arc<OntologyContext>,
        client: Arc<dyn LlmClient>,
    ) -> Result<Self, PipelineError> {
        let index = Arc::new(HybridIndex::build(&ontology, config.bm25));
        let gateway = Arc::new(LlmGateway::new(client, config.gateway_options()));
        tracing::info!(
            classes = ontology.class_count(),
            properties = ontology.property_count(),
            "pipeline ready"
        );
        let extractor = ExtractorContext {
            ontology,
            index,
            gateway,
            retrieval: config.retrieval,
            grounding: config.grounding,
        };
        Ok(Self { config, extractor })
    }

    pub fn ontology(&self) -> &OntologyContext {
        &self.extractor.ontology
    }

    /// Full run: extraction, merge, resolution, Turtle serialization.
    pub async fn run(
        &self,
        document: &str,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutput, PipelineError> {
        let (graph, report) = self.extract_graph(document, cancel).await?;
        let turtle = emit_turtle(&graph, &self.config.rdf).map_err(|e| {
            PipelineError::RdfSerializationFailed {
                message: bound(&e.to_string()),
            }
        })?;
        Ok(PipelineOutput {
            turtle,
            graph,
            report,
        })
    }

    /// Extracts and resolves the document-level graph without serializing.
    ///
    /// Cancellation is not an error: the graph folded so far is returned,
    /// with unstarted chunks reported as cancelled.
    pub async fn extract_graph(
        &self,
        document: &str,
        cancel: &CancellationToken,
    ) -> Result<(KnowledgeGraph, RunReport), PipelineError> {
        let normalized = normalize_text(document);
        let chunks = chunk_text(&normalized, &self.config.chunking);
        tracing::info!(chunks = chunks.len(), "document chunked");
        if chunks.is_empty() {
            return Ok((KnowledgeGraph::empty(), RunReport::default()));
        }

        let concurrency = self.config.runtime.extraction_concurrency.max(1);
        let (tx, mut rx) = mpsc::channel::<ChunkMessage>(2 * concurrency);
        let semaphore = Arc::new(Semaphore::new(concurrency));

        // Reducer: folds fragments as they arrive; arrival order is
        // irrelevant to the final graph.
        let reducer = tokio::spawn(async move {
            let mut graph = KnowledgeGraph::empty();
            let mut report = RunReport::default();
            while let Some(message) = rx.recv().await {
                match message {
                    ChunkMessage::Produced { index, outcome } => {
                        report.usage.add(outcome.usage);
                        let disposition = if outcome.fragment.is_empty() {
                            ChunkDisposition::Empty
                        } else {
                            ChunkDisposition::Succeeded
                        };
                        report.chunks.push(ChunkReport {
                            index,
                            disposition,
                            stats: outcome.stats,
                        });
                        let (merged, mut conflicts) = merge_tracked(graph, outcome.fragment);
                        graph = merged;
                        report.conflicts.append(&mut conflicts);
                    }
                    ChunkMessage::Failed { index, cause } => {
                        report.chunks.push(ChunkReport {
                            index,
                            disposition: ChunkDisposition::Failed { cause },
                            stats: Default::default(),
                        });
                    }
                    ChunkMessage::Cancelled { index } => {
                        report.chunks.push(ChunkReport {
                            index,
                            disposition: ChunkDisposition::Cancelled,
                            stats: Default::default(),
                        });
                    }
                }
            }
            report.chunks.sort_by_key(|c| c.index);
            (graph, report)
        });

        let mut workers = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let semaphore = Arc::clone(&semaphore);
            let tx = tx.clone();
            let cancel = cancel.clone();
            let extractor = self.extractor.clone();
            workers.push(tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                let index = chunk.index;
                // Cancellation stops chunks that have not started yet.
                if cancel.is_cancelled() {
                    let _ = tx.send(ChunkMessage::Cancelled { index }).await;
                    return;
                }
                let message = run_chunk(&extractor, chunk, &cancel).await;
                let _ = tx.send(message).await;
            }));
        }
        drop(tx);

        for worker in workers {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "chunk worker panicked");
            }
        }

        let (graph, mut report) = reducer.await.map_err(|e| PipelineError::ExtractionFailed {
            chunk: None,
            message: bound(&format!("reducer task failed: {e}")),
        })?;

        let resolved = resolve_entities(graph, &self.config.resolver);
        report.entity_count = resolved.entity_count();
        report.relation_count = resolved.relation_count();
        tracing::info!(
            entities = report.entity_count,
            relations = report.relation_count,
            failed_chunks = report.failed_chunks().count(),
            "run complete"
        );
        Ok((resolved, report))
    }
}

async fn run_chunk(
    extractor: &ExtractorContext,
    chunk: TextChunk,
    cancel: &CancellationToken,
) -> ChunkMessage {
    let index = chunk.index;
    let span = tracing::info_span!("chunk", index);
    match extract_chunk(extractor, &chunk, cancel).instrument(span).await {
        Ok(outcome) => ChunkMessage::Produced { index, outcome },
        Err(ExtractError::Cancelled) => ChunkMessage::Cancelled { index },
        Err(error) => {
            let categorized = PipelineError::from_extract(index, &error);
            tracing::warn!(chunk = index, error = %categorized, "chunk failed; contributing empty fragment");
            ChunkMessage::Failed {
                index,
                cause: bound(&categorized.to_string()),
            }
        }
    }
}
