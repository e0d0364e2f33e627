//! Top-level error surface.
//!
//! Startup failures (ontology, configuration) and structural failures
//! (serialization) are the only errors a run returns; transport and
//! per-chunk failures are recovered further down and show up in the run
//! report instead. Cause text is truncated so provider error bodies never
//! balloon the error chain.

use ontograph_extract::ExtractError;
use ontograph_llm::gateway::GatewayError;
use ontograph_ontology::OntologyError;

const CAUSE_LIMIT: usize = 400;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("ontology file not found: {path}")]
    OntologyFileNotFound { path: String },
    #[error("ontology parsing failed: {message}")]
    OntologyParsingFailed { message: String },
    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },
    #[error("LLM rate limit exhausted{}", fmt_chunk(.chunk))]
    LlmRateLimit { chunk: Option<usize> },
    #[error("LLM timed out{}", fmt_chunk(.chunk))]
    LlmTimeout { chunk: Option<usize> },
    #[error("LLM response invalid{}: {message}", fmt_chunk(.chunk))]
    LlmInvalidResponse { chunk: Option<usize>, message: String },
    #[error("extraction failed{}: {message}", fmt_chunk(.chunk))]
    ExtractionFailed { chunk: Option<usize>, message: String },
    #[error("RDF serialization failed: {message}")]
    RdfSerializationFailed { message: String },
}

fn fmt_chunk(chunk: &Option<usize>) -> String {
    match chunk {
        Some(index) => format!(" (chunk {index})"),
        None => String::new(),
    }
}

pub(crate) fn bound(message: &str) -> String {
    if message.len() <= CAUSE_LIMIT {
        return message.to_string();
    }
    let cut = message
        .char_indices()
        .take_while(|(i, _)| *i < CAUSE_LIMIT)
        .last()
        .map_or(0, |(i, c)| i + c.len_utf8());
    format!("{}…", &message[..cut])
}

impl PipelineError {
    pub(crate) fn from_ontology(error: OntologyError) -> Self {
        match error {
            OntologyError::FileNotFound(path) => Self::OntologyFileNotFound {
                path: path.display().to_string(),
            },
            OntologyError::ParseFailed(message) => Self::OntologyParsingFailed {
                message: bound(&message),
            },
        }
    }

    /// Categorizes a per-chunk failure for the run report. These never
    /// abort the pipeline; the string form lands in the chunk's entry.
    pub(crate) fn from_extract(chunk: usize, error: &ExtractError) -> Self {
        match error {
            ExtractError::Stage { source, .. } => match source {
                GatewayError::RateLimited { .. } => Self::LlmRateLimit { chunk: Some(chunk) },
                GatewayError::Timeout { .. } => Self::LlmTimeout { chunk: Some(chunk) },
                GatewayError::InvalidResponse { message, .. } => Self::LlmInvalidResponse {
                    chunk: Some(chunk),
                    message: bound(message),
                },
                other => Self::ExtractionFailed {
                    chunk: Some(chunk),
                    message: bound(&other.to_string()),
                },
            },
            ExtractError::Cancelled => Self::ExtractionFailed {
                chunk: Some(chunk),
                message: "cancelled".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ontology_errors_map_to_tagged_variants() {
        let err = PipelineError::from_ontology(OntologyError::FileNotFound("/x/y.ttl".into()));
        assert!(matches!(err, PipelineError::OntologyFileNotFound { .. }));

        let err = PipelineError::from_ontology(OntologyError::ParseFailed("bad turtle".into()));
        assert!(err.to_string().contains("bad turtle"));
    }

    #[test]
    fn chunk_index_is_carried_in_messages() {
        let gateway = GatewayError::Timeout { attempts: 8 };
        let extract = ExtractError::Stage {
            stage: "entity",
            source: gateway,
        };
        let err = PipelineError::from_extract(7, &extract);
        assert!(err.to_string().contains("chunk 7"));
    }

    #[test]
    fn cause_text_is_bounded() {
        let long = "y".repeat(5_000);
        assert!(bound(&long).len() < 500);
    }
}
