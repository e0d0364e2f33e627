//! Relation grounding: a second model pass that audits candidates.
//!
//! The relation pass happily produces relations the chunk never stated (typically by
//! borrowing context from another sentence). The grounder shows the model
//! the chunk text and the enriched candidate triples, and asks for a
//! verdict per candidate. A relation survives only when the verdict is
//! `grounded` with confidence at or above the threshold; a candidate the
//! model failed to address counts as rejected. Larger candidate lists run
//! in fixed-size batches whose results concatenate in order.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use ontograph_graph::{Relation, RelationObject};
use ontograph_llm::gateway::{GatewayError, LlmGateway, Prompt};
use ontograph_llm::schema::Schema;
use ontograph_llm::TokenUsage;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GroundingOptions {
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Grounding calls may read long chunks; they run with this multiple
    /// of the gateway's per-attempt timeout.
    #[serde(default = "default_timeout_multiplier")]
    pub timeout_multiplier: u32,
}

fn default_confidence_threshold() -> f64 {
    0.8
}

fn default_batch_size() -> usize {
    5
}

fn default_timeout_multiplier() -> u32 {
    2
}

impl Default for GroundingOptions {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            batch_size: default_batch_size(),
            timeout_multiplier: default_timeout_multiplier(),
        }
    }
}

/// A candidate relation enriched with the surface detail the verifier needs.
#[derive(Debug, Clone)]
pub struct CandidateRelation {
    pub relation: Relation,
    pub subject_mention: String,
    pub subject_types: Vec<String>,
    pub object_label: String,
    pub predicate_label: String,
}

impl CandidateRelation {
    fn describe(&self) -> String {
        let object = match &self.relation.object {
            RelationObject::Entity(_) => self.object_label.clone(),
            RelationObject::Literal(lit) => format!("\"{lit}\""),
        };
        format!(
            "({} [{}]) --{}--> {}",
            self.subject_mention,
            self.subject_types.join(", "),
            self.predicate_label,
            object
        )
    }
}

#[derive(Debug, Deserialize)]
struct Verdict {
    /// 1-based slot from the prompt; f64 because models sometimes emit
    /// `1.0` for `1`.
    #[serde(default)]
    index: Option<f64>,
    grounded: bool,
    confidence: f64,
}

fn verdict_schema_batch() -> Schema {
    Schema::salvage_array(Schema::object(vec![
        Schema::field("index", Schema::Number),
        Schema::field("grounded", Schema::Boolean),
        Schema::field("confidence", Schema::Number),
    ]))
}

fn verdict_schema_single() -> Schema {
    Schema::object(vec![
        Schema::field("grounded", Schema::Boolean),
        Schema::field("confidence", Schema::Number),
    ])
}

const GROUNDING_SYSTEM: &str = "You verify candidate facts against a text passage. Judge each candidate \
     using ONLY the provided passage - no outside knowledge, no inference \
     beyond what the passage states. You emit only JSON.";

fn batch_prompt(chunk_text: &str, batch: &[CandidateRelation]) -> Prompt {
    let mut listing = String::new();
    for (i, candidate) in batch.iter().enumerate() {
        let _ = writeln!(listing, "{}. {}", i + 1, candidate.describe());
    }
    let user = format!(
        "Passage:\n\"\"\"\n{chunk_text}\n\"\"\"\n\n\
         Candidate facts:\n{listing}\n\
         For each numbered candidate, decide whether the passage itself \
         states it. Return a JSON array of \
         {{\"index\", \"grounded\", \"confidence\"}} with one element per \
         candidate, where confidence is between 0 and 1."
    );
    Prompt::user(user).with_system(GROUNDING_SYSTEM)
}

fn single_prompt(chunk_text: &str, candidate: &CandidateRelation) -> Prompt {
    let user = format!(
        "Passage:\n\"\"\"\n{chunk_text}\n\"\"\"\n\n\
         Candidate fact: {}\n\n\
         Does the passage itself state this fact? Return a JSON object \
         {{\"grounded\", \"confidence\"}} with confidence between 0 and 1.",
        candidate.describe()
    );
    Prompt::user(user).with_system(GROUNDING_SYSTEM)
}

/// Filters candidates down to the relations the chunk text supports.
/// Output order follows input order; token usage covers every call made.
pub async fn ground_relations(
    gateway: &LlmGateway,
    chunk_text: &str,
    candidates: Vec<CandidateRelation>,
    opts: &GroundingOptions,
    cancel: &CancellationToken,
) -> Result<(Vec<Relation>, TokenUsage), GatewayError> {
    if candidates.is_empty() {
        return Ok((Vec::new(), TokenUsage::default()));
    }

    let timeout = gateway.options().timeout * opts.timeout_multiplier.max(1);
    let batch_size = opts.batch_size.max(1);
    let mut kept = Vec::new();
    let mut usage = TokenUsage::default();

    for batch in candidates.chunks(batch_size) {
        let verdicts = if batch.len() == 1 {
            let outcome = gateway
                .generate_object_timed(
                    &single_prompt(chunk_text, &batch[0]),
                    &verdict_schema_single(),
                    "grounding verdict",
                    timeout,
                    cancel,
                )
                .await?;
            usage.add(outcome.usage);
            let verdict: Verdict = serde_json::from_value(outcome.value)
                .map_err(|e| GatewayError::InvalidResponse {
                    attempts: outcome.attempts,
                    message: e.to_string(),
                })?;
            vec![(0usize, verdict)]
        } else {
            let outcome = gateway
                .generate_object_timed(
                    &batch_prompt(chunk_text, batch),
                    &verdict_schema_batch(),
                    "grounding verdicts",
                    timeout,
                    cancel,
                )
                .await?;
            usage.add(outcome.usage);
            let rows: Vec<Verdict> = serde_json::from_value(outcome.value)
                .map_err(|e| GatewayError::InvalidResponse {
                    attempts: outcome.attempts,
                    message: e.to_string(),
                })?;
            rows.into_iter()
                .filter_map(|v| {
                    // 1-based indexes from the prompt; out-of-range rows
                    // are ignored, which leaves their candidates rejected.
                    let index = v.index? as usize;
                    (1..=batch.len()).contains(&index).then(|| (index - 1, v))
                })
                .collect()
        };

        let mut verdict_by_slot: Vec<Option<Verdict>> = (0..batch.len()).map(|_| None).collect();
        for (slot, verdict) in verdicts {
            verdict_by_slot[slot] = Some(verdict);
        }

        for (candidate, verdict) in batch.iter().zip(verdict_by_slot) {
            let accepted = verdict
                .as_ref()
                .is_some_and(|v| v.grounded && v.confidence >= opts.confidence_threshold);
            if accepted {
                kept.push(candidate.relation.clone());
            } else {
                tracing::debug!(
                    predicate = %candidate.relation.predicate,
                    subject = %candidate.relation.subject_id,
                    "relation rejected by grounding"
                );
            }
        }
    }

    Ok((kept, usage))
}
