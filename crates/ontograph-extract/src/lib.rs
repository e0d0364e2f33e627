//! Per-chunk extraction: text preparation through grounded relations.
//!
//! A chunk flows through three LLM-bound passes plus a verification pass:
//!
//! 1. **Mention pass** - surface spans worth typing, each becoming a
//!    retrieval query against the hybrid ontology index.
//! 2. **Typing pass** - typed entities constrained to the retrieved class
//!    slice, with datatype attributes scoped by domain.
//! 3. **Relation pass** - subject–predicate–object rows over the typed
//!    entities, constrained to properties whose domain covers an
//!    extracted type.
//! 4. **Grounding** - a second model pass that keeps only relations the
//!    chunk text actually supports.
//!
//! Every pass derives its prompt and its validation schema from the same
//! allowed-value sets, so nothing the prompt promises is unchecked and
//! nothing the schema enforces is unstated.

pub mod chunk;
pub mod extractor;
pub mod grounder;
pub mod ids;
pub mod prompts;
pub mod stages;

pub use chunk::{chunk_text, normalize_text, ChunkingOptions, TextChunk};
pub use extractor::{extract_chunk, ChunkOutcome, ChunkStats, ExtractError, ExtractorContext, RetrievalOptions};
pub use grounder::{ground_relations, CandidateRelation, GroundingOptions};
pub use ids::entity_id_from_mention;
