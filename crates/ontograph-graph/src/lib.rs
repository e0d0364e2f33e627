//! Knowledge-graph substrate for ontology-constrained extraction.
//!
//! This crate owns the document-level graph model and the three pure
//! operations that run after chunk extraction:
//!
//! - [`merge`](merge::merge): an associative fold that combines per-chunk
//!   graph fragments (entity dedup by id, type voting, relation dedup by
//!   signature). The empty graph is the identity, so fragments can arrive
//!   in any order.
//! - [`resolve_entities`](resolve::resolve_entities): union-find based
//!   coreference merge across chunks (`eze` / `eberechi_eze` collapse to
//!   one entity).
//! - [`emit_turtle`](emit::emit_turtle): deterministic Turtle serialization
//!   with a configurable prefix table.
//!
//! Nothing here talks to an LLM or the ontology loader; the model is plain
//! data so the operations stay referentially transparent and testable.

pub mod emit;
pub mod merge;
pub mod model;
pub mod resolve;

pub use emit::{emit_turtle, EmitError, RdfOptions};
pub use merge::{merge, merge_tracked, MergeConflict};
pub use model::{is_valid_entity_id, Entity, KnowledgeGraph, Literal, Relation, RelationObject};
pub use resolve::{resolve_entities, ResolverOptions};
