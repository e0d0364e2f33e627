//! Hybrid retrieval over ontology documents.
//!
//! Built once per loaded ontology: a BM25 inverted index and a dense
//! feature-hash embedding table over the same documents, fused by keeping
//! the best score per IRI. Queries are per-mention (`mention + context`)
//! and return the ontology slice a chunk's extraction stages are allowed
//! to use. Everything is deterministic: same ontology, same query, same
//! results, with ties broken by score then IRI.

pub mod bm25;
pub mod embed;
pub mod hybrid;

pub use bm25::{Bm25Index, Bm25Params};
pub use embed::{DenseIndex, HashEmbedder, EMBEDDING_DIM};
pub use hybrid::{HybridIndex, IndexStats, OntologySlice, SearchHit};
