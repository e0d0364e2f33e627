//! Ontology model and loader.
//!
//! Parses a Turtle ontology into read-only [`ClassDefinition`] /
//! [`PropertyDefinition`] records with their RDFS and SKOS annotations,
//! and exposes an [`OntologyContext`] with:
//!
//! - lookups by IRI, case-insensitive via [`IriResolver`] (LLMs routinely
//!   lowercase `PascalCase` local names; decode normalizes back to the
//!   canonical spelling),
//! - property ↔ class linkage by domain local name,
//! - one searchable document per class and property for the hybrid index.
//!
//! The context is built once at startup and shared immutably across all
//! pipeline workers.

pub mod documents;
pub mod iri;
pub mod loader;
pub mod model;
pub mod text;

pub use documents::{DocumentKind, OntologyDocument};
pub use iri::IriResolver;
pub use loader::{load_ontology, parse_ontology, OntologyError};
pub use model::{ClassDefinition, OntologyContext, PropertyDefinition, RangeType};
