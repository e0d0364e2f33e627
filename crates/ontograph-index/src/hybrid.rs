//! Hybrid fusion of the lexical and dense indexes.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use ontograph_ontology::documents::{build_documents, DocumentKind, OntologyDocument};
use ontograph_ontology::model::local_name;
use ontograph_ontology::text;
use ontograph_ontology::OntologyContext;

use crate::bm25::{Bm25Index, Bm25Params};
use crate::embed::{DenseIndex, HashEmbedder};

/// A fused retrieval hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub iri: String,
    pub kind: DocumentKind,
    pub score: f32,
}

/// Classes and properties selected for one query (or one chunk).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OntologySlice {
    pub classes: Vec<String>,
    pub properties: Vec<String>,
}

impl OntologySlice {
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty() && self.properties.is_empty()
    }

    /// Set union, preserving first-seen order.
    pub fn extend(&mut self, other: &OntologySlice) {
        for iri in &other.classes {
            if !self.classes.contains(iri) {
                self.classes.push(iri.clone());
            }
        }
        for iri in &other.properties {
            if !self.properties.contains(iri) {
                self.properties.push(iri.clone());
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IndexStats {
    pub documents: usize,
    pub classes: usize,
    pub properties: usize,
    pub terms: usize,
    pub avg_doc_len: f32,
}

/// One sub-index pair (lexical + dense) over a document group.
#[derive(Debug, Clone)]
struct GroupIndex {
    iris: Vec<String>,
    bm25: Bm25Index,
    dense: DenseIndex,
}

impl GroupIndex {
    fn build(
        documents: &[&OntologyDocument],
        params: Bm25Params,
        embedder: &HashEmbedder,
    ) -> Self {
        let streams: Vec<Vec<String>> = documents
            .iter()
            .map(|d| token_stream(&d.text))
            .collect();
        Self {
            iris: documents.iter().map(|d| d.iri.clone()).collect(),
            bm25: Bm25Index::build(&streams, params),
            dense: DenseIndex::build(embedder, &streams),
        }
    }

    /// Union fusion: documents found by one index keep their raw score;
    /// documents found by both keep the better score.
    fn search(&self, tokens: &[String], query_vector: &[f32], k: usize) -> Vec<(usize, f32)> {
        let mut best: AHashMap<usize, f32> = AHashMap::new();
        for (doc, score) in self.bm25.search(tokens, k) {
            let entry = best.entry(doc).or_insert(score);
            if score > *entry {
                *entry = score;
            }
        }
        for (doc, score) in self.dense.search(query_vector, k) {
            let entry = best.entry(doc).or_insert(score);
            if score > *entry {
                *entry = score;
            }
        }
        let mut ranked: Vec<(usize, f32)> = best.into_iter().collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| self.iris[a.0].cmp(&self.iris[b.0]))
        });
        ranked.truncate(k.max(1).min(ranked.len()));
        ranked
    }
}

/// Hybrid lexical/semantic index over the ontology's documents, built once
/// and shared immutably across all pipeline workers.
#[derive(Debug, Clone)]
pub struct HybridIndex {
    embedder: HashEmbedder,
    classes: GroupIndex,
    properties: GroupIndex,
    /// Domain class IRIs per property ordinal; property hits pull these
    /// into class results.
    property_domains: Vec<Vec<String>>,
}

impl HybridIndex {
    pub fn build(ctx: &OntologyContext, params: Bm25Params) -> Self {
        let documents = build_documents(ctx);
        let embedder = HashEmbedder::default();

        let class_docs: Vec<&OntologyDocument> = documents
            .iter()
            .filter(|d| d.kind == DocumentKind::Class)
            .collect();
        let property_docs: Vec<&OntologyDocument> = documents
            .iter()
            .filter(|d| d.kind == DocumentKind::Property)
            .collect();

        let property_domains = property_docs
            .iter()
            .map(|doc| {
                let Some(property) = ctx.property(&doc.iri) else {
                    return Vec::new();
                };
                ctx.classes()
                    .filter(|c| property.domain.iter().any(|d| d == local_name(&c.iri)))
                    .map(|c| c.iri.clone())
                    .collect()
            })
            .collect();

        let index = Self {
            classes: GroupIndex::build(&class_docs, params, &embedder),
            properties: GroupIndex::build(&property_docs, params, &embedder),
            property_domains,
            embedder,
        };
        tracing::debug!(
            classes = index.classes.iris.len(),
            properties = index.properties.iris.len(),
            "hybrid index built"
        );
        index
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            documents: self.classes.iris.len() + self.properties.iris.len(),
            classes: self.classes.iris.len(),
            properties: self.properties.iris.len(),
            terms: self.classes.bm25.term_count() + self.properties.bm25.term_count(),
            avg_doc_len: (self.classes.bm25.avg_doc_len() + self.properties.bm25.avg_doc_len())
                / 2.0,
        }
    }

    /// Top-`k` classes for a query. Property matches contribute the classes
    /// in whose domain they appear, carrying the property's score.
    pub fn search_classes(&self, query: &str, k: usize) -> Vec<SearchHit> {
        let tokens = token_stream(query);
        let vector = self.embedder.embed(&tokens);

        let mut best: AHashMap<&str, f32> = AHashMap::new();
        for (doc, score) in self.classes.search(&tokens, &vector, k) {
            merge_best(&mut best, &self.classes.iris[doc], score);
        }
        for (doc, score) in self.properties.search(&tokens, &vector, k) {
            for class_iri in &self.property_domains[doc] {
                merge_best(&mut best, class_iri, score);
            }
        }

        rank(best, DocumentKind::Class, k)
    }

    /// Top-`k` properties for a query.
    pub fn search_properties(&self, query: &str, k: usize) -> Vec<SearchHit> {
        let tokens = token_stream(query);
        let vector = self.embedder.embed(&tokens);
        let mut best: AHashMap<&str, f32> = AHashMap::new();
        for (doc, score) in self.properties.search(&tokens, &vector, k) {
            merge_best(&mut best, &self.properties.iris[doc], score);
        }
        rank(best, DocumentKind::Property, k)
    }

    /// Combined per-mention retrieval: the class and property slice one
    /// query is allowed to draw from.
    pub fn retrieve(&self, query: &str, k_classes: usize, k_properties: usize) -> OntologySlice {
        OntologySlice {
            classes: self
                .search_classes(query, k_classes)
                .into_iter()
                .map(|h| h.iri)
                .collect(),
            properties: self
                .search_properties(query, k_properties)
                .into_iter()
                .map(|h| h.iri)
                .collect(),
        }
    }
}

/// The token stream both indexing and queries use: normalized unigrams
/// plus bigrams over the full word stream (stopwords included in pairs so
/// `playsFor` and "plays for" meet at `plays_for`).
fn token_stream(text_value: &str) -> Vec<String> {
    let mut tokens = text::tokenize(text_value);
    tokens.extend(text::bigrams(&text::words(text_value)));
    tokens
}

fn merge_best<'a>(best: &mut AHashMap<&'a str, f32>, iri: &'a str, score: f32) {
    let entry = best.entry(iri).or_insert(score);
    if score > *entry {
        *entry = score;
    }
}

fn rank(best: AHashMap<&str, f32>, kind: DocumentKind, k: usize) -> Vec<SearchHit> {
    let mut hits: Vec<SearchHit> = best
        .into_iter()
        .map(|(iri, score)| SearchHit {
            iri: iri.to_string(),
            kind,
            score,
        })
        .collect();
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.iri.cmp(&b.iri))
    });
    hits.truncate(k.max(1).min(hits.len()));
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use ontograph_ontology::loader::parse_ontology;

    const TTL: &str = r#"
@prefix rdfs: <http://www.w3.org/2000/01/rdf-schema#> .
@prefix owl: <http://www.w3.org/2002/07/owl#> .
@prefix skos: <http://www.w3.org/2004/02/skos/core#> .
@prefix xsd: <http://www.w3.org/2001/XMLSchema#> .
@prefix : <http://o/> .

:Player a owl:Class ;
    rdfs:label "Player" ;
    skos:altLabel "footballer" ;
    rdfs:comment "A professional football player." .

:Team a owl:Class ;
    rdfs:label "Team" ;
    skos:definition "A football club that players play for." .

:Stadium a owl:Class ;
    rdfs:label "Stadium" ;
    rdfs:comment "A venue where matches are played." .

:playsFor a owl:ObjectProperty ;
    rdfs:label "plays for" ;
    rdfs:domain :Player ;
    rdfs:range :Team .

:capacity a owl:DatatypeProperty ;
    rdfs:label "capacity" ;
    rdfs:domain :Stadium ;
    rdfs:range xsd:integer .
"#;

    fn index() -> HybridIndex {
        let ctx = parse_ontology(TTL).unwrap();
        HybridIndex::build(&ctx, Bm25Params::default())
    }

    #[test]
    fn synonym_retrieval_through_alt_label() {
        let hits = index().search_classes("a famous footballer scored", 3);
        assert!(!hits.is_empty());
        assert_eq!(hits[0].iri, "http://o/Player");
    }

    #[test]
    fn property_search_finds_plays_for() {
        let hits = index().search_properties("Ronaldo plays for Al-Nassr", 3);
        assert!(hits.iter().any(|h| h.iri == "http://o/playsFor"));
    }

    #[test]
    fn property_hits_imply_domain_classes() {
        // "plays for" matches the property; Player is its domain and must
        // surface in the class results even without a direct class match.
        let hits = index().search_classes("plays for", 5);
        assert!(hits.iter().any(|h| h.iri == "http://o/Player"));
    }

    #[test]
    fn retrieval_is_deterministic() {
        let idx = index();
        let a = idx.retrieve("football player stadium capacity", 5, 5);
        let b = idx.retrieve("football player stadium capacity", 5, 5);
        assert_eq!(a, b);
    }

    #[test]
    fn slice_union_preserves_order_without_duplicates() {
        let mut a = OntologySlice {
            classes: vec!["http://o/Player".into()],
            properties: vec!["http://o/playsFor".into()],
        };
        let b = OntologySlice {
            classes: vec!["http://o/Player".into(), "http://o/Team".into()],
            properties: vec![],
        };
        a.extend(&b);
        assert_eq!(a.classes, vec!["http://o/Player".to_string(), "http://o/Team".to_string()]);
        assert_eq!(a.properties.len(), 1);
    }

    #[test]
    fn stats_reflect_document_counts() {
        let stats = index().stats();
        assert_eq!(stats.classes, 3);
        assert_eq!(stats.properties, 2);
        assert_eq!(stats.documents, 5);
        assert!(stats.terms > 0);
    }
}
