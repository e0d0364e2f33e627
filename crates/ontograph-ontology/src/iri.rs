//! Case-insensitive IRI canonicalization.
//!
//! The extraction schemas accept IRIs case-insensitively and normalize to
//! the ontology's spelling before any membership check (the common LLM
//! failure is `http://o/player` for `http://o/Player`). The map is built
//! once from the loaded ontology and is the identity on IRIs that are
//! already canonical.

use ahash::AHashMap;

#[derive(Debug, Clone, Default)]
pub struct IriResolver {
    canonical: AHashMap<String, String>,
}

impl IriResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_iris<I, S>(iris: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut resolver = Self::new();
        for iri in iris {
            resolver.insert(iri.as_ref());
        }
        resolver
    }

    pub fn insert(&mut self, canonical_iri: &str) {
        self.canonical
            .entry(canonical_iri.to_lowercase())
            .or_insert_with(|| canonical_iri.to_string());
    }

    /// Resolves any casing of a known IRI to its canonical form.
    pub fn resolve(&self, iri: &str) -> Option<&str> {
        self.canonical.get(&iri.to_lowercase()).map(String::as_str)
    }

    pub fn contains(&self, iri: &str) -> bool {
        self.canonical.contains_key(&iri.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.canonical.len()
    }

    pub fn is_empty(&self) -> bool {
        self.canonical.is_empty()
    }
}
