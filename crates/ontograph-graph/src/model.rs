//! Graph records: entities, relations, literals.
//!
//! Relations compare and hash on the full `(subject_id, predicate, object)`
//! signature; literal floats are bit-canonicalized so the signature stays
//! stable across merges.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Returns `true` when `id` is a valid entity identifier: first character a
/// letter, remaining characters letters, digits, or underscores.
pub fn is_valid_entity_id(id: &str) -> bool {
    let mut chars = id.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ============================================================================
// Literals
// ============================================================================

/// A literal value attached to an entity attribute or a datatype relation.
///
/// Untagged on the wire so LLM output decodes directly: booleans before
/// integers before floats before strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl Literal {
    /// Converts a decoded JSON scalar into a literal. Objects and arrays are
    /// rejected; whole-number floats stay floats (the wire shape wins).
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(b) => Some(Self::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(Self::Integer(i))
                } else {
                    n.as_f64().map(Self::Float)
                }
            }
            serde_json::Value::String(s) => Some(Self::Text(s.clone())),
            _ => None,
        }
    }

    /// Canonical bit pattern for float comparison: NaN collapses to one
    /// representation, negative zero to positive zero.
    fn float_bits(f: f64) -> u64 {
        if f.is_nan() {
            f64::NAN.to_bits()
        } else if f == 0.0 {
            0.0f64.to_bits()
        } else {
            f.to_bits()
        }
    }
}

impl PartialEq for Literal {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => Self::float_bits(*a) == Self::float_bits(*b),
            (Self::Text(a), Self::Text(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Literal {}

impl Hash for Literal {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Bool(b) => {
                0u8.hash(state);
                b.hash(state);
            }
            Self::Integer(i) => {
                1u8.hash(state);
                i.hash(state);
            }
            Self::Float(f) => {
                2u8.hash(state);
                Self::float_bits(*f).hash(state);
            }
            Self::Text(s) => {
                3u8.hash(state);
                s.hash(state);
            }
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

// ============================================================================
// Entities
// ============================================================================

/// A typed entity extracted from text.
///
/// `types` is the voted view over all chunk contributions; the raw per-type
/// vote counts ride along (skipped on the wire) so merging two graphs sums
/// counts instead of re-voting over already-voted lists. That keeps the fold
/// associative regardless of arrival order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    /// Surface form exactly as it appeared in the text.
    pub mention: String,
    /// Ordered-unique ontology class IRIs, most-voted first.
    pub types: Vec<String>,
    /// Datatype-property IRI → literal value.
    #[serde(default)]
    pub attributes: BTreeMap<String, Literal>,
    /// Chunk indices that contributed to this entity.
    #[serde(default)]
    pub sources: BTreeSet<usize>,
    #[serde(skip)]
    pub(crate) type_votes: BTreeMap<String, u32>,
}

impl Entity {
    pub fn new(id: impl Into<String>, mention: impl Into<String>, types: Vec<String>) -> Self {
        let mut entity = Self {
            id: id.into(),
            mention: mention.into(),
            types: Vec::new(),
            attributes: BTreeMap::new(),
            sources: BTreeSet::new(),
            type_votes: BTreeMap::new(),
        };
        // Keep the caller's ordering; voting only reshapes types at merge time.
        for t in types {
            if entity.type_votes.insert(t.clone(), 1).is_none() {
                entity.types.push(t);
            }
        }
        entity
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Literal) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn with_source(mut self, chunk_index: usize) -> Self {
        self.sources.insert(chunk_index);
        self
    }

    pub(crate) fn set_votes(&mut self, votes: BTreeMap<String, u32>) {
        self.type_votes = votes;
    }

    /// Vote counts, seeding one vote per listed type when the entity was
    /// deserialized without bookkeeping.
    pub(crate) fn votes(&self) -> BTreeMap<String, u32> {
        if self.type_votes.is_empty() {
            self.types.iter().map(|t| (t.clone(), 1)).collect()
        } else {
            self.type_votes.clone()
        }
    }
}

/// Projects accumulated votes onto the public `types` list.
///
/// Top frequency >= 2: keep every type at the top frequency, capped at
/// `cap` (merge uses 3). Top frequency 1: keep the top 2 by frequency.
/// Ties always break by frequency descending, then IRI ascending.
pub(crate) fn project_type_votes(votes: &BTreeMap<String, u32>, cap: usize) -> Vec<String> {
    let mut ranked: Vec<(&String, u32)> = votes.iter().map(|(t, n)| (t, *n)).collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

    let Some(&(_, top)) = ranked.first() else {
        return Vec::new();
    };

    let keep: Vec<String> = if top >= 2 {
        ranked
            .iter()
            .filter(|(_, n)| *n == top)
            .take(cap)
            .map(|(t, _)| (*t).clone())
            .collect()
    } else {
        ranked.iter().take(2).map(|(t, _)| (*t).clone()).collect()
    };
    keep
}

// ============================================================================
// Relations
// ============================================================================

/// Object side of a relation: a reference to an entity id, or a literal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RelationObject {
    Literal(Literal),
    Entity(String),
}

impl RelationObject {
    pub fn as_entity_id(&self) -> Option<&str> {
        match self {
            Self::Entity(id) => Some(id),
            Self::Literal(_) => None,
        }
    }
}

impl fmt::Display for RelationObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entity(id) => f.write_str(id),
            Self::Literal(lit) => write!(f, "{lit}"),
        }
    }
}

/// A subject–predicate–object statement between entities, or from an entity
/// to a literal. Identity is the full triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Relation {
    pub subject_id: String,
    pub predicate: String,
    pub object: RelationObject,
}

impl Relation {
    pub fn to_entity(
        subject_id: impl Into<String>,
        predicate: impl Into<String>,
        object_id: impl Into<String>,
    ) -> Self {
        Self {
            subject_id: subject_id.into(),
            predicate: predicate.into(),
            object: RelationObject::Entity(object_id.into()),
        }
    }

    pub fn to_literal(
        subject_id: impl Into<String>,
        predicate: impl Into<String>,
        value: Literal,
    ) -> Self {
        Self {
            subject_id: subject_id.into(),
            predicate: predicate.into(),
            object: RelationObject::Literal(value),
        }
    }

    /// Sort key: `(subject_id, predicate, object-as-string)`.
    pub(crate) fn sort_key(&self) -> (String, String, String) {
        (
            self.subject_id.clone(),
            self.predicate.clone(),
            self.object.to_string(),
        )
    }
}

// ============================================================================
// Graph
// ============================================================================

/// A deduplicated set of entities and relations.
///
/// Entities are keyed by id (iteration is id-sorted); relations are kept
/// deduplicated on the triple signature and sorted on read.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeGraph {
    entities: BTreeMap<String, Entity>,
    relations: Vec<Relation>,
}

impl KnowledgeGraph {
    /// The merge identity.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relations.is_empty()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn relation_count(&self) -> usize {
        self.relations.len()
    }

    pub fn entity(&self, id: &str) -> Option<&Entity> {
        self.entities.get(id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    pub(crate) fn into_parts(self) -> (BTreeMap<String, Entity>, Vec<Relation>) {
        (self.entities, self.relations)
    }

    pub(crate) fn from_parts(entities: BTreeMap<String, Entity>, relations: Vec<Relation>) -> Self {
        let mut graph = Self {
            entities,
            relations,
        };
        graph.normalize_relations();
        graph
    }

    /// Inserts an entity. When the id already exists the incoming record is
    /// merged into the incumbent with the same rules the graph fold uses.
    pub fn insert_entity(&mut self, entity: Entity) {
        match self.entities.remove(&entity.id) {
            None => {
                self.entities.insert(entity.id.clone(), entity);
            }
            Some(existing) => {
                let merged = crate::merge::merge_entity_pair(existing, entity, &mut Vec::new());
                self.entities.insert(merged.id.clone(), merged);
            }
        }
    }

    /// Appends a relation, ignoring exact duplicates.
    pub fn insert_relation(&mut self, relation: Relation) {
        if !self.relations.contains(&relation) {
            self.relations.push(relation);
            self.normalize_relations();
        }
    }

    pub(crate) fn normalize_relations(&mut self) {
        let mut seen: ahash::AHashSet<Relation> = ahash::AHashSet::new();
        self.relations.retain(|r| seen.insert(r.clone()));
        self.relations.sort_by_key(Relation::sort_key);
    }
}
