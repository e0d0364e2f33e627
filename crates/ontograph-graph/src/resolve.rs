//! Cross-chunk entity coreference resolution.
//!
//! After the fragment fold the document graph can still hold several ids
//! for one real-world entity (`eze`, `eberechi_eze`). This pass clusters
//! entities with a union-find keyed on mention similarity and type overlap,
//! rebuilds one canonical entity per cluster, and rewrites relations onto
//! the canonical ids. Root selection prefers the shorter id, which is
//! usually the more canonical surface form, and keeps the outcome stable
//! regardless of input order.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::{project_type_votes, Entity, KnowledgeGraph, Relation, RelationObject};

/// Thresholds controlling when two entities are considered coreferent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverOptions {
    /// Minimum combined mention similarity.
    #[serde(default = "default_mention_threshold")]
    pub mention_threshold: f64,
    /// Whether the type-overlap gate applies at all.
    #[serde(default = "default_require_type_overlap")]
    pub require_type_overlap: bool,
    /// Minimum `|A ∩ B| / min(|A|, |B|)` when the gate applies.
    #[serde(default = "default_type_overlap_threshold")]
    pub type_overlap_threshold: f64,
}

fn default_mention_threshold() -> f64 {
    0.85
}

fn default_require_type_overlap() -> bool {
    true
}

fn default_type_overlap_threshold() -> f64 {
    0.5
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            mention_threshold: default_mention_threshold(),
            require_type_overlap: default_require_type_overlap(),
            type_overlap_threshold: default_type_overlap_threshold(),
        }
    }
}

// ============================================================================
// Similarity
// ============================================================================

fn normalize_mention(s: &str) -> String {
    s.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Combined mention similarity in `[0, 1]`.
///
/// Exact match after normalization and bidirectional substring containment
/// both score 1.0; anything else falls back to normalized Levenshtein
/// similarity.
pub fn string_similarity(a: &str, b: &str) -> f64 {
    let na = normalize_mention(a);
    let nb = normalize_mention(b);
    if na.is_empty() || nb.is_empty() {
        return if na == nb { 1.0 } else { 0.0 };
    }
    if na == nb || na.contains(&nb) || nb.contains(&na) {
        return 1.0;
    }
    let distance = strsim::levenshtein(&na, &nb) as f64;
    let longest = na.chars().count().max(nb.chars().count()) as f64;
    1.0 - distance / longest
}

/// `|A ∩ B| / min(|A|, |B|)`; zero when either side has no types.
pub fn type_overlap_ratio(a: &[String], b: &[String]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let set_a: ahash::AHashSet<&String> = a.iter().collect();
    let shared = b.iter().filter(|t| set_a.contains(t)).count();
    shared as f64 / a.len().min(b.len()) as f64
}

fn should_merge(a: &Entity, b: &Entity, opts: &ResolverOptions) -> bool {
    if string_similarity(&a.mention, &b.mention) < opts.mention_threshold {
        return false;
    }
    if opts.require_type_overlap
        && type_overlap_ratio(&a.types, &b.types) < opts.type_overlap_threshold
    {
        return false;
    }
    true
}

// ============================================================================
// Union-find
// ============================================================================

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, i: usize) -> usize {
        if self.parent[i] != i {
            let root = self.find(self.parent[i]);
            self.parent[i] = root;
        }
        self.parent[i]
    }

    /// Unions two clusters; the root whose id ranks first under
    /// `(length, lexicographic)` wins, so the canonical id never depends
    /// on union order.
    fn union(&mut self, i: usize, j: usize, ids: &[String]) {
        let ri = self.find(i);
        let rj = self.find(j);
        if ri == rj {
            return;
        }
        let rank = |r: usize| (ids[r].len(), ids[r].clone());
        if rank(ri) <= rank(rj) {
            self.parent[rj] = ri;
        } else {
            self.parent[ri] = rj;
        }
    }
}

// ============================================================================
// Resolution
// ============================================================================

/// Collapses coreferent entities and rewrites relations onto canonical ids.
///
/// Relations whose endpoints fold onto the same id are dropped; survivors
/// are re-deduplicated on the triple signature.
pub fn resolve_entities(graph: KnowledgeGraph, opts: &ResolverOptions) -> KnowledgeGraph {
    let (entity_map, relations) = graph.into_parts();
    let members: Vec<Entity> = entity_map.into_values().collect();
    if members.len() < 2 {
        return KnowledgeGraph::from_parts(
            members.into_iter().map(|e| (e.id.clone(), e)).collect(),
            relations,
        );
    }

    let ids: Vec<String> = members.iter().map(|e| e.id.clone()).collect();
    let mut uf = UnionFind::new(members.len());
    for i in 0..members.len() {
        for j in (i + 1)..members.len() {
            if should_merge(&members[i], &members[j], opts) {
                uf.union(i, j, &ids);
            }
        }
    }

    let mut clusters: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for i in 0..members.len() {
        let root = uf.find(i);
        clusters.entry(root).or_default().push(i);
    }

    let mut canonical: BTreeMap<String, Entity> = BTreeMap::new();
    let mut rename: BTreeMap<String, String> = BTreeMap::new();

    for (root, indices) in clusters {
        let canonical_id = ids[root].clone();
        for &i in &indices {
            rename.insert(ids[i].clone(), canonical_id.clone());
        }
        if indices.len() > 1 {
            tracing::debug!(
                canonical = %canonical_id,
                merged = indices.len(),
                "coreference cluster collapsed"
            );
        }
        let entity = build_canonical(canonical_id.clone(), indices.iter().map(|&i| &members[i]));
        canonical.insert(canonical_id, entity);
    }

    let remapped: Vec<Relation> = relations
        .into_iter()
        .filter_map(|r| {
            let subject_id = rename.get(&r.subject_id).cloned().unwrap_or(r.subject_id);
            let object = match r.object {
                RelationObject::Entity(id) => {
                    RelationObject::Entity(rename.get(&id).cloned().unwrap_or(id))
                }
                other => other,
            };
            if object.as_entity_id() == Some(subject_id.as_str()) {
                return None;
            }
            Some(Relation {
                subject_id,
                predicate: r.predicate,
                object,
            })
        })
        .collect();

    KnowledgeGraph::from_parts(canonical, remapped)
}

/// Builds the cluster representative: longest mention, vote-merged types,
/// attributes folded longest-mention-first so earlier values win.
fn build_canonical<'a>(id: String, members: impl Iterator<Item = &'a Entity>) -> Entity {
    let mut ordered: Vec<&Entity> = members.collect();
    ordered.sort_by(|a, b| {
        b.mention
            .len()
            .cmp(&a.mention.len())
            .then_with(|| a.mention.cmp(&b.mention))
            .then_with(|| a.id.cmp(&b.id))
    });

    let mut votes = BTreeMap::new();
    let mut attributes = BTreeMap::new();
    let mut sources = std::collections::BTreeSet::new();
    for member in &ordered {
        for (ty, n) in member.votes() {
            *votes.entry(ty).or_insert(0) += n;
        }
        for (key, value) in &member.attributes {
            attributes.entry(key.clone()).or_insert_with(|| value.clone());
        }
        sources.extend(member.sources.iter().copied());
    }

    let mention = ordered
        .first()
        .map(|e| e.mention.clone())
        .unwrap_or_default();
    let mut entity = Entity::new(id, mention, Vec::new());
    entity.types = project_type_votes(&votes, 3);
    entity.attributes = attributes;
    entity.sources = sources;
    entity.set_votes(votes);
    entity
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Literal;

    fn graph(entities: Vec<Entity>, relations: Vec<Relation>) -> KnowledgeGraph {
        let mut g = KnowledgeGraph::empty();
        for e in entities {
            g.insert_entity(e);
        }
        for r in relations {
            g.insert_relation(r);
        }
        g
    }

    #[test]
    fn similarity_rules() {
        assert_eq!(string_similarity("Eze", "eze"), 1.0);
        assert_eq!(string_similarity("Eze", "Eberechi Eze"), 1.0);
        assert!(string_similarity("Ronaldo", "Ronalda") > 0.8);
        assert!(string_similarity("Ronaldo", "Messi") < 0.4);
        assert_eq!(string_similarity("", ""), 1.0);
        assert_eq!(string_similarity("", "x"), 0.0);
    }

    #[test]
    fn overlap_ratio_uses_smaller_side() {
        let a = vec!["http://o/Player".to_string()];
        let b = vec!["http://o/Player".to_string(), "http://o/Coach".to_string()];
        assert_eq!(type_overlap_ratio(&a, &b), 1.0);
        assert_eq!(type_overlap_ratio(&a, &[]), 0.0);
    }

    #[test]
    fn coreferent_entities_collapse_to_shorter_id() {
        let g = graph(
            vec![
                Entity::new("eze", "Eze", vec!["http://o/Player".into()])
                    .with_attribute("http://o/goals", Literal::Integer(1)),
                Entity::new("eberechi_eze", "Eberechi Eze", vec!["http://o/Player".into()]),
            ],
            vec![Relation::to_entity(
                "eberechi_eze",
                "http://o/playsFor",
                "crystal_palace",
            )],
        );

        let resolved = resolve_entities(g, &ResolverOptions::default());
        assert_eq!(resolved.entity_count(), 1);
        let entity = resolved.entity("eze").expect("canonical id is the shorter one");
        assert_eq!(entity.mention, "Eberechi Eze");
        assert_eq!(entity.attributes["http://o/goals"], Literal::Integer(1));

        assert_eq!(resolved.relations().len(), 1);
        assert_eq!(resolved.relations()[0].subject_id, "eze");
    }

    #[test]
    fn type_gate_blocks_dissimilar_entities() {
        let g = graph(
            vec![
                Entity::new("paris", "Paris", vec!["http://o/City".into()]),
                Entity::new("paris2", "Paris", vec!["http://o/Person".into()]),
            ],
            vec![],
        );
        let resolved = resolve_entities(g, &ResolverOptions::default());
        assert_eq!(resolved.entity_count(), 2);
    }

    #[test]
    fn self_loops_are_dropped_after_rename() {
        let g = graph(
            vec![
                Entity::new("acme", "Acme", vec!["http://o/Org".into()]),
                Entity::new("acme_inc", "Acme Inc", vec!["http://o/Org".into()]),
            ],
            vec![Relation::to_entity("acme", "http://o/partnerOf", "acme_inc")],
        );
        let resolved = resolve_entities(g, &ResolverOptions::default());
        assert_eq!(resolved.entity_count(), 1);
        assert!(resolved.relations().is_empty());
    }

    #[test]
    fn disabled_type_gate_merges_on_mention_alone() {
        let opts = ResolverOptions {
            require_type_overlap: false,
            ..ResolverOptions::default()
        };
        let g = graph(
            vec![
                Entity::new("paris", "Paris", vec!["http://o/City".into()]),
                Entity::new("paris2", "Paris", vec!["http://o/Person".into()]),
            ],
            vec![],
        );
        let resolved = resolve_entities(g, &opts);
        assert_eq!(resolved.entity_count(), 1);
    }
}
