//! Associative merge of graph fragments.
//!
//! `merge(a, b)` combines two graphs so that folding any number of chunk
//! fragments yields the same document graph regardless of fold order:
//! entities with the same id are combined (summed type votes, longest
//! mention, attribute union), relations are deduplicated on their triple
//! signature, and output ordering is fixed. The empty graph is the
//! identity element.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::{project_type_votes, Entity, KnowledgeGraph, Literal};

/// How many types an entity keeps after a top-frequency vote.
const TYPE_VOTE_CAP: usize = 3;

/// An attribute disagreement observed while merging two fragments.
///
/// Recorded by [`merge_tracked`] for audit; the plain [`merge`] silently
/// applies last-writer-wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeConflict {
    pub entity_id: String,
    pub property_iri: String,
    pub conflicting_values: Vec<Literal>,
    pub contributing_chunks: Vec<usize>,
}

/// Merges two graphs. Associative, commutative on the relation set, with
/// [`KnowledgeGraph::empty`] as identity.
pub fn merge(a: KnowledgeGraph, b: KnowledgeGraph) -> KnowledgeGraph {
    merge_inner(a, b, &mut Vec::new())
}

/// Merges two graphs and reports attribute conflicts.
pub fn merge_tracked(a: KnowledgeGraph, b: KnowledgeGraph) -> (KnowledgeGraph, Vec<MergeConflict>) {
    let mut conflicts = Vec::new();
    let graph = merge_inner(a, b, &mut conflicts);
    (graph, conflicts)
}

fn merge_inner(
    a: KnowledgeGraph,
    b: KnowledgeGraph,
    conflicts: &mut Vec<MergeConflict>,
) -> KnowledgeGraph {
    let (mut entities, mut relations) = a.into_parts();
    let (b_entities, b_relations) = b.into_parts();

    for (id, incoming) in b_entities {
        match entities.remove(&id) {
            None => {
                entities.insert(id, incoming);
            }
            Some(existing) => {
                let merged = merge_entity_pair(existing, incoming, conflicts);
                entities.insert(id, merged);
            }
        }
    }

    relations.extend(b_relations);
    KnowledgeGraph::from_parts(entities, relations)
}

/// Combines two records of the same entity.
///
/// All decisions are symmetric in the pair except documented tie-breaks
/// (mention length ties keep `a`), so the surrounding fold stays
/// associative: type votes are summed, the mention is the longer string,
/// attributes union with the newcomer winning conflicting keys.
pub(crate) fn merge_entity_pair(
    a: Entity,
    b: Entity,
    conflicts: &mut Vec<MergeConflict>,
) -> Entity {
    debug_assert_eq!(a.id, b.id);

    let mut votes = a.votes();
    for (ty, n) in b.votes() {
        *votes.entry(ty).or_insert(0) += n;
    }

    let mention = if b.mention.len() > a.mention.len() {
        b.mention.clone()
    } else {
        a.mention.clone()
    };

    let mut sources = a.sources.clone();
    sources.extend(b.sources.iter().copied());

    let mut attributes: BTreeMap<String, Literal> = a.attributes.clone();
    for (key, value) in b.attributes {
        if let Some(previous) = attributes.get(&key) {
            if *previous != value {
                conflicts.push(MergeConflict {
                    entity_id: a.id.clone(),
                    property_iri: key.clone(),
                    conflicting_values: vec![previous.clone(), value.clone()],
                    contributing_chunks: sources.iter().copied().collect(),
                });
            }
        }
        attributes.insert(key, value);
    }

    let types = project_type_votes(&votes, TYPE_VOTE_CAP);
    Entity {
        id: a.id,
        mention,
        types,
        attributes,
        sources,
        type_votes: votes,
    }
}
