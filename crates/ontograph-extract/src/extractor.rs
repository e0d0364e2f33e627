//! The per-chunk extraction driver.
//!
//! Runs the mention → typing → relation passes over one chunk, with
//! per-mention retrieval between the first two. Short-circuits produce an
//! empty fragment instead of an error: zero mentions, zero candidate
//! classes, or zero surviving entities all end the chunk early, and a
//! chunk with fewer than two entities (or no applicable properties) skips
//! the relation pass. Per-row validation failures are logged and dropped;
//! only gateway-level failures surface as errors, and the orchestrator
//! converts those to empty fragments too.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use ontograph_graph::{Entity, KnowledgeGraph, Literal, Relation, RelationObject};
use ontograph_index::{HybridIndex, OntologySlice};
use ontograph_llm::gateway::{GatewayError, LlmGateway};
use ontograph_llm::schema::CanonicalSet;
use ontograph_llm::TokenUsage;
use ontograph_ontology::{OntologyContext, PropertyDefinition, RangeType};
use serde::{Deserialize, Serialize};

use crate::chunk::TextChunk;
use crate::grounder::{ground_relations, CandidateRelation, GroundingOptions};
use crate::ids::{entity_id_from_mention, is_valid_entity_id};
use crate::prompts::{self, ClassBrief, EntityBrief, PropertyBrief};
use crate::stages::{self, EntityRow, MentionRow, RelationRow};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalOptions {
    #[serde(default = "default_top_k_classes")]
    pub top_k_classes: usize,
    #[serde(default = "default_top_k_properties")]
    pub top_k_properties: usize,
}

fn default_top_k_classes() -> usize {
    8
}

fn default_top_k_properties() -> usize {
    8
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            top_k_classes: default_top_k_classes(),
            top_k_properties: default_top_k_properties(),
        }
    }
}

/// Shared, immutable context handed to every chunk worker.
#[derive(Clone)]
pub struct ExtractorContext {
    pub ontology: Arc<OntologyContext>,
    pub index: Arc<HybridIndex>,
    pub gateway: Arc<LlmGateway>,
    pub retrieval: RetrievalOptions,
    pub grounding: GroundingOptions,
}

/// Counters for the run report.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ChunkStats {
    pub mentions: usize,
    pub candidate_classes: usize,
    pub entities: usize,
    pub candidate_relations: usize,
    pub grounded_relations: usize,
    /// Rows rejected by per-row validation across all passes.
    pub dropped_rows: usize,
}

#[derive(Debug, Clone)]
pub struct ChunkOutcome {
    pub fragment: KnowledgeGraph,
    pub usage: TokenUsage,
    pub stats: ChunkStats,
}

impl ChunkOutcome {
    fn empty(usage: TokenUsage, stats: ChunkStats) -> Self {
        Self {
            fragment: KnowledgeGraph::empty(),
            usage,
            stats,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("{stage} pass failed: {source}")]
    Stage {
        stage: &'static str,
        #[source]
        source: GatewayError,
    },
    #[error("cancelled")]
    Cancelled,
}

fn stage_error(stage: &'static str, source: GatewayError) -> ExtractError {
    if source.is_cancelled() {
        ExtractError::Cancelled
    } else {
        ExtractError::Stage { stage, source }
    }
}

/// Runs the full extraction for one chunk.
pub async fn extract_chunk(
    ctx: &ExtractorContext,
    chunk: &TextChunk,
    cancel: &CancellationToken,
) -> Result<ChunkOutcome, ExtractError> {
    let mut usage = TokenUsage::default();
    let mut stats = ChunkStats::default();

    // ---- mention pass -----------------------------------------------------
    let mentions = mention_pass(ctx, chunk, cancel, &mut usage, &mut stats).await?;
    if mentions.is_empty() {
        tracing::debug!(chunk = chunk.index, "no mentions; empty fragment");
        return Ok(ChunkOutcome::empty(usage, stats));
    }

    // ---- per-mention retrieval -------------------------------------------
    let slice = retrieve_slice(ctx, &mentions);
    stats.candidate_classes = slice.classes.len();
    if slice.classes.is_empty() {
        tracing::debug!(chunk = chunk.index, "no candidate classes; empty fragment");
        return Ok(ChunkOutcome::empty(usage, stats));
    }

    // ---- typing pass ------------------------------------------------------
    let entities = entity_pass(ctx, chunk, &slice, cancel, &mut usage, &mut stats).await?;
    if entities.is_empty() {
        tracing::debug!(chunk = chunk.index, "no entities survived; empty fragment");
        return Ok(ChunkOutcome::empty(usage, stats));
    }

    // ---- relation pass + grounding ---------------------------------------
    let relations = relation_pass(ctx, chunk, &entities, cancel, &mut usage, &mut stats).await?;

    let mut fragment = KnowledgeGraph::empty();
    for (_, entity) in entities {
        fragment.insert_entity(entity.with_source(chunk.index));
    }
    for relation in relations {
        fragment.insert_relation(relation);
    }
    Ok(ChunkOutcome {
        fragment,
        usage,
        stats,
    })
}

// ============================================================================
// Mention pass
// ============================================================================

struct ResolvedMention {
    id: String,
    mention: String,
    context: String,
}

async fn mention_pass(
    ctx: &ExtractorContext,
    chunk: &TextChunk,
    cancel: &CancellationToken,
    usage: &mut TokenUsage,
    stats: &mut ChunkStats,
) -> Result<Vec<ResolvedMention>, ExtractError> {
    let spec = stages::mention_stage();
    let prompt = prompts::mention_prompt(&chunk.text, &spec.rules);
    let outcome = ctx
        .gateway
        .generate_object(&prompt, &spec.schema, "mention list", cancel)
        .await
        .map_err(|e| stage_error("mention", e))?;
    usage.add(outcome.usage);
    stats.dropped_rows += outcome.dropped.len();

    let rows: Vec<MentionRow> = serde_json::from_value(outcome.value)
        .map_err(|e| stage_error("mention", invalid(e, outcome.attempts)))?;

    let mut seen = ahash::AHashSet::new();
    let mut mentions = Vec::new();
    for row in rows {
        let mention = row.mention.trim().to_string();
        if mention.is_empty() {
            continue;
        }
        let id = match row.id.as_deref().filter(|id| is_valid_entity_id(id)) {
            Some(id) => id.to_string(),
            None => entity_id_from_mention(&mention),
        };
        if id.is_empty() || !seen.insert(id.clone()) {
            continue;
        }
        mentions.push(ResolvedMention {
            id,
            mention,
            context: row.context.unwrap_or_default(),
        });
    }
    stats.mentions = mentions.len();
    Ok(mentions)
}

fn retrieve_slice(ctx: &ExtractorContext, mentions: &[ResolvedMention]) -> OntologySlice {
    let mut slice = OntologySlice::default();
    for mention in mentions {
        let query = if mention.context.is_empty() {
            mention.mention.clone()
        } else {
            format!("{} {}", mention.mention, mention.context)
        };
        let per_mention = ctx.index.retrieve(
            &query,
            ctx.retrieval.top_k_classes,
            ctx.retrieval.top_k_properties,
        );
        slice.extend(&per_mention);
    }
    slice
}

// ============================================================================
// Typing pass
// ============================================================================

async fn entity_pass(
    ctx: &ExtractorContext,
    chunk: &TextChunk,
    slice: &OntologySlice,
    cancel: &CancellationToken,
    usage: &mut TokenUsage,
    stats: &mut ChunkStats,
) -> Result<BTreeMap<String, Entity>, ExtractError> {
    let class_set = CanonicalSet::new("class IRI", slice.classes.iter().cloned());
    let allowed_attributes: Vec<&PropertyDefinition> = ctx
        .ontology
        .datatype_properties_for_types(slice.classes.iter().map(String::as_str));
    let attribute_set = CanonicalSet::new(
        "datatype property IRI",
        allowed_attributes.iter().map(|p| p.iri.clone()),
    );

    let class_briefs: Vec<ClassBrief> = slice
        .classes
        .iter()
        .filter_map(|iri| ctx.ontology.class(iri))
        .map(|class| ClassBrief {
            iri: class.iri.clone(),
            label: class.display_label().to_string(),
            gloss: class.definition.clone().or_else(|| class.comment.clone()),
        })
        .collect();
    let attribute_briefs: Vec<PropertyBrief> = allowed_attributes
        .iter()
        .map(|p| property_brief(p))
        .collect();

    let spec = stages::entity_stage(class_set.clone(), &attribute_set);
    let prompt = prompts::entity_prompt(
        &chunk.text,
        &class_briefs,
        &class_set,
        &attribute_briefs,
        &attribute_set,
        &spec.rules,
    );
    let outcome = ctx
        .gateway
        .generate_object(&prompt, &spec.schema, "entity list", cancel)
        .await
        .map_err(|e| stage_error("entity", e))?;
    usage.add(outcome.usage);
    stats.dropped_rows += outcome.dropped.len();

    let rows: Vec<EntityRow> = serde_json::from_value(outcome.value)
        .map_err(|e| stage_error("entity", invalid(e, outcome.attempts)))?;

    let mut entities: BTreeMap<String, Entity> = BTreeMap::new();
    for row in rows {
        let mention = row.mention.trim().to_string();
        if mention.is_empty() {
            stats.dropped_rows += 1;
            continue;
        }
        let id = match row.id.as_deref().filter(|id| is_valid_entity_id(id)) {
            Some(id) => id.to_string(),
            None => entity_id_from_mention(&mention),
        };
        if id.is_empty() {
            stats.dropped_rows += 1;
            continue;
        }

        let mut entity = Entity::new(id.clone(), mention, row.types.clone());
        if let Some(attributes) = row.attributes {
            for (key, value) in attributes {
                let Some(canonical) = ctx.ontology.canonical_iri(&key) else {
                    tracing::debug!(chunk = chunk.index, key, "unknown attribute key dropped");
                    continue;
                };
                let admits = ctx
                    .ontology
                    .property(canonical)
                    .is_some_and(|p| {
                        p.range_type == RangeType::Datatype
                            && domain_admits(p, entity.types.iter().map(String::as_str))
                    });
                if !admits {
                    tracing::debug!(
                        chunk = chunk.index,
                        key = canonical,
                        "attribute key outside entity domain dropped"
                    );
                    continue;
                }
                let Some(literal) = Literal::from_json(&value) else {
                    continue;
                };
                entity.attributes.insert(canonical.to_string(), literal);
            }
        }

        match entities.remove(&id) {
            None => {
                entities.insert(id, entity);
            }
            Some(existing) => {
                // Same id twice in one chunk: fold through the graph so the
                // usual merge rules apply.
                let mut graph = KnowledgeGraph::empty();
                graph.insert_entity(existing);
                graph.insert_entity(entity);
                let merged = graph.entities().next().cloned();
                if let Some(merged) = merged {
                    entities.insert(id, merged);
                }
            }
        }
    }
    stats.entities = entities.len();
    Ok(entities)
}

fn domain_admits<'a>(property: &PropertyDefinition, types: impl Iterator<Item = &'a str>) -> bool {
    let locals: Vec<&str> = types
        .map(ontograph_ontology::model::local_name)
        .collect();
    property.domain.iter().any(|d| locals.iter().any(|l| l == d))
}

fn property_brief(property: &PropertyDefinition) -> PropertyBrief {
    PropertyBrief {
        iri: property.iri.clone(),
        label: property.display_label().to_string(),
        domain: property.domain.join("|"),
        range: property.range.join("|"),
        datatype: property.range_type == RangeType::Datatype,
        gloss: property
            .definition
            .clone()
            .or_else(|| property.comment.clone()),
    }
}

// ============================================================================
// Relation pass + grounding
// ============================================================================

async fn relation_pass(
    ctx: &ExtractorContext,
    chunk: &TextChunk,
    entities: &BTreeMap<String, Entity>,
    cancel: &CancellationToken,
    usage: &mut TokenUsage,
    stats: &mut ChunkStats,
) -> Result<Vec<Relation>, ExtractError> {
    if entities.len() < 2 {
        tracing::debug!(chunk = chunk.index, "fewer than two entities; skipping relations");
        return Ok(Vec::new());
    }

    let extracted_types: Vec<&str> = entities
        .values()
        .flat_map(|e| e.types.iter().map(String::as_str))
        .collect();
    let applicable: Vec<&PropertyDefinition> = ctx
        .ontology
        .properties_for_types(extracted_types.iter().copied());
    if applicable.is_empty() {
        tracing::debug!(chunk = chunk.index, "no applicable properties; skipping relations");
        return Ok(Vec::new());
    }

    let entity_ids = CanonicalSet::new("entity id", entities.keys().cloned());
    let object_set = CanonicalSet::new(
        "object property IRI",
        applicable
            .iter()
            .filter(|p| p.range_type == RangeType::Object)
            .map(|p| p.iri.clone()),
    );
    let datatype_set = CanonicalSet::new(
        "datatype property IRI",
        applicable
            .iter()
            .filter(|p| p.range_type == RangeType::Datatype)
            .map(|p| p.iri.clone()),
    );
    let property_set = CanonicalSet::new(
        "property IRI",
        applicable.iter().map(|p| p.iri.clone()),
    );

    let entity_briefs: Vec<EntityBrief> = entities
        .values()
        .map(|e| EntityBrief {
            id: e.id.clone(),
            mention: e.mention.clone(),
            types: e.types.clone(),
        })
        .collect();
    let property_briefs: Vec<PropertyBrief> =
        applicable.iter().map(|p| property_brief(p)).collect();

    let spec = stages::relation_stage(entity_ids.clone(), object_set, datatype_set);
    let prompt = prompts::relation_prompt(
        &chunk.text,
        &entity_briefs,
        &property_briefs,
        &property_set,
        &entity_ids,
        &spec.rules,
    );
    let outcome = ctx
        .gateway
        .generate_object(&prompt, &spec.schema, "relation list", cancel)
        .await
        .map_err(|e| stage_error("relation", e))?;
    usage.add(outcome.usage);
    stats.dropped_rows += outcome.dropped.len();

    let rows: Vec<RelationRow> = serde_json::from_value(outcome.value)
        .map_err(|e| stage_error("relation", invalid(e, outcome.attempts)))?;

    let mut candidates = Vec::new();
    for row in rows {
        let Some(subject) = entities.get(&row.subject) else {
            stats.dropped_rows += 1;
            continue;
        };
        let Some(property) = ctx.ontology.property(&row.predicate) else {
            stats.dropped_rows += 1;
            continue;
        };

        let (object, object_label) = match property.range_type {
            RangeType::Object => {
                let Some(object_id) = row.object.as_str() else {
                    stats.dropped_rows += 1;
                    continue;
                };
                let Some(target) = entities.get(object_id) else {
                    stats.dropped_rows += 1;
                    continue;
                };
                (
                    RelationObject::Entity(target.id.clone()),
                    target.mention.clone(),
                )
            }
            RangeType::Datatype => {
                let Some(literal) = Literal::from_json(&row.object) else {
                    stats.dropped_rows += 1;
                    continue;
                };
                let label = literal.to_string();
                (RelationObject::Literal(literal), label)
            }
        };

        candidates.push(CandidateRelation {
            relation: Relation {
                subject_id: subject.id.clone(),
                predicate: property.iri.clone(),
                object,
            },
            subject_mention: subject.mention.clone(),
            subject_types: subject.types.clone(),
            object_label,
            predicate_label: property.display_label().to_string(),
        });
    }
    stats.candidate_relations = candidates.len();
    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    let (grounded, grounding_usage) = ground_relations(
        &ctx.gateway,
        &chunk.text,
        candidates,
        &ctx.grounding,
        cancel,
    )
    .await
    .map_err(|e| stage_error("grounding", e))?;
    usage.add(grounding_usage);
    stats.grounded_relations = grounded.len();
    Ok(grounded)
}

fn invalid(error: serde_json::Error, attempts: u32) -> GatewayError {
    GatewayError::InvalidResponse {
        attempts,
        message: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ontograph_index::Bm25Params;
    use ontograph_llm::gateway::{GatewayOptions, RetryOptions};
    use ontograph_llm::limiter::RateLimits;
    use ontograph_llm::providers::ScriptedClient;
    use ontograph_llm::{ChatRequest, LlmError};
    use ontograph_ontology::parse_ontology;

    const TTL: &str = r#"
@prefix rdfs: <http://www.w3.org/2000/01/rdf-schema#> .
@prefix owl: <http://www.w3.org/2002/07/owl#> .
@prefix skos: <http://www.w3.org/2004/02/skos/core#> .
@prefix xsd: <http://www.w3.org/2001/XMLSchema#> .
@prefix : <http://o/> .

:Player a owl:Class ;
    rdfs:label "Player" ;
    rdfs:comment "A professional football player." .

:Team a owl:Class ;
    rdfs:label "Team" ;
    skos:definition "A football club." .

:playsFor a owl:ObjectProperty ;
    rdfs:label "plays for" ;
    rdfs:domain :Player ;
    rdfs:range :Team .

:shirtNumber a owl:DatatypeProperty ;
    rdfs:label "shirt number" ;
    rdfs:domain :Player ;
    rdfs:range xsd:integer .
"#;

    fn scripted_context(
        responder: impl Fn(&ChatRequest) -> Result<String, LlmError> + Send + Sync + 'static,
    ) -> ExtractorContext {
        let ontology = Arc::new(parse_ontology(TTL).unwrap());
        let index = Arc::new(HybridIndex::build(&ontology, Bm25Params::default()));
        let gateway = Arc::new(LlmGateway::new(
            Arc::new(ScriptedClient::new(responder)),
            GatewayOptions {
                retry: RetryOptions {
                    max_attempts: 2,
                    initial_delay_ms: 1,
                    max_delay_ms: 2,
                },
                limits: RateLimits {
                    per_second: 10_000,
                    per_minute: 600_000,
                },
                ..GatewayOptions::default()
            },
        ));
        ExtractorContext {
            ontology,
            index,
            gateway,
            retrieval: RetrievalOptions::default(),
            grounding: GroundingOptions::default(),
        }
    }

    fn chunk(text: &str) -> TextChunk {
        TextChunk {
            index: 0,
            text: text.to_string(),
            start_offset: 0,
            end_offset: text.len(),
        }
    }

    /// Routes scripted responses by inspecting the request prompt.
    fn happy_path_responder(request: &ChatRequest) -> Result<String, LlmError> {
        let prompt = &request.messages[0].content;
        if prompt.contains("list every span") {
            Ok(r#"[
                {"id": "cristiano_ronaldo", "mention": "Cristiano Ronaldo", "context": "footballer who plays for Al-Nassr"},
                {"mention": "Al-Nassr", "context": "the team Cristiano Ronaldo plays for"}
            ]"#
            .to_string())
        } else if prompt.contains("extract the typed entities") {
            Ok(r#"[
                {"id": "cristiano_ronaldo", "mention": "Cristiano Ronaldo", "types": ["http://o/player"], "attributes": {"http://o/shirtnumber": 7}},
                {"id": "al_nassr", "mention": "Al-Nassr", "types": ["http://o/Team"]}
            ]"#
            .to_string())
        } else if prompt.contains("extract the relations") {
            Ok(r#"[
                {"subject": "cristiano_ronaldo", "predicate": "http://o/playsfor", "object": "al_nassr"}
            ]"#
            .to_string())
        } else if prompt.contains("Candidate fact") {
            Ok(r#"{"grounded": true, "confidence": 0.95}"#.to_string())
        } else {
            Err(LlmError::Api(format!("unexpected prompt: {prompt}")))
        }
    }

    #[tokio::test]
    async fn happy_path_builds_a_grounded_fragment() {
        let ctx = scripted_context(happy_path_responder);
        let outcome = extract_chunk(
            &ctx,
            &chunk("Cristiano Ronaldo plays for Al-Nassr."),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        let fragment = &outcome.fragment;
        assert_eq!(fragment.entity_count(), 2);

        let ronaldo = fragment.entity("cristiano_ronaldo").unwrap();
        assert_eq!(ronaldo.types, vec!["http://o/Player".to_string()]);
        assert_eq!(
            ronaldo.attributes["http://o/shirtNumber"],
            Literal::Integer(7),
            "attribute key casing normalized via the ontology"
        );

        assert_eq!(fragment.relations().len(), 1);
        let relation = &fragment.relations()[0];
        assert_eq!(relation.predicate, "http://o/playsFor");
        assert_eq!(relation.object, RelationObject::Entity("al_nassr".to_string()));

        assert_eq!(outcome.stats.entities, 2);
        assert_eq!(outcome.stats.grounded_relations, 1);
        assert!(outcome.usage.total() > 0);
    }

    #[tokio::test]
    async fn zero_mentions_short_circuits() {
        let ctx = scripted_context(|request| {
            assert!(request.messages[0].content.contains("list every span"));
            Ok("[]".to_string())
        });
        let outcome = extract_chunk(&ctx, &chunk("Nothing here."), &CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.fragment.is_empty());
        assert_eq!(outcome.stats.mentions, 0);
    }

    #[tokio::test]
    async fn single_entity_skips_relations() {
        let ctx = scripted_context(|request| {
            let prompt = &request.messages[0].content;
            if prompt.contains("list every span") {
                Ok(
                    r#"[{"mention": "Cristiano Ronaldo", "context": "a professional football player"}]"#
                        .to_string(),
                )
            } else if prompt.contains("extract the typed entities") {
                Ok(r#"[{"mention": "Cristiano Ronaldo", "types": ["http://o/Player"]}]"#.to_string())
            } else {
                panic!("relation stage must not run: {prompt}");
            }
        });
        let outcome = extract_chunk(&ctx, &chunk("Cristiano Ronaldo."), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.fragment.entity_count(), 1);
        assert!(outcome.fragment.relations().is_empty());
    }

    #[tokio::test]
    async fn gateway_failure_surfaces_as_stage_error() {
        let ctx = scripted_context(|_| Err(LlmError::Network("down".to_string())));
        let err = extract_chunk(&ctx, &chunk("Some text."), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Stage { stage: "mention", .. }));
    }

    #[tokio::test]
    async fn invalid_rows_are_dropped_not_fatal() {
        let ctx = scripted_context(|request| {
            let prompt = &request.messages[0].content;
            if prompt.contains("list every span") {
                Ok(r#"[
                    {"mention": "Ronaldo", "context": "football player"},
                    {"mention": "Al-Nassr", "context": "football team"}
                ]"#
                .to_string())
            } else if prompt.contains("extract the typed entities") {
                // Second row carries an unknown class and is dropped per-row.
                Ok(r#"[
                    {"mention": "Ronaldo", "types": ["http://o/Player"]},
                    {"mention": "Al-Nassr", "types": ["http://o/Spaceship"]}
                ]"#
                .to_string())
            } else {
                panic!("relation stage must not run with one entity");
            }
        });
        let outcome = extract_chunk(
            &ctx,
            &chunk("Ronaldo plays for Al-Nassr."),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(outcome.fragment.entity_count(), 1);
        assert!(outcome.stats.dropped_rows >= 1);
    }
}
