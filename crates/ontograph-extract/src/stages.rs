//! Per-stage validation schemas and their rule sets.
//!
//! Each stage builder takes the allowed-value sets for one chunk and
//! returns the schema and the rules together, derived from the same sets.
//! The prompt renderer consumes the rules and the sets; the gateway
//! enforces the schema - neither side can drift from the other.

use ontograph_llm::schema::{CanonicalSet, Schema};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Enforced by the schema; a violation fails the row or the call.
    Error,
    /// A preference; stated in the prompt, repaired or tolerated on decode.
    Warning,
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub severity: Severity,
    pub text: String,
}

impl Rule {
    fn error(text: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            text: text.into(),
        }
    }

    fn warning(text: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            text: text.into(),
        }
    }
}

/// Schema plus prompt rules for one extraction stage.
#[derive(Debug, Clone)]
pub struct StageSpec {
    pub schema: Schema,
    pub rules: Vec<Rule>,
}

// ============================================================================
// Row shapes (decoded from already-validated values)
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct MentionRow {
    #[serde(default)]
    pub id: Option<String>,
    pub mention: String,
    #[serde(default)]
    pub context: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EntityRow {
    #[serde(default)]
    pub id: Option<String>,
    pub mention: String,
    pub types: Vec<String>,
    #[serde(default)]
    pub attributes: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelationRow {
    pub subject: String,
    pub predicate: String,
    pub object: serde_json::Value,
}

// ============================================================================
// Stage builders
// ============================================================================

/// Mention pass: spans worth typing, with enough context to retrieve
/// candidate classes per mention.
pub fn mention_stage() -> StageSpec {
    let schema = Schema::salvage_array(Schema::object(vec![
        Schema::optional_field("id", Schema::EntityId),
        Schema::field("mention", Schema::non_empty_string()),
        Schema::optional_field("context", Schema::string()),
    ]));
    let rules = vec![
        Rule::error("Return a JSON array of {id, mention, context} objects and nothing else."),
        Rule::error("Every mention must be a non-empty span copied exactly from the text, preserving case and punctuation."),
        Rule::warning("id should be a snake_case identifier derived from the mention."),
        Rule::warning("context should quote the phrase surrounding the mention."),
        Rule::warning("Do not emit pronouns or generic nouns as mentions."),
    ];
    StageSpec { schema, rules }
}

/// Typing pass: entities constrained to the retrieved class slice, with
/// attributes scoped to the allowed datatype properties.
pub fn entity_stage(classes: CanonicalSet, attributes: &CanonicalSet) -> StageSpec {
    let rules = vec![
        Rule::error("Return a JSON array of {id, mention, types, attributes} objects and nothing else."),
        Rule::error(
            "Every element of types must be one of the allowed class IRIs, copied character-for-character.",
        ),
        Rule::error("types must contain at least one class IRI."),
        Rule::error("mention must be a non-empty span from the text."),
        Rule::warning(format!(
            "attributes keys should be allowed datatype property IRIs ({} available); unknown keys are discarded.",
            attributes.members().len()
        )),
        Rule::warning("Prefer the most specific class that fits the mention."),
        Rule::warning("attributes values must be plain literals (string, number, or boolean)."),
    ];
    let schema = Schema::salvage_array(Schema::object(vec![
        Schema::optional_field("id", Schema::EntityId),
        Schema::field("mention", Schema::non_empty_string()),
        Schema::field("types", Schema::non_empty_array(Schema::member(classes))),
        Schema::optional_field("attributes", Schema::map(Schema::Literal)),
    ]));
    StageSpec { schema, rules }
}

/// Relation pass: a discriminated union per property kind - object
/// properties point at extracted entity ids, datatype properties at
/// literals.
pub fn relation_stage(
    entity_ids: CanonicalSet,
    object_properties: CanonicalSet,
    datatype_properties: CanonicalSet,
) -> StageSpec {
    let mut variants = Vec::new();
    if !object_properties.is_empty() {
        variants.push(Schema::object(vec![
            Schema::field("subject", Schema::member(entity_ids.clone())),
            Schema::field("predicate", Schema::member(object_properties)),
            Schema::field("object", Schema::member(entity_ids.clone())),
        ]));
    }
    if !datatype_properties.is_empty() {
        variants.push(Schema::object(vec![
            Schema::field("subject", Schema::member(entity_ids)),
            Schema::field("predicate", Schema::member(datatype_properties)),
            Schema::field("object", Schema::Literal),
        ]));
    }
    let row = match variants.len() {
        1 => variants.pop().unwrap_or_else(|| Schema::object(Vec::new())),
        _ => Schema::OneOf(variants),
    };

    let rules = vec![
        Rule::error("Return a JSON array of {subject, predicate, object} objects and nothing else."),
        Rule::error("subject must be one of the listed entity ids."),
        Rule::error(
            "predicate must be one of the allowed property IRIs, copied character-for-character.",
        ),
        Rule::error(
            "For object properties the object must be a listed entity id; for datatype properties it must be a literal value.",
        ),
        Rule::warning("Only express relations the text itself states; never infer."),
        Rule::warning("Subject and object must refer to different entities."),
    ];
    StageSpec {
        schema: Schema::salvage_array(row),
        rules,
    }
}
