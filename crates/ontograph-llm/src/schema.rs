//! Runtime-constructed validation schemas.
//!
//! The allowed value sets are data-dependent (class IRIs retrieved for one
//! chunk, entity ids from the typing pass), so schemas are built per call
//! rather than derived from Rust types. A schema does three jobs:
//!
//! - **decode** a `serde_json::Value` into a normalized copy, with
//!   localized per-element errors,
//! - **render** itself as a JSON-Schema document for the provider/prompt,
//! - **explain** failures as a path-tagged report the gateway feeds back
//!   to the model.
//!
//! IRI-valued enums accept members case-insensitively and rewrite them to
//! the canonical spelling on acceptance; the membership check runs against
//! the normalized form.

use std::fmt::Write as _;

use ahash::AHashMap;
use serde_json::{json, Map, Value};

// ============================================================================
// Canonical sets
// ============================================================================

/// A closed, case-insensitively matched string set that normalizes to
/// canonical casing on lookup.
#[derive(Debug, Clone, Default)]
pub struct CanonicalSet {
    /// Human name used in error messages ("class IRI", "entity id").
    label: String,
    members: Vec<String>,
    lookup: AHashMap<String, String>,
}

impl CanonicalSet {
    pub fn new<I, S>(label: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = Self {
            label: label.into(),
            members: Vec::new(),
            lookup: AHashMap::new(),
        };
        for member in members {
            let member = member.into();
            if set
                .lookup
                .insert(member.to_lowercase(), member.clone())
                .is_none()
            {
                set.members.push(member);
            }
        }
        set
    }

    pub fn resolve(&self, input: &str) -> Option<&str> {
        self.lookup.get(&input.to_lowercase()).map(String::as_str)
    }

    pub fn members(&self) -> &[String] {
        &self.members
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

// ============================================================================
// Violations
// ============================================================================

/// One localized decode failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// JSONPath-ish location, e.g. `$[2].types[0]`.
    pub path: String,
    pub message: String,
}

impl Violation {
    fn at(path: &str, message: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            message: message.into(),
        }
    }
}

/// Renders violations as the feedback block sent back to the model.
pub fn format_violations(violations: &[Violation]) -> String {
    let mut out = String::new();
    for v in violations {
        let _ = writeln!(out, "- at {}: {}", v.path, v.message);
    }
    out
}

/// A successful decode: the normalized value plus per-row failures that
/// were salvaged away rather than failing the call.
#[derive(Debug, Clone)]
pub struct Decoded {
    pub value: Value,
    pub dropped: Vec<Violation>,
}

// ============================================================================
// Schema
// ============================================================================

#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub schema: Schema,
    pub required: bool,
}

#[derive(Debug, Clone)]
pub enum Schema {
    /// Any JSON string; `min_len` in characters.
    String { min_len: usize },
    /// A string matching the entity identifier pattern.
    EntityId,
    /// string | number | boolean.
    Literal,
    Number,
    Boolean,
    /// Case-insensitive member of a closed set, canonicalized on accept.
    Member(CanonicalSet),
    Array {
        items: Box<Schema>,
        min_items: usize,
        /// Salvage mode drops invalid elements instead of failing the
        /// whole decode, as long as at least one element survives (or the
        /// array was empty to begin with).
        salvage: bool,
    },
    Object {
        fields: Vec<Field>,
    },
    /// Arbitrary keys, each value decoded against the inner schema.
    Map { values: Box<Schema> },
    /// First variant that decodes cleanly wins.
    OneOf(Vec<Schema>),
}

impl Schema {
    pub fn string() -> Self {
        Self::String { min_len: 0 }
    }

    pub fn non_empty_string() -> Self {
        Self::String { min_len: 1 }
    }

    pub fn member(set: CanonicalSet) -> Self {
        Self::Member(set)
    }

    pub fn array(items: Schema) -> Self {
        Self::Array {
            items: Box::new(items),
            min_items: 0,
            salvage: false,
        }
    }

    pub fn non_empty_array(items: Schema) -> Self {
        Self::Array {
            items: Box::new(items),
            min_items: 1,
            salvage: false,
        }
    }

    pub fn salvage_array(items: Schema) -> Self {
        Self::Array {
            items: Box::new(items),
            min_items: 0,
            salvage: true,
        }
    }

    pub fn object(fields: Vec<Field>) -> Self {
        Self::Object { fields }
    }

    pub fn map(values: Schema) -> Self {
        Self::Map {
            values: Box::new(values),
        }
    }

    pub fn field(name: &str, schema: Schema) -> Field {
        Field {
            name: name.to_string(),
            schema,
            required: true,
        }
    }

    pub fn optional_field(name: &str, schema: Schema) -> Field {
        Field {
            name: name.to_string(),
            schema,
            required: false,
        }
    }

    /// Decodes and normalizes `raw`. Unknown object keys are dropped;
    /// salvage arrays collect per-element failures into
    /// [`Decoded::dropped`].
    pub fn decode(&self, raw: &Value) -> Result<Decoded, Vec<Violation>> {
        let mut dropped = Vec::new();
        let value = self.decode_at(raw, "$", &mut dropped)?;
        Ok(Decoded { value, dropped })
    }

    fn decode_at(
        &self,
        raw: &Value,
        path: &str,
        dropped: &mut Vec<Violation>,
    ) -> Result<Value, Vec<Violation>> {
        match self {
            Self::String { min_len } => match raw {
                Value::String(s) if s.chars().count() >= *min_len => Ok(raw.clone()),
                Value::String(_) => Err(vec![Violation::at(path, "string must not be empty")]),
                other => Err(vec![Violation::at(
                    path,
                    format!("expected a string, got {}", kind_of(other)),
                )]),
            },
            Self::EntityId => match raw {
                Value::String(s) if is_identifier(s) => Ok(raw.clone()),
                Value::String(s) => Err(vec![Violation::at(
                    path,
                    format!(
                        "'{s}' is not a valid identifier (must start with a letter and \
                         contain only letters, digits, and underscores)"
                    ),
                )]),
                other => Err(vec![Violation::at(
                    path,
                    format!("expected an identifier string, got {}", kind_of(other)),
                )]),
            },
            Self::Literal => match raw {
                Value::String(_) | Value::Number(_) | Value::Bool(_) => Ok(raw.clone()),
                other => Err(vec![Violation::at(
                    path,
                    format!(
                        "expected a literal (string, number, or boolean), got {}",
                        kind_of(other)
                    ),
                )]),
            },
            Self::Number => match raw {
                Value::Number(_) => Ok(raw.clone()),
                other => Err(vec![Violation::at(
                    path,
                    format!("expected a number, got {}", kind_of(other)),
                )]),
            },
            Self::Boolean => match raw {
                Value::Bool(_) => Ok(raw.clone()),
                other => Err(vec![Violation::at(
                    path,
                    format!("expected a boolean, got {}", kind_of(other)),
                )]),
            },
            Self::Member(set) => match raw {
                Value::String(s) => match set.resolve(s) {
                    Some(canonical) => Ok(Value::String(canonical.to_string())),
                    None => Err(vec![Violation::at(
                        path,
                        format!(
                            "'{s}' is not an allowed {}; allowed values: {}",
                            set.label(),
                            summarize(set.members())
                        ),
                    )]),
                },
                other => Err(vec![Violation::at(
                    path,
                    format!("expected a {} string, got {}", set.label(), kind_of(other)),
                )]),
            },
            Self::Array {
                items,
                min_items,
                salvage,
            } => {
                let Value::Array(elements) = raw else {
                    return Err(vec![Violation::at(
                        path,
                        format!("expected an array, got {}", kind_of(raw)),
                    )]);
                };
                if elements.len() < *min_items {
                    return Err(vec![Violation::at(
                        path,
                        format!(
                            "array must contain at least {min_items} element(s), got {}",
                            elements.len()
                        ),
                    )]);
                }
                let mut decoded = Vec::with_capacity(elements.len());
                let mut failures: Vec<Violation> = Vec::new();
                for (i, element) in elements.iter().enumerate() {
                    let child = format!("{path}[{i}]");
                    match items.decode_at(element, &child, dropped) {
                        Ok(v) => decoded.push(v),
                        Err(mut vs) => failures.append(&mut vs),
                    }
                }
                if failures.is_empty() {
                    return Ok(Value::Array(decoded));
                }
                if *salvage && !decoded.is_empty() {
                    dropped.extend(failures);
                    return Ok(Value::Array(decoded));
                }
                Err(failures)
            }
            Self::Object { fields } => {
                let Value::Object(map) = raw else {
                    return Err(vec![Violation::at(
                        path,
                        format!("expected an object, got {}", kind_of(raw)),
                    )]);
                };
                let mut out = Map::new();
                let mut failures: Vec<Violation> = Vec::new();
                for field in fields {
                    let child = format!("{path}.{}", field.name);
                    match map.get(&field.name) {
                        Some(value) => match field.schema.decode_at(value, &child, dropped) {
                            Ok(v) => {
                                out.insert(field.name.clone(), v);
                            }
                            // An invalid optional field is omitted rather
                            // than failing the row; callers regenerate it.
                            Err(mut vs) => {
                                if field.required {
                                    failures.append(&mut vs);
                                } else {
                                    dropped.append(&mut vs);
                                }
                            }
                        },
                        None if field.required => {
                            failures.push(Violation::at(
                                &child,
                                format!("missing required field '{}'", field.name),
                            ));
                        }
                        None => {}
                    }
                }
                if failures.is_empty() {
                    Ok(Value::Object(out))
                } else {
                    Err(failures)
                }
            }
            Self::Map { values } => {
                let Value::Object(map) = raw else {
                    return Err(vec![Violation::at(
                        path,
                        format!("expected an object, got {}", kind_of(raw)),
                    )]);
                };
                let mut out = Map::new();
                let mut failures: Vec<Violation> = Vec::new();
                for (key, value) in map {
                    let child = format!("{path}.{key}");
                    match values.decode_at(value, &child, dropped) {
                        Ok(v) => {
                            out.insert(key.clone(), v);
                        }
                        Err(mut vs) => failures.append(&mut vs),
                    }
                }
                if failures.is_empty() {
                    Ok(Value::Object(out))
                } else {
                    Err(failures)
                }
            }
            Self::OneOf(variants) => {
                let mut closest: Option<Vec<Violation>> = None;
                for variant in variants {
                    // Scratch buffer per variant so a failing branch cannot
                    // leak salvage records into the caller's list.
                    let mut scratch = Vec::new();
                    match variant.decode_at(raw, path, &mut scratch) {
                        Ok(v) => {
                            dropped.append(&mut scratch);
                            return Ok(v);
                        }
                        Err(vs) => {
                            let better = closest
                                .as_ref()
                                .map_or(true, |current| vs.len() < current.len());
                            if better {
                                closest = Some(vs);
                            }
                        }
                    }
                }
                Err(closest.unwrap_or_else(|| {
                    vec![Violation::at(path, "value matched no allowed shape")]
                }))
            }
        }
    }

    /// JSON-Schema rendering for providers and prompt embedding.
    pub fn to_json_value(&self) -> Value {
        match self {
            Self::String { min_len } => {
                if *min_len > 0 {
                    json!({"type": "string", "minLength": min_len})
                } else {
                    json!({"type": "string"})
                }
            }
            Self::EntityId => json!({
                "type": "string",
                "pattern": "^[A-Za-z][A-Za-z0-9_]*$"
            }),
            Self::Literal => json!({"type": ["string", "number", "boolean"]}),
            Self::Number => json!({"type": "number"}),
            Self::Boolean => json!({"type": "boolean"}),
            Self::Member(set) => json!({
                "type": "string",
                "enum": set.members(),
            }),
            Self::Array {
                items, min_items, ..
            } => {
                if *min_items > 0 {
                    json!({
                        "type": "array",
                        "items": items.to_json_value(),
                        "minItems": min_items,
                    })
                } else {
                    json!({
                        "type": "array",
                        "items": items.to_json_value(),
                    })
                }
            }
            Self::Object { fields } => {
                let mut properties = Map::new();
                let mut required = Vec::new();
                for field in fields {
                    properties.insert(field.name.clone(), field.schema.to_json_value());
                    if field.required {
                        required.push(Value::String(field.name.clone()));
                    }
                }
                json!({
                    "type": "object",
                    "properties": Value::Object(properties),
                    "required": required,
                })
            }
            Self::Map { values } => json!({
                "type": "object",
                "additionalProperties": values.to_json_value(),
            }),
            Self::OneOf(variants) => json!({
                "oneOf": variants.iter().map(Schema::to_json_value).collect::<Vec<_>>(),
            }),
        }
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn summarize(members: &[String]) -> String {
    const SHOWN: usize = 8;
    if members.len() <= SHOWN {
        members.join(", ")
    } else {
        format!(
            "{}, … ({} total)",
            members[..SHOWN].join(", "),
            members.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn class_set() -> CanonicalSet {
        CanonicalSet::new("class IRI", ["http://o/Player", "http://o/Team"])
    }

    #[test]
    fn member_normalizes_casing() {
        let schema = Schema::member(class_set());
        let decoded = schema.decode(&json!("http://o/player")).unwrap();
        assert_eq!(decoded.value, json!("http://o/Player"));
    }

    #[test]
    fn member_is_identity_on_canonical_input() {
        let schema = Schema::member(class_set());
        let decoded = schema.decode(&json!("http://o/Player")).unwrap();
        assert_eq!(decoded.value, json!("http://o/Player"));
    }

    #[test]
    fn member_rejects_unknown_values_with_path() {
        let schema = Schema::array(Schema::member(class_set()));
        let err = schema
            .decode(&json!(["http://o/Player", "http://o/Coach"]))
            .unwrap_err();
        assert_eq!(err.len(), 1);
        assert_eq!(err[0].path, "$[1]");
        assert!(err[0].message.contains("http://o/Coach"));
    }

    #[test]
    fn salvage_array_drops_bad_rows() {
        let row = Schema::object(vec![
            Schema::field("id", Schema::EntityId),
            Schema::field("mention", Schema::non_empty_string()),
        ]);
        let schema = Schema::salvage_array(row);
        let decoded = schema
            .decode(&json!([
                {"id": "ronaldo", "mention": "Ronaldo"},
                {"id": "7up", "mention": "7up"},
            ]))
            .unwrap();
        assert_eq!(decoded.value.as_array().unwrap().len(), 1);
        assert_eq!(decoded.dropped.len(), 1);
        assert_eq!(decoded.dropped[0].path, "$[1].id");
    }

    #[test]
    fn salvage_array_with_no_survivors_fails() {
        let schema = Schema::salvage_array(Schema::EntityId);
        let err = schema.decode(&json!(["9a", "8b"])).unwrap_err();
        assert_eq!(err.len(), 2);
    }

    #[test]
    fn empty_salvage_array_is_fine() {
        let schema = Schema::salvage_array(Schema::EntityId);
        let decoded = schema.decode(&json!([])).unwrap();
        assert_eq!(decoded.value, json!([]));
    }

    #[test]
    fn object_reports_missing_required_fields() {
        let schema = Schema::object(vec![Schema::field("mention", Schema::string())]);
        let err = schema.decode(&json!({})).unwrap_err();
        assert!(err[0].message.contains("mention"));
    }

    #[test]
    fn invalid_optional_field_is_omitted_not_fatal() {
        let schema = Schema::object(vec![
            Schema::optional_field("id", Schema::EntityId),
            Schema::field("mention", Schema::non_empty_string()),
        ]);
        let decoded = schema
            .decode(&json!({"id": "7up", "mention": "7up"}))
            .unwrap();
        assert_eq!(decoded.value, json!({"mention": "7up"}));
        assert_eq!(decoded.dropped.len(), 1);
        assert_eq!(decoded.dropped[0].path, "$.id");
    }

    #[test]
    fn unknown_object_keys_are_dropped() {
        let schema = Schema::object(vec![Schema::field("id", Schema::EntityId)]);
        let decoded = schema.decode(&json!({"id": "x", "extra": 1})).unwrap();
        assert_eq!(decoded.value, json!({"id": "x"}));
    }

    #[test]
    fn map_decodes_permissive_keys() {
        let schema = Schema::map(Schema::Literal);
        let decoded = schema
            .decode(&json!({"http://o/height": 1.87, "note": "tall"}))
            .unwrap();
        assert_eq!(decoded.value["http://o/height"], json!(1.87));
    }

    #[test]
    fn one_of_tries_variants_in_order() {
        let object_relation = Schema::object(vec![
            Schema::field("object", Schema::member(CanonicalSet::new("entity id", ["al_nassr"]))),
        ]);
        let literal_relation = Schema::object(vec![Schema::field("object", Schema::Literal)]);
        let schema = Schema::OneOf(vec![object_relation, literal_relation]);

        let decoded = schema.decode(&json!({"object": "AL_NASSR"})).unwrap();
        assert_eq!(decoded.value, json!({"object": "al_nassr"}));

        let decoded = schema.decode(&json!({"object": 42})).unwrap();
        assert_eq!(decoded.value, json!({"object": 42}));
    }

    #[test]
    fn violation_report_is_path_tagged() {
        let schema = Schema::object(vec![Schema::field(
            "types",
            Schema::array(Schema::member(class_set())),
        )]);
        let err = schema.decode(&json!({"types": ["http://o/Robot"]})).unwrap_err();
        let report = format_violations(&err);
        assert!(report.contains("$.types[0]"));
        assert!(report.contains("http://o/Robot"));
    }

    #[test]
    fn json_schema_rendering_carries_enums() {
        let schema = Schema::object(vec![Schema::field(
            "types",
            Schema::array(Schema::member(class_set())),
        )]);
        let rendered = schema.to_json_value();
        assert_eq!(
            rendered["properties"]["types"]["items"]["enum"],
            json!(["http://o/Player", "http://o/Team"])
        );
    }
}
