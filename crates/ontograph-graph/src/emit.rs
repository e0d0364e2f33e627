//! Turtle emission for merged graphs.
//!
//! The emitter is a pure mapping from a [`KnowledgeGraph`] to Turtle text:
//! entity blocks first (sorted by id), then relation triples sorted by
//! `(subject, predicate, object)`. IRIs are compacted against the prefix
//! table when the local part is prefix-safe, otherwise written in full.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::model::{is_valid_entity_id, KnowledgeGraph, Literal, RelationObject};

pub const RDF_NS: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";
pub const RDFS_NS: &str = "http://www.w3.org/2000/01/rdf-schema#";
pub const XSD_NS: &str = "http://www.w3.org/2001/XMLSchema#";

/// Output namespace configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RdfOptions {
    /// Namespace minted entity ids live under.
    #[serde(default = "default_base_namespace")]
    pub base_namespace: String,
    /// prefix → namespace table; `rdf`, `rdfs`, `xsd` are always available.
    #[serde(default)]
    pub prefixes: BTreeMap<String, String>,
}

fn default_base_namespace() -> String {
    "http://ontograph.dev/resource/".to_string()
}

impl Default for RdfOptions {
    fn default() -> Self {
        let mut prefixes = BTreeMap::new();
        prefixes.insert("og".to_string(), default_base_namespace());
        Self {
            base_namespace: default_base_namespace(),
            prefixes,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EmitError {
    #[error("base namespace is not a valid IRI: {0}")]
    InvalidBaseNamespace(String),
    #[error("prefix namespace for '{prefix}' is not a valid IRI: {namespace}")]
    InvalidPrefixNamespace { prefix: String, namespace: String },
}

/// Serializes the graph to Turtle.
pub fn emit_turtle(graph: &KnowledgeGraph, opts: &RdfOptions) -> Result<String, EmitError> {
    if !is_iri(&opts.base_namespace) {
        return Err(EmitError::InvalidBaseNamespace(opts.base_namespace.clone()));
    }

    let mut prefixes = opts.prefixes.clone();
    prefixes.entry("rdf".to_string()).or_insert_with(|| RDF_NS.to_string());
    prefixes.entry("rdfs".to_string()).or_insert_with(|| RDFS_NS.to_string());
    prefixes.entry("xsd".to_string()).or_insert_with(|| XSD_NS.to_string());
    for (prefix, namespace) in &prefixes {
        if !is_iri(namespace) {
            return Err(EmitError::InvalidPrefixNamespace {
                prefix: prefix.clone(),
                namespace: namespace.clone(),
            });
        }
    }

    let mut out = String::new();
    for (prefix, namespace) in &prefixes {
        let _ = writeln!(out, "@prefix {prefix}: <{namespace}> .");
    }
    let _ = writeln!(out);

    for entity in graph.entities() {
        let subject = compact(&format!("{}{}", opts.base_namespace, entity.id), &prefixes);

        let mut lines: Vec<String> = Vec::new();
        for ty in &entity.types {
            lines.push(format!("a {}", compact(ty, &prefixes)));
        }
        lines.push(format!("rdfs:label {}", quote(&entity.mention)));
        for (key, value) in &entity.attributes {
            let predicate = if is_iri(key) {
                key.clone()
            } else {
                format!("{}{}", opts.base_namespace, key)
            };
            lines.push(format!(
                "{} {}",
                compact(&predicate, &prefixes),
                literal_term(value, &prefixes)
            ));
        }

        let _ = writeln!(out, "{subject} {} .", lines.join(" ;\n    "));
        let _ = writeln!(out);
    }

    for relation in graph.relations() {
        let subject = compact(
            &format!("{}{}", opts.base_namespace, relation.subject_id),
            &prefixes,
        );
        let predicate = compact(&relation.predicate, &prefixes);
        let object = match &relation.object {
            RelationObject::Entity(id) if is_valid_entity_id(id) => {
                compact(&format!("{}{}", opts.base_namespace, id), &prefixes)
            }
            RelationObject::Entity(other) => quote(other),
            RelationObject::Literal(lit) => literal_term(lit, &prefixes),
        };
        let _ = writeln!(out, "{subject} {predicate} {object} .");
    }

    Ok(out)
}

fn is_iri(s: &str) -> bool {
    url::Url::parse(s).is_ok()
}

/// Compacts `iri` against the prefix table when the remainder is a safe
/// local name; falls back to the `<...>` form.
fn compact(iri: &str, prefixes: &BTreeMap<String, String>) -> String {
    let mut best: Option<(&str, &str)> = None;
    for (prefix, namespace) in prefixes {
        if let Some(rest) = iri.strip_prefix(namespace.as_str()) {
            if prefix_safe_local(rest)
                && best.map_or(true, |(_, ns)| namespace.len() > ns.len())
            {
                best = Some((prefix, namespace));
            }
        }
    }
    match best {
        Some((prefix, namespace)) => format!("{prefix}:{}", &iri[namespace.len()..]),
        None => format!("<{iri}>"),
    }
}

fn prefix_safe_local(local: &str) -> bool {
    !local.is_empty()
        && local
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        && local.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
}

fn quote(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len() + 2);
    escaped.push('"');
    for c in s.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            other => escaped.push(other),
        }
    }
    escaped.push('"');
    escaped
}

fn literal_term(value: &Literal, prefixes: &BTreeMap<String, String>) -> String {
    match value {
        Literal::Text(s) => quote(s),
        Literal::Integer(i) => format!(
            "{}^^{}",
            quote(&i.to_string()),
            compact(&format!("{XSD_NS}integer"), prefixes)
        ),
        Literal::Float(f) => format!(
            "{}^^{}",
            quote(&f.to_string()),
            compact(&format!("{XSD_NS}decimal"), prefixes)
        ),
        Literal::Bool(b) => format!(
            "{}^^{}",
            quote(&b.to_string()),
            compact(&format!("{XSD_NS}boolean"), prefixes)
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Entity, Literal, Relation};

    fn sample() -> KnowledgeGraph {
        let mut g = KnowledgeGraph::empty();
        g.insert_entity(
            Entity::new(
                "cristiano_ronaldo",
                "Cristiano Ronaldo",
                vec!["http://o/Player".into()],
            )
            .with_attribute("http://o/shirtNumber", Literal::Integer(7)),
        );
        g.insert_entity(Entity::new("al_nassr", "Al-Nassr", vec!["http://o/Team".into()]));
        g.insert_relation(Relation::to_entity(
            "cristiano_ronaldo",
            "http://o/playsFor",
            "al_nassr",
        ));
        g
    }

    fn options() -> RdfOptions {
        let mut prefixes = BTreeMap::new();
        prefixes.insert("kg".to_string(), "http://kg.example/".to_string());
        prefixes.insert("o".to_string(), "http://o/".to_string());
        RdfOptions {
            base_namespace: "http://kg.example/".to_string(),
            prefixes,
        }
    }

    #[test]
    fn happy_path_turtle() {
        let turtle = emit_turtle(&sample(), &options()).unwrap();
        assert!(turtle.contains("@prefix kg: <http://kg.example/> ."));
        assert!(turtle.contains("kg:cristiano_ronaldo a o:Player"));
        assert!(turtle.contains("rdfs:label \"Cristiano Ronaldo\""));
        assert!(turtle.contains("o:shirtNumber \"7\"^^xsd:integer"));
        assert!(turtle.contains("kg:cristiano_ronaldo o:playsFor kg:al_nassr ."));
    }

    #[test]
    fn literal_objects_are_typed() {
        let mut g = KnowledgeGraph::empty();
        g.insert_entity(Entity::new("m", "M", vec!["http://o/Thing".into()]));
        g.insert_relation(Relation::to_literal("m", "http://o/height", Literal::Float(1.87)));
        g.insert_relation(Relation::to_literal("m", "http://o/active", Literal::Bool(true)));
        let turtle = emit_turtle(&g, &options()).unwrap();
        assert!(turtle.contains("\"1.87\"^^xsd:decimal"));
        assert!(turtle.contains("\"true\"^^xsd:boolean"));
    }

    #[test]
    fn uncompactable_iris_use_angle_brackets() {
        let mut g = KnowledgeGraph::empty();
        g.insert_entity(Entity::new("x", "X", vec!["http://elsewhere.net/ns#Thing".into()]));
        let turtle = emit_turtle(&g, &options()).unwrap();
        assert!(turtle.contains("a <http://elsewhere.net/ns#Thing>"));
    }

    #[test]
    fn string_escaping() {
        let mut g = KnowledgeGraph::empty();
        g.insert_entity(Entity::new("q", "say \"hi\"\nplease", vec!["http://o/T".into()]));
        let turtle = emit_turtle(&g, &options()).unwrap();
        assert!(turtle.contains(r#""say \"hi\"\nplease""#));
    }

    #[test]
    fn invalid_base_namespace_is_rejected() {
        let opts = RdfOptions {
            base_namespace: "not an iri".to_string(),
            prefixes: BTreeMap::new(),
        };
        assert!(matches!(
            emit_turtle(&sample(), &opts),
            Err(EmitError::InvalidBaseNamespace(_))
        ));
    }

    #[test]
    fn output_is_deterministic() {
        let a = emit_turtle(&sample(), &options()).unwrap();
        let b = emit_turtle(&sample(), &options()).unwrap();
        assert_eq!(a, b);
    }
}
