//! Turtle ontology loading.
//!
//! Parsing goes through Sophia's Turtle parser; terms are taken in their
//! N-Triples-ish display form and re-parsed into the small shapes the
//! loader cares about (IRIs and literal lexical values). Blank-node
//! subjects (anonymous restrictions, `owl:unionOf` lists) are skipped -
//! the extraction pipeline only consumes named classes and properties.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use sophia::api::prelude::*;

use crate::model::{local_name, ClassDefinition, OntologyContext, PropertyDefinition, RangeType};

pub const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";
pub const RDFS_LABEL: &str = "http://www.w3.org/2000/01/rdf-schema#label";
pub const RDFS_COMMENT: &str = "http://www.w3.org/2000/01/rdf-schema#comment";
pub const RDFS_DOMAIN: &str = "http://www.w3.org/2000/01/rdf-schema#domain";
pub const RDFS_RANGE: &str = "http://www.w3.org/2000/01/rdf-schema#range";
pub const RDFS_CLASS: &str = "http://www.w3.org/2000/01/rdf-schema#Class";
pub const OWL_CLASS: &str = "http://www.w3.org/2002/07/owl#Class";
pub const OWL_OBJECT_PROPERTY: &str = "http://www.w3.org/2002/07/owl#ObjectProperty";
pub const OWL_DATATYPE_PROPERTY: &str = "http://www.w3.org/2002/07/owl#DatatypeProperty";
pub const OWL_FUNCTIONAL_PROPERTY: &str = "http://www.w3.org/2002/07/owl#FunctionalProperty";

const SKOS: &str = "http://www.w3.org/2004/02/skos/core#";

#[derive(Debug, thiserror::Error)]
pub enum OntologyError {
    #[error("ontology file not found: {}", .0.display())]
    FileNotFound(PathBuf),
    #[error("failed to parse ontology: {0}")]
    ParseFailed(String),
}

// ============================================================================
// Term model
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum TermValue {
    Iri(String),
    BlankNode(String),
    Literal(String),
}

impl TermValue {
    fn as_iri(&self) -> Option<&str> {
        match self {
            Self::Iri(iri) => Some(iri),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct Statement {
    subject: TermValue,
    predicate: String,
    object: TermValue,
}

#[derive(Debug, thiserror::Error)]
#[error("{message}")]
struct SinkError {
    message: String,
}

fn unescape_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Re-parses a term from its display form: `<iri>`, `_:bnode`, or a quoted
/// literal with optional language tag / datatype suffix.
fn parse_term_display(term: &str) -> Result<TermValue, SinkError> {
    let s = term.trim();

    if let Some(rest) = s.strip_prefix('<').and_then(|t| t.strip_suffix('>')) {
        return Ok(TermValue::Iri(rest.to_string()));
    }
    if let Some(rest) = s.strip_prefix("_:") {
        return Ok(TermValue::BlankNode(rest.to_string()));
    }
    if s.starts_with('"') {
        let mut end_quote = None;
        let mut prev_was_escape = false;
        for (i, ch) in s.char_indices().skip(1) {
            if ch == '"' && !prev_was_escape {
                end_quote = Some(i);
                break;
            }
            prev_was_escape = ch == '\\' && !prev_was_escape;
        }
        let Some(end) = end_quote else {
            return Err(SinkError {
                message: format!("unterminated literal: {s}"),
            });
        };
        return Ok(TermValue::Literal(unescape_literal(&s[1..end])));
    }

    Err(SinkError {
        message: format!("unsupported term form: {s}"),
    })
}

fn parse_statements(turtle: &str) -> Result<Vec<Statement>, OntologyError> {
    let reader = std::io::BufReader::new(std::io::Cursor::new(turtle.as_bytes()));
    let mut out: Vec<Statement> = Vec::new();
    let mut parser = sophia::turtle::parser::turtle::parse_bufread(reader);
    parser
        .try_for_each_triple(|t| -> Result<(), SinkError> {
            let subject = parse_term_display(&t.s().to_string())?;
            let TermValue::Iri(predicate) = parse_term_display(&t.p().to_string())? else {
                return Ok(());
            };
            let object = parse_term_display(&t.o().to_string())?;
            out.push(Statement {
                subject,
                predicate,
                object,
            });
            Ok(())
        })
        .map_err(|e| OntologyError::ParseFailed(e.to_string()))?;
    Ok(out)
}

// ============================================================================
// Assembly
// ============================================================================

/// Loads and parses a Turtle ontology file.
pub fn load_ontology(path: &Path) -> Result<OntologyContext, OntologyError> {
    let turtle = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            OntologyError::FileNotFound(path.to_path_buf())
        } else {
            OntologyError::ParseFailed(format!("{}: {e}", path.display()))
        }
    })?;
    parse_ontology(&turtle)
}

/// Parses an in-memory Turtle document into an [`OntologyContext`].
///
/// An ontology that declares no classes parses successfully; downstream
/// retrieval then finds nothing and the pipeline produces an empty graph.
pub fn parse_ontology(turtle: &str) -> Result<OntologyContext, OntologyError> {
    let statements = parse_statements(turtle)?;

    let mut classes: BTreeMap<String, ClassDefinition> = BTreeMap::new();
    let mut properties: BTreeMap<String, PropertyDefinition> = BTreeMap::new();
    let mut functional: Vec<String> = Vec::new();

    // Declarations first so annotation triples always find their target.
    for stmt in &statements {
        let (Some(subject), RDF_TYPE) = (stmt.subject.as_iri(), stmt.predicate.as_str()) else {
            continue;
        };
        match stmt.object.as_iri() {
            Some(OWL_CLASS) | Some(RDFS_CLASS) => {
                classes
                    .entry(subject.to_string())
                    .or_insert_with(|| ClassDefinition::new(subject));
            }
            Some(OWL_OBJECT_PROPERTY) => {
                properties
                    .entry(subject.to_string())
                    .or_insert_with(|| PropertyDefinition::new(subject, RangeType::Object));
            }
            Some(OWL_DATATYPE_PROPERTY) => {
                properties
                    .entry(subject.to_string())
                    .or_insert_with(|| PropertyDefinition::new(subject, RangeType::Datatype));
            }
            Some(OWL_FUNCTIONAL_PROPERTY) => {
                functional.push(subject.to_string());
            }
            _ => {}
        }
    }

    for stmt in &statements {
        let Some(subject) = stmt.subject.as_iri() else {
            continue;
        };
        apply_annotation(subject, stmt, &mut classes, &mut properties);
    }

    for iri in functional {
        if let Some(property) = properties.get_mut(&iri) {
            property.functional = true;
        }
    }

    tracing::debug!(
        classes = classes.len(),
        properties = properties.len(),
        "ontology parsed"
    );

    Ok(OntologyContext::new(classes, properties))
}

fn apply_annotation(
    subject: &str,
    stmt: &Statement,
    classes: &mut BTreeMap<String, ClassDefinition>,
    properties: &mut BTreeMap<String, PropertyDefinition>,
) {
    let literal = || match &stmt.object {
        TermValue::Literal(s) => Some(s.clone()),
        _ => None,
    };
    let object_iri = || stmt.object.as_iri().map(str::to_string);

    match stmt.predicate.as_str() {
        RDFS_LABEL => {
            if let Some(value) = literal() {
                if let Some(class) = classes.get_mut(subject) {
                    set_label(&mut class.label, &mut class.pref_labels, value.clone());
                }
                if let Some(property) = properties.get_mut(subject) {
                    set_label(&mut property.label, &mut property.pref_labels, value);
                }
            }
        }
        RDFS_COMMENT => {
            if let Some(value) = literal() {
                if let Some(class) = classes.get_mut(subject) {
                    class.comment.get_or_insert(value.clone());
                }
                if let Some(property) = properties.get_mut(subject) {
                    property.comment.get_or_insert(value);
                }
            }
        }
        RDFS_DOMAIN => {
            if let (Some(property), Some(iri)) = (properties.get_mut(subject), object_iri()) {
                property.domain.push(local_name(&iri).to_string());
            }
        }
        RDFS_RANGE => {
            if let (Some(property), Some(iri)) = (properties.get_mut(subject), object_iri()) {
                property.range.push(local_name(&iri).to_string());
            }
        }
        skos if skos.starts_with(SKOS) => {
            apply_skos(&skos[SKOS.len()..], stmt, subject, classes, properties);
        }
        _ => {}
    }
}

fn set_label(label: &mut Option<String>, overflow: &mut Vec<String>, value: String) {
    if label.is_none() {
        *label = Some(value);
    } else if label.as_deref() != Some(value.as_str()) {
        overflow.push(value);
    }
}

fn apply_skos(
    suffix: &str,
    stmt: &Statement,
    subject: &str,
    classes: &mut BTreeMap<String, ClassDefinition>,
    properties: &mut BTreeMap<String, PropertyDefinition>,
) {
    let literal = match &stmt.object {
        TermValue::Literal(s) => Some(s.clone()),
        _ => None,
    };
    let object_iri = stmt.object.as_iri().map(str::to_string);

    // Apply the same edit to whichever map holds the subject.
    let mut edit = |f: &mut dyn FnMut(SkosFields<'_>)| {
        if let Some(class) = classes.get_mut(subject) {
            f(SkosFields {
                pref_labels: &mut class.pref_labels,
                alt_labels: &mut class.alt_labels,
                hidden_labels: &mut class.hidden_labels,
                definition: &mut class.definition,
                scope_note: &mut class.scope_note,
                example: &mut class.example,
                broader: &mut class.broader,
                narrower: &mut class.narrower,
                related: &mut class.related,
                exact_match: &mut class.exact_match,
                close_match: &mut class.close_match,
            });
        }
        if let Some(property) = properties.get_mut(subject) {
            f(SkosFields {
                pref_labels: &mut property.pref_labels,
                alt_labels: &mut property.alt_labels,
                hidden_labels: &mut property.hidden_labels,
                definition: &mut property.definition,
                scope_note: &mut property.scope_note,
                example: &mut property.example,
                broader: &mut property.broader,
                narrower: &mut property.narrower,
                related: &mut property.related,
                exact_match: &mut property.exact_match,
                close_match: &mut property.close_match,
            });
        }
    };

    match suffix {
        "prefLabel" => {
            if let Some(v) = literal {
                edit(&mut |f| f.pref_labels.push(v.clone()));
            }
        }
        "altLabel" => {
            if let Some(v) = literal {
                edit(&mut |f| f.alt_labels.push(v.clone()));
            }
        }
        "hiddenLabel" => {
            if let Some(v) = literal {
                edit(&mut |f| f.hidden_labels.push(v.clone()));
            }
        }
        "definition" => {
            if let Some(v) = literal {
                edit(&mut |f| {
                    f.definition.get_or_insert(v.clone());
                });
            }
        }
        "scopeNote" => {
            if let Some(v) = literal {
                edit(&mut |f| {
                    f.scope_note.get_or_insert(v.clone());
                });
            }
        }
        "example" => {
            if let Some(v) = literal {
                edit(&mut |f| {
                    f.example.get_or_insert(v.clone());
                });
            }
        }
        "broader" => {
            if let Some(v) = object_iri {
                edit(&mut |f| f.broader.push(v.clone()));
            }
        }
        "narrower" => {
            if let Some(v) = object_iri {
                edit(&mut |f| f.narrower.push(v.clone()));
            }
        }
        "related" => {
            if let Some(v) = object_iri {
                edit(&mut |f| f.related.push(v.clone()));
            }
        }
        "exactMatch" => {
            if let Some(v) = object_iri {
                edit(&mut |f| f.exact_match.push(v.clone()));
            }
        }
        "closeMatch" => {
            if let Some(v) = object_iri {
                edit(&mut |f| f.close_match.push(v.clone()));
            }
        }
        _ => {}
    }
}

struct SkosFields<'a> {
    pref_labels: &'a mut Vec<String>,
    alt_labels: &'a mut Vec<String>,
    hidden_labels: &'a mut Vec<String>,
    definition: &'a mut Option<String>,
    scope_note: &'a mut Option<String>,
    example: &'a mut Option<String>,
    broader: &'a mut Vec<String>,
    narrower: &'a mut Vec<String>,
    related: &'a mut Vec<String>,
    exact_match: &'a mut Vec<String>,
    close_match: &'a mut Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const FOOTBALL_TTL: &str = r#"
@prefix rdf: <http://www.w3.org/1999/02/22-rdf-syntax-ns#> .
@prefix rdfs: <http://www.w3.org/2000/01/rdf-schema#> .
@prefix owl: <http://www.w3.org/2002/07/owl#> .
@prefix skos: <http://www.w3.org/2004/02/skos/core#> .
@prefix xsd: <http://www.w3.org/2001/XMLSchema#> .
@prefix : <http://o/> .

:Player a owl:Class ;
    rdfs:label "Player" ;
    rdfs:comment "A professional football player." ;
    skos:altLabel "footballer" ;
    skos:hiddenLabel "soccer player" .

:Team a owl:Class ;
    rdfs:label "Team" ;
    skos:definition "A football club." .

:playsFor a owl:ObjectProperty , owl:FunctionalProperty ;
    rdfs:label "plays for" ;
    rdfs:domain :Player ;
    rdfs:range :Team .

:height a owl:DatatypeProperty ;
    rdfs:label "height" ;
    rdfs:domain :Player ;
    rdfs:range xsd:decimal .
"#;

    #[test]
    fn parses_classes_and_properties() {
        let ctx = parse_ontology(FOOTBALL_TTL).unwrap();
        assert_eq!(ctx.class_count(), 2);
        assert_eq!(ctx.property_count(), 2);

        let player = ctx.class("http://o/Player").unwrap();
        assert_eq!(player.label.as_deref(), Some("Player"));
        assert_eq!(player.alt_labels, vec!["footballer".to_string()]);
        assert_eq!(player.hidden_labels, vec!["soccer player".to_string()]);

        let plays_for = ctx.property("http://o/playsFor").unwrap();
        assert!(plays_for.is_object_property());
        assert!(plays_for.functional);
        assert_eq!(plays_for.domain, vec!["Player".to_string()]);
        assert_eq!(plays_for.range, vec!["Team".to_string()]);

        let height = ctx.property("http://o/height").unwrap();
        assert_eq!(height.range_type, RangeType::Datatype);
        assert!(!height.functional);
    }

    #[test]
    fn skos_definition_lands_on_class() {
        let ctx = parse_ontology(FOOTBALL_TTL).unwrap();
        let team = ctx.class("http://o/Team").unwrap();
        assert_eq!(team.definition.as_deref(), Some("A football club."));
    }

    #[test]
    fn malformed_turtle_is_a_parse_error() {
        let err = parse_ontology(":Player a owl:Class").unwrap_err();
        assert!(matches!(err, OntologyError::ParseFailed(_)));
    }

    #[test]
    fn empty_document_yields_empty_context() {
        let ctx = parse_ontology("").unwrap();
        assert_eq!(ctx.class_count(), 0);
        assert_eq!(ctx.property_count(), 0);
    }

    #[test]
    fn missing_file_is_distinguished() {
        let err = load_ontology(Path::new("/definitely/not/here.ttl")).unwrap_err();
        assert!(matches!(err, OntologyError::FileNotFound(_)));
    }

    #[test]
    fn file_roundtrip() {
        use std::io::Write as _;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FOOTBALL_TTL.as_bytes()).unwrap();
        let ctx = load_ontology(file.path()).unwrap();
        assert_eq!(ctx.class_count(), 2);
    }
}
