//! Searchable document composition.
//!
//! The hybrid index scores one document per class and per property. The
//! document text aggregates everything worth matching on - labels,
//! synonyms, definitions, domain/range, hierarchy - plus camelCase-split
//! words and bigrams. The expansion lives only here; the model records
//! returned to callers stay untouched.

use serde::{Deserialize, Serialize};

use crate::model::{local_name, ClassDefinition, OntologyContext, PropertyDefinition};
use crate::text;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Class,
    Property,
}

/// One indexable document, tagged with the IRI it describes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OntologyDocument {
    pub iri: String,
    pub kind: DocumentKind,
    pub text: String,
}

/// Builds the full document set for an ontology, classes first, both
/// groups in IRI order.
pub fn build_documents(ctx: &OntologyContext) -> Vec<OntologyDocument> {
    let mut documents = Vec::with_capacity(ctx.class_count() + ctx.property_count());
    for class in ctx.classes() {
        documents.push(OntologyDocument {
            iri: class.iri.clone(),
            kind: DocumentKind::Class,
            text: class_document(class, ctx),
        });
    }
    for property in ctx.properties() {
        documents.push(OntologyDocument {
            iri: property.iri.clone(),
            kind: DocumentKind::Property,
            text: property_document(property),
        });
    }
    documents
}

fn class_document(class: &ClassDefinition, ctx: &OntologyContext) -> String {
    let mut lines: Vec<String> = Vec::new();
    lines.push(class.display_label().to_string());
    lines.extend(class.pref_labels.iter().cloned());
    if !class.alt_labels.is_empty() {
        lines.push(format!("synonyms: {}", class.alt_labels.join(", ")));
    }
    if !class.hidden_labels.is_empty() {
        lines.push(format!("synonyms: {}", class.hidden_labels.join(", ")));
    }
    if let Some(text) = class.definition.as_ref().or(class.comment.as_ref()) {
        lines.push(text.clone());
    }
    if let Some(note) = &class.scope_note {
        lines.push(note.clone());
    }
    if let Some(example) = &class.example {
        lines.push(example.clone());
    }

    let properties = ctx.properties_for_class(&class.iri);
    if !properties.is_empty() {
        let names: Vec<&str> = properties.iter().map(|p| p.display_label()).collect();
        lines.push(format!("properties: {}", names.join(", ")));
    }

    push_hierarchy(&mut lines, &class.broader, &class.narrower, &class.related);
    push_expansion(&mut lines, &class.iri);
    lines.join("\n")
}

fn property_document(property: &PropertyDefinition) -> String {
    let mut lines: Vec<String> = Vec::new();
    lines.push(property.display_label().to_string());
    lines.extend(property.pref_labels.iter().cloned());
    if !property.alt_labels.is_empty() {
        lines.push(format!("synonyms: {}", property.alt_labels.join(", ")));
    }
    if !property.hidden_labels.is_empty() {
        lines.push(format!("synonyms: {}", property.hidden_labels.join(", ")));
    }
    if let Some(text) = property.definition.as_ref().or(property.comment.as_ref()) {
        lines.push(text.clone());
    }
    if let Some(note) = &property.scope_note {
        lines.push(note.clone());
    }
    if let Some(example) = &property.example {
        lines.push(example.clone());
    }
    if !property.domain.is_empty() {
        lines.push(format!("domain: {}", property.domain.join(", ")));
    }
    if !property.range.is_empty() {
        lines.push(format!("range: {}", property.range.join(", ")));
    }

    push_hierarchy(
        &mut lines,
        &property.broader,
        &property.narrower,
        &property.related,
    );
    push_expansion(&mut lines, &property.iri);
    lines.join("\n")
}

fn push_hierarchy(lines: &mut Vec<String>, broader: &[String], narrower: &[String], related: &[String]) {
    for (tag, iris) in [("broader", broader), ("narrower", narrower), ("related", related)] {
        if !iris.is_empty() {
            let names: Vec<&str> = iris.iter().map(|iri| local_name(iri)).collect();
            lines.push(format!("{tag}: {}", names.join(", ")));
        }
    }
}

/// Split-word and bigram expansion of everything composed so far, plus the
/// IRI local name. `playsFor` becomes `plays for` and `plays_for`.
fn push_expansion(lines: &mut Vec<String>, iri: &str) {
    let mut stream = text::words(&lines.join(" "));
    stream.extend(text::words(local_name(iri)));
    if !stream.is_empty() {
        lines.push(stream.join(" "));
    }
    let pairs = text::bigrams(&stream);
    if !pairs.is_empty() {
        lines.push(pairs.join(" "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::parse_ontology;

    const TTL: &str = r#"
@prefix rdfs: <http://www.w3.org/2000/01/rdf-schema#> .
@prefix owl: <http://www.w3.org/2002/07/owl#> .
@prefix skos: <http://www.w3.org/2004/02/skos/core#> .
@prefix : <http://o/> .

:Player a owl:Class ;
    rdfs:label "Player" ;
    skos:altLabel "footballer" ;
    rdfs:comment "A professional football player." .

:playsFor a owl:ObjectProperty ;
    rdfs:domain :Player ;
    rdfs:range :Team .
"#;

    #[test]
    fn class_document_carries_synonyms_and_properties() {
        let ctx = parse_ontology(TTL).unwrap();
        let docs = build_documents(&ctx);
        let player = docs
            .iter()
            .find(|d| d.iri == "http://o/Player")
            .expect("player document");
        assert_eq!(player.kind, DocumentKind::Class);
        assert!(player.text.contains("synonyms: footballer"));
        assert!(player.text.contains("professional football player"));
        assert!(player.text.contains("properties: playsFor"));
    }

    #[test]
    fn property_document_splits_camel_case() {
        let ctx = parse_ontology(TTL).unwrap();
        let docs = build_documents(&ctx);
        let plays_for = docs
            .iter()
            .find(|d| d.iri == "http://o/playsFor")
            .expect("property document");
        assert_eq!(plays_for.kind, DocumentKind::Property);
        assert!(plays_for.text.contains("plays for"), "split words indexed");
        assert!(plays_for.text.contains("plays_for"), "bigrams indexed");
        assert!(plays_for.text.contains("domain: Player"));
        assert!(plays_for.text.contains("range: Team"));
    }

    #[test]
    fn expansion_stays_out_of_the_model() {
        let ctx = parse_ontology(TTL).unwrap();
        let player = ctx.class("http://o/Player").unwrap();
        assert_eq!(player.alt_labels, vec!["footballer".to_string()]);
        assert!(player.comment.as_deref().unwrap().contains("professional"));
    }
}
