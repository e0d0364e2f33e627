//! Prompt rendering for the extraction and typing stages.
//!
//! Prompts and schemas come from the same stage spec: the quick-reference
//! lists printed here are the canonical member lists of the sets the
//! schema validates against. The IRI-copying instruction is load-bearing -
//! the most common model failure is re-deriving a camelCase local name
//! from a label instead of copying the PascalCase IRI.

use std::fmt::Write as _;

use ontograph_llm::gateway::Prompt;
use ontograph_llm::schema::CanonicalSet;

use crate::stages::{Rule, Severity};

const SYSTEM_PROMPT: &str = "You are an information-extraction engine. You read a text passage and \
     emit only JSON that conforms exactly to the requested shape. You never \
     add commentary, markdown, or fields that were not asked for.";

/// A class as shown to the model.
#[derive(Debug, Clone)]
pub struct ClassBrief {
    pub iri: String,
    pub label: String,
    pub gloss: Option<String>,
}

/// A property as shown to the model.
#[derive(Debug, Clone)]
pub struct PropertyBrief {
    pub iri: String,
    pub label: String,
    pub domain: String,
    pub range: String,
    pub datatype: bool,
    pub gloss: Option<String>,
}

/// A typed entity as shown to the relation pass.
#[derive(Debug, Clone)]
pub struct EntityBrief {
    pub id: String,
    pub mention: String,
    pub types: Vec<String>,
}

pub fn render_rules(rules: &[Rule]) -> String {
    let mut out = String::from("Rules:\n");
    for rule in rules {
        let tag = match rule.severity {
            Severity::Error => "ERROR",
            Severity::Warning => "WARNING",
        };
        let _ = writeln!(out, "[{tag}] {}", rule.text);
    }
    out
}

fn quick_reference(title: &str, set: &CanonicalSet) -> String {
    let mut out = format!("Quick reference - {title}:\n");
    for member in set.members() {
        let _ = writeln!(out, "{member}");
    }
    out
}

const COPY_IRIS: &str = "Copy IRIs character-for-character from the quick reference above. Never \
     re-case an IRI and never derive one from a label.";

pub fn mention_prompt(chunk_text: &str, rules: &[Rule]) -> Prompt {
    let user = format!(
        "Task: list every span in the text that denotes a real-world entity \
         (people, organisations, places, artifacts, events). For each span \
         emit {{\"id\", \"mention\", \"context\"}}.\n\n\
         Text:\n\"\"\"\n{chunk_text}\n\"\"\"\n\n{}",
        render_rules(rules)
    );
    Prompt::user(user).with_system(SYSTEM_PROMPT)
}

pub fn entity_prompt(
    chunk_text: &str,
    classes: &[ClassBrief],
    class_set: &CanonicalSet,
    attributes: &[PropertyBrief],
    attribute_set: &CanonicalSet,
    rules: &[Rule],
) -> Prompt {
    let mut listing = String::from("Ontology classes (IRI - label: description):\n");
    for class in classes {
        match &class.gloss {
            Some(gloss) => {
                let _ = writeln!(listing, "- {} - {}: {}", class.iri, class.label, gloss);
            }
            None => {
                let _ = writeln!(listing, "- {} - {}", class.iri, class.label);
            }
        }
    }
    if !attributes.is_empty() {
        let _ = writeln!(listing, "\nDatatype properties usable as attribute keys:");
        for attribute in attributes {
            let _ = writeln!(
                listing,
                "- {} - {} (domain: {}, range: {})",
                attribute.iri, attribute.label, attribute.domain, attribute.range
            );
        }
    }

    let mut reference = quick_reference("allowed class IRIs", class_set);
    if !attribute_set.is_empty() {
        reference.push('\n');
        reference.push_str(&quick_reference("allowed attribute IRIs", attribute_set));
    }

    let user = format!(
        "Task: extract the typed entities present in the text. For each \
         entity emit {{\"id\", \"mention\", \"types\", \"attributes\"}}, where \
         types lists ontology class IRIs and attributes maps datatype \
         property IRIs to literal values stated in the text.\n\n\
         Text:\n\"\"\"\n{chunk_text}\n\"\"\"\n\n{listing}\n{reference}\n{}\n{COPY_IRIS}",
        render_rules(rules)
    );
    Prompt::user(user).with_system(SYSTEM_PROMPT)
}

pub fn relation_prompt(
    chunk_text: &str,
    entities: &[EntityBrief],
    properties: &[PropertyBrief],
    property_set: &CanonicalSet,
    entity_set: &CanonicalSet,
    rules: &[Rule],
) -> Prompt {
    let mut listing = String::from("Extracted entities (id - mention [types]):\n");
    for entity in entities {
        let _ = writeln!(
            listing,
            "- {} - {} [{}]",
            entity.id,
            entity.mention,
            entity.types.join(", ")
        );
    }
    let _ = writeln!(listing, "\nAllowed properties (IRI - label, domain → range):");
    for property in properties {
        let kind = if property.datatype { "literal" } else { "entity" };
        match &property.gloss {
            Some(gloss) => {
                let _ = writeln!(
                    listing,
                    "- {} - {}, {} → {} ({} object): {}",
                    property.iri, property.label, property.domain, property.range, kind, gloss
                );
            }
            None => {
                let _ = writeln!(
                    listing,
                    "- {} - {}, {} → {} ({} object)",
                    property.iri, property.label, property.domain, property.range, kind
                );
            }
        }
    }

    let mut reference = quick_reference("allowed property IRIs", property_set);
    reference.push('\n');
    reference.push_str(&quick_reference("allowed entity ids", entity_set));

    let user = format!(
        "Task: extract the relations the text states between the entities \
         below. For each relation emit {{\"subject\", \"predicate\", \
         \"object\"}}.\n\n\
         Text:\n\"\"\"\n{chunk_text}\n\"\"\"\n\n{listing}\n{reference}\n{}\n{COPY_IRIS}",
        render_rules(rules)
    );
    Prompt::user(user).with_system(SYSTEM_PROMPT)
}
