//! Ontology records and the shared read-only context.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::iri::IriResolver;

/// Whether a property points at entities or at literals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangeType {
    Object,
    Datatype,
}

/// A class declared in the ontology, with its RDFS and SKOS annotations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassDefinition {
    pub iri: String,
    pub label: Option<String>,
    pub comment: Option<String>,
    /// Additional `skos:prefLabel` values beyond `rdfs:label`.
    pub pref_labels: Vec<String>,
    pub alt_labels: Vec<String>,
    pub hidden_labels: Vec<String>,
    pub definition: Option<String>,
    pub scope_note: Option<String>,
    pub example: Option<String>,
    pub broader: Vec<String>,
    pub narrower: Vec<String>,
    pub related: Vec<String>,
    pub exact_match: Vec<String>,
    pub close_match: Vec<String>,
}

/// A property declared in the ontology.
///
/// `domain` and `range` hold local names (the fragment after `#` or the
/// last `/` segment); property → class linkage matches on those.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyDefinition {
    pub iri: String,
    pub label: Option<String>,
    pub comment: Option<String>,
    pub pref_labels: Vec<String>,
    pub alt_labels: Vec<String>,
    pub hidden_labels: Vec<String>,
    pub definition: Option<String>,
    pub scope_note: Option<String>,
    pub example: Option<String>,
    pub broader: Vec<String>,
    pub narrower: Vec<String>,
    pub related: Vec<String>,
    pub exact_match: Vec<String>,
    pub close_match: Vec<String>,
    pub domain: Vec<String>,
    pub range: Vec<String>,
    pub range_type: RangeType,
    pub functional: bool,
}

impl PropertyDefinition {
    pub fn new(iri: impl Into<String>, range_type: RangeType) -> Self {
        Self {
            iri: iri.into(),
            label: None,
            comment: None,
            pref_labels: Vec::new(),
            alt_labels: Vec::new(),
            hidden_labels: Vec::new(),
            definition: None,
            scope_note: None,
            example: None,
            broader: Vec::new(),
            narrower: Vec::new(),
            related: Vec::new(),
            exact_match: Vec::new(),
            close_match: Vec::new(),
            domain: Vec::new(),
            range: Vec::new(),
            range_type,
            functional: false,
        }
    }

    pub fn is_object_property(&self) -> bool {
        self.range_type == RangeType::Object
    }

    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or_else(|| local_name(&self.iri))
    }
}

impl ClassDefinition {
    pub fn new(iri: impl Into<String>) -> Self {
        Self {
            iri: iri.into(),
            ..Self::default()
        }
    }

    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or_else(|| local_name(&self.iri))
    }
}

/// The fragment after `#`, or the last path segment.
pub fn local_name(iri: &str) -> &str {
    iri.rsplit(['#', '/']).next().unwrap_or(iri)
}

// ============================================================================
// Context
// ============================================================================

/// Immutable view over the loaded ontology, shared by every worker.
#[derive(Debug, Clone, Default)]
pub struct OntologyContext {
    classes: BTreeMap<String, ClassDefinition>,
    properties: BTreeMap<String, PropertyDefinition>,
    resolver: IriResolver,
}

impl OntologyContext {
    pub fn new(
        classes: BTreeMap<String, ClassDefinition>,
        properties: BTreeMap<String, PropertyDefinition>,
    ) -> Self {
        let resolver = IriResolver::from_iris(classes.keys().chain(properties.keys()));
        Self {
            classes,
            properties,
            resolver,
        }
    }

    pub fn class(&self, iri: &str) -> Option<&ClassDefinition> {
        self.classes.get(iri)
    }

    pub fn property(&self, iri: &str) -> Option<&PropertyDefinition> {
        self.properties.get(iri)
    }

    pub fn classes(&self) -> impl Iterator<Item = &ClassDefinition> {
        self.classes.values()
    }

    pub fn properties(&self) -> impl Iterator<Item = &PropertyDefinition> {
        self.properties.values()
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    pub fn property_count(&self) -> usize {
        self.properties.len()
    }

    /// Case-insensitive lookup mapping any casing of a declared IRI back to
    /// its canonical spelling.
    pub fn canonical_iri(&self, iri: &str) -> Option<&str> {
        self.resolver.resolve(iri)
    }

    pub fn resolver(&self) -> &IriResolver {
        &self.resolver
    }

    pub fn contains_class(&self, iri: &str) -> bool {
        self.classes.contains_key(iri)
    }

    pub fn contains_property(&self, iri: &str) -> bool {
        self.properties.contains_key(iri)
    }

    /// Properties whose domain names this class (by local name).
    pub fn properties_for_class(&self, class_iri: &str) -> Vec<&PropertyDefinition> {
        let class_local = local_name(class_iri);
        self.properties
            .values()
            .filter(|p| p.domain.iter().any(|d| d == class_local))
            .collect()
    }

    /// Properties (object and datatype) whose domain intersects any of the
    /// given class IRIs.
    pub fn properties_for_types<'a, I>(&self, types: I) -> Vec<&PropertyDefinition>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let locals: Vec<&str> = types.into_iter().map(local_name).collect();
        self.properties
            .values()
            .filter(|p| p.domain.iter().any(|d| locals.iter().any(|l| l == d)))
            .collect()
    }

    /// Datatype properties applicable to at least one of the given classes.
    pub fn datatype_properties_for_types<'a, I>(&self, types: I) -> Vec<&PropertyDefinition>
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.properties_for_types(types)
            .into_iter()
            .filter(|p| p.range_type == RangeType::Datatype)
            .collect()
    }
}
