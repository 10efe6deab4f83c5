//! Representation building
//!
//! A representation is built in two steps: a [`ViewBuilder`] turns a record
//! into a [`Graph`] for one view, then a serializer turns the graph into
//! bytes for one format. [`EntityRenderer`] holds the closed table of view
//! token to builder entries.

pub mod builder;
pub mod serialize;

pub use builder::{DublinCoreBuilder, FieldMappingBuilder, ViewBuilder};
pub use serialize::{extension_for, serialize};

use crate::catalog::{EntityClass, RegisterCatalog};
use crate::error::RenderError;
use crate::negotiate::{View, ViewSet, ALTERNATES_VIEW};
use crate::source::Record;
use std::collections::HashMap;

/// Well-known vocabulary IRIs
pub mod vocab {
    pub const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";
    pub const RDFS_LABEL: &str = "http://www.w3.org/2000/01/rdf-schema#label";
    pub const RDFS_MEMBER: &str = "http://www.w3.org/2000/01/rdf-schema#member";
    pub const XSD_INTEGER: &str = "http://www.w3.org/2001/XMLSchema#integer";
    pub const XSD_DOUBLE: &str = "http://www.w3.org/2001/XMLSchema#double";
    pub const DCT: &str = "http://purl.org/dc/terms/";
    pub const REG_REGISTER: &str = "http://purl.org/linked-data/registry#Register";
    pub const REG_CONTAINED_ITEM_CLASS: &str = "http://purl.org/linked-data/registry#containedItemClass";
    pub const ALTR: &str = "http://www.w3.org/ns/dx/conneg/altr#";
}

/// RDF term in object position
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    Iri(String),
    Literal { value: String, datatype: Option<String> },
}

impl Term {
    pub fn iri(iri: impl Into<String>) -> Self {
        Term::Iri(iri.into())
    }

    pub fn literal(value: impl Into<String>) -> Self {
        Term::Literal {
            value: value.into(),
            datatype: None,
        }
    }

    pub fn typed(value: impl Into<String>, datatype: &str) -> Self {
        Term::Literal {
            value: value.into(),
            datatype: Some(datatype.to_string()),
        }
    }
}

/// Subject, predicate, object; subjects and predicates are IRIs
#[derive(Debug, Clone, PartialEq)]
pub struct Triple {
    pub subject: String,
    pub predicate: String,
    pub object: Term,
}

/// An ordered set of triples
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Graph {
    triples: Vec<Triple>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, subject: &str, predicate: &str, object: Term) {
        self.triples.push(Triple {
            subject: subject.to_string(),
            predicate: predicate.to_string(),
            object,
        });
    }

    pub fn triples(&self) -> &[Triple] {
        &self.triples
    }

    pub fn len(&self) -> usize {
        self.triples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triples.is_empty()
    }

    /// Distinct subjects in first-appearance order
    pub fn subjects(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for t in &self.triples {
            if !seen.contains(&t.subject.as_str()) {
                seen.push(t.subject.as_str());
            }
        }
        seen
    }
}

/// One member of a register listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingItem {
    pub uri: String,
    pub label: String,
    pub identifier: String,
}

/// What the shared render path hands back
#[derive(Debug, Clone, PartialEq)]
pub enum Representation {
    /// Bytes in a concrete format
    Serialized { mimetype: String, body: Vec<u8> },
    /// Unserialized entity graph (internal format)
    Graph(Graph),
    /// Unserialized register listing (internal format)
    Listing(Vec<ListingItem>),
}

/// View token to builder table
pub struct EntityRenderer {
    builders: HashMap<String, Box<dyn ViewBuilder>>,
}

impl EntityRenderer {
    /// An empty table; every view must be registered
    pub fn new() -> Self {
        Self {
            builders: HashMap::new(),
        }
    }

    /// Register a builder for every view declared in the catalog
    ///
    /// `dct` views get the Dublin Core builder, everything else maps record
    /// fields into the view's namespace.
    pub fn for_catalog(catalog: &RegisterCatalog) -> Self {
        let mut renderer = Self::new();
        for class in &catalog.classes {
            for view in &class.views.views {
                if renderer.builders.contains_key(&view.token) {
                    continue;
                }
                if view.token == "dct" {
                    renderer.register(&view.token, DublinCoreBuilder);
                } else {
                    renderer.register(&view.token, FieldMappingBuilder);
                }
            }
        }
        renderer
    }

    /// Add or replace the builder for a view token
    pub fn register(&mut self, token: &str, builder: impl ViewBuilder + 'static) {
        self.builders.insert(token.to_string(), Box::new(builder));
    }

    pub fn has_builder(&self, token: &str) -> bool {
        token == ALTERNATES_VIEW || self.builders.contains_key(token)
    }

    /// Build the graph of one record in one view
    pub fn build(&self, class: &EntityClass, view: &View, uri: &str, record: &Record) -> Result<Graph, RenderError> {
        if view.token == ALTERNATES_VIEW {
            return Ok(alternates_graph(&class.views, uri));
        }
        let builder = self
            .builders
            .get(&view.token)
            .ok_or_else(|| RenderError::MissingBuilder {
                view: view.token.clone(),
            })?;
        builder.build(class, view, uri, record)
    }

    /// Graph of one register listing page
    pub fn listing_graph(&self, register_uri: &str, member_class: &str, items: &[ListingItem]) -> Graph {
        let mut graph = Graph::new();
        graph.add(register_uri, vocab::RDF_TYPE, Term::iri(vocab::REG_REGISTER));
        graph.add(register_uri, vocab::REG_CONTAINED_ITEM_CLASS, Term::iri(member_class));
        for item in items {
            graph.add(register_uri, vocab::RDFS_MEMBER, Term::iri(&item.uri));
        }
        for item in items {
            graph.add(&item.uri, vocab::RDFS_LABEL, Term::literal(&item.label));
        }
        graph
    }
}

impl Default for EntityRenderer {
    fn default() -> Self {
        Self::new()
    }
}

/// Describe every view of a resource and the formats each offers
pub fn alternates_graph(views: &ViewSet, uri: &str) -> Graph {
    let mut graph = Graph::new();
    let rep_class = format!("{}Representation", vocab::ALTR);
    let has_rep = format!("{}hasRepresentation", vocab::ALTR);
    let has_default = format!("{}hasDefaultRepresentation", vocab::ALTR);
    let conforms_to = format!("{}conformsTo", vocab::DCT);
    let format = format!("{}format", vocab::DCT);

    for view in &views.views {
        let rep = format!("{}?_view={}", uri, view.token);
        graph.add(uri, &has_rep, Term::iri(&rep));
        if view.token == views.default_view {
            graph.add(uri, &has_default, Term::iri(&rep));
        }
        graph.add(&rep, vocab::RDF_TYPE, Term::iri(&rep_class));
        graph.add(&rep, vocab::RDFS_LABEL, Term::literal(&view.label));
        graph.add(&rep, &conforms_to, Term::iri(&view.namespace));
        for mime in &view.formats {
            graph.add(&rep, &format, Term::literal(mime));
        }
    }
    graph
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::gazetteer;

    #[test]
    fn test_for_catalog_covers_every_view() {
        let catalog = gazetteer::catalog();
        let renderer = EntityRenderer::for_catalog(&catalog);
        for class in &catalog.classes {
            for view in &class.views.views {
                assert!(renderer.has_builder(&view.token), "no builder for {}", view.token);
            }
        }
        assert!(renderer.has_builder(ALTERNATES_VIEW));
    }

    #[test]
    fn test_missing_builder() {
        let catalog = gazetteer::catalog();
        let class = catalog.classes.iter().find(|c| c.name == "locality").unwrap();
        let view = class.views.get("gnaf").unwrap();
        let err = EntityRenderer::new()
            .build(class, view, "http://x/LOC1", &Record::new("LOC1"))
            .unwrap_err();
        assert!(matches!(err, RenderError::MissingBuilder { .. }));
    }

    #[test]
    fn test_alternates_lists_views() {
        let catalog = gazetteer::catalog();
        let class = catalog.classes.iter().find(|c| c.name == "address").unwrap();
        let graph = alternates_graph(&class.views, "http://x/A1");
        let reps: Vec<_> = graph
            .triples()
            .iter()
            .filter(|t| t.predicate.ends_with("hasRepresentation"))
            .collect();
        assert_eq!(reps.len(), class.views.views.len());
        assert_eq!(
            graph
                .triples()
                .iter()
                .filter(|t| t.predicate.ends_with("hasDefaultRepresentation"))
                .count(),
            1
        );
    }
}
