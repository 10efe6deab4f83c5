//! View builders: record to graph for one view

use crate::catalog::EntityClass;
use crate::error::RenderError;
use crate::negotiate::View;
use crate::render::{vocab, Graph, Term};
use crate::source::{FieldValue, Record};

/// Builds the graph of one record in one view
pub trait ViewBuilder: Send + Sync {
    fn build(&self, class: &EntityClass, view: &View, uri: &str, record: &Record) -> Result<Graph, RenderError>;
}

/// Maps every non-null column to a property in the view's namespace
///
/// The subject is typed with the class URI and labelled with the class's
/// label column, falling back to the identifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldMappingBuilder;

impl ViewBuilder for FieldMappingBuilder {
    fn build(&self, class: &EntityClass, view: &View, uri: &str, record: &Record) -> Result<Graph, RenderError> {
        let mut graph = Graph::new();
        graph.add(uri, vocab::RDF_TYPE, Term::iri(&class.class_uri));
        graph.add(uri, vocab::RDFS_LABEL, Term::literal(label(class, record)));

        for (name, value) in &record.fields {
            let object = match value {
                FieldValue::Null => continue,
                FieldValue::Integer(i) => Term::typed(i.to_string(), vocab::XSD_INTEGER),
                FieldValue::Real(r) if r.is_finite() => Term::typed(r.to_string(), vocab::XSD_DOUBLE),
                FieldValue::Real(r) => {
                    return Err(RenderError::Build {
                        view: view.token.clone(),
                        id: record.id.clone(),
                        reason: format!("column '{}' holds non-finite value {}", name, r),
                    })
                }
                FieldValue::Text(s) => Term::literal(s),
            };
            graph.add(uri, &format!("{}{}", view.namespace, name), object);
        }
        Ok(graph)
    }
}

/// Minimal Dublin Core description: identifier, title, type
#[derive(Debug, Clone, Copy, Default)]
pub struct DublinCoreBuilder;

impl ViewBuilder for DublinCoreBuilder {
    fn build(&self, class: &EntityClass, _view: &View, uri: &str, record: &Record) -> Result<Graph, RenderError> {
        let mut graph = Graph::new();
        graph.add(uri, vocab::RDF_TYPE, Term::iri(&class.class_uri));
        graph.add(uri, &format!("{}identifier", vocab::DCT), Term::literal(&record.id));
        graph.add(uri, &format!("{}title", vocab::DCT), Term::literal(label(class, record)));
        graph.add(uri, &format!("{}type", vocab::DCT), Term::iri(&class.class_uri));
        Ok(graph)
    }
}

fn label(class: &EntityClass, record: &Record) -> String {
    class
        .label_column
        .as_deref()
        .and_then(|c| record.text(c))
        .unwrap_or_else(|| record.id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::gazetteer;

    fn locality() -> EntityClass {
        gazetteer::catalog()
            .classes
            .into_iter()
            .find(|c| c.name == "locality")
            .unwrap()
    }

    #[test]
    fn test_field_mapping() {
        let class = locality();
        let view = class.views.get("gnaf").unwrap().clone();
        let record = Record::new("LOC1")
            .with("locality_name", "ACTON")
            .with("postcode", 2601i64)
            .with("retired", FieldValue::Null);

        let graph = FieldMappingBuilder.build(&class, &view, "http://x/LOC1", &record).unwrap();
        // type, label, locality_name, postcode
        assert_eq!(graph.len(), 4);
        assert!(graph.triples().iter().any(|t| t.predicate == vocab::RDFS_LABEL
            && t.object == Term::literal("ACTON")));
        assert!(graph.triples().iter().any(|t| t.predicate.ends_with("gnaf#postcode")
            && t.object == Term::typed("2601", vocab::XSD_INTEGER)));
    }

    #[test]
    fn test_non_finite_real_fails() {
        let class = locality();
        let view = class.views.get("gnaf").unwrap().clone();
        let record = Record::new("LOC1").with("latitude", f64::NAN);
        let err = FieldMappingBuilder.build(&class, &view, "http://x/LOC1", &record).unwrap_err();
        assert!(matches!(err, RenderError::Build { .. }));
    }

    #[test]
    fn test_dublin_core_label_falls_back_to_id() {
        let class = locality();
        let view = class.views.get("dct").unwrap().clone();
        let graph = DublinCoreBuilder
            .build(&class, &view, "http://x/LOC9", &Record::new("LOC9"))
            .unwrap();
        assert!(graph.triples().iter().any(|t| t.predicate.ends_with("title")
            && t.object == Term::literal("LOC9")));
    }
}
