//! Graph serializers: Turtle, N-Triples and expanded JSON-LD
//!
//! Output is deterministic: triples are written in graph order, grouped by
//! subject in first-appearance order. Turtle and N-Triples refuse graphs
//! holding an IRI that is not a valid IRIREF, such as one built from an
//! identifier with a space in it.

use crate::error::RenderError;
use crate::negotiate::normalize_mime;
use crate::render::{vocab, Graph, Term};
use serde_json::{json, Map, Value};
use std::fmt::Write;

pub const TURTLE: &str = "text/turtle";
pub const N_TRIPLES: &str = "application/n-triples";
pub const JSON_LD: &str = "application/ld+json";

/// Shard file extension for a serialized format
pub fn extension_for(mimetype: &str) -> Option<&'static str> {
    match normalize_mime(mimetype).as_str() {
        TURTLE => Some("ttl"),
        N_TRIPLES => Some("nt"),
        JSON_LD => Some("jsonld"),
        _ => None,
    }
}

/// Serialize a graph into a concrete format
pub fn serialize(graph: &Graph, mimetype: &str) -> Result<Vec<u8>, RenderError> {
    match normalize_mime(mimetype).as_str() {
        TURTLE => {
            check_iris(graph)?;
            Ok(turtle(graph).into_bytes())
        }
        N_TRIPLES => {
            check_iris(graph)?;
            Ok(ntriples(graph).into_bytes())
        }
        JSON_LD => Ok(serde_json::to_vec(&jsonld(graph))?),
        other => Err(RenderError::UnsupportedFormat {
            format: other.to_string(),
        }),
    }
}

/// Check an IRI can be written between `<` and `>` unescaped
pub fn is_writable_iri(iri: &str) -> bool {
    !iri.is_empty()
        && !iri
            .chars()
            .any(|c| c <= ' ' || matches!(c, '<' | '>' | '"' | '{' | '}' | '|' | '^' | '`' | '\\'))
}

fn check_iris(graph: &Graph) -> Result<(), RenderError> {
    for t in graph.triples() {
        let object = match &t.object {
            Term::Iri(iri) => Some(iri.as_str()),
            Term::Literal { .. } => None,
        };
        for iri in [Some(t.subject.as_str()), Some(t.predicate.as_str()), object]
            .into_iter()
            .flatten()
        {
            if !is_writable_iri(iri) {
                return Err(RenderError::InvalidIri { iri: iri.to_string() });
            }
        }
    }
    Ok(())
}

fn ntriples(graph: &Graph) -> String {
    let mut out = String::new();
    for t in graph.triples() {
        let _ = writeln!(out, "<{}> <{}> {} .", t.subject, t.predicate, term(&t.object));
    }
    out
}

fn turtle(graph: &Graph) -> String {
    let mut out = String::new();
    for subject in graph.subjects() {
        let mut first = true;
        for t in graph.triples().iter().filter(|t| t.subject == subject) {
            let predicate = if t.predicate == vocab::RDF_TYPE {
                "a".to_string()
            } else {
                format!("<{}>", t.predicate)
            };
            if first {
                let _ = write!(out, "<{}> {} {}", subject, predicate, term(&t.object));
                first = false;
            } else {
                let _ = write!(out, " ;\n    {} {}", predicate, term(&t.object));
            }
        }
        out.push_str(" .\n\n");
    }
    out
}

fn jsonld(graph: &Graph) -> Value {
    let mut nodes = Vec::new();
    for subject in graph.subjects() {
        let mut node = Map::new();
        node.insert("@id".into(), Value::String(subject.to_string()));
        for t in graph.triples().iter().filter(|t| t.subject == subject) {
            if t.predicate == vocab::RDF_TYPE {
                if let Term::Iri(class) = &t.object {
                    push(&mut node, "@type", Value::String(class.clone()));
                    continue;
                }
            }
            let object = match &t.object {
                Term::Iri(iri) => json!({ "@id": iri }),
                Term::Literal {
                    value,
                    datatype: Some(dt),
                } => json!({ "@value": value, "@type": dt }),
                Term::Literal { value, datatype: None } => json!({ "@value": value }),
            };
            push(&mut node, &t.predicate, object);
        }
        nodes.push(Value::Object(node));
    }
    Value::Array(nodes)
}

fn push(node: &mut Map<String, Value>, key: &str, value: Value) {
    match node.entry(key.to_string()).or_insert_with(|| Value::Array(Vec::new())) {
        Value::Array(values) => values.push(value),
        other => *other = Value::Array(vec![other.take(), value]),
    }
}

fn term(object: &Term) -> String {
    match object {
        Term::Iri(iri) => format!("<{}>", iri),
        Term::Literal { value, datatype } => {
            let mut out = String::with_capacity(value.len() + 2);
            out.push('"');
            for c in value.chars() {
                match c {
                    '\\' => out.push_str("\\\\"),
                    '"' => out.push_str("\\\""),
                    '\n' => out.push_str("\\n"),
                    '\r' => out.push_str("\\r"),
                    '\t' => out.push_str("\\t"),
                    c => out.push(c),
                }
            }
            out.push('"');
            if let Some(dt) = datatype {
                let _ = write!(out, "^^<{}>", dt);
            }
            out
        }
    }
}
