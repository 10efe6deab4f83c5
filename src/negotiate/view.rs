//! Views: named semantic perspectives on an entity
//!
//! Each entity class owns a [`ViewSet`]: an ordered set of views, one of
//! which is the default. Views are defined once in the catalog and only
//! looked up during a run.

use crate::negotiate::media::normalize_mime;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Token of the view listing a register's members
pub const LISTING_VIEW: &str = "listing";

/// Reserved token of the view describing a resource's other views
pub const ALTERNATES_VIEW: &str = "alternates";

/// Formats every alternates view can be served in
const ALTERNATES_FORMATS: &[&str] = &["text/turtle", "application/ld+json", "application/n-triples"];

static ALTERNATES: LazyLock<View> = LazyLock::new(|| View {
    token: ALTERNATES_VIEW.to_string(),
    label: "Alternates".to_string(),
    namespace: "http://www.w3.org/ns/dx/conneg/altr#".to_string(),
    formats: ALTERNATES_FORMATS.iter().map(|f| f.to_string()).collect(),
    default_format: ALTERNATES_FORMATS[0].to_string(),
});

/// A view of an entity class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct View {
    /// Token used in the `_view` query parameter
    pub token: String,

    /// Human-readable label
    pub label: String,

    /// Vocabulary namespace the view's properties live in
    pub namespace: String,

    /// Supported mimetypes, in preference order
    pub formats: Vec<String>,

    /// Mimetype used when the client expresses no usable preference
    pub default_format: String,
}

impl View {
    /// Create a view; the first format is the default
    pub fn new(token: &str, label: &str, namespace: &str, formats: &[&str]) -> Self {
        let formats: Vec<String> = formats.iter().map(|f| f.to_string()).collect();
        let default_format = formats.first().cloned().unwrap_or_default();
        Self {
            token: token.to_string(),
            label: label.to_string(),
            namespace: namespace.to_string(),
            formats,
            default_format,
        }
    }

    /// Override the default format
    pub fn with_default_format(mut self, format: &str) -> Self {
        self.default_format = format.to_string();
        self
    }

    /// Find the supported format equal to `mimetype`, ignoring case and parameters
    pub fn supported(&self, mimetype: &str) -> Option<&str> {
        let wanted = normalize_mime(mimetype);
        self.formats
            .iter()
            .find(|f| normalize_mime(f) == wanted)
            .map(String::as_str)
    }

    /// The reserved alternates view
    pub fn alternates() -> &'static View {
        &ALTERNATES
    }
}

/// The views offered by one entity class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewSet {
    /// Token of the view used when `_view` is absent
    pub default_view: String,

    /// Views in declaration order
    pub views: Vec<View>,
}

impl ViewSet {
    pub fn new(default_view: &str, views: Vec<View>) -> Self {
        Self {
            default_view: default_view.to_string(),
            views,
        }
    }

    /// Look up a view by token; the alternates view is always present
    pub fn get(&self, token: &str) -> Option<&View> {
        if token == ALTERNATES_VIEW {
            return Some(View::alternates());
        }
        self.views.iter().find(|v| v.token == token)
    }

    /// Declared view tokens, comma separated
    pub fn tokens(&self) -> String {
        self.views
            .iter()
            .map(|v| v.token.as_str())
            .chain(std::iter::once(ALTERNATES_VIEW))
            .collect::<Vec<_>>()
            .join(", ")
    }
}
