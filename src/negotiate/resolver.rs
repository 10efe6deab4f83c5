//! View/format resolution
//!
//! [`resolve`] is a pure function of its inputs. The live request handler
//! and the harvester both call it, so a harvested record is byte-for-byte
//! what a client asking the same question would get.

use crate::error::NegotiationError;
use crate::negotiate::media::{normalize_mime, parse_accept, refused_ranges, MediaRange};
use crate::negotiate::view::{View, ViewSet};

/// Format token that skips serialization and hands back the in-memory
/// structure. Only in-process callers may use it.
pub const INTERNAL_FORMAT: &str = "_internal";

/// Who is asking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// A request that arrived from outside the process
    External,
    /// A direct call from the harvester or discovery
    InProcess,
}

/// Negotiation inputs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiationRequest<'a> {
    /// `_view` query parameter
    pub view: Option<&'a str>,

    /// `_format` query parameter; takes precedence over `accept`
    pub format: Option<&'a str>,

    /// `Accept` header
    pub accept: Option<&'a str>,

    pub origin: Origin,
}

impl<'a> NegotiationRequest<'a> {
    /// A request as received from a client
    pub fn external(view: Option<&'a str>, format: Option<&'a str>, accept: Option<&'a str>) -> Self {
        Self {
            view,
            format,
            accept,
            origin: Origin::External,
        }
    }

    /// A direct call from inside the process
    pub fn in_process(view: Option<&'a str>, format: Option<&'a str>) -> Self {
        Self {
            view,
            format,
            accept: None,
            origin: Origin::InProcess,
        }
    }
}

/// The chosen serialization
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Format {
    /// A concrete mimetype from the view's supported formats
    Media(String),
    /// The in-memory structure, unserialized
    Internal,
}

impl Format {
    /// Mimetype for serialized formats
    pub fn mimetype(&self) -> Option<&str> {
        match self {
            Format::Media(m) => Some(m),
            Format::Internal => None,
        }
    }
}

/// Successful negotiation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiated {
    /// Token of the chosen view
    pub view: String,

    pub format: Format,
}

/// Resolve the (view, format) pair for a request against a class's views
pub fn resolve(request: &NegotiationRequest<'_>, views: &ViewSet) -> Result<Negotiated, NegotiationError> {
    let token = request
        .view
        .filter(|v| !v.trim().is_empty())
        .unwrap_or(views.default_view.as_str());

    let view = views.get(token).ok_or_else(|| NegotiationError::UnknownView {
        view: token.to_string(),
        available: views.tokens(),
    })?;

    let format = match request.format.filter(|f| !f.trim().is_empty()) {
        Some(requested) => explicit_format(view, requested, request.origin)?,
        None => Format::Media(accepted_format(view, request.accept).to_string()),
    };

    Ok(Negotiated {
        view: view.token.clone(),
        format,
    })
}

fn explicit_format(view: &View, requested: &str, origin: Origin) -> Result<Format, NegotiationError> {
    if requested.trim() == INTERNAL_FORMAT {
        return match origin {
            Origin::InProcess => Ok(Format::Internal),
            Origin::External => Err(unsupported(view, requested)),
        };
    }

    view.supported(requested)
        .map(|f| Format::Media(f.to_string()))
        .ok_or_else(|| unsupported(view, requested))
}

/// Pick the first supported format the client accepts
///
/// A wildcard never selects a format that a more specific `q=0` range
/// refused. An unusable or missing Accept header falls back to the view
/// default, or to the first supported format the client did not refuse.
fn accepted_format<'v>(view: &'v View, accept: Option<&str>) -> &'v str {
    let default = view.default_format.as_str();
    let Some(header) = accept.filter(|h| !h.trim().is_empty()) else {
        return default;
    };

    let refused = refused_ranges(header);
    let candidates = || std::iter::once(default).chain(view.formats.iter().map(String::as_str));
    let refuses = |range: &MediaRange, format: &str| {
        let mime = normalize_mime(format);
        refused
            .iter()
            .any(|r| r.specificity() > range.specificity() && r.matches(&mime))
    };

    for range in parse_accept(header) {
        if range.is_any() || range.is_type_wildcard() {
            if let Some(f) = candidates().find(|f| range.matches(&normalize_mime(f)) && !refuses(&range, *f)) {
                return f;
            }
            continue;
        }
        if let Some(f) = view.supported(&range.essence()) {
            return f;
        }
    }

    let anything = MediaRange {
        main: "*".to_string(),
        sub: "*".to_string(),
        quality: 0.0,
    };
    candidates().find(|f| !refuses(&anything, *f)).unwrap_or(default)
}

fn unsupported(view: &View, requested: &str) -> NegotiationError {
    NegotiationError::UnsupportedFormat {
        view: view.token.clone(),
        format: requested.to_string(),
        supported: view.formats.join(", "),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::negotiate::view::ALTERNATES_VIEW;

    fn address_views() -> ViewSet {
        ViewSet::new(
            "gnaf",
            vec![
                View::new(
                    "gnaf",
                    "G-NAF",
                    "http://linked.data.gov.au/def/gnaf#",
                    &["text/turtle", "application/n-triples", "application/ld+json"],
                ),
                View::new(
                    "schemaorg",
                    "schema.org",
                    "https://schema.org/",
                    &["application/ld+json", "text/turtle"],
                ),
            ],
        )
    }

    fn media(m: &str) -> Format {
        Format::Media(m.to_string())
    }

    #[test]
    fn test_accept_turtle_uses_default_view() {
        let req = NegotiationRequest::external(None, None, Some("text/turtle"));
        let out = resolve(&req, &address_views()).unwrap();
        assert_eq!(out.view, "gnaf");
        assert_eq!(out.format, media("text/turtle"));
    }

    #[test]
    fn test_unsupported_explicit_format_fails() {
        let req = NegotiationRequest::external(None, Some("application/pdf"), None);
        let err = resolve(&req, &address_views()).unwrap_err();
        assert!(matches!(err, NegotiationError::UnsupportedFormat { ref format, .. } if format == "application/pdf"));
    }

    #[test]
    fn test_format_param_beats_accept() {
        let req = NegotiationRequest::external(
            Some("gnaf"),
            Some("application/ld+json"),
            Some("text/turtle"),
        );
        let out = resolve(&req, &address_views()).unwrap();
        assert_eq!(out.format, media("application/ld+json"));
    }

    #[test]
    fn test_unknown_view() {
        let req = NegotiationRequest::external(Some("ISO19160"), None, None);
        let err = resolve(&req, &address_views()).unwrap_err();
        match err {
            NegotiationError::UnknownView { view, available } => {
                assert_eq!(view, "ISO19160");
                assert!(available.contains("schemaorg"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_missing_or_wildcard_accept_uses_default_format() {
        let views = address_views();
        for accept in [None, Some(""), Some("*/*"), Some("text/html, */*;q=0.8")] {
            let req = NegotiationRequest::external(Some("schemaorg"), None, accept);
            assert_eq!(resolve(&req, &views).unwrap().format, media("application/ld+json"));
        }
    }

    #[test]
    fn test_unacceptable_accept_falls_back_to_default() {
        let req = NegotiationRequest::external(None, None, Some("text/html, application/xml"));
        assert_eq!(resolve(&req, &address_views()).unwrap().format, media("text/turtle"));
    }

    #[test]
    fn test_quality_ranking() {
        let req = NegotiationRequest::external(
            None,
            None,
            Some("text/turtle;q=0.4, application/ld+json;q=0.9"),
        );
        assert_eq!(resolve(&req, &address_views()).unwrap().format, media("application/ld+json"));
    }

    #[test]
    fn test_type_wildcard() {
        let req = NegotiationRequest::external(Some("schemaorg"), None, Some("text/*"));
        assert_eq!(resolve(&req, &address_views()).unwrap().format, media("text/turtle"));

        let req = NegotiationRequest::external(Some("gnaf"), None, Some("application/*"));
        assert_eq!(
            resolve(&req, &address_views()).unwrap().format,
            media("application/n-triples")
        );
    }

    #[test]
    fn test_wildcard_skips_refused_format() {
        let views = address_views();
        let req = NegotiationRequest::external(None, None, Some("text/turtle;q=0, */*;q=0.5"));
        assert_eq!(resolve(&req, &views).unwrap().format, media("application/n-triples"));

        let req = NegotiationRequest::external(Some("schemaorg"), None, Some("application/*;q=0, */*"));
        assert_eq!(resolve(&req, &views).unwrap().format, media("text/turtle"));

        // An explicit range beats a refused wildcard
        let req = NegotiationRequest::external(None, None, Some("text/*;q=0, text/turtle"));
        assert_eq!(resolve(&req, &views).unwrap().format, media("text/turtle"));
    }

    #[test]
    fn test_fallback_avoids_refused_default() {
        let req = NegotiationRequest::external(None, None, Some("text/turtle;q=0, text/html"));
        assert_eq!(resolve(&req, &address_views()).unwrap().format, media("application/n-triples"));
    }

    #[test]
    fn test_internal_format_only_in_process() {
        let views = address_views();
        let external = NegotiationRequest::external(None, Some(INTERNAL_FORMAT), None);
        assert!(matches!(
            resolve(&external, &views),
            Err(NegotiationError::UnsupportedFormat { .. })
        ));

        let internal = NegotiationRequest::in_process(None, Some(INTERNAL_FORMAT));
        assert_eq!(resolve(&internal, &views).unwrap().format, Format::Internal);
    }

    #[test]
    fn test_alternates_always_available() {
        let req = NegotiationRequest::external(Some(ALTERNATES_VIEW), None, None);
        let out = resolve(&req, &address_views()).unwrap();
        assert_eq!(out.view, ALTERNATES_VIEW);
        assert_eq!(out.format, media("text/turtle"));
    }

    #[test]
    fn test_deterministic() {
        let views = address_views();
        let inputs = [
            (None, None, Some("application/ld+json;q=0.5, text/turtle")),
            (Some("schemaorg"), Some("text/turtle"), None),
            (Some("gnaf"), None, Some("*/*")),
        ];
        for (view, format, accept) in inputs {
            let req = NegotiationRequest::external(view, format, accept);
            let first = resolve(&req, &views);
            for _ in 0..10 {
                assert_eq!(resolve(&req, &views), first);
            }
        }
    }
}
