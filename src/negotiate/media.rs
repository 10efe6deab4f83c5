//! Accept header parsing
//!
//! Parses an HTTP `Accept` header into media ranges ranked by quality
//! value. Ranges with `q=0` are left out of the ranking and reported
//! separately by [`refused_ranges`]. Ranges whose `q` parameter does not
//! parse are dropped.

/// A single media range from an Accept header
#[derive(Debug, Clone, PartialEq)]
pub struct MediaRange {
    /// Main type, lowercase (`text`, `application`, `*`)
    pub main: String,

    /// Subtype, lowercase (`turtle`, `ld+json`, `*`)
    pub sub: String,

    /// Quality value in [0, 1]
    pub quality: f32,
}

impl MediaRange {
    /// `*/*`
    pub fn is_any(&self) -> bool {
        self.main == "*" && self.sub == "*"
    }

    /// `type/*`
    pub fn is_type_wildcard(&self) -> bool {
        self.main != "*" && self.sub == "*"
    }

    /// Check whether a concrete mimetype falls inside this range
    pub fn matches(&self, mimetype: &str) -> bool {
        let Some((main, sub)) = mimetype.split_once('/') else {
            return false;
        };
        if self.is_any() {
            return true;
        }
        if self.main != main {
            return false;
        }
        self.sub == "*" || self.sub == sub
    }

    /// 0 for `*/*`, 1 for `type/*`, 2 for a concrete type
    pub fn specificity(&self) -> u8 {
        if self.is_any() {
            0
        } else if self.is_type_wildcard() {
            1
        } else {
            2
        }
    }

    /// The concrete `type/subtype` for non-wildcard ranges
    pub fn essence(&self) -> String {
        format!("{}/{}", self.main, self.sub)
    }
}

/// Lowercase a mimetype and strip its parameters
///
/// `Text/Turtle; charset=utf-8` becomes `text/turtle`.
pub fn normalize_mime(value: &str) -> String {
    value
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Parse an Accept header into ranges, best first
///
/// Ordering is by descending quality; ranges with equal quality keep the
/// order in which the client listed them.
pub fn parse_accept(header: &str) -> Vec<MediaRange> {
    let mut ranges: Vec<MediaRange> = header
        .split(',')
        .filter_map(parse_range)
        .filter(|r| r.quality > 0.0)
        .collect();

    // sort_by is stable, which preserves client order on ties
    ranges.sort_by(|a, b| b.quality.total_cmp(&a.quality));
    ranges
}

/// Ranges the client refused outright with `q=0`
pub fn refused_ranges(header: &str) -> Vec<MediaRange> {
    header
        .split(',')
        .filter_map(parse_range)
        .filter(|r| r.quality == 0.0)
        .collect()
}

fn parse_range(raw: &str) -> Option<MediaRange> {
    let mut parts = raw.split(';');
    let essence = parts.next()?.trim().to_ascii_lowercase();
    let (main, sub) = essence.split_once('/')?;
    if main.is_empty() || sub.is_empty() || (main == "*" && sub != "*") {
        return None;
    }

    let mut quality = 1.0f32;
    for param in parts {
        let Some((key, value)) = param.split_once('=') else {
            continue;
        };
        if key.trim().eq_ignore_ascii_case("q") {
            let q: f32 = value.trim().parse().ok()?;
            if !(0.0..=1.0).contains(&q) {
                return None;
            }
            quality = q;
        }
    }

    Some(MediaRange {
        main: main.trim().to_string(),
        sub: sub.trim().to_string(),
        quality,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ranked() {
        let ranges = parse_accept("text/html;q=0.5, text/turtle, application/ld+json;q=0.9");
        let order: Vec<String> = ranges.iter().map(|r| r.essence()).collect();
        assert_eq!(order, vec!["text/turtle", "application/ld+json", "text/html"]);
    }

    #[test]
    fn test_ties_keep_client_order() {
        let ranges = parse_accept("application/n-triples, text/turtle");
        assert_eq!(ranges[0].essence(), "application/n-triples");
        assert_eq!(ranges[1].essence(), "text/turtle");
    }

    #[test]
    fn test_zero_and_malformed_quality_dropped() {
        let ranges = parse_accept("text/turtle;q=0, application/ld+json;q=abc, */*;q=0.1");
        assert_eq!(ranges.len(), 1);
        assert!(ranges[0].is_any());
    }

    #[test]
    fn test_refused_ranges() {
        let refused = refused_ranges("text/turtle;q=0, */*;q=0.5, application/*;q=0");
        let essences: Vec<String> = refused.iter().map(|r| r.essence()).collect();
        assert_eq!(essences, vec!["text/turtle", "application/*"]);
        assert_eq!(refused[0].specificity(), 2);
        assert_eq!(refused[1].specificity(), 1);
        assert!(refused_ranges("text/turtle, */*").is_empty());
    }

    #[test]
    fn test_garbage_ranges_dropped() {
        assert!(parse_accept("").is_empty());
        assert!(parse_accept("turtle, */html").is_empty());
    }

    #[test]
    fn test_matches() {
        let wildcard = &parse_accept("text/*")[0];
        assert!(wildcard.is_type_wildcard());
        assert!(wildcard.matches("text/turtle"));
        assert!(!wildcard.matches("application/ld+json"));

        let exact = &parse_accept("Application/LD+JSON")[0];
        assert!(exact.matches("application/ld+json"));
    }

    #[test]
    fn test_normalize_mime() {
        assert_eq!(normalize_mime(" Text/Turtle; charset=utf-8"), "text/turtle");
        assert_eq!(normalize_mime("application/n-triples"), "application/n-triples");
    }
}
