//! Route templates used by cache policies and invalidation rules
//!
//! A template is a `/`-separated path where a segment may be a literal, a
//! `:name` capture or, in last position only, a `*` matching any remainder.

use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    Rest,
}

/// Parsed route template such as `/items/:id` or `/static/*`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePattern {
    raw: String,
    segments: Vec<Segment>,
}

/// Captured `:param` values keyed by name
pub type RouteParams = HashMap<String, String>;

/// Errors raised while parsing a route template
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error("route `{0}` must start with `/`")]
    NotAbsolute(String),

    #[error("route `{0}` has an unnamed parameter")]
    UnnamedParam(String),

    #[error("route `{0}` uses `*` before its last segment")]
    MisplacedWildcard(String),
}

impl RoutePattern {
    pub fn parse(route: &str) -> Result<Self, RouteError> {
        if !route.starts_with('/') {
            return Err(RouteError::NotAbsolute(route.to_string()));
        }

        let parts: Vec<&str> = route.split('/').filter(|s| !s.is_empty()).collect();
        let mut segments = Vec::with_capacity(parts.len());
        for (index, part) in parts.iter().enumerate() {
            let segment = if *part == "*" {
                if index + 1 != parts.len() {
                    return Err(RouteError::MisplacedWildcard(route.to_string()));
                }
                Segment::Rest
            } else if let Some(name) = part.strip_prefix(':') {
                if name.is_empty() {
                    return Err(RouteError::UnnamedParam(route.to_string()));
                }
                Segment::Param(name.to_string())
            } else {
                Segment::Literal(part.to_string())
            };
            segments.push(segment);
        }

        Ok(Self {
            raw: route.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Match a normalized path, returning the captured parameters
    pub fn matches(&self, path: &str) -> Option<RouteParams> {
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut params = RouteParams::new();

        for (index, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Rest => return Some(params),
                Segment::Literal(literal) => {
                    if parts.get(index) != Some(&literal.as_str()) {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    let value = parts.get(index)?;
                    params.insert(name.clone(), value.to_string());
                }
            }
        }

        (parts.len() == self.segments.len()).then_some(params)
    }

    /// Ordering key; a higher value is a more specific template
    pub fn specificity(&self) -> (usize, usize, bool) {
        let literals = self
            .segments
            .iter()
            .filter(|s| matches!(s, Segment::Literal(_)))
            .count();
        let has_rest = self.segments.last() == Some(&Segment::Rest);
        (literals, self.segments.len(), !has_rest)
    }
}

impl std::fmt::Display for RoutePattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_and_param_match() {
        let route = RoutePattern::parse("/items/:id").unwrap();
        let params = route.matches("/items/42").unwrap();
        assert_eq!(params.get("id").map(String::as_str), Some("42"));
        assert!(route.matches("/items").is_none());
        assert!(route.matches("/items/42/reviews").is_none());
        assert!(route.matches("/users/42").is_none());
    }

    #[test]
    fn test_trailing_wildcard() {
        let route = RoutePattern::parse("/static/*").unwrap();
        assert!(route.matches("/static").is_some());
        assert!(route.matches("/static/css/site.css").is_some());
        assert!(route.matches("/other").is_none());
    }

    #[test]
    fn test_root() {
        let route = RoutePattern::parse("/").unwrap();
        assert!(route.matches("/").is_some());
        assert!(route.matches("/items").is_none());
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            RoutePattern::parse("items"),
            Err(RouteError::NotAbsolute(_))
        ));
        assert!(matches!(
            RoutePattern::parse("/items/:"),
            Err(RouteError::UnnamedParam(_))
        ));
        assert!(matches!(
            RoutePattern::parse("/*/items"),
            Err(RouteError::MisplacedWildcard(_))
        ));
    }

    #[test]
    fn test_specificity_prefers_literals() {
        let exact = RoutePattern::parse("/items/featured").unwrap();
        let param = RoutePattern::parse("/items/:id").unwrap();
        let rest = RoutePattern::parse("/items/*").unwrap();
        assert!(exact.specificity() > param.specificity());
        assert!(param.specificity() > rest.specificity());
    }
}
