//! Cache key derivation
//!
//! `METHOD:normalized_path[?sorted_query][#id=identity]`. The derivation is a
//! pure function of its inputs; parameter order never changes the key.

use crate::domain::RequestDescriptor;

/// Identity used in per-identity keys for anonymous requests
pub const ANONYMOUS_IDENTITY: &str = "anonymous";

/// Collapse duplicate slashes, resolve `.`/`..` and drop the trailing slash
pub fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    if segments.is_empty() {
        return "/".to_string();
    }
    let mut normalized = String::with_capacity(path.len());
    for segment in segments {
        normalized.push('/');
        normalized.push_str(segment);
    }
    normalized
}

/// Query parameters sorted by name then value, joined as `name=value&...`
pub fn canonical_query(query: &[(String, String)]) -> String {
    let mut pairs: Vec<&(String, String)> = query.iter().collect();
    pairs.sort();
    pairs
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join("&")
}

/// Derive the cache key of `request`
pub fn derive_key(request: &RequestDescriptor, vary_by_identity: bool) -> String {
    let mut key = format!(
        "{}:{}",
        request.method.to_ascii_uppercase(),
        normalize_path(&request.path)
    );

    if !request.query.is_empty() {
        key.push('?');
        key.push_str(&canonical_query(&request.query));
    }

    if vary_by_identity {
        key.push_str("#id=");
        key.push_str(request.identity.as_deref().unwrap_or(ANONYMOUS_IDENTITY));
    }

    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/items/42"), "/items/42");
        assert_eq!(normalize_path("//items///42/"), "/items/42");
        assert_eq!(normalize_path("/items/./42"), "/items/42");
        assert_eq!(normalize_path("/items/7/../42"), "/items/42");
        assert_eq!(normalize_path("/../.."), "/");
        assert_eq!(normalize_path(""), "/");
        assert_eq!(normalize_path("/Items/ABC"), "/Items/ABC");
    }

    #[test]
    fn test_plain_get_key() {
        let request = RequestDescriptor::new("GET", "/items/42");
        assert_eq!(derive_key(&request, false), "GET:/items/42");
    }

    #[test]
    fn test_query_order_does_not_change_key() {
        let a = RequestDescriptor::new("GET", "/search").with_raw_query("q=rust&page=2&tag=b&tag=a");
        let b = RequestDescriptor::new("GET", "/search").with_raw_query("tag=a&page=2&tag=b&q=rust");
        assert_eq!(derive_key(&a, false), derive_key(&b, false));
        assert_eq!(derive_key(&a, false), "GET:/search?page=2&q=rust&tag=a&tag=b");
    }

    #[test]
    fn test_identity_dimension() {
        let alice = RequestDescriptor::new("GET", "/me").with_identity("alice");
        let anonymous = RequestDescriptor::new("GET", "/me");

        assert_eq!(derive_key(&alice, true), "GET:/me#id=alice");
        assert_eq!(derive_key(&anonymous, true), "GET:/me#id=anonymous");
        // Without the dimension, identity is ignored
        assert_eq!(derive_key(&alice, false), derive_key(&anonymous, false));
    }
}
