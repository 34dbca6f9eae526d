//! URL parsing and canonical href derivation.

use serde::{Deserialize, Serialize};

/// A navigation target, split into the pieces the engine cares about.
///
/// The engine does not need a full URL implementation: it distinguishes
/// same-origin from external targets, derives canonical hrefs for history and
/// cache keys, and carries the hash along for scroll restoration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationUrl {
    /// `scheme://host[:port]` when the input was absolute.
    pub origin: Option<String>,
    /// Path component, always starting with `/`.
    pub pathname: String,
    /// Query string including the leading `?`, or empty.
    pub search: String,
    /// Fragment including the leading `#`, or empty.
    pub hash: String,
}

impl NavigationUrl {
    /// Parse an absolute or origin-relative URL string.
    pub fn parse(input: &str) -> Self {
        let (origin, rest) = match input.find("://") {
            Some(scheme_end) => {
                let after_scheme = scheme_end + 3;
                match input[after_scheme..].find('/') {
                    Some(path_start) => (
                        Some(input[..after_scheme + path_start].to_string()),
                        &input[after_scheme + path_start..],
                    ),
                    None => (Some(input.to_string()), "/"),
                }
            }
            None => (None, input),
        };
        let (rest, hash) = match rest.find('#') {
            Some(i) => (&rest[..i], rest[i..].to_string()),
            None => (rest, String::new()),
        };
        let (pathname, search) = match rest.find('?') {
            Some(i) => (rest[..i].to_string(), rest[i..].to_string()),
            None => (rest.to_string(), String::new()),
        };
        let pathname = if pathname.is_empty() {
            "/".to_string()
        } else {
            pathname
        };
        Self {
            origin,
            pathname,
            search,
            hash,
        }
    }

    /// Whether this target leaves the application's origin.
    pub fn is_external(&self, app_origin: &str) -> bool {
        match &self.origin {
            Some(origin) => origin != app_origin,
            None => false,
        }
    }

    /// Canonical href: pathname + search + hash, origin-relative.
    pub fn href(&self) -> String {
        format!("{}{}{}", self.pathname, self.search, self.hash)
    }

    /// Href without the hash, used for cache keys and data requests.
    pub fn href_without_hash(&self) -> String {
        format!("{}{}", self.pathname, self.search)
    }

    /// The hash fragment without the leading `#`, if present.
    pub fn hash_fragment(&self) -> Option<String> {
        self.hash
            .strip_prefix('#')
            .filter(|frag| !frag.is_empty())
            .map(String::from)
    }

    /// The full URL string, restoring the origin when one was given.
    pub fn to_full_string(&self) -> String {
        match &self.origin {
            Some(origin) => format!("{}{}", origin, self.href()),
            None => self.href(),
        }
    }
}

impl std::fmt::Display for NavigationUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_full_string())
    }
}
