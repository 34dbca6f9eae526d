//! Route segments and segment cache keys.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Sentinel segment key for the leaf that holds actual page content.
pub const PAGE_SEGMENT_KEY: &str = "__PAGE__";

/// Sentinel segment key used when a parallel route slot has no matched child.
///
/// A slot holding this segment renders its default placeholder instead of
/// treating the missing match as a not-found.
pub const DEFAULT_SEGMENT_KEY: &str = "__DEFAULT__";

/// The parallel route slot that carries the main content of a layout.
pub const CHILDREN_SLOT: &str = "children";

/// Key under which a cache node is stored in a child segment map.
pub type SegmentKey = String;

/// Name of a parallel route slot.
pub type SlotKey = String;

/// The kind of a dynamic route parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParamKind {
    /// `[id]` - matches a single path component.
    Dynamic,
    /// `[...slug]` - matches the remainder of the path.
    CatchAll,
    /// `[[...slug]]` - like catch-all, but also matches the empty path.
    OptionalCatchAll,
    /// Dynamic parameter inside an interception route.
    InterceptedDynamic,
    /// Catch-all inside an interception route.
    InterceptedCatchAll,
}

/// One path component of a route.
///
/// A segment is either a literal string key or a dynamic parameter carrying
/// the value it matched. The page and default sentinels are ordinary static
/// segments with reserved keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Segment {
    /// A literal path component.
    Static(String),
    /// A dynamic parameter with its matched value.
    Param {
        /// Parameter name as written in the route definition.
        name: String,
        /// The concrete value matched from the URL.
        value: String,
        /// How the parameter matches path components.
        kind: ParamKind,
    },
}

impl Segment {
    /// Create a static segment.
    pub fn literal(key: impl Into<String>) -> Self {
        Self::Static(key.into())
    }

    /// Create a dynamic parameter segment.
    pub fn param(name: impl Into<String>, value: impl Into<String>, kind: ParamKind) -> Self {
        Self::Param {
            name: name.into(),
            value: value.into(),
            kind,
        }
    }

    /// The page sentinel segment.
    pub fn page() -> Self {
        Self::Static(PAGE_SEGMENT_KEY.to_string())
    }

    /// The default sentinel segment.
    pub fn default_slot() -> Self {
        Self::Static(DEFAULT_SEGMENT_KEY.to_string())
    }

    /// Check if this is the page sentinel.
    pub fn is_page(&self) -> bool {
        matches!(self, Self::Static(s) if s == PAGE_SEGMENT_KEY)
    }

    /// Check if this is the default sentinel.
    pub fn is_default(&self) -> bool {
        matches!(self, Self::Static(s) if s == DEFAULT_SEGMENT_KEY)
    }

    /// Check if this segment belongs to an interception route.
    pub fn is_intercepted(&self) -> bool {
        match self {
            Self::Param { kind, .. } => matches!(
                kind,
                ParamKind::InterceptedDynamic | ParamKind::InterceptedCatchAll
            ),
            Self::Static(s) => {
                s.starts_with("(.)") || s.starts_with("(..)") || s.starts_with("(...)")
            }
        }
    }

    /// Derive the stable key under which this segment's cache node is stored.
    ///
    /// Static segments key on their literal text; dynamic segments key on the
    /// matched *value*, so that `/product/1` and `/product/2` occupy distinct
    /// cache slots under the same route position.
    pub fn cache_key(&self) -> SegmentKey {
        match self {
            Self::Static(s) => s.clone(),
            Self::Param { value, .. } => value.clone(),
        }
    }

    /// Structural ("shape") equality used when splicing tree patches.
    ///
    /// Static segments match by literal text. Dynamic segments match by
    /// parameter name and kind regardless of the matched value, so a patch
    /// for `/product/2` applies on top of a tree currently at `/product/1`.
    pub fn matches_shape(&self, other: &Segment) -> bool {
        match (self, other) {
            (Self::Static(a), Self::Static(b)) => a == b,
            (
                Self::Param {
                    name: a_name,
                    kind: a_kind,
                    ..
                },
                Self::Param {
                    name: b_name,
                    kind: b_kind,
                    ..
                },
            ) => a_name == b_name && a_kind == b_kind,
            _ => false,
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(s) => write!(f, "{}", s),
            Self::Param { name, value, .. } => write!(f, "[{}={}]", name, value),
        }
    }
}

impl From<&str> for Segment {
    fn from(s: &str) -> Self {
        Self::Static(s.to_string())
    }
}
