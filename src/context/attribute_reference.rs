use std::fmt;

use serde::{Serialize, Serializer};

/// Reference to a context attribute, possibly nested inside an object-valued attribute.
///
/// A reference that does not start with `/` names a top-level attribute literally (`"a/b"` is the
/// attribute called `a/b`). A reference starting with `/` is a path: components are separated by
/// `/`, and inside a component `~1` stands for `/` and `~0` for `~`.
///
/// Invalid references (empty string, empty path component, dangling `~`) are kept so they can be
/// reported, but never match anything.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttributeReference {
    raw: String,
    components: Result<Vec<String>, AttributeReferenceError>,
}

/// Why an [`AttributeReference`] is invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeReferenceError {
    /// The reference is an empty string.
    Empty,
    /// A path has an empty component (`/`, `//a`, `/a/`).
    EmptyComponent,
    /// A `~` is not followed by `0` or `1`.
    InvalidEscape,
}

impl fmt::Display for AttributeReferenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AttributeReferenceError::Empty => "attribute reference is empty",
            AttributeReferenceError::EmptyComponent => "attribute reference has an empty component",
            AttributeReferenceError::InvalidEscape => "attribute reference has an invalid escape",
        })
    }
}

impl AttributeReference {
    /// Parse a reference.
    pub fn new(raw: impl Into<String>) -> AttributeReference {
        let raw = raw.into();
        let components = parse(&raw);
        AttributeReference { raw, components }
    }

    /// Reference to a top-level attribute, without path interpretation.
    pub fn from_literal(name: impl Into<String>) -> AttributeReference {
        let name = name.into();
        let components = if name.is_empty() {
            Err(AttributeReferenceError::Empty)
        } else {
            Ok(vec![name.clone()])
        };
        AttributeReference {
            raw: name,
            components,
        }
    }

    /// The reference as originally written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    #[allow(missing_docs)]
    pub fn is_valid(&self) -> bool {
        self.components.is_ok()
    }

    #[allow(missing_docs)]
    pub fn error(&self) -> Option<AttributeReferenceError> {
        self.components.as_ref().err().copied()
    }

    /// Unescaped path components. Empty for invalid references.
    pub fn components(&self) -> &[String] {
        self.components.as_deref().unwrap_or(&[])
    }

    /// Name of the top-level attribute this reference starts at.
    pub fn top_level(&self) -> Option<&str> {
        self.components().first().map(String::as_str)
    }
}

fn parse(raw: &str) -> Result<Vec<String>, AttributeReferenceError> {
    if raw.is_empty() {
        return Err(AttributeReferenceError::Empty);
    }
    let Some(path) = raw.strip_prefix('/') else {
        return Ok(vec![raw.to_owned()]);
    };
    path.split('/').map(unescape).collect()
}

fn unescape(component: &str) -> Result<String, AttributeReferenceError> {
    if component.is_empty() {
        return Err(AttributeReferenceError::EmptyComponent);
    }
    let mut result = String::with_capacity(component.len());
    let mut chars = component.chars();
    while let Some(c) = chars.next() {
        if c != '~' {
            result.push(c);
            continue;
        }
        match chars.next() {
            Some('0') => result.push('~'),
            Some('1') => result.push('/'),
            _ => return Err(AttributeReferenceError::InvalidEscape),
        }
    }
    Ok(result)
}

impl fmt::Display for AttributeReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl From<&str> for AttributeReference {
    fn from(value: &str) -> Self {
        AttributeReference::new(value)
    }
}

impl From<String> for AttributeReference {
    fn from(value: String) -> Self {
        AttributeReference::new(value)
    }
}

impl Serialize for AttributeReference {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}
