//! Evaluation contexts.
//!
//! A [`Context`] is made of one or more [`KindEntry`]s, each describing one kind of entity (a
//! user, a device, an organization...). Contexts are assembled with [`ContextBuilder`] or parsed
//! from a [`Value`] tree with [`Context::from_value`], and are immutable afterwards.
//!
//! Building never fails because of bad data: an unusable context reports itself through
//! [`Context::valid`] and [`Context::errors`], and evaluating flags against it returns the fallback
//! value.
mod attribute_reference;
mod builder;
mod tree;

use std::sync::OnceLock;

use regex::Regex;

use crate::value::{Object, ObjectBuilder, Value};

pub use attribute_reference::{AttributeReference, AttributeReferenceError};
pub use builder::ContextBuilder;

/// Kind used when a context does not say otherwise.
pub const DEFAULT_KIND: &str = "user";

const MULTI_KIND: &str = "multi";

/// One kind of entity inside a [`Context`].
#[derive(Debug, Clone, PartialEq)]
pub struct KindEntry {
    pub(crate) kind: String,
    pub(crate) key: String,
    pub(crate) name: Option<String>,
    pub(crate) anonymous: bool,
    pub(crate) attributes: Object,
    pub(crate) private_attributes: Vec<AttributeReference>,
}

impl KindEntry {
    pub(crate) fn new(kind: String, key: String) -> KindEntry {
        KindEntry {
            kind,
            key,
            name: None,
            anonymous: false,
            attributes: Object::new(),
            private_attributes: Vec::new(),
        }
    }

    #[allow(missing_docs)]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    #[allow(missing_docs)]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[allow(missing_docs)]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[allow(missing_docs)]
    pub fn anonymous(&self) -> bool {
        self.anonymous
    }

    /// Custom attributes. Built-in attributes (`key`, `name`, `anonymous`) are not included.
    pub fn attributes(&self) -> &Object {
        &self.attributes
    }

    /// Attributes marked for redaction from analytics events.
    pub fn private_attributes(&self) -> &[AttributeReference] {
        &self.private_attributes
    }

    pub(crate) fn add_private_attribute(&mut self, reference: AttributeReference) {
        if !self.private_attributes.contains(&reference) {
            self.private_attributes.push(reference);
        }
    }

    /// Resolve an attribute reference, including built-in attributes and nested object
    /// properties.
    pub fn get_value(&self, reference: &AttributeReference) -> Option<Value> {
        let (first, rest) = reference.components().split_first()?;
        let top = match first.as_str() {
            "kind" => Value::String(self.kind.clone()),
            "key" => Value::String(self.key.clone()),
            "name" => Value::String(self.name.clone()?),
            "anonymous" => Value::Bool(self.anonymous),
            other => self.attributes.get(other)?.clone(),
        };
        rest.iter()
            .try_fold(top, |value, component| value.get(component).cloned())
    }

    fn body(&self, include_kind: bool) -> Value {
        let mut object = ObjectBuilder::new();
        if include_kind {
            object = object.set("kind", self.kind.as_str());
        }
        object = object.set("key", self.key.as_str());
        if let Some(name) = &self.name {
            object = object.set("name", name.as_str());
        }
        if self.anonymous {
            object = object.set("anonymous", true);
        }
        for (name, value) in &self.attributes {
            object = object.set(name.as_str(), value.clone());
        }
        if !self.private_attributes.is_empty() {
            let references = self
                .private_attributes
                .iter()
                .map(|reference| Value::from(reference.as_str()))
                .collect::<Vec<_>>();
            object = object.set(
                "_meta",
                ObjectBuilder::new()
                    .set("privateAttributes", references)
                    .build(),
            );
        }
        object.build()
    }

    fn problem(&self) -> Option<String> {
        if self.kind == "kind" || self.kind == MULTI_KIND || !kind_pattern().is_match(&self.kind) {
            return Some(format!("kind '{}' is not a valid kind name", self.kind));
        }
        if self.key.is_empty() {
            return Some(format!("kind '{}' requires a non-empty key", self.kind));
        }
        None
    }
}

fn kind_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9._-]+$").expect("kind pattern should compile"))
}

/// An immutable evaluation context.
#[derive(Debug, Clone, PartialEq)]
pub struct Context {
    /// Sorted by kind name.
    entries: Vec<KindEntry>,
    canonical_key: String,
    errors: Option<String>,
}

impl Context {
    pub(crate) fn seal(mut entries: Vec<KindEntry>) -> Context {
        entries.sort_by(|a, b| a.kind.cmp(&b.kind));

        let problems = if entries.is_empty() {
            vec!["context has no kinds".to_owned()]
        } else {
            entries.iter().filter_map(KindEntry::problem).collect()
        };
        let errors = (!problems.is_empty()).then(|| problems.join("; "));

        let canonical_key = canonical_key(&entries);
        Context {
            entries,
            canonical_key,
            errors,
        }
    }

    /// Returns `true` if the context can be used for evaluation.
    pub fn valid(&self) -> bool {
        self.errors.is_none()
    }

    /// Diagnostic describing why the context is invalid.
    pub fn errors(&self) -> Option<&str> {
        self.errors.as_deref()
    }

    /// Key identifying this context as a whole.
    ///
    /// A context made of a single `user` kind uses the user key verbatim. Any other context uses
    /// `kind:key` pairs sorted by kind and joined with `:`, with `%` and `:` inside kinds and keys
    /// escaped as `%25` and `%3A`.
    pub fn canonical_key(&self) -> &str {
        &self.canonical_key
    }

    /// Kind entries, sorted by kind name.
    pub fn kinds(&self) -> impl Iterator<Item = &KindEntry> {
        self.entries.iter()
    }

    /// Look up a kind entry.
    pub fn kind(&self, kind: &str) -> Option<&KindEntry> {
        self.entries.iter().find(|entry| entry.kind == kind)
    }

    /// Returns `true` if the context has more than one kind.
    pub fn is_multi(&self) -> bool {
        self.entries.len() > 1
    }

    /// Serialize into the JSON context format accepted by [`Context::from_value`].
    pub fn to_value(&self) -> Value {
        match self.entries.as_slice() {
            [single] => single.body(true),
            entries => {
                let mut object = ObjectBuilder::new().set("kind", MULTI_KIND);
                for entry in entries {
                    object = object.set(entry.kind.as_str(), entry.body(false));
                }
                object.build()
            }
        }
    }
}

fn canonical_key(entries: &[KindEntry]) -> String {
    if let [single] = entries {
        if single.kind == DEFAULT_KIND {
            return single.key.clone();
        }
    }
    entries
        .iter()
        .map(|entry| format!("{}:{}", escape_key(&entry.kind), escape_key(&entry.key)))
        .collect::<Vec<_>>()
        .join(":")
}

fn escape_key(s: &str) -> String {
    s.replace('%', "%25").replace(':', "%3A")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_user_context() {
        let mut builder = ContextBuilder::new();
        builder
            .add_kind("user", "alice-123")
            .unwrap()
            .set_attribute("user", "plan", "gold")
            .unwrap()
            .add_private_attribute("user", "plan")
            .unwrap();
        let context = builder.build();

        assert!(context.valid());
        assert_eq!(context.errors(), None);
        assert_eq!(context.canonical_key(), "alice-123");
        let user = context.kind("user").unwrap();
        let private: Vec<_> = user
            .private_attributes()
            .iter()
            .map(AttributeReference::as_str)
            .collect();
        assert_eq!(private, ["plan"]);
        assert_eq!(user.attributes().get("plan"), Some(&Value::from("gold")));
    }

    #[test]
    fn multi_kind_key_is_order_independent() {
        let mut forward = ContextBuilder::new();
        forward.add_kind("user", "u1").unwrap();
        forward.add_kind("device", "d1").unwrap();

        let mut reverse = ContextBuilder::new();
        reverse.add_kind("device", "d1").unwrap();
        reverse.add_kind("user", "u1").unwrap();

        let (a, b) = (forward.build(), reverse.build());
        assert_eq!(a.canonical_key(), "device:d1:user:u1");
        assert_eq!(a.canonical_key(), b.canonical_key());
        assert_eq!(forward.build().canonical_key(), a.canonical_key());
        assert!(a.is_multi());
    }

    #[test]
    fn single_non_user_kind_is_prefixed() {
        let mut builder = ContextBuilder::new();
        builder.add_kind("org", "acme").unwrap();
        assert_eq!(builder.build().canonical_key(), "org:acme");
    }

    #[test]
    fn separators_are_escaped() {
        let mut builder = ContextBuilder::new();
        builder.add_kind("user", "a:b%c").unwrap();
        builder.add_kind("org", "x").unwrap();
        assert_eq!(builder.build().canonical_key(), "org:x:user:a%3Ab%25c");
    }

    #[test]
    fn empty_context_is_invalid() {
        let context = ContextBuilder::new().build();
        assert!(!context.valid());
        assert_eq!(context.errors(), Some("context has no kinds"));
    }

    #[test]
    fn bad_kind_names_are_invalid() {
        for kind in ["multi", "kind", "has space", "ünïcode"] {
            let mut builder = ContextBuilder::new();
            builder.add_kind(kind, "key").unwrap();
            let context = builder.build();
            assert!(!context.valid(), "{kind}");
            assert!(context.errors().unwrap().contains(kind));
        }
    }

    #[test]
    fn get_value_follows_paths() {
        let mut builder = ContextBuilder::new();
        builder
            .add_kind("user", "u")
            .unwrap()
            .set_name("user", "Ursula")
            .unwrap()
            .set_attribute(
                "user",
                "contact",
                ObjectBuilder::new().set("phone", "555").build(),
            )
            .unwrap();
        let context = builder.build();
        let user = context.kind("user").unwrap();

        assert_eq!(
            user.get_value(&AttributeReference::new("/contact/phone")),
            Some(Value::from("555"))
        );
        assert_eq!(
            user.get_value(&AttributeReference::new("name")),
            Some(Value::from("Ursula"))
        );
        assert_eq!(user.get_value(&AttributeReference::new("/contact/fax")), None);
        assert_eq!(user.get_value(&AttributeReference::new("/")), None);
    }

    #[test]
    fn to_value_round_trips_through_from_value() {
        let mut builder = ContextBuilder::new();
        builder
            .add_kind("user", "u1")
            .unwrap()
            .set_anonymous("user", true)
            .unwrap()
            .add_private_attribute("user", "/address/street")
            .unwrap();
        builder
            .add_kind("device", "d1")
            .unwrap()
            .set_attribute("device", "os", "linux")
            .unwrap();
        let context = builder.build();

        let parsed = Context::from_value(&context.to_value()).unwrap();
        assert_eq!(parsed, context);
    }
}
