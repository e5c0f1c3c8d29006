//! Parsing contexts from dynamically-typed trees.
use crate::{value::Object, Error, Result, Value};

use super::{AttributeReference, Context, ContextBuilder, KindEntry, DEFAULT_KIND, MULTI_KIND};

/// Built-in fields of the legacy user format that become ordinary attributes.
const LEGACY_USER_ATTRIBUTES: &[&str] = &[
    "ip",
    "email",
    "firstName",
    "lastName",
    "avatar",
    "country",
    "secondary",
];

impl Context {
    /// Parse a context from a tree.
    ///
    /// Three shapes are accepted:
    /// - a single kind: `{"kind": "user", "key": "u1", "name": "...", "anonymous": false,
    ///   "_meta": {"privateAttributes": ["email"]}, ...custom attributes}`;
    /// - several kinds: `{"kind": "multi", "user": {"key": "u1"}, "device": {"key": "d1"}}`;
    /// - a legacy user without a `kind` field: `{"key": "u1", "email": "...", "custom": {...},
    ///   "privateAttributeNames": [...]}`.
    ///
    /// Missing or empty keys do not fail parsing; the context reports itself invalid instead.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidContext`] if the tree does not have one of the shapes above.
    pub fn from_value(value: &Value) -> Result<Context> {
        let object = value
            .as_object()
            .ok_or_else(|| invalid("context must be an object"))?;

        let mut builder = ContextBuilder::new();
        match object.get("kind") {
            None => builder.push_entry(legacy_user(object)?)?,
            Some(Value::String(kind)) if kind == MULTI_KIND => {
                for (kind, body) in object.iter().filter(|(key, _)| *key != "kind") {
                    let body = body.as_object().ok_or_else(|| {
                        invalid(&format!("kind '{kind}' of a multi context must be an object"))
                    })?;
                    builder.push_entry(kind_entry(kind.clone(), body)?)?;
                }
            }
            Some(Value::String(kind)) => builder.push_entry(kind_entry(kind.clone(), object)?)?,
            Some(_) => return Err(invalid("'kind' must be a string")),
        }
        Ok(builder.build())
    }
}

fn invalid(message: &str) -> Error {
    Error::InvalidContext(message.to_owned())
}

fn optional_string(object: &Object, field: &str, kind: &str) -> Result<Option<String>> {
    match object.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(invalid(&format!("'{field}' of kind '{kind}' must be a string"))),
    }
}

fn optional_bool(object: &Object, field: &str, kind: &str) -> Result<bool> {
    match object.get(field) {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(b)) => Ok(*b),
        Some(_) => Err(invalid(&format!("'{field}' of kind '{kind}' must be a bool"))),
    }
}

fn string_list<'a>(value: &'a Value, field: &str) -> Result<Vec<&'a str>> {
    value
        .as_array()
        .ok_or_else(|| invalid(&format!("'{field}' must be an array of strings")))?
        .iter()
        .map(|item| {
            item.as_str()
                .ok_or_else(|| invalid(&format!("'{field}' must be an array of strings")))
        })
        .collect()
}

fn kind_entry(kind: String, body: &Object) -> Result<KindEntry> {
    let key = optional_string(body, "key", &kind)?.unwrap_or_default();
    let mut entry = KindEntry::new(kind, key);
    entry.name = optional_string(body, "name", &entry.kind)?;
    entry.anonymous = optional_bool(body, "anonymous", &entry.kind)?;

    if let Some(meta) = body.get("_meta") {
        let meta = meta
            .as_object()
            .ok_or_else(|| invalid("'_meta' must be an object"))?;
        if let Some(references) = meta.get("privateAttributes") {
            for reference in string_list(references, "_meta.privateAttributes")? {
                entry.add_private_attribute(AttributeReference::new(reference));
            }
        }
    }

    for (name, value) in body {
        if !matches!(
            name.as_str(),
            "kind" | "key" | "name" | "anonymous" | "_meta"
        ) {
            entry.attributes.insert(name.clone(), value.clone());
        }
    }
    Ok(entry)
}

fn legacy_user(object: &Object) -> Result<KindEntry> {
    let key = optional_string(object, "key", DEFAULT_KIND)?.unwrap_or_default();
    let mut entry = KindEntry::new(DEFAULT_KIND.to_owned(), key);
    entry.name = optional_string(object, "name", DEFAULT_KIND)?;
    entry.anonymous = optional_bool(object, "anonymous", DEFAULT_KIND)?;

    for &field in LEGACY_USER_ATTRIBUTES {
        if let Some(value) = optional_string(object, field, DEFAULT_KIND)? {
            entry.attributes.insert(field.to_owned(), Value::String(value));
        }
    }

    match object.get("custom") {
        None | Some(Value::Null) => {}
        Some(Value::Object(custom)) => {
            for (name, value) in custom {
                if !matches!(name.as_str(), "kind" | "key" | "name" | "anonymous" | "_meta")
                    && !entry.attributes.contains_key(name)
                {
                    entry.attributes.insert(name.clone(), value.clone());
                }
            }
        }
        Some(_) => return Err(invalid("'custom' must be an object")),
    }

    if let Some(names) = object.get("privateAttributeNames") {
        // Legacy names are plain attribute names, never paths.
        for name in string_list(names, "privateAttributeNames")? {
            entry.add_private_attribute(AttributeReference::from_literal(name));
        }
    }
    Ok(entry)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::{Context, Error, Value};

    fn parse(json: serde_json::Value) -> crate::Result<Context> {
        Context::from_value(&Value::from(json))
    }

    #[test]
    fn parses_single_kind() {
        let context = parse(json!({
            "kind": "org",
            "key": "acme",
            "name": "Acme",
            "tier": 3,
            "_meta": {"privateAttributes": ["/address/city"]},
        }))
        .unwrap();

        assert!(context.valid());
        let org = context.kind("org").unwrap();
        assert_eq!(org.name(), Some("Acme"));
        assert_eq!(org.attributes().get("tier"), Some(&Value::from(3)));
        assert_eq!(org.private_attributes()[0].components(), ["address", "city"]);
    }

    #[test]
    fn parses_multi_kind() {
        let context = parse(json!({
            "kind": "multi",
            "user": {"key": "u1", "anonymous": true},
            "device": {"key": "d1"},
        }))
        .unwrap();

        assert_eq!(context.canonical_key(), "device:d1:user:u1");
        assert!(context.kind("user").unwrap().anonymous());
    }

    #[test]
    fn parses_legacy_user() {
        let context = parse(json!({
            "key": "legacy",
            "email": "a@example.com",
            "firstName": "Ada",
            "custom": {"plan": "gold", "email": "ignored"},
            "privateAttributeNames": ["email", "/not/a/path"],
        }))
        .unwrap();

        let user = context.kind("user").unwrap();
        assert_eq!(context.canonical_key(), "legacy");
        assert_eq!(
            user.attributes().get("email"),
            Some(&Value::from("a@example.com"))
        );
        assert_eq!(user.attributes().get("plan"), Some(&Value::from("gold")));
        assert_eq!(user.private_attributes()[1].components(), ["/not/a/path"]);
    }

    #[test]
    fn missing_key_builds_invalid_context() {
        let context = parse(json!({"kind": "user", "key": ""})).unwrap();
        assert!(!context.valid());
        assert!(context.errors().unwrap().contains("user"));

        let context = parse(json!({"kind": "multi", "user": {"key": "u"}, "org": {}})).unwrap();
        assert!(!context.valid());
        assert!(context.errors().unwrap().contains("org"));
    }

    #[test]
    fn rejects_malformed_trees() {
        for tree in [
            json!("just a string"),
            json!({"kind": 7, "key": "a"}),
            json!({"kind": "user", "key": 12}),
            json!({"kind": "multi", "user": "u1"}),
            json!({"key": "a", "custom": []}),
            json!({"kind": "user", "key": "a", "_meta": {"privateAttributes": [1]}}),
        ] {
            assert!(
                matches!(parse(tree.clone()), Err(Error::InvalidContext(_))),
                "{tree}"
            );
        }
    }
}
