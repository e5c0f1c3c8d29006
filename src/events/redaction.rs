//! Removal of private attributes from contexts included in analytics events.
use serde_json::{Map, Value as Json};

use crate::{
    config::EventsConfig,
    context::{AttributeReference, KindEntry},
    value::Object,
    Context, Value,
};

/// Attributes that identify a context and are never redacted.
const PROTECTED: &[&str] = &["kind", "key", "anonymous"];

#[derive(Debug, Clone, Default)]
pub(crate) struct Redactor {
    all_private: bool,
    global: Vec<AttributeReference>,
}

impl Redactor {
    pub(crate) fn new(config: &EventsConfig) -> Redactor {
        Redactor {
            all_private: config.all_attributes_private,
            global: config.private_attributes.clone(),
        }
    }

    /// JSON form of `context` with private attributes removed and listed in
    /// `_meta.redactedAttributes`.
    pub(crate) fn redact(&self, context: &Context) -> Json {
        let entries: Vec<_> = context.kinds().collect();
        match entries.as_slice() {
            [single] => self.redact_entry(single, true),
            entries => {
                let mut object = Map::new();
                object.insert("kind".to_owned(), Json::from("multi"));
                for entry in entries {
                    object.insert(entry.kind().to_owned(), self.redact_entry(entry, false));
                }
                Json::Object(object)
            }
        }
    }

    fn redact_entry(&self, entry: &KindEntry, include_kind: bool) -> Json {
        let mut attributes = entry.attributes().clone();
        let mut name = entry.name().map(str::to_owned);
        let mut redacted: Vec<String> = Vec::new();

        if self.all_private {
            if name.take().is_some() {
                redacted.push("name".to_owned());
            }
            redacted.extend(attributes.drain(..).map(|(key, _)| key));
        } else {
            let references = self.global.iter().chain(entry.private_attributes());
            for reference in references.filter(|reference| reference.is_valid()) {
                let removed = match reference.components() {
                    [top] if PROTECTED.contains(&top.as_str()) => false,
                    [top] if top == "name" => name.take().is_some(),
                    path => remove_path(&mut attributes, path),
                };
                if removed && !redacted.iter().any(|it| it == reference.as_str()) {
                    redacted.push(reference.as_str().to_owned());
                }
            }
        }

        let mut object = Map::new();
        if include_kind {
            object.insert("kind".to_owned(), Json::from(entry.kind()));
        }
        object.insert("key".to_owned(), Json::from(entry.key()));
        if let Some(name) = name {
            object.insert("name".to_owned(), Json::from(name));
        }
        if entry.anonymous() {
            object.insert("anonymous".to_owned(), Json::Bool(true));
        }
        for (key, value) in &attributes {
            object.insert(key.clone(), value.to_json());
        }
        if !redacted.is_empty() {
            object.insert(
                "_meta".to_owned(),
                serde_json::json!({ "redactedAttributes": redacted }),
            );
        }
        Json::Object(object)
    }
}

fn remove_path(object: &mut Object, path: &[String]) -> bool {
    match path {
        [] => false,
        [last] => object.shift_remove(last).is_some(),
        [first, rest @ ..] => match object.get_mut(first) {
            Some(Value::Object(inner)) => remove_path(inner, rest),
            _ => false,
        },
    }
}
