use crate::{Error, Result, Value};

use super::{AttributeReference, Context, KindEntry};

/// Accumulates kind entries and seals them into a [`Context`].
///
/// A builder is meant to be used from a single thread. [`ContextBuilder::build`] can be called
/// repeatedly; each call produces an independent context.
///
/// ```
/// # use ld_server_core::ContextBuilder;
/// # fn main() -> ld_server_core::Result<()> {
/// let mut builder = ContextBuilder::new();
/// builder
///     .add_kind("user", "alice-123")?
///     .set_attribute("user", "plan", "gold")?
///     .add_private_attribute("user", "plan")?;
/// builder.add_kind("device", "d-42")?;
///
/// let context = builder.build();
/// assert!(context.valid());
/// assert_eq!(context.canonical_key(), "device:d-42:user:alice-123");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct ContextBuilder {
    entries: Vec<KindEntry>,
}

impl ContextBuilder {
    #[allow(missing_docs)]
    pub fn new() -> ContextBuilder {
        ContextBuilder::default()
    }

    /// Register a new kind.
    ///
    /// # Errors
    ///
    /// - [`Error::DuplicateKind`] if `kind` was already added to this builder.
    /// - [`Error::EmptyKey`] if `key` is empty. Nothing is registered in that case.
    pub fn add_kind(
        &mut self,
        kind: impl Into<String>,
        key: impl Into<String>,
    ) -> Result<&mut ContextBuilder> {
        let (kind, key) = (kind.into(), key.into());
        if key.is_empty() {
            return Err(Error::EmptyKey { kind });
        }
        self.push_entry(KindEntry::new(kind, key))?;
        Ok(self)
    }

    /// Set a custom attribute.
    ///
    /// Setting `key`, `name` or `anonymous` updates the corresponding built-in attribute when the
    /// value has the right type (string, string or null, bool).
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownKind`] if `kind` was never added.
    /// - [`Error::InvalidBuiltInAttribute`] for `kind`, `_meta`, or a built-in attribute with a
    ///   value of the wrong type.
    pub fn set_attribute(
        &mut self,
        kind: &str,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<&mut ContextBuilder> {
        let (name, value) = (name.into(), value.into());
        let entry = self.entry_mut(kind)?;
        if !matches!(
            name.as_str(),
            "key" | "name" | "anonymous" | "kind" | "_meta"
        ) {
            entry.attributes.insert(name, value);
            return Ok(self);
        }
        match (name.as_str(), value) {
            ("key", Value::String(key)) if !key.is_empty() => entry.key = key,
            ("name", Value::String(display_name)) => entry.name = Some(display_name),
            ("name", Value::Null) => entry.name = None,
            ("anonymous", Value::Bool(anonymous)) => entry.anonymous = anonymous,
            _ => {
                return Err(Error::InvalidBuiltInAttribute {
                    kind: kind.to_owned(),
                    attribute: name.clone(),
                })
            }
        }
        Ok(self)
    }

    /// Mark the kind as anonymous.
    pub fn set_anonymous(&mut self, kind: &str, anonymous: bool) -> Result<&mut ContextBuilder> {
        self.entry_mut(kind)?.anonymous = anonymous;
        Ok(self)
    }

    /// Set the display name of the kind.
    pub fn set_name(
        &mut self,
        kind: &str,
        name: impl Into<String>,
    ) -> Result<&mut ContextBuilder> {
        self.entry_mut(kind)?.name = Some(name.into());
        Ok(self)
    }

    /// Mark an attribute (or a nested property, using a `/`-path) as private.
    pub fn add_private_attribute(
        &mut self,
        kind: &str,
        reference: impl Into<AttributeReference>,
    ) -> Result<&mut ContextBuilder> {
        self.entry_mut(kind)?
            .add_private_attribute(reference.into());
        Ok(self)
    }

    /// Seal the accumulated kinds into a context. Validity is reported by the context itself.
    pub fn build(&self) -> Context {
        Context::seal(self.entries.clone())
    }

    /// Add a prepared entry without checking the key, so parsed trees with empty keys still build
    /// (and report themselves invalid).
    pub(crate) fn push_entry(&mut self, entry: KindEntry) -> Result<()> {
        if self.entries.iter().any(|it| it.kind == entry.kind) {
            return Err(Error::DuplicateKind { kind: entry.kind });
        }
        self.entries.push(entry);
        Ok(())
    }

    fn entry_mut(&mut self, kind: &str) -> Result<&mut KindEntry> {
        self.entries
            .iter_mut()
            .find(|entry| entry.kind == kind)
            .ok_or_else(|| Error::UnknownKind {
                kind: kind.to_owned(),
            })
    }
}
