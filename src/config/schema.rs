//! Declarative field-validator tree used to apply a [`Value`] tree to builders.
//!
//! A [`Table`] lists the fields recognized at one level of the tree. Each field either applies a
//! scalar to the builder or descends into a nested section. A [`Nested`] section constructs a
//! child builder, fills it from the nested table and hands it over to the parent builder once all
//! its fields have been consumed. Handing over may fail if the child cannot be finalized.
use crate::{Error, Result, Value};

/// Kind of a field and the setter it dispatches to.
pub(crate) enum FieldKind<B> {
    Bool(fn(&mut B, bool)),
    String(fn(&mut B, String)),
    /// Non-negative integer.
    Unsigned(fn(&mut B, u64)),
    StringList(fn(&mut B, Vec<String>)),
    /// A string from a fixed vocabulary, compared case-insensitively.
    Choice(&'static [&'static str], fn(&mut B, &str)),
    /// A nested table applied to the same builder or, through [`Nested`], to a child builder.
    Table(Box<dyn Section<B>>),
}

pub(crate) struct Field<B> {
    pub(crate) key: &'static str,
    pub(crate) kind: FieldKind<B>,
}

impl<B> Field<B> {
    pub(crate) fn new(key: &'static str, kind: FieldKind<B>) -> Field<B> {
        Field { key, kind }
    }
}

/// Something that knows how to consume one node of the tree.
pub(crate) trait Section<B> {
    /// Apply `value`, found at dotted `path`, to `builder`.
    fn apply(&self, builder: &mut B, value: &Value, path: &str) -> Result<()>;
}

pub(crate) struct Table<B> {
    fields: Vec<Field<B>>,
}

impl<B> Table<B> {
    pub(crate) fn new(fields: Vec<Field<B>>) -> Table<B> {
        Table { fields }
    }
}

impl<B: 'static> Table<B> {
    /// Box the table as a nested field applied to the same builder.
    pub(crate) fn boxed(self) -> FieldKind<B> {
        FieldKind::Table(Box::new(self))
    }
}

impl<B> Section<B> for Table<B> {
    fn apply(&self, builder: &mut B, value: &Value, path: &str) -> Result<()> {
        let object = value.as_object().ok_or_else(|| Error::SchemaType {
            path: path.to_owned(),
        })?;

        for (key, value) in object {
            let field = self
                .fields
                .iter()
                .find(|field| field.key == key)
                .ok_or_else(|| Error::UnrecognizedField {
                    field: key.clone(),
                    path: path.to_owned(),
                })?;
            let path = join(path, key);

            match &field.kind {
                FieldKind::Bool(set) => {
                    set(builder, value.as_bool().ok_or_else(|| mismatch(&path, "a bool"))?)
                }
                FieldKind::String(set) => {
                    let s = value.as_str().ok_or_else(|| mismatch(&path, "a string"))?;
                    set(builder, s.to_owned())
                }
                FieldKind::Unsigned(set) => set(builder, unsigned(value, &path)?),
                FieldKind::StringList(set) => set(builder, string_list(value, &path)?),
                FieldKind::Choice(allowed, set) => {
                    let s = value.as_str().ok_or_else(|| mismatch(&path, "a string"))?;
                    if !allowed.iter().any(|choice| choice.eq_ignore_ascii_case(s)) {
                        return Err(Error::InvalidChoice {
                            path,
                            value: s.to_owned(),
                            allowed: *allowed,
                        });
                    }
                    set(builder, s)
                }
                FieldKind::Table(section) => section.apply(builder, value, &path)?,
            }
        }
        Ok(())
    }
}

/// A section that fills a child builder `C` and attaches it to the parent builder `P`.
pub(crate) struct Nested<P, C> {
    table: Table<C>,
    construct: fn() -> C,
    consume: fn(&mut P, C) -> Result<()>,
}

impl<P: 'static, C: 'static> Nested<P, C> {
    pub(crate) fn field(
        table: Table<C>,
        construct: fn() -> C,
        consume: fn(&mut P, C) -> Result<()>,
    ) -> FieldKind<P> {
        FieldKind::Table(Box::new(Nested {
            table,
            construct,
            consume,
        }))
    }
}

impl<P, C> Section<P> for Nested<P, C> {
    fn apply(&self, builder: &mut P, value: &Value, path: &str) -> Result<()> {
        if value.as_object().is_none() {
            return Err(Error::SchemaType {
                path: path.to_owned(),
            });
        }
        let mut child = (self.construct)();
        self.table.apply(&mut child, value, path)?;
        (self.consume)(builder, child)
    }
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_owned()
    } else {
        format!("{path}.{key}")
    }
}

fn mismatch(path: &str, expected: &'static str) -> Error {
    Error::FieldType {
        path: path.to_owned(),
        expected,
    }
}

fn unsigned(value: &Value, path: &str) -> Result<u64> {
    const EXPECTED: &str = "an unsigned integer";
    let n = value.as_f64().ok_or_else(|| mismatch(path, EXPECTED))?;
    if n < 0.0 {
        return Err(Error::NegativeValue {
            path: path.to_owned(),
            value: n,
        });
    }
    if n.fract() != 0.0 || n > u64::MAX as f64 {
        return Err(mismatch(path, EXPECTED));
    }
    Ok(n as u64)
}

fn string_list(value: &Value, path: &str) -> Result<Vec<String>> {
    const EXPECTED: &str = "an array of strings";
    value
        .as_array()
        .ok_or_else(|| mismatch(path, EXPECTED))?
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_owned)
                .ok_or_else(|| mismatch(path, EXPECTED))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[derive(Default, Debug, PartialEq)]
    struct Parent {
        flag: bool,
        count: u64,
        child: Option<Child>,
    }

    #[derive(Default, Debug, PartialEq)]
    struct Child {
        name: String,
        tags: Vec<String>,
        mode: String,
    }

    fn schema() -> Table<Parent> {
        Table::new(vec![
            Field::new("flag", FieldKind::Bool(|b: &mut Parent, v| b.flag = v)),
            Field::new("count", FieldKind::Unsigned(|b: &mut Parent, v| b.count = v)),
            Field::new(
                "child",
                Nested::field(
                    Table::new(vec![
                        Field::new("name", FieldKind::String(|c: &mut Child, v| c.name = v)),
                        Field::new("tags", FieldKind::StringList(|c: &mut Child, v| c.tags = v)),
                        Field::new(
                            "mode",
                            FieldKind::Choice(&["fast", "slow"], |c: &mut Child, v| {
                                c.mode = v.to_owned()
                            }),
                        ),
                    ]),
                    Child::default,
                    |p: &mut Parent, c| {
                        p.child = Some(c);
                        Ok(())
                    },
                ),
            ),
        ])
    }

    fn apply(tree: serde_json::Value) -> Result<Parent> {
        let mut parent = Parent::default();
        schema().apply(&mut parent, &Value::from(tree), "")?;
        Ok(parent)
    }

    #[test]
    fn applies_nested_child_builder() {
        let parent = apply(json!({
            "flag": true,
            "count": 3,
            "child": {"name": "c", "tags": ["a", "b"], "mode": "SLOW"},
        }))
        .unwrap();

        assert_eq!(
            parent,
            Parent {
                flag: true,
                count: 3,
                child: Some(Child {
                    name: "c".to_owned(),
                    tags: vec!["a".to_owned(), "b".to_owned()],
                    mode: "SLOW".to_owned(),
                }),
            }
        );
    }

    #[test]
    fn empty_child_is_still_consumed() {
        let parent = apply(json!({"child": {}})).unwrap();
        assert_eq!(parent.child, Some(Child::default()));
    }

    #[test]
    fn unknown_fields_name_their_parent() {
        match apply(json!({"child": {"nmae": "c"}})) {
            Err(Error::UnrecognizedField { field, path }) => {
                assert_eq!(field, "nmae");
                assert_eq!(path, "child");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            apply(json!({"bogus": 1})),
            Err(Error::UnrecognizedField { path, .. }) if path.is_empty()
        ));
    }

    #[test]
    fn type_errors_carry_full_path() {
        assert!(matches!(
            apply(json!({"child": {"tags": ["a", 1]}})),
            Err(Error::FieldType { path, expected: "an array of strings" }) if path == "child.tags"
        ));
        assert!(matches!(
            apply(json!({"flag": "yes"})),
            Err(Error::FieldType { path, .. }) if path == "flag"
        ));
        assert!(matches!(
            apply(json!({"child": 5})),
            Err(Error::SchemaType { path }) if path == "child"
        ));
        assert!(matches!(
            apply(json!([1, 2])),
            Err(Error::SchemaType { path }) if path.is_empty()
        ));
    }

    #[test]
    fn unsigned_fields_reject_negative_and_fractional_numbers() {
        assert!(matches!(
            apply(json!({"count": -5})),
            Err(Error::NegativeValue { path, value }) if path == "count" && value == -5.0
        ));
        assert!(matches!(
            apply(json!({"count": 1.5})),
            Err(Error::FieldType { path, .. }) if path == "count"
        ));
        assert!(matches!(
            apply(json!({"count": "7"})),
            Err(Error::FieldType { path, .. }) if path == "count"
        ));
    }

    #[test]
    fn choices_are_enforced() {
        match apply(json!({"child": {"mode": "medium"}})) {
            Err(Error::InvalidChoice {
                path,
                value,
                allowed,
            }) => {
                assert_eq!(path, "child.mode");
                assert_eq!(value, "medium");
                assert_eq!(allowed, ["fast", "slow"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
