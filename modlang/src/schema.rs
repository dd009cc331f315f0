//! Schema implements the typed field tree that user values are validated
//! against, and the recursive walk that reports unknown fields with their
//! full dotted path.
//!
//! The walk descends into `object` nodes, whose field sets are closed, and
//! stops reporting unknown fields at `map` nodes, whose keys are
//! unconstrained (only the value schema applies).

use std::fmt;

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::{Error, Result};

/// FieldMeta carries the common per-field options.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FieldMeta {
    /// Required fields must be present after defaults are applied.
    pub required: bool,
    /// Default value injected before explicit overlays.
    pub default: Option<Value>,
}

/// Schema is one node of the config schema tree.
#[derive(Clone, Debug, PartialEq)]
pub enum Schema {
    /// Any accepts everything.
    Any(FieldMeta),
    /// Bool accepts booleans.
    Bool(FieldMeta),
    /// Int accepts integers.
    Int(FieldMeta),
    /// Float accepts any number.
    Float(FieldMeta),
    /// String accepts strings.
    String(FieldMeta),
    /// List accepts arrays whose items match the item schema.
    List {
        /// Item schema.
        items: Box<Schema>,
        /// Field options.
        meta: FieldMeta,
    },
    /// Map accepts objects with unconstrained keys; values match the value
    /// schema. Unknown-field reporting stops here.
    Map {
        /// Value schema.
        values: Box<Schema>,
        /// Field options.
        meta: FieldMeta,
    },
    /// Object accepts objects with a closed set of named fields.
    Object {
        /// Declared fields, in declaration order.
        fields: IndexMap<String, Schema>,
        /// Field options.
        meta: FieldMeta,
    },
}

/// ViolationKind classifies a schema violation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ViolationKind {
    /// UnknownField is a field not declared in the schema.
    UnknownField,
    /// TypeMismatch is a value of the wrong type.
    TypeMismatch {
        /// Type the schema expects.
        expected: &'static str,
    },
    /// MissingField is an absent required field.
    MissingField,
}

/// Violation is one finding of the validation walk.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Violation {
    /// Dotted path of the offending field, relative to the walk root.
    pub path: String,
    /// What went wrong.
    pub kind: ViolationKind,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ViolationKind::UnknownField => write!(f, "unknown field {:?}", self.path),
            ViolationKind::TypeMismatch { expected } => {
                write!(f, "field {:?} is not of type {expected}", self.path)
            }
            ViolationKind::MissingField => write!(f, "required field {:?} is missing", self.path),
        }
    }
}

impl Schema {
    /// Parse reads a schema tree from its declaration value.
    ///
    /// A mapping with a `type` key is a typed node; a mapping without one is
    /// shorthand for an object whose fields are the mapping's entries.
    pub fn parse(decl: &Value) -> Result<Schema> {
        Self::parse_at(decl, "")
    }

    fn parse_at(decl: &Value, path: &str) -> Result<Schema> {
        let Some(map) = decl.as_object() else {
            return Err(Error::Schema {
                path: path.to_string(),
                message: "schema node must be a mapping".into(),
            });
        };
        match map.get("type").and_then(Value::as_str) {
            None => {
                let mut fields = IndexMap::new();
                for (k, v) in map {
                    fields.insert(k.clone(), Self::parse_at(v, &join(path, k))?);
                }
                Ok(Schema::Object {
                    fields,
                    meta: FieldMeta::default(),
                })
            }
            Some(ty) => {
                let meta = FieldMeta {
                    required: map.get("required").and_then(Value::as_bool).unwrap_or(false),
                    default: map.get("default").cloned(),
                };
                match ty {
                    "any" => Ok(Schema::Any(meta)),
                    "bool" => Ok(Schema::Bool(meta)),
                    "int" => Ok(Schema::Int(meta)),
                    "float" => Ok(Schema::Float(meta)),
                    "string" => Ok(Schema::String(meta)),
                    "list" => {
                        let items = match map.get("items") {
                            Some(decl) => Self::parse_at(decl, &join(path, "items"))?,
                            None => Schema::Any(FieldMeta::default()),
                        };
                        Ok(Schema::List {
                            items: Box::new(items),
                            meta,
                        })
                    }
                    "map" => {
                        let values = match map.get("values") {
                            Some(decl) => Self::parse_at(decl, &join(path, "values"))?,
                            None => Schema::Any(FieldMeta::default()),
                        };
                        Ok(Schema::Map {
                            values: Box::new(values),
                            meta,
                        })
                    }
                    "object" => {
                        let mut fields = IndexMap::new();
                        if let Some(Value::Object(decls)) = map.get("fields") {
                            for (k, v) in decls {
                                fields.insert(k.clone(), Self::parse_at(v, &join(path, k))?);
                            }
                        }
                        Ok(Schema::Object { fields, meta })
                    }
                    other => Err(Error::Schema {
                        path: path.to_string(),
                        message: format!("unknown type {other:?}"),
                    }),
                }
            }
        }
    }

    /// Meta borrows the node's field options.
    pub fn meta(&self) -> &FieldMeta {
        match self {
            Schema::Any(m)
            | Schema::Bool(m)
            | Schema::Int(m)
            | Schema::Float(m)
            | Schema::String(m) => m,
            Schema::List { meta, .. } | Schema::Map { meta, .. } | Schema::Object { meta, .. } => {
                meta
            }
        }
    }

    /// Defaults materializes the default value tree declared by the schema.
    pub fn defaults(&self) -> Value {
        if let Some(d) = &self.meta().default {
            return d.clone();
        }
        if let Schema::Object { fields, .. } = self {
            let mut out = Map::new();
            for (k, s) in fields {
                let d = s.defaults();
                if !d.is_null() {
                    out.insert(k.clone(), d);
                }
            }
            if !out.is_empty() {
                return Value::Object(out);
            }
        }
        Value::Null
    }

    /// Validate walks `value` against the schema, collecting every
    /// violation with its dotted path relative to the walk root.
    pub fn validate(&self, value: &Value) -> Vec<Violation> {
        let mut out = Vec::new();
        self.validate_at(value, "", &mut out);
        out
    }

    fn validate_at(&self, value: &Value, path: &str, out: &mut Vec<Violation>) {
        match self {
            Schema::Any(_) => {}
            Schema::Bool(_) => {
                if !value.is_boolean() {
                    mismatch(path, "bool", out);
                }
            }
            Schema::Int(_) => {
                if !(value.is_i64() || value.is_u64()) {
                    mismatch(path, "int", out);
                }
            }
            Schema::Float(_) => {
                if !value.is_number() {
                    mismatch(path, "float", out);
                }
            }
            Schema::String(_) => {
                if !value.is_string() {
                    mismatch(path, "string", out);
                }
            }
            Schema::List { items, .. } => {
                let Some(arr) = value.as_array() else {
                    mismatch(path, "list", out);
                    return;
                };
                for (i, item) in arr.iter().enumerate() {
                    items.validate_at(item, &join(path, &i.to_string()), out);
                }
            }
            Schema::Map { values, .. } => {
                let Some(map) = value.as_object() else {
                    mismatch(path, "map", out);
                    return;
                };
                // Keys are unconstrained; only the value schema applies.
                for (k, v) in map {
                    values.validate_at(v, &join(path, k), out);
                }
            }
            Schema::Object { fields, .. } => {
                let Some(map) = value.as_object() else {
                    mismatch(path, "object", out);
                    return;
                };
                for (k, v) in map {
                    match fields.get(k) {
                        Some(s) => s.validate_at(v, &join(path, k), out),
                        None => out.push(Violation {
                            path: join(path, k),
                            kind: ViolationKind::UnknownField,
                        }),
                    }
                }
                for (k, s) in fields {
                    if s.meta().required && !map.contains_key(k) {
                        out.push(Violation {
                            path: join(path, k),
                            kind: ViolationKind::MissingField,
                        });
                    }
                }
            }
        }
    }
}

fn mismatch(path: &str, expected: &'static str, out: &mut Vec<Violation>) {
    out.push(Violation {
        path: path.to_string(),
        kind: ViolationKind::TypeMismatch { expected },
    });
}

fn join(path: &str, seg: &str) -> String {
    if path.is_empty() {
        seg.to_string()
    } else {
        format!("{path}.{seg}")
    }
}
