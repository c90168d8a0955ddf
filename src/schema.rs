//! JSL schema representations.
//!
//! This module provides the abstract [`Schema`](struct.Schema.html) used by
//! validators and adapters. Its serializable counterpart lives in
//! [`serde`](../serde/index.html); the two convert into each other, and
//! `Schema` serializes through `SerdeSchema`.

use crate::errors::SchemaError;
use crate::serde::{SerdeDiscriminator, SerdeSchema};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::convert::TryFrom;
use std::fmt;

/// An abstract representation of a JSL schema.
///
/// References (`ref`) are names, looked up in the
/// [`Namespace`](../registry/struct.Namespace.html) of whatever owns the
/// schema once that owner is known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SerdeSchema", into = "SerdeSchema")]
pub struct Schema {
    form: Box<Form>,
    nullable: bool,
    extra: HashMap<String, Value>,
}

impl Schema {
    /// Construct a new schema from a SerdeSchema.
    pub fn from_serde(serde_schema: SerdeSchema) -> Result<Schema, SchemaError> {
        let SerdeSchema {
            rxf,
            typ,
            enm,
            elems,
            props,
            opt_props,
            values,
            discriminator,
            nullable,
            extra,
        } = serde_schema;

        let has_properties = props.is_some() || opt_props.is_some();
        let keywords = [
            rxf.is_some(),
            typ.is_some(),
            enm.is_some(),
            elems.is_some(),
            has_properties,
            values.is_some(),
            discriminator.is_some(),
        ];
        if keywords.iter().filter(|present| **present).count() > 1 {
            return Err(SchemaError::InvalidForm);
        }

        let form = if let Some(rxf) = rxf {
            Form::Ref(rxf)
        } else if let Some(typ) = typ {
            Form::Type(typ.parse()?)
        } else if let Some(enm) = enm {
            if enm.is_empty() {
                return Err(SchemaError::InvalidEnum {
                    reason: "enum must not be empty".to_owned(),
                });
            }
            let mut seen = HashSet::new();
            for value in &enm {
                if !seen.insert(value) {
                    return Err(SchemaError::InvalidEnum {
                        reason: format!("repeated value: {}", value),
                    });
                }
            }
            Form::Enum(enm)
        } else if let Some(elems) = elems {
            Form::Elements(Schema::from_serde(*elems)?)
        } else if has_properties {
            let has_required = props.is_some();
            let required = convert_map(props.unwrap_or_default())?;
            let optional = convert_map(opt_props.unwrap_or_default())?;
            if let Some(property) = required.keys().find(|key| optional.contains_key(*key)) {
                return Err(SchemaError::AmbiguousProperty {
                    property: property.clone(),
                });
            }
            Form::Properties(required, optional, has_required)
        } else if let Some(values) = values {
            Form::Values(Schema::from_serde(*values)?)
        } else if let Some(SerdeDiscriminator { tag, mapping }) = discriminator {
            let mapping = convert_map(mapping)?;
            for sub_schema in mapping.values() {
                match sub_schema.form() {
                    Form::Properties(required, optional, _) => {
                        if required.contains_key(&tag) || optional.contains_key(&tag) {
                            return Err(SchemaError::AmbiguousProperty { property: tag });
                        }
                    }
                    _ => return Err(SchemaError::InvalidForm),
                }
                if sub_schema.nullable() {
                    return Err(SchemaError::InvalidForm);
                }
            }
            Form::Discriminator(tag, mapping)
        } else {
            Form::Empty
        };

        Ok(Schema {
            form: Box::new(form),
            nullable,
            extra,
        })
    }

    /// Parse a schema directly from JSON data.
    pub fn from_value(value: Value) -> Result<Schema, SchemaError> {
        let serde_schema: SerdeSchema =
            serde_json::from_value(value).map_err(|err| SchemaError::Serialization {
                reason: err.to_string(),
            })?;
        Schema::from_serde(serde_schema)
    }

    /// Convert back into the serde-friendly representation.
    pub fn into_serde(self) -> SerdeSchema {
        let mut out = SerdeSchema {
            nullable: self.nullable,
            extra: self.extra,
            ..SerdeSchema::default()
        };

        match *self.form {
            Form::Empty => {}
            Form::Ref(name) => out.rxf = Some(name),
            Form::Type(typ) => out.typ = Some(typ.to_string()),
            Form::Enum(values) => out.enm = Some(values),
            Form::Elements(sub_schema) => out.elems = Some(Box::new(sub_schema.into_serde())),
            Form::Properties(required, optional, has_required) => {
                if has_required || !required.is_empty() {
                    out.props = Some(unconvert_map(required));
                }
                if !optional.is_empty() || !has_required {
                    out.opt_props = Some(unconvert_map(optional));
                }
            }
            Form::Values(sub_schema) => out.values = Some(Box::new(sub_schema.into_serde())),
            Form::Discriminator(tag, mapping) => {
                out.discriminator = Some(SerdeDiscriminator {
                    tag,
                    mapping: unconvert_map(mapping),
                })
            }
        }

        out
    }

    /// Wrap a form into a non-nullable schema without extra keywords.
    pub fn new(form: Form) -> Schema {
        Schema {
            form: Box::new(form),
            nullable: false,
            extra: HashMap::new(),
        }
    }

    /// Get the form of the schema.
    pub fn form(&self) -> &Form {
        &self.form
    }

    /// Same as [`form`](#method.form), but moves ownership.
    pub fn into_form(self) -> Form {
        *self.form
    }

    /// Does the schema accept `null` in addition to what its form accepts?
    pub fn nullable(&self) -> bool {
        self.nullable
    }

    pub fn set_nullable(&mut self, nullable: bool) {
        self.nullable = nullable;
    }

    /// Get the extra data on the schema.
    ///
    /// Extra data here refers to key-value pairs on a schema which were present
    /// on the data, but the keys were not any of the keywords in JSL. A few of
    /// them (`alias`, `default`, `title`, `description`) are given meaning by
    /// this crate; the rest are carried along untouched.
    pub fn extra(&self) -> &HashMap<String, Value> {
        &self.extra
    }

    /// Same as [`extra`](#method.extra), but takes a mutable reference.
    pub fn extra_mut(&mut self) -> &mut HashMap<String, Value> {
        &mut self.extra
    }

    /// The name a property is read from and, optionally, written as.
    pub fn alias(&self) -> Option<&str> {
        self.extra.get("alias").and_then(Value::as_str)
    }

    /// The value used when a property is absent from the input.
    pub fn default_value(&self) -> Option<&Value> {
        self.extra.get("default")
    }

    pub fn title(&self) -> Option<&str> {
        self.extra.get("title").and_then(Value::as_str)
    }

    pub fn description(&self) -> Option<&str> {
        self.extra.get("description").and_then(Value::as_str)
    }

    /// Names of all definitions this schema refers to directly or through its
    /// sub-schemas, in the order they are first encountered.
    pub fn refs(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_refs(&mut out);
        out
    }

    fn collect_refs<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self.form() {
            Form::Empty | Form::Type(_) | Form::Enum(_) => {}
            Form::Ref(name) => {
                if !out.contains(&name.as_str()) {
                    out.push(name);
                }
            }
            Form::Elements(sub_schema) | Form::Values(sub_schema) => sub_schema.collect_refs(out),
            Form::Properties(required, optional, _) => {
                for sub_schema in required.values().chain(optional.values()) {
                    sub_schema.collect_refs(out);
                }
            }
            Form::Discriminator(_, mapping) => {
                for sub_schema in mapping.values() {
                    sub_schema.collect_refs(out);
                }
            }
        }
    }
}

impl TryFrom<SerdeSchema> for Schema {
    type Error = SchemaError;

    fn try_from(serde_schema: SerdeSchema) -> Result<Self, Self::Error> {
        Schema::from_serde(serde_schema)
    }
}

impl From<Schema> for SerdeSchema {
    fn from(schema: Schema) -> Self {
        schema.into_serde()
    }
}

fn convert_map(map: HashMap<String, SerdeSchema>) -> Result<BTreeMap<String, Schema>, SchemaError> {
    map.into_iter()
        .map(|(name, sub_schema)| Ok((name, Schema::from_serde(sub_schema)?)))
        .collect()
}

fn unconvert_map(map: BTreeMap<String, Schema>) -> HashMap<String, SerdeSchema> {
    map.into_iter()
        .map(|(name, sub_schema)| (name, sub_schema.into_serde()))
        .collect()
}

/// The various forms which a schema may take on, and their respective data.
#[derive(Debug, Clone, PartialEq)]
pub enum Form {
    /// The empty form.
    ///
    /// This schema accepts all data.
    Empty,

    /// The ref form.
    ///
    /// This schema refers to a named schema in the owner's namespace, and does
    /// whatever that other schema does.
    Ref(String),

    /// The type form.
    ///
    /// This schema asserts that the data is one of the primitive types.
    Type(Type),

    /// The enum form.
    ///
    /// This schema asserts that the data is one of the given strings.
    Enum(Vec<String>),

    /// The elements form.
    ///
    /// This schema asserts that the instance is an array, and that every
    /// element of the array matches a given schema.
    Elements(Schema),

    /// The properties form.
    ///
    /// The first map is the set of required properties and their schemas. The
    /// second map is the set of optional properties and their schemas. The
    /// flag records whether the `properties` keyword was present at all.
    Properties(BTreeMap<String, Schema>, BTreeMap<String, Schema>, bool),

    /// The values form.
    ///
    /// This schema asserts that the instance is an object, and that all the
    /// values in the object all satisfy the same schema.
    Values(Schema),

    /// The discriminator form.
    ///
    /// The first parameter is the name of the tag property. The second
    /// parameter is the mapping from tag values to their corresponding schemas,
    /// each of which is in the properties form.
    Discriminator(String, BTreeMap<String, Schema>),
}

/// The values that the "type" keyword may check for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    Boolean,
    /// Any JSON number.
    Number,
    Float32,
    Float64,
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    String,
    /// An RFC 3339 timestamp string.
    Timestamp,
}

impl Type {
    /// Inclusive bounds of the integer types.
    pub fn int_range(self) -> Option<(i128, i128)> {
        match self {
            Type::Int8 => Some((i8::MIN.into(), i8::MAX.into())),
            Type::Uint8 => Some((0, u8::MAX.into())),
            Type::Int16 => Some((i16::MIN.into(), i16::MAX.into())),
            Type::Uint16 => Some((0, u16::MAX.into())),
            Type::Int32 => Some((i32::MIN.into(), i32::MAX.into())),
            Type::Uint32 => Some((0, u32::MAX.into())),
            Type::Int64 => Some((i64::MIN.into(), i64::MAX.into())),
            Type::Uint64 => Some((0, u64::MAX.into())),
            _ => None,
        }
    }
}

impl std::str::FromStr for Type {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "boolean" => Type::Boolean,
            "number" => Type::Number,
            "float32" => Type::Float32,
            "float64" => Type::Float64,
            "int8" => Type::Int8,
            "uint8" => Type::Uint8,
            "int16" => Type::Int16,
            "uint16" => Type::Uint16,
            "int32" => Type::Int32,
            "uint32" => Type::Uint32,
            "int64" => Type::Int64,
            "uint64" => Type::Uint64,
            "string" => Type::String,
            "timestamp" => Type::Timestamp,
            _ => return Err(SchemaError::InvalidType { typ: s.to_owned() }),
        })
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Type::Boolean => "boolean",
            Type::Number => "number",
            Type::Float32 => "float32",
            Type::Float64 => "float64",
            Type::Int8 => "int8",
            Type::Uint8 => "uint8",
            Type::Int16 => "int16",
            Type::Uint16 => "uint16",
            Type::Int32 => "int32",
            Type::Uint32 => "uint32",
            Type::Int64 => "int64",
            Type::Uint64 => "uint64",
            Type::String => "string",
            Type::Timestamp => "timestamp",
        })
    }
}
