//! Turning validated values back into plain JSON, and schemas into JSON
//! Schema documents.

use crate::errors::SchemaError;
use crate::registry::Definitions;
use crate::schema::{Form, Schema, Type};
use crate::validator::Extra;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// The keyword names recognised as export options.
pub const EXPORT_KWARGS: &[&str] = &[
    "include",
    "exclude",
    "by_alias",
    "exclude_none",
    "exclude_defaults",
];

const JSON_SCHEMA_DIALECT: &str = "https://json-schema.org/draft/2020-12/schema";

/// Options controlling how validated values are dumped.
///
/// `include` and `exclude` name properties of the outermost record: the first
/// properties (or discriminator) schema reached through containers and
/// references.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExportOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include: Option<BTreeSet<String>>,

    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub exclude: BTreeSet<String>,

    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub by_alias: bool,

    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub exclude_none: bool,

    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub exclude_defaults: bool,
}

impl ExportOptions {
    /// Remove every export option from `kwargs` and parse them.
    ///
    /// Keys that are not export options are left in place.
    pub fn extract(kwargs: &mut Map<String, Value>) -> Result<ExportOptions, SchemaError> {
        let mut found = Map::new();
        for name in EXPORT_KWARGS {
            if let Some(value) = kwargs.remove(*name) {
                found.insert((*name).to_owned(), value);
            }
        }

        serde_json::from_value(Value::Object(found)).map_err(|err| SchemaError::InvalidArgument {
            name: "export".to_owned(),
            reason: err.to_string(),
        })
    }

    /// The options as keyword arguments; options left at their default are
    /// omitted.
    pub fn to_kwargs(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(kwargs)) => kwargs,
            _ => Map::new(),
        }
    }

    pub fn is_default(&self) -> bool {
        *self == ExportOptions::default()
    }

    fn keeps(&self, name: &str) -> bool {
        let included = match &self.include {
            Some(include) => include.contains(name),
            None => true,
        };
        included && !self.exclude.contains(name)
    }
}

/// Dump a validated value to plain JSON, following `schema` to find aliases
/// and defaults.
pub fn dump(definitions: &Definitions, schema: &Schema, value: &Value, options: &ExportOptions) -> Value {
    Dumper {
        definitions,
        options,
    }
    .dump(schema, value, true)
}

struct Dumper<'a> {
    definitions: &'a Definitions,
    options: &'a ExportOptions,
}

impl<'a> Dumper<'a> {
    fn dump(&self, schema: &Schema, value: &Value, outermost: bool) -> Value {
        if value.is_null() {
            return Value::Null;
        }

        match schema.form() {
            Form::Ref(name) => match self.definitions.get(name) {
                Some(refd) => self.dump(refd, value, outermost),
                None => value.clone(),
            },
            Form::Elements(sub_schema) => match value {
                Value::Array(elems) => Value::Array(
                    elems
                        .iter()
                        .map(|elem| self.dump(sub_schema, elem, outermost))
                        .collect(),
                ),
                _ => value.clone(),
            },
            Form::Values(sub_schema) => match value {
                Value::Object(obj) => Value::Object(
                    obj.iter()
                        .map(|(key, elem)| (key.clone(), self.dump(sub_schema, elem, outermost)))
                        .collect(),
                ),
                _ => value.clone(),
            },
            Form::Properties(required, optional, _) => match value {
                Value::Object(obj) => {
                    Value::Object(self.dump_record(required.iter().chain(optional.iter()), obj, outermost))
                }
                _ => value.clone(),
            },
            Form::Discriminator(tag, mapping) => {
                let sub_schema = value
                    .get(tag)
                    .and_then(Value::as_str)
                    .and_then(|name| mapping.get(name));
                match sub_schema {
                    Some(sub_schema) => self.dump(sub_schema, value, outermost),
                    None => value.clone(),
                }
            }
            Form::Empty | Form::Type(_) | Form::Enum(_) => value.clone(),
        }
    }

    fn dump_record<'s>(
        &self,
        properties: impl Iterator<Item = (&'s String, &'s Schema)>,
        obj: &Map<String, Value>,
        outermost: bool,
    ) -> Map<String, Value> {
        let mut out = Map::new();
        let mut known = BTreeSet::new();

        for (name, sub_schema) in properties {
            known.insert(name.as_str());
            let value = match obj.get(name) {
                Some(value) => value,
                None => continue,
            };
            if outermost && !self.options.keeps(name) {
                continue;
            }
            if self.options.exclude_none && value.is_null() {
                continue;
            }
            if self.options.exclude_defaults && sub_schema.default_value() == Some(value) {
                continue;
            }

            let key = match sub_schema.alias() {
                Some(alias) if self.options.by_alias => alias.to_owned(),
                _ => name.clone(),
            };
            out.insert(key, self.dump(sub_schema, value, false));
        }

        // Discriminator tags and extra properties kept by `Extra::Allow`.
        for (key, value) in obj {
            if known.contains(key.as_str()) {
                continue;
            }
            if outermost && !self.options.keeps(key) {
                continue;
            }
            if self.options.exclude_none && value.is_null() {
                continue;
            }
            out.insert(key.clone(), value.clone());
        }

        out
    }
}

/// The property names `include` and `exclude` can refer to: those of every
/// record at the outermost level of `schema`. `None` when some value there
/// is unconstrained, so any name might match.
pub fn outermost_properties(definitions: &Definitions, schema: &Schema) -> Option<BTreeSet<String>> {
    let mut names = BTreeSet::new();
    let mut seen = BTreeSet::new();
    if collect_properties(definitions, schema, &mut names, &mut seen) {
        Some(names)
    } else {
        None
    }
}

fn collect_properties<'a>(
    definitions: &'a Definitions,
    schema: &'a Schema,
    names: &mut BTreeSet<String>,
    seen: &mut BTreeSet<&'a str>,
) -> bool {
    match schema.form() {
        Form::Empty => false,
        Form::Ref(name) => {
            if !seen.insert(name.as_str()) {
                return true;
            }
            match definitions.get(name) {
                Some(refd) => collect_properties(definitions, refd, names, seen),
                None => false,
            }
        }
        Form::Elements(sub_schema) | Form::Values(sub_schema) => {
            collect_properties(definitions, sub_schema, names, seen)
        }
        Form::Properties(required, optional, _) => {
            names.extend(required.keys().chain(optional.keys()).cloned());
            true
        }
        Form::Discriminator(tag, mapping) => {
            names.insert(tag.clone());
            mapping
                .values()
                .all(|sub_schema| collect_properties(definitions, sub_schema, names, seen))
        }
        Form::Type(_) | Form::Enum(_) => true,
    }
}

/// Generate a JSON Schema (draft 2020-12) document for `schema`.
pub fn json_schema(
    title: &str,
    definitions: &Definitions,
    schema: &Schema,
    by_alias: bool,
    extra: Extra,
) -> Value {
    let generator = Generator { by_alias, extra };

    let mut out = match generator.convert(schema) {
        Value::Object(out) => out,
        other => {
            let mut out = Map::new();
            out.insert("allOf".to_owned(), json!([other]));
            out
        }
    };

    out.insert("$schema".to_owned(), json!(JSON_SCHEMA_DIALECT));
    out.entry("title").or_insert_with(|| json!(title));

    if !definitions.is_empty() {
        let defs: Map<String, Value> = definitions
            .iter()
            .map(|(name, refd)| (name.clone(), generator.convert(refd)))
            .collect();
        out.insert("$defs".to_owned(), Value::Object(defs));
    }

    Value::Object(out)
}

struct Generator {
    by_alias: bool,
    extra: Extra,
}

impl Generator {
    fn convert(&self, schema: &Schema) -> Value {
        let mut out = match schema.form() {
            Form::Empty => json!({}),
            Form::Ref(name) => json!({ "$ref": format!("#/$defs/{}", name) }),
            Form::Type(typ) => convert_type(*typ),
            Form::Enum(values) => json!({ "type": "string", "enum": values }),
            Form::Elements(sub_schema) => json!({
                "type": "array",
                "items": self.convert(sub_schema),
            }),
            Form::Values(sub_schema) => json!({
                "type": "object",
                "additionalProperties": self.convert(sub_schema),
            }),
            Form::Properties(required, optional, _) => self.convert_properties(required, optional),
            Form::Discriminator(tag, mapping) => {
                let variants: Vec<Value> = mapping
                    .iter()
                    .map(|(name, sub_schema)| {
                        let mut variant = self.convert(sub_schema);
                        variant["properties"][tag.as_str()] = json!({ "const": name });
                        if let Some(required) = variant["required"].as_array_mut() {
                            required.insert(0, json!(tag));
                        } else {
                            variant["required"] = json!([tag]);
                        }
                        variant
                    })
                    .collect();
                json!({
                    "oneOf": variants,
                    "discriminator": { "propertyName": tag },
                })
            }
        };

        if schema.nullable() {
            out = json!({ "anyOf": [out, { "type": "null" }] });
        }

        for keyword in &["title", "description", "default"] {
            if let Some(value) = schema.extra().get(*keyword) {
                out[*keyword] = value.clone();
            }
        }

        out
    }

    fn convert_properties(
        &self,
        required: &BTreeMap<String, Schema>,
        optional: &BTreeMap<String, Schema>,
    ) -> Value {
        let mut properties = Map::new();
        let mut required_names = Vec::new();

        for (name, sub_schema) in required.iter().chain(optional.iter()) {
            let key = match sub_schema.alias() {
                Some(alias) if self.by_alias => alias.to_owned(),
                _ => name.clone(),
            };
            if required.contains_key(name) && sub_schema.default_value().is_none() {
                required_names.push(json!(key));
            }
            properties.insert(key, self.convert(sub_schema));
        }

        let mut out = json!({ "type": "object", "properties": properties });
        if !required_names.is_empty() {
            out["required"] = Value::Array(required_names);
        }
        if self.extra == Extra::Forbid {
            out["additionalProperties"] = json!(false);
        }
        out
    }
}

fn convert_type(typ: Type) -> Value {
    match typ {
        Type::Boolean => json!({ "type": "boolean" }),
        Type::Number | Type::Float32 | Type::Float64 => json!({ "type": "number" }),
        Type::String => json!({ "type": "string" }),
        Type::Timestamp => json!({ "type": "string", "format": "date-time" }),
        _ => match typ.int_range() {
            // i128 does not serialize into serde_json values; the bounds of
            // every integer type fit into i64 or u64.
            Some((min, max)) => {
                let maximum = if max > i128::from(i64::MAX) {
                    json!(max as u64)
                } else {
                    json!(max as i64)
                };
                json!({ "type": "integer", "minimum": min as i64, "maximum": maximum })
            }
            None => json!({}),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn schema(value: Value) -> Schema {
        Schema::from_value(value).unwrap()
    }

    fn person() -> Schema {
        schema(json!({
            "properties": {
                "name": { "type": "string", "alias": "fullName" },
                "age": { "type": "uint8" },
            },
            "optionalProperties": {
                "email": { "type": "string", "nullable": true },
                "role": { "enum": ["admin", "user"], "default": "user" },
            },
        }))
    }

    #[test]
    fn extract_leaves_other_kwargs() {
        let mut kwargs = json!({
            "null": true,
            "exclude": ["age"],
            "by_alias": true,
        });
        let kwargs = kwargs.as_object_mut().unwrap();

        let options = ExportOptions::extract(kwargs).unwrap();
        assert_eq!(kwargs.keys().collect::<Vec<_>>(), vec!["null"]);
        assert!(options.by_alias);
        assert!(options.exclude.contains("age"));
        assert_eq!(
            Value::Object(options.to_kwargs()),
            json!({ "exclude": ["age"], "by_alias": true })
        );

        let mut bad = json!({ "include": "age" });
        assert!(ExportOptions::extract(bad.as_object_mut().unwrap()).is_err());
    }

    #[test]
    fn dump_honors_options() {
        let value = json!({ "name": "Ann", "age": 3, "email": null, "role": "user" });
        let definitions = Definitions::new();

        assert_eq!(dump(&definitions, &person(), &value, &ExportOptions::default()), value);

        let options = ExportOptions {
            by_alias: true,
            exclude_none: true,
            exclude_defaults: true,
            exclude: ["age".to_owned()].iter().cloned().collect(),
            ..ExportOptions::default()
        };
        assert_eq!(
            dump(&definitions, &person(), &value, &options),
            json!({ "fullName": "Ann" })
        );
    }

    #[test]
    fn include_applies_to_outermost_record() {
        let mut definitions = Definitions::new();
        definitions.insert("Person".to_owned(), Arc::new(person()));
        let people = schema(json!({ "elements": { "ref": "Person" } }));

        let options = ExportOptions {
            include: Some(["name".to_owned()].iter().cloned().collect()),
            ..ExportOptions::default()
        };
        assert_eq!(
            dump(
                &definitions,
                &people,
                &json!([{ "name": "Ann", "age": 3 }, { "name": "Bob", "age": 4 }]),
                &options,
            ),
            json!([{ "name": "Ann" }, { "name": "Bob" }])
        );
    }

    #[test]
    fn generates_json_schema() {
        let mut definitions = Definitions::new();
        definitions.insert("Person".to_owned(), Arc::new(person()));

        let document = json_schema(
            "list[Person]",
            &definitions,
            &schema(json!({ "elements": { "ref": "Person" } })),
            true,
            Extra::Forbid,
        );

        assert_eq!(
            document,
            json!({
                "$schema": JSON_SCHEMA_DIALECT,
                "title": "list[Person]",
                "type": "array",
                "items": { "$ref": "#/$defs/Person" },
                "$defs": {
                    "Person": {
                        "type": "object",
                        "properties": {
                            "age": { "type": "integer", "minimum": 0, "maximum": 255 },
                            "fullName": { "type": "string" },
                            "email": { "anyOf": [{ "type": "string" }, { "type": "null" }] },
                            "role": { "type": "string", "enum": ["admin", "user"], "default": "user" },
                        },
                        "required": ["age", "fullName"],
                        "additionalProperties": false,
                    },
                },
            })
        );
    }

    #[test]
    fn discriminator_variants_carry_their_tag() {
        let document = json_schema(
            "Pet",
            &Definitions::new(),
            &schema(json!({
                "discriminator": {
                    "tag": "kind",
                    "mapping": { "cat": { "properties": { "lives": { "type": "uint8" } } } },
                },
            })),
            false,
            Extra::Ignore,
        );

        assert_eq!(
            document["oneOf"][0]["properties"]["kind"],
            json!({ "const": "cat" })
        );
        assert_eq!(document["oneOf"][0]["required"], json!(["kind", "lives"]));
        assert_eq!(document["discriminator"], json!({ "propertyName": "kind" }));
    }
}
