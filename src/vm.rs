use crate::registry::Definitions;
use crate::schema::{Form, Schema, Type};
use crate::validator::{Config, Extra, ValidationError};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Number, Value};
use std::collections::HashSet;

pub fn validate(
    config: &Config,
    definitions: &Definitions,
    schema: &Schema,
    instance: &Value,
) -> Result<Value, Vec<ValidationError>> {
    let mut vm = Vm {
        config,
        definitions,
        instance_tokens: vec![],
        schema_tokens: vec![vec![]],
        errors: vec![],
    };

    match vm.eval(schema, instance, None) {
        Ok(value) if vm.errors.is_empty() => Ok(value),
        Ok(_) | Err(EvalError::Internal) => Err(vm.errors),
    }
}

enum EvalError {
    Internal,
}

struct Vm<'a> {
    config: &'a Config,
    definitions: &'a Definitions,
    instance_tokens: Vec<String>,
    schema_tokens: Vec<Vec<String>>,
    errors: Vec<ValidationError>,
}

impl<'a> Vm<'a> {
    fn eval(
        &mut self,
        schema: &Schema,
        instance: &Value,
        parent_tag: Option<&str>,
    ) -> Result<Value, EvalError> {
        if instance.is_null() && schema.nullable() {
            return Ok(Value::Null);
        }

        match schema.form() {
            Form::Empty => Ok(instance.clone()),
            Form::Ref(def) => {
                if self.schema_tokens.len() >= self.config.get_max_depth() {
                    self.push_err(
                        "recursion_loop",
                        "Recursion error - cyclic reference detected".to_owned(),
                        instance,
                    )?;
                    return Err(EvalError::Internal);
                }

                let definitions = self.definitions;
                let refd_schema = match definitions.get(def) {
                    Some(refd_schema) => refd_schema,
                    None => {
                        self.push_err(
                            "definition_missing",
                            format!("Reference to undefined schema '{}'", def),
                            instance,
                        )?;
                        return Err(EvalError::Internal);
                    }
                };

                self.schema_tokens
                    .push(vec!["definitions".to_owned(), def.clone()]);
                let out = self.eval(refd_schema, instance, None);
                self.schema_tokens.pop();
                out
            }
            Form::Type(typ) => {
                self.push_schema_token("type");
                let out = self.eval_type(*typ, instance);
                self.pop_schema_token();
                out
            }
            Form::Enum(values) => {
                match instance.as_str() {
                    Some(string) if values.iter().any(|value| value == string) => {}
                    _ => {
                        let expected = values
                            .iter()
                            .map(|value| format!("'{}'", value))
                            .collect::<Vec<_>>()
                            .join(", ");
                        self.push_schema_token("enum");
                        self.push_err("enum", format!("Input should be {}", expected), instance)?;
                        self.pop_schema_token();
                    }
                }
                Ok(instance.clone())
            }
            Form::Elements(sub_schema) => {
                self.push_schema_token("elements");
                let out = if let Some(arr) = instance.as_array() {
                    let mut out = Vec::with_capacity(arr.len());
                    for (i, elem) in arr.iter().enumerate() {
                        self.push_instance_token(i.to_string());
                        out.push(self.eval(sub_schema, elem, None)?);
                        self.pop_instance_token();
                    }
                    Value::Array(out)
                } else {
                    self.push_err("list_type", "Input should be a valid list".to_owned(), instance)?;
                    instance.clone()
                };
                self.pop_schema_token();
                Ok(out)
            }
            Form::Properties(required, optional, has_required) => {
                let obj = match instance.as_object() {
                    Some(obj) => obj,
                    None => {
                        // With no `properties` keyword, the error belongs to
                        // `optionalProperties` instead.
                        if *has_required {
                            self.push_schema_token("properties");
                        } else {
                            self.push_schema_token("optionalProperties");
                        }
                        self.push_err(
                            "model_type",
                            "Input should be a valid dictionary or object".to_owned(),
                            instance,
                        )?;
                        self.pop_schema_token();
                        return Ok(instance.clone());
                    }
                };

                let mut out = Map::new();
                let mut consumed: HashSet<&str> = HashSet::new();

                self.push_schema_token("properties");
                for (property, sub_schema) in required {
                    self.push_schema_token(property.as_str());
                    match lookup(obj, property, sub_schema) {
                        Some((key, sub_instance)) => {
                            consumed.insert(key);
                            self.push_instance_token(key);
                            out.insert(property.clone(), self.eval(sub_schema, sub_instance, None)?);
                            self.pop_instance_token();
                        }
                        None => match sub_schema.default_value() {
                            Some(default) => {
                                out.insert(property.clone(), default.clone());
                            }
                            None => {
                                self.push_instance_token(sub_schema.alias().unwrap_or(property));
                                self.push_err("missing", "Field required".to_owned(), instance)?;
                                self.pop_instance_token();
                            }
                        },
                    }
                    self.pop_schema_token();
                }
                self.pop_schema_token();

                self.push_schema_token("optionalProperties");
                for (property, sub_schema) in optional {
                    self.push_schema_token(property.as_str());
                    match lookup(obj, property, sub_schema) {
                        Some((key, sub_instance)) => {
                            consumed.insert(key);
                            self.push_instance_token(key);
                            out.insert(property.clone(), self.eval(sub_schema, sub_instance, None)?);
                            self.pop_instance_token();
                        }
                        None => {
                            if let Some(default) = sub_schema.default_value() {
                                out.insert(property.clone(), default.clone());
                            }
                        }
                    }
                    self.pop_schema_token();
                }
                self.pop_schema_token();

                if let Some(tag) = parent_tag {
                    if let Some((key, value)) = obj.get_key_value(tag) {
                        consumed.insert(key.as_str());
                        out.insert(key.clone(), value.clone());
                    }
                }

                for (key, value) in obj {
                    if consumed.contains(key.as_str()) {
                        continue;
                    }
                    match self.config.get_extra() {
                        Extra::Ignore => {}
                        Extra::Allow => {
                            out.insert(key.clone(), value.clone());
                        }
                        Extra::Forbid => {
                            self.push_instance_token(key.as_str());
                            self.push_err(
                                "extra_forbidden",
                                "Extra inputs are not permitted".to_owned(),
                                value,
                            )?;
                            self.pop_instance_token();
                        }
                    }
                }

                Ok(Value::Object(out))
            }
            Form::Values(sub_schema) => {
                self.push_schema_token("values");
                let out = if let Some(obj) = instance.as_object() {
                    let mut out = Map::new();
                    for (property, sub_instance) in obj {
                        self.push_instance_token(property.as_str());
                        out.insert(property.clone(), self.eval(sub_schema, sub_instance, None)?);
                        self.pop_instance_token();
                    }
                    Value::Object(out)
                } else {
                    self.push_err("dict_type", "Input should be a valid dictionary".to_owned(), instance)?;
                    instance.clone()
                };
                self.pop_schema_token();
                Ok(out)
            }
            Form::Discriminator(tag, mapping) => {
                self.push_schema_token("discriminator");
                let out = self.eval_discriminator(tag, mapping, instance);
                self.pop_schema_token();
                out
            }
        }
    }

    fn eval_discriminator(
        &mut self,
        tag: &str,
        mapping: &std::collections::BTreeMap<String, Schema>,
        instance: &Value,
    ) -> Result<Value, EvalError> {
        let obj = match instance.as_object() {
            Some(obj) => obj,
            None => {
                self.push_err(
                    "model_type",
                    "Input should be a valid dictionary or object".to_owned(),
                    instance,
                )?;
                return Ok(instance.clone());
            }
        };

        let instance_tag = match obj.get(tag) {
            Some(instance_tag) => instance_tag,
            None => {
                self.push_schema_token("tag");
                self.push_err(
                    "union_tag_not_found",
                    format!("Unable to extract tag using discriminator '{}'", tag),
                    instance,
                )?;
                self.pop_schema_token();
                return Ok(instance.clone());
            }
        };

        match instance_tag.as_str().and_then(|name| mapping.get_key_value(name)) {
            Some((name, sub_schema)) => {
                self.push_schema_token("mapping");
                self.push_schema_token(name.as_str());
                let out = self.eval(sub_schema, instance, Some(tag));
                self.pop_schema_token();
                self.pop_schema_token();
                out
            }
            None => {
                let expected = mapping
                    .keys()
                    .map(|name| format!("'{}'", name))
                    .collect::<Vec<_>>()
                    .join(", ");
                self.push_schema_token("mapping");
                self.push_instance_token(tag);
                self.push_err(
                    "union_tag_invalid",
                    format!(
                        "Input tag {} found using '{}' does not match any of the expected tags: {}",
                        instance_tag, tag, expected
                    ),
                    instance_tag,
                )?;
                self.pop_instance_token();
                self.pop_schema_token();
                Ok(instance.clone())
            }
        }
    }

    fn eval_type(&mut self, typ: Type, instance: &Value) -> Result<Value, EvalError> {
        let lax = !self.config.is_strict();
        match typ {
            Type::Boolean => match instance {
                Value::Bool(_) => Ok(instance.clone()),
                Value::Number(n) if lax && (n.as_u64() == Some(0) || n.as_u64() == Some(1)) => {
                    Ok(Value::Bool(n.as_u64() == Some(1)))
                }
                Value::String(s) if lax => match parse_bool(s) {
                    Some(b) => Ok(Value::Bool(b)),
                    None => self.reject(
                        "bool_parsing",
                        "Input should be a valid boolean, unable to interpret input",
                        instance,
                    ),
                },
                _ => self.reject("bool_type", "Input should be a valid boolean", instance),
            },
            Type::Number | Type::Float32 | Type::Float64 => match instance {
                Value::Number(_) => Ok(instance.clone()),
                Value::String(s) if lax => {
                    match s.trim().parse::<f64>().ok().and_then(Number::from_f64) {
                        Some(n) => Ok(Value::Number(n)),
                        None => self.reject(
                            "float_parsing",
                            "Input should be a valid number, unable to parse string as a number",
                            instance,
                        ),
                    }
                }
                _ => self.reject("float_type", "Input should be a valid number", instance),
            },
            Type::String => match instance {
                Value::String(_) => Ok(instance.clone()),
                _ => self.reject("string_type", "Input should be a valid string", instance),
            },
            Type::Timestamp => self.check_timestamp(instance, lax),
            _ => match typ.int_range() {
                Some((min, max)) => self.check_int(instance, min, max, lax),
                None => Ok(instance.clone()),
            },
        }
    }

    fn check_int(
        &mut self,
        instance: &Value,
        min: i128,
        max: i128,
        lax: bool,
    ) -> Result<Value, EvalError> {
        let n: i128 = match instance {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    i.into()
                } else if let Some(u) = n.as_u64() {
                    u.into()
                } else {
                    let f = n.as_f64().unwrap_or(f64::NAN);
                    if f.fract() != 0.0 || !f.is_finite() {
                        return self.reject(
                            "int_from_float",
                            "Input should be a valid integer, got a number with a fractional part",
                            instance,
                        );
                    }
                    if !lax {
                        return self.reject("int_type", "Input should be a valid integer", instance);
                    }
                    f as i128
                }
            }
            Value::String(s) if lax => match s.trim().parse::<i128>() {
                Ok(n) => n,
                Err(_) => {
                    return self.reject(
                        "int_parsing",
                        "Input should be a valid integer, unable to parse string as an integer",
                        instance,
                    )
                }
            },
            _ => return self.reject("int_type", "Input should be a valid integer", instance),
        };

        if n < min {
            return self.reject(
                "greater_than_equal",
                &format!("Input should be greater than or equal to {}", min),
                instance,
            );
        }
        if n > max {
            return self.reject(
                "less_than_equal",
                &format!("Input should be less than or equal to {}", max),
                instance,
            );
        }

        // Both conversions are exact: n lies within [min, max] of a 64-bit type.
        Ok(if n < 0 {
            Value::from(n as i64)
        } else {
            Value::from(n as u64)
        })
    }

    fn check_timestamp(&mut self, instance: &Value, lax: bool) -> Result<Value, EvalError> {
        match instance {
            Value::String(s) => match DateTime::parse_from_rfc3339(s) {
                Ok(_) => Ok(instance.clone()),
                Err(err) => self.reject(
                    "datetime_parsing",
                    &format!("Input should be a valid datetime, {}", err),
                    instance,
                ),
            },
            Value::Number(n) if lax => {
                match n.as_i64().and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0)) {
                    Some(ts) => Ok(Value::String(ts.to_rfc3339_opts(SecondsFormat::Secs, true))),
                    None => self.reject(
                        "datetime_parsing",
                        "Input should be a valid datetime, dates after 9999 are not supported as unix timestamps",
                        instance,
                    ),
                }
            }
            _ => self.reject("datetime_type", "Input should be a valid datetime", instance),
        }
    }

    fn reject(&mut self, kind: &str, message: &str, instance: &Value) -> Result<Value, EvalError> {
        self.push_err(kind, message.to_owned(), instance)?;
        Ok(instance.clone())
    }

    fn push_schema_token<T: Into<String>>(&mut self, token: T) {
        self.schema_tokens
            .last_mut()
            .expect("unreachable: empty schema stack")
            .push(token.into());
    }

    fn pop_schema_token(&mut self) {
        self.schema_tokens
            .last_mut()
            .expect("unreachable: empty schema stack")
            .pop();
    }

    fn push_instance_token<T: Into<String>>(&mut self, token: T) {
        self.instance_tokens.push(token.into());
    }

    fn pop_instance_token(&mut self) {
        self.instance_tokens.pop();
    }

    fn push_err(&mut self, kind: &str, message: String, input: &Value) -> Result<(), EvalError> {
        let schema_path = self
            .schema_tokens
            .last()
            .expect("unreachable: empty schema stack")
            .clone();

        self.errors.push(ValidationError::new(
            kind,
            message,
            self.instance_tokens.clone(),
            schema_path,
            input.clone(),
        ));

        if self.errors.len() == self.config.get_max_errors() {
            Err(EvalError::Internal)
        } else {
            Ok(())
        }
    }
}

/// Find a property by its alias first, then by its own name.
fn lookup<'v>(
    obj: &'v Map<String, Value>,
    property: &str,
    sub_schema: &Schema,
) -> Option<(&'v str, &'v Value)> {
    sub_schema
        .alias()
        .and_then(|alias| obj.get_key_value(alias))
        .or_else(|| obj.get_key_value(property))
        .map(|(key, value)| (key.as_str(), value))
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "on" | "1" => Some(true),
        "false" | "f" | "no" | "n" | "off" | "0" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;

    fn run(config: &Config, schema: Value, instance: Value) -> Result<Value, Vec<ValidationError>> {
        validate(
            config,
            &Definitions::new(),
            &Schema::from_value(schema).unwrap(),
            &instance,
        )
    }

    fn kinds(errors: Vec<ValidationError>) -> Vec<String> {
        errors.iter().map(|err| err.kind().to_owned()).collect()
    }

    #[test]
    fn lax_mode_coerces() {
        let config = Config::new();
        let schema = json!({
            "properties": {
                "age": { "type": "uint8" },
                "score": { "type": "float64" },
                "active": { "type": "boolean" },
                "seen": { "type": "timestamp" },
            },
        });

        assert_eq!(
            run(
                &config,
                schema,
                json!({ "age": " 42 ", "score": "1.5", "active": "yes", "seen": 0, "unknown": 1 }),
            )
            .unwrap(),
            json!({ "age": 42, "score": 1.5, "active": true, "seen": "1970-01-01T00:00:00Z" })
        );
        assert_eq!(run(&config, json!({ "type": "int32" }), json!(7.0)).unwrap(), json!(7));
    }

    #[test]
    fn strict_mode_does_not_coerce() {
        let mut config = Config::new();
        config.strict(true);

        assert_eq!(
            kinds(run(&config, json!({ "type": "uint8" }), json!("42")).unwrap_err()),
            vec!["int_type"]
        );
        assert_eq!(
            kinds(run(&config, json!({ "type": "int32" }), json!(7.0)).unwrap_err()),
            vec!["int_type"]
        );
        assert_eq!(
            kinds(run(&config, json!({ "type": "boolean" }), json!(1)).unwrap_err()),
            vec!["bool_type"]
        );
        assert_eq!(run(&config, json!({ "type": "uint8" }), json!(42)).unwrap(), json!(42));
    }

    #[test]
    fn integer_errors() {
        let config = Config::new();
        let schema = json!({ "type": "int8" });

        assert_eq!(kinds(run(&config, schema.clone(), json!(128)).unwrap_err()), vec!["less_than_equal"]);
        assert_eq!(kinds(run(&config, schema.clone(), json!(-129)).unwrap_err()), vec!["greater_than_equal"]);
        assert_eq!(kinds(run(&config, schema.clone(), json!(1.5)).unwrap_err()), vec!["int_from_float"]);
        assert_eq!(kinds(run(&config, schema.clone(), json!("abc")).unwrap_err()), vec!["int_parsing"]);
        assert_eq!(kinds(run(&config, schema, json!([])).unwrap_err()), vec!["int_type"]);
    }

    #[test]
    fn missing_properties_use_alias_and_default() {
        let config = Config::new();
        let schema = json!({
            "properties": {
                "name": { "type": "string", "alias": "fullName" },
                "age": { "type": "uint8" },
                "role": { "enum": ["admin", "user"], "default": "user" },
            },
        });

        assert_eq!(
            run(&config, schema.clone(), json!({ "fullName": "Ann", "age": 3 })).unwrap(),
            json!({ "name": "Ann", "age": 3, "role": "user" })
        );
        assert_eq!(
            run(&config, schema.clone(), json!({ "name": "Ann", "age": 3 })).unwrap(),
            json!({ "name": "Ann", "age": 3, "role": "user" })
        );

        let errors = run(&config, schema, json!({ "age": 3, "role": "root" })).unwrap_err();
        let locs: Vec<_> = errors.iter().map(|err| err.instance_path().to_string()).collect();
        assert_eq!(kinds(errors), vec!["missing", "enum"]);
        assert_eq!(locs, vec!["/fullName", "/role"]);
    }

    #[test]
    fn extra_properties() {
        let schema = json!({ "optionalProperties": { "a": {} } });

        let mut config = Config::new();
        config.extra(Extra::Allow);
        assert_eq!(run(&config, schema.clone(), json!({ "b": 1 })).unwrap(), json!({ "b": 1 }));

        config.extra(Extra::Forbid);
        let errors = run(&config, schema.clone(), json!({ "b": 1 })).unwrap_err();
        assert_eq!(errors[0].instance_path().to_string(), "/b");
        assert_eq!(errors[0].schema_path().to_string(), "");

        assert_eq!(
            errors.len(),
            1,
            "only the undeclared property is reported"
        );
        let errors = run(&config, schema, json!("nope")).unwrap_err();
        assert_eq!(errors[0].schema_path().to_string(), "/optionalProperties");
    }

    #[test]
    fn discriminator() {
        let mut config = Config::new();
        config.extra(Extra::Forbid);
        let schema = json!({
            "discriminator": {
                "tag": "kind",
                "mapping": {
                    "cat": { "properties": { "lives": { "type": "uint8" } } },
                    "dog": { "properties": { "good": { "type": "boolean" } } },
                },
            },
        });

        assert_eq!(
            run(&config, schema.clone(), json!({ "kind": "cat", "lives": "9" })).unwrap(),
            json!({ "kind": "cat", "lives": 9 })
        );

        let errors = run(&config, schema.clone(), json!({ "kind": "cow" })).unwrap_err();
        assert_eq!(kinds(errors.clone()), vec!["union_tag_invalid"]);
        assert_eq!(errors[0].schema_path().to_string(), "/discriminator/mapping");

        assert_eq!(
            kinds(run(&config, schema, json!({ "lives": 9 })).unwrap_err()),
            vec!["union_tag_not_found"]
        );
    }

    #[test]
    fn references_and_nullable() {
        let mut definitions = Definitions::new();
        definitions.insert(
            "Node".to_owned(),
            Arc::new(
                Schema::from_value(json!({
                    "properties": {
                        "value": { "type": "int32" },
                        "next": { "ref": "Node", "nullable": true },
                    },
                }))
                .unwrap(),
            ),
        );
        let root = Schema::from_value(json!({ "ref": "Node" })).unwrap();

        let list = json!({ "value": 1, "next": { "value": "2", "next": null } });
        assert_eq!(
            validate(&Config::new(), &definitions, &root, &list).unwrap(),
            json!({ "value": 1, "next": { "value": 2, "next": null } })
        );

        let errors = validate(
            &Config::new(),
            &definitions,
            &root,
            &json!({ "value": 1, "next": { "value": "x", "next": null } }),
        )
        .unwrap_err();
        assert_eq!(errors[0].instance_path().to_string(), "/next/value");
        assert_eq!(
            errors[0].schema_path().to_string(),
            "/definitions/Node/properties/value/type"
        );
    }
}
