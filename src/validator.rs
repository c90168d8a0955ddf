//! Validate input data against schemas.
//!
//! This module contains logic related to *validation*, the process of taking a
//! piece of input data (called an "instance"), checking if it's valid
//! according to a schema, and producing the coerced value the schema
//! describes.
//!
//! See the docs for [`Validator`](struct.Validator.html) for more.

use crate::registry::Definitions;
use crate::schema::Schema;
use crate::vm;
use failure::Fail;
use json_pointer::JsonPointer;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Validates instances against schemas.
#[derive(Debug, Default, Eq, PartialEq, Clone, Hash)]
pub struct Validator {
    config: Config,
}

impl Validator {
    /// Constructs a new validator using the default configuration.
    pub fn new() -> Self {
        Self::new_with_config(Config::default())
    }

    /// Constructs a new validator using a configuration.
    pub fn new_with_config(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Validate an instance against a schema.
    ///
    /// `definitions` must contain every schema `schema` refers to. On success
    /// this returns the coerced instance; otherwise, every problem found (up to
    /// the configured `max_errors`).
    pub fn validate(
        &self,
        definitions: &Definitions,
        schema: &Schema,
        instance: &Value,
    ) -> Result<Value, Vec<ValidationError>> {
        vm::validate(&self.config, definitions, schema, instance)
    }
}

/// What to do with object properties the schema does not mention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Extra {
    /// Drop them from the validated value.
    Ignore,
    /// Keep them as they are.
    Allow,
    /// Report each of them as an error.
    Forbid,
}

impl Default for Extra {
    fn default() -> Self {
        Extra::Ignore
    }
}

/// Configuration for how validation should proceed.
#[derive(Debug, Eq, PartialEq, Clone, Hash)]
pub struct Config {
    max_errors: usize,
    max_depth: usize,
    extra: Extra,
    strict: bool,
}

impl Config {
    /// Create a new, default `Config`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum number of errors to produce before stopping validation.
    /// 0, the default value, indicates that all errors should be produced.
    pub fn max_errors(&mut self, max_errors: usize) -> &mut Self {
        self.max_errors = max_errors;
        self
    }

    /// Sets the maximum call depth before aborting evaluation. The default
    /// value is to follow 32 cross-references before aborting.
    ///
    /// This functionality exists to support detecting infinite loops in
    /// schemas, for example in circularly-defined schemas. Exceeding the depth
    /// produces a `recursion_loop` error. With 0, no reference is followed.
    pub fn max_depth(&mut self, max_depth: usize) -> &mut Self {
        self.max_depth = max_depth;
        self
    }

    /// Sets how undeclared object properties are treated.
    pub fn extra(&mut self, extra: Extra) -> &mut Self {
        self.extra = extra;
        self
    }

    /// Sets whether inputs must already have the exact type a schema asks for.
    ///
    /// In lax mode (the default), numeric strings become numbers, whole floats
    /// become integers, and so on.
    pub fn strict(&mut self, strict: bool) -> &mut Self {
        self.strict = strict;
        self
    }

    pub fn get_max_errors(&self) -> usize {
        self.max_errors
    }

    pub fn get_max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn get_extra(&self) -> Extra {
        self.extra
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_errors: 0,
            max_depth: 32,
            extra: Extra::Ignore,
            strict: false,
        }
    }
}

/// Contains a single problem with an instance when evaluated against a schema.
///
/// Note that, despite its name, `ValidationError` is not an error in the usual
/// Rust sense. It is one record of a [`ValidationFailure`](struct.ValidationFailure.html).
#[derive(Clone, Debug, PartialEq)]
pub struct ValidationError {
    kind: String,
    message: String,
    instance_tokens: Vec<String>,
    schema_tokens: Vec<String>,
    input: Value,
}

impl ValidationError {
    pub fn new(
        kind: impl Into<String>,
        message: impl Into<String>,
        instance_tokens: Vec<String>,
        schema_tokens: Vec<String>,
        input: Value,
    ) -> ValidationError {
        ValidationError {
            kind: kind.into(),
            message: message.into(),
            instance_tokens,
            schema_tokens,
            input,
        }
    }

    /// A short machine-readable name for the problem, such as `missing`.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// The part of the input that was rejected.
    pub fn input(&self) -> &Value {
        &self.input
    }

    /// The location of the rejected input, one token per object key or
    /// array index.
    pub fn loc(&self) -> &[String] {
        &self.instance_tokens
    }

    /// A pointer into the part of the instance (input) which was rejected.
    pub fn instance_path(&self) -> JsonPointer<String, Vec<String>> {
        JsonPointer::new(self.instance_tokens.clone())
    }

    /// A pointer into the part of the schema which rejected the instance.
    pub fn schema_path(&self) -> JsonPointer<String, Vec<String>> {
        JsonPointer::new(self.schema_tokens.clone())
    }

    /// This error as a plain JSON record.
    pub fn to_record(&self) -> Value {
        json!({
            "type": self.kind,
            "loc": self.instance_tokens,
            "msg": self.message,
            "input": self.input,
        })
    }
}

/// The failure to validate a value: a title plus every problem found.
#[derive(Clone, Debug, PartialEq)]
pub struct ValidationFailure {
    title: String,
    errors: Vec<ValidationError>,
}

impl ValidationFailure {
    pub fn new(title: impl Into<String>, errors: Vec<ValidationError>) -> Self {
        Self {
            title: title.into(),
            errors,
        }
    }

    /// The failure raised when text is not JSON at all.
    pub fn invalid_json(title: impl Into<String>, text: &str, err: &serde_json::Error) -> Self {
        Self::new(
            title,
            vec![ValidationError::new(
                "json_invalid",
                format!("Invalid JSON: {}", err),
                vec![],
                vec![],
                Value::String(text.to_owned()),
            )],
        )
    }

    /// What was being validated, such as the name of a schema.
    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Every error as a plain JSON record.
    pub fn records(&self) -> Vec<Value> {
        self.errors.iter().map(ValidationError::to_record).collect()
    }

    /// Every error as a JSON document.
    pub fn json(&self) -> String {
        Value::Array(self.records()).to_string()
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.errors.len();
        write!(
            f,
            "{} validation error{} for {}",
            count,
            if count == 1 { "" } else { "s" },
            self.title
        )?;
        for error in &self.errors {
            let loc = if error.loc().is_empty() {
                "(root)".to_owned()
            } else {
                error.loc().join(".")
            };
            write!(f, "\n{}\n  {} [type={}]", loc, error.message(), error.kind())?;
        }
        Ok(())
    }
}

impl Fail for ValidationFailure {}
