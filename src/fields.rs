//! Database column fields storing schema-validated JSON.

use crate::adapter::{Input, Instance, Owner, SchemaAdapter, SchemaConfig, SchemaSpec};
use crate::checks::CheckMessage;
use crate::context::is_validation_disabled;
use crate::errors::{AdapterError, FieldError, SchemaError};
use crate::export::{self, ExportOptions};
use crate::forms::{FormFieldOptions, SchemaFormField};
use crate::validator::Extra;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// The path [`SchemaField::deconstruct`](struct.SchemaField.html#method.deconstruct)
/// records for the field type.
pub const FIELD_PATH: &str = "jsl_field::fields::SchemaField";

/// A plain JSON column: the options every column field understands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JsonField {
    #[serde(skip)]
    name: Option<String>,

    /// Store SQL NULL for null values.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub null: bool,

    /// Accept empty values (`""`, `[]`, `{}`) in `validate`.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub blank: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_column: Option<String>,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub help_text: String,

    #[serde(skip_serializing_if = "is_true")]
    pub editable: bool,
}

fn is_true(value: &bool) -> bool {
    *value
}

impl Default for JsonField {
    fn default() -> Self {
        Self {
            name: None,
            null: false,
            blank: false,
            default: None,
            db_column: None,
            help_text: String::new(),
            editable: true,
        }
    }
}

impl JsonField {
    /// Build a column from keyword arguments. Unknown keywords are rejected.
    pub fn from_kwargs(kwargs: Map<String, Value>) -> Result<Self, SchemaError> {
        serde_json::from_value(Value::Object(kwargs)).map_err(|err| SchemaError::InvalidArgument {
            name: "kwargs".to_owned(),
            reason: err.to_string(),
        })
    }

    /// The keyword arguments reproducing this column; defaults are omitted.
    pub fn deconstruct_kwargs(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(kwargs)) => kwargs,
            _ => Map::new(),
        }
    }

    pub fn set_attributes_from_name(&mut self, name: &str) {
        self.name = Some(name.to_owned());
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The column name in storage rows.
    pub fn column(&self) -> &str {
        self.db_column
            .as_deref()
            .or_else(|| self.name())
            .unwrap_or_default()
    }

    pub fn check(&self, obj: &str) -> Vec<CheckMessage> {
        let name = match self.name() {
            Some(name) => name,
            None => return vec![],
        };

        let mut messages = vec![];
        if name.ends_with('_') {
            messages.push(CheckMessage::error(
                "Field names must not end with an underscore.",
                obj,
                "fields.E001",
            ));
        }
        if name.contains("__") {
            messages.push(CheckMessage::error(
                r#"Field names must not contain "__"."#,
                obj,
                "fields.E002",
            ));
        }
        if name == "pk" {
            messages.push(CheckMessage::error(
                "'pk' is a reserved word that cannot be used as a field name.",
                obj,
                "fields.E003",
            ));
        }
        messages
    }

    pub fn validate(&self, value: &Value) -> Result<(), FieldError> {
        if value.is_null() {
            if self.null {
                return Ok(());
            }
            return Err(FieldError::new("This field cannot be null.", "null"));
        }

        let empty = match value {
            Value::String(s) => s.is_empty(),
            Value::Array(a) => a.is_empty(),
            Value::Object(o) => o.is_empty(),
            _ => false,
        };
        if empty && !self.blank {
            return Err(FieldError::new("This field cannot be blank.", "blank"));
        }
        Ok(())
    }

    /// Serialize a plain value for storage. `None` stands for SQL NULL.
    pub fn get_prep_value(&self, value: &Value) -> Result<Option<String>, SchemaError> {
        if value.is_null() {
            return Ok(None);
        }
        serde_json::to_string(value)
            .map(Some)
            .map_err(|err| SchemaError::Serialization {
                reason: err.to_string(),
            })
    }

    pub fn get_transform(&self, name: &str) -> KeyTransform {
        KeyTransform::new(self.column(), vec![name.to_owned()])
    }
}

/// A lookup of a key (or index) path inside a JSON column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyTransform {
    column: String,
    path: Vec<String>,
}

impl KeyTransform {
    pub fn new(column: impl Into<String>, path: Vec<String>) -> Self {
        Self {
            column: column.into(),
            path,
        }
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// Look one level deeper.
    pub fn get_transform(&self, name: &str) -> KeyTransform {
        let mut path = self.path.clone();
        path.push(name.to_owned());
        KeyTransform::new(self.column.clone(), path)
    }

    /// Apply the lookup to a stored document.
    pub fn extract<'v>(&self, document: &'v Value) -> Option<&'v Value> {
        self.path.iter().try_fold(document, |current, key| match current {
            Value::Object(obj) => obj.get(key),
            Value::Array(arr) => key.parse::<usize>().ok().and_then(|i| arr.get(i)),
            _ => None,
        })
    }

    /// The lookup as a JSON path, such as `$."owner"[0]`.
    pub fn json_path(&self) -> String {
        let mut out = String::from("$");
        for key in &self.path {
            if key.parse::<usize>().is_ok() {
                out.push_str(&format!("[{}]", key));
            } else {
                out.push_str(&format!(".\"{}\"", key.replace('"', "\\\"")));
            }
        }
        out
    }

    pub fn as_sql(&self) -> String {
        format!(
            "JSON_EXTRACT({}, '{}')",
            quote_name(&self.column),
            self.json_path().replace('\'', "''")
        )
    }
}

fn quote_name(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// A query expression. Fields hand these through without coercion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expression {
    Column(String),
    Transform(KeyTransform),
    Raw(String),
}

impl Expression {
    pub fn as_sql(&self) -> String {
        match self {
            Expression::Column(name) => quote_name(name),
            Expression::Transform(transform) => transform.as_sql(),
            Expression::Raw(sql) => sql.clone(),
        }
    }
}

impl From<KeyTransform> for Expression {
    fn from(transform: KeyTransform) -> Self {
        Expression::Transform(transform)
    }
}

/// What a schema field attribute holds.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// JSON text, as read from a column.
    Text(String),
    /// A plain value that was not validated.
    Raw(Value),
    /// A validated value.
    Valid(Instance),
}

impl FieldValue {
    /// The value held, unless it is still text.
    pub fn value(&self) -> Option<&Value> {
        match self {
            FieldValue::Text(_) => None,
            FieldValue::Raw(value) => Some(value),
            FieldValue::Valid(instance) => Some(instance.value()),
        }
    }

    pub fn instance(&self) -> Option<&Instance> {
        match self {
            FieldValue::Valid(instance) => Some(instance),
            _ => None,
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, FieldValue::Valid(_))
    }
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        FieldValue::Raw(value)
    }
}

impl From<Instance> for FieldValue {
    fn from(instance: Instance) -> Self {
        FieldValue::Valid(instance)
    }
}

/// Input to [`SchemaField::get_prep_value`](struct.SchemaField.html#method.get_prep_value).
#[derive(Debug, Clone, PartialEq)]
pub enum PrepValue {
    Literal(FieldValue),
    Expression(Expression),
}

impl From<FieldValue> for PrepValue {
    fn from(value: FieldValue) -> Self {
        PrepValue::Literal(value)
    }
}

impl From<Value> for PrepValue {
    fn from(value: Value) -> Self {
        PrepValue::Literal(FieldValue::Raw(value))
    }
}

impl From<Instance> for PrepValue {
    fn from(instance: Instance) -> Self {
        PrepValue::Literal(FieldValue::Valid(instance))
    }
}

impl From<Expression> for PrepValue {
    fn from(expression: Expression) -> Self {
        PrepValue::Expression(expression)
    }
}

/// A value ready for storage.
#[derive(Debug, Clone, PartialEq)]
pub enum Prepared {
    Json(String),
    Null,
    Expression(Expression),
}

/// Everything needed to rebuild a field: its name, type path and arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deconstructed {
    pub name: String,
    pub path: String,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
}

/// A JSON column whose values are validated against a schema.
#[derive(Debug, Clone)]
pub struct SchemaField {
    base: JsonField,
    schema: Option<SchemaSpec>,
    config: SchemaConfig,
    export: ExportOptions,
    model: Option<String>,
    adapter: SchemaAdapter,
}

impl SchemaField {
    pub fn new(schema: impl Into<SchemaSpec>) -> Self {
        let base = JsonField::default();
        let schema = Some(schema.into());
        let adapter = SchemaAdapter::new(
            schema.clone(),
            SchemaConfig::default(),
            None,
            None,
            base.null,
            ExportOptions::default(),
        );
        Self {
            base,
            schema,
            config: SchemaConfig::default(),
            export: ExportOptions::default(),
            model: None,
            adapter,
        }
    }

    /// Build a field from a schema, validator overrides and keyword arguments.
    ///
    /// Export options (`include`, `exclude`, `by_alias`, ...) are taken out of
    /// `kwargs`; everything left must be a [`JsonField`](struct.JsonField.html)
    /// option.
    pub fn with_options(
        schema: Option<SchemaSpec>,
        config: SchemaConfig,
        mut kwargs: Map<String, Value>,
    ) -> Result<Self, SchemaError> {
        let export = SchemaAdapter::extract_export_kwargs(&mut kwargs)?;
        let base = JsonField::from_kwargs(kwargs)?;
        let adapter = SchemaAdapter::new(
            schema.clone(),
            config.clone(),
            None,
            None,
            base.null,
            export.clone(),
        );
        Ok(Self {
            base,
            schema,
            config,
            export,
            model: None,
            adapter,
        })
    }

    pub fn base(&self) -> &JsonField {
        &self.base
    }

    pub fn adapter(&self) -> &SchemaAdapter {
        &self.adapter
    }

    pub fn schema(&self) -> Option<&SchemaSpec> {
        self.schema.as_ref()
    }

    pub fn config(&self) -> &SchemaConfig {
        &self.config
    }

    pub fn export(&self) -> &ExportOptions {
        &self.export
    }

    pub fn name(&self) -> Option<&str> {
        self.base.name()
    }

    pub fn column(&self) -> &str {
        self.base.column()
    }

    /// Attach the field to its owner under `name`.
    pub fn contribute_to_class(&mut self, owner: &Owner, name: &str) {
        self.base.set_attributes_from_name(name);
        self.model = Some(owner.label().to_owned());
        self.adapter.bind(owner, name);
    }

    fn label(&self) -> String {
        match (&self.model, self.name()) {
            (Some(model), Some(name)) => format!("{}.{}", model, name),
            (None, Some(name)) => name.to_owned(),
            _ => "<unbound field>".to_owned(),
        }
    }

    /// Report configuration problems: bad names, a schema that does not
    /// resolve, or a default the schema rejects. Export names matching no
    /// property only warn.
    pub fn check(&self) -> Vec<CheckMessage> {
        let obj = self.label();
        let mut messages = self.base.check(&obj);

        if let Err(err) = self.adapter.validate_schema() {
            messages.push(CheckMessage::error(err.to_string(), obj, "jsl_field.E001"));
            return messages;
        }
        messages.extend(self.check_export(&obj));

        if self.base.default.is_some() {
            if let Err(err) = self.get_default() {
                messages.push(
                    CheckMessage::error(
                        format!("Default value does not match the schema: {}", err),
                        obj,
                        "jsl_field.E002",
                    )
                    .with_hint("Fix the default, or change the schema to accept it."),
                );
            }
        }

        messages
    }

    // Names in `include`/`exclude` that match nothing are most likely typos.
    fn check_export(&self, obj: &str) -> Vec<CheckMessage> {
        let root = match self.adapter.resolve() {
            Ok(root) => root,
            Err(_) => return vec![],
        };
        if root.validator().config().get_extra() == Extra::Allow {
            return vec![];
        }
        let known = match export::outermost_properties(root.definitions(), root.schema()) {
            Some(known) => known,
            None => return vec![],
        };

        self.export
            .include
            .iter()
            .flatten()
            .chain(self.export.exclude.iter())
            .filter(|name| !known.contains(*name))
            .map(|name| {
                CheckMessage::warning(
                    format!("'{}' is not a property of {}; including or excluding it has no effect.", name, root.title()),
                    obj,
                    "jsl_field.W001",
                )
            })
            .collect()
    }

    /// Validate a value the way saving would, including null and blank
    /// checks.
    pub fn validate(&self, value: &FieldValue) -> Result<(), FieldError> {
        let instance = match value {
            FieldValue::Text(text) => self.adapter.validate_json(text, false)?,
            FieldValue::Raw(value) => self.adapter.validate_python(value.clone(), false)?,
            FieldValue::Valid(instance) => self.adapter.validate_python(instance.clone(), false)?,
        };
        self.base.validate(instance.value())
    }

    /// Turn whatever was assigned or read into the attribute value.
    ///
    /// With validation disabled, JSON text is only parsed and everything else
    /// is returned as is.
    pub fn to_python(&self, value: FieldValue) -> Result<FieldValue, FieldError> {
        if is_validation_disabled() {
            tracing::debug!(field = %self.label(), "validation disabled; keeping raw value");
            return match value {
                FieldValue::Text(text) => serde_json::from_str(&text)
                    .map(FieldValue::Raw)
                    .map_err(|err| FieldError::invalid_json(&err)),
                other => Ok(other),
            };
        }

        let instance = match value {
            FieldValue::Text(text) => self.adapter.validate_json(&text, false)?,
            FieldValue::Raw(value) => self.adapter.validate_python(value, false)?,
            FieldValue::Valid(instance) => self.adapter.validate_python(instance, false)?,
        };
        Ok(FieldValue::Valid(instance))
    }

    /// Convert a stored column value. `None` is SQL NULL.
    pub fn from_db_value(&self, text: Option<&str>) -> Result<FieldValue, FieldError> {
        match text {
            Some(text) => self.to_python(FieldValue::Text(text.to_owned())),
            None => self.to_python(FieldValue::Raw(Value::Null)),
        }
    }

    /// Prepare a value for storage.
    ///
    /// Expressions pass through untouched. Everything else is validated
    /// (strictly first, then with coercion) and dumped, whether or not
    /// validation is disabled.
    pub fn get_prep_value(&self, value: impl Into<PrepValue>) -> Result<Prepared, FieldError> {
        let literal = match value.into() {
            PrepValue::Expression(expression) => return Ok(Prepared::Expression(expression)),
            PrepValue::Literal(literal) => literal,
        };

        let input = match literal {
            FieldValue::Text(text) => {
                Input::Value(serde_json::from_str(&text).map_err(|err| FieldError::invalid_json(&err))?)
            }
            FieldValue::Raw(value) => Input::Value(value),
            FieldValue::Valid(instance) => Input::Instance(instance),
        };

        let instance = match self.adapter.validate_python(input.clone(), true) {
            Ok(instance) => instance,
            Err(AdapterError::Validation(_)) => {
                tracing::debug!(field = %self.label(), "strict validation failed; retrying with coercion");
                let plain = match input {
                    Input::Instance(instance) => self.adapter.dump_python(&instance)?,
                    Input::Value(value) => value,
                };
                self.adapter.validate_python(plain, false)?
            }
            Err(err) => return Err(err.into()),
        };

        let plain = self.adapter.dump_python(&instance)?;
        Ok(match self.base.get_prep_value(&plain)? {
            Some(json) => Prepared::Json(json),
            None => Prepared::Null,
        })
    }

    /// The initial attribute value: the configured default, validated.
    pub fn get_default(&self) -> Result<FieldValue, FieldError> {
        let default = match &self.base.default {
            Some(default) => default.clone(),
            None => return Ok(FieldValue::Raw(Value::Null)),
        };

        let instance = match self.adapter.validate_python(default.clone(), true) {
            Ok(instance) => instance,
            Err(AdapterError::Validation(_)) => self.adapter.validate_python(default, false)?,
            Err(err) => return Err(err.into()),
        };
        Ok(FieldValue::Valid(instance))
    }

    pub fn deconstruct(&self) -> Result<Deconstructed, SchemaError> {
        let mut kwargs = self.base.deconstruct_kwargs();

        if let Some(schema) = &self.schema {
            let schema = serde_json::to_value(schema).map_err(|err| SchemaError::Serialization {
                reason: err.to_string(),
            })?;
            kwargs.insert("schema".to_owned(), schema);
        }
        if !self.config.is_empty() {
            let config = serde_json::to_value(&self.config).map_err(|err| SchemaError::Serialization {
                reason: err.to_string(),
            })?;
            kwargs.insert("config".to_owned(), config);
        }
        kwargs.extend(self.export.to_kwargs());

        Ok(Deconstructed {
            name: self.name().unwrap_or_default().to_owned(),
            path: FIELD_PATH.to_owned(),
            args: vec![],
            kwargs,
        })
    }

    /// Rebuild a field from [`deconstruct`](#method.deconstruct)'s output.
    /// The new field is not attached to any owner.
    pub fn from_deconstructed(deconstructed: &Deconstructed) -> Result<Self, SchemaError> {
        if deconstructed.path != FIELD_PATH {
            return Err(SchemaError::InvalidArgument {
                name: "path".to_owned(),
                reason: format!("expected {}, got {}", FIELD_PATH, deconstructed.path),
            });
        }
        if !deconstructed.args.is_empty() {
            return Err(SchemaError::InvalidArgument {
                name: "args".to_owned(),
                reason: "positional arguments are not supported".to_owned(),
            });
        }

        let mut kwargs = deconstructed.kwargs.clone();
        let schema = kwargs
            .remove("schema")
            .map(serde_json::from_value::<SchemaSpec>)
            .transpose()
            .map_err(|err| SchemaError::InvalidArgument {
                name: "schema".to_owned(),
                reason: err.to_string(),
            })?;
        let config = kwargs
            .remove("config")
            .map(serde_json::from_value::<SchemaConfig>)
            .transpose()
            .map_err(|err| SchemaError::InvalidArgument {
                name: "config".to_owned(),
                reason: err.to_string(),
            })?
            .unwrap_or_default();

        let mut field = Self::with_options(schema, config, kwargs)?;
        if !deconstructed.name.is_empty() {
            field.base.set_attributes_from_name(&deconstructed.name);
        }
        Ok(field)
    }

    /// Look up a key inside stored documents. Results are sub-documents, so
    /// no schema applies to them.
    pub fn get_transform(&self, name: &str) -> KeyTransform {
        self.base.get_transform(name)
    }

    /// A form field editing this column, sharing its schema and owner.
    pub fn formfield(&self) -> SchemaFormField {
        SchemaFormField::from_adapter(
            self.adapter.clone(),
            FormFieldOptions {
                required: !self.base.blank,
                initial: self.base.default.clone(),
                help_text: self.base.help_text.clone(),
                disabled: !self.base.editable,
                ..FormFieldOptions::default()
            },
        )
    }
}

impl fmt::Display for SchemaField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}
