//! Binding schema declarations to their owners, and running values through
//! them.
//!
//! A [`SchemaAdapter`](struct.SchemaAdapter.html) is created as soon as a
//! field is declared, when the schema it names may not exist yet. It is bound
//! to an [`Owner`](struct.Owner.html) afterwards, and resolves the schema in
//! the owner's namespace the first time something needs it.

use crate::errors::{AdapterError, SchemaError};
use crate::export::{self, ExportOptions};
use crate::registry::{Definitions, Namespace};
use crate::schema::{Form, Schema};
use crate::validator::{Config, Extra, ValidationFailure, Validator};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// What a field stores: a schema, a named schema, or a container of either.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaSpec {
    /// A schema defined by name in the owner's namespace. The name need not be
    /// defined yet.
    Ref(String),
    /// A concrete schema.
    Schema(Schema),
    /// A list of values.
    List(Box<SchemaSpec>),
    /// A dictionary with string keys.
    Map(Box<SchemaSpec>),
    /// The value, or null.
    Optional(Box<SchemaSpec>),
}

impl SchemaSpec {
    pub fn reference(name: impl Into<String>) -> Self {
        SchemaSpec::Ref(name.into())
    }

    pub fn list(inner: impl Into<SchemaSpec>) -> Self {
        SchemaSpec::List(Box::new(inner.into()))
    }

    pub fn map(inner: impl Into<SchemaSpec>) -> Self {
        SchemaSpec::Map(Box::new(inner.into()))
    }

    pub fn optional(inner: impl Into<SchemaSpec>) -> Self {
        SchemaSpec::Optional(Box::new(inner.into()))
    }

    /// The schema this declaration stands for. Names stay references.
    pub fn to_schema(&self) -> Schema {
        match self {
            SchemaSpec::Ref(name) => Schema::new(Form::Ref(name.clone())),
            SchemaSpec::Schema(schema) => schema.clone(),
            SchemaSpec::List(inner) => Schema::new(Form::Elements(inner.to_schema())),
            SchemaSpec::Map(inner) => Schema::new(Form::Values(inner.to_schema())),
            SchemaSpec::Optional(inner) => {
                let mut schema = inner.to_schema();
                schema.set_nullable(true);
                schema
            }
        }
    }
}

impl fmt::Display for SchemaSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaSpec::Ref(name) => f.write_str(name),
            SchemaSpec::Schema(schema) => match schema.title() {
                Some(title) => f.write_str(title),
                None => {
                    let text = serde_json::to_string(schema).map_err(|_| fmt::Error)?;
                    f.write_str(&text)
                }
            },
            SchemaSpec::List(inner) => write!(f, "list[{}]", inner),
            SchemaSpec::Map(inner) => write!(f, "dict[str, {}]", inner),
            SchemaSpec::Optional(inner) => write!(f, "Optional[{}]", inner),
        }
    }
}

impl From<&str> for SchemaSpec {
    fn from(name: &str) -> Self {
        SchemaSpec::Ref(name.to_owned())
    }
}

impl From<String> for SchemaSpec {
    fn from(name: String) -> Self {
        SchemaSpec::Ref(name)
    }
}

impl From<Schema> for SchemaSpec {
    fn from(schema: Schema) -> Self {
        SchemaSpec::Schema(schema)
    }
}

/// Per-field overrides of validator settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchemaConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strict: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<Extra>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_errors: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<usize>,

    /// Names the schema in error messages, instead of its declaration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl SchemaConfig {
    pub fn is_empty(&self) -> bool {
        *self == SchemaConfig::default()
    }

    /// Apply the overrides that are set onto `config`.
    pub fn apply(&self, config: &mut Config) {
        if let Some(strict) = self.strict {
            config.strict(strict);
        }
        if let Some(extra) = self.extra {
            config.extra(extra);
        }
        if let Some(max_errors) = self.max_errors {
            config.max_errors(max_errors);
        }
        if let Some(max_depth) = self.max_depth {
            config.max_depth(max_depth);
        }
    }
}

/// Whatever declares a field: a model class or a form.
///
/// Two owners are the same when they have the same label and share a
/// namespace.
#[derive(Debug, Clone)]
pub struct Owner {
    label: String,
    namespace: Namespace,
}

impl Owner {
    pub fn new(label: impl Into<String>, namespace: Namespace) -> Self {
        Self {
            label: label.into(),
            namespace,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }
}

impl PartialEq for Owner {
    fn eq(&self, other: &Owner) -> bool {
        self.label == other.label && self.namespace.ptr_eq(&other.namespace)
    }
}

// 0 marks the null instance, which belongs to no resolution.
static NEXT_RESOLUTION_ID: AtomicU64 = AtomicU64::new(1);

/// A value that passed validation.
///
/// An instance remembers which resolved schema produced it, so handing it back
/// to the same adapter skips validation. Equality compares values only.
#[derive(Debug, Clone)]
pub struct Instance {
    value: Value,
    origin: u64,
}

impl Instance {
    /// The instance standing for SQL NULL on nullable fields.
    pub fn null() -> Self {
        Self {
            value: Value::Null,
            origin: 0,
        }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    pub fn is_null(&self) -> bool {
        self.value.is_null()
    }
}

impl PartialEq for Instance {
    fn eq(&self, other: &Instance) -> bool {
        self.value == other.value
    }
}

impl Serialize for Instance {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.value.serialize(serializer)
    }
}

/// Input to [`SchemaAdapter::validate_python`](struct.SchemaAdapter.html#method.validate_python).
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Value(Value),
    Instance(Instance),
}

impl Input {
    pub fn is_null(&self) -> bool {
        match self {
            Input::Value(value) => value.is_null(),
            Input::Instance(instance) => instance.is_null(),
        }
    }
}

impl From<Value> for Input {
    fn from(value: Value) -> Self {
        Input::Value(value)
    }
}

impl From<Instance> for Input {
    fn from(instance: Instance) -> Self {
        Input::Instance(instance)
    }
}

/// A schema declaration after resolution: the schema itself, everything it
/// refers to, and a validator configured for it.
#[derive(Debug)]
pub struct RootAdapter {
    id: u64,
    schema: Schema,
    definitions: Definitions,
    validator: Validator,
    title: String,
}

impl RootAdapter {
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn definitions(&self) -> &Definitions {
        &self.definitions
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    fn validate(&self, value: &Value, strict: bool) -> Result<Instance, ValidationFailure> {
        let result = if strict && !self.validator.config().is_strict() {
            let mut config = self.validator.config().clone();
            config.strict(true);
            Validator::new_with_config(config).validate(&self.definitions, &self.schema, value)
        } else {
            self.validator.validate(&self.definitions, &self.schema, value)
        };

        match result {
            Ok(value) => Ok(Instance {
                value,
                origin: self.id,
            }),
            Err(errors) => Err(ValidationFailure::new(self.title.clone(), errors)),
        }
    }
}

#[derive(Debug, Default)]
struct State {
    owner: Option<Owner>,
    attribute_name: Option<String>,
    root: Option<Arc<RootAdapter>>,
}

/// Validates and dumps values for one field.
pub struct SchemaAdapter {
    schema: Option<SchemaSpec>,
    config: SchemaConfig,
    allow_null: bool,
    export: ExportOptions,
    state: RwLock<State>,
}

impl SchemaAdapter {
    pub fn new(
        schema: Option<SchemaSpec>,
        config: SchemaConfig,
        owner: Option<Owner>,
        attribute_name: Option<String>,
        allow_null: bool,
        export: ExportOptions,
    ) -> Self {
        Self {
            schema,
            config,
            allow_null,
            export,
            state: RwLock::new(State {
                owner,
                attribute_name,
                root: None,
            }),
        }
    }

    /// Remove the export options from a keyword map, leaving the rest.
    pub fn extract_export_kwargs(kwargs: &mut Map<String, Value>) -> Result<ExportOptions, SchemaError> {
        ExportOptions::extract(kwargs)
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

    pub fn allow_null(&self) -> bool {
        self.allow_null
    }

    pub fn owner(&self) -> Option<Owner> {
        self.state.read().owner.clone()
    }

    pub fn attribute_name(&self) -> Option<String> {
        self.state.read().attribute_name.clone()
    }

    pub fn is_bound(&self) -> bool {
        self.state.read().owner.is_some()
    }

    pub fn is_resolved(&self) -> bool {
        self.state.read().root.is_some()
    }

    /// The name used for the schema in error messages.
    pub fn title(&self) -> String {
        match (&self.config.title, &self.schema) {
            (Some(title), _) => title.clone(),
            (None, Some(spec)) => spec.to_string(),
            (None, None) => "None".to_owned(),
        }
    }

    /// Attach the adapter to the owner declaring it.
    ///
    /// Binding the same owner again does nothing. Another owner takes over
    /// only while the schema is unresolved.
    pub fn bind(&self, owner: &Owner, attribute_name: &str) {
        let mut state = self.state.write();

        if state.owner.as_ref() == Some(owner) {
            if state.attribute_name.is_none() {
                state.attribute_name = Some(attribute_name.to_owned());
            }
            return;
        }

        if state.root.is_some() {
            tracing::warn!(
                owner = owner.label(),
                field = attribute_name,
                "schema already resolved for another owner; ignoring rebind"
            );
            return;
        }

        tracing::debug!(owner = owner.label(), field = attribute_name, schema = %self.title(), "binding schema");
        state.owner = Some(owner.clone());
        state.attribute_name = Some(attribute_name.to_owned());
    }

    /// Resolve the schema now, reporting why it cannot be.
    pub fn validate_schema(&self) -> Result<(), SchemaError> {
        self.resolve().map(|_| ())
    }

    /// The resolved schema, resolving it on first use.
    ///
    /// A failed resolution is not remembered: once the missing names are
    /// defined, the next call succeeds.
    pub fn resolve(&self) -> Result<Arc<RootAdapter>, SchemaError> {
        if let Some(root) = &self.state.read().root {
            return Ok(Arc::clone(root));
        }

        let mut state = self.state.write();
        if let Some(root) = &state.root {
            return Ok(Arc::clone(root));
        }

        let root = Arc::new(self.build_root(&state)?);
        tracing::debug!(
            field = state.attribute_name.as_deref().unwrap_or(""),
            schema = %root.title,
            definitions = root.definitions.len(),
            "resolved schema"
        );
        state.root = Some(Arc::clone(&root));
        Ok(root)
    }

    fn build_root(&self, state: &State) -> Result<RootAdapter, SchemaError> {
        let field = state.attribute_name.clone().unwrap_or_default();
        let spec = self
            .schema
            .as_ref()
            .ok_or_else(|| SchemaError::MissingSchema { field: field.clone() })?;
        let schema = spec.to_schema();

        let definitions = match (schema.refs().first(), &state.owner) {
            (None, _) => Definitions::new(),
            (Some(reference), None) => {
                return Err(SchemaError::Unbound {
                    field,
                    schema: spec.to_string(),
                    reference: (*reference).to_owned(),
                })
            }
            (Some(_), Some(owner)) => {
                owner
                    .namespace()
                    .collect(&schema)
                    .map_err(|reference| SchemaError::UnresolvedReference {
                        field: field.clone(),
                        schema: spec.to_string(),
                        reference,
                        namespace: owner.namespace().name().to_owned(),
                    })?
            }
        };

        if !self.allow_null && accepts_null(&schema, &definitions) {
            return Err(SchemaError::NullableSchema {
                field,
                schema: spec.to_string(),
            });
        }

        let mut config = Config::new();
        self.config.apply(&mut config);

        Ok(RootAdapter {
            id: NEXT_RESOLUTION_ID.fetch_add(1, Ordering::Relaxed),
            schema,
            definitions,
            validator: Validator::new_with_config(config),
            title: self.title(),
        })
    }

    /// Validate a value, or pass through an instance this adapter produced.
    ///
    /// `strict` turns off coercion for this call; without it, the configured
    /// mode applies.
    pub fn validate_python(&self, value: impl Into<Input>, strict: bool) -> Result<Instance, AdapterError> {
        let input = value.into();
        if self.allow_null && input.is_null() {
            return Ok(Instance::null());
        }

        let root = self.resolve()?;
        let value = match input {
            Input::Instance(instance) if instance.origin == root.id => return Ok(instance),
            Input::Instance(instance) => instance.value,
            Input::Value(value) => value,
        };
        Ok(root.validate(&value, strict)?)
    }

    /// Parse JSON text, then validate it the same way as
    /// [`validate_python`](#method.validate_python).
    pub fn validate_json(&self, text: &str, strict: bool) -> Result<Instance, AdapterError> {
        match serde_json::from_str::<Value>(text) {
            Ok(value) => self.validate_python(value, strict),
            Err(err) => Err(ValidationFailure::invalid_json(self.title(), text, &err).into()),
        }
    }

    /// Dump an instance to plain JSON, honoring the export options.
    pub fn dump_python(&self, instance: &Instance) -> Result<Value, SchemaError> {
        if instance.is_null() {
            return Ok(Value::Null);
        }
        let root = self.resolve()?;
        Ok(export::dump(&root.definitions, &root.schema, &instance.value, &self.export))
    }

    /// Same as [`dump_python`](#method.dump_python), serialized.
    pub fn dump_json(&self, instance: &Instance) -> Result<Vec<u8>, SchemaError> {
        let value = self.dump_python(instance)?;
        serde_json::to_vec(&value).map_err(|err| SchemaError::Serialization {
            reason: err.to_string(),
        })
    }

    /// A JSON Schema document describing accepted values.
    pub fn json_schema(&self) -> Result<Value, SchemaError> {
        let root = self.resolve()?;
        Ok(export::json_schema(
            &root.title,
            &root.definitions,
            &root.schema,
            self.export.by_alias,
            root.validator.config().get_extra(),
        ))
    }
}

/// An unresolved copy, bound to the same owner.
impl Clone for SchemaAdapter {
    fn clone(&self) -> Self {
        let state = self.state.read();
        Self::new(
            self.schema.clone(),
            self.config.clone(),
            state.owner.clone(),
            state.attribute_name.clone(),
            self.allow_null,
            self.export.clone(),
        )
    }
}

impl fmt::Debug for SchemaAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("SchemaAdapter")
            .field("schema", &self.schema)
            .field("config", &self.config)
            .field("owner", &state.owner.as_ref().map(Owner::label))
            .field("attribute_name", &state.attribute_name)
            .field("allow_null", &self.allow_null)
            .field("export", &self.export)
            .field("resolved", &state.root.is_some())
            .finish()
    }
}

// Only the root and one hop through a reference count; a nullable property
// deeper inside is fine.
fn accepts_null(schema: &Schema, definitions: &Definitions) -> bool {
    if schema.nullable() {
        return true;
    }
    match schema.form() {
        Form::Ref(name) => definitions.get(name).map_or(false, |refd| refd.nullable()),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn person() -> Schema {
        Schema::from_value(json!({
            "properties": {
                "name": { "type": "string" },
                "age": { "type": "uint8" },
            },
            "optionalProperties": {
                "email": { "type": "string" },
            },
        }))
        .unwrap()
    }

    fn adapter(schema: impl Into<SchemaSpec>, allow_null: bool) -> SchemaAdapter {
        SchemaAdapter::new(
            Some(schema.into()),
            SchemaConfig::default(),
            None,
            Some("data".to_owned()),
            allow_null,
            ExportOptions::default(),
        )
    }

    #[test]
    fn spec_display_and_serde() {
        let spec = SchemaSpec::optional(SchemaSpec::list("Person"));
        assert_eq!(spec.to_string(), "Optional[list[Person]]");
        assert_eq!(SchemaSpec::map("Person").to_string(), "dict[str, Person]");
        assert_eq!(
            serde_json::to_value(&spec).unwrap(),
            json!({ "optional": { "list": { "ref": "Person" } } })
        );
        assert_eq!(
            serde_json::from_value::<SchemaSpec>(json!({ "optional": { "list": { "ref": "Person" } } }))
                .unwrap(),
            spec
        );
    }

    #[test]
    fn forward_reference_resolves_once_defined() {
        let namespace = Namespace::new("app");
        let owner = Owner::new("app.Record", namespace.clone());
        let adapter = adapter(SchemaSpec::list("Person"), false);
        adapter.bind(&owner, "people");

        match adapter.validate_schema() {
            Err(SchemaError::UnresolvedReference { reference, .. }) => assert_eq!(reference, "Person"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(!adapter.is_resolved());

        namespace.define("Person", person());
        let instance = adapter
            .validate_python(json!([{ "name": "Ann", "age": "3" }]), false)
            .unwrap();
        assert_eq!(instance.value(), &json!([{ "name": "Ann", "age": 3 }]));
    }

    #[test]
    fn unbound_adapters() {
        assert!(adapter(person(), false).validate_schema().is_ok());

        match adapter("Person", false).validate_schema() {
            Err(SchemaError::Unbound { field, reference, .. }) => {
                assert_eq!(field, "data");
                assert_eq!(reference, "Person");
            }
            other => panic!("unexpected {:?}", other),
        }

        let missing = SchemaAdapter::new(
            None,
            SchemaConfig::default(),
            None,
            None,
            false,
            ExportOptions::default(),
        );
        assert!(matches!(missing.validate_schema(), Err(SchemaError::MissingSchema { .. })));
    }

    #[test]
    fn nullable_schema_needs_nullable_field() {
        let spec = SchemaSpec::optional(person());
        assert!(matches!(
            adapter(spec.clone(), false).validate_schema(),
            Err(SchemaError::NullableSchema { .. })
        ));
        assert!(adapter(spec, true).validate_schema().is_ok());
    }

    #[test]
    fn null_short_circuits() {
        let adapter = adapter(person(), true);
        let instance = adapter.validate_python(Value::Null, false).unwrap();
        assert!(instance.is_null());
        assert_eq!(adapter.dump_python(&instance).unwrap(), Value::Null);
        assert!(!adapter.is_resolved());
    }

    #[test]
    fn own_instances_pass_through() {
        let adapter = adapter(person(), false);
        let instance = adapter
            .validate_python(json!({ "name": "Ann", "age": 3 }), false)
            .unwrap();

        let again = adapter.validate_python(instance.clone(), true).unwrap();
        assert_eq!(again, instance);

        let other = self::adapter(person(), false);
        assert_eq!(other.validate_python(instance, true).unwrap().value(), &json!({ "name": "Ann", "age": 3 }));
    }

    #[test]
    fn strict_and_lax() {
        let adapter = adapter(person(), false);
        let lax = json!({ "name": "Ann", "age": "3" });

        assert!(adapter.validate_python(lax.clone(), false).is_ok());
        match adapter.validate_python(lax, true) {
            Err(AdapterError::Validation(failure)) => {
                assert_eq!(failure.title(), adapter.title());
                assert_eq!(failure.errors()[0].kind(), "int_type");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn json_and_python_agree() {
        let adapter = adapter(person(), false);
        let text = r#"{ "name": 1, "age": 300 }"#;

        let from_json = match adapter.validate_json(text, false) {
            Err(AdapterError::Validation(failure)) => failure,
            other => panic!("unexpected {:?}", other),
        };
        let from_python = match adapter.validate_python(serde_json::from_str::<Value>(text).unwrap(), false) {
            Err(AdapterError::Validation(failure)) => failure,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(from_json, from_python);
        assert_eq!(from_json.error_count(), 2);

        match adapter.validate_json("{", false) {
            Err(AdapterError::Validation(failure)) => {
                assert_eq!(failure.errors()[0].kind(), "json_invalid");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn zero_max_depth_reports_recursion() {
        let namespace = Namespace::new("app");
        namespace.define("Loop", Schema::from_value(json!({ "ref": "Loop" })).unwrap());

        let config: SchemaConfig = serde_json::from_value(json!({ "max_depth": 0 })).unwrap();
        let adapter = SchemaAdapter::new(Some("Loop".into()), config, None, None, false, ExportOptions::default());
        adapter.bind(&Owner::new("app.Record", namespace), "data");

        match adapter.validate_python(json!({}), false) {
            Err(AdapterError::Validation(failure)) => {
                assert_eq!(failure.error_count(), 1);
                assert_eq!(failure.errors()[0].kind(), "recursion_loop");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn rebinding() {
        let namespace = Namespace::new("app");
        namespace.define("Person", person());
        let first = Owner::new("app.A", namespace.clone());
        let second = Owner::new("app.B", namespace);

        let adapter = adapter("Person", false);
        adapter.bind(&first, "data");
        adapter.bind(&second, "data");
        assert_eq!(adapter.owner().unwrap().label(), "app.B");

        adapter.validate_schema().unwrap();
        adapter.bind(&first, "data");
        assert_eq!(adapter.owner().unwrap().label(), "app.B");
    }

    #[test]
    fn dumps_and_json_schema() {
        let mut config = SchemaConfig::default();
        config.title = Some("Person".to_owned());
        let adapter = SchemaAdapter::new(
            Some(person().into()),
            config,
            None,
            None,
            false,
            ExportOptions {
                exclude: ["age".to_owned()].iter().cloned().collect(),
                ..ExportOptions::default()
            },
        );

        let instance = adapter
            .validate_python(json!({ "name": "Ann", "age": 3 }), false)
            .unwrap();
        assert_eq!(adapter.dump_python(&instance).unwrap(), json!({ "name": "Ann" }));
        assert_eq!(adapter.dump_json(&instance).unwrap(), br#"{"name":"Ann"}"#.to_vec());
        assert_eq!(adapter.json_schema().unwrap()["title"], json!("Person"));
    }
}
