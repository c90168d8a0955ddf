//! Error types for schema configuration, adapters and fields.

use crate::validator::ValidationFailure;
use failure::Fail;
use serde_json::Value;

/// Configuration problems with a schema or with the field declaring it.
///
/// These are reported through [`check`](../fields/struct.SchemaField.html#method.check)
/// as diagnostic messages. Binding a field never produces them.
#[derive(Debug, Fail, PartialEq, Clone, Eq, Hash)]
pub enum SchemaError {
    /// A schema-like object did not take on a valid form.
    ///
    /// Only certain combinations of keywords make for valid JSL schemas.
    /// Converting a `SerdeSchema` with an invalid combination of keywords into
    /// a `Schema` results in this error.
    #[fail(display = "invalid schema form")]
    InvalidForm,

    /// A schema-like object specified a property more than once.
    ///
    /// This arises when `properties`, `optionalProperties`, or a
    /// discriminator's `tag` share a property in common.
    #[fail(display = "ambiguous property: {}", property)]
    AmbiguousProperty { property: String },

    /// The `type` keyword named a type this crate does not know.
    #[fail(display = "invalid type: {}", typ)]
    InvalidType { typ: String },

    /// The `enum` keyword was empty or repeated a value.
    #[fail(display = "invalid enum: {}", reason)]
    InvalidEnum { reason: String },

    /// A field was declared without any schema.
    #[fail(display = "schema for field '{}' is not set", field)]
    MissingSchema { field: String },

    /// A schema refers to a name the owner's namespace does not define.
    #[fail(
        display = "cannot resolve schema {} for field '{}': '{}' is not defined in namespace '{}'",
        schema, field, reference, namespace
    )]
    UnresolvedReference {
        field: String,
        schema: String,
        reference: String,
        namespace: String,
    },

    /// A schema refers to a name, but its adapter was never bound to an owner.
    #[fail(
        display = "schema {} for field '{}' refers to '{}', but the field is not bound to an owner",
        schema, field, reference
    )]
    Unbound {
        field: String,
        schema: String,
        reference: String,
    },

    /// The schema accepts null, which a non-nullable column cannot store.
    #[fail(
        display = "schema {} for field '{}' accepts null values, but the field is not nullable; set `null` to true",
        schema, field
    )]
    NullableSchema { field: String, schema: String },

    /// A keyword argument passed to a field was unknown or malformed.
    #[fail(display = "invalid argument '{}': {}", name, reason)]
    InvalidArgument { name: String, reason: String },

    /// Serializing a schema or value to JSON failed.
    #[fail(display = "serialization failed: {}", reason)]
    Serialization { reason: String },
}

/// Everything an adapter operation can fail with.
#[derive(Debug, Fail)]
pub enum AdapterError {
    /// The schema could not be resolved.
    #[fail(display = "{}", _0)]
    Schema(#[cause] SchemaError),

    /// The value did not satisfy the schema.
    #[fail(display = "{}", _0)]
    Validation(#[cause] ValidationFailure),
}

impl From<SchemaError> for AdapterError {
    fn from(err: SchemaError) -> Self {
        AdapterError::Schema(err)
    }
}

impl From<ValidationFailure> for AdapterError {
    fn from(err: ValidationFailure) -> Self {
        AdapterError::Validation(err)
    }
}

/// A validation error in the vocabulary of the web framework.
///
/// Field wrappers translate [`ValidationFailure`]s into this type at their
/// boundary. The structured detail survives in [`params`](#method.params) so
/// callers can inspect which sub-fields failed.
#[derive(Debug, Fail, PartialEq, Clone)]
#[fail(display = "{}", message)]
pub struct FieldError {
    message: String,
    code: String,
    params: Value,
}

impl FieldError {
    pub fn new(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: code.into(),
            params: Value::Null,
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    /// The error raised when a value cannot be parsed as JSON.
    pub fn invalid_json(err: &serde_json::Error) -> Self {
        Self::new("Value must be valid JSON.", "invalid")
            .with_params(serde_json::json!({ "reason": err.to_string() }))
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn params(&self) -> &Value {
        &self.params
    }

    /// The per-location error records carried by this error.
    ///
    /// Column fields attach the records directly as params; form fields nest
    /// them under `errors`. Both shapes are handled here.
    pub fn error_records(&self) -> &[Value] {
        match &self.params {
            Value::Array(records) => records,
            Value::Object(params) => params
                .get("errors")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or(&[]),
            _ => &[],
        }
    }
}

impl From<ValidationFailure> for FieldError {
    fn from(failure: ValidationFailure) -> Self {
        FieldError::new(failure.title(), "invalid").with_params(Value::Array(failure.records()))
    }
}

impl From<SchemaError> for FieldError {
    fn from(err: SchemaError) -> Self {
        FieldError::new(err.to_string(), "improperly_configured")
    }
}

impl From<AdapterError> for FieldError {
    fn from(err: AdapterError) -> Self {
        match err {
            AdapterError::Schema(err) => err.into(),
            AdapterError::Validation(failure) => failure.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_records_from_either_shape() {
        let list = FieldError::new("Person", "invalid").with_params(json!([{ "type": "missing" }]));
        assert_eq!(list.error_records().len(), 1);

        let nested = FieldError::new("Schema didn't match for Person.", "invalid")
            .with_params(json!({ "title": "Person", "errors": [{ "type": "a" }, { "type": "b" }] }));
        assert_eq!(nested.error_records().len(), 2);

        assert!(FieldError::new("x", "required").error_records().is_empty());
    }

    #[test]
    fn schema_error_display() {
        let err = SchemaError::UnresolvedReference {
            field: "data".to_owned(),
            schema: "list[Person]".to_owned(),
            reference: "Person".to_owned(),
            namespace: "app".to_owned(),
        };
        assert_eq!(
            err.to_string(),
            "cannot resolve schema list[Person] for field 'data': 'Person' is not defined in namespace 'app'"
        );
    }
}
