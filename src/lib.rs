//! `jsl-field` stores schema-validated JSON in database columns and form
//! fields, with schemas written in [JSON Schema Language][jsl] ("JSL").
//!
//! A field is declared with a schema, or with the name of a schema that may
//! not be defined yet. Once the field is attached to its owner (a
//! [`ModelClass`](model/struct.ModelClass.html) or a
//! [`Form`](forms/struct.Form.html)), the name is looked up in the owner's
//! [`Namespace`](registry/struct.Namespace.html) the first time the field
//! needs it.
//!
//! # Validating data
//!
//! ```
//! use failure::Error;
//! use jsl_field::{DisableValidation, FieldValue, ModelClass, Namespace, Schema, SchemaField};
//! use serde_json::json;
//!
//! fn main() -> Result<(), Error> {
//!     let app = Namespace::new("app");
//!     let mut model = ModelClass::new("app.Record", app.clone());
//!
//!     // "Person" is not defined yet. That's fine until the field is used.
//!     model.add_field("owner", SchemaField::new("Person"));
//!     assert_eq!(model.check().len(), 1);
//!
//!     app.define(
//!         "Person",
//!         Schema::from_value(json!({
//!             "properties": {
//!                 "name": { "type": "string" },
//!                 "age": { "type": "uint8" }
//!             }
//!         }))?,
//!     );
//!     assert!(model.check().is_empty());
//!
//!     // Values are coerced as they are assigned.
//!     let mut record = model.instantiate()?;
//!     model.set(&mut record, "owner", json!({ "name": "Ann", "age": "43" }))?;
//!     assert_eq!(
//!         record.get("owner").and_then(FieldValue::value),
//!         Some(&json!({ "name": "Ann", "age": 43 }))
//!     );
//!
//!     let mut row = model.save(&record)?;
//!     assert_eq!(row["owner"].as_deref(), Some(r#"{"age":43,"name":"Ann"}"#));
//!
//!     // Rows that no longer match the schema can still be read with
//!     // validation disabled.
//!     row.insert("owner".to_owned(), Some(r#"{"age":"not_a_number"}"#.to_owned()));
//!     assert!(model.from_row(&row).is_err());
//!
//!     let legacy = DisableValidation::run(|| model.from_row(&row))?;
//!     assert_eq!(
//!         legacy.get("owner"),
//!         Some(&FieldValue::Raw(json!({ "age": "not_a_number" })))
//!     );
//!
//!     // Writing is always validated.
//!     assert!(DisableValidation::run(|| model.save(&legacy)).is_err());
//!
//!     Ok(())
//! }
//! ```
//!
//! Failures carry one record per problem, each with a
//! [`json_pointer::JsonPointer`](https://docs.rs/json-pointer/0.3.2/json_pointer/struct.JsonPointer.html)
//! into the input and another into the schema. See
//! [`ValidationError`](validator/struct.ValidationError.html).
//!
//! [jsl]: http://json-schema-language.github.io

mod vm;

pub mod adapter;
pub mod checks;
pub mod context;
pub mod errors;
pub mod export;
pub mod fields;
pub mod forms;
pub mod model;
pub mod registry;
pub mod schema;
pub mod serde;
pub mod validator;

pub use crate::adapter::{Input, Instance, Owner, SchemaAdapter, SchemaConfig, SchemaSpec};
pub use crate::context::{is_validation_disabled, DisableValidation};
pub use crate::errors::{AdapterError, FieldError, SchemaError};
pub use crate::export::ExportOptions;
pub use crate::fields::{FieldValue, SchemaField};
pub use crate::forms::SchemaFormField;
pub use crate::model::{ModelClass, Record, Row};
pub use crate::registry::Namespace;
pub use crate::schema::{Form, Schema, Type};
pub use crate::serde::SerdeSchema;
pub use crate::validator::{Config, Extra, ValidationError, ValidationFailure, Validator};
