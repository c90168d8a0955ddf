//! Model classes declaring schema fields, their records, and storage rows.

use crate::adapter::Owner;
use crate::checks::CheckMessage;
use crate::errors::FieldError;
use crate::fields::{FieldValue, Prepared, SchemaField};
use crate::registry::Namespace;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A storage row: column name to JSON text, `None` for SQL NULL.
pub type Row = BTreeMap<String, Option<String>>;

/// Errors found by [`ModelClass::full_clean`](struct.ModelClass.html#method.full_clean),
/// by field name.
pub type FieldErrors = BTreeMap<String, FieldError>;

/// The attribute through which a record's schema field is read and written.
///
/// Writing runs the value through
/// [`SchemaField::to_python`](../fields/struct.SchemaField.html#method.to_python).
#[derive(Debug, Clone)]
pub struct SchemaAttribute {
    name: String,
    field: Arc<SchemaField>,
}

impl SchemaAttribute {
    fn new(owner: &Owner, name: &str, field: Arc<SchemaField>) -> Self {
        field.adapter().bind(owner, name);
        Self {
            name: name.to_owned(),
            field,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field(&self) -> &SchemaField {
        &self.field
    }

    pub fn get<'r>(&self, record: &'r Record) -> Option<&'r FieldValue> {
        record.values.get(&self.name)
    }

    pub fn set(&self, record: &mut Record, value: impl Into<FieldValue>) -> Result<(), FieldError> {
        let value = self.field.to_python(value.into())?;
        record.values.insert(self.name.clone(), value);
        Ok(())
    }
}

/// A model class: a label, the namespace its schemas live in, and its schema
/// fields in declaration order.
#[derive(Debug, Clone)]
pub struct ModelClass {
    owner: Owner,
    fields: Vec<SchemaAttribute>,
}

impl ModelClass {
    pub fn new(label: impl Into<String>, namespace: Namespace) -> Self {
        Self {
            owner: Owner::new(label, namespace),
            fields: vec![],
        }
    }

    pub fn label(&self) -> &str {
        self.owner.label()
    }

    pub fn namespace(&self) -> &Namespace {
        self.owner.namespace()
    }

    pub fn owner(&self) -> &Owner {
        &self.owner
    }

    /// Declare a field. A field already declared under `name` is replaced.
    pub fn add_field(&mut self, name: &str, mut field: SchemaField) -> &mut Self {
        field.contribute_to_class(&self.owner, name);
        let attribute = SchemaAttribute::new(&self.owner, name, Arc::new(field));

        match self.fields.iter_mut().find(|existing| existing.name == name) {
            Some(existing) => *existing = attribute,
            None => self.fields.push(attribute),
        }
        self
    }

    pub fn field(&self, name: &str) -> Option<&SchemaField> {
        self.attribute(name).map(SchemaAttribute::field)
    }

    pub fn attribute(&self, name: &str) -> Option<&SchemaAttribute> {
        self.fields.iter().find(|attribute| attribute.name == name)
    }

    pub fn fields(&self) -> impl Iterator<Item = &SchemaField> {
        self.fields.iter().map(SchemaAttribute::field)
    }

    pub fn check(&self) -> Vec<CheckMessage> {
        self.fields().flat_map(SchemaField::check).collect()
    }

    /// A new record with every field set to its default.
    pub fn instantiate(&self) -> Result<Record, FieldError> {
        let mut record = Record::new(self.label());
        for attribute in &self.fields {
            let field = attribute.field();
            let default = field.get_default()?;
            if field.base().default.is_some() {
                attribute.set(&mut record, default)?;
            } else {
                // Nothing to validate yet; the field starts out unset.
                record.values.insert(attribute.name.clone(), default);
            }
        }
        Ok(record)
    }

    /// Assign `value` to the field `name` of `record`.
    pub fn set(&self, record: &mut Record, name: &str, value: impl Into<FieldValue>) -> Result<(), FieldError> {
        match self.attribute(name) {
            Some(attribute) => attribute.set(record, value),
            None => Err(FieldError::new(
                format!("{} has no field named '{}'", self.label(), name),
                "invalid",
            )),
        }
    }

    /// Validate every field of `record`, collecting all failures.
    pub fn full_clean(&self, record: &Record) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        for attribute in &self.fields {
            let value = attribute
                .get(record)
                .cloned()
                .unwrap_or(FieldValue::Raw(serde_json::Value::Null));
            if let Err(err) = attribute.field().validate(&value) {
                errors.insert(attribute.name.clone(), err);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Prepare every field of `record` for storage.
    ///
    /// Values are validated even while validation is disabled.
    pub fn save(&self, record: &Record) -> Result<Row, FieldError> {
        let mut row = Row::new();
        for attribute in &self.fields {
            let field = attribute.field();
            let value = attribute
                .get(record)
                .cloned()
                .unwrap_or(FieldValue::Raw(serde_json::Value::Null));

            let column = match field.get_prep_value(value)? {
                Prepared::Json(json) => Some(json),
                Prepared::Null => None,
                Prepared::Expression(expression) => Some(expression.as_sql()),
            };
            row.insert(field.column().to_owned(), column);
        }
        Ok(row)
    }

    /// Load a record from a storage row.
    pub fn from_row(&self, row: &Row) -> Result<Record, FieldError> {
        let mut record = Record::new(self.label());
        for attribute in &self.fields {
            let field = attribute.field();
            let text = row.get(field.column()).and_then(Option::as_deref);
            let value = field.from_db_value(text)?;
            record.values.insert(attribute.name.clone(), value);
        }
        Ok(record)
    }
}

/// One instance of a model class.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    model: String,
    values: BTreeMap<String, FieldValue>,
}

impl Record {
    fn new(model: &str) -> Self {
        Self {
            model: model.to_owned(),
            values: BTreeMap::new(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.values.get(name)
    }

    pub fn values(&self) -> &BTreeMap<String, FieldValue> {
        &self.values
    }
}
