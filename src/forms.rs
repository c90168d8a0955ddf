//! Form fields editing schema-validated JSON.

use crate::adapter::{Instance, Owner, SchemaAdapter, SchemaConfig, SchemaSpec};
use crate::errors::{AdapterError, FieldError, SchemaError};
use crate::registry::Namespace;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Keyword arguments older versions accepted, now ignored.
pub const DEPRECATED_EXPORT_KWARGS: &[&str] = &["encoder", "decoder", "skip_defaults"];

/// Which widget renders a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WidgetSpec {
    Textarea,
    /// A JSON form generated from the field's own schema.
    SchemaForm,
    /// A JSON form generated from the JSON Schema of the field.
    JsonForm,
}

impl Default for WidgetSpec {
    fn default() -> Self {
        WidgetSpec::Textarea
    }
}

/// A widget, ready to render.
#[derive(Debug, Clone, PartialEq)]
pub enum Widget {
    Textarea,
    JsonForm { schema: Value },
}

impl Widget {
    pub fn render(&self, name: &str, value: Option<&str>) -> String {
        let textarea = format!(
            r#"<textarea name="{}" cols="40" rows="10">{}</textarea>"#,
            escape(name),
            escape(value.unwrap_or_default())
        );
        match self {
            Widget::Textarea => textarea,
            Widget::JsonForm { schema } => format!(
                r#"<div data-jsonform-schema="{}">{}</div>"#,
                escape(&schema.to_string()),
                textarea
            ),
        }
    }
}

#[cfg(feature = "jsonform")]
fn prepare_widget(spec: WidgetSpec, adapter: &SchemaAdapter) -> Widget {
    match spec {
        WidgetSpec::Textarea => Widget::Textarea,
        WidgetSpec::SchemaForm | WidgetSpec::JsonForm => match adapter.json_schema() {
            Ok(schema) => Widget::JsonForm { schema },
            Err(err) => {
                tracing::warn!(error = %err, "cannot build JSON form widget; using a textarea");
                Widget::Textarea
            }
        },
    }
}

#[cfg(not(feature = "jsonform"))]
fn prepare_widget(spec: WidgetSpec, _adapter: &SchemaAdapter) -> Widget {
    if spec != WidgetSpec::Textarea {
        tracing::warn!(
            widget = ?spec,
            "the `jsonform` feature is not enabled; falling back to a textarea"
        );
    }
    Widget::Textarea
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

/// Options shared by all form fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FormFieldOptions {
    pub required: bool,
    pub initial: Option<Value>,
    pub help_text: String,
    pub disabled: bool,
    pub label: Option<String>,
    pub widget: WidgetSpec,
}

impl Default for FormFieldOptions {
    fn default() -> Self {
        Self {
            required: true,
            initial: None,
            help_text: String::new(),
            disabled: false,
            label: None,
            widget: WidgetSpec::default(),
        }
    }
}

/// Submitted text that did not validate, kept so it can be shown again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidJsonInput(pub String);

/// A value moving through a form field.
#[derive(Debug, Clone, PartialEq)]
pub enum FormValue {
    /// Submitted JSON text.
    Text(String),
    /// A plain value, such as an initial value.
    Value(Value),
    Valid(Instance),
    Invalid(InvalidJsonInput),
}

impl FormValue {
    fn is_empty(&self) -> bool {
        match self {
            FormValue::Text(text) => text.trim().is_empty(),
            FormValue::Value(value) => match value {
                Value::Null => true,
                Value::String(s) => s.is_empty(),
                Value::Array(a) => a.is_empty(),
                Value::Object(o) => o.is_empty(),
                _ => false,
            },
            FormValue::Valid(_) | FormValue::Invalid(_) => false,
        }
    }

    pub fn instance(&self) -> Option<&Instance> {
        match self {
            FormValue::Valid(instance) => Some(instance),
            _ => None,
        }
    }
}

impl From<Value> for FormValue {
    fn from(value: Value) -> Self {
        FormValue::Value(value)
    }
}

impl From<&str> for FormValue {
    fn from(text: &str) -> Self {
        FormValue::Text(text.to_owned())
    }
}

impl From<Instance> for FormValue {
    fn from(instance: Instance) -> Self {
        FormValue::Valid(instance)
    }
}

/// A form field whose value is JSON matching a schema.
#[derive(Debug, Clone)]
pub struct SchemaFormField {
    adapter: Arc<SchemaAdapter>,
    options: FormFieldOptions,
}

impl SchemaFormField {
    pub fn new(schema: impl Into<SchemaSpec>) -> Self {
        let adapter = SchemaAdapter::new(
            Some(schema.into()),
            SchemaConfig::default(),
            None,
            None,
            false,
            Default::default(),
        );
        Self::from_adapter(adapter, FormFieldOptions::default())
    }

    /// Build a field from a schema, validator overrides and keyword arguments.
    ///
    /// Export options are taken out of `kwargs` first; the rest must be
    /// [`FormFieldOptions`](struct.FormFieldOptions.html).
    pub fn with_options(
        schema: Option<SchemaSpec>,
        config: SchemaConfig,
        allow_null: bool,
        mut kwargs: Map<String, Value>,
    ) -> Result<Self, SchemaError> {
        for name in DEPRECATED_EXPORT_KWARGS {
            if kwargs.remove(*name).is_some() {
                tracing::warn!(kwarg = *name, "ignoring deprecated form field argument");
            }
        }

        let export = SchemaAdapter::extract_export_kwargs(&mut kwargs)?;
        let options: FormFieldOptions =
            serde_json::from_value(Value::Object(kwargs)).map_err(|err| SchemaError::InvalidArgument {
                name: "kwargs".to_owned(),
                reason: err.to_string(),
            })?;

        let adapter = SchemaAdapter::new(schema, config, None, None, allow_null, export);
        Ok(Self::from_adapter(adapter, options))
    }

    pub fn from_adapter(adapter: SchemaAdapter, options: FormFieldOptions) -> Self {
        Self {
            adapter: Arc::new(adapter),
            options,
        }
    }

    pub fn adapter(&self) -> &SchemaAdapter {
        &self.adapter
    }

    pub fn options(&self) -> &FormFieldOptions {
        &self.options
    }

    pub fn widget(&self) -> Widget {
        prepare_widget(self.options.widget, &self.adapter)
    }

    /// Bind the schema to `form` unless it is bound already, and return the
    /// field as it appears in that form.
    pub fn get_bound_field(&self, form: &Form, name: &str) -> BoundField {
        if !self.adapter.is_bound() {
            self.adapter.bind(form.owner(), name);
        }
        BoundField {
            name: name.to_owned(),
            field: self.clone(),
            data: form.data.as_ref().map(|data| data.get(name).cloned()),
            initial: form
                .initial
                .get(name)
                .cloned()
                .or_else(|| self.options.initial.clone()),
        }
    }

    /// The value to show for the field: what was submitted if it validates,
    /// the submitted text itself if not.
    pub fn bound_data(&self, data: Option<&str>, initial: Option<&Value>) -> Result<Option<FormValue>, FieldError> {
        if self.options.disabled {
            let initial = initial.cloned().unwrap_or(Value::Null);
            return Ok(Some(FormValue::Valid(self.adapter.validate_python(initial, false)?)));
        }

        let data = match data {
            Some(data) => data,
            None => return Ok(None),
        };
        match self.adapter.validate_json(data, false) {
            Ok(instance) => Ok(Some(FormValue::Valid(instance))),
            Err(AdapterError::Validation(_)) => Ok(Some(FormValue::Invalid(InvalidJsonInput(data.to_owned())))),
            Err(err) => Err(err.into()),
        }
    }

    fn try_coerce(&self, value: FormValue) -> Result<Instance, AdapterError> {
        match value {
            FormValue::Text(text) | FormValue::Invalid(InvalidJsonInput(text)) => {
                self.adapter.validate_json(&text, false)
            }
            FormValue::Value(value) => self.adapter.validate_python(value, false),
            FormValue::Valid(instance) => self.adapter.validate_python(instance, false),
        }
    }

    pub fn to_python(&self, value: Option<FormValue>) -> Result<Option<FormValue>, FieldError> {
        if self.options.disabled {
            return Ok(value);
        }
        let value = match value {
            Some(value) if !value.is_empty() => value,
            _ => return Ok(None),
        };

        let shown = match &value {
            FormValue::Text(text) | FormValue::Invalid(InvalidJsonInput(text)) => Value::String(text.clone()),
            FormValue::Value(value) => value.clone(),
            FormValue::Valid(instance) => instance.value().clone(),
        };

        match self.try_coerce(value) {
            Ok(instance) => Ok(Some(FormValue::Valid(instance))),
            Err(AdapterError::Validation(failure)) => Err(FieldError::new(
                format!("Schema didn't match for {}.", failure.title()),
                "invalid",
            )
            .with_params(json!({
                "value": shown,
                "title": failure.title(),
                "detail": failure.json(),
                "errors": failure.records(),
            }))),
            Err(err) => Err(err.into()),
        }
    }

    /// The text to put in the widget.
    pub fn prepare_value(&self, value: Option<FormValue>) -> Result<Option<String>, FieldError> {
        let value = match value {
            None => return Ok(None),
            Some(FormValue::Invalid(InvalidJsonInput(text))) => return Ok(Some(text)),
            Some(value) => value,
        };

        let instance = self.try_coerce(value)?;
        let bytes = self.adapter.dump_json(&instance)?;
        String::from_utf8(bytes)
            .map(Some)
            .map_err(|err| {
                SchemaError::Serialization {
                    reason: err.to_string(),
                }
                .into()
            })
    }

    /// Compare dumped forms; anything that does not validate counts as a
    /// change.
    pub fn has_changed(&self, initial: Option<FormValue>, data: Option<FormValue>) -> bool {
        let initial = initial.unwrap_or(FormValue::Value(Value::Null));
        let data = data.unwrap_or(FormValue::Value(Value::Null));

        match (self.try_coerce(initial), self.try_coerce(data)) {
            (Ok(initial), Ok(data)) => {
                match (self.adapter.dump_python(&initial), self.adapter.dump_python(&data)) {
                    (Ok(initial), Ok(data)) => initial != data,
                    _ => true,
                }
            }
            _ => true,
        }
    }

    /// Convert and validate a submitted value.
    pub fn clean(&self, value: Option<FormValue>) -> Result<Option<FormValue>, FieldError> {
        let value = self.to_python(value)?;
        if value.is_none() && self.options.required && !self.options.disabled {
            return Err(FieldError::new("This field is required.", "required"));
        }
        Ok(value)
    }
}

/// A form: an owner for its fields, plus submitted data and initial values.
#[derive(Debug, Clone)]
pub struct Form {
    owner: Owner,
    fields: Vec<(String, SchemaFormField)>,
    data: Option<BTreeMap<String, String>>,
    initial: BTreeMap<String, Value>,
}

impl Form {
    pub fn new(label: impl Into<String>, namespace: Namespace) -> Self {
        Self {
            owner: Owner::new(label, namespace),
            fields: vec![],
            data: None,
            initial: BTreeMap::new(),
        }
    }

    pub fn owner(&self) -> &Owner {
        &self.owner
    }

    pub fn add_field(&mut self, name: &str, field: SchemaFormField) -> &mut Self {
        self.fields.push((name.to_owned(), field));
        self
    }

    pub fn field(&self, name: &str) -> Option<&SchemaFormField> {
        self.fields
            .iter()
            .find(|(field_name, _)| field_name == name)
            .map(|(_, field)| field)
    }

    /// Attach submitted data, making the form bound.
    pub fn bind_data(&mut self, data: BTreeMap<String, String>) -> &mut Self {
        self.data = Some(data);
        self
    }

    pub fn set_initial(&mut self, name: &str, value: Value) -> &mut Self {
        self.initial.insert(name.to_owned(), value);
        self
    }

    pub fn is_bound(&self) -> bool {
        self.data.is_some()
    }

    pub fn bound_field(&self, name: &str) -> Option<BoundField> {
        self.field(name).map(|field| field.get_bound_field(self, name))
    }

    /// Clean every field, collecting all failures.
    pub fn full_clean(&self) -> Result<BTreeMap<String, Option<FormValue>>, BTreeMap<String, FieldError>> {
        let mut cleaned = BTreeMap::new();
        let mut errors = BTreeMap::new();

        for (name, field) in &self.fields {
            let bound = field.get_bound_field(self, name);
            let value = if field.options.disabled {
                bound.initial.map(FormValue::Value)
            } else {
                bound.data.flatten().map(FormValue::Text)
            };

            match field.clean(value) {
                Ok(value) => {
                    cleaned.insert(name.clone(), value);
                }
                Err(err) => {
                    errors.insert(name.clone(), err);
                }
            }
        }

        if errors.is_empty() {
            Ok(cleaned)
        } else {
            Err(errors)
        }
    }

    pub fn has_changed(&self) -> bool {
        self.fields.iter().any(|(name, field)| {
            let bound = field.get_bound_field(self, name);
            let data = bound.data.flatten().map(FormValue::Text);
            field.has_changed(bound.initial.map(FormValue::Value), data)
        })
    }
}

/// A field together with the data a form holds for it.
#[derive(Debug, Clone)]
pub struct BoundField {
    name: String,
    field: SchemaFormField,
    // Outer `None`: the form is unbound. Inner `None`: nothing was submitted.
    data: Option<Option<String>>,
    initial: Option<Value>,
}

impl BoundField {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field(&self) -> &SchemaFormField {
        &self.field
    }

    /// The widget text: bound data when the form is bound, initial otherwise.
    pub fn value(&self) -> Result<Option<String>, FieldError> {
        let value = match &self.data {
            Some(data) => self
                .field
                .bound_data(data.as_deref(), self.initial.as_ref())?,
            None => self.initial.clone().map(FormValue::Value),
        };
        self.field.prepare_value(value)
    }

    pub fn as_widget(&self) -> Result<String, FieldError> {
        let value = self.value()?;
        Ok(self.field.widget().render(&self.name, value.as_deref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schema;
    use pretty_assertions::assert_eq;

    fn person() -> Schema {
        Schema::from_value(json!({
            "properties": {
                "name": { "type": "string" },
                "age": { "type": "uint8" },
            },
        }))
        .unwrap()
    }

    #[test]
    fn deprecated_kwargs_are_dropped() {
        let kwargs = json!({ "encoder": "x", "required": false, "exclude": ["age"] });
        let field = SchemaFormField::with_options(
            Some(person().into()),
            SchemaConfig::default(),
            false,
            kwargs.as_object().unwrap().clone(),
        )
        .unwrap();
        assert!(!field.options().required);
        assert!(field.adapter().export().exclude.contains("age"));
    }

    #[test]
    fn escaping() {
        assert_eq!(
            Widget::Textarea.render("data", Some(r#"{"a":"<b>"}"#)),
            r#"<textarea name="data" cols="40" rows="10">{&quot;a&quot;:&quot;&lt;b&gt;&quot;}</textarea>"#
        );
    }

    #[cfg(not(feature = "jsonform"))]
    #[test]
    fn json_form_falls_back_to_textarea() {
        let mut options = FormFieldOptions::default();
        options.widget = WidgetSpec::JsonForm;
        let field = SchemaFormField::from_adapter(
            SchemaAdapter::new(Some(person().into()), SchemaConfig::default(), None, None, false, Default::default()),
            options,
        );
        assert_eq!(field.widget(), Widget::Textarea);
    }

    #[test]
    fn empty_values_clean_to_none() {
        let mut options = FormFieldOptions::default();
        options.required = false;
        let field = SchemaFormField::from_adapter(
            SchemaAdapter::new(Some(person().into()), SchemaConfig::default(), None, None, false, Default::default()),
            options,
        );
        assert_eq!(field.clean(Some(FormValue::Text("  ".to_owned()))).unwrap(), None);
        assert_eq!(field.clean(None).unwrap(), None);

        let required = SchemaFormField::new(person());
        assert_eq!(required.clean(None).unwrap_err().code(), "required");
    }
}
