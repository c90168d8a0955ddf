use jsl_field::adapter::{SchemaAdapter, SchemaConfig, SchemaSpec};
use jsl_field::{AdapterError, ExportOptions, Schema};
use proptest::prelude::*;
use serde_json::{json, Value};

fn adapter() -> SchemaAdapter {
    let schema = Schema::from_value(json!({
        "properties": {
            "name": { "type": "string", "alias": "fullName" },
            "age": { "type": "uint8" },
        },
        "optionalProperties": {
            "tags": { "elements": { "type": "string" } },
            "active": { "type": "boolean", "default": true },
        },
    }))
    .unwrap();

    SchemaAdapter::new(
        Some(SchemaSpec::list(schema)),
        SchemaConfig::default(),
        None,
        Some("people".to_owned()),
        false,
        ExportOptions {
            by_alias: true,
            ..ExportOptions::default()
        },
    )
}

fn person() -> impl Strategy<Value = Value> {
    (
        "[a-zA-Z ]{0,12}",
        prop_oneof![
            any::<u8>().prop_map(Value::from),
            any::<u8>().prop_map(|age| Value::from(age.to_string())),
        ],
        prop::option::of(prop::collection::vec("[a-z]{0,6}", 0..4)),
        prop::option::of(prop_oneof![
            any::<bool>().prop_map(Value::from),
            Just(json!("yes")),
            Just(json!(0)),
        ]),
    )
        .prop_map(|(name, age, tags, active)| {
            let mut person = json!({ "fullName": name, "age": age });
            if let Some(tags) = tags {
                person["tags"] = json!(tags);
            }
            if let Some(active) = active {
                person["active"] = active;
            }
            person
        })
}

fn json_value_no_floats() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        "[a-z0-9 ]{0,8}".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 32, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

fn failure(result: Result<jsl_field::Instance, AdapterError>) -> Option<jsl_field::ValidationFailure> {
    match result {
        Ok(_) => None,
        Err(AdapterError::Validation(failure)) => Some(failure),
        Err(err) => panic!("unexpected schema error: {}", err),
    }
}

proptest! {
    /// Dumping a validated value and validating the dump again changes nothing.
    #[test]
    fn dump_then_validate_is_idempotent(people in prop::collection::vec(person(), 0..4)) {
        let adapter = adapter();

        let first = adapter.validate_python(Value::Array(people), false).unwrap();
        let dumped = adapter.dump_python(&first).unwrap();

        let second = adapter.validate_python(dumped.clone(), true).unwrap();
        prop_assert_eq!(&second, &first);
        prop_assert_eq!(adapter.dump_python(&second).unwrap(), dumped);
    }

    /// Parsing JSON text and validating the parsed value report the same
    /// errors.
    #[test]
    fn json_and_python_inputs_agree(value in json_value_no_floats()) {
        let adapter = adapter();
        let text = serde_json::to_string(&value).unwrap();

        let from_json = failure(adapter.validate_json(&text, false));
        let from_python = failure(adapter.validate_python(value, false));
        prop_assert_eq!(from_json, from_python);
    }
}
