use serde_json::Value;

use crate::error::{PartDbError, Result};
use crate::query::values_equal;
use crate::record::Record;
use crate::schema::{FieldDefinition, Schema};

/// Result of checking a record against a schema
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    fn into_result(self, schema: &Schema) -> Result<()> {
        if self.is_ok() {
            return Ok(());
        }
        Err(PartDbError::Schema(format!(
            "{}: record validation failed:\n  - {}",
            schema.name(),
            self.errors.join("\n  - ")
        )))
    }
}

/// Check field membership, nullability and types. Untyped schemas accept
/// everything.
pub fn validate_record(schema: &Schema, record: &Record) -> ValidationResult {
    let mut result = ValidationResult::default();
    if !schema.is_typed() {
        return result;
    }

    for key in record.keys() {
        if schema.field(key).is_none() {
            result
                .errors
                .push(format!("'{key}' is not in {}", schema.name()));
        }
    }

    for field in schema.fields() {
        let value = record.get(&field.key).filter(|v| !v.is_null());
        match value {
            None if field.is_not_null() => {
                result
                    .errors
                    .push(format!("'{}' cannot be null", field.key));
            }
            None => {}
            Some(value) => validate_field_type(field, value, &mut result),
        }
    }

    result
}

fn validate_field_type(field: &FieldDefinition, value: &Value, result: &mut ValidationResult) {
    let allowed = field.allowed_types();
    if allowed.is_empty() || allowed.iter().any(|t| t.matches(value)) {
        return;
    }
    let expected: Vec<&str> = allowed.iter().map(|t| t.as_str()).collect();
    result.errors.push(format!(
        "'{}' expected Type '{}' got '{}'",
        field.key,
        expected.join("|"),
        type_name(value)
    ));
}

/// [`validate_record`] as a `Result`.
pub fn check_record(schema: &Schema, record: &Record) -> Result<()> {
    validate_record(schema, record).into_result(schema)
}

/// Reject values of `unique` fields already held by a different record.
pub fn check_unique(schema: &Schema, record: &Record, existing: &[Record]) -> Result<()> {
    let pk = schema.primary_key();
    let id = record.get(pk);
    let mut result = ValidationResult::default();

    for field in schema.unique_fields() {
        let Some(value) = record.get(&field.key).filter(|v| !v.is_null()) else {
            continue;
        };
        let taken = existing
            .iter()
            .any(|other| {
                other.get(pk) != id
                    && other
                        .get(&field.key)
                        .is_some_and(|held| values_equal(held, value))
            });
        if taken {
            result
                .errors
                .push(format!("'{}' must be unique, {value} is taken", field.key));
        }
    }

    result.into_result(schema)
}

/// Fill null or missing fields that declare a default. Returns a new record;
/// explicitly provided values are never replaced.
pub fn apply_defaults(schema: &Schema, data: &Record) -> Record {
    let mut out = data.clone();
    if !schema.is_typed() {
        return out;
    }
    for field in schema.fields() {
        let has_value = out.get(&field.key).is_some_and(|v| !v.is_null());
        if has_value {
            continue;
        }
        if let Some(default) = field.resolve_default() {
            out.insert(field.key.clone(), default);
        }
    }
    out
}

pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{parse_schema_str, FieldType};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn test_schema() -> Schema {
        let fields = parse_schema_str(
            r#"
- key: name
  not_null: true
  unique: true
  type: [string, number]
- key: role
  type: string
  default: member
- key: tags
  type: array
- key: born
  type: date
- key: meta
  type: object
- key: ok
  type: boolean
"#,
        )
        .unwrap();
        Schema::from_fields("users", fields).unwrap()
    }

    fn record(value: Value) -> Record {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_valid_record() {
        let schema = test_schema();
        let result = validate_record(
            &schema,
            &record(json!({
                "id": "a",
                "name": "Alice",
                "tags": ["x"],
                "born": "2020-01-02",
                "meta": {"k": 1},
                "ok": false,
            })),
        );
        assert!(result.is_ok(), "Errors: {:?}", result.errors);
    }

    #[test]
    fn test_field_not_in_schema() {
        let schema = test_schema();
        let result = validate_record(&schema, &record(json!({ "id": "a", "name": "A", "x": 1 })));
        assert!(!result.is_ok());
        assert!(result.errors.iter().any(|e| e.contains("'x' is not in users")));
    }

    #[test]
    fn test_not_null() {
        let schema = test_schema();
        for value in [json!({ "id": "a" }), json!({ "id": "a", "name": null })] {
            let result = validate_record(&schema, &record(value));
            assert!(result.errors.iter().any(|e| e.contains("'name' cannot be null")));
        }
    }

    #[test]
    fn test_type_mismatch_reports_expected_and_actual() {
        let schema = test_schema();
        let result = validate_record(&schema, &record(json!({ "id": "a", "name": true })));
        assert_eq!(
            result.errors,
            vec!["'name' expected Type 'string|number' got 'boolean'".to_string()]
        );

        let result = validate_record(&schema, &record(json!({ "id": "a", "name": {} })));
        assert!(!result.is_ok());
    }

    #[test]
    fn test_array_object_and_date_checks() {
        let schema = test_schema();
        let bad = record(json!({
            "id": "a",
            "name": "A",
            "tags": "not-a-list",
            "meta": [1],
            "born": "yesterday",
        }));
        let result = validate_record(&schema, &bad);
        assert_eq!(result.errors.len(), 3, "{:?}", result.errors);
        assert!(FieldType::Date.matches(&json!("2026-02-13T10:00:00Z")));
    }

    #[test]
    fn test_check_record_joins_errors() {
        let schema = test_schema();
        let err = check_record(&schema, &record(json!({ "id": "a", "x": 1 }))).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("'x' is not in users"));
        assert!(msg.contains("'name' cannot be null"));
    }

    #[test]
    fn test_untyped_accepts_anything() {
        let schema = Schema::untyped("id").unwrap();
        let result = validate_record(&schema, &record(json!({ "id": "a", "x": 1 })));
        assert!(result.is_ok());
    }

    #[test]
    fn test_unique_ignores_same_record() {
        let schema = test_schema();
        let existing = vec![
            record(json!({ "id": "a", "name": "Alice" })),
            record(json!({ "id": "b", "name": "Bob" })),
        ];
        check_unique(&schema, &record(json!({ "id": "a", "name": "Alice" })), &existing).unwrap();

        let err =
            check_unique(&schema, &record(json!({ "id": "a", "name": "Bob" })), &existing).unwrap_err();
        assert!(matches!(err, PartDbError::Schema(ref m) if m.contains("'name' must be unique")));
    }

    #[test]
    fn test_unique_compares_values_not_types() {
        let schema = test_schema();
        let existing = vec![record(json!({ "id": "b", "name": 1 }))];
        check_unique(&schema, &record(json!({ "id": "a", "name": "1" })), &existing).unwrap();
    }

    #[test]
    fn test_unique_numbers_compare_by_value() {
        let schema = Schema::from_fields(
            "counters",
            vec![FieldDefinition::new("n").unique().of_type(FieldType::Number)],
        )
        .unwrap();
        let existing = vec![record(json!({ "id": "a", "n": 1 }))];
        let err = check_unique(&schema, &record(json!({ "id": "b", "n": 1.0 })), &existing)
            .unwrap_err();
        assert!(matches!(err, PartDbError::Schema(ref m) if m.contains("'n' must be unique")));
        check_unique(&schema, &record(json!({ "id": "b", "n": 1.5 })), &existing).unwrap();
    }

    #[test]
    fn test_apply_defaults() {
        let schema = test_schema();
        let data = record(json!({ "id": "a", "name": "A" }));
        let out = apply_defaults(&schema, &data);
        assert_eq!(out["role"], json!("member"));
        // Input is untouched
        assert!(data.get("role").is_none());
    }

    #[test]
    fn test_apply_defaults_fills_null_but_keeps_values() {
        let schema = test_schema();
        let out = apply_defaults(&schema, &record(json!({ "id": "a", "role": null })));
        assert_eq!(out["role"], json!("member"));
        let out = apply_defaults(&schema, &record(json!({ "id": "a", "role": "admin" })));
        assert_eq!(out["role"], json!("admin"));
    }

    #[test]
    fn test_generated_defaults() {
        let schema = Schema::from_fields(
            "things",
            vec![
                crate::schema::FieldDefinition::new("created_at")
                    .default_with(|| json!("2026-01-01T00:00:00Z")),
            ],
        )
        .unwrap();
        let out = apply_defaults(&schema, &record(json!({ "id": "a" })));
        assert_eq!(out["created_at"], json!("2026-01-01T00:00:00Z"));
    }
}
