use crate::error::{PartDbError, Result};
use super::types::FieldDefinition;
use std::path::Path;

/// Parse a schema file (YAML or JSON) into field declarations
pub fn parse_schema(path: &Path) -> Result<Vec<FieldDefinition>> {
    let content = std::fs::read_to_string(path)?;
    parse_schema_str(&content)
}

/// Parse schema text. Accepts a list of declarations or a map keyed by
/// field name.
pub fn parse_schema_str(content: &str) -> Result<Vec<FieldDefinition>> {
    let raw: serde_yaml::Value = serde_yaml::from_str(content)?;

    match raw {
        serde_yaml::Value::Sequence(_) => Ok(serde_yaml::from_value(raw)?),
        serde_yaml::Value::Mapping(map) => {
            let mut fields = Vec::with_capacity(map.len());
            for (name, decl) in map {
                let name = name.as_str().ok_or_else(|| {
                    PartDbError::Schema(format!("field name must be a string, got {name:?}"))
                })?;
                let mut field: FieldDefinition = if decl.is_null() {
                    FieldDefinition::new(name)
                } else {
                    serde_yaml::from_value(decl)?
                };
                if !field.key.is_empty() && field.key != name {
                    return Err(PartDbError::Schema(format!(
                        "field '{name}' declares a different key '{}'",
                        field.key
                    )));
                }
                field.key = name.to_string();
                fields.push(field);
            }
            Ok(fields)
        }
        serde_yaml::Value::Null => Ok(Vec::new()),
        _ => Err(PartDbError::Schema(
            "schema must be a list or a map of field declarations".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldType, TypeSpec};

    #[test]
    fn test_list_form() {
        let fields = parse_schema_str(
            r#"
- key: name
  not_null: true
  unique: true
  type: string
- key: tags
  type: [array, string]
  default: []
"#,
        )
        .unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].key, "name");
        assert!(fields[0].is_not_null());
        assert!(fields[0].unique);
        assert_eq!(
            fields[1].field_type,
            Some(TypeSpec::AnyOf(vec![FieldType::Array, FieldType::String]))
        );
        assert_eq!(fields[1].default, Some(serde_json::json!([])));
    }

    #[test]
    fn test_map_form_with_camel_case_aliases() {
        let fields = parse_schema_str(
            r#"
code: { primaryKey: true }
name: { notNull: true, type: string }
note:
"#,
        )
        .unwrap();
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[0].key, "code");
        assert!(fields[0].primary_key);
        assert!(fields[1].is_not_null());
        assert_eq!(fields[2].key, "note");
    }

    #[test]
    fn test_unknown_type_is_kept_for_later_rejection() {
        let fields = parse_schema_str("- { key: when, type: datetime }").unwrap();
        assert_eq!(
            fields[0].field_type,
            Some(TypeSpec::Single(FieldType::Unknown("datetime".into())))
        );
    }

    #[test]
    fn test_json_is_accepted() {
        let fields =
            parse_schema_str(r#"[{"key": "ok", "type": "boolean", "unique": true}]"#).unwrap();
        assert_eq!(fields[0].allowed_types(), &[FieldType::Boolean]);
    }

    #[test]
    fn test_rejects_scalar() {
        assert!(matches!(
            parse_schema_str("42"),
            Err(PartDbError::Schema(_))
        ));
    }

    #[test]
    fn test_rejects_mismatched_key() {
        assert!(parse_schema_str("name: { key: other }").is_err());
    }
}
