mod parser;
mod types;

pub use parser::{parse_schema, parse_schema_str};
pub use types::{DefaultFn, FieldDefinition, FieldType, TypeSpec};

use std::collections::HashMap;
use std::future::Future;

use crate::error::{PartDbError, Result};
use crate::record::Record;
use crate::validation;

/// Primary key used when a declaration list names none.
pub const DEFAULT_PRIMARY_KEY: &str = "id";

/// A resolved, immutable set of field constraints for one store.
///
/// Exactly one field is the primary key. When that is the only field the
/// schema is "untyped" and validation accepts any record.
#[derive(Debug, Clone)]
pub struct Schema {
    name: String,
    primary_key: usize,
    fields: Vec<FieldDefinition>,
    lookup: HashMap<String, usize>,
}

impl Schema {
    /// Untyped schema with a single string primary key.
    pub fn untyped(primary_key: &str) -> Result<Self> {
        Self::build(
            primary_key,
            vec![FieldDefinition::new(primary_key).primary_key()],
            false,
        )
    }

    /// Resolve declarations, appending `{ key: "id", primary_key }` when none
    /// of them is primary.
    pub fn from_fields(name: &str, fields: Vec<FieldDefinition>) -> Result<Self> {
        Self::build(name, fields, true)
    }

    /// Resolve declarations that must name their own primary key.
    pub fn from_fields_strict(name: &str, fields: Vec<FieldDefinition>) -> Result<Self> {
        Self::build(name, fields, false)
    }

    fn build(name: &str, mut fields: Vec<FieldDefinition>, implicit_key: bool) -> Result<Self> {
        if implicit_key && !fields.iter().any(|f| f.primary_key) {
            fields.push(FieldDefinition::new(DEFAULT_PRIMARY_KEY).primary_key());
        }

        let mut lookup = HashMap::with_capacity(fields.len());
        for (idx, field) in fields.iter().enumerate() {
            if field.key.is_empty() {
                return Err(PartDbError::Schema(format!("{name}: field key cannot be empty")));
            }
            if lookup.insert(field.key.clone(), idx).is_some() {
                return Err(PartDbError::Schema(format!(
                    "{name}: duplicate field '{}'",
                    field.key
                )));
            }
            if let Some(FieldType::Unknown(tag)) = field
                .allowed_types()
                .iter()
                .find(|t| matches!(t, FieldType::Unknown(_)))
            {
                return Err(PartDbError::Schema(format!(
                    "{name}: '{}' has unrecognized type '{tag}'",
                    field.key
                )));
            }
        }

        let mut primary = fields.iter().enumerate().filter(|(_, f)| f.primary_key);
        let primary_key = match (primary.next(), primary.next()) {
            (None, _) => {
                return Err(PartDbError::Schema(format!("{name}: missing primary key")));
            }
            (Some(_), Some(_)) => {
                return Err(PartDbError::Schema(format!("{name}: too many primary keys")));
            }
            (Some((idx, _)), None) => idx,
        };

        let pk = &mut fields[primary_key];
        if pk.not_null == Some(false) {
            return Err(PartDbError::Schema(format!(
                "{name}: primary key '{}' cannot be nullable",
                pk.key
            )));
        }
        if pk.has_default() {
            return Err(PartDbError::Schema(format!(
                "{name}: primary key '{}' cannot have a default",
                pk.key
            )));
        }
        if pk.field_type.is_some() && pk.allowed_types() != [FieldType::String] {
            return Err(PartDbError::Schema(format!(
                "{name}: primary key '{}' must be of type 'string'",
                pk.key
            )));
        }
        pk.not_null = Some(true);
        pk.field_type = Some(TypeSpec::Single(FieldType::String));

        Ok(Schema {
            name: name.to_string(),
            primary_key,
            fields,
            lookup,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the primary-key field.
    pub fn primary_key(&self) -> &str {
        &self.fields[self.primary_key].key
    }

    pub fn fields(&self) -> &[FieldDefinition] {
        &self.fields
    }

    pub fn field(&self, key: &str) -> Option<&FieldDefinition> {
        self.lookup.get(key).map(|idx| &self.fields[*idx])
    }

    /// False when the primary key is the only declared field.
    pub fn is_typed(&self) -> bool {
        self.fields.len() > 1
    }

    pub fn unique_fields(&self) -> impl Iterator<Item = &FieldDefinition> {
        self.fields.iter().filter(|f| f.unique)
    }

    /// Returns a copy of `record` with defaults filled into null or missing
    /// fields.
    pub fn apply_defaults(&self, record: &Record) -> Record {
        validation::apply_defaults(self, record)
    }

    /// Validates `record` for a write. `find_many` lists the whole partition
    /// and is only awaited when a unique field holds a value.
    pub async fn validate<F, Fut>(&self, record: &Record, find_many: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<Record>>>,
    {
        if !self.is_typed() {
            return Ok(());
        }
        validation::check_record(self, record)?;

        let needs_scan = self
            .unique_fields()
            .any(|f| record.get(&f.key).is_some_and(|v| !v.is_null()));
        if needs_scan {
            let existing = find_many().await?;
            validation::check_unique(self, record, &existing)?;
        }
        Ok(())
    }
}
