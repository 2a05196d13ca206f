use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Declaration of a single field in a store's schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDefinition {
    /// Field name. May be omitted in the map form of a schema file.
    #[serde(default)]
    pub key: String,
    #[serde(default, alias = "primaryKey")]
    pub primary_key: bool,
    /// `None` means "not declared"; only an explicit `false` is meaningful
    /// for primary keys.
    #[serde(default, alias = "notNull", skip_serializing_if = "Option::is_none")]
    pub not_null: Option<bool>,
    #[serde(default)]
    pub unique: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Generated default, takes precedence over `default`.
    #[serde(skip)]
    pub default_fn: Option<DefaultFn>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub field_type: Option<TypeSpec>,
}

impl FieldDefinition {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            primary_key: false,
            not_null: None,
            unique: false,
            default: None,
            default_fn: None,
            field_type: None,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = Some(true);
        self
    }

    pub fn nullable(mut self) -> Self {
        self.not_null = Some(false);
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn of_type(mut self, field_type: FieldType) -> Self {
        self.field_type = Some(TypeSpec::Single(field_type));
        self
    }

    pub fn of_types(mut self, types: impl IntoIterator<Item = FieldType>) -> Self {
        self.field_type = Some(TypeSpec::AnyOf(types.into_iter().collect()));
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn default_with(mut self, f: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        self.default_fn = Some(DefaultFn::new(f));
        self
    }

    pub fn is_not_null(&self) -> bool {
        self.not_null.unwrap_or(false)
    }

    pub fn has_default(&self) -> bool {
        self.default_fn.is_some() || self.default.is_some()
    }

    /// Produce this field's default, calling the generator if there is one.
    pub fn resolve_default(&self) -> Option<Value> {
        match &self.default_fn {
            Some(f) => Some(f.call()),
            None => self.default.clone(),
        }
    }

    pub fn allowed_types(&self) -> &[FieldType] {
        match &self.field_type {
            Some(spec) => spec.as_slice(),
            None => &[],
        }
    }
}

/// Zero-argument default generator.
#[derive(Clone)]
pub struct DefaultFn(Arc<dyn Fn() -> Value + Send + Sync>);

impl DefaultFn {
    pub fn new(f: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        DefaultFn(Arc::new(f))
    }

    /// Current UTC time as an RFC 3339 string.
    pub fn now() -> Self {
        DefaultFn::new(|| Value::String(chrono::Utc::now().to_rfc3339()))
    }

    pub fn call(&self) -> Value {
        (self.0)()
    }
}

impl fmt::Debug for DefaultFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DefaultFn(..)")
    }
}

/// One type tag or a list of accepted tags
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TypeSpec {
    Single(FieldType),
    AnyOf(Vec<FieldType>),
}

impl TypeSpec {
    pub fn as_slice(&self) -> &[FieldType] {
        match self {
            TypeSpec::Single(t) => std::slice::from_ref(t),
            TypeSpec::AnyOf(ts) => ts,
        }
    }
}

/// Field type enumeration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Object,
    Array,
    /// RFC 3339 timestamp or `YYYY-MM-DD` string.
    Date,
    /// Anything else found in a schema file; rejected when the schema is built.
    #[serde(untagged)]
    Unknown(std::string::String),
}

impl FieldType {
    pub fn as_str(&self) -> &str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Object => "object",
            FieldType::Array => "array",
            FieldType::Date => "date",
            FieldType::Unknown(tag) => tag,
        }
    }

    pub fn matches(&self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Object => value.is_object(),
            FieldType::Array => value.is_array(),
            FieldType::Date => value.as_str().is_some_and(is_date_string),
            FieldType::Unknown(_) => false,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn is_date_string(s: &str) -> bool {
    chrono::DateTime::parse_from_rfc3339(s).is_ok()
        || chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
}
