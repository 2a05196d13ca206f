//! Structured record queries.
//!
//! A query is a JSON object mapping field paths to operands:
//!
//! ```json
//! { "name": { "$in": ["a", "b"] }, "age": { "$gte": 18 }, "meta.kind": "user" }
//! ```
//!
//! A literal operand means equality. Operator objects accept `$eq`, `$ne`,
//! `$in`, `$nin`, `$gt`, `$gte`, `$lt`, `$lte` and `$exists`. Top-level
//! `$and` / `$or` take arrays of sub-queries. Every entry of an object must
//! hold for the record to match, so `{}` matches everything.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PartDbError, Result};
use crate::record::Record;
use crate::validation::type_name;

/// A parsed query, ready to be evaluated against records.
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct Query {
    source: Value,
    root: Node,
}

#[derive(Clone, Debug)]
enum Node {
    And(Vec<Node>),
    Or(Vec<Node>),
    Field { path: Vec<String>, conds: Vec<Cond> },
}

#[derive(Clone, Debug)]
enum Cond {
    Eq(Value),
    Ne(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Cmp(Ordering, bool, Value),
    Exists(bool),
}

impl Query {
    /// Matches every record.
    pub fn all() -> Self {
        Query {
            source: Value::Object(Default::default()),
            root: Node::And(Vec::new()),
        }
    }

    pub fn parse(value: Value) -> Result<Self> {
        let root = parse_object(&value)?;
        Ok(Query {
            source: value,
            root,
        })
    }

    /// The query as it was written.
    pub fn as_value(&self) -> &Value {
        &self.source
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.root.matches(record)
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Query({})", self.source)
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl TryFrom<Value> for Query {
    type Error = PartDbError;

    fn try_from(value: Value) -> Result<Self> {
        Query::parse(value)
    }
}

impl From<Query> for Value {
    fn from(query: Query) -> Value {
        query.source
    }
}

impl FromStr for Query {
    type Err = PartDbError;

    fn from_str(s: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(s)
            .map_err(|e| PartDbError::Query(format!("query is not valid JSON: {e}")))?;
        Query::parse(value)
    }
}

fn parse_object(value: &Value) -> Result<Node> {
    let Value::Object(map) = value else {
        return Err(PartDbError::Query(format!(
            "query must be an object, got {}",
            type_name(value)
        )));
    };

    let mut nodes = Vec::with_capacity(map.len());
    for (key, operand) in map {
        let node = match key.as_str() {
            "$and" => Node::And(parse_list(key, operand)?),
            "$or" => Node::Or(parse_list(key, operand)?),
            op if op.starts_with('$') => {
                return Err(PartDbError::Query(format!("unknown operator '{op}'")));
            }
            field => Node::Field {
                path: field.split('.').map(str::to_string).collect(),
                conds: parse_operand(field, operand)?,
            },
        };
        nodes.push(node);
    }
    Ok(Node::And(nodes))
}

fn parse_list(op: &str, operand: &Value) -> Result<Vec<Node>> {
    match operand {
        Value::Array(items) => items.iter().map(parse_object).collect(),
        other => Err(PartDbError::Query(format!(
            "'{op}' expects an array, got {}",
            type_name(other)
        ))),
    }
}

fn parse_operand(field: &str, operand: &Value) -> Result<Vec<Cond>> {
    let ops = match operand {
        Value::Object(map) if map.keys().any(|k| k.starts_with('$')) => map,
        literal => return Ok(vec![Cond::Eq(literal.clone())]),
    };

    ops.iter()
        .map(|(op, arg)| {
            let cond = match op.as_str() {
                "$eq" => Cond::Eq(arg.clone()),
                "$ne" => Cond::Ne(arg.clone()),
                "$in" => Cond::In(expect_array(field, op, arg)?),
                "$nin" => Cond::Nin(expect_array(field, op, arg)?),
                "$gt" => Cond::Cmp(Ordering::Greater, false, arg.clone()),
                "$gte" => Cond::Cmp(Ordering::Greater, true, arg.clone()),
                "$lt" => Cond::Cmp(Ordering::Less, false, arg.clone()),
                "$lte" => Cond::Cmp(Ordering::Less, true, arg.clone()),
                "$exists" => match arg {
                    Value::Bool(b) => Cond::Exists(*b),
                    other => {
                        return Err(PartDbError::Query(format!(
                            "'{field}': '$exists' expects a boolean, got {}",
                            type_name(other)
                        )))
                    }
                },
                other => {
                    return Err(PartDbError::Query(format!(
                        "'{field}': unknown operator '{other}'"
                    )))
                }
            };
            Ok(cond)
        })
        .collect()
}

fn expect_array(field: &str, op: &str, arg: &Value) -> Result<Vec<Value>> {
    match arg {
        Value::Array(items) => Ok(items.clone()),
        other => Err(PartDbError::Query(format!(
            "'{field}': '{op}' expects an array, got {}",
            type_name(other)
        ))),
    }
}

impl Node {
    fn matches(&self, record: &Record) -> bool {
        match self {
            Node::And(nodes) => nodes.iter().all(|n| n.matches(record)),
            Node::Or(nodes) => nodes.iter().any(|n| n.matches(record)),
            Node::Field { path, conds } => {
                let value = lookup(record, path);
                conds.iter().all(|c| c.matches(value))
            }
        }
    }
}

fn lookup<'a>(record: &'a Record, path: &[String]) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    let mut current = record.get(first)?;
    for segment in rest {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

impl Cond {
    fn matches(&self, value: Option<&Value>) -> bool {
        match self {
            Cond::Eq(expected) => equals(value, expected),
            Cond::Ne(expected) => !equals(value, expected),
            Cond::In(options) => options.iter().any(|o| equals(value, o)),
            Cond::Nin(options) => !options.iter().any(|o| equals(value, o)),
            Cond::Cmp(want, or_equal, bound) => value.is_some_and(|v| {
                match compare_values(v, bound) {
                    Some(Ordering::Equal) => *or_equal,
                    Some(ord) => ord == *want,
                    None => false,
                }
            }),
            Cond::Exists(expected) => value.is_some() == *expected,
        }
    }
}

/// Field equality. A missing field equals `null`, and an array field equals
/// any operand it contains.
fn equals(value: Option<&Value>, expected: &Value) -> bool {
    let Some(value) = value else {
        return expected.is_null();
    };
    if values_equal(value, expected) {
        return true;
    }
    match value {
        Value::Array(items) if !expected.is_array() => {
            items.iter().any(|item| values_equal(item, expected))
        }
        _ => false,
    }
}

/// Value equality; numbers compare by value, so `1` equals `1.0`.
pub(crate) fn values_equal(a: &Value, b: &Value) -> bool {
    compare_values(a, b) == Some(Ordering::Equal)
}

fn kind_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total ordering of two JSON values of the same kind; `None` across kinds.
fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    if kind_rank(a) != kind_rank(b) {
        return None;
    }
    match (a, b) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64()?, y.as_f64()?);
            Some(x.total_cmp(&y))
        }
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Array(xs), Value::Array(ys)) => {
            for (x, y) in xs.iter().zip(ys) {
                let ord = compare_values(x, y).unwrap_or_else(|| kind_rank(x).cmp(&kind_rank(y)));
                if ord != Ordering::Equal {
                    return Some(ord);
                }
            }
            Some(xs.len().cmp(&ys.len()))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            for ((kx, vx), (ky, vy)) in xs.iter().zip(ys) {
                let ord = kx.cmp(ky).then_with(|| {
                    compare_values(vx, vy).unwrap_or_else(|| kind_rank(vx).cmp(&kind_rank(vy)))
                });
                if ord != Ordering::Equal {
                    return Some(ord);
                }
            }
            Some(xs.len().cmp(&ys.len()))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rec(value: Value) -> Record {
        value.as_object().unwrap().clone()
    }

    fn q(value: Value) -> Query {
        Query::parse(value).unwrap()
    }

    #[test]
    fn test_empty_query_matches_everything() {
        assert!(q(json!({})).matches(&rec(json!({ "id": "a" }))));
        assert!(Query::all().matches(&rec(json!({}))));
    }

    #[test]
    fn test_literal_equality() {
        let query = q(json!({ "name": "one" }));
        assert!(query.matches(&rec(json!({ "id": "1", "name": "one" }))));
        assert!(!query.matches(&rec(json!({ "id": "1", "name": "two" }))));
        assert!(!query.matches(&rec(json!({ "id": "1" }))));
    }

    #[test]
    fn test_numbers_compare_by_value() {
        assert!(q(json!({ "n": 1 })).matches(&rec(json!({ "n": 1.0 }))));
    }

    #[test]
    fn test_in_and_nin() {
        let r = rec(json!({ "id": "x", "name": "x9999!" }));
        assert!(q(json!({ "name": { "$in": ["x9999!"] } })).matches(&r));
        assert!(!q(json!({ "name": { "$in": ["y"] } })).matches(&r));
        assert!(q(json!({ "name": { "$nin": ["y"] } })).matches(&r));
        assert!(!q(json!({ "name": { "$nin": ["x9999!"] } })).matches(&r));
    }

    #[test]
    fn test_array_field_contains() {
        let r = rec(json!({ "tags": ["red", "blue"] }));
        assert!(q(json!({ "tags": "red" })).matches(&r));
        assert!(q(json!({ "tags": { "$in": ["blue", "green"] } })).matches(&r));
        assert!(q(json!({ "tags": ["red", "blue"] })).matches(&r));
        assert!(!q(json!({ "tags": ["red"] })).matches(&r));
    }

    #[test]
    fn test_ranges() {
        let r = rec(json!({ "age": 30, "name": "m" }));
        assert!(q(json!({ "age": { "$gt": 18, "$lte": 30 } })).matches(&r));
        assert!(!q(json!({ "age": { "$lt": 30 } })).matches(&r));
        assert!(q(json!({ "age": { "$gte": 30 } })).matches(&r));
        assert!(q(json!({ "name": { "$gt": "a", "$lt": "z" } })).matches(&r));
    }

    #[test]
    fn test_cross_kind_comparisons_are_false() {
        let r = rec(json!({ "age": "30" }));
        assert!(!q(json!({ "age": { "$gt": 1 } })).matches(&r));
        assert!(!q(json!({ "age": { "$lt": 1 } })).matches(&r));
        assert!(!q(json!({ "missing": { "$lt": 1 } })).matches(&r));
    }

    #[test]
    fn test_exists_and_null() {
        let r = rec(json!({ "a": null, "b": 1 }));
        assert!(q(json!({ "a": { "$exists": true } })).matches(&r));
        assert!(q(json!({ "c": { "$exists": false } })).matches(&r));
        assert!(q(json!({ "c": null })).matches(&r));
        assert!(q(json!({ "a": null })).matches(&r));
        assert!(q(json!({ "c": { "$ne": 1 } })).matches(&r));
    }

    #[test]
    fn test_dotted_paths() {
        let r = rec(json!({ "meta": { "kind": "user", "level": 3 } }));
        assert!(q(json!({ "meta.kind": "user" })).matches(&r));
        assert!(q(json!({ "meta.level": { "$gte": 2 } })).matches(&r));
        assert!(!q(json!({ "meta.kind.deeper": "user" })).matches(&r));
    }

    #[test]
    fn test_and_or() {
        let r = rec(json!({ "a": 1, "b": 2 }));
        assert!(q(json!({ "$or": [{ "a": 5 }, { "b": 2 }] })).matches(&r));
        assert!(!q(json!({ "$and": [{ "a": 1 }, { "b": 5 }] })).matches(&r));
        assert!(!q(json!({ "$or": [] })).matches(&r));
    }

    #[test]
    fn test_nested_object_literal() {
        let r = rec(json!({ "meta": { "a": 1 } }));
        assert!(q(json!({ "meta": { "a": 1 } })).matches(&r));
        assert!(!q(json!({ "meta": { "a": 2 } })).matches(&r));
    }

    #[test]
    fn test_malformed_queries() {
        for bad in [
            json!([]),
            json!("name"),
            json!({ "$nope": 1 }),
            json!({ "name": { "$regex": "x" } }),
            json!({ "name": { "$in": "x" } }),
            json!({ "name": { "$exists": 1 } }),
            json!({ "$or": {} }),
        ] {
            assert!(
                matches!(Query::parse(bad.clone()), Err(PartDbError::Query(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_from_str_and_serde() {
        let query: Query = r#"{"name": {"$eq": "a"}}"#.parse().unwrap();
        assert!(query.matches(&rec(json!({ "name": "a" }))));
        assert!(matches!("{".parse::<Query>(), Err(PartDbError::Query(_))));

        let query: Query = serde_json::from_value(json!({ "n": 1 })).unwrap();
        assert_eq!(serde_json::to_value(&query).unwrap(), json!({ "n": 1 }));
        assert!(serde_json::from_value::<Query>(json!(1)).is_err());
    }
}
