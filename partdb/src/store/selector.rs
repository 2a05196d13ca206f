use std::fmt;
use std::sync::Arc;

use crate::aggregate::{Matcher, Predicate};
use crate::keys::IdPolicy;
use crate::query::Query;
use crate::record::Record;

/// Wildcard accepted wherever a selector is parsed from text.
pub const WILDCARD: &str = "*";

/// What a store operation applies to.
#[derive(Clone)]
pub enum Selector {
    ById(String),
    All,
    ByQuery(Query),
    ByPredicate(Predicate),
}

impl Selector {
    pub fn predicate(f: impl Fn(&Record) -> bool + Send + Sync + 'static) -> Self {
        Selector::ByPredicate(Arc::new(f))
    }

    /// Record filter for scan-based selectors. `None` for `ById`.
    pub(crate) fn matcher(&self) -> Option<Matcher> {
        match self {
            Selector::ById(_) => None,
            Selector::All => Some(Matcher::All),
            Selector::ByQuery(q) => Some(Matcher::Query(q.clone())),
            Selector::ByPredicate(f) => Some(Matcher::Predicate(f.clone())),
        }
    }
}

impl fmt::Debug for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::ById(id) => write!(f, "ById({id})"),
            Selector::All => f.write_str("All"),
            Selector::ByQuery(q) => write!(f, "ByQuery({q})"),
            Selector::ByPredicate(_) => f.write_str("ByPredicate(..)"),
        }
    }
}

impl From<&str> for Selector {
    fn from(s: &str) -> Self {
        if s == WILDCARD {
            Selector::All
        } else {
            Selector::ById(s.to_string())
        }
    }
}

impl From<String> for Selector {
    fn from(s: String) -> Self {
        if s == WILDCARD {
            Selector::All
        } else {
            Selector::ById(s)
        }
    }
}

impl From<&String> for Selector {
    fn from(s: &String) -> Self {
        Selector::from(s.as_str())
    }
}

impl From<Query> for Selector {
    fn from(q: Query) -> Self {
        Selector::ByQuery(q)
    }
}

impl From<Predicate> for Selector {
    fn from(f: Predicate) -> Self {
        Selector::ByPredicate(f)
    }
}

/// One write inside [`Store::batch`](super::Store::batch).
#[derive(Debug, Clone)]
pub enum StoreOp {
    Put { record: Record },
    Delete { id: String },
}

/// Per-store settings.
#[derive(Debug, Clone, Default)]
pub struct StoreConfig {
    pub id_policy: IdPolicy,
}

impl StoreConfig {
    /// Replace the default id grammar. Ids must still sort below the
    /// sentinel.
    pub fn with_id_test(mut self, test: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        self.id_policy = IdPolicy::custom(test);
        self
    }
}
