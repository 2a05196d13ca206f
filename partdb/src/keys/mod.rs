//! Partition key encoding and identifier grammar.
//!
//! Engine keys are `<partition>/<id>`. Valid ids are ASCII alphanumerics, so
//! every id sorts strictly between the partition prefix and
//! `<partition>/` + [`id_max_value`], which is what scoped range scans use
//! as their exclusive bounds.

use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use regex::Regex;

use crate::error::{PartDbError, Result};

/// Exclusive upper bound for ids: 64 repetitions of the highest code point.
/// Its UTF-8 lead byte (0xF4) is above every byte a valid id can contain.
pub fn id_max_value() -> &'static str {
    static MAX: OnceLock<String> = OnceLock::new();
    MAX.get_or_init(|| char::MAX.to_string().repeat(64))
}

pub const PARTITION_DELIMITER: char = '/';

fn id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z0-9]+$").expect("static id regex"))
}

fn partition_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z0-9_-]+$").expect("static partition regex"))
}

fn below_sentinel(x: &str) -> bool {
    let max = id_max_value();
    !x.is_empty() && x.len() < max.len() && x < max
}

/// Default id grammar: non-empty ASCII alphanumeric, below the sentinel.
pub fn is_valid_id(x: &str) -> bool {
    id_regex().is_match(x) && below_sentinel(x)
}

/// Partition names also allow `_` and `-`.
pub fn is_valid_partition_name(x: &str) -> bool {
    partition_regex().is_match(x) && below_sentinel(x)
}

/// Custom id predicate supplied at store construction.
pub type IdTest = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Id validation policy for one store.
#[derive(Clone, Default)]
pub struct IdPolicy {
    custom: Option<IdTest>,
}

impl std::fmt::Debug for IdPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdPolicy")
            .field("custom", &self.custom.is_some())
            .finish()
    }
}

impl IdPolicy {
    pub fn custom(test: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        Self {
            custom: Some(Arc::new(test)),
        }
    }

    /// A custom test replaces the grammar, never the sentinel bound.
    pub fn is_valid(&self, id: &str) -> bool {
        match &self.custom {
            Some(test) => below_sentinel(id) && test(id),
            None => is_valid_id(id),
        }
    }
}

/// Maps ids to engine keys for one partition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeyCodec {
    Partitioned { prefix: String },
    /// Ids are used verbatim as engine keys.
    Raw,
}

impl KeyCodec {
    pub fn partitioned(name: &str) -> Result<Self> {
        if !is_valid_partition_name(name) {
            return Err(PartDbError::Key(format!(
                "Partition name \"{name}\" is not valid"
            )));
        }
        Ok(KeyCodec::Partitioned {
            prefix: format!("{name}{PARTITION_DELIMITER}"),
        })
    }

    pub fn prefix(&self) -> &str {
        match self {
            KeyCodec::Partitioned { prefix } => prefix,
            KeyCodec::Raw => "",
        }
    }

    pub fn encode(&self, id: &str, policy: &IdPolicy) -> Result<Bytes> {
        if !policy.is_valid(id) {
            return Err(PartDbError::Key(format!("Invalid id: {id:?}")));
        }
        Ok(Bytes::from(format!("{}{id}", self.prefix())))
    }

    /// Key for an id that came out of [`decode`](Self::decode), skipping the
    /// id policy.
    pub(crate) fn key_of(&self, id: &str) -> Bytes {
        Bytes::from(format!("{}{id}", self.prefix()))
    }

    pub fn decode(&self, key: &[u8]) -> Result<String> {
        let key = std::str::from_utf8(key)
            .map_err(|_| PartDbError::Decode("engine key is not UTF-8".into()))?;
        match key.strip_prefix(self.prefix()) {
            Some(id) if !id.is_empty() => Ok(id.to_string()),
            _ => Err(PartDbError::Decode(format!(
                "key {key:?} is outside partition {:?}",
                self.prefix()
            ))),
        }
    }

    pub fn is_match(&self, key: &[u8]) -> bool {
        match self {
            KeyCodec::Partitioned { prefix } => key.starts_with(prefix.as_bytes()),
            KeyCodec::Raw => true,
        }
    }

    /// Exclusive `(lower, upper)` bounds covering exactly this partition.
    pub fn scoped_range(&self) -> (Bytes, Bytes) {
        let prefix = self.prefix();
        (
            Bytes::from(prefix.to_string()),
            Bytes::from(format!("{prefix}{}", id_max_value())),
        )
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    const PUNCTUATION: &str = "`'\",.;:<>?/{}[]()_-=+*&^%$#@!~\\ ";

    #[test]
    fn test_valid_ids() {
        for a in ["a", "Z", "abc", "a1b2", "0", "123"] {
            assert!(is_valid_id(a), "{a} should be valid");
        }
        assert!(!is_valid_id(""));
        assert!(!is_valid_id(" "));
    }

    #[test]
    fn test_ids_reject_punctuation() {
        for c in PUNCTUATION.chars() {
            for id in [format!("{c}"), format!("a{c}"), format!("{c}1"), format!("a1{c}b")] {
                assert!(!is_valid_id(&id), "{id:?} should be invalid");
            }
        }
        assert!(!is_valid_id("ñ"));
    }

    #[test]
    fn test_partition_names() {
        for name in ["things", "my_things", "my-things", "1", "a"] {
            assert!(is_valid_partition_name(name), "{name} should be valid");
        }
        for c in PUNCTUATION.chars().filter(|c| *c != '_' && *c != '-') {
            let name = format!("a{c}1");
            assert!(!is_valid_partition_name(&name), "{name:?} should be invalid");
        }
        assert!(!is_valid_partition_name(""));
    }

    #[test]
    fn test_sentinel_exceeds_any_id() {
        let long = "Z".repeat(63);
        for id in [format!("{long}_"), format!("{long}9"), format!("_{long}"), format!("9{long}")] {
            assert!(id_max_value() > id.as_str());
        }
        assert!(!is_valid_id(id_max_value()));
    }

    #[test]
    fn test_custom_policy_keeps_sentinel() {
        let policy = IdPolicy::custom(|id| id != "aaa");
        assert!(!policy.is_valid("aaa"));
        assert!(policy.is_valid("aab"));
        assert!(policy.is_valid("with-dash"));
        assert!(!policy.is_valid(""));
        assert!(!policy.is_valid(id_max_value()));
    }

    #[test]
    fn test_codec_round_trip() {
        let codec = KeyCodec::partitioned("things").unwrap();
        let policy = IdPolicy::default();
        let key = codec.encode("abc1", &policy).unwrap();
        assert_eq!(key, Bytes::from("things/abc1"));
        assert_eq!(codec.decode(&key).unwrap(), "abc1");
        assert!(codec.is_match(&key));
    }

    #[test]
    fn test_codec_rejects_foreign_keys() {
        let codec = KeyCodec::partitioned("things").unwrap();
        assert!(matches!(
            codec.decode(b"others/abc"),
            Err(PartDbError::Decode(_))
        ));
        assert!(!codec.is_match(b"others/abc"));
        // Case-sensitive: "Things" is another partition
        assert!(!codec.is_match(b"Things/abc"));
        assert!(!codec.is_match(b"thingsX/abc"));
        assert!(matches!(codec.decode(b"things/"), Err(PartDbError::Decode(_))));
    }

    #[test]
    fn test_codec_rejects_bad_input() {
        assert!(matches!(
            KeyCodec::partitioned("bad name"),
            Err(PartDbError::Key(_))
        ));
        let codec = KeyCodec::partitioned("things").unwrap();
        assert!(matches!(
            codec.encode("$$$", &IdPolicy::default()),
            Err(PartDbError::Key(_))
        ));
    }

    // Property tests for the prefix/sentinel scheme

    proptest! {
        #[test]
        fn should_encoded_key_sort_inside_scoped_range(
            partition in "[a-zA-Z0-9_-]{1,64}",
            id in "[a-zA-Z0-9]{1,255}",
        ) {
            let codec = KeyCodec::partitioned(&partition).unwrap();
            let (lower, upper) = codec.scoped_range();
            let key = codec.encode(&id, &IdPolicy::default()).unwrap();
            prop_assert!(lower < key, "{:?} should sort above {:?}", key, lower);
            prop_assert!(key < upper, "{:?} should sort below the sentinel bound", key);
        }

        #[test]
        fn should_decode_what_was_encoded(
            partition in "[a-zA-Z0-9_-]{1,64}",
            id in "[a-zA-Z0-9]{1,255}",
        ) {
            let codec = KeyCodec::partitioned(&partition).unwrap();
            let key = codec.encode(&id, &IdPolicy::default()).unwrap();
            prop_assert!(codec.is_match(&key));
            prop_assert_eq!(codec.decode(&key).unwrap(), id);
        }

        #[test]
        fn should_keep_partitions_out_of_each_others_range(
            a in "[a-zA-Z0-9_-]{1,64}",
            b in "[a-zA-Z0-9_-]{1,64}",
            id in "[a-zA-Z0-9]{1,255}",
        ) {
            prop_assume!(a != b);
            let ours = KeyCodec::partitioned(&a).unwrap();
            let theirs = KeyCodec::partitioned(&b).unwrap();
            let (lower, upper) = ours.scoped_range();
            let key = theirs.encode(&id, &IdPolicy::default()).unwrap();
            prop_assert!(
                !(lower < key && key < upper),
                "{:?} leaked into partition {:?}",
                key,
                a
            );
            prop_assert!(!ours.is_match(&key));
        }
    }

    #[test]
    fn test_neighbouring_partitions_do_not_overlap() {
        let policy = IdPolicy::default();
        let a = KeyCodec::partitioned("things").unwrap();
        let (lower, upper) = a.scoped_range();
        for other in ["things2", "thing", "things-x", "things_"] {
            let other = KeyCodec::partitioned(other).unwrap();
            for id in ["0", "z", "zzzz"] {
                let key = other.encode(id, &policy).unwrap();
                assert!(!(lower < key && key < upper), "{key:?} leaked into things/");
            }
        }
    }

    #[test]
    fn test_raw_codec() {
        let codec = KeyCodec::Raw;
        let key = codec.encode("abc", &IdPolicy::default()).unwrap();
        assert_eq!(key, Bytes::from("abc"));
        assert_eq!(codec.decode(&key).unwrap(), "abc");
        let (lower, upper) = codec.scoped_range();
        assert!(lower < key && key < upper);
    }
}
