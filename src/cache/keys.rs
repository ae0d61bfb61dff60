//! Cache key derivation.
//!
//! Keys are `prefix:component:component...`. Components are escaped so that
//! the separator and the truncation marker only ever appear structurally,
//! which keeps prefix sweeps exact. Keys longer than the bound keep a readable
//! head followed by `#` and a hash of the full key.

use std::fmt;

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::domain::types::{AccessScope, ActorId, Capability, SortDirection};

pub const KEY_SEPARATOR: char = ':';
pub const TRUNCATION_MARKER: char = '#';
pub const HASH_SUFFIX_LEN: usize = 16;

/// One ordered element of a cache key.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyComponent {
    Text(String),
    Integer(i64),
    /// Structured values are keyed by their JSON serialization.
    Json(Value),
}

impl KeyComponent {
    fn to_value(&self) -> Value {
        match self {
            KeyComponent::Text(text) => Value::String(text.clone()),
            KeyComponent::Integer(int) => Value::from(*int),
            KeyComponent::Json(value) => value.clone(),
        }
    }

    fn render(&self) -> String {
        match self {
            KeyComponent::Text(text) => escape(text),
            KeyComponent::Integer(int) => int.to_string(),
            KeyComponent::Json(value) => escape(&value.to_string()),
        }
    }
}

impl fmt::Display for KeyComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl From<&str> for KeyComponent {
    fn from(value: &str) -> Self {
        KeyComponent::Text(value.to_string())
    }
}

impl From<String> for KeyComponent {
    fn from(value: String) -> Self {
        KeyComponent::Text(value)
    }
}

impl From<i64> for KeyComponent {
    fn from(value: i64) -> Self {
        KeyComponent::Integer(value)
    }
}

impl From<u64> for KeyComponent {
    fn from(value: u64) -> Self {
        match i64::try_from(value) {
            Ok(int) => KeyComponent::Integer(int),
            Err(_) => KeyComponent::Text(value.to_string()),
        }
    }
}

impl From<ActorId> for KeyComponent {
    fn from(value: ActorId) -> Self {
        KeyComponent::Integer(value.get())
    }
}

impl From<Capability> for KeyComponent {
    fn from(value: Capability) -> Self {
        KeyComponent::Text(value.as_str().to_string())
    }
}

impl From<AccessScope> for KeyComponent {
    fn from(value: AccessScope) -> Self {
        KeyComponent::Text(value.as_component())
    }
}

impl From<SortDirection> for KeyComponent {
    fn from(value: SortDirection) -> Self {
        KeyComponent::Text(value.as_str().to_string())
    }
}

impl From<Value> for KeyComponent {
    fn from(value: Value) -> Self {
        match value {
            Value::String(text) => KeyComponent::Text(text),
            Value::Number(number) if number.is_i64() => {
                KeyComponent::Integer(number.as_i64().unwrap_or_default())
            }
            other => KeyComponent::Json(other),
        }
    }
}

/// Percent-encodes the characters that carry structure inside a key.
pub fn escape(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '%' => escaped.push_str("%25"),
            ':' => escaped.push_str("%3A"),
            '#' => escaped.push_str("%23"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// First `HASH_SUFFIX_LEN` hex digits of the SHA-256 of `input`.
pub fn short_hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(HASH_SUFFIX_LEN);
    digest
}

/// Builds the bounded key for `prefix` and `components`.
///
/// An empty component list, or one that renders to nothing, is keyed by the
/// hash of its serialized form so that no two key types share a bare prefix.
pub fn derive_key(prefix: &str, components: &[KeyComponent], bound: usize) -> String {
    let rendered: Vec<String> = components.iter().map(KeyComponent::render).collect();

    let joined = if rendered.iter().all(String::is_empty) {
        let serialized =
            Value::Array(components.iter().map(KeyComponent::to_value).collect()).to_string();
        format!("{prefix}{KEY_SEPARATOR}{}", short_hash(&serialized))
    } else {
        let mut key = String::from(prefix);
        for component in &rendered {
            key.push(KEY_SEPARATOR);
            key.push_str(component);
        }
        key
    };

    bound_key(joined, bound)
}

/// Truncates `key` to at most `bound` bytes, suffixing a hash of the full key.
pub fn bound_key(key: String, bound: usize) -> String {
    if key.len() <= bound {
        return key;
    }

    let suffix = short_hash(&key);
    let mut head_len = bound.saturating_sub(HASH_SUFFIX_LEN + TRUNCATION_MARKER.len_utf8());
    while !key.is_char_boundary(head_len) {
        head_len -= 1;
    }

    let mut bounded = String::with_capacity(bound);
    bounded.push_str(&key[..head_len]);
    bounded.push(TRUNCATION_MARKER);
    bounded.push_str(&suffix);
    bounded
}

/// Sweep prefix covering every key built from `prefix` and leading `components`.
pub fn sweep_prefix(prefix: &str, components: &[KeyComponent]) -> String {
    let mut swept = String::from(prefix);
    for component in components {
        swept.push(KEY_SEPARATOR);
        swept.push_str(&component.render());
    }
    swept.push(KEY_SEPARATOR);
    swept
}

/// Whether `key` may have been derived under `sweep`.
///
/// A truncated key matches when its retained head is consistent with the
/// sweep prefix; this can over-match but never misses a live key.
pub fn matches_sweep(key: &str, sweep: &str) -> bool {
    if key.starts_with(sweep) {
        return true;
    }
    match key.rsplit_once(TRUNCATION_MARKER) {
        Some((head, _)) => sweep.starts_with(head),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use serde_json::json;

    use super::*;

    #[test]
    fn joins_prefix_and_components() {
        let key = derive_key("customer", &["ctx".into(), 42i64.into()], 172);
        assert_eq!(key, "customer:ctx:42");
    }

    #[test]
    fn structural_characters_are_escaped() {
        let key = derive_key("list", &["a:b#c%".into()], 172);
        assert_eq!(key, "list:a%3Ab%23c%25");
    }

    #[test]
    fn json_components_serialize() {
        let key = derive_key("list", &[KeyComponent::Json(json!({"k": [1, 2]}))], 172);
        assert_eq!(key, "list:{\"k\"%3A[1,2]}");
    }

    #[test]
    fn empty_components_fall_back_to_hash() {
        let none = derive_key("list", &[], 172);
        let blank = derive_key("list", &["".into()], 172);
        assert!(none.starts_with("list:"));
        assert_eq!(none.len(), "list:".len() + HASH_SUFFIX_LEN);
        assert_ne!(none, blank);
        assert_ne!(none, "list:");
    }

    #[test]
    fn long_keys_are_bounded_and_distinct() {
        let mut seen = HashSet::new();
        for i in 0..200 {
            let component = format!("{}{i}", "x".repeat(300));
            let key = derive_key("paged", &[component.into()], 172);
            assert!(key.len() <= 172, "key too long: {}", key.len());
            assert!(key.contains(TRUNCATION_MARKER));
            assert!(seen.insert(key));
        }
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let component = "é".repeat(200);
        let key = derive_key("paged", &[component.into()], 172);
        assert!(key.len() <= 172);
        assert!(key.is_char_boundary(key.len()));
    }

    #[test]
    fn short_keys_are_untouched() {
        let key = "x".repeat(172);
        assert_eq!(bound_key(key.clone(), 172), key);
    }

    #[test]
    fn sweep_matches_only_whole_components() {
        let sweep = sweep_prefix("paged", &["orders".into()]);
        assert!(matches_sweep("paged:orders:all:0:20", &sweep));
        assert!(!matches_sweep("paged:orders2:all:0:20", &sweep));
        assert!(!matches_sweep("paged:order", &sweep));
    }

    #[test]
    fn sweep_matches_truncated_keys_of_the_context() {
        let context = "c".repeat(400);
        let key = derive_key("paged", &[context.as_str().into(), 1i64.into()], 172);
        let sweep = sweep_prefix("paged", &[context.as_str().into()]);
        assert!(matches_sweep(&key, &sweep));

        let unrelated = derive_key("record", &[context.as_str().into()], 172);
        assert!(!matches_sweep(&unrelated, &sweep));
    }
}
