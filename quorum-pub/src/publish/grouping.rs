//! Canonical grouping of annotation values
//!
//! Annotation payloads are JSON. Two values belong to the same group when
//! they are deeply equal regardless of mapping key order; sequence order is
//! significant. The canonical key (mapping keys sorted recursively) is only
//! ever used as a key, never sent anywhere.

use serde_json::Value;
use std::collections::HashMap;

/// Marker a value may carry to flag itself as uncertain
pub const UNCERTAIN_MARKER: &str = "uncertain";

/// Deterministic serialization of `value` with mapping keys sorted at every depth
pub fn canonical_key(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // A JSON string serialization of a &str cannot fail
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Split the `uncertain` marker off a mapping
///
/// Non-mapping values are returned as-is and are never uncertain.
pub fn strip_uncertain(value: &Value) -> (Value, bool) {
    match value {
        Value::Object(map) => {
            let mut stripped = map.clone();
            let uncertain = stripped
                .remove(UNCERTAIN_MARKER)
                .map(|marker| is_truthy(&marker))
                .unwrap_or(false);
            (Value::Object(stripped), uncertain)
        }
        other => (other.clone(), false),
    }
}

/// Truthiness of a JSON flag: false, null, 0 and empty values are false
pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// One distinct value and its occurrences
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub key: String,
    /// First value pushed into the group, without any uncertainty marker
    pub value: Value,
    /// Last raw value pushed into the group
    pub latest: Value,
    pub count: usize,
    /// Occurrences flagged uncertain (always <= count)
    pub uncertain: usize,
}

/// Counts occurrences of canonically-equal values, in first-seen order
#[derive(Debug, Default)]
pub struct CanonicalGrouper {
    groups: Vec<Group>,
    index: HashMap<String, usize>,
    total: usize,
}

impl CanonicalGrouper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a certain occurrence
    pub fn push(&mut self, value: Value) {
        self.push_uncertain(value, false);
    }

    /// Add an occurrence whose uncertainty is known by the caller
    pub fn push_uncertain(&mut self, value: Value, uncertain: bool) {
        let key = canonical_key(&value);
        self.push_keyed(key, value.clone(), value, uncertain);
    }

    /// Add a value that may carry the `uncertain` marker
    pub fn push_marked(&mut self, raw: Value) {
        let (stripped, uncertain) = strip_uncertain(&raw);
        let key = canonical_key(&stripped);
        self.push_keyed(key, stripped, raw, uncertain);
    }

    /// Add an occurrence under a key computed by the caller
    ///
    /// Used when equality is looser than canonical equality (e.g. field sets
    /// compared up to order).
    pub fn push_keyed(&mut self, key: String, value: Value, raw: Value, uncertain: bool) {
        self.total += 1;

        match self.index.get(&key) {
            Some(&i) => {
                let group = &mut self.groups[i];
                group.count += 1;
                if uncertain {
                    group.uncertain += 1;
                }
                group.latest = raw;
            }
            None => {
                self.index.insert(key.clone(), self.groups.len());
                self.groups.push(Group {
                    key,
                    value,
                    latest: raw,
                    count: 1,
                    uncertain: usize::from(uncertain),
                });
            }
        }
    }

    /// Canonical key → occurrence count, in first-seen order
    pub fn counts(&self) -> Vec<(&str, usize)> {
        self.groups
            .iter()
            .map(|g| (g.key.as_str(), g.count))
            .collect()
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn into_groups(self) -> Vec<Group> {
        self.groups
    }

    /// Number of occurrences pushed so far
    pub fn total(&self) -> usize {
        self.total
    }

    /// Number of distinct groups
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}
