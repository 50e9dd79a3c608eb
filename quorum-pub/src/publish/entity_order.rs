//! Ordering of entity form fields
//!
//! Campaign configurations change over time while older annotations keep
//! their fields, so a field set may mix configured and no longer configured
//! `(entity_type, instruction)` pairs. Configured pairs come first, in the
//! configured order; the others follow alphabetically.

use serde_json::Value;
use std::cmp::Ordering;

/// Configured `(entity_type, instruction)` order
#[derive(Debug, Clone, Default)]
pub struct EntityOrder {
    configured: Vec<(String, String)>,
}

impl EntityOrder {
    pub fn new(configured: Vec<(String, String)>) -> Self {
        Self { configured }
    }

    fn position(&self, field: &Value) -> Option<usize> {
        let (entity_type, instruction) = field_identity(field);
        self.configured
            .iter()
            .position(|(t, i)| t == entity_type && i == instruction)
    }

    fn compare(&self, a: &Value, b: &Value) -> Ordering {
        match (self.position(a), self.position(b)) {
            (Some(pa), Some(pb)) => pa.cmp(&pb),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => field_identity(a).cmp(&field_identity(b)),
        }
    }

    /// Sorted copy of `fields` (stable)
    pub fn sort_fields(&self, fields: &[Value]) -> Vec<Value> {
        let mut sorted = fields.to_vec();
        sorted.sort_by(|a, b| self.compare(a, b));
        sorted
    }

    /// Whether two field sets hold the same fields up to order
    pub fn equal_up_to_order(&self, a: &[Value], b: &[Value]) -> bool {
        a.len() == b.len() && self.sort_fields(a) == self.sort_fields(b)
    }
}

fn field_identity(field: &Value) -> (&str, &str) {
    (
        field.get("entity_type").and_then(Value::as_str).unwrap_or_default(),
        field.get("instruction").and_then(Value::as_str).unwrap_or_default(),
    )
}
