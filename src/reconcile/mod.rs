//! Present-vs-desired reconciliation
//!
//! Every resource manager computes the minimal set of remote changes by
//! diffing caller-supplied desired values against the snapshot just
//! fetched from the cluster. An unset desired field means "no opinion",
//! never a delete. An empty delta means the resource already matches and
//! no update call is issued.
//!
//! Older API versions return some booleans as strings ("true"/"false")
//! and some numerics as strings; comparing those raw would produce false
//! positives on every run, so version-skew fields go through a
//! normalizer before comparison.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;

// =============================================================================
// Delta
// =============================================================================

/// Ordered set of fields whose desired value differs from current
///
/// Field order follows the order comparisons were registered, so update
/// bodies are stable across runs.
#[derive(Debug, Clone, Default)]
pub struct Delta {
    fields: IndexMap<&'static str, Value>,
}

impl Delta {
    /// No field differs; the remote resource already matches.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Names of the changed fields, in registration order.
    pub fn field_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.keys().copied()
    }

    /// Render the minimal update body: only the changed fields.
    pub fn into_body(self) -> Value {
        Value::Object(
            self.fields
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        )
    }
}

// =============================================================================
// DeltaBuilder
// =============================================================================

/// Builder registering one comparison per recognized field
#[derive(Debug, Default)]
pub struct DeltaBuilder {
    delta: Delta,
}

impl DeltaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare a desired field against its current value. `None` desired
    /// is skipped.
    pub fn field<T: Serialize>(self, name: &'static str, desired: Option<&T>, current: &T) -> Self {
        self.field_normalized(name, desired, current, |v| v)
    }

    /// Compare against a current value the server may omit. A desired
    /// value against an absent current field always counts as a change.
    pub fn field_opt<T: Serialize>(
        mut self,
        name: &'static str,
        desired: Option<&T>,
        current: Option<&T>,
    ) -> Self {
        let Some(desired) = desired else {
            return self;
        };
        let desired_value = to_value(desired);
        match current {
            Some(current) if to_value(current) == desired_value => {}
            _ => {
                self.delta.fields.insert(name, desired_value);
            }
        }
        self
    }

    /// Compare with a normalizer applied to both sides first. Used for
    /// version-skew fields (string-typed booleans, relocated flags).
    pub fn field_normalized<T: Serialize>(
        mut self,
        name: &'static str,
        desired: Option<&T>,
        current: &T,
        normalize: fn(Value) -> Value,
    ) -> Self {
        let Some(desired) = desired else {
            return self;
        };
        let desired_value = to_value(desired);
        if normalize(desired_value.clone()) != normalize(to_value(current)) {
            self.delta.fields.insert(name, desired_value);
        }
        self
    }

    /// Compare membership lists order-insensitively. The delta carries
    /// the desired list as given.
    pub fn field_set(
        mut self,
        name: &'static str,
        desired: Option<&Vec<String>>,
        current: &[String],
    ) -> Self {
        let Some(desired) = desired else {
            return self;
        };
        let desired_set: BTreeSet<&str> = desired.iter().map(String::as_str).collect();
        let current_set: BTreeSet<&str> = current.iter().map(String::as_str).collect();
        if desired_set != current_set {
            self.delta.fields.insert(name, to_value(desired));
        }
        self
    }

    /// Register a field unconditionally (caller already decided it
    /// changed).
    pub fn insert(mut self, name: &'static str, value: Value) -> Self {
        self.delta.fields.insert(name, value);
        self
    }

    pub fn build(self) -> Delta {
        self.delta
    }
}

fn to_value<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

// =============================================================================
// Normalizers
// =============================================================================

/// Normalize boolean-ish wire values.
///
/// Older API releases return `"true"`/`"false"` (and occasionally
/// `1`/`0`) where newer ones return real booleans.
pub fn normalize_flag(value: Value) -> Value {
    match value {
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" => Value::Bool(true),
            "false" | "no" => Value::Bool(false),
            _ => Value::String(s),
        },
        Value::Number(n) => match n.as_i64() {
            Some(1) => Value::Bool(true),
            Some(0) => Value::Bool(false),
            _ => Value::Number(n),
        },
        other => other,
    }
}

/// Normalize numeric wire values that older releases return as strings.
pub fn normalize_number(value: Value) -> Value {
    match value {
        Value::String(s) => match s.trim().parse::<i64>() {
            Ok(n) => Value::Number(n.into()),
            Err(_) => Value::String(s),
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_equal_fields_yield_empty_delta() {
        let delta = DeltaBuilder::new()
            .field("description", Some(&"backup share"), &"backup share")
            .field("browsable", Some(&true), &true)
            .field("port", Some(&2049u16), &2049u16)
            .build();
        assert!(delta.is_empty());
    }

    #[test]
    fn test_unset_desired_is_no_opinion() {
        let delta = DeltaBuilder::new()
            .field::<String>("description", None, &"whatever".to_string())
            .field::<bool>("enabled", None, &false)
            .build();
        assert!(delta.is_empty());
    }

    #[test]
    fn test_single_difference_yields_exactly_that_field() {
        let delta = DeltaBuilder::new()
            .field("service", Some(&"on"), &"off")
            .field("encryption_required", Some(&false), &false)
            .build();
        assert_eq!(delta.len(), 1);
        assert_eq!(delta.get("service"), Some(&json!("on")));
        assert!(!delta.contains("encryption_required"));
    }

    #[test]
    fn test_field_opt_absent_current_counts_as_change() {
        let delta = DeltaBuilder::new()
            .field_opt("dns_zone", Some(&"pool.lab".to_string()), None)
            .field_opt(
                "gateway",
                Some(&"10.0.0.1".to_string()),
                Some(&"10.0.0.1".to_string()),
            )
            .build();
        assert_eq!(delta.len(), 1);
        assert!(delta.contains("dns_zone"));
    }

    #[test]
    fn test_normalized_flag_avoids_false_positive() {
        // Current from an older API release: string-typed boolean.
        let delta = DeltaBuilder::new()
            .field_normalized(
                "rdma_enabled",
                Some(&json!(true)),
                &json!("true"),
                normalize_flag,
            )
            .build();
        assert!(delta.is_empty());

        let delta = DeltaBuilder::new()
            .field_normalized(
                "rdma_enabled",
                Some(&json!(true)),
                &json!("false"),
                normalize_flag,
            )
            .build();
        assert_eq!(delta.get("rdma_enabled"), Some(&json!(true)));
    }

    #[test]
    fn test_normalize_number_string_skew() {
        let delta = DeltaBuilder::new()
            .field_normalized("smtp_port", Some(&json!(25)), &json!("25"), normalize_number)
            .build();
        assert!(delta.is_empty());
    }

    #[test]
    fn test_field_set_is_order_insensitive() {
        let desired = vec!["ops".to_string(), "backup".to_string()];
        let current = vec!["backup".to_string(), "ops".to_string()];
        let delta = DeltaBuilder::new()
            .field_set("members", Some(&desired), &current)
            .build();
        assert!(delta.is_empty());

        let smaller = vec!["ops".to_string()];
        let delta = DeltaBuilder::new()
            .field_set("members", Some(&smaller), &current)
            .build();
        assert_eq!(delta.get("members"), Some(&json!(["ops"])));
    }

    #[test]
    fn test_into_body_keeps_registration_order() {
        let delta = DeltaBuilder::new()
            .field("b_field", Some(&1), &2)
            .field("a_field", Some(&true), &false)
            .build();
        let names: Vec<_> = delta.field_names().collect();
        assert_eq!(names, vec!["b_field", "a_field"]);

        let body = delta.into_body();
        assert_eq!(body, json!({"b_field": 1, "a_field": true}));
    }
}
