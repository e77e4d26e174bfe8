use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::collections::btree_map;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldKey(Arc<str>);

impl FieldKey {
    pub fn new(value: impl AsRef<str>) -> Self {
        Self(Arc::from(value.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for FieldKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for FieldKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FieldKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for FieldKey {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl From<&FieldKey> for FieldKey {
    fn from(value: &FieldKey) -> Self {
        value.clone()
    }
}

/// A single field's value. Serializes untagged, so `FormValues` maps onto a
/// plain JSON object for schema-backed validators.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Bool(bool),
    Number(#[serde(with = "rust_decimal::serde::float")] Decimal),
    List(Vec<String>),
}

impl FieldValue {
    /// Mirrors the loose truthiness the rule table relies on: empty text,
    /// `false`, zero and an empty selection all count as "no value".
    pub fn is_truthy(&self) -> bool {
        match self {
            FieldValue::Text(text) => !text.is_empty(),
            FieldValue::Bool(flag) => *flag,
            FieldValue::Number(number) => !number.is_zero(),
            FieldValue::List(items) => !items.is_empty(),
        }
    }

    pub fn is_present(&self) -> bool {
        !matches!(self, FieldValue::Text(text) if text.is_empty())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(flag) => Some(*flag),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<Decimal> {
        match self {
            FieldValue::Number(number) => Some(*number),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            FieldValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// Length used by the `max`/`min` rules: characters for text, items for
    /// lists, digits of the rendered number otherwise.
    pub fn length(&self) -> usize {
        match self {
            FieldValue::Text(text) => text.chars().count(),
            FieldValue::List(items) => items.len(),
            FieldValue::Number(number) => number.to_string().chars().count(),
            FieldValue::Bool(flag) => flag.to_string().len(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            FieldValue::Text(text) => serde_json::Value::String(text.clone()),
            FieldValue::Bool(flag) => serde_json::Value::Bool(*flag),
            FieldValue::Number(number) => decimal_to_json(*number),
            FieldValue::List(items) => serde_json::Value::Array(
                items
                    .iter()
                    .cloned()
                    .map(serde_json::Value::String)
                    .collect(),
            ),
        }
    }
}

impl Display for FieldValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::Text(text) => f.write_str(text),
            FieldValue::Bool(flag) => write!(f, "{flag}"),
            FieldValue::Number(number) => write!(f, "{number}"),
            FieldValue::List(items) => f.write_str(&items.join(", ")),
        }
    }
}

impl Default for FieldValue {
    fn default() -> Self {
        FieldValue::Text(String::new())
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<Decimal> for FieldValue {
    fn from(value: Decimal) -> Self {
        FieldValue::Number(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Number(Decimal::from(value))
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(value: Vec<String>) -> Self {
        FieldValue::List(value)
    }
}

impl From<Vec<&str>> for FieldValue {
    fn from(value: Vec<&str>) -> Self {
        FieldValue::List(value.into_iter().map(str::to_string).collect())
    }
}

fn decimal_to_json(number: Decimal) -> serde_json::Value {
    if number.fract().is_zero() {
        if let Some(integer) = number.to_i64() {
            return serde_json::Value::from(integer);
        }
    }
    number
        .to_f64()
        .and_then(serde_json::Number::from_f64)
        .map_or(serde_json::Value::Null, serde_json::Value::Number)
}

/// Conversion between a typed model field and its `FieldValue` slot. Used by
/// `#[derive(FormModel)]`.
pub trait FieldType: Sized {
    fn into_field_value(self) -> FieldValue;
    fn from_field_value(value: &FieldValue) -> Option<Self>;
}

impl FieldType for String {
    fn into_field_value(self) -> FieldValue {
        FieldValue::Text(self)
    }

    fn from_field_value(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::Text(text) => Some(text.clone()),
            FieldValue::Number(number) => Some(number.to_string()),
            _ => None,
        }
    }
}

impl FieldType for bool {
    fn into_field_value(self) -> FieldValue {
        FieldValue::Bool(self)
    }

    fn from_field_value(value: &FieldValue) -> Option<Self> {
        value.as_bool()
    }
}

impl FieldType for Decimal {
    fn into_field_value(self) -> FieldValue {
        FieldValue::Number(self)
    }

    fn from_field_value(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::Number(number) => Some(*number),
            FieldValue::Text(text) => text.trim().parse().ok(),
            _ => None,
        }
    }
}

impl FieldType for i64 {
    fn into_field_value(self) -> FieldValue {
        FieldValue::Number(Decimal::from(self))
    }

    fn from_field_value(value: &FieldValue) -> Option<Self> {
        Decimal::from_field_value(value)?.to_i64()
    }
}

impl FieldType for f64 {
    fn into_field_value(self) -> FieldValue {
        Decimal::from_f64(self).map_or_else(FieldValue::default, FieldValue::Number)
    }

    fn from_field_value(value: &FieldValue) -> Option<Self> {
        Decimal::from_field_value(value)?.to_f64()
    }
}

impl FieldType for Vec<String> {
    fn into_field_value(self) -> FieldValue {
        FieldValue::List(self)
    }

    fn from_field_value(value: &FieldValue) -> Option<Self> {
        value.as_list().map(<[String]>::to_vec)
    }
}

/// A struct whose named fields map one-to-one onto form fields.
pub trait FormModel: Sized + Send + Sync + 'static {
    type Fields;

    fn fields() -> Self::Fields;

    fn into_values(self) -> FormValues;

    fn from_values(values: &FormValues) -> Option<Self>;
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormValues(BTreeMap<FieldKey, FieldValue>);

impl FormValues {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn insert(
        &mut self,
        name: impl Into<FieldKey>,
        value: impl Into<FieldValue>,
    ) -> Option<FieldValue> {
        self.0.insert(name.into(), value.into())
    }

    pub fn with(mut self, name: impl Into<FieldKey>, value: impl Into<FieldValue>) -> Self {
        self.insert(name, value);
        self
    }

    /// Single-field projection handed to validators for per-field checks.
    pub fn project(name: &FieldKey, value: FieldValue) -> Self {
        let mut values = Self::new();
        values.0.insert(name.clone(), value);
        values
    }

    pub fn merge(&mut self, other: &FormValues) {
        for (name, value) in other.iter() {
            self.0.insert(name.clone(), value.clone());
        }
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&FieldKey, &FieldValue) -> bool) {
        self.0.retain(|name, value| keep(name, value));
    }

    pub fn keys(&self) -> impl Iterator<Item = &FieldKey> {
        self.0.keys()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, FieldKey, FieldValue> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.0
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_json()))
                .collect(),
        )
    }
}

impl<K, V> FromIterator<(K, V)> for FormValues
where
    K: Into<FieldKey>,
    V: Into<FieldValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        )
    }
}

impl<'a> IntoIterator for &'a FormValues {
    type Item = (&'a FieldKey, &'a FieldValue);
    type IntoIter = btree_map::Iter<'a, FieldKey, FieldValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Field name to error message. A field without an entry is valid.
pub type FormErrors = BTreeMap<FieldKey, String>;

pub type FormTouched = BTreeMap<FieldKey, bool>;

pub fn errors_from<K, V, I>(entries: I) -> FormErrors
where
    K: Into<FieldKey>,
    V: Into<String>,
    I: IntoIterator<Item = (K, V)>,
{
    entries
        .into_iter()
        .map(|(name, message)| (name.into(), message.into()))
        .collect()
}

/// Sets or clears a single error entry. `None` removes the key so resolved
/// errors never linger in the map.
pub fn merge_field_error(errors: &mut FormErrors, name: &FieldKey, error: Option<String>) {
    match error {
        Some(message) => {
            errors.insert(name.clone(), message);
        }
        None => {
            errors.remove(name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness_matches_rule_table_expectations() {
        assert!(!FieldValue::from("").is_truthy());
        assert!(FieldValue::from("a").is_truthy());
        assert!(!FieldValue::from(false).is_truthy());
        assert!(!FieldValue::Number(Decimal::ZERO).is_truthy());
        assert!(!FieldValue::List(Vec::new()).is_truthy());
        assert!(FieldValue::from(vec!["x"]).is_truthy());
    }

    #[test]
    fn presence_only_rejects_empty_text() {
        assert!(!FieldValue::from("").is_present());
        assert!(FieldValue::from(false).is_present());
        assert!(FieldValue::Number(Decimal::ZERO).is_present());
    }

    #[test]
    fn values_serialize_to_plain_json_object() {
        let values = FormValues::new()
            .with("name", "Jack")
            .with("age", 42_i64)
            .with("terms", true)
            .with("tags", vec!["a", "b"]);
        let json = serde_json::to_value(&values).expect("serialize values");
        assert_eq!(
            json,
            serde_json::json!({ "name": "Jack", "age": 42.0, "terms": true, "tags": ["a", "b"] })
        );
        assert_eq!(values.to_json()["age"], serde_json::json!(42));
    }

    #[test]
    fn untagged_deserialize_keeps_strings_as_text() {
        let values: FormValues =
            serde_json::from_str(r#"{"zip": "01234", "count": 3, "ok": false, "tags": []}"#)
                .expect("deserialize values");
        assert_eq!(values.get("zip"), Some(&FieldValue::from("01234")));
        assert_eq!(values.get("count"), Some(&FieldValue::from(3_i64)));
        assert_eq!(values.get("ok"), Some(&FieldValue::Bool(false)));
        assert_eq!(values.get("tags"), Some(&FieldValue::List(Vec::new())));
    }

    #[test]
    fn merge_field_error_removes_cleared_entries() {
        let name = FieldKey::new("email");
        let mut errors = FormErrors::new();
        merge_field_error(&mut errors, &name, Some("bad".to_string()));
        assert_eq!(errors.get("email").map(String::as_str), Some("bad"));
        merge_field_error(&mut errors, &name, None);
        assert!(errors.is_empty());
    }
}
