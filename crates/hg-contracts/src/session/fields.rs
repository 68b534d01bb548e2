use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::modes::FieldSpec;

/// Ordered, trimmed artwork metadata keyed by field id. Blank values are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextFields(IndexMap<String, String>);

impl ContextFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<str>,
    {
        let mut fields = Self::new();
        for (key, value) in pairs {
            fields.insert(key, value.as_ref());
        }
        fields
    }

    pub fn insert(&mut self, id: impl Into<String>, value: &str) {
        let id = id.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            self.0.shift_remove(&id);
        } else {
            self.0.insert(id, trimmed.to_string());
        }
    }

    pub fn get(&self, id: &str) -> Option<&str> {
        self.0.get(id).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Keeps only declared fields, reordered to declaration order.
    pub fn restricted_to(&self, fields: &[FieldSpec]) -> Self {
        let mut out = Self::new();
        for field in fields {
            if let Some(value) = self.get(&field.id) {
                out.insert(field.id.clone(), value);
            }
        }
        out
    }

    /// Labeled (label, value) pairs for declared, non-empty fields.
    pub fn labeled<'a>(&'a self, fields: &'a [FieldSpec]) -> Vec<(&'a str, &'a str)> {
        fields
            .iter()
            .filter_map(|field| {
                self.get(&field.id)
                    .map(|value| (field.label.as_str(), value))
            })
            .collect()
    }
}
