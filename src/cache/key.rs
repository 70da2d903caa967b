//! Cache key derivation
//!
//! Parameters are held in a `BTreeMap` so iteration is always name-sorted.
//! Two parameter sets with the same pairs produce the same key no matter
//! which order the caller inserted them in. Names, values and the resource
//! name are percent-encoded so delimiter characters inside them cannot make
//! two different parameter sets collide.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use urlencoding::encode;

/// Separates the resource name from the parameter list
const RESOURCE_DELIMITER: char = '|';

/// Separates one `name:value` pair from the next
const PAIR_DELIMITER: char = '&';

/// Name-sorted parameters that distinguish calls to the same resource
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamSet(BTreeMap<String, String>);

impl ParamSet {
    /// Creates an empty parameter set
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a parameter, builder style
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    /// Adds or replaces a parameter
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterates parameters in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Serializes the set for the `params` column
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.0)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ParamSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Derives the cache key for a resource and its parameters
///
/// The layout is `resource|name:value&name:value` with pairs in name order,
/// e.g. `fixtures|date:2024-05-01&league:39`. Each part is percent-encoded,
/// so `fixtures/statistics` becomes `fixtures%2Fstatistics`.
pub fn derive_key(resource_name: &str, params: &ParamSet) -> String {
    let mut key = String::with_capacity(resource_name.len() + 1 + params.len() * 16);
    key.push_str(&encode(resource_name));
    key.push(RESOURCE_DELIMITER);

    for (i, (name, value)) in params.iter().enumerate() {
        if i > 0 {
            key.push(PAIR_DELIMITER);
        }
        key.push_str(&encode(name));
        key.push(':');
        key.push_str(&encode(value));
    }

    key
}
