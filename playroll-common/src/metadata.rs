//! Open key/value metadata attached to queue entries
//!
//! Metadata is an arbitrary JSON object. A few keys have a fixed meaning for
//! the scheduler and the ordering reconciler:
//!
//! | key             | type    | used for                                   |
//! |-----------------|---------|--------------------------------------------|
//! | `filename`      | string  | matching against an external ordering file |
//! | `originalIndex` | integer | segment id, positional ordering match      |
//! | `streamId`      | string  | logical sub-stream the segment belongs to  |
//!
//! Any other key is carried through untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key holding the external file name of an entry
pub const FILENAME_KEY: &str = "filename";

/// Key holding the position the entry had in its original source list
pub const ORIGINAL_INDEX_KEY: &str = "originalIndex";

/// Key holding the logical stream tag
pub const STREAM_ID_KEY: &str = "streamId";

/// Metadata map stored alongside each queue entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(Map<String, Value>);

impl Metadata {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Metadata with only the `filename` key set
    pub fn with_filename(filename: impl Into<String>) -> Self {
        let mut metadata = Self::new();
        metadata.set_filename(filename);
        metadata
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn filename(&self) -> Option<&str> {
        self.0.get(FILENAME_KEY).and_then(Value::as_str)
    }

    pub fn set_filename(&mut self, filename: impl Into<String>) {
        self.0.insert(FILENAME_KEY.to_string(), Value::String(filename.into()));
    }

    /// `originalIndex` as a non-negative integer
    ///
    /// Numeric strings are accepted as well, since ordering sources written by
    /// hand frequently quote their numbers.
    pub fn original_index(&self) -> Option<u64> {
        match self.0.get(ORIGINAL_INDEX_KEY)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn stream_id(&self) -> Option<&str> {
        self.0.get(STREAM_ID_KEY).and_then(Value::as_str)
    }

    /// Shallow merge: every key of `other` overwrites the same key here
    pub fn merge(&mut self, other: &Metadata) {
        for (key, value) in &other.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    /// True when every `(field, value)` pair is present with an equal value
    pub fn matches_all<'a, I>(&self, pairs: I) -> bool
    where
        I: IntoIterator<Item = (&'a str, &'a Value)>,
    {
        pairs
            .into_iter()
            .all(|(field, expected)| self.0.get(field) == Some(expected))
    }

    /// Encode for the `metadata` TEXT column
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(&self.0)?)
    }

    /// Decode the `metadata` TEXT column; non-object JSON is rejected
    pub fn from_json(text: &str) -> crate::Result<Self> {
        match serde_json::from_str::<Value>(text)? {
            Value::Object(map) => Ok(Self(map)),
            Value::Null => Ok(Self::new()),
            other => Err(crate::Error::InvalidInput(format!(
                "metadata must be a JSON object, got {}",
                other
            ))),
        }
    }
}

impl From<Map<String, Value>> for Metadata {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl From<Metadata> for Value {
    fn from(metadata: Metadata) -> Self {
        Value::Object(metadata.0)
    }
}

impl FromIterator<(String, Value)> for Metadata {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
