//! Tagged state documents.
//!
//! Detectors persist themselves as an ordered list of `(tag, value)`
//! entries, where a value is either a string or a nested level. Tags are
//! short and only unique within one level. [`StateDocument`] is the in
//! memory implementation, and renders to JSON as an array of single key
//! objects:
//!
//! ```text
//! [{"a": "3600"}, {"c": [{"a": "1:2.5"}]}]
//! ```

use std::fmt::Display;
use std::str::FromStr;

use seasonal_core::codec::{parse_token, parse_tokens};
use seasonal_core::constants::LIST_DELIMITER;
use seasonal_core::Time;
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Sink for the tagged state of a detector.
pub trait StateInserter {
    /// Append a string value under `tag`.
    fn insert_value(&mut self, tag: &str, value: String);

    /// Append a nested level under `tag`, filled in by `persist`.
    fn insert_level(&mut self, tag: &str, persist: &mut dyn FnMut(&mut dyn StateInserter));
}

/// One entry of a level being traversed.
#[derive(Clone, Copy)]
pub enum StateEntry<'a> {
    /// A string value.
    Value(&'a str),
    /// A nested level.
    Level(&'a dyn StateTraverser),
}

impl<'a> StateEntry<'a> {
    /// The string value, or a [`Error::BadState`] naming `tag` for a level.
    pub fn value(&self, tag: &str) -> Result<&'a str> {
        match self {
            StateEntry::Value(value) => Ok(value),
            StateEntry::Level(_) => Err(Error::BadState(format!("'{}' should be a value", tag))),
        }
    }

    /// The nested level, or a [`Error::BadState`] naming `tag` for a value.
    pub fn level(&self, tag: &str) -> Result<&'a dyn StateTraverser> {
        match self {
            StateEntry::Level(level) => Ok(*level),
            StateEntry::Value(_) => Err(Error::BadState(format!("'{}' should be a level", tag))),
        }
    }
}

/// Source of the tagged state of a detector.
pub trait StateTraverser {
    /// The entries of this level in the order they were inserted.
    fn entries(&self) -> Box<dyn Iterator<Item = (&str, StateEntry<'_>)> + '_>;
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Value(String),
    Level(StateDocument),
}

/// An in memory state document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateDocument {
    entries: Vec<(String, Node)>,
}

impl StateDocument {
    /// An empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries at the top level.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The first string value stored under `tag` at the top level.
    pub fn get(&self, tag: &str) -> Option<&str> {
        self.entries.iter().find_map(|(name, node)| match node {
            Node::Value(value) if name == tag => Some(value.as_str()),
            _ => None,
        })
    }

    /// The JSON rendering of this document.
    pub fn to_json(&self) -> Value {
        Value::Array(
            self.entries
                .iter()
                .map(|(tag, node)| {
                    let value = match node {
                        Node::Value(value) => Value::String(value.clone()),
                        Node::Level(level) => level.to_json(),
                    };
                    let mut entry = Map::new();
                    entry.insert(tag.clone(), value);
                    Value::Object(entry)
                })
                .collect(),
        )
    }

    /// Rebuild a document from its JSON rendering.
    pub fn from_json(json: &Value) -> Result<Self> {
        let entries = json
            .as_array()
            .ok_or_else(|| Error::BadState("expected an array of entries".to_string()))?;

        let mut result = Self::new();
        for entry in entries {
            let object = entry
                .as_object()
                .filter(|object| object.len() == 1)
                .ok_or_else(|| Error::BadState(format!("expected a single tag, got {}", entry)))?;
            for (tag, value) in object {
                let node = match value {
                    Value::String(value) => Node::Value(value.clone()),
                    Value::Array(_) => Node::Level(Self::from_json(value)?),
                    other => {
                        return Err(Error::BadState(format!("unexpected value {} for '{}'", other, tag)))
                    }
                };
                result.entries.push((tag.clone(), node));
            }
        }
        Ok(result)
    }

    pub fn to_json_string(&self) -> String {
        self.to_json().to_string()
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_json(&value)
    }
}

impl StateInserter for StateDocument {
    fn insert_value(&mut self, tag: &str, value: String) {
        self.entries.push((tag.to_string(), Node::Value(value)));
    }

    fn insert_level(&mut self, tag: &str, persist: &mut dyn FnMut(&mut dyn StateInserter)) {
        let mut level = StateDocument::new();
        persist(&mut level);
        self.entries.push((tag.to_string(), Node::Level(level)));
    }
}

impl StateTraverser for StateDocument {
    fn entries(&self) -> Box<dyn Iterator<Item = (&str, StateEntry<'_>)> + '_> {
        Box::new(self.entries.iter().map(|(tag, node)| {
            let entry = match node {
                Node::Value(value) => StateEntry::Value(value.as_str()),
                Node::Level(level) => StateEntry::Level(level as &dyn StateTraverser),
            };
            (tag.as_str(), entry)
        }))
    }
}

// ============================================================================
// Helpers for persisting and restoring fields
// ============================================================================

/// Insert the display rendering of `value` under `tag`.
pub(crate) fn insert_display<T: Display>(inserter: &mut dyn StateInserter, tag: &str, value: T) {
    inserter.insert_value(tag, value.to_string());
}

/// Parse a single field.
pub(crate) fn parse_field<T: FromStr>(value: &str) -> Result<T> {
    Ok(parse_token(value)?)
}

/// Render a list of times.
pub(crate) fn join_times(times: &[Time]) -> String {
    times
        .iter()
        .map(Time::to_string)
        .collect::<Vec<_>>()
        .join(&LIST_DELIMITER.to_string())
}

/// Parse a list of times rendered by [`join_times`].
pub(crate) fn parse_times(value: &str) -> Result<Vec<Time>> {
    Ok(parse_tokens(value, LIST_DELIMITER)?)
}

/// Fail with [`Error::MissingTag`] if `field` was never restored.
pub(crate) fn require<T>(field: Option<T>, tag: &'static str, context: &'static str) -> Result<T> {
    field.ok_or_else(|| {
        tracing::error!(tag, context, "Missing tag while restoring");
        Error::MissingTag { tag, context }
    })
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    /// Flat entries, optionally wrapped in one nested level.
    fn document_strategy() -> impl Strategy<Value = StateDocument> {
        let entries = prop::collection::vec(("[a-h]", "[ -~]{0,12}"), 0..8);
        (entries.clone(), entries, any::<bool>()).prop_map(|(outer, inner, nest)| {
            let mut document = StateDocument::new();
            for (tag, value) in &outer {
                document.insert_value(tag, value.clone());
            }
            if nest {
                document.insert_level("z", &mut |level| {
                    for (tag, value) in &inner {
                        level.insert_value(tag, value.clone());
                    }
                });
            }
            document
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_json_round_trip(document in document_strategy()) {
            let json = document.to_json_string();
            prop_assert_eq!(StateDocument::from_json_str(&json).unwrap(), document);
        }

        #[test]
        fn prop_time_lists_round_trip(times in prop::collection::vec(any::<i64>(), 0..16)) {
            prop_assert_eq!(parse_times(&join_times(&times)).unwrap(), times);
        }
    }
}
