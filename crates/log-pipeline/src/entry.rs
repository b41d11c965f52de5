// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The record type flowing through a pipeline.
//!
//! An [`Entry`] carries the raw log line, its timestamp, the label set that
//! identifies its stream, and an `extracted` map of dynamically typed values
//! produced by parsing stages. The `extracted` map is reseeded from the labels
//! at the start of every pipeline run, so stages can treat labels and parsed
//! fields the same way.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::Hasher;
use std::time::SystemTime;

use fnv::FnvHasher;

use crate::errors::ConversionError;
use crate::util::parse_duration_secs;

/// Label name to label value. Sorted so that fingerprints are stable.
pub type LabelSet = BTreeMap<String, String>;

/// Hash of a label set identifying one logical stream.
pub type Fingerprint = u64;

const SEPARATOR: u8 = 0xff;

/// Builds a [`LabelSet`] from string pairs.
#[must_use]
pub fn label_set<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> LabelSet {
    pairs
        .into_iter()
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
}

/// Computes the stream fingerprint of a label set.
#[must_use]
pub fn fingerprint(labels: &LabelSet) -> Fingerprint {
    let mut hasher = FnvHasher::default();
    for (name, value) in labels {
        hasher.write(name.as_bytes());
        hasher.write_u8(SEPARATOR);
        hasher.write(value.as_bytes());
        hasher.write_u8(SEPARATOR);
    }
    hasher.finish()
}

/// Reports whether `name` matches `[a-zA-Z_][a-zA-Z0-9_]*`.
#[must_use]
pub fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

/// A scalar value stored in an entry's `extracted` map.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Null,
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Null => "null",
        }
    }

    /// Converts the value to its string form. `Null` has none.
    pub fn as_string(&self) -> Result<String, ConversionError> {
        match self {
            Value::String(s) => Ok(s.clone()),
            Value::Int(i) => Ok(i.to_string()),
            Value::Float(f) => Ok(f.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            Value::Null => Err(ConversionError {
                found: "null".to_string(),
                target: "string",
            }),
        }
    }

    /// Converts the value to a float.
    ///
    /// Strings are parsed as floats first and as durations second, in which
    /// case the result is the number of seconds: `"0.5ms"` becomes `0.0005`.
    pub fn as_float(&self) -> Result<f64, ConversionError> {
        let fail = || ConversionError {
            found: format!("{} {self}", self.type_name()),
            target: "float",
        };
        match self {
            #[allow(clippy::cast_precision_loss)]
            Value::Int(i) => Ok(*i as f64),
            Value::Float(f) => Ok(*f),
            Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .or_else(|| parse_duration_secs(s))
                .ok_or_else(fail),
            Value::Null => Err(fail()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{s}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Null => write!(f, "null"),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<serde_json::Value> for Value {
    /// Objects and arrays are kept as their JSON text.
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::String(s),
            other => Value::String(other.to_string()),
        }
    }
}

/// A name/value pair carried alongside an entry but not used for routing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelPair {
    pub name: String,
    pub value: String,
}

/// One log record in flight.
#[derive(Clone, Debug, PartialEq)]
pub struct Entry {
    pub labels: LabelSet,
    pub extracted: HashMap<String, Value>,
    pub timestamp: SystemTime,
    pub line: String,
    pub non_indexed_labels: Vec<LabelPair>,
    pub structured_metadata: Vec<LabelPair>,
}

impl Entry {
    #[must_use]
    pub fn new(labels: LabelSet, line: impl Into<String>, timestamp: SystemTime) -> Self {
        Self {
            labels,
            extracted: HashMap::new(),
            timestamp,
            line: line.into(),
            non_indexed_labels: Vec::new(),
            structured_metadata: Vec::new(),
        }
    }

    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        fingerprint(&self.labels)
    }

    /// Copies every label into `extracted`, overwriting existing keys.
    pub fn seed_extracted(&mut self) {
        for (name, value) in &self.labels {
            self.extracted
                .insert(name.clone(), Value::String(value.clone()));
        }
    }
}
