//! Run parameters: the immutable name → value mapping a launch is made with.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A single parameter value
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ParamValue {
    String(String),
    Long(i64),
    Date(DateTime<Utc>),
    Double(f64),
}

impl ParamValue {
    /// Short tag used in the canonical key form
    pub fn type_tag(&self) -> &'static str {
        match self {
            ParamValue::String(_) => "string",
            ParamValue::Long(_) => "long",
            ParamValue::Date(_) => "date",
            ParamValue::Double(_) => "double",
        }
    }
}

// Doubles compare by bit pattern so parameters can be used as map keys.
impl PartialEq for ParamValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ParamValue::String(a), ParamValue::String(b)) => a == b,
            (ParamValue::Long(a), ParamValue::Long(b)) => a == b,
            (ParamValue::Date(a), ParamValue::Date(b)) => a == b,
            (ParamValue::Double(a), ParamValue::Double(b)) => a.to_bits() == b.to_bits(),
            _ => false,
        }
    }
}

impl Eq for ParamValue {}

impl Hash for ParamValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            ParamValue::String(s) => s.hash(state),
            ParamValue::Long(v) => v.hash(state),
            ParamValue::Date(d) => d.hash(state),
            ParamValue::Double(v) => v.to_bits().hash(state),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::String(s) => write!(f, "{}", s),
            ParamValue::Long(v) => write!(f, "{}", v),
            ParamValue::Date(d) => write!(f, "{}", d.to_rfc3339()),
            ParamValue::Double(v) => write!(f, "{}", v),
        }
    }
}

/// A parameter value plus whether it takes part in run identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunParameter {
    pub value: ParamValue,
    pub identifying: bool,
}

/// Immutable set of named parameters a run is launched with.
///
/// Backed by a `BTreeMap`, so two sets built in a different order are equal
/// and iterate identically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunParameters {
    entries: BTreeMap<String, RunParameter>,
}

impl RunParameters {
    pub fn builder() -> RunParametersBuilder {
        RunParametersBuilder::new()
    }

    pub fn get(&self, name: &str) -> Option<&RunParameter> {
        self.entries.get(name)
    }

    pub fn get_value(&self, name: &str) -> Option<&ParamValue> {
        self.entries.get(name).map(|p| &p.value)
    }

    pub fn get_string(&self, name: &str) -> Option<&str> {
        match self.get_value(name)? {
            ParamValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn get_long(&self, name: &str) -> Option<i64> {
        match self.get_value(name)? {
            ParamValue::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_date(&self, name: &str) -> Option<DateTime<Utc>> {
        match self.get_value(name)? {
            ParamValue::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn get_double(&self, name: &str) -> Option<f64> {
        match self.get_value(name)? {
            ParamValue::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &RunParameter)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Iterate only the identifying entries, in name order
    pub fn identifying(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.iter()
            .filter(|(_, p)| p.identifying)
            .map(|(k, p)| (k, &p.value))
    }
}

impl fmt::Display for RunParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (name, param)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", name, param.value)?;
        }
        write!(f, "}}")
    }
}

/// Builder for RunParameters. Later additions under the same name replace
/// earlier ones.
#[derive(Debug, Default)]
pub struct RunParametersBuilder {
    entries: BTreeMap<String, RunParameter>,
}

impl RunParametersBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_parameter(mut self, name: impl Into<String>, parameter: RunParameter) -> Self {
        self.entries.insert(name.into(), parameter);
        self
    }

    fn add(self, name: impl Into<String>, value: ParamValue, identifying: bool) -> Self {
        self.add_parameter(name, RunParameter { value, identifying })
    }

    pub fn add_string(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.add(name, ParamValue::String(value.into()), true)
    }

    pub fn add_string_with(
        self,
        name: impl Into<String>,
        value: impl Into<String>,
        identifying: bool,
    ) -> Self {
        self.add(name, ParamValue::String(value.into()), identifying)
    }

    pub fn add_long(self, name: impl Into<String>, value: i64) -> Self {
        self.add(name, ParamValue::Long(value), true)
    }

    pub fn add_long_with(self, name: impl Into<String>, value: i64, identifying: bool) -> Self {
        self.add(name, ParamValue::Long(value), identifying)
    }

    pub fn add_date(self, name: impl Into<String>, value: DateTime<Utc>) -> Self {
        self.add(name, ParamValue::Date(value), true)
    }

    pub fn add_date_with(
        self,
        name: impl Into<String>,
        value: DateTime<Utc>,
        identifying: bool,
    ) -> Self {
        self.add(name, ParamValue::Date(value), identifying)
    }

    pub fn add_double(self, name: impl Into<String>, value: f64) -> Self {
        self.add(name, ParamValue::Double(value), true)
    }

    pub fn add_double_with(self, name: impl Into<String>, value: f64, identifying: bool) -> Self {
        self.add(name, ParamValue::Double(value), identifying)
    }

    /// Copy every entry of an existing parameter set into this builder
    pub fn extend_from(mut self, params: &RunParameters) -> Self {
        for (name, param) in params.iter() {
            self.entries.insert(name.to_string(), param.clone());
        }
        self
    }

    pub fn build(self) -> RunParameters {
        RunParameters {
            entries: self.entries,
        }
    }
}
