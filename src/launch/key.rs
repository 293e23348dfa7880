//! Run identity: validation of parameter sets and derivation of `RunKey`.

use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;

use crate::core::errors::{LaunchError, Result};
use crate::launch::params::{ParamValue, RunParameters};

/// Stable identity of a run, derived from its identifying parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunKey(String);

impl RunKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hash the identifying parameters without validating them.
    ///
    /// Entries are fed in name order, each field prefixed with its byte
    /// length, so the key does not depend on how the parameter set was built
    /// and no name or value can spill into its neighbour.
    pub fn derive(params: &RunParameters) -> Self {
        let mut hasher = Sha256::new();
        for (name, value) in params.identifying() {
            update_field(&mut hasher, name.as_bytes());
            update_field(&mut hasher, value.type_tag().as_bytes());
            update_field(&mut hasher, canonical_value(value).as_bytes());
        }
        RunKey(hex::encode(hasher.finalize()))
    }
}

fn update_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}

impl fmt::Display for RunKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn canonical_value(value: &ParamValue) -> String {
    match value {
        ParamValue::String(s) => s.clone(),
        ParamValue::Long(v) => v.to_string(),
        ParamValue::Date(d) => d.to_rfc3339_opts(SecondsFormat::Nanos, true),
        ParamValue::Double(v) => format!("{:016x}", v.to_bits()),
    }
}

/// Derives run keys from parameter sets, rejecting malformed ones.
pub trait KeyBuilder: Send + Sync {
    fn build_key(&self, params: &RunParameters) -> Result<RunKey>;
}

/// Checks required and allowed parameter names.
#[derive(Debug, Clone, Default)]
pub struct ParametersValidator {
    required_keys: BTreeSet<String>,
    optional_keys: BTreeSet<String>,
}

impl ParametersValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require(mut self, name: impl Into<String>) -> Self {
        self.required_keys.insert(name.into());
        self
    }

    /// Declaring any optional key closes the set: names that are neither
    /// required nor optional are rejected.
    pub fn allow(mut self, name: impl Into<String>) -> Self {
        self.optional_keys.insert(name.into());
        self
    }

    pub fn validate(&self, params: &RunParameters) -> Result<()> {
        for name in &self.required_keys {
            match params.get_value(name) {
                None => {
                    return Err(LaunchError::validation_field(
                        format!("missing required parameter '{}'", name),
                        name.as_str(),
                    ))
                }
                Some(ParamValue::String(s)) if s.trim().is_empty() => {
                    return Err(LaunchError::validation_field(
                        format!("required parameter '{}' is blank", name),
                        name.as_str(),
                    ))
                }
                Some(_) => {}
            }
        }

        if !self.optional_keys.is_empty() {
            for (name, _) in params.iter() {
                if !self.required_keys.contains(name) && !self.optional_keys.contains(name) {
                    return Err(LaunchError::validation_field(
                        format!("unexpected parameter '{}'", name),
                        name,
                    ));
                }
            }
        }

        if params.identifying().next().is_none() {
            return Err(LaunchError::validation(
                "parameter set has no identifying parameters",
            ));
        }

        Ok(())
    }
}

/// Validator followed by SHA-256 derivation.
#[derive(Debug, Clone, Default)]
pub struct DefaultKeyBuilder {
    validator: ParametersValidator,
}

impl DefaultKeyBuilder {
    pub fn new(validator: ParametersValidator) -> Self {
        Self { validator }
    }

    /// Preset for member-triggered jobs: `id` and `date` are required.
    pub fn member_job() -> Self {
        Self::new(ParametersValidator::new().require("id").require("date"))
    }
}

impl KeyBuilder for DefaultKeyBuilder {
    fn build_key(&self, params: &RunParameters) -> Result<RunKey> {
        self.validator.validate(params)?;
        Ok(RunKey::derive(params))
    }
}
