//! Capability names and per-capability parameter schemas.
//!
//! Every capability declares the parameters it accepts. Intake validates a
//! request's `parameters` object against the schema before any job row is
//! written, so a rejected request has no side effects.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Capability and model names: lowercase, digits, `_`, `-`, `.`; max 64 chars.
static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9_.\-]{0,63}$").expect("valid regex"));

/// Maximum length of an input reference.
pub const MAX_INPUT_REF_LEN: usize = 1024;

/// Maximum number of keys accepted in a `parameters` object.
pub const MAX_PARAMETER_KEYS: usize = 64;

// ---------------------------------------------------------------------------
// Name validation
// ---------------------------------------------------------------------------

/// Validate a capability or model name.
pub fn validate_name(kind: &str, name: &str) -> Result<(), CoreError> {
    if NAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "Invalid {kind} name \"{name}\": use lowercase letters, digits, '_', '-' or '.' (max 64)"
        )))
    }
}

/// Validate an opaque storage reference supplied by a client.
pub fn validate_input_ref(input_ref: &str) -> Result<(), CoreError> {
    if input_ref.trim().is_empty() {
        return Err(CoreError::Validation(
            "input_ref must not be empty".to_string(),
        ));
    }
    if input_ref.len() > MAX_INPUT_REF_LEN {
        return Err(CoreError::Validation(format!(
            "input_ref must not exceed {MAX_INPUT_REF_LEN} characters"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// The accepted type and bounds of a single parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParamKind {
    /// A string whose character count lies in `min_len..=max_len`.
    Text { min_len: usize, max_len: usize },
    /// An integer within optional bounds, optionally restricted to a set of
    /// allowed values (e.g. supported sample rates).
    Integer {
        #[serde(default)]
        min: Option<i64>,
        #[serde(default)]
        max: Option<i64>,
        #[serde(default)]
        allowed: Vec<i64>,
    },
    Boolean,
    /// One of a fixed set of strings.
    Choice { options: Vec<String> },
}

/// A named parameter rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamRule {
    pub name: String,
    #[serde(default)]
    pub required: bool,
    #[serde(flatten)]
    pub kind: ParamKind,
}

/// Declared parameter schema of a capability.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSchema {
    #[serde(default)]
    pub params: Vec<ParamRule>,
    /// Accept keys that have no rule. Off by default.
    #[serde(default)]
    pub allow_unknown: bool,
}

impl ParameterSchema {
    pub fn new(params: Vec<ParamRule>) -> Self {
        Self {
            params,
            allow_unknown: false,
        }
    }

    /// Validate a `parameters` value against this schema.
    ///
    /// `null` is treated as an empty object.
    pub fn validate(&self, parameters: &serde_json::Value) -> Result<(), CoreError> {
        let empty = serde_json::Map::new();
        let object = match parameters {
            serde_json::Value::Null => &empty,
            serde_json::Value::Object(map) => map,
            _ => {
                return Err(CoreError::Validation(
                    "parameters must be a JSON object".to_string(),
                ))
            }
        };

        if object.len() > MAX_PARAMETER_KEYS {
            return Err(CoreError::Validation(format!(
                "parameters may contain at most {MAX_PARAMETER_KEYS} keys"
            )));
        }

        for rule in &self.params {
            match object.get(&rule.name) {
                None | Some(serde_json::Value::Null) => {
                    if rule.required {
                        return Err(CoreError::Validation(format!(
                            "Missing required parameter \"{}\"",
                            rule.name
                        )));
                    }
                }
                Some(value) => check_value(&rule.name, &rule.kind, value)?,
            }
        }

        if !self.allow_unknown {
            if let Some(key) = object
                .keys()
                .find(|key| !self.params.iter().any(|rule| &rule.name == *key))
            {
                return Err(CoreError::Validation(format!("Unknown parameter \"{key}\"")));
            }
        }

        Ok(())
    }

    /// Check the schema itself is well formed. Called at registry startup.
    pub fn check(&self) -> Result<(), String> {
        let mut seen = std::collections::HashSet::new();
        for rule in &self.params {
            if rule.name.is_empty() {
                return Err("parameter rule with empty name".to_string());
            }
            if !seen.insert(rule.name.as_str()) {
                return Err(format!("duplicate parameter rule \"{}\"", rule.name));
            }
            match &rule.kind {
                ParamKind::Text { min_len, max_len } if min_len > max_len => {
                    return Err(format!(
                        "parameter \"{}\": min_len {min_len} exceeds max_len {max_len}",
                        rule.name
                    ));
                }
                ParamKind::Integer {
                    min: Some(min),
                    max: Some(max),
                    ..
                } if min > max => {
                    return Err(format!(
                        "parameter \"{}\": min {min} exceeds max {max}",
                        rule.name
                    ));
                }
                ParamKind::Choice { options } if options.is_empty() => {
                    return Err(format!("parameter \"{}\": no options", rule.name));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

fn check_value(name: &str, kind: &ParamKind, value: &serde_json::Value) -> Result<(), CoreError> {
    match kind {
        ParamKind::Text { min_len, max_len } => {
            let text = value.as_str().ok_or_else(|| type_error(name, "a string"))?;
            let len = text.chars().count();
            if len < *min_len || len > *max_len {
                return Err(CoreError::Validation(format!(
                    "Parameter \"{name}\" must be between {min_len} and {max_len} characters (got {len})"
                )));
            }
        }
        ParamKind::Integer { min, max, allowed } => {
            let n = value.as_i64().ok_or_else(|| type_error(name, "an integer"))?;
            if min.is_some_and(|min| n < min) || max.is_some_and(|max| n > max) {
                return Err(CoreError::Validation(format!(
                    "Parameter \"{name}\" is out of range (got {n})"
                )));
            }
            if !allowed.is_empty() && !allowed.contains(&n) {
                return Err(CoreError::Validation(format!(
                    "Parameter \"{name}\" must be one of {allowed:?} (got {n})"
                )));
            }
        }
        ParamKind::Boolean => {
            if !value.is_boolean() {
                return Err(type_error(name, "a boolean"));
            }
        }
        ParamKind::Choice { options } => {
            let choice = value.as_str().ok_or_else(|| type_error(name, "a string"))?;
            if !options.iter().any(|o| o == choice) {
                return Err(CoreError::Validation(format!(
                    "Parameter \"{name}\" must be one of {options:?} (got \"{choice}\")"
                )));
            }
        }
    }
    Ok(())
}

fn type_error(name: &str, expected: &str) -> CoreError {
    CoreError::Validation(format!("Parameter \"{name}\" must be {expected}"))
}
