//! Settings a server declares for its configuration record.
//!
//! Declared parameters seed missing defaults into the record at startup
//! and type-check writes to their keys. Undeclared keys are free-form.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::tool::{json_type_name, ParamType};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerParameter {
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    /// Allowed values; empty means any value of the right type.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<Value>,
}

impl ServerParameter {
    pub fn new(name: impl Into<String>, display_name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            description: String::new(),
            param_type,
            required: false,
            default_value: None,
            options: Vec::new(),
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn options(mut self, options: Vec<Value>) -> Self {
        self.options = options;
        self
    }

    fn check(&self, value: &Value) -> Result<(), SettingError> {
        if value.is_null() {
            return if self.required {
                Err(self.invalid("is required and cannot be cleared".into()))
            } else {
                Ok(())
            };
        }
        if !self.param_type.accepts(value) {
            let expected = format!("{:?}", self.param_type).to_lowercase();
            return Err(self.invalid(format!("expects {expected}, got {}", json_type_name(value))));
        }
        if !self.options.is_empty() && !self.options.contains(value) {
            return Err(self.invalid(format!(
                "must be one of {}",
                Value::Array(self.options.clone())
            )));
        }
        Ok(())
    }

    fn invalid(&self, reason: String) -> SettingError {
        SettingError {
            name: self.name.clone(),
            reason,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("setting `{name}` {reason}")]
pub struct SettingError {
    pub name: String,
    pub reason: String,
}

/// Check the declared keys of `values`; the first violation wins.
pub fn check_settings(
    parameters: &[ServerParameter],
    values: &Map<String, Value>,
) -> Result<(), SettingError> {
    for param in parameters {
        if let Some(value) = values.get(&param.name) {
            param.check(value)?;
        }
    }
    Ok(())
}

/// Defaults of declared parameters that `current` does not hold yet.
pub fn missing_defaults(parameters: &[ServerParameter], current: &Map<String, Value>) -> Map<String, Value> {
    parameters
        .iter()
        .filter(|p| !current.contains_key(&p.name))
        .filter_map(|p| Some((p.name.clone(), p.default_value.clone()?)))
        .collect()
}
