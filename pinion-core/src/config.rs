//! Registry configuration.
//!
//! Defaults suit the client: lenient hooks, deferred hydration. Servers
//! usually build one config at startup (from JSON or the environment) and
//! clone it into every per-request registry.

use std::env;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// What happens when a plugin hook fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookPolicy {
    /// Log the failure and carry on.
    #[default]
    Lenient,
    /// Log the failure and return it from the action call once the action
    /// itself succeeded.
    Strict,
}

impl FromStr for HookPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lenient" => Ok(HookPolicy::Lenient),
            "strict" => Ok(HookPolicy::Strict),
            other => Err(Error::InvalidState(format!("unknown hook policy `{other}`"))),
        }
    }
}

impl fmt::Display for HookPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookPolicy::Lenient => f.write_str("lenient"),
            HookPolicy::Strict => f.write_str("strict"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Shows up in log records for this registry.
    pub label: Option<String>,
    pub hook_policy: HookPolicy,
    /// Keep snapshot entries for stores that do not exist yet and apply them
    /// when the store is first created.
    pub defer_hydration: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            label: None,
            hook_policy: HookPolicy::Lenient,
            defer_hydration: true,
        }
    }
}

impl RegistryConfig {
    pub const ENV_HOOK_POLICY: &'static str = "PINION_HOOK_POLICY";
    pub const ENV_LABEL: &'static str = "PINION_REGISTRY_LABEL";
    pub const ENV_DEFER_HYDRATION: &'static str = "PINION_DEFER_HYDRATION";

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn hook_policy(mut self, policy: HookPolicy) -> Self {
        self.hook_policy = policy;
        self
    }

    pub fn defer_hydration(mut self, defer: bool) -> Self {
        self.defer_hydration = defer;
        self
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read overrides from the process environment. Unset variables keep
    /// their defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(policy) = lookup(Self::ENV_HOOK_POLICY) {
            config.hook_policy = policy.parse()?;
        }
        if let Some(label) = lookup(Self::ENV_LABEL) {
            config.label = Some(label);
        }
        if let Some(defer) = lookup(Self::ENV_DEFER_HYDRATION) {
            config.defer_hydration = parse_flag(&defer).ok_or_else(|| {
                Error::InvalidState(format!(
                    "{} must be a boolean, found `{defer}`",
                    Self::ENV_DEFER_HYDRATION
                ))
            })?;
        }
        Ok(config)
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults() {
        let config = RegistryConfig::default();
        assert_eq!(config.hook_policy, HookPolicy::Lenient);
        assert!(config.defer_hydration);
        assert!(config.label.is_none());
    }

    #[test]
    fn json_fills_missing_fields() {
        let config = RegistryConfig::from_json(r#"{ "hook_policy": "strict" }"#).unwrap();
        assert_eq!(config.hook_policy, HookPolicy::Strict);
        assert!(config.defer_hydration);

        assert!(RegistryConfig::from_json(r#"{ "hook_policy": "loud" }"#).is_err());
    }

    #[test]
    fn environment_overrides() {
        let vars: HashMap<&str, &str> = [
            (RegistryConfig::ENV_HOOK_POLICY, "Strict"),
            (RegistryConfig::ENV_LABEL, "request-7"),
            (RegistryConfig::ENV_DEFER_HYDRATION, "off"),
        ]
        .into_iter()
        .collect();

        let config =
            RegistryConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap();
        assert_eq!(config.hook_policy, HookPolicy::Strict);
        assert_eq!(config.label.as_deref(), Some("request-7"));
        assert!(!config.defer_hydration);
    }

    #[test]
    fn bad_environment_values_are_errors() {
        let result = RegistryConfig::from_lookup(|key| {
            (key == RegistryConfig::ENV_DEFER_HYDRATION).then(|| "maybe".to_owned())
        });
        assert!(result.is_err());
    }
}
