//! Broker configuration: a keyed map of module entries, each tagged with
//! its role.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;
use serde_json::Value;

use crate::error::BrokerError;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WriterSetting {
    /// HTTP collector endpoint; a local JSONL file is used when absent.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ValidationSetting {
    #[serde(default)]
    pub ignore_feature: bool,
    #[serde(default)]
    pub ignore_schema: bool,
    #[serde(default)]
    pub ignore_in_process: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModuleSetting {
    /// The broker's own entry (exactly one).
    Broker {
        #[serde(default)]
        writer: WriterSetting,
        #[serde(default)]
        validation: ValidationSetting,
    },
    /// A route planner, queried through `/plan` fan-out.
    Planner {
        endpoint: String,
        #[serde(default)]
        details: Value,
    },
    /// A simulator module driven over HTTP.
    Http {
        endpoint: String,
        #[serde(default)]
        details: Value,
    },
    /// A simulator module hosted in the broker process; its port is passed
    /// to setup alongside the configuration.
    Local {
        #[serde(default)]
        details: Value,
    },
}

pub type Setup = BTreeMap<String, ModuleSetting>;

/// Deterministic ordering of external modules: scenario sources run first
/// each tick, the user-agent last, so event fan-out stays reproducible.
fn order_rank(name: &str) -> usize {
    const PREFIXES: [&str; 7] = [
        "historical",
        "generator",
        "commuter",
        "scenario",
        "walk",
        "evaluat",
        "user",
    ];
    PREFIXES
        .iter()
        .position(|prefix| name.starts_with(prefix))
        .unwrap_or(PREFIXES.len() + 92)
}

pub struct SetupParser<'a> {
    settings: &'a Setup,
}

impl<'a> SetupParser<'a> {
    pub fn new(settings: &'a Setup) -> Self {
        Self { settings }
    }

    pub fn broker(&self) -> Result<(&'a String, &'a ModuleSetting), BrokerError> {
        let mut brokers = self
            .settings
            .iter()
            .filter(|(_, setting)| matches!(setting, ModuleSetting::Broker { .. }));
        let entry = brokers.next().ok_or(BrokerError::MissingBroker)?;
        if brokers.next().is_some() {
            return Err(BrokerError::Configuration(
                "more than one broker entry in the configuration".into(),
            ));
        }
        Ok(entry)
    }

    pub fn planners(&self) -> impl Iterator<Item = (&'a String, &'a str, &'a Value)> {
        self.settings.iter().filter_map(|(name, setting)| {
            if let ModuleSetting::Planner { endpoint, details } = setting {
                Some((name, endpoint.as_str(), details))
            } else {
                None
            }
        })
    }

    /// External simulator modules, ordered by name-prefix rank, then name.
    pub fn externals(&self) -> Vec<(&'a String, &'a ModuleSetting)> {
        let mut externals: Vec<(&String, &ModuleSetting)> = self
            .settings
            .iter()
            .filter(|(_, setting)| {
                matches!(
                    setting,
                    ModuleSetting::Http { .. } | ModuleSetting::Local { .. }
                )
            })
            .collect();
        externals.sort_by_key(|(name, _)| (order_rank(name), name.as_str()));
        externals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn setup_from(value: Value) -> Setup {
        serde_json::from_value(value).expect("setup")
    }

    #[test]
    fn parses_and_orders_modules() {
        let setup = setup_from(json!({
            "broker": { "type": "broker" },
            "user": { "type": "http", "endpoint": "http://user" },
            "ondemand": { "type": "http", "endpoint": "http://ondemand" },
            "walking": { "type": "local" },
            "scenario": { "type": "local" },
            "planner": { "type": "planner", "endpoint": "http://planner" },
        }));
        let parser = SetupParser::new(&setup);
        assert!(parser.broker().is_ok());
        assert_eq!(parser.planners().count(), 1);
        let names: Vec<&str> = parser
            .externals()
            .iter()
            .map(|(name, _)| name.as_str())
            .collect();
        // scenario before walking before user; unranked names last.
        assert_eq!(names, vec!["scenario", "walking", "user", "ondemand"]);
    }

    #[test]
    fn missing_broker_entry_is_fatal() {
        let setup = setup_from(json!({
            "user": { "type": "http", "endpoint": "http://user" },
        }));
        assert!(matches!(
            SetupParser::new(&setup).broker(),
            Err(BrokerError::MissingBroker)
        ));
    }

    #[test]
    fn duplicate_broker_entries_are_rejected() {
        let setup = setup_from(json!({
            "broker": { "type": "broker" },
            "broker2": { "type": "broker" },
        }));
        assert!(SetupParser::new(&setup).broker().is_err());
    }
}
