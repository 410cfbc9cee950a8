//! Module specification documents: what each module answers on `/spec`.
//!
//! A specification names the event-schema version and, per event type, the
//! direction (`Tx` = produced by `step`, `Rx` = accepted on `triggered`), a
//! JSON schema for the payload and optional feature declarations. The broker
//! checks all module specifications against each other before a run starts.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::event::EventType;

/// URI identifying the event-schema version all modules must agree on.
pub const VERSION_1: &str = "https://github.com/tandem-sim/tandem/tree/main";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxRx {
    Tx,
    Rx,
}

impl TxRx {
    pub fn opposite(self) -> Self {
        match self {
            TxRx::Tx => TxRx::Rx,
            TxRx::Rx => TxRx::Tx,
        }
    }
}

/// Feature names supported (`declared`) or demanded of the other side
/// (`required`) for one event type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub declared: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDefinition {
    pub dir: TxRx,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature: Option<FeatureDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleSpecification {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events: Option<BTreeMap<String, EventDefinition>>,
}

/// Builder collecting Tx/Rx event definitions for one module.
#[derive(Debug, Default)]
pub struct SpecificationBuilder {
    events: BTreeMap<String, EventDefinition>,
}

impl SpecificationBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an event produced by this module's `step`.
    pub fn tx(mut self, event_type: EventType, schema: Value) -> Self {
        self.events.insert(
            event_type.as_str().to_owned(),
            EventDefinition {
                dir: TxRx::Tx,
                schema: Some(schema),
                feature: None,
            },
        );
        self
    }

    /// Declare an event accepted on this module's `triggered`.
    pub fn rx(mut self, event_type: EventType, schema: Value) -> Self {
        self.events.insert(
            event_type.as_str().to_owned(),
            EventDefinition {
                dir: TxRx::Rx,
                schema: Some(schema),
                feature: None,
            },
        );
        self
    }

    /// Attach feature declarations to an already-registered event type.
    pub fn feature(
        mut self,
        event_type: EventType,
        declared: &[&str],
        required: &[&str],
    ) -> Self {
        if let Some(definition) = self.events.get_mut(event_type.as_str()) {
            definition.feature = Some(FeatureDefinition {
                declared: (!declared.is_empty())
                    .then(|| declared.iter().map(|s| s.to_string()).collect()),
                required: (!required.is_empty())
                    .then(|| required.iter().map(|s| s.to_string()).collect()),
            });
        }
        self
    }

    pub fn build(self, version: &str) -> ModuleSpecification {
        ModuleSpecification {
            version: version.to_owned(),
            events: (!self.events.is_empty()).then_some(self.events),
        }
    }
}

/// Standard payload schemas shared by the simulator modules. All schemas
/// resolve `Location` through `$defs` so compatibility checking exercises
/// `$ref` resolution.
pub mod schemas {
    use super::*;

    fn location_def() -> Value {
        json!({
            "type": "object",
            "required": ["locationId", "lat", "lng"],
            "properties": {
                "locationId": { "type": "string" },
                "lat": { "type": "number" },
                "lng": { "type": "number" }
            }
        })
    }

    fn envelope(event_type: &str, details: Value) -> Value {
        json!({
            "type": "object",
            "required": ["eventType", "time", "details"],
            "properties": {
                "eventType": { "const": event_type },
                "source": { "type": "string" },
                "time": { "type": "number" },
                "service": { "type": "string" },
                "details": details
            },
            "$defs": { "Location": location_def() }
        })
    }

    pub fn demand() -> Value {
        envelope(
            "DEMAND",
            json!({
                "type": "object",
                "required": ["userId", "demandId", "org", "dst"],
                "properties": {
                    "userId": { "type": "string" },
                    "demandId": { "type": "string" },
                    "userType": { "type": "string" },
                    "org": { "$ref": "#/$defs/Location" },
                    "dst": { "$ref": "#/$defs/Location" },
                    "service": { "type": "string" },
                    "dept": { "type": "number" },
                    "arrv": { "type": "number" }
                }
            }),
        )
    }

    pub fn reserve() -> Value {
        envelope(
            "RESERVE",
            json!({
                "type": "object",
                "required": ["userId", "demandId", "org", "dst", "dept"],
                "properties": {
                    "userId": { "type": "string" },
                    "demandId": { "type": "string" },
                    "org": { "$ref": "#/$defs/Location" },
                    "dst": { "$ref": "#/$defs/Location" },
                    "dept": { "type": "number" },
                    "arrv": { "type": "number" }
                }
            }),
        )
    }

    pub fn reserved() -> Value {
        envelope(
            "RESERVED",
            json!({
                "type": "object",
                "required": ["success", "userId", "demandId"],
                "properties": {
                    "success": { "type": "boolean" },
                    "userId": { "type": "string" },
                    "demandId": { "type": "string" },
                    "mobilityId": { "type": ["string", "null"] },
                    "route": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "required": ["org", "dst", "dept", "arrv"],
                            "properties": {
                                "org": { "$ref": "#/$defs/Location" },
                                "dst": { "$ref": "#/$defs/Location" },
                                "dept": { "type": "number" },
                                "arrv": { "type": "number" },
                                "service": { "type": "string" }
                            }
                        }
                    }
                }
            }),
        )
    }

    pub fn depart() -> Value {
        envelope(
            "DEPART",
            json!({
                "type": "object",
                "required": ["userId", "demandId"],
                "properties": {
                    "userId": { "type": "string" },
                    "demandId": { "type": "string" }
                }
            }),
        )
    }

    fn departed_arrived(event_type: &str) -> Value {
        envelope(
            event_type,
            json!({
                "type": "object",
                "required": ["location"],
                "properties": {
                    "userId": { "type": ["string", "null"] },
                    "demandId": { "type": ["string", "null"] },
                    "mobilityId": { "type": ["string", "null"] },
                    "location": { "$ref": "#/$defs/Location" }
                }
            }),
        )
    }

    pub fn departed() -> Value {
        departed_arrived("DEPARTED")
    }

    pub fn arrived() -> Value {
        departed_arrived("ARRIVED")
    }
}
