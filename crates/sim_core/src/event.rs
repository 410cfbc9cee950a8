//! Wire event model: the envelope exchanged between modules and the broker.
//!
//! Every observable event carries `{eventType, source, time, service?,
//! details}`. `source` is stamped by the broker with the producing module's
//! name; `service` targets a single module when set. `time` is in wire
//! minutes. Details are kept as raw JSON in the envelope (extra fields are
//! permitted everywhere) with typed views for each event type.

use bevy_ecs::system::Resource;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    Demand,
    Reserve,
    Reserved,
    Depart,
    Departed,
    Arrived,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Demand => "DEMAND",
            EventType::Reserve => "RESERVE",
            EventType::Reserved => "RESERVED",
            EventType::Depart => "DEPART",
            EventType::Departed => "DEPARTED",
            EventType::Arrived => "ARRIVED",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event envelope. `details` stays schemaless here; producers build it from
/// the typed detail structs below, consumers parse it back with
/// [`Event::details_as`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "eventType")]
    pub event_type: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    pub details: Value,
}

impl Event {
    /// Build an event emitted by a module during a step.
    pub fn emitted<T: Serialize>(event_type: EventType, time: f64, details: &T) -> Self {
        Self {
            event_type,
            source: None,
            time,
            service: None,
            details: serde_json::to_value(details).unwrap_or(Value::Null),
        }
    }

    /// Build a service-targeted event (RESERVE / DEPART).
    pub fn targeted<T: Serialize>(
        event_type: EventType,
        time: f64,
        service: &str,
        details: &T,
    ) -> Self {
        let mut event = Self::emitted(event_type, time, details);
        event.service = Some(service.to_owned());
        event
    }

    /// Typed view on the details payload.
    pub fn details_as<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.details.clone())
    }
}

/// Location payload: identity is the id, coordinates are advisory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub location_id: String,
    pub lat: f64,
    pub lng: f64,
}

impl Location {
    pub fn new(location_id: impl Into<String>, lat: f64, lng: f64) -> Self {
        Self {
            location_id: location_id.into(),
            lat,
            lng,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DemandDetails {
    pub user_id: String,
    pub demand_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_type: Option<String>,
    pub org: Location,
    pub dst: Location,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    /// Immediate departure when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dept: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arrv: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveDetails {
    pub user_id: String,
    pub demand_id: String,
    pub org: Location,
    pub dst: Location,
    pub dept: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arrv: Option<f64>,
}

/// One leg of a reserved or planned route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteLeg {
    pub org: Location,
    pub dst: Location,
    pub dept: f64,
    pub arrv: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservedDetails {
    pub success: bool,
    pub user_id: String,
    pub demand_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mobility_id: Option<String>,
    #[serde(default)]
    pub route: Vec<RouteLeg>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepartDetails {
    pub user_id: String,
    pub demand_id: String,
}

/// Shared payload of DEPARTED and ARRIVED. `user_id` and `demand_id` are
/// absent together for vehicle-level events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepartedArrivedDetails {
    pub user_id: Option<String>,
    pub demand_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mobility_id: Option<String>,
    pub location: Location,
}

impl DepartedArrivedDetails {
    /// `userId` and `demandId` must be present or absent together.
    pub fn check_identity(&self) -> Result<(), String> {
        match (&self.user_id, &self.demand_id) {
            (Some(user_id), None) => Err(format!("missing demandId with userId(={user_id})")),
            (None, Some(demand_id)) => {
                Err(format!("missing userId with demandId(={demand_id})"))
            }
            _ => Ok(()),
        }
    }
}

/// Ordered list of observable events produced during a step; drained each
/// step by the module's `step` entry point.
#[derive(Debug, Default, Resource)]
pub struct EventBus {
    events: Vec<Event>,
}

impl EventBus {
    pub fn emit(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn drain(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trips_with_camel_case_fields() {
        let details = ReservedDetails {
            success: true,
            user_id: "User1".into(),
            demand_id: "DemandA".into(),
            mobility_id: Some("trip".into()),
            route: vec![RouteLeg {
                org: Location::new("Stop1", 36.69, 137.22),
                dst: Location::new("Stop2", 36.70, 137.23),
                dept: 490.0,
                arrv: 520.0,
                service: None,
            }],
        };
        let event = Event::emitted(EventType::Reserved, 480.0, &details);
        let raw = serde_json::to_value(&event).expect("serialize");
        assert_eq!(raw["eventType"], "RESERVED");
        assert_eq!(raw["details"]["userId"], "User1");
        assert_eq!(raw["details"]["route"][0]["org"]["locationId"], "Stop1");
        assert!(raw.get("source").is_none());

        let parsed: Event = serde_json::from_value(raw).expect("deserialize");
        assert_eq!(parsed.details_as::<ReservedDetails>().expect("details"), details);
    }

    #[test]
    fn departed_identity_must_be_paired() {
        let mut details = DepartedArrivedDetails {
            user_id: Some("User1".into()),
            demand_id: Some("DemandA".into()),
            mobility_id: None,
            location: Location::new("Stop1", 0.0, 0.0),
        };
        assert!(details.check_identity().is_ok());

        details.demand_id = None;
        assert!(details.check_identity().is_err());

        details.user_id = None;
        assert!(details.check_identity().is_ok());
    }

    #[test]
    fn bus_drain_preserves_emission_order_and_empties() {
        let mut bus = EventBus::default();
        for i in 0..3 {
            bus.emit(Event::emitted(
                EventType::Departed,
                i as f64,
                &serde_json::json!({ "i": i }),
            ));
        }
        let drained = bus.drain();
        assert_eq!(drained.len(), 3);
        assert!(bus.is_empty());
        assert_eq!(drained[0].time, 0.0);
        assert_eq!(drained[2].time, 2.0);
    }
}
