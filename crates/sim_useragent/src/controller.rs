//! Module surface of the user-agent: settings parsing, `/spec` document and
//! the [`SimulatorPort`] implementation.

use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use tracing::warn;

use sim_core::event::{DemandDetails, Event, EventType};
use sim_core::port::{ModuleError, SimulatorPort};
use sim_core::spec::{schemas, ModuleSpecification, SpecificationBuilder, VERSION_1};

use crate::manager::Simulation;
use crate::plan::{RouteFilter, SortType};
use crate::planner::{HttpPlannerClient, PlannerClient};

#[derive(Debug, Deserialize)]
pub struct PlannerSettings {
    pub endpoint: String,
}

#[derive(Debug, Deserialize)]
pub struct UserSettings {
    pub user_id: String,
    #[serde(default)]
    pub user_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UserTypeSettings {
    #[serde(default)]
    pub walking_time_limit_min: Option<f64>,
    #[serde(default)]
    pub favorite_service: Option<Vec<String>>,
    #[serde(default)]
    pub sort_type: Option<SortType>,
}

impl UserTypeSettings {
    fn filter(&self) -> RouteFilter {
        RouteFilter {
            favorite_service: self
                .favorite_service
                .as_ref()
                .map(|services| services.iter().cloned().collect::<HashSet<_>>()),
            walking_time_limit_min: self.walking_time_limit_min,
            sort_type: self.sort_type,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub reference_date: NaiveDate,
    #[serde(default)]
    pub planner: Option<PlannerSettings>,
    #[serde(default)]
    pub confirmed_services: Vec<String>,
    #[serde(default)]
    pub users: Vec<UserSettings>,
    #[serde(default)]
    pub user_types: HashMap<String, UserTypeSettings>,
}

/// User-agent module. A planner client can be injected for in-process
/// wiring; otherwise the settings must name an HTTP planner endpoint.
#[derive(Default)]
pub struct UserAgentModule {
    sim: Option<Simulation>,
    injected_planner: Option<Box<dyn PlannerClient>>,
}

impl UserAgentModule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_planner(planner: Box<dyn PlannerClient>) -> Self {
        Self {
            sim: None,
            injected_planner: Some(planner),
        }
    }
}

impl SimulatorPort for UserAgentModule {
    fn spec(&self) -> ModuleSpecification {
        SpecificationBuilder::new()
            .tx(EventType::Reserve, schemas::reserve())
            .tx(EventType::Depart, schemas::depart())
            .rx(EventType::Demand, schemas::demand())
            .rx(EventType::Reserved, schemas::reserved())
            .rx(EventType::Departed, schemas::departed())
            .rx(EventType::Arrived, schemas::arrived())
            .feature(EventType::Reserve, &["demand_id"], &[])
            .feature(EventType::Depart, &["demand_id"], &[])
            .feature(EventType::Reserved, &[], &["demand_id"])
            .feature(EventType::Departed, &[], &["demand_id"])
            .feature(EventType::Arrived, &[], &["demand_id"])
            .build(VERSION_1)
    }

    fn setup(&mut self, settings: serde_json::Value) -> Result<(), ModuleError> {
        let settings: Settings = serde_json::from_value(settings)?;

        let planner: Box<dyn PlannerClient> = match self.injected_planner.take() {
            Some(planner) => planner,
            None => {
                let endpoint = settings.planner.as_ref().ok_or_else(|| {
                    ModuleError::InvalidSettings("a planner endpoint is required".into())
                })?;
                Box::new(
                    HttpPlannerClient::new(&endpoint.endpoint)
                        .map_err(|e| ModuleError::InvalidSettings(e.to_string()))?,
                )
            }
        };

        let mut filters = HashMap::new();
        for user in &settings.users {
            let filter = match &user.user_type {
                Some(user_type) => match settings.user_types.get(user_type) {
                    Some(type_settings) => type_settings.filter(),
                    None => {
                        warn!(
                            user = %user.user_id,
                            user_type = %user_type,
                            "no parameters for this user type"
                        );
                        RouteFilter::default()
                    }
                },
                None => RouteFilter::default(),
            };
            filters.insert(user.user_id.clone(), filter);
        }

        self.sim = Some(Simulation::new(
            settings.reference_date,
            planner,
            settings.confirmed_services,
            filters,
        ));
        Ok(())
    }

    fn start(&mut self) -> Result<(), ModuleError> {
        self.sim
            .as_ref()
            .map(|_| ())
            .ok_or(ModuleError::NotConfigured)
    }

    fn peek(&self) -> Option<f64> {
        self.sim.as_ref().and_then(Simulation::peek)
    }

    fn step(&mut self) -> Result<(f64, Vec<Event>), ModuleError> {
        Ok(self
            .sim
            .as_mut()
            .ok_or(ModuleError::NotConfigured)?
            .step())
    }

    fn triggered(&mut self, event: &Event) -> Result<(), ModuleError> {
        let sim = self.sim.as_mut().ok_or(ModuleError::NotConfigured)?;
        if sim.now_minutes() < event.time {
            sim.advance_to(event.time);
        }

        match event.event_type {
            EventType::Demand => {
                let details: DemandDetails = event
                    .details_as()
                    .map_err(|e| ModuleError::InvalidEvent(e.to_string()))?;
                sim.demand(&details);
            }
            EventType::Reserved | EventType::Departed | EventType::Arrived => {
                sim.trigger(event);
            }
            _ => {}
        }
        Ok(())
    }

    fn reservable(&mut self, _org: &str, _dst: &str) -> Result<bool, ModuleError> {
        Ok(false)
    }

    fn finish(&mut self) -> Result<(), ModuleError> {
        self.sim = None;
        Ok(())
    }
}
