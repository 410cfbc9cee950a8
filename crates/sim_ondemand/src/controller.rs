//! Module surface of the on-demand simulator: settings parsing, the `/spec`
//! document and the [`SimulatorPort`] implementation the broker drives.

use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::warn;

use sim_core::calendar::ServiceConfig;
use sim_core::event::{DepartDetails, Event, EventType, ReserveDetails};
use sim_core::port::{ModuleError, SimulatorPort};
use sim_core::spec::{schemas, ModuleSpecification, SpecificationBuilder, VERSION_1};

use crate::model::{FlexTrip, Group, Stop};
use crate::network::Network;
use crate::simulation::{CarConfig, Simulation, SimulationConfig};

#[derive(Debug, Deserialize)]
pub struct StopSettings {
    pub stop_id: String,
    #[serde(default)]
    pub name: String,
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Deserialize)]
pub struct TripSettings {
    pub service: ServiceConfig,
    pub group_id: String,
    #[serde(default)]
    pub group_name: String,
    pub stop_ids: Vec<String>,
    /// Daily window as minute offsets from midnight; the end may exceed
    /// 24 h for after-midnight operation.
    pub start_window: f64,
    pub end_window: f64,
}

#[derive(Debug, Deserialize)]
pub struct MobilitySettings {
    pub mobility_id: String,
    pub capacity: usize,
    pub trip_id: String,
    pub stop: String,
}

#[derive(Debug, Deserialize)]
pub struct NetworkSettings {
    pub stops: Vec<String>,
    /// Distance matrix in metres, indexed like `stops`.
    pub matrix: Vec<Vec<f64>>,
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub reference_date: NaiveDate,
    pub stops: Vec<StopSettings>,
    pub network: NetworkSettings,
    /// Vehicle speed in metres per minute.
    pub mobility_speed: f64,
    #[serde(default)]
    pub board_time: f64,
    #[serde(default = "default_max_delay")]
    pub max_delay_time: f64,
    pub trips: HashMap<String, TripSettings>,
    pub mobilities: Vec<MobilitySettings>,
    #[serde(default = "default_max_calculation_seconds")]
    pub max_calculation_seconds: u64,
    #[serde(default = "default_max_calculation_stop_times_length")]
    pub max_calculation_stop_times_length: usize,
}

fn default_max_delay() -> f64 {
    30.0
}

fn default_max_calculation_seconds() -> u64 {
    30
}

fn default_max_calculation_stop_times_length() -> usize {
    10
}

impl Settings {
    pub fn build(self) -> Result<SimulationConfig, ModuleError> {
        for (a, row) in self.network.stops.iter().zip(&self.network.matrix) {
            for (b, distance) in self.network.stops.iter().zip(row) {
                if a != b && *distance < 0.0 {
                    return Err(ModuleError::InvalidSettings(format!(
                        "distance must not be negative: {distance} ({a} -> {b})"
                    )));
                }
            }
        }
        let network = Network::from_distance_matrix(
            &self.network.stops,
            &self.network.matrix,
            self.mobility_speed,
        );

        let mut trips = HashMap::new();
        for (trip_id, trip) in &self.trips {
            trips.insert(
                trip_id.clone(),
                FlexTrip {
                    service: trip
                        .service
                        .build()
                        .map_err(|e| ModuleError::InvalidSettings(e.to_string()))?,
                    group: Group {
                        group_id: trip.group_id.clone(),
                        name: trip.group_name.clone(),
                        stop_ids: trip.stop_ids.clone(),
                    },
                    start_window_ms: sim_core::ms_from_minutes(trip.start_window),
                    end_window_ms: sim_core::ms_from_minutes(trip.end_window),
                },
            );
        }

        Ok(SimulationConfig {
            start_date: self.reference_date,
            network,
            stops: self
                .stops
                .into_iter()
                .map(|s| Stop {
                    stop_id: s.stop_id,
                    name: s.name,
                    lat: s.lat,
                    lng: s.lng,
                })
                .collect(),
            board_time_min: self.board_time,
            max_delay_min: self.max_delay_time,
            trips,
            cars: self
                .mobilities
                .into_iter()
                .map(|m| CarConfig {
                    mobility_id: m.mobility_id,
                    capacity: m.capacity,
                    trip_id: m.trip_id,
                    home_stop: m.stop,
                })
                .collect(),
            max_calculation_seconds: self.max_calculation_seconds,
            max_calculation_stop_times_length: self.max_calculation_stop_times_length,
        })
    }
}

/// On-demand simulator module, driven through [`SimulatorPort`].
#[derive(Default)]
pub struct OnDemandModule {
    sim: Option<Simulation>,
}

impl OnDemandModule {
    pub fn new() -> Self {
        Self::default()
    }

    fn sim_mut(&mut self) -> Result<&mut Simulation, ModuleError> {
        self.sim.as_mut().ok_or(ModuleError::NotConfigured)
    }
}

impl SimulatorPort for OnDemandModule {
    fn spec(&self) -> ModuleSpecification {
        SpecificationBuilder::new()
            .tx(EventType::Reserved, schemas::reserved())
            .tx(EventType::Departed, schemas::departed())
            .tx(EventType::Arrived, schemas::arrived())
            .rx(EventType::Reserve, schemas::reserve())
            .rx(EventType::Depart, schemas::depart())
            .feature(EventType::Reserved, &["demand_id"], &[])
            .feature(EventType::Departed, &["demand_id"], &[])
            .feature(EventType::Arrived, &["demand_id"], &[])
            .feature(EventType::Reserve, &[], &["demand_id"])
            .feature(EventType::Depart, &[], &["demand_id"])
            .build(VERSION_1)
    }

    fn setup(&mut self, settings: serde_json::Value) -> Result<(), ModuleError> {
        let settings: Settings = serde_json::from_value(settings)?;
        let config = settings.build()?;
        let sim = Simulation::new(config)
            .map_err(|e| ModuleError::InvalidSettings(e.to_string()))?;
        self.sim = Some(sim);
        Ok(())
    }

    fn start(&mut self) -> Result<(), ModuleError> {
        self.sim_mut()?.start();
        Ok(())
    }

    fn peek(&self) -> Option<f64> {
        self.sim.as_ref().and_then(Simulation::peek)
    }

    fn step(&mut self) -> Result<(f64, Vec<Event>), ModuleError> {
        Ok(self.sim_mut()?.step())
    }

    fn triggered(&mut self, event: &Event) -> Result<(), ModuleError> {
        let sim = self.sim.as_mut().ok_or(ModuleError::NotConfigured)?;
        // Expect nothing to happen; just let time move forward. Callbacks
        // already pending at this very instant stay queued for the next
        // step, so deliveries interleave between them.
        if sim.now_minutes() < event.time {
            sim.advance_to(event.time);
        }

        match event.event_type {
            EventType::Reserve => {
                let details: ReserveDetails = event
                    .details_as()
                    .map_err(|e| ModuleError::InvalidEvent(e.to_string()))?;
                sim.reserve_user(
                    &details.user_id,
                    &details.demand_id,
                    &details.org.location_id,
                    &details.dst.location_id,
                    details.dept,
                );
            }
            EventType::Depart => {
                let details: DepartDetails = event
                    .details_as()
                    .map_err(|e| ModuleError::InvalidEvent(e.to_string()))?;
                sim.ready_to_depart(&details.user_id);
            }
            _ => {}
        }
        Ok(())
    }

    fn reservable(&mut self, org: &str, dst: &str) -> Result<bool, ModuleError> {
        let sim = self.sim.as_ref().ok_or(ModuleError::NotConfigured)?;
        Ok(sim.reservable(org, dst, None))
    }

    fn finish(&mut self) -> Result<(), ModuleError> {
        if self.sim.take().is_none() {
            warn!("finish called on an unconfigured on-demand module");
        }
        Ok(())
    }
}
