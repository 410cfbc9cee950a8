//! Module surface of the scheduled simulator: settings parsing, `/spec`
//! document and the [`SimulatorPort`] implementation.

use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::warn;

use sim_core::calendar::ServiceConfig;
use sim_core::event::{DepartDetails, Event, EventType, Location, ReserveDetails};
use sim_core::port::{ModuleError, SimulatorPort};
use sim_core::spec::{schemas, ModuleSpecification, SpecificationBuilder, VERSION_1};

use crate::simulation::{Simulation, SimulationConfig};
use crate::trip::{BlockTrip, SingleTrip, Stop, StopTime, Timetable, TripElement, TripLocation};

#[derive(Debug, Deserialize)]
pub struct StopSettings {
    pub stop_id: String,
    #[serde(default)]
    pub name: String,
    pub lat: f64,
    pub lng: f64,
}

/// One element of a trip's `stop_times` sequence, in wire minutes.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ElementSettings {
    Stop {
        stop_id: String,
        #[serde(default)]
        arrival: Option<f64>,
        #[serde(default)]
        departure: Option<f64>,
    },
    Location {
        location_id: String,
        start_window: f64,
        end_window: f64,
    },
}

#[derive(Debug, Deserialize)]
pub struct TripSettings {
    pub service: ServiceConfig,
    pub stop_times: Vec<ElementSettings>,
    #[serde(default)]
    pub block_id: String,
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub reference_date: NaiveDate,
    pub capacity: usize,
    pub stops: Vec<StopSettings>,
    /// Trips with an empty `block_id` each become one vehicle keyed by their
    /// trip id; trips sharing a `block_id` are chained into one vehicle per
    /// block.
    pub trips: BTreeMap<String, TripSettings>,
}

impl Settings {
    pub fn build(self) -> Result<SimulationConfig, ModuleError> {
        let stops: BTreeMap<String, Stop> = self
            .stops
            .into_iter()
            .map(|s| {
                (
                    s.stop_id.clone(),
                    Stop {
                        stop_id: s.stop_id,
                        name: s.name,
                        lat: s.lat,
                        lng: s.lng,
                    },
                )
            })
            .collect();

        let mut singles: Vec<(String, SingleTrip)> = Vec::new();
        for (trip_id, trip) in self.trips {
            let service = trip
                .service
                .build()
                .map_err(|e| ModuleError::InvalidSettings(e.to_string()))?;
            let mut elements = Vec::with_capacity(trip.stop_times.len());
            for element in trip.stop_times {
                match element {
                    ElementSettings::Stop {
                        stop_id,
                        arrival,
                        departure,
                    } => {
                        let stop = stops.get(&stop_id).cloned().ok_or_else(|| {
                            ModuleError::UnknownLocation(stop_id.clone())
                        })?;
                        let stop_time = StopTime::new(
                            stop,
                            arrival.map(sim_core::ms_from_minutes),
                            departure.map(sim_core::ms_from_minutes),
                        )
                        .ok_or_else(|| {
                            ModuleError::InvalidSettings(format!(
                                "stop time at {stop_id} needs a valid arrival or departure"
                            ))
                        })?;
                        elements.push(TripElement::Stop(stop_time));
                    }
                    ElementSettings::Location {
                        location_id,
                        start_window,
                        end_window,
                    } => {
                        elements.push(TripElement::Location(TripLocation {
                            location_id,
                            start_window_ms: sim_core::ms_from_minutes(start_window),
                            end_window_ms: sim_core::ms_from_minutes(end_window),
                        }));
                    }
                }
            }
            let single = SingleTrip {
                service,
                elements,
                block_id: trip.block_id,
            };
            if !single.valid() {
                return Err(ModuleError::InvalidSettings(format!(
                    "trip {trip_id} must start and end with scheduled stops (two or more)"
                )));
            }
            singles.push((trip_id, single));
        }

        let mut timetables: Vec<(String, Timetable)> = Vec::new();
        let mut blocks: BTreeMap<String, Vec<SingleTrip>> = BTreeMap::new();
        for (trip_id, single) in singles {
            if single.block_id.is_empty() {
                timetables.push((trip_id, Timetable::Single(single)));
            } else {
                blocks.entry(single.block_id.clone()).or_default().push(single);
            }
        }
        for (block_id, trips) in blocks {
            let block = BlockTrip::new(trips);
            if !block.valid() {
                return Err(ModuleError::InvalidSettings(format!(
                    "block {block_id} needs two or more trips sharing the block id"
                )));
            }
            timetables.push((block_id, Timetable::Block(block)));
        }

        Ok(SimulationConfig {
            start_date: self.reference_date,
            capacity: self.capacity,
            timetables,
        })
    }
}

/// Scheduled / route-deviation simulator module.
#[derive(Default)]
pub struct ScheduledModule {
    sim: Option<Simulation>,
}

impl ScheduledModule {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SimulatorPort for ScheduledModule {
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
        self.sim = Some(Simulation::new(settings.build()?));
        Ok(())
    }

    fn start(&mut self) -> Result<(), ModuleError> {
        self.sim
            .as_mut()
            .ok_or(ModuleError::NotConfigured)?
            .start();
        Ok(())
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
            EventType::Reserve => {
                let details: ReserveDetails = event
                    .details_as()
                    .map_err(|e| ModuleError::InvalidEvent(e.to_string()))?;
                sim.reserve_user(
                    &details.user_id,
                    &details.demand_id,
                    details.org,
                    details.dst,
                    details.dept,
                );
            }
            EventType::Depart => {
                let details: DepartDetails = event
                    .details_as()
                    .map_err(|e| ModuleError::InvalidEvent(e.to_string()))?;
                sim.dept_user(&details.user_id);
            }
            _ => {}
        }
        Ok(())
    }

    fn reservable(&mut self, org: &str, dst: &str) -> Result<bool, ModuleError> {
        let sim = self.sim.as_ref().ok_or(ModuleError::NotConfigured)?;
        let org = Location::new(org, 0.0, 0.0);
        let dst = Location::new(dst, 0.0, 0.0);
        Ok(sim.reservable(&org, &dst))
    }

    fn finish(&mut self) -> Result<(), ModuleError> {
        if self.sim.take().is_none() {
            warn!("finish called on an unconfigured scheduled module");
        }
        Ok(())
    }
}
