//! Station-based shared-vehicle simulator: reserving takes a vehicle at the
//! origin station and a dock at the destination station.

use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

use sim_core::clock::{ms_from_minutes, SimulationClock};
use sim_core::event::{
    DepartDetails, DepartedArrivedDetails, Event, EventBus, EventType, Location,
    ReserveDetails, ReservedDetails, RouteLeg,
};
use sim_core::port::{ModuleError, SimulatorPort};
use sim_core::spatial::distance_m_between;
use sim_core::spec::{schemas, ModuleSpecification, SpecificationBuilder, VERSION_1};

type SharingClock = SimulationClock<SharingEvent>;

#[derive(Debug, Clone)]
enum SharingEvent {
    Confirm { user_id: String },
    Depart { user_id: String },
    Arrive { user_id: String },
}

#[derive(Debug, Clone)]
pub struct Station {
    pub station_id: String,
    pub lat: f64,
    pub lng: f64,
    pub capacity: usize,
    pub vehicles: Vec<String>,
    /// Docks promised to inbound reservations.
    pub reserved_docks: usize,
}

impl Station {
    pub fn location(&self) -> Location {
        Location::new(self.station_id.clone(), self.lat, self.lng)
    }

    pub fn any_vehicle(&self) -> bool {
        !self.vehicles.is_empty()
    }

    pub fn any_dock(&self) -> bool {
        self.vehicles.len() + self.reserved_docks < self.capacity
    }
}

#[derive(Debug, Clone)]
struct Reservation {
    user_id: String,
    demand_id: String,
    vehicle_id: String,
    org: String,
    dst: String,
    dept: f64,
    arrv: f64,
}

pub struct SharingSimulation {
    clock: SharingClock,
    bus: EventBus,
    speed: f64,
    stations: BTreeMap<String, Station>,
    reservations: HashMap<String, Reservation>,
    pending: Vec<(String, String, String, String, f64)>,
}

impl SharingSimulation {
    pub fn new(start_date: NaiveDate, speed: f64, stations: Vec<Station>) -> Self {
        Self {
            clock: SharingClock::with_start_date(start_date),
            bus: EventBus::default(),
            speed,
            stations: stations
                .into_iter()
                .map(|station| (station.station_id.clone(), station))
                .collect(),
            reservations: HashMap::new(),
            pending: Vec::new(),
        }
    }

    pub fn peek(&self) -> Option<f64> {
        self.clock.peek_minutes()
    }

    pub fn now_minutes(&self) -> f64 {
        self.clock.now_minutes()
    }

    fn process_next(&mut self) -> bool {
        let Some(event) = self.clock.pop_next() else { return false };
        match event.kind {
            SharingEvent::Confirm { user_id } => self.confirm(&user_id),
            SharingEvent::Depart { user_id } => self.departed(&user_id),
            SharingEvent::Arrive { user_id } => self.arrived(&user_id),
        }
        true
    }

    pub fn step(&mut self) -> (f64, Vec<Event>) {
        self.process_next();
        (self.clock.now_minutes(), self.bus.drain())
    }

    pub fn advance_to(&mut self, until: f64) {
        let target = ms_from_minutes(until);
        while self.clock.peek().is_some_and(|next| next <= target) {
            self.process_next();
        }
        self.clock.advance_to(target);
    }

    pub fn reservable(&self, org: &str, dst: &str) -> bool {
        match (self.stations.get(org), self.stations.get(dst)) {
            (Some(org), Some(dst)) => org.any_vehicle() && dst.any_dock(),
            _ => false,
        }
    }

    pub fn reserve(&mut self, user_id: &str, demand_id: &str, org: &str, dst: &str, dept: f64) {
        self.pending.push((
            user_id.to_owned(),
            demand_id.to_owned(),
            org.to_owned(),
            dst.to_owned(),
            dept,
        ));
        let now = self.clock.now();
        self.clock.schedule_at(
            now,
            SharingEvent::Confirm {
                user_id: user_id.to_owned(),
            },
        );
    }

    fn confirm(&mut self, user_id: &str) {
        let Some(index) = self.pending.iter().position(|(user, ..)| user == user_id) else {
            return;
        };
        let (user_id, demand_id, org_id, dst_id, dept) = self.pending.remove(index);
        let now_min = self.clock.now_minutes();

        if self.reservations.contains_key(&user_id) || !self.reservable(&org_id, &dst_id) {
            let details = ReservedDetails {
                success: false,
                user_id,
                demand_id,
                mobility_id: None,
                route: Vec::new(),
            };
            self.bus
                .emit(Event::emitted(EventType::Reserved, now_min, &details));
            return;
        }

        let (org_location, dst_location, distance) = {
            let org = &self.stations[&org_id];
            let dst = &self.stations[&dst_id];
            (
                org.location(),
                dst.location(),
                distance_m_between(&org.location(), &dst.location()),
            )
        };
        let vehicle_id = self
            .stations
            .get_mut(&org_id)
            .and_then(|station| station.vehicles.pop());
        let Some(vehicle_id) = vehicle_id else { return };
        if let Some(dst) = self.stations.get_mut(&dst_id) {
            dst.reserved_docks += 1;
        }

        let arrv = dept + distance / self.speed;
        let details = ReservedDetails {
            success: true,
            user_id: user_id.clone(),
            demand_id: demand_id.clone(),
            mobility_id: Some(vehicle_id.clone()),
            route: vec![RouteLeg {
                org: org_location,
                dst: dst_location,
                dept,
                arrv,
                service: None,
            }],
        };
        self.bus
            .emit(Event::emitted(EventType::Reserved, now_min, &details));
        self.reservations.insert(
            user_id.clone(),
            Reservation {
                user_id,
                demand_id,
                vehicle_id,
                org: org_id,
                dst: dst_id,
                dept,
                arrv,
            },
        );
    }

    pub fn depart(&mut self, user_id: &str) {
        let Some(reservation) = self.reservations.get(user_id) else {
            warn!(user = user_id, "departing user has no shared-vehicle reservation");
            return;
        };
        let at = ms_from_minutes(reservation.dept).max(self.clock.now());
        self.clock.schedule_at(
            at,
            SharingEvent::Depart {
                user_id: user_id.to_owned(),
            },
        );
    }

    fn departed(&mut self, user_id: &str) {
        let Some(reservation) = self.reservations.get(user_id) else { return };
        let location = self
            .stations
            .get(&reservation.org)
            .map(Station::location)
            .unwrap_or_else(|| Location::new(reservation.org.clone(), 0.0, 0.0));
        let details = DepartedArrivedDetails {
            user_id: Some(reservation.user_id.clone()),
            demand_id: Some(reservation.demand_id.clone()),
            mobility_id: Some(reservation.vehicle_id.clone()),
            location,
        };
        self.bus.emit(Event::emitted(
            EventType::Departed,
            self.clock.now_minutes(),
            &details,
        ));
        let at = ms_from_minutes(reservation.arrv).max(self.clock.now());
        self.clock.schedule_at(
            at,
            SharingEvent::Arrive {
                user_id: user_id.to_owned(),
            },
        );
    }

    fn arrived(&mut self, user_id: &str) {
        let Some(reservation) = self.reservations.remove(user_id) else { return };
        let location = self
            .stations
            .get(&reservation.dst)
            .map(Station::location)
            .unwrap_or_else(|| Location::new(reservation.dst.clone(), 0.0, 0.0));
        let details = DepartedArrivedDetails {
            user_id: Some(reservation.user_id.clone()),
            demand_id: Some(reservation.demand_id.clone()),
            mobility_id: Some(reservation.vehicle_id.clone()),
            location,
        };
        self.bus.emit(Event::emitted(
            EventType::Arrived,
            self.clock.now_minutes(),
            &details,
        ));
        if let Some(dst) = self.stations.get_mut(&reservation.dst) {
            dst.reserved_docks = dst.reserved_docks.saturating_sub(1);
            dst.vehicles.push(reservation.vehicle_id);
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StationSettings {
    pub station_id: String,
    pub lat: f64,
    pub lng: f64,
    pub capacity: usize,
    #[serde(default)]
    pub vehicles: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub reference_date: NaiveDate,
    /// Riding speed in metres per minute.
    pub mobility_speed: f64,
    pub stations: Vec<StationSettings>,
}

#[derive(Default)]
pub struct SharingModule {
    sim: Option<SharingSimulation>,
}

impl SharingModule {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SimulatorPort for SharingModule {
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
        let stations = settings
            .stations
            .into_iter()
            .map(|s| Station {
                station_id: s.station_id,
                lat: s.lat,
                lng: s.lng,
                capacity: s.capacity,
                vehicles: s.vehicles,
                reserved_docks: 0,
            })
            .collect();
        self.sim = Some(SharingSimulation::new(
            settings.reference_date,
            settings.mobility_speed,
            stations,
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
        self.sim.as_ref().and_then(SharingSimulation::peek)
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
                sim.reserve(
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
                sim.depart(&details.user_id);
            }
            _ => {}
        }
        Ok(())
    }

    fn reservable(&mut self, org: &str, dst: &str) -> Result<bool, ModuleError> {
        Ok(self
            .sim
            .as_ref()
            .ok_or(ModuleError::NotConfigured)?
            .reservable(org, dst))
    }

    fn finish(&mut self) -> Result<(), ModuleError> {
        self.sim = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn station(id: &str, lat: f64, lng: f64, capacity: usize, vehicles: &[&str]) -> Station {
        Station {
            station_id: id.into(),
            lat,
            lng,
            capacity,
            vehicles: vehicles.iter().map(|v| v.to_string()).collect(),
            reserved_docks: 0,
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 4, 1).unwrap()
    }

    #[test]
    fn reservation_takes_a_vehicle_and_a_dock() {
        let mut sim = SharingSimulation::new(
            date(),
            200.0,
            vec![
                station("a", 36.695, 137.220, 2, &["bike1"]),
                station("b", 36.696, 137.227, 1, &[]),
            ],
        );
        assert!(sim.reservable("a", "b"));

        sim.reserve("User1", "D1", "a", "b", 480.0);
        let (_, events) = sim.step();
        let details: ReservedDetails = events[0].details_as().unwrap();
        assert!(details.success);
        assert_eq!(details.mobility_id.as_deref(), Some("bike1"));

        // Vehicle and dock are committed now.
        assert!(!sim.reservable("a", "b"));

        sim.depart("User1");
        let (_, events) = sim.step();
        assert_eq!(events[0].event_type, EventType::Departed);
        let (_, events) = sim.step();
        assert_eq!(events[0].event_type, EventType::Arrived);
        // The vehicle is docked at the destination afterwards.
        assert!(sim.reservable("b", "a"));
    }

    #[test]
    fn exhausted_station_rejects_the_reservation() {
        let mut sim = SharingSimulation::new(
            date(),
            200.0,
            vec![
                station("a", 36.695, 137.220, 2, &[]),
                station("b", 36.696, 137.227, 1, &[]),
            ],
        );
        sim.reserve("User1", "D1", "a", "b", 480.0);
        let (_, events) = sim.step();
        let details: ReservedDetails = events[0].details_as().unwrap();
        assert!(!details.success);
    }
}
