//! Walking simulator: every reservation succeeds, travel time is great-
//! circle distance over a configured speed.

use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::warn;

use sim_core::clock::{ms_from_minutes, SimulationClock};
use sim_core::event::{
    DepartDetails, DepartedArrivedDetails, Event, EventBus, EventType, Location,
    ReserveDetails, ReservedDetails, RouteLeg,
};
use sim_core::port::{ModuleError, SimulatorPort};
use sim_core::spatial::walking_duration_min;
use sim_core::spec::{schemas, ModuleSpecification, SpecificationBuilder, VERSION_1};

/// Default walking speed in metres per minute.
pub const DEFAULT_SPEED: f64 = 80.0;

type WalkClock = SimulationClock<WalkEvent>;

#[derive(Debug, Clone)]
enum WalkEvent {
    Confirm { user_id: String },
    Depart { user_id: String },
    Arrive { user_id: String },
}

#[derive(Debug, Clone)]
struct Reservation {
    user_id: String,
    demand_id: String,
    org: Location,
    dst: Location,
    dept: f64,
    arrv: f64,
}

pub struct WalkingSimulation {
    clock: WalkClock,
    bus: EventBus,
    velocity: f64,
    reservations: HashMap<String, Reservation>,
}

impl WalkingSimulation {
    pub fn new(start_date: NaiveDate, velocity: f64) -> Self {
        Self {
            clock: WalkClock::with_start_date(start_date),
            bus: EventBus::default(),
            velocity,
            reservations: HashMap::new(),
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
            WalkEvent::Confirm { user_id } => self.confirm(&user_id),
            WalkEvent::Depart { user_id } => self.departed(&user_id),
            WalkEvent::Arrive { user_id } => self.arrived(&user_id),
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

    /// A walk can always be reserved. The arrival defaults to departure plus
    /// walking time unless the caller already planned a later one.
    pub fn reserve(
        &mut self,
        user_id: &str,
        demand_id: &str,
        org: Location,
        dst: Location,
        dept: f64,
        arrv: Option<f64>,
    ) {
        if self.reservations.contains_key(user_id) {
            warn!(user = user_id, "walking reservation replaced an active one");
        }
        let duration = walking_duration_min(&org, &dst, self.velocity);
        let arrv = match arrv {
            Some(arrv) if arrv > dept => arrv,
            _ => dept + duration,
        };
        self.reservations.insert(
            user_id.to_owned(),
            Reservation {
                user_id: user_id.to_owned(),
                demand_id: demand_id.to_owned(),
                org,
                dst,
                dept,
                arrv,
            },
        );
        let now = self.clock.now();
        self.clock.schedule_at(
            now,
            WalkEvent::Confirm {
                user_id: user_id.to_owned(),
            },
        );
    }

    fn confirm(&mut self, user_id: &str) {
        let Some(reservation) = self.reservations.get(user_id) else {
            return;
        };
        let details = ReservedDetails {
            success: true,
            user_id: reservation.user_id.clone(),
            demand_id: reservation.demand_id.clone(),
            mobility_id: None,
            route: vec![RouteLeg {
                org: reservation.org.clone(),
                dst: reservation.dst.clone(),
                dept: reservation.dept,
                arrv: reservation.arrv,
                service: None,
            }],
        };
        self.bus.emit(Event::emitted(
            EventType::Reserved,
            self.clock.now_minutes(),
            &details,
        ));
    }

    pub fn depart(&mut self, user_id: &str) {
        let Some(reservation) = self.reservations.get(user_id) else {
            warn!(user = user_id, "departing user has no walking reservation");
            return;
        };
        let at = ms_from_minutes(reservation.dept).max(self.clock.now());
        self.clock.schedule_at(
            at,
            WalkEvent::Depart {
                user_id: user_id.to_owned(),
            },
        );
    }

    fn departed(&mut self, user_id: &str) {
        let Some(reservation) = self.reservations.get(user_id) else {
            return;
        };
        let details = DepartedArrivedDetails {
            user_id: Some(reservation.user_id.clone()),
            demand_id: Some(reservation.demand_id.clone()),
            mobility_id: None,
            location: reservation.org.clone(),
        };
        self.bus.emit(Event::emitted(
            EventType::Departed,
            self.clock.now_minutes(),
            &details,
        ));
        let at = ms_from_minutes(reservation.arrv).max(self.clock.now());
        self.clock.schedule_at(
            at,
            WalkEvent::Arrive {
                user_id: user_id.to_owned(),
            },
        );
    }

    fn arrived(&mut self, user_id: &str) {
        let Some(reservation) = self.reservations.remove(user_id) else {
            return;
        };
        let details = DepartedArrivedDetails {
            user_id: Some(reservation.user_id),
            demand_id: Some(reservation.demand_id),
            mobility_id: None,
            location: reservation.dst,
        };
        self.bus.emit(Event::emitted(
            EventType::Arrived,
            self.clock.now_minutes(),
            &details,
        ));
    }
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub reference_date: NaiveDate,
    #[serde(default = "default_speed")]
    pub walking_meters_per_minute: f64,
}

fn default_speed() -> f64 {
    DEFAULT_SPEED
}

#[derive(Default)]
pub struct WalkingModule {
    sim: Option<WalkingSimulation>,
}

impl WalkingModule {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SimulatorPort for WalkingModule {
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
        self.sim = Some(WalkingSimulation::new(
            settings.reference_date,
            settings.walking_meters_per_minute,
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
        self.sim.as_ref().and_then(WalkingSimulation::peek)
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
                    details.org,
                    details.dst,
                    details.dept,
                    details.arrv,
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

    fn reservable(&mut self, _org: &str, _dst: &str) -> Result<bool, ModuleError> {
        Ok(true)
    }

    fn finish(&mut self) -> Result<(), ModuleError> {
        self.sim = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 4, 1).unwrap()
    }

    #[test]
    fn reserve_then_depart_walks_the_leg() {
        let mut sim = WalkingSimulation::new(date(), DEFAULT_SPEED);
        let org = Location::new("o", 36.695557, 137.220786);
        let dst = Location::new("d", 36.696726, 137.227181);
        sim.reserve("User1", "Demand1", org.clone(), dst.clone(), 480.0, None);

        let (now, events) = sim.step();
        assert_eq!(now, 0.0);
        assert_eq!(events.len(), 1);
        let details: ReservedDetails = events[0].details_as().unwrap();
        assert!(details.success);
        let leg = &details.route[0];
        assert!(leg.arrv > leg.dept);

        sim.depart("User1");
        let (now, events) = sim.step();
        assert_eq!(now, 480.0);
        assert_eq!(events[0].event_type, EventType::Departed);

        let (now, events) = sim.step();
        // Scheduling rounds to whole simulation milliseconds.
        assert!((now - leg.arrv).abs() < 1e-4);
        assert_eq!(events[0].event_type, EventType::Arrived);
        assert!(sim.peek().is_none());
    }

    #[test]
    fn later_planned_arrival_is_kept() {
        let mut sim = WalkingSimulation::new(date(), DEFAULT_SPEED);
        let org = Location::new("o", 36.695557, 137.220786);
        let dst = Location::new("d", 36.696726, 137.227181);
        sim.reserve("User1", "Demand1", org, dst, 480.0, Some(540.0));
        let (_, events) = sim.step();
        let details: ReservedDetails = events[0].details_as().unwrap();
        assert_eq!(details.route[0].arrv, 540.0);
    }
}
