//! Simulation facade: owns the ECS world, advances the clock and exposes the
//! reservation entry points.

use bevy_ecs::prelude::{Schedule, World};
use bevy_ecs::schedule::IntoSystemConfigs;
use chrono::NaiveDate;
use std::collections::HashMap;
use tracing::warn;

use sim_core::clock::ms_from_minutes;
use sim_core::event::{Event, EventBus};

use crate::mobility::{Car, CarRegistry};
use crate::model::{FlexTrip, OnDemandConfig, Rider, RiderLedger, Stop, StopRegistry};
use crate::network::Network;
use crate::reservation::{better, car_window, solve_for_car};
use crate::systems::{
    alight_done_system, arrive_system, board_round_system, is_alight_done, is_arrive,
    is_board_round, is_reserve, is_return_home, is_start_service, is_wait_expired,
    reservation_system, return_home_system, start_service_system, wait_expired_system,
    CurrentEvent, OnDemandClock, OnDemandEvent, ReserveRequest,
};

#[derive(Debug, Clone)]
pub struct CarConfig {
    pub mobility_id: String,
    pub capacity: usize,
    pub trip_id: String,
    pub home_stop: String,
}

#[derive(Debug)]
pub struct SimulationConfig {
    pub start_date: NaiveDate,
    pub network: Network,
    pub stops: Vec<Stop>,
    pub board_time_min: f64,
    pub max_delay_min: f64,
    pub trips: HashMap<String, FlexTrip>,
    pub cars: Vec<CarConfig>,
    pub max_calculation_seconds: u64,
    pub max_calculation_stop_times_length: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("mobility {mobility_id} references unknown trip {trip_id}")]
    UnknownTrip { mobility_id: String, trip_id: String },
    #[error("mobility {mobility_id} references unknown stop {stop_id}")]
    UnknownStop { mobility_id: String, stop_id: String },
}

pub struct Simulation {
    world: World,
    schedule: Schedule,
}

impl Simulation {
    pub fn new(config: SimulationConfig) -> Result<Self, SetupError> {
        let mut world = World::new();

        let mut stop_registry = StopRegistry::default();
        for stop in &config.stops {
            stop_registry.insert(stop.clone());
        }

        let mut clock = OnDemandClock::with_start_date(config.start_date);
        let sim_config = OnDemandConfig {
            board_time_ms: ms_from_minutes(config.board_time_min),
            max_delay_ms: ms_from_minutes(config.max_delay_min),
            max_route_nodes: config.max_calculation_stop_times_length,
            max_expansions: config.max_calculation_seconds.saturating_mul(10_000),
        };

        let mut registry = CarRegistry::default();
        let mut pending_cars = Vec::new();
        for car_config in &config.cars {
            let trip = config.trips.get(&car_config.trip_id).ok_or_else(|| {
                SetupError::UnknownTrip {
                    mobility_id: car_config.mobility_id.clone(),
                    trip_id: car_config.trip_id.clone(),
                }
            })?;
            if stop_registry.get(&car_config.home_stop).is_none() {
                return Err(SetupError::UnknownStop {
                    mobility_id: car_config.mobility_id.clone(),
                    stop_id: car_config.home_stop.clone(),
                });
            }
            pending_cars.push(Car::new(
                car_config.mobility_id.clone(),
                car_config.capacity,
                trip.clone(),
                car_config.home_stop.clone(),
            ));
        }

        for car in pending_cars {
            // Arm the daily return-to-home check at the end of the current
            // operating window; without any service, check once immediately.
            let window_end = car_window(&car, &clock).map(|(_, end)| end);
            let entity = world.spawn(()).id();
            match window_end {
                Some(end) => clock.schedule_at(
                    end,
                    OnDemandEvent::ReturnHome {
                        car: entity,
                        window_end_ms: Some(end),
                    },
                ),
                None => clock.schedule_at(
                    clock.now(),
                    OnDemandEvent::ReturnHome {
                        car: entity,
                        window_end_ms: None,
                    },
                ),
            }
            registry.insert(car.mobility_id.clone(), entity);
            world.entity_mut(entity).insert(car);
        }

        world.insert_resource(clock);
        world.insert_resource(EventBus::default());
        world.insert_resource(RiderLedger::default());
        world.insert_resource(config.network);
        world.insert_resource(stop_registry);
        world.insert_resource(sim_config);
        world.insert_resource(registry);

        let mut schedule = Schedule::default();
        schedule.add_systems((
            reservation_system.run_if(is_reserve),
            start_service_system.run_if(is_start_service),
            wait_expired_system.run_if(is_wait_expired),
            board_round_system.run_if(is_board_round),
            arrive_system.run_if(is_arrive),
            alight_done_system.run_if(is_alight_done),
            return_home_system.run_if(is_return_home),
        ));

        Ok(Self { world, schedule })
    }

    pub fn start(&mut self) {}

    pub fn now_minutes(&self) -> f64 {
        self.world.resource::<OnDemandClock>().now_minutes()
    }

    pub fn peek(&self) -> Option<f64> {
        self.world.resource::<OnDemandClock>().peek_minutes()
    }

    /// Pop and run the next scheduled callback. Callbacks scheduled for the
    /// same instant run on subsequent steps, so externally delivered events
    /// can interleave between them (the broker keeps stepping the earliest
    /// module until its instant quiesces).
    fn process_next(&mut self) -> bool {
        let Some(event) = self.world.resource_mut::<OnDemandClock>().pop_next() else {
            return false;
        };
        self.world.insert_resource(CurrentEvent(event.kind));
        self.schedule.run(&mut self.world);
        true
    }

    /// Advance to the next callback; returns `(now, observable events)`.
    pub fn step(&mut self) -> (f64, Vec<Event>) {
        self.process_next();
        let now = self.now_minutes();
        let events = self.world.resource_mut::<EventBus>().drain();
        (now, events)
    }

    /// Run every callback due up to `until` (wire minutes), then move the
    /// clock there. Emitted events stay queued for the next `step`.
    pub fn advance_to(&mut self, until: f64) {
        let target = ms_from_minutes(until);
        while self
            .world
            .resource::<OnDemandClock>()
            .peek()
            .is_some_and(|next| next <= target)
        {
            self.process_next();
        }
        self.world
            .resource_mut::<OnDemandClock>()
            .advance_to(target);
    }

    /// Queue a reservation request; the answer is emitted as a RESERVED
    /// event on a following step.
    pub fn reserve_user(
        &mut self,
        user_id: &str,
        demand_id: &str,
        org: &str,
        dst: &str,
        dept_min: f64,
    ) {
        let request = ReserveRequest {
            user_id: user_id.to_owned(),
            demand_id: demand_id.to_owned(),
            org: org.to_owned(),
            dst: dst.to_owned(),
            dept_min,
        };
        let mut clock = self.world.resource_mut::<OnDemandClock>();
        let now = clock.now();
        clock.schedule_at(now, OnDemandEvent::Reserve(request));
    }

    /// The user announced readiness at their pickup stop.
    pub fn ready_to_depart(&mut self, user_id: &str) {
        let entities: Vec<_> = self
            .world
            .resource::<CarRegistry>()
            .entities()
            .collect();
        for entity in entities {
            if let Some(mut car) = self.world.get_mut::<Car>(entity) {
                if car.mark_ready(user_id) {
                    return;
                }
            }
        }
        warn!(
            user = user_id,
            "ready to depart, but no reservation was found; it may have \
             failed or the user may have already departed"
        );
    }

    /// Probe whether any vehicle could serve org → dst around `dept` (now
    /// when absent) without mutating anything.
    pub fn reservable(&self, org: &str, dst: &str, dept_min: Option<f64>) -> bool {
        let clock = self.world.resource::<OnDemandClock>();
        let network = self.world.resource::<Network>();
        let stops = self.world.resource::<StopRegistry>();
        let config = self.world.resource::<OnDemandConfig>();
        let riders = self.world.resource::<RiderLedger>();
        let registry = self.world.resource::<CarRegistry>();

        let (Some(org), Some(dst)) = (stops.get(org), stops.get(dst)) else {
            return false;
        };
        let Some(direct_ms) = network.duration_ms(&org.stop_id, &dst.stop_id) else {
            return false;
        };
        let probe = Rider {
            user_id: String::new(),
            demand_id: String::new(),
            org: org.stop_id.clone(),
            dst: dst.stop_id.clone(),
            desired_dept_ms: dept_min.map(ms_from_minutes).unwrap_or_else(|| clock.now()),
            ideal_duration_ms: direct_ms + 2 * config.board_time_ms,
        };

        let mut best = None;
        for entity in registry.entities() {
            let Some(car) = self.world.get::<Car>(entity) else {
                continue;
            };
            if let Some(evaluated) = solve_for_car(car, &probe, clock, network, riders, config) {
                best = better(best, (entity, evaluated));
            }
        }
        best.is_some()
    }

    /// Capacity invariant probe for tests: `|passengers| <= capacity` on
    /// every vehicle.
    pub fn capacity_respected(&self) -> bool {
        self.world
            .resource::<CarRegistry>()
            .entities()
            .all(|entity| {
                self.world
                    .get::<Car>(entity)
                    .map(|car| car.passengers.len() <= car.capacity)
                    .unwrap_or(true)
            })
    }
}
