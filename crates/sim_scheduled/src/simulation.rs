//! Simulation facade for the scheduled / route-deviation simulator.

use bevy_ecs::prelude::{Schedule, World};
use bevy_ecs::schedule::IntoSystemConfigs;
use chrono::NaiveDate;
use tracing::warn;

use sim_core::clock::ms_from_minutes;
use sim_core::event::{Event, EventBus, Location};

use crate::mobility::{Car, CarRegistry, UserStatus};
use crate::systems::{
    arrive_stop_system, depart_stop_system, is_arrive_stop, is_depart_stop, is_reserve,
    is_start_day, reserve_system, start_day_system, CurrentEvent, ReserveRequest, StopIndex,
    TransitClock, TransitEvent,
};
use crate::trip::Timetable;

#[derive(Debug)]
pub struct SimulationConfig {
    pub start_date: NaiveDate,
    pub capacity: usize,
    /// `(mobility_id, timetable)` in deterministic order.
    pub timetables: Vec<(String, Timetable)>,
}

pub struct Simulation {
    world: World,
    schedule: Schedule,
}

impl Simulation {
    pub fn new(config: SimulationConfig) -> Self {
        let mut world = World::new();
        let clock = TransitClock::with_start_date(config.start_date);

        let mut index = StopIndex::default();
        for (_, timetable) in &config.timetables {
            for stop in timetable.stops() {
                index.stops.insert(stop.stop_id.clone(), stop.clone());
            }
            for location in timetable.locations() {
                index
                    .locations
                    .insert(location.location_id.clone(), location.clone());
            }
        }

        let mut registry = CarRegistry::default();
        for (mobility_id, timetable) in config.timetables {
            let car = Car::new(mobility_id.clone(), config.capacity, timetable);
            let entity = world.spawn(car).id();
            registry.insert(mobility_id, entity);
        }

        world.insert_resource(clock);
        world.insert_resource(EventBus::default());
        world.insert_resource(index);
        world.insert_resource(registry);

        let mut schedule = Schedule::default();
        schedule.add_systems((
            reserve_system.run_if(is_reserve),
            start_day_system.run_if(is_start_day),
            arrive_stop_system.run_if(is_arrive_stop),
            depart_stop_system.run_if(is_depart_stop),
        ));

        Self { world, schedule }
    }

    /// Launch every vehicle's timetable process.
    pub fn start(&mut self) {
        let entities: Vec<_> = self
            .world
            .resource::<CarRegistry>()
            .entities()
            .collect();
        let mut clock = self.world.resource_mut::<TransitClock>();
        let now = clock.now();
        for entity in entities {
            clock.schedule_at(now, TransitEvent::StartDay { car: entity });
        }
    }

    pub fn now_minutes(&self) -> f64 {
        self.world.resource::<TransitClock>().now_minutes()
    }

    pub fn peek(&self) -> Option<f64> {
        self.world.resource::<TransitClock>().peek_minutes()
    }

    fn process_next(&mut self) -> bool {
        let Some(event) = self.world.resource_mut::<TransitClock>().pop_next() else {
            return false;
        };
        self.world.insert_resource(CurrentEvent(event.kind));
        self.schedule.run(&mut self.world);
        true
    }

    pub fn step(&mut self) -> (f64, Vec<Event>) {
        self.process_next();
        let now = self.now_minutes();
        let events = self.world.resource_mut::<EventBus>().drain();
        (now, events)
    }

    pub fn advance_to(&mut self, until: f64) {
        let target = ms_from_minutes(until);
        while self
            .world
            .resource::<TransitClock>()
            .peek()
            .is_some_and(|next| next <= target)
        {
            self.process_next();
        }
        self.world
            .resource_mut::<TransitClock>()
            .advance_to(target);
    }

    pub fn reserve_user(
        &mut self,
        user_id: &str,
        demand_id: &str,
        org: Location,
        dst: Location,
        dept_min: f64,
    ) {
        let request = ReserveRequest {
            user_id: user_id.to_owned(),
            demand_id: demand_id.to_owned(),
            org,
            dst,
            dept_min,
        };
        let mut clock = self.world.resource_mut::<TransitClock>();
        let now = clock.now();
        clock.schedule_at(now, TransitEvent::Reserve(request));
    }

    /// The user is at their pickup point, ready to board on arrival.
    pub fn dept_user(&mut self, user_id: &str) {
        let entities: Vec<_> = self
            .world
            .resource::<CarRegistry>()
            .entities()
            .collect();
        for entity in entities {
            if let Some(mut car) = self.world.get_mut::<Car>(entity) {
                if let Some(user) = car
                    .users
                    .iter_mut()
                    .find(|user| user.user_id == user_id)
                {
                    if user.status == UserStatus::Reserved {
                        user.status = UserStatus::Waiting;
                    } else {
                        warn!(user = user_id, "user is not in the reserved state");
                    }
                    return;
                }
            }
        }
        warn!(user = user_id, "departure notified for an unknown user");
    }

    /// Whether a seat could currently be reserved org → dst.
    pub fn reservable(&self, org: &Location, dst: &Location) -> bool {
        let clock = self.world.resource::<TransitClock>();
        let index = self.world.resource::<StopIndex>();
        let registry = self.world.resource::<CarRegistry>();
        let (Some(org), Some(dst)) = (index.to_stop_like(org), index.to_stop_like(dst)) else {
            return false;
        };
        let now_ms = clock.now() as i64;
        let reference = clock.start();

        let mut best: Option<(bevy_ecs::prelude::Entity, crate::trip::Path)> = None;
        for entity in registry.entities() {
            let Some(car) = self.world.get::<Car>(entity) else {
                continue;
            };
            if let Some(path) = car.earliest_path(&org, &dst, now_ms, reference) {
                let is_better = best
                    .as_ref()
                    .map(|(_, b)| path.arrival_ms() < b.arrival_ms())
                    .unwrap_or(true);
                if is_better {
                    best = Some((entity, path));
                }
            }
        }
        match best {
            Some((entity, path)) => self
                .world
                .get::<Car>(entity)
                .map(|car| car.is_reservable(&path))
                .unwrap_or(false),
            None => false,
        }
    }

    /// Invariant probe for tests: concurrent riders never exceed capacity.
    pub fn capacity_respected(&self) -> bool {
        self.world
            .resource::<CarRegistry>()
            .entities()
            .all(|entity| {
                self.world
                    .get::<Car>(entity)
                    .map(|car| car.riding_count() <= car.capacity)
                    .unwrap_or(true)
            })
    }
}
