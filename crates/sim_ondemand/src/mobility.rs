//! Vehicle state: the on-demand `Car` component and its mutable schedule.

use bevy_ecs::prelude::{Component, Entity};
use bevy_ecs::system::Resource;
use std::collections::VecDeque;

use crate::model::FlexTrip;

/// One planned stop of a vehicle schedule: who boards and who alights, with
/// the times produced by route evaluation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlannedStop {
    pub stop: String,
    pub arrival_ms: Option<u64>,
    pub departure_ms: Option<u64>,
    /// User ids boarding here, in plan order.
    pub board: Vec<String>,
    /// User ids alighting here, in plan order.
    pub alight: Vec<String>,
}

impl PlannedStop {
    pub fn merge(&mut self, other: PlannedStop) {
        debug_assert_eq!(self.stop, other.stop);
        for user in other.board {
            if !self.board.contains(&user) {
                self.board.push(user);
            }
        }
        for user in other.alight {
            if !self.alight.contains(&user) {
                self.alight.push(user);
            }
        }
    }
}

/// Coalesce consecutive plan entries at the same stop.
pub fn normalize_route(stop_times: Vec<PlannedStop>) -> Vec<PlannedStop> {
    let mut route: Vec<PlannedStop> = Vec::with_capacity(stop_times.len());
    for entry in stop_times {
        match route.last_mut() {
            Some(last) if last.stop == entry.stop => last.merge(entry),
            _ => route.push(entry),
        }
    }
    route
}

/// A vehicle's working schedule: the entry being serviced (the stop the car
/// is at or moving toward) plus the remaining entries.
#[derive(Debug, Clone, Default)]
pub struct Schedule {
    pub current: Option<PlannedStop>,
    pub future: VecDeque<PlannedStop>,
}

impl Schedule {
    /// Replace the planned stops. When idle, or when the new plan starts at
    /// the stop already being serviced, the first entry becomes current;
    /// otherwise the in-flight entry is kept as a bare waypoint (its
    /// boardings/alightings are superseded by the new plan).
    pub fn update(&mut self, stop_times: Vec<PlannedStop>) {
        let replace_current = match &self.current {
            None => true,
            Some(current) => stop_times
                .first()
                .is_some_and(|first| first.stop == current.stop),
        };
        self.future = stop_times.into();
        if replace_current {
            self.pop();
        } else if let Some(current) = &mut self.current {
            current.board.clear();
            current.alight.clear();
        }
    }

    /// Advance to the next entry, returning the new current one.
    pub fn pop(&mut self) -> Option<&PlannedStop> {
        self.current = self.future.pop_front();
        self.current.as_ref()
    }

    pub fn has_future(&self) -> bool {
        !self.future.is_empty()
    }
}

/// On-demand bus: transports multiple users between stops of its group,
/// replanning on every accepted reservation.
#[derive(Debug, Component)]
pub struct Car {
    pub mobility_id: String,
    pub capacity: usize,
    pub trip: FlexTrip,
    pub home_stop: String,
    /// `None` while in transit.
    pub at: Option<String>,
    pub schedule: Schedule,
    /// Users with a reservation who have not announced readiness yet.
    pub reserved: Vec<String>,
    /// Users ready at their pickup stop.
    pub waiting: Vec<String>,
    /// Users on board.
    pub passengers: Vec<String>,
    pub last_arrival_ms: u64,
    /// Bumped to cancel a pending scheduled-departure wakeup.
    pub wait_epoch: u64,
    pub waiting_for_scheduled: bool,
}

impl Car {
    pub fn new(mobility_id: String, capacity: usize, trip: FlexTrip, home_stop: String) -> Self {
        Self {
            mobility_id,
            capacity,
            trip,
            at: Some(home_stop.clone()),
            home_stop,
            schedule: Schedule::default(),
            reserved: Vec::new(),
            waiting: Vec::new(),
            passengers: Vec::new(),
            last_arrival_ms: 0,
            wait_epoch: 0,
            waiting_for_scheduled: false,
        }
    }

    pub fn holds(&self, user_id: &str) -> bool {
        self.reserved.iter().any(|u| u == user_id)
            || self.waiting.iter().any(|u| u == user_id)
            || self.passengers.iter().any(|u| u == user_id)
    }

    /// The entry the car is moving toward, when in transit.
    pub fn moving_target(&self) -> Option<&PlannedStop> {
        if self.at.is_none() {
            self.schedule.current.as_ref()
        } else {
            None
        }
    }

    /// Move a user from the reserved set to the waiting set.
    pub fn mark_ready(&mut self, user_id: &str) -> bool {
        if let Some(index) = self.reserved.iter().position(|u| u == user_id) {
            let user = self.reserved.remove(index);
            self.waiting.push(user);
            true
        } else {
            false
        }
    }
}

/// Vehicles in deterministic setup order.
#[derive(Debug, Default, Resource)]
pub struct CarRegistry {
    cars: Vec<(String, Entity)>,
}

impl CarRegistry {
    pub fn insert(&mut self, mobility_id: String, entity: Entity) {
        self.cars.push((mobility_id, entity));
    }

    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.cars.iter().map(|(_, entity)| *entity)
    }

    pub fn len(&self) -> usize {
        self.cars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cars.is_empty()
    }
}
