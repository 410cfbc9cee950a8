//! Transit vehicle state: timetable traversal cursor, rider roster and
//! seat accounting.

use bevy_ecs::prelude::{Component, Entity};
use bevy_ecs::system::Resource;
use chrono::{Days, Duration, NaiveDate, NaiveDateTime};
use std::collections::VecDeque;

use crate::trip::{midnight_offset_ms, Path, StopLike, TimedStop, Timetable, TripElement};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserStatus {
    Reserved,
    Waiting,
    Riding,
}

#[derive(Debug, Clone)]
pub struct TransitUser {
    pub user_id: String,
    pub demand_id: String,
    pub path: Path,
    pub status: UserStatus,
}

/// Traversal position within one operating day.
#[derive(Debug, Clone)]
pub struct Cursor {
    pub op_date: NaiveDate,
    pub midnight_ms: i64,
    pub elements: Vec<TripElement>,
    pub index: usize,
    /// Deviated stops materialized for the element being crossed.
    pub pending: VecDeque<TimedStop>,
    /// The stop currently being approached or serviced.
    pub target: Option<TimedStop>,
}

/// A timetable-bound vehicle. Riders stay on the roster from reservation
/// until their drop-off.
#[derive(Debug, Component)]
pub struct Car {
    pub mobility_id: String,
    pub capacity: usize,
    pub timetable: Timetable,
    pub stop: Option<StopLike>,
    pub users: Vec<TransitUser>,
    pub cursor: Option<Cursor>,
}

impl Car {
    pub fn new(mobility_id: String, capacity: usize, timetable: Timetable) -> Self {
        Self {
            mobility_id,
            capacity,
            timetable,
            stop: None,
            users: Vec::new(),
            cursor: None,
        }
    }

    pub fn holds(&self, user_id: &str) -> bool {
        self.users.iter().any(|user| user.user_id == user_id)
    }

    pub fn riding_count(&self) -> usize {
        self.users
            .iter()
            .filter(|user| user.status == UserStatus::Riding)
            .count()
    }

    /// Seat check: at every departure instant, the number of overlapping
    /// reserved rides (including the candidate) must not exceed capacity.
    pub fn is_reservable(&self, candidate: &Path) -> bool {
        let mut paths: Vec<&Path> = self.users.iter().map(|user| &user.path).collect();
        paths.push(candidate);
        for path in &paths {
            let departure = path.departure_ms();
            let overlapping = paths
                .iter()
                .filter(|other| {
                    other.departure_ms() <= departure && departure < other.arrival_ms()
                })
                .count();
            if overlapping > self.capacity {
                return false;
            }
        }
        true
    }

    /// Best path org → dst departing at or after `dept_ms`, searched on the
    /// departure date and its neighbors to tolerate after-midnight service.
    /// Minimizes arrival, then ride duration.
    pub fn earliest_path(
        &self,
        org: &StopLike,
        dst: &StopLike,
        dept_ms: i64,
        reference: NaiveDateTime,
    ) -> Option<Path> {
        let dept_date = (reference + Duration::milliseconds(dept_ms)).date();
        let mut best: Option<Path> = None;
        let candidates = [
            dept_date.checked_sub_days(Days::new(1)),
            Some(dept_date),
            dept_date.checked_add_days(Days::new(1)),
        ];
        for date in candidates.into_iter().flatten() {
            let midnight = midnight_offset_ms(reference, date);
            for path in self.timetable.paths(org, dst, date, midnight) {
                if dept_ms <= path.departure_ms()
                    && best
                        .as_ref()
                        .map(|b| path.ranking() < b.ranking())
                        .unwrap_or(true)
                {
                    best = Some(path);
                }
            }
        }
        best
    }

    /// The date whose timetable the vehicle is (or will next be) running:
    /// yesterday while yesterday's operation is unfinished, tomorrow once
    /// today's operation has ended, today otherwise.
    pub fn operation_date(&self, now: NaiveDateTime) -> NaiveDate {
        let today = now.date();
        if let Some(yesterday) = today.checked_sub_days(Days::new(1)) {
            if self.timetable.is_operation(yesterday) {
                if let Some(end) = self.timetable.end_time(yesterday) {
                    if now < end {
                        return yesterday;
                    }
                }
            }
        }
        if self.timetable.is_operation(today) {
            if let Some(end) = self.timetable.end_time(today) {
                if end <= now {
                    return today
                        .checked_add_days(Days::new(1))
                        .unwrap_or(today);
                }
            }
        }
        today
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
}
