//! Domain model of the on-demand simulator: stops, stop groups, flex trips
//! and the per-day operating window.

use bevy_ecs::system::Resource;
use chrono::{Days, NaiveDateTime};
use std::collections::HashMap;

use sim_core::calendar::Service;
use sim_core::clock::{ONE_DAY_MS, ONE_MIN_MS};
use sim_core::event::Location;

/// A stop where vehicles pick up or drop off riders.
#[derive(Debug, Clone, PartialEq)]
pub struct Stop {
    pub stop_id: String,
    pub name: String,
    pub lat: f64,
    pub lng: f64,
}

impl Stop {
    pub fn location(&self) -> Location {
        Location::new(self.stop_id.clone(), self.lat, self.lng)
    }
}

/// Named set of stops served by one flex trip.
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub group_id: String,
    pub name: String,
    pub stop_ids: Vec<String>,
}

/// One flex trip: a service calendar plus the stop group and the daily
/// pickup/drop-off window, as minute offsets from midnight. Windows past
/// 24 h express after-midnight operation.
#[derive(Debug, Clone)]
pub struct FlexTrip {
    pub service: Service,
    pub group: Group,
    pub start_window_ms: u64,
    pub end_window_ms: u64,
}

impl FlexTrip {
    /// Resolve the current operating window `[start, end]` in absolute
    /// simulation ms: first try yesterday's window (post-midnight spill),
    /// then today's, then tomorrow's. Yesterday/today only count while
    /// their window has not ended yet; tomorrow is returned unconditionally.
    pub fn window(&self, now_ms: u64, now_dt: NaiveDateTime, midnight_ms: i64) -> Option<(u64, u64)> {
        let today = now_dt.date();

        if let Some(yesterday) = today.checked_sub_days(Days::new(1)) {
            if self.service.operates(yesterday) {
                let start = midnight_ms;
                let end = midnight_ms + self.end_window_ms as i64 - ONE_DAY_MS as i64;
                if end > 0 && now_ms < end as u64 {
                    return Some((start.max(0) as u64, end as u64));
                }
            }
        }

        if self.service.operates(today) {
            let start = midnight_ms + self.start_window_ms as i64;
            let end = midnight_ms + self.end_window_ms as i64;
            if now_ms < end as u64 {
                return Some((start.max(0) as u64, end as u64));
            }
        }

        if let Some(tomorrow) = today.checked_add_days(Days::new(1)) {
            if self.service.operates(tomorrow) {
                let start = midnight_ms + ONE_DAY_MS as i64 + self.start_window_ms as i64;
                let end = midnight_ms + ONE_DAY_MS as i64 + self.end_window_ms as i64;
                return Some((start.max(0) as u64, end as u64));
            }
        }

        None
    }
}

/// Registry of all stops known to the simulator, by stop id.
#[derive(Debug, Default, Resource)]
pub struct StopRegistry {
    stops: HashMap<String, Stop>,
}

impl StopRegistry {
    pub fn insert(&mut self, stop: Stop) {
        self.stops.insert(stop.stop_id.clone(), stop);
    }

    pub fn get(&self, stop_id: &str) -> Option<&Stop> {
        self.stops.get(stop_id)
    }

    pub fn location(&self, stop_id: &str) -> Option<Location> {
        self.get(stop_id).map(Stop::location)
    }

    pub fn len(&self) -> usize {
        self.stops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stops.is_empty()
    }
}

/// A rider known to the simulator. Created on reservation intent, removed
/// on the final ARRIVED.
#[derive(Debug, Clone, PartialEq)]
pub struct Rider {
    pub user_id: String,
    pub demand_id: String,
    pub org: String,
    pub dst: String,
    pub desired_dept_ms: u64,
    pub ideal_duration_ms: u64,
}

/// Riders by user id; vehicles reference riders only through ids.
#[derive(Debug, Default, Resource)]
pub struct RiderLedger {
    riders: HashMap<String, Rider>,
}

impl RiderLedger {
    pub fn insert(&mut self, rider: Rider) {
        self.riders.insert(rider.user_id.clone(), rider);
    }

    pub fn get(&self, user_id: &str) -> Option<&Rider> {
        self.riders.get(user_id)
    }

    pub fn remove(&mut self, user_id: &str) -> Option<Rider> {
        self.riders.remove(user_id)
    }
}

/// Simulator tuning knobs.
#[derive(Debug, Clone, Resource)]
pub struct OnDemandConfig {
    pub board_time_ms: u64,
    pub max_delay_ms: u64,
    /// Hard cap on VRP problem size (nodes); larger problems are infeasible.
    pub max_route_nodes: usize,
    /// Deterministic search budget, in node expansions.
    pub max_expansions: u64,
}

impl Default for OnDemandConfig {
    fn default() -> Self {
        Self {
            board_time_ms: 0,
            max_delay_ms: 30 * ONE_MIN_MS,
            max_route_nodes: 10,
            max_expansions: 300_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use sim_core::clock::ONE_HOUR_MS;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn trip(service: Service) -> FlexTrip {
        FlexTrip {
            service,
            group: Group {
                group_id: "g".into(),
                name: "g".into(),
                stop_ids: vec![],
            },
            start_window_ms: ONE_HOUR_MS,
            end_window_ms: 23 * ONE_HOUR_MS,
        }
    }

    #[test]
    fn window_resolves_today_when_operating() {
        let trip = trip(Service::daily(date(2024, 4, 1), date(2024, 4, 7)));
        let now_dt = date(2024, 4, 1).and_hms_opt(8, 0, 0).unwrap();
        let window = trip.window(8 * ONE_HOUR_MS, now_dt, 0).expect("window");
        assert_eq!(window, (ONE_HOUR_MS, 23 * ONE_HOUR_MS));
    }

    #[test]
    fn window_spills_into_yesterday_after_midnight_service() {
        // Service ends at 25:00, i.e. 01:00 on the following day.
        let mut trip = trip(Service::daily(date(2024, 4, 1), date(2024, 4, 1)));
        trip.end_window_ms = 25 * ONE_HOUR_MS;
        // 2024-04-02 00:30, half an hour before yesterday's window closes.
        let now_ms = ONE_DAY_MS + ONE_HOUR_MS / 2;
        let now_dt = date(2024, 4, 2).and_hms_opt(0, 30, 0).unwrap();
        let window = trip.window(now_ms, now_dt, ONE_DAY_MS as i64).expect("window");
        assert_eq!(window, (ONE_DAY_MS, ONE_DAY_MS + ONE_HOUR_MS));
    }

    #[test]
    fn window_falls_through_to_tomorrow() {
        // Operates only on Tuesday; asked on Monday evening after close.
        let trip = trip(Service::new(
            date(2024, 4, 1),
            date(2024, 4, 7),
            [false, true, false, false, false, false, false],
        ));
        let now_dt = date(2024, 4, 1).and_hms_opt(23, 30, 0).unwrap();
        let window = trip
            .window(23 * ONE_HOUR_MS + ONE_HOUR_MS / 2, now_dt, 0)
            .expect("window");
        assert_eq!(
            window,
            (ONE_DAY_MS + ONE_HOUR_MS, ONE_DAY_MS + 23 * ONE_HOUR_MS)
        );
    }

    #[test]
    fn no_window_without_service() {
        let trip = trip(Service::new(
            date(2024, 4, 1),
            date(2024, 4, 7),
            [false; 7],
        ));
        let now_dt = date(2024, 4, 3).and_hms_opt(12, 0, 0).unwrap();
        assert!(trip
            .window(2 * ONE_DAY_MS + 12 * ONE_HOUR_MS, now_dt, 2 * ONE_DAY_MS as i64)
            .is_none());
    }
}
