//! Simulation time: millisecond-scale timeline anchored to a calendar date.
//!
//! All timestamps and `clock.now()` are in **simulation milliseconds**. Time 0
//! is mapped to a reference `NaiveDateTime` (midnight of the scenario start
//! date), so service calendars can be evaluated against real dates. The wire
//! protocol speaks **minutes** as `f64`; conversions live here.
//!
//! The timeline advances by popping the next scheduled event. Events at the
//! same millisecond run FIFO by insertion sequence number.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use bevy_ecs::system::Resource;
use chrono::{Duration, NaiveDate, NaiveDateTime};

/// One second in simulation milliseconds.
pub const ONE_SEC_MS: u64 = 1000;
/// One minute in simulation milliseconds.
pub const ONE_MIN_MS: u64 = 60 * ONE_SEC_MS;
/// One hour in simulation milliseconds.
pub const ONE_HOUR_MS: u64 = 60 * ONE_MIN_MS;
/// One day in simulation milliseconds.
pub const ONE_DAY_MS: u64 = 24 * ONE_HOUR_MS;

/// Convert wire minutes (`f64`) to simulation milliseconds.
pub fn ms_from_minutes(minutes: f64) -> u64 {
    (minutes * ONE_MIN_MS as f64).round().max(0.0) as u64
}

/// Convert simulation milliseconds to wire minutes (`f64`).
pub fn minutes_from_ms(ms: u64) -> f64 {
    ms as f64 / ONE_MIN_MS as f64
}

/// Scheduled event. `timestamp` is in **milliseconds** (simulation time);
/// `seq` is the insertion sequence used for FIFO ordering at equal times.
#[derive(Debug, Clone)]
pub struct ScheduledEvent<K> {
    pub timestamp: u64,
    pub seq: u64,
    pub kind: K,
}

impl<K> PartialEq for ScheduledEvent<K> {
    fn eq(&self, other: &Self) -> bool {
        self.timestamp == other.timestamp && self.seq == other.seq
    }
}

impl<K> Eq for ScheduledEvent<K> {}

impl<K> Ord for ScheduledEvent<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap by timestamp; same-ms events ordered FIFO by sequence.
        other
            .timestamp
            .cmp(&self.timestamp)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl<K> PartialOrd for ScheduledEvent<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Simulation clock: time in **milliseconds**, advances to the next scheduled
/// event. Time 0 maps to midnight of `start_date`.
#[derive(Debug, Clone)]
pub struct SimulationClock<K> {
    /// Current simulation time in ms (updated when an event is popped).
    now: u64,
    /// Insertion counter for FIFO ordering of same-ms events.
    seq: u64,
    /// Calendar datetime corresponding to simulation time 0.
    start: NaiveDateTime,
    events: BinaryHeap<ScheduledEvent<K>>,
}

impl<K: Send + Sync + 'static> Resource for SimulationClock<K> {}

impl<K> SimulationClock<K> {
    /// Clock with time 0 mapped to midnight of the given date.
    pub fn with_start_date(start_date: NaiveDate) -> Self {
        Self {
            now: 0,
            seq: 0,
            start: start_date.and_hms_opt(0, 0, 0).unwrap_or_default(),
            events: BinaryHeap::new(),
        }
    }

    /// Current simulation time in milliseconds.
    pub fn now(&self) -> u64 {
        self.now
    }

    /// Current simulation time in wire minutes.
    pub fn now_minutes(&self) -> f64 {
        minutes_from_ms(self.now)
    }

    /// Calendar datetime corresponding to simulation time 0.
    pub fn start(&self) -> NaiveDateTime {
        self.start
    }

    /// Calendar datetime at a simulation timestamp.
    pub fn datetime_at(&self, ms: u64) -> NaiveDateTime {
        self.start + Duration::milliseconds(ms as i64)
    }

    /// Calendar datetime of the current simulation time.
    pub fn datetime_now(&self) -> NaiveDateTime {
        self.datetime_at(self.now)
    }

    /// Simulation milliseconds elapsed from time 0 to `at`. Saturates at 0
    /// for datetimes before the scenario start.
    pub fn elapsed_ms(&self, at: NaiveDateTime) -> u64 {
        (at - self.start).num_milliseconds().max(0) as u64
    }

    /// Schedule an event at a specific simulation timestamp (ms).
    pub fn schedule_at(&mut self, at_ms: u64, kind: K) {
        debug_assert!(
            at_ms >= self.now,
            "event timestamp must be >= current time"
        );
        let seq = self.seq;
        self.seq += 1;
        self.events.push(ScheduledEvent {
            timestamp: at_ms.max(self.now),
            seq,
            kind,
        });
    }

    /// Schedule an event at `now + delta_ms` (relative, in ms).
    pub fn schedule_in(&mut self, delta_ms: u64, kind: K) {
        self.schedule_at(self.now.saturating_add(delta_ms), kind);
    }

    /// Schedule an event at a calendar datetime (clamped to `now` if past).
    pub fn schedule_at_datetime(&mut self, at: NaiveDateTime, kind: K) {
        let ms = self.elapsed_ms(at);
        self.schedule_at(ms.max(self.now), kind);
    }

    /// Pop the next event (earliest timestamp, FIFO within a timestamp) and
    /// advance `now` to its timestamp.
    pub fn pop_next(&mut self) -> Option<ScheduledEvent<K>> {
        let event = self.events.pop()?;
        self.now = event.timestamp;
        Some(event)
    }

    /// Timestamp of the next scheduled event without popping it.
    pub fn peek(&self) -> Option<u64> {
        self.events.peek().map(|event| event.timestamp)
    }

    /// Wire-minute timestamp of the next scheduled event.
    pub fn peek_minutes(&self) -> Option<f64> {
        self.peek().map(minutes_from_ms)
    }

    /// Move `now` forward to `ms` without running anything. Never rewinds.
    pub fn advance_to(&mut self, ms: u64) {
        self.now = self.now.max(ms);
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Number of events still in the queue (for tests and diagnostics).
    pub fn pending_event_count(&self) -> usize {
        self.events.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_pops_events_in_time_order() {
        let mut clock: SimulationClock<u32> =
            SimulationClock::with_start_date(NaiveDate::from_ymd_opt(2024, 4, 1).unwrap());
        clock.schedule_at(20, 1);
        clock.schedule_at(5, 2);
        clock.schedule_at(20, 3);
        clock.schedule_at(10, 4);

        let first = clock.pop_next().expect("first event");
        assert_eq!(first.timestamp, 5);
        assert_eq!(clock.now(), 5);

        let second = clock.pop_next().expect("second event");
        assert_eq!(second.timestamp, 10);
        assert_eq!(clock.now(), 10);

        // Same timestamp (20): FIFO by insertion order.
        let third = clock.pop_next().expect("third event");
        assert_eq!((third.timestamp, third.kind), (20, 1));
        let fourth = clock.pop_next().expect("fourth event");
        assert_eq!((fourth.timestamp, fourth.kind), (20, 3));

        assert!(clock.pop_next().is_none());
        assert!(clock.is_empty());
    }

    #[test]
    fn same_instant_inserts_stay_fifo_under_pressure() {
        let mut clock: SimulationClock<usize> =
            SimulationClock::with_start_date(NaiveDate::from_ymd_opt(2024, 4, 1).unwrap());
        for i in 0..100 {
            clock.schedule_at(7 * ONE_MIN_MS, i);
        }
        for i in 0..100 {
            assert_eq!(clock.pop_next().expect("event").kind, i);
        }
    }

    #[test]
    fn datetime_conversion_round_trips() {
        let start = NaiveDate::from_ymd_opt(2024, 4, 1).unwrap();
        let mut clock: SimulationClock<()> = SimulationClock::with_start_date(start);
        let dt = clock.datetime_at(490 * ONE_MIN_MS);
        assert_eq!(clock.elapsed_ms(dt), 490 * ONE_MIN_MS);

        clock.schedule_at_datetime(dt, ());
        let event = clock.pop_next().expect("event");
        assert_eq!(event.timestamp, 490 * ONE_MIN_MS);
        assert_eq!(clock.datetime_now(), dt);
    }

    #[test]
    fn advance_never_rewinds() {
        let mut clock: SimulationClock<()> =
            SimulationClock::with_start_date(NaiveDate::from_ymd_opt(2024, 4, 1).unwrap());
        clock.advance_to(500);
        clock.advance_to(100);
        assert_eq!(clock.now(), 500);
    }

    #[test]
    fn minute_conversions_are_exact_for_schedule_grid() {
        assert_eq!(ms_from_minutes(490.0), 490 * ONE_MIN_MS);
        assert_eq!(minutes_from_ms(520 * ONE_MIN_MS), 520.0);
        assert_eq!(ms_from_minutes(480.1), 28_806_000);
    }
}
