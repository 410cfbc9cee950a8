//! Timetables: stop times, deviation locations, single trips and blocks.
//!
//! All timetable times are millisecond offsets from the midnight of an
//! operating date; absolute times are formed against a reference date and
//! may be negative for dates before the scenario start, so they are carried
//! as `i64` until they are scheduled on the clock.

use chrono::{NaiveDate, NaiveDateTime};

use sim_core::calendar::Service;
use sim_core::clock::ONE_DAY_MS;
use sim_core::event::Location;

/// A stop on a fixed route.
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

/// Arrival/departure offsets at one stop. A missing side defaults to the
/// other; at least one must be given.
#[derive(Debug, Clone, PartialEq)]
pub struct StopTime {
    pub stop: Stop,
    pub arrival_ms: u64,
    pub departure_ms: u64,
}

impl StopTime {
    pub fn new(stop: Stop, arrival_ms: Option<u64>, departure_ms: Option<u64>) -> Option<Self> {
        let arrival = arrival_ms.or(departure_ms)?;
        let departure = departure_ms.or(arrival_ms)?;
        if arrival > departure {
            return None;
        }
        Some(Self {
            stop,
            arrival_ms: arrival,
            departure_ms: departure,
        })
    }
}

/// A declared deviation opportunity between two scheduled stops.
#[derive(Debug, Clone, PartialEq)]
pub struct TripLocation {
    pub location_id: String,
    pub start_window_ms: u64,
    pub end_window_ms: u64,
}

/// A pickup/drop-off point materialized inside a deviation window for one
/// reservation.
#[derive(Debug, Clone, PartialEq)]
pub struct TemporaryStop {
    pub lat: f64,
    pub lng: f64,
    pub location: TripLocation,
}

impl TemporaryStop {
    pub fn location_payload(&self) -> Location {
        Location::new(self.location.location_id.clone(), self.lat, self.lng)
    }
}

/// Either a fixed stop or a temporary deviation stop.
#[derive(Debug, Clone, PartialEq)]
pub enum StopLike {
    Fixed(Stop),
    Temporary(TemporaryStop),
}

impl StopLike {
    pub fn location_payload(&self) -> Location {
        match self {
            StopLike::Fixed(stop) => stop.location(),
            StopLike::Temporary(stop) => stop.location_payload(),
        }
    }
}

/// One element of a trip: a scheduled stop or a deviation window.
#[derive(Debug, Clone, PartialEq)]
pub enum TripElement {
    Stop(StopTime),
    Location(TripLocation),
}

/// A stop visit pinned to absolute (reference-relative) times.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedStop {
    pub stop: StopLike,
    pub arrival_ms: i64,
    pub departure_ms: i64,
}

/// A pickup/drop-off pair offered to one reservation. For deviated
/// endpoints the timed stops are the neighboring scheduled stops and the
/// temporary stop is kept alongside.
#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    pub pick_up: TimedStop,
    pub drop_off: TimedStop,
    pub pick_up_stop: Option<TemporaryStop>,
    pub drop_off_stop: Option<TemporaryStop>,
}

impl Path {
    pub fn departure_ms(&self) -> i64 {
        self.pick_up.departure_ms
    }

    pub fn arrival_ms(&self) -> i64 {
        self.drop_off.arrival_ms
    }

    pub fn duration_ms(&self) -> i64 {
        self.arrival_ms() - self.departure_ms()
    }

    pub fn org(&self) -> StopLike {
        match &self.pick_up_stop {
            Some(stop) => StopLike::Temporary(stop.clone()),
            None => self.pick_up.stop.clone(),
        }
    }

    pub fn dst(&self) -> StopLike {
        match &self.drop_off_stop {
            Some(stop) => StopLike::Temporary(stop.clone()),
            None => self.drop_off.stop.clone(),
        }
    }

    /// Ordering used for path selection: earliest arrival, then shortest
    /// ride.
    pub fn ranking(&self) -> (i64, i64) {
        (self.arrival_ms(), self.duration_ms())
    }
}

#[derive(Debug, Clone)]
pub struct SingleTrip {
    pub service: Service,
    pub elements: Vec<TripElement>,
    pub block_id: String,
}

impl SingleTrip {
    /// First and last element must be scheduled stops, with at least two of
    /// them overall.
    pub fn valid(&self) -> bool {
        let stops = self.stop_times().count();
        stops >= 2
            && matches!(self.elements.first(), Some(TripElement::Stop(_)))
            && matches!(self.elements.last(), Some(TripElement::Stop(_)))
    }

    pub fn stop_times(&self) -> impl Iterator<Item = &StopTime> {
        self.elements.iter().filter_map(|element| match element {
            TripElement::Stop(stop_time) => Some(stop_time),
            TripElement::Location(_) => None,
        })
    }

    pub fn locations(&self) -> impl Iterator<Item = &TripLocation> {
        self.elements.iter().filter_map(|element| match element {
            TripElement::Location(location) => Some(location),
            TripElement::Stop(_) => None,
        })
    }

    pub fn first_departure_ms(&self) -> u64 {
        self.stop_times()
            .next()
            .map(|stop_time| stop_time.departure_ms)
            .unwrap_or(0)
    }
}

/// A chain of trips operated by the same vehicle, identified by a shared
/// `block_id`. On any date only the operating members contribute elements,
/// concatenated in departure order.
#[derive(Debug, Clone)]
pub struct BlockTrip {
    pub trips: Vec<SingleTrip>,
}

impl BlockTrip {
    pub fn new(mut trips: Vec<SingleTrip>) -> Self {
        trips.sort_by_key(SingleTrip::first_departure_ms);
        Self { trips }
    }

    pub fn valid(&self) -> bool {
        self.trips.len() >= 2
            && self.trips.iter().all(SingleTrip::valid)
            && !self.trips[0].block_id.is_empty()
            && self
                .trips
                .iter()
                .all(|trip| trip.block_id == self.trips[0].block_id)
    }
}

#[derive(Debug, Clone)]
pub enum Timetable {
    Single(SingleTrip),
    Block(BlockTrip),
}

impl Timetable {
    pub fn is_operation(&self, at: NaiveDate) -> bool {
        match self {
            Timetable::Single(trip) => trip.service.operates(at),
            Timetable::Block(block) => {
                block.trips.iter().any(|trip| trip.service.operates(at))
            }
        }
    }

    /// Elements active on the given date (block members that do not operate
    /// drop out).
    pub fn elements_at(&self, at: NaiveDate) -> Vec<TripElement> {
        match self {
            Timetable::Single(trip) => {
                if trip.service.operates(at) {
                    trip.elements.clone()
                } else {
                    Vec::new()
                }
            }
            Timetable::Block(block) => block
                .trips
                .iter()
                .filter(|trip| trip.service.operates(at))
                .flat_map(|trip| trip.elements.iter().cloned())
                .collect(),
        }
    }

    pub fn stops(&self) -> Vec<&Stop> {
        let elements: Vec<&TripElement> = match self {
            Timetable::Single(trip) => trip.elements.iter().collect(),
            Timetable::Block(block) => block
                .trips
                .iter()
                .flat_map(|trip| trip.elements.iter())
                .collect(),
        };
        elements
            .into_iter()
            .filter_map(|element| match element {
                TripElement::Stop(stop_time) => Some(&stop_time.stop),
                TripElement::Location(_) => None,
            })
            .collect()
    }

    pub fn locations(&self) -> Vec<&TripLocation> {
        match self {
            Timetable::Single(trip) => trip.locations().collect(),
            Timetable::Block(block) => {
                block.trips.iter().flat_map(SingleTrip::locations).collect()
            }
        }
    }

    /// End of the operating day: the last scheduled departure on `at` as a
    /// calendar datetime.
    pub fn end_time(&self, at: NaiveDate) -> Option<NaiveDateTime> {
        let last = self
            .elements_at(at)
            .iter()
            .filter_map(|element| match element {
                TripElement::Stop(stop_time) => Some(stop_time.departure_ms),
                TripElement::Location(_) => None,
            })
            .last()?;
        let midnight = at.and_hms_opt(0, 0, 0)?;
        Some(midnight + chrono::Duration::milliseconds(last as i64))
    }

    /// All pickup/drop-off pairs between `org` and `dst` on the given date.
    pub fn paths(
        &self,
        org: &StopLike,
        dst: &StopLike,
        at: NaiveDate,
        midnight_ms: i64,
    ) -> Vec<Path> {
        if !self.is_operation(at) {
            return Vec::new();
        }
        let elements = self.elements_at(at);
        let pickups = find_endpoint(&elements, org, midnight_ms);
        let drop_offs = find_endpoint(&elements, dst, midnight_ms);
        let mut paths = Vec::new();
        for (pick_up, pick_up_stop) in &pickups {
            for (drop_off, drop_off_stop) in &drop_offs {
                if pick_up.departure_ms < drop_off.arrival_ms {
                    paths.push(Path {
                        pick_up: pick_up.clone(),
                        drop_off: drop_off.clone(),
                        pick_up_stop: pick_up_stop.clone(),
                        drop_off_stop: drop_off_stop.clone(),
                    });
                }
            }
        }
        paths
    }
}

fn timed(stop_time: &StopTime, midnight_ms: i64) -> TimedStop {
    TimedStop {
        stop: StopLike::Fixed(stop_time.stop.clone()),
        arrival_ms: midnight_ms + stop_time.arrival_ms as i64,
        departure_ms: midnight_ms + stop_time.departure_ms as i64,
    }
}

/// Occurrences of an endpoint in the element list. A fixed stop matches its
/// scheduled visits; a temporary stop matches its deviation window, timed by
/// the neighboring scheduled stops (departure of the preceding one for
/// pickups, arrival of the following one for drop-offs — the conservative
/// bounds of the window).
fn find_endpoint(
    elements: &[TripElement],
    endpoint: &StopLike,
    midnight_ms: i64,
) -> Vec<(TimedStop, Option<TemporaryStop>)> {
    let mut found = Vec::new();
    match endpoint {
        StopLike::Fixed(stop) => {
            for element in elements {
                if let TripElement::Stop(stop_time) = element {
                    if &stop_time.stop == stop {
                        found.push((timed(stop_time, midnight_ms), None));
                    }
                }
            }
        }
        StopLike::Temporary(temporary) => {
            for window in elements.windows(3) {
                let [TripElement::Stop(previous), TripElement::Location(location), TripElement::Stop(next)] =
                    window
                else {
                    continue;
                };
                if location == &temporary.location {
                    // Pickup uses the preceding departure, drop-off the
                    // following arrival; expose both on one timed stop.
                    found.push((
                        TimedStop {
                            stop: StopLike::Temporary(temporary.clone()),
                            arrival_ms: midnight_ms + next.arrival_ms as i64,
                            departure_ms: midnight_ms + previous.departure_ms as i64,
                        },
                        Some(temporary.clone()),
                    ));
                }
            }
        }
    }
    found
}

/// Deviated stops to insert for a deviation window, one per attached
/// reservation endpoint, spaced uniformly across the window.
pub fn deviated_stops(
    previous_departure_ms: i64,
    next_arrival_ms: i64,
    attached: &[TemporaryStop],
) -> Vec<TimedStop> {
    if attached.is_empty() {
        return Vec::new();
    }
    let duration = next_arrival_ms - previous_departure_ms;
    let n = attached.len() as i64 + 1;
    attached
        .iter()
        .enumerate()
        .map(|(index, stop)| {
            let at = previous_departure_ms + duration * (index as i64 + 1) / n;
            TimedStop {
                stop: StopLike::Temporary(stop.clone()),
                arrival_ms: at,
                departure_ms: at,
            }
        })
        .collect()
}

/// Milliseconds from the reference datetime to midnight of `at` (negative
/// for earlier dates).
pub fn midnight_offset_ms(reference: NaiveDateTime, at: NaiveDate) -> i64 {
    (at.and_hms_opt(0, 0, 0).unwrap_or_default() - reference).num_milliseconds()
}

/// Convenience: day length as i64.
pub const DAY_MS: i64 = ONE_DAY_MS as i64;
