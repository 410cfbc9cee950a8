//! Event-driven timetable traversal and reservation acceptance.

use bevy_ecs::prelude::{Entity, Query, Res, ResMut, Resource};
use chrono::Days;
use std::collections::{HashMap, VecDeque};
use tracing::warn;

use sim_core::clock::{ms_from_minutes, SimulationClock};
use sim_core::event::{EventBus, Location, RouteLeg};

use crate::events;
use crate::mobility::{Car, CarRegistry, Cursor, TransitUser, UserStatus};
use crate::trip::{
    deviated_stops, midnight_offset_ms, StopLike, TemporaryStop, TimedStop, TripElement,
    TripLocation,
};

pub type TransitClock = SimulationClock<TransitEvent>;

#[derive(Debug, Clone)]
pub struct ReserveRequest {
    pub user_id: String,
    pub demand_id: String,
    pub org: Location,
    pub dst: Location,
    pub dept_min: f64,
}

#[derive(Debug, Clone)]
pub enum TransitEvent {
    Reserve(ReserveRequest),
    StartDay { car: Entity },
    ArriveStop { car: Entity },
    DepartStop { car: Entity },
}

#[derive(Debug, Clone, Resource)]
pub struct CurrentEvent(pub TransitEvent);

/// Fixed stops and deviation locations known to the simulator.
#[derive(Debug, Default, Resource)]
pub struct StopIndex {
    pub stops: HashMap<String, crate::trip::Stop>,
    pub locations: HashMap<String, TripLocation>,
}

impl StopIndex {
    /// Resolve a wire location to an endpoint: a fixed stop by id, or a
    /// temporary stop inside a declared deviation window.
    pub fn to_stop_like(&self, location: &Location) -> Option<StopLike> {
        if let Some(stop) = self.stops.get(&location.location_id) {
            return Some(StopLike::Fixed(stop.clone()));
        }
        self.locations
            .get(&location.location_id)
            .map(|trip_location| {
                StopLike::Temporary(TemporaryStop {
                    lat: location.lat,
                    lng: location.lng,
                    location: trip_location.clone(),
                })
            })
    }
}

pub fn is_reserve(event: Option<Res<CurrentEvent>>) -> bool {
    event.is_some_and(|e| matches!(e.0, TransitEvent::Reserve(_)))
}

pub fn is_start_day(event: Option<Res<CurrentEvent>>) -> bool {
    event.is_some_and(|e| matches!(e.0, TransitEvent::StartDay { .. }))
}

pub fn is_arrive_stop(event: Option<Res<CurrentEvent>>) -> bool {
    event.is_some_and(|e| matches!(e.0, TransitEvent::ArriveStop { .. }))
}

pub fn is_depart_stop(event: Option<Res<CurrentEvent>>) -> bool {
    event.is_some_and(|e| matches!(e.0, TransitEvent::DepartStop { .. }))
}

fn minutes_from_ms_i64(ms: i64) -> f64 {
    ms as f64 / sim_core::ONE_MIN_MS as f64
}

/// Begin (or skip) the operating day the vehicle is due to run.
pub fn start_day(entity: Entity, car: &mut Car, clock: &mut TransitClock) {
    let now_dt = clock.datetime_now();
    let op_date = car.operation_date(now_dt);
    if car.timetable.is_operation(op_date) {
        let midnight = midnight_offset_ms(clock.start(), op_date);
        let elements = car.timetable.elements_at(op_date);
        car.cursor = Some(Cursor {
            op_date,
            midnight_ms: midnight,
            elements,
            index: 0,
            pending: VecDeque::new(),
            target: None,
        });
        advance_cursor(entity, car, clock);
    } else {
        // No operation today: sleep until the next midnight.
        let next_midnight = now_dt
            .date()
            .checked_add_days(Days::new(1))
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap_or(now_dt);
        clock.schedule_at_datetime(next_midnight, TransitEvent::StartDay { car: entity });
    }
}

enum CursorStep {
    Approach(TimedStop),
    EndOfDay,
    Deviation {
        location: TripLocation,
        previous_departure_ms: i64,
        next_arrival_ms: i64,
    },
    Skip,
}

/// Move the cursor to the next stop of the day (materializing deviation
/// stops lazily from the current reservation roster) and schedule its
/// arrival. At the end of the day, roll over to the next operating date.
fn advance_cursor(entity: Entity, car: &mut Car, clock: &mut TransitClock) {
    loop {
        let step = {
            let Some(cursor) = car.cursor.as_mut() else { return };
            if let Some(target) = cursor.pending.pop_front() {
                CursorStep::Approach(target)
            } else if cursor.index >= cursor.elements.len() {
                CursorStep::EndOfDay
            } else {
                let index = cursor.index;
                cursor.index += 1;
                match &cursor.elements[index] {
                    TripElement::Stop(stop_time) => CursorStep::Approach(TimedStop {
                        stop: StopLike::Fixed(stop_time.stop.clone()),
                        arrival_ms: cursor.midnight_ms + stop_time.arrival_ms as i64,
                        departure_ms: cursor.midnight_ms + stop_time.departure_ms as i64,
                    }),
                    TripElement::Location(location) => {
                        let previous = index.checked_sub(1).and_then(|i| {
                            match cursor.elements.get(i) {
                                Some(TripElement::Stop(stop_time)) => {
                                    Some(cursor.midnight_ms + stop_time.departure_ms as i64)
                                }
                                _ => None,
                            }
                        });
                        let next = match cursor.elements.get(index + 1) {
                            Some(TripElement::Stop(stop_time)) => {
                                Some(cursor.midnight_ms + stop_time.arrival_ms as i64)
                            }
                            _ => None,
                        };
                        match (previous, next) {
                            (Some(previous_departure_ms), Some(next_arrival_ms)) => {
                                CursorStep::Deviation {
                                    location: location.clone(),
                                    previous_departure_ms,
                                    next_arrival_ms,
                                }
                            }
                            _ => CursorStep::Skip,
                        }
                    }
                }
            }
        };

        match step {
            CursorStep::Approach(target) => {
                let at = target.arrival_ms.max(clock.now() as i64) as u64;
                if let Some(cursor) = car.cursor.as_mut() {
                    cursor.target = Some(target);
                }
                clock.schedule_at(at, TransitEvent::ArriveStop { car: entity });
                return;
            }
            CursorStep::EndOfDay => {
                debug_assert_eq!(car.riding_count(), 0, "riders remain at end of day");
                car.cursor = None;
                start_day(entity, car, clock);
                return;
            }
            CursorStep::Deviation {
                location,
                previous_departure_ms,
                next_arrival_ms,
            } => {
                let attached: Vec<TemporaryStop> = car
                    .users
                    .iter()
                    .flat_map(|user| {
                        [&user.path.pick_up_stop, &user.path.drop_off_stop]
                            .into_iter()
                            .flatten()
                            .filter(|stop| stop.location.location_id == location.location_id)
                            .cloned()
                            .collect::<Vec<_>>()
                    })
                    .collect();
                let stops = deviated_stops(previous_departure_ms, next_arrival_ms, &attached);
                if let Some(cursor) = car.cursor.as_mut() {
                    cursor.pending = stops.into();
                }
            }
            CursorStep::Skip => {}
        }
    }
}

pub fn start_day_system(
    event: Res<CurrentEvent>,
    mut clock: ResMut<TransitClock>,
    mut cars: Query<&mut Car>,
) {
    let TransitEvent::StartDay { car: entity } = event.0 else {
        return;
    };
    let Ok(mut car) = cars.get_mut(entity) else { return };
    start_day(entity, &mut car, &mut clock);
}

pub fn arrive_stop_system(
    event: Res<CurrentEvent>,
    mut clock: ResMut<TransitClock>,
    mut bus: ResMut<EventBus>,
    mut cars: Query<&mut Car>,
) {
    let TransitEvent::ArriveStop { car: entity } = event.0 else {
        return;
    };
    let Ok(mut car) = cars.get_mut(entity) else { return };
    let Some(target) = car.cursor.as_ref().and_then(|cursor| cursor.target.clone()) else {
        return;
    };

    car.stop = Some(target.stop.clone());
    let now_min = clock.now_minutes();
    events::arrived(
        &mut bus,
        now_min,
        &car.mobility_id,
        target.stop.location_payload(),
        None,
    );

    // Drop off riders whose planned destination is this stop.
    let stop = target.stop.clone();
    let leaving: Vec<(String, String)> = car
        .users
        .iter()
        .filter(|user| user.status == UserStatus::Riding && user.path.dst() == stop)
        .map(|user| (user.user_id.clone(), user.demand_id.clone()))
        .collect();
    for (user_id, demand_id) in leaving {
        events::arrived(
            &mut bus,
            now_min,
            &car.mobility_id,
            stop.location_payload(),
            Some((&user_id, &demand_id)),
        );
        car.users.retain(|user| user.user_id != user_id);
    }

    let at = target.departure_ms.max(clock.now() as i64) as u64;
    clock.schedule_at(at, TransitEvent::DepartStop { car: entity });
}

pub fn depart_stop_system(
    event: Res<CurrentEvent>,
    mut clock: ResMut<TransitClock>,
    mut bus: ResMut<EventBus>,
    mut cars: Query<&mut Car>,
) {
    let TransitEvent::DepartStop { car: entity } = event.0 else {
        return;
    };
    let Ok(mut car) = cars.get_mut(entity) else { return };
    let Some(stop) = car.stop.clone() else { return };
    let now_ms = clock.now() as i64;
    let now_min = clock.now_minutes();

    // Board riders waiting at this stop whose planned departure is due.
    let boarding: Vec<(String, String)> = car
        .users
        .iter()
        .filter(|user| {
            user.status == UserStatus::Waiting
                && user.path.org() == stop
                && user.path.departure_ms() <= now_ms
        })
        .map(|user| (user.user_id.clone(), user.demand_id.clone()))
        .collect();
    for (user_id, demand_id) in boarding {
        events::departed(
            &mut bus,
            now_min,
            &car.mobility_id,
            stop.location_payload(),
            Some((&user_id, &demand_id)),
        );
        if let Some(user) = car.users.iter_mut().find(|user| user.user_id == user_id) {
            user.status = UserStatus::Riding;
        }
    }
    debug_assert!(
        car.riding_count() <= car.capacity,
        "capacity over on mobility {}",
        car.mobility_id
    );

    events::departed(
        &mut bus,
        now_min,
        &car.mobility_id,
        stop.location_payload(),
        None,
    );
    car.stop = None;
    advance_cursor(entity, &mut car, &mut clock);
}

pub fn reserve_system(
    event: Res<CurrentEvent>,
    clock: Res<TransitClock>,
    mut bus: ResMut<EventBus>,
    index: Res<StopIndex>,
    registry: Res<CarRegistry>,
    mut cars: Query<&mut Car>,
) {
    let TransitEvent::Reserve(request) = &event.0 else {
        return;
    };
    let now_min = clock.now_minutes();

    let (Some(org), Some(dst)) = (
        index.to_stop_like(&request.org),
        index.to_stop_like(&request.dst),
    ) else {
        warn!(
            user = %request.user_id,
            org = %request.org.location_id,
            dst = %request.dst.location_id,
            "reservation names an unknown stop or deviation location"
        );
        events::reserve_failed(&mut bus, now_min, &request.user_id, &request.demand_id);
        return;
    };

    let dept_ms = ms_from_minutes(request.dept_min) as i64;
    let reference = clock.start();

    // The vehicle arriving earliest wins; setup order breaks ties.
    let mut best: Option<(Entity, crate::trip::Path)> = None;
    for entity in registry.entities() {
        let Ok(car) = cars.get(entity) else { continue };
        if car.holds(&request.user_id) {
            warn!(user = %request.user_id, "user already holds a reservation");
            events::reserve_failed(&mut bus, now_min, &request.user_id, &request.demand_id);
            return;
        }
        if let Some(path) = car.earliest_path(&org, &dst, dept_ms, reference) {
            let is_better = best
                .as_ref()
                .map(|(_, b)| path.arrival_ms() < b.arrival_ms())
                .unwrap_or(true);
            if is_better {
                best = Some((entity, path));
            }
        }
    }

    let Some((entity, path)) = best else {
        events::reserve_failed(&mut bus, now_min, &request.user_id, &request.demand_id);
        return;
    };
    let Ok(mut car) = cars.get_mut(entity) else { return };
    if !car.is_reservable(&path) {
        events::reserve_failed(&mut bus, now_min, &request.user_id, &request.demand_id);
        return;
    }

    let leg = RouteLeg {
        org: path.org().location_payload(),
        dst: path.dst().location_payload(),
        dept: minutes_from_ms_i64(path.departure_ms()),
        arrv: minutes_from_ms_i64(path.arrival_ms()),
        service: None,
    };
    events::reserved(
        &mut bus,
        now_min,
        &request.user_id,
        &request.demand_id,
        &car.mobility_id,
        leg,
    );
    car.users.push(TransitUser {
        user_id: request.user_id.clone(),
        demand_id: request.demand_id.clone(),
        path,
        status: UserStatus::Reserved,
    });
}
