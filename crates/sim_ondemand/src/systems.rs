//! Event-driven vehicle behavior: one gated system per clock-event kind.
//!
//! The runner pops the next clock event, stores it as [`CurrentEvent`] and
//! runs the schedule; exactly one system matches each kind. Follow-up work
//! is expressed as new clock events, never as system chaining, so emission
//! order is the clock order.

use bevy_ecs::prelude::{Entity, Query, Res, ResMut, Resource};
use tracing::warn;

use sim_core::clock::{ms_from_minutes, SimulationClock, ONE_DAY_MS};
use sim_core::event::{EventBus, Location, RouteLeg};

use crate::events;
use crate::mobility::{Car, CarRegistry, PlannedStop};
use crate::model::{OnDemandConfig, Rider, RiderLedger, StopRegistry};
use crate::network::Network;
use crate::reservation::{better, car_window, solve_for_car};

pub type OnDemandClock = SimulationClock<OnDemandEvent>;

/// A reservation request queued from `triggered`.
#[derive(Debug, Clone)]
pub struct ReserveRequest {
    pub user_id: String,
    pub demand_id: String,
    pub org: String,
    pub dst: String,
    pub dept_min: f64,
}

#[derive(Debug, Clone)]
pub enum OnDemandEvent {
    Reserve(ReserveRequest),
    /// Begin serving a freshly updated schedule: move toward the first stop
    /// when set, otherwise wait out the scheduled departure where the
    /// vehicle stands. Deferred so a DEPART readiness notice delivered at
    /// the same instant is seen first.
    StartService { car: Entity, move_to: Option<String> },
    WaitExpired { car: Entity, epoch: u64 },
    BoardRound { car: Entity },
    Arrive { car: Entity, stop: String },
    AlightDone { car: Entity },
    ReturnHome { car: Entity, window_end_ms: Option<u64> },
}

#[derive(Debug, Clone, Resource)]
pub struct CurrentEvent(pub OnDemandEvent);

pub fn is_reserve(event: Option<Res<CurrentEvent>>) -> bool {
    event.is_some_and(|e| matches!(e.0, OnDemandEvent::Reserve(_)))
}

pub fn is_start_service(event: Option<Res<CurrentEvent>>) -> bool {
    event.is_some_and(|e| matches!(e.0, OnDemandEvent::StartService { .. }))
}

pub fn is_wait_expired(event: Option<Res<CurrentEvent>>) -> bool {
    event.is_some_and(|e| matches!(e.0, OnDemandEvent::WaitExpired { .. }))
}

pub fn is_board_round(event: Option<Res<CurrentEvent>>) -> bool {
    event.is_some_and(|e| matches!(e.0, OnDemandEvent::BoardRound { .. }))
}

pub fn is_arrive(event: Option<Res<CurrentEvent>>) -> bool {
    event.is_some_and(|e| matches!(e.0, OnDemandEvent::Arrive { .. }))
}

pub fn is_alight_done(event: Option<Res<CurrentEvent>>) -> bool {
    event.is_some_and(|e| matches!(e.0, OnDemandEvent::AlightDone { .. }))
}

pub fn is_return_home(event: Option<Res<CurrentEvent>>) -> bool {
    event.is_some_and(|e| matches!(e.0, OnDemandEvent::ReturnHome { .. }))
}

fn stop_location(stops: &StopRegistry, stop_id: &str) -> Location {
    stops
        .location(stop_id)
        .unwrap_or_else(|| Location::new(stop_id.to_owned(), 0.0, 0.0))
}

/// Begin servicing the current schedule entry at the vehicle's stop: wait
/// until the latest desired departure of its boarding users, then board.
fn start_departure(
    entity: Entity,
    car: &mut Car,
    clock: &mut OnDemandClock,
    bus: &mut EventBus,
    riders: &RiderLedger,
    stops: &StopRegistry,
    network: &Network,
    config: &OnDemandConfig,
) {
    car.wait_epoch += 1;
    let epoch = car.wait_epoch;
    let latest = car
        .schedule
        .current
        .as_ref()
        .map(|current| {
            current
                .board
                .iter()
                .filter_map(|user_id| riders.get(user_id))
                .map(|rider| rider.desired_dept_ms)
                .max()
        })
        .unwrap_or(None);

    if let Some(latest) = latest {
        if clock.now() < latest {
            car.waiting_for_scheduled = true;
            clock.schedule_at(latest, OnDemandEvent::WaitExpired { car: entity, epoch });
            return;
        }
    }
    board_round(entity, car, clock, bus, riders, stops, network, config);
}

/// Board every waiting user of the current entry, then either wait out the
/// boarding time or move off to the next stop.
#[allow(clippy::too_many_arguments)]
fn board_round(
    entity: Entity,
    car: &mut Car,
    clock: &mut OnDemandClock,
    bus: &mut EventBus,
    riders: &RiderLedger,
    stops: &StopRegistry,
    network: &Network,
    config: &OnDemandConfig,
) {
    loop {
        let boarding: Vec<String> = car
            .schedule
            .current
            .as_ref()
            .map(|current| {
                current
                    .board
                    .iter()
                    .filter(|user_id| car.waiting.iter().any(|w| &w == user_id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if boarding.is_empty() {
            depart_next(entity, car, clock, bus, riders, stops, network, config);
            return;
        }

        let now_min = clock.now_minutes();
        for user_id in boarding {
            let demand_id = riders
                .get(&user_id)
                .map(|rider| rider.demand_id.clone())
                .unwrap_or_default();
            if let Some(at) = &car.at {
                events::departed(
                    bus,
                    now_min,
                    &car.mobility_id,
                    stop_location(stops, at),
                    Some((&user_id, &demand_id)),
                );
            }
            if let Some(index) = car.waiting.iter().position(|w| w == &user_id) {
                car.waiting.remove(index);
            }
            car.passengers.push(user_id);
        }
        debug_assert!(
            car.passengers.len() <= car.capacity,
            "capacity over on mobility {}",
            car.mobility_id
        );

        if config.board_time_ms > 0 {
            clock.schedule_in(config.board_time_ms, OnDemandEvent::BoardRound { car: entity });
            return;
        }
        // Zero boarding time: users that became ready at this very instant
        // board in the same pass.
    }
}

/// Advance the schedule and move toward the new current stop.
#[allow(clippy::too_many_arguments)]
fn depart_next(
    entity: Entity,
    car: &mut Car,
    clock: &mut OnDemandClock,
    bus: &mut EventBus,
    riders: &RiderLedger,
    stops: &StopRegistry,
    network: &Network,
    config: &OnDemandConfig,
) {
    match car.schedule.pop().map(|next| next.stop.clone()) {
        Some(to) => begin_move(entity, car, to, clock, bus, stops, network),
        None => terminal_check(entity, car, clock, bus, riders, stops, network, config),
    }
}

/// Emit the vehicle departure and schedule the arrival. A move without a
/// schedule entry (return to home) synthesizes a bare waypoint.
fn begin_move(
    entity: Entity,
    car: &mut Car,
    to: String,
    clock: &mut OnDemandClock,
    bus: &mut EventBus,
    stops: &StopRegistry,
    network: &Network,
) {
    let Some(from) = car.at.clone() else {
        warn!(mobility = %car.mobility_id, "move requested while already in transit");
        return;
    };
    let Some(duration) = network.duration_ms(&from, &to) else {
        warn!(mobility = %car.mobility_id, %from, %to, "no network edge for move");
        return;
    };
    if car.schedule.current.is_none() {
        car.schedule.current = Some(PlannedStop {
            stop: to.clone(),
            arrival_ms: Some(clock.now() + duration),
            departure_ms: None,
            board: Vec::new(),
            alight: Vec::new(),
        });
    }
    events::departed(
        bus,
        clock.now_minutes(),
        &car.mobility_id,
        stop_location(stops, &from),
        None,
    );
    car.at = None;
    clock.schedule_in(duration, OnDemandEvent::Arrive { car: entity, stop: to });
}

/// Drop off every passenger whose destination is the current stop.
fn do_alight(
    car: &mut Car,
    clock: &OnDemandClock,
    bus: &mut EventBus,
    riders: &mut RiderLedger,
    stops: &StopRegistry,
) {
    let Some(at) = car.at.clone() else { return };
    let alighting: Vec<String> = car
        .passengers
        .iter()
        .filter(|user_id| {
            riders
                .get(user_id)
                .is_some_and(|rider| rider.dst == at)
        })
        .cloned()
        .collect();
    let now_min = clock.now_minutes();
    for user_id in alighting {
        if let Some(index) = car.passengers.iter().position(|p| p == &user_id) {
            car.passengers.remove(index);
        }
        let demand_id = riders
            .remove(&user_id)
            .map(|rider| rider.demand_id)
            .unwrap_or_default();
        events::arrived(
            bus,
            now_min,
            &car.mobility_id,
            stop_location(stops, &at),
            Some((&user_id, &demand_id)),
        );
    }
}

/// After alighting: continue the schedule, or go quiet and — past the window
/// end — head back to the home stop.
#[allow(clippy::too_many_arguments)]
fn post_arrival(
    entity: Entity,
    car: &mut Car,
    clock: &mut OnDemandClock,
    bus: &mut EventBus,
    riders: &RiderLedger,
    stops: &StopRegistry,
    network: &Network,
    config: &OnDemandConfig,
) {
    car.last_arrival_ms = clock.now();
    if car.schedule.has_future() {
        start_departure(entity, car, clock, bus, riders, stops, network, config);
    } else {
        terminal_check(entity, car, clock, bus, riders, stops, network, config);
    }
}

#[allow(clippy::too_many_arguments)]
fn terminal_check(
    entity: Entity,
    car: &mut Car,
    clock: &mut OnDemandClock,
    bus: &mut EventBus,
    _riders: &RiderLedger,
    stops: &StopRegistry,
    network: &Network,
    _config: &OnDemandConfig,
) {
    car.schedule.current = None;
    debug_assert!(car.passengers.is_empty(), "passengers remain at schedule end");
    debug_assert!(car.waiting.is_empty(), "waiting users remain at schedule end");
    let past_window = match car_window(car, clock) {
        Some((_, end)) => end < clock.now(),
        None => true,
    };
    if past_window {
        move_home_if_idle(entity, car, clock, bus, stops, network);
    }
}

fn move_home_if_idle(
    entity: Entity,
    car: &mut Car,
    clock: &mut OnDemandClock,
    bus: &mut EventBus,
    stops: &StopRegistry,
    network: &Network,
) {
    if car.at.is_none()
        || car.schedule.has_future()
        || car.waiting_for_scheduled
        || !car.passengers.is_empty()
    {
        return;
    }
    if car.at.as_deref() != Some(car.home_stop.as_str()) {
        let home = car.home_stop.clone();
        begin_move(entity, car, home, clock, bus, stops, network);
    }
}

// ---------------------------------------------------------------------------
// Systems
// ---------------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
pub fn reservation_system(
    event: Res<CurrentEvent>,
    mut clock: ResMut<OnDemandClock>,
    mut bus: ResMut<EventBus>,
    mut riders: ResMut<RiderLedger>,
    network: Res<Network>,
    stops: Res<StopRegistry>,
    config: Res<OnDemandConfig>,
    registry: Res<CarRegistry>,
    mut cars: Query<&mut Car>,
) {
    let OnDemandEvent::Reserve(request) = &event.0 else {
        return;
    };
    let now_min = clock.now_minutes();

    let (Some(org), Some(dst)) = (stops.get(&request.org), stops.get(&request.dst)) else {
        warn!(
            user = %request.user_id,
            org = %request.org,
            dst = %request.dst,
            "reservation names an unknown stop"
        );
        events::reserve_failed(&mut bus, now_min, &request.user_id, &request.demand_id);
        return;
    };
    let Some(direct_ms) = network.duration_ms(&org.stop_id, &dst.stop_id) else {
        warn!(org = %org.stop_id, dst = %dst.stop_id, "stops are not connected");
        events::reserve_failed(&mut bus, now_min, &request.user_id, &request.demand_id);
        return;
    };

    let rider = Rider {
        user_id: request.user_id.clone(),
        demand_id: request.demand_id.clone(),
        org: org.stop_id.clone(),
        dst: dst.stop_id.clone(),
        desired_dept_ms: ms_from_minutes(request.dept_min),
        ideal_duration_ms: direct_ms + 2 * config.board_time_ms,
    };

    let mut best = None;
    for entity in registry.entities() {
        let Ok(car) = cars.get(entity) else { continue };
        if car.holds(&rider.user_id) {
            warn!(user = %rider.user_id, mobility = %car.mobility_id, "user already reserved");
            events::reserve_failed(&mut bus, now_min, &request.user_id, &request.demand_id);
            return;
        }
        if let Some(evaluated) = solve_for_car(car, &rider, &clock, &network, &riders, &config) {
            best = better(best, (entity, evaluated));
        }
    }

    let Some((winner, evaluated)) = best else {
        events::reserve_failed(&mut bus, now_min, &request.user_id, &request.demand_id);
        return;
    };

    // Emit the confirmation before mutating the vehicle, one route leg per
    // boarding → alighting pair.
    let mobility_id = cars
        .get(winner)
        .map(|car| car.mobility_id.clone())
        .unwrap_or_default();
    let mut legs: Vec<RouteLeg> = Vec::new();
    let mut boarding_departure: Option<u64> = None;
    for entry in &evaluated.stop_times {
        if entry.board.iter().any(|u| u == &rider.user_id) {
            boarding_departure = entry.departure_ms;
        }
        if entry.alight.iter().any(|u| u == &rider.user_id) {
            let (Some(dept), Some(arrv)) = (boarding_departure, entry.arrival_ms) else {
                continue;
            };
            legs.push(RouteLeg {
                org: org.location(),
                dst: dst.location(),
                dept: sim_core::minutes_from_ms(dept),
                arrv: sim_core::minutes_from_ms(arrv),
                service: None,
            });
        }
    }
    events::reserved(
        &mut bus,
        now_min,
        &rider.user_id,
        &rider.demand_id,
        &mobility_id,
        legs,
    );

    riders.insert(rider.clone());
    let Ok(mut car) = cars.get_mut(winner) else { return };
    let was_idle = car.schedule.current.is_none();
    let was_waiting = car.waiting_for_scheduled;
    let next_stop = evaluated
        .stop_times
        .first()
        .map(|entry| entry.stop.clone())
        .unwrap_or_default();

    car.schedule.update(evaluated.stop_times);
    car.reserved.push(rider.user_id.clone());

    if was_idle || was_waiting {
        if was_waiting {
            car.wait_epoch += 1;
            car.waiting_for_scheduled = false;
        }
        // Deferred: the rider's readiness notice may arrive at this very
        // instant and must be processed before the vehicle acts.
        let move_to =
            (car.at.as_deref() != Some(next_stop.as_str())).then_some(next_stop);
        let now = clock.now();
        clock.schedule_at(now, OnDemandEvent::StartService { car: winner, move_to });
    }
}

#[allow(clippy::too_many_arguments)]
pub fn start_service_system(
    event: Res<CurrentEvent>,
    mut clock: ResMut<OnDemandClock>,
    mut bus: ResMut<EventBus>,
    riders: Res<RiderLedger>,
    network: Res<Network>,
    stops: Res<StopRegistry>,
    config: Res<OnDemandConfig>,
    mut cars: Query<&mut Car>,
) {
    let OnDemandEvent::StartService { car: entity, ref move_to } = event.0 else {
        return;
    };
    let Ok(mut car) = cars.get_mut(entity) else { return };
    match move_to {
        Some(to) => begin_move(
            entity,
            &mut car,
            to.clone(),
            &mut clock,
            &mut bus,
            &stops,
            &network,
        ),
        None => start_departure(
            entity, &mut car, &mut clock, &mut bus, &riders, &stops, &network, &config,
        ),
    }
}

#[allow(clippy::too_many_arguments)]
pub fn wait_expired_system(
    event: Res<CurrentEvent>,
    mut clock: ResMut<OnDemandClock>,
    mut bus: ResMut<EventBus>,
    riders: Res<RiderLedger>,
    network: Res<Network>,
    stops: Res<StopRegistry>,
    config: Res<OnDemandConfig>,
    mut cars: Query<&mut Car>,
) {
    let OnDemandEvent::WaitExpired { car: entity, epoch } = event.0 else {
        return;
    };
    let Ok(mut car) = cars.get_mut(entity) else { return };
    if !car.waiting_for_scheduled || car.wait_epoch != epoch {
        return; // interrupted by a newer reservation
    }
    car.waiting_for_scheduled = false;
    board_round(
        entity, &mut car, &mut clock, &mut bus, &riders, &stops, &network, &config,
    );
}

#[allow(clippy::too_many_arguments)]
pub fn board_round_system(
    event: Res<CurrentEvent>,
    mut clock: ResMut<OnDemandClock>,
    mut bus: ResMut<EventBus>,
    riders: Res<RiderLedger>,
    network: Res<Network>,
    stops: Res<StopRegistry>,
    config: Res<OnDemandConfig>,
    mut cars: Query<&mut Car>,
) {
    let OnDemandEvent::BoardRound { car: entity } = event.0 else {
        return;
    };
    let Ok(mut car) = cars.get_mut(entity) else { return };
    board_round(
        entity, &mut car, &mut clock, &mut bus, &riders, &stops, &network, &config,
    );
}

#[allow(clippy::too_many_arguments)]
pub fn arrive_system(
    event: Res<CurrentEvent>,
    mut clock: ResMut<OnDemandClock>,
    mut bus: ResMut<EventBus>,
    mut riders: ResMut<RiderLedger>,
    network: Res<Network>,
    stops: Res<StopRegistry>,
    config: Res<OnDemandConfig>,
    mut cars: Query<&mut Car>,
) {
    let OnDemandEvent::Arrive { car: entity, ref stop } = event.0 else {
        return;
    };
    let Ok(mut car) = cars.get_mut(entity) else { return };
    car.at = Some(stop.clone());
    events::arrived(
        &mut bus,
        clock.now_minutes(),
        &car.mobility_id,
        stops
            .location(stop)
            .unwrap_or_else(|| Location::new(stop.clone(), 0.0, 0.0)),
        None,
    );

    let has_alighting = car.passengers.iter().any(|user_id| {
        riders
            .get(user_id)
            .is_some_and(|rider| &rider.dst == stop)
    });
    if has_alighting && config.board_time_ms > 0 {
        clock.schedule_in(config.board_time_ms, OnDemandEvent::AlightDone { car: entity });
        return;
    }
    if has_alighting {
        do_alight(&mut car, &clock, &mut bus, &mut riders, &stops);
    }
    post_arrival(
        entity, &mut car, &mut clock, &mut bus, &riders, &stops, &network, &config,
    );
}

#[allow(clippy::too_many_arguments)]
pub fn alight_done_system(
    event: Res<CurrentEvent>,
    mut clock: ResMut<OnDemandClock>,
    mut bus: ResMut<EventBus>,
    mut riders: ResMut<RiderLedger>,
    network: Res<Network>,
    stops: Res<StopRegistry>,
    config: Res<OnDemandConfig>,
    mut cars: Query<&mut Car>,
) {
    let OnDemandEvent::AlightDone { car: entity } = event.0 else {
        return;
    };
    let Ok(mut car) = cars.get_mut(entity) else { return };
    do_alight(&mut car, &clock, &mut bus, &mut riders, &stops);
    post_arrival(
        entity, &mut car, &mut clock, &mut bus, &riders, &stops, &network, &config,
    );
}

pub fn return_home_system(
    event: Res<CurrentEvent>,
    mut clock: ResMut<OnDemandClock>,
    mut bus: ResMut<EventBus>,
    network: Res<Network>,
    stops: Res<StopRegistry>,
    mut cars: Query<&mut Car>,
) {
    let OnDemandEvent::ReturnHome { car: entity, window_end_ms } = event.0 else {
        return;
    };
    if let Some(end) = window_end_ms {
        // Next opportunity to head home: same time tomorrow.
        let next = end + ONE_DAY_MS;
        let now = clock.now();
        clock.schedule_at(
            next.max(now),
            OnDemandEvent::ReturnHome {
                car: entity,
                window_end_ms: Some(next),
            },
        );
    }
    let Ok(mut car) = cars.get_mut(entity) else { return };
    move_home_if_idle(entity, &mut car, &mut clock, &mut bus, &stops, &network);
}
