//! Reservation pipeline pieces shared by the reserve system and the
//! `reservable` probe: per-vehicle route solving and candidate scoring.

use crate::evaluation::{evaluate, Evaluated};
use crate::mobility::Car;
use crate::model::{OnDemandConfig, Rider, RiderLedger};
use crate::network::Network;
use crate::solver::{order_to_plan, solve, NodeKind, RouteProblem, VrpNode};
use crate::OnDemandClock;

/// Resolve the vehicle's current operating window in absolute ms.
pub fn car_window(car: &Car, clock: &OnDemandClock) -> Option<(u64, u64)> {
    let now_dt = clock.datetime_now();
    let midnight = clock.elapsed_ms(now_dt.date().and_hms_opt(0, 0, 0)?) as i64;
    car.trip.window(clock.now(), now_dt, midnight)
}

/// Solve a new route for one vehicle with `new_rider` added, and score it.
/// Returns `None` when the vehicle cannot serve the request.
pub fn solve_for_car(
    car: &Car,
    new_rider: &Rider,
    clock: &OnDemandClock,
    network: &Network,
    riders: &RiderLedger,
    config: &OnDemandConfig,
) -> Option<Evaluated> {
    let window = car_window(car, clock)?;

    let depot_stop = if let Some(target) = car.moving_target() {
        target.stop.clone()
    } else {
        car.at.clone()?
    };
    let start_time_ms = if let Some(target) = car.moving_target() {
        target.arrival_ms?
    } else {
        clock.now().max(window.0)
    };

    let mut nodes: Vec<VrpNode> = Vec::new();
    for user_id in &car.passengers {
        let rider = riders.get(user_id)?;
        nodes.push(VrpNode {
            stop: rider.dst.clone(),
            user_id: user_id.clone(),
            kind: NodeKind::DropOff,
            window_start_ms: rider.desired_dept_ms + rider.ideal_duration_ms,
            window_end_ms: rider.desired_dept_ms + rider.ideal_duration_ms + config.max_delay_ms,
            pickup_index: None,
        });
    }
    let not_boarded = car
        .waiting
        .iter()
        .chain(car.reserved.iter())
        .map(|user_id| riders.get(user_id))
        .collect::<Option<Vec<_>>>()?;
    for rider in not_boarded.into_iter().chain(std::iter::once(new_rider)) {
        let pickup_index = nodes.len();
        nodes.push(VrpNode {
            stop: rider.org.clone(),
            user_id: rider.user_id.clone(),
            kind: NodeKind::PickUp,
            window_start_ms: rider.desired_dept_ms,
            window_end_ms: rider.desired_dept_ms + config.max_delay_ms,
            pickup_index: None,
        });
        nodes.push(VrpNode {
            stop: rider.dst.clone(),
            user_id: rider.user_id.clone(),
            kind: NodeKind::DropOff,
            window_start_ms: rider.desired_dept_ms + rider.ideal_duration_ms,
            window_end_ms: rider.desired_dept_ms + rider.ideal_duration_ms + config.max_delay_ms,
            pickup_index: Some(pickup_index),
        });
    }

    if nodes.len() > config.max_route_nodes {
        return None;
    }

    let problem = RouteProblem {
        depot_stop,
        start_time_ms,
        window_end_ms: window.1,
        capacity: car.capacity,
        initial_load: car.passengers.len(),
        nodes,
        network,
    };
    let order = solve(&problem, config.max_expansions)?;
    let plan = order_to_plan(&problem, &order);
    evaluate(
        car,
        plan,
        window,
        clock.now(),
        network,
        riders,
        Some(new_rider),
        config,
    )
}

/// Keep the better of two candidates; ties keep the incumbent so earlier
/// vehicles in setup order win deterministically.
pub fn better<T>(
    incumbent: Option<(T, Evaluated)>,
    challenger: (T, Evaluated),
) -> Option<(T, Evaluated)> {
    match incumbent {
        None => Some(challenger),
        Some(best) if challenger.1.score_ms < best.1.score_ms => Some(challenger),
        Some(best) => Some(best),
    }
}
