//! Candidate route evaluation: forward-simulate a plan on a vehicle and
//! score it by the mean delay of all alighting users.

use sim_core::clock::ONE_DAY_MS;

use crate::mobility::{Car, PlannedStop};
use crate::model::{OnDemandConfig, RiderLedger};
use crate::network::Network;

/// A timed candidate plan for one vehicle and its score in ms. Plans whose
/// final arrival overruns the service window score a full day.
#[derive(Debug, Clone)]
pub struct Evaluated {
    pub stop_times: Vec<PlannedStop>,
    pub score_ms: f64,
}

/// Fill in arrival/departure times for `plan` and score it. `window` is the
/// vehicle's resolved operating window; the caller guarantees it exists
/// because the solver already required one.
pub fn evaluate(
    car: &Car,
    plan: Vec<PlannedStop>,
    window: (u64, u64),
    now_ms: u64,
    network: &Network,
    riders: &RiderLedger,
    new_rider: Option<&crate::model::Rider>,
    config: &OnDemandConfig,
) -> Option<Evaluated> {
    let (start_window, end_window) = window;
    let board = config.board_time_ms;

    let desired_dept = |user_id: &str| -> Option<u64> {
        if let Some(new) = new_rider {
            if new.user_id == user_id {
                return Some(new.desired_dept_ms);
            }
        }
        riders.get(user_id).map(|r| r.desired_dept_ms)
    };
    let ideal_duration = |user_id: &str| -> Option<u64> {
        if let Some(new) = new_rider {
            if new.user_id == user_id {
                return Some(new.ideal_duration_ms);
            }
        }
        riders.get(user_id).map(|r| r.ideal_duration_ms)
    };

    // Seed from the in-transit arrival, or from the current stop at now
    // (waiting for the window to open when necessary).
    let (mut prev_stop, mut prev_departure) = if let Some(target) = car.moving_target() {
        (target.stop.clone(), target.arrival_ms?)
    } else {
        let at = car.at.clone()?;
        (at, now_ms.max(start_window))
    };

    let mut timed = Vec::with_capacity(plan.len());
    for mut entry in plan {
        let travel = network.duration_ms(&prev_stop, &entry.stop)?;
        let arrival = prev_departure + travel;
        let mut departure = arrival
            + board * u64::from(!entry.alight.is_empty())
            + board * u64::from(!entry.board.is_empty());
        for user_id in &entry.board {
            departure = departure.max(desired_dept(user_id)? + board);
        }
        entry.arrival_ms = Some(arrival);
        entry.departure_ms = Some(departure);
        prev_stop = entry.stop.clone();
        prev_departure = departure;
        timed.push(entry);
    }

    let final_arrival = timed.last().and_then(|entry| entry.arrival_ms)?;
    let score_ms = if final_arrival <= end_window {
        let mut delays: Vec<i64> = Vec::new();
        for entry in &timed {
            let arrival = entry.arrival_ms? as i64;
            for user_id in &entry.alight {
                let desired = desired_dept(user_id)? as i64;
                let ideal = ideal_duration(user_id)? as i64;
                delays.push(arrival - desired - ideal + board as i64);
            }
        }
        if delays.is_empty() {
            ONE_DAY_MS as f64
        } else {
            delays.iter().sum::<i64>() as f64 / delays.len() as f64
        }
    } else {
        ONE_DAY_MS as f64
    };

    Some(Evaluated {
        stop_times: timed,
        score_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FlexTrip, Group, Rider};
    use sim_core::calendar::Service;
    use sim_core::clock::{ONE_HOUR_MS, ONE_MIN_MS};

    fn minutes(m: u64) -> u64 {
        m * ONE_MIN_MS
    }

    fn make_car(at: &str) -> Car {
        let trip = FlexTrip {
            service: Service::daily(
                chrono::NaiveDate::from_ymd_opt(2024, 4, 1).unwrap(),
                chrono::NaiveDate::from_ymd_opt(2024, 4, 7).unwrap(),
            ),
            group: Group {
                group_id: "g".into(),
                name: "g".into(),
                stop_ids: vec!["Stop1".into(), "Stop2".into(), "Stop3".into()],
            },
            start_window_ms: ONE_HOUR_MS,
            end_window_ms: 23 * ONE_HOUR_MS,
        };
        Car::new("trip".into(), 2, trip, at.to_string())
    }

    fn plan_entry(stop: &str, board: &[&str], alight: &[&str]) -> PlannedStop {
        PlannedStop {
            stop: stop.into(),
            arrival_ms: None,
            departure_ms: None,
            board: board.iter().map(|s| s.to_string()).collect(),
            alight: alight.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn departure_waits_for_desired_departure_time() {
        let mut network = Network::new();
        network.add_edge("Stop1", "Stop2", 30.0, true);
        let riders = RiderLedger::default();
        let new_rider = Rider {
            user_id: "User1".into(),
            demand_id: "DemandA".into(),
            org: "Stop1".into(),
            dst: "Stop2".into(),
            desired_dept_ms: minutes(490),
            ideal_duration_ms: minutes(30),
        };
        let car = make_car("Stop1");
        let config = OnDemandConfig::default();

        let evaluated = evaluate(
            &car,
            vec![
                plan_entry("Stop1", &["User1"], &[]),
                plan_entry("Stop2", &[], &["User1"]),
            ],
            (minutes(60), minutes(1380)),
            minutes(480),
            &network,
            &riders,
            Some(&new_rider),
            &config,
        )
        .expect("evaluated");

        assert_eq!(evaluated.stop_times[0].departure_ms, Some(minutes(490)));
        assert_eq!(evaluated.stop_times[1].arrival_ms, Some(minutes(520)));
        assert_eq!(evaluated.score_ms, 0.0);
    }

    #[test]
    fn window_overrun_scores_a_full_day() {
        let mut network = Network::new();
        network.add_edge("Stop1", "Stop2", 30.0, true);
        let riders = RiderLedger::default();
        let new_rider = Rider {
            user_id: "User1".into(),
            demand_id: "DemandA".into(),
            org: "Stop1".into(),
            dst: "Stop2".into(),
            desired_dept_ms: minutes(490),
            ideal_duration_ms: minutes(30),
        };
        let car = make_car("Stop1");
        let config = OnDemandConfig::default();

        let evaluated = evaluate(
            &car,
            vec![
                plan_entry("Stop1", &["User1"], &[]),
                plan_entry("Stop2", &[], &["User1"]),
            ],
            (minutes(60), minutes(500)),
            minutes(480),
            &network,
            &riders,
            Some(&new_rider),
            &config,
        )
        .expect("evaluated");

        assert_eq!(evaluated.score_ms, ONE_DAY_MS as f64);
    }
}
