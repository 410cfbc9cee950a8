//! End-to-end scenarios for the on-demand simulator: one vehicle serving a
//! three-stop triangle inside a [60, 1380] minute window.

use chrono::NaiveDate;
use std::collections::HashMap;

use sim_core::calendar::Service;
use sim_core::clock::ONE_MIN_MS;
use sim_core::event::{DepartedArrivedDetails, Event, EventType, ReservedDetails};
use sim_ondemand::model::{FlexTrip, Group, Stop};
use sim_ondemand::network::Network;
use sim_ondemand::{CarConfig, Simulation, SimulationConfig};

fn start_date() -> NaiveDate {
    // A Monday.
    NaiveDate::from_ymd_opt(2024, 4, 1).unwrap()
}

fn stop(stop_id: &str, lat: f64, lng: f64) -> Stop {
    Stop {
        stop_id: stop_id.into(),
        name: stop_id.into(),
        lat,
        lng,
    }
}

fn scenario(capacity: usize) -> Simulation {
    let mut network = Network::new();
    network.add_edge("Stop1", "Stop2", 30.0, true);
    network.add_edge("Stop1", "Stop3", 15.0, true);
    network.add_edge("Stop2", "Stop3", 20.0, true);

    let service = Service::daily(start_date(), start_date().succ_opt().unwrap());
    let trip = FlexTrip {
        service,
        group: Group {
            group_id: "group".into(),
            name: "group".into(),
            stop_ids: vec!["Stop1".into(), "Stop2".into(), "Stop3".into()],
        },
        start_window_ms: 60 * ONE_MIN_MS,
        end_window_ms: 1380 * ONE_MIN_MS,
    };

    let config = SimulationConfig {
        start_date: start_date(),
        network,
        stops: vec![
            stop("Stop1", 36.695, 137.220),
            stop("Stop2", 36.696, 137.227),
            stop("Stop3", 36.690, 137.231),
        ],
        board_time_min: 0.0,
        max_delay_min: 30.0,
        trips: HashMap::from([("trip".to_string(), trip)]),
        cars: vec![CarConfig {
            mobility_id: "trip".into(),
            capacity,
            trip_id: "trip".into(),
            home_stop: "Stop1".into(),
        }],
        max_calculation_seconds: 30,
        max_calculation_stop_times_length: 10,
    };
    let mut sim = Simulation::new(config).expect("simulation");
    sim.start();
    sim
}

fn run(sim: &mut Simulation, until: f64) -> Vec<Event> {
    let mut events = Vec::new();
    while sim.peek().is_some_and(|next| next < until) {
        let (_, step_events) = sim.step();
        events.extend(step_events);
        assert!(sim.capacity_respected());
    }
    sim.advance_to(until);
    events
}

fn reserved(event: &Event) -> ReservedDetails {
    assert_eq!(event.event_type, EventType::Reserved);
    event.details_as().expect("reserved details")
}

fn departed_arrived(event: &Event) -> DepartedArrivedDetails {
    let details: DepartedArrivedDetails = event.details_as().expect("details");
    details.check_identity().expect("paired identity");
    details
}

fn assert_vehicle_event(event: &Event, event_type: EventType, time: f64, location: &str) {
    assert_eq!(event.event_type, event_type);
    assert_eq!(event.time, time);
    let details = departed_arrived(event);
    assert_eq!(details.user_id, None);
    assert_eq!(details.location.location_id, location);
}

fn assert_user_event(event: &Event, event_type: EventType, time: f64, user: &str, location: &str) {
    assert_eq!(event.event_type, event_type);
    assert_eq!(event.time, time);
    let details = departed_arrived(event);
    assert_eq!(details.user_id.as_deref(), Some(user));
    assert_eq!(details.location.location_id, location);
}

#[test]
fn no_operation_without_reservations() {
    let mut sim = scenario(2);
    let events = run(&mut sim, 24.0 * 60.0);
    assert!(events.is_empty(), "unexpected events: {events:?}");
}

#[test]
fn step_at_quiescence_is_a_noop() {
    // A vehicle whose trip never operates schedules a single home-return
    // probe and then goes quiet.
    let mut network = Network::new();
    network.add_edge("Stop1", "Stop2", 30.0, true);
    let trip = FlexTrip {
        service: Service::new(start_date(), start_date().succ_opt().unwrap(), [false; 7]),
        group: Group {
            group_id: "group".into(),
            name: "group".into(),
            stop_ids: vec!["Stop1".into(), "Stop2".into()],
        },
        start_window_ms: 60 * ONE_MIN_MS,
        end_window_ms: 1380 * ONE_MIN_MS,
    };
    let config = SimulationConfig {
        start_date: start_date(),
        network,
        stops: vec![stop("Stop1", 36.695, 137.220), stop("Stop2", 36.696, 137.227)],
        board_time_min: 0.0,
        max_delay_min: 30.0,
        trips: HashMap::from([("trip".to_string(), trip)]),
        cars: vec![CarConfig {
            mobility_id: "trip".into(),
            capacity: 2,
            trip_id: "trip".into(),
            home_stop: "Stop1".into(),
        }],
        max_calculation_seconds: 30,
        max_calculation_stop_times_length: 10,
    };
    let mut sim = Simulation::new(config).expect("simulation");
    sim.start();

    while sim.peek().is_some() {
        let (_, events) = sim.step();
        assert!(events.is_empty());
    }
    let now = sim.now_minutes();
    let (after, events) = sim.step();
    assert_eq!(after, now);
    assert!(events.is_empty());
}

#[test]
fn single_user_lifetime() {
    let mut sim = scenario(2);
    run(&mut sim, 480.0);

    sim.reserve_user("User1", "DemandA", "Stop1", "Stop2", 490.0);
    let events = run(&mut sim, 480.1);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].time, 480.0);
    let details = reserved(&events[0]);
    assert!(details.success);
    assert_eq!(details.user_id, "User1");
    assert_eq!(details.demand_id, "DemandA");
    assert_eq!(details.mobility_id.as_deref(), Some("trip"));
    assert_eq!(details.route.len(), 1);
    let leg = &details.route[0];
    assert_eq!(leg.org.location_id, "Stop1");
    assert_eq!(leg.dst.location_id, "Stop2");
    assert_eq!((leg.dept, leg.arrv), (490.0, 520.0));

    sim.ready_to_depart("User1");
    let events = run(&mut sim, 1440.0);
    assert_eq!(events.len(), 6, "events: {events:?}");
    assert_user_event(&events[0], EventType::Departed, 490.0, "User1", "Stop1");
    assert_vehicle_event(&events[1], EventType::Departed, 490.0, "Stop1");
    assert_vehicle_event(&events[2], EventType::Arrived, 520.0, "Stop2");
    assert_user_event(&events[3], EventType::Arrived, 520.0, "User1", "Stop2");
    // End of window: the vehicle heads back to its home stop.
    assert_vehicle_event(&events[4], EventType::Departed, 1380.0, "Stop2");
    assert_vehicle_event(&events[5], EventType::Arrived, 1410.0, "Stop1");
}

#[test]
fn pooled_reservations_share_the_vehicle() {
    let mut sim = scenario(2);
    run(&mut sim, 480.0);

    sim.reserve_user("User1", "DemandA", "Stop1", "Stop2", 490.0);
    let events = run(&mut sim, 481.0);
    assert!(reserved(&events[0]).success);

    sim.reserve_user("User2", "DemandB", "Stop3", "Stop2", 510.0);
    let events = run(&mut sim, 482.0);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].time, 481.0);
    let details = reserved(&events[0]);
    assert!(details.success);
    let leg = &details.route[0];
    assert_eq!(leg.org.location_id, "Stop3");
    assert_eq!(leg.dst.location_id, "Stop2");
    assert_eq!((leg.dept, leg.arrv), (510.0, 530.0));

    sim.ready_to_depart("User1");
    sim.ready_to_depart("User2");
    let events = run(&mut sim, 1000.0);
    assert_eq!(events.len(), 8, "events: {events:?}");
    assert_user_event(&events[0], EventType::Departed, 490.0, "User1", "Stop1");
    assert_vehicle_event(&events[1], EventType::Departed, 490.0, "Stop1");
    assert_vehicle_event(&events[2], EventType::Arrived, 505.0, "Stop3");
    assert_user_event(&events[3], EventType::Departed, 510.0, "User2", "Stop3");
    assert_vehicle_event(&events[4], EventType::Departed, 510.0, "Stop3");
    assert_vehicle_event(&events[5], EventType::Arrived, 530.0, "Stop2");
    assert_user_event(&events[6], EventType::Arrived, 530.0, "User1", "Stop2");
    assert_user_event(&events[7], EventType::Arrived, 530.0, "User2", "Stop2");
}

#[test]
fn reservation_while_vehicle_is_moving_seeds_from_arrival_stop() {
    let mut sim = scenario(2);
    run(&mut sim, 480.0);

    sim.reserve_user("User1", "DemandA", "Stop1", "Stop2", 490.0);
    run(&mut sim, 481.0);
    sim.ready_to_depart("User1");
    // The vehicle departs Stop1 at 490 and is en route at 500.
    run(&mut sim, 500.0);

    sim.reserve_user("User2", "DemandB", "Stop2", "Stop1", 510.0);
    let events = run(&mut sim, 501.0);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].time, 500.0);
    let details = reserved(&events[0]);
    assert!(details.success);
    let leg = &details.route[0];
    assert_eq!(leg.org.location_id, "Stop2");
    assert_eq!(leg.dst.location_id, "Stop1");
    assert_eq!((leg.dept, leg.arrv), (520.0, 550.0));

    sim.ready_to_depart("User2");
    let events = run(&mut sim, 600.0);
    assert_eq!(events.len(), 6, "events: {events:?}");
    assert_vehicle_event(&events[0], EventType::Arrived, 520.0, "Stop2");
    assert_user_event(&events[1], EventType::Arrived, 520.0, "User1", "Stop2");
    assert_user_event(&events[2], EventType::Departed, 520.0, "User2", "Stop2");
    assert_vehicle_event(&events[3], EventType::Departed, 520.0, "Stop2");
    assert_vehicle_event(&events[4], EventType::Arrived, 550.0, "Stop1");
    assert_user_event(&events[5], EventType::Arrived, 550.0, "User2", "Stop1");
}

#[test]
fn capacity_exhaustion_rejects_the_extra_reservation() {
    let mut sim = scenario(2);
    run(&mut sim, 480.0);

    sim.reserve_user("User1", "D1", "Stop1", "Stop2", 490.0);
    sim.reserve_user("User2", "D2", "Stop1", "Stop2", 490.0);
    sim.reserve_user("User3", "D3", "Stop1", "Stop2", 490.0);
    let events = run(&mut sim, 481.0);
    assert_eq!(events.len(), 3);
    assert!(reserved(&events[0]).success);
    assert!(reserved(&events[1]).success);
    let third = reserved(&events[2]);
    assert!(!third.success, "third rider must not fit: {third:?}");
    assert_eq!(third.user_id, "User3");
    assert!(third.route.is_empty());
}

#[test]
fn request_too_close_to_window_end_is_rejected() {
    let mut sim = scenario(2);
    run(&mut sim, 1370.0);
    // Delivery cannot happen before the service window closes at 1380.
    sim.reserve_user("User1", "DemandA", "Stop1", "Stop2", 1375.0);
    let events = run(&mut sim, 1376.0);
    assert_eq!(events.len(), 1);
    assert!(!reserved(&events[0]).success);
}

#[test]
fn boarding_time_delays_departure_and_alighting() {
    let mut network = Network::new();
    network.add_edge("Stop1", "Stop2", 30.0, true);
    network.add_edge("Stop1", "Stop3", 15.0, true);
    network.add_edge("Stop2", "Stop3", 20.0, true);
    let service = Service::daily(start_date(), start_date().succ_opt().unwrap());
    let trip = FlexTrip {
        service,
        group: Group {
            group_id: "group".into(),
            name: "group".into(),
            stop_ids: vec!["Stop1".into(), "Stop2".into(), "Stop3".into()],
        },
        start_window_ms: 60 * ONE_MIN_MS,
        end_window_ms: 1380 * ONE_MIN_MS,
    };
    let config = SimulationConfig {
        start_date: start_date(),
        network,
        stops: vec![
            stop("Stop1", 36.695, 137.220),
            stop("Stop2", 36.696, 137.227),
            stop("Stop3", 36.690, 137.231),
        ],
        board_time_min: 1.0,
        max_delay_min: 30.0,
        trips: HashMap::from([("trip".to_string(), trip)]),
        cars: vec![CarConfig {
            mobility_id: "trip".into(),
            capacity: 2,
            trip_id: "trip".into(),
            home_stop: "Stop1".into(),
        }],
        max_calculation_seconds: 30,
        max_calculation_stop_times_length: 10,
    };
    let mut sim = Simulation::new(config).expect("simulation");
    sim.start();

    run(&mut sim, 480.0);
    sim.reserve_user("User1", "DemandA", "Stop1", "Stop2", 490.0);
    let events = run(&mut sim, 481.0);
    let details = reserved(&events[0]);
    assert!(details.success);
    // One boarding minute before departure, arrival excludes the alighting
    // minute.
    assert_eq!((details.route[0].dept, details.route[0].arrv), (491.0, 521.0));

    sim.ready_to_depart("User1");
    let events = run(&mut sim, 600.0);
    assert_user_event(&events[0], EventType::Departed, 490.0, "User1", "Stop1");
    assert_vehicle_event(&events[1], EventType::Departed, 491.0, "Stop1");
    assert_vehicle_event(&events[2], EventType::Arrived, 521.0, "Stop2");
    assert_user_event(&events[3], EventType::Arrived, 522.0, "User1", "Stop2");
}

#[test]
fn reservable_probe_does_not_mutate() {
    let mut sim = scenario(2);
    run(&mut sim, 480.0);
    assert!(sim.reservable("Stop1", "Stop2", Some(490.0)));
    assert!(!sim.reservable("Stop1", "Nowhere", Some(490.0)));
    // The probe must not have created any reservation.
    let events = run(&mut sim, 24.0 * 60.0);
    assert!(events.is_empty());
}

#[test]
fn identical_runs_produce_identical_event_sequences() {
    let run_once = || {
        let mut sim = scenario(2);
        run(&mut sim, 480.0);
        sim.reserve_user("User1", "DemandA", "Stop1", "Stop2", 490.0);
        sim.reserve_user("User2", "DemandB", "Stop3", "Stop2", 510.0);
        run(&mut sim, 481.0);
        sim.ready_to_depart("User1");
        sim.ready_to_depart("User2");
        run(&mut sim, 1440.0)
            .into_iter()
            .map(|event| serde_json::to_string(&event).unwrap())
            .collect::<Vec<_>>()
    };
    assert_eq!(run_once(), run_once());
}
