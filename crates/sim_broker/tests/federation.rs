//! Full-federation run: scenario source → user-agent → walking + on-demand
//! simulators, wired through the broker with in-process runners and a JSONL
//! result sink.

use std::collections::HashMap;

use serde_json::{json, Value};

use sim_broker::{Broker, Setup};
use sim_core::port::SimulatorPort;
use sim_modules::planner::{symmetric_durations, ServiceNetwork, SimplePlanner};
use sim_modules::scenario::HistoricalScenario;
use sim_modules::walking::WalkingModule;
use sim_ondemand::OnDemandModule;
use sim_core::event::Location;
use sim_useragent::UserAgentModule;

fn loc(id: &str, lat: f64, lng: f64) -> Location {
    Location::new(id, lat, lng)
}

fn stops() -> Vec<Location> {
    vec![
        loc("Stop1", 36.6950, 137.2200),
        loc("Stop2", 36.7350, 137.2600),
        loc("Stop3", 36.7000, 137.2500),
    ]
}

fn setup_config(sink_path: &std::path::Path) -> Setup {
    let stop_ids = ["Stop1", "Stop2", "Stop3"];
    // Metres; at 300 m/min this is the {30, 15, 20} minute triangle.
    let matrix = [
        [0.0, 9000.0, 4500.0],
        [9000.0, 0.0, 6000.0],
        [4500.0, 6000.0, 0.0],
    ];
    let config = json!({
        "broker": {
            "type": "broker",
            "writer": { "path": sink_path },
        },
        "scenario": {
            "type": "local",
            "details": {
                "reference_date": "2024-04-01",
                "demands": [{
                    "user_id": "User1",
                    "demand_id": "Demand1",
                    "org": { "locationId": "home", "lat": 36.6952, "lng": 137.2202 },
                    "dst": { "locationId": "office", "lat": 36.7348, "lng": 137.2598 },
                    "dept": 490.0,
                    "resv": 480.0,
                }],
            },
        },
        "walking": {
            "type": "local",
            "details": {
                "reference_date": "2024-04-01",
                "walking_meters_per_minute": 80.0,
            },
        },
        "user": {
            "type": "local",
            "details": {
                "reference_date": "2024-04-01",
                "users": [{ "user_id": "User1" }],
            },
        },
        "ondemand": {
            "type": "local",
            "details": {
                "reference_date": "2024-04-01",
                "stops": stops().iter().map(|stop| json!({
                    "stop_id": stop.location_id,
                    "lat": stop.lat,
                    "lng": stop.lng,
                })).collect::<Vec<_>>(),
                "network": { "stops": stop_ids, "matrix": matrix },
                "mobility_speed": 300.0,
                "board_time": 0.0,
                "max_delay_time": 30.0,
                "trips": {
                    "trip": {
                        "service": {
                            "start_date": "2024-04-01",
                            "end_date": "2024-04-02",
                            "monday": true, "tuesday": true, "wednesday": true,
                            "thursday": true, "friday": true, "saturday": true,
                            "sunday": true,
                        },
                        "group_id": "group",
                        "stop_ids": stop_ids,
                        "start_window": 60.0,
                        "end_window": 1380.0,
                    },
                },
                "mobilities": [{
                    "mobility_id": "trip",
                    "capacity": 2,
                    "trip_id": "trip",
                    "stop": "Stop1",
                }],
            },
        },
    });
    serde_json::from_value(config).expect("setup config")
}

fn local_modules() -> HashMap<String, Box<dyn SimulatorPort>> {
    let planner = SimplePlanner::new(
        80.0,
        vec![ServiceNetwork {
            service: "ondemand".into(),
            stops: stops(),
            durations: symmetric_durations(&[
                ("Stop1", "Stop2", 30.0),
                ("Stop1", "Stop3", 15.0),
                ("Stop2", "Stop3", 20.0),
            ]),
        }],
    );
    let mut modules: HashMap<String, Box<dyn SimulatorPort>> = HashMap::new();
    modules.insert("scenario".into(), Box::new(HistoricalScenario::new()));
    modules.insert("walking".into(), Box::new(WalkingModule::new()));
    modules.insert(
        "user".into(),
        Box::new(UserAgentModule::with_planner(Box::new(planner))),
    );
    modules.insert("ondemand".into(), Box::new(OnDemandModule::new()));
    modules
}

fn run_federation(sink_path: &std::path::Path) -> Vec<Value> {
    sim_broker::logging::init_logging();
    let mut broker = Broker::new();
    broker
        .setup(&setup_config(sink_path), local_modules())
        .expect("setup");
    broker.start().expect("start");
    broker.run_until(1440.0).expect("run");
    assert!(broker.peek().success);
    broker.finish().expect("finish");

    std::fs::read_to_string(sink_path)
        .expect("sink file")
        .lines()
        .map(|line| serde_json::from_str(line).expect("record"))
        .collect()
}

fn user_events<'a>(records: &'a [Value], source: &str, event_type: &str) -> Vec<&'a Value> {
    records
        .iter()
        .filter(|record| {
            record["source"] == source
                && record["eventType"] == event_type
                && record["details"]["userId"] == "User1"
        })
        .collect()
}

#[test]
fn a_demand_rides_the_on_demand_service_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let sink = dir.path().join("events.txt");
    let records = run_federation(&sink);
    assert!(!records.is_empty());

    // Every recorded event is source-stamped.
    assert!(records.iter().all(|record| record["source"].is_string()));

    // The demand was announced and answered.
    assert_eq!(user_events(&records, "scenario", "DEMAND").len(), 1);
    let reserves: Vec<&Value> = records
        .iter()
        .filter(|record| {
            record["eventType"] == "RESERVE" && record["service"] == "ondemand"
        })
        .collect();
    assert_eq!(reserves.len(), 1, "records: {records:#?}");
    assert_eq!(reserves[0]["source"], "user");

    let reserved = user_events(&records, "ondemand", "RESERVED");
    assert_eq!(reserved.len(), 1);
    assert_eq!(reserved[0]["details"]["success"], true);

    // Exactly one boarding and one alighting on the on-demand service, in
    // order and with non-decreasing times.
    let departed = user_events(&records, "ondemand", "DEPARTED");
    let arrived = user_events(&records, "ondemand", "ARRIVED");
    assert_eq!(departed.len(), 1);
    assert_eq!(arrived.len(), 1);
    let departed_time = departed[0]["time"].as_f64().unwrap();
    let arrived_time = arrived[0]["time"].as_f64().unwrap();
    assert!(departed_time <= arrived_time);
    assert_eq!(departed[0]["details"]["location"]["locationId"], "Stop1");
    assert_eq!(arrived[0]["details"]["location"]["locationId"], "Stop2");

    // The journey ends with a walk to the final destination.
    let walks = user_events(&records, "walking", "ARRIVED");
    assert_eq!(walks.len(), 2);
    assert_eq!(
        walks.last().unwrap()["details"]["location"]["locationId"],
        "office"
    );

    // RESERVED → DEPARTED → ARRIVED appear in order in the record stream.
    let position = |predicate: &dyn Fn(&Value) -> bool| {
        records.iter().position(|record| predicate(record)).unwrap()
    };
    let reserved_at = position(&|r| {
        r["source"] == "ondemand"
            && r["eventType"] == "RESERVED"
            && r["details"]["userId"] == "User1"
    });
    let departed_at = position(&|r| {
        r["source"] == "ondemand"
            && r["eventType"] == "DEPARTED"
            && r["details"]["userId"] == "User1"
    });
    let arrived_at = position(&|r| {
        r["source"] == "ondemand"
            && r["eventType"] == "ARRIVED"
            && r["details"]["userId"] == "User1"
    });
    assert!(reserved_at < departed_at && departed_at < arrived_at);
}

#[test]
fn identical_runs_replay_bit_identically() {
    let dir = tempfile::tempdir().unwrap();
    let first = run_federation(&dir.path().join("first.txt"));
    let second = run_federation(&dir.path().join("second.txt"));
    assert_eq!(first, second);
}
