//! End-to-end scenarios for the scheduled / route-deviation simulator.

use chrono::NaiveDate;

use sim_core::calendar::Service;
use sim_core::event::{DepartedArrivedDetails, Event, EventType, Location, ReservedDetails};
use sim_core::ONE_MIN_MS;
use sim_scheduled::trip::{
    BlockTrip, SingleTrip, Stop, StopTime, Timetable, TripElement, TripLocation,
};
use sim_scheduled::{Simulation, SimulationConfig};

fn start_date() -> NaiveDate {
    // A Monday.
    NaiveDate::from_ymd_opt(2024, 4, 1).unwrap()
}

fn stop(id: &str) -> Stop {
    Stop {
        stop_id: id.into(),
        name: id.into(),
        lat: 36.69,
        lng: 137.22,
    }
}

fn stop_time(id: &str, departure_min: u64) -> TripElement {
    TripElement::Stop(
        StopTime::new(stop(id), None, Some(departure_min * ONE_MIN_MS)).unwrap(),
    )
}

fn timetable_trip() -> SingleTrip {
    SingleTrip {
        service: Service::daily(start_date(), start_date().succ_opt().unwrap()),
        elements: [
            ("3_1", 543),
            ("7_1", 548),
            ("11_1", 558),
            ("15_1", 562),
            ("19_1", 566),
            ("23_0", 574),
            ("27_1", 578),
            ("31_1", 583),
            ("35_1", 590),
        ]
        .into_iter()
        .map(|(id, minute)| stop_time(id, minute))
        .collect(),
        block_id: String::new(),
    }
}

fn simulation(timetables: Vec<(String, Timetable)>, capacity: usize) -> Simulation {
    let mut sim = Simulation::new(SimulationConfig {
        start_date: start_date(),
        capacity,
        timetables,
    });
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

fn location(id: &str) -> Location {
    Location::new(id, 36.69, 137.22)
}

fn reserved(event: &Event) -> ReservedDetails {
    assert_eq!(event.event_type, EventType::Reserved);
    event.details_as().expect("reserved details")
}

fn user_events<'a>(events: &'a [Event], user: &str) -> Vec<&'a Event> {
    events
        .iter()
        .filter(|event| {
            event
                .details_as::<DepartedArrivedDetails>()
                .ok()
                .and_then(|details| details.user_id)
                .is_some_and(|user_id| user_id == user)
        })
        .collect()
}

#[test]
fn single_trip_reservation_rides_the_timetable() {
    let mut sim = simulation(
        vec![("mobility".into(), Timetable::Single(timetable_trip()))],
        20,
    );
    run(&mut sim, 490.0);

    sim.reserve_user("User1", "Demand1", location("3_1"), location("23_0"), 490.0);
    let events = run(&mut sim, 491.0);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].time, 490.0);
    let details = reserved(&events[0]);
    assert!(details.success);
    assert_eq!(details.mobility_id.as_deref(), Some("mobility"));
    let leg = &details.route[0];
    assert_eq!(leg.org.location_id, "3_1");
    assert_eq!(leg.dst.location_id, "23_0");
    assert_eq!((leg.dept, leg.arrv), (543.0, 574.0));

    sim.dept_user("User1");
    let events = run(&mut sim, 1440.0);

    // Vehicle-level arrive/depart at each of the nine stops, plus the
    // user's boarding and alighting.
    assert_eq!(events.len(), 20, "events: {events:?}");
    let rider = user_events(&events, "User1");
    assert_eq!(rider.len(), 2);
    assert_eq!(rider[0].event_type, EventType::Departed);
    assert_eq!(rider[0].time, 543.0);
    assert_eq!(
        rider[0]
            .details_as::<DepartedArrivedDetails>()
            .unwrap()
            .location
            .location_id,
        "3_1"
    );
    assert_eq!(rider[1].event_type, EventType::Arrived);
    assert_eq!(rider[1].time, 574.0);
    assert_eq!(
        rider[1]
            .details_as::<DepartedArrivedDetails>()
            .unwrap()
            .location
            .location_id,
        "23_0"
    );

    // First vehicle events of the day.
    assert_eq!(events[0].event_type, EventType::Arrived);
    assert_eq!(events[0].time, 543.0);
    assert_eq!(events[1].event_type, EventType::Departed);
    assert_eq!(events[1].time, 543.0);
}

fn block_timetable() -> Timetable {
    let monday_thursday = Service::new(
        start_date(),
        start_date() + chrono::Days::new(7),
        [true, true, true, true, false, false, false],
    );
    let thursday_sunday = Service::new(
        start_date(),
        start_date() + chrono::Days::new(7),
        [false, false, false, true, true, true, true],
    );
    Timetable::Block(BlockTrip::new(vec![
        SingleTrip {
            service: monday_thursday,
            elements: [("3_1", 543), ("7_1", 548), ("11_1", 558), ("15_1", 562)]
                .into_iter()
                .map(|(id, minute)| stop_time(id, minute))
                .collect(),
            block_id: "a".into(),
        },
        SingleTrip {
            service: thursday_sunday,
            elements: [
                ("19_1", 566),
                ("23_0", 574),
                ("27_1", 578),
                ("31_1", 583),
                ("35_1", 590),
            ]
            .into_iter()
            .map(|(id, minute)| stop_time(id, minute))
            .collect(),
            block_id: "a".into(),
        },
    ]))
}

#[test]
fn block_reservation_fails_across_a_non_operating_member() {
    let mut sim = simulation(vec![("mobility".into(), block_timetable())], 20);
    // Monday: only the first trip operates; 23_0 is not served.
    run(&mut sim, 490.0);
    sim.reserve_user("User1", "Demand1", location("3_1"), location("23_0"), 490.0);
    let events = run(&mut sim, 491.0);
    assert_eq!(events.len(), 1);
    let details = reserved(&events[0]);
    assert!(!details.success);
    assert_eq!(details.user_id, "User1");
    assert_eq!(details.demand_id, "Demand1");
}

#[test]
fn block_reservation_inside_operating_member_succeeds() {
    let mut sim = simulation(vec![("mobility".into(), block_timetable())], 20);
    run(&mut sim, 490.0);
    sim.reserve_user("User1", "Demand1", location("3_1"), location("11_1"), 490.0);
    let events = run(&mut sim, 491.0);
    let details = reserved(&events[0]);
    assert!(details.success);
    let leg = &details.route[0];
    assert_eq!((leg.dept, leg.arrv), (543.0, 558.0));
}

#[test]
fn block_reservation_spans_both_members_on_thursday() {
    let mut sim = simulation(vec![("mobility".into(), block_timetable())], 20);
    let thursday = 3.0 * 1440.0;
    run(&mut sim, thursday + 490.0);

    sim.reserve_user(
        "User1",
        "Demand1",
        location("3_1"),
        location("23_0"),
        thursday + 490.0,
    );
    let events = run(&mut sim, thursday + 491.0);
    let details = reserved(&events[0]);
    assert!(details.success, "details: {details:?}");
    let leg = &details.route[0];
    assert_eq!((leg.dept, leg.arrv), (thursday + 543.0, thursday + 574.0));

    sim.dept_user("User1");
    let events = run(&mut sim, thursday + 1440.0);
    let rider = user_events(&events, "User1");
    assert_eq!(rider.len(), 2);
    assert_eq!(rider[0].time, thursday + 543.0);
    assert_eq!(rider[1].time, thursday + 574.0);
}

#[test]
fn deviation_inserts_a_temporary_stop_for_the_reservation() {
    let trip = SingleTrip {
        service: Service::daily(start_date(), start_date().succ_opt().unwrap()),
        elements: vec![
            stop_time("a", 543),
            TripElement::Location(TripLocation {
                location_id: "dev".into(),
                start_window_ms: 0,
                end_window_ms: 60 * ONE_MIN_MS,
            }),
            stop_time("b", 558),
        ],
        block_id: String::new(),
    };
    let mut sim = simulation(vec![("mobility".into(), Timetable::Single(trip))], 20);
    run(&mut sim, 490.0);

    sim.reserve_user("User1", "Demand1", location("dev"), location("b"), 490.0);
    let events = run(&mut sim, 491.0);
    let details = reserved(&events[0]);
    assert!(details.success);
    let leg = &details.route[0];
    assert_eq!(leg.org.location_id, "dev");
    assert_eq!((leg.dept, leg.arrv), (543.0, 558.0));

    sim.dept_user("User1");
    let events = run(&mut sim, 600.0);
    let rider = user_events(&events, "User1");
    assert_eq!(rider.len(), 2);
    // The temporary stop sits halfway between the surrounding stop times.
    assert_eq!(rider[0].event_type, EventType::Departed);
    assert_eq!(rider[0].time, 550.5);
    assert_eq!(
        rider[0]
            .details_as::<DepartedArrivedDetails>()
            .unwrap()
            .location
            .location_id,
        "dev"
    );
    assert_eq!(rider[1].event_type, EventType::Arrived);
    assert_eq!(rider[1].time, 558.0);
}

#[test]
fn deviation_serves_a_drop_off_request() {
    let trip = SingleTrip {
        service: Service::daily(start_date(), start_date().succ_opt().unwrap()),
        elements: vec![
            stop_time("a", 543),
            TripElement::Location(TripLocation {
                location_id: "dev".into(),
                start_window_ms: 0,
                end_window_ms: 60 * ONE_MIN_MS,
            }),
            stop_time("b", 558),
        ],
        block_id: String::new(),
    };
    let mut sim = simulation(vec![("mobility".into(), Timetable::Single(trip))], 20);
    run(&mut sim, 490.0);

    sim.reserve_user("User1", "Demand1", location("a"), location("dev"), 490.0);
    let events = run(&mut sim, 491.0);
    let details = reserved(&events[0]);
    assert!(details.success);
    let leg = &details.route[0];
    assert_eq!(leg.org.location_id, "a");
    assert_eq!(leg.dst.location_id, "dev");
    assert_eq!((leg.dept, leg.arrv), (543.0, 558.0));

    sim.dept_user("User1");
    let events = run(&mut sim, 600.0);
    let rider = user_events(&events, "User1");
    assert_eq!(rider.len(), 2);
    assert_eq!(rider[0].event_type, EventType::Departed);
    assert_eq!(rider[0].time, 543.0);
    assert_eq!(rider[1].event_type, EventType::Arrived);
    assert_eq!(rider[1].time, 550.5);
    assert_eq!(
        rider[1]
            .details_as::<DepartedArrivedDetails>()
            .unwrap()
            .location
            .location_id,
        "dev"
    );
}

#[test]
fn seat_capacity_rejects_overlapping_extra_reservation() {
    let mut sim = simulation(
        vec![("mobility".into(), Timetable::Single(timetable_trip()))],
        1,
    );
    run(&mut sim, 490.0);

    sim.reserve_user("User1", "D1", location("3_1"), location("23_0"), 490.0);
    sim.reserve_user("User2", "D2", location("7_1"), location("11_1"), 490.0);
    let events = run(&mut sim, 491.0);
    assert_eq!(events.len(), 2);
    assert!(reserved(&events[0]).success);
    assert!(!reserved(&events[1]).success, "one seat, overlapping rides");

    // A ride after the first one alights still fits.
    sim.reserve_user("User3", "D3", location("27_1"), location("35_1"), 490.0);
    let events = run(&mut sim, 492.0);
    assert!(reserved(&events[0]).success);
}

#[test]
fn no_operation_day_sleeps_until_next_midnight() {
    let weekday_only = Service::new(
        start_date(),
        start_date() + chrono::Days::new(13),
        [true, true, true, true, true, false, false],
    );
    let trip = SingleTrip {
        service: weekday_only,
        elements: vec![stop_time("a", 543), stop_time("b", 558)],
        block_id: String::new(),
    };
    let mut sim = simulation(vec![("mobility".into(), Timetable::Single(trip))], 20);

    // Saturday (day 5) produces no vehicle events.
    let saturday = 5.0 * 1440.0;
    let events = run(&mut sim, saturday);
    assert!(!events.is_empty()); // weekday operation happened before
    let events = run(&mut sim, saturday + 1440.0);
    assert!(events.is_empty(), "saturday events: {events:?}");
    // Monday (day 7) resumes.
    let monday = 7.0 * 1440.0;
    let events = run(&mut sim, monday + 600.0);
    assert!(!events.is_empty());
}
