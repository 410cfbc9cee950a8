//! Observable-event emission for the scheduled simulator.

use sim_core::event::{
    DepartedArrivedDetails, Event, EventBus, EventType, Location, ReservedDetails, RouteLeg,
};

fn departed_arrived(
    event_type: EventType,
    time_min: f64,
    mobility_id: &str,
    location: Location,
    rider: Option<(&str, &str)>,
) -> Event {
    let details = DepartedArrivedDetails {
        user_id: rider.map(|(user_id, _)| user_id.to_owned()),
        demand_id: rider.map(|(_, demand_id)| demand_id.to_owned()),
        mobility_id: Some(mobility_id.to_owned()),
        location,
    };
    Event::emitted(event_type, time_min, &details)
}

pub fn departed(
    bus: &mut EventBus,
    time_min: f64,
    mobility_id: &str,
    location: Location,
    rider: Option<(&str, &str)>,
) {
    bus.emit(departed_arrived(
        EventType::Departed,
        time_min,
        mobility_id,
        location,
        rider,
    ));
}

pub fn arrived(
    bus: &mut EventBus,
    time_min: f64,
    mobility_id: &str,
    location: Location,
    rider: Option<(&str, &str)>,
) {
    bus.emit(departed_arrived(
        EventType::Arrived,
        time_min,
        mobility_id,
        location,
        rider,
    ));
}

pub fn reserved(
    bus: &mut EventBus,
    time_min: f64,
    user_id: &str,
    demand_id: &str,
    mobility_id: &str,
    leg: RouteLeg,
) {
    let details = ReservedDetails {
        success: true,
        user_id: user_id.to_owned(),
        demand_id: demand_id.to_owned(),
        mobility_id: Some(mobility_id.to_owned()),
        route: vec![leg],
    };
    bus.emit(Event::emitted(EventType::Reserved, time_min, &details));
}

pub fn reserve_failed(bus: &mut EventBus, time_min: f64, user_id: &str, demand_id: &str) {
    let details = ReservedDetails {
        success: false,
        user_id: user_id.to_owned(),
        demand_id: demand_id.to_owned(),
        mobility_id: None,
        route: Vec::new(),
    };
    bus.emit(Event::emitted(EventType::Reserved, time_min, &details));
}
