//! # Scheduled / route-deviation simulator
//!
//! Vehicles follow GTFS-style timetables (single trips or block chains),
//! emitting vehicle-level arrivals and departures at every scheduled stop.
//! Reservations ride fixed stop pairs, or — for route-deviation services —
//! temporary stops materialized inside declared deviation windows, spaced
//! uniformly between the surrounding scheduled stops.
//!
//! The module is an ECS world driven by a discrete-event clock: one gated
//! system per clock-event kind, with observable output collected on the
//! event bus and drained per step.

pub mod controller;
pub mod events;
pub mod mobility;
pub mod simulation;
pub mod systems;
pub mod trip;

pub use controller::{ScheduledModule, Settings};
pub use simulation::{Simulation, SimulationConfig};
pub use systems::{TransitClock, TransitEvent};
