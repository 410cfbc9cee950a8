//! # On-demand ride-pooling simulator
//!
//! Vehicles serve door-to-door reservations inside a stop group and a daily
//! operating window. Every accepted reservation re-solves the vehicle's
//! pickup-delivery route under time-window and capacity constraints; the
//! vehicle then follows the replanned schedule, boarding users who announced
//! readiness and returning to its home stop after the window closes.
//!
//! The module is an ECS world driven by a discrete-event clock: one gated
//! system per clock-event kind, with all observable output collected on the
//! event bus and drained per step.

pub mod controller;
pub mod evaluation;
pub mod events;
pub mod mobility;
pub mod model;
pub mod network;
pub mod reservation;
pub mod simulation;
pub mod solver;
pub mod systems;

pub use controller::{OnDemandModule, Settings};
pub use simulation::{CarConfig, Simulation, SimulationConfig};
pub use systems::{OnDemandClock, OnDemandEvent};
