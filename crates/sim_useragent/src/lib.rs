//! # User-agent
//!
//! Converts abstract travel demands into concrete reservation and departure
//! conversations with the mobility simulators. Each DEMAND is planned,
//! filtered against the user's preferences, and turned into a task chain
//! (wait / trip / pre-reserve / reserved trip); reservation failures fall
//! back to a recovery plan or to walking.

pub mod controller;
pub mod manager;
pub mod plan;
pub mod planner;
pub mod tasks;

pub use controller::{Settings, UserAgentModule};
pub use manager::Simulation;
pub use plan::{PlanLeg, RouteFilter, RoutePlan, SortType};
pub use planner::{HttpPlannerClient, PlannerClient, StaticPlanner};
