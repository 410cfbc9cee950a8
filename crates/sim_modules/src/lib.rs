//! # Thin simulator modules
//!
//! The small collaborators of the federation: the walking simulator, a
//! station-based shared-vehicle simulator, scenario sources that inject
//! DEMAND events, and a simple planner facade used for in-process wiring.

pub mod planner;
pub mod scenario;
pub mod sharing;
pub mod walking;

pub use planner::{ServiceNetwork, SimplePlanner};
pub use scenario::{Demand, DemandGenerator, HistoricalScenario};
pub use sharing::{SharingModule, SharingSimulation, Station};
pub use walking::{WalkingModule, WalkingSimulation};
