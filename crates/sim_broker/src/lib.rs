//! # Simulation broker
//!
//! Integrates and runs the simulator modules: the broker registers each
//! module as a runner, checks every module's specification against all the
//! others, then drives them in lock-step virtual time — always stepping the
//! runner with the earliest next event and fanning its observable events out
//! to the rest of the topology. Every event is recorded through a result
//! sink on the way.

pub mod config;
pub mod engine;
pub mod error;
pub mod http;
pub mod local;
pub mod logging;
pub mod manager;
pub mod result;
pub mod validation;

pub use config::{ModuleSetting, Setup, SetupParser};
pub use engine::{Runner, RunnerEngine, StepOutcome};
pub use error::BrokerError;
pub use http::{HttpPlanner, HttpRunner, PlannerRunner};
pub use local::LocalRunner;
pub use manager::{Broker, PeekStatus};
pub use result::{FileResultWriter, HttpResultWriter, NullResultWriter, ResultWriter};
pub use validation::{EventValidator, ValidationError, ValidatorOptions};
