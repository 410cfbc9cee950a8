//! Module port: the in-process face of the simulator HTTP surface.
//!
//! Every simulator module (on-demand, scheduled, walking, scenario sources,
//! user-agent) implements [`SimulatorPort`]; the broker drives ports directly
//! through its local runner or over HTTP through module servers exposing the
//! same operations.

use thiserror::Error;

use crate::event::Event;
use crate::spec::ModuleSpecification;

#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("module is not configured; call setup first")]
    NotConfigured,
    #[error("invalid settings: {0}")]
    InvalidSettings(String),
    #[error("invalid event payload: {0}")]
    InvalidEvent(String),
    #[error("unknown location: {0}")]
    UnknownLocation(String),
    #[error("{0}")]
    Internal(String),
}

impl From<serde_json::Error> for ModuleError {
    fn from(err: serde_json::Error) -> Self {
        ModuleError::InvalidSettings(err.to_string())
    }
}

pub trait SimulatorPort: Send {
    /// The module's `/spec` document.
    fn spec(&self) -> ModuleSpecification;

    /// Configure the module from its JSON settings.
    fn setup(&mut self, settings: serde_json::Value) -> Result<(), ModuleError>;

    /// Begin the run (spawn initial processes).
    fn start(&mut self) -> Result<(), ModuleError>;

    /// Wire-minute time of the next scheduled callback; `None` when idle.
    fn peek(&self) -> Option<f64>;

    /// Advance to the next event instant and return `(now, observable
    /// events)`. A step at quiescence is a no-op that emits nothing.
    fn step(&mut self) -> Result<(f64, Vec<Event>), ModuleError>;

    /// Deliver an event produced elsewhere. Lets virtual time move forward
    /// to the event's time first.
    fn triggered(&mut self, event: &Event) -> Result<(), ModuleError>;

    /// Whether a trip org → dst could currently be reserved.
    fn reservable(&mut self, org: &str, dst: &str) -> Result<bool, ModuleError>;

    /// Tear down at end of run.
    fn finish(&mut self) -> Result<(), ModuleError>;
}
