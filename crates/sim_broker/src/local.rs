//! In-process runner: drives any [`SimulatorPort`] without a network hop,
//! for modules hosted inside the broker process and for tests.

use serde_json::Value;

use sim_core::event::Event;
use sim_core::port::SimulatorPort;
use sim_core::spec::ModuleSpecification;

use crate::engine::Runner;
use crate::error::BrokerError;

pub struct LocalRunner {
    name: String,
    port: Box<dyn SimulatorPort>,
}

impl LocalRunner {
    pub fn new(name: impl Into<String>, port: Box<dyn SimulatorPort>) -> Self {
        Self {
            name: name.into(),
            port,
        }
    }

    fn module_error(&self, error: sim_core::port::ModuleError) -> BrokerError {
        BrokerError::Module {
            module: self.name.clone(),
            message: error.to_string(),
        }
    }
}

impl Runner for LocalRunner {
    fn name(&self) -> &str {
        &self.name
    }

    fn spec(&mut self) -> Result<ModuleSpecification, BrokerError> {
        Ok(self.port.spec())
    }

    fn setup(&mut self, settings: &Value) -> Result<(), BrokerError> {
        self.port
            .setup(settings.clone())
            .map_err(|e| self.module_error(e))
    }

    fn start(&mut self) -> Result<(), BrokerError> {
        self.port.start().map_err(|e| self.module_error(e))
    }

    fn peek(&mut self) -> Result<f64, BrokerError> {
        Ok(self.port.peek().unwrap_or(f64::INFINITY))
    }

    fn step(&mut self) -> Result<(f64, Vec<Event>), BrokerError> {
        self.port.step().map_err(|e| self.module_error(e))
    }

    fn triggered(&mut self, event: &Event) -> Result<(), BrokerError> {
        self.port.triggered(event).map_err(|e| self.module_error(e))
    }

    fn reservable(&mut self, org: &str, dst: &str) -> Result<bool, BrokerError> {
        self.port
            .reservable(org, dst)
            .map_err(|e| self.module_error(e))
    }

    fn finish(&mut self) -> Result<(), BrokerError> {
        self.port.finish().map_err(|e| self.module_error(e))
    }
}
