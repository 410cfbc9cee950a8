//! The tick loop: drive every runner in lock-step virtual time.
//!
//! Each tick peeks every runner in parallel, steps the one with the earliest
//! next event (ties break by setup order), stamps and records its events,
//! then fans each event out — to the named service when targeted, otherwise
//! to every runner except the producer.

use rayon::prelude::*;
use serde_json::Value;
use tracing::debug;

use sim_core::event::Event;
use sim_core::spec::ModuleSpecification;

use crate::error::BrokerError;
use crate::result::ResultWriter;
use crate::validation::{EventValidator, ValidatorOptions};

pub trait Runner: Send {
    fn name(&self) -> &str;
    fn spec(&mut self) -> Result<ModuleSpecification, BrokerError>;
    fn setup(&mut self, settings: &Value) -> Result<(), BrokerError>;
    fn start(&mut self) -> Result<(), BrokerError>;
    /// Wire-minute time of the next event; `f64::INFINITY` when idle.
    fn peek(&mut self) -> Result<f64, BrokerError>;
    fn step(&mut self) -> Result<(f64, Vec<Event>), BrokerError>;
    fn triggered(&mut self, event: &Event) -> Result<(), BrokerError>;
    fn reservable(&mut self, org: &str, dst: &str) -> Result<bool, BrokerError>;
    fn finish(&mut self) -> Result<(), BrokerError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepOutcome {
    /// A runner advanced to this time.
    Advanced(f64),
    /// The earliest event lies past `until` (or nothing is scheduled at
    /// all); nothing ran.
    NotDue(f64),
}

pub struct RunnerEngine {
    runners: Vec<Box<dyn Runner>>,
    writer: Box<dyn ResultWriter>,
    validator: EventValidator,
}

impl RunnerEngine {
    pub fn new(writer: Box<dyn ResultWriter>, options: ValidatorOptions) -> Self {
        Self {
            runners: Vec::new(),
            writer,
            validator: EventValidator::new(options),
        }
    }

    pub fn add_runner(&mut self, runner: Box<dyn Runner>) {
        self.runners.push(runner);
    }

    pub fn runner_names(&self) -> Vec<String> {
        self.runners
            .iter()
            .map(|runner| runner.name().to_owned())
            .collect()
    }

    /// Fetch every runner's specification and run the compatibility gate.
    pub fn check_compatibility(&mut self) -> Result<(), BrokerError> {
        for runner in &mut self.runners {
            let spec = runner.spec()?;
            let name = runner.name().to_owned();
            self.validator.add_module(&name, spec);
        }
        self.validator.check_compatibility()?;
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), BrokerError> {
        for runner in &mut self.runners {
            runner.start()?;
        }
        Ok(())
    }

    fn peek_all(&mut self) -> Result<Vec<f64>, BrokerError> {
        self.runners
            .par_iter_mut()
            .map(|runner| runner.peek())
            .collect()
    }

    /// Earliest next event across all runners.
    pub fn peek(&mut self) -> Result<f64, BrokerError> {
        Ok(self
            .peek_all()?
            .into_iter()
            .fold(f64::INFINITY, f64::min))
    }

    /// One tick. With `until` set, nothing runs when the earliest event lies
    /// beyond it.
    pub fn step(&mut self, until: Option<f64>) -> Result<StepOutcome, BrokerError> {
        let peeks = self.peek_all()?;
        let mut selected: Option<(usize, f64)> = None;
        for (index, peek) in peeks.into_iter().enumerate() {
            let better = selected.map(|(_, best)| peek < best).unwrap_or(true);
            if better {
                selected = Some((index, peek));
            }
        }
        let Some((index, next)) = selected else {
            return Ok(StepOutcome::NotDue(f64::INFINITY));
        };
        if next.is_infinite() {
            return Ok(StepOutcome::NotDue(next));
        }
        if let Some(until) = until {
            if next > until {
                return Ok(StepOutcome::NotDue(next));
            }
        }

        let producer = self.runners[index].name().to_owned();
        let (now, mut events) = self.runners[index].step()?;
        debug!(module = %producer, now, count = events.len(), "stepped");

        for event in &mut events {
            event.source = Some(producer.clone());
            let record = serde_json::to_value(&*event)
                .map_err(|e| BrokerError::Sink(e.to_string()))?;
            self.writer
                .write_json(&record)
                .map_err(|e| BrokerError::Sink(e.to_string()))?;
            self.validator.check_step_event(&producer, event)?;
            self.fan_out(&producer, event)?;
        }
        Ok(StepOutcome::Advanced(now))
    }

    fn fan_out(&mut self, producer: &str, event: &Event) -> Result<(), BrokerError> {
        if let Some(service) = &event.service {
            let Some(target) = self
                .runners
                .iter_mut()
                .find(|runner| runner.name() == service)
            else {
                return Err(BrokerError::UnknownService(service.clone()));
            };
            let name = target.name().to_owned();
            self.validator.check_triggered_event(&name, event)?;
            target.triggered(event)?;
            return Ok(());
        }
        for index in 0..self.runners.len() {
            if self.runners[index].name() == producer {
                continue;
            }
            let name = self.runners[index].name().to_owned();
            self.validator.check_triggered_event(&name, event)?;
            self.runners[index].triggered(event)?;
        }
        Ok(())
    }

    pub fn reservable(
        &mut self,
        service: &str,
        org: &str,
        dst: &str,
    ) -> Result<bool, BrokerError> {
        let Some(runner) = self
            .runners
            .iter_mut()
            .find(|runner| runner.name() == service)
        else {
            return Err(BrokerError::UnknownService(service.to_owned()));
        };
        runner.reservable(org, dst)
    }

    pub fn finish(&mut self) -> Result<(), BrokerError> {
        for runner in &mut self.runners {
            runner.finish()?;
        }
        self.writer
            .close()
            .map_err(|e| BrokerError::Sink(e.to_string()))?;
        Ok(())
    }
}
