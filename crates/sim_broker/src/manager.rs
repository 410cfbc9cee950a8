//! Run control: the broker lifecycle `setup → start → (step | run) →
//! finish`, with background running and shared error state.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use serde_json::Value;
use tracing::{error, info};

use sim_core::event::Location;
use sim_core::port::SimulatorPort;

use crate::config::{ModuleSetting, Setup, SetupParser, ValidationSetting, WriterSetting};
use crate::engine::{Runner, RunnerEngine, StepOutcome};
use crate::error::BrokerError;
use crate::http::{HttpPlanner, HttpRunner, PlannerRunner};
use crate::local::LocalRunner;
use crate::result::{FileResultWriter, HttpResultWriter, HttpSinkConfig, ResultWriter};
use crate::validation::ValidatorOptions;

/// What `/peek` reports while a run is in flight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeekStatus {
    pub success: bool,
    pub running: bool,
    /// Earliest next event, `None` at quiescence.
    pub next: Option<f64>,
}

struct Inner {
    engine: Option<RunnerEngine>,
    planners: Vec<Box<dyn PlannerRunner>>,
}

/// Process-wide broker state, scoped per instance rather than truly global.
pub struct Broker {
    inner: Arc<Mutex<Inner>>,
    running: Arc<AtomicBool>,
    error: Arc<Mutex<Option<String>>>,
    worker: Option<JoinHandle<()>>,
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

impl Broker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                engine: None,
                planners: Vec::new(),
            })),
            running: Arc::new(AtomicBool::new(false)),
            error: Arc::new(Mutex::new(None)),
            worker: None,
        }
    }

    fn lock_inner(&self) -> Result<std::sync::MutexGuard<'_, Inner>, BrokerError> {
        self.inner
            .lock()
            .map_err(|_| BrokerError::Configuration("broker state poisoned".into()))
    }

    fn build_writer(setting: &WriterSetting) -> Result<Box<dyn ResultWriter>, BrokerError> {
        if let Some(endpoint) = &setting.endpoint {
            let writer = HttpResultWriter::new(
                &format!("{}/result/events/", endpoint.trim_end_matches('/')),
                HttpSinkConfig::default(),
            )
            .map_err(|e| BrokerError::Sink(e.to_string()))?;
            return Ok(Box::new(writer));
        }
        let path = setting
            .path
            .clone()
            .unwrap_or_else(|| Path::new("events.txt").to_owned());
        let writer =
            FileResultWriter::new(&path).map_err(|e| BrokerError::Sink(e.to_string()))?;
        Ok(Box::new(writer))
    }

    /// Configure the topology. Ports for `local`-typed entries are taken
    /// from `local_modules` by name.
    pub fn setup(
        &self,
        settings: &Setup,
        mut local_modules: HashMap<String, Box<dyn SimulatorPort>>,
    ) -> Result<(), BrokerError> {
        let parser = SetupParser::new(settings);
        let (_, broker_setting) = parser.broker()?;
        let (writer_setting, validation) = match broker_setting {
            ModuleSetting::Broker { writer, validation } => (writer, *validation),
            _ => return Err(BrokerError::MissingBroker),
        };

        let writer = Self::build_writer(writer_setting)?;
        let ValidationSetting {
            ignore_feature,
            ignore_schema,
            ignore_in_process,
        } = validation;
        let mut engine = RunnerEngine::new(
            writer,
            ValidatorOptions {
                ignore_feature,
                ignore_schema,
                ignore_in_process,
            },
        );

        let mut planners: Vec<Box<dyn PlannerRunner>> = Vec::new();
        for (name, endpoint, details) in parser.planners() {
            let mut planner = HttpPlanner::new(endpoint)?;
            planner.setup(details)?;
            info!(module = %name, "planner configured");
            planners.push(Box::new(planner));
        }

        for (name, setting) in parser.externals() {
            let (mut runner, details): (Box<dyn Runner>, &Value) = match setting {
                ModuleSetting::Http { endpoint, details } => {
                    (Box::new(HttpRunner::new(name.clone(), endpoint)?), details)
                }
                ModuleSetting::Local { details } => {
                    let port = local_modules.remove(name.as_str()).ok_or_else(|| {
                        BrokerError::Configuration(format!(
                            "no in-process module registered for {name}"
                        ))
                    })?;
                    (Box::new(LocalRunner::new(name.clone(), port)), details)
                }
                _ => continue,
            };
            runner.setup(details)?;
            info!(module = %name, "module configured");
            engine.add_runner(runner);
        }

        engine.check_compatibility()?;

        let mut inner = self.lock_inner()?;
        inner.engine = Some(engine);
        inner.planners = planners;
        *self.error.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }

    pub fn start(&self) -> Result<(), BrokerError> {
        let mut inner = self.lock_inner()?;
        inner
            .engine
            .as_mut()
            .ok_or(BrokerError::MissingBroker)?
            .start()
    }

    pub fn peek(&self) -> PeekStatus {
        let next = self
            .lock_inner()
            .ok()
            .and_then(|mut inner| inner.engine.as_mut().and_then(|engine| engine.peek().ok()))
            .and_then(|next| next.is_finite().then_some(next));
        PeekStatus {
            success: self
                .error
                .lock()
                .map(|error| error.is_none())
                .unwrap_or(false),
            running: self.running.load(Ordering::SeqCst),
            next,
        }
    }

    /// Run a single tick (usually for debugging).
    pub fn step(&self) -> Result<StepOutcome, BrokerError> {
        let mut inner = self.lock_inner()?;
        let engine = inner.engine.as_mut().ok_or(BrokerError::MissingBroker)?;
        engine.step(None)
    }

    /// Run until `until` on the calling thread.
    pub fn run_until(&self, until: f64) -> Result<(), BrokerError> {
        self.running.store(true, Ordering::SeqCst);
        let result = self.run_loop(until);
        self.running.store(false, Ordering::SeqCst);
        result
    }

    fn run_loop(&self, until: f64) -> Result<(), BrokerError> {
        loop {
            let outcome = {
                let mut inner = self.lock_inner()?;
                let engine = inner.engine.as_mut().ok_or(BrokerError::MissingBroker)?;
                engine.step(Some(until))?
            };
            match outcome {
                StepOutcome::Advanced(now) if now <= until => continue,
                _ => return Ok(()),
            }
        }
    }

    /// Run until `until` on a background thread; progress and failures are
    /// observable through [`Broker::peek`].
    pub fn run_background(&mut self, until: f64) {
        self.running.store(true, Ordering::SeqCst);
        let inner = Arc::clone(&self.inner);
        let running = Arc::clone(&self.running);
        let error = Arc::clone(&self.error);
        self.worker = Some(std::thread::spawn(move || {
            loop {
                let outcome = {
                    let mut guard = match inner.lock() {
                        Ok(guard) => guard,
                        Err(_) => break,
                    };
                    let Some(engine) = guard.engine.as_mut() else { break };
                    engine.step(Some(until))
                };
                match outcome {
                    Ok(StepOutcome::Advanced(now)) if now <= until => continue,
                    Ok(_) => break,
                    Err(e) => {
                        error!(error = %e, "error while running");
                        *error.lock().unwrap_or_else(|e| e.into_inner()) =
                            Some(e.to_string());
                        break;
                    }
                }
            }
            running.store(false, Ordering::SeqCst);
        }));
    }

    /// Wait for a background run to finish.
    pub fn join(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }

    /// Fan a plan query out to every planner and concatenate the routes.
    pub fn plan(
        &self,
        org: &Location,
        dst: &Location,
        dept: f64,
    ) -> Result<Vec<Value>, BrokerError> {
        let mut inner = self.lock_inner()?;
        let mut routes = Vec::new();
        for planner in &mut inner.planners {
            routes.extend(planner.plan(org, dst, dept)?);
        }
        Ok(routes)
    }

    pub fn reservable(
        &self,
        service: &str,
        org: &str,
        dst: &str,
    ) -> Result<bool, BrokerError> {
        let mut inner = self.lock_inner()?;
        let engine = inner.engine.as_mut().ok_or(BrokerError::MissingBroker)?;
        engine.reservable(service, org, dst)
    }

    pub fn finish(&mut self) -> Result<(), BrokerError> {
        self.join();
        let mut inner = self.lock_inner()?;
        if let Some(mut engine) = inner.engine.take() {
            engine.finish()?;
        }
        for planner in &mut inner.planners {
            planner.finish()?;
        }
        inner.planners.clear();
        self.running.store(false, Ordering::SeqCst);
        *self.error.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }
}
