//! HTTP runner and planner clients: the broker side of the module protocol.

use std::time::Duration;

use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::Value;

use sim_core::event::{Event, Location};
use sim_core::spec::ModuleSpecification;

use crate::engine::Runner;
use crate::error::BrokerError;

/// Default total timeout for module calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
/// Setup may ship large scenario payloads.
const SETUP_TIMEOUT: Duration = Duration::from_secs(3600);

#[derive(Debug, Deserialize)]
struct PeekResponse {
    next: f64,
}

#[derive(Debug, Deserialize)]
struct StepResponse {
    now: f64,
    events: Vec<Event>,
}

#[derive(Debug, Deserialize)]
struct ReservableResponse {
    reservable: bool,
}

/// A simulator module reachable over HTTP.
pub struct HttpRunner {
    name: String,
    endpoint: String,
    client: Client,
}

impl HttpRunner {
    pub fn new(name: impl Into<String>, endpoint: &str) -> Result<Self, BrokerError> {
        let name = name.into();
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| BrokerError::Http {
                module: name.clone(),
                message: e.to_string(),
            })?;
        Ok(Self {
            name,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn http_error(&self, message: impl ToString) -> BrokerError {
        BrokerError::Http {
            module: self.name.clone(),
            message: message.to_string(),
        }
    }

    fn get<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, BrokerError> {
        let response = self
            .client
            .get(format!("{}{}", self.endpoint, path))
            .query(query)
            .send()
            .map_err(|e| self.http_error(e))?;
        if !response.status().is_success() {
            return Err(self.http_error(format!("{} returned {}", path, response.status())));
        }
        response.json().map_err(|e| self.http_error(e))
    }

    fn post<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: Option<&Value>,
        timeout: Duration,
    ) -> Result<T, BrokerError> {
        let mut request = self
            .client
            .post(format!("{}{}", self.endpoint, path))
            .timeout(timeout);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().map_err(|e| self.http_error(e))?;
        if !response.status().is_success() {
            return Err(self.http_error(format!("{} returned {}", path, response.status())));
        }
        response.json().map_err(|e| self.http_error(e))
    }
}

impl Runner for HttpRunner {
    fn name(&self) -> &str {
        &self.name
    }

    fn spec(&mut self) -> Result<ModuleSpecification, BrokerError> {
        self.get("/spec", &[])
    }

    fn setup(&mut self, settings: &Value) -> Result<(), BrokerError> {
        let _: Value = self.post("/setup", Some(settings), SETUP_TIMEOUT)?;
        Ok(())
    }

    fn start(&mut self) -> Result<(), BrokerError> {
        let _: Value = self.post("/start", None, REQUEST_TIMEOUT)?;
        Ok(())
    }

    fn peek(&mut self) -> Result<f64, BrokerError> {
        let response: PeekResponse = self.get("/peek", &[])?;
        Ok(if response.next < 0.0 {
            f64::INFINITY
        } else {
            response.next
        })
    }

    fn step(&mut self) -> Result<(f64, Vec<Event>), BrokerError> {
        let response: StepResponse = self.post("/step", None, REQUEST_TIMEOUT)?;
        Ok((response.now, response.events))
    }

    fn triggered(&mut self, event: &Event) -> Result<(), BrokerError> {
        let body = serde_json::to_value(event).map_err(|e| self.http_error(e))?;
        let _: Value = self.post("/triggered", Some(&body), REQUEST_TIMEOUT)?;
        Ok(())
    }

    fn reservable(&mut self, org: &str, dst: &str) -> Result<bool, BrokerError> {
        let response: ReservableResponse =
            self.get("/reservable", &[("org", org), ("dst", dst)])?;
        Ok(response.reservable)
    }

    fn finish(&mut self) -> Result<(), BrokerError> {
        let _: Value = self.post("/finish", None, REQUEST_TIMEOUT)?;
        Ok(())
    }
}

/// A route planner the broker fans `/plan` queries out to. Routes are
/// treated as opaque JSON and concatenated across planners.
pub trait PlannerRunner: Send {
    fn setup(&mut self, settings: &Value) -> Result<(), BrokerError>;
    fn plan(
        &mut self,
        org: &Location,
        dst: &Location,
        dept: f64,
    ) -> Result<Vec<Value>, BrokerError>;
    fn finish(&mut self) -> Result<(), BrokerError>;
}

pub struct HttpPlanner {
    endpoint: String,
    client: Client,
}

impl HttpPlanner {
    pub fn new(endpoint: &str) -> Result<Self, BrokerError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| BrokerError::Http {
                module: "planner".into(),
                message: e.to_string(),
            })?;
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn http_error(message: impl ToString) -> BrokerError {
        BrokerError::Http {
            module: "planner".into(),
            message: message.to_string(),
        }
    }
}

impl PlannerRunner for HttpPlanner {
    fn setup(&mut self, settings: &Value) -> Result<(), BrokerError> {
        let response = self
            .client
            .post(format!("{}/setup", self.endpoint))
            .timeout(SETUP_TIMEOUT)
            .json(settings)
            .send()
            .map_err(Self::http_error)?;
        if !response.status().is_success() {
            return Err(Self::http_error(format!(
                "/setup returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    fn plan(
        &mut self,
        org: &Location,
        dst: &Location,
        dept: f64,
    ) -> Result<Vec<Value>, BrokerError> {
        let response = self
            .client
            .post(format!("{}/plan", self.endpoint))
            .query(&[("dept", dept)])
            .json(&serde_json::json!({ "org": org, "dst": dst }))
            .send()
            .map_err(Self::http_error)?;
        if !response.status().is_success() {
            return Err(Self::http_error(format!(
                "/plan returned {}",
                response.status()
            )));
        }
        response.json().map_err(Self::http_error)
    }

    fn finish(&mut self) -> Result<(), BrokerError> {
        let response = self
            .client
            .post(format!("{}/finish", self.endpoint))
            .send()
            .map_err(Self::http_error)?;
        if !response.status().is_success() {
            return Err(Self::http_error(format!(
                "/finish returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}
