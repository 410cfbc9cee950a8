//! Route planner clients: how the user-agent asks for journey candidates.

use std::time::Duration;

use reqwest::blocking::Client;
use serde::Serialize;
use thiserror::Error;

use sim_core::event::Location;

use crate::plan::RoutePlan;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("planner request failed: {0}")]
    Http(String),
    #[error("planner response was not understood: {0}")]
    Payload(String),
}

pub trait PlannerClient: Send {
    /// Journey candidates org → dst departing at `dept` (wire minutes),
    /// best first.
    fn plan(&self, org: &Location, dst: &Location, dept: f64)
        -> Result<Vec<RoutePlan>, PlannerError>;
}

#[derive(Serialize)]
struct PlanQuery<'a> {
    org: &'a Location,
    dst: &'a Location,
}

/// Thin HTTP client for an external trip planner.
#[derive(Debug, Clone)]
pub struct HttpPlannerClient {
    client: Client,
    endpoint: String,
}

impl HttpPlannerClient {
    pub fn new(endpoint: &str) -> Result<Self, PlannerError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| PlannerError::Http(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }
}

impl PlannerClient for HttpPlannerClient {
    fn plan(
        &self,
        org: &Location,
        dst: &Location,
        dept: f64,
    ) -> Result<Vec<RoutePlan>, PlannerError> {
        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("dept", dept)])
            .json(&PlanQuery { org, dst })
            .send()
            .map_err(|e| PlannerError::Http(e.to_string()))?;
        if !response.status().is_success() {
            return Err(PlannerError::Http(format!(
                "planner returned {}",
                response.status()
            )));
        }
        response
            .json::<Vec<RoutePlan>>()
            .map_err(|e| PlannerError::Payload(e.to_string()))
    }
}

/// Fixed plans for tests and in-process wiring.
#[derive(Debug, Default)]
pub struct StaticPlanner {
    pub plans: Vec<RoutePlan>,
}

impl PlannerClient for StaticPlanner {
    fn plan(
        &self,
        _org: &Location,
        _dst: &Location,
        _dept: f64,
    ) -> Result<Vec<RoutePlan>, PlannerError> {
        Ok(self.plans.clone())
    }
}
