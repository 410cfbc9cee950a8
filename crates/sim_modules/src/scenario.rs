//! Scenario sources: they inject DEMAND events into the federation, either
//! replaying configured rows or generating them from a seeded random
//! process.

use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use tracing::warn;

use sim_core::clock::{ms_from_minutes, SimulationClock};
use sim_core::event::{DemandDetails, Event, EventBus, EventType, Location};
use sim_core::port::{ModuleError, SimulatorPort};
use sim_core::spec::{schemas, ModuleSpecification, SpecificationBuilder, VERSION_1};

/// Probability sampling interval for the generator, in minutes.
const UNIT_TIME: f64 = 1.0;

type ScenarioClock = SimulationClock<usize>;

/// One concrete travel demand. With `resv` set, the DEMAND fires at the
/// reservation time and names the desired departure; otherwise it fires at
/// the departure itself.
#[derive(Debug, Clone, Deserialize)]
pub struct Demand {
    pub user_id: String,
    pub demand_id: String,
    pub org: Location,
    pub dst: Location,
    pub dept: f64,
    #[serde(default)]
    pub resv: Option<f64>,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub user_type: Option<String>,
}

impl Demand {
    fn fire_time(&self) -> f64 {
        self.resv.unwrap_or(self.dept)
    }
}

pub struct ScenarioSimulation {
    clock: ScenarioClock,
    bus: EventBus,
    demands: Vec<Demand>,
}

impl ScenarioSimulation {
    pub fn new(start_date: NaiveDate, mut demands: Vec<Demand>) -> Self {
        demands.sort_by(|a, b| {
            a.fire_time()
                .total_cmp(&b.fire_time())
                .then(a.dept.total_cmp(&b.dept))
        });
        Self {
            clock: ScenarioClock::with_start_date(start_date),
            bus: EventBus::default(),
            demands,
        }
    }

    /// The users this scenario will create, for user-agent configuration.
    pub fn users(&self) -> Vec<(String, Option<String>)> {
        self.demands
            .iter()
            .map(|demand| (demand.user_id.clone(), demand.user_type.clone()))
            .collect()
    }

    pub fn start(&mut self) {
        for (index, demand) in self.demands.iter().enumerate() {
            self.clock
                .schedule_at(ms_from_minutes(demand.fire_time()), index);
        }
    }

    pub fn peek(&self) -> Option<f64> {
        self.clock.peek_minutes()
    }

    pub fn now_minutes(&self) -> f64 {
        self.clock.now_minutes()
    }

    pub fn step(&mut self) -> (f64, Vec<Event>) {
        if let Some(event) = self.clock.pop_next() {
            self.emit(event.kind);
        }
        (self.clock.now_minutes(), self.bus.drain())
    }

    pub fn advance_to(&mut self, until: f64) {
        let target = ms_from_minutes(until);
        while self.clock.peek().is_some_and(|next| next <= target) {
            if let Some(event) = self.clock.pop_next() {
                self.emit(event.kind);
            }
        }
        self.clock.advance_to(target);
    }

    fn emit(&mut self, index: usize) {
        let Some(demand) = self.demands.get(index) else {
            return;
        };
        let details = DemandDetails {
            user_id: demand.user_id.clone(),
            demand_id: demand.demand_id.clone(),
            user_type: demand.user_type.clone(),
            org: demand.org.clone(),
            dst: demand.dst.clone(),
            service: demand.service.clone(),
            // An advance reservation names its departure; an immediate
            // demand departs right away.
            dept: demand.resv.map(|_| demand.dept),
            arrv: None,
        };
        self.bus.emit(Event::emitted(
            EventType::Demand,
            self.clock.now_minutes(),
            &details,
        ));
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoricalSettings {
    pub reference_date: NaiveDate,
    pub demands: Vec<Demand>,
}

/// Replay of configured demand rows.
#[derive(Default)]
pub struct HistoricalScenario {
    sim: Option<ScenarioSimulation>,
}

impl HistoricalScenario {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn users(&self) -> Vec<(String, Option<String>)> {
        self.sim
            .as_ref()
            .map(ScenarioSimulation::users)
            .unwrap_or_default()
    }
}

fn scenario_spec() -> ModuleSpecification {
    SpecificationBuilder::new()
        .tx(EventType::Demand, schemas::demand())
        .feature(EventType::Demand, &["demand_id", "user_type"], &[])
        .build(VERSION_1)
}

impl SimulatorPort for HistoricalScenario {
    fn spec(&self) -> ModuleSpecification {
        scenario_spec()
    }

    fn setup(&mut self, settings: serde_json::Value) -> Result<(), ModuleError> {
        let settings: HistoricalSettings = serde_json::from_value(settings)?;
        self.sim = Some(ScenarioSimulation::new(
            settings.reference_date,
            settings.demands,
        ));
        Ok(())
    }

    fn start(&mut self) -> Result<(), ModuleError> {
        self.sim
            .as_mut()
            .ok_or(ModuleError::NotConfigured)?
            .start();
        Ok(())
    }

    fn peek(&self) -> Option<f64> {
        self.sim.as_ref().and_then(ScenarioSimulation::peek)
    }

    fn step(&mut self) -> Result<(f64, Vec<Event>), ModuleError> {
        Ok(self
            .sim
            .as_mut()
            .ok_or(ModuleError::NotConfigured)?
            .step())
    }

    fn triggered(&mut self, event: &Event) -> Result<(), ModuleError> {
        // A scenario source only lets time move forward.
        let sim = self.sim.as_mut().ok_or(ModuleError::NotConfigured)?;
        if sim.now_minutes() < event.time {
            sim.advance_to(event.time);
        }
        Ok(())
    }

    fn reservable(&mut self, _org: &str, _dst: &str) -> Result<bool, ModuleError> {
        Ok(false)
    }

    fn finish(&mut self) -> Result<(), ModuleError> {
        self.sim = None;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct DemandPattern {
    pub begin: f64,
    pub end: f64,
    pub expected_demands: f64,
    #[serde(default)]
    pub resv: Option<f64>,
    pub org: Location,
    pub dst: Location,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub user_type: Option<String>,
}

impl DemandPattern {
    /// Probability of one demand per unit minute; the count over the period
    /// approximates a Poisson distribution.
    fn probability(&self) -> f64 {
        let period = self.end - self.begin;
        if period <= 0.0 {
            return 0.0;
        }
        let p = self.expected_demands / (period / UNIT_TIME);
        if p > 0.1 {
            warn!(
                probability = p,
                "the per-minute demand probability may not be small enough"
            );
        }
        p
    }
}

#[derive(Debug, Deserialize)]
pub struct GeneratorSettings {
    pub reference_date: NaiveDate,
    pub seed: u64,
    #[serde(default = "default_user_prefix")]
    pub user_prefix: String,
    pub demands: Vec<DemandPattern>,
}

fn default_user_prefix() -> String {
    "U_".to_owned()
}

/// Seeded random demand source. Identical seeds and patterns generate
/// identical demand sequences.
#[derive(Default)]
pub struct DemandGenerator {
    sim: Option<ScenarioSimulation>,
}

impl DemandGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn users(&self) -> Vec<(String, Option<String>)> {
        self.sim
            .as_ref()
            .map(ScenarioSimulation::users)
            .unwrap_or_default()
    }

    fn generate(settings: &GeneratorSettings) -> Vec<Demand> {
        let mut rng = StdRng::seed_from_u64(settings.seed);
        let mut raw: Vec<(Option<f64>, f64, usize)> = Vec::new();
        for (pattern_index, pattern) in settings.demands.iter().enumerate() {
            let probability = pattern.probability();
            let slots = ((pattern.end - pattern.begin) / UNIT_TIME) as usize;
            for slot in 0..slots {
                if rng.gen::<f64>() < probability {
                    let dept = pattern.begin + slot as f64 * UNIT_TIME;
                    raw.push((pattern.resv, dept, pattern_index));
                }
            }
        }
        raw.sort_by(|a, b| {
            a.0.unwrap_or(a.1)
                .total_cmp(&b.0.unwrap_or(b.1))
                .then(a.1.total_cmp(&b.1))
        });
        raw.into_iter()
            .enumerate()
            .map(|(index, (resv, dept, pattern_index))| {
                let pattern = &settings.demands[pattern_index];
                let user_id = format!("{}{:04}", settings.user_prefix, index + 1);
                Demand {
                    demand_id: format!("{user_id}-demand"),
                    user_id,
                    org: pattern.org.clone(),
                    dst: pattern.dst.clone(),
                    dept,
                    resv,
                    service: pattern.service.clone(),
                    user_type: pattern.user_type.clone(),
                }
            })
            .collect()
    }
}

impl SimulatorPort for DemandGenerator {
    fn spec(&self) -> ModuleSpecification {
        scenario_spec()
    }

    fn setup(&mut self, settings: serde_json::Value) -> Result<(), ModuleError> {
        let settings: GeneratorSettings = serde_json::from_value(settings)?;
        let demands = Self::generate(&settings);
        self.sim = Some(ScenarioSimulation::new(settings.reference_date, demands));
        Ok(())
    }

    fn start(&mut self) -> Result<(), ModuleError> {
        self.sim
            .as_mut()
            .ok_or(ModuleError::NotConfigured)?
            .start();
        Ok(())
    }

    fn peek(&self) -> Option<f64> {
        self.sim.as_ref().and_then(ScenarioSimulation::peek)
    }

    fn step(&mut self) -> Result<(f64, Vec<Event>), ModuleError> {
        Ok(self
            .sim
            .as_mut()
            .ok_or(ModuleError::NotConfigured)?
            .step())
    }

    fn triggered(&mut self, event: &Event) -> Result<(), ModuleError> {
        let sim = self.sim.as_mut().ok_or(ModuleError::NotConfigured)?;
        if sim.now_minutes() < event.time {
            sim.advance_to(event.time);
        }
        Ok(())
    }

    fn reservable(&mut self, _org: &str, _dst: &str) -> Result<bool, ModuleError> {
        Ok(false)
    }

    fn finish(&mut self) -> Result<(), ModuleError> {
        self.sim = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 4, 1).unwrap()
    }

    fn loc(id: &str) -> Location {
        Location::new(id, 36.0, 137.0)
    }

    #[test]
    fn historical_replays_in_time_order() {
        let demands = vec![
            Demand {
                user_id: "U2".into(),
                demand_id: "D2".into(),
                org: loc("a"),
                dst: loc("b"),
                dept: 500.0,
                resv: None,
                service: None,
                user_type: None,
            },
            Demand {
                user_id: "U1".into(),
                demand_id: "D1".into(),
                org: loc("a"),
                dst: loc("b"),
                dept: 490.0,
                resv: Some(480.0),
                service: None,
                user_type: None,
            },
        ];
        let mut sim = ScenarioSimulation::new(date(), demands);
        sim.start();

        let (now, events) = sim.step();
        assert_eq!(now, 480.0);
        let details: DemandDetails = events[0].details_as().unwrap();
        assert_eq!(details.user_id, "U1");
        // Advance reservations name their departure time.
        assert_eq!(details.dept, Some(490.0));

        let (now, events) = sim.step();
        assert_eq!(now, 500.0);
        let details: DemandDetails = events[0].details_as().unwrap();
        assert_eq!(details.user_id, "U2");
        assert_eq!(details.dept, None);
    }

    #[test]
    fn generator_is_deterministic_for_a_seed() {
        let settings = json!({
            "reference_date": "2024-04-01",
            "seed": 42,
            "demands": [{
                "begin": 480.0,
                "end": 600.0,
                "expected_demands": 6.0,
                "org": { "locationId": "a", "lat": 36.0, "lng": 137.0 },
                "dst": { "locationId": "b", "lat": 36.1, "lng": 137.1 },
            }],
        });
        let mut first = DemandGenerator::new();
        first.setup(settings.clone()).unwrap();
        let mut second = DemandGenerator::new();
        second.setup(settings).unwrap();
        assert_eq!(first.users(), second.users());
        assert!(!first.users().is_empty());
    }
}
