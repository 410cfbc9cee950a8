//! Simple planner facade: a walk-only route plus one walk / ride / walk
//! candidate per configured service network, ordered by arrival.

use serde::Deserialize;
use std::collections::HashMap;

use sim_core::event::Location;
use sim_core::spatial::walking_duration_min;
use sim_useragent::planner::{PlannerClient, PlannerError};
use sim_useragent::{PlanLeg, RoutePlan};

/// One mobility service the planner can route through: its stops and
/// stop-to-stop ride durations in minutes.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceNetwork {
    pub service: String,
    pub stops: Vec<Location>,
    /// `(org stop id, dst stop id) → ride minutes`, directed.
    #[serde(default)]
    pub durations: Vec<(String, String, f64)>,
}

impl ServiceNetwork {
    fn duration(&self, org: &str, dst: &str) -> Option<f64> {
        self.durations
            .iter()
            .find(|(a, b, _)| a == org && b == dst)
            .map(|(_, _, minutes)| *minutes)
    }

    fn nearest_stop(&self, to: &Location, walking_speed: f64) -> Option<(&Location, f64)> {
        self.stops
            .iter()
            .map(|stop| (stop, walking_duration_min(to, stop, walking_speed)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimplePlanner {
    pub walking_speed: f64,
    #[serde(default)]
    pub networks: Vec<ServiceNetwork>,
}

impl SimplePlanner {
    pub fn new(walking_speed: f64, networks: Vec<ServiceNetwork>) -> Self {
        Self {
            walking_speed,
            networks,
        }
    }

    fn walk_leg(&self, org: &Location, dst: &Location, dept: f64) -> PlanLeg {
        PlanLeg {
            org: org.clone(),
            dst: dst.clone(),
            dept,
            arrv: dept + walking_duration_min(org, dst, self.walking_speed),
            service: "walking".to_owned(),
        }
    }
}

impl PlannerClient for SimplePlanner {
    fn plan(
        &self,
        org: &Location,
        dst: &Location,
        dept: f64,
    ) -> Result<Vec<RoutePlan>, PlannerError> {
        let mut plans = vec![RoutePlan {
            trips: vec![self.walk_leg(org, dst, dept)],
        }];

        for network in &self.networks {
            let Some((board_stop, access_min)) = network.nearest_stop(org, self.walking_speed)
            else {
                continue;
            };
            let Some((alight_stop, egress_min)) = network.nearest_stop(dst, self.walking_speed)
            else {
                continue;
            };
            if board_stop.location_id == alight_stop.location_id {
                continue;
            }
            let Some(ride_min) =
                network.duration(&board_stop.location_id, &alight_stop.location_id)
            else {
                continue;
            };

            let board_at = dept + access_min;
            let alight_at = board_at + ride_min;
            plans.push(RoutePlan {
                trips: vec![
                    PlanLeg {
                        org: org.clone(),
                        dst: board_stop.clone(),
                        dept,
                        arrv: board_at,
                        service: "walking".to_owned(),
                    },
                    PlanLeg {
                        org: board_stop.clone(),
                        dst: alight_stop.clone(),
                        dept: board_at,
                        arrv: alight_at,
                        service: network.service.clone(),
                    },
                    PlanLeg {
                        org: alight_stop.clone(),
                        dst: dst.clone(),
                        dept: alight_at,
                        arrv: alight_at + egress_min,
                        service: "walking".to_owned(),
                    },
                ],
            });
        }

        plans.sort_by(|a, b| a.arrv().total_cmp(&b.arrv()));
        Ok(plans)
    }
}

/// Build a duration list from a symmetric matrix of stop pairs.
pub fn symmetric_durations(pairs: &[(&str, &str, f64)]) -> Vec<(String, String, f64)> {
    let mut durations = Vec::with_capacity(pairs.len() * 2);
    let mut seen: HashMap<(String, String), f64> = HashMap::new();
    for (a, b, minutes) in pairs {
        seen.insert((a.to_string(), b.to_string()), *minutes);
        seen.insert((b.to_string(), a.to_string()), *minutes);
    }
    let mut entries: Vec<_> = seen.into_iter().collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    for ((a, b), minutes) in entries {
        durations.push((a, b, minutes));
    }
    durations
}
