//! Route plans returned by the planner and the per-user plan filter.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use sim_core::event::Location;

pub const WALKING: &str = "walking";

/// One leg of a planned journey.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanLeg {
    pub org: Location,
    pub dst: Location,
    pub dept: f64,
    pub arrv: f64,
    #[serde(default = "default_service")]
    pub service: String,
}

fn default_service() -> String {
    WALKING.to_owned()
}

impl PlanLeg {
    pub fn is_walking(&self) -> bool {
        self.service == WALKING
    }

    pub fn duration(&self) -> f64 {
        self.arrv - self.dept
    }
}

/// An ordered sequence of legs from origin to destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutePlan {
    pub trips: Vec<PlanLeg>,
}

impl RoutePlan {
    pub fn org(&self) -> Option<&Location> {
        self.trips.first().map(|leg| &leg.org)
    }

    pub fn dst(&self) -> Option<&Location> {
        self.trips.last().map(|leg| &leg.dst)
    }

    pub fn dept(&self) -> f64 {
        self.trips.first().map(|leg| leg.dept).unwrap_or(0.0)
    }

    pub fn arrv(&self) -> f64 {
        self.trips.last().map(|leg| leg.arrv).unwrap_or(0.0)
    }

    pub fn is_walking_only(&self) -> bool {
        self.trips.iter().all(PlanLeg::is_walking)
    }

    /// Total time spent on walking legs, in minutes.
    pub fn walking_time(&self) -> f64 {
        self.trips
            .iter()
            .filter(|leg| leg.is_walking())
            .map(PlanLeg::duration)
            .sum()
    }

    pub fn services(&self) -> HashSet<&str> {
        self.trips.iter().map(|leg| leg.service.as_str()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortType {
    ByArrivalTime,
    ByWalkingTime,
}

/// Per-user plan preferences. The default filter passes everything through
/// unchanged.
#[derive(Debug, Clone, Default)]
pub struct RouteFilter {
    pub favorite_service: Option<HashSet<String>>,
    pub walking_time_limit_min: Option<f64>,
    pub sort_type: Option<SortType>,
}

impl RouteFilter {
    /// Sort and filter the plans. Walking-only plans always pass the
    /// favorite/walk-limit checks.
    pub fn apply(&self, plans: &[RoutePlan]) -> Vec<RoutePlan> {
        let mut sorted: Vec<RoutePlan> = plans.to_vec();
        match self.sort_type {
            Some(SortType::ByArrivalTime) => {
                sorted.sort_by(|a, b| a.arrv().total_cmp(&b.arrv()))
            }
            Some(SortType::ByWalkingTime) => {
                sorted.sort_by(|a, b| a.walking_time().total_cmp(&b.walking_time()))
            }
            None => {}
        }
        sorted.retain(|plan| self.check(plan));
        sorted
    }

    fn check(&self, plan: &RoutePlan) -> bool {
        if plan.is_walking_only() {
            return true;
        }
        self.check_service(plan) && self.check_walking_limit(plan)
    }

    fn check_service(&self, plan: &RoutePlan) -> bool {
        let Some(favorite) = &self.favorite_service else {
            return true;
        };
        if favorite.len() == 1 && favorite.contains(WALKING) {
            return false;
        }
        plan.trips
            .iter()
            .any(|leg| favorite.contains(&leg.service))
    }

    fn check_walking_limit(&self, plan: &RoutePlan) -> bool {
        match self.walking_time_limit_min {
            Some(limit) => plan.walking_time() <= limit,
            None => true,
        }
    }
}
