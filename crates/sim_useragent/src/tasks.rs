//! Task chains: what a user does with a chosen plan, and how failures fall
//! back to recovery plans or plain walking.

use tracing::warn;

use crate::plan::{PlanLeg, RoutePlan, WALKING};

#[derive(Debug, Clone)]
pub struct TripTask {
    pub org: sim_core::Location,
    pub dst: sim_core::Location,
    pub service: String,
    pub dept: f64,
    pub arrv: Option<f64>,
    pub fail: Vec<Task>,
}

impl TripTask {
    pub fn is_walking(&self) -> bool {
        self.service == WALKING
    }
}

/// Pre-reservation of a confirmed service: reserve the mobility leg of a
/// three-leg plan well before departure.
#[derive(Debug, Clone)]
pub struct ReserveTask {
    pub route: RoutePlan,
    pub fail: Vec<Task>,
}

impl ReserveTask {
    pub fn service(&self) -> &str {
        &self.route.trips[1].service
    }

    pub fn org(&self) -> &sim_core::Location {
        &self.route.trips[0].org
    }

    pub fn dst(&self) -> &sim_core::Location {
        &self.route.trips[2].dst
    }
}

/// A leg whose reservation already happened; departing is enough.
#[derive(Debug, Clone)]
pub struct ReservedTripTask {
    pub org: sim_core::Location,
    pub dst: sim_core::Location,
    pub service: String,
    pub dept: f64,
}

#[derive(Debug, Clone)]
pub enum Task {
    Wait { dept: f64 },
    Trip(TripTask),
    Reserve(ReserveTask),
    ReservedTrip(ReservedTripTask),
}

impl Task {
    pub fn is_walking(&self) -> bool {
        match self {
            Task::Trip(trip) => trip.is_walking(),
            _ => false,
        }
    }
}

fn walk(org: sim_core::Location, dst: sim_core::Location, dept: f64) -> Task {
    Task::Trip(TripTask {
        org,
        dst,
        service: WALKING.to_owned(),
        dept,
        arrv: None,
        fail: Vec::new(),
    })
}

/// Convert one plan into tasks: a confirmed-service three-leg plan becomes a
/// single pre-reserving task, anything else a trip per leg.
pub fn plan_to_tasks(plan: &RoutePlan, confirmed_services: &[String]) -> Vec<Task> {
    if plan.trips.len() == 3 && confirmed_services.contains(&plan.trips[1].service) {
        return vec![Task::Reserve(ReserveTask {
            route: plan.clone(),
            fail: Vec::new(),
        })];
    }
    plan.trips
        .iter()
        .map(|leg: &PlanLeg| {
            Task::Trip(TripTask {
                org: leg.org.clone(),
                dst: leg.dst.clone(),
                service: leg.service.clone(),
                dept: leg.dept,
                arrv: Some(leg.arrv),
                fail: Vec::new(),
            })
        })
        .collect()
}

/// Give every bookable task without an explicit fallback a walk to the final
/// destination.
pub fn with_walking_fallbacks(mut tasks: Vec<Task>) -> Vec<Task> {
    let final_dst = tasks.iter().rev().find_map(|task| match task {
        Task::Trip(trip) => Some(trip.dst.clone()),
        Task::Reserve(reserve) => Some(reserve.dst().clone()),
        Task::ReservedTrip(trip) => Some(trip.dst.clone()),
        Task::Wait { .. } => None,
    });
    let Some(final_dst) = final_dst else {
        return tasks;
    };
    for task in &mut tasks {
        match task {
            Task::Reserve(reserve) if reserve.fail.is_empty() => {
                let fallback = walk(
                    reserve.org().clone(),
                    reserve.dst().clone(),
                    reserve.route.dept(),
                );
                reserve.fail = vec![fallback];
            }
            Task::Trip(trip) if trip.fail.is_empty() && !trip.is_walking() => {
                trip.fail = vec![walk(trip.org.clone(), final_dst.clone(), trip.dept)];
            }
            _ => {}
        }
    }
    tasks
}

/// Chain the secondary plan as the recovery of the primary plan's mobility
/// leg, then add walking fallbacks everywhere.
pub fn with_recovery_fallbacks(
    mut primary: Vec<Task>,
    secondary: Vec<Task>,
) -> Vec<Task> {
    if primary.iter().all(Task::is_walking) {
        return primary;
    }
    if secondary.iter().all(Task::is_walking) {
        return with_walking_fallbacks(primary);
    }
    if matches!(secondary.first(), Some(Task::Reserve(_))) {
        return with_walking_fallbacks(primary);
    }

    if let Some(Task::Reserve(reserve)) = primary.first_mut() {
        reserve.fail = with_walking_fallbacks(secondary);
        return with_walking_fallbacks(primary);
    }

    // Recovery: walk from the primary mobility's pickup point to the
    // secondary mobility's pickup point, then ride the secondary plan.
    let recovery: Vec<Task> = secondary
        .into_iter()
        .skip_while(Task::is_walking)
        .collect();
    let recovery_head = recovery.iter().find_map(|task| match task {
        Task::Trip(trip) => Some((trip.org.clone(), trip.dept)),
        Task::Reserve(reserve) => Some((reserve.org().clone(), reserve.route.dept())),
        Task::ReservedTrip(trip) => Some((trip.org.clone(), trip.dept)),
        Task::Wait { .. } => None,
    });

    let mobility = primary.iter_mut().find_map(|task| match task {
        Task::Trip(trip) if !trip.is_walking() => Some(trip),
        _ => None,
    });
    match (mobility, recovery_head) {
        (Some(mobility), Some((recovery_org, recovery_dept))) => {
            let mut fail = vec![walk(mobility.org.clone(), recovery_org, recovery_dept)];
            fail.extend(with_walking_fallbacks(recovery));
            mobility.fail = fail;
        }
        _ => {
            warn!("no mobility leg to attach the recovery plan to");
        }
    }
    with_walking_fallbacks(primary)
}
