//! The user-agent engine: turns DEMAND events into task chains and walks
//! each user through reserve / depart / arrive conversations with the
//! mobility simulators.

use bevy_ecs::prelude::{Component, Entity, World};
use bevy_ecs::system::Resource;
use chrono::NaiveDate;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, warn};

use sim_core::clock::{ms_from_minutes, SimulationClock};
use sim_core::event::{
    DemandDetails, DepartDetails, Event, EventBus, EventType, ReserveDetails, ReservedDetails,
    RouteLeg,
};

use crate::plan::{RouteFilter, RoutePlan, WALKING};
use crate::planner::PlannerClient;
use crate::tasks::{
    plan_to_tasks, with_recovery_fallbacks, with_walking_fallbacks, ReserveTask,
    ReservedTripTask, Task, TripTask,
};

pub type AgentClock = SimulationClock<AgentEvent>;

/// Payload routed to a user when a matching external event arrives.
#[derive(Debug, Clone)]
pub enum Delivery {
    Reserved(ReservedDetails),
    Arrived,
}

#[derive(Debug, Clone)]
pub enum AgentEvent {
    Advance { user: Entity },
    Deliver { user: Entity, delivery: Delivery },
}

/// Key matching an incoming RESERVED / DEPARTED / ARRIVED to the user task
/// waiting for it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventIdentifier {
    pub event_type: EventType,
    pub source: String,
    pub user_id: String,
    pub location_id: Option<String>,
}

#[derive(Debug, Default, Resource)]
struct PendingEvents(HashMap<EventIdentifier, Entity>);

#[derive(Debug)]
enum AgentState {
    /// Ready to start the next task.
    Idle,
    /// A Wait task is sleeping until its departure time.
    Waiting,
    TripAwaitReserved(TripTask),
    TripAwaitArrived(TripTask),
    ReserveAwaitReserved(ReserveTask),
    /// RESERVED arrived; holding until the plan's first departure.
    ReserveDelay {
        task: ReserveTask,
        reserved: ReservedDetails,
    },
    ReservedTripAwaitArrived(ReservedTripTask),
}

/// A traveller working through their task list.
#[derive(Debug, Component)]
struct Agent {
    user_id: String,
    demand_id: String,
    tasks: VecDeque<Task>,
    state: AgentState,
}

pub struct Simulation {
    world: World,
    planner: Box<dyn PlannerClient>,
    confirmed_services: Vec<String>,
    filters: HashMap<String, RouteFilter>,
}

enum Outcome {
    Keep,
    Finished,
}

impl Simulation {
    pub fn new(
        start_date: NaiveDate,
        planner: Box<dyn PlannerClient>,
        confirmed_services: Vec<String>,
        filters: HashMap<String, RouteFilter>,
    ) -> Self {
        let mut world = World::new();
        world.insert_resource(AgentClock::with_start_date(start_date));
        world.insert_resource(EventBus::default());
        world.insert_resource(PendingEvents::default());
        Self {
            world,
            planner,
            confirmed_services,
            filters,
        }
    }

    pub fn now_minutes(&self) -> f64 {
        self.world.resource::<AgentClock>().now_minutes()
    }

    pub fn peek(&self) -> Option<f64> {
        self.world.resource::<AgentClock>().peek_minutes()
    }

    fn process_next(&mut self) -> bool {
        let Some(event) = self.world.resource_mut::<AgentClock>().pop_next() else {
            return false;
        };
        match event.kind {
            AgentEvent::Advance { user } => self.advance_user(user, None),
            AgentEvent::Deliver { user, delivery } => self.advance_user(user, Some(delivery)),
        }
        true
    }

    pub fn step(&mut self) -> (f64, Vec<Event>) {
        self.process_next();
        let now = self.now_minutes();
        let events = self.world.resource_mut::<EventBus>().drain();
        (now, events)
    }

    pub fn advance_to(&mut self, until: f64) {
        let target = ms_from_minutes(until);
        while self
            .world
            .resource::<AgentClock>()
            .peek()
            .is_some_and(|next| next <= target)
        {
            self.process_next();
        }
        self.world.resource_mut::<AgentClock>().advance_to(target);
    }

    /// Handle a DEMAND: pick a plan, build the task chain, spawn the user.
    pub fn demand(&mut self, details: &DemandDetails) {
        let now = self.now_minutes();
        let dept = details.dept.unwrap_or(now);

        let plans = match self.planner.plan(&details.org, &details.dst, dept) {
            Ok(plans) => plans,
            Err(error) => {
                warn!(user = %details.user_id, %error, "route planning failed");
                return;
            }
        };
        if plans.is_empty() {
            warn!(
                user = %details.user_id,
                org = %details.org.location_id,
                dst = %details.dst.location_id,
                "the planner returned no route"
            );
            return;
        }

        let filter = match self.filters.get(&details.user_id) {
            Some(filter) => filter.clone(),
            None => {
                debug!(user = %details.user_id, "no plan preferences configured");
                RouteFilter::default()
            }
        };
        let mut tasks = select_and_chain(
            plans,
            details.service.as_deref(),
            &filter,
            &self.confirmed_services,
        );
        // Hold the first trip until the demanded departure time.
        if matches!(tasks.first(), Some(Task::Trip(_))) && now < dept {
            tasks.insert(0, Task::Wait { dept });
        }

        let agent = Agent {
            user_id: details.user_id.clone(),
            demand_id: details.demand_id.clone(),
            tasks: tasks.into(),
            state: AgentState::Idle,
        };
        let entity = self.world.spawn(agent).id();
        let mut clock = self.world.resource_mut::<AgentClock>();
        let now_ms = clock.now();
        clock.schedule_at(now_ms, AgentEvent::Advance { user: entity });
    }

    /// Route an incoming RESERVED / DEPARTED / ARRIVED to the waiting user,
    /// if any. Unmatched events are ignored.
    pub fn trigger(&mut self, event: &Event) {
        let Some(source) = event.source.as_deref() else {
            warn!("triggered event without a source module");
            return;
        };
        let (identifier, delivery) = match event.event_type {
            EventType::Reserved => {
                let Ok(details) = event.details_as::<ReservedDetails>() else {
                    warn!("malformed RESERVED details");
                    return;
                };
                (
                    EventIdentifier {
                        event_type: EventType::Reserved,
                        source: source.to_owned(),
                        user_id: details.user_id.clone(),
                        location_id: None,
                    },
                    Delivery::Reserved(details),
                )
            }
            EventType::Departed | EventType::Arrived => {
                let Ok(details) = event.details_as::<sim_core::event::DepartedArrivedDetails>()
                else {
                    return;
                };
                let Some(user_id) = details.user_id else {
                    return; // vehicle-level event
                };
                (
                    EventIdentifier {
                        event_type: event.event_type,
                        source: source.to_owned(),
                        user_id,
                        location_id: Some(details.location.location_id),
                    },
                    Delivery::Arrived,
                )
            }
            _ => return,
        };

        let Some(entity) = self
            .world
            .resource_mut::<PendingEvents>()
            .0
            .remove(&identifier)
        else {
            return;
        };
        let mut clock = self.world.resource_mut::<AgentClock>();
        let now = clock.now();
        clock.schedule_at(
            now,
            AgentEvent::Deliver {
                user: entity,
                delivery,
            },
        );
    }

    pub fn active_users(&mut self) -> usize {
        self.world.query::<&Agent>().iter(&self.world).count()
    }

    fn advance_user(&mut self, entity: Entity, delivery: Option<Delivery>) {
        let Some(mut agent) = self.world.entity_mut(entity).take::<Agent>() else {
            return;
        };
        let state = std::mem::replace(&mut agent.state, AgentState::Idle);
        let outcome = match (state, delivery) {
            (AgentState::Idle, None) | (AgentState::Waiting, None) => {
                self.start_next(&mut agent, entity)
            }
            (AgentState::ReserveDelay { task, reserved }, None) => {
                self.finish_reserve(&mut agent, entity, task, reserved)
            }
            (AgentState::TripAwaitReserved(task), Some(Delivery::Reserved(details))) => {
                if details.success {
                    self.emit_depart(&agent, &task.service);
                    self.register(
                        EventIdentifier {
                            event_type: EventType::Arrived,
                            source: task.service.clone(),
                            user_id: agent.user_id.clone(),
                            location_id: Some(task.dst.location_id.clone()),
                        },
                        entity,
                    );
                    agent.state = AgentState::TripAwaitArrived(task);
                    Outcome::Keep
                } else {
                    let TripTask { fail, service, .. } = task;
                    self.handle_failure(&mut agent, entity, fail, &service)
                }
            }
            (AgentState::ReserveAwaitReserved(task), Some(Delivery::Reserved(details))) => {
                let resume_at = task.route.dept();
                if resume_at > self.now_minutes() {
                    let at = ms_from_minutes(resume_at);
                    agent.state = AgentState::ReserveDelay {
                        task,
                        reserved: details,
                    };
                    let mut clock = self.world.resource_mut::<AgentClock>();
                    clock.schedule_at(at, AgentEvent::Advance { user: entity });
                    Outcome::Keep
                } else {
                    self.finish_reserve(&mut agent, entity, task, details)
                }
            }
            (AgentState::TripAwaitArrived(_), Some(Delivery::Arrived))
            | (AgentState::ReservedTripAwaitArrived(_), Some(Delivery::Arrived)) => {
                self.start_next(&mut agent, entity)
            }
            (state, _) => {
                agent.state = state;
                Outcome::Keep
            }
        };

        match outcome {
            Outcome::Keep => {
                self.world.entity_mut(entity).insert(agent);
            }
            Outcome::Finished => {
                self.world.despawn(entity);
            }
        }
    }

    /// Run tasks until one suspends; an empty list finishes the user.
    fn start_next(&mut self, agent: &mut Agent, entity: Entity) -> Outcome {
        loop {
            let Some(task) = agent.tasks.pop_front() else {
                return Outcome::Finished;
            };
            match task {
                Task::Wait { dept } => {
                    let now = self.now_minutes();
                    if dept > now {
                        agent.state = AgentState::Waiting;
                        let at = ms_from_minutes(dept);
                        let mut clock = self.world.resource_mut::<AgentClock>();
                        clock.schedule_at(at, AgentEvent::Advance { user: entity });
                        return Outcome::Keep;
                    }
                }
                Task::Trip(task) => {
                    let now = self.now_minutes();
                    // The trip starts now; shift the expected arrival along
                    // with the actual departure.
                    let arrv = task.arrv.map(|arrv| now + (arrv - task.dept));
                    let details = ReserveDetails {
                        user_id: agent.user_id.clone(),
                        demand_id: agent.demand_id.clone(),
                        org: task.org.clone(),
                        dst: task.dst.clone(),
                        dept: now,
                        arrv,
                    };
                    self.world.resource_mut::<EventBus>().emit(Event::targeted(
                        EventType::Reserve,
                        now,
                        &task.service,
                        &details,
                    ));
                    self.register(
                        EventIdentifier {
                            event_type: EventType::Reserved,
                            source: task.service.clone(),
                            user_id: agent.user_id.clone(),
                            location_id: None,
                        },
                        entity,
                    );
                    agent.state = AgentState::TripAwaitReserved(task);
                    return Outcome::Keep;
                }
                Task::Reserve(task) => {
                    let now = self.now_minutes();
                    let mobility = &task.route.trips[1];
                    let details = ReserveDetails {
                        user_id: agent.user_id.clone(),
                        demand_id: agent.demand_id.clone(),
                        org: mobility.org.clone(),
                        dst: mobility.dst.clone(),
                        dept: mobility.dept,
                        arrv: None,
                    };
                    let service = task.service().to_owned();
                    self.world.resource_mut::<EventBus>().emit(Event::targeted(
                        EventType::Reserve,
                        now,
                        &service,
                        &details,
                    ));
                    self.register(
                        EventIdentifier {
                            event_type: EventType::Reserved,
                            source: service,
                            user_id: agent.user_id.clone(),
                            location_id: None,
                        },
                        entity,
                    );
                    agent.state = AgentState::ReserveAwaitReserved(task);
                    return Outcome::Keep;
                }
                Task::ReservedTrip(task) => {
                    // Already reserved: departing is enough. The departure
                    // time belongs to the mobility, not the user.
                    self.emit_depart(agent, &task.service);
                    self.register(
                        EventIdentifier {
                            event_type: EventType::Arrived,
                            source: task.service.clone(),
                            user_id: agent.user_id.clone(),
                            location_id: Some(task.dst.location_id.clone()),
                        },
                        entity,
                    );
                    agent.state = AgentState::ReservedTripAwaitArrived(task);
                    return Outcome::Keep;
                }
            }
        }
    }

    fn emit_depart(&mut self, agent: &Agent, service: &str) {
        let now = self.now_minutes();
        let details = DepartDetails {
            user_id: agent.user_id.clone(),
            demand_id: agent.demand_id.clone(),
        };
        self.world.resource_mut::<EventBus>().emit(Event::targeted(
            EventType::Depart,
            now,
            service,
            &details,
        ));
    }

    fn register(&mut self, identifier: EventIdentifier, entity: Entity) {
        self.world
            .resource_mut::<PendingEvents>()
            .0
            .insert(identifier, entity);
    }

    /// A reservation failed: switch to the fallback chain, or finish the
    /// user when there is none.
    fn handle_failure(
        &mut self,
        agent: &mut Agent,
        entity: Entity,
        fail: Vec<Task>,
        service: &str,
    ) -> Outcome {
        if fail.is_empty() {
            warn!(
                user = %agent.user_id,
                service,
                "reservation failed and no fallback is configured; \
                 the user's journey ends here"
            );
            return Outcome::Finished;
        }
        agent.tasks = fail.into();
        self.start_next(agent, entity)
    }

    /// Complete a pre-reservation: replace the plan with walk / reserved
    /// ride / walk, adjusting the walking endpoints from the returned route.
    fn finish_reserve(
        &mut self,
        agent: &mut Agent,
        entity: Entity,
        task: ReserveTask,
        reserved: ReservedDetails,
    ) -> Outcome {
        if !reserved.success {
            let service = task.service().to_owned();
            return self.handle_failure(agent, entity, task.fail, &service);
        }

        let route = &task.route;
        let event_route = &reserved.route;
        let leads_with_walk = event_route.len() > 1
            && event_route[0].service.as_deref() == Some(WALKING);
        let (pre_dst, pre_arrv, mobility) = if leads_with_walk {
            (
                event_route[0].dst.clone(),
                Some(event_route[0].arrv),
                event_route[1].clone(),
            )
        } else if let Some(first) = event_route.first() {
            (
                route.trips[0].dst.clone(),
                Some(route.trips[0].arrv),
                first.clone(),
            )
        } else {
            // No route returned; keep the plan's own mobility leg.
            (
                route.trips[0].dst.clone(),
                Some(route.trips[0].arrv),
                RouteLeg {
                    org: route.trips[1].org.clone(),
                    dst: route.trips[1].dst.clone(),
                    dept: route.trips[1].dept,
                    arrv: route.trips[1].arrv,
                    service: Some(route.trips[1].service.clone()),
                },
            )
        };

        let post_span = route.trips[2].arrv - route.trips[2].dept;
        let trailing_walk = (event_route.len() > 1)
            .then(|| event_route.last())
            .flatten()
            .filter(|leg| leg.service.as_deref() == Some(WALKING));
        let (post_org, post_dept, post_arrv) = match trailing_walk {
            Some(last) => (last.org.clone(), last.dept, last.arrv + post_span),
            None => (
                route.trips[2].org.clone(),
                mobility.arrv,
                mobility.arrv + post_span,
            ),
        };

        let replacement = vec![
            Task::Trip(TripTask {
                org: route.trips[0].org.clone(),
                dst: pre_dst,
                service: route.trips[0].service.clone(),
                dept: route.trips[0].dept,
                arrv: pre_arrv,
                fail: Vec::new(),
            }),
            Task::ReservedTrip(ReservedTripTask {
                org: mobility.org.clone(),
                dst: mobility.dst.clone(),
                service: route.trips[1].service.clone(),
                dept: mobility.dept,
            }),
            Task::Trip(TripTask {
                org: post_org,
                dst: route.trips[2].dst.clone(),
                service: route.trips[2].service.clone(),
                dept: post_dept,
                arrv: Some(post_arrv),
                fail: Vec::new(),
            }),
        ];
        agent.tasks = replacement.into();
        self.start_next(agent, entity)
    }
}

/// Select the primary (and recovery) plan for a demand and build the task
/// chain.
fn select_and_chain(
    plans: Vec<RoutePlan>,
    fixed_service: Option<&str>,
    filter: &RouteFilter,
    confirmed_services: &[String],
) -> Vec<Task> {
    let plans = match fixed_service {
        Some(service) => filter_by_fixed_service(plans, service),
        None => {
            let filtered = filter.apply(&plans);
            if filtered.is_empty() {
                warn!("plan preferences left no candidate; using all plans");
                plans
            } else {
                filtered
            }
        }
    };

    if plans.len() == 1 {
        return with_walking_fallbacks(plan_to_tasks(&plans[0], confirmed_services));
    }
    with_recovery_fallbacks(
        plan_to_tasks(&plans[0], confirmed_services),
        plan_to_tasks(&plans[1], confirmed_services),
    )
}

/// A DEMAND may pin the service: keep only plans using it (or walking-only
/// plans when walking is demanded), falling back to everything with a
/// warning when nothing matches.
fn filter_by_fixed_service(plans: Vec<RoutePlan>, service: &str) -> Vec<RoutePlan> {
    let selected: Vec<RoutePlan> = if service == WALKING {
        plans
            .iter()
            .filter(|plan| plan.is_walking_only())
            .cloned()
            .collect()
    } else {
        plans
            .iter()
            .filter(|plan| plan.services().contains(service))
            .cloned()
            .collect()
    };
    if selected.is_empty() {
        warn!(
            service,
            "the designated service serves no plan for this trip; ignoring it"
        );
        plans
    } else {
        selected
    }
}
