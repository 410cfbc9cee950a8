//! Pickup-delivery route search with time windows and capacity.
//!
//! One instance covers a single vehicle: a depot (the vehicle's current stop,
//! or its in-transit arrival stop), one delivery-only node per passenger
//! already on board, and a pickup/delivery node pair for every user who has
//! not boarded yet. Arc costs are network travel times; a node's time may
//! wait for its window to open but must not overrun it, and the route must
//! return to the depot before the service window closes.
//!
//! The search is a deterministic depth-first branch-and-bound: nodes are
//! explored in a fixed order (passengers, then waiting, reserved and the new
//! user) and the first route achieving the minimal end-of-route time wins.
//! The expansion budget bounds worst-case work without breaking determinism.

use crate::mobility::{normalize_route, PlannedStop};
use crate::network::Network;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    PickUp,
    DropOff,
}

/// One solver node: a visit to `stop` within `[window_start, window_end]`.
#[derive(Debug, Clone)]
pub struct VrpNode {
    pub stop: String,
    pub user_id: String,
    pub kind: NodeKind,
    pub window_start_ms: u64,
    pub window_end_ms: u64,
    /// Index of the pickup this delivery depends on; `None` for passengers
    /// already on board.
    pub pickup_index: Option<usize>,
}

#[derive(Debug)]
pub struct RouteProblem<'a> {
    pub depot_stop: String,
    pub start_time_ms: u64,
    /// The route, including the return leg to the depot, must end by here.
    pub window_end_ms: u64,
    pub capacity: usize,
    /// Users already on board at the depot.
    pub initial_load: usize,
    pub nodes: Vec<VrpNode>,
    pub network: &'a Network,
}

struct Search<'a> {
    problem: &'a RouteProblem<'a>,
    best_end: u64,
    best_order: Option<Vec<usize>>,
    expansions: u64,
    budget: u64,
}

impl<'a> Search<'a> {
    fn run(mut self) -> Option<Vec<usize>> {
        let n = self.problem.nodes.len();
        let mut visited = vec![false; n];
        let mut order = Vec::with_capacity(n);
        self.explore(
            &mut visited,
            &mut order,
            &self.problem.depot_stop.clone(),
            self.problem.start_time_ms,
            self.problem.initial_load,
        );
        self.best_order
    }

    fn explore(
        &mut self,
        visited: &mut Vec<bool>,
        order: &mut Vec<usize>,
        at_stop: &str,
        time_ms: u64,
        load: usize,
    ) {
        if self.expansions >= self.budget {
            return;
        }
        self.expansions += 1;

        if order.len() == self.problem.nodes.len() {
            let Some(back) = self.problem.network.duration_ms(at_stop, &self.problem.depot_stop)
            else {
                return;
            };
            let end = time_ms + back;
            if end <= self.problem.window_end_ms && end < self.best_end {
                self.best_end = end;
                self.best_order = Some(order.clone());
            }
            return;
        }

        // A complete route can only end later than the current time.
        if time_ms >= self.best_end {
            return;
        }

        for index in 0..self.problem.nodes.len() {
            if visited[index] {
                continue;
            }
            let node = &self.problem.nodes[index];
            if let Some(pickup) = node.pickup_index {
                if !visited[pickup] {
                    continue;
                }
            }
            let next_load = match node.kind {
                NodeKind::PickUp => {
                    if load + 1 > self.problem.capacity {
                        continue;
                    }
                    load + 1
                }
                NodeKind::DropOff => load.saturating_sub(1),
            };
            let Some(travel) = self.problem.network.duration_ms(at_stop, &node.stop) else {
                continue;
            };
            let arrival = (time_ms + travel).max(node.window_start_ms);
            if arrival > node.window_end_ms || arrival > self.problem.window_end_ms {
                continue;
            }

            visited[index] = true;
            order.push(index);
            let stop = node.stop.clone();
            self.explore(visited, order, &stop, arrival, next_load);
            order.pop();
            visited[index] = false;
        }
    }
}

/// Solve the instance; returns the visiting order of `problem.nodes`, or
/// `None` when no feasible route exists within the budget.
pub fn solve(problem: &RouteProblem<'_>, budget: u64) -> Option<Vec<usize>> {
    let search = Search {
        problem,
        best_end: u64::MAX,
        best_order: None,
        expansions: 0,
        budget,
    };
    search.run()
}

/// Convert a visiting order into an untimed plan (depot excluded, consecutive
/// same-stop visits coalesced).
pub fn order_to_plan(problem: &RouteProblem<'_>, order: &[usize]) -> Vec<PlannedStop> {
    let stop_times = order
        .iter()
        .map(|&index| {
            let node = &problem.nodes[index];
            let mut entry = PlannedStop {
                stop: node.stop.clone(),
                ..Default::default()
            };
            match node.kind {
                NodeKind::PickUp => entry.board.push(node.user_id.clone()),
                NodeKind::DropOff => entry.alight.push(node.user_id.clone()),
            }
            entry
        })
        .collect();
    normalize_route(stop_times)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sim_core::clock::ONE_MIN_MS;

    fn minutes(m: u64) -> u64 {
        m * ONE_MIN_MS
    }

    fn triangle() -> Network {
        let mut network = Network::new();
        network.add_edge("Stop1", "Stop2", 30.0, true);
        network.add_edge("Stop1", "Stop3", 15.0, true);
        network.add_edge("Stop2", "Stop3", 20.0, true);
        network
    }

    fn pickup(stop: &str, user: &str, start: u64, end: u64) -> VrpNode {
        VrpNode {
            stop: stop.into(),
            user_id: user.into(),
            kind: NodeKind::PickUp,
            window_start_ms: start,
            window_end_ms: end,
            pickup_index: None,
        }
    }

    fn dropoff(stop: &str, user: &str, start: u64, end: u64, pickup: Option<usize>) -> VrpNode {
        VrpNode {
            stop: stop.into(),
            user_id: user.into(),
            kind: NodeKind::DropOff,
            window_start_ms: start,
            window_end_ms: end,
            pickup_index: pickup,
        }
    }

    #[test]
    fn single_user_route_is_found() {
        let network = triangle();
        let problem = RouteProblem {
            depot_stop: "Stop1".into(),
            start_time_ms: minutes(480),
            window_end_ms: minutes(1380),
            capacity: 2,
            initial_load: 0,
            nodes: vec![
                pickup("Stop1", "User1", minutes(490), minutes(520)),
                dropoff("Stop2", "User1", minutes(520), minutes(550), Some(0)),
            ],
            network: &network,
        };
        let order = solve(&problem, 100_000).expect("solution");
        assert_eq!(order, vec![0, 1]);
        let plan = order_to_plan(&problem, &order);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].board, vec!["User1"]);
        assert_eq!(plan[1].alight, vec!["User1"]);
    }

    #[test]
    fn pooled_route_inserts_second_pickup_before_shared_dropoff() {
        let network = triangle();
        let problem = RouteProblem {
            depot_stop: "Stop1".into(),
            start_time_ms: minutes(481),
            window_end_ms: minutes(1380),
            capacity: 2,
            initial_load: 0,
            nodes: vec![
                pickup("Stop1", "User1", minutes(490), minutes(520)),
                dropoff("Stop2", "User1", minutes(520), minutes(550), Some(0)),
                pickup("Stop3", "User2", minutes(510), minutes(540)),
                dropoff("Stop2", "User2", minutes(530), minutes(560), Some(2)),
            ],
            network: &network,
        };
        let order = solve(&problem, 100_000).expect("solution");
        assert_eq!(order, vec![0, 2, 1, 3]);
        let plan = order_to_plan(&problem, &order);
        // Stop1 (board User1), Stop3 (board User2), Stop2 (both alight).
        assert_eq!(plan.len(), 3);
        assert_eq!(plan[2].alight, vec!["User1", "User2"]);
    }

    #[test]
    fn capacity_is_respected() {
        let network = triangle();
        let problem = RouteProblem {
            depot_stop: "Stop1".into(),
            start_time_ms: minutes(480),
            window_end_ms: minutes(1380),
            capacity: 1,
            initial_load: 1,
            nodes: vec![
                // The passenger on board must be delivered before anyone new
                // boards.
                dropoff("Stop2", "User1", minutes(0), minutes(1380), None),
                pickup("Stop2", "User2", minutes(510), minutes(600)),
                dropoff("Stop1", "User2", minutes(540), minutes(660), Some(1)),
            ],
            network: &network,
        };
        let order = solve(&problem, 100_000).expect("solution");
        assert_eq!(order[0], 0, "delivery must precede the new pickup");
    }

    #[test]
    fn infeasible_window_yields_none() {
        let network = triangle();
        let problem = RouteProblem {
            depot_stop: "Stop1".into(),
            start_time_ms: minutes(480),
            // Route cannot return to the depot before the window closes.
            window_end_ms: minutes(500),
            capacity: 2,
            initial_load: 0,
            nodes: vec![
                pickup("Stop1", "User1", minutes(490), minutes(520)),
                dropoff("Stop2", "User1", minutes(520), minutes(550), Some(0)),
            ],
            network: &network,
        };
        assert!(solve(&problem, 100_000).is_none());
    }
}
