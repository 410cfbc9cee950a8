//! Stop-to-stop travel times, configured as a complete matrix.

use bevy_ecs::system::Resource;
use std::collections::HashMap;

use sim_core::clock::ONE_MIN_MS;

/// Travel durations between stops in simulation ms. Self-loops are free.
#[derive(Debug, Default, Resource)]
pub struct Network {
    durations: HashMap<(String, String), u64>,
}

impl Network {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a directed edge with a duration in wire minutes.
    pub fn add_edge(&mut self, a: &str, b: &str, minutes: f64, with_reverse: bool) {
        let ms = (minutes * ONE_MIN_MS as f64).round().max(0.0) as u64;
        self.durations.insert((a.to_owned(), b.to_owned()), ms);
        if with_reverse {
            self.durations.insert((b.to_owned(), a.to_owned()), ms);
        }
    }

    /// Build from a distance matrix (metres) and a vehicle speed (metres per
    /// minute), skipping the diagonal.
    pub fn from_distance_matrix(stops: &[String], matrix: &[Vec<f64>], speed: f64) -> Self {
        let mut network = Self::new();
        for (a, row) in stops.iter().zip(matrix) {
            for (b, distance) in stops.iter().zip(row) {
                if a == b {
                    continue;
                }
                network.add_edge(a, b, distance / speed, false);
            }
        }
        network
    }

    /// Duration in ms between two stops; `None` when the pair is not
    /// connected.
    pub fn duration_ms(&self, a: &str, b: &str) -> Option<u64> {
        if a == b {
            return Some(0);
        }
        self.durations.get(&(a.to_owned(), b.to_owned())).copied()
    }

    /// Duration in wire minutes between two stops.
    pub fn duration_min(&self, a: &str, b: &str) -> Option<f64> {
        self.duration_ms(a, b)
            .map(|ms| ms as f64 / ONE_MIN_MS as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edges_and_self_loops() {
        let mut network = Network::new();
        network.add_edge("Stop1", "Stop2", 30.0, true);
        assert_eq!(network.duration_ms("Stop1", "Stop2"), Some(30 * ONE_MIN_MS));
        assert_eq!(network.duration_ms("Stop2", "Stop1"), Some(30 * ONE_MIN_MS));
        assert_eq!(network.duration_ms("Stop1", "Stop1"), Some(0));
        assert_eq!(network.duration_ms("Stop1", "Stop3"), None);
    }

    #[test]
    fn distance_matrix_uses_speed() {
        let stops = vec!["A".to_string(), "B".to_string()];
        let matrix = vec![vec![0.0, 600.0], vec![600.0, 0.0]];
        let network = Network::from_distance_matrix(&stops, &matrix, 300.0);
        assert_eq!(network.duration_min("A", "B"), Some(2.0));
    }
}
