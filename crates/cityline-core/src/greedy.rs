//! Greedy connection: nearest-neighbour chain through every city.
//!
//! Starting from one city, repeatedly append the nearest city not yet in
//! the chain. Distances are Euclidean; ties go to the city that comes first
//! in the snapshot, so the result is deterministic for a given start and
//! snapshot order.

use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::strategy::{Connect, StrategyError};
use crate::types::{City, CityId, EdgeMap, chain_edges};

/// Nearest-neighbour chain strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Greedy {
    /// City to start the chain from.
    ///
    /// `None`, or an id not present in the snapshot, starts from the first
    /// city of the snapshot.
    #[serde(default)]
    pub start: Option<CityId>,
}

impl Greedy {
    /// Greedy chain starting from `start`.
    #[must_use]
    pub const fn starting_at(start: CityId) -> Self {
        Self { start: Some(start) }
    }
}

impl Connect for Greedy {
    fn connect(&self, cities: &[City], cancel: &CancelToken) -> Result<EdgeMap, StrategyError> {
        if cities.len() < 2 {
            return Ok(EdgeMap::new());
        }

        let start = self
            .start
            .and_then(|id| cities.iter().position(|c| c.id == id))
            .unwrap_or(0);
        let members: Vec<usize> = (0..cities.len()).collect();
        let order = nearest_neighbor_order(cities, &members, start, cancel)?;
        Ok(chain_edges(cities, &order))
    }
}

/// Order `members` (indices into `cities`) by greedy nearest neighbour,
/// beginning at `start`.
///
/// `start` must be one of `members`. Polls `cancel` once per city appended
/// to the chain. The scan for each city is linear in `members.len()`.
pub(crate) fn nearest_neighbor_order(
    cities: &[City],
    members: &[usize],
    start: usize,
    cancel: &CancelToken,
) -> Result<Vec<usize>, StrategyError> {
    let n = members.len();
    let mut visited = vec![false; n];
    let mut order = Vec::with_capacity(n);

    if let Some(slot) = members.iter().position(|&m| m == start) {
        visited[slot] = true;
        order.push(start);
    } else {
        return Ok(order);
    }

    for _ in 1..n {
        cancel.check()?;

        let current = cities[order[order.len() - 1]].position;
        let mut best: Option<usize> = None;
        let mut best_dist = f64::INFINITY;

        for (slot, &candidate) in members.iter().enumerate() {
            if visited[slot] {
                continue;
            }
            let dist = current.distance_squared(cities[candidate].position);
            if dist < best_dist {
                best_dist = dist;
                best = Some(slot);
            }
        }

        // At least one member is unvisited while the loop runs; a NaN
        // coordinate is the only way `best` stays empty.
        let Some(slot) = best.or_else(|| visited.iter().position(|v| !v)) else {
            break;
        };
        visited[slot] = true;
        order.push(members[slot]);
    }

    Ok(order)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::Point;

    fn cities(coords: &[(f64, f64)]) -> Vec<City> {
        coords
            .iter()
            .enumerate()
            .map(|(i, &(x, y))| City {
                id: CityId(i as u64 + 1),
                position: Point::new(x, y),
                name: format!("c{i}"),
            })
            .collect()
    }

    #[test]
    fn empty_input_returns_empty() {
        let edges = Greedy::default().connect(&[], &CancelToken::new()).unwrap();
        assert!(edges.is_empty());
    }

    #[test]
    fn single_city_has_no_self_edge() {
        let input = cities(&[(5.0, 5.0)]);
        let edges = Greedy::default().connect(&input, &CancelToken::new()).unwrap();
        assert!(edges.is_empty());
    }

    #[test]
    fn triangle_from_first_city() {
        // A(0,0) B(10,0) C(10,10): A -> B -> C.
        let input = cities(&[(0.0, 0.0), (10.0, 0.0), (10.0, 10.0)]);
        let edges = Greedy::default().connect(&input, &CancelToken::new()).unwrap();
        assert_eq!(edges.len(), 2);
        assert_eq!(edges.get(CityId(1)), Some(CityId(2)));
        assert_eq!(edges.get(CityId(2)), Some(CityId(3)));
        assert_eq!(edges.get(CityId(3)), None);
    }

    #[test]
    fn nearer_city_visited_first() {
        // Start at (0,0). (100,100) is listed before (1,1) but is farther.
        let input = cities(&[(0.0, 0.0), (100.0, 100.0), (1.0, 1.0)]);
        let edges = Greedy::default().connect(&input, &CancelToken::new()).unwrap();
        assert_eq!(edges.get(CityId(1)), Some(CityId(3)));
        assert_eq!(edges.get(CityId(3)), Some(CityId(2)));
    }

    #[test]
    fn explicit_start_is_honoured() {
        let input = cities(&[(0.0, 0.0), (10.0, 0.0), (20.0, 0.0)]);
        let edges = Greedy::starting_at(CityId(3))
            .connect(&input, &CancelToken::new())
            .unwrap();
        assert_eq!(edges.get(CityId(3)), Some(CityId(2)));
        assert_eq!(edges.get(CityId(2)), Some(CityId(1)));
    }

    #[test]
    fn unknown_start_falls_back_to_first_city() {
        let input = cities(&[(0.0, 0.0), (10.0, 0.0)]);
        let edges = Greedy::starting_at(CityId(99))
            .connect(&input, &CancelToken::new())
            .unwrap();
        assert_eq!(edges.get(CityId(1)), Some(CityId(2)));
    }

    #[test]
    fn duplicate_positions_stay_distinct() {
        let input = cities(&[(3.0, 3.0), (3.0, 3.0), (3.0, 3.0)]);
        let edges = Greedy::default().connect(&input, &CancelToken::new()).unwrap();
        assert_eq!(edges.len(), 2);
        for city in &input {
            assert!(edges.touches(city.id), "{} missing from chain", city.id);
        }
    }

    #[test]
    fn ties_break_by_snapshot_order() {
        // Both (1,0) and (-1,0) are 1 away from the origin.
        let input = cities(&[(0.0, 0.0), (1.0, 0.0), (-1.0, 0.0)]);
        let edges = Greedy::default().connect(&input, &CancelToken::new()).unwrap();
        assert_eq!(edges.get(CityId(1)), Some(CityId(2)));
    }

    #[test]
    fn cancelled_token_stops_before_any_edge() {
        let input = cities(&[(0.0, 0.0), (1.0, 0.0), (2.0, 0.0)]);
        let token = CancelToken::new();
        token.cancel();
        let result = Greedy::default().connect(&input, &token);
        assert_eq!(result, Err(StrategyError::Cancelled));
    }

    #[test]
    fn chain_visits_every_city_once() {
        let coords: Vec<(f64, f64)> = (0..25)
            .map(|i| (f64::from(i * 7 % 11), f64::from(i * 5 % 13)))
            .collect();
        let input = cities(&coords);
        let edges = Greedy::default().connect(&input, &CancelToken::new()).unwrap();

        assert_eq!(edges.len(), input.len() - 1);
        for city in &input {
            assert!(edges.touches(city.id));
        }
    }
}
