//! Cluster connection: group cities by proximity and connect each group.
//!
//! Uses leader clustering. Cities are visited in snapshot order; each one
//! joins the cluster whose seed is nearest, provided that seed lies within
//! [`Cluster::threshold`]. Otherwise the city seeds a new cluster. Seeds are
//! kept in an R\*-tree so the nearest-seed query stays logarithmic.
//!
//! Within a cluster, members are linked according to [`Topology`]. No edge
//! ever crosses between clusters, so a singleton cluster leaves its city
//! unconnected.

use rstar::RTree;
use rstar::primitives::GeomWithData;
use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::greedy::nearest_neighbor_order;
use crate::strategy::{Connect, StrategyError};
use crate::types::{City, EdgeMap, chain_edges};

/// How members of one cluster are linked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topology {
    /// Nearest-neighbour chain starting at the cluster's seed.
    #[default]
    Chain,
    /// Every member points at the cluster's seed.
    Star,
}

/// Proximity clustering strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    /// Maximum distance from a city to its cluster's seed (inclusive).
    #[serde(default = "Cluster::default_threshold")]
    pub threshold: f64,

    /// Intra-cluster link shape.
    #[serde(default)]
    pub topology: Topology,
}

impl Cluster {
    /// Default seed radius in canvas pixels.
    pub const DEFAULT_THRESHOLD: f64 = 100.0;

    const fn default_threshold() -> f64 {
        Self::DEFAULT_THRESHOLD
    }

    /// Check that the threshold is a finite, non-negative distance.
    ///
    /// # Errors
    ///
    /// Returns [`StrategyError::InvalidConfig`] otherwise.
    pub fn validate(&self) -> Result<(), StrategyError> {
        if !self.threshold.is_finite() || self.threshold < 0.0 {
            return Err(StrategyError::InvalidConfig(format!(
                "cluster threshold must be finite and non-negative, got {}",
                self.threshold
            )));
        }
        Ok(())
    }
}

impl Default for Cluster {
    fn default() -> Self {
        Self {
            threshold: Self::DEFAULT_THRESHOLD,
            topology: Topology::default(),
        }
    }
}

impl Connect for Cluster {
    fn connect(&self, cities: &[City], cancel: &CancelToken) -> Result<EdgeMap, StrategyError> {
        if cities.len() < 2 {
            return Ok(EdgeMap::new());
        }

        let clusters = leader_clusters(cities, self.threshold, cancel)?;

        let mut edges = EdgeMap::new();
        for members in clusters.iter().filter(|m| m.len() >= 2) {
            let seed = members[0];
            match self.topology {
                Topology::Chain => {
                    let order = nearest_neighbor_order(cities, members, seed, cancel)?;
                    for (from, to) in chain_edges(cities, &order).iter() {
                        edges.insert(from, to);
                    }
                }
                Topology::Star => {
                    for &member in &members[1..] {
                        cancel.check()?;
                        edges.insert(cities[member].id, cities[seed].id);
                    }
                }
            }
        }

        Ok(edges)
    }
}

/// A seed position tagged with the index of the cluster it leads.
type SeedEntry = GeomWithData<[f64; 2], usize>;

/// Partition `cities` into clusters; the first member of each is its seed.
///
/// Polls `cancel` once per city.
fn leader_clusters(
    cities: &[City],
    threshold: f64,
    cancel: &CancelToken,
) -> Result<Vec<Vec<usize>>, StrategyError> {
    let threshold_sq = threshold * threshold;
    let mut seeds: RTree<SeedEntry> = RTree::new();
    let mut clusters: Vec<Vec<usize>> = Vec::new();

    for (idx, city) in cities.iter().enumerate() {
        cancel.check()?;
        let query = [city.position.x, city.position.y];
        let joined = seeds.nearest_neighbor_iter(&query).next().and_then(|seed| {
            let leader = cities[clusters[seed.data][0]].position;
            (city.position.distance_squared(leader) <= threshold_sq).then_some(seed.data)
        });

        if let Some(cluster) = joined {
            clusters[cluster].push(idx);
        } else {
            seeds.insert(SeedEntry::new(query, clusters.len()));
            clusters.push(vec![idx]);
        }
    }

    Ok(clusters)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{CityId, Point};

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
    fn default_threshold_and_topology() {
        let cluster = Cluster::default();
        assert!((cluster.threshold - Cluster::DEFAULT_THRESHOLD).abs() < f64::EPSILON);
        assert_eq!(cluster.topology, Topology::Chain);
    }

    #[test]
    fn tight_threshold_separates_far_city() {
        // A(0,0) B(10,0) C(10,10): C is 14.1 from seed A, so it starts its
        // own cluster and stays unconnected.
        let input = cities(&[(0.0, 0.0), (10.0, 0.0), (10.0, 10.0)]);
        let cluster = Cluster {
            threshold: 12.0,
            topology: Topology::Chain,
        };
        let edges = cluster.connect(&input, &CancelToken::new()).unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges.get(CityId(1)), Some(CityId(2)));
        assert!(!edges.touches(CityId(3)));
    }

    #[test]
    fn threshold_is_inclusive() {
        let input = cities(&[(0.0, 0.0), (5.0, 0.0)]);
        let cluster = Cluster {
            threshold: 5.0,
            topology: Topology::Chain,
        };
        let edges = cluster.connect(&input, &CancelToken::new()).unwrap();
        assert_eq!(edges.get(CityId(1)), Some(CityId(2)));
    }

    #[test]
    fn no_edges_cross_clusters() {
        let input = cities(&[
            (0.0, 0.0),
            (1.0, 0.0),
            (500.0, 500.0),
            (2.0, 1.0),
            (501.0, 500.0),
        ]);
        let cluster = Cluster {
            threshold: 10.0,
            topology: Topology::Chain,
        };
        let edges = cluster.connect(&input, &CancelToken::new()).unwrap();

        let near = |id: CityId| id.get() != 3 && id.get() != 5;
        for (from, to) in edges.iter() {
            assert_eq!(near(from), near(to), "edge {from} -> {to} crosses clusters");
        }
        assert_eq!(edges.len(), 3);
    }

    #[test]
    fn star_points_members_at_seed() {
        let input = cities(&[(0.0, 0.0), (3.0, 0.0), (0.0, 3.0), (-3.0, 0.0)]);
        let cluster = Cluster {
            threshold: 5.0,
            topology: Topology::Star,
        };
        let edges = cluster.connect(&input, &CancelToken::new()).unwrap();
        assert_eq!(edges.len(), 3);
        for id in 2..=4 {
            assert_eq!(edges.get(CityId(id)), Some(CityId(1)));
        }
    }

    #[test]
    fn city_joins_nearest_seed() {
        // Seeds at x=0 and x=20; the city at x=12 is within 15 of both but
        // nearer to the second.
        let input = cities(&[(0.0, 0.0), (20.0, 0.0), (12.0, 0.0)]);
        let cluster = Cluster {
            threshold: 15.0,
            topology: Topology::Star,
        };
        let edges = cluster.connect(&input, &CancelToken::new()).unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges.get(CityId(3)), Some(CityId(2)));
    }

    #[test]
    fn duplicate_positions_share_a_cluster() {
        let input = cities(&[(4.0, 4.0), (4.0, 4.0)]);
        let cluster = Cluster {
            threshold: 0.0,
            topology: Topology::Chain,
        };
        let edges = cluster.connect(&input, &CancelToken::new()).unwrap();
        assert_eq!(edges.get(CityId(1)), Some(CityId(2)));
    }

    #[test]
    fn negative_threshold_is_invalid() {
        let cluster = Cluster {
            threshold: -1.0,
            topology: Topology::Chain,
        };
        assert!(matches!(
            cluster.validate(),
            Err(StrategyError::InvalidConfig(_))
        ));
    }

    #[test]
    fn single_cluster_pass_observes_cancellation() {
        // Every city joins the first seed, so no new cluster ever forms.
        #[allow(clippy::cast_precision_loss)]
        let input: Vec<City> = (0..500_000u64)
            .map(|i| City {
                id: CityId(i + 1),
                position: Point::new((i % 1000) as f64 * 0.001, (i / 1000) as f64 * 0.001),
                name: String::new(),
            })
            .collect();
        let token = CancelToken::new();
        let canceller = {
            let token = token.clone();
            std::thread::spawn(move || {
                std::thread::sleep(std::time::Duration::from_millis(5));
                token.cancel();
            })
        };

        let result = leader_clusters(&input, 10.0, &token);
        canceller.join().unwrap();

        assert_eq!(result, Err(StrategyError::Cancelled));
    }

    #[test]
    fn cancelled_token_produces_nothing() {
        let input = cities(&[(0.0, 0.0), (1.0, 0.0)]);
        let token = CancelToken::new();
        token.cancel();
        assert_eq!(
            Cluster::default().connect(&input, &token),
            Err(StrategyError::Cancelled)
        );
    }
}
