//! Exact connection: brute-force shortest open path.
//!
//! Enumerates every ordering of the snapshot with Heap's algorithm and keeps
//! the one with the smallest total edge length. The objective is the same
//! open chain the greedy strategy builds, so the exact result is never
//! longer than the greedy one on the same input.
//!
//! An ordering and its reverse describe the same path; only the one whose
//! first index is smaller than its last is scored. The work is still
//! factorial, so snapshots above [`Exact::max_cities`] are refused with
//! [`StrategyError::TooManyCities`] rather than left to run for hours.

use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::strategy::{Connect, StrategyError};
use crate::types::{City, EdgeMap, chain_edges, path_length};

/// Brute-force shortest-path strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exact {
    /// Largest snapshot this strategy will attempt.
    #[serde(default = "Exact::default_max_cities")]
    pub max_cities: usize,
}

impl Exact {
    /// Default size ceiling. 9! orderings finish well under a second.
    pub const DEFAULT_MAX_CITIES: usize = 9;

    /// Hard upper bound for [`max_cities`](Self::max_cities).
    ///
    /// 12! is roughly 479 million orderings; anything past that is not
    /// interactive on any hardware.
    pub const MAX_SUPPORTED_CITIES: usize = 12;

    const fn default_max_cities() -> usize {
        Self::DEFAULT_MAX_CITIES
    }

    /// Check that the ceiling is within [`Self::MAX_SUPPORTED_CITIES`].
    ///
    /// # Errors
    ///
    /// Returns [`StrategyError::InvalidConfig`] if `max_cities` is above
    /// the supported bound.
    pub fn validate(&self) -> Result<(), StrategyError> {
        if self.max_cities > Self::MAX_SUPPORTED_CITIES {
            return Err(StrategyError::InvalidConfig(format!(
                "exact max_cities {} exceeds supported maximum {}",
                self.max_cities,
                Self::MAX_SUPPORTED_CITIES
            )));
        }
        Ok(())
    }
}

impl Default for Exact {
    fn default() -> Self {
        Self {
            max_cities: Self::DEFAULT_MAX_CITIES,
        }
    }
}

impl Connect for Exact {
    fn connect(&self, cities: &[City], cancel: &CancelToken) -> Result<EdgeMap, StrategyError> {
        let n = cities.len();
        if n < 2 {
            return Ok(EdgeMap::new());
        }
        if n > self.max_cities {
            return Err(StrategyError::TooManyCities {
                count: n,
                limit: self.max_cities,
            });
        }

        let best = shortest_open_path(cities, cancel)?;
        Ok(chain_edges(cities, &best))
    }
}

/// Iterative Heap's algorithm over all orderings of `0..cities.len()`.
///
/// Polls `cancel` once per generated ordering, whether or not it is scored.
fn shortest_open_path(cities: &[City], cancel: &CancelToken) -> Result<Vec<usize>, StrategyError> {
    let n = cities.len();
    let mut order: Vec<usize> = (0..n).collect();
    let mut best_order = order.clone();
    let mut best_len = path_length(cities, &order);
    cancel.check()?;

    let mut counters = vec![0usize; n];
    let mut i = 1;
    while i < n {
        if counters[i] < i {
            if i % 2 == 0 {
                order.swap(0, i);
            } else {
                order.swap(counters[i], i);
            }

            if order[0] < order[n - 1] {
                let len = path_length(cities, &order);
                if len < best_len {
                    best_len = len;
                    best_order.copy_from_slice(&order);
                }
            }
            cancel.check()?;

            counters[i] += 1;
            i = 1;
        } else {
            counters[i] = 0;
            i += 1;
        }
    }

    Ok(best_order)
}
