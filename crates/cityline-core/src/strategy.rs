//! Connection strategies: compute an [`EdgeMap`] over a snapshot of cities.
//!
//! This module defines the [`Connect`] trait every algorithm implements and
//! the [`Strategy`] enum the supervisor dispatches on at runtime. The enum
//! carries each algorithm's parameters, so a strategy selection is a single
//! serializable value.
//!
//! # Cancellation contract
//!
//! Every implementation of [`Connect::connect`] must poll its
//! [`CancelToken`] often enough that the work done between two polls is
//! bounded by a constant, independent of the number of cities. When the
//! token is cancelled the implementation returns
//! [`StrategyError::Cancelled`] and produces no edges. Implementations never
//! hold a lock across a poll point and never touch the live registry; they
//! only read the city slice they were given.

use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::cluster::Cluster;
use crate::exact::Exact;
use crate::greedy::Greedy;
use crate::types::{City, EdgeMap};

/// Trait for connection strategies.
///
/// Input: an immutable list of cities (possibly empty, possibly with
/// duplicate positions) and a cancellation token.
/// Output: a successor mapping over those cities, or an early exit.
pub trait Connect {
    /// Compute the edge mapping for `cities`.
    ///
    /// Fewer than two cities always yields an empty mapping.
    ///
    /// # Errors
    ///
    /// Returns [`StrategyError::Cancelled`] if `cancel` fires before the
    /// mapping is complete. Strategies with a size ceiling return
    /// [`StrategyError::TooManyCities`] instead of starting.
    fn connect(&self, cities: &[City], cancel: &CancelToken) -> Result<EdgeMap, StrategyError>;
}

/// Selects which connection strategy to run, with its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Strategy {
    /// Nearest-neighbour chain. Fast heuristic, O(N²).
    Greedy(Greedy),

    /// Brute-force shortest open path over every ordering.
    ///
    /// Exact, but factorial in the number of cities; refuses snapshots
    /// above its configured ceiling.
    Exact(Exact),

    /// Proximity clusters connected internally, never across clusters.
    Cluster(Cluster),
}

impl Default for Strategy {
    fn default() -> Self {
        Self::Greedy(Greedy::default())
    }
}

impl Strategy {
    /// Short lowercase name, used in logs and diagnostics.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Greedy(_) => "greedy",
            Self::Exact(_) => "exact",
            Self::Cluster(_) => "cluster",
        }
    }

    /// Check the strategy's parameters.
    ///
    /// # Errors
    ///
    /// Returns [`StrategyError::InvalidConfig`] describing the first
    /// offending parameter.
    pub fn validate(&self) -> Result<(), StrategyError> {
        match self {
            Self::Greedy(_) => Ok(()),
            Self::Exact(exact) => exact.validate(),
            Self::Cluster(cluster) => cluster.validate(),
        }
    }
}

impl Connect for Strategy {
    fn connect(&self, cities: &[City], cancel: &CancelToken) -> Result<EdgeMap, StrategyError> {
        self.validate()?;
        match self {
            Self::Greedy(greedy) => greedy.connect(cities, cancel),
            Self::Exact(exact) => exact.connect(cities, cancel),
            Self::Cluster(cluster) => cluster.connect(cities, cancel),
        }
    }
}

/// Ways a strategy run can end without a mapping.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StrategyError {
    /// The run was superseded and stopped at a poll point.
    ///
    /// Expected during normal editing; never shown to the user.
    #[error("strategy run was cancelled")]
    Cancelled,

    /// The snapshot exceeds the strategy's size ceiling.
    #[error("{count} cities exceed the limit of {limit} for this strategy")]
    TooManyCities {
        /// Number of cities in the snapshot.
        count: usize,
        /// Largest snapshot the strategy accepts.
        limit: usize,
    },

    /// Strategy parameters are out of range.
    #[error("invalid strategy configuration: {0}")]
    InvalidConfig(String),
}
