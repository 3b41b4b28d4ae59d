//! Run diagnostics: timing and shape metrics for one strategy run.
//!
//! Every run dispatched by the [`Supervisor`](crate::Supervisor) records a
//! [`RunDiagnostics`]; the bench tool prints them for strategy comparison.
//!
//! Duration measurements use [`std::time::Duration`] (platform-agnostic).
//! [`SystemClock`] captures timestamps via the `web-time` crate, which uses
//! `performance.now()` on WASM and `std::time::Instant` on native.
//!
//! Durations are serialized as fractional seconds (`f64`) for JSON
//! compatibility, since `std::time::Duration` does not implement serde
//! traits.

use std::collections::HashMap;
use std::time::Duration;

use petgraph::algo::connected_components;
use petgraph::graph::UnGraph;
use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::strategy::{Connect, Strategy, StrategyError};
use crate::types::{City, EdgeMap};

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Source of timestamps for diagnostics.
pub trait Clock {
    /// Opaque timestamp type.
    type Instant;

    /// The current time.
    fn now(&self) -> Self::Instant;

    /// Time elapsed since `since`.
    fn elapsed(&self, since: &Self::Instant) -> Duration;
}

/// [`Clock`] backed by `web_time::Instant`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    type Instant = web_time::Instant;

    fn now(&self) -> web_time::Instant {
        web_time::Instant::now()
    }

    fn elapsed(&self, since: &web_time::Instant) -> Duration {
        since.elapsed()
    }
}

/// Diagnostics collected from a single successful strategy run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunDiagnostics {
    /// Strategy name (`greedy`, `exact`, `cluster`).
    pub strategy: String,
    /// Supervisor generation, when the run was dispatched by one.
    pub generation: Option<u64>,
    /// Cities in the snapshot.
    pub city_count: usize,
    /// Edges in the resulting mapping.
    pub edge_count: usize,
    /// Sum of Euclidean edge lengths.
    pub total_length: f64,
    /// Weakly connected components of the edge graph, isolated cities
    /// included.
    pub component_count: usize,
    /// Wall-clock duration of the run (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
}

impl RunDiagnostics {
    /// Measure `edges` computed over `cities`.
    #[must_use]
    pub fn measure(strategy: &Strategy, cities: &[City], edges: &EdgeMap, duration: Duration) -> Self {
        Self {
            strategy: strategy.name().to_owned(),
            generation: None,
            city_count: cities.len(),
            edge_count: edges.len(),
            total_length: edges.total_length(cities),
            component_count: component_count(cities, edges),
            duration,
        }
    }

    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Connection Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!("{:<16} {}", "Strategy", self.strategy));
        if let Some(generation) = self.generation {
            lines.push(format!("{:<16} {generation}", "Generation"));
        }
        lines.push(format!("{:<16} {}", "Cities", self.city_count));
        lines.push(format!("{:<16} {}", "Edges", self.edge_count));
        lines.push(format!("{:<16} {}", "Components", self.component_count));
        lines.push(format!("{:<16} {:.3}", "Total length", self.total_length));
        lines.push(format!(
            "{:<16} {:.3}ms",
            "Duration",
            duration_ms(self.duration)
        ));

        lines.join("\n")
    }
}

/// Run `strategy` over `cities` and measure it.
///
/// # Errors
///
/// Propagates the strategy's [`StrategyError`].
pub fn connect_with_diagnostics<C: Clock>(
    strategy: &Strategy,
    cities: &[City],
    cancel: &CancelToken,
    clock: &C,
) -> Result<(EdgeMap, RunDiagnostics), StrategyError> {
    let started = clock.now();
    let edges = strategy.connect(cities, cancel)?;
    let duration = clock.elapsed(&started);
    let diagnostics = RunDiagnostics::measure(strategy, cities, &edges, duration);
    Ok((edges, diagnostics))
}

/// Convert a `Duration` to milliseconds as `f64`.
#[must_use]
pub fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Count weakly connected components of the undirected edge graph.
pub(crate) fn component_count(cities: &[City], edges: &EdgeMap) -> usize {
    let mut graph = UnGraph::<(), ()>::with_capacity(cities.len(), edges.len());
    let nodes: HashMap<_, _> = cities.iter().map(|c| (c.id, graph.add_node(()))).collect();
    for (from, to) in edges.iter() {
        if let (Some(&a), Some(&b)) = (nodes.get(&from), nodes.get(&to)) {
            graph.add_edge(a, b, ());
        }
    }
    connected_components(&graph)
}
