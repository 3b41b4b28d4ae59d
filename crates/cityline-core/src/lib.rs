//! cityline-core: asynchronous city connection engine.
//!
//! Holds a set of named cities on a 2D canvas and keeps a directed edge
//! mapping between them up to date. Edges come from one of several
//! pluggable strategies:
//!
//! - [`Greedy`]: nearest-neighbour chain through every city.
//! - [`Exact`]: brute-force shortest open path, for small sets.
//! - [`Cluster`]: proximity clusters, connected internally only.
//!
//! Strategy runs are expensive, so the [`Supervisor`] runs them on a
//! background thread. Every edit supersedes the run in flight; a run's
//! result is committed to the [`CityRegistry`] only if no newer edit has
//! happened since it was dispatched. Collaborators learn about changes
//! through the [`ChangeNotifier`].
//!
//! This crate has **no rendering or input handling**. It operates on
//! in-memory cities and returns structured data.

pub mod cancel;
pub mod cluster;
pub mod diagnostics;
pub mod exact;
pub mod greedy;
pub mod notify;
pub mod registry;
pub mod strategy;
pub mod supervisor;
pub mod types;

pub use cancel::CancelToken;
pub use cluster::{Cluster, Topology};
pub use diagnostics::{Clock, RunDiagnostics, SystemClock, connect_with_diagnostics};
pub use exact::Exact;
pub use greedy::Greedy;
pub use notify::{ChangeNotifier, ListenerId};
pub use registry::{CityRegistry, RegistryError, RegistryView};
pub use strategy::{Connect, Strategy, StrategyError};
pub use supervisor::{ConnectionMode, Status, Supervisor, SupervisorConfig, SupervisorError};
pub use types::{City, CityId, EdgeMap, NewCity, Point, Snapshot};

/// Run `strategy` over `cities` on the calling thread.
///
/// Convenience for tools and tests that do not need cancellation. The
/// run can still fail with [`StrategyError::TooManyCities`] or
/// [`StrategyError::InvalidConfig`].
///
/// # Errors
///
/// Propagates the strategy's [`StrategyError`]. Never returns
/// [`StrategyError::Cancelled`].
pub fn connect(cities: &[City], strategy: &Strategy) -> Result<EdgeMap, StrategyError> {
    strategy.connect(cities, &CancelToken::new())
}
