//! Computation supervisor: keeps exactly one strategy run current.
//!
//! Every trigger (cities added, moved, removed or cleared, strategy changed,
//! explicit recompute) goes through the same sequence:
//!
//! 1. bump the generation counter and cancel the current run's token
//!    without waiting for it;
//! 2. snapshot the registry;
//! 3. dispatch a fresh run on a background thread with a fresh token;
//! 4. when the run finishes, commit its edges only if its generation is
//!    still the current one, otherwise drop them;
//! 5. notify listeners after a commit.
//!
//! Registry mutations performed through the supervisor happen under the
//! same lock as the generation bump, so a finishing run can never commit
//! between a mutation and the trigger it causes. Mutating the registry
//! directly bypasses that protection; collaborators should go through the
//! supervisor and use the registry handle for reads only.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, trace, warn};

use crate::cancel::CancelToken;
use crate::diagnostics::{RunDiagnostics, SystemClock, connect_with_diagnostics};
use crate::notify::ChangeNotifier;
use crate::registry::{CityRegistry, RegistryError};
use crate::strategy::{Strategy, StrategyError};
use crate::types::{City, CityId, EdgeMap, NewCity, Point, Snapshot};

/// How edges are produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionMode {
    /// Recompute with this strategy after every trigger.
    Automatic(Strategy),
    /// The user draws edges with [`Supervisor::connect`]; nothing is
    /// recomputed.
    Manual,
}

impl Default for ConnectionMode {
    fn default() -> Self {
        Self::Automatic(Strategy::default())
    }
}

/// Supervisor settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Initial connection mode.
    #[serde(default)]
    pub mode: ConnectionMode,

    /// Hit-test radius for [`Supervisor::city_at`], in canvas pixels.
    #[serde(default = "SupervisorConfig::default_pick_radius")]
    pub pick_radius: f64,
}

impl SupervisorConfig {
    /// Default hit-test radius.
    pub const DEFAULT_PICK_RADIUS: f64 = 8.0;

    const fn default_pick_radius() -> f64 {
        Self::DEFAULT_PICK_RADIUS
    }

    /// Check the pick radius and the initial strategy.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::InvalidConfig`] for a negative or
    /// non-finite `pick_radius`, or [`SupervisorError::Strategy`] for an
    /// invalid strategy.
    pub fn validate(&self) -> Result<(), SupervisorError> {
        if !self.pick_radius.is_finite() || self.pick_radius < 0.0 {
            return Err(SupervisorError::InvalidConfig(format!(
                "pick_radius must be finite and non-negative, got {}",
                self.pick_radius
            )));
        }
        if let ConnectionMode::Automatic(strategy) = &self.mode {
            strategy.validate()?;
        }
        Ok(())
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            mode: ConnectionMode::default(),
            pick_radius: Self::DEFAULT_PICK_RADIUS,
        }
    }
}

/// What the supervisor is doing, for status display.
#[derive(Debug, Clone, PartialEq)]
pub enum Status {
    /// Nothing has been computed yet, or the last run was cancelled.
    Idle,
    /// A run for `generation` is in flight.
    Computing {
        /// Generation of the in-flight run.
        generation: u64,
        /// Strategy name.
        strategy: &'static str,
    },
    /// The edges of `generation` are committed.
    Ready {
        /// Generation whose result is in the registry.
        generation: u64,
        /// Number of committed edges.
        edge_count: usize,
    },
    /// The strategy declined the snapshot; the previous edges stay.
    TooManyCities {
        /// Generation that was declined.
        generation: u64,
        /// Cities in the snapshot.
        count: usize,
        /// The strategy's ceiling.
        limit: usize,
    },
    /// Edges are drawn by hand.
    Manual,
}

/// Errors returned by supervisor triggers.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// The registry refused the mutation.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The requested strategy is misconfigured.
    #[error(transparent)]
    Strategy(#[from] StrategyError),

    /// Supervisor settings are out of range.
    #[error("invalid supervisor configuration: {0}")]
    InvalidConfig(String),

    /// The background worker thread could not be started.
    #[error("failed to spawn strategy worker: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Owns the lifecycle of background strategy runs.
pub struct Supervisor {
    shared: Arc<Shared>,
    pick_radius: f64,
}

struct Shared {
    registry: Arc<CityRegistry>,
    notifier: Arc<ChangeNotifier>,
    control: Mutex<Control>,
}

struct Control {
    generation: u64,
    mode: ConnectionMode,
    current: Option<CancelToken>,
    workers: Vec<JoinHandle<()>>,
    status: Status,
    last_run: Option<RunDiagnostics>,
}

impl Supervisor {
    /// Create a supervisor over `registry`, reporting to `notifier`.
    ///
    /// Nothing is computed until the first trigger; call
    /// [`recompute`](Self::recompute) if the registry is already populated.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::Strategy`] if the configured strategy is
    /// invalid, or [`SupervisorError::InvalidConfig`] if `pick_radius` is not
    /// a finite, non-negative distance.
    pub fn new(
        registry: Arc<CityRegistry>,
        notifier: Arc<ChangeNotifier>,
        config: SupervisorConfig,
    ) -> Result<Self, SupervisorError> {
        config.validate()?;
        let status = match config.mode {
            ConnectionMode::Automatic(_) => Status::Idle,
            ConnectionMode::Manual => Status::Manual,
        };
        Ok(Self {
            shared: Arc::new(Shared {
                registry,
                notifier,
                control: Mutex::new(Control {
                    generation: 0,
                    mode: config.mode,
                    current: None,
                    workers: Vec::new(),
                    status,
                    last_run: None,
                }),
            }),
            pick_radius: config.pick_radius,
        })
    }

    /// The registry this supervisor writes to.
    #[must_use]
    pub fn registry(&self) -> &Arc<CityRegistry> {
        &self.shared.registry
    }

    /// The notifier fired after every visible change.
    #[must_use]
    pub fn notifier(&self) -> &Arc<ChangeNotifier> {
        &self.shared.notifier
    }

    /// Add cities and recompute.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::Spawn`] if the worker cannot be started.
    pub fn add_cities(
        &self,
        cities: impl IntoIterator<Item = NewCity>,
    ) -> Result<Vec<CityId>, SupervisorError> {
        self.mutate(|registry| Ok(registry.add_cities(cities)))
    }

    /// Add one city and recompute.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::Spawn`] if the worker cannot be started.
    pub fn create_city(
        &self,
        name: impl Into<String>,
        position: Point,
    ) -> Result<CityId, SupervisorError> {
        self.mutate(|registry| Ok(registry.create_city(name, position)))
    }

    /// Move a city and recompute.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::Registry`] if the city is unknown, or
    /// [`SupervisorError::Spawn`] if the worker cannot be started.
    pub fn move_city(&self, id: CityId, position: Point) -> Result<(), SupervisorError> {
        self.mutate(|registry| registry.move_city(id, position))
    }

    /// Remove a city (and its edges) and recompute.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::Registry`] if the city is unknown, or
    /// [`SupervisorError::Spawn`] if the worker cannot be started.
    pub fn remove_city(&self, id: CityId) -> Result<City, SupervisorError> {
        self.mutate(|registry| registry.remove_city(id))
    }

    /// Remove every city and edge, superseding any run in flight.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::Spawn`] if the worker cannot be started.
    pub fn clear(&self) -> Result<(), SupervisorError> {
        self.mutate(|registry| {
            registry.clear();
            Ok(())
        })
    }

    /// Rename a city. Names do not affect geometry, so nothing is
    /// recomputed; listeners are still notified.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::Registry`] if the city is unknown.
    pub fn rename_city(&self, id: CityId, name: impl Into<String>) -> Result<(), SupervisorError> {
        self.shared.registry.rename_city(id, name)?;
        self.shared.notifier.notify();
        Ok(())
    }

    /// Draw a single edge by hand.
    ///
    /// Meant for [`ConnectionMode::Manual`]. In automatic mode the edge
    /// lasts until the next committed result replaces the mapping.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::Registry`] if either city is unknown or
    /// `from == to`.
    pub fn connect(&self, from: CityId, to: CityId) -> Result<(), SupervisorError> {
        self.shared.registry.connect(from, to)?;
        self.shared.notifier.notify();
        Ok(())
    }

    /// Switch connection mode and recompute. Returns the new generation.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::Strategy`] if the strategy is invalid (the
    /// current mode is kept), or [`SupervisorError::Spawn`] if the worker
    /// cannot be started.
    pub fn set_mode(&self, mode: ConnectionMode) -> Result<u64, SupervisorError> {
        if let ConnectionMode::Automatic(strategy) = &mode {
            strategy.validate()?;
        }
        let outcome = {
            let mut control = self.shared.control.lock();
            debug!(?mode, "connection mode changed");
            control.mode = mode;
            self.shared.restart(&mut control)
        };
        self.shared.notifier.notify();
        outcome
    }

    /// Shorthand for `set_mode(ConnectionMode::Automatic(strategy))`.
    ///
    /// # Errors
    ///
    /// See [`set_mode`](Self::set_mode).
    pub fn set_strategy(&self, strategy: Strategy) -> Result<u64, SupervisorError> {
        self.set_mode(ConnectionMode::Automatic(strategy))
    }

    /// Supersede the current run with a fresh one over the same cities.
    /// Returns the new generation.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::Spawn`] if the worker cannot be started.
    pub fn recompute(&self) -> Result<u64, SupervisorError> {
        let mut control = self.shared.control.lock();
        self.shared.restart(&mut control)
    }

    /// Cancel the current run without starting another. The committed
    /// edges stay as they are.
    pub fn cancel(&self) {
        let mut control = self.shared.control.lock();
        if Shared::supersede(&mut control) {
            control.status = match control.mode {
                ConnectionMode::Automatic(_) => Status::Idle,
                ConnectionMode::Manual => Status::Manual,
            };
        }
    }

    /// Block until every dispatched worker has exited.
    ///
    /// Triggers stay fire-and-forget; this exists for shutdown, tools, and
    /// tests that need a settled registry.
    pub fn wait_idle(&self) {
        loop {
            let workers = std::mem::take(&mut self.shared.control.lock().workers);
            if workers.is_empty() {
                return;
            }
            for worker in workers {
                if worker.join().is_err() {
                    error!("strategy worker panicked");
                }
            }
        }
    }

    /// The city within the pick radius nearest to `point`.
    #[must_use]
    pub fn city_at(&self, point: Point) -> Option<CityId> {
        self.shared.registry.find_city_at(point, self.pick_radius)
    }

    /// Current connection mode.
    #[must_use]
    pub fn mode(&self) -> ConnectionMode {
        self.shared.control.lock().mode.clone()
    }

    /// Current generation; bumped by every trigger.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.shared.control.lock().generation
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> Status {
        self.shared.control.lock().status.clone()
    }

    /// Diagnostics of the most recent committed run.
    #[must_use]
    pub fn last_run(&self) -> Option<RunDiagnostics> {
        self.shared.control.lock().last_run.clone()
    }

    /// Apply a registry mutation, then trigger, under the control lock.
    fn mutate<T>(
        &self,
        apply: impl FnOnce(&CityRegistry) -> Result<T, RegistryError>,
    ) -> Result<T, SupervisorError> {
        let outcome = {
            let mut control = self.shared.control.lock();
            let value = apply(&self.shared.registry)?;
            self.shared.restart(&mut control).map(|_| value)
        };
        self.shared.notifier.notify();
        outcome
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        Shared::supersede(&mut self.shared.control.lock());
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let control = self.shared.control.lock();
        f.debug_struct("Supervisor")
            .field("generation", &control.generation)
            .field("mode", &control.mode)
            .field("status", &control.status)
            .finish_non_exhaustive()
    }
}

impl Shared {
    /// Bump the generation and cancel the current run, if any.
    ///
    /// Returns `true` if a run was in flight.
    fn supersede(control: &mut Control) -> bool {
        control.generation += 1;
        control.workers.retain(|worker| !worker.is_finished());
        control.current.take().is_some_and(|token| {
            token.cancel();
            true
        })
    }

    /// Supersede the current run and dispatch the next one.
    fn restart(self: &Arc<Self>, control: &mut Control) -> Result<u64, SupervisorError> {
        if Self::supersede(control) {
            trace!(generation = control.generation, "cancelled superseded run");
        }
        let generation = control.generation;

        let strategy = match &control.mode {
            ConnectionMode::Manual => {
                control.status = Status::Manual;
                return Ok(generation);
            }
            ConnectionMode::Automatic(strategy) => strategy.clone(),
        };

        let snapshot = self.registry.snapshot();
        if snapshot.len() < 2 {
            self.commit(control, generation, EdgeMap::new(), None);
            return Ok(generation);
        }

        let name = strategy.name();
        debug!(
            generation,
            strategy = name,
            cities = snapshot.len(),
            "dispatching strategy run"
        );

        let token = CancelToken::new();
        let worker = {
            let shared = Arc::clone(self);
            let token = token.clone();
            thread::Builder::new()
                .name(format!("cityline-run-{generation}"))
                .spawn(move || shared.run(generation, &strategy, &snapshot, &token))
        };
        let worker = match worker {
            Ok(worker) => worker,
            Err(err) => {
                error!(generation, %err, "failed to spawn strategy worker");
                control.status = Status::Idle;
                return Err(err.into());
            }
        };

        control.current = Some(token);
        control.workers.push(worker);
        control.status = Status::Computing {
            generation,
            strategy: name,
        };
        Ok(generation)
    }

    /// Body of a background worker.
    fn run(&self, generation: u64, strategy: &Strategy, snapshot: &Snapshot, token: &CancelToken) {
        let outcome = connect_with_diagnostics(strategy, snapshot.cities(), token, &SystemClock);
        if self.settle(generation, outcome) {
            self.notifier.notify();
        }
    }

    /// Apply a finished run's outcome. Returns `true` if listeners should
    /// be notified.
    fn settle(
        &self,
        generation: u64,
        outcome: Result<(EdgeMap, RunDiagnostics), StrategyError>,
    ) -> bool {
        let mut control = self.control.lock();
        if control.generation != generation {
            debug!(
                generation,
                current = control.generation,
                "discarding superseded result"
            );
            return false;
        }
        control.current = None;

        match outcome {
            Ok((edges, diagnostics)) => self.commit(&mut control, generation, edges, Some(diagnostics)),
            Err(StrategyError::Cancelled) => {
                trace!(generation, "run cancelled");
                control.status = Status::Idle;
                false
            }
            Err(StrategyError::TooManyCities { count, limit }) => {
                warn!(generation, count, limit, "snapshot too large for strategy");
                control.status = Status::TooManyCities {
                    generation,
                    count,
                    limit,
                };
                true
            }
            Err(err @ StrategyError::InvalidConfig(_)) => {
                error!(generation, %err, "strategy rejected its configuration");
                control.status = Status::Idle;
                true
            }
        }
    }

    /// Commit `edges` for the current generation.
    fn commit(
        &self,
        control: &mut Control,
        generation: u64,
        edges: EdgeMap,
        diagnostics: Option<RunDiagnostics>,
    ) -> bool {
        let edge_count = edges.len();
        let committed = self.registry.commit_edges(edges);
        debug_assert!(
            committed.is_ok(),
            "current-generation result rejected: {committed:?}"
        );

        match committed {
            Ok(()) => {
                info!(generation, edges = edge_count, "committed edges");
                control.status = Status::Ready {
                    generation,
                    edge_count,
                };
                if let Some(mut diagnostics) = diagnostics {
                    diagnostics.generation = Some(generation);
                    control.last_run = Some(diagnostics);
                }
                true
            }
            Err(err) => {
                error!(generation, %err, "registry rejected current-generation result");
                control.status = Status::Idle;
                false
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::exact::Exact;

    fn supervisor(mode: ConnectionMode) -> Supervisor {
        Supervisor::new(
            Arc::new(CityRegistry::new()),
            Arc::new(ChangeNotifier::new()),
            SupervisorConfig {
                mode,
                ..SupervisorConfig::default()
            },
        )
        .unwrap()
    }

    fn triangle() -> Vec<NewCity> {
        vec![
            NewCity::new("A", 0.0, 0.0),
            NewCity::new("B", 10.0, 0.0),
            NewCity::new("C", 10.0, 10.0),
        ]
    }

    fn diagnostics() -> RunDiagnostics {
        RunDiagnostics {
            strategy: "greedy".to_owned(),
            generation: None,
            city_count: 3,
            edge_count: 1,
            total_length: 10.0,
            component_count: 2,
            duration: Duration::ZERO,
        }
    }

    #[test]
    fn stale_generation_is_never_committed() {
        let sup = supervisor(ConnectionMode::Manual);
        let ids = sup.add_cities(triangle()).unwrap();
        let stale = sup.generation();
        sup.recompute().unwrap();

        let edges: EdgeMap = [(ids[0], ids[1])].into_iter().collect();
        assert!(!sup.shared.settle(stale, Ok((edges.clone(), diagnostics()))));
        assert!(sup.registry().edges().is_empty());

        assert!(sup.shared.settle(sup.generation(), Ok((edges.clone(), diagnostics()))));
        assert_eq!(sup.registry().edges(), edges);
        assert_eq!(sup.last_run().unwrap().generation, Some(sup.generation()));
    }

    #[test]
    fn cancellation_outcome_is_silent() {
        let sup = supervisor(ConnectionMode::Manual);
        let ids = sup.add_cities(triangle()).unwrap();
        sup.connect(ids[0], ids[1]).unwrap();
        let before = sup.registry().edges();

        let notify = sup.shared.settle(sup.generation(), Err(StrategyError::Cancelled));

        assert!(!notify);
        assert_eq!(sup.registry().edges(), before);
        assert_eq!(sup.status(), Status::Idle);
    }

    #[test]
    fn greedy_commits_and_notifies() {
        let sup = supervisor(ConnectionMode::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        sup.notifier().subscribe(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let ids = sup.add_cities(triangle()).unwrap();
        sup.wait_idle();

        let edges = sup.registry().edges();
        assert_eq!(edges.get(ids[0]), Some(ids[1]));
        assert_eq!(edges.get(ids[1]), Some(ids[2]));
        assert_eq!(
            sup.status(),
            Status::Ready {
                generation: sup.generation(),
                edge_count: 2
            }
        );
        // One for the mutation, one for the commit.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn degenerate_snapshot_settles_inline() {
        let sup = supervisor(ConnectionMode::default());
        sup.create_city("Solo", Point::new(1.0, 1.0)).unwrap();

        assert!(sup.shared.control.lock().workers.is_empty());
        assert_eq!(
            sup.status(),
            Status::Ready {
                generation: 1,
                edge_count: 0
            }
        );
    }

    #[test]
    fn too_many_cities_keeps_previous_edges() {
        let sup = supervisor(ConnectionMode::default());
        sup.add_cities(triangle()).unwrap();
        sup.wait_idle();
        let before = sup.registry().edges();

        sup.set_strategy(Strategy::Exact(Exact { max_cities: 2 })).unwrap();
        sup.wait_idle();

        assert_eq!(sup.registry().edges(), before);
        assert!(matches!(
            sup.status(),
            Status::TooManyCities {
                count: 3,
                limit: 2,
                ..
            }
        ));
    }

    #[test]
    fn invalid_strategy_keeps_current_mode() {
        let sup = supervisor(ConnectionMode::default());
        let result = sup.set_strategy(Strategy::Exact(Exact { max_cities: 40 }));
        assert!(matches!(result, Err(SupervisorError::Strategy(_))));
        assert_eq!(sup.mode(), ConnectionMode::default());
        assert_eq!(sup.generation(), 0);
    }

    #[test]
    fn manual_mode_never_dispatches() {
        let sup = supervisor(ConnectionMode::Manual);
        let ids = sup.add_cities(triangle()).unwrap();
        sup.connect(ids[2], ids[0]).unwrap();
        sup.move_city(ids[1], Point::new(3.0, 3.0)).unwrap();

        assert!(sup.shared.control.lock().workers.is_empty());
        assert_eq!(sup.status(), Status::Manual);
        assert_eq!(sup.registry().edges().get(ids[2]), Some(ids[0]));
    }

    #[test]
    fn failed_mutation_does_not_bump_generation() {
        let sup = supervisor(ConnectionMode::default());
        let result = sup.move_city(CityId(42), Point::new(0.0, 0.0));
        assert!(matches!(result, Err(SupervisorError::Registry(_))));
        assert_eq!(sup.generation(), 0);
    }

    #[test]
    fn city_at_uses_pick_radius() {
        let sup = supervisor(ConnectionMode::Manual);
        let ids = sup.add_cities(triangle()).unwrap();
        assert_eq!(sup.city_at(Point::new(11.0, 9.0)), Some(ids[2]));
        assert_eq!(sup.city_at(Point::new(30.0, 30.0)), None);
    }

    #[test]
    fn bad_pick_radius_is_rejected() {
        for pick_radius in [f64::NAN, -1.0, f64::INFINITY] {
            let result = Supervisor::new(
                Arc::new(CityRegistry::new()),
                Arc::new(ChangeNotifier::new()),
                SupervisorConfig {
                    pick_radius,
                    ..SupervisorConfig::default()
                },
            );
            assert!(
                matches!(result, Err(SupervisorError::InvalidConfig(_))),
                "pick_radius {pick_radius} accepted"
            );
        }
    }

    #[test]
    fn zero_pick_radius_hits_exact_position() {
        let sup = Supervisor::new(
            Arc::new(CityRegistry::new()),
            Arc::new(ChangeNotifier::new()),
            SupervisorConfig {
                mode: ConnectionMode::Manual,
                pick_radius: 0.0,
            },
        )
        .unwrap();
        let id = sup.create_city("Dot", Point::new(2.0, 3.0)).unwrap();
        assert_eq!(sup.city_at(Point::new(2.0, 3.0)), Some(id));
        assert_eq!(sup.city_at(Point::new(2.5, 3.0)), None);
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: SupervisorConfig = serde_json::from_str(r#"{"mode":"manual"}"#).unwrap();
        assert_eq!(config.mode, ConnectionMode::Manual);
        assert!((config.pick_radius - SupervisorConfig::DEFAULT_PICK_RADIUS).abs() < f64::EPSILON);
    }
}
