//! The city registry: authoritative city list and current edge mapping.
//!
//! A [`CityRegistry`] is shared by handle (`Arc<CityRegistry>`) between the
//! supervisor and every collaborator that draws or edits cities. There is no
//! process-wide instance.
//!
//! Cities and edges live behind a single lock. Every mutation that could
//! invalidate an edge (removing a city, clearing) repairs the edge map in
//! the same critical section, so no reader can observe an edge to a city
//! that no longer exists.

use parking_lot::RwLock;

use crate::types::{City, CityId, EdgeMap, NewCity, Point, Snapshot};

/// Errors returned by registry mutations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The referenced city is not (or no longer) in the registry.
    #[error("city {0} is not in the registry")]
    UnknownCity(CityId),

    /// An edge would connect a city to itself.
    #[error("city {0} cannot be connected to itself")]
    SelfEdge(CityId),
}

/// A consistent view of the registry: cities and edges read together.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryView {
    /// All cities, in insertion order.
    pub cities: Vec<City>,
    /// Current edge mapping; every id in it is present in `cities`.
    pub edges: EdgeMap,
    /// Registry revision this view was taken at.
    pub revision: u64,
}

#[derive(Debug, Default)]
struct State {
    cities: Vec<City>,
    edges: EdgeMap,
    next_id: u64,
    revision: u64,
}

impl State {
    fn index_of(&self, id: CityId) -> Option<usize> {
        self.cities.iter().position(|c| c.id == id)
    }

    fn contains(&self, id: CityId) -> bool {
        self.index_of(id).is_some()
    }

    fn push(&mut self, city: NewCity) -> CityId {
        let id = CityId(self.next_id);
        self.next_id += 1;
        self.cities.push(City {
            id,
            position: city.position,
            name: city.name,
        });
        id
    }

    fn validate(&self, edges: &EdgeMap) -> Result<(), RegistryError> {
        for (from, to) in edges.iter() {
            if !self.contains(from) {
                return Err(RegistryError::UnknownCity(from));
            }
            if !self.contains(to) {
                return Err(RegistryError::UnknownCity(to));
            }
        }
        Ok(())
    }
}

/// Shared city and edge state for one editing session.
#[derive(Debug, Default)]
pub struct CityRegistry {
    state: RwLock<State>,
}

impl CityRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append cities, keeping the existing ones. Returns the new ids in
    /// input order.
    ///
    /// Does not trigger recomputation by itself; go through the
    /// [`Supervisor`](crate::Supervisor) for that.
    pub fn add_cities(&self, cities: impl IntoIterator<Item = NewCity>) -> Vec<CityId> {
        let mut state = self.state.write();
        let ids: Vec<CityId> = cities.into_iter().map(|c| state.push(c)).collect();
        if !ids.is_empty() {
            state.revision += 1;
        }
        ids
    }

    /// Add a single city.
    pub fn create_city(&self, name: impl Into<String>, position: Point) -> CityId {
        let mut state = self.state.write();
        let id = state.push(NewCity {
            name: name.into(),
            position,
        });
        state.revision += 1;
        id
    }

    /// Remove every city and every edge in one step.
    pub fn clear(&self) {
        let mut state = self.state.write();
        state.cities.clear();
        state.edges = EdgeMap::new();
        state.revision += 1;
    }

    /// Remove one city together with all edges that start or end at it.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownCity`] if `id` is not present.
    pub fn remove_city(&self, id: CityId) -> Result<City, RegistryError> {
        let mut state = self.state.write();
        let idx = state.index_of(id).ok_or(RegistryError::UnknownCity(id))?;
        let city = state.cities.remove(idx);
        state.edges.remove_city(id);
        state.revision += 1;
        Ok(city)
    }

    /// Move a city. Its identity, and therefore every edge touching it, is
    /// preserved.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownCity`] if `id` is not present.
    pub fn move_city(&self, id: CityId, position: Point) -> Result<(), RegistryError> {
        let mut state = self.state.write();
        let idx = state.index_of(id).ok_or(RegistryError::UnknownCity(id))?;
        state.cities[idx].position = position;
        state.revision += 1;
        Ok(())
    }

    /// Change a city's display name.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownCity`] if `id` is not present.
    pub fn rename_city(&self, id: CityId, name: impl Into<String>) -> Result<(), RegistryError> {
        let mut state = self.state.write();
        let idx = state.index_of(id).ok_or(RegistryError::UnknownCity(id))?;
        state.cities[idx].name = name.into();
        state.revision += 1;
        Ok(())
    }

    /// Replace the entire edge mapping.
    ///
    /// The mapping is checked against the current city set first; if any
    /// key or value is missing the commit is refused and the previous
    /// mapping stays in place. This guards against applying a result that
    /// raced with a deletion.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownCity`] naming the first missing city.
    pub fn commit_edges(&self, edges: EdgeMap) -> Result<(), RegistryError> {
        let mut state = self.state.write();
        state.validate(&edges)?;
        state.edges = edges;
        state.revision += 1;
        Ok(())
    }

    /// Add or replace a single edge `from -> to`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::SelfEdge`] if `from == to`, or
    /// [`RegistryError::UnknownCity`] if either city is missing.
    pub fn connect(&self, from: CityId, to: CityId) -> Result<(), RegistryError> {
        if from == to {
            return Err(RegistryError::SelfEdge(from));
        }
        let mut state = self.state.write();
        for id in [from, to] {
            if !state.contains(id) {
                return Err(RegistryError::UnknownCity(id));
            }
        }
        state.edges.insert(from, to);
        state.revision += 1;
        Ok(())
    }

    /// Immutable copy of the current city list.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        Snapshot::new(self.state.read().cities.clone())
    }

    /// Cities and edges read under one lock.
    #[must_use]
    pub fn view(&self) -> RegistryView {
        let state = self.state.read();
        RegistryView {
            cities: state.cities.clone(),
            edges: state.edges.clone(),
            revision: state.revision,
        }
    }

    /// Copy of the current city list.
    #[must_use]
    pub fn cities(&self) -> Vec<City> {
        self.state.read().cities.clone()
    }

    /// Copy of the current edge mapping.
    #[must_use]
    pub fn edges(&self) -> EdgeMap {
        self.state.read().edges.clone()
    }

    /// Look up one city by id.
    #[must_use]
    pub fn city(&self, id: CityId) -> Option<City> {
        let state = self.state.read();
        state.index_of(id).map(|idx| state.cities[idx].clone())
    }

    /// Number of cities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().cities.len()
    }

    /// Returns `true` if the registry holds no cities.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.read().cities.is_empty()
    }

    /// Counter bumped by every successful mutation.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.state.read().revision
    }

    /// The city nearest to `point` within `radius`, if any.
    ///
    /// Ties go to the city added first.
    #[must_use]
    pub fn find_city_at(&self, point: Point, radius: f64) -> Option<CityId> {
        let radius_sq = radius * radius;
        let state = self.state.read();
        state
            .cities
            .iter()
            .map(|c| (c.id, c.position.distance_squared(point)))
            .filter(|(_, d)| *d <= radius_sq)
            .min_by(|(_, a), (_, b)| a.total_cmp(b))
            .map(|(id, _)| id)
    }
}
