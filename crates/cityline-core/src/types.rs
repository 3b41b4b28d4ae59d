//! Shared types for the cityline connection subsystem.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// A 2D point in canvas coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Horizontal position (pixels from left edge).
    pub x: f64,
    /// Vertical position (pixels from top edge).
    pub y: f64,
}

impl Point {
    /// Create a new point.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Squared Euclidean distance to another point.
    ///
    /// Avoids the square root for comparison purposes.
    #[must_use]
    pub fn distance_squared(self, other: Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx.mul_add(dx, dy * dy)
    }

    /// Euclidean distance to another point.
    #[must_use]
    pub fn distance(self, other: Self) -> f64 {
        self.distance_squared(other).sqrt()
    }
}

/// Registry-assigned identity of a city.
///
/// Identity is independent of position and name: two cities sharing both
/// are still distinct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CityId(pub(crate) u64);

impl CityId {
    /// The raw numeric identifier.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A city placed on the canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct City {
    /// Stable identity.
    pub id: CityId,
    /// Current position.
    pub position: Point,
    /// Display name.
    pub name: String,
}

/// A city that has not been added to a registry yet.
///
/// This is also the on-disk shape the bench tool reads city sets in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCity {
    /// Display name.
    pub name: String,
    /// Initial position.
    pub position: Point,
}

impl NewCity {
    /// Create a new, unregistered city.
    #[must_use]
    pub fn new(name: impl Into<String>, x: f64, y: f64) -> Self {
        Self {
            name: name.into(),
            position: Point::new(x, y),
        }
    }
}

/// Directed successor mapping between cities.
///
/// Each key has exactly one successor. A city absent from the keys has no
/// outgoing edge. Self-edges are never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeMap(BTreeMap<CityId, CityId>);

impl EdgeMap {
    /// Create an empty mapping.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Set the successor of `from`, returning the previous one.
    ///
    /// Self-edges are ignored and return `None`.
    pub fn insert(&mut self, from: CityId, to: CityId) -> Option<CityId> {
        if from == to {
            return None;
        }
        self.0.insert(from, to)
    }

    /// The successor of `from`, if any.
    #[must_use]
    pub fn get(&self, from: CityId) -> Option<CityId> {
        self.0.get(&from).copied()
    }

    /// Returns the number of edges.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if there are no edges.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over `(from, to)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (CityId, CityId)> + '_ {
        self.0.iter().map(|(from, to)| (*from, *to))
    }

    /// Returns `true` if `id` appears as either a key or a value.
    #[must_use]
    pub fn touches(&self, id: CityId) -> bool {
        self.0.iter().any(|(from, to)| *from == id || *to == id)
    }

    /// Drop every edge that starts or ends at `id`.
    pub fn remove_city(&mut self, id: CityId) {
        self.0.retain(|from, to| *from != id && *to != id);
    }

    /// Sum of Euclidean edge lengths, resolving positions through `cities`.
    ///
    /// Edges referencing cities not present in `cities` contribute nothing.
    #[must_use]
    pub fn total_length(&self, cities: &[City]) -> f64 {
        let positions: BTreeMap<CityId, Point> =
            cities.iter().map(|c| (c.id, c.position)).collect();
        self.iter()
            .filter_map(|(from, to)| Some(positions.get(&from)?.distance(*positions.get(&to)?)))
            .sum()
    }
}

impl FromIterator<(CityId, CityId)> for EdgeMap {
    fn from_iter<I: IntoIterator<Item = (CityId, CityId)>>(iter: I) -> Self {
        let mut edges = Self::new();
        for (from, to) in iter {
            edges.insert(from, to);
        }
        edges
    }
}

/// Immutable copy of the registry's city list at one instant.
///
/// Cloning is cheap (reference counted). A strategy run holds one snapshot
/// for its entire lifetime and never observes later registry edits.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot(Arc<[City]>);

impl Snapshot {
    /// Create a snapshot from an owned list of cities.
    #[must_use]
    pub fn new(cities: Vec<City>) -> Self {
        Self(cities.into())
    }

    /// All cities, in registry order.
    #[must_use]
    pub fn cities(&self) -> &[City] {
        &self.0
    }

    /// Returns the number of cities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the snapshot holds no cities.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Total length of an ordered path through `cities` by index.
pub(crate) fn path_length(cities: &[City], order: &[usize]) -> f64 {
    order
        .windows(2)
        .map(|pair| cities[pair[0]].position.distance(cities[pair[1]].position))
        .sum()
}

/// Chain edges `order[0] -> order[1] -> ...` as an [`EdgeMap`].
pub(crate) fn chain_edges(cities: &[City], order: &[usize]) -> EdgeMap {
    order
        .windows(2)
        .map(|pair| (cities[pair[0]].id, cities[pair[1]].id))
        .collect()
}
