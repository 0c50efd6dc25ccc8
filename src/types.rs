//! Core value types shared across all modules.

use crate::geometry::Geometry;
use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Stable object identifier of a world entity.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Oid(pub u64);

impl std::fmt::Display for Oid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Basic math
// ---------------------------------------------------------------------------

/// A world-space location. `y` is the vertical axis; the spatial index only
/// looks at `x` and `z`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Point {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    /// Returns a copy displaced by `offset`, each axis truncated toward zero
    /// to a whole number of units first.
    pub fn add_truncated(&self, offset: Vec3) -> Self {
        Self::new(
            self.x + offset.x.trunc(),
            self.y + offset.y.trunc(),
            self.z + offset.z.trunc(),
        )
    }

    pub fn distance_squared(&self, other: &Point) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        dx * dx + dy * dy + dz * dz
    }

    pub fn to_vec3(self) -> Vec3 {
        Vec3::new(self.x, self.y, self.z)
    }
}

impl From<Vec3> for Point {
    fn from(v: Vec3) -> Self {
        Self::new(v.x, v.y, v.z)
    }
}

impl std::fmt::Display for Point {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.2}, {:.2}, {:.2})", self.x, self.y, self.z)
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TreeStats {
    pub leaves: usize,
    pub max_depth_reached: u8,
    pub elements: usize,
    pub perceivers: usize,
    pub splits: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InterpolatorStats {
    pub registered: usize,
    pub passes: u64,
    pub committed: u64,
    pub debounced: u64,
    pub stationary: u64,
    pub despawned: u64,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Top-level configuration for the perception core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PerceptionConfig {
    pub tree: QuadTreeConfig,
    pub perceiver: PerceiverConfig,
    pub interpolator: InterpolatorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuadTreeConfig {
    /// World region covered by the root node.
    pub bounds: Geometry,
    /// A leaf holding more home elements than this is split.
    pub max_elements_per_leaf: usize,
    /// Leaves at this depth are never split.
    pub max_depth: u8,
}

impl Default for QuadTreeConfig {
    fn default() -> Self {
        Self {
            bounds: Geometry::new(-1_000_000.0, 1_000_000.0, -1_000_000.0, 1_000_000.0),
            max_elements_per_leaf: 16,
            max_depth: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerceiverConfig {
    /// Distance a mobile perceiver must move before its node subscriptions
    /// are recomputed.
    pub update_threshold: f32,
}

impl Default for PerceiverConfig {
    fn default() -> Self {
        Self {
            update_threshold: crate::mobile::DEFAULT_UPDATE_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpolatorConfig {
    /// Period of the scheduled interpolation pass.
    pub period_ms: u64,
    /// Entities interpolated more recently than this are skipped.
    pub min_interpolation_ms: i64,
}

impl Default for InterpolatorConfig {
    fn default() -> Self {
        Self {
            period_ms: 100,
            min_interpolation_ms: 100,
        }
    }
}
