//! Interpolation contract: what an entity exposes to be extrapolated, and the
//! external path follower the engine defers to.

use crate::types::{Oid, Point};
use glam::{Quat, Vec3};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Path following
// ---------------------------------------------------------------------------

/// Location and velocity reported by a path follower.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathLocAndDir {
    pub loc: Point,
    /// Units per second.
    pub dir: Vec3,
}

/// An external path follower. When present it is authoritative over dead
/// reckoning.
pub trait PathInterpolator: Send + Sync {
    /// Position on the path at `time_ms`, or `None` once the path is done.
    fn interpolate(&self, time_ms: i64) -> Option<PathLocAndDir>;

    /// Terminal point the entity settles on when the path runs out.
    fn last_loc(&self) -> Option<Point>;
}

/// Constant-speed follower along a polyline, starting at `start_time_ms`.
#[derive(Debug, Clone)]
pub struct LinearPathInterpolator {
    oid: Oid,
    start_time_ms: i64,
    speed: f32,
    points: Vec<Point>,
}

impl LinearPathInterpolator {
    pub fn new(oid: Oid, start_time_ms: i64, speed: f32, points: Vec<Point>) -> Self {
        Self {
            oid,
            start_time_ms,
            speed,
            points,
        }
    }

    pub fn oid(&self) -> Oid {
        self.oid
    }

    pub fn total_length(&self) -> f32 {
        self.points
            .windows(2)
            .map(|w| (w[1].to_vec3() - w[0].to_vec3()).length())
            .sum()
    }
}

impl PathInterpolator for LinearPathInterpolator {
    fn interpolate(&self, time_ms: i64) -> Option<PathLocAndDir> {
        if self.points.len() < 2 || self.speed <= 0.0 {
            return None;
        }
        let elapsed = (time_ms - self.start_time_ms).max(0) as f32 / 1000.0;
        let mut remaining = self.speed * elapsed;

        for segment in self.points.windows(2) {
            let from = segment[0].to_vec3();
            let delta = segment[1].to_vec3() - from;
            let length = delta.length();
            if length <= f32::EPSILON {
                continue;
            }
            if remaining <= length {
                let heading = delta / length;
                return Some(PathLocAndDir {
                    loc: Point::from(from + heading * remaining),
                    dir: heading * self.speed,
                });
            }
            remaining -= length;
        }
        None
    }

    fn last_loc(&self) -> Option<Point> {
        self.points.last().copied()
    }
}

// ---------------------------------------------------------------------------
// Interpolatable entities
// ---------------------------------------------------------------------------

/// Consistent view of an entity's motion state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InterpolationSnapshot {
    pub direction: Vec3,
    pub interp_loc: Point,
    pub last_interpolation_time: i64,
}

/// State an entity exposes to the interpolation engine.
///
/// Both the engine and game logic write this state; implementations must
/// route every write through their own synchronized setters.
pub trait Interpolatable: Send + Sync {
    fn oid(&self) -> Oid;

    /// Entities that are not spawned are skipped by every pass.
    fn is_spawned(&self) -> bool {
        true
    }

    /// Velocity in units per second; zero when stationary.
    fn direction(&self) -> Vec3;

    /// Last authoritative location.
    fn raw_loc(&self) -> Point;

    /// Last extrapolated location.
    fn interp_loc(&self) -> Point;

    fn orientation(&self) -> Quat;

    fn last_interpolation_time(&self) -> i64;

    fn set_last_interpolation_time(&self, time_ms: i64);

    fn path_interpolator(&self) -> Option<Arc<dyn PathInterpolator>>;

    /// Commit timestamp, direction, location and orientation as one update.
    fn set_path_interpolator_values(&self, time_ms: i64, dir: Vec3, loc: Point, orientation: Quat);

    /// Override to read all three values under one lock.
    fn interpolation_snapshot(&self) -> InterpolationSnapshot {
        InterpolationSnapshot {
            direction: self.direction(),
            interp_loc: self.interp_loc(),
            last_interpolation_time: self.last_interpolation_time(),
        }
    }
}

/// Facing for a velocity: the rotation taking `+z` onto its horizontal
/// projection, or identity when there is no horizontal motion.
pub fn orientation_for(dir: Vec3) -> Quat {
    let horizontal = Vec3::new(dir.x, 0.0, dir.z);
    if horizontal.length_squared() > 0.0 {
        Quat::from_rotation_arc(Vec3::Z, horizontal.normalize())
    } else {
        Quat::IDENTITY
    }
}
