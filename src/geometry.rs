//! Axis-aligned rectangles on the horizontal (x/z) plane.

use crate::types::Point;
use serde::{Deserialize, Serialize};

/// `[min_x, max_x] × [min_z, max_z]`. Bounds are inclusive.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Geometry {
    pub min_x: f32,
    pub max_x: f32,
    pub min_z: f32,
    pub max_z: f32,
}

impl Geometry {
    pub fn new(min_x: f32, max_x: f32, min_z: f32, max_z: f32) -> Self {
        Self {
            min_x,
            max_x,
            min_z,
            max_z,
        }
    }

    /// Square of half-width `radius` centred on `loc`.
    pub fn around(loc: &Point, radius: f32) -> Self {
        Self::new(loc.x - radius, loc.x + radius, loc.z - radius, loc.z + radius)
    }

    pub fn width(&self) -> f32 {
        self.max_x - self.min_x
    }

    pub fn depth(&self) -> f32 {
        self.max_z - self.min_z
    }

    pub fn center_x(&self) -> f32 {
        (self.min_x + self.max_x) / 2.0
    }

    pub fn center_z(&self) -> f32 {
        (self.min_z + self.max_z) / 2.0
    }

    pub fn is_valid(&self) -> bool {
        self.min_x <= self.max_x && self.min_z <= self.max_z
    }

    /// True when the two rectangles share at least one point.
    pub fn overlaps(&self, other: &Geometry) -> bool {
        other.min_x <= self.max_x
            && other.max_x >= self.min_x
            && other.min_z <= self.max_z
            && other.max_z >= self.min_z
    }

    /// True when `other` lies entirely inside `self`.
    pub fn contains(&self, other: &Geometry) -> bool {
        other.min_x >= self.min_x
            && other.max_x <= self.max_x
            && other.min_z >= self.min_z
            && other.max_z <= self.max_z
    }

    pub fn contains_point(&self, loc: &Point) -> bool {
        loc.x >= self.min_x && loc.x <= self.max_x && loc.z >= self.min_z && loc.z <= self.max_z
    }

    /// Nearest point inside the rectangle (vertical axis untouched).
    pub fn clamp_point(&self, loc: &Point) -> Point {
        Point::new(
            loc.x.clamp(self.min_x, self.max_x),
            loc.y,
            loc.z.clamp(self.min_z, self.max_z),
        )
    }

    /// The four quadrants, ordered `[-x-z, +x-z, -x+z, +x+z]`.
    pub fn quadrants(&self) -> [Geometry; 4] {
        let cx = self.center_x();
        let cz = self.center_z();
        [
            Geometry::new(self.min_x, cx, self.min_z, cz),
            Geometry::new(cx, self.max_x, self.min_z, cz),
            Geometry::new(self.min_x, cx, cz, self.max_z),
            Geometry::new(cx, self.max_x, cz, self.max_z),
        ]
    }

    /// Index into [`Geometry::quadrants`] of the quadrant owning `loc`.
    ///
    /// Points on the centre lines belong to the `+` side so every point has
    /// exactly one owner.
    pub fn quadrant_index(&self, loc: &Point) -> usize {
        let east = loc.x >= self.center_x();
        let south = loc.z >= self.center_z();
        match (east, south) {
            (false, false) => 0,
            (true, false) => 1,
            (false, true) => 2,
            (true, true) => 3,
        }
    }
}

impl std::fmt::Display for Geometry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{:.1}..{:.1}] x [{:.1}..{:.1}]",
            self.min_x, self.max_x, self.min_z, self.max_z
        )
    }
}
