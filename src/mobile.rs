//! Concrete perceivers: [`MobilePerceiver`] rides on an element and senses a
//! square around it; [`FixedPerceiver`] senses a constant region.

use crate::element::QuadTreeElement;
use crate::geometry::Geometry;
use crate::perceiver::{Perceiver, PerceiverCore, PerceiverFilter};
use crate::types::{Oid, Point};
use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, Weak};

/// Default hysteresis distance in world units.
pub const DEFAULT_UPDATE_THRESHOLD: f32 = 5000.0;

// ---------------------------------------------------------------------------
// Mobile perceiver
// ---------------------------------------------------------------------------

struct Hysteresis {
    last_update_loc: Option<Point>,
    threshold_squared: f32,
}

/// Perceiver owned by a moving element.
///
/// Senses the square of half-width `radius` around the element's current
/// location. Senses nothing while the element is unspawned.
pub struct MobilePerceiver {
    core: PerceiverCore,
    element: Weak<dyn QuadTreeElement>,
    radius: RwLock<f32>,
    hysteresis: Mutex<Hysteresis>,
}

impl MobilePerceiver {
    pub fn new(element: Weak<dyn QuadTreeElement>, radius: f32) -> Self {
        Self::with_filter(element, radius, None)
    }

    pub fn with_filter(
        element: Weak<dyn QuadTreeElement>,
        radius: f32,
        filter: Option<Arc<dyn PerceiverFilter>>,
    ) -> Self {
        Self {
            core: PerceiverCore::new(filter),
            element,
            radius: RwLock::new(radius),
            hysteresis: Mutex::new(Hysteresis {
                last_update_loc: None,
                threshold_squared: DEFAULT_UPDATE_THRESHOLD * DEFAULT_UPDATE_THRESHOLD,
            }),
        }
    }

    pub fn element(&self) -> Option<Arc<dyn QuadTreeElement>> {
        self.element.upgrade()
    }

    pub fn radius(&self) -> f32 {
        *self.radius.read()
    }

    /// Takes effect at the owner's next subscription refresh.
    pub fn set_radius(&self, radius: f32) {
        *self.radius.write() = radius;
    }

    pub fn set_update_threshold(&self, threshold: f32) {
        self.hysteresis.lock().threshold_squared = threshold * threshold;
    }

    pub fn threshold_squared(&self) -> f32 {
        self.hysteresis.lock().threshold_squared
    }

    pub fn last_update_loc(&self) -> Option<Point> {
        self.hysteresis.lock().last_update_loc
    }

    /// Decide whether a move to `loc` warrants recomputing subscriptions,
    /// recording `loc` as the new reference point when it does.
    pub fn should_update_based_on_loc(&self, loc: &Point) -> bool {
        let mut hysteresis = self.hysteresis.lock();
        let update = match hysteresis.last_update_loc {
            None => true,
            Some(last) => last.distance_squared(loc) > hysteresis.threshold_squared,
        };
        if update {
            hysteresis.last_update_loc = Some(*loc);
        }
        update
    }

    /// Forget the reference point so the next spawn always refreshes.
    pub fn reset_hysteresis(&self) {
        self.hysteresis.lock().last_update_loc = None;
    }

    fn sensed_geometry(&self) -> Option<Geometry> {
        let element = self.element.upgrade()?;
        if !element.is_spawned() {
            return None;
        }
        Some(Geometry::around(&element.current_loc(), self.radius()))
    }
}

impl Perceiver for MobilePerceiver {
    fn core(&self) -> &PerceiverCore {
        &self.core
    }

    fn as_perceiver(&self) -> &dyn Perceiver {
        self
    }

    fn overlaps(&self, geometry: &Geometry) -> bool {
        self.sensed_geometry()
            .is_some_and(|sensed| sensed.overlaps(geometry))
    }

    fn contains(&self, geometry: &Geometry) -> bool {
        self.sensed_geometry()
            .is_some_and(|sensed| sensed.contains(geometry))
    }

    fn owner_oid(&self) -> Option<Oid> {
        self.element.upgrade().map(|e| e.oid())
    }

    fn describe_owner(&self) -> String {
        match self.owner_oid() {
            Some(oid) => format!("mobile perceiver {} of {}", self.id(), oid),
            None => format!("mobile perceiver {} (owner dropped)", self.id()),
        }
    }
}

// ---------------------------------------------------------------------------
// Fixed perceiver
// ---------------------------------------------------------------------------

/// Perceiver sensing a constant region, e.g. a zone monitor.
pub struct FixedPerceiver {
    core: PerceiverCore,
    geometry: RwLock<Geometry>,
}

impl FixedPerceiver {
    pub fn new(geometry: Geometry, filter: Option<Arc<dyn PerceiverFilter>>) -> Self {
        Self {
            core: PerceiverCore::new(filter),
            geometry: RwLock::new(geometry),
        }
    }

    pub fn geometry(&self) -> Geometry {
        *self.geometry.read()
    }

    /// Callers must ask the tree to refresh this perceiver afterwards.
    pub fn set_geometry(&self, geometry: Geometry) {
        *self.geometry.write() = geometry;
    }
}

impl Perceiver for FixedPerceiver {
    fn core(&self) -> &PerceiverCore {
        &self.core
    }

    fn as_perceiver(&self) -> &dyn Perceiver {
        self
    }

    fn overlaps(&self, geometry: &Geometry) -> bool {
        self.geometry.read().overlaps(geometry)
    }

    fn contains(&self, geometry: &Geometry) -> bool {
        self.geometry.read().contains(geometry)
    }
}
