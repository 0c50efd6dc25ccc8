//! BasicInterpolator – periodic dead-reckoning / path interpolation pass.
//!
//! Entities register once and are re-interpolated on every pass. A pass works
//! on a snapshot of the registration set, so registering or unregistering
//! while a pass runs never blocks on the pass and never makes it visit an
//! entity twice.

use crate::interpolation::{orientation_for, Interpolatable};
use crate::types::{now_millis, InterpolatorConfig, InterpolatorStats, Oid};
use glam::Vec3;
use log::trace;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// What [`BasicInterpolator::interpolate_at`] did with an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpolationOutcome {
    /// Entity is no longer spawned; left frozen.
    Despawned,
    /// Interpolated too recently; nothing changed.
    Debounced,
    /// No path and no velocity; only the timestamp advanced.
    Stationary,
    /// New location/direction/orientation committed.
    Committed,
}

pub struct BasicInterpolator {
    config: InterpolatorConfig,
    registered: Mutex<HashMap<Oid, Arc<dyn Interpolatable>>>,
    stats: Mutex<InterpolatorStats>,
}

impl BasicInterpolator {
    pub fn new(config: InterpolatorConfig) -> Self {
        Self {
            config,
            registered: Mutex::new(HashMap::new()),
            stats: Mutex::new(InterpolatorStats::default()),
        }
    }

    pub fn config(&self) -> &InterpolatorConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    pub fn register(&self, entity: Arc<dyn Interpolatable>) {
        self.registered.lock().insert(entity.oid(), entity);
    }

    pub fn unregister(&self, oid: Oid) -> bool {
        self.registered.lock().remove(&oid).is_some()
    }

    pub fn is_registered(&self, oid: Oid) -> bool {
        self.registered.lock().contains_key(&oid)
    }

    pub fn registered_count(&self) -> usize {
        self.registered.lock().len()
    }

    fn snapshot(&self) -> Vec<Arc<dyn Interpolatable>> {
        self.registered.lock().values().cloned().collect()
    }

    // -----------------------------------------------------------------------
    // Passes
    // -----------------------------------------------------------------------

    /// Interpolate every registered entity against the wall clock.
    pub fn run_pass(&self) -> usize {
        let entities = self.snapshot();
        let mut committed = 0;
        for entity in &entities {
            if self.interpolate(entity.as_ref()) == InterpolationOutcome::Committed {
                committed += 1;
            }
        }
        self.stats.lock().passes += 1;
        trace!(
            "Interpolation pass: {} of {} entities committed",
            committed,
            entities.len()
        );
        committed
    }

    pub fn interpolate(&self, entity: &dyn Interpolatable) -> InterpolationOutcome {
        self.interpolate_at(entity, now_millis())
    }

    /// Bring `entity` up to `now_ms`.
    pub fn interpolate_at(&self, entity: &dyn Interpolatable, now_ms: i64) -> InterpolationOutcome {
        let outcome = self.advance(entity, now_ms);
        let mut stats = self.stats.lock();
        match outcome {
            InterpolationOutcome::Despawned => stats.despawned += 1,
            InterpolationOutcome::Debounced => stats.debounced += 1,
            InterpolationOutcome::Stationary => stats.stationary += 1,
            InterpolationOutcome::Committed => stats.committed += 1,
        }
        outcome
    }

    fn advance(&self, entity: &dyn Interpolatable, now_ms: i64) -> InterpolationOutcome {
        if !entity.is_spawned() {
            return InterpolationOutcome::Despawned;
        }
        let snapshot = entity.interpolation_snapshot();
        let time_delta = now_ms - snapshot.last_interpolation_time;
        if time_delta < self.config.min_interpolation_ms {
            return InterpolationOutcome::Debounced;
        }

        let (dir, loc) = match entity.path_interpolator() {
            Some(path) => match path.interpolate(now_ms) {
                Some(on_path) => (on_path.dir, on_path.loc),
                None => (
                    Vec3::ZERO,
                    path.last_loc().unwrap_or(snapshot.interp_loc),
                ),
            },
            None => {
                let dir = snapshot.direction;
                if dir == Vec3::ZERO || !dir.is_finite() {
                    entity.set_last_interpolation_time(now_ms);
                    return InterpolationOutcome::Stationary;
                }
                let displacement = dir * time_delta as f32 / 1000.0;
                (dir, snapshot.interp_loc.add_truncated(displacement))
            }
        };

        entity.set_path_interpolator_values(now_ms, dir, loc, orientation_for(dir));
        InterpolationOutcome::Committed
    }

    pub fn stats(&self) -> InterpolatorStats {
        let mut stats = self.stats.lock().clone();
        stats.registered = self.registered_count();
        stats
    }

    // -----------------------------------------------------------------------
    // Scheduling
    // -----------------------------------------------------------------------

    /// Run [`BasicInterpolator::run_pass`] every `period_ms` on the current
    /// Tokio runtime until the returned task is aborted.
    ///
    /// A slow pass delays the next one instead of overlapping it.
    #[cfg(feature = "server")]
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        use tokio::time::{interval, Duration, MissedTickBehavior};

        tokio::spawn(async move {
            let mut timer = interval(Duration::from_millis(self.config.period_ms));
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                timer.tick().await;
                self.run_pass();
            }
        })
    }
}

impl Default for BasicInterpolator {
    fn default() -> Self {
        Self::new(InterpolatorConfig::default())
    }
}
