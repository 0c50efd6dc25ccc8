//! Janet Perception
//!
//! Live spatial awareness for the world engine: which entities each mobile
//! entity can currently see, who gets told when that changes, and how entity
//! motion is smoothed between authoritative updates.
//!
//! ## Architecture
//!
//! ```text
//! WorldNode  (world_node.rs)          ← motion state + index membership
//!   ├── MobilePerceiver  (mobile.rs)  ← sensed square + hysteresis
//!   │     └── Perceiver  (perceiver.rs) ← subscriptions, filter, callbacks
//!   └── QuadTree  (quadtree.rs)       ← leaves, tree lock, news/frees
//!         └── Geometry  (geometry.rs)
//!
//! BasicInterpolator  (interpolator.rs) ← periodic pass over Interpolatable
//!   └── PathInterpolator  (interpolation.rs)
//! ```
//!
//! Lock order is always tree → world node → perceiver internals. The
//! interpolator only reaches the index through `WorldNode`'s setters.

pub mod config;
pub mod element;
pub mod error;
pub mod geometry;
pub mod interpolation;
pub mod interpolator;
pub mod mobile;
pub mod perceiver;
pub mod quadtree;
pub mod types;
pub mod world_node;

pub use element::{QuadNodeRef, QuadTreeElement};
pub use error::{PerceptionError, Result};
pub use geometry::Geometry;
pub use interpolation::{
    orientation_for, Interpolatable, InterpolationSnapshot, LinearPathInterpolator,
    PathInterpolator, PathLocAndDir,
};
pub use interpolator::{BasicInterpolator, InterpolationOutcome};
pub use mobile::{FixedPerceiver, MobilePerceiver, DEFAULT_UPDATE_THRESHOLD};
pub use perceiver::{
    BasicPerceiverFilter, Perceiver, PerceiverCallback, PerceiverFilter, PerceiverId,
    PerceiverNewsAndFrees,
};
pub use quadtree::{NodeId, QuadTree, TreeGuard};
pub use types::{
    InterpolatorConfig, InterpolatorStats, Oid, PerceiverConfig, PerceptionConfig, Point,
    QuadTreeConfig, TreeStats,
};
pub use world_node::{PersistedWorldNode, WorldNode, WorldNodeOptions};
