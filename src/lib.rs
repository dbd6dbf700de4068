//! Sphere stacking in a bucket.
//!
//! Spheres dropped into a bucket settle into a pyramid: a full bottom layer
//! and every layer above resting on two neighbours. Removing a sphere lets the
//! ones above it fall back into supported slots.

pub mod api;
pub mod bucket;
pub mod config;
pub mod geometry;
pub mod model;
pub mod subscription;
pub mod types;

pub use bucket::{BucketConfig, BucketError, BucketEvent, SphereBucket};
pub use geometry::{SlotIndex, SlotLattice};
pub use model::{BucketSpec, Sphere, SphereId, Stackable};
pub use types::Point2;
