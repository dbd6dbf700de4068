//! Data models for the sphere bucket.
//!
//! This module defines the data structures the packing engine works with:
//! - `Sphere`: a particle with a current position, a destination and a held flag
//! - `Stackable`: the capability contract any bucket member has to offer
//! - `BucketSpec`: the fixed geometry of the holding container

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::types::{Point2, Positioned, validation};

/// Validation error for bucket and sphere data.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Invalid dimension: {0}")]
    InvalidDimension(String),
    #[error("Invalid position: {0}")]
    InvalidPosition(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Stable identity of a sphere, independent of where it currently sits.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
#[serde(transparent)]
pub struct SphereId(pub u64);

impl fmt::Display for SphereId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Capability contract for anything the bucket can hold.
///
/// The engine writes `destination` (the logical slot assignment) and, when not
/// animating, `position`. It reads `position` only for distance queries.
pub trait Stackable: Positioned {
    fn id(&self) -> SphereId;
    fn set_position(&mut self, position: Point2);
    fn destination(&self) -> Point2;
    fn set_destination(&mut self, destination: Point2);
    fn is_user_controlled(&self) -> bool;
    fn set_user_controlled(&mut self, held: bool);
}

/// A spherical particle as the simulation sees it.
///
/// # Fields
/// * `id` - Unique identification number
/// * `position` - Current visual position, possibly animating
/// * `destination` - Target position assigned by whoever owns the sphere
/// * `user_controlled` - Whether the user is currently dragging it
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Sphere {
    pub id: SphereId,
    pub position: Point2,
    pub destination: Point2,
    #[serde(default)]
    pub user_controlled: bool,
}

impl Sphere {
    /// Creates a resting sphere whose destination equals its position.
    pub fn new(id: SphereId, position: Point2) -> Self {
        Self {
            id,
            position,
            destination: position,
            user_controlled: false,
        }
    }

    /// Creates a sphere after checking that its position is usable.
    ///
    /// # Examples
    /// ```
    /// use sphere_bucket::model::{Sphere, SphereId};
    /// use sphere_bucket::types::Point2;
    ///
    /// assert!(Sphere::validated(SphereId(1), Point2::new(0.0, 5.0)).is_ok());
    /// assert!(Sphere::validated(SphereId(1), Point2::new(f64::NAN, 5.0)).is_err());
    /// ```
    pub fn validated(id: SphereId, position: Point2) -> Result<Self, ValidationError> {
        validate_point(position, "Sphere position")?;
        Ok(Self::new(id, position))
    }
}

impl Positioned for Sphere {
    fn position(&self) -> Point2 {
        self.position
    }
}

impl Stackable for Sphere {
    fn id(&self) -> SphereId {
        self.id
    }

    fn set_position(&mut self, position: Point2) {
        self.position = position;
    }

    fn destination(&self) -> Point2 {
        self.destination
    }

    fn set_destination(&mut self, destination: Point2) {
        self.destination = destination;
    }

    fn is_user_controlled(&self) -> bool {
        self.user_controlled
    }

    fn set_user_controlled(&mut self, held: bool) {
        self.user_controlled = held;
    }
}

fn validate_point(point: Point2, name: &str) -> Result<(), ValidationError> {
    validation::validate_finite(point.x, &format!("{name} x"))
        .and_then(|_| validation::validate_finite(point.y, &format!("{name} y")))
        .map_err(ValidationError::InvalidPosition)
}

/// Fixed geometry of the bucket.
///
/// `origin` is the center of the bucket opening; its left edge lies at
/// `origin.x - width / 2`.
#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
pub struct BucketSpec {
    pub origin: Point2,
    pub width: f64,
    pub caption: Option<String>,
}

impl BucketSpec {
    /// Creates a new bucket geometry with validation.
    ///
    /// # Returns
    /// `Ok(BucketSpec)` for valid values, otherwise `Err(ValidationError)`
    pub fn new(origin: Point2, width: f64) -> Result<Self, ValidationError> {
        validate_point(origin, "Bucket origin")?;
        validation::validate_positive(width, "Bucket width")
            .map_err(ValidationError::InvalidDimension)?;
        Ok(Self {
            origin,
            width,
            caption: None,
        })
    }

    /// Attaches a caption shown on the bucket front.
    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into());
        self
    }

    /// X coordinate of the left container wall.
    #[inline]
    pub fn left_edge(&self) -> f64 {
        self.origin.x - self.width / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sphere_new_rests_at_its_position() {
        let sphere = Sphere::new(SphereId(7), Point2::new(3.0, 4.0));
        assert_eq!(sphere.destination, sphere.position);
        assert!(!sphere.user_controlled);
    }

    #[test]
    fn sphere_rejects_non_finite_position() {
        let err = Sphere::validated(SphereId(1), Point2::new(1.0, f64::INFINITY)).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidPosition(_)));
    }

    #[test]
    fn bucket_spec_validates_width() {
        assert!(BucketSpec::new(Point2::zero(), 100.0).is_ok());
        assert!(matches!(
            BucketSpec::new(Point2::zero(), 0.0),
            Err(ValidationError::InvalidDimension(_))
        ));
        assert!(matches!(
            BucketSpec::new(Point2::new(f64::NAN, 0.0), 10.0),
            Err(ValidationError::InvalidPosition(_))
        ));
    }

    #[test]
    fn bucket_spec_left_edge_is_half_width_left_of_origin() {
        let spec = BucketSpec::new(Point2::new(50.0, 0.0), 100.0)
            .unwrap()
            .with_caption("Neutrons");
        assert_eq!(spec.left_edge(), 0.0);
        assert_eq!(spec.caption.as_deref(), Some("Neutrons"));
    }

    #[test]
    fn sphere_id_serializes_transparently() {
        let json = serde_json::to_string(&SphereId(42)).unwrap();
        assert_eq!(json, "42");
    }
}
