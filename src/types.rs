//! Common types and traits for 2D bucket geometry.
//!
//! This module defines the point type shared by the lattice, the engine and the
//! HTTP layer, together with the small trait abstractions built on top of it.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Vertical distance between two stacked layers, as a multiple of the sphere diameter.
///
/// Approximates `sqrt(3) / 2`, the height of an equilateral triangle with unit sides,
/// which is the row pitch of hexagonal close packing.
pub const HEX_ROW_FACTOR: f64 = 0.866;

/// Represents a 2D vector or point in model space.
///
/// Used for sphere positions, destinations and the container origin.
///
/// # Examples
/// ```
/// use sphere_bucket::types::Point2;
///
/// let position = Point2::new(1.0, 2.0);
/// let target = Point2::new(4.0, 6.0);
/// assert_eq!(position.distance_to(&target), 5.0);
/// assert_eq!(position.horizontal_distance_to(&target), 3.0);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Point2 {
    pub x: f64,
    pub y: f64,
}

impl Point2 {
    /// Creates a new point.
    #[inline]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Creates the zero point (origin).
    #[inline]
    pub const fn zero() -> Self {
        Self::new(0.0, 0.0)
    }

    /// Calculates the Euclidean distance to another point.
    #[inline]
    pub fn distance_to(&self, other: &Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    /// Calculates the distance along the X axis only.
    #[inline]
    pub fn horizontal_distance_to(&self, other: &Self) -> f64 {
        (self.x - other.x).abs()
    }

    /// Checks if both components are finite.
    #[inline]
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Trait for objects with a current position in model space.
pub trait Positioned {
    /// Returns the current (possibly in-transit) position.
    fn position(&self) -> Point2;

    /// Euclidean distance from the current position to `point`.
    fn distance_to(&self, point: &Point2) -> f64 {
        self.position().distance_to(point)
    }
}

/// Validation functions shared by the configuration and the model.
pub mod validation {

    /// Validates a strictly positive, finite scalar.
    ///
    /// # Returns
    /// `Ok(())` for valid values, otherwise error text
    pub fn validate_positive(value: f64, name: &str) -> Result<(), String> {
        if value.is_nan() {
            return Err(format!("{} must not be NaN", name));
        }
        if value.is_infinite() {
            return Err(format!("{} must not be infinite", name));
        }
        if value <= 0.0 {
            return Err(format!("{} must be positive, got: {}", name, value));
        }
        Ok(())
    }

    /// Validates a proportion in the half-open interval (0, 1].
    pub fn validate_proportion(value: f64, name: &str) -> Result<(), String> {
        validate_positive(value, name)?;
        if value > 1.0 {
            return Err(format!("{} must not exceed 1, got: {}", name, value));
        }
        Ok(())
    }

    /// Validates a finite scalar of any sign.
    pub fn validate_finite(value: f64, name: &str) -> Result<(), String> {
        if !value.is_finite() {
            return Err(format!("{} must be finite, got: {}", name, value));
        }
        Ok(())
    }
}
