//! Slot lattice for pyramid stacking.
//!
//! Slots are addressed by integer `(layer, column)` indices. Horizontal lattice
//! positions are whole multiples of the sphere radius, so occupancy and support
//! checks never compare floating-point coordinates. Model-space points are only
//! derived from indices for output.
//!
//! Layer 0 holds as many spheres as fit into the usable width. Every layer above
//! holds one fewer, shifted inward by one radius. Once a layer would be empty, it and
//! all layers above it hold a single slot directly above the apex. That overflow
//! column does not rest on two spheres and is kept as a known limitation of the
//! layout.

use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::model::BucketSpec;
use crate::types::{HEX_ROW_FACTOR, Point2};

/// Horizontal reach of a supporting sphere, in radii (exclusive).
pub const SUPPORT_RANGE_RADII: i64 = 3;

/// Supporters a sphere above layer 0 needs to rest stably.
pub const MIN_SUPPORTERS: usize = 2;

/// Canonical address of a slot in the stack.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
pub struct SlotIndex {
    pub layer: usize,
    pub column: usize,
}

impl SlotIndex {
    #[inline]
    pub const fn new(layer: usize, column: usize) -> Self {
        Self { layer, column }
    }
}

impl fmt::Display for SlotIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}/C{}", self.layer, self.column)
    }
}

/// Geometry of every slot a bucket can offer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SlotLattice {
    sphere_radius: f64,
    first_slot_x: f64,
    base_y: f64,
    base_slots: usize,
}

impl SlotLattice {
    /// Builds the lattice for a bucket.
    ///
    /// # Parameters
    /// * `spec` - Container geometry
    /// * `sphere_radius` - Radius of every sphere
    /// * `usable_width_proportion` - Share of the container width available for stacking
    /// * `vertical_offset` - Offset from the container origin to the layer 0 centers
    pub fn new(
        spec: &BucketSpec,
        sphere_radius: f64,
        usable_width_proportion: f64,
        vertical_offset: f64,
    ) -> Self {
        let usable_width = spec.width * usable_width_proportion - 2.0 * sphere_radius;
        let fitting = (usable_width / (2.0 * sphere_radius)).floor();
        // A bucket narrower than one sphere still offers a single base slot.
        let base_slots = if fitting >= 1.0 { fitting as usize } else { 1 };
        let offset_from_edge = (spec.width - usable_width) / 2.0 + sphere_radius;

        Self {
            sphere_radius,
            first_slot_x: spec.left_edge() + offset_from_edge,
            base_y: spec.origin.y + vertical_offset,
            base_slots,
        }
    }

    /// Number of slots in layer 0.
    #[inline]
    pub fn base_slots(&self) -> usize {
        self.base_slots
    }

    /// Number of layers that form the pyramid proper (below the overflow column).
    #[inline]
    pub fn pyramid_layers(&self) -> usize {
        self.base_slots
    }

    /// Total slots of the pyramid proper.
    pub fn pyramid_capacity(&self) -> usize {
        self.base_slots * (self.base_slots + 1) / 2
    }

    /// Whether `layer` belongs to the single-slot overflow column.
    #[inline]
    pub fn is_overflow_layer(&self, layer: usize) -> bool {
        layer >= self.base_slots
    }

    /// Number of slots offered by `layer`.
    pub fn slots_in_layer(&self, layer: usize) -> usize {
        if self.is_overflow_layer(layer) {
            1
        } else {
            self.base_slots - layer
        }
    }

    /// Whether `slot` exists in the lattice.
    pub fn contains(&self, slot: SlotIndex) -> bool {
        slot.column < self.slots_in_layer(slot.layer)
    }

    /// Slots of `layer`, left to right.
    pub fn slots(&self, layer: usize) -> impl Iterator<Item = SlotIndex> + use<> {
        (0..self.slots_in_layer(layer)).map(move |column| SlotIndex::new(layer, column))
    }

    /// Horizontal position of `slot` in radii, relative to the first base slot.
    pub fn lateral_units(&self, slot: SlotIndex) -> i64 {
        if self.is_overflow_layer(slot.layer) {
            self.base_slots as i64 - 1
        } else {
            slot.layer as i64 + 2 * slot.column as i64
        }
    }

    /// Whether a sphere in `lower` carries a sphere placed in `upper`.
    pub fn supports(&self, lower: SlotIndex, upper: SlotIndex) -> bool {
        lower.layer + 1 == upper.layer
            && (self.lateral_units(lower) - self.lateral_units(upper)).abs() < SUPPORT_RANGE_RADII
    }

    /// Vertical center of the spheres in `layer`.
    pub fn layer_y(&self, layer: usize) -> f64 {
        self.base_y + layer as f64 * self.sphere_radius * 2.0 * HEX_ROW_FACTOR
    }

    /// Model-space center of `slot`.
    pub fn slot_point(&self, slot: SlotIndex) -> Point2 {
        Point2::new(
            self.first_slot_x + self.lateral_units(slot) as f64 * self.sphere_radius,
            self.layer_y(slot.layer),
        )
    }
}
