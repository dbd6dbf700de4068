//! Packing engine for spheres held in a bucket.
//!
//! The engine owns every sphere currently in the bucket and keeps them stacked in a
//! pyramid:
//! - first-open placement scans layers bottom-up, columns left to right
//! - nearest-open placement picks the supported open slot horizontally closest to a
//!   reference point
//! - after a removal, dangling spheres are moved until every sphere above the bottom
//!   layer rests on two others
//!
//! Occupancy and support work on integer slot indices from [`crate::geometry`].

use std::collections::HashSet;

use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

use crate::geometry::{MIN_SUPPORTERS, SlotIndex, SlotLattice};
use crate::model::{BucketSpec, Sphere, SphereId, Stackable, ValidationError};
use crate::subscription::SubscriptionRegistry;
use crate::types::{Point2, validation};

/// Configuration of the stacking geometry.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BucketConfig {
    /// Radius shared by every sphere
    pub sphere_radius: f64,
    /// Share of the container width available for stacking, in (0, 1]
    pub usable_width_proportion: f64,
    /// Offset from the container origin to the centers of the bottom layer
    pub vertical_offset: f64,
}

impl BucketConfig {
    pub const DEFAULT_SPHERE_RADIUS: f64 = 10.0;
    pub const DEFAULT_USABLE_WIDTH_PROPORTION: f64 = 1.0;
    pub const DEFAULT_VERTICAL_OFFSET_RATIO: f64 = -0.4;

    /// Creates a builder for a custom configuration.
    pub fn builder() -> BucketConfigBuilder {
        BucketConfigBuilder::default()
    }

    /// Bottom-layer offset used when none is configured.
    pub fn default_vertical_offset(sphere_radius: f64) -> f64 {
        Self::DEFAULT_VERTICAL_OFFSET_RATIO * sphere_radius
    }

    /// Checks all values.
    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        validation::validate_positive(self.sphere_radius, "Sphere radius")
            .and_then(|_| {
                validation::validate_proportion(
                    self.usable_width_proportion,
                    "Usable width proportion",
                )
            })
            .and_then(|_| validation::validate_finite(self.vertical_offset, "Vertical offset"))
            .map_err(ValidationError::InvalidConfiguration)
    }
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            sphere_radius: Self::DEFAULT_SPHERE_RADIUS,
            usable_width_proportion: Self::DEFAULT_USABLE_WIDTH_PROPORTION,
            vertical_offset: Self::default_vertical_offset(Self::DEFAULT_SPHERE_RADIUS),
        }
    }
}

/// Builder for `BucketConfig`.
///
/// The vertical offset follows the radius unless it is set explicitly.
#[derive(Clone, Debug)]
pub struct BucketConfigBuilder {
    sphere_radius: f64,
    usable_width_proportion: f64,
    vertical_offset: Option<f64>,
}

impl Default for BucketConfigBuilder {
    fn default() -> Self {
        Self {
            sphere_radius: BucketConfig::DEFAULT_SPHERE_RADIUS,
            usable_width_proportion: BucketConfig::DEFAULT_USABLE_WIDTH_PROPORTION,
            vertical_offset: None,
        }
    }
}

impl BucketConfigBuilder {
    /// Sets the sphere radius.
    pub fn sphere_radius(mut self, radius: f64) -> Self {
        self.sphere_radius = radius;
        self
    }

    /// Sets the usable share of the container width.
    pub fn usable_width_proportion(mut self, proportion: f64) -> Self {
        self.usable_width_proportion = proportion;
        self
    }

    /// Sets the bottom-layer offset.
    pub fn vertical_offset(mut self, offset: f64) -> Self {
        self.vertical_offset = Some(offset);
        self
    }

    /// Creates the final configuration without validation.
    pub fn build(self) -> BucketConfig {
        BucketConfig {
            sphere_radius: self.sphere_radius,
            usable_width_proportion: self.usable_width_proportion,
            vertical_offset: self
                .vertical_offset
                .unwrap_or_else(|| BucketConfig::default_vertical_offset(self.sphere_radius)),
        }
    }

    /// Creates the final configuration and validates it.
    pub fn try_build(self) -> std::result::Result<BucketConfig, ValidationError> {
        let config = self.build();
        config.validate()?;
        Ok(config)
    }
}

/// Errors reported by the packing engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BucketError {
    #[error("sphere {0} is not in this bucket")]
    NotAMember(SphereId),
    #[error("sphere {0} is already in this bucket")]
    AlreadyMember(SphereId),
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

pub type Result<T> = std::result::Result<T, BucketError>;

/// Events recorded while the bucket changes, suitable for live visualization.
#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
#[serde(tag = "type")]
pub enum BucketEvent {
    /// A sphere was placed into a slot.
    SphereAdded {
        id: SphereId,
        slot: SlotIndex,
        destination: Point2,
        animated: bool,
    },
    /// Relayout moved a dangling sphere.
    SphereRelocated {
        id: SphereId,
        from: SlotIndex,
        to: SlotIndex,
        destination: Point2,
    },
    /// A sphere left the bucket.
    SphereRemoved { id: SphereId, relayout: bool },
    /// The user picked a sphere up.
    SphereGrabbed { id: SphereId },
    /// The bucket was emptied.
    Reset { released: usize },
}

#[derive(Clone, Debug)]
struct Member<S> {
    sphere: S,
    slot: SlotIndex,
}

/// The bucket packing engine.
///
/// # Examples
/// ```
/// use sphere_bucket::bucket::{BucketConfig, SphereBucket};
/// use sphere_bucket::geometry::SlotIndex;
/// use sphere_bucket::model::{BucketSpec, Sphere, SphereId};
/// use sphere_bucket::types::Point2;
///
/// let spec = BucketSpec::new(Point2::new(50.0, 0.0), 100.0).unwrap();
/// let mut bucket: SphereBucket = SphereBucket::new(spec, BucketConfig::default()).unwrap();
///
/// let slot = bucket
///     .add_first_open(Sphere::new(SphereId(1), Point2::zero()), false)
///     .unwrap();
/// assert_eq!(slot, SlotIndex::new(0, 0));
/// ```
#[derive(Debug)]
pub struct SphereBucket<S: Stackable = Sphere> {
    spec: BucketSpec,
    config: BucketConfig,
    lattice: SlotLattice,
    members: Vec<Member<S>>,
    triggers: SubscriptionRegistry,
    events: Vec<BucketEvent>,
}

impl<S: Stackable> SphereBucket<S> {
    /// Creates an empty bucket.
    ///
    /// # Returns
    /// `Err(BucketError::Invalid)` when the configuration is out of range
    pub fn new(spec: BucketSpec, config: BucketConfig) -> Result<Self> {
        config.validate()?;
        let lattice = SlotLattice::new(
            &spec,
            config.sphere_radius,
            config.usable_width_proportion,
            config.vertical_offset,
        );
        Ok(Self {
            spec,
            config,
            lattice,
            members: Vec::new(),
            triggers: SubscriptionRegistry::new(),
            events: Vec::new(),
        })
    }

    pub fn spec(&self) -> &BucketSpec {
        &self.spec
    }

    pub fn config(&self) -> &BucketConfig {
        &self.config
    }

    pub fn lattice(&self) -> &SlotLattice {
        &self.lattice
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, id: SphereId) -> bool {
        self.index_of(id).is_some()
    }

    /// Slot currently assigned to `id`.
    pub fn slot_of(&self, id: SphereId) -> Option<SlotIndex> {
        self.index_of(id).map(|index| self.members[index].slot)
    }

    pub fn get(&self, id: SphereId) -> Option<&S> {
        self.index_of(id).map(|index| &self.members[index].sphere)
    }

    /// Members in arrival order together with their slots.
    pub fn iter(&self) -> impl Iterator<Item = (&S, SlotIndex)> {
        self.members.iter().map(|m| (&m.sphere, m.slot))
    }

    /// Whether a removal trigger is installed for `id`.
    pub fn has_removal_trigger(&self, id: SphereId) -> bool {
        self.triggers.is_attached(id)
    }

    /// Takes every event recorded since the last call.
    pub fn drain_events(&mut self) -> Vec<BucketEvent> {
        std::mem::take(&mut self.events)
    }

    /// First unoccupied slot, scanning bottom-up and left to right.
    ///
    /// Always succeeds: past the pyramid the overflow column is unbounded.
    pub fn first_open_slot(&self) -> SlotIndex {
        self.search_first_open(None)
    }

    pub fn first_open_location(&self) -> Point2 {
        self.lattice.slot_point(self.first_open_slot())
    }

    /// Supported open slot horizontally closest to `reference`.
    ///
    /// `None` when no open slot can carry a sphere, which only happens once the
    /// pyramid is full.
    pub fn nearest_open_slot(&self, reference: Point2) -> Option<SlotIndex> {
        self.search_nearest(reference, None)
    }

    /// Like [`Self::nearest_open_slot`], falling back to the container origin.
    pub fn nearest_open_location(&self, reference: Point2) -> Point2 {
        match self.nearest_open_slot(reference) {
            Some(slot) => self.lattice.slot_point(slot),
            None => self.spec.origin,
        }
    }

    /// Number of members resting directly under `slot`.
    pub fn supporter_count(&self, slot: SlotIndex) -> usize {
        self.count_supporters(slot, None)
    }

    /// Members above layer 0 that lack enough support.
    pub fn dangling_members(&self) -> Vec<SphereId> {
        (0..self.members.len())
            .filter(|&index| self.is_dangling(index))
            .map(|index| self.members[index].sphere.id())
            .collect()
    }

    /// Places `sphere` into the first open slot.
    ///
    /// With `animate` unset the sphere jumps to its destination; otherwise the
    /// renderer moves it there.
    pub fn add_first_open(&mut self, sphere: S, animate: bool) -> Result<SlotIndex> {
        self.ensure_not_member(sphere.id())?;
        let slot = self.first_open_slot();
        Ok(self.admit(sphere, slot, animate))
    }

    /// Places `sphere` into the supported open slot nearest to `reference`.
    ///
    /// Only the horizontal distance counts, so a sphere released above the bucket
    /// drops straight down instead of drifting toward a lower layer. When no slot is
    /// admissible the sphere goes to the first open slot instead.
    pub fn add_nearest_open(
        &mut self,
        sphere: S,
        reference: Point2,
        animate: bool,
    ) -> Result<SlotIndex> {
        self.ensure_not_member(sphere.id())?;
        let slot = match self.nearest_open_slot(reference) {
            Some(slot) => slot,
            None => {
                let fallback = self.first_open_slot();
                log::warn!(
                    "no supported slot near ({:.2}, {:.2}) for sphere {}, using {}",
                    reference.x,
                    reference.y,
                    sphere.id(),
                    fallback
                );
                fallback
            }
        };
        Ok(self.admit(sphere, slot, animate))
    }

    /// Takes `id` out of the bucket and hands it back.
    ///
    /// Remaining spheres are relaid unless `skip_relayout` is set.
    pub fn remove(&mut self, id: SphereId, skip_relayout: bool) -> Result<S> {
        let index = self.index_of(id).ok_or(BucketError::NotAMember(id))?;
        self.triggers.detach(id);
        Ok(self.evict(index, skip_relayout))
    }

    /// Updates the held-by-user flag of a member.
    ///
    /// The first transition to `true` fires the removal trigger: the sphere leaves
    /// the bucket with relayout and is returned to the caller, who now owns it.
    pub fn set_user_controlled(&mut self, id: SphereId, held: bool) -> Result<Option<S>> {
        let index = self.index_of(id).ok_or(BucketError::NotAMember(id))?;
        let sphere = &mut self.members[index].sphere;
        let was_held = sphere.is_user_controlled();
        sphere.set_user_controlled(held);

        if !held || was_held || self.triggers.fire(id).is_none() {
            return Ok(None);
        }
        self.events.push(BucketEvent::SphereGrabbed { id });
        Ok(Some(self.evict(index, false)))
    }

    /// Picks up the member whose current position is closest to `point`.
    ///
    /// On equal distances the earlier arrival wins.
    pub fn extract_closest(&mut self, point: Point2) -> Option<S> {
        let mut closest: Option<(SphereId, f64)> = None;
        for member in &self.members {
            let distance = member.sphere.distance_to(&point);
            if closest.map_or(true, |(_, best)| distance < best) {
                closest = Some((member.sphere.id(), distance));
            }
        }
        let (id, _) = closest?;

        if let Ok(Some(sphere)) = self.set_user_controlled(id, true) {
            return Some(sphere);
        }
        // Already flagged as held when it was added, so no transition fired.
        self.remove(id, false).ok()
    }

    /// Moves dangling members until none is left.
    ///
    /// Scans in arrival order, moves the first dangling member to the nearest
    /// supported slot around its own destination and starts over. A member with no
    /// supported slot drops to the first open slot instead, which keeps the overflow
    /// column packed. Members already sitting in that slot stay put until another
    /// member moves.
    ///
    /// # Returns
    /// Number of moves made
    pub fn relayout(&mut self) -> usize {
        let mut moves = 0;
        let mut settled: HashSet<SphereId> = HashSet::new();
        let move_limit = self.members.len() * self.members.len() + 1;

        loop {
            let dangling = (0..self.members.len()).find(|&index| {
                !settled.contains(&self.members[index].sphere.id()) && self.is_dangling(index)
            });
            let Some(index) = dangling else {
                break;
            };

            let id = self.members[index].sphere.id();
            let from = self.members[index].slot;
            let anchor = self.lattice.slot_point(from);

            let to = match self.search_nearest(anchor, Some(index)) {
                Some(slot) => slot,
                None => self.search_first_open(Some(index)),
            };
            if to == from {
                settled.insert(id);
                continue;
            }

            let destination = self.lattice.slot_point(to);
            let member = &mut self.members[index];
            member.slot = to;
            member.sphere.set_destination(destination);
            log::debug!("sphere {id} relocated from {from} to {to}");
            self.events.push(BucketEvent::SphereRelocated {
                id,
                from,
                to,
                destination,
            });
            settled.clear();
            moves += 1;

            if moves >= move_limit {
                log::warn!("relayout stopped after {moves} moves");
                break;
            }
        }

        moves
    }

    /// Empties the bucket without relayout and hands every sphere back.
    pub fn reset_all(&mut self) -> Vec<S> {
        let detached = self.triggers.detach_all();
        let released: Vec<S> = self.members.drain(..).map(|m| m.sphere).collect();
        debug_assert_eq!(detached, released.len());
        self.events.push(BucketEvent::Reset {
            released: released.len(),
        });
        released
    }

    fn index_of(&self, id: SphereId) -> Option<usize> {
        self.members.iter().position(|m| m.sphere.id() == id)
    }

    fn ensure_not_member(&self, id: SphereId) -> Result<()> {
        if self.contains(id) {
            return Err(BucketError::AlreadyMember(id));
        }
        Ok(())
    }

    fn admit(&mut self, mut sphere: S, slot: SlotIndex, animate: bool) -> SlotIndex {
        let destination = self.lattice.slot_point(slot);
        sphere.set_destination(destination);
        if !animate {
            sphere.set_position(destination);
        }

        let id = sphere.id();
        self.triggers.subscribe(id);
        self.members.push(Member { sphere, slot });
        log::debug!("sphere {id} placed at {slot}");
        self.events.push(BucketEvent::SphereAdded {
            id,
            slot,
            destination,
            animated: animate,
        });
        slot
    }

    /// Removes the member at `index`. Its trigger must already be gone.
    fn evict(&mut self, index: usize, skip_relayout: bool) -> S {
        let member = self.members.remove(index);
        let id = member.sphere.id();
        debug_assert!(
            !self.triggers.is_attached(id),
            "removal trigger for sphere {id} still attached after removal"
        );

        self.events.push(BucketEvent::SphereRemoved {
            id,
            relayout: !skip_relayout,
        });
        if !skip_relayout {
            self.relayout();
        }
        member.sphere
    }

    fn is_open(&self, slot: SlotIndex, skip: Option<usize>) -> bool {
        !self
            .members
            .iter()
            .enumerate()
            .any(|(index, m)| Some(index) != skip && m.slot == slot)
    }

    fn count_supporters(&self, slot: SlotIndex, skip: Option<usize>) -> usize {
        self.members
            .iter()
            .enumerate()
            .filter(|(index, m)| Some(*index) != skip && self.lattice.supports(m.slot, slot))
            .count()
    }

    fn is_dangling(&self, index: usize) -> bool {
        let slot = self.members[index].slot;
        slot.layer > 0 && self.count_supporters(slot, None) < MIN_SUPPORTERS
    }

    /// First unoccupied slot, treating the member at `skip` as absent.
    fn search_first_open(&self, skip: Option<usize>) -> SlotIndex {
        let mut layer = 0;
        loop {
            if let Some(slot) = self.lattice.slots(layer).find(|s| self.is_open(*s, skip)) {
                return slot;
            }
            layer += 1;
        }
    }

    /// Nearest admissible open slot, treating the member at `skip` as absent.
    fn search_nearest(&self, reference: Point2, skip: Option<usize>) -> Option<SlotIndex> {
        let highest_occupied = self
            .members
            .iter()
            .enumerate()
            .filter(|(index, _)| Some(*index) != skip)
            .map(|(_, m)| m.slot.layer)
            .max()
            .unwrap_or(0);

        let mut best: Option<(SlotIndex, f64)> = None;
        for layer in 0..=highest_occupied + 1 {
            for slot in self.lattice.slots(layer) {
                if !self.is_open(slot, skip) {
                    continue;
                }
                if layer > 0 && self.count_supporters(slot, skip) < MIN_SUPPORTERS {
                    continue;
                }

                let distance = self
                    .lattice
                    .slot_point(slot)
                    .horizontal_distance_to(&reference);
                if best.map_or(true, |(_, best_distance)| distance < best_distance) {
                    best = Some((slot, distance));
                }
            }
        }

        best.map(|(slot, _)| slot)
    }
}
