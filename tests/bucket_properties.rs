use std::collections::HashSet;

use approx::assert_relative_eq;
use sphere_bucket::{BucketConfig, BucketSpec, Point2, SlotIndex, Sphere, SphereBucket, SphereId};

/// Small deterministic generator so the sequences are reproducible.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    fn below(&mut self, bound: u64) -> u64 {
        self.next() % bound
    }

    fn unit(&mut self) -> f64 {
        self.below(10_000) as f64 / 10_000.0
    }
}

fn bucket(width: f64) -> SphereBucket {
    let spec = BucketSpec::new(Point2::zero(), width).unwrap();
    SphereBucket::new(spec, BucketConfig::default()).unwrap()
}

/// Every member above the base rests on two spheres, or on the one below it in
/// the overflow column.
fn assert_resting(bucket: &SphereBucket, context: &str) {
    let lattice = bucket.lattice();
    for (sphere, slot) in bucket.iter() {
        if slot.layer == 0 {
            continue;
        }
        let required = if lattice.is_overflow_layer(slot.layer) { 1 } else { 2 };
        assert!(
            bucket.supporter_count(slot) >= required,
            "{context}: sphere {} at {slot} has {} supporters",
            sphere.id,
            bucket.supporter_count(slot)
        );
    }
}

fn assert_consistent(bucket: &SphereBucket, context: &str) {
    if bucket.len() <= bucket.lattice().pyramid_capacity() {
        let dangling = bucket.dangling_members();
        assert!(dangling.is_empty(), "{context}: dangling members {dangling:?}");
    }
    assert_resting(bucket, context);

    let mut seen = HashSet::new();
    for (sphere, slot) in bucket.iter() {
        assert!(bucket.lattice().contains(slot), "{context}: {slot} outside lattice");
        assert!(seen.insert(slot), "{context}: slot {slot} taken twice");
        assert_eq!(
            sphere.destination,
            bucket.lattice().slot_point(slot),
            "{context}: destination of {} does not match {slot}",
            sphere.id
        );
        assert!(bucket.has_removal_trigger(sphere.id));
    }
}

#[test]
fn random_adds_and_removes_keep_the_stack_supported() {
    // Runs up to a few spheres past the pyramid into the overflow column.
    for seed in 0..200u64 {
        let mut rng = Lcg(seed);
        let width = [40.0, 60.0, 100.0, 120.0, 150.0, 200.0][rng.below(6) as usize];
        let mut bucket = bucket(width);
        let capacity = bucket.lattice().pyramid_capacity();
        let mut next_id = 1;

        for step in 0..60 {
            let context = format!("seed {seed} step {step}");
            let must_remove = bucket.len() >= capacity + 4;
            if !bucket.is_empty() && (must_remove || rng.below(10) < 4) {
                let pick = rng.below(bucket.len() as u64) as usize;
                let id = bucket
                    .iter()
                    .nth(pick)
                    .map(|(sphere, _)| sphere.id)
                    .unwrap();
                let removed = bucket.remove(id, false).unwrap();
                assert_eq!(removed.id, id);
                assert!(!bucket.contains(id));
            } else {
                let sphere = Sphere::new(SphereId(next_id), Point2::new(0.0, 500.0));
                next_id += 1;
                if rng.below(2) == 0 {
                    bucket.add_first_open(sphere, false).unwrap();
                } else {
                    let x = (rng.unit() - 0.5) * width;
                    bucket
                        .add_nearest_open(sphere, Point2::new(x, 500.0), true)
                        .unwrap();
                }
            }
            assert_consistent(&bucket, &context);
            assert_eq!(bucket.relayout(), 0, "{context}: settled stack moved again");
        }
    }
}

#[test]
fn overflow_column_stays_packed_after_removals() {
    // Two base slots: the pyramid holds three, the rest stack in the column.
    let mut bucket = bucket(60.0);
    for id in 1..=6 {
        bucket
            .add_first_open(Sphere::new(SphereId(id), Point2::zero()), false)
            .unwrap();
    }
    assert_eq!(bucket.slot_of(SphereId(6)), Some(SlotIndex::new(4, 0)));

    // Out of the middle of the column.
    bucket.remove(SphereId(4), false).unwrap();
    assert_resting(&bucket, "after column removal");
    assert_eq!(bucket.slot_of(SphereId(5)), Some(SlotIndex::new(2, 0)));
    assert_eq!(bucket.slot_of(SphereId(6)), Some(SlotIndex::new(3, 0)));

    // Out of the base underneath everything.
    bucket.remove(SphereId(1), false).unwrap();
    assert_resting(&bucket, "after base removal");
    assert_eq!(bucket.slot_of(SphereId(3)), Some(SlotIndex::new(0, 0)));
    assert_eq!(bucket.slot_of(SphereId(5)), Some(SlotIndex::new(1, 0)));
    assert_eq!(bucket.slot_of(SphereId(6)), Some(SlotIndex::new(2, 0)));

    bucket.drain_events();
    assert_eq!(bucket.relayout(), 0);
    assert!(bucket.drain_events().is_empty());
}

#[test]
fn repeated_first_open_never_reuses_a_destination() {
    for radius in [4.0, 7.5, 10.0, 13.0] {
        for proportion in [0.5, 0.8, 1.0] {
            let spec = BucketSpec::new(Point2::zero(), 120.0).unwrap();
            let config = BucketConfig::builder()
                .sphere_radius(radius)
                .usable_width_proportion(proportion)
                .build();
            let mut bucket: SphereBucket = SphereBucket::new(spec, config).unwrap();

            let mut destinations: Vec<Point2> = Vec::new();
            for id in 1..=12 {
                let slot = bucket
                    .add_first_open(Sphere::new(SphereId(id), Point2::zero()), false)
                    .unwrap();
                let destination = bucket.lattice().slot_point(slot);
                assert!(
                    destinations.iter().all(|d| *d != destination),
                    "radius {radius}, proportion {proportion}: {slot} reused"
                );
                destinations.push(destination);
            }
        }
    }
}

#[test]
fn hundred_wide_bucket_fills_base_then_rests_on_two() {
    // Left wall at x = 0.
    let spec = BucketSpec::new(Point2::new(50.0, 0.0), 100.0).unwrap();
    let mut bucket: SphereBucket = SphereBucket::new(spec, BucketConfig::default()).unwrap();
    assert_eq!(bucket.lattice().base_slots(), 4);

    for id in 1..=4 {
        let slot = bucket
            .add_first_open(Sphere::new(SphereId(id), Point2::zero()), false)
            .unwrap();
        assert_eq!(slot, SlotIndex::new(0, id as usize - 1));
        let point = bucket.lattice().slot_point(slot);
        assert_relative_eq!(point.x, 20.0 * id as f64, epsilon = 1e-9);
    }

    let fifth = bucket
        .add_first_open(Sphere::new(SphereId(5), Point2::zero()), false)
        .unwrap();
    assert_eq!(fifth, SlotIndex::new(1, 0));
    assert_eq!(bucket.supporter_count(fifth), 2);
    assert_relative_eq!(bucket.lattice().slot_point(fifth).x, 30.0, epsilon = 1e-9);
}

#[test]
fn removing_the_top_of_a_two_layer_stack_leaves_nothing_dangling() {
    let mut bucket = bucket(100.0);
    for id in 1..=5 {
        bucket
            .add_first_open(Sphere::new(SphereId(id), Point2::zero()), false)
            .unwrap();
    }

    bucket.remove(SphereId(5), false).unwrap();
    assert!(bucket.dangling_members().is_empty());
    assert_eq!(bucket.len(), 4);

    // Pulling a base sphere out from under the upper one as well.
    bucket
        .add_first_open(Sphere::new(SphereId(6), Point2::zero()), false)
        .unwrap();
    bucket.remove(SphereId(1), false).unwrap();
    assert!(bucket.dangling_members().is_empty());
    assert_eq!(bucket.slot_of(SphereId(6)), Some(SlotIndex::new(0, 0)));
}

#[test]
fn extract_closest_picks_minimum_euclidean_distance() {
    let mut bucket = bucket(200.0);
    let starts = [(-60.0, 5.0), (15.0, 40.0), (70.0, -3.0)];
    for (id, (x, y)) in starts.iter().enumerate() {
        bucket
            .add_first_open(Sphere::new(SphereId(id as u64 + 1), Point2::new(*x, *y)), true)
            .unwrap();
    }

    let picked = bucket.extract_closest(Point2::new(20.0, 30.0)).unwrap();
    assert_eq!(picked.id, SphereId(2));
    assert!(picked.user_controlled);
    assert_eq!(bucket.len(), 2);

    bucket.reset_all();
    assert!(bucket.extract_closest(Point2::zero()).is_none());
}
