use std::collections::HashSet;

use glam::Vec2;
use preyflock_index::{Quadtree, QuadtreeConfig, Rect, Relocation};
use rand::{Rng, SeedableRng, rngs::SmallRng};
use slotmap::{SlotMap, new_key_type};

new_key_type! {
    struct EntityId;
}

fn world(capacity: usize) -> Quadtree<EntityId, u8> {
    Quadtree::new(QuadtreeConfig {
        bounds: Rect::new(0.0, 0.0, 800.0, 600.0),
        capacity,
        max_depth: 12,
    })
    .expect("quadtree")
}

fn random_point(rng: &mut SmallRng) -> Vec2 {
    Vec2::new(rng.random_range(0.0..800.0), rng.random_range(0.0..600.0))
}

#[test]
fn whole_world_query_returns_every_entity() {
    let mut rng = SmallRng::seed_from_u64(0x5eed);
    let mut keys: SlotMap<EntityId, ()> = SlotMap::with_key();
    let mut tree = world(6);

    let inserted: Vec<EntityId> = (0..400)
        .map(|_| {
            let key = keys.insert(());
            tree.insert(key, random_point(&mut rng), 0);
            key
        })
        .collect();
    tree.validate().expect("valid after inserts");

    let found = tree.query_point(Vec2::new(400.0, 300.0), 1_000.0, usize::MAX, |_| true);
    let found: HashSet<EntityId> = found.into_iter().collect();
    let expected: HashSet<EntityId> = inserted.iter().copied().collect();
    assert_eq!(found, expected);

    let from_entity = tree.query_radius(inserted[17], 1_000.0, usize::MAX, |_| true);
    assert_eq!(from_entity.len(), inserted.len());
}

#[test]
fn random_churn_preserves_structure() {
    let mut rng = SmallRng::seed_from_u64(42);
    let mut keys: SlotMap<EntityId, ()> = SlotMap::with_key();
    let mut tree = world(8);
    let mut live: Vec<EntityId> = Vec::new();

    for round in 0..3_000 {
        let roll: f32 = rng.random();
        if roll < 0.45 || live.is_empty() {
            let key = keys.insert(());
            tree.insert(key, random_point(&mut rng), rng.random_range(0..2));
            live.push(key);
        } else if roll < 0.7 {
            let index = rng.random_range(0..live.len());
            let key = live.swap_remove(index);
            assert!(tree.remove(key).is_some());
            assert!(tree.remove(key).is_none());
        } else {
            let key = live[rng.random_range(0..live.len())];
            let current = tree.position_of(key).expect("placed");
            let step = Vec2::new(rng.random_range(-40.0..40.0), rng.random_range(-40.0..40.0));
            let outcome = tree.relocate(key, current + step);
            assert_ne!(outcome, Relocation::Missing);
        }

        if round % 50 == 0 {
            tree.validate().expect("valid during churn");
        }
    }

    tree.validate().expect("valid after churn");
    assert_eq!(tree.len(), live.len());
    for &key in &live {
        let leaf = tree.leaf_of(key).expect("leaf");
        let region = tree.region(leaf).expect("region");
        assert!(region.is_leaf());
        assert!(region.entities().contains(&key));
    }

    for key in live.drain(..) {
        tree.remove(key);
    }
    assert!(tree.is_empty());
    tree.validate().expect("valid once drained");
}

#[test]
fn neighbour_links_stay_symmetric_under_clustered_load() {
    let mut rng = SmallRng::seed_from_u64(7);
    let mut keys: SlotMap<EntityId, ()> = SlotMap::with_key();
    let mut tree = world(4);
    let hotspot = Vec2::new(123.0, 456.0);

    let mut live = Vec::new();
    for _ in 0..300 {
        let key = keys.insert(());
        let jitter = Vec2::new(rng.random_range(-15.0..15.0), rng.random_range(-15.0..15.0));
        tree.insert(key, hotspot + jitter, 1);
        live.push(key);
    }
    tree.validate().expect("deep split");

    // Drift the cluster across the world in small steps.
    for _ in 0..60 {
        for &key in &live {
            let position = tree.position_of(key).expect("placed");
            tree.relocate(key, position + Vec2::new(8.0, -5.0));
        }
    }
    tree.validate().expect("valid after drift");

    let near = tree.query_radius(live[0], 30.0, usize::MAX, |tag| *tag == 1);
    assert!(near.contains(&live[0]));
}

#[test]
fn closest_search_finds_the_true_nearest() {
    let mut rng = SmallRng::seed_from_u64(99);
    let mut keys: SlotMap<EntityId, ()> = SlotMap::with_key();
    let mut tree = world(6);

    let seeker = keys.insert(());
    tree.insert(seeker, Vec2::new(400.0, 300.0), 1);
    let mut prey = Vec::new();
    for _ in 0..200 {
        let key = keys.insert(());
        tree.insert(key, random_point(&mut rng), 0);
        prey.push(key);
    }

    let origin = Vec2::new(400.0, 300.0);
    let nearest = prey
        .iter()
        .copied()
        .min_by(|a, b| {
            let da = tree.position_of(*a).expect("a").distance_squared(origin);
            let db = tree.position_of(*b).expect("b").distance_squared(origin);
            da.total_cmp(&db)
        })
        .expect("prey");

    let found = tree.find_closest(seeker, |_, tag| *tag == 0, |_| true);
    assert_eq!(found, Some(nearest));
}
