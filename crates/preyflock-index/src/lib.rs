//! Adaptive region quadtree with an explicit neighbour graph between leaves.
//!
//! Regions live in a slot-map arena and refer to their parent, children and
//! neighbours through [`RegionId`] handles. Only leaves hold entities and only
//! leaves take part in the neighbour graph, which lets radius queries walk
//! outwards from the origin's leaf instead of descending from the root.

use std::collections::{HashSet, VecDeque};

use glam::Vec2;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use slotmap::{Key, SecondaryMap, SlotMap, new_key_type};
use smallvec::SmallVec;
use thiserror::Error;
use tracing::trace;

new_key_type! {
    /// Stable handle for a region stored in the quadtree arena.
    pub struct RegionId;
}

/// Tolerance used when comparing region edges for adjacency.
const EDGE_TOLERANCE: f32 = 1e-3;

/// Errors emitted by the quadtree.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Indicates configuration values that cannot be used (e.g., zero capacity).
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// A structural invariant does not hold; always a programming defect.
    #[error("invariant violated: {0}")]
    Invariant(String),
}

/// Axis-aligned rectangle in world units.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    #[must_use]
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    #[must_use]
    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    #[must_use]
    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    #[must_use]
    pub fn center(&self) -> Vec2 {
        Vec2::new(self.x + self.width * 0.5, self.y + self.height * 0.5)
    }

    /// Length of the shorter side.
    #[must_use]
    pub fn min_dimension(&self) -> f32 {
        self.width.min(self.height)
    }

    /// Edge-inclusive containment test.
    #[must_use]
    pub fn contains(&self, point: Vec2) -> bool {
        point.x >= self.x && point.x <= self.right() && point.y >= self.y && point.y <= self.bottom()
    }

    /// Exact circle/rectangle intersection.
    #[must_use]
    pub fn intersects_circle(&self, center: Vec2, radius: f32) -> bool {
        let half_w = self.width * 0.5;
        let half_h = self.height * 0.5;
        let dx = (center.x - (self.x + half_w)).abs();
        let dy = (center.y - (self.y + half_h)).abs();

        if dx > half_w + radius || dy > half_h + radius {
            return false;
        }
        if dx <= half_w || dy <= half_h {
            return true;
        }
        let corner_x = dx - half_w;
        let corner_y = dy - half_h;
        corner_x * corner_x + corner_y * corner_y <= radius * radius
    }

    /// Returns true when both rectangles share a stretch of edge (or a corner).
    #[must_use]
    pub fn borders(&self, other: &Rect) -> bool {
        let y_overlap = !(self.bottom() + EDGE_TOLERANCE < other.y
            || other.bottom() + EDGE_TOLERANCE < self.y);
        let x_touch = (self.x - other.right()).abs() <= EDGE_TOLERANCE
            || (self.right() - other.x).abs() <= EDGE_TOLERANCE;
        if y_overlap && x_touch {
            return true;
        }

        let x_overlap = !(self.right() + EDGE_TOLERANCE < other.x
            || other.right() + EDGE_TOLERANCE < self.x);
        let y_touch = (self.y - other.bottom()).abs() <= EDGE_TOLERANCE
            || (self.bottom() - other.y).abs() <= EDGE_TOLERANCE;
        x_overlap && y_touch
    }

    /// The four quadrants in NW, NE, SW, SE order.
    #[must_use]
    pub fn quadrants(&self) -> [Rect; 4] {
        let half_w = self.width * 0.5;
        let half_h = self.height * 0.5;
        [
            Rect::new(self.x, self.y, half_w, half_h),
            Rect::new(self.x + half_w, self.y, half_w, half_h),
            Rect::new(self.x, self.y + half_h, half_w, half_h),
            Rect::new(self.x + half_w, self.y + half_h, half_w, half_h),
        ]
    }

    /// Index into [`Rect::quadrants`] for `point`; midline points belong to the west/north half.
    #[must_use]
    pub fn quadrant_of(&self, point: Vec2) -> usize {
        let center = self.center();
        let east = usize::from(point.x > center.x);
        let south = usize::from(point.y > center.y);
        south * 2 + east
    }
}

/// Construction parameters for a [`Quadtree`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct QuadtreeConfig {
    /// Area covered by the root region.
    pub bounds: Rect,
    /// Entities a leaf may hold before it splits.
    pub capacity: usize,
    /// Depth at which leaves stop splitting and accept any number of entities.
    pub max_depth: u32,
}

impl Default for QuadtreeConfig {
    fn default() -> Self {
        Self {
            bounds: Rect::new(0.0, 0.0, 800.0, 600.0),
            capacity: 24,
            max_depth: 16,
        }
    }
}

impl QuadtreeConfig {
    fn validate(&self) -> Result<(), IndexError> {
        let b = self.bounds;
        if !(b.x.is_finite() && b.y.is_finite() && b.width.is_finite() && b.height.is_finite()) {
            return Err(IndexError::InvalidConfig("bounds must be finite"));
        }
        if b.width <= 0.0 || b.height <= 0.0 {
            return Err(IndexError::InvalidConfig("bounds must have a positive area"));
        }
        if self.capacity == 0 {
            return Err(IndexError::InvalidConfig("capacity must be non-zero"));
        }
        Ok(())
    }
}

/// A node of the quadtree.
#[derive(Debug, Clone)]
pub struct Region<K: Key> {
    bounds: Rect,
    depth: u32,
    parent: Option<RegionId>,
    children: Option<[RegionId; 4]>,
    subdivided: bool,
    neighbors: SmallVec<[RegionId; 8]>,
    entities: Vec<K>,
}

impl<K: Key> Region<K> {
    fn new(bounds: Rect, depth: u32, parent: Option<RegionId>) -> Self {
        Self {
            bounds,
            depth,
            parent,
            children: None,
            subdivided: false,
            neighbors: SmallVec::new(),
            entities: Vec::new(),
        }
    }

    #[must_use]
    pub const fn bounds(&self) -> Rect {
        self.bounds
    }

    #[must_use]
    pub const fn depth(&self) -> u32 {
        self.depth
    }

    #[must_use]
    pub const fn parent(&self) -> Option<RegionId> {
        self.parent
    }

    /// Live children, if the region is currently subdivided.
    #[must_use]
    pub fn children(&self) -> Option<[RegionId; 4]> {
        if self.subdivided { self.children } else { None }
    }

    #[must_use]
    pub const fn is_leaf(&self) -> bool {
        !self.subdivided
    }

    #[must_use]
    pub fn neighbors(&self) -> &[RegionId] {
        &self.neighbors
    }

    #[must_use]
    pub fn entities(&self) -> &[K] {
        &self.entities
    }

    /// Reset to an empty leaf while keeping any allocated children for reuse.
    fn purge(&mut self) {
        self.entities.clear();
        self.neighbors.clear();
        self.subdivided = false;
    }
}

/// Where an entity currently lives inside the index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement<T> {
    pub position: Vec2,
    pub tag: T,
    pub leaf: RegionId,
}

/// Outcome of [`Quadtree::relocate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relocation {
    /// The entity stayed in its leaf; only the position changed.
    InPlace,
    /// The entity left its leaf and was reinserted.
    Relocated,
    /// The key is not stored in the index.
    Missing,
}

/// Read-only view of a non-empty leaf, used by renderers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LeafSnapshot {
    pub id: RegionId,
    pub bounds: Rect,
    pub depth: u32,
    pub len: usize,
}

/// Region quadtree keyed by entity handles `K`, carrying a small tag `T` per entity.
#[derive(Debug)]
pub struct Quadtree<K: Key, T> {
    config: QuadtreeConfig,
    regions: SlotMap<RegionId, Region<K>>,
    root: RegionId,
    placements: SecondaryMap<K, Placement<T>>,
}

impl<K: Key, T: Copy> Quadtree<K, T> {
    /// Create an empty tree covering `config.bounds`.
    pub fn new(config: QuadtreeConfig) -> Result<Self, IndexError> {
        config.validate()?;
        let mut regions = SlotMap::with_key();
        let root = regions.insert(Region::new(config.bounds, 0, None));
        Ok(Self {
            config,
            regions,
            root,
            placements: SecondaryMap::new(),
        })
    }

    #[must_use]
    pub const fn config(&self) -> &QuadtreeConfig {
        &self.config
    }

    #[must_use]
    pub const fn root(&self) -> RegionId {
        self.root
    }

    #[must_use]
    pub fn region(&self, id: RegionId) -> Option<&Region<K>> {
        self.regions.get(id)
    }

    /// Number of stored entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.placements.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.placements.is_empty()
    }

    #[must_use]
    pub fn contains(&self, key: K) -> bool {
        self.placements.contains_key(key)
    }

    #[must_use]
    pub fn placement(&self, key: K) -> Option<&Placement<T>> {
        self.placements.get(key)
    }

    /// Leaf currently holding `key`.
    #[must_use]
    pub fn leaf_of(&self, key: K) -> Option<RegionId> {
        self.placements.get(key).map(|p| p.leaf)
    }

    #[must_use]
    pub fn position_of(&self, key: K) -> Option<Vec2> {
        self.placements.get(key).map(|p| p.position)
    }

    /// Drop every entity and region, leaving a single empty root.
    pub fn clear(&mut self) {
        self.regions.clear();
        self.placements.clear();
        self.root = self
            .regions
            .insert(Region::new(self.config.bounds, 0, None));
    }

    /// Insert `key` at `position`. An already present key is moved instead.
    pub fn insert(&mut self, key: K, position: Vec2, tag: T) {
        self.insert_from(self.root, key, position, tag);
    }

    /// Insert `key` starting the descent at `start`, climbing first if
    /// `position` lies outside it. A stale `start` falls back to the root.
    pub fn insert_from(&mut self, start: RegionId, key: K, position: Vec2, tag: T) {
        if self.placements.contains_key(key) {
            self.remove(key);
        }
        let start = if self.regions.contains_key(start) && self.is_live(start) {
            start
        } else {
            self.root
        };
        self.placements.insert(
            key,
            Placement {
                position,
                tag,
                leaf: start,
            },
        );
        self.place(start, key, position);
    }

    /// Remove `key`, returning its last placement. Absent keys are ignored.
    pub fn remove(&mut self, key: K) -> Option<Placement<T>> {
        let placement = self.placements.remove(key)?;
        self.detach(placement.leaf, key);
        self.check_sustainability(placement.leaf);
        Some(placement)
    }

    /// Move `key` to `position`, reinserting it when it leaves its current leaf.
    pub fn relocate(&mut self, key: K, position: Vec2) -> Relocation {
        let Some(placement) = self.placements.get_mut(key) else {
            return Relocation::Missing;
        };
        let leaf = placement.leaf;
        placement.position = position;
        let region = &self.regions[leaf];
        if region.parent.is_none() || region.bounds.contains(position) {
            return Relocation::InPlace;
        }

        self.detach(leaf, key);
        self.check_sustainability(leaf);
        let start = self.live_ancestor(leaf);
        self.place(start, key, position);
        Relocation::Relocated
    }

    /// Climb from `start` until `position` is covered, then descend to a leaf with room.
    fn place(&mut self, start: RegionId, key: K, position: Vec2) {
        let mut region = start;
        while let Some(parent) = self.regions[region].parent {
            if self.regions[region].bounds.contains(position) {
                break;
            }
            region = parent;
        }
        self.descend(region, key, position);
    }

    fn descend(&mut self, start: RegionId, key: K, position: Vec2) {
        let mut region = start;
        loop {
            let node = &self.regions[region];
            if !node.subdivided
                && (node.entities.len() < self.config.capacity
                    || node.depth >= self.config.max_depth)
            {
                self.regions[region].entities.push(key);
                if let Some(placement) = self.placements.get_mut(key) {
                    placement.leaf = region;
                }
                return;
            }
            if !node.subdivided {
                self.subdivide(region);
            }
            let node = &self.regions[region];
            let Some(children) = node.children else {
                unreachable!("subdivided region without children");
            };
            region = children[node.bounds.quadrant_of(position)];
        }
    }

    fn subdivide(&mut self, id: RegionId) {
        let (bounds, depth, existing) = {
            let region = &self.regions[id];
            (region.bounds, region.depth, region.children)
        };

        let children = match existing {
            Some(children) => {
                for child in children {
                    self.regions[child].purge();
                }
                children
            }
            None => {
                let quadrants = bounds.quadrants();
                let children = quadrants
                    .map(|quadrant| self.regions.insert(Region::new(quadrant, depth + 1, Some(id))));
                self.regions[id].children = Some(children);
                children
            }
        };

        for child in children {
            let siblings = children.iter().copied().filter(|&sibling| sibling != child);
            self.regions[child].neighbors.extend(siblings);
        }
        self.regions[id].subdivided = true;

        let former_neighbors = std::mem::take(&mut self.regions[id].neighbors);
        for neighbor in former_neighbors {
            self.regions[neighbor].neighbors.retain(|n| *n != id);
            let neighbor_bounds = self.regions[neighbor].bounds;
            for child in children {
                if self.regions[child].bounds.borders(&neighbor_bounds) {
                    self.link(child, neighbor);
                }
            }
        }

        let entities = std::mem::take(&mut self.regions[id].entities);
        for key in entities {
            let Some(position) = self.placements.get(key).map(|p| p.position) else {
                continue;
            };
            let child = children[bounds.quadrant_of(position)];
            self.descend(child, key, position);
        }

        trace!(?id, depth, "region subdivided");
        self.debug_assert_local(id);
    }

    fn link(&mut self, a: RegionId, b: RegionId) {
        if !self.regions[a].neighbors.contains(&b) {
            self.regions[a].neighbors.push(b);
        }
        if !self.regions[b].neighbors.contains(&a) {
            self.regions[b].neighbors.push(a);
        }
    }

    fn detach(&mut self, leaf: RegionId, key: K) {
        let Some(region) = self.regions.get_mut(leaf) else {
            return;
        };
        if let Some(index) = region.entities.iter().position(|k| *k == key) {
            region.entities.remove(index);
        }
    }

    /// Merge the parent of an underfull leaf when its whole subtree fits back in one region.
    fn check_sustainability(&mut self, leaf: RegionId) {
        let mut region = leaf;
        loop {
            let node = &self.regions[region];
            let Some(parent) = node.parent else {
                return;
            };
            if !node.is_leaf()
                || node.entities.len() * 4 >= self.config.capacity
                || !self.regions[parent].subdivided
            {
                return;
            }
            if self.subtree_len(parent) >= self.config.capacity {
                return;
            }
            self.collapse(parent);
            region = parent;
        }
    }

    /// Fold every descendant of `id` back into it and rewire the neighbour graph.
    fn collapse(&mut self, id: RegionId) {
        let Some(children) = self.regions[id].children else {
            return;
        };
        if !self.regions[id].subdivided {
            return;
        }
        for child in children {
            self.collapse(child);
        }

        let mut entities = std::mem::take(&mut self.regions[id].entities);
        let mut neighbors: SmallVec<[RegionId; 8]> = SmallVec::new();
        for child in children {
            let region = &mut self.regions[child];
            entities.append(&mut region.entities);
            for neighbor in region.neighbors.drain(..) {
                if neighbor != id && !children.contains(&neighbor) && !neighbors.contains(&neighbor)
                {
                    neighbors.push(neighbor);
                }
            }
            region.purge();
        }

        for &neighbor in &neighbors {
            let list = &mut self.regions[neighbor].neighbors;
            list.retain(|n| *n != id && !children.contains(n));
            list.push(id);
        }
        for &key in &entities {
            if let Some(placement) = self.placements.get_mut(key) {
                placement.leaf = id;
            }
        }

        let region = &mut self.regions[id];
        region.entities = entities;
        region.neighbors = neighbors;
        region.subdivided = false;

        trace!(?id, len = region.entities.len(), "children merged");
        self.debug_assert_local(id);
    }

    /// Nearest ancestor of a (possibly purged) region that is still part of the tree.
    fn live_ancestor(&self, region: RegionId) -> RegionId {
        let mut candidate = self.regions[region].parent.unwrap_or(region);
        while !self.is_live(candidate) {
            match self.regions[candidate].parent {
                Some(parent) => candidate = parent,
                None => break,
            }
        }
        candidate
    }

    fn is_live(&self, region: RegionId) -> bool {
        let mut current = region;
        while let Some(parent) = self.regions[current].parent {
            if !self.regions[parent].subdivided {
                return false;
            }
            current = parent;
        }
        true
    }

    fn subtree_len(&self, region: RegionId) -> usize {
        self.count_entities(region, |_| true)
    }

    /// Count entities stored under `region` whose tag passes `filter`.
    pub fn count_entities(&self, region: RegionId, filter: impl Fn(&T) -> bool) -> usize {
        let mut total = 0;
        let mut queue = VecDeque::from([region]);
        while let Some(current) = queue.pop_front() {
            let Some(node) = self.regions.get(current) else {
                continue;
            };
            total += node
                .entities
                .iter()
                .filter(|key| self.placements.get(**key).is_some_and(|p| filter(&p.tag)))
                .count();
            if let Some(children) = node.children() {
                queue.extend(children);
            }
        }
        total
    }

    /// Leaf whose area contains `position` (positions outside the root clamp to an edge leaf).
    #[must_use]
    pub fn leaf_at(&self, position: Vec2) -> RegionId {
        let mut region = self.root;
        while let Some(children) = self.regions[region].children() {
            region = children[self.regions[region].bounds.quadrant_of(position)];
        }
        region
    }

    /// Entities near `origin`, gathered breadth-first over the neighbour graph.
    ///
    /// Every region whose rectangle intersects the circle contributes all of its
    /// entities whose tag passes `filter`; traversal stops as soon as `cap`
    /// results have been collected. The origin itself is included when its tag
    /// matches. Results follow traversal order, not distance order.
    pub fn query_radius(
        &self,
        origin: K,
        radius: f32,
        cap: usize,
        filter: impl Fn(&T) -> bool,
    ) -> Vec<K> {
        match self.placements.get(origin) {
            Some(placement) => {
                self.collect_within(placement.leaf, placement.position, radius, cap, filter)
            }
            None => Vec::new(),
        }
    }

    /// Same as [`Quadtree::query_radius`] around an arbitrary point.
    pub fn query_point(
        &self,
        position: Vec2,
        radius: f32,
        cap: usize,
        filter: impl Fn(&T) -> bool,
    ) -> Vec<K> {
        let start = self.leaf_at(position);
        self.collect_within(start, position, radius, cap, filter)
    }

    fn collect_within(
        &self,
        start: RegionId,
        center: Vec2,
        radius: f32,
        cap: usize,
        filter: impl Fn(&T) -> bool,
    ) -> Vec<K> {
        let mut result = Vec::new();
        if cap == 0 {
            return result;
        }
        let mut queue = VecDeque::from([start]);
        let mut checked = HashSet::from([start]);

        while let Some(current) = queue.pop_front() {
            let region = &self.regions[current];
            if !region.bounds.intersects_circle(center, radius) {
                continue;
            }
            result.extend(
                region
                    .entities
                    .iter()
                    .copied()
                    .filter(|key| self.placements.get(*key).is_some_and(|p| filter(&p.tag))),
            );
            if result.len() >= cap {
                break;
            }
            for &neighbor in &region.neighbors {
                if checked.insert(neighbor) {
                    queue.push_back(neighbor);
                }
            }
        }
        result
    }

    /// Leaves reachable from `start` whose rectangles intersect the circle.
    #[must_use]
    pub fn region_query(&self, start: RegionId, center: Vec2, radius: f32) -> Vec<RegionId> {
        let mut result = Vec::new();
        if !self.regions.contains_key(start) {
            return result;
        }
        let mut queue = VecDeque::from([start]);
        let mut checked = HashSet::from([start]);

        while let Some(current) = queue.pop_front() {
            let region = &self.regions[current];
            if !region.bounds.intersects_circle(center, radius) {
                continue;
            }
            result.push(current);
            for &neighbor in &region.neighbors {
                if checked.insert(neighbor) {
                    queue.push_back(neighbor);
                }
            }
        }
        result
    }

    /// Expanding-ring search for the entity nearest to `seeker`.
    ///
    /// Candidates must pass `accept`; among them, those for which `available`
    /// returns true win over any other candidate regardless of distance. The
    /// ring starts at half the minor dimension of the seeker's leaf and doubles
    /// at most `3 + depth` times, stopping early once an available candidate
    /// lies inside the current ring.
    pub fn find_closest(
        &self,
        seeker: K,
        accept: impl Fn(K, &T) -> bool,
        available: impl Fn(K) -> bool,
    ) -> Option<K> {
        let placement = self.placements.get(seeker)?;
        let origin = placement.position;
        let leaf = &self.regions[placement.leaf];
        let mut radius = leaf.bounds.min_dimension() * 0.5;
        let max_doublings = 3 + leaf.depth;

        let mut scanned: HashSet<RegionId> = HashSet::new();
        let mut best_available: Option<(OrderedFloat<f32>, K)> = None;
        let mut best_other: Option<(OrderedFloat<f32>, K)> = None;

        for doubling in 0..=max_doublings {
            for region in self.region_query(placement.leaf, origin, radius) {
                if !scanned.insert(region) {
                    continue;
                }
                for &key in &self.regions[region].entities {
                    if key == seeker {
                        continue;
                    }
                    let Some(candidate) = self.placements.get(key) else {
                        continue;
                    };
                    if !accept(key, &candidate.tag) {
                        continue;
                    }
                    let distance = OrderedFloat(candidate.position.distance_squared(origin));
                    let slot = if available(key) {
                        &mut best_available
                    } else {
                        &mut best_other
                    };
                    if slot.is_none_or(|(best, _)| distance < best) {
                        *slot = Some((distance, key));
                    }
                }
            }

            if best_available.is_some_and(|(distance, _)| distance.0 <= radius * radius) {
                break;
            }
            if doubling < max_doublings {
                radius *= 2.0;
            }
        }

        best_available.or(best_other).map(|(_, key)| key)
    }

    /// Snapshot of every non-empty leaf.
    #[must_use]
    pub fn leaves(&self) -> Vec<LeafSnapshot> {
        let mut result = Vec::new();
        let mut queue = VecDeque::from([self.root]);
        while let Some(current) = queue.pop_front() {
            let region = &self.regions[current];
            if let Some(children) = region.children() {
                queue.extend(children);
            } else if !region.entities.is_empty() {
                result.push(LeafSnapshot {
                    id: current,
                    bounds: region.bounds,
                    depth: region.depth,
                    len: region.entities.len(),
                });
            }
        }
        result
    }

    /// Check every structural invariant, reporting the first violation.
    pub fn validate(&self) -> Result<(), IndexError> {
        let mut live: HashSet<RegionId> = HashSet::new();
        let mut queue = VecDeque::from([self.root]);
        while let Some(current) = queue.pop_front() {
            live.insert(current);
            if let Some(children) = self.regions[current].children() {
                queue.extend(children);
            }
        }

        let root_bounds = self.regions[self.root].bounds;
        let mut stored = 0usize;
        for &id in &live {
            let region = &self.regions[id];
            if let Some(children) = region.children() {
                if !region.entities.is_empty() {
                    return Err(invariant(format!("subdivided region {id:?} holds entities")));
                }
                if !region.neighbors.is_empty() {
                    return Err(invariant(format!("subdivided region {id:?} has neighbours")));
                }
                for child in children {
                    let node = &self.regions[child];
                    if node.parent != Some(id) || node.depth != region.depth + 1 {
                        return Err(invariant(format!("child {child:?} miswired under {id:?}")));
                    }
                }
                continue;
            }

            if region.entities.len() > self.config.capacity && region.depth < self.config.max_depth
            {
                return Err(invariant(format!(
                    "leaf {id:?} holds {} entities over capacity {}",
                    region.entities.len(),
                    self.config.capacity
                )));
            }
            for &key in &region.entities {
                let Some(placement) = self.placements.get(key) else {
                    return Err(invariant(format!("leaf {id:?} holds an unplaced entity")));
                };
                if placement.leaf != id {
                    return Err(invariant(format!(
                        "entity recorded in {:?} but stored in {id:?}",
                        placement.leaf
                    )));
                }
                if root_bounds.contains(placement.position)
                    && !region.bounds.contains(placement.position)
                {
                    return Err(invariant(format!("entity outside its leaf {id:?}")));
                }
            }
            stored += region.entities.len();

            for (i, &neighbor) in region.neighbors.iter().enumerate() {
                if neighbor == id {
                    return Err(invariant(format!("region {id:?} neighbours itself")));
                }
                if region.neighbors[..i].contains(&neighbor) {
                    return Err(invariant(format!("duplicate neighbour in {id:?}")));
                }
                if !live.contains(&neighbor) || !self.regions[neighbor].is_leaf() {
                    return Err(invariant(format!(
                        "region {id:?} links dead or subdivided region {neighbor:?}"
                    )));
                }
                if !self.regions[neighbor].neighbors.contains(&id) {
                    return Err(invariant(format!(
                        "asymmetric link {id:?} -> {neighbor:?}"
                    )));
                }
                if !region.bounds.borders(&self.regions[neighbor].bounds) {
                    return Err(invariant(format!(
                        "regions {id:?} and {neighbor:?} linked without a shared border"
                    )));
                }
            }
        }

        if stored != self.placements.len() {
            return Err(invariant(format!(
                "{stored} entities stored in leaves but {} placements recorded",
                self.placements.len()
            )));
        }
        Ok(())
    }

    fn debug_assert_local(&self, id: RegionId) {
        if cfg!(debug_assertions) {
            let region = &self.regions[id];
            debug_assert!(
                region.is_leaf() || (region.entities.is_empty() && region.neighbors.is_empty()),
                "subdivided region must be empty"
            );
            for &neighbor in &region.neighbors {
                debug_assert!(
                    self.regions[neighbor].neighbors.contains(&id),
                    "neighbour links must be symmetric"
                );
            }
        }
    }
}

fn invariant(message: String) -> IndexError {
    IndexError::Invariant(message)
}
