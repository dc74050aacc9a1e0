use index_vec::IndexVec;
use ordered_float::OrderedFloat;

use super::{Bvh, NodeIdx, NodeKind};
use crate::geometry::{FloatType, HIT_EPSILON, Ray};
use crate::scene::{Entity, EntityIdx, HitRecord};

/// First block size of a `BlockStack`; subsequent blocks double.
const FIRST_BLOCK_CAPACITY: usize = 64;

/// Stack backed by a chain of fixed-size blocks. Blocks are allocated on
/// demand with geometrically growing capacity and kept around on pop, so a
/// stack reused across traversals settles into zero allocations while still
/// supporting unbounded depth.
#[derive(Clone, Debug)]
pub(crate) struct BlockStack<T> {
    blocks: Vec<Vec<T>>,
    /// Index of the block receiving pushes.
    top: usize,
}

impl<T> BlockStack<T> {
    fn new() -> BlockStack<T> {
        BlockStack {
            blocks: Vec::new(),
            top: 0,
        }
    }

    fn push(&mut self, value: T) {
        if self.blocks.is_empty() {
            self.blocks.push(Vec::with_capacity(FIRST_BLOCK_CAPACITY));
        }
        if self.blocks[self.top].len() == self.blocks[self.top].capacity() {
            if self.top + 1 == self.blocks.len() {
                let capacity = self.blocks[self.top].capacity() * 2;
                self.blocks.push(Vec::with_capacity(capacity));
            }
            self.top += 1;
        }
        self.blocks[self.top].push(value);
    }

    fn pop(&mut self) -> Option<T> {
        loop {
            let block = self.blocks.get_mut(self.top)?;
            if let Some(value) = block.pop() {
                return Some(value);
            }
            if self.top == 0 {
                return None;
            }
            self.top -= 1;
        }
    }

    fn clear(&mut self) {
        for block in &mut self.blocks {
            block.clear();
        }
        self.top = 0;
    }

    #[cfg(test)]
    fn block_count(&self) -> usize {
        self.blocks.len()
    }
}

impl<T> Default for BlockStack<T> {
    fn default() -> BlockStack<T> {
        BlockStack::new()
    }
}

/// Reusable traversal scratch space; hold one per worker and pass it to every
/// intersection query to avoid per-sample allocation churn.
#[derive(Clone, Debug, Default)]
pub struct TraversalCache {
    nodes: BlockStack<NodeIdx>,
    candidates: BlockStack<u32>,
}

impl Bvh {
    /// Collects every entity boundary crossing along `ray` into `hits`,
    /// sorted ascending by distance, stable on collection order for ties.
    /// All hits are reported, not only the nearest: participating media need
    /// the ordered entry/exit pairs behind the closest surface.
    pub(crate) fn intersect_all(
        &self,
        entities: &IndexVec<EntityIdx, Entity>,
        ray: &Ray,
        cache: &mut TraversalCache,
        hits: &mut Vec<HitRecord>,
    ) {
        hits.clear();
        cache.nodes.clear();
        cache.candidates.clear();

        cache.nodes.push(NodeIdx::from(0usize));
        while let Some(index) = cache.nodes.pop() {
            let node = &self.nodes[index];
            let (min_t, max_t) = node.bounds.intersect(ray);
            if min_t > max_t || max_t < 0.0 {
                continue;
            }
            match node.kind {
                NodeKind::Leaf { first, count } => {
                    for slot in first..(first + count) {
                        cache.candidates.push(slot);
                    }
                }
                NodeKind::Inner { left, right } => {
                    cache.nodes.push(left);
                    cache.nodes.push(right);
                }
            }
        }

        while let Some(slot) = cache.candidates.pop() {
            let entity_index = self.entity_order[slot as usize];
            let entity = &entities[entity_index];
            for crossing in entity.intersect(ray, HIT_EPSILON, FloatType::INFINITY) {
                hits.push(HitRecord {
                    t: crossing.t,
                    point: ray.point_at(crossing.t),
                    normal: crossing.normal,
                    entity: entity_index,
                    material: entity.material,
                    texture_coordinates: crossing.texture_coordinates,
                });
            }
        }

        hits.sort_by_key(|hit| OrderedFloat(hit.t));
    }
}
