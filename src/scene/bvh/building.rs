use index_vec::IndexVec;
use ordered_float::OrderedFloat;

use super::{BuildNode, BuildNodeKind, Bvh, BvhSettings};
use crate::geometry::{Aabb, WorldPoint};
use crate::scene::{Entity, EntityIdx};

struct BuildItem {
    entity: EntityIdx,
    bounds: Aabb,
    centroid: WorldPoint,
}

impl Bvh {
    /// Builds the hierarchy over all entities. Never fails: zero entities
    /// produce a single degenerate empty-bounds leaf.
    pub fn build(entities: &IndexVec<EntityIdx, Entity>, settings: BvhSettings) -> Bvh {
        let mut items: Vec<BuildItem> = entities
            .iter_enumerated()
            .map(|(index, entity)| {
                let bounds = entity.bounding_box();
                let centroid = bounds.center();
                BuildItem {
                    entity: index,
                    bounds,
                    centroid,
                }
            })
            .collect();

        let root = build_recursive(&mut items, 0, 0, &settings);
        let bounds = root.bounds.clone();
        let nodes = super::flattening::flatten(&root);
        let entity_order = items.into_iter().map(|item| item.entity).collect();

        Bvh {
            nodes,
            entity_order,
            bounds,
        }
    }
}

/// Recursively partitions `items`, reordering the slice in place so that every
/// leaf ends up covering a contiguous range. `first` is the slice's offset
/// within the full item array.
fn build_recursive(
    items: &mut [BuildItem],
    first: usize,
    depth: usize,
    settings: &BvhSettings,
) -> BuildNode {
    let bounds = items
        .iter()
        .fold(Aabb::empty(), |bounds, item| bounds.enclose(&item.bounds));

    if items.len() <= settings.max_leaf_entities || depth >= settings.max_depth {
        return BuildNode {
            bounds,
            kind: BuildNodeKind::Leaf {
                first,
                count: items.len(),
            },
        };
    }

    // Split on the axis where the centroids spread the most.
    let centroid_bounds = Aabb::from_points(items.iter().map(|item| item.centroid))
        .expect("non-empty above the leaf threshold");
    let size = centroid_bounds.size();
    let axis = if size.x >= size.y && size.x >= size.z {
        0
    } else if size.y >= size.z {
        1
    } else {
        2
    };

    if size[axis] <= 0.0 {
        // All centroids coincide; no split can make progress.
        return BuildNode {
            bounds,
            kind: BuildNodeKind::Leaf {
                first,
                count: items.len(),
            },
        };
    }

    let mid = items.len() / 2;
    items.select_nth_unstable_by_key(mid, |item| OrderedFloat(item.centroid[axis]));

    let (left_items, right_items) = items.split_at_mut(mid);
    let left = build_recursive(left_items, first, depth + 1, settings);
    let right = build_recursive(right_items, first + mid, depth + 1, settings);

    BuildNode {
        bounds,
        kind: BuildNodeKind::Inner {
            left: Box::new(left),
            right: Box::new(right),
        },
    }
}
