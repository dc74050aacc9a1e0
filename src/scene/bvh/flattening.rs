use index_vec::IndexVec;

use super::{BuildNode, BuildNodeKind, LinearNode, NodeIdx, NodeKind};

/// Flattens the build tree into a fixed-size array by walking it in post-order
/// (children before parent) and writing nodes in reverse index order. The root
/// is emitted last, which pins it to index 0, so traversal can start from a
/// known slot with no separate lookup table.
pub(super) fn flatten(root: &BuildNode) -> IndexVec<NodeIdx, LinearNode> {
    let count = root.node_count();
    let mut slots: Vec<Option<LinearNode>> = Vec::new();
    slots.resize_with(count, || None);

    let mut cursor = count;
    let root_index = emit(root, &mut slots, &mut cursor);
    debug_assert_eq!(cursor, 0);
    debug_assert_eq!(root_index.index(), 0);

    slots
        .into_iter()
        .map(|slot| slot.expect("every slot is written exactly once"))
        .collect()
}

fn emit(node: &BuildNode, slots: &mut [Option<LinearNode>], cursor: &mut usize) -> NodeIdx {
    let kind = match &node.kind {
        BuildNodeKind::Leaf { first, count } => NodeKind::Leaf {
            first: *first as u32,
            count: *count as u32,
        },
        BuildNodeKind::Inner { left, right } => {
            let left = emit(left, slots, cursor);
            let right = emit(right, slots, cursor);
            NodeKind::Inner { left, right }
        }
    };

    *cursor -= 1;
    debug_assert!(slots[*cursor].is_none());
    slots[*cursor] = Some(LinearNode {
        bounds: node.bounds.clone(),
        kind,
    });
    NodeIdx::from(*cursor)
}
