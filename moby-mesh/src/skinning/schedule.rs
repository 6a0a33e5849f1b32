//! Matrix transfer scheduling
//!
//! Every joint a submesh references has to be copied from the scratchpad
//! into its VU0 transfer slot before the first vertex that needs it. A copy
//! can happen in three places, cheapest first:
//!
//! ```text
//! two-way      on one of this submesh's first-use two-way blend vertices
//!              (only joints no two-way blend reads)
//! last         on a regular vertex at the end of the previous submesh,
//!              counting backwards from its last vertex
//! preloop      in the pre-loop transfer list of this submesh's vertex table
//! ```
//!
//! This also makes the blend allocations for the submesh, since the number of
//! first-use two-way vertices decides how many transfers can ride on them.

use std::collections::BTreeSet;

use crate::formats::{MatrixTransfer, VertexTable};
use crate::model::Vertex;
use crate::skinning::allocator::MatrixSlotAllocator;
use crate::skinning::liveness::MatrixLiveness;
use crate::BLEND_BUFFER_SLOTS;

/// Where each of a submesh's matrix transfers goes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatrixTransferSchedule {
    /// Attach to `last.vertices[len - 1 - i]` of the previous submesh
    pub last_submesh_transfers: Vec<MatrixTransfer>,
    pub preloop_transfers: Vec<MatrixTransfer>,
    /// Attach to this submesh's `vertices[i]`
    pub two_way_transfers: Vec<MatrixTransfer>,
}

/// Allocate the transfer and blend slots of submesh `smi` and decide where
/// each transfer is performed
///
/// `last` is the previous submesh's vertex table, still without the
/// transfers this call hands to it.
pub fn schedule_matrix_transfers(
    smi: usize,
    vertices: &[Vertex],
    last: Option<&VertexTable>,
    allocator: &mut MatrixSlotAllocator,
    liveness: &[MatrixLiveness],
) -> MatrixTransferSchedule {
    let mut schedule = MatrixTransferSchedule::default();

    let mut slots_in_use = [false; BLEND_BUFFER_SLOTS];
    if let Some(last) = last {
        for vertex in last.regular_vertices() {
            if let Some(addr) = vertex.regular_load_addr() {
                slots_in_use[addr as usize / 4] = true;
            }
        }
    }

    let mut used_joints = BTreeSet::new();
    let mut read_by_two_way_blend = [false; 256];
    for vertex in vertices {
        for &joint in vertex.skin.active_joints() {
            used_joints.insert(joint as u8);
            if vertex.skin.count == 2 {
                read_by_two_way_blend[joint as u8 as usize] = true;
            }
        }
    }

    // Joints a two-way blend reads have to be in place before the loop.
    let mut maybe_conflicting = Vec::new();
    let mut independent = Vec::new();
    for &joint in used_joints.iter().filter(|&&j| read_by_two_way_blend[j as usize]) {
        if let Some(addr) = allocator.allocate_transferred(joint) {
            let transfer = MatrixTransfer::new(joint, addr);
            if slots_in_use[addr as usize / 4] {
                maybe_conflicting.push(transfer);
            } else {
                independent.push(transfer);
            }
        }
    }
    maybe_conflicting.reverse();
    let transfers = maybe_conflicting.into_iter().chain(independent);

    let mut late_transfers = Vec::new();
    for &joint in used_joints.iter().filter(|&&j| !read_by_two_way_blend[j as usize]) {
        if let Some(addr) = allocator.allocate_transferred(joint) {
            late_transfers.push(MatrixTransfer::new(joint, addr));
        }
    }

    for (i, vertex) in vertices.iter().enumerate() {
        if vertex.skin.is_blended() {
            allocator.allocate_blended(
                vertex.skin,
                smi as i32,
                liveness[i].last_submesh,
                vertices,
            );
        }
    }

    let mut first_use_two_way_count = 0;
    for (i, vertex) in vertices.iter().enumerate() {
        if vertex.skin.count != 2 {
            continue;
        }
        let allocation = if liveness[i].population_count != 1 {
            allocator.get_allocation_pre(vertex.skin)
        } else {
            None
        };
        if allocation.unwrap_or_default().first_use_pre {
            first_use_two_way_count += 1;
        }
    }

    match last {
        Some(last) => {
            let blend_end = (last.two_way_blend_vertex_count + last.three_way_blend_vertex_count) as i64;
            let mut insert_index = last.vertices.len() as i64 - 1;
            for transfer in transfers {
                if insert_index >= blend_end {
                    let conflict = last.vertices[insert_index as usize..]
                        .iter()
                        .any(|vertex| vertex.regular_load_addr() == Some(transfer.vu0_dest_addr));
                    if !conflict {
                        schedule.last_submesh_transfers.push(transfer);
                        insert_index -= 1;
                        continue;
                    }
                }
                schedule.preloop_transfers.push(transfer);
            }
        }
        None => schedule.preloop_transfers.extend(transfers),
    }

    for (i, transfer) in late_transfers.into_iter().enumerate() {
        if i < first_use_two_way_count {
            schedule.two_way_transfers.push(transfer);
        } else if last.is_some_and(|last| {
            schedule.last_submesh_transfers.len() < last.main_vertex_count
                && !slots_in_use[transfer.vu0_dest_addr as usize / 4]
        }) {
            schedule.last_submesh_transfers.push(transfer);
        } else {
            schedule.preloop_transfers.push(transfer);
        }
    }

    tracing::trace!(
        "submesh {}: {} transfers on previous submesh, {} pre-loop, {} on two-way vertices",
        smi,
        schedule.last_submesh_transfers.len(),
        schedule.preloop_transfers.len(),
        schedule.two_way_transfers.len()
    );
    schedule
}
