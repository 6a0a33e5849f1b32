//! Vertex packing
//!
//! Turns a submesh's vertices into vertex table records once the allocator
//! has placed every matrix. Records are grouped by what the vertex does to
//! VU0:
//!
//! ```text
//! two-way     first use of a 2-way blend: blends and stores the result
//! three-way   first use of a 3-way blend
//! regular     rigid vertices, loading a transferred joint matrix
//! regular     later uses of a blend, loading the stored result
//! ```
//!
//! A blended matrix used by only one vertex in the class isn't kept: its
//! blend result goes to the don't-care address.

use crate::error::{AllocatorError, ClassError};
use crate::formats::{CommonAttributes, MobyVertex, VERTEX_INDEX_MASK, VertexTable};
use crate::model::{SkinAttributes, Vertex};
use crate::packing::{pack_normal, pack_position};
use crate::skinning::allocator::{MatrixAllocation, MatrixSlotAllocator};
use crate::skinning::liveness::MatrixLiveness;
use crate::DONT_CARE_ADDR;

/// Packed records of one submesh
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackedVertices {
    pub table: VertexTable,
    /// Record position of each input vertex
    pub index_mapping: Vec<usize>,
}

/// Pack the vertices of submesh `smi`
///
/// `inverse_scale` is `1024 / scale`. Transfers are not attached here; the
/// caller adds them from the schedule.
pub fn pack_vertices(
    smi: usize,
    vertices: &[Vertex],
    allocator: &mut MatrixSlotAllocator,
    liveness: &[MatrixLiveness],
    inverse_scale: f32,
) -> Result<PackedVertices, ClassError> {
    let current = smi as i32;
    let err = |source| ClassError::Allocator {
        submesh: smi,
        source,
    };

    let mut table = VertexTable::default();
    let mut index_mapping = vec![0; vertices.len()];
    let mut first_uses = vec![false; vertices.len()];
    let mut blend_allocations: Vec<Option<MatrixAllocation>> = vec![None; vertices.len()];

    for (i, vertex) in vertices.iter().enumerate() {
        if !vertex.skin.is_blended() {
            continue;
        }
        let allocation = if liveness[i].population_count != 1 {
            allocator.get_allocation(vertex.skin, current).map_err(err)?
        } else {
            None
        };
        // No allocation at all (single use, or the blend region was full)
        // means the blend is done on the spot.
        first_uses[i] = allocation.is_none_or(|a| a.first_use);
        blend_allocations[i] = allocation;
    }

    // A blend redone after its slot was evicted still has to be stored, as
    // later vertices load it.
    let blend_store_addr =
        |i: usize| blend_allocations[i].map_or(DONT_CARE_ADDR, |allocation| allocation.address);

    for (i, vertex) in vertices.iter().enumerate() {
        if vertex.skin.count != 2 || !first_uses[i] {
            continue;
        }
        let skin = vertex.skin;
        index_mapping[i] = table.vertices.len();
        table.vertices.push(MobyVertex::TwoWay {
            vertex_index: vertex_index(vertex),
            transfer_joint: 0,
            load_addrs: [
                transfer_addr(allocator, skin.joints[0], current).map_err(err)?,
                transfer_addr(allocator, skin.joints[1], current).map_err(err)?,
            ],
            weights: [skin.weights[0], skin.weights[1]],
            transfer_store_addr: DONT_CARE_ADDR,
            blend_store_addr: blend_store_addr(i),
            attributes: attributes(vertex, inverse_scale),
        });
        table.two_way_blend_vertex_count += 1;
    }

    for (i, vertex) in vertices.iter().enumerate() {
        if vertex.skin.count != 3 || !first_uses[i] {
            continue;
        }
        let skin = vertex.skin;
        index_mapping[i] = table.vertices.len();
        table.vertices.push(MobyVertex::ThreeWay {
            vertex_index: vertex_index(vertex),
            load_addrs: [
                transfer_addr(allocator, skin.joints[0], current).map_err(err)?,
                transfer_addr(allocator, skin.joints[1], current).map_err(err)?,
                transfer_addr(allocator, skin.joints[2], current).map_err(err)?,
            ],
            weights: skin.weights,
            blend_store_addr: blend_store_addr(i),
            attributes: attributes(vertex, inverse_scale),
        });
        table.three_way_blend_vertex_count += 1;
    }

    for (i, vertex) in vertices.iter().enumerate() {
        if vertex.skin.count != 1 {
            continue;
        }
        index_mapping[i] = table.vertices.len();
        table.vertices.push(MobyVertex::Regular {
            vertex_index: vertex_index(vertex),
            transfer_joint: 0,
            load_addr: transfer_addr(allocator, vertex.skin.joints[0], current).map_err(err)?,
            transfer_store_addr: DONT_CARE_ADDR,
            attributes: attributes(vertex, inverse_scale),
        });
        table.main_vertex_count += 1;
    }

    for (i, vertex) in vertices.iter().enumerate() {
        if !vertex.skin.is_blended() || first_uses[i] {
            continue;
        }
        let Some(allocation) = blend_allocations[i] else {
            return Err(err(AllocatorError::Missing(vertex.skin)));
        };
        index_mapping[i] = table.vertices.len();
        table.vertices.push(MobyVertex::Regular {
            vertex_index: vertex_index(vertex),
            transfer_joint: 0,
            load_addr: allocation.address,
            transfer_store_addr: DONT_CARE_ADDR,
            attributes: attributes(vertex, inverse_scale),
        });
        table.main_vertex_count += 1;
    }

    Ok(PackedVertices {
        table,
        index_mapping,
    })
}

fn transfer_addr(
    allocator: &mut MatrixSlotAllocator,
    joint: i8,
    current: i32,
) -> Result<u8, AllocatorError> {
    let skin = SkinAttributes::single(joint);
    allocator
        .get_allocation(skin, current)?
        .map(|allocation| allocation.address)
        .ok_or(AllocatorError::Missing(skin))
}

#[inline]
fn vertex_index(vertex: &Vertex) -> u16 {
    vertex.vertex_index & VERTEX_INDEX_MASK
}

fn attributes(vertex: &Vertex, inverse_scale: f32) -> CommonAttributes {
    let (normal_azimuth, normal_elevation) = pack_normal(vertex.normal);
    CommonAttributes {
        normal_azimuth,
        normal_elevation,
        position: pack_position(vertex.pos, inverse_scale),
    }
}
