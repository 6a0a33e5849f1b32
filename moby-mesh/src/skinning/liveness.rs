//! Liveness analysis of blended matrices
//!
//! Every distinct skin gets a [`MatrixLiveness`] describing how many
//! vertices across the class use it and the last submesh that needs it. The
//! allocator uses the latter to decide when a blend slot may be reused; the
//! vertex packer uses the population count to spot skins used only once.

use std::collections::BTreeSet;

use crate::model::{SkinAttributes, Vertex};

/// Position of a vertex within the class
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VertexLocation {
    pub submesh: usize,
    pub vertex: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatrixLiveness {
    /// Vertices sharing this skin. Only set on the first of them, zero on
    /// the rest.
    pub population_count: usize,
    /// Last submesh using this skin, -1 if unset
    pub last_submesh: i32,
    /// First vertex (by submesh, then vertex) using this skin
    pub first_vertex: Option<VertexLocation>,
}

impl Default for MatrixLiveness {
    fn default() -> Self {
        Self {
            population_count: 0,
            last_submesh: -1,
            first_vertex: None,
        }
    }
}

/// Compute liveness for every vertex of every submesh
///
/// The result is indexed the same way as the input.
pub fn compute_matrix_liveness(submeshes: &[Vec<Vertex>]) -> Vec<Vec<MatrixLiveness>> {
    let mut liveness: Vec<Vec<MatrixLiveness>> = submeshes
        .iter()
        .map(|vertices| vec![MatrixLiveness::default(); vertices.len()])
        .collect();

    let mut mapping: Vec<(SkinAttributes, VertexLocation)> = submeshes
        .iter()
        .enumerate()
        .flat_map(|(submesh, vertices)| {
            vertices
                .iter()
                .enumerate()
                .map(move |(vertex, v)| (v.skin, VertexLocation { submesh, vertex }))
        })
        .collect();
    // Stable, so within a run locations stay in class order.
    mapping.sort_by(|a, b| a.0.cmp(&b.0));

    for run in mapping.chunk_by(|a, b| a.0 == b.0) {
        let first = run.iter().map(|(_, location)| *location).min();
        let last_submesh = run.iter().map(|(_, location)| location.submesh).max();
        let Some((first, last_submesh)) = first.zip(last_submesh) else {
            continue;
        };

        liveness[first.submesh][first.vertex].population_count = run.len();
        for (_, location) in run {
            let entry = &mut liveness[location.submesh][location.vertex];
            entry.last_submesh = last_submesh as i32;
            entry.first_vertex = Some(first);
        }
    }

    liveness
}

/// Largest number of distinct joints a single submesh references
///
/// Each of them needs a transfer slot, so this sizes the transfer region.
pub fn max_joints_per_submesh(submeshes: &[Vec<Vertex>]) -> usize {
    submeshes
        .iter()
        .map(|vertices| {
            vertices
                .iter()
                .flat_map(|vertex| vertex.skin.active_joints().iter().copied())
                .collect::<BTreeSet<i8>>()
                .len()
        })
        .max()
        .unwrap_or(0)
}
