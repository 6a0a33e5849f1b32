//! VU0 matrix management for the encoder
//!
//! The renderer skins each vertex with a matrix read from VU0 memory. Joint
//! matrices are copied there from the scratchpad ("transfers"), 2-way and
//! 3-way blends of them are computed by blend vertices and may be stored for
//! later vertices to load. The encoder decides all of these addresses:
//!
//! 1. [`compute_matrix_liveness`] finds the last submesh each skin is used in
//! 2. per submesh, [`schedule_matrix_transfers`] allocates slots through the
//!    [`MatrixSlotAllocator`] and picks where each transfer happens
//! 3. [`pack_vertices`] emits the vertex records in blend-first order
//!
//! The decoder doesn't need any of this; it replays the stores and loads the
//! packed records describe.

mod allocator;
mod liveness;
mod pack;
mod schedule;

pub use allocator::{BlendAllocation, MatrixAllocation, MatrixSlot, MatrixSlotAllocator};
pub use liveness::{MatrixLiveness, VertexLocation, compute_matrix_liveness, max_joints_per_submesh};
pub use pack::{PackedVertices, pack_vertices};
pub use schedule::{MatrixTransferSchedule, schedule_matrix_transfers};
