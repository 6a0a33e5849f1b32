//! Skinned moby submesh codec
//!
//! Converts between skinned triangle meshes and the packed submesh layout
//! the PS2 moby renderer consumes. The renderer never sees joint indices:
//! it loads joint matrices into VU0 memory and blends them by address, so the
//! codec has to reproduce the exact VU0 slot allocation the original mesh
//! compiler made, and the decoder has to replay it to recover the skins.
//!
//! # Modules
//!
//! - [`model`] - Vertices, skin attributes, submeshes
//! - [`packing`] - Fixed-point position/normal/texture coordinate packing
//! - [`formats`] - On-disk records: submesh table, VIF lists, vertex tables
//! - [`skinning`] - VU0 slot allocator, liveness analysis, transfer scheduler
//! - [`encode`] / [`decode`] - The class-level codec entry points
//! - [`strip`] - Index stream walking and the submesh builder
//! - [`metal`] - The chrome/glass pass
//! - [`config`] - Codec parameters with TOML load/save
//!
//! # Usage
//!
//! ```
//! use glam::Vec3;
//! use moby_mesh::{FaceGroup, MobyFormat, SkinAttributes, SkinnedMesh, TextureRef, Vertex};
//!
//! let skin = SkinAttributes::single(0);
//! let mesh = SkinnedMesh {
//!     vertices: vec![
//!         Vertex::new(Vec3::ZERO, Vec3::Z, skin),
//!         Vertex::new(Vec3::X, Vec3::Z, skin),
//!         Vertex::new(Vec3::Y, Vec3::Z, skin),
//!     ],
//!     groups: vec![FaceGroup {
//!         texture: TextureRef::Index(0),
//!         faces: vec![[0, 1, 2]],
//!     }],
//! };
//!
//! let submeshes = moby_mesh::build_submeshes(&mesh);
//! let encoded = moby_mesh::encode(&submeshes, 1.0, MobyFormat::Rac2).unwrap();
//! let class = encoded.to_class_buffer();
//! let decoded = moby_mesh::decode(&class, 0, encoded.entries.len(), 1.0, 1, MobyFormat::Rac2).unwrap();
//! assert_eq!(decoded.submeshes[0].faces.len(), 1);
//! ```

pub mod config;
pub mod decode;
pub mod encode;
pub mod error;
pub mod formats;
pub mod metal;
pub mod model;
pub mod packing;
pub mod skinning;
pub mod strip;

pub use config::{CodecConfig, ConfigError, MobyFormat};
pub use decode::{DecodeContext, DecodedClass, decode};
pub use encode::{EncodeContext, EncodedClass, encode};
pub use error::{AllocatorError, ClassError, DecodeError, Diagnostic, SkinError, SubmeshError};
pub use metal::{MetalSubMesh, decode_metal, encode_metal};
pub use model::{
    Face, FaceGroup, IndexStream, SkinAttributes, SkinnedMesh, SubMesh, TexCoord,
    TexturePrimitive, TextureRef, Vertex,
};
pub use strip::build_submeshes;

// ============================================================================
// VU0 / VU1 Memory
// ============================================================================

/// Number of quadwords in the VU0 matrix store the codec manages
pub const VU0_MATRIX_STORE_SIZE: usize = 0xf4;

/// Store address meaning "don't keep the result"
pub const DONT_CARE_ADDR: u8 = 0xf4;

/// Slots in the simulated VU0 store (`addr / 4`), sentinel included
pub const BLEND_BUFFER_SLOTS: usize = 0x40;

/// Maximum number of blended matrices live at once
pub const MAX_LIVE_BLEND_SLOTS: usize = VU0_MATRIX_STORE_SIZE / 4;

/// Size of the VU1 intermediate vertex buffer
pub const INTERMEDIATE_BUFFER_SIZE: usize = 0x200;

// ============================================================================
// Submesh Limits
// ============================================================================

/// Texture primitives per submesh
pub const MAX_SUBMESH_TEXTURE_COUNT: usize = 4;

/// Vertices stored in one submesh's vertex table
pub const MAX_SUBMESH_STORED_VERTEX_COUNT: usize = 97;

/// Vertices one submesh may index, duplicates included
pub const MAX_SUBMESH_TOTAL_VERTEX_COUNT: usize = 0x7f;

/// Index bytes per submesh, terminator included
pub const MAX_SUBMESH_INDEX_COUNT: usize = 196;
