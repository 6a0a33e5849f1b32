//! Abstract submesh data shapes
//!
//! These are the types callers build and inspect. Nothing here knows about
//! the packed layout; see [`crate::formats`] for that.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};

// ============================================================================
// Skin Attributes
// ============================================================================

/// Up to three bone influences of a vertex
///
/// Only the first `count` joint/weight pairs are meaningful. Equality,
/// ordering and hashing ignore the inactive entries, so the type can be used
/// directly as a map key. Ordering is by count, then joints, then weights.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SkinAttributes {
    pub count: u8,
    pub joints: [i8; 3],
    pub weights: [u8; 3],
}

impl Default for SkinAttributes {
    fn default() -> Self {
        Self {
            count: 1,
            joints: [-1, 0, 0],
            weights: [255, 0, 0],
        }
    }
}

impl SkinAttributes {
    /// A vertex bound rigidly to one joint
    pub const fn single(joint: i8) -> Self {
        Self {
            count: 1,
            joints: [joint, 0, 0],
            weights: [255, 0, 0],
        }
    }

    pub const fn two_way(joints: [i8; 2], weights: [u8; 2]) -> Self {
        Self {
            count: 2,
            joints: [joints[0], joints[1], 0],
            weights: [weights[0], weights[1], 0],
        }
    }

    pub const fn three_way(joints: [i8; 3], weights: [u8; 3]) -> Self {
        Self {
            count: 3,
            joints,
            weights,
        }
    }

    /// Whether this vertex needs a blended matrix
    #[inline]
    pub fn is_blended(&self) -> bool {
        self.count > 1
    }

    /// Joints of the active influences
    pub fn active_joints(&self) -> &[i8] {
        &self.joints[..self.active()]
    }

    #[inline]
    fn active(&self) -> usize {
        (self.count as usize).min(3)
    }

    fn key(&self) -> (u8, [i8; 3], [u8; 3]) {
        let mut joints = [0; 3];
        let mut weights = [0; 3];
        let active = self.active();
        joints[..active].copy_from_slice(&self.joints[..active]);
        weights[..active].copy_from_slice(&self.weights[..active]);
        (self.count, joints, weights)
    }

    /// Canonical form used by the encoder
    ///
    /// Placeholder joints (-1) become joint 0, a rigid binding always has
    /// weight 255 and inactive entries are zeroed.
    pub fn canonical(&self) -> Self {
        let (count, mut joints, mut weights) = self.key();
        for joint in joints.iter_mut().take(self.active()) {
            if *joint == -1 {
                *joint = 0;
            }
        }
        if count == 1 {
            weights[0] = 255;
        }
        Self {
            count,
            joints,
            weights,
        }
    }
}

impl PartialEq for SkinAttributes {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for SkinAttributes {}

impl Hash for SkinAttributes {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl PartialOrd for SkinAttributes {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SkinAttributes {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

// ============================================================================
// Vertices
// ============================================================================

/// A skinned vertex
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vertex {
    /// Position in console units
    pub pos: Vec3,
    /// Unit normal
    pub normal: Vec3,
    pub skin: SkinAttributes,
    /// Texture coordinate in `[0, 1)` as recovered by the decoder
    ///
    /// The encoder writes [`SubMesh::tex_coords`] instead.
    pub tex_coord: Vec2,
    /// Slot in the intermediate vertex buffer. Only preserved so rebuilt
    /// files keep the original ordering.
    pub vertex_index: u16,
}

impl Default for Vertex {
    fn default() -> Self {
        Self {
            pos: Vec3::ZERO,
            normal: Vec3::Z,
            skin: SkinAttributes::default(),
            tex_coord: Vec2::ZERO,
            vertex_index: 0,
        }
    }
}

impl Vertex {
    pub fn new(pos: Vec3, normal: Vec3, skin: SkinAttributes) -> Self {
        Self {
            pos,
            normal,
            skin,
            ..Default::default()
        }
    }
}

/// Fixed-point texture coordinate as stored in the ST unpack
///
/// One texture repeat is `32767 / 8` units, so the range covers eight tiles
/// each way.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TexCoord {
    pub s: i16,
    pub t: i16,
}

impl TexCoord {
    pub const fn new(s: i16, t: i16) -> Self {
        Self { s, t }
    }
}

// ============================================================================
// Textures
// ============================================================================

/// Raw texture id meaning "untextured"
pub const TEXTURE_NONE: i32 = -1;
/// Raw texture id of the chrome environment map
pub const TEXTURE_CHROME: i32 = -2;
/// Raw texture id of the glass environment map
pub const TEXTURE_GLASS: i32 = -3;

/// What a texture primitive binds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextureRef {
    #[default]
    None,
    Chrome,
    Glass,
    Index(u32),
}

impl TextureRef {
    /// Interpret a raw id. Ids below the glass sentinel are invalid.
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            TEXTURE_NONE => Some(Self::None),
            TEXTURE_CHROME => Some(Self::Chrome),
            TEXTURE_GLASS => Some(Self::Glass),
            id if id >= 0 => Some(Self::Index(id as u32)),
            _ => None,
        }
    }

    pub fn to_raw(self) -> i32 {
        match self {
            Self::None => TEXTURE_NONE,
            Self::Chrome => TEXTURE_CHROME,
            Self::Glass => TEXTURE_GLASS,
            Self::Index(id) => id as i32,
        }
    }
}

/// One GS register write of a texture primitive (A+D format)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GsAdData {
    pub data_lo: i32,
    pub data_hi: i32,
    pub address: u8,
    pub pad_9: u8,
    pub pad_a: u16,
    /// Carries a secret index in some records, see [`IndexStream`]
    pub super_secret_index: u32,
}

/// A 64-byte texture primitive block: four GS register writes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TexturePrimitive {
    pub d1_xyzf2: GsAdData,
    pub d2_clamp: GsAdData,
    pub d3_tex0: GsAdData,
    pub d4_xyzf2: GsAdData,
}

impl TexturePrimitive {
    /// A primitive with the register values the reference exporter writes
    pub fn new(texture: TextureRef) -> Self {
        Self {
            d1_xyzf2: GsAdData {
                data_lo: 0xff92,
                data_hi: 0x4,
                address: 0x4,
                pad_a: 0x41a0,
                ..Default::default()
            },
            d2_clamp: GsAdData {
                address: 0x08,
                ..Default::default()
            },
            d3_tex0: GsAdData {
                data_lo: texture.to_raw(),
                address: 0x06,
                ..Default::default()
            },
            d4_xyzf2: GsAdData {
                address: 0x34,
                ..Default::default()
            },
        }
    }

    /// Raw texture id carried in the TEX0 write
    #[inline]
    pub fn texture_id(&self) -> i32 {
        self.d3_tex0.data_lo
    }

    pub fn texture(&self) -> Option<TextureRef> {
        TextureRef::from_raw(self.texture_id())
    }
}

// ============================================================================
// Submeshes
// ============================================================================

/// The index byte stream of a submesh and the material boundaries woven
/// into it
///
/// Index values `1..0x80` draw with the given one-based vertex, values
/// `0x81..` push a vertex without drawing and `0` consumes the next secret
/// index: zero ends the submesh, anything else starts the next texture run
/// at that (one-based) vertex. `secret_indices[0]` lives in the index header,
/// the rest ride inside the texture unpack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStream {
    pub indices: Vec<u8>,
    pub secret_indices: Vec<u8>,
    pub textures: Vec<TexturePrimitive>,
    /// First byte of the index unpack header
    pub header_first_byte: u8,
}

impl Default for IndexStream {
    fn default() -> Self {
        Self {
            indices: Vec::new(),
            secret_indices: Vec::new(),
            textures: Vec::new(),
            header_first_byte: 0xff,
        }
    }
}

/// A triangle recovered from the index stream, indexing into the submesh's
/// vertices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Face {
    pub vertices: [u16; 3],
    pub texture: TextureRef,
}

/// One skinned submesh
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubMesh {
    /// Stored vertices, then one copy per duplicate vertex
    ///
    /// The copies carry the geometry of the slot they reuse and are never
    /// written back out: the encoder only packs the stored vertices.
    pub vertices: Vec<Vertex>,
    /// One entry per vertex, copies included
    pub tex_coords: Vec<TexCoord>,
    pub stream: IndexStream,
    /// Intermediate-buffer slots of vertices reused from earlier submeshes
    pub duplicate_vertices: Vec<u16>,
    /// Trailing vertex-table header field (compact formats only)
    pub unknown_e: u16,
    /// Opaque block after the vertices (RAC1 only)
    pub unknown_e_data: Vec<u8>,
    /// Triangles rebuilt by the decoder. The encoder ignores this.
    pub faces: Vec<Face>,
}

impl SubMesh {
    /// Vertices the index stream can refer to, duplicates included
    pub fn total_vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Vertices packed into the vertex table
    pub fn stored_vertices(&self) -> &[Vertex] {
        let stored = self.vertices.len().saturating_sub(self.duplicate_vertices.len());
        &self.vertices[..stored]
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty() && self.stream.indices.is_empty()
    }
}

/// A triangle mesh grouped by material, the input of
/// [`crate::strip::build_submeshes`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SkinnedMesh {
    pub vertices: Vec<Vertex>,
    pub groups: Vec<FaceGroup>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FaceGroup {
    pub texture: TextureRef,
    pub faces: Vec<[u32; 3]>,
}
