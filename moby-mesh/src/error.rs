//! Error types
//!
//! Two severities. A [`SubmeshError`] means the input for one submesh is
//! malformed; the decoder empties that submesh and carries on. A
//! [`ClassError`] means the allocation bookkeeping is inconsistent, and the
//! whole class is rejected.

use std::fmt;

use ps2_vif::VifError;

use crate::model::SkinAttributes;

/// Malformed input confined to a single submesh
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmeshError {
    /// A read ran past the end of the buffer
    #[error("{what} at {offset:#x} runs past the end of the buffer")]
    Truncated { what: &'static str, offset: usize },

    /// The VIF command list could not be split into packets
    #[error(transparent)]
    Vif(#[from] VifError),

    /// An UNPACK is missing or has the wrong element format
    #[error("expected {expected} unpack, found {found}")]
    UnexpectedUnpack {
        expected: &'static str,
        found: &'static str,
    },

    /// The index unpack header's last byte must be zero
    #[error("index unpack header has non-zero padding")]
    IndexHeaderPadding,

    /// The texture unpack is not made of whole primitives
    #[error("texture unpack is {0:#x} bytes, not a multiple of 0x40")]
    TextureUnpackSize(usize),

    /// A texture primitive names a texture this kind of submesh cannot use
    #[error("texture id {0} is not valid here")]
    TextureId(i32),

    /// A redundant table entry field disagrees with the transfer vertex count
    #[error("submesh table entry field {field} is {found}, expected {expected}")]
    EntryField {
        field: &'static str,
        found: u32,
        expected: u32,
    },

    /// The vertex array starts after the end of the vertex data
    #[error("vertex table offset {offset:#x} exceeds vertex data size {size:#x}")]
    VertexTableOffset { offset: usize, size: usize },

    /// The vertex data size leaves room for an impossible number of
    /// trailing vertices
    #[error("vertex table has {0} trailing vertices")]
    TrailingVertices(i64),

    /// Index byte 0x80 would push vertex -1
    #[error("reserved index 0x80 at position {position}")]
    ReservedIndex { position: usize },

    /// An index refers past the submesh's vertices
    #[error("index {index:#x} at position {position} is out of range ({vertex_count} vertices)")]
    IndexOutOfRange {
        index: u8,
        position: usize,
        vertex_count: usize,
    },

    /// A zero index with no secret index left to consume
    #[error("secret index list exhausted at position {position}")]
    MissingSecretIndex { position: usize },

    /// A material boundary with no texture primitive left to bind
    #[error("texture list exhausted at position {position}")]
    MissingTexture { position: usize },

    /// The ST unpack does not cover every vertex
    #[error("{found} texture coordinates for {expected} vertices")]
    TexCoordCount { found: usize, expected: usize },

    /// A duplicate vertex points at an intermediate slot nothing wrote
    #[error("duplicate vertex refers to empty intermediate slot {0}")]
    DuplicateVertex(u16),
}

/// Allocator invariant violations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocatorError {
    /// The slot was reused since the allocation was made
    #[error("failed to get address for matrix {skin:?}: generations are {allocation} and {slot}")]
    StaleGeneration {
        skin: SkinAttributes,
        allocation: i32,
        slot: i32,
    },

    /// A blended matrix is still referenced after its liveness ended
    #[error("bad liveness analysis for {skin:?} (current submesh is {current}, max is {liveness})")]
    ExpiredLiveness {
        skin: SkinAttributes,
        current: i32,
        liveness: i32,
    },

    /// A vertex needs a matrix that was never allocated
    #[error("no VU0 address allocated for matrix {0:?}")]
    Missing(SkinAttributes),
}

/// Inconsistencies found while replaying the VU0 matrix store
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SkinError {
    #[error("unaligned VU0 matrix {op} address {addr:#x}")]
    Unaligned { op: &'static str, addr: u8 },

    #[error("matrix load from uninitialised VU0 address {0:#x}")]
    Uninitialised(u8),

    #[error("loading from and storing to the same VU0 address ({0:#x}) in the same vertex")]
    LoadStoreConflict(u8),

    #[error("input to a {0}-way matrix blend has already been blended")]
    AlreadyBlended(u8),
}

/// Unrecoverable problem affecting the whole class
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClassError {
    /// The transfer region would swallow the blend region
    #[error("too many joints referenced per submesh ({joints}), try simplifying the joint weights")]
    TooManyJoints { joints: usize },

    #[error("submesh {submesh}: {source}")]
    Allocator {
        submesh: usize,
        source: AllocatorError,
    },

    #[error("submesh {submesh}: {source}")]
    Skin { submesh: usize, source: SkinError },

    /// Skin attributes with a count outside 1..=3
    #[error("submesh {submesh}, vertex {vertex}: invalid skin attributes {skin:?}")]
    InvalidSkin {
        submesh: usize,
        vertex: usize,
        skin: SkinAttributes,
    },

    /// A count or size that does not fit its on-disk field
    #[error("submesh {submesh}: {field} ({value}) does not fit in its on-disk field")]
    Overflow {
        submesh: usize,
        field: &'static str,
        value: usize,
    },

    /// The submesh's index stream or texture list is inconsistent
    #[error("submesh {submesh}: {reason}")]
    BadSubmesh {
        submesh: usize,
        reason: &'static str,
    },

    /// The submesh table itself cannot be read
    #[error("submesh table at {offset:#x} with {count} entries runs past the end of the buffer")]
    TableOutOfBounds { offset: usize, count: usize },
}

/// Failure while decoding one submesh
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error(transparent)]
    Submesh(#[from] SubmeshError),
    #[error(transparent)]
    Class(#[from] ClassError),
}

/// A recoverable failure reported alongside the decoded class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub submesh: usize,
    pub error: SubmeshError,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "submesh {} has bad data: {}", self.submesh, self.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_error_messages_carry_submesh() {
        let err = ClassError::Allocator {
            submesh: 3,
            source: AllocatorError::Missing(SkinAttributes::single(2)),
        };
        assert!(err.to_string().starts_with("submesh 3: no VU0 address"));
    }

    #[test]
    fn test_diagnostic_display() {
        let diagnostic = Diagnostic {
            submesh: 1,
            error: SubmeshError::ReservedIndex { position: 5 },
        };
        assert_eq!(
            diagnostic.to_string(),
            "submesh 1 has bad data: reserved index 0x80 at position 5"
        );
    }

    #[test]
    fn test_vif_error_converts() {
        let err: SubmeshError = VifError::TruncatedCode { offset: 8 }.into();
        assert_eq!(err.to_string(), "truncated vif code at offset 0x8");
    }
}
