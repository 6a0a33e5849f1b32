//! Vertex attribute packing
//!
//! Fixed-point conversions shared by the encoder and decoder:
//! - position: f32 → i16 in units of `scale / 1024`
//! - normal: unit vector → (azimuth, elevation) i8 angles in units of π/128
//! - texture coordinate: f32 → i16 with `32767 / 8` units per repeat

use std::f32::consts::PI;

use glam::{Vec2, Vec3};

use crate::model::TexCoord;

// ============================================================================
// Constants
// ============================================================================

/// Position units per console unit at scale 1
pub const POSITION_UNITS: f32 = 1024.0;

/// Angle units per radian for packed normals
pub const NORMAL_ANGLE_UNITS: f32 = 128.0 / PI;

/// Elevation of a normal pointing straight up
pub const NORMAL_ELEVATION_UP: i8 = 0x40;

/// Texture coordinate units per texture repeat
pub const TEX_COORD_UNITS: f32 = i16::MAX as f32 / 8.0;

// ============================================================================
// Positions
// ============================================================================

/// Pack a position. `inverse_scale` is `1024 / scale`.
#[inline]
pub fn pack_position(pos: Vec3, inverse_scale: f32) -> [i16; 3] {
    let p = pos * inverse_scale;
    [round_to_i16(p.x), round_to_i16(p.y), round_to_i16(p.z)]
}

#[inline]
pub fn unpack_position(packed: [i16; 3], scale: f32) -> Vec3 {
    let factor = scale / POSITION_UNITS;
    Vec3::new(
        packed[0] as f32 * factor,
        packed[1] as f32 * factor,
        packed[2] as f32 * factor,
    )
}

#[inline]
fn round_to_i16(value: f32) -> i16 {
    value.round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

// ============================================================================
// Normals
// ============================================================================

/// Pack a normal as (azimuth, elevation)
///
/// A normal pointing straight up has no meaningful azimuth; it gets biased by
/// half a turn so rebuilt files match the reference exporter byte for byte.
pub fn pack_normal(normal: Vec3) -> (i8, i8) {
    let n = normal.normalize_or_zero();
    let azimuth = n.x.atan2(n.y);
    let elevation = n.z.clamp(-1.0, 1.0).asin();
    // An azimuth of exactly π rounds to 128, which wraps to -128.
    let mut azimuth = (azimuth * NORMAL_ANGLE_UNITS).round() as i32 as i8;
    let elevation = (elevation * NORMAL_ANGLE_UNITS).round() as i32 as i8;
    if elevation == NORMAL_ELEVATION_UP {
        azimuth = azimuth.wrapping_add(i8::MIN);
    }
    (azimuth, elevation)
}

pub fn unpack_normal(azimuth: i8, elevation: i8) -> Vec3 {
    let azimuth = azimuth as f32 / NORMAL_ANGLE_UNITS;
    let elevation = elevation as f32 / NORMAL_ANGLE_UNITS;
    let (sin_azimuth, cos_azimuth) = azimuth.sin_cos();
    let (sin_elevation, cos_elevation) = elevation.sin_cos();
    Vec3::new(
        sin_azimuth * cos_elevation,
        cos_azimuth * cos_elevation,
        sin_elevation,
    )
}

// ============================================================================
// Texture Coordinates
// ============================================================================

/// Pack a texture coordinate. T is flipped; both axes truncate.
#[inline]
pub fn pack_tex_coord(uv: Vec2) -> TexCoord {
    TexCoord {
        s: (uv.x * TEX_COORD_UNITS) as i16,
        t: (-uv.y * TEX_COORD_UNITS) as i16,
    }
}

/// Unpack a texture coordinate, wrapped into `[0, 1)`
#[inline]
pub fn unpack_tex_coord(st: TexCoord) -> Vec2 {
    let s = st.s as f32 / TEX_COORD_UNITS;
    let t = -(st.t as f32) / TEX_COORD_UNITS;
    Vec2::new(wrap_unit(s), wrap_unit(t))
}

#[inline]
fn wrap_unit(value: f32) -> f32 {
    let wrapped = value.rem_euclid(1.0);
    // rem_euclid can round up to exactly 1.0 for tiny negative inputs.
    if wrapped >= 1.0 { 0.0 } else { wrapped }
}
