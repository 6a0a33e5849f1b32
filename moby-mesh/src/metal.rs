//! Chrome and glass pass
//!
//! Metal submeshes are drawn after the regular ones with an environment
//! map. They have no texture coordinate unpack and no skinning: the VIF list
//! holds only the index unpack and, when present, a texture unpack whose
//! primitives bind [`TextureRef::Chrome`] or [`TextureRef::Glass`]. Their
//! vertex table is a plain vertex array.
//!
//! [`TextureRef::Chrome`]: crate::model::TextureRef::Chrome
//! [`TextureRef::Glass`]: crate::model::TextureRef::Glass

use ps2_vif::{filter_unpacks, read_command_list};

use crate::encode::EncodedClass;
use crate::error::{ClassError, DecodeError, SubmeshError};
use crate::formats::{
    MetalVertexTable, SubmeshEntry, pad, read_shared_unpacks, slice_at, write_shared_unpacks,
};
use crate::model::{IndexStream, TEXTURE_CHROME, TEXTURE_GLASS};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetalSubMesh {
    pub stream: IndexStream,
    pub vertex_table: MetalVertexTable,
}

/// Encode metal submeshes whose data will be placed at class offset
/// `base_offset`
///
/// Metal submeshes don't appear in the GIF usage table.
pub fn encode_metal(
    submeshes: &[MetalSubMesh],
    base_offset: usize,
) -> Result<EncodedClass, ClassError> {
    let mut class = EncodedClass {
        data_offset: base_offset,
        ..Default::default()
    };
    let data = &mut class.data;

    for (smi, submesh) in submeshes.iter().enumerate() {
        let overflow = |field, value| ClassError::Overflow {
            submesh: smi,
            field,
            value,
        };
        let mut entry = SubmeshEntry::default();

        pad(data, 0x10);
        let list_start = data.len();
        entry.vif_list_offset = u32::try_from(base_offset + list_start)
            .map_err(|_| overflow("VIF list offset", base_offset + list_start))?;
        let shared = write_shared_unpacks(data, &submesh.stream, base_offset, smi)?;
        entry.vif_list_texture_unpack_offset = shared.texture_unpack_offset;
        pad(data, 0x10);
        let list_size = (data.len() - list_start) / 0x10;
        entry.vif_list_size =
            u16::try_from(list_size).map_err(|_| overflow("VIF list size", list_size))?;

        let vertex_start = data.len();
        entry.vertex_offset = u32::try_from(base_offset + vertex_start)
            .map_err(|_| overflow("vertex table offset", base_offset + vertex_start))?;
        let vertex_count = submesh.vertex_table.write(data);
        let data_size = (data.len() - vertex_start) / 0x10;
        entry.vertex_data_size =
            u8::try_from(data_size).map_err(|_| overflow("vertex data size", data_size))?;
        entry.set_transfer_vertex_count(
            u8::try_from(vertex_count).map_err(|_| overflow("metal vertex count", vertex_count))?,
        );

        class.entries.push(entry);
    }

    tracing::debug!(
        "Encoded {} metal submeshes into {} bytes",
        class.entries.len(),
        class.data.len()
    );
    Ok(class)
}

fn decode_metal_submesh(bytes: &[u8], entry: &SubmeshEntry) -> Result<MetalSubMesh, SubmeshError> {
    let list = slice_at(
        bytes,
        entry.vif_list_offset as usize,
        entry.vif_list_size as usize * 0x10,
        "metal VIF command list",
    )?;
    let unpacks = filter_unpacks(read_command_list(list)?);
    let stream = read_shared_unpacks(&unpacks, |id| id == TEXTURE_CHROME || id == TEXTURE_GLASS)?;
    let vertex_table = MetalVertexTable::read(bytes, entry.vertex_offset as usize)?;
    Ok(MetalSubMesh {
        stream,
        vertex_table,
    })
}

/// Decode `count` metal submeshes whose table sits at `table_offset`
///
/// Unlike the skinned pass there is no state to keep in sync across
/// submeshes, so the first bad submesh fails the call.
pub fn decode_metal(
    bytes: &[u8],
    table_offset: usize,
    count: usize,
) -> Result<Vec<MetalSubMesh>, DecodeError> {
    let out_of_bounds = ClassError::TableOutOfBounds {
        offset: table_offset,
        count,
    };
    let table = count
        .checked_mul(SubmeshEntry::SIZE)
        .and_then(|size| slice_at(bytes, table_offset, size, "metal submesh table").ok())
        .ok_or(out_of_bounds.clone())?;

    table
        .chunks_exact(SubmeshEntry::SIZE)
        .map(|chunk| -> Result<MetalSubMesh, DecodeError> {
            let entry = SubmeshEntry::from_bytes(chunk).ok_or(out_of_bounds.clone())?;
            Ok(decode_metal_submesh(bytes, &entry)?)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::MetalVertex;
    use crate::model::{TexturePrimitive, TextureRef};

    fn chrome_submesh() -> MetalSubMesh {
        MetalSubMesh {
            stream: IndexStream {
                // Eight bytes so no padding is added after the header.
                indices: vec![0, 0x82, 3, 2, 1, 1, 1, 0],
                secret_indices: vec![0x81, 0],
                textures: vec![TexturePrimitive::new(TextureRef::Chrome)],
                header_first_byte: 0xff,
            },
            vertex_table: MetalVertexTable {
                vertices: (0..3)
                    .map(|i| MetalVertex {
                        position: [i, -i, 0x100],
                        unknown: [i as u8; 10],
                    })
                    .collect(),
                unknown_4: 1,
                unknown_8: 2,
                unknown_c: 3,
            },
        }
    }

    #[test]
    fn test_metal_round_trip() {
        let submeshes = vec![chrome_submesh(), chrome_submesh()];
        let class = encode_metal(&submeshes, 0x20).unwrap();
        assert!(class.gif_usage.is_empty());
        assert_eq!(class.entries[1].transfer_vertex_count, 3);
        assert!(class.entries[0].check_derived_fields().is_ok());

        let bytes = class.to_class_buffer();
        let decoded = decode_metal(&bytes, 0, 2).unwrap();
        assert_eq!(decoded, submeshes);
    }

    #[test]
    fn test_rejects_regular_texture() {
        let mut submesh = chrome_submesh();
        submesh.stream.textures[0] = TexturePrimitive::new(TextureRef::Index(4));
        let class = encode_metal(&[submesh], 0x10).unwrap();
        let bytes = class.to_class_buffer();
        assert_eq!(
            decode_metal(&bytes, 0, 1),
            Err(DecodeError::Submesh(SubmeshError::TextureId(4)))
        );
    }

    #[test]
    fn test_table_out_of_bounds() {
        assert_eq!(
            decode_metal(&[0; 0x10], 0, 2),
            Err(DecodeError::Class(ClassError::TableOutOfBounds {
                offset: 0,
                count: 2
            }))
        );
    }
}
