//! End-to-end encoder/decoder scenarios
//!
//! Each test encodes a small class, reads the vertex tables back out of the
//! class buffer to check the VU0 addresses the encoder picked, then decodes
//! the class and checks the skins come back.

use glam::Vec3;
use moby_mesh::formats::{MatrixTransfer, MobyVertex, SubmeshEntry, VertexTable};
use moby_mesh::packing::unpack_tex_coord;
use moby_mesh::strip::recover_faces;
use moby_mesh::{
    DONT_CARE_ADDR, Diagnostic, IndexStream, MobyFormat, SkinAttributes, SubMesh, SubmeshError,
    TexCoord, TextureRef, Vertex, decode, encode,
};

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn submesh(skins: &[SkinAttributes]) -> SubMesh {
    let mut indices: Vec<u8> = (1..=skins.len() as u8).collect();
    indices.extend_from_slice(&[1, 1, 1, 0]);
    SubMesh {
        vertices: skins
            .iter()
            .enumerate()
            .map(|(i, &skin)| Vertex {
                pos: Vec3::new(i as f32 * 0.5, 1.0, -2.0),
                normal: Vec3::X,
                skin,
                vertex_index: i as u16,
                ..Default::default()
            })
            .collect(),
        tex_coords: vec![TexCoord::default(); skins.len()],
        stream: IndexStream {
            indices,
            secret_indices: vec![0],
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Append a vertex that reuses intermediate buffer `slot` with its own ST
fn reuse_slot(submesh: &mut SubMesh, slot: u16, st: TexCoord) {
    submesh.vertices.push(Vertex {
        vertex_index: slot,
        ..Default::default()
    });
    submesh.tex_coords.push(st);
    submesh.duplicate_vertices.push(slot);
}

fn vertex_tables(bytes: &[u8], entries: &[SubmeshEntry], format: MobyFormat) -> Vec<VertexTable> {
    entries
        .iter()
        .map(|entry| VertexTable::read(bytes, entry, format).unwrap())
        .collect()
}

fn decoded_skins(submesh: &SubMesh) -> Vec<(u16, SkinAttributes)> {
    let mut skins: Vec<_> = submesh
        .vertices
        .iter()
        .map(|vertex| (vertex.vertex_index, vertex.skin))
        .collect();
    skins.sort();
    skins
}

#[test]
fn test_rigid_submesh_uses_one_transfer() {
    init_logging();
    let skin = SkinAttributes::single(3);
    let class = encode(&[submesh(&[skin; 4])], 1.0, MobyFormat::Rac2).unwrap();
    let bytes = class.to_class_buffer();

    let table = &vertex_tables(&bytes, &class.entries, MobyFormat::Rac2)[0];
    assert_eq!(table.preloop_matrix_transfers, vec![MatrixTransfer::new(3, 0)]);
    assert_eq!(table.two_way_blend_vertex_count, 0);
    assert_eq!(table.three_way_blend_vertex_count, 0);
    assert_eq!(table.main_vertex_count, 4);
    assert!(table.vertices.iter().all(|v| v.regular_load_addr() == Some(0)));

    let decoded = decode(&bytes, 0, 1, 1.0, 4, MobyFormat::Rac2).unwrap();
    assert!(decoded.submeshes[0].vertices.iter().all(|v| v.skin == skin));
    assert_eq!(decoded.submeshes[0].vertices[1].pos, Vec3::new(0.5, 1.0, -2.0));
}

#[test]
fn test_shared_blend_is_stored_once() {
    init_logging();
    let blend = SkinAttributes::two_way([2, 5], [180, 75]);
    let class = encode(&[submesh(&[blend, blend])], 1.0, MobyFormat::Rac2).unwrap();
    let bytes = class.to_class_buffer();

    let table = &vertex_tables(&bytes, &class.entries, MobyFormat::Rac2)[0];
    assert_eq!(table.two_way_blend_vertex_count, 1);
    assert_eq!(table.main_vertex_count, 1);
    let MobyVertex::TwoWay {
        blend_store_addr,
        weights,
        ..
    } = table.vertices[0]
    else {
        panic!("expected a two-way vertex first, got {:?}", table.vertices[0]);
    };
    assert_ne!(blend_store_addr, DONT_CARE_ADDR);
    assert_eq!(weights, [180, 75]);
    assert_eq!(table.vertices[1].regular_load_addr(), Some(blend_store_addr));

    let decoded = decode(&bytes, 0, 1, 1.0, 6, MobyFormat::Rac2).unwrap();
    assert_eq!(decoded_skins(&decoded.submeshes[0]), vec![(0, blend), (1, blend)]);
}

#[test]
fn test_immediate_terminator_draws_nothing() {
    let stream = IndexStream {
        indices: vec![2, 3, 0],
        secret_indices: vec![0],
        ..Default::default()
    };
    let mut texture = TextureRef::None;
    assert!(recover_faces(&stream, 3, &mut texture).unwrap().is_empty());
}

#[test]
fn test_excess_transfers_go_preloop() {
    init_logging();
    let submeshes = vec![
        submesh(&[SkinAttributes::single(0)]),
        submesh(&[
            SkinAttributes::single(1),
            SkinAttributes::single(2),
            SkinAttributes::single(3),
        ]),
    ];
    let class = encode(&submeshes, 1.0, MobyFormat::Rac2).unwrap();
    let bytes = class.to_class_buffer();

    let tables = vertex_tables(&bytes, &class.entries, MobyFormat::Rac2);
    // The first submesh has one regular vertex, so only one transfer of the
    // second can ride on it.
    let carried = tables[0]
        .vertices
        .iter()
        .filter(|v| {
            matches!(v, MobyVertex::Regular { transfer_store_addr, .. }
                if *transfer_store_addr != DONT_CARE_ADDR)
        })
        .count();
    assert_eq!(carried, 1);
    assert_eq!(tables[1].preloop_matrix_transfers.len(), 2);

    let decoded = decode(&bytes, 0, 2, 1.0, 4, MobyFormat::Rac2).unwrap();
    assert!(decoded.diagnostics.is_empty());
    assert_eq!(
        decoded_skins(&decoded.submeshes[1]),
        vec![
            (0, SkinAttributes::single(1)),
            (1, SkinAttributes::single(2)),
            (2, SkinAttributes::single(3)),
        ]
    );
}

#[test]
fn test_blend_survives_into_later_submesh() {
    init_logging();
    let blend = SkinAttributes::three_way([0, 1, 2], [100, 100, 55]);
    let submeshes = vec![
        submesh(&[blend, SkinAttributes::single(0)]),
        submesh(&[SkinAttributes::single(4), blend]),
    ];
    let class = encode(&submeshes, 2.0, MobyFormat::Rac3Dl).unwrap();
    let bytes = class.to_class_buffer();

    let tables = vertex_tables(&bytes, &class.entries, MobyFormat::Rac3Dl);
    assert_eq!(tables[1].three_way_blend_vertex_count, 0);

    let decoded = decode(&bytes, 0, 2, 2.0, 5, MobyFormat::Rac3Dl).unwrap();
    assert_eq!(
        decoded_skins(&decoded.submeshes[1]),
        vec![(0, SkinAttributes::single(4)), (1, blend)]
    );
    assert_eq!(decoded.submeshes[1].vertices.len(), 2);
}

#[test]
fn test_rac1_keeps_trailing_data() {
    init_logging();
    let mut input = submesh(&[SkinAttributes::single(0); 3]);
    input.unknown_e_data = (0..16).collect();
    let class = encode(std::slice::from_ref(&input), 1.0, MobyFormat::Rac1).unwrap();
    let bytes = class.to_class_buffer();

    let decoded = decode(&bytes, 0, 1, 1.0, 1, MobyFormat::Rac1).unwrap();
    assert!(decoded.diagnostics.is_empty());
    assert_eq!(decoded.submeshes[0].unknown_e_data, input.unknown_e_data);
}

#[test]
fn test_reencode_is_byte_identical() {
    init_logging();
    let two = SkinAttributes::two_way([0, 1], [128, 127]);
    let three = SkinAttributes::three_way([1, 2, 3], [85, 85, 85]);
    let submeshes = vec![
        submesh(&[SkinAttributes::single(2), two, three, two]),
        submesh(&[three, SkinAttributes::single(0), SkinAttributes::single(5)]),
    ];
    let first = encode(&submeshes, 1.0, MobyFormat::Rac2).unwrap().to_class_buffer();
    let decoded = decode(&first, 0, 2, 1.0, 6, MobyFormat::Rac2).unwrap();
    assert!(decoded.diagnostics.is_empty());

    let second = encode(&decoded.submeshes, 1.0, MobyFormat::Rac2).unwrap().to_class_buffer();
    assert_eq!(first, second);
}

#[test]
fn test_duplicate_reuses_earlier_geometry() {
    init_logging();
    let first = submesh(&[SkinAttributes::single(0); 3]);
    let mut second = submesh(&[SkinAttributes::single(1); 3]);
    for vertex in &mut second.vertices {
        vertex.vertex_index += 3;
        vertex.pos.z = 5.0;
    }
    reuse_slot(&mut second, 0, TexCoord::new(7, 9));
    second.stream.indices = vec![1, 2, 4, 1, 1, 1, 0];

    let class = encode(&[first, second], 1.0, MobyFormat::Rac2).unwrap();
    let bytes = class.to_class_buffer();
    let tables = vertex_tables(&bytes, &class.entries, MobyFormat::Rac2);
    assert_eq!(tables[1].vertices.len(), 3);
    assert_eq!(tables[1].duplicate_vertices, vec![0]);

    let decoded = decode(&bytes, 0, 2, 1.0, 2, MobyFormat::Rac2).unwrap();
    assert!(decoded.diagnostics.is_empty());
    let output = &decoded.submeshes[1];
    assert_eq!(output.vertices.len(), 4);
    assert_eq!(output.tex_coords.len(), 4);
    assert_eq!(output.duplicate_vertices, vec![0]);

    let copy = output.vertices[3];
    assert_eq!(copy.pos, Vec3::new(0.0, 1.0, -2.0));
    assert_eq!(copy.skin, SkinAttributes::single(0));
    assert_eq!(copy.vertex_index, 0);
    assert_eq!(output.tex_coords[3], TexCoord::new(7, 9));
    assert_eq!(copy.tex_coord, unpack_tex_coord(TexCoord::new(7, 9)));

    assert_eq!(output.faces.len(), 1);
    let face = output.faces[0].vertices;
    assert!(face.iter().all(|&v| (v as usize) < output.vertices.len()));
    assert!(face.contains(&3));

    let again = encode(&decoded.submeshes, 1.0, MobyFormat::Rac2)
        .unwrap()
        .to_class_buffer();
    assert_eq!(again, bytes);
}

#[test]
fn test_unfilled_duplicate_slot_empties_submesh() {
    init_logging();
    let mut first = submesh(&[SkinAttributes::single(0); 3]);
    reuse_slot(&mut first, 100, TexCoord::new(1, 1));
    let second = submesh(&[SkinAttributes::single(2); 3]);

    let bytes = encode(&[first, second], 1.0, MobyFormat::Rac2)
        .unwrap()
        .to_class_buffer();
    let decoded = decode(&bytes, 0, 2, 1.0, 3, MobyFormat::Rac2).unwrap();
    assert_eq!(
        decoded.diagnostics,
        vec![Diagnostic {
            submesh: 0,
            error: SubmeshError::DuplicateVertex(100),
        }]
    );
    assert_eq!(decoded.submeshes[0], SubMesh::default());
    assert!(
        decoded.submeshes[1]
            .vertices
            .iter()
            .all(|v| v.skin == SkinAttributes::single(2))
    );
    assert_eq!(decoded.submeshes[1].vertices.len(), 3);
}
