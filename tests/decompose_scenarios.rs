mod util;

use mesh_decomp::data::cut_mesh::CutMesh;
use mesh_decomp::data::decomposition_data::{DecompositionData, NodeRequest};
use mesh_decomp::decomposition::PassState;
use mesh_decomp::decomposition::node_hierarchy::NodeHierarchyInterface;
use mesh_decomp::geometry::engine::GeometryEngine;
use mesh_decomp::geometry::level_set::{LevelSet, LevelSetEngine};
use mesh_decomp::mesh_error::MeshDecompError;
use mesh_decomp::mesh_generation::{IntegrationMeshGenerator, MeshGenerationData};
use mesh_decomp::topology::background::{BackgroundMesh, SimplexBackgroundMesh};
use mesh_decomp::topology::cell_type::EntityRank;
use util::{ScriptedEngine, unit_tet, unit_triangle};

#[test]
fn single_cut_edge_of_a_tet() {
    // zero on corners 1 and 3, crosses edge 2 (corners 0-2) at 0.4
    let bg = unit_tet();
    let engine = LevelSetEngine::new(vec![LevelSet::plane(&[1.0, 0.0, 0.0], &[0.4, 1.0, 0.4])]);
    let mut generator = IntegrationMeshGenerator::new(engine);
    let mut cut_mesh = CutMesh::from_background(&bg).unwrap();
    let mut data = DecompositionData::new();
    let mut nh = NodeHierarchyInterface::new();

    nh.build_edges(0, &[0], &cut_mesh, &bg, &generator).unwrap();
    nh.query_intersections(&mut data, &cut_mesh, &bg, &mut generator).unwrap();
    assert_eq!(data.num_requests(), 1);
    let req = data.request(0).unwrap();
    assert_eq!(req.vertex_index, 4);
    assert_eq!(req.parent.rank, EntityRank::Edge);
    assert_eq!(bg.entity_vertices(req.parent.index, req.parent.rank).unwrap(), vec![0, 2]);
    assert!((req.edge_position - 0.4).abs() < 1e-12);
    assert!((req.coords[1] - 0.4).abs() < 1e-12);

    nh.request_vertices(&mut data, &cut_mesh, &mut generator).unwrap();
    assert_eq!(data.request(0).unwrap().node_id, Some(5));
    nh.commit_vertices(&data, &mut cut_mesh, &generator).unwrap();
    nh.classify_cells(&cut_mesh, &generator).unwrap();
    let classified: Vec<_> = nh.classified_cells().cloned().collect();
    assert_eq!(classified.len(), 1);
    assert_eq!(classified[0].key.value, 10002);
    let template = generator.templates().load_template(3, classified[0].key).unwrap();

    nh.rewrite_cells(&cut_mesh, &generator).unwrap();
    nh.commit_cells(&mut cut_mesh, &generator).unwrap();
    nh.finish(&mut data, &mut cut_mesh, &generator).unwrap();

    assert_eq!(cut_mesh.num_vertices(), 5);
    assert_eq!(cut_mesh.num_cells(), template.child_count());
    assert_eq!(cut_mesh.cell_group(0).unwrap().cells, (0..template.child_count()).collect::<Vec<_>>());
    // child 0 overwrote the original slot and uses the new vertex
    assert!(cut_mesh.cell(0).unwrap().vertices.contains(&4));
    assert_eq!(data.num_new_cells(), template.child_count() - 1);
    assert!(generator.engine().is_interface_vertex(0, 1));
    assert!(generator.engine().is_interface_vertex(0, 3));
    assert_eq!(generator.engine().admitted_nodes()[0].id, Some(5));
}

#[test]
fn shared_edge_is_requested_once() {
    // two tets sharing face (0, 1, 2); the shared edge 0-1 is crossed
    let bg = SimplexBackgroundMesh::new(
        3,
        vec![
            vec![0.0, 0.0, 0.0],
            vec![1.0, 0.0, 0.0],
            vec![0.0, 1.0, 0.0],
            vec![0.0, 0.0, 1.0],
            vec![0.0, 0.0, -1.0],
        ],
        vec![vec![0, 1, 2, 3], vec![0, 2, 1, 4]],
    )
    .unwrap();
    let engine = ScriptedEngine::new(1).cross(0, 1, 2, 0.5);
    let mut generator = IntegrationMeshGenerator::new(engine);
    let mut cut_mesh = CutMesh::from_background(&bg).unwrap();
    let mut data = DecompositionData::new();
    let mut nh = NodeHierarchyInterface::new();

    nh.build_edges(0, &[0, 1], &cut_mesh, &bg, &generator).unwrap();
    nh.query_intersections(&mut data, &cut_mesh, &bg, &mut generator).unwrap();
    assert_eq!(data.num_requests(), 1);
    let cuts = nh.cut_cells();
    assert_eq!(cuts.len(), 2);
    assert_eq!(cuts[&0][0].vertex, cuts[&1][0].vertex);

    // the same edge reached again through the neighbour collapses onto it
    let existing = data.request(0).unwrap().clone();
    let again = NodeRequest::new(
        existing.parent,
        existing.parent_id,
        existing.secondary_key,
        existing.owner,
        existing.coords.clone(),
    );
    assert_eq!(data.register_or_get(again).unwrap(), (existing.vertex_index, true));
    assert_eq!(data.num_requests(), 1);

    nh.request_vertices(&mut data, &cut_mesh, &mut generator).unwrap();
    // parametric coordinates recorded in both groups
    let groups: Vec<usize> = data.request(0).unwrap().group_local_coords.iter().map(|(g, _)| *g).collect();
    assert_eq!(groups, vec![0, 1]);
    nh.commit_vertices(&data, &mut cut_mesh, &generator).unwrap();
    nh.classify_cells(&cut_mesh, &generator).unwrap();
    nh.rewrite_cells(&cut_mesh, &generator).unwrap();
    nh.commit_cells(&mut cut_mesh, &generator).unwrap();
    nh.finish(&mut data, &mut cut_mesh, &generator).unwrap();
    assert_eq!(cut_mesh.num_cells(), 4);
    util::assert_unique_vertices(&cut_mesh);
}

#[test]
fn triangle_with_two_cut_edges() {
    let bg = unit_triangle();
    let engine = LevelSetEngine::new(vec![LevelSet::plane(&[0.5, 0.0], &[1.0, 0.0])]);
    let mut generator = IntegrationMeshGenerator::new(engine);
    let mut cut_mesh = CutMesh::from_background(&bg).unwrap();
    let mut data = DecompositionData::new();
    let mut nh = NodeHierarchyInterface::new();

    nh.build_edges(0, &[0], &cut_mesh, &bg, &generator).unwrap();
    nh.query_intersections(&mut data, &cut_mesh, &bg, &mut generator).unwrap();
    nh.request_vertices(&mut data, &cut_mesh, &mut generator).unwrap();
    nh.commit_vertices(&data, &mut cut_mesh, &generator).unwrap();
    nh.classify_cells(&cut_mesh, &generator).unwrap();

    assert_eq!(data.num_requests(), 2);
    let classified: Vec<_> = nh.classified_cells().cloned().collect();
    assert_eq!(classified[0].key.value, 1);
    assert_eq!(classified[0].canonical_nodes.len(), 5);
    assert_eq!(&classified[0].canonical_nodes[..3], &[0, 1, 2]);

    nh.rewrite_cells(&cut_mesh, &generator).unwrap();
    nh.commit_cells(&mut cut_mesh, &generator).unwrap();
    let summary = nh.finish(&mut data, &mut cut_mesh, &generator).unwrap();
    assert_eq!(summary.num_new_cells, 2);
    assert_eq!(cut_mesh.num_cells(), 3);
    assert!((util::total_measure(&cut_mesh) - 0.5).abs() < 1e-12);
    util::assert_one_side(&cut_mesh, &[0.5, 0.0], &[1.0, 0.0]);
}

#[test]
fn endpoint_on_interface_is_flagged_not_requested() {
    // x - y vanishes on corner 0 and crosses edge 1 (corners 1-2)
    let bg = unit_triangle();
    let engine = LevelSetEngine::new(vec![LevelSet::plane(&[0.0, 0.0], &[1.0, -1.0])]);
    let mut generator = IntegrationMeshGenerator::new(engine);
    let mut cut_mesh = CutMesh::from_background(&bg).unwrap();
    let mut data = DecompositionData::new();
    let mut nh = NodeHierarchyInterface::new();

    nh.build_edges(0, &[0], &cut_mesh, &bg, &generator).unwrap();
    nh.query_intersections(&mut data, &cut_mesh, &bg, &mut generator).unwrap();
    assert_eq!(data.num_requests(), 1);
    assert!(generator.engine().is_interface_vertex(0, 0));
    assert!(!generator.engine().is_interface_vertex(0, 1));
    let cuts = &nh.cut_cells()[&0];
    assert_eq!(cuts.len(), 1);
    assert_eq!(cuts[0].ordinal, 1);

    nh.request_vertices(&mut data, &cut_mesh, &mut generator).unwrap();
    nh.commit_vertices(&data, &mut cut_mesh, &generator).unwrap();
    nh.classify_cells(&cut_mesh, &generator).unwrap();
    assert_eq!(nh.classified_cells().next().unwrap().key.value, 11);
    nh.rewrite_cells(&cut_mesh, &generator).unwrap();
    nh.commit_cells(&mut cut_mesh, &generator).unwrap();
    nh.finish(&mut data, &mut cut_mesh, &generator).unwrap();
    assert_eq!(cut_mesh.num_cells(), 2);
    util::assert_one_side(&cut_mesh, &[0.0, 0.0], &[1.0, -1.0]);
}

#[test]
fn five_cut_edges_fail_without_partial_commit() {
    let bg = unit_tet();
    let engine = ScriptedEngine::new(1)
        .cross(0, 1, 2, 0.5)
        .cross(0, 2, 3, 0.5)
        .cross(0, 1, 3, 0.5)
        .cross(0, 1, 4, 0.5)
        .cross(0, 2, 4, 0.5);
    let mut generator = IntegrationMeshGenerator::new(engine);
    let mut cut_mesh = CutMesh::from_background(&bg).unwrap();
    let before = cut_mesh.clone();
    let mut data = DecompositionData::new();
    let mut mesh_gen_data = MeshGenerationData::new(1);

    let err = generator
        .decompose(&mut mesh_gen_data, &mut data, &mut cut_mesh, &bg)
        .unwrap_err();
    assert_eq!(
        err,
        MeshDecompError::TooManyIntersectedEdges {
            cell: 0,
            count: 5,
            max: 4,
            dim: 3,
        }
    );
    assert_eq!(cut_mesh, before);
    assert_eq!(data.num_requests(), 0);
    assert_eq!(data.request_log().count(), 0);
    assert!(generator.engine().admitted_nodes().is_empty());
    assert!(mesh_gen_data.passes.is_empty());
}

#[test]
fn failing_second_interface_keeps_the_first() {
    let bg = unit_tet();
    // the second interface cuts the three edges of face (1, 3, 4), which no
    // template covers; the failure comes after its vertices were committed
    let engine = ScriptedEngine::new(2)
        .cross(0, 1, 2, 0.5)
        .cross(1, 1, 3, 0.5)
        .cross(1, 1, 4, 0.5)
        .cross(1, 3, 4, 0.5);
    let mut generator = IntegrationMeshGenerator::new(engine);
    let mut cut_mesh = CutMesh::from_background(&bg).unwrap();
    let mut data = DecompositionData::new();
    let mut mesh_gen_data = MeshGenerationData::new(2);

    let err = generator
        .decompose(&mut mesh_gen_data, &mut data, &mut cut_mesh, &bg)
        .unwrap_err();
    assert!(matches!(err, MeshDecompError::InvalidCutPattern { .. }));
    assert_eq!(mesh_gen_data.passes.len(), 1);
    assert_eq!(mesh_gen_data.passes[0].decomp_id, 102);
    assert_eq!(cut_mesh.num_vertices(), 5);
    assert_eq!(cut_mesh.num_cells(), 2);
    assert_eq!(data.request_log().count(), 1);
    assert_eq!(generator.engine().admitted_nodes().len(), 1);
}

#[test]
fn phases_out_of_order_are_rejected() {
    let bg = unit_tet();
    let mut generator = IntegrationMeshGenerator::new(ScriptedEngine::new(1));
    let mut cut_mesh = CutMesh::from_background(&bg).unwrap();
    let mut data = DecompositionData::new();
    let mut nh = NodeHierarchyInterface::new();

    assert!(matches!(
        nh.query_intersections(&mut data, &cut_mesh, &bg, &mut generator),
        Err(MeshDecompError::StateTransition { expected: "EDGES_BUILT", found: "IDLE" })
    ));
    nh.build_edges(0, &[0], &cut_mesh, &bg, &generator).unwrap();
    assert!(matches!(
        nh.commit_cells(&mut cut_mesh, &generator),
        Err(MeshDecompError::StateTransition { expected: "CELLS_REWRITTEN", found: "EDGES_BUILT" })
    ));
    nh.abort(&mut data, &mut generator);
    assert_eq!(nh.state(), PassState::Idle);
}
