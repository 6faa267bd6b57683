//! Structured simplex background meshes over axis-aligned boxes.

use crate::mesh_error::MeshDecompError;
use crate::topology::background::SimplexBackgroundMesh;

fn invalid_geometry(message: impl Into<String>) -> MeshDecompError {
    MeshDecompError::InvalidGeometry(message.into())
}

/// `nx`×`ny` squares over `[min, max]`, each split into two counter-clockwise
/// triangles along the diagonal from its lower-left corner.
pub fn tri_mesh(nx: usize, ny: usize, min: [f64; 2], max: [f64; 2]) -> Result<SimplexBackgroundMesh, MeshDecompError> {
    if nx == 0 || ny == 0 {
        return Err(invalid_geometry("nx and ny must be positive"));
    }
    if max.iter().zip(&min).any(|(hi, lo)| hi <= lo) {
        return Err(invalid_geometry(format!("empty box {min:?}..{max:?}")));
    }

    let dx = (max[0] - min[0]) / nx as f64;
    let dy = (max[1] - min[1]) / ny as f64;
    let mut vertices = Vec::with_capacity((nx + 1) * (ny + 1));
    for j in 0..=ny {
        let y = min[1] + dy * j as f64;
        for i in 0..=nx {
            let x = min[0] + dx * i as f64;
            vertices.push(vec![x, y]);
        }
    }

    let mut cells = Vec::with_capacity(2 * nx * ny);
    let row_stride = nx + 1;
    for j in 0..ny {
        for i in 0..nx {
            let v0 = j * row_stride + i;
            let v1 = v0 + 1;
            let v3 = v0 + row_stride;
            let v2 = v3 + 1;
            cells.push(vec![v0, v1, v2]);
            cells.push(vec![v0, v2, v3]);
        }
    }
    SimplexBackgroundMesh::new(2, vertices, cells)
}

/// Axis orders of the six Kuhn tetrahedra of a cube.
const KUHN_PATHS: [[usize; 3]; 6] = [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];

/// `nx`×`ny`×`nz` cubes over `[min, max]`, each split into the six Kuhn
/// tetrahedra around its main diagonal, all positively oriented.
pub fn tet_mesh(
    nx: usize,
    ny: usize,
    nz: usize,
    min: [f64; 3],
    max: [f64; 3],
) -> Result<SimplexBackgroundMesh, MeshDecompError> {
    if nx == 0 || ny == 0 || nz == 0 {
        return Err(invalid_geometry("nx, ny, and nz must be positive"));
    }
    if max.iter().zip(&min).any(|(hi, lo)| hi <= lo) {
        return Err(invalid_geometry(format!("empty box {min:?}..{max:?}")));
    }

    let dx = (max[0] - min[0]) / nx as f64;
    let dy = (max[1] - min[1]) / ny as f64;
    let dz = (max[2] - min[2]) / nz as f64;
    let mut vertices = Vec::with_capacity((nx + 1) * (ny + 1) * (nz + 1));
    for k in 0..=nz {
        let z = min[2] + dz * k as f64;
        for j in 0..=ny {
            let y = min[1] + dy * j as f64;
            for i in 0..=nx {
                let x = min[0] + dx * i as f64;
                vertices.push(vec![x, y, z]);
            }
        }
    }

    let row_stride = nx + 1;
    let slab_stride = row_stride * (ny + 1);
    let strides = [1, row_stride, slab_stride];
    let mut cells = Vec::with_capacity(6 * nx * ny * nz);
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let base = k * slab_stride + j * row_stride + i;
                for (p, path) in KUHN_PATHS.iter().enumerate() {
                    let v1 = base + strides[path[0]];
                    let v2 = v1 + strides[path[1]];
                    let v3 = v2 + strides[path[2]];
                    // odd axis permutations come out left-handed
                    if matches!(p, 1 | 2 | 5) {
                        cells.push(vec![base, v1, v3, v2]);
                    } else {
                        cells.push(vec![base, v1, v2, v3]);
                    }
                }
            }
        }
    }
    SimplexBackgroundMesh::new(3, vertices, cells)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::quality::signed_measure;
    use crate::topology::background::BackgroundMesh;
    use crate::topology::cell_type::EntityRank;

    fn measures(mesh: &SimplexBackgroundMesh) -> Vec<f64> {
        (0..mesh.num_cells())
            .map(|c| {
                let coords: Vec<&[f64]> = mesh
                    .cell_vertices(c)
                    .unwrap()
                    .iter()
                    .map(|&v| mesh.vertex_coords(v).unwrap())
                    .collect();
                signed_measure(mesh.topology(), &coords).unwrap()
            })
            .collect()
    }

    #[test]
    fn triangles_tile_the_square() {
        let mesh = tri_mesh(3, 2, [0.0, 0.0], [3.0, 1.0]).unwrap();
        assert_eq!(mesh.num_cells(), 12);
        assert_eq!(mesh.num_vertices(), 12);
        let m = measures(&mesh);
        assert!(m.iter().all(|&a| a > 0.0));
        assert!((m.iter().sum::<f64>() - 3.0).abs() < 1e-12);
        // 3·3 horizontal + 4·2 vertical + 6 diagonals
        assert_eq!(mesh.num_entities(EntityRank::Edge), 23);
    }

    #[test]
    fn kuhn_tetrahedra_are_positive_and_conforming() {
        let mesh = tet_mesh(2, 2, 2, [0.0; 3], [1.0; 3]).unwrap();
        assert_eq!(mesh.num_cells(), 48);
        let m = measures(&mesh);
        assert!(m.iter().all(|&v| v > 0.0));
        assert!((m.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        // every interior face is shared by exactly two tetrahedra: 4·48 = 2·F - boundary
        let boundary = 6 * 4 * 2;
        assert_eq!(2 * mesh.num_entities(EntityRank::Face) - boundary, 4 * 48);
    }

    #[test]
    fn empty_boxes_are_rejected() {
        assert!(tri_mesh(0, 1, [0.0; 2], [1.0; 2]).is_err());
        assert!(tet_mesh(1, 1, 1, [0.0; 3], [1.0, 0.0, 1.0]).is_err());
    }
}
