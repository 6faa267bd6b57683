//! Signed measures and validity checks for simplex cells.
//!
//! # Vertex ordering
//! - **Tri3**: `[v0, v1, v2]`, positive area when counter-clockwise in XY.
//! - **Tet4**: `[v0, v1, v2, v3]`, positive volume when `v3` lies on the side
//!   of `(v0, v1, v2)` that the right-hand rule points to.
//!
//! The rewriter uses the signed measure to orient children like their parent,
//! and [`validate_cell_geometry`] to reject degenerate or inverted children.

use crate::mesh_error::MeshDecompError;
use crate::topology::cell_type::CellTopology;

const EPS: f64 = 1e-12;
/// Smallest child measure accepted, relative to the reference measure.
const REL_EPS: f64 = 1e-14;

/// Basic quality metrics for a single cell.
#[derive(Clone, Copy, Debug)]
pub struct CellQuality {
    /// Ratio of the longest edge length to the shortest edge length.
    pub aspect_ratio: f64,
    /// Signed area (2D) or volume (3D). Negative values indicate inverted
    /// orientation; zero indicates degenerate geometry.
    pub signed_measure: f64,
}

/// Compute quality metrics from explicit vertex coordinates.
pub fn cell_quality(topology: CellTopology, vertices: &[&[f64]]) -> Result<CellQuality, MeshDecompError> {
    let points = gather(topology, vertices)?;
    let mut min_len = f64::INFINITY;
    let mut max_len = 0.0f64;
    for [a, b] in topology.node_to_edge_map() {
        let len = norm(sub(points[*a], points[*b]));
        if len <= EPS {
            return Err(MeshDecompError::InvalidGeometry(
                "zero-length edge detected".into(),
            ));
        }
        min_len = min_len.min(len);
        max_len = max_len.max(len);
    }
    Ok(CellQuality {
        aspect_ratio: max_len / min_len,
        signed_measure: measure(topology, &points),
    })
}

/// Signed area (Tri3) or volume (Tet4).
pub fn signed_measure(topology: CellTopology, vertices: &[&[f64]]) -> Result<f64, MeshDecompError> {
    let points = gather(topology, vertices)?;
    Ok(measure(topology, &points))
}

/// Validate that a cell is not degenerate and has the orientation of
/// `reference`, a measure of the same kind (usually the parent cell's).
///
/// Returns the signed measure on success.
pub fn validate_cell_geometry(
    topology: CellTopology,
    vertices: &[&[f64]],
    reference: f64,
) -> Result<f64, MeshDecompError> {
    let m = signed_measure(topology, vertices)?;
    if !m.is_finite() || m.abs() <= REL_EPS * reference.abs() {
        return Err(MeshDecompError::InvalidGeometry(format!(
            "degenerate geometry: measure = {m}"
        )));
    }
    if m.signum() != reference.signum() {
        return Err(MeshDecompError::InvalidGeometry(format!(
            "inverted geometry: measure = {m}, reference = {reference}"
        )));
    }
    Ok(m)
}

fn gather(topology: CellTopology, vertices: &[&[f64]]) -> Result<Vec<[f64; 3]>, MeshDecompError> {
    let expected = topology.num_vertices();
    if vertices.len() != expected {
        return Err(MeshDecompError::InvalidGeometry(format!(
            "vertex count mismatch: expected {expected}, got {}",
            vertices.len()
        )));
    }
    let dim = topology.dimension();
    vertices
        .iter()
        .map(|slice| {
            if slice.len() != dim {
                return Err(MeshDecompError::InvalidGeometry(format!(
                    "coordinate length mismatch: expected {dim}, got {}",
                    slice.len()
                )));
            }
            Ok(if dim == 2 {
                [slice[0], slice[1], 0.0]
            } else {
                [slice[0], slice[1], slice[2]]
            })
        })
        .collect()
}

fn measure(topology: CellTopology, p: &[[f64; 3]]) -> f64 {
    match topology {
        CellTopology::Tri3 => signed_area_xy(p[0], p[1], p[2]),
        CellTopology::Tet4 => signed_volume(p[0], p[1], p[2], p[3]),
    }
}

fn signed_area_xy(a: [f64; 3], b: [f64; 3], c: [f64; 3]) -> f64 {
    let abx = b[0] - a[0];
    let aby = b[1] - a[1];
    let acx = c[0] - a[0];
    let acy = c[1] - a[1];
    0.5 * (abx * acy - aby * acx)
}

fn signed_volume(a: [f64; 3], b: [f64; 3], c: [f64; 3], d: [f64; 3]) -> f64 {
    dot(sub(b, a), cross(sub(c, a), sub(d, a))) / 6.0
}

fn sub(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn norm(a: [f64; 3]) -> f64 {
    dot(a, a).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_cells_are_positive() {
        let tri: [&[f64]; 3] = [&[0.0, 0.0], &[1.0, 0.0], &[0.0, 1.0]];
        assert!((signed_measure(CellTopology::Tri3, &tri).unwrap() - 0.5).abs() < 1e-15);
        let tet: [&[f64]; 4] = [&[0.0, 0.0, 0.0], &[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0], &[0.0, 0.0, 1.0]];
        let q = cell_quality(CellTopology::Tet4, &tet).unwrap();
        assert!((q.signed_measure - 1.0 / 6.0).abs() < 1e-15);
        assert!((q.aspect_ratio - 2f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn inverted_and_degenerate_cells_are_rejected() {
        let inverted: [&[f64]; 3] = [&[0.0, 0.0], &[0.0, 1.0], &[1.0, 0.0]];
        assert!(validate_cell_geometry(CellTopology::Tri3, &inverted, 0.5).is_err());
        assert!(validate_cell_geometry(CellTopology::Tri3, &inverted, -0.5).is_ok());
        let flat: [&[f64]; 3] = [&[0.0, 0.0], &[1.0, 0.0], &[2.0, 0.0]];
        assert!(validate_cell_geometry(CellTopology::Tri3, &flat, 0.5).is_err());
        let short: [&[f64]; 3] = [&[0.0, 0.0], &[0.0, 0.0], &[2.0, 1.0]];
        assert!(cell_quality(CellTopology::Tri3, &short).is_err());
    }
}
