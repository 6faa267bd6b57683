//! Template application: turns a classified cut cell into child cells.
//!
//! The first child takes over the slot of the cut cell, the others are
//! appended to the same cell group. Children are oriented like their parent
//! (same sign of the signed measure) by swapping their last two vertices when
//! needed.

use crate::data::cut_mesh::{CutMesh, NewCell};
use crate::decomposition::classifier::ClassifiedCell;
use crate::decomposition::templates::SubdivisionTemplate;
use crate::geometry::quality::{signed_measure, validate_cell_geometry};
use crate::mesh_error::MeshDecompError;

/// Relative tolerance on the children's measures summing to the parent's.
const MEASURE_SUM_TOL: f64 = 1e-8;

/// How children are post-processed.
#[derive(Clone, Copy, Debug)]
pub struct RewriteOptions {
    pub orient_children: bool,
    pub validate_cells: bool,
}

/// Children of one cut cell, ready for [`CutMesh::commit_cells`].
pub fn rewrite_cell(
    cut_mesh: &CutMesh,
    classified: &ClassifiedCell,
    template: &SubdivisionTemplate,
    options: RewriteOptions,
) -> Result<Vec<NewCell>, MeshDecompError> {
    let parent = cut_mesh.cell(classified.cell)?;
    if template.num_input_nodes != classified.canonical_nodes.len() {
        return Err(MeshDecompError::InvariantViolation(format!(
            "template {} expects {} nodes, cell {} provides {}",
            template.key.value,
            template.num_input_nodes,
            classified.cell,
            classified.canonical_nodes.len()
        )));
    }
    let parent_measure = signed_measure(parent.topology, &cut_mesh.cell_coords(classified.cell)?)?;

    let mut children = Vec::with_capacity(template.child_count());
    let mut measure_sum = 0.0;
    for (i, slots) in template.children.iter().enumerate() {
        let mut vertices: Vec<usize> = slots.iter().map(|&s| classified.canonical_nodes[s]).collect();
        let coords = |vs: &[usize]| -> Result<Vec<&[f64]>, MeshDecompError> {
            vs.iter()
                .map(|&v| cut_mesh.vertex(v).map(|v| v.coords.as_slice()))
                .collect()
        };
        let mut m = signed_measure(template.child_topology, &coords(&vertices)?)?;
        if options.orient_children && m.signum() != parent_measure.signum() {
            let n = vertices.len();
            vertices.swap(n - 2, n - 1);
            m = -m;
        }
        if options.validate_cells {
            let reference = if options.orient_children {
                parent_measure
            } else {
                m.signum() * parent_measure.abs()
            };
            validate_cell_geometry(template.child_topology, &coords(&vertices)?, reference).map_err(|e| {
                MeshDecompError::InvalidGeometry(format!(
                    "child {i} of cell {} (template {}): {e}",
                    classified.cell, template.key.value
                ))
            })?;
        }
        measure_sum += m.abs();
        children.push(NewCell {
            vertices,
            topology: template.child_topology,
            group: parent.group,
            replaces: (i == 0).then_some(classified.cell),
        });
    }

    if options.validate_cells
        && (measure_sum - parent_measure.abs()).abs() > MEASURE_SUM_TOL * parent_measure.abs()
    {
        return Err(MeshDecompError::InvalidGeometry(format!(
            "children of cell {} measure {measure_sum}, the cell measures {}",
            classified.cell,
            parent_measure.abs()
        )));
    }
    Ok(children)
}
