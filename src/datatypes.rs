use std::collections::BTreeMap;

use crate::error::HeatFlowError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex {
    pub x: f64,
    pub y: f64,
}

/// Element shapes understood by the mesher and the element routines. The
/// numeric codes are the gmsh element type numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    Triangle,
    Quad,
}

impl ElementType {
    pub fn code(&self) -> usize {
        match self {
            ElementType::Triangle => 2,
            ElementType::Quad => 3,
        }
    }

    pub fn from_code(code: usize) -> Result<ElementType, HeatFlowError> {
        match code {
            2 => Ok(ElementType::Triangle),
            3 => Ok(ElementType::Quad),
            other => Err(HeatFlowError::Input(format!(
                "Unsupported element type code {other}"
            ))),
        }
    }

    pub fn nodes_per_element(&self) -> usize {
        match self {
            ElementType::Triangle => 3,
            ElementType::Quad => 4,
        }
    }
}

/// Element thickness and the Gauss rule used when integrating quads
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElementProperties {
    pub thickness: f64,
    pub integration_rule: usize,
}

impl Default for ElementProperties {
    fn default() -> Self {
        ElementProperties {
            thickness: 1.0,
            integration_rule: 2,
        }
    }
}

/// A straight boundary segment between two geometry points
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub points: [usize; 2],
    pub marker: i32,
}

/// A plane surface bounded by closed loops of segment indices
#[derive(Debug, Clone, PartialEq)]
pub struct Surface {
    pub outer: Vec<usize>,
    pub holes: Vec<Vec<usize>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Geometry {
    pub points: Vec<Vertex>,
    pub segments: Vec<Segment>,
    pub surfaces: Vec<Surface>,
}

impl Geometry {
    pub fn new() -> Geometry {
        Geometry::default()
    }

    /// Adds a point and returns its index
    pub fn point(&mut self, x: f64, y: f64) -> usize {
        self.points.push(Vertex { x, y });
        self.points.len() - 1
    }

    /// Adds a straight segment between two existing points and returns its index
    pub fn line(&mut self, points: [usize; 2], marker: i32) -> usize {
        self.segments.push(Segment { points, marker });
        self.segments.len() - 1
    }

    pub fn surface(&mut self, outer: Vec<usize>, holes: Vec<Vec<usize>>) -> usize {
        self.surfaces.push(Surface { outer, holes });
        self.surfaces.len() - 1
    }

    /// Distinct boundary markers, ascending
    pub fn markers(&self) -> Vec<i32> {
        let mut markers: Vec<i32> = self.segments.iter().map(|s| s.marker).collect();
        markers.sort();
        markers.dedup();
        markers
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshSettings {
    pub el_type: ElementType,
    pub dofs_per_node: usize,
    pub el_size_factor: f64,
}

/// A meshed geometry in the layout the element routines consume.
///
/// `edof` rows and `bdofs` values hold 1-based degree-of-freedom numbers.
#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    pub coords: Vec<[f64; 2]>,
    pub edof: Vec<Vec<usize>>,
    pub bdofs: BTreeMap<i32, Vec<usize>>,
    pub dofs_per_node: usize,
    pub el_type: ElementType,
}

impl Mesh {
    /// Builds a mesh from 0-based node topology
    ///
    /// # Arguments
    /// * `coords` - Node coordinates
    /// * `elements` - Node indices of each element
    /// * `boundary_nodes` - Node indices on each boundary marker
    /// * `el_type` - The element shape of every row in `elements`
    /// * `dofs_per_node` - Number of unknowns per node
    pub fn from_topology(
        coords: Vec<[f64; 2]>,
        elements: &[Vec<usize>],
        boundary_nodes: &BTreeMap<i32, Vec<usize>>,
        el_type: ElementType,
        dofs_per_node: usize,
    ) -> Result<Mesh, HeatFlowError> {
        let node_dofs =
            move |node: usize| (0..dofs_per_node).map(move |d| node * dofs_per_node + d + 1);

        let mut edof: Vec<Vec<usize>> = Vec::with_capacity(elements.len());
        for (i, element) in elements.iter().enumerate() {
            if element.len() != el_type.nodes_per_element() {
                return Err(HeatFlowError::Mesher(format!(
                    "Element {i} has {} nodes, expected {}",
                    element.len(),
                    el_type.nodes_per_element()
                )));
            }
            if let Some(node) = element.iter().find(|n| **n >= coords.len()) {
                return Err(HeatFlowError::Mesher(format!(
                    "Element {i} references missing node {node}"
                )));
            }
            edof.push(element.iter().flat_map(|n| node_dofs(*n)).collect());
        }

        let mut bdofs: BTreeMap<i32, Vec<usize>> = BTreeMap::new();
        for (marker, nodes) in boundary_nodes {
            let mut dofs: Vec<usize> = nodes.iter().flat_map(|n| node_dofs(*n)).collect();
            dofs.sort();
            dofs.dedup();
            bdofs.insert(*marker, dofs);
        }

        Ok(Mesh {
            coords,
            edof,
            bdofs,
            dofs_per_node,
            el_type,
        })
    }

    pub fn n_dofs(&self) -> usize {
        self.coords.len() * self.dofs_per_node
    }
}
