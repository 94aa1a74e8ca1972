use std::{
    collections::{BTreeMap, HashMap},
    io::Write,
    path::{Path, PathBuf},
    str::FromStr,
};

use crate::{
    datatypes::{ElementType, Geometry, Mesh, MeshSettings},
    error::HeatFlowError,
};

/// gmsh element type code for 2-node lines
const GMSH_LINE: usize = 1;

/// Turns a geometry into a mesh
pub trait MeshGenerator {
    fn create(&self, geometry: &Geometry, settings: &MeshSettings) -> Result<Mesh, HeatFlowError>;
}

/// Meshes by writing a .geo script and running the gmsh executable on it
#[derive(Debug, Clone)]
pub struct GmshMeshGenerator {
    pub gmsh_path: String,
    pub work_dir: PathBuf,
}

impl Default for GmshMeshGenerator {
    fn default() -> Self {
        GmshMeshGenerator {
            gmsh_path: "gmsh".to_owned(),
            work_dir: std::env::temp_dir(),
        }
    }
}

impl GmshMeshGenerator {
    pub fn new(gmsh_path: &str) -> GmshMeshGenerator {
        GmshMeshGenerator {
            gmsh_path: gmsh_path.to_owned(),
            ..GmshMeshGenerator::default()
        }
    }
}

impl GmshMeshGenerator {
    /// A fresh directory under `work_dir` for one gmsh run, removed on drop
    fn scratch_dir(&self) -> Result<tempfile::TempDir, HeatFlowError> {
        match tempfile::Builder::new()
            .prefix("heatflow_")
            .tempdir_in(&self.work_dir)
        {
            Ok(dir) => Ok(dir),
            Err(err) => Err(HeatFlowError::Mesher(format!(
                "Unable to create scratch directory in {}: {err}",
                self.work_dir.display()
            ))),
        }
    }
}

impl MeshGenerator for GmshMeshGenerator {
    fn create(&self, geometry: &Geometry, settings: &MeshSettings) -> Result<Mesh, HeatFlowError> {
        let scratch = self.scratch_dir()?;
        let geo_filepath = scratch.path().join("heatflow.geo");
        let mesh_filepath = scratch.path().join("heatflow.msh");

        compute_mesh(
            geometry,
            settings,
            &self.gmsh_path,
            &geo_filepath,
            &mesh_filepath,
        )?;

        let contents = match std::fs::read_to_string(&mesh_filepath) {
            Ok(c) => c,
            Err(err) => {
                return Err(HeatFlowError::Mesher(format!(
                    "Unable to open auto-generated mesh file: {err}"
                )))
            }
        };
        if let Err(err) = std::fs::remove_file(&mesh_filepath) {
            println!("warning [mesh]: failed to delete .msh file: {err}");
        }

        let parsed = parse_mesh(&contents, settings.el_type)?;
        boundary_mesh(geometry, parsed, settings)
    }
}

/// Nodes, elements and boundary lines read from a .msh file. Node indices are
/// 0-based and ordered by gmsh node tag.
#[derive(Debug, Default)]
pub struct ParsedMesh {
    pub coords: Vec<[f64; 2]>,
    pub elements: Vec<Vec<usize>>,
    /// Node pairs of the line elements on each geometry curve, keyed by
    /// curve tag
    pub curve_lines: BTreeMap<usize, Vec<[usize; 2]>>,
}

enum MeshParseState {
    Nodes,
    Elements,
    Other,
    Limbo,
}

/// Builds a .geo script for a geometry.
///
/// Points and segments get gmsh tags one above their index. Every point uses
/// a characteristic length of one, so `el_size_factor` sets the element size.
pub fn build_geo(geometry: &Geometry, settings: &MeshSettings) -> Result<String, HeatFlowError> {
    if geometry.surfaces.is_empty() {
        return Err(HeatFlowError::Mesher("Geometry has no surface".to_owned()));
    }

    let mut geo = String::new();

    geo.push_str("// Define points\n");
    for (i, vertex) in geometry.points.iter().enumerate() {
        geo.push_str(&format!(
            "Point({}) = {{ {}, {}, 0, 1.0 }};\n",
            i + 1,
            vertex.x,
            vertex.y
        ));
    }

    geo.push_str("\n// Connect points\n");
    for (i, segment) in geometry.segments.iter().enumerate() {
        for p in segment.points {
            if p >= geometry.points.len() {
                return Err(HeatFlowError::Mesher(format!(
                    "Segment {i} references missing point {p}"
                )));
            }
        }
        geo.push_str(&format!(
            "Line({}) = {{ {}, {} }};\n",
            i + 1,
            segment.points[0] + 1,
            segment.points[1] + 1
        ));
    }

    geo.push_str("\n// Register loops\n");
    let mut loop_counter: usize = 0;
    let mut surface_loops: Vec<Vec<usize>> = Vec::with_capacity(geometry.surfaces.len());
    for surface in &geometry.surfaces {
        let mut loops: Vec<usize> = Vec::with_capacity(1 + surface.holes.len());
        for segments in std::iter::once(&surface.outer).chain(surface.holes.iter()) {
            if let Some(s) = segments.iter().find(|s| **s >= geometry.segments.len()) {
                return Err(HeatFlowError::Mesher(format!(
                    "Surface loop references missing segment {s}"
                )));
            }
            loop_counter += 1;
            let tags: Vec<String> = segments.iter().map(|s| (s + 1).to_string()).collect();
            geo.push_str(&format!(
                "Line Loop({}) = {{ {} }};\n",
                loop_counter,
                tags.join(", ")
            ));
            loops.push(loop_counter);
        }
        surface_loops.push(loops);
    }

    geo.push_str("\n// Define surfaces\n");
    for (i, loops) in surface_loops.iter().enumerate() {
        let tags: Vec<String> = loops.iter().map(|l| l.to_string()).collect();
        geo.push_str(&format!(
            "Plane Surface({}) = {{ {} }};\n",
            i + 1,
            tags.join(", ")
        ));
    }

    let recombine = match settings.el_type {
        ElementType::Triangle => "",
        ElementType::Quad => {
            "Mesh.RecombineAll = 1;\n\
            Mesh.RecombinationAlgorithm = 1;\n\
            Mesh.SubdivisionAlgorithm = 1;\n"
        }
    };

    geo.push_str(&format!(
        "\n// Define Mesh Settings\n\
        Mesh.ElementOrder = 1;\n\
        Mesh.Algorithm = 6;\n\
        Mesh.CharacteristicLengthFactor = {cl_factor};\n\
        {recombine}\
        Mesh.MshFileVersion = 4.1;\n",
        cl_factor = settings.el_size_factor,
    ));

    Ok(geo)
}

/// Runs gmsh to create a .msh file from a geometry
///
/// # Arguments
/// * `geometry` - The geometry to mesh
/// * `settings` - Element type and size factor
/// * `gmsh_path` - The gmsh executable
/// * `geo_filepath` - Where to write the intermediate .geo script
/// * `output` - The output filepath of the .msh file
fn compute_mesh(
    geometry: &Geometry,
    settings: &MeshSettings,
    gmsh_path: &str,
    geo_filepath: &Path,
    output: &Path,
) -> Result<(), HeatFlowError> {
    if !(settings.el_size_factor > 0.0) {
        return Err(HeatFlowError::Mesher(format!(
            "Element size factor must be positive, got {}",
            settings.el_size_factor
        )));
    }

    println!(
        "info: building .geo for gmsh with size factor {:.3}",
        settings.el_size_factor
    );
    let geo = build_geo(geometry, settings)?;

    let mut geo_file = match std::fs::File::create(geo_filepath) {
        Ok(f) => f,
        Err(err) => {
            return Err(HeatFlowError::Mesher(format!(
                "Failed to create {}: {err}",
                geo_filepath.display()
            )))
        }
    };
    if let Err(err) = geo_file.write_all(geo.as_bytes()) {
        return Err(HeatFlowError::Mesher(format!(
            "Failed to write {}: {err}",
            geo_filepath.display()
        )));
    }
    drop(geo_file);

    println!("info: running gmsh...");
    let gmsh = std::process::Command::new(gmsh_path)
        .arg(geo_filepath)
        .arg("-2")
        .arg("-format")
        .arg("msh41")
        .arg("-o")
        .arg(output)
        .output();

    if let Err(err) = std::fs::remove_file(geo_filepath) {
        println!("warning [mesh]: failed to delete .geo file: {err}");
    }

    let gmsh = match gmsh {
        Ok(out) => out,
        Err(err) => return Err(HeatFlowError::Mesher(format!("gmsh failed to start: {err}"))),
    };
    if !gmsh.status.success() {
        return Err(HeatFlowError::Mesher(format!(
            "gmsh exited with {}: {}",
            gmsh.status,
            String::from_utf8_lossy(&gmsh.stderr).trim()
        )));
    }

    Ok(())
}

fn parse_fields<T: FromStr>(line: Option<&str>) -> Result<Vec<T>, HeatFlowError> {
    let line = match line {
        Some(l) => l,
        None => {
            return Err(HeatFlowError::Mesher(
                "Unexpected end of mesh file".to_owned(),
            ))
        }
    };

    line.split_whitespace()
        .map(|f| match f.parse() {
            Ok(v) => Ok(v),
            Err(_) => Err(HeatFlowError::Mesher(format!(
                "Unexpected value '{f}' in mesh data"
            ))),
        })
        .collect()
}

fn header_field(fields: &[usize], i: usize) -> Result<usize, HeatFlowError> {
    match fields.get(i) {
        Some(v) => Ok(*v),
        None => Err(HeatFlowError::Mesher(
            "Truncated block header in mesh file".to_owned(),
        )),
    }
}

/// Parses the contents of a gmsh 4.1 ASCII .msh file.
///
/// # Arguments
/// * `contents` - The .msh file contents
/// * `el_type` - The surface element type that was requested. Any other
///     surface element type is an error.
pub fn parse_mesh(contents: &str, el_type: ElementType) -> Result<ParsedMesh, HeatFlowError> {
    let mut parser_state = MeshParseState::Limbo;
    let mut parsed_section_metadata = false;
    let mut lines = contents.lines();

    let mut tagged_nodes: Vec<(usize, [f64; 2])> = Vec::new();
    let mut tagged_elements: Vec<Vec<usize>> = Vec::new();
    let mut tagged_lines: BTreeMap<usize, Vec<[usize; 2]>> = BTreeMap::new();

    while let Some(line) = lines.next() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line.starts_with("$End") {
            parser_state = MeshParseState::Limbo;
            continue;
        }

        match parser_state {
            MeshParseState::Limbo => {
                parsed_section_metadata = false;

                if line.starts_with("$Nodes") {
                    parser_state = MeshParseState::Nodes;
                } else if line.starts_with("$Elements") {
                    parser_state = MeshParseState::Elements;
                } else if line.starts_with('$') {
                    parser_state = MeshParseState::Other;
                }
                continue;
            }
            MeshParseState::Nodes => {
                if !parsed_section_metadata {
                    parsed_section_metadata = true;
                    continue;
                }

                let block: Vec<usize> = parse_fields(Some(line))?;
                let parametric = header_field(&block, 2)?;
                let num_nodes_local = header_field(&block, 3)?;

                let mut node_tags: Vec<usize> = Vec::with_capacity(num_nodes_local);
                for _ in 0..num_nodes_local {
                    let tag: Vec<usize> = parse_fields(lines.next())?;
                    node_tags.push(header_field(&tag, 0)?);
                }

                for tag in node_tags {
                    let node_coords: Vec<f64> = parse_fields(lines.next())?;
                    if node_coords.len() < 3 + parametric {
                        return Err(HeatFlowError::Mesher(format!(
                            "Node {tag} has too few coordinates"
                        )));
                    }
                    tagged_nodes.push((tag, [node_coords[0], node_coords[1]]));
                }
            }
            MeshParseState::Elements => {
                if !parsed_section_metadata {
                    parsed_section_metadata = true;
                    continue;
                }

                let block: Vec<usize> = parse_fields(Some(line))?;
                let entity_dim = header_field(&block, 0)?;
                let entity_tag = header_field(&block, 1)?;
                let element_type = header_field(&block, 2)?;
                let num_elements = header_field(&block, 3)?;

                if entity_dim == 2 && element_type != el_type.code() {
                    return Err(HeatFlowError::Mesher(format!(
                        "Mesh contains element type {element_type}, expected {}",
                        el_type.code()
                    )));
                }

                for _ in 0..num_elements {
                    let metadata: Vec<usize> = parse_fields(lines.next())?;

                    if entity_dim == 2 {
                        if metadata.len() != 1 + el_type.nodes_per_element() {
                            return Err(HeatFlowError::Mesher(format!(
                                "Element {} has {} nodes",
                                header_field(&metadata, 0)?,
                                metadata.len().saturating_sub(1)
                            )));
                        }
                        tagged_elements.push(metadata[1..].to_vec());
                    } else if entity_dim == 1 && element_type == GMSH_LINE {
                        if metadata.len() != 3 {
                            return Err(HeatFlowError::Mesher(
                                "Malformed line element in mesh".to_owned(),
                            ));
                        }
                        tagged_lines
                            .entry(entity_tag)
                            .or_default()
                            .push([metadata[1], metadata[2]]);
                    }
                }
            }
            MeshParseState::Other => continue,
        }
    }

    // Order nodes by tag
    tagged_nodes.sort_by_key(|(tag, _)| *tag);
    let node_index: HashMap<usize, usize> = tagged_nodes
        .iter()
        .enumerate()
        .map(|(i, (tag, _))| (*tag, i))
        .collect();

    let lookup = |tag: usize| match node_index.get(&tag) {
        Some(i) => Ok(*i),
        None => Err(HeatFlowError::Mesher(format!(
            "Mesh references unknown node tag {tag}"
        ))),
    };

    let mut elements: Vec<Vec<usize>> = Vec::with_capacity(tagged_elements.len());
    for tags in tagged_elements {
        elements.push(
            tags.into_iter()
                .map(lookup)
                .collect::<Result<Vec<usize>, HeatFlowError>>()?,
        );
    }

    let mut curve_lines: BTreeMap<usize, Vec<[usize; 2]>> = BTreeMap::new();
    for (curve, pairs) in tagged_lines {
        let mut lines: Vec<[usize; 2]> = Vec::with_capacity(pairs.len());
        for [n0, n1] in pairs {
            lines.push([lookup(n0)?, lookup(n1)?]);
        }
        curve_lines.insert(curve, lines);
    }

    if elements.is_empty() {
        return Err(HeatFlowError::Mesher(
            "Mesh contains no surface elements".to_owned(),
        ));
    }

    println!(
        "info: loaded {} nodes and {} elements",
        tagged_nodes.len(),
        elements.len()
    );

    Ok(ParsedMesh {
        coords: tagged_nodes.into_iter().map(|(_, c)| c).collect(),
        elements,
        curve_lines,
    })
}

/// Collects the boundary nodes of each marker from the line elements gmsh
/// placed on the geometry segments, and numbers the degrees of freedom.
pub fn boundary_mesh(
    geometry: &Geometry,
    parsed: ParsedMesh,
    settings: &MeshSettings,
) -> Result<Mesh, HeatFlowError> {
    let mut boundary_nodes: BTreeMap<i32, Vec<usize>> = BTreeMap::new();

    for (curve, lines) in &parsed.curve_lines {
        let segment = match curve.checked_sub(1).and_then(|i| geometry.segments.get(i)) {
            Some(s) => s,
            None => {
                println!("warning [mesh]: skipping line elements on unknown curve {curve}");
                continue;
            }
        };
        let nodes = boundary_nodes.entry(segment.marker).or_default();
        for [n0, n1] in lines {
            nodes.push(*n0);
            nodes.push(*n1);
        }
    }

    Mesh::from_topology(
        parsed.coords,
        &parsed.elements,
        &boundary_nodes,
        settings.el_type,
        settings.dofs_per_node,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatypes::Geometry;

    fn unit_square() -> Geometry {
        let mut g = Geometry::new();
        g.point(0.0, 0.0);
        g.point(1.0, 0.0);
        g.point(1.0, 1.0);
        g.point(0.0, 1.0);
        g.line([0, 1], 10);
        g.line([1, 2], 20);
        g.line([2, 3], 10);
        g.line([3, 0], 20);
        g.surface(vec![0, 1, 2, 3], vec![]);
        g
    }

    fn quad_settings() -> MeshSettings {
        MeshSettings {
            el_type: ElementType::Quad,
            dofs_per_node: 1,
            el_size_factor: 0.5,
        }
    }

    // Two quads over the unit square, node tags deliberately out of order
    const TWO_QUADS: &str = "$MeshFormat
4.1 0 8
$EndMeshFormat
$Entities
4 4 1 0
$EndEntities
$Nodes
2 6 1 6
0 1 0 4
1
2
3
4
0 0 0
1 0 0
1 1 0
0 1 0
2 1 0 2
6
5
0.5 1 0
0.5 0 0
$EndNodes
$Elements
3 5 1 5
1 1 1 2
1 1 5
2 5 2
1 4 1 1
3 4 1
2 1 3 2
4 1 5 6 4
5 5 2 3 6
$EndElements
";

    #[test]
    fn geo_script_describes_surface_with_hole() {
        let geometry = crate::model::InputData::new().geometry().unwrap();
        let geo = build_geo(&geometry, &quad_settings()).unwrap();

        assert!(geo.contains("Point(4) = { 0, 0.1, 0, 1.0 };"));
        assert!(geo.contains("Line(8) = { 8, 5 };"));
        assert!(geo.contains("Line Loop(1) = { 1, 2, 3, 4 };"));
        assert!(geo.contains("Line Loop(2) = { 5, 6, 7, 8 };"));
        assert!(geo.contains("Plane Surface(1) = { 1, 2 };"));
        assert!(geo.contains("Mesh.CharacteristicLengthFactor = 0.5;"));
        assert!(geo.contains("Mesh.RecombineAll = 1;"));
    }

    #[test]
    fn triangle_geo_skips_recombination() {
        let settings = MeshSettings {
            el_type: ElementType::Triangle,
            ..quad_settings()
        };
        let geo = build_geo(&unit_square(), &settings).unwrap();
        assert!(!geo.contains("Recombine"));
    }

    #[test]
    fn parse_orders_nodes_by_tag() {
        let parsed = parse_mesh(TWO_QUADS, ElementType::Quad).unwrap();

        assert_eq!(parsed.coords.len(), 6);
        assert_eq!(parsed.coords[4], [0.5, 0.0]);
        assert_eq!(parsed.coords[5], [0.5, 1.0]);
        assert_eq!(parsed.elements, vec![vec![0, 4, 5, 3], vec![4, 1, 2, 5]]);
        assert_eq!(parsed.curve_lines[&1], vec![[0, 4], [4, 1]]);
        assert_eq!(parsed.curve_lines[&4], vec![[3, 0]]);
    }

    #[test]
    fn boundary_nodes_follow_segment_markers() {
        let parsed = parse_mesh(TWO_QUADS, ElementType::Quad).unwrap();
        let mesh = boundary_mesh(&unit_square(), parsed, &quad_settings()).unwrap();

        assert_eq!(mesh.edof, vec![vec![1, 5, 6, 4], vec![5, 2, 3, 6]]);
        assert_eq!(mesh.bdofs[&10], vec![1, 2, 5]);
        assert_eq!(mesh.bdofs[&20], vec![1, 4]);
    }

    #[test]
    fn parse_rejects_unexpected_element_type() {
        let result = parse_mesh(TWO_QUADS, ElementType::Triangle);
        assert!(matches!(result, Err(HeatFlowError::Mesher(_))));
    }

    #[test]
    fn parse_rejects_truncated_file() {
        let truncated = &TWO_QUADS[..TWO_QUADS.find("0.5 1 0").unwrap()];
        assert!(parse_mesh(truncated, ElementType::Quad).is_err());
    }

    #[test]
    fn each_run_gets_its_own_scratch_dir() {
        let dir = tempfile::tempdir().unwrap();
        let generator = GmshMeshGenerator {
            gmsh_path: "gmsh".to_owned(),
            work_dir: dir.path().to_path_buf(),
        };

        let first = generator.scratch_dir().unwrap();
        let second = generator.scratch_dir().unwrap();
        assert_ne!(first.path(), second.path());
        assert!(first.path().starts_with(dir.path()));

        drop(first);
        drop(second);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn missing_gmsh_is_a_mesher_error() {
        let dir = tempfile::tempdir().unwrap();
        let generator = GmshMeshGenerator {
            gmsh_path: "/nonexistent/gmsh".to_owned(),
            work_dir: dir.path().to_path_buf(),
        };
        let result = generator.create(&unit_square(), &quad_settings());
        assert!(matches!(result, Err(HeatFlowError::Mesher(_))));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
