use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use crate::{error::HeatFlowError, model::OutputData};

fn create_file(path: &Path) -> Result<BufWriter<File>, HeatFlowError> {
    match File::create(path) {
        Ok(f) => Ok(BufWriter::new(f)),
        Err(err) => Err(HeatFlowError::PostProcessor(format!(
            "Failed to create {}: {err}",
            path.display()
        ))),
    }
}

fn write_failed(path: &Path) -> impl Fn(std::io::Error) -> HeatFlowError + '_ {
    move |err| HeatFlowError::PostProcessor(format!("Failed to write {}: {err}", path.display()))
}

/// 0-based node indices of each element
fn element_nodes(output: &OutputData) -> Vec<Vec<usize>> {
    let dofs_per_node = output.dofs_per_node.max(1);
    output
        .edof
        .iter()
        .map(|topo| {
            topo.iter()
                .step_by(dofs_per_node)
                .map(|dof| (dof - 1) / dofs_per_node)
                .collect()
        })
        .collect()
}

/// Writes solve results as an ASCII legacy VTK polydata file
///
/// # Arguments
/// * `output` - The populated output data
/// * `filename` - The .vtk file to write
pub fn export_vtk(output: &OutputData, filename: &Path) -> Result<(), HeatFlowError> {
    if output.is_empty() {
        return Err(HeatFlowError::PostProcessor(
            "Nothing to export, the model has not been solved".to_owned(),
        ));
    }
    output.validate()?;

    println!("info: exporting results to {}", filename.display());

    let polygons = element_nodes(output);
    let connectivity_size: usize = polygons.iter().map(|p| p.len() + 1).sum();

    let mut vtk_file = create_file(filename)?;
    let failed = write_failed(filename);

    writeln!(vtk_file, "# vtk DataFile Version 2.0").map_err(&failed)?;
    writeln!(vtk_file, "heatflow results").map_err(&failed)?;
    writeln!(vtk_file, "ASCII").map_err(&failed)?;
    writeln!(vtk_file, "DATASET POLYDATA").map_err(&failed)?;

    writeln!(vtk_file, "POINTS {} double", output.coords.len()).map_err(&failed)?;
    for [x, y] in &output.coords {
        writeln!(vtk_file, "{x} {y} 0").map_err(&failed)?;
    }

    writeln!(vtk_file, "POLYGONS {} {}", polygons.len(), connectivity_size).map_err(&failed)?;
    for polygon in &polygons {
        let indices: Vec<String> = polygon.iter().map(|i| i.to_string()).collect();
        writeln!(vtk_file, "{} {}", polygon.len(), indices.join(" ")).map_err(&failed)?;
    }

    writeln!(vtk_file, "POINT_DATA {}", output.coords.len()).map_err(&failed)?;
    writeln!(vtk_file, "SCALARS pressure double 1").map_err(&failed)?;
    writeln!(vtk_file, "LOOKUP_TABLE default").map_err(&failed)?;
    for value in output.a.iter().step_by(output.dofs_per_node.max(1)) {
        writeln!(vtk_file, "{value}").map_err(&failed)?;
    }

    writeln!(vtk_file, "CELL_DATA {}", polygons.len()).map_err(&failed)?;
    writeln!(vtk_file, "SCALARS max_flow double 1").map_err(&failed)?;
    writeln!(vtk_file, "LOOKUP_TABLE default").map_err(&failed)?;
    for value in &output.max_flow {
        writeln!(vtk_file, "{value}").map_err(&failed)?;
    }
    writeln!(vtk_file, "VECTORS flow double").map_err(&failed)?;
    for [qx, qy, qz] in &output.flow {
        writeln!(vtk_file, "{qx} {qy} {qz}").map_err(&failed)?;
    }

    vtk_file.flush().map_err(&failed)?;

    Ok(())
}

/// Writes simulation results to two CSV files
///
/// # Arguments
/// * `output` - The populated output data
/// * `nodes_output` - The filename of the output nodes csv
/// * `elements_output` - The filename of the output elements csv
pub fn csv_output(
    output: &OutputData,
    nodes_output: &Path,
    elements_output: &Path,
) -> Result<(), HeatFlowError> {
    if output.is_empty() {
        return Err(HeatFlowError::PostProcessor(
            "Nothing to plot, the model has not been solved".to_owned(),
        ));
    }
    output.validate()?;

    let mut nodes_file = create_file(nodes_output)?;
    let mut elements_file = create_file(elements_output)?;

    // Write nodes
    let failed = write_failed(nodes_output);
    writeln!(nodes_file, "x,y,temperature").map_err(&failed)?;
    let temperatures = output.a.iter().step_by(output.dofs_per_node.max(1));
    for ([x, y], t) in std::iter::zip(&output.coords, temperatures) {
        writeln!(nodes_file, "{x},{y},{t}").map_err(&failed)?;
    }
    nodes_file.flush().map_err(&failed)?;

    // Write elements
    let failed = write_failed(elements_output);
    let polygons = element_nodes(output);
    let columns: Vec<String> = (0..polygons.first().map_or(0, |p| p.len()))
        .map(|i| format!("n{i}"))
        .collect();
    writeln!(elements_file, "{},qx,qy,max_flow", columns.join(",")).map_err(&failed)?;
    for ((polygon, q), max_flow) in polygons.iter().zip(&output.qs).zip(&output.max_flow) {
        let indices: Vec<String> = polygon.iter().map(|i| i.to_string()).collect();
        writeln!(
            elements_file,
            "{},{},{},{max_flow}",
            indices.join(","),
            q[0],
            q[1]
        )
        .map_err(&failed)?;
    }
    elements_file.flush().map_err(&failed)?;

    println!(
        "info: wrote output to {} and {}",
        nodes_output.display(),
        elements_output.display()
    );

    Ok(())
}

/// Hands the CSV files to the python plotting script
pub fn pyplot(nodes_csv: &Path, elements_csv: &Path, plotter_path: &Path) -> Result<(), HeatFlowError> {
    println!("info: plotting in python...");
    let status = std::process::Command::new("python")
        .arg(plotter_path)
        .arg(nodes_csv)
        .arg(elements_csv)
        .status();

    match status {
        Ok(s) if s.success() => Ok(()),
        Ok(s) => Err(HeatFlowError::PostProcessor(format!(
            "Plot script exited with {s}"
        ))),
        Err(err) => Err(HeatFlowError::PostProcessor(format!(
            "Unable to run python: {err}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatypes::ElementType;

    fn two_quads() -> OutputData {
        OutputData {
            geometry: None,
            a: vec![0.0, 10.0, 10.0, 0.0, 5.0, 5.0],
            r: vec![0.0; 6],
            ed: vec![vec![0.0, 5.0, 5.0, 0.0], vec![5.0, 10.0, 10.0, 5.0]],
            qs: vec![[-10.0, 0.0], [-10.0, 0.0]],
            qt: vec![[10.0, 0.0], [10.0, 0.0]],
            max_flow: vec![10.0, 10.0],
            flow: vec![[-10.0, 0.0, 0.0], [-10.0, 0.0, 0.0]],
            coords: vec![
                [0.0, 0.0],
                [1.0, 0.0],
                [1.0, 1.0],
                [0.0, 1.0],
                [0.5, 0.0],
                [0.5, 1.0],
            ],
            edof: vec![vec![1, 5, 6, 4], vec![5, 2, 3, 6]],
            dofs_per_node: 1,
            el_type: Some(ElementType::Quad),
        }
    }

    #[test]
    fn vtk_counts_match_mesh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("result.vtk");
        export_vtk(&two_quads(), &path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();

        assert_eq!(lines[0], "# vtk DataFile Version 2.0");
        assert!(lines.contains(&"POINTS 6 double"));
        assert!(lines.contains(&"POLYGONS 2 10"));
        assert!(lines.contains(&"4 0 4 5 3"));
        assert!(lines.contains(&"4 4 1 2 5"));
        assert!(lines.contains(&"POINT_DATA 6"));
        assert!(lines.contains(&"SCALARS pressure double 1"));
        assert!(lines.contains(&"CELL_DATA 2"));
        assert!(lines.contains(&"SCALARS max_flow double 1"));
        assert!(lines.contains(&"VECTORS flow double"));
        assert_eq!(*lines.last().unwrap(), "-10 0 0");
    }

    #[test]
    fn unsolved_output_is_not_exported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.vtk");
        let result = export_vtk(&OutputData::new(), &path);
        assert!(matches!(result, Err(HeatFlowError::PostProcessor(_))));
        assert!(!path.exists());
    }

    #[test]
    fn inconsistent_output_is_not_exported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.vtk");

        let mut zero_dof = two_quads();
        zero_dof.edof[0][0] = 0;
        assert!(matches!(
            export_vtk(&zero_dof, &path),
            Err(HeatFlowError::Input(_))
        ));

        let mut short = two_quads();
        short.max_flow.pop();
        assert!(export_vtk(&short, &path).is_err());
        assert!(!path.exists());

        let nodes = dir.path().join("nodes.csv");
        let elements = dir.path().join("elements.csv");
        assert!(csv_output(&zero_dof, &nodes, &elements).is_err());
        assert!(!nodes.exists());
    }

    #[test]
    fn csv_files_hold_nodes_and_elements() {
        let dir = tempfile::tempdir().unwrap();
        let nodes = dir.path().join("nodes.csv");
        let elements = dir.path().join("elements.csv");
        csv_output(&two_quads(), &nodes, &elements).unwrap();

        let nodes = std::fs::read_to_string(nodes).unwrap();
        assert_eq!(nodes.lines().count(), 7);
        assert!(nodes.starts_with("x,y,temperature\n0,0,0\n1,0,10\n"));

        let elements = std::fs::read_to_string(elements).unwrap();
        let rows: Vec<&str> = elements.lines().collect();
        assert_eq!(rows[0], "n0,n1,n2,n3,qx,qy,max_flow");
        assert_eq!(rows[1], "0,4,5,3,-10,0,10");
    }
}
