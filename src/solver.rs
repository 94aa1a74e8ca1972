use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use indicatif::ProgressBar;
use nalgebra::{DMatrix, DVector};

use crate::{
    datatypes::{ElementType, MeshSettings},
    error::HeatFlowError,
    fem,
    mesher::{GmshMeshGenerator, MeshGenerator},
    model::{InputData, OutputData, SweepParameter},
    post_processor,
};

/// Element type used for every solve
pub const EL_TYPE: ElementType = ElementType::Quad;
/// One temperature unknown per node
pub const DOFS_PER_NODE: usize = 1;

/// `steps` evenly spaced values from `start` to `end`, both included
pub fn linspace(start: f64, end: f64, steps: usize) -> Vec<f64> {
    match steps {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (steps - 1) as f64;
            (0..steps)
                .map(|i| {
                    if i == steps - 1 {
                        end
                    } else {
                        start + step * i as f64
                    }
                })
                .collect()
        }
    }
}

/// Runs the finite element computation for one input data record and
/// stores the results in the paired output data.
pub struct Solver<'a> {
    input_data: &'a mut InputData,
    output_data: &'a mut OutputData,
    mesh_generator: Box<dyn MeshGenerator>,
    verbose: bool,
}

impl<'a> Solver<'a> {
    /// Creates a solver that meshes with gmsh from the PATH
    pub fn new(input_data: &'a mut InputData, output_data: &'a mut OutputData) -> Solver<'a> {
        Solver::with_mesh_generator(input_data, output_data, GmshMeshGenerator::default())
    }

    pub fn with_mesh_generator(
        input_data: &'a mut InputData,
        output_data: &'a mut OutputData,
        mesh_generator: impl MeshGenerator + 'static,
    ) -> Solver<'a> {
        Solver {
            input_data,
            output_data,
            mesh_generator: Box::new(mesh_generator),
            verbose: false,
        }
    }

    /// Turns on per-iteration logging of the linear solve
    pub fn verbose(mut self, verbose: bool) -> Solver<'a> {
        self.verbose = verbose;
        self
    }

    pub fn input_data(&self) -> &InputData {
        &*self.input_data
    }

    pub fn output_data(&self) -> &OutputData {
        &*self.output_data
    }

    /// Meshes the geometry, assembles and solves the system, recovers the
    /// element fluxes and overwrites the output data with the results.
    pub fn execute(&mut self) -> Result<(), HeatFlowError> {
        let ep = self.input_data.ep();
        let d = fem::conductivity_matrix(self.input_data.lx(), self.input_data.ly());

        // Mesh generation
        let geometry = self.input_data.geometry()?;
        let settings = MeshSettings {
            el_type: EL_TYPE,
            dofs_per_node: DOFS_PER_NODE,
            el_size_factor: self.input_data.el_size_factor(),
        };
        let mesh = self.mesh_generator.create(&geometry, &settings)?;
        let (ex, ey) = fem::coordxtr(&mesh);

        // Element matrices
        println!("info: building element matrices...");
        let bar = ProgressBar::new(mesh.edof.len() as u64);
        let mut element_matrices: Vec<DMatrix<f64>> = Vec::with_capacity(mesh.edof.len());
        for (eex, eey) in std::iter::zip(&ex, &ey) {
            bar.inc(1);
            element_matrices.push(fem::element_matrix(mesh.el_type, eex, eey, &ep, &d)?);
        }
        bar.finish_with_message(format!("built {} element matrices", element_matrices.len()));

        // Assembly
        println!("info: assembling system matrix...");
        let n_dofs = mesh.n_dofs();
        let k = fem::assem(n_dofs, &mesh.edof, &element_matrices);

        // Boundary conditions and loads
        let mut f: DVector<f64> = DVector::zeros(n_dofs);
        let mut prescribed: BTreeMap<usize, f64> = BTreeMap::new();

        for (marker, value) in self.input_data.bcs() {
            if !fem::apply_bc(&mesh.bdofs, &mut prescribed, *marker, *value) {
                println!("warning: no boundary nodes carry marker {marker}, skipping its condition");
            }
        }
        for (marker, value) in self.input_data.loads() {
            if !fem::apply_force_total(&mesh.bdofs, &mut f, *marker, *value) {
                println!("warning: no boundary nodes carry marker {marker}, skipping its load");
            }
        }

        if prescribed.is_empty() {
            return Err(HeatFlowError::Solver(
                "No prescribed temperatures, the system is singular".to_owned(),
            ));
        }

        let (a, r) = fem::solveq(&k, &f, &prescribed, self.verbose)?;

        // Element fluxes
        let ed = fem::extract_eldisp(&mesh.edof, &a);

        let mut qs: Vec<[f64; 2]> = Vec::with_capacity(ed.len());
        let mut qt: Vec<[f64; 2]> = Vec::with_capacity(ed.len());
        let mut max_flow: Vec<f64> = Vec::with_capacity(ed.len());
        let mut flow: Vec<[f64; 3]> = Vec::with_capacity(ed.len());
        for ((eex, eey), eed) in ex.iter().zip(&ey).zip(&ed) {
            let (q, gradient) = fem::element_flux(mesh.el_type, eex, eey, &d, eed)?;
            qs.push([q[0], q[1]]);
            qt.push([gradient[0], gradient[1]]);
            max_flow.push(f64::sqrt(f64::powi(q[0], 2) + f64::powi(q[1], 2)));
            flow.push([q[0], q[1], 0.0]);
        }

        *self.output_data = OutputData {
            geometry: Some(geometry),
            a: a.iter().copied().collect(),
            r: r.iter().copied().collect(),
            ed,
            qs,
            qt,
            max_flow,
            flow,
            coords: mesh.coords,
            edof: mesh.edof,
            dofs_per_node: mesh.dofs_per_node,
            el_type: Some(mesh.el_type),
        };

        println!("info: solve complete");

        Ok(())
    }

    /// Sweeps `a` or `b` from its current value to its end value, solving
    /// and exporting one VTK file per step.
    ///
    /// The swept value is restored afterwards, also when a step fails.
    ///
    /// # Arguments
    /// * `output_dir` - Directory receiving `<param_filename>_NN.vtk`
    ///
    /// # Returns
    /// The paths of the written files
    pub fn execute_param_study(&mut self, output_dir: &Path) -> Result<Vec<PathBuf>, HeatFlowError> {
        let old_a = self.input_data.a();
        let old_b = self.input_data.b();

        let result = self.run_param_study(output_dir);

        self.input_data.set_a(old_a);
        self.input_data.set_b(old_b);

        result
    }

    fn run_param_study(&mut self, output_dir: &Path) -> Result<Vec<PathBuf>, HeatFlowError> {
        let (name, start, end) = match self.input_data.sweep_parameter() {
            SweepParameter::A => ("a", self.input_data.a(), self.input_data.a_end()),
            SweepParameter::B => ("b", self.input_data.b(), self.input_data.b_end()),
        };
        let values = linspace(start, end, self.input_data.param_steps());
        let mut written: Vec<PathBuf> = Vec::with_capacity(values.len());

        for (i, value) in values.into_iter().enumerate() {
            println!("info: executing for {name} = {value}...");
            match self.input_data.sweep_parameter() {
                SweepParameter::A => self.input_data.set_a(value),
                SweepParameter::B => self.input_data.set_b(value),
            }

            self.execute()?;

            let filename = output_dir.join(format!(
                "{}_{:02}.vtk",
                self.input_data.param_filename(),
                i + 1
            ));
            self.export_vtk(&filename)?;
            written.push(filename);
        }

        Ok(written)
    }

    /// Exports the current results to a legacy VTK file
    pub fn export_vtk(&self, filename: &Path) -> Result<(), HeatFlowError> {
        post_processor::export_vtk(&*self.output_data, filename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn linspace_includes_both_ends() {
        let values = linspace(0.01, 0.06, 6);
        assert_eq!(values.len(), 6);
        assert_eq!(values[0], 0.01);
        assert_eq!(values[5], 0.06);
        assert_relative_eq!(values[2], 0.03, epsilon = 1e-15);
    }

    #[test]
    fn new_solver_borrows_model_untouched() {
        let mut input = InputData::new();
        input.set_a(0.035);
        let mut output = OutputData::new();

        let solver = Solver::new(&mut input, &mut output).verbose(true);
        assert_eq!(solver.input_data().a(), 0.035);
        assert!(solver.output_data().is_empty());
        assert!(solver.verbose);
    }

    #[test]
    fn linspace_degenerate_counts() {
        assert!(linspace(1.0, 2.0, 0).is_empty());
        assert_eq!(linspace(1.0, 2.0, 1), vec![1.0]);
        assert_eq!(linspace(3.0, 1.0, 3), vec![3.0, 2.0, 1.0]);
    }
}
