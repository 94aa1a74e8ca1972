use std::collections::BTreeMap;

use indicatif::ProgressBar;
use nalgebra::{matrix, DMatrix, DVector, Matrix2, SMatrix, Vector2};
use nalgebra_sparse::{CooMatrix, CsrMatrix};

use argmin::{
    core::{
        observers::{Observe, ObserverMode},
        ArgminFloat, Error, Executor, Operator, State, KV,
    },
    solver::conjugategradient::ConjugateGradient,
};
use argmin_observer_slog::SlogLogger;

use crate::{
    datatypes::{ElementProperties, ElementType, Mesh},
    error::HeatFlowError,
};

pub const MAX_CG_ITER: u64 = 1e7 as u64;
/// Conjugate gradient stops once the residual norm drops below this
/// fraction of the right-hand side norm
pub const CG_RELATIVE_TOLERANCE: f64 = 1e-12;
/// Iterations between log lines when solver logging is on
pub const CG_LOG_INTERVAL: u64 = 50;

const DEGENERATE_TOLERANCE: f64 = 1e-300;

/// Runs multiplication for Conjugate Gradient Solver
struct ConjugateGradientOperator<'a> {
    a: &'a CsrMatrix<f64>,
}

impl<'a> Operator for ConjugateGradientOperator<'a> {
    type Param = Vec<f64>;
    type Output = Vec<f64>;

    fn apply(&self, x: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
        Ok(csr_mul(self.a, x))
    }
}

/// Observer bar for argmin solver
struct ConjugateGradientObserverBar {
    bar: ProgressBar,
    final_mag: f64,
}

impl ConjugateGradientObserverBar {
    fn new(target_cost: f64) -> ConjugateGradientObserverBar {
        ConjugateGradientObserverBar {
            bar: ProgressBar::new(1000),
            final_mag: target_cost.log10().floor(),
        }
    }

    fn argmin_float_to_f64<F: ArgminFloat>(&self, value: F) -> Option<f64> {
        // ArgminFloat offers no direct f64 conversion
        match format!("{:?}", value).parse() {
            Ok(n) => Some(n),
            Err(_) => None,
        }
    }
}

impl<I> Observe<I> for ConjugateGradientObserverBar
where
    I: State,
{
    fn observe_init(&mut self, _name: &str, _state: &I, _kv: &KV) -> Result<(), Error> {
        Ok(())
    }

    fn observe_iter(&mut self, state: &I, _kv: &KV) -> Result<(), Error> {
        let cost = match self.argmin_float_to_f64(state.get_cost()) {
            Some(c) => c,
            None => return Ok(()), // skip if we can't parse
        };
        let cost_mag = cost.log10().floor();
        let progress = (1000. / f64::sqrt(cost_mag - self.final_mag)) as u64;
        self.bar.set_position(progress);

        Ok(())
    }

    fn observe_final(&mut self, _state: &I) -> Result<(), Error> {
        self.bar.finish();
        Ok(())
    }
}

/// Multiplies a sparse matrix with a dense vector
pub fn csr_mul(a: &CsrMatrix<f64>, x: &[f64]) -> Vec<f64> {
    a.row_iter()
        .map(|row| {
            row.col_indices()
                .iter()
                .zip(row.values())
                .map(|(col, value)| value * x[*col])
                .sum()
        })
        .collect()
}

/// Solves a symmetric positive definite system with the conjugate gradient
/// method.
///
/// # Arguments
/// * `a` - A square positive definite matrix
/// * `b` - The right-hand side
/// * `verbose` - Log every few iterations through slog
///
/// # Returns
/// A DVector that represents `x` from the system `Ax=b`
fn run_conjugate_gradient(
    a: &CsrMatrix<f64>,
    b: &DVector<f64>,
    verbose: bool,
) -> Result<DVector<f64>, HeatFlowError> {
    let b_norm = b.norm();
    if b_norm == 0.0 {
        return Ok(DVector::zeros(b.nrows()));
    }
    let target_cost = CG_RELATIVE_TOLERANCE * b_norm;

    let b_flat: Vec<f64> = b.iter().copied().collect();
    let solver: ConjugateGradient<_, f64> = ConjugateGradient::new(b_flat);
    let initial_guess: Vec<f64> = vec![0.0; b.nrows()];

    let operator = ConjugateGradientOperator { a };
    let observer = ConjugateGradientObserverBar::new(target_cost);

    let mut executor = Executor::new(operator, solver)
        .configure(|state| {
            state
                .param(initial_guess)
                .max_iters(MAX_CG_ITER)
                .target_cost(target_cost)
        })
        .add_observer(observer, ObserverMode::NewBest);
    if verbose {
        executor = executor.add_observer(SlogLogger::term(), ObserverMode::Every(CG_LOG_INTERVAL));
    }

    // Run solver
    let res = match executor.run() {
        Ok(r) => r,
        Err(err) => {
            return Err(HeatFlowError::Solver(format!(
                "Conjugate Gradient error: {err}"
            )))
        }
    };

    let best_param = match &res.state().best_param {
        Some(vec) => DVector::from_vec(vec.clone()),
        None => {
            return Err(HeatFlowError::Solver(
                "Conjugate Gradient could not produce best parameter".to_owned(),
            ))
        }
    };

    if best_param.iter().any(|v| !v.is_finite()) {
        return Err(HeatFlowError::Solver(
            "Conjugate Gradient diverged; check that every region is constrained".to_owned(),
        ));
    }

    Ok(best_param)
}

/// Diagonal conductivity matrix
pub fn conductivity_matrix(lx: f64, ly: f64) -> Matrix2<f64> {
    matrix![
        lx, 0.0;
        0.0, ly;
    ]
}

/// Splits element topology into per-element x and y coordinate rows
///
/// # Returns
/// The element x coordinates and y coordinates, in that order
pub fn coordxtr(mesh: &Mesh) -> (Vec<Vec<f64>>, Vec<Vec<f64>>) {
    let mut ex: Vec<Vec<f64>> = Vec::with_capacity(mesh.edof.len());
    let mut ey: Vec<Vec<f64>> = Vec::with_capacity(mesh.edof.len());

    for topo in &mesh.edof {
        let nodes = topo
            .iter()
            .step_by(mesh.dofs_per_node)
            .map(|dof| (dof - 1) / mesh.dofs_per_node);

        let (x, y): (Vec<f64>, Vec<f64>) = nodes
            .map(|n| (mesh.coords[n][0], mesh.coords[n][1]))
            .unzip();
        ex.push(x);
        ey.push(y);
    }

    (ex, ey)
}

/// Calculates the signed area of a triangle
pub fn compute_triangle_area(ex: &[f64; 3], ey: &[f64; 3]) -> f64 {
    0.5 * (ex[0] * (ey[1] - ey[2]) + ex[1] * (ey[2] - ey[0]) + ex[2] * (ey[0] - ey[1]))
}

/// Calculates the temperature gradient matrix of a linear triangle
///
/// # Returns
/// A 2x3 gradient matrix and the signed element area
pub fn triangle_gradient_matrix(
    ex: &[f64; 3],
    ey: &[f64; 3],
) -> Result<(SMatrix<f64, 2, 3>, f64), HeatFlowError> {
    let area = compute_triangle_area(ex, ey);
    if area.abs() < DEGENERATE_TOLERANCE {
        return Err(HeatFlowError::Solver(format!(
            "Degenerate triangle at ({}, {})",
            ex[0], ey[0]
        )));
    }

    let beta_1 = ey[1] - ey[2];
    let beta_2 = ey[2] - ey[0];
    let beta_3 = ey[0] - ey[1];

    let gamma_1 = ex[2] - ex[1];
    let gamma_2 = ex[0] - ex[2];
    let gamma_3 = ex[1] - ex[0];

    let mut gradient_mat: SMatrix<f64, 2, 3> = matrix![
        beta_1, beta_2, beta_3;
        gamma_1, gamma_2, gamma_3;
    ];

    gradient_mat /= 2.0 * area;

    Ok((gradient_mat, area))
}

/// Computes the conductivity matrix of a linear triangle
///
/// # Arguments
/// * `ex` - Node x coordinates
/// * `ey` - Node y coordinates
/// * `thickness` - The element thickness
/// * `d` - The material conductivity matrix
pub fn triangle_element(
    ex: &[f64; 3],
    ey: &[f64; 3],
    thickness: f64,
    d: &Matrix2<f64>,
) -> Result<SMatrix<f64, 3, 3>, HeatFlowError> {
    let (b, area) = triangle_gradient_matrix(ex, ey)?;
    Ok(b.transpose() * d * b * area.abs() * thickness)
}

/// 1D Gauss-Legendre points and weights
pub fn gauss_points(integration_rule: usize) -> Result<Vec<(f64, f64)>, HeatFlowError> {
    match integration_rule {
        1 => Ok(vec![(0.0, 2.0)]),
        2 => {
            let g = 1.0 / f64::sqrt(3.0);
            Ok(vec![(-g, 1.0), (g, 1.0)])
        }
        3 => {
            let g = f64::sqrt(0.6);
            Ok(vec![(-g, 5.0 / 9.0), (0.0, 8.0 / 9.0), (g, 5.0 / 9.0)])
        }
        other => Err(HeatFlowError::Input(format!(
            "Integration rule must be 1, 2 or 3, got {other}"
        ))),
    }
}

/// Calculates the temperature gradient matrix of a bilinear quad at a point
/// of the reference square
///
/// # Returns
/// A 2x4 gradient matrix and the Jacobian determinant
pub fn quad_gradient_matrix(
    ex: &[f64; 4],
    ey: &[f64; 4],
    xi: f64,
    eta: f64,
) -> Result<(SMatrix<f64, 2, 4>, f64), HeatFlowError> {
    let shape_derivatives: SMatrix<f64, 2, 4> = matrix![
        -(1.0 - eta), 1.0 - eta, 1.0 + eta, -(1.0 + eta);
        -(1.0 - xi), -(1.0 + xi), 1.0 + xi, 1.0 - xi;
    ] * 0.25;

    let coords: SMatrix<f64, 4, 2> = matrix![
        ex[0], ey[0];
        ex[1], ey[1];
        ex[2], ey[2];
        ex[3], ey[3];
    ];

    let jacobian = shape_derivatives * coords;
    let det = jacobian.determinant();

    let inverse = match jacobian.try_inverse() {
        Some(inv) if det.abs() > DEGENERATE_TOLERANCE => inv,
        _ => {
            return Err(HeatFlowError::Solver(format!(
                "Degenerate quad at ({}, {})",
                ex[0], ey[0]
            )))
        }
    };

    Ok((inverse * shape_derivatives, det))
}

/// Computes the conductivity matrix of a bilinear quad by Gauss integration
pub fn quad_element(
    ex: &[f64; 4],
    ey: &[f64; 4],
    ep: &ElementProperties,
    d: &Matrix2<f64>,
) -> Result<SMatrix<f64, 4, 4>, HeatFlowError> {
    let points = gauss_points(ep.integration_rule)?;
    let mut ke: SMatrix<f64, 4, 4> = SMatrix::zeros();

    for &(xi, w_xi) in &points {
        for &(eta, w_eta) in &points {
            let (b, det) = quad_gradient_matrix(ex, ey, xi, eta)?;
            ke += b.transpose() * d * b * det.abs() * w_xi * w_eta;
        }
    }

    Ok(ke * ep.thickness)
}

fn element_coords<const N: usize>(ex: &[f64], ey: &[f64]) -> Result<([f64; N], [f64; N]), HeatFlowError> {
    match (<[f64; N]>::try_from(ex), <[f64; N]>::try_from(ey)) {
        (Ok(x), Ok(y)) => Ok((x, y)),
        _ => Err(HeatFlowError::Solver(format!(
            "Element has {} nodes, expected {N}",
            ex.len()
        ))),
    }
}

/// Computes the element conductivity matrix for any supported element type
pub fn element_matrix(
    el_type: ElementType,
    ex: &[f64],
    ey: &[f64],
    ep: &ElementProperties,
    d: &Matrix2<f64>,
) -> Result<DMatrix<f64>, HeatFlowError> {
    match el_type {
        ElementType::Triangle => {
            let (x, y) = element_coords::<3>(ex, ey)?;
            let ke = triangle_element(&x, &y, ep.thickness, d)?;
            Ok(DMatrix::from_column_slice(3, 3, ke.as_slice()))
        }
        ElementType::Quad => {
            let (x, y) = element_coords::<4>(ex, ey)?;
            let ke = quad_element(&x, &y, ep, d)?;
            Ok(DMatrix::from_column_slice(4, 4, ke.as_slice()))
        }
    }
}

/// Computes the heat flux `-D grad T` and the gradient at the element centre
///
/// # Returns
/// The flux and the gradient, in that order
pub fn element_flux(
    el_type: ElementType,
    ex: &[f64],
    ey: &[f64],
    d: &Matrix2<f64>,
    ed: &[f64],
) -> Result<(Vector2<f64>, Vector2<f64>), HeatFlowError> {
    let gradient = match el_type {
        ElementType::Triangle => {
            let (x, y) = element_coords::<3>(ex, ey)?;
            let (b, _) = triangle_gradient_matrix(&x, &y)?;
            b * SMatrix::<f64, 3, 1>::from_column_slice(&ed[..3])
        }
        ElementType::Quad => {
            let (x, y) = element_coords::<4>(ex, ey)?;
            let (b, _) = quad_gradient_matrix(&x, &y, 0.0, 0.0)?;
            b * SMatrix::<f64, 4, 1>::from_column_slice(&ed[..4])
        }
    };

    Ok((-(d * gradient), gradient))
}

/// Compiles element matrices into the global sparse matrix
///
/// # Arguments
/// * `n_dofs` - The number of global degrees of freedom
/// * `edof` - 1-based dof numbers of each element
/// * `element_matrices` - Element matrices in the order of `edof`
pub fn assem(
    n_dofs: usize,
    edof: &[Vec<usize>],
    element_matrices: &[DMatrix<f64>],
) -> CsrMatrix<f64> {
    let mut coo = CooMatrix::new(n_dofs, n_dofs);

    let bar = ProgressBar::new(edof.len() as u64);
    for (topo, ke) in std::iter::zip(edof, element_matrices) {
        bar.inc(1);

        for (local_row, global_row) in topo.iter().enumerate() {
            for (local_col, global_col) in topo.iter().enumerate() {
                coo.push(global_row - 1, global_col - 1, ke[(local_row, local_col)]);
            }
        }
    }
    bar.finish_with_message("assembled");

    CsrMatrix::from(&coo)
}

/// Prescribes `value` on every dof of a boundary marker
///
/// # Returns
/// false when the mesh has no dofs on that marker
pub fn apply_bc(
    bdofs: &BTreeMap<i32, Vec<usize>>,
    prescribed: &mut BTreeMap<usize, f64>,
    marker: i32,
    value: f64,
) -> bool {
    match bdofs.get(&marker) {
        Some(dofs) if !dofs.is_empty() => {
            for dof in dofs {
                prescribed.insert(*dof, value);
            }
            true
        }
        _ => false,
    }
}

/// Spreads a total load evenly over the dofs of a boundary marker
///
/// # Returns
/// false when the mesh has no dofs on that marker
pub fn apply_force_total(
    bdofs: &BTreeMap<i32, Vec<usize>>,
    f: &mut DVector<f64>,
    marker: i32,
    value: f64,
) -> bool {
    match bdofs.get(&marker) {
        Some(dofs) if !dofs.is_empty() => {
            let share = value / dofs.len() as f64;
            for dof in dofs {
                f[dof - 1] += share;
            }
            true
        }
        _ => false,
    }
}

/// Solves `K a = f` with prescribed values on some dofs.
///
/// # Arguments
/// * `k` - The global conductivity matrix
/// * `f` - The global load vector
/// * `prescribed` - Prescribed value per 1-based dof
/// * `verbose` - Log solver iterations
///
/// # Returns
/// The nodal values and the reactions `K a - f`, in that order
pub fn solveq(
    k: &CsrMatrix<f64>,
    f: &DVector<f64>,
    prescribed: &BTreeMap<usize, f64>,
    verbose: bool,
) -> Result<(DVector<f64>, DVector<f64>), HeatFlowError> {
    let n_dofs = k.nrows();
    if k.ncols() != n_dofs || f.nrows() != n_dofs {
        return Err(HeatFlowError::Solver(format!(
            "System size mismatch: K is {}x{}, f has {} rows",
            k.nrows(),
            k.ncols(),
            f.nrows()
        )));
    }

    let mut a: DVector<f64> = DVector::zeros(n_dofs);
    let mut is_prescribed = vec![false; n_dofs];
    for (dof, value) in prescribed {
        if *dof == 0 || *dof > n_dofs {
            return Err(HeatFlowError::Solver(format!(
                "Prescribed dof {dof} outside 1..={n_dofs}"
            )));
        }
        a[dof - 1] = *value;
        is_prescribed[dof - 1] = true;
    }

    let free: Vec<usize> = (0..n_dofs).filter(|i| !is_prescribed[*i]).collect();
    let mut free_index: Vec<Option<usize>> = vec![None; n_dofs];
    for (i, dof) in free.iter().enumerate() {
        free_index[*dof] = Some(i);
    }

    // Move the prescribed columns to the right-hand side
    let mut k_free = CooMatrix::new(free.len(), free.len());
    let mut rhs: DVector<f64> = DVector::zeros(free.len());
    for (row, lane) in k.row_iter().enumerate() {
        let free_row = match free_index[row] {
            Some(r) => r,
            None => continue,
        };
        rhs[free_row] += f[row];

        for (col, value) in lane.col_indices().iter().zip(lane.values()) {
            match free_index[*col] {
                Some(free_col) => k_free.push(free_row, free_col, *value),
                None => rhs[free_row] -= value * a[*col],
            }
        }
    }

    if !free.is_empty() {
        let start = std::time::Instant::now();

        println!("info: solving for {} free dofs...", free.len());
        let solution = run_conjugate_gradient(&CsrMatrix::from(&k_free), &rhs, verbose)?;

        let elapsed = (std::time::Instant::now() - start).as_secs_f32();
        println!("info: solved system in {:.3} seconds", elapsed);

        for (i, dof) in free.iter().enumerate() {
            a[*dof] = solution[i];
        }
    }

    let ka = DVector::from_vec(csr_mul(k, a.as_slice()));
    let r = ka - f;

    Ok((a, r))
}

/// Gathers the nodal values of each element
pub fn extract_eldisp(edof: &[Vec<usize>], a: &DVector<f64>) -> Vec<Vec<f64>> {
    edof.iter()
        .map(|topo| topo.iter().map(|dof| a[dof - 1]).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn identity() -> Matrix2<f64> {
        conductivity_matrix(1.0, 1.0)
    }

    #[test]
    fn right_triangle_matrix() {
        let ke = triangle_element(&[0.0, 1.0, 0.0], &[0.0, 0.0, 1.0], 1.0, &identity()).unwrap();
        let expected: SMatrix<f64, 3, 3> = matrix![
            1.0, -0.5, -0.5;
            -0.5, 0.5, 0.0;
            -0.5, 0.0, 0.5;
        ];
        assert_relative_eq!(ke, expected, epsilon = 1e-14);
    }

    #[test]
    fn clockwise_triangle_gives_same_matrix() {
        let ccw = triangle_element(&[0.0, 1.0, 0.0], &[0.0, 0.0, 1.0], 2.0, &identity()).unwrap();
        let cw = triangle_element(&[0.0, 0.0, 1.0], &[0.0, 1.0, 0.0], 2.0, &identity()).unwrap();
        assert_relative_eq!(ccw[(0, 0)], cw[(0, 0)], epsilon = 1e-14);
        assert_relative_eq!(ccw[(1, 1)], cw[(2, 2)], epsilon = 1e-14);
    }

    #[test]
    fn unit_square_quad_matrix() {
        let ep = ElementProperties {
            thickness: 1.0,
            integration_rule: 2,
        };
        let ke = quad_element(&[0.0, 1.0, 1.0, 0.0], &[0.0, 0.0, 1.0, 1.0], &ep, &identity()).unwrap();
        let expected: SMatrix<f64, 4, 4> = matrix![
            4.0, -1.0, -2.0, -1.0;
            -1.0, 4.0, -1.0, -2.0;
            -2.0, -1.0, 4.0, -1.0;
            -1.0, -2.0, -1.0, 4.0;
        ] / 6.0;
        assert_relative_eq!(ke, expected, epsilon = 1e-14);
    }

    #[test]
    fn quad_rows_sum_to_zero_for_every_rule() {
        let ex = [0.0, 2.0, 2.5, -0.3];
        let ey = [0.0, 0.2, 1.7, 1.1];
        let d = conductivity_matrix(1.7, 0.4);
        for rule in 1..=3 {
            let ep = ElementProperties {
                thickness: 0.5,
                integration_rule: rule,
            };
            let ke = quad_element(&ex, &ey, &ep, &d).unwrap();
            for row in 0..4 {
                assert_relative_eq!(ke.row(row).sum(), 0.0, epsilon = 1e-12);
            }
            assert_relative_eq!(ke, ke.transpose(), epsilon = 1e-12);
        }
    }

    #[test]
    fn unsupported_rule_is_rejected() {
        assert!(gauss_points(0).is_err());
        assert!(gauss_points(4).is_err());
    }

    #[test]
    fn collapsed_elements_are_rejected() {
        assert!(triangle_element(&[0.0, 1.0, 2.0], &[0.0, 1.0, 2.0], 1.0, &identity()).is_err());
        let ep = ElementProperties::default();
        assert!(quad_element(&[0.0, 1.0, 1.0, 0.0], &[0.0; 4], &ep, &identity()).is_err());
    }

    #[test]
    fn flux_opposes_gradient() {
        let d = conductivity_matrix(2.0, 3.0);
        // T = 4x - y
        let ex = [0.0, 1.0, 1.0, 0.0];
        let ey = [0.0, 0.0, 1.0, 1.0];
        let ed = [0.0, 4.0, 3.0, -1.0];

        let (q, grad) = element_flux(ElementType::Quad, &ex, &ey, &d, &ed).unwrap();
        assert_relative_eq!(grad[0], 4.0, epsilon = 1e-12);
        assert_relative_eq!(grad[1], -1.0, epsilon = 1e-12);
        assert_relative_eq!(q[0], -8.0, epsilon = 1e-12);
        assert_relative_eq!(q[1], 3.0, epsilon = 1e-12);

        let (q, _) = element_flux(ElementType::Triangle, &ex[..3], &ey[..3], &d, &ed[..3]).unwrap();
        assert_relative_eq!(q[0], -8.0, epsilon = 1e-12);
        assert_relative_eq!(q[1], 3.0, epsilon = 1e-12);
    }

    #[test]
    fn assembly_sums_shared_entries() {
        let ke = DMatrix::from_row_slice(2, 2, &[1.0, -1.0, -1.0, 1.0]);
        let k = assem(3, &[vec![1, 2], vec![2, 3]], &[ke.clone(), ke]);

        let dense = DMatrix::from(&k);
        let expected = DMatrix::from_row_slice(3, 3, &[1.0, -1.0, 0.0, -1.0, 2.0, -1.0, 0.0, -1.0, 1.0]);
        assert_eq!(dense, expected);
    }

    #[test]
    fn loads_are_split_over_marker_dofs() {
        let mut bdofs = BTreeMap::new();
        bdofs.insert(5, vec![1, 3]);
        let mut f = DVector::zeros(3);

        assert!(apply_force_total(&bdofs, &mut f, 5, 10.0));
        assert!(!apply_force_total(&bdofs, &mut f, 6, 10.0));
        assert_eq!(f.as_slice(), &[5.0, 0.0, 5.0]);

        let mut prescribed = BTreeMap::new();
        assert!(apply_bc(&bdofs, &mut prescribed, 5, 20.0));
        assert!(!apply_bc(&bdofs, &mut prescribed, 7, 20.0));
        assert_eq!(prescribed.get(&3), Some(&20.0));
    }

    #[test]
    fn chain_with_prescribed_ends() {
        // Three springs in series, ends held at 0 and 3
        let ke = DMatrix::from_row_slice(2, 2, &[1.0, -1.0, -1.0, 1.0]);
        let k = assem(4, &[vec![1, 2], vec![2, 3], vec![3, 4]], &[ke.clone(), ke.clone(), ke]);
        let f = DVector::zeros(4);
        let mut prescribed = BTreeMap::new();
        prescribed.insert(1, 0.0);
        prescribed.insert(4, 3.0);

        let (a, r) = solveq(&k, &f, &prescribed, false).unwrap();

        assert_relative_eq!(a[1], 1.0, epsilon = 1e-9);
        assert_relative_eq!(a[2], 2.0, epsilon = 1e-9);
        assert_relative_eq!(r[0], -1.0, epsilon = 1e-9);
        assert_relative_eq!(r[3], 1.0, epsilon = 1e-9);
        assert_relative_eq!(r[1], 0.0, epsilon = 1e-9);
    }

    #[test]
    fn fully_prescribed_system_skips_the_solve() {
        let ke = DMatrix::from_row_slice(2, 2, &[2.0, -2.0, -2.0, 2.0]);
        let k = assem(2, &[vec![1, 2]], &[ke]);
        let mut prescribed = BTreeMap::new();
        prescribed.insert(1, 1.0);
        prescribed.insert(2, 4.0);

        let (a, r) = solveq(&k, &DVector::zeros(2), &prescribed, false).unwrap();
        assert_eq!(a.as_slice(), &[1.0, 4.0]);
        assert_eq!(r.as_slice(), &[-6.0, 6.0]);
    }

    #[test]
    fn prescribed_dof_out_of_range() {
        let k = assem(1, &[vec![1]], &[DMatrix::from_element(1, 1, 1.0)]);
        let mut prescribed = BTreeMap::new();
        prescribed.insert(2, 1.0);
        assert!(matches!(
            solveq(&k, &DVector::zeros(1), &prescribed, false),
            Err(HeatFlowError::Solver(_))
        ));
    }

    #[test]
    fn element_values_follow_topology() {
        let a = DVector::from_vec(vec![10.0, 20.0, 30.0]);
        let ed = extract_eldisp(&[vec![3, 1], vec![2, 3]], &a);
        assert_eq!(ed, vec![vec![30.0, 10.0], vec![20.0, 30.0]]);
    }
}
