use std::path::{Path, PathBuf};

use crate::{error::HeatFlowError, model::Model, solver::linspace};

pub const JOB_RANGE_START: f64 = 0.01;
pub const JOB_RANGE_END: f64 = 0.06;
pub const JOB_RANGE_COUNT: usize = 10;
/// Coarser mesh used for batch runs
pub const JOB_EL_SIZE_FACTOR: f64 = 0.05;

/// Hole sizes swept by default, for both `a` and `b`
pub fn default_job_range() -> Vec<f64> {
    linspace(JOB_RANGE_START, JOB_RANGE_END, JOB_RANGE_COUNT)
}

/// Writes one model file per (a, b) pair into its own job directory
///
/// Pairs are visited with `a` in the outer loop. Job `k` lands in
/// `base/job_k/temp_model_k.json`; existing directories are reused and
/// existing files overwritten.
///
/// # Arguments
/// * `base` - Directory receiving the `job_k` directories
/// * `model` - Template model; its `a` and `b` are left at the last pair
/// * `a_values` - Hole widths
/// * `b_values` - Hole heights
///
/// # Returns
/// The paths of the written model files, in job order
pub fn setup_jobs(
    base: &Path,
    model: &mut Model,
    a_values: &[f64],
    b_values: &[f64],
) -> Result<Vec<PathBuf>, HeatFlowError> {
    let mut written: Vec<PathBuf> = Vec::with_capacity(a_values.len() * b_values.len());
    let mut job_number: usize = 0;

    for a in a_values {
        for b in b_values {
            model.input_data.set_a(*a);
            model.input_data.set_b(*b);

            let job_dir = base.join(format!("job_{job_number}"));
            if !job_dir.exists() {
                if let Err(err) = std::fs::create_dir_all(&job_dir) {
                    return Err(HeatFlowError::Input(format!(
                        "Failed to create {}: {err}",
                        job_dir.display()
                    )));
                }
            }

            let filename = job_dir.join(format!("temp_model_{job_number}.json"));
            model.save(&filename)?;
            written.push(filename);

            job_number += 1;
        }
    }

    println!("info: wrote {} job files to {}", written.len(), base.display());

    Ok(written)
}
