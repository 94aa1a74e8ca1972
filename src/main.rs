use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use heatflow::{
    error::HeatFlowError,
    jobs,
    mesher::GmshMeshGenerator,
    model::{Model, Scalar},
    post_processor,
    report::Report,
    solver::Solver,
};

#[derive(Parser, Debug)]
#[command(name = "heatflow", version)]
#[command(about = "Steady heat flow through a plate with a rectangular hole")]
struct Args {
    /// Path to the gmsh executable
    #[arg(long, global = true, default_value = "gmsh")]
    gmsh: String,

    /// Log every conjugate gradient iteration
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Solve one model and save it together with its results
    Solve {
        /// Model or input data json
        input: PathBuf,
        /// Model json receiving input and results
        output: PathBuf,
        /// Optional VTK file for the results
        vtk: Option<PathBuf>,
        /// Override a scalar parameter, e.g. --set a=0.02
        #[arg(long = "set", value_name = "NAME=VALUE", value_parser = parse_assignment)]
        set: Vec<(Scalar, String)>,
        /// Print the report after solving
        #[arg(long)]
        report: bool,
    },
    /// Run the parameter study configured in a model
    Sweep {
        /// Model or input data json
        input: PathBuf,
        /// Directory receiving the VTK files
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
    /// Write one model file per hole size pair into job directories
    SetupJobs {
        /// Directory receiving the job_N directories
        #[arg(default_value = ".")]
        dir: PathBuf,
    },
    /// Print a solved or unsolved model as tables
    Report {
        /// Model json
        model: PathBuf,
    },
    /// Plot the temperature field of a solved model
    Plot {
        /// Model json
        model: PathBuf,
        /// Python plotting script
        #[arg(long, default_value = "scripts/plot.py")]
        script: PathBuf,
    },
}

fn parse_assignment(s: &str) -> Result<(Scalar, String), String> {
    match s.split_once('=') {
        Some((name, value)) => match name.parse::<Scalar>() {
            Ok(scalar) => Ok((scalar, value.to_owned())),
            Err(err) => Err(err.to_string()),
        },
        None => Err(format!("expected NAME=VALUE, got '{s}'")),
    }
}

fn solve(
    args: &Args,
    input: &Path,
    output: &Path,
    vtk: Option<&Path>,
    set: &[(Scalar, String)],
    report: bool,
) -> Result<(), HeatFlowError> {
    let mut model = Model::load(input)?;
    for (scalar, value) in set {
        model.input_data.set_scalar(*scalar, value);
    }

    let Model {
        input_data,
        output_data,
    } = &mut model;
    let mut solver =
        Solver::with_mesh_generator(input_data, output_data, GmshMeshGenerator::new(&args.gmsh))
            .verbose(args.verbose);
    solver.execute()?;
    if let Some(vtk) = vtk {
        solver.export_vtk(vtk)?;
    }

    model.save(output)?;
    println!("info: saved model to {}", output.display());

    if report {
        println!("{}", Report::new(&model.input_data, &model.output_data));
    }

    Ok(())
}

fn sweep(args: &Args, input: &Path, out_dir: &Path) -> Result<(), HeatFlowError> {
    let mut model = Model::load(input)?;

    let Model {
        input_data,
        output_data,
    } = &mut model;
    let mut solver =
        Solver::with_mesh_generator(input_data, output_data, GmshMeshGenerator::new(&args.gmsh))
            .verbose(args.verbose);
    let written = solver.execute_param_study(out_dir)?;

    println!("info: wrote {} result files", written.len());

    Ok(())
}

fn setup_jobs(dir: &Path) -> Result<(), HeatFlowError> {
    println!("info: creating empty model...");
    let mut model = Model::new();
    model
        .input_data
        .set_el_size_factor(jobs::JOB_EL_SIZE_FACTOR);

    let range = jobs::default_job_range();
    jobs::setup_jobs(dir, &mut model, &range, &range)?;

    Ok(())
}

fn report(model: &Path) -> Result<(), HeatFlowError> {
    let model = Model::load(model)?;
    println!("{}", Report::new(&model.input_data, &model.output_data));
    Ok(())
}

fn plot(model: &Path, script: &Path) -> Result<(), HeatFlowError> {
    let model = Model::load(model)?;

    let nodes_output = Path::new("nodes.csv");
    let elements_output = Path::new("elements.csv");
    post_processor::csv_output(&model.output_data, nodes_output, elements_output)?;
    let result = post_processor::pyplot(nodes_output, elements_output, script);

    for file in [nodes_output, elements_output] {
        if let Err(err) = std::fs::remove_file(file) {
            println!("warning: failed to delete {}: {err}", file.display());
        }
    }

    result
}

fn main() {
    let args = Args::parse();

    let result = match &args.command {
        Command::Solve {
            input,
            output,
            vtk,
            set,
            report,
        } => solve(&args, input, output, vtk.as_deref(), set, *report),
        Command::Sweep { input, out_dir } => sweep(&args, input, out_dir),
        Command::SetupJobs { dir } => setup_jobs(dir),
        Command::Report { model } => report(model),
        Command::Plot { model, script } => plot(model, script),
    };

    if let Err(err) = result {
        println!("error: {err}");
        std::process::exit(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solve_takes_mesh_density_override() {
        let args = Args::try_parse_from([
            "heatflow",
            "solve",
            "in.json",
            "out.json",
            "--set",
            "el_size_factor=0.05",
            "--set",
            "a=0.02",
        ])
        .unwrap();

        match args.command {
            Command::Solve { set, vtk, .. } => {
                assert!(vtk.is_none());
                assert_eq!(
                    set,
                    vec![
                        (Scalar::ElSizeFactor, "0.05".to_owned()),
                        (Scalar::A, "0.02".to_owned())
                    ]
                );
            }
            other => panic!("parsed {other:?}"),
        }
    }

    #[test]
    fn unknown_assignment_is_rejected() {
        assert!(parse_assignment("depth=3").is_err());
        assert!(parse_assignment("a").is_err());
        assert!(Args::try_parse_from(["heatflow", "solve", "in.json"]).is_err());
    }
}
