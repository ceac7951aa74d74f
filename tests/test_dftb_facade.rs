//! DFTB+ facade against fake `dftb+` and `mpirun` executables.

#![cfg(unix)]

mod common;

use common::{hydrogen, Workspace};
use qcflow::engines::dftbplus::{AnnealingOptions, DftbConfig, DftbEngine, MdOptions, Parallel};
use qcflow::engines::{Engine, RunOptions};
use qcflow::QCError;
use std::fs;

const ENERGY: &str = "echo 'Total Energy:                      -1.0500000000 H          -28.5718 eV'";

const TRAJECTORY: &str = "cat > geo_end.xyz <<'XYZ'\n\
2\nMD iter: 0\nH 0.0 0.0 0.0\nH 0.0 0.0 0.74\n\
2\nMD iter: 100\nH 0.0 0.0 0.0\nH 0.0 0.0 0.80\n\
2\nMD iter: 200\nH 0.0 0.0 0.0\nH 0.0 0.0 0.78\n\
XYZ";

fn dftb(ws: &Workspace, parallel: Parallel, body: &str) -> DftbEngine {
    let exe = ws.fake_engine("dftb+", body);
    let mpirun = ws.fake_engine("mpirun", "echo \"$@\" > mpi_args.txt\nshift 2\nexec \"$@\"");
    let config = DftbConfig {
        parallel,
        ..DftbConfig::default()
    };
    DftbEngine::new(config).with_context(ws.context(|s| {
        s.executables.dftbplus = exe.to_string_lossy().to_string();
        s.executables.mpirun = mpirun.to_string_lossy().to_string();
        s.executables.dftb_param_dir = "/opt/slakos".to_string();
    }))
}

fn keep() -> RunOptions {
    RunOptions {
        remove_tdir: Some(false),
        ..RunOptions::default()
    }
}

#[test]
fn test_spe_without_mpi() {
    let ws = Workspace::new();
    let body = format!("{}\necho \"threads=$OMP_NUM_THREADS\" > env.txt", ENERGY);
    let engine = dftb(&ws, Parallel::NoMpi, &body);
    let mut mol = hydrogen("h2");

    let copy = engine.spe(&mut mol, &keep()).unwrap().unwrap();
    assert_eq!(copy.properties.electronic_energy(), Some(-1.05));

    let scratch = ws.kept_scratch();
    assert!(scratch.file_name().unwrap().to_string_lossy().ends_with("_DFTB3_spe"));
    assert_eq!(fs::read_to_string(scratch.join("env.txt")).unwrap().trim(), "threads=2");
    assert!(scratch.join("h2.gen").is_file());
    let input = fs::read_to_string(scratch.join("dftb_in.hsd")).unwrap();
    assert!(input.contains("<<< \"h2.gen\""));
    assert!(input.contains("Prefix = \"/opt/slakos/3ob/3ob-3-1/\""));
    assert!(!scratch.join("mpi_args.txt").exists());
}

#[test]
fn test_spe_through_mpirun() {
    let ws = Workspace::new();
    let body = format!("{}\necho \"threads=$OMP_NUM_THREADS\" > env.txt", ENERGY);
    let engine = dftb(&ws, Parallel::Mpi, &body);

    let copy = engine.spe(&mut hydrogen("h2"), &keep()).unwrap().unwrap();
    assert_eq!(copy.properties.electronic_energy(), Some(-1.05));

    let scratch = ws.kept_scratch();
    let mpi_args = fs::read_to_string(scratch.join("mpi_args.txt")).unwrap();
    assert!(mpi_args.starts_with("-np 2 "));
    assert!(mpi_args.trim().ends_with("dftb+"));
    assert_eq!(fs::read_to_string(scratch.join("env.txt")).unwrap().trim(), "threads=1");
}

#[test]
fn test_error_marker_is_abnormal_termination() {
    let ws = Workspace::new();
    let engine = dftb(&ws, Parallel::NoMpi, &format!("{}\necho 'ERROR!'", ENERGY));
    let mut mol = hydrogen("h2");

    let err = engine.spe(&mut mol, &RunOptions::inplace()).unwrap_err();
    assert!(matches!(err, QCError::AbnormalTermination { .. }));
    assert_eq!(mol.properties.electronic_energy(), None);
    assert!(ws.scratch_dirs().is_empty());
}

#[test]
fn test_opt_reads_end_geometry() {
    let ws = Workspace::new();
    let body = format!(
        "{}\ncat > geo_end.xyz <<'XYZ'\n2\nGeometry Step: 3\nH 0.0 0.0 0.0\nH 0.0 0.0 0.77\nXYZ",
        ENERGY
    );
    let engine = dftb(&ws, Parallel::NoMpi, &body);
    let mut mol = hydrogen("h2");

    assert!(engine.opt(&mut mol, &RunOptions::inplace()).unwrap().is_none());
    assert!((mol.geometry.coords[5] - 0.77).abs() < 1e-12);
    assert_eq!(mol.properties.electronic_energy(), Some(-1.05));
    assert!(mol.geometry_level_of_theory.is_some());
}

#[test]
fn test_md_trajectory_frames_have_no_energies() {
    let ws = Workspace::new();
    let engine = dftb(&ws, Parallel::NoMpi, &format!("{}\n{}", ENERGY, TRAJECTORY));

    let ensemble = engine.md_nvt(&hydrogen("h2"), &MdOptions::default()).unwrap();
    assert_eq!(ensemble.names(), vec!["h2_0", "h2_1", "h2_2"]);
    assert_eq!(ensemble.energies(), vec![None, None, None]);
}

#[test]
fn test_annealing_keeps_last_frame() {
    let ws = Workspace::new();
    let engine = dftb(&ws, Parallel::NoMpi, &format!("{}\n{}", ENERGY, TRAJECTORY));
    let mut mol = hydrogen("h2");
    let opts = AnnealingOptions {
        run: RunOptions::inplace(),
        ..AnnealingOptions::default()
    };

    assert!(engine.simulated_annealing(&mut mol, &opts).unwrap().is_none());
    assert!((mol.geometry.coords[5] - 0.78).abs() < 1e-12);
    assert_eq!(mol.name, "h2");
}
