//! qcflow Command-Line Interface
//!
//! Thin command-line front end over the library: settings template creation,
//! input rendering, log parsing and single calculations.
//!
//! # Usage
//!
//! ```bash
//! # Create a commented settings template
//! qcflow ci qcflow_config.cfg
//!
//! # Print the ORCA single point input for a structure
//! qcflow render orca water.xyz 0 1
//!
//! # Parse a finished log and print the properties as JSON
//! qcflow parse orca output.out water.xyz
//!
//! # Run a calculation
//! qcflow run xtb opt water.xyz 0 1
//! ```

use qcflow::engines::dftbplus::{DftbConfig, DftbEngine};
use qcflow::engines::orca::{OrcaEngine, SpeOptions};
use qcflow::engines::xtb::XtbEngine;
use qcflow::engines::{Engine, EngineContext, RunOptions};
use qcflow::parser::dftbplus::DftbLogParser;
use qcflow::parser::orca::OrcaLogParser;
use qcflow::parser::xtb::XtbLogParser;
use qcflow::parser::{read_log, ParsedLog};
use qcflow::settings::{SettingsManager, CONFIG_FILE_NAME};
use qcflow::Molecule;
use std::env;
use std::error::Error;
use std::path::Path;
use std::process;

fn main() {
    let settings = match SettingsManager::load() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error loading settings: {}", e);
            process::exit(1);
        }
    };

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(settings.logging().level.as_str()),
    )
    .target(env_logger::Target::Stdout)
    .format_timestamp_millis()
    .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        print_usage(&args[0]);
        process::exit(if args.len() < 2 { 1 } else { 0 });
    }

    let result = match args[1].as_str() {
        "ci" => run_create_settings_template(&args),
        "render" => run_render(&args, &settings),
        "parse" => run_parse(&args),
        "run" => run_calculation(&args, settings),
        other => Err(format!("Unknown command: {}", other).into()),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn print_usage(program_name: &str) {
    eprintln!("qcflow - quantum chemistry engine orchestration");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  {} ci {}", program_name, CONFIG_FILE_NAME);
    eprintln!("                    Create a settings template file");
    eprintln!();
    eprintln!("  {} render orca <xyz> [charge] [spin]", program_name);
    eprintln!("                    Print the ORCA single point input");
    eprintln!();
    eprintln!("  {} parse <orca|xtb|dftb> <log> <xyz>", program_name);
    eprintln!("                    Parse a finished log and print the properties as JSON");
    eprintln!();
    eprintln!("  {} run <orca|xtb|dftb> <spe|opt> <xyz> [charge] [spin]", program_name);
    eprintln!("                    Run a calculation with default engine settings");
}

fn run_create_settings_template(args: &[String]) -> Result<(), Box<dyn Error>> {
    let target = args.get(2).map(String::as_str).unwrap_or(CONFIG_FILE_NAME);
    let settings_path = Path::new(target);

    if settings_path.exists() {
        return Err(format!(
            "{} already exists. Please remove it first or choose a different location.",
            target
        )
        .into());
    }

    SettingsManager::create_template(settings_path)?;
    println!("Settings template created: {}", settings_path.display());
    Ok(())
}

/// Reads `<xyz> [charge] [spin]` starting at `args[start]`.
fn load_molecule(args: &[String], start: usize) -> Result<Molecule, Box<dyn Error>> {
    let path = args.get(start).ok_or("Missing geometry file argument")?;
    let charge = match args.get(start + 1) {
        Some(c) => c.parse::<i32>().map_err(|_| format!("Invalid charge: {}", c))?,
        None => 0,
    };
    let spin = match args.get(start + 2) {
        Some(s) => s.parse::<u32>().map_err(|_| format!("Invalid spin: {}", s))?,
        None => 1,
    };
    Ok(Molecule::from_xyz(Path::new(path), charge, spin)?)
}

fn run_render(args: &[String], settings: &SettingsManager) -> Result<(), Box<dyn Error>> {
    match args.get(2).map(String::as_str) {
        Some("orca") => {}
        Some(other) => return Err(format!("Rendering is only available for orca, not {}", other).into()),
        None => return Err("Missing engine argument".into()),
    }
    let mol = load_molecule(args, 3)?;
    let orca = OrcaEngine::default().with_context(EngineContext::new(settings.clone()));
    let rendered = orca.render_spe(&mol, &SpeOptions::default())?;
    print!("{}", rendered.to_text());
    for advisory in &rendered.advisories {
        log::warn!("{}", advisory);
    }
    Ok(())
}

fn run_parse(args: &[String]) -> Result<(), Box<dyn Error>> {
    let engine = args.get(2).ok_or("Missing engine argument")?;
    let log_path = Path::new(args.get(3).ok_or("Missing log file argument")?);
    let mol = load_molecule(args, 4)?;

    let parsed: ParsedLog = match engine.as_str() {
        "orca" => {
            let orca = OrcaEngine::default();
            OrcaLogParser::new(mol.geometry.num_atoms, orca.provenance()).parse_file(log_path)?
        }
        "xtb" => {
            let parser = XtbLogParser::new(XtbEngine::default().provenance());
            if log_path.is_dir() {
                parser.parse_dir(log_path)?
            } else {
                parser.parse_log(&read_log(log_path)?)?
            }
        }
        "dftb" => {
            let dftb = DftbEngine::new(DftbConfig::default());
            DftbLogParser::new(dftb.provenance()).parse_file(log_path)?
        }
        other => return Err(format!("Unknown engine: {}", other).into()),
    };

    for advisory in &parsed.advisories {
        log::warn!("{}", advisory);
    }
    println!("{}", serde_json::to_string_pretty(&parsed.properties)?);
    Ok(())
}

fn run_calculation(args: &[String], settings: SettingsManager) -> Result<(), Box<dyn Error>> {
    let engine_name = args.get(2).ok_or("Missing engine argument")?;
    let calc = args.get(3).ok_or("Missing calculation argument")?;
    let mut mol = load_molecule(args, 4)?;
    let ctx = EngineContext::new(settings);

    let engine: Box<dyn Engine> = match engine_name.as_str() {
        "orca" => Box::new(OrcaEngine::default().with_context(ctx)),
        "xtb" => Box::new(XtbEngine::default().with_context(ctx)),
        "dftb" => Box::new(DftbEngine::new(DftbConfig::default()).with_context(ctx)),
        other => return Err(format!("Unknown engine: {}", other).into()),
    };

    let run = RunOptions::inplace();
    match calc.as_str() {
        "spe" => engine.spe(&mut mol, &run)?,
        "opt" => engine.opt(&mut mol, &run)?,
        other => return Err(format!("Unknown calculation: {}", other).into()),
    };

    if let Some(e) = mol.properties.electronic_energy() {
        println!("Electronic energy: {:.8} Eh", e);
    }
    if let Some(g) = mol.properties.gibbs_free_energy() {
        println!("Gibbs free energy: {:.8} Eh", g);
    }
    for flag in &mol.flags {
        println!("Warning: {}", flag);
    }
    if calc == "opt" {
        let path = format!("{}_opt.xyz", mol.name);
        qcflow::io::write_xyz(&mol.geometry, &mol.name, Path::new(&path))?;
        println!("Optimized geometry written to {}", path);
    }
    Ok(())
}
