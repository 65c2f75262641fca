//! nodal CLI.
//!
//! Inspects the device registry, checks device modules and option files.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use nodal_core::{CollectSink, ParamList, Severity, SimOptions};
use nodal_devices::DeviceRegistry;
use nodal_plugin::PluginHost;
use nodal_solver::{Circuit, operating_point};

#[derive(Parser)]
#[command(name = "nodal")]
#[command(about = "Nonlinear circuit engine: device registry and module tools")]
#[command(version)]
struct Cli {
    /// Log verbosity (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered device types
    ListDevices {
        /// Device modules to load first
        #[arg(long = "load", value_name = "PATH")]
        modules: Vec<PathBuf>,
    },

    /// Load a device module and run each of its devices at 1 V
    CheckPlugin {
        /// Path to the module
        path: PathBuf,
    },

    /// Validate a JSON options file and print the effective options
    CheckOptions {
        /// Path to the options file
        path: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    env_logger::Builder::new()
        .parse_filters(&cli.log_level)
        .init();

    let result = match cli.command {
        Commands::ListDevices { modules } => cmd_list_devices(&modules),
        Commands::CheckPlugin { path } => cmd_check_plugin(&path),
        Commands::CheckOptions { path } => cmd_check_options(&path),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn cmd_list_devices(modules: &[PathBuf]) -> Result<()> {
    let mut registry = DeviceRegistry::with_builtins();
    let mut host = PluginHost::new();
    for path in modules {
        host.load(path, &mut registry)
            .with_context(|| format!("loading {}", path.display()))?;
    }

    println!("{:<12} {:>3} {:>5} {:>5}  {:<20} Description", "Name", "Key", "Level", "Pins", "Source");
    for reg in registry.iter() {
        let info = reg.info();
        println!(
            "{:<12} {:>3} {:>5} {:>5}  {:<20} {}",
            info.name,
            info.key,
            info.level,
            info.terminals,
            reg.source.to_string(),
            info.description
        );
    }
    Ok(())
}

fn cmd_check_plugin(path: &Path) -> Result<()> {
    let mut registry = DeviceRegistry::with_builtins();
    let mut host = PluginHost::new();
    let handle = host
        .load(path, &mut registry)
        .with_context(|| format!("loading {}", path.display()))?;
    let Some(summary) = host.module(handle).cloned() else {
        bail!("module vanished after loading");
    };
    println!(
        "Module {} (interface {}) from {}",
        summary.name,
        summary.version,
        summary.path.display()
    );

    let mut failures = 0;
    for device in &summary.devices {
        match one_volt_current(&registry, device) {
            Ok(Some(current)) => println!("  {:<12} I(1 V) = {:e} A", device, current),
            Ok(None) => println!("  {:<12} skipped (not a two-terminal device)", device),
            Err(e) => {
                failures += 1;
                println!("  {:<12} FAIL: {:#}", device, e);
            }
        }
    }
    if failures > 0 {
        bail!("{} of {} devices failed", failures, summary.devices.len());
    }
    Ok(())
}

/// Current a two-terminal device draws from a 1 V source with default parameters.
fn one_volt_current(registry: &DeviceRegistry, device: &str) -> Result<Option<f64>> {
    let Some(reg) = registry.find(device) else {
        bail!("device {} is not registered", device);
    };
    if reg.info().terminals != 2 {
        return Ok(None);
    }

    let mut circuit = Circuit::new(SimOptions::default());
    circuit.add_model_from(registry, "vsource", "vbias", &ParamList::new())?;
    circuit.add_model_from(registry, device, "dut", &ParamList::new())?;
    circuit.add_instance("vbias", "v1", &["a", "0"], &ParamList::new().with("dc", 1.0))?;
    circuit.add_instance("dut", "x1", &["a", "0"], &ParamList::new())?;

    let mut sink = CollectSink::new();
    let outcome = operating_point(&mut circuit, &mut sink);
    for d in sink.at_least(Severity::Warning) {
        println!("    {}", d);
    }
    outcome?;

    let branch = circuit
        .nodes()
        .find("v1#branch")?
        .index()
        .context("source branch has no matrix row")?;
    // the source current flows into its positive terminal
    Ok(Some(-circuit.solution()[branch]))
}

fn cmd_check_options(path: &Path) -> Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let options = SimOptions::from_json(&text)?;
    println!("{}", serde_json::to_string_pretty(&options)?);
    Ok(())
}
