//! Farminizer CLI - Drives the exporter against a scene snapshot
//!
//! Commands: check, export, report
//! Outputs JSON to stdout
//! Returns 2 on validation failure

use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::process::ExitCode;

use farminizer_core::{
    ClientSettings, JobOptions, MemoryScene, Orchestrator, PipelineError, PLUGIN_VERSION,
};

#[derive(Parser)]
#[command(name = "farminizer-cli")]
#[command(about = "Farminizer CLI - Render-farm export", version = PLUGIN_VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON scene snapshot
    #[arg(short, long, global = true, default_value = "scene.json")]
    scene: PathBuf,

    /// Client settings file written by the farm manager
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Job options JSON
    #[arg(short, long, global = true)]
    options: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the scene without touching it
    Check {
        /// Skip the texture and cache scan
        #[arg(long)]
        fast: bool,
    },

    /// Validate, then write the project copy and job descriptor
    Export,

    /// Validate and write a plain-text report
    Report {
        /// Report file; printed to stdout when omitted
        #[arg(long)]
        output: Option<PathBuf>,

        #[arg(long)]
        fast: bool,
    },
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{}", s),
        Err(e) => eprintln!("failed to serialize output: {}", e),
    }
}

fn fail(message: String) -> ExitCode {
    print_json(&json!({ "success": false, "error": message }));
    ExitCode::FAILURE
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let mut scene = match MemoryScene::load(&cli.scene) {
        Ok(s) => s,
        Err(e) => return fail(format!("Failed to load scene: {}", e)),
    };

    // Missing settings are reported as a diagnostic by the check itself.
    let settings = cli.settings.as_deref().and_then(|path| match ClientSettings::load(path) {
        Ok(s) => Some(s),
        Err(e) => {
            log::warn!("{}", e);
            None
        }
    });

    let options = match cli.options.as_deref().map(JobOptions::load).transpose() {
        Ok(o) => o.unwrap_or_default(),
        Err(e) => return fail(format!("Invalid options: {}", e)),
    };

    let mut orchestrator = Orchestrator::new(settings, options);

    match cli.command {
        Commands::Check { fast } => {
            let valid = orchestrator.check(&scene, fast);
            print_json(&json!({
                "valid": valid,
                "state": orchestrator.state(),
                "results": orchestrator.results().entries(),
            }));
            if valid {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2)
            }
        }

        Commands::Export => match orchestrator.export(&mut scene) {
            Ok(outcome) => {
                print_json(&json!({
                    "success": true,
                    "state": orchestrator.state(),
                    "export": outcome,
                    "results": orchestrator.results().entries(),
                }));
                ExitCode::SUCCESS
            }
            Err(e) => {
                print_json(&json!({
                    "success": false,
                    "state": orchestrator.state(),
                    "error": e.to_string(),
                    "results": orchestrator.results().entries(),
                }));
                match e {
                    PipelineError::ValidationFailed(_) => ExitCode::from(2),
                    _ => ExitCode::FAILURE,
                }
            }
        },

        Commands::Report { output, fast } => {
            let valid = orchestrator.check(&scene, fast);
            match output {
                Some(path) => {
                    if let Err(e) = orchestrator.write_report(&scene, &path) {
                        return fail(e.to_string());
                    }
                    print_json(&json!({ "valid": valid, "report": path }));
                }
                None => print!("{}", orchestrator.report(&scene)),
            }
            if valid {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2)
            }
        }
    }
}
