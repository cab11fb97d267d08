//! gridsync - replay a collaborative table scenario through a live session hub

use std::env;
use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;

use gridsync::{config, replay, telemetry};

fn print_usage() {
    eprintln!("Usage: gridsync [OPTIONS] <SCENARIO>");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  <SCENARIO>                JSON scenario to replay");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -c, --config <FILE>       Load settings from TOML file");
    eprintln!("  -h, --help                Print help");
}

fn main() {
    let args: Vec<String> = env::args().collect();

    let mut scenario_path: Option<PathBuf> = None;
    let mut config_file: Option<PathBuf> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_usage();
                return;
            }
            "-c" | "--config" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("Error: --config requires a file path");
                    std::process::exit(1);
                }
                config_file = Some(PathBuf::from(&args[i]));
            }
            arg if arg.starts_with('-') => {
                eprintln!("Error: Unknown option: {}", arg);
                print_usage();
                std::process::exit(1);
            }
            _ => {
                if scenario_path.is_none() {
                    scenario_path = Some(PathBuf::from(&args[i]));
                } else {
                    eprintln!("Error: Unexpected argument: {}", args[i]);
                    print_usage();
                    std::process::exit(1);
                }
            }
        }
        i += 1;
    }

    let Some(scenario_path) = scenario_path else {
        print_usage();
        std::process::exit(1);
    };

    let (app_config, warnings) = config::load_config(config_file.as_deref());
    for warning in warnings {
        eprintln!("Warning: {}", warning);
    }
    telemetry::init(&app_config.logging);

    if let Err(e) = run(scenario_path, app_config) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(scenario_path: PathBuf, app_config: config::AppConfig) -> anyhow::Result<()> {
    let scenario = replay::load_scenario(&scenario_path)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting runtime")?;
    let lines = runtime.block_on(replay::run(scenario, app_config.sync))?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for line in lines {
        writeln!(out, "{}", line)?;
    }
    Ok(())
}
