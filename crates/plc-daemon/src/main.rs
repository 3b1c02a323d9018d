//! PLC simulator daemon entry point.
//!
//! Loads the TOML configuration, builds the memory image, starts the
//! signal simulation producers, registers the Modbus fieldbus modules, and
//! runs the TCP accept loops until a shutdown signal arrives.

mod listener;
mod signals;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use plc_common::config::SimulatorConfig;
use plc_fieldbus::{FieldbusRegistry, ModbusModule};
use plc_memory::MemoryImage;
use plc_simulation::Scheduler;
use signals::SignalHandler;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// A virtual PLC: a Modbus/TCP server backed by an in-memory process image
/// that signal simulation producers update continuously.
#[derive(Parser, Debug)]
#[command(name = "plc-simulator", version, about)]
struct Args {
    /// Path to the simulator's TOML configuration file.
    conf_file: PathBuf,

    /// Override the configured log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level")]
    log_level: Option<String>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let config = match SimulatorConfig::from_file(&args.conf_file) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to load configuration from {}: {e}", args.conf_file.display());
            return ExitCode::from(2);
        }
    };

    init_logging(args.log_level.as_deref().unwrap_or(&config.logging.level));

    match run_daemon(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "daemon exited with an error");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "plc_daemon={level},plc_fieldbus={level},plc_memory={level},plc_simulation={level}"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

fn run_daemon(config: SimulatorConfig) -> Result<(), Box<dyn std::error::Error>> {
    let memspace = config.memory_manager.memspace;
    let memory = Arc::new(MemoryImage::new(
        memspace.blen,
        memspace.w16len,
        memspace.w32len,
        memspace.w64len,
    ));
    info!(
        blen = memspace.blen,
        w16len = memspace.w16len,
        w32len = memspace.w32len,
        w64len = memspace.w64len,
        "memory image initialized"
    );

    let mut scheduler = Scheduler::new(Arc::clone(&memory));
    let producer_count = config.io_manager.simulations.len();
    for sim in config.io_manager.simulations {
        scheduler.spawn_producer(sim)?;
    }
    info!(producers = producer_count, "signal simulation producers started");

    let mut registry = FieldbusRegistry::new();
    let mut ports = Vec::new();
    for module in &config.fieldbus_manager.modules {
        let port = if module.port != 0 {
            module.port
        } else {
            config.listener.port
        };
        registry.register(
            port,
            ModbusModule::new(Arc::clone(&memory)),
            module.conf.one_shot,
        );
        ports.push(port);
        info!(id = %module.id, port, "fieldbus module registered");
    }
    if ports.is_empty() {
        registry.register(config.listener.port, ModbusModule::new(Arc::clone(&memory)), false);
        ports.push(config.listener.port);
    }
    let registry = Arc::new(registry);

    let signals = SignalHandler::new()?;

    let mut handles = Vec::new();
    for port in ports {
        let handle = listener::spawn_listener(
            config.listener.host.clone(),
            port,
            Arc::clone(&registry),
            signals.clone(),
        )?;
        handles.push(handle);
    }

    while !signals.shutdown_requested() {
        std::thread::sleep(Duration::from_millis(200));
    }

    info!("shutdown requested, stopping producers and listeners");
    scheduler.shutdown();
    for handle in handles {
        let _ = handle.join();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_parse_minimal() {
        let args = Args::parse_from(["plc-simulator", "config.toml"]);
        assert_eq!(args.conf_file, PathBuf::from("config.toml"));
        assert!(args.log_level.is_none());
    }

    #[test]
    fn args_parse_with_log_level() {
        let args = Args::parse_from(["plc-simulator", "config.toml", "-l", "debug"]);
        assert_eq!(args.log_level.as_deref(), Some("debug"));
    }
}
