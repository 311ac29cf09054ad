//! `rover-cli` – operator console for the rover.
//!
//! The binary:
//!
//! 1. Installs tracing (`RUST_LOG`, `ROVER_LOG_FORMAT`, optional OTLP export).
//! 2. Loads `~/.rover/config.toml` (or `ROVER_CONFIG`) and validates it
//!    before any device is touched.
//! 3. Wires the simulated rig and starts the [`Rover`].
//! 4. Services dashboard requests in the background while the operator
//!    drives the REPL (`/status`, `/report`, `/estop-reset`, `/quit`).
//! 5. Shuts the rover down on `/quit`, Ctrl-C or SIGTERM without waiting
//!    for the prompt to return.

mod config;
mod repl;
mod rig;

use colored::Colorize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

use rover_mission::JsonReportSink;
use rover_runtime::{Rover, init_tracing};
use rover_types::SystemClock;

/// How often queued dashboard requests are handled.
const REQUEST_POLL: Duration = Duration::from_millis(200);

fn main() {
    let telemetry = init_tracing("rover");

    print_banner();
    if telemetry.exporting() {
        println!("  Traces exported over OTLP.");
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping the rover …".yellow().bold());
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; use /quit to stop the rover");
    }

    let cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => {
            let mut cfg = config::Config::default();
            match config::save(&cfg) {
                Ok(()) => println!(
                    "  {} Default config written to {}",
                    "✓".green().bold(),
                    config::config_path().display().to_string().bold()
                ),
                Err(e) => println!("{}: {}", "Error saving config".red(), e),
            }
            config::apply_env_overrides(&mut cfg);
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            return;
        }
    };

    let rig = match cfg.validate() {
        Ok(rig) => rig,
        Err(e) => {
            println!("{}: {}", "Invalid configuration".red(), e);
            return;
        }
    };

    println!(
        "  Rover {} at {}:{} (simulated devices)",
        rig.server_name.bold(),
        rig.address,
        rig.port
    );
    let hardware = rig::build(&rig);
    let reports = JsonReportSink::new(&rig.report_dir);
    println!(
        "  Mission reports go to {}",
        reports.dir().display().to_string().bold()
    );

    let rover = match Rover::start(
        rig.rover.clone(),
        hardware,
        Arc::new(SystemClock),
        Box::new(reports),
    ) {
        Ok(rover) => rover,
        Err(e) => {
            println!("{}: {}", "Failed to start the rover".red(), e);
            return;
        }
    };

    println!();
    println!("  Mission {} started.", rover.mission().mission_id().bold());
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    let rover = Arc::new(rover);
    let repl = {
        let rover = rover.clone();
        let shutdown = shutdown.clone();
        thread::Builder::new()
            .name("rover-repl".into())
            .spawn(move || repl::run(&rover, &shutdown))
    };
    if let Err(e) = repl {
        println!("{}: {}", "Failed to start the console".red(), e);
        shutdown.store(true, Ordering::SeqCst);
    }

    // The REPL may sit in `readline` after a signal, so it is never joined.
    while !shutdown.load(Ordering::SeqCst) {
        for done in rover.service_requests() {
            if let Ok(path) = &done.report {
                info!(path = %path.display(), "dashboard report written");
            }
        }
        thread::sleep(REQUEST_POLL);
    }

    rover.shutdown();
    println!("{}", "  ✓ Rover stopped.".green());
}

fn print_banner() {
    println!();
    println!("{}", r#"   ___                     "#.bold().cyan());
    println!("{}", r#"  / _ \___ _  _____ ____   "#.bold().cyan());
    println!("{}", r#" / , _/ _ \ |/ / -_) __/   "#.bold().cyan());
    println!("{}", r#"/_/|_|\___/___/\__/_/      "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "Rover".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Teleoperation console");
    println!();
}
