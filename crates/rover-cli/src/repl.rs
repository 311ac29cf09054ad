//! Operator REPL.
//!
//! Supported slash-commands:
//!   /status       – connection, safety flags, last command and sensors
//!   /report       – finalize the current mission and write its report
//!   /estop-reset  – clear the emergency-stop latch
//!   /help         – show this list
//!   /quit | /exit – shut the rover down and exit

use colored::Colorize;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::sync::atomic::{AtomicBool, Ordering};

use rover_runtime::{FinalizedMission, Rover, UiSnapshot};
use rover_types::SafetyState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Status,
    Report,
    EstopReset,
    Help,
    Quit,
    Empty,
    Unknown,
}

pub fn parse(line: &str) -> Command {
    match line.trim() {
        "" => Command::Empty,
        "/status" => Command::Status,
        "/report" => Command::Report,
        "/estop-reset" => Command::EstopReset,
        "/help" => Command::Help,
        "/quit" | "/exit" => Command::Quit,
        _ => Command::Unknown,
    }
}

/// What the loop does with one `readline` result.
#[derive(Debug, PartialEq, Eq)]
enum Step {
    Line(String),
    Stop,
}

/// Map a `readline` result to a [`Step`], honouring a stop raised while the
/// prompt was blocked. Ctrl-C or Ctrl-D at the prompt raise `shutdown`.
fn step(read: Result<String, ReadlineError>, shutdown: &AtomicBool) -> Step {
    if shutdown.load(Ordering::SeqCst) {
        return Step::Stop;
    }
    match read {
        Ok(line) => Step::Line(line),
        Err(ReadlineError::Interrupted | ReadlineError::Eof) => {
            shutdown.store(true, Ordering::SeqCst);
            Step::Stop
        }
        Err(e) => {
            eprintln!("{}: {}", "Read error".red(), e);
            shutdown.store(true, Ordering::SeqCst);
            Step::Stop
        }
    }
}

/// Run until `/quit`, end of input, or `shutdown` is raised.
///
/// The caller must not join this loop to observe `shutdown`: a stop raised by
/// a signal cannot interrupt a blocked `readline`.
pub fn run(rover: &Rover, shutdown: &AtomicBool) {
    let mut editor = match DefaultEditor::new() {
        Ok(e) => e,
        Err(e) => {
            eprintln!("{}: {}", "Terminal error".red(), e);
            shutdown.store(true, Ordering::SeqCst);
            return;
        }
    };
    let prompt = format!("{} ", "rover>".bold().cyan());

    while !shutdown.load(Ordering::SeqCst) {
        let line = match step(editor.readline(&prompt), shutdown) {
            Step::Line(line) => line,
            Step::Stop => break,
        };
        let _ = editor.add_history_entry(line.as_str());

        match parse(&line) {
            Command::Empty => {}
            Command::Status => print_status(&rover.latest_ui()),
            Command::Report => print_report(&rover.finalize_mission()),
            Command::EstopReset => {
                rover.request_emergency_reset();
                println!("{}", "Emergency stop reset requested.".green());
            }
            Command::Help => print_help(),
            Command::Quit => break,
            Command::Unknown => println!(
                "{} '{}'. Type {} for available commands.",
                "Unknown command:".red(),
                line.trim().yellow(),
                "/help".bold()
            ),
        }
    }
    shutdown.store(true, Ordering::SeqCst);
}

fn print_help() {
    println!();
    println!("{}", "Rover Commands".bold().underline());
    println!("  {}       – connection, safety and sensors", "/status".bold().cyan());
    println!("  {}       – finalize mission, write report", "/report".bold().cyan());
    println!("  {}  – clear the emergency stop", "/estop-reset".bold().cyan());
    println!("  {}  – shut down and exit", "/quit  /exit".bold().cyan());
    println!();
}

fn flag(on: bool, label: &str) -> String {
    if on {
        label.red().bold().to_string()
    } else {
        "ok".green().to_string()
    }
}

fn safety_line(s: &SafetyState) -> String {
    format!(
        "e-stop {}  obstacle {}  link {}",
        flag(s.emergency_stop_active, "ACTIVE"),
        flag(s.obstacle_active, "NEAR"),
        flag(s.link_lost, "LOST"),
    )
}

fn print_status(ui: &UiSnapshot) {
    let reading = |v: Option<f64>, unit: &str| match v {
        Some(v) => format!("{v:.0} {unit}"),
        None => "--".dimmed().to_string(),
    };
    println!("{}", "Rover Status".bold().underline());
    println!(
        "  Rover     : {}  ({:?} mode)",
        if ui.rover_connected { "connected".green() } else { "disconnected".red() },
        ui.speed_mode
    );
    println!("  Safety    : {}", safety_line(&ui.safety));
    println!(
        "  Command   : L {:+.2}  R {:+.2}",
        ui.last_command.left, ui.last_command.right
    );
    println!(
        "  Gamepad   : {}  battery {:?}",
        if ui.gamepad_connected { "connected".green() } else { "disconnected".red() },
        ui.battery.level
    );
    let s = &ui.sensors;
    println!(
        "  Ranging   : sonar {}  tof-L {}  tof-R {}",
        reading(s.sonar.as_ref().and_then(|r| r.valid_distance()), "mm"),
        reading(s.tof_left.as_ref().and_then(|r| r.valid_distance()), "mm"),
        reading(s.tof_right.as_ref().and_then(|r| r.valid_distance()), "mm"),
    );
    if let Some(c) = &s.climate {
        println!(
            "  Climate   : {}  {}",
            reading(c.humidity_pct, "%RH"),
            reading(c.temperature_c, "°C")
        );
    }
    if let Some(l) = &s.light {
        println!("  Light     : {}", reading(l.illuminance_lux, "lux"));
    }
    println!(
        "  Pose      : x {:.2} m  y {:.2} m  heading {:.1}°  travelled {:.2} m",
        ui.pose.x_m,
        ui.pose.y_m,
        ui.pose.heading_rad.to_degrees(),
        ui.pose.distance_m
    );
    if !ui.stale_sensors.is_empty() {
        println!("  {} {}", "Stale     :".yellow(), ui.stale_sensors.join(", "));
    }
    if ui.bus_faults > 0 {
        println!("  {} {}", "Bus faults:".yellow(), ui.bus_faults);
    }
}

fn print_report(done: &FinalizedMission) {
    for line in done.snapshot.summary_lines() {
        println!("  {line}");
    }
    match &done.report {
        Ok(path) => println!(
            "{} {}",
            "✓ Report written to".green(),
            path.display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Report not written".red(), e),
    }
}
