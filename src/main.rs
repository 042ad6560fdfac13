// src/main.rs
//
// midwire CLI — the display collaborator for the serial bridge core.
// Renders log events from the workers as colored terminal lines and drives
// the supervisor lifecycle from the command line.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use crossterm::execute;
use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

use midwire_lib::{
    init_file_logging, list_ports, load_cached_selection, open_port, parse_script,
    run_script, save_cached_selection, stop_file_logging, BridgeConfig, BridgeSupervisor,
    CachedSelection, DisplaySink, LineMonitor, LogColor, LogSink, Parity, DEFAULT_BAUD,
};

#[derive(Parser)]
#[command(
    name = "midwire",
    version,
    about = "Serial COM-port middleman: bridge two ports and log the traffic as frames"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List available serial ports
    List,
    /// Bridge two ports and log reassembled frames until stopped
    Bridge {
        /// Primary port (A side). Defaults to the last-used selection.
        port_a: Option<String>,
        /// Secondary port (B side). Defaults to the last-used selection.
        port_b: Option<String>,
        /// Baud rate for both ports
        #[arg(short, long)]
        baud: Option<u32>,
        /// Wire bits per character (10 for 8N1 framing)
        #[arg(long, default_value_t = 10)]
        bits_per_char: u32,
        /// Character-times of silence that finish a frame
        #[arg(long, default_value_t = 3)]
        gap_chars: u32,
        /// Mirror diagnostics to a timestamped log file in this directory
        #[arg(long)]
        log_dir: Option<PathBuf>,
        /// Send script to run once the bridge is up
        #[arg(long)]
        script: Option<PathBuf>,
    },
    /// Monitor a single port, reassembling display lines
    Monitor {
        port: String,
        #[arg(short, long, default_value_t = DEFAULT_BAUD)]
        baud: u32,
    },
    /// Send one hex payload to a port and exit
    Send {
        port: String,
        /// Hex payload, e.g. DEADBEEF
        payload: String,
        #[arg(short, long, default_value_t = DEFAULT_BAUD)]
        baud: u32,
    },
}

/// Renders log events as colored lines on stdout
struct TerminalSink;

impl DisplaySink for TerminalSink {
    fn append(&self, text: &str, color: LogColor) {
        let color = match color {
            LogColor::Forward => Color::Red,
            LogColor::Reverse => Color::Blue,
            LogColor::Error => Color::DarkRed,
            LogColor::Info => Color::Green,
            LogColor::Plain => Color::Grey,
        };
        let mut stdout = std::io::stdout();
        let _ = execute!(stdout, SetForegroundColor(color), Print(text), ResetColor);
    }
}

fn terminal_sink() -> Arc<LogSink> {
    Arc::new(LogSink::new(Box::new(TerminalSink)))
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::List => run_list(),
        Command::Bridge {
            port_a,
            port_b,
            baud,
            bits_per_char,
            gap_chars,
            log_dir,
            script,
        } => run_bridge(port_a, port_b, baud, bits_per_char, gap_chars, log_dir, script),
        Command::Monitor { port, baud } => run_monitor(&port, baud),
        Command::Send { port, payload, baud } => run_send(&port, &payload, baud),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run_list() -> Result<(), String> {
    let ports = list_ports().map_err(|e| e.to_string())?;
    if ports.is_empty() {
        println!("No serial ports found.");
        return Ok(());
    }
    for p in ports {
        let detail = match (p.manufacturer.as_deref(), p.product.as_deref()) {
            (Some(m), Some(prod)) => format!(" - {} {}", m, prod),
            (Some(m), None) => format!(" - {}", m),
            (None, Some(prod)) => format!(" - {}", prod),
            (None, None) => String::new(),
        };
        println!("{} [{}]{}", p.port_name, p.port_type, detail);
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_bridge(
    port_a: Option<String>,
    port_b: Option<String>,
    baud: Option<u32>,
    bits_per_char: u32,
    gap_chars: u32,
    log_dir: Option<PathBuf>,
    script: Option<PathBuf>,
) -> Result<(), String> {
    let cached = load_cached_selection();

    let port_a = port_a
        .or(cached.port_a.clone())
        .ok_or("No port A given and none cached. Run `midwire list` to see ports.")?;
    let port_b = port_b
        .or(cached.port_b.clone())
        .ok_or("No port B given and none cached. Run `midwire list` to see ports.")?;
    let baud = baud.or(cached.baud).unwrap_or(DEFAULT_BAUD);
    if baud == 0 {
        return Err("Baud rate must be a positive integer".to_string());
    }
    if !midwire_lib::BAUD_RATES.contains(&baud) {
        eprintln!("Note: {} is not a conventional baud rate; using it anyway.", baud);
    }

    if let Some(ref dir) = log_dir {
        init_file_logging(dir)?;
    }

    let mut config = BridgeConfig::new(port_a.clone(), port_b.clone(), baud);
    config.bits_per_char = bits_per_char;
    config.gap_chars = gap_chars;

    let mut supervisor = BridgeSupervisor::new(terminal_sink());
    supervisor.connect(&config).map_err(|e| e.to_string())?;

    // Remember the working selection for next time
    let _ = save_cached_selection(&CachedSelection {
        port_a: Some(port_a),
        port_b: Some(port_b),
        baud: Some(baud),
    });

    if let Some(ref path) = script {
        let source = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
        let steps = parse_script(&source).map_err(|e| e.to_string())?;
        run_script(&steps, &supervisor).map_err(|e| e.to_string())?;
    }

    println!("Press Enter to stop.");
    wait_for_enter();

    supervisor.disconnect();
    stop_file_logging();
    Ok(())
}

fn run_monitor(port: &str, baud: u32) -> Result<(), String> {
    if baud == 0 {
        return Err("Baud rate must be a positive integer".to_string());
    }

    let endpoint = open_port(port, baud, 8, 1, &Parity::None).map_err(|e| e.to_string())?;
    let mut monitor = LineMonitor::spawn(endpoint, terminal_sink());

    println!("Monitoring {} @ {} bps. Press Enter to stop.", port, baud);
    wait_for_enter();

    monitor.stop();
    monitor.join();
    Ok(())
}

fn run_send(port: &str, payload: &str, baud: u32) -> Result<(), String> {
    if baud == 0 {
        return Err("Baud rate must be a positive integer".to_string());
    }

    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    let data = hex::decode(&compact).map_err(|e| format!("Invalid hex payload: {}", e))?;

    let endpoint = open_port(port, baud, 8, 1, &Parity::None).map_err(|e| e.to_string())?;
    {
        let mut port_guard = endpoint.lock().map_err(|e| e.to_string())?;
        port_guard.write_all(&data).map_err(|e| e.to_string())?;
    }

    println!("Sent {} byte(s) to {}.", data.len(), port);
    Ok(())
}

fn wait_for_enter() {
    let mut line = String::new();
    let _ = std::io::stdin().read_line(&mut line);
}
