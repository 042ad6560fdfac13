// src/script.rs
//
// Send scripts: a line-oriented command format executed against a live
// bridge. Deliberately a fixed command set invoking only the supervisor's
// send capability — not a code-evaluation facility.
//
// Format, one command per line:
//   send <a|b> <hex bytes>   transmit a payload to that endpoint
//   wait <ms>                pause before the next command
//   # ...                    comment (blank lines are skipped too)
//
// Hex payloads may contain spaces between octets: `send a DE AD BE EF`.

use std::thread;
use std::time::Duration;

use crate::io::serial::BridgeSupervisor;
use crate::io::{IoError, PortSide};

/// One parsed script command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptStep {
    Send { side: PortSide, data: Vec<u8> },
    Wait(Duration),
}

/// Parse a script source into steps. Errors carry the 1-based line number.
pub fn parse_script(source: &str) -> Result<Vec<ScriptStep>, IoError> {
    let mut steps = Vec::new();

    for (idx, raw) in source.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut parts = line.splitn(2, char::is_whitespace);
        let command = parts.next().unwrap_or("");
        let rest = parts.next().unwrap_or("").trim();

        match command.to_ascii_lowercase().as_str() {
            "send" => {
                let mut args = rest.splitn(2, char::is_whitespace);
                let side = match args.next().map(|s| s.to_ascii_lowercase()) {
                    Some(s) if s == "a" => PortSide::A,
                    Some(s) if s == "b" => PortSide::B,
                    _ => {
                        return Err(IoError::script(
                            line_no,
                            "send requires a side: send <a|b> <hex>",
                        ))
                    }
                };
                let payload = args.next().unwrap_or("").trim();
                if payload.is_empty() {
                    return Err(IoError::script(line_no, "send requires a hex payload"));
                }
                let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
                let data = hex::decode(&compact).map_err(|e| {
                    IoError::script(line_no, format!("invalid hex payload: {}", e))
                })?;
                steps.push(ScriptStep::Send { side, data });
            }
            "wait" => {
                let ms: u64 = rest.parse().map_err(|_| {
                    IoError::script(line_no, format!("invalid wait duration: {:?}", rest))
                })?;
                steps.push(ScriptStep::Wait(Duration::from_millis(ms)));
            }
            other => {
                return Err(IoError::script(
                    line_no,
                    format!("unknown command: {:?}", other),
                ));
            }
        }
    }

    Ok(steps)
}

/// Execute parsed steps against a connected supervisor.
pub fn run_script(steps: &[ScriptStep], supervisor: &BridgeSupervisor) -> Result<(), IoError> {
    for step in steps {
        match step {
            ScriptStep::Send { side, data } => supervisor.send(*side, data.clone())?,
            ScriptStep::Wait(duration) => thread::sleep(*duration),
        }
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
