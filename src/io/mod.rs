// src/io/mod.rs
//
// Shared IO types for the bridge core: direction/side tags, log events,
// the display-sink seam, and the lock-serialized log emitter shared by
// both bridge workers.

pub mod error;
pub mod serial;

pub use error::IoError;

use std::sync::Mutex;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

// ============================================================================
// Direction and Side Tags
// ============================================================================

/// One of the two bridged endpoints.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortSide {
    A,
    B,
}

/// Direction of travel across the bridge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Primary endpoint to secondary (A reads, B writes)
    AToB,
    /// Secondary endpoint to primary (B reads, A writes)
    BToA,
}

impl Direction {
    /// Display tag prefixed to frame log lines
    pub fn tag(self) -> &'static str {
        match self {
            Direction::AToB => "[A->B]",
            Direction::BToA => "[A<-B]",
        }
    }

    /// Short label used in error text
    pub fn label(self) -> &'static str {
        match self {
            Direction::AToB => "A->B",
            Direction::BToA => "B->A",
        }
    }

    pub fn color(self) -> LogColor {
        match self {
            Direction::AToB => LogColor::Forward,
            Direction::BToA => LogColor::Reverse,
        }
    }

    /// The side this direction reads from
    pub fn source_side(self) -> PortSide {
        match self {
            Direction::AToB => PortSide::A,
            Direction::BToA => PortSide::B,
        }
    }

    /// The side this direction writes to
    pub fn dest_side(self) -> PortSide {
        match self {
            Direction::AToB => PortSide::B,
            Direction::BToA => PortSide::A,
        }
    }
}

// ============================================================================
// Log Events
// ============================================================================

/// Colour tag attached to every log event. The display collaborator decides
/// how each tag renders; the two bridge directions get distinct tags so a
/// human can separate interleaved traffic at a glance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogColor {
    /// A->B frame lines
    Forward,
    /// B->A frame lines
    Reverse,
    Error,
    Info,
    Plain,
}

/// One human-readable log line. Built once at flush time, never mutated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEvent {
    pub text: String,
    pub color: LogColor,
}

impl LogEvent {
    /// Build a reassembled-frame line:
    /// `[A->B] 05/08/2026 14:03:22.123456 : 41 42 43\n`
    pub fn frame(direction: Direction, timestamp: DateTime<Local>, payload: &[u8]) -> Self {
        LogEvent {
            text: format!(
                "{} {} : {}\n",
                direction.tag(),
                timestamp.format("%d/%m/%Y %H:%M:%S%.6f"),
                hex_octets(payload)
            ),
            color: direction.color(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        LogEvent {
            text: format!("[ERROR] {}\n", text.into()),
            color: LogColor::Error,
        }
    }

    pub fn info(text: impl Into<String>) -> Self {
        LogEvent {
            text: format!("[INFO] {}\n", text.into()),
            color: LogColor::Info,
        }
    }

    /// A plain display line (used by the single-port monitor)
    pub fn line(text: impl Into<String>) -> Self {
        LogEvent {
            text: text.into(),
            color: LogColor::Plain,
        }
    }
}

/// Format a payload as uppercase hex octets separated by single spaces.
pub fn hex_octets(payload: &[u8]) -> String {
    let mut out = String::with_capacity(payload.len() * 3);
    for (i, b) in payload.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{:02X}", b));
    }
    out
}

// ============================================================================
// Display Sink
// ============================================================================

/// The display collaborator. Receives finished `(text, colour)` pairs; the
/// core makes no assumption about rendering.
pub trait DisplaySink: Send {
    fn append(&self, text: &str, color: LogColor);
}

/// Lock-serialized emitter shared by both bridge workers.
///
/// The lock guards only the forwarding of one event to the display
/// collaborator — never endpoint IO — so two workers flushing at nearly the
/// same instant can never interleave their output mid-line. A panicking
/// collaborator must not deadlock the surviving worker, so a poisoned lock
/// is recovered rather than propagated.
pub struct LogSink {
    inner: Mutex<Box<dyn DisplaySink>>,
}

impl LogSink {
    pub fn new(sink: Box<dyn DisplaySink>) -> Self {
        LogSink {
            inner: Mutex::new(sink),
        }
    }

    pub fn emit(&self, event: &LogEvent) {
        let guard = match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.append(&event.text, event.color);
        // Guard drops here on every exit path, including unwind out of append()
    }
}

// ============================================================================
// Worker Lifecycle
// ============================================================================

/// Lifecycle of one worker thread. `Stopped` is terminal: restarting a
/// bridge constructs new workers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    Running,
    /// Stop was requested; the thread has not been joined yet
    StopRequested,
    Stopped,
}

// ============================================================================
// Tests
// ============================================================================
