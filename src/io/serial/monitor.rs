// src/io/serial/monitor.rs
//
// Single-port line monitor: no forwarding, just reassemble incoming bytes
// into display lines. Bytes decode to a display-safe character stream and
// flush on newline or after a fixed idle timeout, whichever comes first.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::io::{LogEvent, LogSink, WorkerState};

use super::endpoint::SharedEndpoint;

/// Flush the accumulated text after this much silence. A fixed timeout is
/// enough here: with no second endpoint there is no write timing to respect.
pub const IDLE_FLUSH: Duration = Duration::from_millis(50);

/// Sleep quantum between polls
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Pause after an unexpected read failure before resuming the loop
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(200);

/// Decode raw bytes into display-safe text. Printable ASCII and the
/// tab/newline/carriage-return bytes pass through; every other byte renders
/// as a bracketed decimal escape, e.g. `<7>`.
pub fn decode_display_bytes(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len());
    for &b in data {
        match b {
            0x20..=0x7E | b'\t' | b'\n' | b'\r' => out.push(b as char),
            _ => out.push_str(&format!("<{}>", b)),
        }
    }
    out
}

/// Handle to a running line monitor. Same cooperative stop discipline as a
/// bridge worker: `stop()` then `join()`, with a final flush in between.
pub struct LineMonitor {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl LineMonitor {
    /// Construct and start a monitor draining `port`.
    pub fn spawn(port: SharedEndpoint, sink: Arc<LogSink>) -> Self {
        let running = Arc::new(AtomicBool::new(true));

        let thread_running = Arc::clone(&running);
        let handle = thread::spawn(move || run_monitor_loop(port, sink, &thread_running));

        LineMonitor {
            running,
            handle: Some(handle),
        }
    }

    pub fn state(&self) -> WorkerState {
        if self.handle.is_none() {
            WorkerState::Stopped
        } else if self.running.load(Ordering::Relaxed) {
            WorkerState::Running
        } else {
            WorkerState::StopRequested
        }
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run_monitor_loop(port: SharedEndpoint, sink: Arc<LogSink>, running: &AtomicBool) {
    let mut pending = String::new();
    let mut last_rx_at: Option<Instant> = None;
    let mut read_buf: Vec<u8> = Vec::new();

    while running.load(Ordering::Relaxed) {
        let read = {
            let mut port = match port.lock() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            match port.bytes_to_read() {
                Ok(available) if available > 0 => {
                    read_buf.resize(available, 0);
                    port.read_available(&mut read_buf)
                }
                Ok(_) => Ok(0),
                Err(e) => Err(e),
            }
        };

        match read {
            Ok(n) if n > 0 => {
                pending.push_str(&decode_display_bytes(&read_buf[..n]));
                last_rx_at = Some(Instant::now());
                if pending.ends_with('\n') {
                    flush_pending(&sink, &mut pending);
                    last_rx_at = None;
                }
                thread::sleep(POLL_INTERVAL);
            }
            Ok(_) => {
                // Idle: flush a dangling line once the timeout elapses
                if let Some(at) = last_rx_at {
                    if !pending.is_empty() && at.elapsed() >= IDLE_FLUSH {
                        flush_pending(&sink, &mut pending);
                        last_rx_at = None;
                    }
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                sink.emit(&LogEvent::error(format!("monitor error: {}", e)));
                thread::sleep(READ_ERROR_BACKOFF);
            }
        }
    }

    // Stopping: emit whatever is buffered so nothing is silently dropped
    flush_pending(&sink, &mut pending);
}

fn flush_pending(sink: &LogSink, pending: &mut String) {
    if pending.is_empty() {
        return;
    }
    let mut text = std::mem::take(pending);
    if !text.ends_with('\n') {
        text.push('\n');
    }
    sink.emit(&LogEvent::line(text));
}

// ============================================================================
// Tests
// ============================================================================
