// src/io/serial/supervisor.rs
//
// Lifecycle owner for a bridged port pair: opens/closes both endpoints and
// starts/stops the two bridge workers as a unit. Workers always stop (and
// finish their final flush) before the endpoints are closed.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::io::{Direction, IoError, LogEvent, LogSink, PortSide, WorkerState};

use super::bridge::{BridgeTiming, BridgeWorker};
use super::endpoint::{open_port, SharedEndpoint};
use super::utils::Parity;

// ============================================================================
// Configuration
// ============================================================================

/// Bridge connection configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Primary endpoint (the `A` in `[A->B]`)
    pub port_a: String,
    /// Secondary endpoint
    pub port_b: String,
    pub baud: u32,
    /// Data bits (5, 6, 7, 8) - defaults to 8
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    /// Stop bits (1, 2) - defaults to 1
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    #[serde(default)]
    pub parity: Parity,
    /// Bits needed to transmit one byte on the wire (10 for 8N1)
    #[serde(default = "default_bits_per_char")]
    pub bits_per_char: u32,
    /// Character-times of silence that finish a frame
    #[serde(default = "default_gap_chars")]
    pub gap_chars: u32,
}

fn default_data_bits() -> u8 {
    8
}
fn default_stop_bits() -> u8 {
    1
}
fn default_bits_per_char() -> u32 {
    10
}
fn default_gap_chars() -> u32 {
    3
}

impl BridgeConfig {
    pub fn new(port_a: impl Into<String>, port_b: impl Into<String>, baud: u32) -> Self {
        BridgeConfig {
            port_a: port_a.into(),
            port_b: port_b.into(),
            baud,
            data_bits: default_data_bits(),
            stop_bits: default_stop_bits(),
            parity: Parity::default(),
            bits_per_char: default_bits_per_char(),
            gap_chars: default_gap_chars(),
        }
    }
}

// ============================================================================
// Supervisor
// ============================================================================

/// The two endpoints and their worker pair, held while connected
struct BridgePair {
    endpoint_a: SharedEndpoint,
    endpoint_b: SharedEndpoint,
    worker_ab: BridgeWorker,
    worker_ba: BridgeWorker,
}

/// Owns endpoint open/close and the paired workers' start/stop as a unit.
pub struct BridgeSupervisor {
    sink: Arc<LogSink>,
    pair: Option<BridgePair>,
}

impl BridgeSupervisor {
    pub fn new(sink: Arc<LogSink>) -> Self {
        BridgeSupervisor { sink, pair: None }
    }

    pub fn is_connected(&self) -> bool {
        self.pair.is_some()
    }

    /// Open both ports and start the worker pair. Fails with
    /// `PortUnavailable` if either endpoint cannot be opened; an endpoint
    /// that did open is closed again before returning. On success both
    /// workers are running when this returns.
    pub fn connect(&mut self, config: &BridgeConfig) -> Result<(), IoError> {
        self.connect_with(config, |path| {
            open_port(
                path,
                config.baud,
                config.data_bits,
                config.stop_bits,
                &config.parity,
            )
        })
    }

    /// `connect` with the endpoint opener injected (tests substitute
    /// in-memory endpoints).
    pub fn connect_with<F>(&mut self, config: &BridgeConfig, mut open: F) -> Result<(), IoError>
    where
        F: FnMut(&str) -> Result<SharedEndpoint, IoError>,
    {
        if self.pair.is_some() {
            return Err(IoError::configuration("already connected"));
        }
        // Validate before opening anything
        if config.port_a == config.port_b {
            return Err(IoError::configuration(
                "port A and port B must be different",
            ));
        }

        let endpoint_a = open(&config.port_a)?;
        let endpoint_b = match open(&config.port_b) {
            Ok(ep) => ep,
            Err(e) => {
                // No leaked open handle on partial failure
                drop(endpoint_a);
                return Err(e);
            }
        };

        let timing = BridgeTiming::derive(config.baud, config.bits_per_char, config.gap_chars);

        let worker_ab = BridgeWorker::spawn(
            Direction::AToB,
            Arc::clone(&endpoint_a),
            Arc::clone(&endpoint_b),
            timing,
            Arc::clone(&self.sink),
        );
        let worker_ba = BridgeWorker::spawn(
            Direction::BToA,
            Arc::clone(&endpoint_b),
            Arc::clone(&endpoint_a),
            timing,
            Arc::clone(&self.sink),
        );

        self.pair = Some(BridgePair {
            endpoint_a,
            endpoint_b,
            worker_ab,
            worker_ba,
        });

        tlog!(
            "[bridge] Connected {} <=> {} at {} baud ({}-{:?}-{}, gap: {} chars)",
            config.port_a,
            config.port_b,
            config.baud,
            config.data_bits,
            config.parity,
            config.stop_bits,
            config.gap_chars
        );

        self.sink.emit(&LogEvent::info(format!(
            "bridging {} <=> {} @ {} bps",
            config.port_a, config.port_b, config.baud
        )));

        Ok(())
    }

    /// Stop both workers, wait for each to fully terminate (final flushes
    /// included), then close both endpoints. Idempotent.
    pub fn disconnect(&mut self) {
        if let Some(mut pair) = self.pair.take() {
            // Request both stops before joining either, so the pair winds
            // down in parallel
            pair.worker_ab.stop();
            pair.worker_ba.stop();
            pair.worker_ab.join();
            pair.worker_ba.join();

            // Workers are done touching the ports; dropping the last
            // handles closes them
            drop(pair.endpoint_a);
            drop(pair.endpoint_b);

            tlog!("[bridge] Disconnected");
        }
    }

    /// Transmit a payload to one endpoint of the live bridge, routed
    /// through the worker that owns writes to that side.
    pub fn send(&self, side: PortSide, data: Vec<u8>) -> Result<(), IoError> {
        let pair = self
            .pair
            .as_ref()
            .ok_or_else(|| IoError::configuration("not connected"))?;
        let worker = match side {
            PortSide::A => &pair.worker_ba,
            PortSide::B => &pair.worker_ab,
        };
        worker.transmit(data)
    }

    /// States of the (A->B, B->A) workers, if connected
    pub fn worker_states(&self) -> Option<(WorkerState, WorkerState)> {
        self.pair
            .as_ref()
            .map(|p| (p.worker_ab.state(), p.worker_ba.state()))
    }
}

impl Drop for BridgeSupervisor {
    fn drop(&mut self) {
        self.disconnect();
    }
}

// ============================================================================
// Tests
// ============================================================================
