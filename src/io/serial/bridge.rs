// src/io/serial/bridge.rs
//
// One direction of the bridge: drain the source endpoint, forward every
// byte to the destination without delay, and group received bytes into
// frames for logging using a silence-gap heuristic derived from the link's
// baud rate. Frame reassembly is a side channel for display only and never
// delays the forwarding path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Local;

use crate::io::{Direction, IoError, LogEvent, LogSink, WorkerState};

use super::endpoint::SharedEndpoint;

/// Pause after an unexpected poll/read failure before resuming the loop
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(200);

/// How long a queued transmit waits for the worker to pick it up and report
const TRANSMIT_TIMEOUT: Duration = Duration::from_millis(500);

// ============================================================================
// Timing
// ============================================================================

/// Timing derived once from the link parameters. Baud and framing are fixed
/// for a worker's lifetime; all values are integer nanoseconds with floor
/// rounding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BridgeTiming {
    /// Time to transmit one character on the wire
    pub char_time_ns: u64,
    /// Silence above this (nominal) marks an in-progress frame complete
    pub flush_gap_ns: u64,
    /// Sleep quantum between polls
    pub poll_interval: Duration,
}

impl BridgeTiming {
    /// Below this the timing arithmetic degenerates
    pub const MIN_BAUD: u32 = 300;
    /// Conservative minimum wire framing (8 data bits + start/stop)
    pub const MIN_BITS_PER_CHAR: u32 = 9;
    /// Gap floor so very high baud rates don't produce a zero-length gap
    pub const MIN_FLUSH_GAP_NS: u64 = 100_000;
    /// Poll floor so the loop doesn't peg a core at high baud
    pub const MIN_POLL_INTERVAL: Duration = Duration::from_micros(500);

    /// Derive timing for a link.
    ///
    /// `gap_chars` is how many character-times of silence qualify as
    /// "frame finished" (minimum 1).
    pub fn derive(baud: u32, bits_per_char: u32, gap_chars: u32) -> Self {
        let baud = baud.max(Self::MIN_BAUD) as u64;
        let bits_per_char = bits_per_char.max(Self::MIN_BITS_PER_CHAR) as u64;
        let gap_chars = gap_chars.max(1) as u64;

        let char_time_ns = 1_000_000_000 * bits_per_char / baud;
        let flush_gap_ns = (char_time_ns * gap_chars).max(Self::MIN_FLUSH_GAP_NS);
        let poll_interval = Duration::from_nanos(char_time_ns / 2).max(Self::MIN_POLL_INTERVAL);

        BridgeTiming {
            char_time_ns,
            flush_gap_ns,
            poll_interval,
        }
    }

    /// Idle time that must elapse before a flush fires. Deliberately 1.5×
    /// the nominal gap to reduce false frame splits from scheduling jitter.
    pub fn idle_threshold_ns(&self) -> u64 {
        self.flush_gap_ns + self.flush_gap_ns / 2
    }
}

// ============================================================================
// Transmit Queue
// ============================================================================

/// Manual-send request queued to a worker. The worker writes the payload to
/// its destination endpoint between polls, keeping every port single-writer.
pub struct TransmitRequest {
    pub data: Vec<u8>,
    /// Sync oneshot channel to send the result back
    pub result_tx: mpsc::SyncSender<Result<(), IoError>>,
}

pub type TransmitSender = mpsc::SyncSender<TransmitRequest>;

// ============================================================================
// Frame Accumulator
// ============================================================================

/// Bytes collected since the last flush. Tracks the wall-clock time of the
/// first byte (stamped onto the frame line) and the monotonic time of the
/// most recent byte (drives the idle-gap check).
struct FrameAccumulator {
    bytes: Vec<u8>,
    started_at: Option<chrono::DateTime<Local>>,
    last_rx_at: Option<Instant>,
}

impl FrameAccumulator {
    fn new() -> Self {
        FrameAccumulator {
            bytes: Vec::new(),
            started_at: None,
            last_rx_at: None,
        }
    }

    fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn append(&mut self, data: &[u8], now: Instant) {
        if self.bytes.is_empty() {
            self.started_at = Some(Local::now());
        }
        self.bytes.extend_from_slice(data);
        self.last_rx_at = Some(now);
    }

    /// Nanoseconds since the most recent byte, if any
    fn idle_ns(&self, now: Instant) -> Option<u64> {
        self.last_rx_at
            .map(|at| now.saturating_duration_since(at).as_nanos() as u64)
    }

    /// Take the buffered bytes and their start timestamp, resetting state
    fn take(&mut self) -> (Vec<u8>, chrono::DateTime<Local>) {
        let started_at = self.started_at.take().unwrap_or_else(Local::now);
        self.last_rx_at = None;
        (std::mem::take(&mut self.bytes), started_at)
    }
}

// ============================================================================
// Bridge Worker
// ============================================================================

/// Handle to one running direction of the bridge.
///
/// Stop is cooperative: `stop()` requests termination, `join()` waits for
/// the thread to observe the flag, perform its final flush, and exit. A
/// stopped worker cannot be restarted.
pub struct BridgeWorker {
    direction: Direction,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    transmit_tx: TransmitSender,
}

impl BridgeWorker {
    /// Construct and start a worker forwarding `source` → `dest`.
    pub fn spawn(
        direction: Direction,
        source: SharedEndpoint,
        dest: SharedEndpoint,
        timing: BridgeTiming,
        sink: Arc<LogSink>,
    ) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let (transmit_tx, transmit_rx) = mpsc::sync_channel::<TransmitRequest>(32);

        let thread_running = Arc::clone(&running);
        let handle = thread::spawn(move || {
            let mut forward = ForwardLoop {
                direction,
                source,
                dest,
                timing,
                sink,
                frame: FrameAccumulator::new(),
                read_buf: Vec::new(),
            };
            forward.run(&thread_running, &transmit_rx);
        });

        BridgeWorker {
            direction,
            running,
            handle: Some(handle),
            transmit_tx,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
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

    /// Request termination. The worker exits after its current iteration
    /// and flushes any in-progress frame; call `join()` to wait for that.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    /// Wait for the worker thread to terminate (final flush included)
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    /// Queue a payload for transmission to this worker's destination
    /// endpoint and wait for the outcome.
    pub fn transmit(&self, data: Vec<u8>) -> Result<(), IoError> {
        let (result_tx, result_rx) = mpsc::sync_channel(1);
        self.transmit_tx
            .try_send(TransmitRequest { data, result_tx })
            .map_err(|e| IoError::configuration(format!("transmit queue unavailable: {}", e)))?;

        result_rx
            .recv_timeout(TRANSMIT_TIMEOUT)
            .map_err(|e| IoError::configuration(format!("transmit timed out: {}", e)))?
    }
}

// ============================================================================
// Forwarding Loop
// ============================================================================

struct ForwardLoop {
    direction: Direction,
    source: SharedEndpoint,
    dest: SharedEndpoint,
    timing: BridgeTiming,
    sink: Arc<LogSink>,
    frame: FrameAccumulator,
    read_buf: Vec<u8>,
}

impl ForwardLoop {
    fn run(&mut self, running: &AtomicBool, transmit_rx: &mpsc::Receiver<TransmitRequest>) {
        while running.load(Ordering::Relaxed) {
            // Queued manual sends go out between polls; the result travels
            // back to the caller instead of the log.
            while let Ok(req) = transmit_rx.try_recv() {
                let result = self.write_dest(&req.data);
                let _ = req.result_tx.try_send(result);
            }

            match self.poll_once() {
                Ok(()) => thread::sleep(self.timing.poll_interval),
                Err(e) => {
                    // A transient fault must not terminate the worker
                    self.sink.emit(&LogEvent::error(format!(
                        "forwarding error ({}): {}",
                        self.direction.label(),
                        e
                    )));
                    thread::sleep(READ_ERROR_BACKOFF);
                }
            }
        }

        // Stopping: flush any remaining buffered frame so nothing in flight
        // is silently dropped.
        self.flush_frame();
    }

    /// One iteration: drain waiting bytes and forward them, or check the
    /// idle gap when nothing is waiting.
    fn poll_once(&mut self) -> Result<(), IoError> {
        let available = {
            let mut source = match self.source.lock() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            let available = source.bytes_to_read()?;
            if available > 0 {
                self.read_buf.resize(available, 0);
                source.read_available(&mut self.read_buf)?
            } else {
                0
            }
        };

        if available > 0 {
            let now = Instant::now();
            let data = std::mem::take(&mut self.read_buf);
            self.frame.append(&data[..available], now);

            // Forward immediately. A write failure is logged and forwarding
            // of subsequent bytes continues; the bytes still count toward
            // the frame accumulator.
            if let Err(e) = self.write_dest(&data[..available]) {
                self.sink.emit(&LogEvent::error(format!(
                    "write {} failed: {}",
                    self.direction.label(),
                    e
                )));
            }
            self.read_buf = data;
        } else {
            self.flush_if_idle(Instant::now());
        }

        Ok(())
    }

    fn write_dest(&self, data: &[u8]) -> Result<(), IoError> {
        let mut dest = match self.dest.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        dest.write_all(data)
    }

    /// Flush the buffered frame if the silence gap has elapsed
    fn flush_if_idle(&mut self, now: Instant) {
        if self.frame.is_empty() {
            return;
        }
        if let Some(idle) = self.frame.idle_ns(now) {
            if idle >= self.timing.idle_threshold_ns() {
                self.flush_frame();
            }
        }
    }

    /// Emit the buffered frame as one consolidated log line and reset
    fn flush_frame(&mut self) {
        if self.frame.is_empty() {
            return;
        }
        let (payload, started_at) = self.frame.take();
        self.sink
            .emit(&LogEvent::frame(self.direction, started_at, &payload));
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::io::serial::endpoint::Endpoint;
    use crate::io::{DisplaySink, LogColor};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    // ------------------------------------------------------------------
    // Timing derivation
    // ------------------------------------------------------------------

    #[test]
    fn test_timing_9600_8n1() {
        let t = BridgeTiming::derive(9600, 10, 3);
        assert_eq!(t.char_time_ns, 1_041_666);
        assert_eq!(t.flush_gap_ns, 3_124_998);
        assert_eq!(t.idle_threshold_ns(), 4_687_497);
        assert_eq!(t.poll_interval, Duration::from_nanos(520_833));
    }

    #[test]
    fn test_timing_clamps() {
        // Degenerate inputs clamp to the minimums
        let t = BridgeTiming::derive(1, 0, 0);
        assert_eq!(t.char_time_ns, 1_000_000_000 * 9 / 300);
        assert_eq!(t.flush_gap_ns, t.char_time_ns);

        // Very high baud floors both the gap and the poll interval
        let t = BridgeTiming::derive(2_000_000, 10, 3);
        assert_eq!(t.flush_gap_ns, BridgeTiming::MIN_FLUSH_GAP_NS);
        assert_eq!(t.poll_interval, BridgeTiming::MIN_POLL_INTERVAL);
    }

    #[test]
    fn test_timing_bounds_hold_across_range() {
        for baud in [300u32, 600, 9600, 115_200, 256_000, 1_000_000] {
            for bits in [9u32, 10, 11] {
                let t = BridgeTiming::derive(baud, bits, 3);
                assert!(t.flush_gap_ns >= BridgeTiming::MIN_FLUSH_GAP_NS);
                assert_eq!(
                    t.flush_gap_ns,
                    (t.char_time_ns * 3).max(BridgeTiming::MIN_FLUSH_GAP_NS)
                );
                assert!(t.poll_interval >= BridgeTiming::MIN_POLL_INTERVAL);
            }
        }
    }

    // ------------------------------------------------------------------
    // Test doubles
    // ------------------------------------------------------------------

    #[derive(Default)]
    pub(crate) struct TestPortState {
        pub rx: VecDeque<u8>,
        pub written: Vec<u8>,
        pub fail_writes: bool,
        pub fail_reads: bool,
    }

    struct TestPort {
        name: String,
        state: Arc<Mutex<TestPortState>>,
    }

    impl Endpoint for TestPort {
        fn name(&self) -> &str {
            &self.name
        }

        fn bytes_to_read(&mut self) -> Result<usize, IoError> {
            let state = self.state.lock().unwrap();
            if state.fail_reads {
                return Err(IoError::read(&self.name, "injected fault"));
            }
            Ok(state.rx.len())
        }

        fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, IoError> {
            let mut state = self.state.lock().unwrap();
            let n = buf.len().min(state.rx.len());
            for slot in buf.iter_mut().take(n) {
                *slot = state.rx.pop_front().unwrap();
            }
            Ok(n)
        }

        fn write_all(&mut self, data: &[u8]) -> Result<(), IoError> {
            let mut state = self.state.lock().unwrap();
            if state.fail_writes {
                return Err(IoError::write(&self.name, "injected fault"));
            }
            state.written.extend_from_slice(data);
            Ok(())
        }

        fn is_open(&self) -> bool {
            true
        }
    }

    pub(crate) fn test_endpoint(name: &str) -> (SharedEndpoint, Arc<Mutex<TestPortState>>) {
        let state = Arc::new(Mutex::new(TestPortState::default()));
        let port = TestPort {
            name: name.to_string(),
            state: Arc::clone(&state),
        };
        (
            Arc::new(Mutex::new(Box::new(port) as Box<dyn Endpoint>)),
            state,
        )
    }

    pub(crate) struct RecordingSink {
        pub events: Arc<Mutex<Vec<(String, LogColor)>>>,
    }

    impl DisplaySink for RecordingSink {
        fn append(&self, text: &str, color: LogColor) {
            self.events.lock().unwrap().push((text.to_string(), color));
        }
    }

    pub(crate) fn recording_sink() -> (Arc<LogSink>, Arc<Mutex<Vec<(String, LogColor)>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::new(LogSink::new(Box::new(RecordingSink {
            events: Arc::clone(&events),
        })));
        (sink, events)
    }

    fn inject(state: &Arc<Mutex<TestPortState>>, data: &[u8]) {
        state.lock().unwrap().rx.extend(data.iter().copied());
    }

    fn written(state: &Arc<Mutex<TestPortState>>) -> Vec<u8> {
        state.lock().unwrap().written.clone()
    }

    fn frame_lines(events: &Arc<Mutex<Vec<(String, LogColor)>>>) -> Vec<String> {
        events
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, c)| *c == LogColor::Forward || *c == LogColor::Reverse)
            .map(|(t, _)| t.clone())
            .collect()
    }

    /// Fast timing for worker tests: 0.39 ms idle threshold, 0.5 ms poll
    fn fast_timing() -> BridgeTiming {
        BridgeTiming::derive(115_200, 10, 3)
    }

    /// Slow timing for shutdown tests: 150 ms idle threshold
    fn slow_timing() -> BridgeTiming {
        BridgeTiming::derive(300, 10, 3)
    }

    // ------------------------------------------------------------------
    // Worker behaviour
    // ------------------------------------------------------------------

    #[test]
    fn test_burst_forwarded_and_logged_as_one_frame() {
        let (source, source_state) = test_endpoint("src");
        let (dest, dest_state) = test_endpoint("dst");
        let (sink, events) = recording_sink();

        let mut worker =
            BridgeWorker::spawn(Direction::AToB, source, dest, fast_timing(), sink);

        inject(&source_state, &[0x41, 0x42, 0x43]);
        thread::sleep(Duration::from_millis(20));

        worker.stop();
        worker.join();

        assert_eq!(written(&dest_state), vec![0x41, 0x42, 0x43]);
        let frames = frame_lines(&events);
        assert_eq!(frames.len(), 1, "one burst must yield one frame line");
        assert!(frames[0].starts_with("[A->B] "));
        assert!(frames[0].ends_with(" : 41 42 43\n"));
    }

    #[test]
    fn test_bursts_separated_by_gap_yield_two_frames() {
        let (source, source_state) = test_endpoint("src");
        let (dest, dest_state) = test_endpoint("dst");
        let (sink, events) = recording_sink();

        let mut worker =
            BridgeWorker::spawn(Direction::BToA, source, dest, fast_timing(), sink);

        inject(&source_state, &[0x01, 0x02]);
        thread::sleep(Duration::from_millis(20));
        inject(&source_state, &[0x03]);
        thread::sleep(Duration::from_millis(20));

        worker.stop();
        worker.join();

        assert_eq!(written(&dest_state), vec![0x01, 0x02, 0x03]);
        let frames = frame_lines(&events);
        assert_eq!(frames.len(), 2);
        assert!(frames[0].ends_with(" : 01 02\n"));
        assert!(frames[1].ends_with(" : 03\n"));
        assert!(frames.iter().all(|f| f.starts_with("[A<-B] ")));
    }

    #[test]
    fn test_stop_flushes_partial_frame() {
        let (source, source_state) = test_endpoint("src");
        let (dest, dest_state) = test_endpoint("dst");
        let (sink, events) = recording_sink();

        // 150 ms idle threshold: the frame cannot flush on its own below
        let mut worker =
            BridgeWorker::spawn(Direction::AToB, source, dest, slow_timing(), sink);

        inject(&source_state, &[0xCA, 0xFE]);
        // Long enough to be read, far shorter than the idle threshold
        thread::sleep(Duration::from_millis(60));
        assert_eq!(written(&dest_state), vec![0xCA, 0xFE]);
        assert!(frame_lines(&events).is_empty(), "gap has not elapsed yet");

        worker.stop();
        worker.join();

        let frames = frame_lines(&events);
        assert_eq!(frames.len(), 1, "stop must flush the in-progress frame");
        assert!(frames[0].ends_with(" : CA FE\n"));
        assert_eq!(worker.state(), WorkerState::Stopped);
    }

    #[test]
    fn test_write_failure_logged_but_frame_still_flushes() {
        let (source, source_state) = test_endpoint("src");
        let (dest, dest_state) = test_endpoint("dst");
        dest_state.lock().unwrap().fail_writes = true;
        let (sink, events) = recording_sink();

        let mut worker =
            BridgeWorker::spawn(Direction::AToB, source, dest, fast_timing(), sink);

        inject(&source_state, &[0x10, 0x20]);
        thread::sleep(Duration::from_millis(20));

        worker.stop();
        worker.join();

        assert!(written(&dest_state).is_empty());
        let events = events.lock().unwrap();
        assert!(
            events
                .iter()
                .any(|(t, c)| *c == LogColor::Error && t.contains("write A->B failed")),
            "write failure must surface as an error event"
        );
        assert!(
            events
                .iter()
                .any(|(t, c)| *c == LogColor::Forward && t.ends_with(" : 10 20\n")),
            "the burst must still be counted toward the frame log"
        );
    }

    #[test]
    fn test_read_fault_does_not_terminate_worker() {
        let (source, source_state) = test_endpoint("src");
        let (dest, dest_state) = test_endpoint("dst");
        let (sink, events) = recording_sink();

        let mut worker =
            BridgeWorker::spawn(Direction::AToB, source, dest, fast_timing(), sink);

        source_state.lock().unwrap().fail_reads = true;
        thread::sleep(Duration::from_millis(20));
        source_state.lock().unwrap().fail_reads = false;

        // The worker must still be alive and forwarding after the fault
        inject(&source_state, &[0x55]);
        thread::sleep(Duration::from_millis(250)); // outlasts the error backoff

        worker.stop();
        worker.join();

        assert_eq!(written(&dest_state), vec![0x55]);
        assert!(events
            .lock()
            .unwrap()
            .iter()
            .any(|(t, c)| *c == LogColor::Error && t.contains("forwarding error (A->B)")));
    }

    #[test]
    fn test_byte_order_preserved_under_concurrent_injection() {
        let (port_a, state_a) = test_endpoint("a");
        let (port_b, state_b) = test_endpoint("b");
        let (sink, _events) = recording_sink();

        let mut ab = BridgeWorker::spawn(
            Direction::AToB,
            Arc::clone(&port_a),
            Arc::clone(&port_b),
            fast_timing(),
            Arc::clone(&sink),
        );
        let mut ba = BridgeWorker::spawn(Direction::BToA, port_b, port_a, fast_timing(), sink);

        let expected_a: Vec<u8> = (0..=255u8).cycle().take(1024).collect();
        let expected_b: Vec<u8> = (0..=255u8).rev().cycle().take(1024).collect();

        let inj_a = {
            let state = Arc::clone(&state_a);
            let data = expected_a.clone();
            thread::spawn(move || {
                for chunk in data.chunks(37) {
                    state.lock().unwrap().rx.extend(chunk.iter().copied());
                    thread::sleep(Duration::from_micros(200));
                }
            })
        };
        let inj_b = {
            let state = Arc::clone(&state_b);
            let data = expected_b.clone();
            thread::spawn(move || {
                for chunk in data.chunks(53) {
                    state.lock().unwrap().rx.extend(chunk.iter().copied());
                    thread::sleep(Duration::from_micros(200));
                }
            })
        };
        inj_a.join().unwrap();
        inj_b.join().unwrap();
        thread::sleep(Duration::from_millis(50));

        ab.stop();
        ba.stop();
        ab.join();
        ba.join();

        assert_eq!(written(&state_b), expected_a, "A->B bytes reordered or lost");
        assert_eq!(written(&state_a), expected_b, "B->A bytes reordered or lost");
    }

    #[test]
    fn test_transmit_routes_through_worker() {
        let (source, _source_state) = test_endpoint("src");
        let (dest, dest_state) = test_endpoint("dst");
        let (sink, _events) = recording_sink();

        let mut worker =
            BridgeWorker::spawn(Direction::AToB, source, dest, fast_timing(), sink);

        worker.transmit(vec![0xAA, 0xBB]).unwrap();
        assert_eq!(written(&dest_state), vec![0xAA, 0xBB]);

        worker.stop();
        worker.join();

        // A stopped worker no longer services its queue
        assert!(worker.transmit(vec![0x01]).is_err());
    }

    #[test]
    fn test_worker_state_machine() {
        let (source, _s) = test_endpoint("src");
        let (dest, _d) = test_endpoint("dst");
        let (sink, _e) = recording_sink();

        let mut worker =
            BridgeWorker::spawn(Direction::AToB, source, dest, fast_timing(), sink);
        assert_eq!(worker.state(), WorkerState::Running);

        worker.stop();
        assert_eq!(worker.state(), WorkerState::StopRequested);

        worker.join();
        assert_eq!(worker.state(), WorkerState::Stopped);
    }
}
