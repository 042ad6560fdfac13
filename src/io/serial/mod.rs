// src/io/serial/mod.rs
//
// Serial bridge core: the endpoint seam, the per-direction forwarding
// workers, the single-port line monitor, and the supervisor that owns the
// pair's lifecycle.

pub mod bridge;
pub mod endpoint;
pub mod monitor;
pub mod supervisor;
pub mod utils;

// Re-export the types used by other modules
pub use bridge::{BridgeTiming, BridgeWorker};
pub use endpoint::{open_port, Endpoint, SharedEndpoint};
pub use monitor::LineMonitor;
pub use supervisor::{BridgeConfig, BridgeSupervisor};
pub use utils::{list_ports, Parity, PortInfo};
