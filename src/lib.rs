#[macro_use]
mod logging;

pub mod io;
pub mod script;
pub mod settings;

pub use io::serial::{
    list_ports, open_port, BridgeConfig, BridgeSupervisor, BridgeTiming, BridgeWorker,
    Endpoint, LineMonitor, Parity, PortInfo, SharedEndpoint,
};
pub use io::{DisplaySink, Direction, IoError, LogColor, LogEvent, LogSink, PortSide, WorkerState};
pub use logging::{init_file_logging, stop_file_logging};
pub use script::{parse_script, run_script, ScriptStep};
pub use settings::{
    load_cached_selection, save_cached_selection, CachedSelection, BAUD_RATES, DEFAULT_BAUD,
};
