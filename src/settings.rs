// src/settings.rs
//
// Persisted user selections: the last-used port pair and baud rate are
// cached as JSON under the platform data directory and restored at startup.
// A missing or corrupt cache is ignored, never an error.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Conventional baud rates surfaced by the CLI. The core accepts any
/// positive integer; this list is just the menu.
pub const BAUD_RATES: [u32; 14] = [
    300, 600, 1200, 2400, 4800, 9600, 14400, 19200, 28800, 38400, 57600, 115200, 128000, 256000,
];

pub const DEFAULT_BAUD: u32 = 115200;

/// Last-used connection selections
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CachedSelection {
    #[serde(default)]
    pub port_a: Option<String>,
    #[serde(default)]
    pub port_b: Option<String>,
    #[serde(default)]
    pub baud: Option<u32>,
}

/// Resolved once per process; `None` when the platform exposes no user
/// data directory.
static CACHE_PATH: Lazy<Option<PathBuf>> =
    Lazy::new(|| dirs::data_dir().map(|d| d.join("midwire").join("cache.json")));

/// Load the cached selections, falling back to defaults when the cache is
/// missing or unreadable.
pub fn load_cached_selection() -> CachedSelection {
    match CACHE_PATH.as_ref() {
        Some(path) => load_from(path),
        None => CachedSelection::default(),
    }
}

/// Persist the selections, creating the data directory if needed.
pub fn save_cached_selection(selection: &CachedSelection) -> Result<(), String> {
    let path = CACHE_PATH
        .as_ref()
        .ok_or("No user data directory available")?;
    save_to(path, selection)
}

fn load_from(path: &Path) -> CachedSelection {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|contents| serde_json::from_str(&contents).ok())
        .unwrap_or_default()
}

fn save_to(path: &Path, selection: &CachedSelection) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create data dir: {}", e))?;
    }
    let json = serde_json::to_string_pretty(selection)
        .map_err(|e| format!("Failed to serialise selections: {}", e))?;
    std::fs::write(path, json).map_err(|e| format!("Failed to write {}: {}", path.display(), e))
}

// ============================================================================
// Tests
// ============================================================================
