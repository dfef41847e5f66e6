//! Configuration system.
//!
//! Loads configuration from JSON strings/files (file IO left to app).

use serde::{Deserialize, Serialize};

/// Root configuration shared by client/server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Server listen address, e.g. `127.0.0.1:40000`.
    pub server_addr: String,
    /// Fixed physics/broadcast tick rate.
    pub tick_hz: u32,
    /// Catch-up bound for the fixed-timestep stepper.
    #[serde(default = "default_max_sub_steps")]
    pub max_sub_steps: u32,
    /// Display-name stem (client only); the identity seed is appended.
    #[serde(default = "default_player_name")]
    pub player_name: String,
}

fn default_max_sub_steps() -> u32 {
    3
}

fn default_player_name() -> String {
    "Player".to_string()
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:40000".to_string(),
            tick_hz: 60,
            max_sub_steps: default_max_sub_steps(),
            player_name: default_player_name(),
        }
    }
}

impl SyncConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}
