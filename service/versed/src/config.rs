//! Server configuration (§6 ADDED), loaded from a TOML file the same way
//! `game::core::config::GameConfig` does with `serdeconv`.
use serde_derive::{Deserialize, Serialize};
use std::path::Path;
use verse_core::defaults;

#[derive(Serialize, Deserialize)]
pub struct ServerConfig {
    pub listen_address: String,
    pub default_fps: f32,
    pub in_queue_max_size: usize,
    pub out_queue_max_size: usize,
}

impl Default for ServerConfig {
    fn default() -> ServerConfig {
        ServerConfig {
            listen_address: format!("0.0.0.0:{}", defaults::DEFAULT_TCP_PORT),
            default_fps: 20.0,
            in_queue_max_size: verse_core::inbound::IN_QUEUE_DEFAULT_MAX_SIZE,
            out_queue_max_size: verse_core::outbound::OUT_QUEUE_DEFAULT_MAX_SIZE,
        }
    }
}

impl ServerConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> ServerConfig {
        serdeconv::from_toml_file(path).expect("error loading server configuration file")
    }
}
