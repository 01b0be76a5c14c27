use std::net::SocketAddr;
use std::path::PathBuf;

use serde::Deserialize;

/// Daemon configuration: TOML file under the user config dir, with built-in
/// defaults and a `WARPD_ADDRESS` env override for the listen address.
#[derive(Deserialize, Debug, Clone)]
pub struct DaemonConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    /// Outbound frames buffered per client before it is disconnected.
    #[serde(default = "default_client_backlog")]
    pub client_backlog: usize,
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

impl DaemonConfig {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();
        let mut config: Self = if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)?;
            toml::from_str(&contents)?
        } else {
            Self::default()
        };
        if let Ok(addr) = std::env::var("WARPD_ADDRESS") {
            config.listen_addr = addr.parse()?;
        }
        Ok(config)
    }

    pub fn config_path() -> PathBuf {
        dirs_path().join("config.toml")
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            client_backlog: default_client_backlog(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

fn dirs_path() -> PathBuf {
    if let Ok(config_dir) = std::env::var("XDG_CONFIG_HOME") {
        PathBuf::from(config_dir).join("warpd")
    } else if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".config").join("warpd")
    } else {
        PathBuf::from("/tmp/warpd")
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], warp_protocol::DEFAULT_PORT))
}

fn default_client_backlog() -> usize {
    64
}

fn default_max_frame_bytes() -> usize {
    warp_protocol::codec::MAX_FRAME_BYTES
}
