pub mod paths;

use std::net::IpAddr;

/// Server configuration sourced from environment variables (§6).
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: IpAddr,
    pub port: u16,
    pub control_dir: std::path::PathBuf,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let bind_address = std::env::var("BIND_ADDRESS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(|| "0.0.0.0".parse().unwrap());

        let port = std::env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(4020);

        let control_dir = match std::env::var("VIBETUNNEL_CONTROL_DIR") {
            Ok(dir) => std::path::PathBuf::from(dir),
            Err(_) => paths::default_control_dir(),
        };

        Ok(Self {
            bind_address,
            port,
            control_dir,
        })
    }
}
