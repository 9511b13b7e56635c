//! Command line and environment configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use clap::Parser;

/// Default number of frames buffered per connection before it is dropped as
/// too slow.
pub const DEFAULT_OUTBOUND_BUFFER: usize = 256;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "doodlewire-server",
    about = "WebSocket relay for a shared drawing canvas",
    version
)]
pub struct ServerConfig {
    /// Address to listen on
    #[arg(long, env = "DOODLEWIRE_BIND", default_value = "0.0.0.0")]
    pub bind: IpAddr,

    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Directory of client assets served over plain HTTP
    #[arg(long, env = "DOODLEWIRE_STATIC_DIR")]
    pub static_dir: Option<PathBuf>,

    /// Frames buffered per connection before it is dropped as too slow
    #[arg(long, env = "DOODLEWIRE_OUTBOUND_BUFFER", default_value_t = DEFAULT_OUTBOUND_BUFFER)]
    pub outbound_buffer: usize,
}

impl ServerConfig {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            static_dir: None,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flags() {
        let config = ServerConfig::try_parse_from([
            "doodlewire-server",
            "--bind",
            "127.0.0.1",
            "--port",
            "8080",
            "--static-dir",
            "public",
            "--outbound-buffer",
            "16",
        ])
        .unwrap();

        assert_eq!(config.addr(), "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.static_dir, Some(PathBuf::from("public")));
        assert_eq!(config.outbound_buffer, 16);
    }

    #[test]
    fn test_rejects_bad_port() {
        assert!(ServerConfig::try_parse_from(["doodlewire-server", "--port", "99999"]).is_err());
    }
}
