//! Client configuration.
//!
//! Every field has a default, so an empty YAML document (or `ClientConfig::default()`)
//! is a working configuration:
//!
//! ```rust
//! use cgstream::ClientConfig;
//!
//! let config = ClientConfig::from_yaml_str("port: 804\nrtt_window: 10\n").unwrap();
//! assert_eq!(config.port, 804);
//! assert_eq!(config.receive_buffer_size, 4 * 1024 * 1024);
//! ```

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

use crate::{Result, StreamError};

/// Default server port.
pub const DEFAULT_PORT: u16 = 801;

/// How frames are scheduled by the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamMode {
    /// The server sends every frame as soon as it is ready.
    #[default]
    ServerPush,
    /// The client requests each frame.
    ClientPull,
    /// The client requests the next frame as soon as one arrives, so one is always in flight.
    ClientPullPreFetch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub port: u16,
    /// Socket receive buffer, in bytes.
    pub receive_buffer_size: usize,
    /// Linger timeout applied on close.
    pub linger_ms: u64,
    /// Largest frame payload accepted from a stream; guards corrupt length fields.
    pub max_frame_size: usize,
    /// Largest datagram read in multicast mode.
    pub max_datagram_size: usize,
    /// Round-trip samples averaged for the network latency estimate.
    pub rtt_window: usize,
    /// How far past the last sample the retimer will extrapolate.
    pub maximum_prediction_ms: u64,
    /// Frames kept in the retiming pose history.
    pub history_capacity: usize,
    /// Local adapter address to bind before connecting.
    pub local_adapter: Option<Ipv4Addr>,
    pub stream_mode: StreamMode,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            receive_buffer_size: 4 * 1024 * 1024,
            linger_ms: 1000,
            max_frame_size: 64 * 1024 * 1024,
            max_datagram_size: 65_507,
            rtt_window: 20,
            maximum_prediction_ms: 100,
            history_capacity: 200,
            local_adapter: None,
            stream_mode: StreamMode::ServerPush,
        }
    }
}

impl ClientConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml_ng::from_str(yaml)
            .map_err(|e| StreamError::config(format!("invalid client config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            StreamError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&yaml)
    }

    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(StreamError::config("port must be non-zero"));
        }
        if self.rtt_window == 0 {
            return Err(StreamError::config("rtt_window must hold at least one sample"));
        }
        if self.history_capacity < 2 {
            return Err(StreamError::config("history_capacity must be at least 2 to interpolate"));
        }
        if self.max_frame_size == 0 || self.max_datagram_size == 0 {
            return Err(StreamError::config("frame size limits must be non-zero"));
        }
        Ok(())
    }

    pub fn linger(&self) -> Duration {
        Duration::from_millis(self.linger_ms)
    }

    pub fn maximum_prediction(&self) -> Duration {
        Duration::from_millis(self.maximum_prediction_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_document_gives_defaults() {
        let config = ClientConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.maximum_prediction(), Duration::from_millis(100));
    }

    #[test]
    fn overrides_and_enums_parse() {
        let config = ClientConfig::from_yaml_str(
            "local_adapter: 192.168.1.20\nstream_mode: ClientPullPreFetch\nlinger_ms: 0\n",
        )
        .unwrap();
        assert_eq!(config.local_adapter, Some(Ipv4Addr::new(192, 168, 1, 20)));
        assert_eq!(config.stream_mode, StreamMode::ClientPullPreFetch);
        assert_eq!(config.linger(), Duration::ZERO);
    }

    #[test]
    fn invalid_values_are_config_errors() {
        assert!(matches!(
            ClientConfig::from_yaml_str("rtt_window: 0"),
            Err(StreamError::Config { .. })
        ));
        assert!(matches!(
            ClientConfig::from_yaml_str("port: not-a-number"),
            Err(StreamError::Config { .. })
        ));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port: 802").unwrap();
        let config = ClientConfig::from_file(file.path()).unwrap();
        assert_eq!(config.port, 802);
        assert!(ClientConfig::from_file("/nonexistent/cgstream.yaml").is_err());
    }
}
