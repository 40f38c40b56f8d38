//! Error types for the streaming client.
//!
//! Every fallible operation in the crate returns [`StreamError`]. The variants fall into
//! four families:
//!
//! - **Transport-fatal**: socket failures during connect, fill or flush. The connection is
//!   torn down and the disconnect callback fires; nothing is retried automatically.
//! - **Protocol-malformed**: tag mismatches, truncated sub-objects, handshake violations.
//!   Handled exactly like transport-fatal errors by the frame pump.
//! - **Query-time**: unknown names, out-of-range indices, no frame yet. Returned from the
//!   specific accessor call and never affect the connection.
//! - **Configuration**: invalid axis mapping, invalid multicast address, bad config file.
//!   Rejected synchronously by the call that would apply them.
//!
//! ```rust
//! use cgstream::StreamError;
//!
//! let error = StreamError::protocol("frame dispatch", "outer tag is not Objects");
//! assert!(error.is_connection_fatal());
//! for suggestion in error.recovery_suggestions() {
//!     println!("  - {}", suggestion);
//! }
//! ```

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for streaming operations.
pub type Result<T, E = StreamError> = std::result::Result<T, E>;

/// Main error type for streaming operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StreamError {
    #[error("Failed to connect to {host}: {reason}")]
    Connection {
        host: String,
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Transport failure during {context}")]
    Transport {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed frame in {context}: {details}")]
    Protocol { context: String, details: String },

    #[error("Read of {requested} bytes at offset {offset} exceeds buffer length {length}")]
    BufferUnderrun { offset: usize, requested: usize, length: usize },

    #[error("Transport is receive-only and cannot send")]
    ReceiveOnly,

    #[error("Client is not connected")]
    NotConnected,

    #[error("No frame has been received yet")]
    NoFrame,

    #[error("Subject '{name}' not found")]
    InvalidSubjectName { name: String },

    #[error("Segment '{name}' not found")]
    InvalidSegmentName { name: String },

    #[error("Device '{name}' not found")]
    InvalidDeviceName { name: String },

    #[error("Camera '{name}' not found")]
    InvalidCameraName { name: String },

    #[error("Index {index} out of range (count {count})")]
    InvalidIndex { index: usize, count: usize },

    #[error("Requested time is {before:?} before the first sample in the pose history")]
    EarlyDataRequested { before: Duration },

    #[error("Requested time is {beyond:?} past the last sample, limit is {limit:?}")]
    LateDataRequested { beyond: Duration, limit: Duration },

    #[error("Invalid axis mapping: {reason}")]
    InvalidAxisMapping { reason: String },

    #[error("{address} is neither a multicast nor the broadcast address")]
    InvalidMulticastAddress { address: Ipv4Addr },

    #[error("Configuration error: {details}")]
    Config { details: String },

    #[error("Timing log error: {}", path.display())]
    TimingLog {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StreamError {
    /// Returns whether this error ends the connection it occurred on.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            StreamError::Connection { .. }
                | StreamError::Transport { .. }
                | StreamError::Protocol { .. }
                | StreamError::BufferUnderrun { .. }
                | StreamError::ReceiveOnly
        )
    }

    /// Returns whether this error is potentially recoverable through retry.
    ///
    /// Retrying here means reconnecting or asking again later; the client never
    /// retries on its own.
    pub fn is_retryable(&self) -> bool {
        match self {
            StreamError::Connection { .. } => true,
            StreamError::Transport { .. } => true,
            StreamError::NotConnected => true,
            StreamError::NoFrame => true,
            StreamError::EarlyDataRequested { .. } => true,
            StreamError::LateDataRequested { .. } => true,
            StreamError::Protocol { .. } => false,
            StreamError::BufferUnderrun { .. } => false,
            StreamError::ReceiveOnly => false,
            StreamError::InvalidSubjectName { .. } => false,
            StreamError::InvalidSegmentName { .. } => false,
            StreamError::InvalidDeviceName { .. } => false,
            StreamError::InvalidCameraName { .. } => false,
            StreamError::InvalidIndex { .. } => false,
            StreamError::InvalidAxisMapping { .. } => false,
            StreamError::InvalidMulticastAddress { .. } => false,
            StreamError::Config { .. } => false,
            StreamError::TimingLog { .. } => false,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            StreamError::Connection { .. } => vec![
                "Check the capture server is running and reachable",
                "Verify the host name and port",
                "Check the local adapter address if one was given",
            ],
            StreamError::Transport { .. } => vec![
                "Reconnect to the server",
                "Check network stability between client and server",
            ],
            StreamError::Protocol { .. } | StreamError::BufferUnderrun { .. } => vec![
                "Verify server and client protocol versions match",
                "Reconnect to resynchronise the stream",
            ],
            StreamError::ReceiveOnly => vec![
                "Use a unicast connection to send control messages",
                "Do not queue requests while receiving multicast",
            ],
            StreamError::NotConnected => vec![
                "Call connect() or receive_multicast() first",
                "Check the disconnect callback for a dropped connection",
            ],
            StreamError::NoFrame => vec![
                "Wait for the first frame to arrive",
                "Check the server is streaming data",
            ],
            StreamError::InvalidSubjectName { .. }
            | StreamError::InvalidSegmentName { .. }
            | StreamError::InvalidDeviceName { .. }
            | StreamError::InvalidCameraName { .. } => vec![
                "Check name spelling and case",
                "List available names from the current frame",
            ],
            StreamError::InvalidIndex { .. } => vec![
                "Query the item count before indexing",
                "Indices are zero based",
            ],
            StreamError::EarlyDataRequested { .. } => vec![
                "Request a later time",
                "Wait for more history to accumulate",
            ],
            StreamError::LateDataRequested { .. } => vec![
                "Reduce the prediction offset",
                "Increase the maximum prediction bound",
                "Check the server is still sending frames",
            ],
            StreamError::InvalidAxisMapping { .. } => vec![
                "Use three mutually perpendicular directions",
                "Ensure the mapping forms a right-handed system",
            ],
            StreamError::InvalidMulticastAddress { .. } => vec![
                "Use an address in 224.0.0.0/4",
                "Use 255.255.255.255 for broadcast",
            ],
            StreamError::Config { .. } => vec![
                "Check the configuration file syntax",
                "Compare field names against ClientConfig",
            ],
            StreamError::TimingLog { .. } => vec![
                "Check the log directory exists and is writable",
                "Ensure sufficient disk space",
            ],
        }
    }

    /// Helper constructor for connection failures.
    pub fn connection_failed(host: impl Into<String>, reason: impl Into<String>) -> Self {
        StreamError::Connection { host: host.into(), reason: reason.into(), source: None }
    }

    /// Helper constructor for connection failures with source.
    pub fn connection_failed_with_source(
        host: impl Into<String>,
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        StreamError::Connection { host: host.into(), reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for transport I/O failures.
    pub fn transport(context: impl Into<String>, source: std::io::Error) -> Self {
        StreamError::Transport { context: context.into(), source }
    }

    /// Helper constructor for malformed frames.
    pub fn protocol(context: impl Into<String>, details: impl Into<String>) -> Self {
        StreamError::Protocol { context: context.into(), details: details.into() }
    }

    /// Helper constructor for index errors.
    pub fn invalid_index(index: usize, count: usize) -> Self {
        StreamError::InvalidIndex { index, count }
    }

    /// Helper constructor for configuration errors.
    pub fn config(details: impl Into<String>) -> Self {
        StreamError::Config { details: details.into() }
    }
}

impl From<std::io::Error> for StreamError {
    fn from(err: std::io::Error) -> Self {
        StreamError::Transport { context: "socket operation".to_string(), source: err }
    }
}
