//! Error handling for Bambulink
//!
//! Provides error types for each layer of the bridge:
//! - Transport errors (virtual serial port lifecycle)
//! - Protocol errors (Marlin line framing and parsing)
//! - Link errors (MQTT connection to the printer)
//! - Upload errors (file transfer and printer storage)
//!
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Transport error type
///
/// Raised by the virtual serial port when the host uses it outside of
/// its open lifecycle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The session was closed by the host
    #[error("port closed")]
    PortClosed,

    /// The session was halted by an emergency stop
    #[error("printer halted by M112, reopen the port")]
    Halted,

    /// The requested port is not offered by this bridge
    #[error("Port not found: {port}")]
    PortNotFound {
        /// The name of the port that was requested.
        port: String,
    },

    /// The session worker could not be started
    #[error("Failed to start session worker: {reason}")]
    WorkerSpawn {
        /// The reason the worker failed to start.
        reason: String,
    },
}

/// Protocol error type
///
/// Represents a rejected inbound serial line. The display text is the
/// message Marlin prints after `Error:`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Checksum did not match the XOR of the line bytes
    #[error("checksum mismatch, Last Line: {last_line}")]
    ChecksumMismatch {
        /// The last line number that was accepted.
        last_line: u32,
    },

    /// Line number is not the successor of the last accepted one
    #[error("Line Number is not Last Line Number+1, Last Line: {last_line}")]
    LineNumberMismatch {
        /// The last line number that was accepted.
        last_line: u32,
        /// The line number that arrived instead.
        received: u32,
    },

    /// A line number token that is not a valid number
    #[error("Invalid line number '{raw}', Last Line: {last_line}")]
    InvalidLineNumber {
        /// The raw text of the line number token.
        raw: String,
        /// The last line number that was accepted.
        last_line: u32,
    },

    /// A checksum token that is not a valid number
    #[error("Invalid checksum '{raw}', Last Line: {last_line}")]
    InvalidChecksum {
        /// The raw text of the checksum token.
        raw: String,
        /// The last line number that was accepted.
        last_line: u32,
    },

    /// A numbered line carrying no command
    #[error("No command after line number, Last Line: {last_line}")]
    MissingCommand {
        /// The last line number that was accepted.
        last_line: u32,
    },

    /// A line the G-code parser cannot make sense of
    #[error("Malformed command '{line}': {reason}")]
    Malformed {
        /// The offending line.
        line: String,
        /// The reason the line could not be parsed.
        reason: String,
    },
}

/// Link error type
///
/// Represents failures talking to the printer over MQTT.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// No MQTT session is currently established
    #[error("printer link is not connected")]
    NotConnected,

    /// The command could not be queued for publishing
    #[error("Failed to publish command: {reason}")]
    Publish {
        /// The reason the publish failed.
        reason: String,
    },

    /// TLS configuration could not be built
    #[error("TLS setup failed: {reason}")]
    Tls {
        /// The reason the TLS setup failed.
        reason: String,
    },

    /// A report payload could not be decoded
    #[error("Invalid report payload: {reason}")]
    InvalidPayload {
        /// The reason the payload was rejected.
        reason: String,
    },
}

/// Upload error type
///
/// Represents failures moving files to and managing files on the printer
/// storage.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    /// The file type cannot be printed by the device
    #[error("Unsupported file type: {filename}")]
    UnsupportedFileType {
        /// The rejected file name.
        filename: String,
    },

    /// The remote name contains path separators or is empty
    #[error("Invalid remote file name: {filename}")]
    InvalidFileName {
        /// The rejected file name.
        filename: String,
    },

    /// The file does not exist on the printer storage
    #[error("File not found: {filename}")]
    FileNotFound {
        /// The file that was not found.
        filename: String,
    },

    /// The storage backend failed
    #[error("Storage error: {reason}")]
    Storage {
        /// The reason the storage operation failed.
        reason: String,
    },
}

/// Main error type for Bambulink
///
/// Unifies all error types into a single type for convenient error handling
/// across crate boundaries.
#[derive(Error, Debug)]
pub enum Error {
    /// Transport error
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Protocol error
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Link error
    #[error(transparent)]
    Link(#[from] LinkError),

    /// Upload error
    #[error(transparent)]
    Upload(#[from] UploadError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a generic error with a message
    pub fn other(message: impl Into<String>) -> Self {
        Error::Other(message.into())
    }
}

/// Result type for Bambulink operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_display_matches_marlin_text() {
        let err = ProtocolError::LineNumberMismatch {
            last_line: 1,
            received: 3,
        };
        assert_eq!(
            err.to_string(),
            "Line Number is not Last Line Number+1, Last Line: 1"
        );

        let err = ProtocolError::ChecksumMismatch { last_line: 7 };
        assert_eq!(err.to_string(), "checksum mismatch, Last Line: 7");
    }

    #[test]
    fn test_transport_error_closed_text() {
        assert_eq!(TransportError::PortClosed.to_string(), "port closed");
    }

    #[test]
    fn test_error_from_layers() {
        let err: Error = LinkError::NotConnected.into();
        assert!(matches!(err, Error::Link(LinkError::NotConnected)));
        assert_eq!(err.to_string(), "printer link is not connected");

        let err: Error = UploadError::FileNotFound {
            filename: "cube.3mf".to_string(),
        }
        .into();
        assert!(err.to_string().contains("cube.3mf"));
    }

    #[test]
    fn test_error_other() {
        let err = Error::other("boom");
        assert_eq!(err.to_string(), "boom");
    }
}
