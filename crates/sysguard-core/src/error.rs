//! Error types for the sysguard sensor library.

use std::time::Duration;

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while scanning or serving sensors.
#[derive(Error, Debug)]
pub enum Error {
    /// No sensor is registered under this path.
    #[error("Unknown sensor: {0}")]
    SensorNotFound(String),

    /// The sensor exists but its source vanished during the last scan.
    #[error("Sensor value unavailable: {0}")]
    SensorUnavailable(String),

    /// A bounded read would have overflowed its buffer.
    #[error("Internal buffer too small to read '{source_name}' (limit {limit} bytes)")]
    BufferOverflow { source_name: String, limit: usize },

    /// The helper process could not be started at all.
    #[error("Couldn't launch {helper}: {source}")]
    Spawn {
        helper: String,
        #[source]
        source: std::io::Error,
    },

    /// The helper process did not exit within the configured bound.
    #[error("{helper} did not exit within {timeout:?}")]
    HelperTimeout { helper: String, timeout: Duration },

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns true if the daemon cannot continue after this error.
    ///
    /// Only a failure to create the helper process at all (as opposed to the
    /// helper binary being absent) is fatal.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Spawn { .. })
    }
}
