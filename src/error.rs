//! Error types for the duplex session engine

use thiserror::Error;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio hardware errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported stream config: {0}")]
    UnsupportedConfig(String),
}

/// Track container errors
#[derive(Error, Debug)]
pub enum FormatError {
    #[error("Malformed WAV container: {0}")]
    Malformed(String),

    #[error("Unsupported WAV encoding: {0}")]
    UnsupportedEncoding(String),

    #[error("WAV write failed: {0}")]
    WriteFailed(String),
}

/// Session lifecycle errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("A take recording is already open")]
    TakeAlreadyOpen,

    #[error("No take recording is open")]
    NoActiveTake,
}

/// Result type alias for the engine
pub type Result<T> = std::result::Result<T, Error>;
