//! FTP error types

use thiserror::Error;

/// Errors surfaced by the server and the client
#[derive(Error, Debug)]
pub enum FtpError {
  /// IO error on a control or data socket, or on the filesystem
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),

  /// Control connection closed by the peer
  #[error("connection closed")]
  ConnectionClosed,

  /// Control or data channel deadline expired
  #[error("timed out")]
  Timeout,

  /// Reply received by the client that does not parse as `NNN text`
  #[error("invalid reply: {0}")]
  InvalidReply(String),

  /// Server reply with an error code, observed by the client
  #[error("server replied {code}: {message}")]
  Reply {
    code: u16,
    message: String,
  },

  /// No free port in the passive range
  #[error("no free passive port")]
  PassiveExhausted,

  /// Path escapes the served root or cannot be resolved
  #[error("path not allowed: {0}")]
  PathDenied(String),
}

pub type Result<T> = std::result::Result<T, FtpError>;
