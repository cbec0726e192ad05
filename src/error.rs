// src/error.rs

use crate::socket::options::OptionKind;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ZmqError {
  // --- Lifecycle / State Errors ---
  #[error("Socket is closed")]
  SocketClosed, // EBADF
  #[error("Operation is invalid for the current socket state: {0}")]
  InvalidState(&'static str), // EBUSY / EFSM
  #[error("Operation already in progress: {0}")]
  OperationInProgress(&'static str), // EAGAIN while a wait is pending

  // --- Completion Errors ---
  #[error("Operation timed out")]
  Timeout, // Deadline elapsed before readiness
  #[error("Operation was cancelled because the socket was closed")]
  Cancelled,
  #[error("Operation would block")]
  WouldBlock, // EAGAIN with a zero timeout

  // --- Option Errors ---
  #[error("Invalid socket option ID: {0}")]
  InvalidOption(i32), // EINVAL
  #[error("Option {option} expects a value of type {expected}")]
  InvalidOptionType { option: i32, expected: OptionKind },
  #[error("Invalid value provided for option ID {0}")]
  InvalidOptionValue(i32), // EINVAL
  #[error("Socket option not supported: {0}")]
  UnsupportedOption(i32), // ENOTSUP

  // --- Native (handle provider) Errors ---
  #[error("Native transport error: {0}")]
  Native(#[from] io::Error),
  #[error("Address already in use: {0}")]
  AddrInUse(String), // EADDRINUSE
  #[error("Address not available: {0}")]
  AddrNotAvailable(String), // EADDRNOTAVAIL
  #[error("Connection refused by peer: {0}")]
  ConnectionRefused(String), // ECONNREFUSED
  #[error("Invalid endpoint format: {0}")]
  InvalidEndpoint(String),
  #[error("Transport scheme not supported or enabled: {0}")]
  UnsupportedTransport(String), // EPROTONOSUPPORT

  // --- Usage Errors ---
  #[error("Operation is invalid for the socket type ({0})")]
  InvalidSocketType(&'static str),
  #[error("Invalid message format for operation: {0}")]
  InvalidMessage(String),

  // --- Internal Errors ---
  #[error("Internal library error: {0}")]
  Internal(String),
}

/// Result type alias for socket operations.
pub type Result<T> = std::result::Result<T, ZmqError>;

impl ZmqError {
  /// Maps an `io::Error` reported by the handle provider for a given endpoint.
  pub fn from_io_endpoint(e: io::Error, endpoint: &str) -> Self {
    match e.kind() {
      io::ErrorKind::AddrInUse => ZmqError::AddrInUse(endpoint.to_string()),
      io::ErrorKind::AddrNotAvailable => ZmqError::AddrNotAvailable(endpoint.to_string()),
      io::ErrorKind::ConnectionRefused => ZmqError::ConnectionRefused(endpoint.to_string()),
      io::ErrorKind::InvalidInput => ZmqError::InvalidEndpoint(endpoint.to_string()),
      io::ErrorKind::Unsupported => ZmqError::UnsupportedTransport(endpoint.to_string()),
      _ => ZmqError::Native(e),
    }
  }

  /// True if the handle provider reported this failure.
  pub fn is_native(&self) -> bool {
    matches!(
      self,
      ZmqError::Native(_)
        | ZmqError::AddrInUse(_)
        | ZmqError::AddrNotAvailable(_)
        | ZmqError::ConnectionRefused(_)
        | ZmqError::InvalidEndpoint(_)
        | ZmqError::UnsupportedTransport(_)
    )
  }

  /// True if the operation failed because the socket is (or became) closed.
  pub fn is_closed(&self) -> bool {
    matches!(self, ZmqError::SocketClosed | ZmqError::Cancelled)
  }
}
