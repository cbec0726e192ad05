// src/transport/mod.rs

//! The handle provider seam: the capabilities a socket needs from the underlying engine.
//!
//! Everything behind these traits (wire protocol, framing, connection management) belongs
//! to the engine. The socket core only relies on the calls being non-blocking, except for
//! `bind`/`unbind` which may block and are run off the event loop.

pub mod endpoint;
#[cfg(feature = "inproc")]
pub mod inproc;

use std::io;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Notify;

use crate::socket::events::PollEvents;
use crate::socket::options::OptionValue;
use crate::socket::types::SocketType;

/// A native socket handle. Exclusively owned by one [`Socket`](crate::Socket).
///
/// Non-blocking calls report "would block" as `io::ErrorKind::WouldBlock`; calls
/// interrupted by a signal report `io::ErrorKind::Interrupted` and are retried by the caller.
pub trait NativeSocket: Send + Sync + 'static {
  /// May block; called off the event loop.
  fn bind(&self, endpoint: &str) -> io::Result<()>;
  /// May block; called off the event loop.
  fn unbind(&self, endpoint: &str) -> io::Result<()>;
  fn connect(&self, endpoint: &str) -> io::Result<()>;
  fn disconnect(&self, endpoint: &str) -> io::Result<()>;
  fn join(&self, group: &str) -> io::Result<()>;
  fn leave(&self, group: &str) -> io::Result<()>;

  /// Queues one frame without blocking. `more` marks that further frames of the same
  /// message follow. Once the first frame of a message is accepted, the remaining frames
  /// of that message must be accepted as well.
  fn send_frame(&self, frame: Bytes, more: bool) -> io::Result<()>;
  /// Takes the next frame without blocking. Returns the payload and whether more frames
  /// of the same message follow. Once the first frame is taken, the remaining frames are
  /// available immediately.
  fn recv_frame(&self) -> io::Result<(Bytes, bool)>;

  fn get_option(&self, option: i32) -> io::Result<OptionValue>;
  fn set_option(&self, option: i32, value: &OptionValue) -> io::Result<()>;

  /// Current readiness, without consuming it.
  fn events(&self) -> io::Result<PollEvents>;
  /// Notified whenever `events()` may have changed. Wakeups can be spurious.
  fn readiness(&self) -> Arc<Notify>;

  /// Releases the native resource. Called exactly once.
  fn close(&self) -> io::Result<()>;
}

/// Creates native sockets.
pub trait Transport: Send + Sync + 'static {
  fn create(&self, socket_type: SocketType) -> io::Result<Arc<dyn NativeSocket>>;
}
