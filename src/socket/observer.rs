// src/socket/observer.rs

use std::fmt;
use std::sync::Weak;

use crate::socket::core::{Socket, SocketShared};
use crate::socket::events::{MonitorReceiver, SocketEvent};

/// Companion of a socket that streams its [`SocketEvent`]s and exposes its readiness.
///
/// Holds only a weak reference: an observer never keeps its socket alive. Once the socket
/// is gone every query reports it as closed.
pub struct Observer {
  socket: Weak<SocketShared>,
  events: MonitorReceiver,
}

impl Observer {
  pub(crate) fn new(socket: Weak<SocketShared>, events: MonitorReceiver) -> Self {
    Self { socket, events }
  }

  /// Waits for the next event. `None` once the socket closed and the backlog is drained,
  /// or when a newer observer replaced this one.
  pub async fn recv(&self) -> Option<SocketEvent> {
    self.events.recv().await.ok()
  }

  pub fn try_recv(&self) -> Option<SocketEvent> {
    self.events.try_recv().ok()
  }

  /// The observed socket, if it is still alive.
  pub fn socket(&self) -> Option<Socket> {
    self.socket.upgrade().map(Socket::from_shared)
  }

  pub fn is_closed(&self) -> bool {
    self.socket.upgrade().map_or(true, |s| s.is_closed())
  }

  pub fn is_readable(&self) -> bool {
    self.socket.upgrade().map_or(false, |s| s.is_readable())
  }

  pub fn is_writable(&self) -> bool {
    self.socket.upgrade().map_or(false, |s| s.is_writable())
  }
}

impl fmt::Debug for Observer {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Observer")
      .field("closed", &self.is_closed())
      .field("pending_events", &self.events.len())
      .finish()
  }
}
