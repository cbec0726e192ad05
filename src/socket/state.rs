// src/socket/state.rs

//! Socket lifecycle: the Open/Blocked/Closed machine plus synchronous-call bookkeeping.

use crate::error::ZmqError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
  /// Handle valid, operations permitted.
  Open,
  /// A native call that must not be interleaved with other handle access is in flight.
  Blocked,
  /// Terminal. The handle is released (or will be, once an in-flight native call returns).
  Closed,
}

/// Token for one synchronous native call, returned by [`Lifecycle::enter_sync`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub(crate) enum SyncOperation {
  /// The socket entered `Blocked` for the duration of the call.
  Exclusive,
  /// Thread-safe socket; the call only bumped the synchronous-operation count.
  Shared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CloseAction {
  AlreadyClosed,
  /// Release the handle now.
  Release,
  /// A native call is in flight; the handle is released when it returns.
  Deferred,
}

#[derive(Debug)]
pub(crate) struct Lifecycle {
  state: SocketState,
  sync_operations: usize,
  close_pending: bool,
  endpoints: usize,
}

impl Lifecycle {
  pub(crate) fn new() -> Self {
    Self {
      state: SocketState::Open,
      sync_operations: 0,
      close_pending: false,
      endpoints: 0,
    }
  }

  pub(crate) fn state(&self) -> SocketState {
    self.state
  }

  pub(crate) fn is_closed(&self) -> bool {
    self.state == SocketState::Closed
  }

  #[cfg(test)]
  pub(crate) fn endpoints(&self) -> usize {
    self.endpoints
  }

  #[cfg(test)]
  pub(crate) fn sync_operations(&self) -> usize {
    self.sync_operations
  }

  pub(crate) fn validate_open(&self) -> Result<(), ZmqError> {
    match self.state {
      SocketState::Open => Ok(()),
      SocketState::Blocked => Err(ZmqError::InvalidState("socket is busy with a blocking operation")),
      SocketState::Closed => Err(ZmqError::SocketClosed),
    }
  }

  /// True when an option set now would miss endpoints that already exist or are being created.
  pub(crate) fn has_endpoints(&self) -> bool {
    self.endpoints > 0 || self.sync_operations > 0 || self.state != SocketState::Open
  }

  pub(crate) fn add_endpoint(&mut self) {
    self.endpoints += 1;
  }

  pub(crate) fn remove_endpoint(&mut self) {
    self.endpoints = self.endpoints.saturating_sub(1);
  }

  /// Starts a synchronous native call. Non-thread-safe sockets become `Blocked`.
  pub(crate) fn enter_sync(&mut self, thread_safe: bool) -> Result<SyncOperation, ZmqError> {
    self.validate_open()?;
    if thread_safe {
      self.sync_operations += 1;
      Ok(SyncOperation::Shared)
    } else {
      self.state = SocketState::Blocked;
      Ok(SyncOperation::Exclusive)
    }
  }

  /// Ends a synchronous native call. Returns true when a close was requested meanwhile
  /// and the handle must now be released.
  pub(crate) fn leave_sync(&mut self, op: SyncOperation) -> bool {
    match op {
      SyncOperation::Exclusive => {
        if self.state == SocketState::Blocked {
          self.state = SocketState::Open;
        }
      }
      SyncOperation::Shared => {
        self.sync_operations = self.sync_operations.saturating_sub(1);
      }
    }
    if self.close_pending && self.sync_operations == 0 && self.state != SocketState::Blocked {
      self.close_pending = false;
      self.state = SocketState::Closed;
      return true;
    }
    false
  }

  /// Moves to `Closed`. Close takes precedence over an in-flight native call.
  pub(crate) fn request_close(&mut self) -> CloseAction {
    match self.state {
      SocketState::Closed => CloseAction::AlreadyClosed,
      SocketState::Blocked => {
        self.state = SocketState::Closed;
        self.close_pending = true;
        CloseAction::Deferred
      }
      SocketState::Open if self.sync_operations > 0 => {
        self.state = SocketState::Closed;
        self.close_pending = true;
        CloseAction::Deferred
      }
      SocketState::Open => {
        self.state = SocketState::Closed;
        CloseAction::Release
      }
    }
  }
}
