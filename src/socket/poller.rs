// src/socket/poller.rs

//! Readiness poller: the per-direction pending waits and the callbacks that drive them.
//!
//! At most one read-wait and one write-wait exist per socket. While any wait exists a
//! watch task runs on the socket's runtime and turns the transport's readiness
//! notifications and the waits' deadlines into calls to the callbacks below. When both
//! slots drain the task exits; the next registration starts a new one.
//!
//! If readiness and a deadline land in the same wakeup, readiness wins: the readiness
//! branch is polled first, and a deadline handler retries the native call once before
//! rejecting with `Timeout`. Deadlines are also checked at the top of every watch
//! iteration, so readiness wakeups cannot postpone them indefinitely.

use std::io;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::ZmqError;
use crate::message::{Msg, MsgFlags};
use crate::runtime::Deferred;
use crate::socket::core::SocketShared;
use crate::socket::events::PollEvents;
use crate::transport::NativeSocket;

pub(crate) struct PendingRead {
  pub(crate) deferred: Deferred<Vec<Msg>>,
  pub(crate) deadline: Option<Instant>,
}

pub(crate) struct PendingWrite {
  pub(crate) deferred: Deferred<()>,
  /// Frames to send once writable; nothing of them has been handed to the handle yet.
  pub(crate) parts: Vec<Bytes>,
  pub(crate) deadline: Option<Instant>,
}

fn expired(deadline: Option<Instant>, now: Instant) -> bool {
  deadline.map_or(false, |d| d <= now)
}

/// The single-slot-per-direction wait table.
#[derive(Default)]
pub(crate) struct PendingWaits {
  pub(crate) read: Option<PendingRead>,
  pub(crate) write: Option<PendingWrite>,
  /// A watch task is running for this socket.
  pub(crate) watching: bool,
}

impl PendingWaits {
  /// Clears slots whose caller dropped the completion.
  pub(crate) fn discard_abandoned(&mut self) {
    if self.read.as_ref().map_or(false, |r| r.deferred.is_abandoned()) {
      self.read = None;
    }
    if self.write.as_ref().map_or(false, |w| w.deferred.is_abandoned()) {
      self.write = None;
    }
  }

  pub(crate) fn read_busy(&mut self) -> bool {
    self.discard_abandoned();
    self.read.is_some()
  }

  pub(crate) fn write_busy(&mut self) -> bool {
    self.discard_abandoned();
    self.write.is_some()
  }

  pub(crate) fn is_idle(&self) -> bool {
    self.read.is_none() && self.write.is_none()
  }

  fn deadlines(&self) -> (Option<Instant>, Option<Instant>) {
    (
      self.read.as_ref().and_then(|r| r.deadline),
      self.write.as_ref().and_then(|w| w.deadline),
    )
  }

  /// Empties both slots, for cancellation on close.
  pub(crate) fn take_all(&mut self) -> (Option<PendingRead>, Option<PendingWrite>) {
    (self.read.take(), self.write.take())
  }
}

/// Outcome of one non-blocking native attempt that did not succeed.
#[derive(Debug)]
pub(crate) enum Attempt {
  WouldBlock,
  Failed(io::Error),
}

impl From<Attempt> for ZmqError {
  fn from(attempt: Attempt) -> Self {
    match attempt {
      Attempt::WouldBlock => ZmqError::WouldBlock,
      Attempt::Failed(e) => ZmqError::Native(e),
    }
  }
}

fn retry_interrupted<T>(mut call: impl FnMut() -> io::Result<T>) -> io::Result<T> {
  loop {
    match call() {
      Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
      other => return other,
    }
  }
}

/// Hands all frames of one message to the handle without blocking.
///
/// Only the first frame can report would-block; the handle accepts the rest of a message
/// once its first frame is in.
pub(crate) fn try_send(native: &dyn NativeSocket, parts: &[Bytes]) -> Result<(), Attempt> {
  let last = parts.len().saturating_sub(1);
  for (i, frame) in parts.iter().enumerate() {
    match retry_interrupted(|| native.send_frame(frame.clone(), i < last)) {
      Ok(()) => {}
      Err(e) if e.kind() == io::ErrorKind::WouldBlock && i == 0 => return Err(Attempt::WouldBlock),
      Err(e) => return Err(Attempt::Failed(e)),
    }
  }
  Ok(())
}

/// Takes one whole message from the handle without blocking.
pub(crate) fn try_recv(native: &dyn NativeSocket) -> Result<Vec<Msg>, Attempt> {
  let mut frames = Vec::new();
  loop {
    match retry_interrupted(|| native.recv_frame()) {
      Ok((data, more)) => {
        let mut msg = Msg::from_bytes(data);
        if more {
          msg.set_flags(MsgFlags::MORE);
        }
        frames.push(msg);
        if !more {
          return Ok(frames);
        }
      }
      Err(e) if e.kind() == io::ErrorKind::WouldBlock && frames.is_empty() => return Err(Attempt::WouldBlock),
      Err(e) => return Err(Attempt::Failed(e)),
    }
  }
}

/// Queries the handle's event flags without consuming them.
pub(crate) fn validate_readable(native: &dyn NativeSocket) -> bool {
  native.events().map_or(false, |e| e.contains(PollEvents::POLLIN))
}

pub(crate) fn validate_writable(native: &dyn NativeSocket) -> bool {
  native.events().map_or(false, |e| e.contains(PollEvents::POLLOUT))
}

impl SocketShared {
  /// Starts the watch task unless one is already running, then nudges it to pick up the
  /// current slots. Called with the state lock held, right after a registration.
  pub(crate) fn ensure_watch(self: &Arc<Self>, waits: &mut PendingWaits, native: &Arc<dyn NativeSocket>) {
    if !waits.watching {
      waits.watching = true;
      let weak = Arc::downgrade(self);
      let readiness = native.readiness();
      let wake = self.wake.clone();
      tracing::trace!(handle = self.handle, "Starting readiness watch");
      self.runtime.spawn(watch(weak, readiness, wake));
    }
    self.wake.notify_one();
  }

  /// Drives the pending read-wait, if any. Safe to call at any time.
  pub(crate) fn readable_callback(&self) {
    let mut inner = self.inner.lock();
    // Closed: no-op. Blocked: re-driven when the socket returns to Open.
    let Some(native) = inner.usable_native() else { return };
    let Some(pending) = inner.waits.read.take() else { return };
    if pending.deferred.is_abandoned() {
      tracing::trace!(handle = self.handle, "Dropping abandoned receive");
      return;
    }
    if !validate_readable(&*native) {
      inner.waits.read = Some(pending);
      return;
    }
    match try_recv(&*native) {
      Ok(msg) => {
        tracing::trace!(handle = self.handle, frames = msg.len(), "Pending receive resolved");
        pending.deferred.resolve(msg);
      }
      Err(Attempt::WouldBlock) => inner.waits.read = Some(pending),
      Err(Attempt::Failed(e)) => {
        tracing::debug!(handle = self.handle, error = %e, "Pending receive failed");
        pending.deferred.reject(ZmqError::Native(e));
      }
    }
  }

  /// Drives the pending write-wait, if any. Safe to call at any time.
  pub(crate) fn writable_callback(&self) {
    let mut inner = self.inner.lock();
    let Some(native) = inner.usable_native() else { return };
    let Some(pending) = inner.waits.write.take() else { return };
    if pending.deferred.is_abandoned() {
      tracing::trace!(handle = self.handle, "Dropping abandoned send");
      return;
    }
    if !validate_writable(&*native) {
      inner.waits.write = Some(pending);
      return;
    }
    match try_send(&*native, &pending.parts) {
      Ok(()) => {
        tracing::trace!(handle = self.handle, frames = pending.parts.len(), "Pending send resolved");
        pending.deferred.resolve(());
      }
      Err(Attempt::WouldBlock) => inner.waits.write = Some(pending),
      Err(Attempt::Failed(e)) => {
        tracing::debug!(handle = self.handle, error = %e, "Pending send failed");
        pending.deferred.reject(ZmqError::Native(e));
      }
    }
  }

  /// Re-drives both directions, e.g. after the socket left `Blocked`.
  pub(crate) fn redrive(&self) {
    self.readable_callback();
    self.writable_callback();
  }

  fn read_deadline_elapsed(&self) {
    let mut inner = self.inner.lock();
    let Some(pending) = inner.waits.read.take() else { return };
    if !expired(pending.deadline, Instant::now()) {
      inner.waits.read = Some(pending);
      return;
    }
    // Blocked or closed: reject without touching the handle.
    if let Some(native) = inner.usable_native() {
      if validate_readable(&*native) {
        match try_recv(&*native) {
          Ok(msg) => return pending.deferred.resolve(msg),
          Err(Attempt::Failed(e)) => return pending.deferred.reject(ZmqError::Native(e)),
          Err(Attempt::WouldBlock) => {}
        }
      }
    }
    tracing::debug!(handle = self.handle, "Receive timed out");
    pending.deferred.reject(ZmqError::Timeout);
  }

  fn write_deadline_elapsed(&self) {
    let mut inner = self.inner.lock();
    let Some(pending) = inner.waits.write.take() else { return };
    if !expired(pending.deadline, Instant::now()) {
      inner.waits.write = Some(pending);
      return;
    }
    if let Some(native) = inner.usable_native() {
      if validate_writable(&*native) {
        match try_send(&*native, &pending.parts) {
          Ok(()) => return pending.deferred.resolve(()),
          Err(Attempt::Failed(e)) => return pending.deferred.reject(ZmqError::Native(e)),
          Err(Attempt::WouldBlock) => {}
        }
      }
    }
    tracing::debug!(handle = self.handle, "Send timed out");
    pending.deferred.reject(ZmqError::Timeout);
  }
}

async fn sleep_until(deadline: Option<Instant>) {
  match deadline {
    Some(deadline) => tokio::time::sleep_until(deadline).await,
    None => std::future::pending().await,
  }
}

/// Watch task body. Holds only a weak reference so it never keeps a socket alive.
async fn watch(socket: Weak<SocketShared>, readiness: Arc<Notify>, wake: Arc<Notify>) {
  loop {
    let (read_deadline, write_deadline) = {
      let Some(shared) = socket.upgrade() else { return };
      let mut inner = shared.inner.lock();
      inner.waits.discard_abandoned();
      if inner.lifecycle.is_closed() || inner.waits.is_idle() {
        inner.waits.watching = false;
        tracing::trace!(handle = shared.handle, "Readiness watch idle, stopping");
        return;
      }
      inner.waits.deadlines()
    };

    // Expired deadlines are handled before waiting again.
    let now = Instant::now();
    let read_expired = expired(read_deadline, now);
    let write_expired = expired(write_deadline, now);
    if read_expired || write_expired {
      if let Some(shared) = socket.upgrade() {
        if read_expired {
          shared.read_deadline_elapsed();
        }
        if write_expired {
          shared.write_deadline_elapsed();
        }
      }
      continue;
    }

    tokio::select! {
      biased;
      _ = readiness.notified() => {
        if let Some(shared) = socket.upgrade() {
          shared.redrive();
        }
      }
      _ = wake.notified() => {}
      _ = sleep_until(read_deadline) => {
        if let Some(shared) = socket.upgrade() {
          shared.read_deadline_elapsed();
        }
      }
      _ = sleep_until(write_deadline) => {
        if let Some(shared) = socket.upgrade() {
          shared.write_deadline_elapsed();
        }
      }
    }
  }
}
