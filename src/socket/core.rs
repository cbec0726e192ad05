// src/socket/core.rs

use std::fmt;
use std::io;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinError;
use tokio::time::Instant;

use crate::context::Context;
use crate::error::ZmqError;
use crate::message::Msg;
use crate::runtime::deferred::deferred;
use crate::runtime::{Completion, Deferred};
use crate::socket::events::{MonitorSender, PollEvents, SocketEvent, DEFAULT_MONITOR_CAPACITY};
use crate::socket::observer::Observer;
use crate::socket::options::{self, OptionDescriptor, OptionType, OptionValue, SocketOptions, Timeout};
use crate::socket::poller::{self, Attempt, PendingRead, PendingWaits, PendingWrite};
use crate::socket::state::{CloseAction, Lifecycle, SocketState, SyncOperation};
use crate::socket::types::SocketType;
use crate::transport::endpoint::parse_endpoint;
use crate::transport::NativeSocket;

/// Protocol state, guarded by one lock. Native calls made under it never block.
pub(crate) struct SocketInner {
  pub(crate) lifecycle: Lifecycle,
  /// `Some` until the handle is released.
  native: Option<Arc<dyn NativeSocket>>,
  pub(crate) waits: PendingWaits,
  send_timeout: Timeout,
  receive_timeout: Timeout,
}

impl SocketInner {
  /// The handle, if it may be touched right now (state is `Open`).
  pub(crate) fn usable_native(&self) -> Option<Arc<dyn NativeSocket>> {
    match self.lifecycle.state() {
      SocketState::Open => self.native.clone(),
      SocketState::Blocked | SocketState::Closed => None,
    }
  }

  fn open_native(&self) -> Result<Arc<dyn NativeSocket>, ZmqError> {
    self.lifecycle.validate_open()?;
    self.native.clone().ok_or(ZmqError::SocketClosed)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndpointCall {
  Bind,
  Unbind,
}

impl EndpointCall {
  fn as_str(&self) -> &'static str {
    match self {
      EndpointCall::Bind => "bind",
      EndpointCall::Unbind => "unbind",
    }
  }
}

/// Maps a native option failure onto the option error taxonomy.
fn option_error(option: i32, e: io::Error) -> ZmqError {
  match e.kind() {
    io::ErrorKind::InvalidInput => ZmqError::InvalidOptionValue(option),
    io::ErrorKind::Unsupported => ZmqError::UnsupportedOption(option),
    _ => ZmqError::Native(e),
  }
}

fn deadline_after(timeout: Timeout) -> Option<Instant> {
  timeout.duration().and_then(|d| Instant::now().checked_add(d))
}

/// State shared by every clone of a [`Socket`], the watch task (weakly) and in-flight
/// blocking calls.
pub(crate) struct SocketShared {
  pub(crate) handle: usize,
  socket_type: SocketType,
  thread_safe: bool,
  pub(crate) runtime: Handle,
  context: Context,
  pub(crate) inner: Mutex<SocketInner>,
  /// Nudges the watch task when the slots change.
  pub(crate) wake: Arc<Notify>,
  monitor: Mutex<Option<MonitorSender>>,
}

impl SocketShared {
  pub(crate) fn emit(&self, event: SocketEvent) {
    if let Some(tx) = self.monitor.lock().as_ref() {
      if tx.try_send(event).is_err() {
        tracing::trace!(handle = self.handle, "Observer channel full or closed, dropping event");
      }
    }
  }

  pub(crate) fn is_closed(&self) -> bool {
    self.inner.lock().lifecycle.is_closed()
  }

  pub(crate) fn is_readable(&self) -> bool {
    let native = self.inner.lock().usable_native();
    native.map_or(false, |n| poller::validate_readable(&*n))
  }

  pub(crate) fn is_writable(&self) -> bool {
    let native = self.inner.lock().usable_native();
    native.map_or(false, |n| poller::validate_writable(&*n))
  }

  fn start_send(self: &Arc<Self>, parts: Vec<Bytes>, timeout: Option<Timeout>) -> Result<Completion<()>, ZmqError> {
    let mut inner = self.inner.lock();
    let native = inner.open_native()?;
    if inner.waits.write_busy() {
      return Err(ZmqError::OperationInProgress("send"));
    }
    match poller::try_send(&*native, &parts) {
      Ok(()) => {
        tracing::trace!(handle = self.handle, frames = parts.len(), "Sent without waiting");
        return Ok(Completion::ready(Ok(())));
      }
      Err(Attempt::Failed(e)) => return Err(ZmqError::Native(e)),
      Err(Attempt::WouldBlock) => {}
    }
    let timeout = timeout.unwrap_or(inner.send_timeout);
    if timeout == Timeout::Immediate {
      return Err(ZmqError::WouldBlock);
    }
    let (deferred, completion) = deferred();
    inner.waits.write = Some(PendingWrite {
      deferred,
      parts,
      deadline: deadline_after(timeout),
    });
    self.ensure_watch(&mut inner.waits, &native);
    tracing::trace!(handle = self.handle, timeout_ms = timeout.as_millis(), "Send waiting for writability");
    Ok(completion)
  }

  fn start_receive(self: &Arc<Self>, timeout: Option<Timeout>) -> Result<Completion<Vec<Msg>>, ZmqError> {
    let mut inner = self.inner.lock();
    let native = inner.open_native()?;
    if inner.waits.read_busy() {
      return Err(ZmqError::OperationInProgress("receive"));
    }
    match poller::try_recv(&*native) {
      Ok(msg) => {
        tracing::trace!(handle = self.handle, frames = msg.len(), "Received without waiting");
        return Ok(Completion::ready(Ok(msg)));
      }
      Err(Attempt::Failed(e)) => return Err(ZmqError::Native(e)),
      Err(Attempt::WouldBlock) => {}
    }
    let timeout = timeout.unwrap_or(inner.receive_timeout);
    if timeout == Timeout::Immediate {
      return Err(ZmqError::WouldBlock);
    }
    let (deferred, completion) = deferred();
    inner.waits.read = Some(PendingRead {
      deferred,
      deadline: deadline_after(timeout),
    });
    self.ensure_watch(&mut inner.waits, &native);
    tracing::trace!(handle = self.handle, timeout_ms = timeout.as_millis(), "Receive waiting for readability");
    Ok(completion)
  }

  /// Runs bind/unbind on the blocking pool, guarding the handle for the duration.
  fn start_endpoint_call(self: &Arc<Self>, call: EndpointCall, endpoint: &str) -> Result<Completion<()>, ZmqError> {
    let (native, op) = {
      let mut inner = self.inner.lock();
      let native = inner.open_native()?;
      let op = inner.lifecycle.enter_sync(self.thread_safe)?;
      (native, op)
    };
    tracing::debug!(handle = self.handle, endpoint, call = call.as_str(), "Starting blocking endpoint call");

    let (deferred, completion) = deferred();
    let shared = self.clone();
    let endpoint = endpoint.to_string();
    self.runtime.spawn(async move {
      let ep = endpoint.clone();
      let result = tokio::task::spawn_blocking(move || match call {
        EndpointCall::Bind => native.bind(&ep),
        EndpointCall::Unbind => native.unbind(&ep),
      })
      .await;
      shared.finish_endpoint_call(call, op, &endpoint, result, deferred);
    });
    Ok(completion)
  }

  fn finish_endpoint_call(
    &self,
    call: EndpointCall,
    op: SyncOperation,
    endpoint: &str,
    result: Result<io::Result<()>, JoinError>,
    deferred: Deferred<()>,
  ) {
    let outcome = match result {
      Ok(Ok(())) => Ok(()),
      Ok(Err(e)) => Err(ZmqError::from_io_endpoint(e, endpoint)),
      Err(join_error) => Err(ZmqError::Internal(format!("{} task failed: {}", call.as_str(), join_error))),
    };
    let release = {
      let mut inner = self.inner.lock();
      if outcome.is_ok() {
        match call {
          EndpointCall::Bind => inner.lifecycle.add_endpoint(),
          EndpointCall::Unbind => inner.lifecycle.remove_endpoint(),
        }
      }
      if inner.lifecycle.leave_sync(op) {
        inner.native.take()
      } else {
        None
      }
    };

    match (&outcome, call) {
      (Ok(()), EndpointCall::Bind) => {
        tracing::debug!(handle = self.handle, endpoint, "Bound");
        self.emit(SocketEvent::Bound {
          endpoint: endpoint.to_string(),
        });
      }
      (Err(e), EndpointCall::Bind) => {
        tracing::debug!(handle = self.handle, endpoint, error = %e, "Bind failed");
        self.emit(SocketEvent::BindFailed {
          endpoint: endpoint.to_string(),
          error_msg: e.to_string(),
        });
      }
      (Ok(()), EndpointCall::Unbind) => {
        tracing::debug!(handle = self.handle, endpoint, "Unbound");
        self.emit(SocketEvent::Unbound {
          endpoint: endpoint.to_string(),
        });
      }
      (Err(e), EndpointCall::Unbind) => {
        tracing::debug!(handle = self.handle, endpoint, error = %e, "Unbind failed");
      }
    }

    match release {
      Some(native) => {
        if let Err(e) = self.release(native) {
          tracing::warn!(handle = self.handle, error = %e, "Deferred close of native socket failed");
        }
      }
      // Readiness that arrived while blocked was not acted on.
      None => self.redrive(),
    }
    deferred.settle(outcome);
  }

  fn set_option(&self, desc: &OptionDescriptor, value: OptionValue) -> Result<(), ZmqError> {
    let warn = {
      let mut inner = self.inner.lock();
      let local = matches!(desc.id, options::SNDTIMEO | options::RCVTIMEO);
      match inner.lifecycle.state() {
        SocketState::Closed => return Err(ZmqError::SocketClosed),
        SocketState::Blocked if !local => {
          return Err(ZmqError::InvalidState("socket is busy with a blocking operation"))
        }
        _ => {}
      }
      let timeout = match (desc.id, &value) {
        (options::SNDTIMEO | options::RCVTIMEO, OptionValue::Int(ms)) => Some(Timeout::from_millis(desc.id, *ms)?),
        _ => None,
      };
      if let Some(native) = inner.usable_native() {
        native.set_option(desc.id, &value).map_err(|e| option_error(desc.id, e))?;
      }
      match (desc.id, timeout) {
        (options::SNDTIMEO, Some(t)) => inner.send_timeout = t,
        (options::RCVTIMEO, Some(t)) => inner.receive_timeout = t,
        _ => {}
      }
      !desc.immediate && inner.lifecycle.has_endpoints()
    };

    tracing::trace!(handle = self.handle, option = desc.name, "Option set");
    if warn {
      let message = format!("{} will not take effect until the next bind or connect", desc.name);
      tracing::warn!(handle = self.handle, option = desc.name, "{}", message);
      self.emit(SocketEvent::OptionWarning {
        option: desc.id,
        message,
      });
    }
    Ok(())
  }

  fn get_option(&self, desc: &OptionDescriptor) -> Result<OptionValue, ZmqError> {
    let inner = self.inner.lock();
    if inner.lifecycle.is_closed() {
      return Err(ZmqError::SocketClosed);
    }
    // Answered locally, so readable while blocked.
    match desc.id {
      options::SNDTIMEO => return Ok(OptionValue::Int(inner.send_timeout.as_millis())),
      options::RCVTIMEO => return Ok(OptionValue::Int(inner.receive_timeout.as_millis())),
      options::TYPE => return Ok(OptionValue::Int(self.socket_type as i64)),
      options::THREAD_SAFE => return Ok(OptionValue::Bool(self.thread_safe)),
      _ => {}
    }
    let native = inner.open_native()?;
    native.get_option(desc.id).map_err(|e| option_error(desc.id, e))
  }

  /// Runs a non-blocking endpoint/group call against the handle under the state lock.
  fn with_open_native<T>(&self, f: impl FnOnce(&dyn NativeSocket, &mut Lifecycle) -> Result<T, ZmqError>) -> Result<T, ZmqError> {
    let mut inner = self.inner.lock();
    let native = inner.open_native()?;
    f(&*native, &mut inner.lifecycle)
  }

  /// Closes the socket. Idempotent.
  pub(crate) fn close(&self) -> Result<(), ZmqError> {
    let (action, native, (read, write)) = {
      let mut inner = self.inner.lock();
      let action = inner.lifecycle.request_close();
      let native = match action {
        CloseAction::Release => inner.native.take(),
        CloseAction::Deferred | CloseAction::AlreadyClosed => None,
      };
      (action, native, inner.waits.take_all())
    };
    if action == CloseAction::AlreadyClosed {
      return Ok(());
    }

    // Pending waits are cancelled before the handle goes away.
    self.wake.notify_one();
    if let Some(read) = read {
      read.deferred.reject(ZmqError::Cancelled);
    }
    if let Some(write) = write {
      write.deferred.reject(ZmqError::Cancelled);
    }
    self.context.forget(self.handle);

    match native {
      Some(native) => self.release(native),
      None => {
        tracing::debug!(handle = self.handle, "Close requested during blocking call, deferring release");
        Ok(())
      }
    }
  }

  /// Releases the native handle. Reached exactly once per socket.
  fn release(&self, native: Arc<dyn NativeSocket>) -> Result<(), ZmqError> {
    let result = native.close().map_err(ZmqError::Native);
    tracing::debug!(handle = self.handle, "Socket closed");
    self.emit(SocketEvent::Closed);
    // Ends the observer stream.
    self.monitor.lock().take();
    result
  }
}

impl Drop for SocketShared {
  fn drop(&mut self) {
    if let Err(e) = self.close() {
      tracing::warn!(handle = self.handle, error = %e, "Error closing socket on drop");
    }
  }
}

/// A message socket of one wire pattern.
///
/// Clones share the same underlying socket; it is closed by [`Socket::close`] or when
/// the last clone is dropped. Send, receive, bind and unbind return a [`Completion`]
/// once validated: failures known at the call site are returned as `Err`, everything
/// discovered later rejects the completion.
#[derive(Clone)]
pub struct Socket {
  shared: Arc<SocketShared>,
}

impl Socket {
  pub(crate) fn create(
    context: Context,
    handle: usize,
    socket_type: SocketType,
    native: Arc<dyn NativeSocket>,
    runtime: Handle,
    opts: &SocketOptions,
  ) -> Result<Socket, ZmqError> {
    let shared = Arc::new(SocketShared {
      handle,
      socket_type,
      thread_safe: socket_type.is_thread_safe(),
      runtime,
      context,
      inner: Mutex::new(SocketInner {
        lifecycle: Lifecycle::new(),
        native: Some(native),
        waits: PendingWaits::default(),
        send_timeout: Timeout::Infinite,
        receive_timeout: Timeout::Infinite,
      }),
      wake: Arc::new(Notify::new()),
      monitor: Mutex::new(None),
    });
    let socket = Socket { shared };
    // On error the socket is dropped here, which releases the handle.
    if opts.send_timeout != Timeout::Infinite {
      socket.set_send_timeout(opts.send_timeout)?;
    }
    if opts.receive_timeout != Timeout::Infinite {
      socket.set_receive_timeout(opts.receive_timeout)?;
    }
    for (option, value) in &opts.initial {
      socket.set_option_raw(*option, value.clone())?;
    }
    Ok(socket)
  }

  pub(crate) fn from_shared(shared: Arc<SocketShared>) -> Self {
    Self { shared }
  }

  pub(crate) fn shared(&self) -> &Arc<SocketShared> {
    &self.shared
  }

  /// Unique id of this socket within its context.
  pub fn handle(&self) -> usize {
    self.shared.handle
  }

  pub fn socket_type(&self) -> SocketType {
    self.shared.socket_type
  }

  /// Whether the wire pattern allows concurrent access to the native handle.
  pub fn is_thread_safe(&self) -> bool {
    self.shared.thread_safe
  }

  pub fn context(&self) -> Context {
    self.shared.context.clone()
  }

  pub fn state(&self) -> SocketState {
    self.shared.inner.lock().lifecycle.state()
  }

  pub fn is_closed(&self) -> bool {
    self.shared.is_closed()
  }

  /// True if a message can be received right now. False while closed or blocked.
  pub fn is_readable(&self) -> bool {
    self.shared.is_readable()
  }

  /// True if a message can be sent right now. False while closed or blocked.
  pub fn is_writable(&self) -> bool {
    self.shared.is_writable()
  }

  /// State check that precedes argument validation in every operation.
  fn validate_open(&self) -> Result<(), ZmqError> {
    self.shared.inner.lock().lifecycle.validate_open()
  }

  /// Option calls only need the socket not to be closed; the state rules for
  /// `Blocked` are applied per option later.
  fn validate_not_closed(&self) -> Result<(), ZmqError> {
    if self.shared.is_closed() {
      Err(ZmqError::SocketClosed)
    } else {
      Ok(())
    }
  }

  /// Current readiness flags of the handle.
  pub fn events(&self) -> Result<PollEvents, ZmqError> {
    self
      .shared
      .with_open_native(|native, _| native.events().map_err(ZmqError::Native))
  }

  // --- Endpoints ---

  /// Starts listening on `endpoint`. The native call runs off the event loop; a
  /// non-thread-safe socket is `Blocked` until it returns.
  pub fn bind(&self, endpoint: &str) -> Result<Completion<()>, ZmqError> {
    self.validate_open()?;
    parse_endpoint(endpoint)?;
    self.shared.start_endpoint_call(EndpointCall::Bind, endpoint)
  }

  pub fn unbind(&self, endpoint: &str) -> Result<Completion<()>, ZmqError> {
    self.validate_open()?;
    parse_endpoint(endpoint)?;
    self.shared.start_endpoint_call(EndpointCall::Unbind, endpoint)
  }

  pub fn connect(&self, endpoint: &str) -> Result<(), ZmqError> {
    self.validate_open()?;
    parse_endpoint(endpoint)?;
    self.shared.with_open_native(|native, lifecycle| {
      native
        .connect(endpoint)
        .map_err(|e| ZmqError::from_io_endpoint(e, endpoint))?;
      lifecycle.add_endpoint();
      Ok(())
    })?;
    tracing::debug!(handle = self.handle(), endpoint, "Connected");
    self.shared.emit(SocketEvent::Connected {
      endpoint: endpoint.to_string(),
    });
    Ok(())
  }

  pub fn disconnect(&self, endpoint: &str) -> Result<(), ZmqError> {
    self.validate_open()?;
    parse_endpoint(endpoint)?;
    self.shared.with_open_native(|native, lifecycle| {
      native
        .disconnect(endpoint)
        .map_err(|e| ZmqError::from_io_endpoint(e, endpoint))?;
      lifecycle.remove_endpoint();
      Ok(())
    })?;
    tracing::debug!(handle = self.handle(), endpoint, "Disconnected");
    self.shared.emit(SocketEvent::Disconnected {
      endpoint: endpoint.to_string(),
    });
    Ok(())
  }

  /// Joins a group. DISH sockets only.
  pub fn join(&self, group: &str) -> Result<(), ZmqError> {
    self.validate_open()?;
    if self.socket_type() != SocketType::Dish {
      return Err(ZmqError::InvalidSocketType(self.socket_type().as_str()));
    }
    self
      .shared
      .with_open_native(|native, _| native.join(group).map_err(ZmqError::Native))?;
    self.shared.emit(SocketEvent::Joined { group: group.to_string() });
    Ok(())
  }

  /// Leaves a group. DISH sockets only.
  pub fn leave(&self, group: &str) -> Result<(), ZmqError> {
    self.validate_open()?;
    if self.socket_type() != SocketType::Dish {
      return Err(ZmqError::InvalidSocketType(self.socket_type().as_str()));
    }
    self
      .shared
      .with_open_native(|native, _| native.leave(group).map_err(ZmqError::Native))?;
    self.shared.emit(SocketEvent::Left { group: group.to_string() });
    Ok(())
  }

  // --- Messages ---

  /// Sends one message made of `parts`, waiting up to the socket's send timeout.
  pub fn send<I, M>(&self, parts: I) -> Result<Completion<()>, ZmqError>
  where
    I: IntoIterator<Item = M>,
    M: Into<Msg>,
  {
    let parts = self.prepare_send(parts)?;
    self.shared.start_send(parts, None)
  }

  /// Like [`send`](Self::send) with a per-call timeout.
  pub fn send_with_timeout<I, M>(&self, parts: I, timeout: impl Into<Timeout>) -> Result<Completion<()>, ZmqError>
  where
    I: IntoIterator<Item = M>,
    M: Into<Msg>,
  {
    let parts = self.prepare_send(parts)?;
    self.shared.start_send(parts, Some(timeout.into()))
  }

  fn prepare_send<I, M>(&self, parts: I) -> Result<Vec<Bytes>, ZmqError>
  where
    I: IntoIterator<Item = M>,
    M: Into<Msg>,
  {
    self.validate_open()?;
    if !self.socket_type().can_send() {
      return Err(ZmqError::InvalidSocketType(self.socket_type().as_str()));
    }
    let parts: Vec<Bytes> = parts.into_iter().map(|m| m.into().into_bytes()).collect();
    if parts.is_empty() {
      return Err(ZmqError::InvalidMessage("a message needs at least one frame".into()));
    }
    Ok(parts)
  }

  /// Receives one whole message, waiting up to the socket's receive timeout. Every frame
  /// but the last carries `MsgFlags::MORE`.
  pub fn receive(&self) -> Result<Completion<Vec<Msg>>, ZmqError> {
    self.check_can_receive()?;
    self.shared.start_receive(None)
  }

  pub fn receive_with_timeout(&self, timeout: impl Into<Timeout>) -> Result<Completion<Vec<Msg>>, ZmqError> {
    self.check_can_receive()?;
    self.shared.start_receive(Some(timeout.into()))
  }

  fn check_can_receive(&self) -> Result<(), ZmqError> {
    self.validate_open()?;
    if self.socket_type().can_receive() {
      Ok(())
    } else {
      Err(ZmqError::InvalidSocketType(self.socket_type().as_str()))
    }
  }

  // --- Options ---

  /// Sets an option from a typed value. The value type must match the option's kind.
  pub fn set_option<T: OptionType>(&self, option: i32, value: T) -> Result<(), ZmqError> {
    self.validate_not_closed()?;
    let desc = options::descriptor(option).ok_or(ZmqError::InvalidOption(option))?;
    if T::KIND != desc.kind {
      return Err(ZmqError::InvalidOptionType {
        option,
        expected: desc.kind,
      });
    }
    self.set_option_raw(option, value.into_value(option)?)
  }

  /// Reads an option into a typed value.
  pub fn get_option<T: OptionType>(&self, option: i32) -> Result<T, ZmqError> {
    self.validate_not_closed()?;
    let desc = options::descriptor(option).ok_or(ZmqError::InvalidOption(option))?;
    if T::KIND != desc.kind {
      return Err(ZmqError::InvalidOptionType {
        option,
        expected: desc.kind,
      });
    }
    T::from_value(option, self.get_option_raw(option)?)
  }

  pub fn set_option_raw(&self, option: i32, value: OptionValue) -> Result<(), ZmqError> {
    self.validate_not_closed()?;
    let desc = options::descriptor(option).ok_or(ZmqError::InvalidOption(option))?;
    if !desc.access.writable() || !desc.applies_to(self.socket_type()) {
      return Err(ZmqError::UnsupportedOption(option));
    }
    options::validate_value(desc, &value)?;
    self.shared.set_option(desc, value)
  }

  pub fn get_option_raw(&self, option: i32) -> Result<OptionValue, ZmqError> {
    self.validate_not_closed()?;
    let desc = options::descriptor(option).ok_or(ZmqError::InvalidOption(option))?;
    if !desc.access.readable() || !desc.applies_to(self.socket_type()) {
      return Err(ZmqError::UnsupportedOption(option));
    }
    self.shared.get_option(desc)
  }

  pub fn send_timeout(&self) -> Timeout {
    self.shared.inner.lock().send_timeout
  }

  pub fn set_send_timeout(&self, timeout: impl Into<Timeout>) -> Result<(), ZmqError> {
    self.set_option_raw(options::SNDTIMEO, OptionValue::Int(timeout.into().as_millis()))
  }

  pub fn receive_timeout(&self) -> Timeout {
    self.shared.inner.lock().receive_timeout
  }

  pub fn set_receive_timeout(&self, timeout: impl Into<Timeout>) -> Result<(), ZmqError> {
    self.set_option_raw(options::RCVTIMEO, OptionValue::Int(timeout.into().as_millis()))
  }

  // --- Lifecycle ---

  /// Attaches an observer. A socket has at most one; attaching a new one ends the
  /// previous observer's event stream.
  pub fn observer(&self) -> Result<Observer, ZmqError> {
    if self.is_closed() {
      return Err(ZmqError::SocketClosed);
    }
    let (tx, rx) = async_channel::bounded(DEFAULT_MONITOR_CAPACITY);
    *self.shared.monitor.lock() = Some(tx);
    Ok(Observer::new(Arc::downgrade(&self.shared), rx))
  }

  /// Closes the socket: pending send/receive are rejected with `Cancelled` and the
  /// handle is released. If a bind/unbind is in flight the release happens when it
  /// returns. Every later operation fails with `SocketClosed`.
  pub fn close(&self) -> Result<(), ZmqError> {
    self.shared.close()
  }
}

impl fmt::Debug for Socket {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Socket")
      .field("handle", &self.shared.handle)
      .field("socket_type", &self.shared.socket_type)
      .field("state", &self.state())
      .finish()
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;
  use crate::message::MsgFlags;
  use crate::transport::Transport;
  use std::collections::{HashMap, VecDeque};
  use std::sync::mpsc;
  use std::time::Duration;

  /// Scripted handle: the test decides what is readable and writable.
  #[derive(Default)]
  pub(crate) struct Script {
    pub(crate) inbound: VecDeque<(Bytes, bool)>,
    pub(crate) writable: bool,
    pub(crate) sent: Vec<(Bytes, bool)>,
    pub(crate) closed: bool,
    pub(crate) close_calls: usize,
    pub(crate) touched_after_close: bool,
    pub(crate) options: HashMap<i32, OptionValue>,
    pub(crate) interrupts: usize,
    /// Every native call, in any state.
    pub(crate) touches: usize,
  }

  #[derive(Default)]
  pub(crate) struct MockNative {
    pub(crate) script: parking_lot::Mutex<Script>,
    pub(crate) readiness: Arc<Notify>,
    pub(crate) bind_gate: parking_lot::Mutex<Option<mpsc::Receiver<()>>>,
  }

  impl MockNative {
    fn touch(&self) -> parking_lot::MutexGuard<'_, Script> {
      let mut script = self.script.lock();
      script.touches += 1;
      if script.closed {
        script.touched_after_close = true;
      }
      script
    }

    pub(crate) fn push_inbound(&self, frames: &[&'static [u8]]) {
      let mut script = self.script.lock();
      let last = frames.len() - 1;
      for (i, f) in frames.iter().enumerate() {
        script.inbound.push_back((Bytes::from_static(f), i < last));
      }
      drop(script);
      self.readiness.notify_one();
    }

    pub(crate) fn set_writable(&self, writable: bool) {
      self.script.lock().writable = writable;
      self.readiness.notify_one();
    }
  }

  impl NativeSocket for MockNative {
    fn bind(&self, _endpoint: &str) -> io::Result<()> {
      if let Some(gate) = self.bind_gate.lock().take() {
        let _ = gate.recv();
      }
      self.touch();
      Ok(())
    }
    fn unbind(&self, _endpoint: &str) -> io::Result<()> {
      self.touch();
      Ok(())
    }
    fn connect(&self, _endpoint: &str) -> io::Result<()> {
      self.touch();
      Ok(())
    }
    fn disconnect(&self, _endpoint: &str) -> io::Result<()> {
      self.touch();
      Ok(())
    }
    fn join(&self, _group: &str) -> io::Result<()> {
      self.touch();
      Ok(())
    }
    fn leave(&self, _group: &str) -> io::Result<()> {
      self.touch();
      Ok(())
    }
    fn send_frame(&self, frame: Bytes, more: bool) -> io::Result<()> {
      let mut script = self.touch();
      if script.interrupts > 0 {
        script.interrupts -= 1;
        return Err(io::Error::from(io::ErrorKind::Interrupted));
      }
      let mid_message = script.sent.last().map_or(false, |(_, more)| *more);
      if !script.writable && !mid_message {
        return Err(io::Error::from(io::ErrorKind::WouldBlock));
      }
      script.sent.push((frame, more));
      Ok(())
    }
    fn recv_frame(&self) -> io::Result<(Bytes, bool)> {
      self
        .touch()
        .inbound
        .pop_front()
        .ok_or_else(|| io::Error::from(io::ErrorKind::WouldBlock))
    }
    fn get_option(&self, option: i32) -> io::Result<OptionValue> {
      Ok(self.touch().options.get(&option).cloned().unwrap_or(OptionValue::Int(0)))
    }
    fn set_option(&self, option: i32, value: &OptionValue) -> io::Result<()> {
      self.touch().options.insert(option, value.clone());
      Ok(())
    }
    fn events(&self) -> io::Result<PollEvents> {
      let script = self.touch();
      let mut events = PollEvents::empty();
      if !script.inbound.is_empty() {
        events |= PollEvents::POLLIN;
      }
      if script.writable {
        events |= PollEvents::POLLOUT;
      }
      Ok(events)
    }
    fn readiness(&self) -> Arc<Notify> {
      self.readiness.clone()
    }
    fn close(&self) -> io::Result<()> {
      let mut script = self.touch();
      script.closed = true;
      script.close_calls += 1;
      Ok(())
    }
  }

  pub(crate) struct MockTransport(pub(crate) Arc<MockNative>);

  impl Transport for MockTransport {
    fn create(&self, _socket_type: SocketType) -> io::Result<Arc<dyn NativeSocket>> {
      Ok(self.0.clone())
    }
  }

  pub(crate) fn mock_socket(socket_type: SocketType) -> (Socket, Arc<MockNative>) {
    let native = Arc::new(MockNative::default());
    let ctx = Context::with_transport(MockTransport(native.clone())).unwrap();
    (ctx.socket(socket_type).unwrap(), native)
  }

  async fn within<F: std::future::Future>(f: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(2), f).await.expect("timed out")
  }

  #[tokio::test]
  async fn receive_resolves_synchronously_when_data_is_available() {
    let (socket, native) = mock_socket(SocketType::Pull);
    native.push_inbound(&[b"hello", b"world"]);

    let completion = socket.receive().unwrap();
    assert!(completion.is_immediate());
    let msg = completion.await.unwrap();
    assert_eq!(msg.len(), 2);
    assert_eq!(msg[0].data(), b"hello");
    assert!(msg[0].flags().contains(MsgFlags::MORE));
    assert!(!msg[1].is_more());
    assert_eq!(socket.state(), SocketState::Open);
  }

  #[tokio::test]
  async fn second_pending_receive_is_rejected() {
    let (socket, native) = mock_socket(SocketType::Pull);
    let first = socket.receive().unwrap();
    assert!(!first.is_immediate());
    assert!(matches!(socket.receive(), Err(ZmqError::OperationInProgress("receive"))));

    native.push_inbound(&[b"data"]);
    let msg = within(first).await.unwrap();
    assert_eq!(msg[0].data(), b"data");
  }

  #[tokio::test]
  async fn callbacks_without_waits_are_no_ops() {
    let (socket, native) = mock_socket(SocketType::Pair);
    native.push_inbound(&[b"keep"]);
    native.set_writable(true);
    socket.shared().readable_callback();
    socket.shared().writable_callback();
    let script = native.script.lock();
    assert_eq!(script.inbound.len(), 1);
    assert!(script.sent.is_empty());
  }

  #[tokio::test]
  async fn zero_timeout_fails_without_registering() {
    let (socket, _native) = mock_socket(SocketType::Push);
    assert!(matches!(
      socket.send_with_timeout([Msg::from_static(b"x")], Timeout::Immediate),
      Err(ZmqError::WouldBlock)
    ));
    assert!(socket.shared().inner.lock().waits.is_idle());
  }

  #[tokio::test]
  async fn spurious_wakeup_keeps_wait_registered() {
    let (socket, native) = mock_socket(SocketType::Pull);
    let mut completion = socket.receive().unwrap();
    native.readiness.notify_one();
    tokio::task::yield_now().await;
    assert!(futures::FutureExt::now_or_never(&mut completion).is_none());
    assert!(socket.shared().inner.lock().waits.read.is_some());

    native.push_inbound(&[b"late"]);
    assert_eq!(within(completion).await.unwrap()[0].data(), b"late");
  }

  #[tokio::test]
  async fn send_times_out_then_accepts_a_new_send() {
    let (socket, native) = mock_socket(SocketType::Push);
    let started = std::time::Instant::now();
    let pending = socket
      .send_with_timeout([Msg::from_static(b"x")], Duration::from_millis(100))
      .unwrap();
    assert!(matches!(within(pending).await, Err(ZmqError::Timeout)));
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert!(native.script.lock().sent.is_empty(), "nothing may be sent on timeout");

    native.set_writable(true);
    let again = socket.send([Msg::from_static(b"y")]).unwrap();
    assert!(again.is_immediate());
    again.await.unwrap();
  }

  #[tokio::test]
  async fn pending_send_completes_once_writable() {
    let (socket, native) = mock_socket(SocketType::Dealer);
    let pending = socket.send(vec![Msg::from_static(b"a"), Msg::from_static(b"b")]).unwrap();
    native.set_writable(true);
    within(pending).await.unwrap();
    let sent = native.script.lock().sent.clone();
    assert_eq!(sent, vec![(Bytes::from_static(b"a"), true), (Bytes::from_static(b"b"), false)]);
  }

  #[tokio::test]
  async fn interrupted_native_calls_are_retried() {
    let (socket, native) = mock_socket(SocketType::Push);
    native.script.lock().writable = true;
    native.script.lock().interrupts = 2;
    assert!(socket.send([Msg::from_static(b"x")]).unwrap().is_immediate());
    assert_eq!(native.script.lock().sent.len(), 1);
  }

  #[tokio::test]
  async fn close_cancels_pending_and_releases_once() {
    let (socket, native) = mock_socket(SocketType::Dealer);
    let send = socket.send([Msg::from_static(b"x")]).unwrap();
    let recv = socket.receive().unwrap();

    socket.close().unwrap();
    assert!(matches!(send.await, Err(ZmqError::Cancelled)));
    assert!(matches!(recv.await, Err(ZmqError::Cancelled)));
    assert!(socket.is_closed());

    assert!(matches!(socket.send([Msg::from_static(b"x")]), Err(ZmqError::SocketClosed)));
    assert!(matches!(socket.receive(), Err(ZmqError::SocketClosed)));
    assert!(matches!(socket.events(), Err(ZmqError::SocketClosed)));
    assert!(matches!(socket.get_option::<i32>(options::SNDHWM), Err(ZmqError::SocketClosed)));
    assert!(matches!(socket.connect("inproc://x"), Err(ZmqError::SocketClosed)));
    assert!(!socket.is_readable());
    socket.close().unwrap();
    socket.shared().redrive();

    let script = native.script.lock();
    assert_eq!(script.close_calls, 1);
    assert!(!script.touched_after_close);
  }

  #[tokio::test]
  async fn dropped_completion_withdraws_the_wait() {
    let (socket, _native) = mock_socket(SocketType::Pull);
    drop(socket.receive().unwrap());
    let again = socket.receive_with_timeout(Duration::from_millis(10)).unwrap();
    assert!(matches!(within(again).await, Err(ZmqError::Timeout)));
  }

  #[tokio::test]
  async fn bind_blocks_a_non_thread_safe_socket() {
    let (socket, native) = mock_socket(SocketType::Rep);
    let (gate, rx) = mpsc::channel();
    *native.bind_gate.lock() = Some(rx);

    let bound = socket.bind("inproc://blocked").unwrap();
    assert_eq!(socket.state(), SocketState::Blocked);
    assert!(matches!(socket.send([Msg::from_static(b"x")]), Err(ZmqError::InvalidState(_))));
    assert!(matches!(socket.set_option(options::SNDHWM, 5i32), Err(ZmqError::InvalidState(_))));
    assert!(matches!(socket.bind("inproc://other"), Err(ZmqError::InvalidState(_))));
    assert!(!socket.is_writable());
    // Local options stay available.
    assert_eq!(socket.get_option::<i32>(options::RCVTIMEO).unwrap(), -1);
    socket.set_send_timeout(Duration::from_millis(50)).unwrap();

    gate.send(()).unwrap();
    within(bound).await.unwrap();
    assert_eq!(socket.state(), SocketState::Open);
    assert_eq!(socket.send_timeout(), Timeout::After(Duration::from_millis(50)));
  }

  #[tokio::test]
  async fn close_during_bind_releases_when_the_call_returns() {
    let (socket, native) = mock_socket(SocketType::Pair);
    let (gate, rx) = mpsc::channel();
    *native.bind_gate.lock() = Some(rx);

    let bound = socket.bind("inproc://deferred").unwrap();
    socket.close().unwrap();
    assert!(socket.is_closed());
    assert!(matches!(socket.receive(), Err(ZmqError::SocketClosed)));
    assert_eq!(native.script.lock().close_calls, 0);

    gate.send(()).unwrap();
    let _ = within(bound).await;
    assert_eq!(native.script.lock().close_calls, 1);
  }

  #[tokio::test]
  async fn thread_safe_bind_stays_open() {
    let (socket, native) = mock_socket(SocketType::Client);
    let (gate, rx) = mpsc::channel();
    *native.bind_gate.lock() = Some(rx);

    let bound = socket.bind("inproc://shared").unwrap();
    assert_eq!(socket.state(), SocketState::Open);
    native.set_writable(true);
    assert!(socket.send([Msg::from_static(b"x")]).unwrap().is_immediate());
    gate.send(()).unwrap();
    within(bound).await.unwrap();
  }

  #[tokio::test]
  async fn pre_connect_option_after_bind_warns_but_applies() {
    let (socket, _native) = mock_socket(SocketType::Pub);
    let observer = socket.observer().unwrap();
    within(socket.bind("inproc://warn").unwrap()).await.unwrap();

    socket.set_option(options::SNDHWM, 10i32).unwrap();
    assert_eq!(socket.get_option::<i32>(options::SNDHWM).unwrap(), 10);

    assert!(matches!(observer.try_recv(), Some(SocketEvent::Bound { .. })));
    assert!(matches!(
      observer.try_recv(),
      Some(SocketEvent::OptionWarning { option: options::SNDHWM, .. })
    ));

    // Immediate options never warn.
    socket.set_option(options::LINGER, 0i32).unwrap();
    assert!(observer.try_recv().is_none());
  }

  #[tokio::test]
  async fn option_dispatch_errors() {
    let (socket, _native) = mock_socket(SocketType::Push);
    assert!(matches!(socket.set_option(9999, 1i32), Err(ZmqError::InvalidOption(9999))));
    assert!(matches!(
      socket.set_option(options::SNDHWM, String::from("ten")),
      Err(ZmqError::InvalidOptionType { option: options::SNDHWM, .. })
    ));
    assert!(matches!(
      socket.set_option(options::SUBSCRIBE, Bytes::new()),
      Err(ZmqError::UnsupportedOption(options::SUBSCRIBE))
    ));
    assert!(matches!(
      socket.set_option(options::EVENTS, 1i32),
      Err(ZmqError::UnsupportedOption(options::EVENTS))
    ));
    assert!(matches!(
      socket.set_option(options::SNDTIMEO, -7i32),
      Err(ZmqError::InvalidOptionValue(options::SNDTIMEO))
    ));
    assert_eq!(socket.get_option::<i64>(options::TYPE).unwrap(), SocketType::Push as i64);
    assert!(!socket.get_option::<bool>(options::THREAD_SAFE).unwrap());
  }

  #[tokio::test]
  async fn join_requires_dish() {
    let (socket, _native) = mock_socket(SocketType::Sub);
    assert!(matches!(socket.join("weather"), Err(ZmqError::InvalidSocketType(_))));
    let (dish, _native) = mock_socket(SocketType::Dish);
    dish.join("weather").unwrap();
    dish.leave("weather").unwrap();
  }

  #[tokio::test]
  async fn dropping_the_last_handle_closes() {
    let (socket, native) = mock_socket(SocketType::Pair);
    let clone = socket.clone();
    drop(socket);
    assert_eq!(native.script.lock().close_calls, 0);
    drop(clone);
    assert_eq!(native.script.lock().close_calls, 1);
  }

  #[tokio::test(start_paused = true)]
  async fn readiness_and_deadline_in_the_same_tick_resolve_with_data() {
    let (socket, native) = mock_socket(SocketType::Pull);
    let pending = socket.receive_with_timeout(Duration::from_millis(100)).unwrap();
    // Let the watch task park on its select.
    for _ in 0..4 {
      tokio::task::yield_now().await;
    }

    native.push_inbound(&[b"both"]);
    tokio::time::advance(Duration::from_millis(100)).await;
    let msg = pending.await.unwrap();
    assert_eq!(msg[0].data(), b"both");
  }

  #[tokio::test]
  async fn readiness_while_blocked_is_replayed_after_bind() {
    let (socket, native) = mock_socket(SocketType::Rep);
    let mut pending = socket.receive().unwrap();
    let (gate, rx) = mpsc::channel();
    *native.bind_gate.lock() = Some(rx);
    let bound = socket.bind("inproc://replay").unwrap();
    assert_eq!(socket.state(), SocketState::Blocked);

    native.push_inbound(&[b"queued"]);
    for _ in 0..4 {
      tokio::task::yield_now().await;
    }
    assert!(futures::FutureExt::now_or_never(&mut pending).is_none());
    assert_eq!(native.script.lock().inbound.len(), 1, "handle must not be read while blocked");

    gate.send(()).unwrap();
    within(bound).await.unwrap();
    let msg = within(pending).await.unwrap();
    assert_eq!(msg[0].data(), b"queued");
  }

  #[tokio::test]
  async fn deadline_while_blocked_times_out_without_touching_the_handle() {
    let (socket, native) = mock_socket(SocketType::Rep);
    let pending = socket.receive_with_timeout(Duration::from_millis(30)).unwrap();
    let (gate, rx) = mpsc::channel();
    *native.bind_gate.lock() = Some(rx);
    let bound = socket.bind("inproc://late").unwrap();
    native.push_inbound(&[b"unseen"]);
    let touches = native.script.lock().touches;

    assert!(matches!(within(pending).await, Err(ZmqError::Timeout)));
    assert_eq!(socket.state(), SocketState::Blocked);
    {
      let script = native.script.lock();
      assert_eq!(script.touches, touches);
      assert_eq!(script.inbound.len(), 1);
    }

    gate.send(()).unwrap();
    within(bound).await.unwrap();
    assert_eq!(socket.receive().unwrap().await.unwrap()[0].data(), b"unseen");
  }

  #[tokio::test]
  async fn sub_millisecond_timeout_is_still_a_bounded_wait() {
    let native = Arc::new(MockNative::default());
    let ctx = Context::with_transport(MockTransport(native)).unwrap();
    let opts = SocketOptions::new().with_send_timeout(Duration::from_micros(500));
    let socket = ctx.socket_with_options(SocketType::Push, opts).unwrap();
    assert_eq!(socket.send_timeout(), Timeout::After(Duration::from_millis(1)));

    let pending = socket.send([Msg::from_static(b"x")]).unwrap();
    assert!(!pending.is_immediate());
    assert!(matches!(within(pending).await, Err(ZmqError::Timeout)));
  }

  #[tokio::test]
  async fn empty_message_is_rejected() {
    let (socket, _native) = mock_socket(SocketType::Push);
    assert!(matches!(socket.send(Vec::<Msg>::new()), Err(ZmqError::InvalidMessage(_))));
    let (sub, _native) = mock_socket(SocketType::Sub);
    assert!(matches!(sub.send([Msg::from_static(b"x")]), Err(ZmqError::InvalidSocketType(_))));
  }
}
