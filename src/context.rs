// src/context.rs

use crate::error::ZmqError;
use crate::socket::core::{Socket, SocketShared};
use crate::socket::options::SocketOptions;
use crate::socket::types::SocketType;
use crate::transport::Transport;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::runtime::Handle;

#[derive(Default)]
struct Registry {
  sockets: HashMap<usize, Weak<SocketShared>>,
  terminated: bool,
}

/// Holds the internal state shared by multiple Context handles.
pub(crate) struct ContextInner {
  transport: Arc<dyn Transport>,
  /// The host event loop that runs readiness watches and blocking endpoint calls.
  runtime: Handle,
  /// Next available unique handle ID for sockets.
  next_handle: AtomicUsize,
  registry: Mutex<Registry>,
  defaults: Mutex<SocketOptions>,
}

impl ContextInner {
  /// Generates the next unique handle ID.
  fn next_handle(&self) -> usize {
    // Relaxed ordering is sufficient for a simple counter
    self.next_handle.fetch_add(1, Ordering::Relaxed)
  }
}

/// A handle to a context: the native transport, the runtime and every socket made from it.
/// Contexts are cloneable and thread-safe.
#[derive(Clone)] // Clone is cheap due to Arc
pub struct Context {
  inner: Arc<ContextInner>,
}

impl Context {
  /// Creates a context over the in-memory `inproc://` transport.
  ///
  /// Must be called from within a tokio runtime.
  #[cfg(feature = "inproc")]
  pub fn new() -> Result<Self, ZmqError> {
    Self::with_transport(crate::transport::inproc::InprocTransport::new())
  }

  /// Creates a context over the given transport, bound to the current tokio runtime.
  pub fn with_transport<T: Transport>(transport: T) -> Result<Self, ZmqError> {
    let runtime = Handle::try_current()
      .map_err(|e| ZmqError::Internal(format!("a context needs a tokio runtime: {}", e)))?;
    tracing::debug!("Creating new context");
    Ok(Self {
      inner: Arc::new(ContextInner {
        transport: Arc::new(transport),
        runtime,
        next_handle: AtomicUsize::new(1),
        registry: Mutex::new(Registry::default()),
        defaults: Mutex::new(SocketOptions::default()),
      }),
    })
  }

  /// Sets the options every later [`socket`](Self::socket) call starts from.
  pub fn with_defaults(self, defaults: SocketOptions) -> Self {
    *self.inner.defaults.lock() = defaults;
    self
  }

  /// Creates a socket of the specified type with the context's default options.
  pub fn socket(&self, socket_type: SocketType) -> Result<Socket, ZmqError> {
    let defaults = self.inner.defaults.lock().clone();
    self.socket_with_options(socket_type, defaults)
  }

  pub fn socket_with_options(&self, socket_type: SocketType, opts: SocketOptions) -> Result<Socket, ZmqError> {
    if self.is_terminated() {
      return Err(ZmqError::InvalidState("context is terminated"));
    }
    let handle = self.inner.next_handle();
    let native = self.inner.transport.create(socket_type)?;
    let socket = Socket::create(self.clone(), handle, socket_type, native, self.inner.runtime.clone(), &opts)?;

    let mut registry = self.inner.registry.lock();
    if registry.terminated {
      drop(registry);
      // Lost the race with term(); dropping the socket releases its handle.
      drop(socket);
      return Err(ZmqError::InvalidState("context is terminated"));
    }
    registry.sockets.insert(handle, Arc::downgrade(socket.shared()));
    drop(registry);
    tracing::debug!(socket_type = %socket_type, handle = handle, "Socket created");
    Ok(socket)
  }

  /// Closes every live socket of this context and refuses new ones. Pending operations
  /// on those sockets are cancelled.
  pub fn term(&self) -> Result<(), ZmqError> {
    let sockets: Vec<Arc<SocketShared>> = {
      let mut registry = self.inner.registry.lock();
      if registry.terminated {
        return Ok(());
      }
      registry.terminated = true;
      registry.sockets.drain().filter_map(|(_, s)| s.upgrade()).collect()
    };
    tracing::info!(sockets = sockets.len(), "Context terminating");
    for shared in sockets {
      if let Err(e) = shared.close() {
        tracing::warn!(handle = shared.handle, error = %e, "Error closing socket during term");
      }
    }
    Ok(())
  }

  pub fn is_terminated(&self) -> bool {
    self.inner.registry.lock().terminated
  }

  /// Number of sockets created by this context that are still open.
  pub fn socket_count(&self) -> usize {
    self.inner.registry.lock().sockets.len()
  }

  /// Drops a closed socket from the registry.
  pub(crate) fn forget(&self, handle: usize) {
    self.inner.registry.lock().sockets.remove(&handle);
  }
}

impl fmt::Debug for Context {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Context")
      .field("terminated", &self.is_terminated())
      .finish_non_exhaustive()
  }
}

/// Creates a new library context over the in-memory transport.
#[cfg(feature = "inproc")]
pub fn context() -> Result<Context, ZmqError> {
  Context::new()
}
