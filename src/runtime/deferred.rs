// src/runtime/deferred.rs

use crate::error::ZmqError;
use futures::future::FusedFuture;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Creates a connected resolver/future pair for one pending operation.
pub(crate) fn deferred<T>() -> (Deferred<T>, Completion<T>) {
  let (tx, rx) = oneshot::channel();
  (
    Deferred { sender: Some(tx) },
    Completion {
      state: CompletionState::Waiting(rx),
    },
  )
}

/// The resolving half of a pending asynchronous operation.
///
/// Resolution consumes the `Deferred`, so a result can be assigned at most once.
/// A `Deferred` dropped without being settled rejects its `Completion` with
/// [`ZmqError::Cancelled`].
pub struct Deferred<T> {
  // Option so Drop can tell whether the result was already delivered.
  sender: Option<oneshot::Sender<Result<T, ZmqError>>>,
}

impl<T> Deferred<T> {
  /// Fulfills the operation with a value.
  pub(crate) fn resolve(self, value: T) {
    self.settle(Ok(value));
  }

  /// Fails the operation.
  pub(crate) fn reject(self, error: ZmqError) {
    self.settle(Err(error));
  }

  pub(crate) fn settle(mut self, result: Result<T, ZmqError>) {
    if let Some(sender) = self.sender.take() {
      // The receiver may be gone; that is a normal outcome for an abandoned completion.
      let _ = sender.send(result);
    }
  }

  /// True once the caller dropped the matching `Completion`.
  pub(crate) fn is_abandoned(&self) -> bool {
    self.sender.as_ref().map_or(true, |tx| tx.is_closed())
  }
}

impl<T> Drop for Deferred<T> {
  fn drop(&mut self) {
    if let Some(sender) = self.sender.take() {
      let _ = sender.send(Err(ZmqError::Cancelled));
    }
  }
}

impl<T> fmt::Debug for Deferred<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Deferred")
      .field("settled", &self.sender.is_none())
      .field("abandoned", &self.is_abandoned())
      .finish()
  }
}

enum CompletionState<T> {
  /// Settled on the fast path, no asynchronous machinery involved.
  Ready(Option<Result<T, ZmqError>>),
  /// Parked until the matching `Deferred` settles.
  Waiting(oneshot::Receiver<Result<T, ZmqError>>),
  Done,
}

/// The outcome of a send, receive, bind or unbind, as seen by the caller.
///
/// Either already settled (the operation finished without suspending) or waiting for a
/// readiness callback, a deadline, or close. Dropping a waiting `Completion` withdraws
/// the operation.
#[must_use = "a Completion does nothing unless awaited; dropping it withdraws the operation"]
pub struct Completion<T> {
  state: CompletionState<T>,
}

// Only the oneshot receiver is ever polled, and it is Unpin; `T` is moved, never pinned.
impl<T> Unpin for Completion<T> {}

impl<T> Completion<T> {
  pub(crate) fn ready(result: Result<T, ZmqError>) -> Self {
    Self {
      state: CompletionState::Ready(Some(result)),
    }
  }

  /// True if the operation completed synchronously at the call site.
  pub fn is_immediate(&self) -> bool {
    matches!(self.state, CompletionState::Ready(_))
  }
}

impl<T> Future for Completion<T> {
  type Output = Result<T, ZmqError>;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    let this = self.get_mut();
    let output = match &mut this.state {
      CompletionState::Ready(result) => result
        .take()
        .unwrap_or_else(|| Err(ZmqError::Internal("completion polled after ready".into()))),
      CompletionState::Waiting(rx) => match Pin::new(rx).poll(cx) {
        Poll::Pending => return Poll::Pending,
        Poll::Ready(Ok(result)) => result,
        Poll::Ready(Err(_recv_error)) => Err(ZmqError::Cancelled),
      },
      CompletionState::Done => Err(ZmqError::Internal("completion polled after ready".into())),
    };
    this.state = CompletionState::Done;
    Poll::Ready(output)
  }
}

impl<T> FusedFuture for Completion<T> {
  fn is_terminated(&self) -> bool {
    matches!(self.state, CompletionState::Done)
  }
}

impl<T> fmt::Debug for Completion<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = match self.state {
      CompletionState::Ready(_) => "ready",
      CompletionState::Waiting(_) => "waiting",
      CompletionState::Done => "done",
    };
    f.debug_struct("Completion").field("state", &state).finish()
  }
}
