//! rzmq_socket - ZeroMQ-style message sockets driven by readiness notifications on Tokio.
//!
//! A [`Socket`] owns one native handle (provided by a [`transport::Transport`]) and runs
//! the Open/Blocked/Closed state machine around it. Sends and receives try the handle
//! once without blocking and, if it would block, park a single per-direction wait that
//! is completed by readiness, a deadline, or close.

pub mod context;
pub mod error;
pub mod message;
pub mod runtime;
pub mod socket;
pub mod transport;

// Re-export core types for user convenience
pub use context::Context;
#[cfg(feature = "inproc")]
pub use context::context;
pub use error::ZmqError;
pub use message::{Msg, MsgFlags};
pub use runtime::Completion;
pub use socket::options::{OptionValue, SocketOptions, Timeout};
pub use socket::{Observer, PollEvents, Socket, SocketEvent, SocketState, SocketType};

static_assertions::assert_impl_all!(Socket: Send, Sync, Clone);
static_assertions::assert_impl_all!(Context: Send, Sync, Clone);
static_assertions::assert_impl_all!(Observer: Send, Sync);
static_assertions::assert_impl_all!(Completion<Vec<Msg>>: Send, Unpin);
static_assertions::assert_impl_all!(ZmqError: Send, Sync);

// --- Top-Level Functions ---

const VERSION_MAJOR: i32 = 0;
const VERSION_MINOR: i32 = 1;
const VERSION_PATCH: i32 = 0;

/// Returns the library version as a tuple (major, minor, patch).
pub fn version() -> (i32, i32, i32) {
  (VERSION_MAJOR, VERSION_MINOR, VERSION_PATCH)
}
