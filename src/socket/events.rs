// src/socket/events.rs

use bitflags::bitflags;

bitflags! {
    /// Readiness flags reported by the handle's `EVENTS` query.
    ///
    /// Bit values match libzmq's `ZMQ_POLLIN` / `ZMQ_POLLOUT` / `ZMQ_POLLERR`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PollEvents: u8 {
        /// At least one message can be received without blocking.
        const POLLIN = 0b001;
        /// At least one message can be sent without blocking.
        const POLLOUT = 0b010;
        const POLLERR = 0b100;
    }
}

/// Lifecycle and diagnostic events surfaced to a socket's [`Observer`](crate::socket::Observer).
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SocketEvent {
  /// Socket has started listening on the endpoint.
  Bound { endpoint: String },
  /// Binding to the endpoint failed.
  BindFailed { endpoint: String, error_msg: String },
  /// Socket stopped listening on the endpoint.
  Unbound { endpoint: String },
  /// Connection to the endpoint was initiated.
  Connected { endpoint: String },
  /// Connection to the endpoint was dropped by request.
  Disconnected { endpoint: String },
  /// Joined a multicast group (DISH).
  Joined { group: String },
  /// Left a multicast group (DISH).
  Left { group: String },
  /// A set option will not affect endpoints that already exist.
  OptionWarning { option: i32, message: String },
  /// The socket handle was released.
  Closed,
}

// Type alias for the channel sender used for monitor events
pub type MonitorSender = async_channel::Sender<SocketEvent>;
// Type alias for the channel receiver used for monitor events
pub type MonitorReceiver = async_channel::Receiver<SocketEvent>;

// Default capacity for monitor channel
pub const DEFAULT_MONITOR_CAPACITY: usize = 100;
