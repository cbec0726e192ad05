// src/socket/types.rs

use std::fmt;

/// The wire pattern of a socket. Fixed at creation.
///
/// Discriminants match the libzmq `ZMQ_TYPE` values so `TYPE` can be reported as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SocketType {
  /// Exclusive bidirectional pair.
  Pair = 0,
  /// Publish messages to subscribers (Pub-Sub pattern).
  Pub = 1,
  /// Subscribe to messages from publishers (Pub-Sub pattern).
  Sub = 2,
  /// Send requests and receive replies (Req-Rep pattern).
  Req = 3,
  /// Receive requests and send replies (Req-Rep pattern).
  Rep = 4,
  /// Asynchronous request-reply, load-balancing outgoing (Dealer-Router pattern).
  Dealer = 5,
  /// Asynchronous request-reply, routing incoming (Dealer-Router pattern).
  Router = 6,
  /// Collect messages from a pool of distributors (Push-Pull pattern).
  Pull = 7,
  /// Distribute messages to a pool of workers (Push-Pull pattern).
  Push = 8,
  /// Publisher that also receives subscription messages.
  XPub = 9,
  /// Subscriber that sends subscription messages.
  XSub = 10,
  /// Raw stream endpoint.
  Stream = 11,
  // Draft, thread-safe types.
  Server = 12,
  Client = 13,
  Radio = 14,
  Dish = 15,
  Gather = 16,
  Scatter = 17,
}

impl SocketType {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Pair => "PAIR",
      Self::Pub => "PUB",
      Self::Sub => "SUB",
      Self::Req => "REQ",
      Self::Rep => "REP",
      Self::Dealer => "DEALER",
      Self::Router => "ROUTER",
      Self::Pull => "PULL",
      Self::Push => "PUSH",
      Self::XPub => "XPUB",
      Self::XSub => "XSUB",
      Self::Stream => "STREAM",
      Self::Server => "SERVER",
      Self::Client => "CLIENT",
      Self::Radio => "RADIO",
      Self::Dish => "DISH",
      Self::Gather => "GATHER",
      Self::Scatter => "SCATTER",
    }
  }

  /// Returns the type for a libzmq `ZMQ_TYPE` value.
  pub fn from_raw(value: i64) -> Option<Self> {
    let ty = match value {
      0 => Self::Pair,
      1 => Self::Pub,
      2 => Self::Sub,
      3 => Self::Req,
      4 => Self::Rep,
      5 => Self::Dealer,
      6 => Self::Router,
      7 => Self::Pull,
      8 => Self::Push,
      9 => Self::XPub,
      10 => Self::XSub,
      11 => Self::Stream,
      12 => Self::Server,
      13 => Self::Client,
      14 => Self::Radio,
      15 => Self::Dish,
      16 => Self::Gather,
      17 => Self::Scatter,
      _ => return None,
    };
    Some(ty)
  }

  /// Whether the pattern permits concurrent native access from multiple threads.
  pub fn is_thread_safe(&self) -> bool {
    matches!(
      self,
      Self::Server | Self::Client | Self::Radio | Self::Dish | Self::Gather | Self::Scatter
    )
  }

  /// Whether the pattern can send application messages at all.
  pub fn can_send(&self) -> bool {
    !matches!(self, Self::Sub | Self::Pull | Self::Dish | Self::Gather)
  }

  /// Whether the pattern can receive application messages at all.
  pub fn can_receive(&self) -> bool {
    !matches!(self, Self::Pub | Self::Push | Self::Radio | Self::Scatter)
  }
}

impl fmt::Display for SocketType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn raw_values_round_trip_for_known_types() {
    assert_eq!(SocketType::from_raw(8), Some(SocketType::Push));
    assert_eq!(SocketType::from_raw(SocketType::Dish as i64), Some(SocketType::Dish));
    assert_eq!(SocketType::from_raw(42), None);
  }

  #[test]
  fn only_draft_types_are_thread_safe() {
    assert!(SocketType::Client.is_thread_safe());
    assert!(SocketType::Radio.is_thread_safe());
    assert!(!SocketType::Dealer.is_thread_safe());
    assert!(!SocketType::Pub.is_thread_safe());
  }

  #[test]
  fn direction_capabilities() {
    assert!(!SocketType::Pub.can_receive());
    assert!(!SocketType::Sub.can_send());
    assert!(SocketType::Dealer.can_send() && SocketType::Dealer.can_receive());
    assert_eq!(SocketType::Router.to_string(), "ROUTER");
  }
}
