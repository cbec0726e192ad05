// src/socket/options.rs

use std::fmt;
use std::time::Duration;

use bytes::Bytes;

use crate::error::ZmqError;
use crate::socket::types::SocketType;

// Option identifiers, consistent with libzmq.
pub const AFFINITY: i32 = 4;
pub const ROUTING_ID: i32 = 5; // Often called ZMQ_IDENTITY
pub const SUBSCRIBE: i32 = 6;
pub const UNSUBSCRIBE: i32 = 7;
pub const RATE: i32 = 8;
pub const RECOVERY_IVL: i32 = 9;
pub const SNDBUF: i32 = 11;
pub const RCVBUF: i32 = 12;
pub const RCVMORE: i32 = 13;
pub const EVENTS: i32 = 15;
pub const TYPE: i32 = 16;
pub const LINGER: i32 = 17;
pub const RECONNECT_IVL: i32 = 18;
pub const BACKLOG: i32 = 19;
pub const RECONNECT_IVL_MAX: i32 = 21;
pub const MAXMSGSIZE: i32 = 22;
pub const SNDHWM: i32 = 23;
pub const RCVHWM: i32 = 24;
pub const MULTICAST_HOPS: i32 = 25;
pub const RCVTIMEO: i32 = 27;
pub const SNDTIMEO: i32 = 28;
pub const LAST_ENDPOINT: i32 = 32;
pub const ROUTER_MANDATORY: i32 = 33;
pub const TCP_KEEPALIVE: i32 = 34;
pub const TCP_KEEPALIVE_CNT: i32 = 35;
pub const TCP_KEEPALIVE_IDLE: i32 = 36;
pub const TCP_KEEPALIVE_INTVL: i32 = 37;
pub const IMMEDIATE: i32 = 39;
pub const XPUB_VERBOSE: i32 = 40;
pub const IPV6: i32 = 42;
pub const MECHANISM: i32 = 43;
pub const PLAIN_SERVER: i32 = 44;
pub const PLAIN_USERNAME: i32 = 45;
pub const PLAIN_PASSWORD: i32 = 46;
pub const CURVE_SERVER: i32 = 47;
pub const CURVE_PUBLICKEY: i32 = 48;
pub const CURVE_SECRETKEY: i32 = 49;
pub const CURVE_SERVERKEY: i32 = 50;
pub const PROBE_ROUTER: i32 = 51;
pub const REQ_CORRELATE: i32 = 52;
pub const REQ_RELAXED: i32 = 53;
pub const CONFLATE: i32 = 54;
pub const ZAP_DOMAIN: i32 = 55;
pub const ROUTER_HANDOVER: i32 = 56;
pub const TOS: i32 = 57;
pub const CONNECT_ROUTING_ID: i32 = 61;
pub const HANDSHAKE_IVL: i32 = 66;
pub const XPUB_NODROP: i32 = 69;
pub const XPUB_MANUAL: i32 = 71;
pub const XPUB_WELCOME_MSG: i32 = 72;
pub const INVERT_MATCHING: i32 = 74;
pub const HEARTBEAT_IVL: i32 = 75;
pub const HEARTBEAT_TTL: i32 = 76;
pub const HEARTBEAT_TIMEOUT: i32 = 77;
pub const XPUB_VERBOSER: i32 = 78;
pub const CONNECT_TIMEOUT: i32 = 79;
pub const THREAD_SAFE: i32 = 81;

/// Semantic type of an option value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionKind {
  Int,
  Bool,
  Str,
  Bytes,
}

impl fmt::Display for OptionKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      OptionKind::Int => "integer",
      OptionKind::Bool => "boolean",
      OptionKind::Str => "string",
      OptionKind::Bytes => "bytes",
    })
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
  Read,
  Write,
  ReadWrite,
}

impl Access {
  pub fn readable(&self) -> bool {
    matches!(self, Access::Read | Access::ReadWrite)
  }

  pub fn writable(&self) -> bool {
    matches!(self, Access::Write | Access::ReadWrite)
  }
}

/// Static description of one socket option.
#[derive(Debug, Clone, Copy)]
pub struct OptionDescriptor {
  pub id: i32,
  pub name: &'static str,
  pub kind: OptionKind,
  pub access: Access,
  /// Takes effect immediately, even on established endpoints.
  pub immediate: bool,
  /// Restricts the option to these socket types. `None` means any type.
  pub socket_types: Option<&'static [SocketType]>,
}

impl OptionDescriptor {
  const fn new(id: i32, name: &'static str, kind: OptionKind, access: Access) -> Self {
    Self {
      id,
      name,
      kind,
      access,
      immediate: false,
      socket_types: None,
    }
  }

  const fn immediate(mut self) -> Self {
    self.immediate = true;
    self
  }

  const fn only(mut self, types: &'static [SocketType]) -> Self {
    self.socket_types = Some(types);
    self
  }

  /// Whether this option can be used on a socket of the given type.
  pub fn applies_to(&self, socket_type: SocketType) -> bool {
    self.socket_types.map_or(true, |types| types.contains(&socket_type))
  }
}

const SUBSCRIBERS: &[SocketType] = &[SocketType::Sub, SocketType::XSub];
const ROUTERS: &[SocketType] = &[SocketType::Router];
const XPUBS: &[SocketType] = &[SocketType::XPub];
const REQS: &[SocketType] = &[SocketType::Req];
const CONNECT_ID_TYPES: &[SocketType] = &[SocketType::Router, SocketType::Stream];

use self::Access::{Read, ReadWrite, Write};
use self::OptionKind::{Bool, Bytes as Blob, Int, Str};

static OPTIONS: &[OptionDescriptor] = &[
  OptionDescriptor::new(AFFINITY, "affinity", Int, ReadWrite),
  OptionDescriptor::new(ROUTING_ID, "routing_id", Blob, ReadWrite),
  OptionDescriptor::new(SUBSCRIBE, "subscribe", Blob, Write).immediate().only(SUBSCRIBERS),
  OptionDescriptor::new(UNSUBSCRIBE, "unsubscribe", Blob, Write).immediate().only(SUBSCRIBERS),
  OptionDescriptor::new(RATE, "rate", Int, ReadWrite),
  OptionDescriptor::new(RECOVERY_IVL, "recovery_ivl", Int, ReadWrite),
  OptionDescriptor::new(SNDBUF, "sndbuf", Int, ReadWrite),
  OptionDescriptor::new(RCVBUF, "rcvbuf", Int, ReadWrite),
  OptionDescriptor::new(RCVMORE, "rcvmore", Bool, Read),
  OptionDescriptor::new(EVENTS, "events", Int, Read),
  OptionDescriptor::new(TYPE, "type", Int, Read),
  OptionDescriptor::new(LINGER, "linger", Int, ReadWrite).immediate(),
  OptionDescriptor::new(RECONNECT_IVL, "reconnect_ivl", Int, ReadWrite),
  OptionDescriptor::new(BACKLOG, "backlog", Int, ReadWrite),
  OptionDescriptor::new(RECONNECT_IVL_MAX, "reconnect_ivl_max", Int, ReadWrite),
  OptionDescriptor::new(MAXMSGSIZE, "maxmsgsize", Int, ReadWrite),
  OptionDescriptor::new(SNDHWM, "sndhwm", Int, ReadWrite),
  OptionDescriptor::new(RCVHWM, "rcvhwm", Int, ReadWrite),
  OptionDescriptor::new(MULTICAST_HOPS, "multicast_hops", Int, ReadWrite),
  OptionDescriptor::new(RCVTIMEO, "rcvtimeo", Int, ReadWrite).immediate(),
  OptionDescriptor::new(SNDTIMEO, "sndtimeo", Int, ReadWrite).immediate(),
  OptionDescriptor::new(LAST_ENDPOINT, "last_endpoint", Str, Read),
  OptionDescriptor::new(ROUTER_MANDATORY, "router_mandatory", Bool, Write).immediate().only(ROUTERS),
  OptionDescriptor::new(TCP_KEEPALIVE, "tcp_keepalive", Int, ReadWrite),
  OptionDescriptor::new(TCP_KEEPALIVE_CNT, "tcp_keepalive_cnt", Int, ReadWrite),
  OptionDescriptor::new(TCP_KEEPALIVE_IDLE, "tcp_keepalive_idle", Int, ReadWrite),
  OptionDescriptor::new(TCP_KEEPALIVE_INTVL, "tcp_keepalive_intvl", Int, ReadWrite),
  OptionDescriptor::new(IMMEDIATE, "immediate", Bool, ReadWrite),
  OptionDescriptor::new(XPUB_VERBOSE, "xpub_verbose", Bool, Write).immediate().only(XPUBS),
  OptionDescriptor::new(IPV6, "ipv6", Bool, ReadWrite),
  OptionDescriptor::new(MECHANISM, "mechanism", Int, Read),
  OptionDescriptor::new(PLAIN_SERVER, "plain_server", Bool, ReadWrite),
  OptionDescriptor::new(PLAIN_USERNAME, "plain_username", Str, ReadWrite),
  OptionDescriptor::new(PLAIN_PASSWORD, "plain_password", Str, ReadWrite),
  OptionDescriptor::new(CURVE_SERVER, "curve_server", Bool, ReadWrite),
  OptionDescriptor::new(CURVE_PUBLICKEY, "curve_publickey", Blob, ReadWrite),
  OptionDescriptor::new(CURVE_SECRETKEY, "curve_secretkey", Blob, ReadWrite),
  OptionDescriptor::new(CURVE_SERVERKEY, "curve_serverkey", Blob, ReadWrite),
  OptionDescriptor::new(PROBE_ROUTER, "probe_router", Bool, Write).immediate(),
  OptionDescriptor::new(REQ_CORRELATE, "req_correlate", Bool, Write).immediate().only(REQS),
  OptionDescriptor::new(REQ_RELAXED, "req_relaxed", Bool, Write).immediate().only(REQS),
  OptionDescriptor::new(CONFLATE, "conflate", Bool, ReadWrite),
  OptionDescriptor::new(ZAP_DOMAIN, "zap_domain", Str, ReadWrite),
  OptionDescriptor::new(ROUTER_HANDOVER, "router_handover", Bool, Write).immediate().only(ROUTERS),
  OptionDescriptor::new(TOS, "tos", Int, ReadWrite),
  OptionDescriptor::new(CONNECT_ROUTING_ID, "connect_routing_id", Blob, Write)
    .immediate()
    .only(CONNECT_ID_TYPES),
  OptionDescriptor::new(HANDSHAKE_IVL, "handshake_ivl", Int, ReadWrite),
  OptionDescriptor::new(XPUB_NODROP, "xpub_nodrop", Bool, Write).immediate().only(XPUBS),
  OptionDescriptor::new(XPUB_MANUAL, "xpub_manual", Bool, Write).immediate().only(XPUBS),
  OptionDescriptor::new(XPUB_WELCOME_MSG, "xpub_welcome_msg", Blob, Write).only(XPUBS),
  OptionDescriptor::new(INVERT_MATCHING, "invert_matching", Bool, ReadWrite),
  OptionDescriptor::new(HEARTBEAT_IVL, "heartbeat_ivl", Int, ReadWrite),
  OptionDescriptor::new(HEARTBEAT_TTL, "heartbeat_ttl", Int, ReadWrite),
  OptionDescriptor::new(HEARTBEAT_TIMEOUT, "heartbeat_timeout", Int, ReadWrite),
  OptionDescriptor::new(XPUB_VERBOSER, "xpub_verboser", Bool, Write).immediate().only(XPUBS),
  OptionDescriptor::new(CONNECT_TIMEOUT, "connect_timeout", Int, ReadWrite),
  OptionDescriptor::new(THREAD_SAFE, "thread_safe", Bool, Read),
];

/// Looks up the static descriptor for an option id.
pub fn descriptor(option: i32) -> Option<&'static OptionDescriptor> {
  OPTIONS.iter().find(|d| d.id == option)
}

/// A dynamically typed option value, as exchanged with the handle provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
  Int(i64),
  Bool(bool),
  Str(String),
  Bytes(Bytes),
}

impl OptionValue {
  pub fn kind(&self) -> OptionKind {
    match self {
      OptionValue::Int(_) => OptionKind::Int,
      OptionValue::Bool(_) => OptionKind::Bool,
      OptionValue::Str(_) => OptionKind::Str,
      OptionValue::Bytes(_) => OptionKind::Bytes,
    }
  }
}

/// Rust types that map onto one option kind.
pub trait OptionType: Sized {
  const KIND: OptionKind;

  fn into_value(self, option: i32) -> Result<OptionValue, ZmqError>;

  fn from_value(option: i32, value: OptionValue) -> Result<Self, ZmqError>;
}

fn type_mismatch(option: i32, expected: OptionKind) -> ZmqError {
  ZmqError::InvalidOptionType { option, expected }
}

impl OptionType for i64 {
  const KIND: OptionKind = OptionKind::Int;

  fn into_value(self, _option: i32) -> Result<OptionValue, ZmqError> {
    Ok(OptionValue::Int(self))
  }

  fn from_value(option: i32, value: OptionValue) -> Result<Self, ZmqError> {
    match value {
      OptionValue::Int(v) => Ok(v),
      _ => Err(type_mismatch(option, Self::KIND)),
    }
  }
}

impl OptionType for i32 {
  const KIND: OptionKind = OptionKind::Int;

  fn into_value(self, _option: i32) -> Result<OptionValue, ZmqError> {
    Ok(OptionValue::Int(self as i64))
  }

  fn from_value(option: i32, value: OptionValue) -> Result<Self, ZmqError> {
    let v = i64::from_value(option, value)?;
    i32::try_from(v).map_err(|_| ZmqError::InvalidOptionValue(option))
  }
}

impl OptionType for u64 {
  const KIND: OptionKind = OptionKind::Int;

  fn into_value(self, option: i32) -> Result<OptionValue, ZmqError> {
    i64::try_from(self)
      .map(OptionValue::Int)
      .map_err(|_| ZmqError::InvalidOptionValue(option))
  }

  fn from_value(option: i32, value: OptionValue) -> Result<Self, ZmqError> {
    let v = i64::from_value(option, value)?;
    u64::try_from(v).map_err(|_| ZmqError::InvalidOptionValue(option))
  }
}

impl OptionType for bool {
  const KIND: OptionKind = OptionKind::Bool;

  fn into_value(self, _option: i32) -> Result<OptionValue, ZmqError> {
    Ok(OptionValue::Bool(self))
  }

  fn from_value(option: i32, value: OptionValue) -> Result<Self, ZmqError> {
    match value {
      OptionValue::Bool(v) => Ok(v),
      _ => Err(type_mismatch(option, Self::KIND)),
    }
  }
}

impl OptionType for String {
  const KIND: OptionKind = OptionKind::Str;

  fn into_value(self, _option: i32) -> Result<OptionValue, ZmqError> {
    Ok(OptionValue::Str(self))
  }

  fn from_value(option: i32, value: OptionValue) -> Result<Self, ZmqError> {
    match value {
      OptionValue::Str(v) => Ok(v),
      _ => Err(type_mismatch(option, Self::KIND)),
    }
  }
}

impl OptionType for Bytes {
  const KIND: OptionKind = OptionKind::Bytes;

  fn into_value(self, _option: i32) -> Result<OptionValue, ZmqError> {
    Ok(OptionValue::Bytes(self))
  }

  fn from_value(option: i32, value: OptionValue) -> Result<Self, ZmqError> {
    match value {
      OptionValue::Bytes(v) => Ok(v),
      _ => Err(type_mismatch(option, Self::KIND)),
    }
  }
}

impl OptionType for Vec<u8> {
  const KIND: OptionKind = OptionKind::Bytes;

  fn into_value(self, _option: i32) -> Result<OptionValue, ZmqError> {
    Ok(OptionValue::Bytes(Bytes::from(self)))
  }

  fn from_value(option: i32, value: OptionValue) -> Result<Self, ZmqError> {
    Bytes::from_value(option, value).map(|b| b.to_vec())
  }
}

/// Checks a value against the option's declared kind and its range rules.
pub(crate) fn validate_value(desc: &OptionDescriptor, value: &OptionValue) -> Result<(), ZmqError> {
  if value.kind() != desc.kind {
    return Err(type_mismatch(desc.id, desc.kind));
  }
  let valid = match (desc.id, value) {
    // -1 means infinite/unset, other negatives are meaningless.
    (LINGER | RCVTIMEO | SNDTIMEO | RECONNECT_IVL | RECONNECT_IVL_MAX | MAXMSGSIZE | SNDBUF | RCVBUF, OptionValue::Int(v)) => {
      *v >= -1
    }
    (SNDHWM | RCVHWM | BACKLOG | RATE | RECOVERY_IVL | HEARTBEAT_IVL | HEARTBEAT_TIMEOUT | CONNECT_TIMEOUT | HANDSHAKE_IVL, OptionValue::Int(v)) => {
      *v >= 0
    }
    (TCP_KEEPALIVE, OptionValue::Int(v)) => (-1..=1).contains(v),
    (HEARTBEAT_TTL, OptionValue::Int(v)) => (0..=6_553_599).contains(v),
    // Routing ids are 1..=255 bytes.
    (ROUTING_ID | CONNECT_ROUTING_ID, OptionValue::Bytes(b)) => !b.is_empty() && b.len() <= 255,
    (ZAP_DOMAIN, OptionValue::Str(s)) => s.len() <= 255,
    (CURVE_PUBLICKEY | CURVE_SECRETKEY | CURVE_SERVERKEY, OptionValue::Bytes(b)) => b.len() == 32,
    _ => true,
  };
  if valid {
    Ok(())
  } else {
    Err(ZmqError::InvalidOptionValue(desc.id))
  }
}

/// Send/receive timeout, the typed form of the libzmq millisecond convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Timeout {
  /// `-1`: wait until the operation completes or the socket closes.
  #[default]
  Infinite,
  /// `0`: fail with `WouldBlock` instead of waiting.
  Immediate,
  /// `> 0`: wait at most this long.
  After(Duration),
}

impl Timeout {
  /// Parses a millisecond value: `-1` infinite, `0` immediate, `> 0` bounded.
  pub fn from_millis(option: i32, millis: i64) -> Result<Self, ZmqError> {
    match millis {
      -1 => Ok(Timeout::Infinite),
      0 => Ok(Timeout::Immediate),
      1.. => Ok(Timeout::After(Duration::from_millis(millis as u64))),
      _ => Err(ZmqError::InvalidOptionValue(option)),
    }
  }

  pub fn as_millis(&self) -> i64 {
    match self {
      Timeout::Infinite => -1,
      Timeout::Immediate => 0,
      // Rounded up to whole milliseconds.
      Timeout::After(d) => i64::try_from((d.as_nanos() + 999_999) / 1_000_000).unwrap_or(i64::MAX),
    }
  }

  /// The wait bound, if any. `Immediate` maps to `Some(Duration::ZERO)`.
  pub fn duration(&self) -> Option<Duration> {
    match self {
      Timeout::Infinite => None,
      Timeout::Immediate => Some(Duration::ZERO),
      Timeout::After(d) => Some(*d),
    }
  }
}

impl From<Duration> for Timeout {
  /// Non-zero durations below one millisecond become one millisecond.
  fn from(d: Duration) -> Self {
    if d.is_zero() {
      Timeout::Immediate
    } else {
      Timeout::After(d.max(Duration::from_millis(1)))
    }
  }
}

impl From<Option<Duration>> for Timeout {
  fn from(d: Option<Duration>) -> Self {
    d.map_or(Timeout::Infinite, Timeout::from)
  }
}

/// Options applied to a socket when it is created.
#[derive(Debug, Clone, Default)]
pub struct SocketOptions {
  pub send_timeout: Timeout,
  pub receive_timeout: Timeout,
  /// Raw options applied in order, through the regular option path.
  pub initial: Vec<(i32, OptionValue)>,
}

impl SocketOptions {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_send_timeout(mut self, timeout: impl Into<Timeout>) -> Self {
    self.send_timeout = timeout.into();
    self
  }

  pub fn with_receive_timeout(mut self, timeout: impl Into<Timeout>) -> Self {
    self.receive_timeout = timeout.into();
    self
  }

  pub fn with_option(mut self, option: i32, value: OptionValue) -> Self {
    self.initial.push((option, value));
    self
  }
}
