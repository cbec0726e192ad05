// src/transport/inproc.rs

//! In-memory engine for `inproc://` endpoints.
//!
//! Routing is deliberately simple: PUB/XPUB/RADIO fan out and drop on a full peer,
//! REP/ROUTER/SERVER reply to whoever sent the last received message, every other
//! sending type round-robins over peers with room. SUB/XSUB filter by prefix,
//! DISH by group (the first frame of a RADIO message names the group).

#![cfg(feature = "inproc")]

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;
use radix_trie::Trie;
use tokio::sync::Notify;

use crate::socket::events::PollEvents;
use crate::socket::options::{self, OptionKind, OptionValue};
use crate::socket::types::SocketType;
use crate::transport::endpoint::{parse_endpoint, Endpoint};
use crate::transport::{NativeSocket, Transport};

const DEFAULT_HWM: usize = 1000;

static NEXT_SOCKET_ID: AtomicUsize = AtomicUsize::new(1);

#[derive(Debug, Default)]
struct NameEntry {
  binder: Option<Weak<InprocSocket>>,
  /// Connectors stay registered while connected, so a later bind attaches them.
  connectors: Vec<Weak<InprocSocket>>,
}

/// Registry of bound inproc names, shared by every socket of one transport.
#[derive(Debug, Default)]
struct Registry {
  names: Mutex<HashMap<String, NameEntry>>,
}

/// Transport creating in-memory sockets that talk over `inproc://` names.
#[derive(Debug, Clone, Default)]
pub struct InprocTransport {
  registry: Arc<Registry>,
}

impl InprocTransport {
  pub fn new() -> Self {
    Self::default()
  }
}

impl Transport for InprocTransport {
  fn create(&self, socket_type: SocketType) -> io::Result<Arc<dyn NativeSocket>> {
    let registry = self.registry.clone();
    let socket = Arc::new_cyclic(|self_ref| InprocSocket {
      id: NEXT_SOCKET_ID.fetch_add(1, Ordering::Relaxed),
      socket_type,
      registry,
      self_ref: self_ref.clone(),
      readiness: Arc::new(Notify::new()),
      queued: AtomicUsize::new(0),
      sndhwm: AtomicUsize::new(DEFAULT_HWM),
      rcvhwm: AtomicUsize::new(DEFAULT_HWM),
      state: Mutex::new(InprocState::new()),
    });
    tracing::trace!(inproc_id = socket.id, socket_type = %socket_type, "Created inproc socket");
    Ok(socket)
  }
}

#[derive(Debug, Clone)]
struct Peer {
  socket: Weak<InprocSocket>,
  id: usize,
  endpoint: String,
}

#[derive(Debug)]
struct Delivered {
  frames: Vec<Bytes>,
  from: Weak<InprocSocket>,
}

struct InprocState {
  closed: bool,
  options: HashMap<i32, OptionValue>,
  inbound: VecDeque<Delivered>,
  /// Remaining frames of the message currently being received.
  current: VecDeque<Bytes>,
  /// Frames of the message currently being sent.
  outgoing: Vec<Bytes>,
  peers: Vec<Peer>,
  next_peer: usize,
  reply_to: Option<Weak<InprocSocket>>,
  /// Prefix subscriptions with their reference counts. The empty prefix is kept apart.
  subscriptions: Trie<Vec<u8>, usize>,
  subscribe_all: usize,
  groups: HashSet<String>,
  bound: HashSet<String>,
  connected: HashSet<String>,
  last_endpoint: String,
}

impl InprocState {
  fn new() -> Self {
    Self {
      closed: false,
      options: HashMap::new(),
      inbound: VecDeque::new(),
      current: VecDeque::new(),
      outgoing: Vec::new(),
      peers: Vec::new(),
      next_peer: 0,
      reply_to: None,
      subscriptions: Trie::new(),
      subscribe_all: 0,
      groups: HashSet::new(),
      bound: HashSet::new(),
      connected: HashSet::new(),
      last_endpoint: String::new(),
    }
  }
}

/// One in-memory native socket.
pub struct InprocSocket {
  id: usize,
  socket_type: SocketType,
  registry: Arc<Registry>,
  self_ref: Weak<InprocSocket>,
  readiness: Arc<Notify>,
  /// Messages waiting in `inbound`, readable by peers without taking the lock.
  queued: AtomicUsize,
  sndhwm: AtomicUsize,
  rcvhwm: AtomicUsize,
  state: Mutex<InprocState>,
}

fn inproc_name(endpoint: &str) -> io::Result<String> {
  match parse_endpoint(endpoint) {
    Ok(Endpoint::Inproc(name)) => Ok(name),
    Ok(other) => Err(io::Error::new(
      io::ErrorKind::Unsupported,
      format!("{} transport is not available", other.scheme()),
    )),
    Err(e) => Err(io::Error::new(io::ErrorKind::InvalidInput, e.to_string())),
  }
}

fn closed_error() -> io::Error {
  io::Error::new(io::ErrorKind::NotConnected, "inproc socket is closed")
}

impl InprocSocket {
  fn is_fan_out(&self) -> bool {
    matches!(self.socket_type, SocketType::Pub | SocketType::XPub | SocketType::Radio)
  }

  fn replies_to_sender(&self) -> bool {
    matches!(self.socket_type, SocketType::Rep | SocketType::Router | SocketType::Server)
  }

  /// Whether `self` can take one more message from a sender with the given SNDHWM.
  fn has_room_for(&self, sender_hwm: usize) -> bool {
    let rcvhwm = self.rcvhwm.load(Ordering::Acquire);
    if rcvhwm == 0 || sender_hwm == 0 {
      return true;
    }
    self.queued.load(Ordering::Acquire) < rcvhwm + sender_hwm
  }

  fn writable_locked(&self, st: &InprocState) -> bool {
    if !self.socket_type.can_send() {
      return false;
    }
    if !st.outgoing.is_empty() || self.is_fan_out() {
      return true;
    }
    let hwm = self.sndhwm.load(Ordering::Acquire);
    if self.replies_to_sender() {
      return st
        .reply_to
        .as_ref()
        .and_then(Weak::upgrade)
        .map_or(false, |peer| peer.has_room_for(hwm));
    }
    st.peers
      .iter()
      .filter_map(|p| p.socket.upgrade())
      .any(|peer| peer.has_room_for(hwm))
  }

  fn select_targets(&self, st: &mut InprocState) -> Vec<Arc<InprocSocket>> {
    if self.is_fan_out() {
      return st.peers.iter().filter_map(|p| p.socket.upgrade()).collect();
    }
    if self.replies_to_sender() {
      return st.reply_to.as_ref().and_then(Weak::upgrade).into_iter().collect();
    }
    let hwm = self.sndhwm.load(Ordering::Acquire);
    let count = st.peers.len();
    for offset in 0..count {
      let idx = (st.next_peer + offset) % count;
      if let Some(peer) = st.peers[idx].socket.upgrade() {
        if peer.has_room_for(hwm) {
          st.next_peer = (idx + 1) % count;
          return vec![peer];
        }
      }
    }
    // Room vanished after the first frame was accepted; HWM is soft, take any live peer.
    st.peers.iter().find_map(|p| p.socket.upgrade()).into_iter().collect()
  }

  fn deliver(&self, frames: Vec<Bytes>, from: Weak<InprocSocket>, drop_if_full: bool, sender_hwm: usize) {
    {
      let mut st = self.state.lock();
      if st.closed || !self.socket_type.can_receive() {
        return;
      }
      let first = frames.first().map(|f| &f[..]).unwrap_or_default();
      let accepted = match self.socket_type {
        SocketType::Sub | SocketType::XSub => {
          st.subscribe_all > 0 || st.subscriptions.get_ancestor_value(first).is_some()
        }
        SocketType::Dish => std::str::from_utf8(first).map_or(false, |g| st.groups.contains(g)),
        _ => true,
      };
      if !accepted {
        return;
      }
      if drop_if_full && !self.has_room_for(sender_hwm) {
        tracing::trace!(inproc_id = self.id, "Inproc peer full, dropping fan-out message");
        return;
      }
      st.inbound.push_back(Delivered { frames, from });
      self.queued.fetch_add(1, Ordering::AcqRel);
    }
    self.readiness.notify_one();
  }

  fn live_peers(&self) -> Vec<Arc<InprocSocket>> {
    let st = self.state.lock();
    st.peers.iter().filter_map(|p| p.socket.upgrade()).collect()
  }

  fn notify_peers(&self) {
    for peer in self.live_peers() {
      peer.readiness.notify_one();
    }
  }

  fn link(a: &Arc<InprocSocket>, b: &Arc<InprocSocket>, endpoint: &str) {
    for (this, other) in [(a, b), (b, a)] {
      let mut st = this.state.lock();
      if st.closed {
        continue;
      }
      st.peers.push(Peer {
        socket: Arc::downgrade(other),
        id: other.id,
        endpoint: endpoint.to_string(),
      });
    }
    tracing::trace!(a = a.id, b = b.id, endpoint, "Linked inproc peers");
    a.readiness.notify_one();
    b.readiness.notify_one();
  }

  /// Drops every link of `self` established through `endpoint`, on both sides.
  fn unlink_endpoint(&self, endpoint: &str) {
    let removed: Vec<Peer> = {
      let mut st = self.state.lock();
      let (removed, kept): (Vec<Peer>, Vec<Peer>) = st.peers.drain(..).partition(|p| p.endpoint == endpoint);
      st.peers = kept;
      st.next_peer = 0;
      removed
    };
    for peer in removed.iter().filter_map(|p| p.socket.upgrade()) {
      {
        let mut st = peer.state.lock();
        st.peers.retain(|p| !(p.id == self.id && p.endpoint == endpoint));
        st.next_peer = 0;
      }
      peer.readiness.notify_one();
    }
    self.readiness.notify_one();
  }

  fn default_value(option: i32) -> OptionValue {
    match options::descriptor(option).map(|d| d.kind) {
      Some(OptionKind::Bool) => OptionValue::Bool(false),
      Some(OptionKind::Str) => OptionValue::Str(String::new()),
      Some(OptionKind::Bytes) => OptionValue::Bytes(Bytes::new()),
      _ => match option {
        options::SNDHWM | options::RCVHWM => OptionValue::Int(DEFAULT_HWM as i64),
        options::LINGER | options::SNDTIMEO | options::RCVTIMEO | options::SNDBUF | options::RCVBUF => {
          OptionValue::Int(-1)
        }
        _ => OptionValue::Int(0),
      },
    }
  }

  fn events_locked(&self, st: &InprocState) -> PollEvents {
    let mut events = PollEvents::empty();
    if self.socket_type.can_receive() && (!st.current.is_empty() || !st.inbound.is_empty()) {
      events |= PollEvents::POLLIN;
    }
    if self.writable_locked(st) {
      events |= PollEvents::POLLOUT;
    }
    events
  }
}

impl NativeSocket for InprocSocket {
  fn bind(&self, endpoint: &str) -> io::Result<()> {
    let name = inproc_name(endpoint)?;
    let me = self.self_ref.upgrade().ok_or_else(closed_error)?;
    let connectors: Vec<Arc<InprocSocket>> = {
      let mut names = self.registry.names.lock();
      let entry = names.entry(name.clone()).or_default();
      if entry.binder.as_ref().and_then(Weak::upgrade).is_some() {
        return Err(io::Error::new(io::ErrorKind::AddrInUse, format!("{} is already bound", endpoint)));
      }
      entry.binder = Some(Arc::downgrade(&me));
      entry.connectors.retain(|c| c.strong_count() > 0);
      entry.connectors.iter().filter_map(Weak::upgrade).collect()
    };
    {
      let mut st = self.state.lock();
      st.bound.insert(endpoint.to_string());
      st.last_endpoint = endpoint.to_string();
    }
    for connector in connectors {
      InprocSocket::link(&me, &connector, endpoint);
    }
    Ok(())
  }

  fn unbind(&self, endpoint: &str) -> io::Result<()> {
    let name = inproc_name(endpoint)?;
    if !self.state.lock().bound.remove(endpoint) {
      return Err(io::Error::new(io::ErrorKind::NotFound, format!("{} is not bound", endpoint)));
    }
    if let Some(entry) = self.registry.names.lock().get_mut(&name) {
      entry.binder = None;
    }
    self.unlink_endpoint(endpoint);
    Ok(())
  }

  fn connect(&self, endpoint: &str) -> io::Result<()> {
    let name = inproc_name(endpoint)?;
    let me = self.self_ref.upgrade().ok_or_else(closed_error)?;
    if !self.state.lock().connected.insert(endpoint.to_string()) {
      return Ok(());
    }
    let binder = {
      let mut names = self.registry.names.lock();
      let entry = names.entry(name).or_default();
      entry.connectors.push(Arc::downgrade(&me));
      entry.binder.as_ref().and_then(Weak::upgrade)
    };
    self.state.lock().last_endpoint = endpoint.to_string();
    if let Some(binder) = binder {
      InprocSocket::link(&binder, &me, endpoint);
    }
    Ok(())
  }

  fn disconnect(&self, endpoint: &str) -> io::Result<()> {
    let name = inproc_name(endpoint)?;
    if !self.state.lock().connected.remove(endpoint) {
      return Err(io::Error::new(io::ErrorKind::NotFound, format!("{} is not connected", endpoint)));
    }
    if let Some(entry) = self.registry.names.lock().get_mut(&name) {
      entry.connectors.retain(|c| c.upgrade().map_or(false, |c| c.id != self.id));
    }
    self.unlink_endpoint(endpoint);
    Ok(())
  }

  fn join(&self, group: &str) -> io::Result<()> {
    if self.socket_type != SocketType::Dish {
      return Err(io::Error::from(io::ErrorKind::Unsupported));
    }
    self.state.lock().groups.insert(group.to_string());
    Ok(())
  }

  fn leave(&self, group: &str) -> io::Result<()> {
    if self.socket_type != SocketType::Dish {
      return Err(io::Error::from(io::ErrorKind::Unsupported));
    }
    if self.state.lock().groups.remove(group) {
      Ok(())
    } else {
      Err(io::Error::new(io::ErrorKind::InvalidInput, format!("not a member of group {}", group)))
    }
  }

  fn send_frame(&self, frame: Bytes, more: bool) -> io::Result<()> {
    if !self.socket_type.can_send() {
      return Err(io::Error::new(io::ErrorKind::Unsupported, "socket type cannot send"));
    }
    let (frames, targets) = {
      let mut st = self.state.lock();
      if st.closed {
        return Err(closed_error());
      }
      if st.outgoing.is_empty() && !self.writable_locked(&st) {
        return Err(io::Error::from(io::ErrorKind::WouldBlock));
      }
      st.outgoing.push(frame);
      if more {
        return Ok(());
      }
      let frames = std::mem::take(&mut st.outgoing);
      let targets = self.select_targets(&mut st);
      (frames, targets)
    };
    let drop_if_full = self.is_fan_out();
    let hwm = self.sndhwm.load(Ordering::Acquire);
    for target in targets {
      target.deliver(frames.clone(), self.self_ref.clone(), drop_if_full, hwm);
    }
    Ok(())
  }

  fn recv_frame(&self) -> io::Result<(Bytes, bool)> {
    let (frame, more, popped) = {
      let mut st = self.state.lock();
      if st.closed {
        return Err(closed_error());
      }
      let mut popped = false;
      if st.current.is_empty() {
        let message = st.inbound.pop_front().ok_or_else(|| io::Error::from(io::ErrorKind::WouldBlock))?;
        self.queued.fetch_sub(1, Ordering::AcqRel);
        st.reply_to = Some(message.from);
        st.current = message.frames.into();
        popped = true;
      }
      let frame = st.current.pop_front().unwrap_or_default();
      (frame, !st.current.is_empty(), popped)
    };
    if popped {
      // A slot freed up; senders blocked on our HWM may proceed.
      self.notify_peers();
    }
    Ok((frame, more))
  }

  fn get_option(&self, option: i32) -> io::Result<OptionValue> {
    let st = self.state.lock();
    let value = match option {
      options::EVENTS => OptionValue::Int(self.events_locked(&st).bits() as i64),
      options::TYPE => OptionValue::Int(self.socket_type as i64),
      options::RCVMORE => OptionValue::Bool(!st.current.is_empty()),
      options::LAST_ENDPOINT => OptionValue::Str(st.last_endpoint.clone()),
      options::THREAD_SAFE => OptionValue::Bool(self.socket_type.is_thread_safe()),
      _ => st
        .options
        .get(&option)
        .cloned()
        .unwrap_or_else(|| InprocSocket::default_value(option)),
    };
    Ok(value)
  }

  fn set_option(&self, option: i32, value: &OptionValue) -> io::Result<()> {
    let invalid = || io::Error::from(io::ErrorKind::InvalidInput);
    match (option, value) {
      (options::SUBSCRIBE, OptionValue::Bytes(topic)) if topic.is_empty() => {
        self.state.lock().subscribe_all += 1;
      }
      (options::UNSUBSCRIBE, OptionValue::Bytes(topic)) if topic.is_empty() => {
        let mut st = self.state.lock();
        st.subscribe_all = st.subscribe_all.checked_sub(1).ok_or_else(invalid)?;
      }
      (options::SUBSCRIBE, OptionValue::Bytes(topic)) => {
        let mut st = self.state.lock();
        let count = st.subscriptions.get(&topic[..]).copied().unwrap_or(0);
        st.subscriptions.insert(topic.to_vec(), count + 1);
      }
      (options::UNSUBSCRIBE, OptionValue::Bytes(topic)) => {
        let mut st = self.state.lock();
        match st.subscriptions.get(&topic[..]).copied() {
          Some(1) => {
            st.subscriptions.remove(&topic[..]);
          }
          Some(n) => {
            st.subscriptions.insert(topic.to_vec(), n - 1);
          }
          None => return Err(invalid()),
        }
      }
      (options::SNDHWM | options::RCVHWM, OptionValue::Int(hwm)) => {
        let hwm = usize::try_from(*hwm).map_err(|_| invalid())?;
        let target = if option == options::SNDHWM { &self.sndhwm } else { &self.rcvhwm };
        target.store(hwm, Ordering::Release);
        self.state.lock().options.insert(option, value.clone());
        self.notify_peers();
        self.readiness.notify_one();
      }
      _ => {
        self.state.lock().options.insert(option, value.clone());
      }
    }
    Ok(())
  }

  fn events(&self) -> io::Result<PollEvents> {
    let st = self.state.lock();
    if st.closed {
      return Err(closed_error());
    }
    Ok(self.events_locked(&st))
  }

  fn readiness(&self) -> Arc<Notify> {
    self.readiness.clone()
  }

  fn close(&self) -> io::Result<()> {
    let (bound, connected) = {
      let mut st = self.state.lock();
      if st.closed {
        return Ok(());
      }
      st.closed = true;
      st.inbound.clear();
      st.current.clear();
      st.outgoing.clear();
      self.queued.store(0, Ordering::Release);
      (std::mem::take(&mut st.bound), std::mem::take(&mut st.connected))
    };
    {
      let mut names = self.registry.names.lock();
      for endpoint in bound.iter().chain(connected.iter()) {
        if let Ok(name) = inproc_name(endpoint) {
          if let Some(entry) = names.get_mut(&name) {
            if entry.binder.as_ref().map_or(false, |b| b.ptr_eq(&self.self_ref)) {
              entry.binder = None;
            }
            entry.connectors.retain(|c| !c.ptr_eq(&self.self_ref) && c.strong_count() > 0);
          }
        }
      }
    }
    for endpoint in bound.iter().chain(connected.iter()) {
      self.unlink_endpoint(endpoint);
    }
    tracing::trace!(inproc_id = self.id, "Closed inproc socket");
    Ok(())
  }
}
