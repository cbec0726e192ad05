use crate::message::flags::MsgFlags;
use bytes::Bytes;
use std::fmt;

/// A single message part (frame). The payload is opaque and passed through unmodified.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Msg {
  // Bytes keeps clones and slices cheap (reference counted)
  data: Bytes,
  flags: MsgFlags,
}

impl Msg {
  /// Creates an empty frame.
  pub fn new() -> Self {
    Self::default()
  }

  /// Creates a frame from a `Vec<u8>`, taking ownership.
  pub fn from_vec(data: Vec<u8>) -> Self {
    Self::from_bytes(Bytes::from(data))
  }

  /// Creates a frame from `bytes::Bytes`.
  pub fn from_bytes(data: Bytes) -> Self {
    Self {
      data,
      flags: MsgFlags::empty(),
    }
  }

  /// Creates a frame from a static byte slice (zero-copy).
  pub fn from_static(data: &'static [u8]) -> Self {
    Self::from_bytes(Bytes::from_static(data))
  }

  /// Returns the frame payload.
  pub fn data(&self) -> &[u8] {
    &self.data
  }

  /// Returns the size of the payload in bytes.
  pub fn size(&self) -> usize {
    self.data.len()
  }

  pub fn flags(&self) -> MsgFlags {
    self.flags
  }

  pub fn set_flags(&mut self, flags: MsgFlags) {
    self.flags = flags;
  }

  /// Checks if the `MORE` flag is set.
  pub fn is_more(&self) -> bool {
    self.flags.contains(MsgFlags::MORE)
  }

  /// Returns a cheap clone of the underlying `Bytes`.
  pub fn data_bytes(&self) -> Bytes {
    self.data.clone()
  }

  /// Consumes the frame and returns its payload.
  pub fn into_bytes(self) -> Bytes {
    self.data
  }
}

impl From<Vec<u8>> for Msg {
  fn from(data: Vec<u8>) -> Self {
    Self::from_vec(data)
  }
}

impl From<Bytes> for Msg {
  fn from(data: Bytes) -> Self {
    Self::from_bytes(data)
  }
}

impl From<&'static [u8]> for Msg {
  fn from(data: &'static [u8]) -> Self {
    Self::from_static(data)
  }
}

impl<const N: usize> From<&'static [u8; N]> for Msg {
  fn from(data: &'static [u8; N]) -> Self {
    Self::from_static(data)
  }
}

impl From<&'static str> for Msg {
  fn from(data: &'static str) -> Self {
    Self::from_static(data.as_bytes())
  }
}

impl From<String> for Msg {
  fn from(data: String) -> Self {
    Self::from_vec(data.into_bytes())
  }
}

impl fmt::Debug for Msg {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Msg")
      .field("size", &self.size())
      .field("flags", &self.flags)
      .finish()
  }
}
