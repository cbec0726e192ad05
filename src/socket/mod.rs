// src/socket/mod.rs

pub mod core;
pub mod events;
pub mod observer;
pub mod options;
pub(crate) mod poller;
pub mod state;
pub mod types;

pub use self::core::Socket;
pub use events::{PollEvents, SocketEvent};
pub use observer::Observer;
pub use options::{OptionKind, OptionType, OptionValue, SocketOptions, Timeout};
pub use state::SocketState;
pub use types::SocketType;
