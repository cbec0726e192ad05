// tests/common.rs
#![allow(dead_code)]

use rzmq_socket::{Context, Msg, Socket, ZmqError};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Once;
use std::time::Duration;

use tokio::time::timeout;

static INPROC_ENDPOINT_COUNTER: AtomicUsize = AtomicUsize::new(0);

static TRACING_INIT: Once = Once::new();

pub const SHORT_TIMEOUT: Duration = Duration::from_millis(200);
pub const LONG_TIMEOUT: Duration = Duration::from_secs(2);

fn setup_tracing() {
  TRACING_INIT.call_once(|| {
    // Overridable with RUST_LOG
    let default_filter = "rzmq_socket=debug,warn";
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let subscriber = FmtSubscriber::builder()
      .with_env_filter(env_filter)
      .with_target(true)
      .with_line_number(true)
      .with_test_writer()
      .finish();

    // Another test binary may already have installed one.
    let _ = tracing::subscriber::set_global_default(subscriber);
  });
}

pub fn test_context() -> Context {
  setup_tracing();
  Context::new().expect("Failed to create test context")
}

pub fn unique_inproc_endpoint() -> String {
  let pid = std::process::id();
  let count = INPROC_ENDPOINT_COUNTER.fetch_add(1, Ordering::Relaxed);
  format!("inproc://rzmq_test_{}_{}", pid, count)
}

/// Receives one message, mapping an elapsed wall-clock bound to `Timeout`.
pub async fn recv_timeout(socket: &Socket, duration: Duration) -> Result<Vec<Msg>, ZmqError> {
  match timeout(duration, socket.receive()?).await {
    Ok(result) => result,
    Err(_) => Err(ZmqError::Timeout),
  }
}

pub async fn send_timeout(socket: &Socket, parts: Vec<Msg>, duration: Duration) -> Result<(), ZmqError> {
  match timeout(duration, socket.send(parts)?).await {
    Ok(result) => result,
    Err(_) => Err(ZmqError::Timeout),
  }
}

/// Binds and waits for the blocking bind to finish.
pub async fn bind(socket: &Socket, endpoint: &str) -> Result<(), ZmqError> {
  socket.bind(endpoint)?.await
}

pub fn payload(msg: &[Msg]) -> Vec<&[u8]> {
  msg.iter().map(|m| m.data()).collect()
}
