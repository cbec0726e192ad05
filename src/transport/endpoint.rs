// src/transport/endpoint.rs

use crate::error::ZmqError;

/// A parsed and validated endpoint address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
  Tcp { host: String, port: String },
  Ipc(String),
  Inproc(String),
}

impl Endpoint {
  pub fn scheme(&self) -> &'static str {
    match self {
      Endpoint::Tcp { .. } => "tcp",
      Endpoint::Ipc(_) => "ipc",
      Endpoint::Inproc(_) => "inproc",
    }
  }
}

/// Parses an endpoint string into a structured `Endpoint`.
///
/// Only the shape is validated; whether the engine supports the scheme is its own concern.
pub fn parse_endpoint(endpoint_str: &str) -> Result<Endpoint, ZmqError> {
  let invalid_endpoint_err = || ZmqError::InvalidEndpoint(endpoint_str.to_string());

  let (scheme, address_part) = endpoint_str.split_once("://").ok_or_else(invalid_endpoint_err)?;
  if address_part.is_empty() || address_part.contains('\0') {
    return Err(invalid_endpoint_err());
  }

  match scheme {
    "tcp" => {
      // host:port, where host may be `*` or a bracketed IPv6 literal
      let (host, port) = address_part.rsplit_once(':').ok_or_else(invalid_endpoint_err)?;
      let port_ok = port == "*" || port.parse::<u16>().is_ok();
      if host.is_empty() || !port_ok {
        tracing::debug!("Failed to parse TCP address: {}", address_part);
        return Err(invalid_endpoint_err());
      }
      Ok(Endpoint::Tcp {
        host: host.to_string(),
        port: port.to_string(),
      })
    }
    "ipc" => Ok(Endpoint::Ipc(address_part.to_string())),
    "inproc" => Ok(Endpoint::Inproc(address_part.to_string())),
    _ => Err(ZmqError::UnsupportedTransport(endpoint_str.to_string())),
  }
}
