//! Server address parsing.
//!
//! Accepted spellings, in order of checking:
//! - a bare port (`"8080"`), meaning `localhost:8080`
//! - `host:port`
//! - `http://host:port` or `https://host:port` (optional trailing `/`)
//!
//! The port must be in `1..=65535` everywhere.

use crate::error::TransportError;
use std::fmt;

/// A parsed server endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddress {
    /// Host name or IP literal.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Whether the address was given with an `https://` scheme.
    pub tls: bool,
}

impl ServerAddress {
    /// Builds an address for localhost.
    pub fn localhost(port: u16) -> Self {
        Self {
            host: "localhost".to_string(),
            port,
            tls: false,
        }
    }

    /// Parses any accepted address spelling.
    pub fn parse(input: &str) -> Result<Self, TransportError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(TransportError::ConfigurationError(
                "server address must not be empty".to_string(),
            ));
        }

        // Bare port: "8080" means localhost.
        if input.chars().all(|c| c.is_ascii_digit()) {
            return Ok(Self::localhost(parse_port(input)?));
        }

        let (tls, rest) = if let Some(rest) = input.strip_prefix("http://") {
            (false, rest)
        } else if let Some(rest) = input.strip_prefix("https://") {
            (true, rest)
        } else if input.contains("://") {
            let scheme = input.split("://").next().unwrap_or_default();
            return Err(TransportError::ConfigurationError(format!(
                "unsupported scheme {scheme:?} in server address {input:?}"
            )));
        } else {
            (false, input)
        };

        let rest = rest.trim_end_matches('/');
        let (host, port) = rest.rsplit_once(':').ok_or_else(|| {
            TransportError::ConfigurationError(format!(
                "server address {input:?} is missing a port"
            ))
        })?;
        if host.is_empty() {
            return Err(TransportError::ConfigurationError(format!(
                "server address {input:?} is missing a host"
            )));
        }
        if host.contains('/') {
            return Err(TransportError::ConfigurationError(format!(
                "server address {input:?} must not contain a path"
            )));
        }
        Ok(Self {
            host: host.to_string(),
            port: parse_port(port)?,
            tls,
        })
    }

    /// `host:port` form used for dialing.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.tls { "https" } else { "http" };
        write!(f, "{scheme}://{}:{}", self.host, self.port)
    }
}

fn parse_port(s: &str) -> Result<u16, TransportError> {
    match s.parse::<u32>() {
        Ok(p @ 1..=65535) => Ok(p as u16),
        Ok(p) => Err(TransportError::ConfigurationError(format!(
            "port {p} is out of range (1-65535)"
        ))),
        Err(_) => Err(TransportError::ConfigurationError(format!(
            "invalid port {s:?}"
        ))),
    }
}
