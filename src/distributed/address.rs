//! Endpoint addresses

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Published `host:port` of a transport endpoint
///
/// Used as the key of the connection table, so it is hashable and ordered.
/// The host is kept as given (name or IP literal); two addresses are equal
/// only if both parts match textually.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EndpointAddress {
    pub host: String,
    pub port: u16,
}

impl EndpointAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for EndpointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for EndpointAddress {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| anyhow::anyhow!("Address '{}' is not of the form host:port", s))?;

        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            anyhow::bail!("Address '{}' has an empty host", s);
        }

        let port = port
            .parse::<u16>()
            .map_err(|e| anyhow::anyhow!("Invalid port in '{}': {}", s, e))?;

        Ok(Self::new(host, port))
    }
}
