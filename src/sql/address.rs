//! Server identifier parsing.

use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use super::SqlError;

/// Default TDS port when neither a port nor an instance name is given.
pub const DEFAULT_PORT: u16 = 1433;

static ADDRESS_PATTERN: OnceLock<Regex> = OnceLock::new();

fn address_pattern() -> &'static Regex {
    ADDRESS_PATTERN.get_or_init(|| {
        Regex::new(r"^(?P<host>[A-Za-z0-9_.\-]+)(?:\\(?P<instance>[A-Za-z0-9_$\-]+))?(?:,(?P<port>\d{1,5}))?$")
            .expect("address pattern is valid")
    })
}

/// A target server: `host`, `host\instance`, `host,port` or `host\instance,port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ServerAddress {
    pub host: String,
    pub instance: Option<String>,
    pub port: Option<u16>,
}

impl FromStr for ServerAddress {
    type Err = SqlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let caps = address_pattern()
            .captures(trimmed)
            .ok_or_else(|| SqlError::InvalidAddress(s.to_string()))?;

        let port = match caps.name("port") {
            Some(m) => Some(
                m.as_str()
                    .parse::<u16>()
                    .map_err(|_| SqlError::InvalidAddress(s.to_string()))?,
            ),
            None => None,
        };

        Ok(Self {
            host: caps["host"].to_string(),
            instance: caps.name("instance").map(|m| m.as_str().to_string()),
            port,
        })
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.host)?;
        if let Some(instance) = &self.instance {
            write!(f, "\\{}", instance)?;
        }
        if let Some(port) = self.port {
            write!(f, ",{}", port)?;
        }
        Ok(())
    }
}
