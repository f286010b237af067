use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::errors::UrlParseError;
use crate::utils::url::parse_authority;

/// Identity of one physical streaming server, canonical form `host:port`
///
/// Every dedup, blacklist and probe decision is keyed on this value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerId {
    host: String,
    port: u16,
}

impl ServerId {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for ServerId {
    type Err = UrlParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = parse_authority(s.trim())?;
        Ok(Self { host, port })
    }
}

impl Serialize for ServerId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ServerId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_parse_agree() {
        let id: ServerId = "61.52.10.7:8888".parse().unwrap();
        assert_eq!(id.host(), "61.52.10.7");
        assert_eq!(id.port(), 8888);
        assert_eq!(id.to_string(), "61.52.10.7:8888");
    }

    #[test]
    fn test_parse_rejects_missing_port() {
        assert!("61.52.10.7".parse::<ServerId>().is_err());
        assert!("".parse::<ServerId>().is_err());
    }

    #[test]
    fn test_serializes_as_string() {
        let id = ServerId::new("10.0.0.1", 80);
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"10.0.0.1:80\"");
        let back: ServerId = serde_json::from_str("\"10.0.0.1:80\"").unwrap();
        assert_eq!(back, id);
    }
}
