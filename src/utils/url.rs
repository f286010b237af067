//! Stream URL parsing
//!
//! Channel lists carry URLs such as
//! `http://58.50.205.3:4022/rtp/239.253.10.1:5140$湖北电信`. Only the
//! authority matters for grouping and probing, and it has to be strict: an
//! IPv4 or domain host as the `url` crate parses it, and an explicit numeric
//! port. Anything else is rejected so that malformed or partial lines never
//! produce a bogus server identity.

use url::Host;

use crate::errors::UrlParseError;
use crate::models::ServerId;

/// Schemes the probe engine can fetch
const SUPPORTED_SCHEMES: &[&str] = &["http", "https"];

/// A parsed stream URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamUrl {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    /// Everything after the authority, including the leading `/` (may be empty)
    pub path: String,
}

impl StreamUrl {
    /// Parse a stream URL
    ///
    /// The scheme is lowercased, the host is lowercased when it is a
    /// hostname, the path is kept byte-for-byte.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use iptv_sieve::utils::url::StreamUrl;
    ///
    /// let url = StreamUrl::parse("http://10.0.0.1:8080/rtp/239.3.1.1:8000").unwrap();
    /// assert_eq!(url.host, "10.0.0.1");
    /// assert_eq!(url.port, 8080);
    /// assert_eq!(url.path, "/rtp/239.3.1.1:8000");
    /// assert_eq!(url.server_id().to_string(), "10.0.0.1:8080");
    /// ```
    pub fn parse(input: &str) -> Result<Self, UrlParseError> {
        let input = input.trim();
        let (scheme, rest) = input
            .split_once("://")
            .ok_or(UrlParseError::MissingScheme)?;

        let scheme = scheme.to_ascii_lowercase();
        if !SUPPORTED_SCHEMES.contains(&scheme.as_str()) {
            return Err(UrlParseError::UnsupportedScheme(scheme));
        }

        let authority_end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
        let (authority, path) = rest.split_at(authority_end);
        let (host, port) = parse_authority(authority)?;

        Ok(Self {
            scheme,
            host,
            port,
            path: path.to_string(),
        })
    }

    /// The server this URL is served by
    pub fn server_id(&self) -> ServerId {
        ServerId::new(self.host.clone(), self.port)
    }
}

/// Parse a bare `host:port` authority into its parts
pub fn parse_authority(authority: &str) -> Result<(String, u16), UrlParseError> {
    if authority.contains('@') {
        return Err(UrlParseError::UserInfo);
    }

    let (host, port) = authority
        .rsplit_once(':')
        .ok_or(UrlParseError::MissingPort)?;

    if port.is_empty() {
        return Err(UrlParseError::MissingPort);
    }
    if !port.bytes().all(|b| b.is_ascii_digit()) {
        return Err(UrlParseError::InvalidPort(port.to_string()));
    }
    let port: u16 = port
        .parse()
        .map_err(|_| UrlParseError::InvalidPort(port.to_string()))?;
    if port == 0 {
        return Err(UrlParseError::InvalidPort("0".to_string()));
    }

    // the port is checked by hand above since `Url` drops default ports
    match Host::parse(host) {
        Ok(Host::Ipv4(ip)) => Ok((ip.to_string(), port)),
        Ok(Host::Domain(domain)) => Ok((domain, port)),
        Ok(Host::Ipv6(_)) | Err(_) => Err(UrlParseError::InvalidHost(host.to_string())),
    }
}
