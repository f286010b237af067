//! Region/operator policy filter
//!
//! Before a server is sampled, its host is looked up in an ip-api.com style
//! geolocation service. Servers whose (region, operator) pair matches a deny
//! rule are excluded without any stream traffic. A failed lookup means the
//! location is unknown, and unknown servers are allowed through.

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::config::{PolicyConfig, PolicyRule};
use crate::errors::{AppError, AppResult, LookupFailure};
use crate::models::ServerId;

/// Location and network operator of a host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeoInfo {
    pub region: String,
    pub operator: String,
}

#[async_trait]
pub trait GeoLookup: Send + Sync {
    async fn lookup(&self, host: &str) -> Result<GeoInfo, LookupFailure>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpApiResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    region_name: Option<String>,
    #[serde(default)]
    isp: Option<String>,
}

/// Lookup against `GET {base}json/{ip}?fields=status,message,regionName,isp`
///
/// Requests are spaced by at least `min_interval` across all callers.
pub struct IpApiLookup {
    client: reqwest::Client,
    base_url: Url,
    limiter: Option<DefaultDirectRateLimiter>,
}

impl IpApiLookup {
    pub fn new(base_url: &str, timeout: Duration, min_interval: Duration) -> AppResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| AppError::configuration(format!("policy.lookup_url: {e}")))?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let limiter = Quota::with_period(min_interval).map(RateLimiter::direct);

        Ok(Self {
            client,
            base_url,
            limiter,
        })
    }

    pub fn from_config(config: &PolicyConfig) -> AppResult<Self> {
        Self::new(
            &config.lookup_url,
            config.lookup_timeout,
            config.min_lookup_interval,
        )
    }

    fn query_url(&self, ip: Ipv4Addr) -> Result<Url, LookupFailure> {
        let mut url = self
            .base_url
            .join(&format!("json/{ip}"))
            .map_err(|e| LookupFailure::Network(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("fields", "status,message,regionName,isp");
        Ok(url)
    }
}

/// Resolve a host to its first IPv4 address
async fn resolve_ipv4(host: &str) -> Result<Ipv4Addr, LookupFailure> {
    if let Ok(ip) = host.parse::<Ipv4Addr>() {
        return Ok(ip);
    }

    let addrs = tokio::net::lookup_host((host, 0))
        .await
        .map_err(|_| LookupFailure::Resolve(host.to_string()))?;

    addrs
        .filter_map(|addr| match addr.ip() {
            IpAddr::V4(ip) => Some(ip),
            IpAddr::V6(_) => None,
        })
        .next()
        .ok_or_else(|| LookupFailure::Resolve(host.to_string()))
}

#[async_trait]
impl GeoLookup for IpApiLookup {
    async fn lookup(&self, host: &str) -> Result<GeoInfo, LookupFailure> {
        let ip = resolve_ipv4(host).await?;
        let url = self.query_url(ip)?;

        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| LookupFailure::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LookupFailure::Status(status.as_u16()));
        }

        let body: IpApiResponse = response
            .json()
            .await
            .map_err(|e| LookupFailure::Decode(e.to_string()))?;

        if body.status != "success" {
            return Err(LookupFailure::Rejected(
                body.message.unwrap_or(body.status),
            ));
        }

        Ok(GeoInfo {
            region: body.region_name.unwrap_or_default(),
            operator: body.isp.unwrap_or_default(),
        })
    }
}

/// Verdict of the policy filter for one server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    Allowed,
    /// Lookup failed; the server is probed as usual
    Unknown(String),
    /// Matched a deny rule; carries the region and operator labels
    Blocked(String),
}

/// First deny rule matching `info`, if any
///
/// Regions compare case-insensitively; the operator only has to appear in
/// the ISP label, so `Telecom` matches `China Telecom`.
pub fn matching_rule<'a>(rules: &'a [PolicyRule], info: &GeoInfo) -> Option<&'a PolicyRule> {
    let operator = info.operator.to_lowercase();
    rules.iter().find(|rule| {
        rule.region.eq_ignore_ascii_case(info.region.trim())
            && !rule.operator.is_empty()
            && operator.contains(&rule.operator.to_lowercase())
    })
}

pub struct PolicyFilter {
    lookup: Arc<dyn GeoLookup>,
    rules: Vec<PolicyRule>,
    cache: Mutex<HashMap<String, GeoInfo>>,
}

impl PolicyFilter {
    pub fn new(lookup: Arc<dyn GeoLookup>, rules: Vec<PolicyRule>) -> Self {
        Self {
            lookup,
            rules,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn cached(&self, host: &str) -> Option<GeoInfo> {
        self.cache.lock().ok().and_then(|c| c.get(host).cloned())
    }

    /// Decide whether `server` may be probed
    pub async fn classify(&self, server: &ServerId) -> PolicyDecision {
        if self.rules.is_empty() {
            return PolicyDecision::Allowed;
        }

        let info = match self.cached(server.host()) {
            Some(info) => info,
            None => match self.lookup.lookup(server.host()).await {
                Ok(info) => {
                    if let Ok(mut cache) = self.cache.lock() {
                        cache.insert(server.host().to_string(), info.clone());
                    }
                    info
                }
                Err(e) => {
                    warn!("Location lookup for {} failed, treating as unknown: {}", server, e);
                    return PolicyDecision::Unknown(e.to_string());
                }
            },
        };

        match matching_rule(&self.rules, &info) {
            Some(rule) => {
                debug!(
                    "{} is in {} ({}), matches deny rule {}/{}",
                    server, info.region, info.operator, rule.region, rule.operator
                );
                PolicyDecision::Blocked(format!("{} {}", info.region, info.operator))
            }
            None => PolicyDecision::Allowed,
        }
    }
}
