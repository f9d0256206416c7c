//! Reference data: the upstream's published network list
//!
//! Every source returns one CIDR block per line. The whole fetch is rejected
//! if any source fails, any line does not parse, or the total looks
//! implausibly small; nothing on disk is touched in that case.

use std::fmt;
use std::io::Read;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::settings::SyncSettings;
use crate::error::{StackError, StackResult};

/// An IPv4 or IPv6 network in CIDR notation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cidr {
    addr: IpAddr,
    prefix: u8,
}

impl Cidr {
    pub fn is_ipv4(&self) -> bool {
        self.addr.is_ipv4()
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }
}

impl FromStr for Cidr {
    type Err = StackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (addr, prefix) = match s.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (s, None),
        };
        let addr: IpAddr = addr
            .parse()
            .map_err(|_| StackError::Validation(format!("'{}' is not an IP network", s)))?;
        let max = if addr.is_ipv4() { 32 } else { 128 };
        let prefix = match prefix {
            Some(p) => p
                .parse::<u8>()
                .ok()
                .filter(|p| *p <= max)
                .ok_or_else(|| {
                    StackError::Validation(format!("'{}' has an invalid prefix length", s))
                })?,
            None => max,
        };
        Ok(Self { addr, prefix })
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

/// Networks fetched from every configured source
#[derive(Debug, Clone)]
pub struct ReferenceData {
    pub networks: Vec<Cidr>,
    pub fetched_at: DateTime<Utc>,
    pub sources: Vec<String>,
}

impl ReferenceData {
    pub fn v4(&self) -> impl Iterator<Item = &Cidr> {
        self.networks.iter().filter(|n| n.is_ipv4())
    }

    pub fn v6(&self) -> impl Iterator<Item = &Cidr> {
        self.networks.iter().filter(|n| !n.is_ipv4())
    }
}

/// Retrieves the raw body of a reference source
pub trait Fetcher {
    fn fetch(&self, url: &str) -> StackResult<String>;
}

/// Blocking HTTP fetcher with a hard timeout and body size cap
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
    max_bytes: u64,
}

impl HttpFetcher {
    pub fn new(settings: &SyncSettings) -> StackResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .user_agent(concat!("stackward/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| StackError::Fetch(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            max_bytes: settings.max_bytes,
        })
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> StackResult<String> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| StackError::Fetch(format!("GET {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StackError::Fetch(format!("GET {} returned {}", url, status)));
        }
        if let Some(length) = response.content_length() {
            if length > self.max_bytes {
                return Err(StackError::Fetch(format!(
                    "GET {} announced {} bytes (limit {})",
                    url, length, self.max_bytes
                )));
            }
        }

        // Chunked responses carry no length; the cap must bound the read itself.
        read_limited(response, self.max_bytes, url)
    }
}

/// Read at most `max_bytes` of UTF-8 text, failing once the body is longer
fn read_limited(reader: impl Read, max_bytes: u64, url: &str) -> StackResult<String> {
    let mut body = Vec::new();
    reader
        .take(max_bytes.saturating_add(1))
        .read_to_end(&mut body)
        .map_err(|e| StackError::Fetch(format!("Reading body of {} failed: {}", url, e)))?;
    if body.len() as u64 > max_bytes {
        return Err(StackError::Fetch(format!(
            "Body of {} exceeds {} bytes",
            url, max_bytes
        )));
    }
    String::from_utf8(body)
        .map_err(|_| StackError::Fetch(format!("Body of {} is not valid UTF-8", url)))
}

/// Parse one body into networks, skipping blank lines and `#` comments
pub fn parse_networks(body: &str, source: &str) -> StackResult<Vec<Cidr>> {
    body.lines()
        .enumerate()
        .map(|(i, line)| (i, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(i, line)| {
            line.parse::<Cidr>().map_err(|_| {
                StackError::Fetch(format!(
                    "{} line {}: '{}' is not a CIDR block",
                    source,
                    i + 1,
                    line
                ))
            })
        })
        .collect()
}

/// Fetch and validate every configured source exactly once
pub fn fetch_reference(fetcher: &dyn Fetcher, settings: &SyncSettings) -> StackResult<ReferenceData> {
    if settings.sources.is_empty() {
        return Err(StackError::Config("sync.sources must not be empty".into()));
    }

    let mut networks: Vec<Cidr> = Vec::new();
    for url in &settings.sources {
        let body = fetcher.fetch(url)?;
        if body.len() as u64 > settings.max_bytes {
            return Err(StackError::Fetch(format!(
                "{} returned {} bytes (limit {})",
                url,
                body.len(),
                settings.max_bytes
            )));
        }
        let parsed = parse_networks(&body, url)?;
        tracing::debug!(source = %url, networks = parsed.len(), "fetched reference source");
        for network in parsed {
            if !networks.contains(&network) {
                networks.push(network);
            }
        }
    }

    if networks.len() < settings.min_entries {
        return Err(StackError::Fetch(format!(
            "only {} networks fetched (minimum {}); refusing to replace the current lists",
            networks.len(),
            settings.min_entries
        )));
    }

    tracing::info!(networks = networks.len(), "reference data fetched");
    Ok(ReferenceData {
        networks,
        fetched_at: Utc::now(),
        sources: settings.sources.clone(),
    })
}
