//! Registration-date lookups behind the `domain_age` feature.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use moka::future::Cache;
use regex::Regex;
use std::{
    sync::{Arc, OnceLock},
    time::Duration,
};
use thiserror::Error;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::timeout,
};
use tracing::debug;

use crate::config::WhoisConfig;

const IANA_WHOIS: &str = "whois.iana.org";
const WHOIS_PORT: u16 = 43;
const MAX_RESPONSE_BYTES: u64 = 256 * 1024;

#[derive(Debug, Clone, Error)]
pub enum LookupError {
    #[error("domain age lookup disabled")]
    Disabled,
    #[error("no registrable domain to look up")]
    NoRegistrableDomain,
    #[error("whois lookup for {0} timed out")]
    Timeout(String),
    #[error("whois connection to {server} failed: {reason}")]
    Connection { server: String, reason: String },
    #[error("no creation date in whois response for {0}")]
    NoCreationDate(String),
}

#[async_trait]
pub trait DomainAgeLookup: Send + Sync {
    /// Creation date of a registrable domain such as `example.com`.
    async fn creation_date(&self, domain: &str) -> Result<DateTime<Utc>, LookupError>;
}

/// Always fails, leaving `domain_age` at its sentinel.
pub struct DisabledLookup;

#[async_trait]
impl DomainAgeLookup for DisabledLookup {
    async fn creation_date(&self, _domain: &str) -> Result<DateTime<Utc>, LookupError> {
        Err(LookupError::Disabled)
    }
}

/// Sends one WHOIS query to a server and returns the raw reply.
#[async_trait]
pub trait WhoisTransport: Send + Sync {
    async fn query(&self, server: &str, domain: &str) -> Result<String, LookupError>;
}

/// Plain TCP, port 43 unless told otherwise.
pub struct TcpTransport {
    port: u16,
}

impl TcpTransport {
    pub fn with_port(port: u16) -> Self {
        Self { port }
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::with_port(WHOIS_PORT)
    }
}

#[async_trait]
impl WhoisTransport for TcpTransport {
    async fn query(&self, server: &str, domain: &str) -> Result<String, LookupError> {
        let connection_error = |e: std::io::Error| LookupError::Connection {
            server: server.to_string(),
            reason: e.to_string(),
        };

        let mut stream = TcpStream::connect((server, self.port))
            .await
            .map_err(connection_error)?;
        stream
            .write_all(format!("{}\r\n", domain).as_bytes())
            .await
            .map_err(connection_error)?;

        let mut response = Vec::new();
        stream
            .take(MAX_RESPONSE_BYTES)
            .read_to_end(&mut response)
            .await
            .map_err(connection_error)?;

        Ok(String::from_utf8_lossy(&response).into_owned())
    }
}

/// WHOIS client, bounded by a single timeout for the whole lookup.
pub struct WhoisClient<T = TcpTransport> {
    transport: T,
    timeout: Duration,
}

impl WhoisClient<TcpTransport> {
    pub fn new(timeout: Duration) -> Self {
        Self::with_transport(TcpTransport::default(), timeout)
    }
}

impl<T: WhoisTransport> WhoisClient<T> {
    pub fn with_transport(transport: T, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    async fn lookup(&self, domain: &str) -> Result<DateTime<Utc>, LookupError> {
        let tld = domain.rsplit('.').next().unwrap_or(domain);
        let server = whois_server_for(tld);
        let response = self.transport.query(server, domain).await?;

        // IANA answers with the TLD's own record; its dates describe the
        // registry, so only the referral is usable
        if server != IANA_WHOIS {
            if let Some(created) = parse_creation_date(&response) {
                return Ok(created);
            }
        }

        let referral = parse_referral(&response)
            .filter(|r| r != server && r != IANA_WHOIS)
            .ok_or_else(|| LookupError::NoCreationDate(domain.to_string()))?;
        debug!("Following whois referral for {} to {}", domain, referral);

        let response = self.transport.query(&referral, domain).await?;
        parse_creation_date(&response).ok_or_else(|| LookupError::NoCreationDate(domain.to_string()))
    }
}

#[async_trait]
impl<T: WhoisTransport> DomainAgeLookup for WhoisClient<T> {
    async fn creation_date(&self, domain: &str) -> Result<DateTime<Utc>, LookupError> {
        match timeout(self.timeout, self.lookup(domain)).await {
            Ok(result) => result,
            Err(_) => Err(LookupError::Timeout(domain.to_string())),
        }
    }
}

fn whois_server_for(tld: &str) -> &'static str {
    match tld {
        "com" | "net" => "whois.verisign-grs.com",
        "org" => "whois.pir.org",
        "info" => "whois.afilias.net",
        "biz" => "whois.nic.biz",
        "us" => "whois.nic.us",
        "co" => "whois.nic.co",
        "io" => "whois.nic.io",
        "me" => "whois.nic.me",
        "uk" => "whois.nic.uk",
        "ca" => "whois.cira.ca",
        "de" => "whois.denic.de",
        "fr" => "whois.nic.fr",
        "ru" => "whois.tcinet.ru",
        "jp" => "whois.jprs.jp",
        "au" => "whois.auda.org.au",
        "br" => "whois.registro.br",
        "app" | "dev" | "page" => "whois.nic.google",
        "xyz" => "whois.nic.xyz",
        _ => IANA_WHOIS,
    }
}

fn creation_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?im)^\s*(?:creation date|created on|created|registered on|registration time|registration date|domain registration date|domain record activated)\s*:\s*(.+?)\s*$",
        )
        .expect("creation date pattern is valid")
    })
}

fn referral_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?im)^\s*(?:refer|whois):\s*(\S+)\s*$").expect("referral pattern is valid"))
}

/// Earliest creation date listed in a WHOIS response.
pub fn parse_creation_date(response: &str) -> Option<DateTime<Utc>> {
    creation_line_regex()
        .captures_iter(response)
        .filter_map(|caps| caps.get(1))
        .filter_map(|value| parse_whois_date(value.as_str()))
        .min()
}

fn parse_referral(response: &str) -> Option<String> {
    referral_regex()
        .captures(response)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_ascii_lowercase())
}

fn parse_whois_date(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y.%m.%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    // date-only forms, possibly followed by a time or a zone we don't need
    let head = value.split_whitespace().next().unwrap_or(value);
    let head = head.split('T').next().unwrap_or(head);
    for format in ["%Y-%m-%d", "%d-%b-%Y", "%d.%m.%Y", "%Y.%m.%d", "%Y/%m/%d", "%d/%m/%Y", "%Y%m%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(head, format) {
            return date.and_hms_opt(0, 0, 0).map(|naive| Utc.from_utc_datetime(&naive));
        }
    }

    None
}

/// Caches successful lookups per domain; failures are neither cached nor retried.
pub struct CachedLookup<L> {
    inner: L,
    cache: Cache<String, DateTime<Utc>>,
}

impl<L: DomainAgeLookup> CachedLookup<L> {
    pub fn new(inner: L, ttl: Duration, max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .time_to_live(ttl)
            .max_capacity(max_capacity)
            .build();
        Self { inner, cache }
    }
}

#[async_trait]
impl<L: DomainAgeLookup> DomainAgeLookup for CachedLookup<L> {
    async fn creation_date(&self, domain: &str) -> Result<DateTime<Utc>, LookupError> {
        if let Some(created) = self.cache.get(domain).await {
            debug!("Domain age cache hit for {}", domain);
            return Ok(created);
        }
        let created = self.inner.creation_date(domain).await?;
        self.cache.insert(domain.to_string(), created).await;
        Ok(created)
    }
}

/// Builds the lookup described by the `whois` config section.
pub fn from_config(config: &WhoisConfig) -> Arc<dyn DomainAgeLookup> {
    if !config.enabled {
        return Arc::new(DisabledLookup);
    }
    let client = WhoisClient::new(Duration::from_millis(config.timeout_ms));
    Arc::new(CachedLookup::new(
        client,
        Duration::from_secs(config.cache_ttl_seconds),
        config.cache_capacity,
    ))
}
