use publicsuffix::{List, Psl};
use std::{
    net::{IpAddr, Ipv4Addr},
    path::Path,
};
use tracing::{debug, info};
use url::Host;

use crate::{error::AppError, types::ParsedUrl};

/// ICANN section of the Public Suffix List.
const BUNDLED_SUFFIX_LIST: &str = include_str!("../data/public_suffix_list.dat");

/// Splits URLs into scheme, host parts, path and query.
///
/// Never fails on input: anything that cannot be recognised is left empty.
/// Only ICANN suffixes count as public suffixes; a host ending in an unknown
/// label keeps that label as its domain and gets an empty suffix.
pub struct UrlParser {
    psl: List,
}

impl UrlParser {
    /// Parser backed by the bundled suffix list snapshot.
    pub fn new() -> Result<Self, AppError> {
        Self::from_list_text(BUNDLED_SUFFIX_LIST)
    }

    /// Parser backed by a full `public_suffix_list.dat` on disk.
    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let text = std::fs::read_to_string(path)?;
        let parser = Self::from_list_text(&text)?;
        info!("Loaded public suffix list from {}", path.display());
        Ok(parser)
    }

    fn from_list_text(text: &str) -> Result<Self, AppError> {
        let psl = text
            .parse::<List>()
            .map_err(|e| AppError::SuffixList(e.to_string()))?;
        Ok(Self { psl })
    }

    pub fn parse(&self, input: &str) -> ParsedUrl {
        let trimmed = input.trim();
        let (scheme, authority, rest) = split_components(trimmed);
        let (path, query_string) = split_path_query(rest);
        let full_host = normalize_host(authority);
        let (subdomain, domain_label, suffix) = self.split_host(&full_host);

        let registrable_domain = if domain_label.is_empty() || suffix.is_empty() {
            String::new()
        } else {
            format!("{}.{}", domain_label, suffix)
        };

        debug!(
            "Parsed {}: host={} subdomain={} domain={} suffix={}",
            trimmed, full_host, subdomain, domain_label, suffix
        );

        ParsedUrl {
            raw: input.to_string(),
            scheme,
            full_host,
            subdomain,
            domain_label,
            suffix,
            registrable_domain,
            path: path.to_string(),
            query_string: query_string.to_string(),
        }
    }

    fn split_host(&self, host: &str) -> (String, String, String) {
        if host.is_empty() {
            return (String::new(), String::new(), String::new());
        }
        if host.parse::<IpAddr>().is_ok() {
            return (String::new(), host.to_string(), String::new());
        }

        let known_suffix = self
            .psl
            .suffix(host.as_bytes())
            .filter(|s| s.is_known())
            .and_then(|s| std::str::from_utf8(s.as_bytes()).ok())
            .map(str::to_string);

        match known_suffix {
            Some(suffix) if suffix.len() < host.len() => {
                let head = &host[..host.len() - suffix.len() - 1];
                let (subdomain, label) = split_last_label(head);
                (subdomain.to_string(), label.to_string(), suffix)
            }
            // the host is itself a public suffix
            Some(suffix) => (String::new(), String::new(), suffix),
            None => {
                let (subdomain, label) = split_last_label(host);
                (subdomain.to_string(), label.to_string(), String::new())
            }
        }
    }
}

fn split_last_label(name: &str) -> (&str, &str) {
    name.rsplit_once('.').unwrap_or(("", name))
}

fn is_scheme(candidate: &str) -> bool {
    let mut chars = candidate.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {
            chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        _ => false,
    }
}

/// Returns (scheme, authority, path-and-after).
///
/// Without `scheme://` the whole input is path-and-after and the leading
/// segment stands in as the authority.
fn split_components(raw: &str) -> (String, &str, &str) {
    let is_delimiter = |c: char| matches!(c, '/' | '?' | '#');

    if let Some(idx) = raw.find("://") {
        let candidate = &raw[..idx];
        if is_scheme(candidate) {
            let after = &raw[idx + 3..];
            let end = after.find(is_delimiter).unwrap_or(after.len());
            return (candidate.to_ascii_lowercase(), &after[..end], &after[end..]);
        }
    }

    let end = raw.find(is_delimiter).unwrap_or(raw.len());
    (String::new(), &raw[..end], raw)
}

fn split_path_query(rest: &str) -> (&str, &str) {
    let without_fragment = rest.split_once('#').map_or(rest, |(before, _)| before);
    without_fragment.split_once('?').unwrap_or((without_fragment, ""))
}

fn normalize_host(authority: &str) -> String {
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
    let host = if host_port.starts_with('[') {
        host_port.find(']').map_or(host_port, |end| &host_port[..=end])
    } else {
        host_port.split(':').next().unwrap_or("")
    };
    let host = host.trim_end_matches('.');

    match Host::parse(host) {
        Ok(Host::Domain(domain)) => domain,
        Ok(Host::Ipv6(addr)) => addr.to_string(),
        Ok(Host::Ipv4(addr)) if host.parse::<Ipv4Addr>().is_ok() => addr.to_string(),
        // `12345`, `192.168.1` and `0x7f000001` are rewritten to dotted quads by
        // WHATWG parsing; they stay as written
        Ok(Host::Ipv4(_)) | Err(_) => host.to_lowercase(),
    }
}
