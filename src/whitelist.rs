use std::collections::HashSet;
use tracing::{debug, info};

use crate::types::ParsedUrl;

/// Registrable domains that are never scored.
pub const DEFAULT_TRUSTED_DOMAINS: &[&str] = &[
    "google.com",
    "facebook.com",
    "amazon.com",
    "microsoft.com",
    "apple.com",
    "netflix.com",
    "linkedin.com",
    "twitter.com",
    "instagram.com",
    "youtube.com",
    "github.com",
    "reddit.com",
    "wikipedia.org",
    "yahoo.com",
    "ebay.com",
    "paypal.com",
    "dropbox.com",
    "spotify.com",
    "adobe.com",
    "salesforce.com",
    "tiktok.com",
    "whatsapp.com",
    "zoom.us",
    "twitch.tv",
];

/// Exact-match gate on `{domain_label}.{suffix}`.
///
/// `paypal.com.evil.net` and `mypaypal.com` do not match `paypal.com`.
#[derive(Debug, Clone)]
pub struct Whitelist {
    domains: HashSet<String>,
}

impl Whitelist {
    pub fn new() -> Self {
        Self::with_extra(std::iter::empty::<&str>())
    }

    pub fn with_extra<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut domains: HashSet<String> = DEFAULT_TRUSTED_DOMAINS.iter().map(|d| d.to_string()).collect();
        let before = domains.len();
        domains.extend(
            extra
                .into_iter()
                .map(|d| d.as_ref().trim().to_lowercase())
                .filter(|d| !d.is_empty()),
        );
        if domains.len() > before {
            info!("Whitelist extended with {} configured domains", domains.len() - before);
        }
        Self { domains }
    }

    pub fn contains(&self, parsed: &ParsedUrl) -> bool {
        let key = parsed.whitelist_key();
        let hit = self.domains.contains(&key);
        if hit {
            debug!("Whitelist hit for {}", key);
        }
        hit
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}

impl Default for Whitelist {
    fn default() -> Self {
        Self::new()
    }
}
