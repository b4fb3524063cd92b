//! Network Fetch for stage3 artifacts.
//!
//! The autobuild directories on Gentoo mirrors are plain HTML listings. The
//! fetcher returns the listing body; `matching_artifacts` pulls out every
//! filename with the wanted prefix and suffix, and `latest_artifact` picks the
//! lexicographically last one, which relies on the embedded
//! `YYYYMMDDTHHMMSSZ` timestamp sorting correctly.

use crate::error::{InstallerError, Result};
use regex::Regex;
use std::collections::BTreeSet;
use std::time::Duration;

/// Retrieves directory listings from a mirror.
pub trait ArtifactFetcher {
    /// Body of the listing page at `listing_url`.
    fn fetch_listing(&mut self, listing_url: &str) -> Result<String>;
}

/// Pattern for `<prefix><timestamp>.<suffix>` names, e.g.
/// `stage3-amd64-openrc-20240801T170406Z.tar.xz`.
pub fn artifact_pattern(prefix: &str, suffix: &str) -> Result<Regex> {
    let pattern = format!(r"{}[\w\-]+{}", regex::escape(prefix), regex::escape(suffix));
    Regex::new(&pattern).map_err(|e| InstallerError::fetch(format!("bad artifact pattern: {}", e)))
}

/// Every distinct match of `pattern` in `listing`, sorted.
pub fn artifact_names(listing: &str, pattern: &Regex) -> Vec<String> {
    pattern
        .find_iter(listing)
        .map(|m| m.as_str().to_string())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Distinct `<prefix>…<suffix>` names found in a listing body, sorted.
pub fn matching_artifacts(listing: &str, prefix: &str, suffix: &str) -> Result<Vec<String>> {
    let pattern = artifact_pattern(prefix, suffix)?;
    Ok(artifact_names(listing, &pattern))
}

/// The lexicographically last name.
pub fn latest_artifact(names: &[String]) -> Option<&str> {
    names.iter().max().map(String::as_str)
}

/// Fetcher over HTTPS with a blocking client.
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("gentinstall/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| InstallerError::fetch(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

impl ArtifactFetcher for HttpFetcher {
    fn fetch_listing(&mut self, listing_url: &str) -> Result<String> {
        tracing::info!(url = listing_url, "fetching artifact listing");
        let body = self
            .client
            .get(listing_url)
            .send()
            .and_then(|response| response.error_for_status())
            .and_then(|response| response.text())
            .map_err(|e| InstallerError::fetch(format!("{}: {}", listing_url, e)))?;
        tracing::debug!(bytes = body.len(), "listing received");
        Ok(body)
    }
}
