//! Read-only enrichment collaborators. Both databases are external to the
//! pipeline; these traits are the whole surface the core consumes, and the
//! no-op implementations let the pipeline run without them.

use chrono::NaiveDateTime;
use models::HttpResponse;

/// Network metadata for an IP at a point in time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IpInfo {
    pub asn: Option<u32>,
    pub as_org_name: Option<String>,
    pub cc: Option<String>,
}

/// IP-to-network-info database.
pub trait NetinfoDb: Send + Sync {
    fn lookup(&self, ip: &str, at: Option<NaiveDateTime>) -> Option<IpInfo>;
}

/// Fingerprint-matching database for known blockpage and DNS-injection
/// signatures.
pub trait FingerprintDb: Send + Sync {
    /// Names of fingerprints matching an HTTP response.
    fn match_http(&self, response: &HttpResponse) -> Vec<String>;
    /// Names of fingerprints matching a DNS answer.
    fn match_dns(&self, answer: &str) -> Vec<String>;
}

/// Enrichment disabled: every lookup misses.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoNetinfo;

impl NetinfoDb for NoNetinfo {
    fn lookup(&self, _ip: &str, _at: Option<NaiveDateTime>) -> Option<IpInfo> {
        None
    }
}

/// Fingerprint matching disabled: nothing ever matches.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoFingerprints;

impl FingerprintDb for NoFingerprints {
    fn match_http(&self, _response: &HttpResponse) -> Vec<String> {
        Vec::new()
    }

    fn match_dns(&self, _answer: &str) -> Vec<String> {
        Vec::new()
    }
}
