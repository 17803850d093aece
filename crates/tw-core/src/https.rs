//! HTTPS upgrade tracking
//!
//! [`HttpsRedirects`] lives on each tab state and remembers which URLs the
//! engine has already rewritten to `https://`, so redirect loops between the
//! two schemes are caught and the host is given up on. The main-frame part
//! survives same-tab navigations through `persist_main_frame_redirect`.

use std::collections::{HashMap, HashSet};

use crate::psl::{get_parent_domain, PublicSuffixes};

/// Window during which repeated main-frame redirects count as a loop (ms).
pub const MAINFRAME_RESET_MS: u64 = 3_000;
/// Redirects of the same URL or request tolerated before giving up.
pub const REQUEST_REDIRECT_LIMIT: u32 = 7;

/// Last main-frame URL the engine upgraded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MainFrameRedirect {
    pub url: String,
    /// First time this URL was upgraded (ms)
    pub time: u64,
    pub count: u32,
}

/// Per-tab redirect history.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpsRedirects {
    main_frame_redirect: Option<MainFrameRedirect>,
    redirect_counts: HashMap<String, u32>,
    failed_upgrade_hosts: HashSet<String>,
}

impl HttpsRedirects {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that the engine upgraded `url`.
    pub fn register_redirect(&mut self, url: &str, request_id: &str, main_frame: bool, now_ms: u64) {
        if main_frame {
            match &mut self.main_frame_redirect {
                Some(redirect) if redirect.url == url => redirect.count += 1,
                _ => {
                    self.main_frame_redirect = Some(MainFrameRedirect {
                        url: url.to_string(),
                        time: now_ms,
                        count: 0,
                    });
                }
            }
        } else {
            *self.redirect_counts.entry(request_id.to_string()).or_insert(0) += 1;
        }
    }

    /// Whether upgrading `url` again would not create a loop.
    pub fn can_redirect(&self, url: &str, host: &str, request_id: &str, main_frame: bool, now_ms: u64) -> bool {
        if self.failed_upgrade_hosts.contains(host) {
            return false;
        }

        if main_frame {
            match &self.main_frame_redirect {
                Some(redirect) if redirect.url == url => {
                    let since_first_hit = now_ms.saturating_sub(redirect.time);
                    !(since_first_hit < MAINFRAME_RESET_MS && redirect.count >= REQUEST_REDIRECT_LIMIT)
                }
                _ => true,
            }
        } else {
            self.redirect_counts
                .get(request_id)
                .map_or(true, |&count| count < REQUEST_REDIRECT_LIMIT)
        }
    }

    /// Give up on upgrading `host` for this tab. Returns false if it was
    /// already given up on.
    pub fn mark_failed_host(&mut self, host: &str) -> bool {
        self.failed_upgrade_hosts.insert(host.to_string())
    }

    pub fn is_failed_host(&self, host: &str) -> bool {
        self.failed_upgrade_hosts.contains(host)
    }

    /// Carry a previous tab generation's main-frame redirect, unless stale.
    pub fn persist_main_frame_redirect(&mut self, redirect: Option<&MainFrameRedirect>, now_ms: u64) {
        let Some(redirect) = redirect else {
            return;
        };
        if now_ms.saturating_sub(redirect.time) < MAINFRAME_RESET_MS {
            self.main_frame_redirect = Some(redirect.clone());
        }
    }

    pub fn get_main_frame_redirect(&self) -> Option<&MainFrameRedirect> {
        self.main_frame_redirect.as_ref()
    }
}

// =============================================================================
// Upgrade List
// =============================================================================

/// Hosts known to serve the same content over HTTPS.
#[derive(Debug, Clone, Default)]
pub struct UpgradeList {
    hosts: HashSet<String>,
    /// Hosts whose subdomains are all upgradable
    wildcard: HashSet<String>,
}

impl UpgradeList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a host; `*.example.com` covers every subdomain.
    pub fn insert(&mut self, host: &str) {
        let host = host.trim().trim_end_matches('.').to_ascii_lowercase();
        match host.strip_prefix("*.") {
            Some(rest) => self.wildcard.insert(rest.to_string()),
            None => self.hosts.insert(host),
        };
    }

    pub fn len(&self) -> usize {
        self.hosts.len() + self.wildcard.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn can_upgrade(&self, host: &str, psl: &PublicSuffixes) -> bool {
        if self.hosts.contains(host) {
            return true;
        }
        let base = psl.base_domain(host);
        let mut current = get_parent_domain(host);
        while let Some(parent) = current {
            if self.wildcard.contains(parent) {
                return true;
            }
            if parent.len() <= base.len() {
                break;
            }
            current = get_parent_domain(parent);
        }
        false
    }
}

// =============================================================================
// Error Codes
// =============================================================================

/// Host error strings that indicate a broken secure connection.
const HTTPS_ERROR_CODES: &[(&str, u8)] = &[
    ("net::ERR_CONNECTION_REFUSED", 1),
    ("net::ERR_ABORTED", 2),
    ("net::ERR_SSL_PROTOCOL_ERROR", 3),
    ("net::ERR_SSL_VERSION_OR_CIPHER_MISMATCH", 4),
    ("net::ERR_NAME_NOT_RESOLVED", 5),
    ("NS_ERROR_CONNECTION_REFUSED", 6),
    ("NS_ERROR_UNKNOWN_HOST", 7),
    ("An additional policy constraint failed when validating this certificate.", 8),
    ("Unable to communicate securely with peer: requested domain name does not match the server’s certificate.", 9),
    ("Cannot communicate securely with peer: no common encryption algorithm(s).", 10),
    ("SSL received a record that exceeded the maximum permissible length.", 11),
    ("The certificate is not trusted because it is self-signed.", 12),
    ("downgrade_redirect_loop", 13),
    ("net::ERR_CERT_COMMON_NAME_INVALID", 14),
    ("net::ERR_CERT_AUTHORITY_INVALID", 15),
    ("net::ERR_CERT_DATE_INVALID", 16),
    ("net::ERR_CONNECTION_RESET", 17),
    ("net::ERR_CONNECTION_CLOSED", 18),
    ("net::ERR_TIMED_OUT", 19),
];

/// Numeric code of a recognized HTTPS failure.
pub fn https_error_code(error: &str) -> Option<u8> {
    HTTPS_ERROR_CODES
        .iter()
        .find(|(name, _)| *name == error)
        .map(|&(_, code)| code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_main_frame_loop_detection() {
        let mut redirects = HttpsRedirects::new();
        let url = "http://loop.example/";
        for _ in 0..=REQUEST_REDIRECT_LIMIT {
            assert!(redirects.can_redirect(url, "loop.example", "1", true, 100));
            redirects.register_redirect(url, "1", true, 100);
        }
        assert!(!redirects.can_redirect(url, "loop.example", "1", true, 200));
        // Outside the window the count no longer matters
        assert!(redirects.can_redirect(url, "loop.example", "1", true, 100 + MAINFRAME_RESET_MS));
    }

    #[test]
    fn test_sub_resource_limit_is_per_request() {
        let mut redirects = HttpsRedirects::new();
        for _ in 0..REQUEST_REDIRECT_LIMIT {
            redirects.register_redirect("http://cdn.example/a.js", "r1", false, 0);
        }
        assert!(!redirects.can_redirect("http://cdn.example/a.js", "cdn.example", "r1", false, 0));
        assert!(redirects.can_redirect("http://cdn.example/a.js", "cdn.example", "r2", false, 0));
    }

    #[test]
    fn test_failed_host_is_never_upgraded() {
        let mut redirects = HttpsRedirects::new();
        assert!(redirects.mark_failed_host("bad.example"));
        assert!(!redirects.mark_failed_host("bad.example"));
        assert!(!redirects.can_redirect("http://bad.example/", "bad.example", "1", true, 0));
    }

    #[test]
    fn test_persist_main_frame_redirect_respects_window() {
        let mut old = HttpsRedirects::new();
        old.register_redirect("http://example.com/", "1", true, 1_000);

        let mut fresh = HttpsRedirects::new();
        fresh.persist_main_frame_redirect(old.get_main_frame_redirect(), 2_000);
        assert_eq!(fresh.get_main_frame_redirect().map(|r| r.url.as_str()), Some("http://example.com/"));

        let mut stale = HttpsRedirects::new();
        stale.persist_main_frame_redirect(old.get_main_frame_redirect(), 1_000 + MAINFRAME_RESET_MS);
        assert!(stale.get_main_frame_redirect().is_none());

        let mut none = HttpsRedirects::new();
        none.persist_main_frame_redirect(None, 0);
        assert!(none.get_main_frame_redirect().is_none());
    }

    #[test]
    fn test_upgrade_list() {
        let psl = PublicSuffixes::heuristic();
        let mut list = UpgradeList::new();
        list.insert("example.com");
        list.insert("*.wild.org");
        assert!(list.can_upgrade("example.com", &psl));
        assert!(!list.can_upgrade("www.example.com", &psl));
        assert!(list.can_upgrade("a.b.wild.org", &psl));
        assert!(!list.can_upgrade("wild.org", &psl));
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_https_error_codes() {
        assert_eq!(https_error_code("net::ERR_CONNECTION_REFUSED"), Some(1));
        assert_eq!(https_error_code("net::ERR_BLOCKED_BY_CLIENT"), None);
    }
}
