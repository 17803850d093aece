//! Public Suffix List (PSL) utilities for base-domain extraction
//!
//! When a suffix list is supplied it is parsed with the `publicsuffix`
//! crate. Without one, a small two-part-TLD heuristic is used so the engine
//! still classifies first/third party sensibly.
//!
//! # Examples
//!
//! ```
//! use tw_core::psl::PublicSuffixes;
//!
//! let psl = PublicSuffixes::heuristic();
//! assert_eq!(psl.base_domain("sub.example.com"), "example.com");
//! assert_eq!(psl.base_domain("sub.example.co.uk"), "example.co.uk");
//! ```

use std::net::IpAddr;

use publicsuffix::{List, Psl};

/// Common two-part TLDs for fallback.
const COMMON_TWO_PART_TLDS: &[&str] = &[
    "co.uk", "co.jp", "co.nz", "co.za", "co.in", "co.kr",
    "com.au", "com.br", "com.cn", "com.mx", "com.tw", "com.hk",
    "net.au", "net.nz",
    "org.uk", "org.au",
    "gov.uk", "gov.au",
    "ac.uk", "ac.jp",
    "ne.jp", "or.jp",
];

/// Base-domain resolver.
#[derive(Default)]
pub struct PublicSuffixes {
    list: Option<List>,
}

impl PublicSuffixes {
    /// Resolver without a list; uses the fallback heuristic only.
    pub fn heuristic() -> Self {
        Self { list: None }
    }

    /// Parse a list in the standard `public_suffix_list.dat` format.
    pub fn from_list_text(text: &str) -> Result<Self, publicsuffix::Error> {
        let list: List = text.parse()?;
        Ok(Self { list: Some(list) })
    }

    /// Whether a real suffix list is loaded.
    pub fn has_list(&self) -> bool {
        self.list.is_some()
    }

    /// Get the base domain (eTLD+1) for a hostname.
    ///
    /// IP addresses and single-label hosts are their own base domain.
    pub fn base_domain(&self, host: &str) -> String {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        if host.is_empty() || is_ip_literal(&host) {
            return host;
        }

        if let Some(list) = &self.list {
            if let Some(domain) = list.domain(host.as_bytes()) {
                return String::from_utf8_lossy(domain.as_bytes()).into_owned();
            }
            // The host is itself a public suffix
            return host;
        }

        let labels: Vec<&str> = host.split('.').collect();
        fallback_base_domain(&labels)
    }

    /// Check if two hosts share the same base domain.
    pub fn is_same_site(&self, host1: &str, host2: &str) -> bool {
        self.base_domain(host1) == self.base_domain(host2)
    }
}

impl std::fmt::Debug for PublicSuffixes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicSuffixes")
            .field("has_list", &self.has_list())
            .finish()
    }
}

fn is_ip_literal(host: &str) -> bool {
    host.starts_with('[') || host.parse::<IpAddr>().is_ok()
}

/// Fallback eTLD+1 heuristic.
fn fallback_base_domain(labels: &[&str]) -> String {
    let n = labels.len();
    if n <= 2 {
        return labels.join(".");
    }

    // Check for common two-part TLDs
    let last_two = format!("{}.{}", labels[n - 2], labels[n - 1]);
    if COMMON_TWO_PART_TLDS.contains(&last_two.as_str()) {
        return labels[n - 3..].join(".");
    }

    // Default: last 2 labels
    labels[n - 2..].join(".")
}

/// Get the parent domain (strip leftmost label).
pub fn get_parent_domain(host: &str) -> Option<&str> {
    match host.find('.') {
        Some(idx) if idx < host.len() - 1 => Some(&host[idx + 1..]),
        _ => None,
    }
}

/// Iterator for suffix-walking a host from full host down to a floor
/// (normally its base domain).
pub struct HostSuffixIter<'a> {
    current: &'a str,
    floor_len: usize,
}

impl<'a> Iterator for HostSuffixIter<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current.is_empty() || self.current.len() < self.floor_len {
            return None;
        }

        let result = self.current;

        // Move to parent
        self.current = match get_parent_domain(self.current) {
            Some(parent) if parent.len() >= self.floor_len => parent,
            _ => "",
        };

        Some(result)
    }
}

/// Walk host suffixes from most specific to least specific, stopping at
/// `floor` (inclusive).
pub fn walk_host_suffixes<'a>(host: &'a str, floor: &str) -> HostSuffixIter<'a> {
    HostSuffixIter {
        current: host,
        floor_len: floor.len().max(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_base_domain_simple() {
        assert_eq!(fallback_base_domain(&["example", "com"]), "example.com");
        assert_eq!(fallback_base_domain(&["sub", "example", "com"]), "example.com");
    }

    #[test]
    fn test_fallback_base_domain_two_part() {
        assert_eq!(fallback_base_domain(&["sub", "example", "co", "uk"]), "example.co.uk");
        assert_eq!(fallback_base_domain(&["example", "co", "uk"]), "example.co.uk");
    }

    #[test]
    fn test_base_domain_ip_and_case() {
        let psl = PublicSuffixes::heuristic();
        assert_eq!(psl.base_domain("127.0.0.1"), "127.0.0.1");
        assert_eq!(psl.base_domain("WWW.Example.COM."), "example.com");
        assert_eq!(psl.base_domain("localhost"), "localhost");
    }

    #[test]
    fn test_base_domain_with_list() {
        let psl = PublicSuffixes::from_list_text(
            "// ===BEGIN ICANN DOMAINS===\ncom\nuk\nco.uk\n// ===END ICANN DOMAINS===\n\
             // ===BEGIN PRIVATE DOMAINS===\ngithub.io\n// ===END PRIVATE DOMAINS===\n",
        )
        .unwrap();
        assert!(psl.has_list());
        assert_eq!(psl.base_domain("a.b.example.co.uk"), "example.co.uk");
        assert_eq!(psl.base_domain("user.github.io"), "user.github.io");
        assert_eq!(psl.base_domain("github.io"), "github.io");
    }

    #[test]
    fn test_get_parent_domain() {
        assert_eq!(get_parent_domain("sub.example.com"), Some("example.com"));
        assert_eq!(get_parent_domain("example.com"), Some("com"));
        assert_eq!(get_parent_domain("com"), None);
        assert_eq!(get_parent_domain(""), None);
    }

    #[test]
    fn test_walk_host_suffixes() {
        let walked: Vec<&str> = walk_host_suffixes("a.b.example.com", "example.com").collect();
        assert_eq!(walked, vec!["a.b.example.com", "b.example.com", "example.com"]);
        let single: Vec<&str> = walk_host_suffixes("example.com", "example.com").collect();
        assert_eq!(single, vec!["example.com"]);
    }
}
