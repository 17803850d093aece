use std::collections::HashSet;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptimizeStats {
    pub before: usize,
    pub after: usize,
    pub deduped: usize,
    pub invalid: usize,
}

impl OptimizeStats {
    pub fn merge(&mut self, other: OptimizeStats) {
        self.before += other.before;
        self.after += other.after;
        self.deduped += other.deduped;
        self.invalid += other.invalid;
    }
}

/// Lowercase, trim and dedupe a domain list in place. Entries that cannot
/// be a host name are dropped.
pub fn optimize_domains(domains: &mut Vec<String>) -> OptimizeStats {
    let before = domains.len();
    let mut invalid = 0usize;

    for domain in domains.iter_mut() {
        *domain = normalize_domain(domain);
    }
    domains.retain(|domain| {
        if is_valid_domain(domain) {
            true
        } else {
            invalid += 1;
            false
        }
    });

    let mut seen: HashSet<String> = HashSet::new();
    let mut deduped = 0usize;
    domains.retain(|domain| {
        if seen.contains(domain) {
            deduped += 1;
            false
        } else {
            seen.insert(domain.clone());
            true
        }
    });

    OptimizeStats {
        before,
        after: domains.len(),
        deduped,
        invalid,
    }
}

pub fn normalize_domain(domain: &str) -> String {
    domain.trim().trim_end_matches('.').to_ascii_lowercase()
}

fn is_valid_domain(domain: &str) -> bool {
    let host = domain.strip_prefix("*.").unwrap_or(domain);
    !host.is_empty()
        && !host.starts_with('.')
        && host
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'-' | b'_' | b':' | b'[' | b']'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_and_dedupes() {
        let mut domains = vec![
            "Example.com".to_string(),
            "example.com.".to_string(),
            " cdn.net ".to_string(),
            "".to_string(),
            "bad domain".to_string(),
            "*.Wild.org".to_string(),
        ];
        let stats = optimize_domains(&mut domains);
        assert_eq!(domains, vec!["example.com", "cdn.net", "*.wild.org"]);
        assert_eq!(stats.before, 6);
        assert_eq!(stats.after, 3);
        assert_eq!(stats.deduped, 1);
        assert_eq!(stats.invalid, 2);
    }
}
