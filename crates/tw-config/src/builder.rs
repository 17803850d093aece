use tw_core::ad_click::{
    AdClickPolicy, AllowlistEntry, LinkFormat, DEFAULT_NAVIGATION_EXPIRATION_MS, DEFAULT_TOTAL_EXPIRATION_MS,
};
use tw_core::config::{EngineConfig, HostMode};
use tw_core::https::UpgradeList;
use tw_core::psl::PublicSuffixes;
use tw_core::site::{FeatureFlags, SiteFeatures, SiteResolver};
use tw_core::trackers::{CookiePolicy, TrackerAction, TrackerEntry, TrackerIndex};

use crate::optimizer::{normalize_domain, optimize_domains, OptimizeStats};
use crate::parser::{
    feature_settings, parse_https_hosts, parse_privacy_config, parse_tracker_data, AdClickSettings, CookieSettings,
    DomainEntry, FeatureConfig, PrivacyConfig,
};
use crate::ConfigError;

const AD_CLICK_FEATURE: &str = "adClickAttribution";
const COOKIE_FEATURE: &str = "cookie";

/// Raw inputs of one engine configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigSources<'a> {
    /// Remote privacy configuration (JSON)
    pub privacy_config: &'a str,
    /// Tracker data set (JSON)
    pub tracker_data: Option<&'a str>,
    /// HTTPS-upgradable hosts, one per line
    pub https_hosts: Option<&'a str>,
    /// `public_suffix_list.dat`; the two-part-TLD heuristic is used without it
    pub public_suffix_list: Option<&'a str>,
    /// `blocking` (default) or `declarative`
    pub host_mode: Option<&'a str>,
    pub topics_available: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildStats {
    pub features_enabled: usize,
    pub exceptions: usize,
    pub unprotected: usize,
    pub trackers: usize,
    pub entity_domains: usize,
    pub cookie_exclusions: usize,
    pub link_formats: usize,
    pub upgrade_hosts: usize,
    pub has_suffix_list: bool,
    /// Feature names this engine does not know
    pub unknown_features: Vec<String>,
    pub domains: OptimizeStats,
}

pub fn build_engine_config(sources: &ConfigSources<'_>) -> Result<(EngineConfig, BuildStats), ConfigError> {
    let mut stats = BuildStats::default();

    let psl = match sources.public_suffix_list {
        Some(text) => PublicSuffixes::from_list_text(text).map_err(|e| ConfigError::PublicSuffixList(e.to_string()))?,
        None => PublicSuffixes::heuristic(),
    };
    stats.has_suffix_list = psl.has_list();

    let host_mode = match sources.host_mode {
        Some(name) => HostMode::from_name(name).ok_or_else(|| ConfigError::UnknownHostMode(name.to_string()))?,
        None => HostMode::default(),
    };

    let privacy = parse_privacy_config(sources.privacy_config)?;
    let features = build_site_features(&privacy, &mut stats);
    let ad_click = build_ad_click_policy(privacy.features.get(AD_CLICK_FEATURE))?;
    stats.link_formats = ad_click.link_formats.len();
    let cookies = build_cookie_policy(privacy.features.get(COOKIE_FEATURE), &mut stats)?;

    let trackers = match sources.tracker_data {
        Some(text) => build_tracker_index(text)?,
        None => TrackerIndex::new(),
    };
    stats.trackers = trackers.tracker_count();
    stats.entity_domains = trackers.entity_domain_count();

    let upgrade_hosts = match sources.https_hosts {
        Some(text) => build_upgrade_list(text, &mut stats),
        None => UpgradeList::new(),
    };
    stats.upgrade_hosts = upgrade_hosts.len();

    log::info!(
        "compiled config: {} features, {} trackers, {} upgrade hosts, {} exceptions",
        stats.features_enabled,
        stats.trackers,
        stats.upgrade_hosts,
        stats.exceptions
    );

    let config = EngineConfig {
        resolver: SiteResolver::new(psl, features),
        trackers,
        ad_click,
        cookies,
        upgrade_hosts,
        host_mode,
        topics_available: sources.topics_available,
    };
    Ok((config, stats))
}

fn domains_of(entries: &[DomainEntry], stats: &mut BuildStats) -> Vec<String> {
    let mut domains: Vec<String> = entries.iter().map(|e| e.domain.clone()).collect();
    stats.domains.merge(optimize_domains(&mut domains));
    domains
}

fn build_site_features(privacy: &PrivacyConfig, stats: &mut BuildStats) -> SiteFeatures {
    let mut named: Vec<(&String, &FeatureConfig)> = privacy.features.iter().collect();
    named.sort_by(|a, b| a.0.cmp(b.0));

    let mut enabled = FeatureFlags::empty();
    let mut exceptions = Vec::new();
    for (name, feature) in named {
        let Some(flag) = FeatureFlags::from_feature_name(name) else {
            log::debug!("ignoring unknown feature {name}");
            stats.unknown_features.push(name.clone());
            continue;
        };
        if feature.is_enabled() {
            enabled |= flag;
        }
        for domain in domains_of(&feature.exceptions, stats) {
            exceptions.push((domain, flag));
        }
    }

    let mut features = SiteFeatures::new(enabled);
    for (domain, flag) in exceptions {
        features.add_exception(&domain, flag);
    }
    for domain in domains_of(&privacy.unprotected_temporary, stats) {
        features.add_unprotected(&domain);
    }

    stats.features_enabled = enabled.iter().count();
    stats.exceptions = features.exception_count();
    stats.unprotected = features.unprotected_count();
    features
}

fn build_ad_click_policy(feature: Option<&FeatureConfig>) -> Result<AdClickPolicy, ConfigError> {
    let Some(feature) = feature else {
        return Ok(AdClickPolicy::default());
    };
    let Some(settings) = feature_settings::<AdClickSettings>(feature, AD_CLICK_FEATURE)? else {
        return Ok(AdClickPolicy {
            enabled: feature.is_enabled(),
            ..Default::default()
        });
    };

    Ok(AdClickPolicy {
        enabled: feature.is_enabled(),
        link_formats: settings
            .link_formats
            .into_iter()
            .map(|f| LinkFormat {
                url: f.url.trim().to_ascii_lowercase(),
                ad_domain_parameter_name: f.ad_domain_parameter_name.filter(|p| !p.is_empty()),
            })
            .collect(),
        allowlist: settings
            .allowlist
            .into_iter()
            .map(|a| AllowlistEntry {
                blocklist_entry: normalize_domain(&a.blocklist_entry),
                host: normalize_domain(&a.host),
            })
            .collect(),
        navigation_expiration_ms: settings
            .navigation_expiration
            .map_or(DEFAULT_NAVIGATION_EXPIRATION_MS, |secs| secs.saturating_mul(1000)),
        total_expiration_ms: settings
            .total_expiration
            .map_or(DEFAULT_TOTAL_EXPIRATION_MS, |secs| secs.saturating_mul(1000)),
        heuristic_detection: settings.heuristic_detection == "enabled",
        domain_detection: settings.domain_detection == "enabled",
    })
}

fn build_cookie_policy(feature: Option<&FeatureConfig>, stats: &mut BuildStats) -> Result<CookiePolicy, ConfigError> {
    let mut policy = CookiePolicy::default();
    let Some(feature) = feature else {
        return Ok(policy);
    };
    let settings = feature_settings::<CookieSettings>(feature, COOKIE_FEATURE)?.unwrap_or_default();
    for domain in domains_of(&settings.excluded_cookie_domains, stats) {
        policy.exclude(&domain);
    }
    stats.cookie_exclusions = policy.excluded_count();
    Ok(policy)
}

fn build_tracker_index(text: &str) -> Result<TrackerIndex, ConfigError> {
    let data = parse_tracker_data(text)?;
    let mut index = TrackerIndex::new();

    for record in data.trackers.into_values() {
        let domain = normalize_domain(&record.domain);
        if domain.is_empty() {
            continue;
        }
        index.insert_tracker(TrackerEntry {
            domain,
            owner: record.owner.map(|o| o.name),
            categories: record.categories,
            default_action: match record.default.as_str() {
                "ignore" => TrackerAction::Ignore,
                _ => TrackerAction::Block,
            },
        });
    }

    for (owner, entity) in data.entities {
        for domain in entity.domains {
            index.insert_entity_domain(&normalize_domain(&domain), &owner);
        }
    }

    Ok(index)
}

fn build_upgrade_list(text: &str, stats: &mut BuildStats) -> UpgradeList {
    let mut hosts = parse_https_hosts(text);
    stats.domains.merge(optimize_domains(&mut hosts));
    let mut list = UpgradeList::new();
    for host in &hosts {
        list.insert(host);
    }
    list
}

#[cfg(test)]
mod tests {
    use tw_core::psl::PublicSuffixes;
    use tw_core::services::MemorySettings;
    use tw_core::site::FeatureFlags;

    use super::{build_engine_config, ConfigSources};
    use crate::ConfigError;

    const PRIVACY_CONFIG: &str = r#"{
        "features": {
            "gpc": {"state": "enabled", "exceptions": [{"domain": "Bank.com"}]},
            "cookie": {"state": "enabled", "settings": {"excludedCookieDomains": [{"domain": "login.example.com"}]}},
            "adClickAttribution": {"state": "enabled", "settings": {
                "linkFormats": [{"url": "DuckDuckGo.com/y.js"}],
                "allowlist": [{"blocklistEntry": "bing.com", "host": "bat.bing.com"}],
                "navigationExpiration": 60,
                "totalExpiration": 3600
            }},
            "https": {"state": "enabled"},
            "referrer": {"state": "disabled"},
            "autofill": {"state": "enabled"}
        },
        "unprotectedTemporary": [{"domain": "broken.org"}, {"domain": "broken.org."}]
    }"#;

    const TRACKER_DATA: &str = r#"{
        "trackers": {
            "tracker.com": {"domain": "tracker.com", "owner": {"name": "Tracker Inc"}, "categories": ["Advertising"], "default": "block"},
            "cdn.friendly.net": {"domain": "cdn.friendly.net", "default": "ignore"}
        },
        "entities": {"Tracker Inc": {"domains": ["tracker.com", "tracker-news.com"]}}
    }"#;

    #[test]
    fn builds_full_config() {
        let sources = ConfigSources {
            privacy_config: PRIVACY_CONFIG,
            tracker_data: Some(TRACKER_DATA),
            https_hosts: Some("example.com\n*.secure.net\nexample.com\n"),
            host_mode: Some("declarative"),
            ..Default::default()
        };
        let (config, stats) = build_engine_config(&sources).expect("config should build");

        assert_eq!(stats.features_enabled, 4);
        assert_eq!(stats.unknown_features, vec!["autofill".to_string()]);
        assert_eq!(stats.unprotected, 1);
        assert_eq!(stats.trackers, 2);
        assert_eq!(stats.entity_domains, 2);
        assert_eq!(stats.upgrade_hosts, 2);
        assert_eq!(stats.cookie_exclusions, 1);
        assert!(stats.domains.deduped >= 2);
        assert!(config.host_mode.is_declarative());

        let settings = MemorySettings::new();
        let bank = config.resolver.resolve("https://www.bank.com/", &settings);
        assert!(!bank.is_feature_enabled(FeatureFlags::GPC));
        assert!(bank.is_feature_enabled(FeatureFlags::COOKIE));
        assert!(!bank.is_feature_enabled(FeatureFlags::REFERRER));
        assert!(config.resolver.resolve("https://broken.org/", &settings).is_broken);

        assert!(config.ad_click.is_ad_click("https://duckduckgo.com/y.js?u=1"));
        assert_eq!(config.ad_click.navigation_expiration_ms, 60_000);
        assert_eq!(config.ad_click.total_expiration_ms, 3_600_000);

        let psl = PublicSuffixes::heuristic();
        assert!(config.trackers.lookup("pixel.tracker.com", &psl).is_some());
        assert!(config.trackers.is_same_entity("tracker-news.com", "tracker.com", &psl));
        assert!(config.cookies.is_excluded("login.example.com", &psl));
        assert!(config.upgrade_hosts.can_upgrade("a.secure.net", &psl));
    }

    #[test]
    fn missing_sections_use_defaults() {
        let sources = ConfigSources {
            privacy_config: "{}",
            ..Default::default()
        };
        let (config, stats) = build_engine_config(&sources).expect("empty config should build");
        assert_eq!(stats.features_enabled, 0);
        assert!(!config.ad_click.enabled);
        assert!(config.upgrade_hosts.is_empty());
        assert!(!config.host_mode.is_declarative());
    }

    #[test]
    fn rejects_unknown_host_mode() {
        let sources = ConfigSources {
            privacy_config: "{}",
            host_mode: Some("mv4"),
            ..Default::default()
        };
        assert!(matches!(build_engine_config(&sources), Err(ConfigError::UnknownHostMode(mode)) if mode == "mv4"));
    }

    #[test]
    fn uses_supplied_suffix_list() {
        let sources = ConfigSources {
            privacy_config: "{}",
            public_suffix_list: Some("// ===BEGIN ICANN DOMAINS===\ncom\nuk\nco.uk\nblogspot.com\n// ===END ICANN DOMAINS===\n"),
            ..Default::default()
        };
        let (config, stats) = build_engine_config(&sources).expect("config should build");
        assert!(stats.has_suffix_list);
        assert_eq!(config.resolver.base_domain("me.blogspot.com"), "me.blogspot.com");
    }
}
