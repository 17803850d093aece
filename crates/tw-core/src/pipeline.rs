//! Request Policy Pipeline
//!
//! Each request phase runs a fixed, ordered list of [`Check`]s. A check is a
//! plain function: it sees the request, an immutable view of the tab and the
//! configuration, and returns a [`CheckOutput`]. It never fails; when it
//! cannot classify a request it returns a no-op, except for the GPC and
//! cookie checks which take their protective branch.
//!
//! Checks never touch the registry themselves. A tab change is returned as
//! a [`TabDelta`] and applied by the engine before the next check runs, so
//! later checks see the updated tab.

use crate::config::{EngineConfig, HostMode};
use crate::events::{Notice, RequestDetails};
use crate::https::https_error_code;
use crate::services::{SettingsStore, UpgradeCounter};
use crate::site::FeatureFlags;
use crate::tab::{TabDelta, TabState};
use crate::trackers::TrackerAction;
use crate::types::{Decision, Header, HeaderDelta, RequestType};
use crate::url::{extract_host, is_redirect_status, is_secure, origin, upgrade_to_https};

/// Settings key of the global GPC toggle.
pub const GPC_SETTING: &str = "GPC";
pub const GPC_HEADER: &str = "Sec-GPC";
pub const TOPICS_HEADER: &str = "permissions-policy";
pub const TOPICS_OPT_OUT: &str = "interest-cohort=()";
/// Referrers longer than this are always trimmed (bytes).
pub const MAX_REFERRER_LEN: usize = 4096;

// =============================================================================
// Check Plumbing
// =============================================================================

/// Request facts shared by every check of a phase.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub host: String,
    pub base_domain: String,
    pub request_type: RequestType,
    /// `None` when the tab's site is unknown
    pub is_third_party: Option<bool>,
    pub now_ms: u64,
}

impl RequestInfo {
    pub fn new(details: &RequestDetails, tab: Option<&TabState>, config: &EngineConfig) -> Self {
        let host = extract_host(&details.url)
            .map(|h| h.trim_end_matches('.').to_ascii_lowercase())
            .unwrap_or_default();
        let base_domain = config.resolver.base_domain(&host);
        let request_type = details.kind();

        let is_third_party = if request_type.is_main_frame() {
            Some(false)
        } else {
            match tab.map(TabState::site) {
                Some(site) if site.is_valid() && !site.base_domain.is_empty() && !host.is_empty() => {
                    Some(site.base_domain != base_domain)
                }
                _ => None,
            }
        };

        Self {
            host,
            base_domain,
            request_type,
            is_third_party,
            now_ms: details.time_stamp,
        }
    }
}

/// What a check sees.
pub struct CheckContext<'a> {
    pub tab: Option<&'a TabState>,
    pub config: &'a EngineConfig,
    pub settings: &'a dyn SettingsStore,
    /// Global GPC toggle; on when settings are not loaded yet
    pub gpc_enabled: bool,
    pub request: &'a RequestInfo,
}

/// What a check returns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckOutput {
    pub decision: Decision,
    pub delta: Option<TabDelta>,
    /// Counter to bump once the delta has changed the tab
    pub counter: Option<UpgradeCounter>,
    pub notice: Option<Notice>,
}

impl CheckOutput {
    pub fn noop() -> Self {
        Self::default()
    }

    pub fn decide(decision: Decision) -> Self {
        Self {
            decision,
            ..Default::default()
        }
    }

    pub fn delta(delta: TabDelta) -> Self {
        Self {
            delta: Some(delta),
            ..Default::default()
        }
    }

    pub fn notice(notice: Notice) -> Self {
        Self {
            notice: Some(notice),
            ..Default::default()
        }
    }
}

/// A named policy check.
pub struct Check {
    pub name: &'static str,
    pub run: fn(&RequestDetails, &CheckContext<'_>) -> CheckOutput,
}

/// Request lifecycle phases reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    BeforeRequest,
    BeforeSendHeaders,
    HeadersReceived,
    Completed,
    ErrorOccurred,
}

const BEFORE_REQUEST: &[Check] = &[
    Check { name: "tracker-blocking", run: check_tracker_blocking },
    Check { name: "https-upgrade", run: check_https_upgrade },
];

const BEFORE_SEND_HEADERS: &[Check] = &[
    Check { name: "gpc", run: check_gpc },
    Check { name: "cookie-request", run: check_cookie_request },
    Check { name: "referrer", run: check_referrer },
];

// Bookkeeping first: attribution and counting read the updated site.
const HEADERS_RECEIVED: &[Check] = &[
    Check { name: "bookkeeping", run: check_bookkeeping },
    Check { name: "ad-click", run: check_ad_click },
    Check { name: "cookie-response", run: check_cookie_response },
    Check { name: "topics", run: check_topics },
];

const COMPLETED: &[Check] = &[Check { name: "cookie-validation", run: check_cookie_validation }];

const ERROR_OCCURRED: &[Check] = &[Check { name: "https-failure", run: check_https_failure }];

impl Phase {
    pub fn checks(self) -> &'static [Check] {
        match self {
            Phase::BeforeRequest => BEFORE_REQUEST,
            Phase::BeforeSendHeaders => BEFORE_SEND_HEADERS,
            Phase::HeadersReceived => HEADERS_RECEIVED,
            Phase::Completed => COMPLETED,
            Phase::ErrorOccurred => ERROR_OCCURRED,
        }
    }

    /// Whether checks of this phase edit request or response headers.
    pub fn edits_request_headers(self) -> bool {
        self == Phase::BeforeSendHeaders
    }

    pub fn edits_response_headers(self) -> bool {
        self == Phase::HeadersReceived
    }
}

/// Read the global GPC toggle.
pub fn gpc_setting(settings: &dyn SettingsStore) -> bool {
    if !settings.is_ready() {
        return true;
    }
    settings
        .get_setting(GPC_SETTING)
        .and_then(|v| v.as_bool())
        .unwrap_or(true)
}

fn has_header(headers: Option<&Vec<Header>>, name: &str) -> bool {
    headers.is_some_and(|headers| headers.iter().any(|h| h.is(name)))
}

// =============================================================================
// Before Request
// =============================================================================

fn check_tracker_blocking(details: &RequestDetails, ctx: &CheckContext<'_>) -> CheckOutput {
    let req = ctx.request;
    if req.request_type.is_main_frame() || req.is_third_party != Some(true) {
        return CheckOutput::noop();
    }
    let Some(tab) = ctx.tab else {
        return CheckOutput::noop();
    };
    let site = tab.site();
    if !site.is_feature_enabled(FeatureFlags::CONTENT_BLOCKING) {
        return CheckOutput::noop();
    }

    let psl = ctx.config.resolver.psl();
    let Some(tracker) = ctx.config.trackers.lookup(&req.host, psl) else {
        return CheckOutput::noop();
    };
    if tracker.default_action != TrackerAction::Block {
        return CheckOutput::noop();
    }
    if ctx.config.trackers.is_same_entity(&req.host, &site.host, psl) {
        return CheckOutput::noop();
    }

    let attributed = site.is_feature_enabled(FeatureFlags::AD_CLICK_ATTRIBUTION)
        && tab
            .ad_click()
            .is_some_and(|ad| ad.allow_ad_attribution(&site.base_domain, &req.host, req.now_ms));
    if attributed {
        log::debug!("allowing {} on tab {} for ad attribution", req.host, tab.id());
        return CheckOutput::noop();
    }

    log::debug!("blocking tracker {} ({}) on {}", req.host, tracker.domain, details.url);
    CheckOutput::decide(Decision::Block)
}

fn check_https_upgrade(details: &RequestDetails, ctx: &CheckContext<'_>) -> CheckOutput {
    let Some(upgraded) = upgrade_to_https(&details.url) else {
        return CheckOutput::noop();
    };
    let Some(tab) = ctx.tab else {
        return CheckOutput::noop();
    };
    let req = ctx.request;
    if !tab.site().is_feature_enabled(FeatureFlags::HTTPS)
        || !ctx.config.upgrade_hosts.can_upgrade(&req.host, ctx.config.resolver.psl())
    {
        return CheckOutput::noop();
    }

    let main_frame = req.request_type.is_main_frame();
    let redirects = tab.https_redirects();
    if redirects.can_redirect(&details.url, &req.host, &details.request_id, main_frame, req.now_ms) {
        return CheckOutput {
            decision: Decision::Redirect(upgraded),
            delta: Some(TabDelta::RecordUpgrade {
                url: details.url.clone(),
                request_id: details.request_id.clone(),
                main_frame,
                now_ms: req.now_ms,
            }),
            counter: Some(UpgradeCounter::TotalUpgrades),
            notice: None,
        };
    }

    if redirects.is_failed_host(&req.host) {
        return CheckOutput::noop();
    }
    log::info!("redirect loop upgrading {}; giving up on tab {}", req.host, tab.id());
    CheckOutput {
        decision: Decision::NoOp,
        delta: Some(TabDelta::FailedUpgradeHost { host: req.host.clone() }),
        counter: Some(UpgradeCounter::FailedUpgrades),
        notice: Some(Notice::HttpsUpgradeFailed {
            tab_id: tab.id(),
            host: req.host.clone(),
        }),
    }
}

// =============================================================================
// Before Send Headers
// =============================================================================

fn check_gpc(details: &RequestDetails, ctx: &CheckContext<'_>) -> CheckOutput {
    if !ctx.gpc_enabled {
        return CheckOutput::noop();
    }
    let inject = match ctx.tab.map(TabState::site) {
        Some(site) if site.is_valid() => site.is_feature_enabled(FeatureFlags::GPC),
        // Unknown tab or site: send the signal
        _ => true,
    };
    if !inject {
        return CheckOutput::noop();
    }

    let headers = details.request_headers.as_ref();
    let existing: Vec<_> = headers
        .map(|h| h.iter().filter(|h| h.is(GPC_HEADER)).collect())
        .unwrap_or_default();
    match existing.as_slice() {
        [only] if only.value == "1" => CheckOutput::noop(),
        [] => CheckOutput::decide(Decision::ModifyHeaders(HeaderDelta::append(Header::new(GPC_HEADER, "1")))),
        _ => CheckOutput::decide(Decision::ModifyHeaders(HeaderDelta::replace(GPC_HEADER, "1".to_string()))),
    }
}

/// Whether cookies of this request belong to a third-party tracker.
///
/// Uncertain third-party classification strips.
fn should_strip_cookies(ctx: &CheckContext<'_>) -> bool {
    let req = ctx.request;
    if req.request_type.is_main_frame() || req.host.is_empty() {
        return false;
    }
    if let Some(site) = ctx.tab.map(TabState::site) {
        if site.is_valid() && !site.is_feature_enabled(FeatureFlags::COOKIE) {
            return false;
        }
    }

    let psl = ctx.config.resolver.psl();
    if ctx.config.trackers.lookup(&req.host, psl).is_none() || ctx.config.cookies.is_excluded(&req.host, psl) {
        return false;
    }
    if let Some(site) = ctx.tab.map(TabState::site) {
        if ctx.config.trackers.is_same_entity(&req.host, &site.host, psl) {
            return false;
        }
    }
    req.is_third_party != Some(false)
}

fn check_cookie_request(details: &RequestDetails, ctx: &CheckContext<'_>) -> CheckOutput {
    if !has_header(details.request_headers.as_ref(), "cookie") || !should_strip_cookies(ctx) {
        return CheckOutput::noop();
    }
    log::debug!("stripping tracking cookies sent to {}", ctx.request.host);
    CheckOutput::decide(Decision::ModifyHeaders(HeaderDelta::remove("cookie")))
}

fn check_referrer(details: &RequestDetails, ctx: &CheckContext<'_>) -> CheckOutput {
    let Some(site) = ctx.tab.map(TabState::site) else {
        return CheckOutput::noop();
    };
    if !site.is_valid() || !site.is_feature_enabled(FeatureFlags::REFERRER) {
        return CheckOutput::noop();
    }
    let Some(referrer) = details
        .request_headers
        .as_ref()
        .and_then(|headers| headers.iter().find(|h| h.is("referer")))
        .map(|h| h.value.as_str())
    else {
        return CheckOutput::noop();
    };

    let Some(referrer_origin) = origin(referrer) else {
        return CheckOutput::noop();
    };
    let trimmed = format!("{referrer_origin}/");
    if referrer == trimmed || referrer == referrer_origin {
        return CheckOutput::noop();
    }
    if origin(&details.url).as_deref() == Some(referrer_origin.as_str()) {
        return CheckOutput::noop();
    }

    let req = ctx.request;
    let psl = ctx.config.resolver.psl();
    let referrer_base = extract_host(referrer)
        .map(|h| psl.base_domain(h))
        .unwrap_or_default();
    let cross_site = referrer_base != req.base_domain;
    let to_tracker = ctx.config.trackers.lookup(&req.host, psl).is_some();

    if cross_site || to_tracker || referrer.len() > MAX_REFERRER_LEN {
        CheckOutput::decide(Decision::ModifyHeaders(HeaderDelta::replace("referer", trimmed)))
    } else {
        CheckOutput::noop()
    }
}

// =============================================================================
// Headers Received
// =============================================================================

fn check_bookkeeping(details: &RequestDetails, ctx: &CheckContext<'_>) -> CheckOutput {
    let (Some(_), Some(status_code)) = (ctx.tab, details.status_code) else {
        return CheckOutput::noop();
    };
    if !ctx.request.request_type.is_main_frame() || !(200..300).contains(&status_code) {
        return CheckOutput::noop();
    }
    let site = ctx.config.resolver.resolve(&details.url, ctx.settings);
    CheckOutput::delta(TabDelta::UpdateUrl {
        url: details.url.clone(),
        site,
        status_code,
    })
}

fn check_ad_click(details: &RequestDetails, ctx: &CheckContext<'_>) -> CheckOutput {
    let (Some(tab), Some(status_code)) = (ctx.tab, details.status_code) else {
        return CheckOutput::noop();
    };
    if !ctx.request.request_type.is_main_frame() {
        return CheckOutput::noop();
    }

    if is_redirect_status(status_code) {
        let policy = &ctx.config.ad_click;
        if tab.site().is_feature_enabled(FeatureFlags::AD_CLICK_ATTRIBUTION) && policy.is_ad_click(&details.url) {
            let ad_click = policy.create_ad_click(&details.url, tab.id(), ctx.request.now_ms, ctx.config.resolver.psl());
            log::debug!("ad click detected on tab {}", tab.id());
            return CheckOutput::delta(TabDelta::SetAdClick(ad_click));
        }
        return CheckOutput::noop();
    }

    match tab.ad_click() {
        Some(ad) if ad.ad_click_redirect && !tab.site().base_domain.is_empty() => {
            CheckOutput::delta(TabDelta::FinalizeAdClick {
                base_domain: tab.site().base_domain.clone(),
            })
        }
        _ => CheckOutput::noop(),
    }
}

fn check_cookie_response(details: &RequestDetails, ctx: &CheckContext<'_>) -> CheckOutput {
    if !has_header(details.response_headers.as_ref(), "set-cookie") || !should_strip_cookies(ctx) {
        return CheckOutput::noop();
    }
    log::debug!("stripping tracking cookies set by {}", ctx.request.host);
    CheckOutput::decide(Decision::ModifyHeaders(HeaderDelta::remove("set-cookie")))
}

fn check_topics(_details: &RequestDetails, ctx: &CheckContext<'_>) -> CheckOutput {
    let Some(tab) = ctx.tab else {
        return CheckOutput::noop();
    };
    if !ctx.request.request_type.intersects(RequestType::DOCUMENT)
        || ctx.config.host_mode != HostMode::Blocking
        || !ctx.config.topics_available
        || !tab.site().is_feature_enabled(FeatureFlags::TOPICS)
    {
        return CheckOutput::noop();
    }
    CheckOutput::decide(Decision::ModifyHeaders(HeaderDelta::append(Header::new(
        TOPICS_HEADER,
        TOPICS_OPT_OUT,
    ))))
}

// =============================================================================
// Completed / Error
// =============================================================================

fn check_cookie_validation(details: &RequestDetails, ctx: &CheckContext<'_>) -> CheckOutput {
    if !has_header(details.response_headers.as_ref(), "set-cookie") || !should_strip_cookies(ctx) {
        return CheckOutput::noop();
    }
    log::warn!("set-cookie survived stripping on {}", details.url);
    CheckOutput::notice(Notice::CookieBlockInconsistency {
        tab_id: details.tab_id,
        request_id: details.request_id.clone(),
        url: details.url.clone(),
    })
}

fn check_https_failure(details: &RequestDetails, ctx: &CheckContext<'_>) -> CheckOutput {
    let (Some(tab), Some(error)) = (ctx.tab, details.error.as_deref()) else {
        return CheckOutput::noop();
    };
    if !ctx.request.request_type.is_main_frame()
        || !tab.main_frame_upgraded()
        || tab.has_https_error()
        || !is_secure(&details.url)
    {
        return CheckOutput::noop();
    }

    let code = https_error_code(error);
    log::info!("upgraded main frame failed on tab {}: {error} (code {code:?})", tab.id());
    CheckOutput {
        decision: Decision::NoOp,
        delta: Some(TabDelta::HttpsError),
        counter: code.map(|_| UpgradeCounter::FailedUpgrades),
        notice: None,
    }
}
