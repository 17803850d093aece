//! Tab State model
//!
//! One [`TabState`] per live tab. Policy checks read it through shared
//! references and describe the changes they want as [`TabDelta`]s; only the
//! registry applies them.

use serde::Serialize;

use crate::ad_click::{AdClick, AdClickSummary};
use crate::https::HttpsRedirects;
use crate::site::{SiteContext, SiteSummary};
use crate::types::TabId;

/// Everything the engine knows about one tab generation.
#[derive(Debug, Clone)]
pub struct TabState {
    pub(crate) id: TabId,
    pub(crate) generation: u64,
    pub(crate) url: String,
    pub(crate) site: SiteContext,
    pub(crate) status: Option<String>,
    pub(crate) status_code: Option<u16>,
    pub(crate) ad_click: Option<AdClick>,
    pub(crate) https_redirects: HttpsRedirects,
    pub(crate) main_frame_upgraded: bool,
    pub(crate) has_https_error: bool,
}

impl TabState {
    pub(crate) fn new(id: TabId, generation: u64, url: &str, site: SiteContext) -> Self {
        Self {
            id,
            generation,
            url: url.to_string(),
            site,
            status: None,
            status_code: None,
            ad_click: None,
            https_redirects: HttpsRedirects::new(),
            main_frame_upgraded: false,
            has_https_error: false,
        }
    }

    pub fn id(&self) -> TabId {
        self.id
    }

    /// Registry-wide counter value at creation; changes on every replacement.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn site(&self) -> &SiteContext {
        &self.site
    }

    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    pub fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    pub fn ad_click(&self) -> Option<&AdClick> {
        self.ad_click.as_ref()
    }

    pub fn https_redirects(&self) -> &HttpsRedirects {
        &self.https_redirects
    }

    pub fn main_frame_upgraded(&self) -> bool {
        self.main_frame_upgraded
    }

    pub fn has_https_error(&self) -> bool {
        self.has_https_error
    }

    /// Apply a delta. Returns whether anything changed.
    pub(crate) fn apply(&mut self, delta: TabDelta) -> bool {
        match delta {
            TabDelta::UpdateUrl { url, site, status_code } => {
                self.status_code = Some(status_code);
                self.url = url;
                self.site = site;
                true
            }
            TabDelta::SetAdClick(ad_click) => {
                self.ad_click = Some(ad_click);
                true
            }
            TabDelta::FinalizeAdClick { base_domain } => match &mut self.ad_click {
                Some(ad_click) if ad_click.ad_click_redirect => {
                    ad_click.set_ad_base_domain(&base_domain);
                    true
                }
                _ => false,
            },
            TabDelta::RecordUpgrade { url, request_id, main_frame, now_ms } => {
                self.https_redirects.register_redirect(&url, &request_id, main_frame, now_ms);
                if main_frame {
                    self.main_frame_upgraded = true;
                }
                true
            }
            TabDelta::FailedUpgradeHost { host } => self.https_redirects.mark_failed_host(&host),
            TabDelta::HttpsError => {
                if self.has_https_error {
                    false
                } else {
                    self.has_https_error = true;
                    true
                }
            }
        }
    }

    pub fn snapshot(&self) -> TabSnapshot {
        TabSnapshot {
            id: self.id.0,
            url: self.url.clone(),
            status: self.status.clone(),
            site: SiteSummary::from(&self.site),
            ad_click: self.ad_click.as_ref().map(AdClickSummary::from),
            main_frame_upgraded: self.main_frame_upgraded,
            has_https_error: self.has_https_error,
        }
    }
}

/// A change a policy check asks the registry to make.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TabDelta {
    /// A main-frame response succeeded at `url`
    UpdateUrl {
        url: String,
        site: SiteContext,
        status_code: u16,
    },
    SetAdClick(AdClick),
    /// The ad-click redirect chain ended on `base_domain`
    FinalizeAdClick { base_domain: String },
    /// The engine rewrote `url` to secure transport
    RecordUpgrade {
        url: String,
        request_id: String,
        main_frame: bool,
        now_ms: u64,
    },
    /// Upgrading `host` looped; stop trying
    FailedUpgradeHost { host: String },
    /// First failed secure main-frame request of this generation
    HttpsError,
}

/// Serialized Tab State for the UI and devtools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ts_rs::TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct TabSnapshot {
    pub id: i32,
    pub url: String,
    pub status: Option<String>,
    pub site: SiteSummary,
    pub ad_click: Option<AdClickSummary>,
    pub main_frame_upgraded: bool,
    pub has_https_error: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tab() -> TabState {
        TabState::new(TabId(3), 1, "https://example.com/", SiteContext::unknown("https://example.com/"))
    }

    #[test]
    fn test_https_error_is_monotonic() {
        let mut tab = tab();
        assert!(tab.apply(TabDelta::HttpsError));
        assert!(!tab.apply(TabDelta::HttpsError));
        assert!(tab.has_https_error());
    }

    #[test]
    fn test_record_upgrade_marks_main_frame() {
        let mut tab = tab();
        tab.apply(TabDelta::RecordUpgrade {
            url: "http://example.com/".into(),
            request_id: "1".into(),
            main_frame: false,
            now_ms: 0,
        });
        assert!(!tab.main_frame_upgraded());
        tab.apply(TabDelta::RecordUpgrade {
            url: "http://example.com/".into(),
            request_id: "2".into(),
            main_frame: true,
            now_ms: 0,
        });
        assert!(tab.main_frame_upgraded());
        assert!(tab.https_redirects().get_main_frame_redirect().is_some());
    }

    #[test]
    fn test_finalize_without_pending_redirect_is_noop() {
        let mut tab = tab();
        assert!(!tab.apply(TabDelta::FinalizeAdClick { base_domain: "example.com".into() }));
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let json = serde_json::to_value(tab().snapshot()).unwrap();
        assert_eq!(json["id"], 3);
        assert_eq!(json["hasHttpsError"], false);
        assert!(json["adClick"].is_null());
        assert_eq!(json["site"]["baseDomain"], "");
    }
}
