//! Host events, engine messages and outcomes
//!
//! Everything the host can tell the engine is a [`HostEvent`] variant; the
//! engine answers with an [`Outcome`]. Field names follow the host's
//! camelCase event details so events can be forwarded as JSON unchanged.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::ServiceError;
use crate::tab::TabSnapshot;
use crate::types::{BlockingResponse, Header, RequestType, TabId};

fn no_tab() -> TabId {
    TabId::NONE
}

fn other_type() -> String {
    "other".to_string()
}

/// Host timestamps are fractional milliseconds.
fn millis<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    let value = f64::deserialize(deserializer)?;
    Ok(if value.is_finite() && value > 0.0 { value as u64 } else { 0 })
}

// =============================================================================
// Event Details
// =============================================================================

/// A network request as reported by the host in any request phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestDetails {
    pub request_id: String,
    pub url: String,
    #[serde(default = "no_tab")]
    pub tab_id: TabId,
    #[serde(default)]
    pub frame_id: i32,
    #[serde(rename = "type", default = "other_type")]
    pub request_type: String,
    #[serde(default)]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub request_headers: Option<Vec<Header>>,
    #[serde(default)]
    pub response_headers: Option<Vec<Header>>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default, deserialize_with = "millis")]
    pub time_stamp: u64,
}

impl RequestDetails {
    pub fn new(request_id: &str, tab_id: TabId, url: &str, request_type: &str) -> Self {
        Self {
            request_id: request_id.to_string(),
            url: url.to_string(),
            tab_id,
            frame_id: 0,
            request_type: request_type.to_string(),
            status_code: None,
            request_headers: None,
            response_headers: None,
            error: None,
            time_stamp: 0,
        }
    }

    pub fn kind(&self) -> RequestType {
        RequestType::from_str(&self.request_type)
    }

    pub fn with_request_headers(mut self, headers: Vec<Header>) -> Self {
        self.request_headers = Some(headers);
        self
    }

    pub fn with_response(mut self, status_code: u16, headers: Vec<Header>) -> Self {
        self.status_code = Some(status_code);
        self.response_headers = Some(headers);
        self
    }

    pub fn with_error(mut self, error: &str) -> Self {
        self.error = Some(error.to_string());
        self
    }

    pub fn at(mut self, time_stamp: u64) -> Self {
        self.time_stamp = time_stamp;
        self
    }
}

/// Navigation start or commit for one frame of a tab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationDetails {
    pub tab_id: TabId,
    #[serde(default)]
    pub frame_id: i32,
    pub url: String,
    #[serde(default, deserialize_with = "millis")]
    pub time_stamp: u64,
}

impl NavigationDetails {
    pub fn main_frame(tab_id: TabId, url: &str, time_stamp: u64) -> Self {
        Self {
            tab_id,
            frame_id: 0,
            url: url.to_string(),
            time_stamp,
        }
    }
}

/// A tab opened as the navigation target of another tab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetDetails {
    pub source_tab_id: TabId,
    pub tab_id: TabId,
    #[serde(default)]
    pub url: String,
}

/// Tab lifecycle information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabInfo {
    #[serde(default = "no_tab")]
    pub id: TabId,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabRemoval {
    pub tab_id: TabId,
}

// =============================================================================
// Events and Messages
// =============================================================================

/// Every event the host delivers to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum HostEvent {
    TabCreated(TabInfo),
    TabUpdated(TabInfo),
    TabRemoved(TabRemoval),
    CreatedNavigationTarget(TargetDetails),
    BeforeNavigate(NavigationDetails),
    Committed(NavigationDetails),
    BeforeRequest(RequestDetails),
    BeforeSendHeaders(RequestDetails),
    HeadersReceived(RequestDetails),
    Completed(RequestDetails),
    ErrorOccurred(RequestDetails),
}

impl HostEvent {
    /// Tab the event belongs to, if any.
    pub fn tab_id(&self) -> TabId {
        match self {
            HostEvent::TabCreated(info) | HostEvent::TabUpdated(info) => info.id,
            HostEvent::TabRemoved(removal) => removal.tab_id,
            HostEvent::CreatedNavigationTarget(target) => target.tab_id,
            HostEvent::BeforeNavigate(nav) | HostEvent::Committed(nav) => nav.tab_id,
            HostEvent::BeforeRequest(req)
            | HostEvent::BeforeSendHeaders(req)
            | HostEvent::HeadersReceived(req)
            | HostEvent::Completed(req)
            | HostEvent::ErrorOccurred(req) => req.tab_id,
        }
    }
}

/// Requests accepted by a running engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineMessage {
    Event(HostEvent),
    GetTab(TabId),
    ListTabs,
    UpgradeCounts,
    /// The settings store finished loading from storage
    SettingsLoaded(Map<String, Value>),
    UpdateSetting { key: String, value: Value },
    RemoveSetting { key: String },
    /// The user chose to load blocked embedded content from `domain`
    AllowClickToLoad { tab_id: TabId, domain: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineReply {
    Outcome(Outcome),
    Tab(Option<TabSnapshot>),
    Tabs(Vec<TabSnapshot>),
    UpgradeCounts(UpgradeCounts),
    Setting(Result<(), ServiceError>),
    Done,
}

// =============================================================================
// Outcomes
// =============================================================================

/// Side-channel information for the UI and devtools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "notice", rename_all = "camelCase")]
pub enum Notice {
    TabChanged(TabSnapshot),
    /// A cookie directive survived on a request that should have been stripped
    #[serde(rename_all = "camelCase")]
    CookieBlockInconsistency {
        tab_id: TabId,
        request_id: String,
        url: String,
    },
    /// Embedded content on this page may be replaced with placeholders
    #[serde(rename_all = "camelCase")]
    ClickToLoadEligible { tab_id: TabId, domain: String },
    #[serde(rename_all = "camelCase")]
    HttpsUpgradeFailed { tab_id: TabId, host: String },
}

/// Result of handling one host event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    pub response: BlockingResponse,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notices: Vec<Notice>,
}

impl Outcome {
    pub fn notice(notice: Notice) -> Self {
        Self {
            response: BlockingResponse::default(),
            notices: vec![notice],
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeCounts {
    pub total_upgrades: u64,
    pub failed_upgrades: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_parses_from_host_json() {
        let json = r#"{
            "event": "beforeSendHeaders",
            "requestId": "42",
            "url": "https://example.com/",
            "tabId": 7,
            "type": "main_frame",
            "requestHeaders": [{"name": "Accept", "value": "*/*"}],
            "timeStamp": 1699999999123.456
        }"#;
        let event: HostEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.tab_id(), TabId(7));
        match event {
            HostEvent::BeforeSendHeaders(details) => {
                assert!(details.kind().is_main_frame());
                assert_eq!(details.time_stamp, 1_699_999_999_123);
                assert_eq!(details.request_headers.map(|h| h.len()), Some(1));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_missing_tab_defaults_to_none() {
        let json = r#"{"event": "beforeRequest", "requestId": "1", "url": "https://a.com/x.js", "type": "script"}"#;
        let event: HostEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.tab_id(), TabId::NONE);
    }

    #[test]
    fn test_unknown_event_is_rejected() {
        let json = r#"{"event": "onMessage", "tabId": 1}"#;
        assert!(serde_json::from_str::<HostEvent>(json).is_err());
    }

    #[test]
    fn test_notice_serialization() {
        let notice = Notice::HttpsUpgradeFailed { tab_id: TabId(1), host: "a.com".into() };
        let json = serde_json::to_value(notice).unwrap();
        assert_eq!(json["notice"], "httpsUpgradeFailed");
        assert_eq!(json["tabId"], 1);
    }
}
