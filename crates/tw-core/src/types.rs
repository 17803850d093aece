//! Core type definitions for TabWarden
//!
//! These types describe requests as the host reports them and the
//! decisions the engine hands back to the host's request-modification surface.

use std::fmt;

use serde::{Deserialize, Serialize};

// =============================================================================
// Tab Identifiers
// =============================================================================

/// Host-assigned tab identifier.
///
/// Unique while the tab exists; the host may reuse it after removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(pub i32);

impl TabId {
    /// Requests that do not belong to any tab (service workers, prefetch).
    pub const NONE: TabId = TabId(-1);

    /// Check whether this id refers to a real tab.
    #[inline]
    pub fn is_tab(self) -> bool {
        self.0 >= 0
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Request Types (bit mask for type filtering)
// =============================================================================

bitflags::bitflags! {
    /// Request type bit mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RequestType: u32 {
        const OTHER = 1 << 0;
        const SCRIPT = 1 << 1;
        const IMAGE = 1 << 2;
        const STYLESHEET = 1 << 3;
        const OBJECT = 1 << 4;
        const SUBDOCUMENT = 1 << 5;  // iframe/frame
        const MAIN_FRAME = 1 << 6;   // main document
        const XMLHTTPREQUEST = 1 << 7;
        const WEBSOCKET = 1 << 8;
        const FONT = 1 << 9;
        const MEDIA = 1 << 10;
        const PING = 1 << 11;
        const CSP_REPORT = 1 << 12;
        const BEACON = 1 << 13;

        /// Document types (main_frame + sub_frame)
        const DOCUMENT = Self::MAIN_FRAME.bits() | Self::SUBDOCUMENT.bits();
    }
}

impl RequestType {
    /// Parse from browser request type string.
    pub fn from_str(s: &str) -> Self {
        match s {
            "main_frame" => Self::MAIN_FRAME,
            "sub_frame" => Self::SUBDOCUMENT,
            "stylesheet" => Self::STYLESHEET,
            "script" => Self::SCRIPT,
            "image" | "imageset" => Self::IMAGE,
            "font" => Self::FONT,
            "object" | "object_subrequest" => Self::OBJECT,
            "xmlhttprequest" => Self::XMLHTTPREQUEST,
            "ping" => Self::PING,
            "beacon" => Self::BEACON,
            "csp_report" => Self::CSP_REPORT,
            "media" => Self::MEDIA,
            "websocket" => Self::WEBSOCKET,
            _ => Self::OTHER,
        }
    }

    /// Top-level document load of a tab.
    #[inline]
    pub fn is_main_frame(self) -> bool {
        self.contains(Self::MAIN_FRAME)
    }
}

// =============================================================================
// Scheme Masks
// =============================================================================

bitflags::bitflags! {
    /// URL scheme mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SchemeMask: u8 {
        const HTTP = 1 << 0;
        const HTTPS = 1 << 1;
        const WS = 1 << 2;
        const WSS = 1 << 3;
        const DATA = 1 << 4;
        const FTP = 1 << 5;
        /// Schemes that use secure transport
        const SECURE = Self::HTTPS.bits() | Self::WSS.bits();
    }
}

// =============================================================================
// Headers
// =============================================================================

/// A single HTTP header as the host reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Case-insensitive header name comparison.
    #[inline]
    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

/// Changes a check wants applied to a header list.
///
/// Removals are applied before appends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderDelta {
    /// Header names to drop (case-insensitive)
    pub remove: Vec<String>,
    /// Headers to append
    pub append: Vec<Header>,
}

impl HeaderDelta {
    pub fn append(header: Header) -> Self {
        Self {
            remove: Vec::new(),
            append: vec![header],
        }
    }

    pub fn remove(name: &str) -> Self {
        Self {
            remove: vec![name.to_string()],
            append: Vec::new(),
        }
    }

    /// Replace every header called `name` with a single new value.
    pub fn replace(name: &str, value: String) -> Self {
        Self {
            remove: vec![name.to_string()],
            append: vec![Header::new(name, value)],
        }
    }

    /// Apply the delta in place.
    pub fn apply_to(&self, headers: &mut Vec<Header>) {
        if !self.remove.is_empty() {
            headers.retain(|h| !self.remove.iter().any(|name| h.is(name)));
        }
        headers.extend(self.append.iter().cloned());
    }
}

// =============================================================================
// Decisions
// =============================================================================

/// Result of a single policy check.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Decision {
    /// Nothing to do for this request
    #[default]
    NoOp,
    /// Cancel the request
    Block,
    /// Redirect the request (HTTPS upgrade)
    Redirect(String),
    /// Modify the header list of the current phase
    ModifyHeaders(HeaderDelta),
}

/// Merged answer for the host's request-modification surface.
///
/// Field names follow the host's blocking-response shape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockingResponse {
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub cancel: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_headers: Option<Vec<Header>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_headers: Option<Vec<Header>>,
}

impl BlockingResponse {
    /// True when the host can let the request through untouched.
    pub fn is_noop(&self) -> bool {
        !self.cancel
            && self.redirect_url.is_none()
            && self.request_headers.is_none()
            && self.response_headers.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_type_from_str() {
        assert_eq!(RequestType::from_str("main_frame"), RequestType::MAIN_FRAME);
        assert_eq!(RequestType::from_str("sub_frame"), RequestType::SUBDOCUMENT);
        assert_eq!(RequestType::from_str("weird"), RequestType::OTHER);
        assert!(RequestType::DOCUMENT.contains(RequestType::SUBDOCUMENT));
    }

    #[test]
    fn test_header_delta_removes_before_append() {
        let mut headers = vec![
            Header::new("Referer", "https://a.com/path"),
            Header::new("Accept", "*/*"),
        ];
        HeaderDelta::replace("referer", "https://a.com/".to_string()).apply_to(&mut headers);
        assert_eq!(headers.len(), 2);
        assert_eq!(headers[0].name, "Accept");
        assert_eq!(headers[1].value, "https://a.com/");
    }

    #[test]
    fn test_blocking_response_serializes_sparse() {
        let response = BlockingResponse {
            redirect_url: Some("https://example.com/".into()),
            ..Default::default()
        };
        let json = serde_json::to_string(&response).unwrap();
        assert_eq!(json, r#"{"redirectUrl":"https://example.com/"}"#);
        assert!(BlockingResponse::default().is_noop());
    }
}
