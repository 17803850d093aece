//! TabWarden Core Library
//!
//! Tab-state and request-policy engine of the TabWarden privacy extension.
//! The host feeds browser events in; the engine keeps one state record per
//! tab and answers every network request with a header/block/redirect
//! decision.
//!
//! # Architecture
//!
//! Policy checks are pure functions over an immutable view of the tab and
//! return decisions plus tab deltas; the [`TabRegistry`] applies the deltas
//! against the tab generation they were computed for. The [`Engine`] owns
//! all state and collaborators, and the [`EngineHandle`] actor serializes
//! events in host-delivery order.
//!
//! # Modules
//!
//! - `psl`: Public Suffix List base-domain extraction
//! - `url`: Allocation-free URL slicing
//! - `site`: Site Context resolution and per-site feature flags
//! - `trackers`: Tracker and entity lookups
//! - `ad_click`: Ad-click attribution
//! - `https`: HTTPS upgrade tracking
//! - `tab` / `registry`: Tab State and the Tab Registry
//! - `links`: Pending cross-tab links
//! - `pipeline`: Request Policy Pipeline checks
//! - `engine` / `actor`: Event handling and the ordered actor
//! - `services`: Collaborator interfaces

pub mod ad_click;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod https;
pub mod links;
pub mod pipeline;
pub mod psl;
pub mod registry;
pub mod services;
pub mod site;
pub mod tab;
pub mod trackers;
pub mod types;
pub mod url;

#[cfg(feature = "runtime")]
pub mod actor;

// Re-export commonly used types
#[cfg(feature = "runtime")]
pub use actor::EngineHandle;
pub use config::{EngineConfig, HostMode};
pub use engine::Engine;
pub use error::{EngineError, ServiceError};
pub use events::{EngineMessage, EngineReply, HostEvent, Notice, Outcome, RequestDetails};
pub use registry::TabRegistry;
pub use services::{Services, SessionRules, SettingsStore, UpgradeCounters};
pub use site::{FeatureFlags, SiteContext, SiteResolver};
pub use tab::{TabSnapshot, TabState};
pub use types::{BlockingResponse, Header, TabId};
