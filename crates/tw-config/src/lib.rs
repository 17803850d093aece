//! TabWarden Configuration Compiler
//!
//! This crate compiles the remote privacy configuration, tracker data and
//! HTTPS upgrade list into a `tw_core::EngineConfig`.

pub mod parser;
pub mod optimizer;
pub mod builder;

pub use builder::{build_engine_config, BuildStats, ConfigSources};
pub use optimizer::{optimize_domains, OptimizeStats};
pub use parser::{parse_https_hosts, parse_privacy_config, parse_tracker_data};

/// Error type for configuration compilation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid {input} JSON: {source}")]
    Json {
        input: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("Invalid public suffix list: {0}")]
    PublicSuffixList(String),
    #[error("Unknown host mode: {0}")]
    UnknownHostMode(String),
}
