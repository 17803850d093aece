//! Error types
//!
//! Policy checks never fail; these errors only cover collaborator calls
//! and the actor channel.

/// A collaborator could not serve a call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("settings are not ready")]
    SettingsNotReady,
    #[error("settings write rejected: {0}")]
    SettingsWrite(String),
    #[error("session rule rejected: {0}")]
    RuleRejected(String),
}

/// Failure talking to a running engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("engine has shut down")]
    ShutDown,
    #[error("engine dropped the reply")]
    NoReply,
}
