//! Engine Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid protection profile: {0}")]
    InvalidProfile(String),

    #[error("External detector error: {0}")]
    ExternalDetector(String),

    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error("Session registry unavailable: {0}")]
    RegistryUnavailable(String),
}

impl EngineError {
    /// Returns true if the engine recovers from this error locally and the
    /// call still produces a (possibly degraded) redaction result. Only
    /// `InvalidProfile` is surfaced to callers.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, EngineError::InvalidProfile(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_profile_is_not_recoverable() {
        assert!(!EngineError::InvalidProfile("bad".into()).is_recoverable());
        assert!(EngineError::ExternalDetector("timeout".into()).is_recoverable());
        assert!(EngineError::CacheUnavailable("down".into()).is_recoverable());
        assert!(EngineError::RegistryUnavailable("down".into()).is_recoverable());
    }
}
