//! DataGuard Engine
//!
//! Detects and masks sensitive data in agent traffic with:
//! - Pattern recognizers plus an optional inference-backed detector
//! - Agent-type protection profiles with monotone protection levels
//! - Per-session token consistency and result caching
//! - Analytics counters and a bounded audit log

pub mod analytics;
pub mod cache;
pub mod detector;
pub mod error;
pub mod mask;
pub mod models;
pub mod patterns;
pub mod profile;
pub mod registry;
pub mod service;

pub use analytics::AnalyticsCollector;
pub use cache::RedactionCache;
pub use detector::{ExternalDetector, InferenceDetector};
pub use error::EngineError;
pub use models::*;
pub use profile::{CustomMasker, CustomPattern, ProfileOverrides, ProtectionProfile};
pub use registry::{EntityRegistry, SessionStore};
pub use service::{ShieldBuilder, ShieldService};
