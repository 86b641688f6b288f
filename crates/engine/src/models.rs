//! Engine Data Models

use chrono::{DateTime, Utc};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::ops::Range;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::EngineError;

/// Kinds of sensitive entities the engine can detect and mask.
///
/// `Custom` covers profile-defined patterns; everything else has a built-in
/// recognizer or comes from the external detector.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityType {
    Email,
    Phone,
    Ssn,
    CreditCard,
    IpAddress,
    ApiKey,
    DatabaseUrl,
    AccountNumber,
    RoutingNumber,
    Person,
    Organization,
    Address,
    Date,
    MedicalRecord,
    DiagnosisCode,
    Custom(String),
}

impl EntityType {
    /// Stable snake_case code used in serialized output and wire payloads.
    pub fn code(&self) -> String {
        match self {
            EntityType::Email => "email".to_string(),
            EntityType::Phone => "phone".to_string(),
            EntityType::Ssn => "ssn".to_string(),
            EntityType::CreditCard => "credit_card".to_string(),
            EntityType::IpAddress => "ip_address".to_string(),
            EntityType::ApiKey => "api_key".to_string(),
            EntityType::DatabaseUrl => "database_url".to_string(),
            EntityType::AccountNumber => "account_number".to_string(),
            EntityType::RoutingNumber => "routing_number".to_string(),
            EntityType::Person => "person".to_string(),
            EntityType::Organization => "organization".to_string(),
            EntityType::Address => "address".to_string(),
            EntityType::Date => "date".to_string(),
            EntityType::MedicalRecord => "medical_record".to_string(),
            EntityType::DiagnosisCode => "diagnosis_code".to_string(),
            EntityType::Custom(name) => format!("custom:{}", name),
        }
    }

    /// Uppercase label used inside masked placeholders, e.g. `[REDACTED_EMAIL]`.
    pub fn label(&self) -> String {
        match self {
            EntityType::Email => "EMAIL".to_string(),
            EntityType::Phone => "PHONE".to_string(),
            EntityType::Ssn => "SSN".to_string(),
            EntityType::CreditCard => "CC".to_string(),
            EntityType::IpAddress => "IP".to_string(),
            EntityType::ApiKey => "API_KEY".to_string(),
            EntityType::DatabaseUrl => "DB_URL".to_string(),
            EntityType::AccountNumber => "ACCOUNT".to_string(),
            EntityType::RoutingNumber => "ROUTING".to_string(),
            EntityType::Person => "PERSON".to_string(),
            EntityType::Organization => "ORG".to_string(),
            EntityType::Address => "ADDRESS".to_string(),
            EntityType::Date => "DATE".to_string(),
            EntityType::MedicalRecord => "MRN".to_string(),
            EntityType::DiagnosisCode => "DIAGNOSIS".to_string(),
            EntityType::Custom(name) => name.to_uppercase().replace([' ', '-'], "_"),
        }
    }

    /// Parse a wire code back into a type. Unknown codes map to `Custom`.
    pub fn from_code(code: &str) -> EntityType {
        match code {
            "email" => EntityType::Email,
            "phone" => EntityType::Phone,
            "ssn" => EntityType::Ssn,
            "credit_card" => EntityType::CreditCard,
            "ip_address" => EntityType::IpAddress,
            "api_key" => EntityType::ApiKey,
            "database_url" => EntityType::DatabaseUrl,
            "account_number" => EntityType::AccountNumber,
            "routing_number" => EntityType::RoutingNumber,
            "person" => EntityType::Person,
            "organization" => EntityType::Organization,
            "address" => EntityType::Address,
            "date" => EntityType::Date,
            "medical_record" => EntityType::MedicalRecord,
            "diagnosis_code" => EntityType::DiagnosisCode,
            other => match other.strip_prefix("custom:") {
                Some(name) => EntityType::Custom(name.to_string()),
                None => EntityType::Custom(other.to_string()),
            },
        }
    }

    /// Types no regex can express; their presence in a profile pulls in the
    /// external detector regardless of protection level.
    pub fn requires_inference(&self) -> bool {
        matches!(self, EntityType::Person | EntityType::Organization)
    }
}

impl Serialize for EntityType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.code())
    }
}

/// Where a detected entity came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntitySource {
    Pattern,
    External,
}

/// One detected occurrence of a sensitive value.
///
/// Spans are byte offsets into the content the entity was detected in.
/// Entities are created during detection and discarded after masking; the
/// raw value only survives in normalized form as a registry key.
#[derive(Clone)]
pub struct Entity {
    pub entity_type: EntityType,
    pub raw_value: String,
    pub span: Range<usize>,
    pub source: EntitySource,
    pub confidence: f32,
}

// Manual Debug so raw values never end up in logs or panic messages.
impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("entity_type", &self.entity_type)
            .field("raw_value", &"<redacted>")
            .field("span", &self.span)
            .field("source", &self.source)
            .field("confidence", &self.confidence)
            .finish()
    }
}

/// Types of AI agents the engine protects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    CustomerService,
    DataAnalysis,
    Automation,
    Chatbot,
    Research,
    MultiAgent,
    Financial,
    Healthcare,
    Autonomous,
    Debugging,
}

impl AgentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::CustomerService => "customer_service",
            AgentType::DataAnalysis => "data_analysis",
            AgentType::Automation => "automation",
            AgentType::Chatbot => "chatbot",
            AgentType::Research => "research",
            AgentType::MultiAgent => "multi_agent",
            AgentType::Financial => "financial",
            AgentType::Healthcare => "healthcare",
            AgentType::Autonomous => "autonomous",
            AgentType::Debugging => "debugging",
        }
    }
}

impl FromStr for AgentType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "customer_service" => Ok(AgentType::CustomerService),
            "data_analysis" => Ok(AgentType::DataAnalysis),
            "automation" => Ok(AgentType::Automation),
            "chatbot" => Ok(AgentType::Chatbot),
            "research" => Ok(AgentType::Research),
            "multi_agent" => Ok(AgentType::MultiAgent),
            "financial" => Ok(AgentType::Financial),
            "healthcare" => Ok(AgentType::Healthcare),
            "autonomous" => Ok(AgentType::Autonomous),
            "debugging" => Ok(AgentType::Debugging),
            other => Err(EngineError::InvalidProfile(format!(
                "unknown agent type: {}",
                other
            ))),
        }
    }
}

/// Protection levels, ordered from least to most protective. The set of
/// enabled entity types grows monotonically with the level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtectionLevel {
    Basic,
    Standard,
    Comprehensive,
    Enterprise,
}

impl ProtectionLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtectionLevel::Basic => "basic",
            ProtectionLevel::Standard => "standard",
            ProtectionLevel::Comprehensive => "comprehensive",
            ProtectionLevel::Enterprise => "enterprise",
        }
    }
}

impl FromStr for ProtectionLevel {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "basic" => Ok(ProtectionLevel::Basic),
            "standard" => Ok(ProtectionLevel::Standard),
            "comprehensive" => Ok(ProtectionLevel::Comprehensive),
            "enterprise" => Ok(ProtectionLevel::Enterprise),
            other => Err(EngineError::InvalidProfile(format!(
                "unknown protection level: {}",
                other
            ))),
        }
    }
}

/// How a detected entity gets rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskStrategy {
    /// Keep a type-appropriate prefix/suffix, mask the rest.
    Partial,
    /// Replace the whole span with a fixed per-type placeholder.
    Full,
    /// Replace with a short deterministic digest of the normalized value.
    Hash,
    /// Delegate to the caller-supplied closure on the profile.
    Custom,
}

impl MaskStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MaskStrategy::Partial => "partial",
            MaskStrategy::Full => "full",
            MaskStrategy::Hash => "hash",
            MaskStrategy::Custom => "custom",
        }
    }
}

/// Hint describing the shape of incoming content. Extraction to plain text
/// happens upstream; the hint is recorded for analytics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    #[default]
    PlainText,
    Json,
    Code,
}

/// Result of one redaction call. Callers always receive one of these for
/// recoverable conditions; degradation is reported through the flags.
#[derive(Debug, Clone, Serialize)]
pub struct RedactionResult {
    pub redacted_content: String,
    pub entity_counts: HashMap<EntityType, u64>,
    pub processing_time_ms: u64,
    pub cache_hit: bool,
    /// True when the external detector was wanted but unavailable, so
    /// detection ran pattern-only.
    pub degraded_detection: bool,
    /// False when the session registry could not be used and tokens were
    /// generated statelessly for this call.
    pub session_consistency: bool,
}

/// Append-only audit entry. Never contains content or raw values.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub agent_id: Uuid,
    pub session_id: Option<String>,
    pub entity_counts: HashMap<EntityType, u64>,
    pub processing_time_ms: u64,
}

/// Point-in-time view of the analytics counters.
#[derive(Debug, Clone, Serialize)]
pub struct AnalyticsSnapshot {
    pub total_requests: u64,
    pub successful_redactions: u64,
    pub failed_redactions: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub total_processing_time_ms: u64,
    pub entity_counts: HashMap<EntityType, u64>,
    pub agent_type: AgentType,
    pub protection_level: ProtectionLevel,
}
