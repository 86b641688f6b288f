//! Protection Profile Resolver
//!
//! Pure mapping from (agent type, protection level, overrides) to a resolved
//! `ProtectionProfile`. All agent-specific behavior is data in the static
//! tables below; adding an agent type means adding table rows, not subclasses.

use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::error::EngineError;
use crate::models::{AgentType, EntityType, MaskStrategy, ProtectionLevel};

/// Caller-supplied masking function for `MaskStrategy::Custom`.
pub type CustomMasker = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// A profile-defined recognizer compiled at resolve time.
#[derive(Debug, Clone)]
pub struct CustomPattern {
    pub name: String,
    pub regex: Regex,
}

/// Resolved protection configuration. Built once per service and passed by
/// value through the pipeline; never mutated after `resolve`.
#[derive(Clone)]
pub struct ProtectionProfile {
    pub agent_type: AgentType,
    pub level: ProtectionLevel,
    pub enabled_types: HashSet<EntityType>,
    pub strategy_by_type: HashMap<EntityType, MaskStrategy>,
    pub custom_patterns: Vec<CustomPattern>,
    pub persistence_enabled: bool,
    pub custom_masker: Option<CustomMasker>,
}

impl fmt::Debug for ProtectionProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtectionProfile")
            .field("agent_type", &self.agent_type)
            .field("level", &self.level)
            .field("enabled_types", &self.enabled_types)
            .field("strategy_by_type", &self.strategy_by_type)
            .field("custom_patterns", &self.custom_patterns)
            .field("persistence_enabled", &self.persistence_enabled)
            .field("custom_masker", &self.custom_masker.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// Caller adjustments merged into the agent-type defaults. Additions always
/// merge in; `disable_types` is the only explicit downgrade path.
#[derive(Default)]
pub struct ProfileOverrides {
    pub enable_types: Vec<EntityType>,
    pub disable_types: Vec<EntityType>,
    pub strategies: Vec<(EntityType, MaskStrategy)>,
    /// (name, regex source) pairs, validated during resolve.
    pub custom_patterns: Vec<(String, String)>,
    pub persistence_enabled: Option<bool>,
    pub custom_masker: Option<CustomMasker>,
}

impl fmt::Debug for ProfileOverrides {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProfileOverrides")
            .field("enable_types", &self.enable_types)
            .field("disable_types", &self.disable_types)
            .field("strategies", &self.strategies)
            .field("custom_patterns", &self.custom_patterns)
            .field("persistence_enabled", &self.persistence_enabled)
            .field("custom_masker", &self.custom_masker.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// Base entity-type set per protection level. Each level is a strict
/// superset of the one below it.
fn level_types(level: ProtectionLevel) -> Vec<EntityType> {
    let mut types = vec![
        EntityType::Email,
        EntityType::Phone,
        EntityType::Ssn,
        EntityType::CreditCard,
    ];
    if level >= ProtectionLevel::Standard {
        types.extend([
            EntityType::IpAddress,
            EntityType::ApiKey,
            EntityType::AccountNumber,
        ]);
    }
    if level >= ProtectionLevel::Comprehensive {
        types.extend([
            EntityType::DatabaseUrl,
            EntityType::RoutingNumber,
            EntityType::Address,
            EntityType::Date,
            EntityType::Person,
            EntityType::Organization,
        ]);
    }
    if level >= ProtectionLevel::Enterprise {
        types.extend([EntityType::MedicalRecord, EntityType::DiagnosisCode]);
    }
    types
}

/// Agent-specific additions, constant across levels so level monotonicity
/// holds for every agent type.
fn agent_types(agent: AgentType) -> Vec<EntityType> {
    match agent {
        AgentType::CustomerService => vec![EntityType::AccountNumber, EntityType::Address],
        AgentType::DataAnalysis | AgentType::Automation | AgentType::Debugging => {
            vec![EntityType::ApiKey, EntityType::DatabaseUrl]
        }
        AgentType::Financial => vec![
            EntityType::AccountNumber,
            EntityType::RoutingNumber,
            EntityType::CreditCard,
        ],
        AgentType::Healthcare => vec![EntityType::MedicalRecord, EntityType::DiagnosisCode],
        AgentType::Chatbot
        | AgentType::Research
        | AgentType::MultiAgent
        | AgentType::Autonomous => vec![],
    }
}

/// Default masking strategy per level. Basic favors fast full masking;
/// higher levels keep more structure visible for audits.
fn level_strategy(level: ProtectionLevel, entity_type: &EntityType) -> MaskStrategy {
    match level {
        ProtectionLevel::Basic => MaskStrategy::Full,
        ProtectionLevel::Standard => match entity_type {
            EntityType::Email | EntityType::Phone => MaskStrategy::Partial,
            _ => MaskStrategy::Full,
        },
        ProtectionLevel::Comprehensive => match entity_type {
            EntityType::Email
            | EntityType::Phone
            | EntityType::CreditCard
            | EntityType::ApiKey
            | EntityType::AccountNumber => MaskStrategy::Partial,
            _ => MaskStrategy::Full,
        },
        ProtectionLevel::Enterprise => match entity_type {
            EntityType::Email
            | EntityType::Phone
            | EntityType::CreditCard
            | EntityType::ApiKey
            | EntityType::AccountNumber
            | EntityType::RoutingNumber
            | EntityType::Ssn => MaskStrategy::Partial,
            EntityType::Person
            | EntityType::Organization
            | EntityType::Address
            | EntityType::Date
            | EntityType::MedicalRecord
            | EntityType::DiagnosisCode => MaskStrategy::Hash,
            _ => MaskStrategy::Full,
        },
    }
}

/// Resolve a protection profile. Fails fast with `InvalidProfile` before any
/// content is processed; everything after this point is infallible
/// configuration lookup.
pub fn resolve(
    agent_type: AgentType,
    level: ProtectionLevel,
    overrides: ProfileOverrides,
) -> Result<ProtectionProfile, EngineError> {
    let mut enabled_types: HashSet<EntityType> = level_types(level).into_iter().collect();
    enabled_types.extend(agent_types(agent_type));
    enabled_types.extend(overrides.enable_types.iter().cloned());
    for t in &overrides.disable_types {
        enabled_types.remove(t);
    }

    let mut strategy_by_type: HashMap<EntityType, MaskStrategy> = enabled_types
        .iter()
        .map(|t| (t.clone(), level_strategy(level, t)))
        .collect();
    for (t, strategy) in &overrides.strategies {
        if !enabled_types.contains(t) {
            return Err(EngineError::InvalidProfile(format!(
                "strategy override for disabled entity type: {}",
                t.code()
            )));
        }
        strategy_by_type.insert(t.clone(), *strategy);
    }

    if strategy_by_type
        .values()
        .any(|s| *s == MaskStrategy::Custom)
        && overrides.custom_masker.is_none()
    {
        return Err(EngineError::InvalidProfile(
            "custom mask strategy requires a custom masker".to_string(),
        ));
    }

    let mut custom_patterns = Vec::with_capacity(overrides.custom_patterns.len());
    let mut seen = HashSet::new();
    for (name, source) in &overrides.custom_patterns {
        if name.trim().is_empty() {
            return Err(EngineError::InvalidProfile(
                "custom pattern with empty name".to_string(),
            ));
        }
        if !seen.insert(name.clone()) {
            return Err(EngineError::InvalidProfile(format!(
                "duplicate custom pattern: {}",
                name
            )));
        }
        let regex = Regex::new(source).map_err(|e| {
            EngineError::InvalidProfile(format!("custom pattern {} failed to compile: {}", name, e))
        })?;
        let custom_type = EntityType::Custom(name.clone());
        enabled_types.insert(custom_type.clone());
        strategy_by_type
            .entry(custom_type)
            .or_insert(MaskStrategy::Full);
        custom_patterns.push(CustomPattern {
            name: name.clone(),
            regex,
        });
    }

    Ok(ProtectionProfile {
        agent_type,
        level,
        enabled_types,
        strategy_by_type,
        custom_patterns,
        persistence_enabled: overrides.persistence_enabled.unwrap_or(true),
        custom_masker: overrides.custom_masker,
    })
}

impl ProtectionProfile {
    /// True when any enabled type needs the external detector: either the
    /// level demands it or a type no regex can express is enabled.
    pub fn wants_external_detection(&self) -> bool {
        self.level >= ProtectionLevel::Comprehensive
            || self.enabled_types.iter().any(|t| t.requires_inference())
    }

    /// Results produced under a profile with a caller closure cannot be
    /// keyed reliably, so such profiles bypass the result cache.
    pub fn cacheable(&self) -> bool {
        self.custom_masker.is_none()
    }

    /// Stable fingerprint of everything that affects redaction output,
    /// used as half of the cache key.
    pub fn fingerprint(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        parts.push(self.agent_type.as_str().to_string());
        parts.push(self.level.as_str().to_string());
        parts.push(self.persistence_enabled.to_string());

        let mut types: Vec<String> = self.enabled_types.iter().map(|t| t.code()).collect();
        types.sort();
        parts.extend(types);

        let mut strategies: Vec<String> = self
            .strategy_by_type
            .iter()
            .map(|(t, s)| format!("{}={}", t.code(), s.as_str()))
            .collect();
        strategies.sort();
        parts.extend(strategies);

        let mut patterns: Vec<String> = self
            .custom_patterns
            .iter()
            .map(|p| format!("{}:{}", p.name, p.regex.as_str()))
            .collect();
        patterns.sort();
        parts.extend(patterns);

        let mut hasher = Sha256::new();
        hasher.update(parts.join("\n").as_bytes());
        hex::encode(&hasher.finalize()[..8])
    }
}
