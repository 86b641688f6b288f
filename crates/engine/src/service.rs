//! Shield Service
//!
//! Main entry point tying the pipeline together: cache check, pattern
//! detection, optional external detection, session-consistent token
//! resolution, masking, analytics. One request's pipeline is sequential;
//! many requests run concurrently, and the only awaited I/O is the external
//! detector call, which happens with no lock held.
//!
//! Recoverable conditions (detector down, registry poisoned, cache
//! unavailable) never fail a call: the caller always gets a
//! `RedactionResult`, with degradation reported through its flags. The only
//! hard error is `InvalidProfile`, raised at build time before any content
//! is processed.

use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::future::Future;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::analytics::AnalyticsCollector;
use crate::cache::{cache_key, RedactionCache};
use crate::detector::ExternalDetector;
use crate::error::EngineError;
use crate::mask;
use crate::models::{
    AgentType, AnalyticsSnapshot, AuditRecord, ContentType, Entity, ProtectionLevel,
    RedactionResult,
};
use crate::patterns;
use crate::profile::{self, ProfileOverrides, ProtectionProfile};
use crate::registry::{EntityRegistry, SessionStore};

const SWEEP_INTERVAL: u64 = 256;

/// Builder for [`ShieldService`]. Profile resolution happens in `build`, so
/// invalid combinations are rejected before the service exists.
pub struct ShieldBuilder {
    agent_type: AgentType,
    level: ProtectionLevel,
    overrides: ProfileOverrides,
    detector: Option<Arc<dyn ExternalDetector>>,
    session_store: Option<Arc<dyn SessionStore>>,
    cache_ttl: Duration,
    cache_capacity: usize,
    registry_max_entries: usize,
    registry_idle_ttl: Duration,
    batch_concurrency: usize,
}

impl ShieldBuilder {
    pub fn new(agent_type: AgentType, level: ProtectionLevel) -> Self {
        ShieldBuilder {
            agent_type,
            level,
            overrides: ProfileOverrides::default(),
            detector: None,
            session_store: None,
            cache_ttl: RedactionCache::DEFAULT_TTL,
            cache_capacity: RedactionCache::DEFAULT_CAPACITY,
            registry_max_entries: EntityRegistry::DEFAULT_MAX_ENTRIES,
            registry_idle_ttl: EntityRegistry::DEFAULT_IDLE_TTL,
            batch_concurrency: 8,
        }
    }

    pub fn overrides(mut self, overrides: ProfileOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn external_detector(mut self, detector: Arc<dyn ExternalDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    /// Swap in a shared session store (e.g. one backed by an external
    /// service) instead of the in-memory default.
    pub fn session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.session_store = Some(store);
        self
    }

    pub fn cache(mut self, ttl: Duration, capacity: usize) -> Self {
        self.cache_ttl = ttl;
        self.cache_capacity = capacity;
        self
    }

    pub fn registry(mut self, max_entries_per_session: usize, idle_ttl: Duration) -> Self {
        self.registry_max_entries = max_entries_per_session;
        self.registry_idle_ttl = idle_ttl;
        self
    }

    pub fn batch_concurrency(mut self, concurrency: usize) -> Self {
        self.batch_concurrency = concurrency.max(1);
        self
    }

    pub fn build(self) -> Result<ShieldService, EngineError> {
        let profile = profile::resolve(self.agent_type, self.level, self.overrides)?;
        let registry = self.session_store.unwrap_or_else(|| {
            Arc::new(EntityRegistry::new(
                self.registry_max_entries,
                self.registry_idle_ttl,
            ))
        });
        tracing::info!(
            agent_type = self.agent_type.as_str(),
            level = self.level.as_str(),
            external_detector = self.detector.is_some(),
            "shield service initialized"
        );
        Ok(ShieldService {
            fingerprint: profile.fingerprint(),
            analytics: Arc::new(AnalyticsCollector::new(self.agent_type, self.level)),
            cache: RedactionCache::new(self.cache_ttl, self.cache_capacity),
            batch_concurrency: self.batch_concurrency,
            agent_id: Uuid::new_v4(),
            request_counter: AtomicU64::new(0),
            profile,
            detector: self.detector,
            registry,
        })
    }
}

/// PII protection engine instance for one agent.
pub struct ShieldService {
    profile: ProtectionProfile,
    fingerprint: String,
    detector: Option<Arc<dyn ExternalDetector>>,
    registry: Arc<dyn SessionStore>,
    cache: RedactionCache,
    analytics: Arc<AnalyticsCollector>,
    agent_id: Uuid,
    batch_concurrency: usize,
    request_counter: AtomicU64,
}

impl ShieldService {
    pub fn builder(agent_type: AgentType, level: ProtectionLevel) -> ShieldBuilder {
        ShieldBuilder::new(agent_type, level)
    }

    pub fn profile(&self) -> &ProtectionProfile {
        &self.profile
    }

    pub fn agent_id(&self) -> Uuid {
        self.agent_id
    }

    /// Redact sensitive entities from `content`. Never fails: recoverable
    /// conditions degrade the result and set the corresponding flag.
    pub async fn redact(
        &self,
        content: &str,
        content_type: ContentType,
        session_id: Option<&str>,
    ) -> RedactionResult {
        let start = Instant::now();
        self.analytics.record_request();

        let count = self.request_counter.fetch_add(1, Ordering::Relaxed) + 1;
        if count % SWEEP_INTERVAL == 0 {
            self.registry.sweep();
        }

        // Sessions only influence output when the profile persists them.
        let session = if self.profile.persistence_enabled {
            session_id
        } else {
            None
        };

        let key = self
            .profile
            .cacheable()
            .then(|| cache_key(content, &self.fingerprint, session));

        if let Some(key) = &key {
            if let Some(mut cached) = self.cache.get(key) {
                self.analytics.record_cache_hit();
                let elapsed = start.elapsed().as_millis() as u64;
                self.analytics.record_success(elapsed);
                cached.cache_hit = true;
                cached.processing_time_ms = elapsed;
                return cached;
            }
            self.analytics.record_cache_miss();
        }

        let (entities, degraded_detection) = self.detect_entities(content).await;

        let mut session_consistency = true;
        let redacted_content = mask::apply(content, &entities, &mut |entity| {
            let strategy = mask::strategy_for(&self.profile, &entity.entity_type);
            let mut compute = || {
                mask::mask_value(
                    &entity.entity_type,
                    &entity.raw_value,
                    strategy,
                    self.profile.custom_masker.as_ref(),
                )
            };
            match session {
                Some(session_id) => {
                    let registry_key = format!(
                        "{}:{}",
                        entity.entity_type.code(),
                        mask::normalize(&entity.entity_type, &entity.raw_value)
                    );
                    match self.registry.resolve(session_id, &registry_key, &mut compute) {
                        Ok(token) => token,
                        Err(e) => {
                            tracing::warn!(
                                error = %e,
                                "session registry unavailable, using stateless tokens"
                            );
                            session_consistency = false;
                            compute()
                        }
                    }
                }
                None => compute(),
            }
        });

        let mut entity_counts: HashMap<_, u64> = HashMap::new();
        for entity in &entities {
            *entity_counts.entry(entity.entity_type.clone()).or_insert(0) += 1;
        }

        let processing_time_ms = start.elapsed().as_millis() as u64;
        let result = RedactionResult {
            redacted_content,
            entity_counts,
            processing_time_ms,
            cache_hit: false,
            degraded_detection,
            session_consistency,
        };

        // Degraded or inconsistent results are not cached: a later call
        // should pick up detector/registry recovery immediately.
        if let Some(key) = key {
            if !degraded_detection && session_consistency {
                self.cache.put(key, result.clone());
            }
        }

        if degraded_detection || !session_consistency {
            self.analytics.record_failure();
        } else {
            self.analytics.record_success(processing_time_ms);
        }
        self.analytics.record_entities(&result.entity_counts);
        self.analytics.record_audit(AuditRecord {
            timestamp: chrono::Utc::now(),
            agent_id: self.agent_id,
            session_id: session.map(str::to_string),
            entity_counts: result.entity_counts.clone(),
            processing_time_ms,
        });

        tracing::debug!(
            content_type = ?content_type,
            entities = result.entity_counts.values().sum::<u64>(),
            cache_hit = false,
            degraded = degraded_detection,
            "redaction complete"
        );

        result
    }

    /// Redact a batch of contents with bounded parallelism. Results come
    /// back in input order regardless of completion order; the concurrency
    /// bound backpressures external-detector calls.
    pub async fn redact_batch(
        &self,
        contents: &[String],
        content_type: ContentType,
        session_id: Option<&str>,
    ) -> Vec<RedactionResult> {
        stream::iter(
            contents
                .iter()
                .map(|content| self.redact(content, content_type, session_id)),
        )
        .buffered(self.batch_concurrency)
        .collect()
        .await
    }

    /// Detection-only probe: true when any enabled entity type occurs in
    /// the content. No masking, no registry mutation.
    pub async fn contains_sensitive_data(&self, content: &str) -> bool {
        let (entities, _) = self.detect_entities(content).await;
        !entities.is_empty()
    }

    /// Wrap an async function so its argument and return value both pass
    /// through `redact`. The inner function's errors propagate unchanged.
    pub async fn protect<F, Fut, E>(
        &self,
        func: F,
        input: String,
        session_id: Option<&str>,
    ) -> Result<String, E>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<String, E>>,
    {
        let protected_input = self
            .redact(&input, ContentType::PlainText, session_id)
            .await
            .redacted_content;
        let output = func(protected_input).await?;
        Ok(self
            .redact(&output, ContentType::PlainText, session_id)
            .await
            .redacted_content)
    }

    pub fn analytics(&self) -> AnalyticsSnapshot {
        self.analytics.snapshot()
    }

    pub fn audit_log(&self, session_id: Option<&str>) -> Vec<AuditRecord> {
        self.analytics.audit_log(session_id)
    }

    /// Engine health. The in-process pipeline is always available; the
    /// external detector is probed when configured but its failure only
    /// means degraded accuracy, so it is reported without failing health.
    pub async fn health_check(&self) -> bool {
        if let Some(detector) = &self.detector {
            if !detector.health_check().await {
                tracing::warn!(detector = detector.name(), "external detector unhealthy");
            }
        }
        true
    }

    async fn detect_entities(&self, content: &str) -> (Vec<Entity>, bool) {
        let pattern_entities = patterns::detect(
            content,
            &self.profile.enabled_types,
            &self.profile.custom_patterns,
        );

        if !self.profile.wants_external_detection() {
            return (pattern_entities, false);
        }
        // Running without a configured detector is a deployment choice, not
        // a degradation.
        let Some(detector) = &self.detector else {
            return (pattern_entities, false);
        };

        let known_spans: Vec<Range<usize>> =
            pattern_entities.iter().map(|e| e.span.clone()).collect();
        match detector
            .detect(content, &known_spans, &self.profile.enabled_types)
            .await
        {
            Ok(external) => {
                if external.is_empty() {
                    return (pattern_entities, false);
                }
                let mut combined = pattern_entities;
                combined.extend(external);
                (patterns::resolve_overlaps(combined), false)
            }
            Err(e) => {
                tracing::warn!(
                    detector = detector.name(),
                    error = %e,
                    "external detector unavailable, continuing with pattern-only detection"
                );
                (pattern_entities, true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntitySource, EntityType, MaskStrategy};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;

    fn service(level: ProtectionLevel) -> ShieldService {
        ShieldService::builder(AgentType::Chatbot, level)
            .build()
            .unwrap()
    }

    struct FailingDetector;

    #[async_trait]
    impl ExternalDetector for FailingDetector {
        fn name(&self) -> &str {
            "failing"
        }

        async fn detect(
            &self,
            _content: &str,
            _known_spans: &[Range<usize>],
            _enabled_types: &HashSet<EntityType>,
        ) -> Result<Vec<Entity>, EngineError> {
            Err(EngineError::ExternalDetector("simulated outage".into()))
        }

        async fn health_check(&self) -> bool {
            false
        }
    }

    /// Flags any occurrence of a fixed needle as a person.
    struct NeedleDetector {
        needle: &'static str,
    }

    #[async_trait]
    impl ExternalDetector for NeedleDetector {
        fn name(&self) -> &str {
            "needle"
        }

        async fn detect(
            &self,
            content: &str,
            _known_spans: &[Range<usize>],
            enabled_types: &HashSet<EntityType>,
        ) -> Result<Vec<Entity>, EngineError> {
            if !enabled_types.contains(&EntityType::Person) {
                return Ok(Vec::new());
            }
            Ok(content
                .match_indices(self.needle)
                .map(|(start, m)| Entity {
                    entity_type: EntityType::Person,
                    raw_value: m.to_string(),
                    span: start..start + m.len(),
                    source: EntitySource::External,
                    confidence: 0.85,
                })
                .collect())
        }

        async fn health_check(&self) -> bool {
            true
        }
    }

    const SCENARIO: &str = "Contact me at john.doe@example.com or call 555-123-4567";

    #[tokio::test]
    async fn standard_profile_masks_email_and_phone() {
        let shield = service(ProtectionLevel::Standard);
        let result = shield.redact(SCENARIO, ContentType::PlainText, None).await;

        assert!(!result.redacted_content.contains("john.doe@example.com"));
        assert!(!result.redacted_content.contains("555-123-4567"));
        assert_eq!(result.entity_counts.get(&EntityType::Email), Some(&1));
        assert_eq!(result.entity_counts.get(&EntityType::Phone), Some(&1));
        assert_eq!(result.entity_counts.len(), 2);
        assert!(!result.degraded_detection);
        assert!(result.session_consistency);
    }

    #[tokio::test]
    async fn redaction_is_deterministic_without_session() {
        let shield = service(ProtectionLevel::Standard);
        let first = shield.redact(SCENARIO, ContentType::PlainText, None).await;
        let second = shield.redact(SCENARIO, ContentType::PlainText, None).await;
        assert_eq!(first.redacted_content, second.redacted_content);
    }

    #[tokio::test]
    async fn redaction_is_idempotent() {
        let shield = service(ProtectionLevel::Standard);
        let once = shield.redact(SCENARIO, ContentType::PlainText, None).await;
        let twice = shield
            .redact(&once.redacted_content, ContentType::PlainText, None)
            .await;
        assert_eq!(once.redacted_content, twice.redacted_content);
    }

    #[tokio::test]
    async fn session_keeps_tokens_consistent_across_calls() {
        // A counter-based masker would hand out a fresh token per call if
        // the registry were not consulted.
        let counter = Arc::new(AtomicUsize::new(0));
        let masker_counter = counter.clone();
        let overrides = ProfileOverrides {
            strategies: vec![(EntityType::Email, MaskStrategy::Custom)],
            custom_masker: Some(Arc::new(move |_raw: &str| {
                let n = masker_counter.fetch_add(1, Ordering::Relaxed);
                format!("[EMAIL_{}]", n)
            })),
            ..Default::default()
        };
        let shield = ShieldService::builder(AgentType::Chatbot, ProtectionLevel::Standard)
            .overrides(overrides)
            .build()
            .unwrap();

        let first = shield
            .redact(
                "mail john.doe@example.com now",
                ContentType::PlainText,
                Some("s1"),
            )
            .await;
        let second = shield
            .redact(
                "again: john.doe@example.com later",
                ContentType::PlainText,
                Some("s1"),
            )
            .await;

        assert!(first.redacted_content.contains("[EMAIL_0]"));
        assert!(second.redacted_content.contains("[EMAIL_0]"));
        assert_eq!(counter.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn stateless_mode_computes_fresh_tokens() {
        let counter = Arc::new(AtomicUsize::new(0));
        let masker_counter = counter.clone();
        let overrides = ProfileOverrides {
            strategies: vec![(EntityType::Email, MaskStrategy::Custom)],
            custom_masker: Some(Arc::new(move |_raw: &str| {
                let n = masker_counter.fetch_add(1, Ordering::Relaxed);
                format!("[EMAIL_{}]", n)
            })),
            persistence_enabled: Some(false),
            ..Default::default()
        };
        let shield = ShieldService::builder(AgentType::Chatbot, ProtectionLevel::Standard)
            .overrides(overrides)
            .build()
            .unwrap();

        shield
            .redact("a: john@example.com", ContentType::PlainText, Some("s1"))
            .await;
        shield
            .redact("b: john@example.com", ContentType::PlainText, Some("s1"))
            .await;
        assert_eq!(counter.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn detected_types_grow_with_level() {
        let content = "mail a@b.io from 192.168.1.1 about MRN-1234567";
        let basic = service(ProtectionLevel::Basic)
            .redact(content, ContentType::PlainText, None)
            .await;
        let enterprise = service(ProtectionLevel::Enterprise)
            .redact(content, ContentType::PlainText, None)
            .await;

        for entity_type in basic.entity_counts.keys() {
            assert!(
                enterprise.entity_counts.contains_key(entity_type),
                "{:?} detected at basic but not enterprise",
                entity_type
            );
        }
        assert!(basic.entity_counts.len() < enterprise.entity_counts.len());
    }

    #[tokio::test]
    async fn batch_results_preserve_input_order() {
        let shield = service(ProtectionLevel::Standard);
        let contents: Vec<String> = (0..20)
            .map(|i| format!("item {} from user{}@example.com", i, i))
            .collect();
        let results = shield
            .redact_batch(&contents, ContentType::PlainText, None)
            .await;

        assert_eq!(results.len(), contents.len());
        for (i, result) in results.iter().enumerate() {
            assert!(result.redacted_content.starts_with(&format!("item {} ", i)));
            assert!(!result.redacted_content.contains("@example.com") || {
                // Partial email masking keeps the domain; the local part
                // must be gone either way.
                !result.redacted_content.contains(&format!("user{}", i))
            });
        }
    }

    #[tokio::test]
    async fn failing_detector_degrades_instead_of_erroring() {
        let shield = ShieldService::builder(AgentType::Chatbot, ProtectionLevel::Comprehensive)
            .external_detector(Arc::new(FailingDetector))
            .build()
            .unwrap();

        let result = shield.redact(SCENARIO, ContentType::PlainText, None).await;
        assert!(result.degraded_detection);
        assert!(!result.redacted_content.contains("john.doe@example.com"));
        assert_eq!(result.entity_counts.get(&EntityType::Email), Some(&1));
    }

    #[tokio::test]
    async fn external_entities_are_merged_and_masked() {
        let shield = ShieldService::builder(AgentType::Chatbot, ProtectionLevel::Enterprise)
            .external_detector(Arc::new(NeedleDetector {
                needle: "Sarah Johnson",
            }))
            .build()
            .unwrap();

        let result = shield
            .redact(
                "Sarah Johnson asked about her order",
                ContentType::PlainText,
                None,
            )
            .await;
        assert!(!result.redacted_content.contains("Sarah Johnson"));
        assert_eq!(result.entity_counts.get(&EntityType::Person), Some(&1));
        assert!(!result.degraded_detection);
    }

    #[tokio::test]
    async fn repeated_content_hits_the_cache() {
        let shield = service(ProtectionLevel::Standard);
        let first = shield.redact(SCENARIO, ContentType::PlainText, None).await;
        let second = shield.redact(SCENARIO, ContentType::PlainText, None).await;

        assert!(!first.cache_hit);
        assert!(second.cache_hit);
        assert_eq!(first.redacted_content, second.redacted_content);

        let snap = shield.analytics();
        assert_eq!(snap.cache_hits, 1);
        assert_eq!(snap.cache_misses, 1);
    }

    #[tokio::test]
    async fn degraded_results_are_not_cached() {
        let shield = ShieldService::builder(AgentType::Chatbot, ProtectionLevel::Comprehensive)
            .external_detector(Arc::new(FailingDetector))
            .build()
            .unwrap();

        let first = shield.redact(SCENARIO, ContentType::PlainText, None).await;
        let second = shield.redact(SCENARIO, ContentType::PlainText, None).await;
        assert!(first.degraded_detection);
        assert!(!second.cache_hit);
    }

    #[tokio::test]
    async fn contains_sensitive_data_probe() {
        let shield = service(ProtectionLevel::Standard);
        assert!(shield.contains_sensitive_data(SCENARIO).await);
        assert!(
            !shield
                .contains_sensitive_data("nothing to see here")
                .await
        );
    }

    #[tokio::test]
    async fn protect_pipes_input_and_output_through_redaction() {
        let shield = service(ProtectionLevel::Standard);
        let seen = Arc::new(std::sync::Mutex::new(String::new()));
        let seen_inner = seen.clone();

        let output = shield
            .protect(
                move |input: String| async move {
                    *seen_inner.lock().unwrap() = input.clone();
                    Ok::<String, String>(format!("{} (reply to admin@example.com)", input))
                },
                format!("question from {}", "john.doe@example.com"),
                None,
            )
            .await
            .unwrap();

        // The wrapped function never saw the raw address.
        assert!(!seen.lock().unwrap().contains("john.doe@example.com"));
        assert!(!output.contains("john.doe"));
        assert!(!output.contains("admin@example.com") || !output.contains("admin"));
    }

    #[tokio::test]
    async fn protect_propagates_inner_errors_unchanged() {
        let shield = service(ProtectionLevel::Standard);
        let err = shield
            .protect(
                |_input: String| async move { Err::<String, &str>("boom") },
                "call 555-123-4567".to_string(),
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err, "boom");
    }

    #[tokio::test]
    async fn health_check_survives_unhealthy_detector() {
        let shield = ShieldService::builder(AgentType::Chatbot, ProtectionLevel::Comprehensive)
            .external_detector(Arc::new(FailingDetector))
            .build()
            .unwrap();
        assert!(shield.health_check().await);
        assert!(service(ProtectionLevel::Basic).health_check().await);
    }

    #[tokio::test]
    async fn audit_log_accumulates_per_session() {
        let shield = service(ProtectionLevel::Standard);
        shield
            .redact(SCENARIO, ContentType::PlainText, Some("s1"))
            .await;
        shield
            .redact("no pii here", ContentType::PlainText, Some("s2"))
            .await;

        assert_eq!(shield.audit_log(None).len(), 2);
        let s1 = shield.audit_log(Some("s1"));
        assert_eq!(s1.len(), 1);
        assert_eq!(s1[0].entity_counts.get(&EntityType::Email), Some(&1));
    }
}
