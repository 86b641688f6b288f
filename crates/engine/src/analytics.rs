//! Analytics and Audit Collector
//!
//! Monotonic counters plus a bounded append-only audit log. Counters are
//! plain atomic increments so the hot path never takes a lock for them;
//! the per-type map and the audit log are the only guarded state. Exposes
//! snapshots only, callers cannot mutate accumulated state.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use crate::models::{AgentType, AnalyticsSnapshot, AuditRecord, EntityType, ProtectionLevel};

pub struct AnalyticsCollector {
    agent_type: AgentType,
    level: ProtectionLevel,
    total_requests: AtomicU64,
    successful_redactions: AtomicU64,
    failed_redactions: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    total_processing_time_ms: AtomicU64,
    entity_counts: RwLock<HashMap<EntityType, u64>>,
    audit_log: Mutex<VecDeque<AuditRecord>>,
    audit_capacity: usize,
}

impl AnalyticsCollector {
    pub const DEFAULT_AUDIT_CAPACITY: usize = 10_000;

    pub fn new(agent_type: AgentType, level: ProtectionLevel) -> Self {
        AnalyticsCollector {
            agent_type,
            level,
            total_requests: AtomicU64::new(0),
            successful_redactions: AtomicU64::new(0),
            failed_redactions: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            total_processing_time_ms: AtomicU64::new(0),
            entity_counts: RwLock::new(HashMap::new()),
            audit_log: Mutex::new(VecDeque::new()),
            audit_capacity: Self::DEFAULT_AUDIT_CAPACITY,
        }
    }

    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self, processing_time_ms: u64) {
        self.successful_redactions.fetch_add(1, Ordering::Relaxed);
        self.total_processing_time_ms
            .fetch_add(processing_time_ms, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed_redactions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_entities(&self, counts: &HashMap<EntityType, u64>) {
        if counts.is_empty() {
            return;
        }
        let Ok(mut totals) = self.entity_counts.write() else {
            return;
        };
        for (entity_type, count) in counts {
            *totals.entry(entity_type.clone()).or_insert(0) += count;
        }
    }

    /// Append an audit record, dropping the oldest once at capacity.
    pub fn record_audit(&self, record: AuditRecord) {
        let Ok(mut log) = self.audit_log.lock() else {
            return;
        };
        if log.len() >= self.audit_capacity {
            log.pop_front();
        }
        log.push_back(record);
    }

    pub fn snapshot(&self) -> AnalyticsSnapshot {
        AnalyticsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_redactions: self.successful_redactions.load(Ordering::Relaxed),
            failed_redactions: self.failed_redactions.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            total_processing_time_ms: self.total_processing_time_ms.load(Ordering::Relaxed),
            entity_counts: self
                .entity_counts
                .read()
                .map(|c| c.clone())
                .unwrap_or_default(),
            agent_type: self.agent_type,
            protection_level: self.level,
        }
    }

    /// Audit records for a session, or the whole log when no session is
    /// given. Most recent last.
    pub fn audit_log(&self, session_id: Option<&str>) -> Vec<AuditRecord> {
        let Ok(log) = self.audit_log.lock() else {
            return Vec::new();
        };
        log.iter()
            .filter(|record| match session_id {
                Some(session) => record.session_id.as_deref() == Some(session),
                None => true,
            })
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn collector() -> AnalyticsCollector {
        AnalyticsCollector::new(AgentType::Chatbot, ProtectionLevel::Standard)
    }

    fn audit(session: Option<&str>) -> AuditRecord {
        AuditRecord {
            timestamp: Utc::now(),
            agent_id: Uuid::new_v4(),
            session_id: session.map(str::to_string),
            entity_counts: HashMap::new(),
            processing_time_ms: 3,
        }
    }

    #[test]
    fn counters_accumulate() {
        let analytics = collector();
        analytics.record_request();
        analytics.record_request();
        analytics.record_success(5);
        analytics.record_failure();
        analytics.record_cache_hit();
        analytics.record_cache_miss();

        let snap = analytics.snapshot();
        assert_eq!(snap.total_requests, 2);
        assert_eq!(snap.successful_redactions, 1);
        assert_eq!(snap.failed_redactions, 1);
        assert_eq!(snap.cache_hits, 1);
        assert_eq!(snap.cache_misses, 1);
        assert_eq!(snap.total_processing_time_ms, 5);
    }

    #[test]
    fn entity_counts_sum_across_requests() {
        let analytics = collector();
        let mut counts = HashMap::new();
        counts.insert(EntityType::Email, 2u64);
        analytics.record_entities(&counts);
        analytics.record_entities(&counts);

        let snap = analytics.snapshot();
        assert_eq!(snap.entity_counts.get(&EntityType::Email), Some(&4));
    }

    #[test]
    fn audit_log_filters_by_session() {
        let analytics = collector();
        analytics.record_audit(audit(Some("s1")));
        analytics.record_audit(audit(Some("s2")));
        analytics.record_audit(audit(None));

        assert_eq!(analytics.audit_log(None).len(), 3);
        assert_eq!(analytics.audit_log(Some("s1")).len(), 1);
        assert_eq!(analytics.audit_log(Some("s3")).len(), 0);
    }

    #[test]
    fn concurrent_increments_do_not_lose_counts() {
        let analytics = std::sync::Arc::new(collector());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let analytics = analytics.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    analytics.record_request();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(analytics.snapshot().total_requests, 800);
    }
}
