//! Folding of usage events into session totals

use std::sync::Arc;

use crate::session::SessionRegistry;
use crate::types::{AgentId, AgentSession, Result, UsageDelta, UsagePayload, now_millis};

use super::PricingTable;

/// Elapsed time below which the burn rate is reported as zero
const MIN_ELAPSED_MS: u64 = 1;

/// Cost per second over `elapsed_ms`
///
/// Zero for sub-millisecond spans; never negative or non-finite.
pub fn burn_rate(total_cost: f64, elapsed_ms: u64) -> f64 {
    if elapsed_ms < MIN_ELAPSED_MS {
        return 0.0;
    }
    let rate = total_cost / (elapsed_ms as f64 / 1000.0);
    if rate.is_finite() && rate > 0.0 { rate } else { 0.0 }
}

/// Incremental metrics aggregator
///
/// Every usage payload is a delta and is added to the running totals of its
/// session. This is only correct under the delivery contract of the host:
/// each report arrives at most once and reports of one session arrive in
/// order. No deduplication is performed.
#[derive(Debug, Clone)]
pub struct MetricsAggregator {
    registry: Arc<SessionRegistry>,
    pricing: Arc<PricingTable>,
}

impl MetricsAggregator {
    pub fn new(registry: Arc<SessionRegistry>, pricing: impl Into<Arc<PricingTable>>) -> Self {
        Self {
            registry,
            pricing: pricing.into(),
        }
    }

    /// Pricing table used for payloads without a cost
    pub fn pricing(&self) -> &Arc<PricingTable> {
        &self.pricing
    }

    /// Apply a usage report at the current time
    pub fn apply_usage(&self, id: &AgentId, payload: UsagePayload) -> Result<Option<AgentSession>> {
        self.apply_usage_at(id, payload, now_millis())
    }

    /// Apply a usage report at `now`
    ///
    /// Returns `Ok(None)` for an unknown session. A malformed payload is
    /// rejected before anything is touched.
    pub fn apply_usage_at(
        &self,
        id: &AgentId,
        payload: UsagePayload,
        now: u64,
    ) -> Result<Option<AgentSession>> {
        let delta = UsageDelta::try_from(payload)?;
        let updated = self
            .registry
            .with_session_mut(id, |session| {
                fold(session, delta, &self.pricing, now);
                session.clone()
            });
        if updated.is_none() {
            tracing::debug!(agent_id = %id, "Usage for unknown session dropped");
        }
        Ok(updated)
    }
}

fn fold(session: &mut AgentSession, delta: UsageDelta, pricing: &PricingTable, now: u64) {
    if let Some(model) = delta.model {
        session.model = model;
    }
    let cost = delta
        .cost
        .unwrap_or_else(|| pricing.cost(&delta.tokens, &session.model));

    let mut tokens = session.token_usage();
    tokens.add(&delta.tokens);
    session.input_tokens = tokens.input_tokens;
    session.output_tokens = tokens.output_tokens;
    session.cache_read_tokens = tokens.cache_read_input_tokens;
    session.cache_creation_tokens = tokens.cache_creation_input_tokens;
    session.total_tokens = session.total_tokens.saturating_add(delta.total_tokens);
    session.total_cost += cost;
    session.message_count = session.message_count.saturating_add(delta.messages);
    session.tool_calls.extend(delta.tool_calls);

    let elapsed = session.elapsed_at(now);
    if session.is_active() {
        session.duration = elapsed;
    }
    session.burn_rate = burn_rate(session.total_cost, elapsed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SessionPatch, SonarError};
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn setup() -> (Arc<SessionRegistry>, MetricsAggregator) {
        let registry = Arc::new(SessionRegistry::new());
        let aggregator = MetricsAggregator::new(registry.clone(), PricingTable::builtin());
        (registry, aggregator)
    }

    fn usage(input: i64, output: i64) -> UsagePayload {
        UsagePayload {
            input_tokens: input,
            output_tokens: output,
            ..Default::default()
        }
    }

    #[test]
    fn test_burn_rate_edges() {
        assert_eq!(burn_rate(1.0, 0), 0.0);
        assert_eq!(burn_rate(0.0, 5_000), 0.0);
        assert_eq!(burn_rate(10.0, 5_000), 2.0);
        assert_eq!(burn_rate(f64::INFINITY, 1_000), 0.0);
    }

    #[test]
    fn test_apply_usage_accumulates() {
        let (registry, aggregator) = setup();
        let id = registry.create();
        registry.start(&id, "t", PathBuf::from("/"), 1_000).unwrap();

        let first = UsagePayload {
            model: Some("claude-sonnet-4".into()),
            cost: Some(0.5),
            message_delta: 1,
            tool_calls: vec!["Read".into()],
            ..usage(100, 50)
        };
        aggregator.apply_usage_at(&id, first, 2_000).unwrap();

        let second = UsagePayload {
            cost: Some(0.25),
            message_delta: 2,
            tool_calls: vec!["Read".into(), "Edit".into()],
            cache_read_input_tokens: 10,
            ..usage(200, 100)
        };
        let session = aggregator
            .apply_usage_at(&id, second, 4_000)
            .unwrap()
            .unwrap();

        assert_eq!(session.input_tokens, 300);
        assert_eq!(session.output_tokens, 150);
        assert_eq!(session.cache_read_tokens, 10);
        assert_eq!(session.total_tokens, 460);
        assert_eq!(session.total_cost, 0.75);
        assert_eq!(session.message_count, 3);
        assert_eq!(session.tool_calls, vec!["Read", "Read", "Edit"]);
        assert_eq!(session.model, "claude-sonnet-4");
        assert_eq!(session.duration, 3_000);
        assert_eq!(session.burn_rate, 0.25);
    }

    #[test]
    fn test_missing_cost_uses_pricing() {
        let (registry, aggregator) = setup();
        let id = registry.create();
        registry.update(
            &id,
            SessionPatch {
                model: Some("claude-opus-4".into()),
                ..Default::default()
            },
        );

        let session = aggregator
            .apply_usage_at(&id, usage(1_000_000, 0), 0)
            .unwrap()
            .unwrap();
        // Previous model is used when the event names none
        assert!((session.total_cost - 15.0).abs() < 1e-9);
        // Never started
        assert_eq!(session.burn_rate, 0.0);
    }

    #[test]
    fn test_explicit_total_tokens_wins() {
        let (registry, aggregator) = setup();
        let id = registry.create();
        let payload = UsagePayload {
            total_tokens: Some(42),
            ..usage(10, 10)
        };
        let session = aggregator.apply_usage_at(&id, payload, 0).unwrap().unwrap();
        assert_eq!(session.total_tokens, 42);
        assert_eq!(session.input_tokens, 10);
    }

    #[test]
    fn test_malformed_payload_leaves_session_unchanged() {
        let (registry, aggregator) = setup();
        let id = registry.create();
        let before = registry.get(&id).unwrap();

        let err = aggregator
            .apply_usage_at(&id, usage(5, -5), 0)
            .unwrap_err();
        assert!(matches!(err, SonarError::MalformedUsage(_)));
        assert_eq!(registry.get(&id).unwrap(), before);
    }

    #[test]
    fn test_unknown_session_is_none() {
        let (_registry, aggregator) = setup();
        let result = aggregator
            .apply_usage_at(&AgentId::from("agent-99"), usage(1, 1), 0)
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_sessions_do_not_cross_talk() {
        let for_a: Vec<UsagePayload> = (0..5)
            .map(|i| UsagePayload {
                model: Some("claude-sonnet-4".into()),
                tool_calls: vec!["Read".into()],
                message_delta: 1,
                ..usage(100 * (i + 1), 10)
            })
            .collect();
        let for_b: Vec<UsagePayload> = (0..5)
            .map(|i| UsagePayload {
                model: Some("gpt-4o".into()),
                cost: Some(0.25),
                tool_calls: vec!["Bash".into(), "Edit".into()],
                ..usage(7, 3 * (i + 1))
            })
            .collect();

        let run = |interleave: bool| {
            let (registry, aggregator) = setup();
            let a = registry.create();
            let b = registry.create();
            registry.start(&a, "a", PathBuf::from("/a"), 0).unwrap();
            registry.start(&b, "b", PathBuf::from("/b"), 0).unwrap();
            if interleave {
                for (pa, pb) in for_a.iter().zip(&for_b) {
                    aggregator.apply_usage_at(&a, pa.clone(), 60_000).unwrap();
                    aggregator.apply_usage_at(&b, pb.clone(), 60_000).unwrap();
                }
            } else {
                for pb in &for_b {
                    aggregator.apply_usage_at(&b, pb.clone(), 60_000).unwrap();
                }
                for pa in &for_a {
                    aggregator.apply_usage_at(&a, pa.clone(), 60_000).unwrap();
                }
            }
            (registry.get(&a).unwrap(), registry.get(&b).unwrap())
        };

        let (a1, b1) = run(true);
        let (a2, b2) = run(false);
        assert_eq!(a1, a2);
        assert_eq!(b1, b2);
        assert_eq!(a1.input_tokens, 100 + 200 + 300 + 400 + 500);
        assert_eq!(a1.model, "claude-sonnet-4");
        assert_eq!(b1.model, "gpt-4o");
        assert_eq!(b1.input_tokens, 35);
    }

    #[test]
    fn test_late_usage_keeps_frozen_duration() {
        let (registry, aggregator) = setup();
        let id = registry.create();
        registry.start(&id, "t", PathBuf::from("/"), 0).unwrap();
        registry.stop(&id, 10_000).unwrap();

        let payload = UsagePayload {
            cost: Some(1.0),
            ..usage(1, 1)
        };
        let session = aggregator
            .apply_usage_at(&id, payload, 500_000)
            .unwrap()
            .unwrap();
        assert_eq!(session.duration, 10_000);
        assert_eq!(session.burn_rate, 0.1);
    }
}
