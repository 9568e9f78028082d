//! Trust-scaled token buckets for per-peer message admission.

use crate::registry::PeerRegistry;
use sdn_core::{TrustLevel, RATE_BASE_BURST, RATE_BASE_MSGS_PER_MIN, RATE_BASE_MSGS_PER_SEC};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

/// Base rates at trust Standard; per-level quotas are multiples of these.
#[derive(Clone, Copy, Debug)]
pub struct RateLimits {
    pub base_msgs_per_sec: f64,
    pub base_msgs_per_min: f64,
    pub base_burst: f64,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            base_msgs_per_sec: RATE_BASE_MSGS_PER_SEC,
            base_msgs_per_min: RATE_BASE_MSGS_PER_MIN,
            base_burst: RATE_BASE_BURST,
        }
    }
}

impl RateLimits {
    /// Effective (msgs/s, msgs/min, burst) for a trust level.
    pub fn for_level(&self, level: TrustLevel) -> (f64, f64, f64) {
        let (rate_mult, burst_mult) = match level {
            TrustLevel::Untrusted => (0.0, 0.0),
            TrustLevel::Limited => (0.1, 0.2),
            TrustLevel::Standard => (1.0, 1.0),
            TrustLevel::Trusted => (10.0, 2.0),
            TrustLevel::Admin => (100.0, 10.0),
        };
        (
            self.base_msgs_per_sec * rate_mult,
            self.base_msgs_per_min * rate_mult,
            self.base_burst * burst_mult,
        )
    }
}

/// A token bucket whose rate and capacity are supplied at consume time, so a
/// trust-level change reshapes the bucket on the next call without any
/// migration step.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn full(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_update: now,
        }
    }

    fn try_consume(&mut self, rate_per_sec: f64, capacity: f64, now: Instant) -> bool {
        // Instant is monotonic, but saturate anyway so a zero elapsed cannot
        // turn into negative debt through float error.
        let elapsed = now
            .saturating_duration_since(self.last_update)
            .as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate_per_sec).min(capacity);
        self.last_update = now;
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[derive(Debug)]
struct PeerBuckets {
    per_sec: TokenBucket,
    per_min: TokenBucket,
}

/// Per-peer dual token buckets dimensioned by the registry's current trust
/// level. `allow` never blocks.
pub struct RateLimiter {
    registry: Arc<PeerRegistry>,
    limits: RateLimits,
    buckets: RwLock<HashMap<String, Mutex<PeerBuckets>>>,
}

impl RateLimiter {
    pub fn new(registry: Arc<PeerRegistry>, limits: RateLimits) -> Self {
        Self {
            registry,
            limits,
            buckets: RwLock::new(HashMap::new()),
        }
    }

    /// Whether `peer_id` may send one message right now. False when either
    /// the per-second or the per-minute bucket is empty.
    pub fn allow(&self, peer_id: &str) -> bool {
        self.allow_at(peer_id, Instant::now())
    }

    fn allow_at(&self, peer_id: &str, now: Instant) -> bool {
        let level = self.registry.effective_trust(peer_id);
        let (msgs_per_sec, msgs_per_min, burst) = self.limits.for_level(level);
        if msgs_per_sec <= 0.0 || burst < 1.0 {
            return false;
        }

        {
            let map = self.buckets.read().expect("rate limiter lock poisoned");
            if let Some(entry) = map.get(peer_id) {
                return Self::consume(entry, msgs_per_sec, msgs_per_min, burst, now);
            }
        }

        let mut map = self.buckets.write().expect("rate limiter lock poisoned");
        let entry = map.entry(peer_id.to_string()).or_insert_with(|| {
            Mutex::new(PeerBuckets {
                per_sec: TokenBucket::full(burst, now),
                per_min: TokenBucket::full(msgs_per_min, now),
            })
        });
        Self::consume(entry, msgs_per_sec, msgs_per_min, burst, now)
    }

    fn consume(
        entry: &Mutex<PeerBuckets>,
        msgs_per_sec: f64,
        msgs_per_min: f64,
        burst: f64,
        now: Instant,
    ) -> bool {
        let mut buckets = entry.lock().expect("peer bucket lock poisoned");
        // Both buckets must have room; probe the per-second bucket first and
        // only then charge the per-minute one, so a refused call burns
        // neither budget.
        if buckets.tokens_available(msgs_per_sec, burst, now) < 1.0 {
            return false;
        }
        if !buckets
            .per_min
            .try_consume(msgs_per_min / 60.0, msgs_per_min, now)
        {
            return false;
        }
        buckets.per_sec.try_consume(msgs_per_sec, burst, now)
    }

    /// Drop bucket state for a departed peer.
    pub fn forget(&self, peer_id: &str) {
        self.buckets
            .write()
            .expect("rate limiter lock poisoned")
            .remove(peer_id);
    }
}

impl PeerBuckets {
    fn tokens_available(&mut self, rate_per_sec: f64, capacity: f64, now: Instant) -> f64 {
        let elapsed = now
            .saturating_duration_since(self.per_sec.last_update)
            .as_secs_f64();
        (self.per_sec.tokens + elapsed * rate_per_sec).min(capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::MemoryStore;
    use crate::registry::{AdmissionMode, PeerRecord};
    use std::time::Duration;

    fn setup(level: TrustLevel, limits: RateLimits) -> RateLimiter {
        let registry = Arc::new(
            PeerRegistry::open(Box::new(MemoryStore::new()), AdmissionMode::NonStrict).unwrap(),
        );
        registry.add_peer(PeerRecord::new("P", level, 0)).unwrap();
        RateLimiter::new(registry, limits)
    }

    #[test]
    fn untrusted_peers_get_nothing() {
        let limiter = setup(TrustLevel::Untrusted, RateLimits::default());
        assert!(!limiter.allow("P"));
    }

    #[test]
    fn limited_burst_is_twenty_at_base_100() {
        // Base 100 msg/s: Limited scales to 10 msg/s with burst 20.
        let limits = RateLimits {
            base_msgs_per_sec: 100.0,
            base_msgs_per_min: 6_000.0,
            base_burst: 100.0,
        };
        let limiter = setup(TrustLevel::Limited, limits);
        let start = Instant::now();
        // 21 frames inside 100 ms: exactly the burst of 20 is admitted.
        let mut accepted = 0;
        for i in 0..21 {
            let at = start + Duration::from_millis(i * 4);
            if limiter.allow_at("P", at) {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 20);
        assert!(!limiter.allow_at("P", start + Duration::from_millis(90)));
    }

    #[test]
    fn bucket_refills_over_time() {
        let limits = RateLimits {
            base_msgs_per_sec: 10.0,
            base_msgs_per_min: 600.0,
            base_burst: 2.0,
        };
        let limiter = setup(TrustLevel::Standard, limits);
        let start = Instant::now();
        assert!(limiter.allow_at("P", start));
        assert!(limiter.allow_at("P", start));
        assert!(!limiter.allow_at("P", start));
        // 10 msg/s refill: one token back after 100 ms.
        assert!(limiter.allow_at("P", start + Duration::from_millis(110)));
    }

    #[test]
    fn minute_quota_caps_sustained_rate() {
        // Per-second budget generous, per-minute budget tiny.
        let limits = RateLimits {
            base_msgs_per_sec: 1_000.0,
            base_msgs_per_min: 5.0,
            base_burst: 1_000.0,
        };
        let limiter = setup(TrustLevel::Standard, limits);
        let start = Instant::now();
        let accepted = (0..50)
            .filter(|i| limiter.allow_at("P", start + Duration::from_millis(i * 10)))
            .count();
        assert_eq!(accepted, 5);
    }

    #[test]
    fn trust_change_resizes_on_next_allow() {
        let limits = RateLimits {
            base_msgs_per_sec: 10.0,
            base_msgs_per_min: 600.0,
            base_burst: 4.0,
        };
        let limiter = setup(TrustLevel::Standard, limits);
        let start = Instant::now();
        for _ in 0..4 {
            assert!(limiter.allow_at("P", start));
        }
        assert!(!limiter.allow_at("P", start));

        // Demote to Untrusted: no rebuild, next allow sees the new quota.
        limiter
            .registry
            .set_trust_level("P", TrustLevel::Untrusted)
            .unwrap();
        assert!(!limiter.allow_at("P", start + Duration::from_secs(60)));

        // Promote to Trusted: the larger bucket applies immediately.
        limiter
            .registry
            .set_trust_level("P", TrustLevel::Trusted)
            .unwrap();
        assert!(limiter.allow_at("P", start + Duration::from_secs(61)));
    }

    #[test]
    fn refused_call_charges_no_budget() {
        let limits = RateLimits {
            base_msgs_per_sec: 10.0,
            base_msgs_per_min: 2.0,
            base_burst: 10.0,
        };
        let limiter = setup(TrustLevel::Standard, limits);
        let start = Instant::now();
        assert!(limiter.allow_at("P", start));
        assert!(limiter.allow_at("P", start));
        // Minute quota exhausted; hammering must not push recovery further out.
        for i in 0..10 {
            assert!(!limiter.allow_at("P", start + Duration::from_millis(i * 5)));
        }
        // One minute later a full minute of quota has refilled.
        assert!(limiter.allow_at("P", start + Duration::from_secs(61)));
    }

    #[test]
    fn unknown_peer_uses_default_trust() {
        let registry = Arc::new(
            PeerRegistry::open(Box::new(MemoryStore::new()), AdmissionMode::NonStrict).unwrap(),
        );
        let limiter = RateLimiter::new(registry, RateLimits::default());
        // Non-strict: unknown peers rate as Standard.
        assert!(limiter.allow("ghost"));
    }
}
