//! # Health result cache entry.
//!
//! Expiry is `completion + ttl`. A lookup at or before expiry is a hit; a lookup
//! strictly after it is a miss and the entry is dropped on the spot.

use std::time::Duration;

use tokio::time::Instant;

use crate::model::HealthResult;

#[derive(Clone, Debug)]
pub struct CacheEntry {
    result: HealthResult,
    expires_at: Instant,
}

impl CacheEntry {
    pub fn new(result: HealthResult, ttl: Duration, completed_at: Instant) -> Self {
        Self {
            result,
            expires_at: completed_at + ttl,
        }
    }

    pub fn is_live(&self, now: Instant) -> bool {
        now <= self.expires_at
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    pub fn result(&self) -> &HealthResult {
        &self.result
    }
}

/// Returns the cached result if live, evicting an expired entry.
pub(crate) fn lookup(slot: &mut Option<CacheEntry>, now: Instant) -> Option<HealthResult> {
    match slot {
        Some(entry) if entry.is_live(now) => Some(entry.result.clone()),
        Some(_) => {
            *slot = None;
            None
        }
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_within_ttl_miss_strictly_after() {
        let t0 = Instant::now();
        let ttl = Duration::from_secs(10);
        let cached = HealthResult::healthy(Duration::from_millis(3));
        let mut slot = Some(CacheEntry::new(cached.clone(), ttl, t0));

        assert_eq!(lookup(&mut slot, t0), Some(cached.clone()));
        assert_eq!(lookup(&mut slot, t0 + ttl), Some(cached));
        assert!(slot.is_some());

        assert_eq!(lookup(&mut slot, t0 + ttl + Duration::from_nanos(1)), None);
        assert!(slot.is_none(), "expired entry is evicted lazily");
    }
}
