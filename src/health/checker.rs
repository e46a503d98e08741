//! # HealthChecker: gated, per-service health checks.
//!
//! ```text
//! check(service, spec)
//!   ├─ liveness says `stopped`   ─► unknown "service stopped"       (no probe)
//!   ├─ cache live hit            ─► cached result                   (no probe)
//!   ├─ breaker denies            ─► unhealthy "circuit open"        (no token used)
//!   ├─ bucket empty              ─► unknown "rate limited"          (not a failure)
//!   ├─ probe under timeout
//!   └─ record into breaker + cache, publish HealthChecked
//! ```
//!
//! Breaker, bucket and cache live in one slot per service behind that service's
//! own lock; the lock is never held across the probe. Unrelated services never
//! contend. Every gate is opt-in: with the defaults this is a plain
//! check-and-report loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::breaker::{BreakerState, CircuitBreaker, Permit};
use super::cache::{self, CacheEntry};
use super::limiter::TokenBucket;
use super::probe::{LivenessSource, Probe, StrategyProbe};
use crate::config::{BreakerConfig, Config};
use crate::error::CheckError;
use crate::events::{Bus, Event, EventKind};
use crate::model::{HealthCheckSpec, HealthResult, LifecycleState};

#[derive(Default)]
struct Slot {
    breaker: Option<CircuitBreaker>,
    bucket: Option<TokenBucket>,
    cache: Option<CacheEntry>,
}

impl Slot {
    fn breaker_state(&self) -> Option<BreakerState> {
        self.breaker.as_ref().map(CircuitBreaker::state)
    }
}

/// Executes health checks gated by circuit breaker, rate limiter and cache.
pub struct HealthChecker {
    probe: Arc<dyn Probe>,
    liveness: Option<Arc<dyn LivenessSource>>,
    bus: Option<Bus>,
    breaker: Option<BreakerConfig>,
    rate: Option<(f64, u32)>,
    cache_ttl: Option<Duration>,
    timeout: Duration,
    slots: RwLock<HashMap<String, Arc<Mutex<Slot>>>>,
}

/// Builder for [`HealthChecker`].
pub struct HealthCheckerBuilder {
    cfg: Config,
    probe: Option<Arc<dyn Probe>>,
    liveness: Option<Arc<dyn LivenessSource>>,
    bus: Option<Bus>,
}

impl HealthCheckerBuilder {
    /// Replaces the built-in strategy dispatcher.
    pub fn with_probe(mut self, probe: Arc<dyn Probe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Enables process checks and the "stopped services are not probed" rule.
    pub fn with_liveness(mut self, liveness: Arc<dyn LivenessSource>) -> Self {
        self.liveness = Some(liveness);
        self
    }

    /// Publishes `HealthChecked` and breaker transitions on `bus`.
    pub fn with_bus(mut self, bus: Bus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Builds the checker; gates disabled in the config stay off.
    pub fn build(self) -> HealthChecker {
        let probe = self
            .probe
            .unwrap_or_else(|| Arc::new(StrategyProbe::new(self.liveness.clone())));
        HealthChecker {
            probe,
            liveness: self.liveness,
            bus: self.bus,
            breaker: self.cfg.breaker(),
            rate: self.cfg.rate_limit(),
            cache_ttl: self.cfg.cache_ttl(),
            timeout: self.cfg.check_timeout,
            slots: RwLock::new(HashMap::new()),
        }
    }
}

impl HealthChecker {
    /// Starts a builder using the gate settings of `cfg`.
    pub fn builder(cfg: Config) -> HealthCheckerBuilder {
        HealthCheckerBuilder {
            cfg,
            probe: None,
            liveness: None,
            bus: None,
        }
    }

    /// Runs one gated check for `service`.
    pub async fn check(&self, service: &str, spec: &HealthCheckSpec) -> HealthResult {
        if let Some(liveness) = &self.liveness {
            if let Some((LifecycleState::Stopped, _)) = liveness.lifecycle(service).await {
                return HealthResult::unknown("service stopped");
            }
        }

        let timeout = spec.timeout.unwrap_or(self.timeout);
        let slot = self.slot(service).await;
        let permit = {
            let mut st = slot.lock().await;
            let now = Instant::now();
            if let Some(hit) = cache::lookup(&mut st.cache, now) {
                debug!(service, "health cache hit");
                return hit;
            }

            let before = st.breaker_state();
            let permit = st
                .breaker
                .as_mut()
                .map_or(Permit::Allowed, |b| b.permit(now, timeout));
            self.note_transition(service, before, st.breaker_state());
            if permit == Permit::Denied {
                return HealthResult::from_error(&CheckError::CircuitOpen, Duration::ZERO);
            }

            if let Some(bucket) = st.bucket.as_mut() {
                if !bucket.try_acquire(now) {
                    if let Some(b) = st.breaker.as_mut() {
                        b.abandon_trial();
                    }
                    debug!(service, "health check rate limited");
                    return HealthResult::from_error(&CheckError::RateLimited, Duration::ZERO);
                }
            }
            permit
        };

        let started = Instant::now();
        let outcome = time::timeout(timeout, self.probe.check(service, &spec.strategy))
            .await
            .unwrap_or(Err(CheckError::Timeout { timeout }));
        let latency = started.elapsed();

        let result = match &outcome {
            Ok(()) => HealthResult::healthy(latency),
            Err(e) => HealthResult::from_error(e, latency),
        };

        {
            let mut st = slot.lock().await;
            let now = Instant::now();
            let before = st.breaker_state();
            if let Some(b) = st.breaker.as_mut() {
                match &outcome {
                    Ok(()) => b.on_success(now),
                    Err(e) if e.is_failure() => b.on_failure(now),
                    Err(_) => b.abandon_trial(),
                }
            }
            self.note_transition(service, before, st.breaker_state());
            if let Some(ttl) = self.cache_ttl {
                st.cache = Some(CacheEntry::new(result.clone(), ttl, now));
            }
        }

        debug!(
            service,
            strategy = spec.strategy.as_label(),
            status = %result.status,
            latency_ms = latency.as_millis() as u64,
            trial = permit == Permit::Trial,
            error = result.error.as_deref().unwrap_or(""),
            "health checked"
        );
        self.publish(
            Event::now(EventKind::HealthChecked)
                .with_service(service)
                .with_health(result.clone()),
        );
        result
    }

    /// Checks `service` every `interval` until `token` is cancelled.
    ///
    /// A failed check never ends the loop. Cancellation interrupts an
    /// in-flight probe.
    pub async fn watch<F>(
        &self,
        service: &str,
        spec: &HealthCheckSpec,
        interval: Duration,
        token: CancellationToken,
        mut on_result: F,
    ) where
        F: FnMut(&HealthResult) + Send,
    {
        self.publish(Event::now(EventKind::MonitorStarted).with_service(service));
        debug!(service, interval_ms = interval.as_millis() as u64, "health monitor started");

        let mut ticker = time::interval(interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            tokio::select! {
                _ = token.cancelled() => break,
                result = self.check(service, spec) => on_result(&result),
            }
        }

        debug!(service, "health monitor stopped");
        self.publish(Event::now(EventKind::MonitorStopped).with_service(service));
    }

    /// Current breaker state of `service`, `None` if disabled or never checked.
    pub async fn breaker_state(&self, service: &str) -> Option<BreakerState> {
        let slot = self.slots.read().await.get(service).cloned()?;
        let st = slot.lock().await;
        st.breaker_state()
    }

    /// Drops breaker, bucket and cache state of `service`.
    pub async fn forget(&self, service: &str) {
        self.slots.write().await.remove(service);
    }

    async fn slot(&self, service: &str) -> Arc<Mutex<Slot>> {
        if let Some(slot) = self.slots.read().await.get(service) {
            return Arc::clone(slot);
        }
        let mut slots = self.slots.write().await;
        let slot = slots.entry(service.to_string()).or_insert_with(|| {
            let now = Instant::now();
            Arc::new(Mutex::new(Slot {
                breaker: self
                    .breaker
                    .map(|b| CircuitBreaker::new(b.failure_threshold, b.recovery_timeout, now)),
                bucket: self
                    .rate
                    .map(|(rate, burst)| TokenBucket::new(rate, burst, now)),
                cache: None,
            }))
        });
        Arc::clone(slot)
    }

    fn note_transition(
        &self,
        service: &str,
        before: Option<BreakerState>,
        after: Option<BreakerState>,
    ) {
        if let (Some(from), Some(to)) = (before, after) {
            if from != to {
                info!(service, %from, %to, "circuit breaker state changed");
                self.publish(
                    Event::now(EventKind::BreakerTransition)
                        .with_service(service)
                        .with_breaker(to),
                );
            }
        }
    }

    fn publish(&self, ev: Event) {
        if let Some(bus) = &self.bus {
            bus.publish(ev);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HealthStatus, HealthStrategy};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Probe returning scripted outcomes and counting calls.
    struct Scripted {
        calls: AtomicUsize,
        outcomes: std::sync::Mutex<Vec<Result<(), CheckError>>>,
    }

    impl Scripted {
        fn new(outcomes: Vec<Result<(), CheckError>>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                outcomes: std::sync::Mutex::new(outcomes),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Probe for Scripted {
        async fn check(&self, _: &str, _: &HealthStrategy) -> Result<(), CheckError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut outcomes = self.outcomes.lock().unwrap();
            if outcomes.len() > 1 {
                outcomes.remove(0)
            } else {
                outcomes.first().cloned().unwrap_or(Ok(()))
            }
        }
    }

    struct Hang;

    #[async_trait]
    impl Probe for Hang {
        async fn check(&self, _: &str, _: &HealthStrategy) -> Result<(), CheckError> {
            std::future::pending().await
        }
    }

    fn refused() -> Result<(), CheckError> {
        Err(CheckError::ConnectionRefused {
            reason: "test".into(),
        })
    }

    fn spec() -> HealthCheckSpec {
        HealthCheckSpec::tcp("127.0.0.1:9")
    }

    fn breaker_cfg(threshold: u32, recovery: Duration) -> Config {
        Config {
            breaker: BreakerConfig {
                enabled: true,
                failure_threshold: threshold,
                recovery_timeout: recovery,
            },
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn defaults_probe_every_time() {
        let probe = Scripted::new(vec![Ok(()), refused(), Ok(())]);
        let checker = HealthChecker::builder(Config::default())
            .with_probe(probe.clone())
            .build();

        assert!(checker.check("api", &spec()).await.is_healthy());
        assert_eq!(checker.check("api", &spec()).await.status, HealthStatus::Unhealthy);
        assert!(checker.check("api", &spec()).await.is_healthy());
        assert_eq!(probe.calls(), 3);
        assert_eq!(checker.breaker_state("api").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn open_breaker_skips_probe_until_recovery() {
        let recovery = Duration::from_secs(10);
        let probe = Scripted::new(vec![refused(), refused(), Ok(())]);
        let checker = HealthChecker::builder(breaker_cfg(2, recovery))
            .with_probe(probe.clone())
            .build();

        checker.check("api", &spec()).await;
        checker.check("api", &spec()).await;
        assert_eq!(checker.breaker_state("api").await, Some(BreakerState::Open));

        let short = checker.check("api", &spec()).await;
        assert_eq!(short.status, HealthStatus::Unhealthy);
        assert_eq!(short.error.as_deref(), Some("circuit open"));
        assert_eq!(probe.calls(), 2);

        time::advance(recovery).await;
        assert!(checker.check("api", &spec()).await.is_healthy());
        assert_eq!(probe.calls(), 3);
        assert_eq!(checker.breaker_state("api").await, Some(BreakerState::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_is_unknown_and_not_a_failure() {
        let probe = Scripted::new(vec![refused()]);
        let cfg = Config {
            rate_limit: 1.0,
            rate_burst: 1,
            ..breaker_cfg(2, Duration::from_secs(60))
        };
        let checker = HealthChecker::builder(cfg).with_probe(probe.clone()).build();

        assert_eq!(checker.check("api", &spec()).await.status, HealthStatus::Unhealthy);
        for _ in 0..5 {
            let r = checker.check("api", &spec()).await;
            assert_eq!(r.status, HealthStatus::Unknown);
            assert_eq!(r.error.as_deref(), Some("rate limited"));
        }
        assert_eq!(probe.calls(), 1);
        assert_eq!(checker.breaker_state("api").await, Some(BreakerState::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn open_circuit_does_not_consume_tokens() {
        let probe = Scripted::new(vec![refused(), Ok(())]);
        let cfg = Config {
            rate_limit: 0.001,
            rate_burst: 2,
            ..breaker_cfg(1, Duration::from_secs(5))
        };
        let checker = HealthChecker::builder(cfg).with_probe(probe.clone()).build();

        checker.check("api", &spec()).await;
        for _ in 0..10 {
            assert_eq!(
                checker.check("api", &spec()).await.error.as_deref(),
                Some("circuit open")
            );
        }
        time::advance(Duration::from_secs(5)).await;
        assert!(checker.check("api", &spec()).await.is_healthy());
        assert_eq!(probe.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cache_serves_within_ttl() {
        let probe = Scripted::new(vec![Ok(())]);
        let cfg = Config {
            cache_ttl: Duration::from_secs(5),
            ..Config::default()
        };
        let checker = HealthChecker::builder(cfg).with_probe(probe.clone()).build();

        let first = checker.check("api", &spec()).await;
        time::advance(Duration::from_secs(5)).await;
        assert_eq!(checker.check("api", &spec()).await, first);
        assert_eq!(probe.calls(), 1);

        time::advance(Duration::from_millis(1)).await;
        checker.check("api", &spec()).await;
        assert_eq!(probe.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn probe_timeout_counts_as_failure() {
        let cfg = Config {
            check_timeout: Duration::from_millis(200),
            ..breaker_cfg(1, Duration::from_secs(60))
        };
        let checker = HealthChecker::builder(cfg).with_probe(Arc::new(Hang)).build();

        let r = checker.check("api", &spec()).await;
        assert_eq!(r.status, HealthStatus::Unhealthy);
        assert!(r.error.unwrap_or_default().contains("timed out"));
        assert_eq!(checker.breaker_state("api").await, Some(BreakerState::Open));
    }

    #[tokio::test]
    async fn services_are_independent() {
        let probe = Scripted::new(vec![refused()]);
        let checker = HealthChecker::builder(breaker_cfg(1, Duration::from_secs(60)))
            .with_probe(probe)
            .build();
        checker.check("api", &spec()).await;
        assert_eq!(checker.breaker_state("api").await, Some(BreakerState::Open));
        assert_eq!(checker.breaker_state("web").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn watch_survives_failures_and_stops_on_cancel() {
        let probe = Scripted::new(vec![refused(), refused(), Ok(())]);
        let checker = Arc::new(
            HealthChecker::builder(Config::default())
                .with_probe(probe.clone())
                .build(),
        );
        let token = CancellationToken::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let handle = tokio::spawn({
            let checker = Arc::clone(&checker);
            let token = token.clone();
            async move {
                checker
                    .watch("api", &spec(), Duration::from_secs(1), token, |r| {
                        let _ = tx.send(r.status);
                    })
                    .await
            }
        });

        assert_eq!(rx.recv().await, Some(HealthStatus::Unhealthy));
        assert_eq!(rx.recv().await, Some(HealthStatus::Unhealthy));
        assert_eq!(rx.recv().await, Some(HealthStatus::Healthy));

        token.cancel();
        handle.await.unwrap();
        while let Some(status) = rx.recv().await {
            assert_eq!(status, HealthStatus::Healthy);
        }
    }

    /// Fails once, stalls on the second call, then passes.
    struct StallSecond {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Probe for StallSecond {
        async fn check(&self, _: &str, _: &HealthStrategy) -> Result<(), CheckError> {
            match self.calls.fetch_add(1, Ordering::SeqCst) {
                0 => refused(),
                1 => std::future::pending().await,
                _ => Ok(()),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_trial_does_not_wedge_the_breaker() {
        let recovery = Duration::from_secs(10);
        let cfg = Config {
            check_timeout: Duration::from_secs(2),
            ..breaker_cfg(1, recovery)
        };
        let probe = Arc::new(StallSecond {
            calls: AtomicUsize::new(0),
        });
        let checker = HealthChecker::builder(cfg).with_probe(probe.clone()).build();

        checker.check("api", &spec()).await;
        assert_eq!(checker.breaker_state("api").await, Some(BreakerState::Open));
        time::advance(recovery).await;

        let trial = time::timeout(Duration::from_secs(1), checker.check("api", &spec())).await;
        assert!(trial.is_err());
        assert_eq!(checker.breaker_state("api").await, Some(BreakerState::HalfOpen));
        assert_eq!(
            checker.check("api", &spec()).await.error.as_deref(),
            Some("circuit open")
        );
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);

        time::advance(Duration::from_secs(2)).await;
        assert!(checker.check("api", &spec()).await.is_healthy());
        assert_eq!(probe.calls.load(Ordering::SeqCst), 3);
        assert_eq!(checker.breaker_state("api").await, Some(BreakerState::Closed));
    }
}
