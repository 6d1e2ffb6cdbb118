#![allow(clippy::unwrap_used)]

use async_trait::async_trait;
use finboard_cache::{CacheStore, DurableStore, MemoryStore};
use finboard_core::config::{AppConfig, CacheConfig, InvalidationConfig};
use finboard_core::{CacheResult, FilterSet, ManualClock, Namespace};
use finboard_dashboard::{
    ComputeCapability, ComputeError, ComputeOrchestrator, ComputeOutcome, DashboardRequest,
    DashboardResponse, ResponseStatus, StaleStrategy,
};
use finboard_invalidation::InvalidationRegistry;
use finboard_jobs::{JobStatus, RetryPolicy, TokioJobRunner};
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct CountingCompute {
    calls: AtomicUsize,
    delay: Duration,
    fail: AtomicBool,
    transient_failures: AtomicUsize,
    panics: AtomicBool,
    partial: Option<Value>,
}

impl CountingCompute {
    fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ComputeCapability for CountingCompute {
    async fn compute(&self, namespace: &Namespace, filters: &FilterSet) -> ComputeOutcome {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.panics.load(Ordering::SeqCst) {
            panic!("aging bucket overflow");
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(ComputeError::permanent("ledger query failed"));
        }
        if self.transient_failures.load(Ordering::SeqCst) >= call {
            return Err(ComputeError::transient("database timeout"));
        }
        Ok(json!({
            "namespace": namespace.as_str(),
            "filters": filters.len(),
            "call": call,
        }))
    }

    async fn compute_partial(&self, _namespace: &Namespace, _filters: &FilterSet) -> Option<Value> {
        self.partial.clone()
    }
}

/// Durable tier whose reads take 0-30 ms, like a loaded Redis.
struct SlowReads {
    inner: Arc<MemoryStore>,
    reads: AtomicU64,
}

#[async_trait]
impl DurableStore for SlowReads {
    fn name(&self) -> &'static str {
        "slow-reads"
    }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let n = self.reads.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(n * 7 % 31)).await;
        self.inner.get(key).await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        self.inner.set_ex(key, value, ttl).await
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool> {
        self.inner.set_nx_ex(key, value, ttl).await
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        self.inner.exists(key).await
    }

    async fn delete(&self, keys: &[String]) -> CacheResult<u64> {
        self.inner.delete(keys).await
    }

    async fn delete_if_eq(&self, key: &str, expected: &str) -> CacheResult<bool> {
        self.inner.delete_if_eq(key, expected).await
    }

    async fn scan(&self, pattern: &str) -> CacheResult<Vec<String>> {
        self.inner.scan(pattern).await
    }

    async fn ping(&self) -> bool {
        self.inner.ping().await
    }
}

struct Harness {
    clock: Arc<ManualClock>,
    durable: Arc<MemoryStore>,
    store: Arc<CacheStore>,
    compute: Arc<CountingCompute>,
}

impl Harness {
    fn new(compute: CountingCompute) -> Self {
        let clock = Arc::new(ManualClock::starting_now());
        let durable = Arc::new(MemoryStore::new(clock.clone()));
        let store = Arc::new(CacheStore::new(Some(durable.clone()), clock.clone(), 1_000));
        Self {
            clock,
            durable,
            store,
            compute: Arc::new(compute),
        }
    }

    fn with_slow_reads(compute: CountingCompute) -> Self {
        let clock = Arc::new(ManualClock::starting_now());
        let durable = Arc::new(MemoryStore::new(clock.clone()));
        let slow = Arc::new(SlowReads {
            inner: durable.clone(),
            reads: AtomicU64::new(0),
        });
        let store = Arc::new(CacheStore::new(Some(slow), clock.clone(), 1_000));
        Self {
            clock,
            durable,
            store,
            compute: Arc::new(compute),
        }
    }

    fn inline(&self) -> ComputeOrchestrator {
        ComputeOrchestrator::new(self.store.clone(), self.compute.clone(), CacheConfig::default())
    }

    fn background(&self, policy: RetryPolicy) -> (ComputeOrchestrator, Arc<TokioJobRunner>) {
        let runner = Arc::new(TokioJobRunner::new(4, policy));
        let orchestrator = self.inline().with_runner(runner.clone());
        (orchestrator, runner)
    }
}

fn kpis_request(mes: &str) -> DashboardRequest {
    DashboardRequest::new(Namespace::KPIS, FilterSet::new().with("mes", mes))
}

async fn wait_for_job(orchestrator: &ComputeOrchestrator, response: &DashboardResponse) -> JobStatus {
    let job = response.job_ref.as_ref().unwrap();
    orchestrator.wait_for(job.id).await.unwrap()
}

#[tokio::test]
async fn test_concurrent_callers_compute_once_inline() {
    let h = Harness::new(CountingCompute::slow(Duration::from_millis(50)));
    let orchestrator = h.inline();

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let orchestrator = orchestrator.clone();
        tasks.push(tokio::spawn(async move {
            orchestrator.get_or_compute(kpis_request("2024-01")).await
        }));
    }
    let mut computed = 0;
    for task in tasks {
        let response = task.await.unwrap();
        match response.status {
            ResponseStatus::Computed => computed += 1,
            ResponseStatus::Processing | ResponseStatus::Fresh => {}
            other => panic!("unexpected status {other:?}"),
        }
    }
    assert_eq!(computed, 1);
    assert_eq!(h.compute.calls(), 1);
}

#[tokio::test]
async fn test_concurrent_misses_with_slow_durable_reads_compute_once() {
    let h = Harness::with_slow_reads(CountingCompute::slow(Duration::from_millis(5)));
    let orchestrator = h.inline();

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let orchestrator = orchestrator.clone();
        tasks.push(tokio::spawn(async move {
            orchestrator.get_or_compute(kpis_request("2024-02")).await
        }));
    }
    let mut computed = 0;
    for task in tasks {
        let response = task.await.unwrap();
        match response.status {
            ResponseStatus::Computed => computed += 1,
            ResponseStatus::Processing | ResponseStatus::Fresh => {}
            other => panic!("unexpected status {other:?}"),
        }
    }
    assert_eq!(computed, 1);
    assert_eq!(h.compute.calls(), 1);
}

#[tokio::test]
async fn test_concurrent_callers_compute_once_in_background() {
    let h = Harness::new(CountingCompute::slow(Duration::from_millis(20)));
    let (orchestrator, _runner) = h.background(RetryPolicy::none());

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let orchestrator = orchestrator.clone();
        tasks.push(tokio::spawn(async move {
            orchestrator.get_or_compute(kpis_request("2024-02")).await
        }));
    }
    let mut responses = Vec::new();
    for task in tasks {
        responses.push(task.await.unwrap());
    }
    assert!(responses.iter().all(|r| r.status == ResponseStatus::Processing));

    let submitted = responses.iter().find(|r| r.job_ref.is_some()).unwrap();
    assert_eq!(
        wait_for_job(&orchestrator, submitted).await,
        JobStatus::Succeeded { attempts: 1 }
    );

    let response = orchestrator.get_or_compute(kpis_request("2024-02")).await;
    assert_eq!(response.status, ResponseStatus::Fresh);
    assert_eq!(h.compute.calls(), 1);
}

#[tokio::test]
async fn test_filter_order_shares_one_entry() {
    let h = Harness::new(CountingCompute::default());
    let orchestrator = h.inline();

    let first = DashboardRequest::new(
        Namespace::AGING,
        FilterSet::new().with("estado", "pendiente").with("mes", "2024-03"),
    );
    let second = DashboardRequest::new(
        Namespace::AGING,
        FilterSet::new().with("mes", "2024-03").with("estado", "pendiente"),
    );
    assert_eq!(first.cache_key(), second.cache_key());

    let computed = orchestrator.get_or_compute(first).await;
    assert_eq!(computed.status, ResponseStatus::Computed);
    let hit = orchestrator.get_or_compute(second).await;
    assert_eq!(hit.status, ResponseStatus::Fresh);
    assert_eq!(hit.payload, computed.payload);
    assert_eq!(hit.cache_key, computed.cache_key);
    assert_eq!(h.compute.calls(), 1);
}

#[tokio::test]
async fn test_max_age_decides_stale_versus_fresh() {
    let h = Harness::new(CountingCompute::default());
    let (orchestrator, _runner) = h.background(RetryPolicy::none());

    let first = orchestrator.get_or_compute(kpis_request("2024-04")).await;
    assert_eq!(first.status, ResponseStatus::Processing);
    wait_for_job(&orchestrator, &first).await;

    h.clock.advance(Duration::from_secs(45));

    let unbounded = orchestrator.get_or_compute(kpis_request("2024-04")).await;
    assert_eq!(unbounded.status, ResponseStatus::Fresh);
    assert_eq!(unbounded.age_seconds, Some(45));
    assert!(!unbounded.stale_hint);

    let tolerant = orchestrator
        .get_or_compute(kpis_request("2024-04").max_age(Duration::from_secs(60)))
        .await;
    assert_eq!(tolerant.status, ResponseStatus::Fresh);

    let strict = orchestrator
        .get_or_compute(kpis_request("2024-04").max_age(Duration::from_secs(30)))
        .await;
    assert_eq!(strict.status, ResponseStatus::Stale);
    assert_eq!(strict.age_seconds, Some(45));
    assert!(strict.payload.is_some());

    // The stale answer kicked off a refresh.
    let refresh = wait_for_job(&orchestrator, &strict).await;
    assert_eq!(refresh, JobStatus::Succeeded { attempts: 1 });
    assert_eq!(h.compute.calls(), 2);
}

#[tokio::test]
async fn test_telemetry_hint_is_independent_of_max_age() {
    let h = Harness::new(CountingCompute::default());
    let orchestrator = h.inline();
    orchestrator.get_or_compute(kpis_request("2024-05")).await;

    h.clock.advance(Duration::from_secs(90));
    let response = orchestrator
        .get_or_compute(kpis_request("2024-05").max_age(Duration::from_secs(120)))
        .await;
    assert_eq!(response.status, ResponseStatus::Fresh);
    assert!(response.stale_hint);
}

#[tokio::test]
async fn test_stale_without_runner_recomputes_inline() {
    let h = Harness::new(CountingCompute::default());
    let orchestrator = h.inline();
    orchestrator.get_or_compute(kpis_request("2024-06")).await;

    h.clock.advance(Duration::from_secs(45));
    let response = orchestrator
        .get_or_compute(kpis_request("2024-06").max_age(Duration::from_secs(30)))
        .await;
    assert_eq!(response.status, ResponseStatus::Computed);
    assert_eq!(response.age_seconds, Some(0));
    assert_eq!(h.compute.calls(), 2);
}

#[tokio::test]
async fn test_recompute_strategy_blocks_even_with_runner() {
    let h = Harness::new(CountingCompute::default());
    let (orchestrator, _runner) = h.background(RetryPolicy::none());
    let first = orchestrator.get_or_compute(kpis_request("2024-07")).await;
    wait_for_job(&orchestrator, &first).await;

    h.clock.advance(Duration::from_secs(45));
    let response = orchestrator
        .get_or_compute(
            kpis_request("2024-07")
                .max_age(Duration::from_secs(30))
                .stale_strategy(StaleStrategy::Recompute),
        )
        .await;
    assert_eq!(response.status, ResponseStatus::Computed);
    assert_eq!(h.compute.calls(), 2);
}

#[tokio::test]
async fn test_cached_error_suppresses_recompute() {
    let h = Harness::new(CountingCompute::default());
    h.compute.fail.store(true, Ordering::SeqCst);
    let orchestrator = h.inline();

    let failed = orchestrator.get_or_compute(kpis_request("2024-08")).await;
    assert_eq!(failed.status, ResponseStatus::Error);
    assert_eq!(failed.error.as_deref(), Some("ledger query failed"));

    h.compute.fail.store(false, Ordering::SeqCst);
    let cached = orchestrator.get_or_compute(kpis_request("2024-08")).await;
    assert_eq!(cached.status, ResponseStatus::Error);
    assert_eq!(cached.error.as_deref(), Some("ledger query failed"));
    assert_eq!(h.compute.calls(), 1);

    h.clock.advance(CacheConfig::default().error_ttl());
    let recovered = orchestrator.get_or_compute(kpis_request("2024-08")).await;
    assert_eq!(recovered.status, ResponseStatus::Computed);
    assert_eq!(h.compute.calls(), 2);
}

#[tokio::test]
async fn test_durable_outage_still_serves_correct_results() {
    let h = Harness::new(CountingCompute::default());
    h.durable.set_available(false);
    let orchestrator = h.inline();

    let computed = orchestrator.get_or_compute(kpis_request("2024-09")).await;
    assert_eq!(computed.status, ResponseStatus::Computed);
    let hit = orchestrator.get_or_compute(kpis_request("2024-09")).await;
    assert_eq!(hit.status, ResponseStatus::Fresh);
    assert_eq!(hit.payload, computed.payload);
    assert_eq!(h.compute.calls(), 1);
    assert!(!h.store.is_locked(&kpis_request("2024-09").cache_key()).await);
}

#[tokio::test]
async fn test_durable_outage_with_background_runner() {
    let h = Harness::new(CountingCompute::default());
    h.durable.set_available(false);
    let (orchestrator, _runner) = h.background(RetryPolicy::none());

    let first = orchestrator.get_or_compute(kpis_request("2024-10")).await;
    assert_eq!(first.status, ResponseStatus::Processing);
    wait_for_job(&orchestrator, &first).await;
    let hit = orchestrator.get_or_compute(kpis_request("2024-10")).await;
    assert_eq!(hit.status, ResponseStatus::Fresh);
}

#[tokio::test]
async fn test_force_refresh_recomputes_fresh_entry() {
    let h = Harness::new(CountingCompute::default());
    let orchestrator = h.inline();
    orchestrator.get_or_compute(kpis_request("2024-11")).await;

    let forced = orchestrator
        .get_or_compute(kpis_request("2024-11").force_refresh(true))
        .await;
    assert_eq!(forced.status, ResponseStatus::Computed);
    assert_eq!(forced.payload.unwrap()["call"], 2);
    assert_eq!(h.compute.calls(), 2);
}

#[tokio::test]
async fn test_held_lock_reports_processing() {
    let h = Harness::new(CountingCompute::default());
    let orchestrator = h.inline();
    let key = kpis_request("2024-12").cache_key();
    assert!(h.store.try_lock(&key, Duration::from_secs(300)).await.is_acquired());

    let response = orchestrator.get_or_compute(kpis_request("2024-12")).await;
    assert_eq!(response.status, ResponseStatus::Processing);
    assert!(response.job_ref.is_none());
    assert_eq!(h.compute.calls(), 0);

    // A crashed holder's lock expires on its own.
    h.clock.advance(Duration::from_secs(300));
    let response = orchestrator.get_or_compute(kpis_request("2024-12")).await;
    assert_eq!(response.status, ResponseStatus::Computed);
}

#[tokio::test]
async fn test_immediate_partial_returns_cheap_payload() {
    let h = Harness::new(CountingCompute {
        partial: Some(json!({"partial": true})),
        ..Default::default()
    });
    let (orchestrator, _runner) = h.background(RetryPolicy::none());

    let response = orchestrator
        .get_or_compute(
            DashboardRequest::new(Namespace::FORECAST, FilterSet::new().with("horizonte", 6))
                .immediate_partial(true),
        )
        .await;
    assert_eq!(response.status, ResponseStatus::Processing);
    assert_eq!(response.payload, Some(json!({"partial": true})));
    wait_for_job(&orchestrator, &response).await;
    assert_eq!(h.compute.calls(), 1);
}

#[tokio::test]
async fn test_transient_failures_retry_before_caching() {
    let h = Harness::new(CountingCompute::default());
    h.compute.transient_failures.store(2, Ordering::SeqCst);
    let (orchestrator, _runner) = h.background(RetryPolicy::new(
        3,
        Duration::from_millis(1),
        Duration::from_millis(5),
        false,
    ));

    let response = orchestrator.get_or_compute(kpis_request("2025-01")).await;
    assert_eq!(
        wait_for_job(&orchestrator, &response).await,
        JobStatus::Succeeded { attempts: 3 }
    );
    let hit = orchestrator.get_or_compute(kpis_request("2025-01")).await;
    assert_eq!(hit.status, ResponseStatus::Fresh);
    assert_eq!(h.compute.calls(), 3);
}

#[tokio::test]
async fn test_exhausted_retries_cache_error_marker() {
    let h = Harness::new(CountingCompute::default());
    h.compute.transient_failures.store(10, Ordering::SeqCst);
    let (orchestrator, _runner) = h.background(RetryPolicy::new(
        2,
        Duration::from_millis(1),
        Duration::from_millis(5),
        false,
    ));

    let response = orchestrator.get_or_compute(kpis_request("2025-02")).await;
    assert!(matches!(
        wait_for_job(&orchestrator, &response).await,
        JobStatus::Failed { attempts: 2, .. }
    ));
    let cached = orchestrator.get_or_compute(kpis_request("2025-02")).await;
    assert_eq!(cached.status, ResponseStatus::Error);
    assert_eq!(cached.error.as_deref(), Some("database timeout"));
    assert_eq!(h.compute.calls(), 2);
}

#[tokio::test]
async fn test_compute_panic_releases_lock() {
    let h = Harness::new(CountingCompute::default());
    h.compute.panics.store(true, Ordering::SeqCst);
    let orchestrator = h.inline();

    let response = orchestrator.get_or_compute(kpis_request("2025-03")).await;
    assert_eq!(response.status, ResponseStatus::Error);
    assert!(response.error.unwrap().contains("panicked"));
    assert!(!h.store.is_locked(&kpis_request("2025-03").cache_key()).await);
}

#[tokio::test]
async fn test_expired_entry_served_from_stale_copy() {
    let h = Harness::new(CountingCompute::default());
    let (orchestrator, _runner) = h.background(RetryPolicy::none());
    let first = orchestrator.get_or_compute(kpis_request("2025-04")).await;
    wait_for_job(&orchestrator, &first).await;

    h.clock.advance(CacheConfig::default().ttl_for(&Namespace::KPIS) + Duration::from_secs(1));
    let response = orchestrator.get_or_compute(kpis_request("2025-04")).await;
    assert_eq!(response.status, ResponseStatus::Stale);
    assert_eq!(response.payload.as_ref().unwrap()["call"], 1);
    assert!(response.stale_hint);

    wait_for_job(&orchestrator, &response).await;
    let hit = orchestrator.get_or_compute(kpis_request("2025-04")).await;
    assert_eq!(hit.status, ResponseStatus::Fresh);
    assert_eq!(hit.payload.unwrap()["call"], 2);
}

#[tokio::test]
async fn test_shut_down_runner_falls_back_to_inline() {
    let h = Harness::new(CountingCompute::default());
    let (orchestrator, runner) = h.background(RetryPolicy::none());
    runner.shutdown();

    let response = orchestrator.get_or_compute(kpis_request("2025-05")).await;
    assert_eq!(response.status, ResponseStatus::Computed);
    assert!(response.job_ref.is_none());
}

#[tokio::test]
async fn test_invalidation_keeps_in_flight_lock() {
    let h = Harness::new(CountingCompute::slow(Duration::from_millis(200)));
    let (orchestrator, _runner) = h.background(RetryPolicy::none());
    let registry = InvalidationRegistry::new(h.store.clone(), &InvalidationConfig::default());
    let key = kpis_request("2025-06").cache_key();

    let first = orchestrator.get_or_compute(kpis_request("2025-06")).await;
    assert_eq!(first.status, ResponseStatus::Processing);
    assert!(h.store.is_locked(&key).await);

    let result = registry
        .register_data_change("invoice_created", &["F-2001".to_string()], Map::new())
        .await;
    assert!(result.success);
    assert!(result.namespaces.contains(&"kpis".to_string()));
    assert!(h.store.is_locked(&key).await);

    let second = orchestrator.get_or_compute(kpis_request("2025-06")).await;
    assert_eq!(second.status, ResponseStatus::Processing);
    assert_eq!(
        second.job_ref.as_ref().map(|j| j.id),
        first.job_ref.as_ref().map(|j| j.id)
    );

    wait_for_job(&orchestrator, &first).await;
    assert_eq!(h.compute.calls(), 1);
    assert!(!h.store.is_locked(&key).await);
}

#[tokio::test]
async fn test_from_config_selects_background_or_inline() {
    let h = Harness::new(CountingCompute::default());
    let mut config = AppConfig::default();
    config.jobs.workers = 2;
    let background = ComputeOrchestrator::from_config(h.store.clone(), h.compute.clone(), &config);
    let response = background.get_or_compute(kpis_request("2025-07")).await;
    assert_eq!(response.status, ResponseStatus::Processing);
    assert_eq!(
        wait_for_job(&background, &response).await,
        JobStatus::Succeeded { attempts: 1 }
    );

    config.jobs.workers = 0;
    let inline = ComputeOrchestrator::from_config(h.store.clone(), h.compute.clone(), &config);
    let response = inline.get_or_compute(kpis_request("2025-08")).await;
    assert_eq!(response.status, ResponseStatus::Computed);
}
