//! Cache-aside orchestration for dashboard computations.
//!
//! A request is resolved against the two-tier store, judged by the freshness
//! policy, and then served fresh, served stale with a background refresh,
//! reported as `processing`, or computed. At most one computation per cache
//! key runs at a time; the processing lock in the store enforces that across
//! processes, and [`ProcessingGuard`] releases it on every exit path.

use crate::compute::{ComputeCapability, ComputeError, ComputeOutcome};
use crate::guard::ProcessingGuard;
use dashmap::DashMap;
use finboard_cache::{CacheEntry, CacheStore, Freshness, FreshnessPolicy, LockOutcome};
use finboard_core::config::{AppConfig, CacheConfig};
use finboard_core::{CacheError, CacheKey, FilterSet, Namespace};
use finboard_jobs::{Job, JobAttempt, JobFailure, JobHandle, JobRef, JobRunner, JobStatus, TokioJobRunner};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StaleStrategy {
    /// Serve the stale payload now and refresh in the background.
    #[default]
    ServeThenRefresh,
    /// Block and recompute before answering.
    Recompute,
}

#[derive(Debug, Clone)]
pub struct DashboardRequest {
    pub namespace: Namespace,
    pub filters: FilterSet,
    pub max_age: Option<Duration>,
    pub force_refresh: bool,
    pub stale_strategy: StaleStrategy,
    /// Overrides `cache.immediate_partial` for this request.
    pub immediate_partial: Option<bool>,
}

impl DashboardRequest {
    pub fn new(namespace: Namespace, filters: FilterSet) -> Self {
        Self {
            namespace,
            filters,
            max_age: None,
            force_refresh: false,
            stale_strategy: StaleStrategy::default(),
            immediate_partial: None,
        }
    }

    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn force_refresh(mut self, force: bool) -> Self {
        self.force_refresh = force;
        self
    }

    pub fn stale_strategy(mut self, strategy: StaleStrategy) -> Self {
        self.stale_strategy = strategy;
        self
    }

    pub fn immediate_partial(mut self, enabled: bool) -> Self {
        self.immediate_partial = Some(enabled);
        self
    }

    pub fn cache_key(&self) -> CacheKey {
        CacheKey::derive(&self.namespace, &self.filters)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Fresh,
    Stale,
    Processing,
    Computed,
    Error,
}

impl ResponseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseStatus::Fresh => "fresh",
            ResponseStatus::Stale => "stale",
            ResponseStatus::Processing => "processing",
            ResponseStatus::Computed => "computed",
            ResponseStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardResponse {
    pub status: ResponseStatus,
    pub payload: Option<Value>,
    pub age_seconds: Option<u64>,
    pub job_ref: Option<JobRef>,
    pub error: Option<String>,
    /// Older than the telemetry stale threshold, regardless of `max_age`.
    pub stale_hint: bool,
    pub cache_key: String,
}

impl DashboardResponse {
    fn new(status: ResponseStatus, key: &CacheKey) -> Self {
        Self {
            status,
            payload: None,
            age_seconds: None,
            job_ref: None,
            error: None,
            stale_hint: false,
            cache_key: key.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status != ResponseStatus::Error
    }
}

#[derive(Clone)]
pub struct ComputeOrchestrator {
    store: Arc<CacheStore>,
    compute: Arc<dyn ComputeCapability>,
    runner: Option<Arc<dyn JobRunner>>,
    policy: FreshnessPolicy,
    config: Arc<CacheConfig>,
    jobs: Arc<DashMap<Uuid, JobHandle>>,
    in_flight: Arc<DashMap<String, JobRef>>,
}

impl ComputeOrchestrator {
    pub fn new(
        store: Arc<CacheStore>,
        compute: Arc<dyn ComputeCapability>,
        config: CacheConfig,
    ) -> Self {
        Self {
            store,
            compute,
            runner: None,
            policy: FreshnessPolicy::new(config.stale_after()),
            config: Arc::new(config),
            jobs: Arc::new(DashMap::new()),
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Build from application config: background computation on a tokio
    /// worker pool sized by `jobs.workers`, or inline when that is zero.
    pub fn from_config(
        store: Arc<CacheStore>,
        compute: Arc<dyn ComputeCapability>,
        config: &AppConfig,
    ) -> Self {
        let orchestrator = Self::new(store, compute, config.cache.clone());
        if config.jobs.workers == 0 {
            info!("No compute workers configured, computing inline");
            return orchestrator;
        }
        orchestrator.with_runner(Arc::new(TokioJobRunner::from_config(&config.jobs)))
    }

    /// Run computations in the background on `runner` instead of inline.
    pub fn with_runner(mut self, runner: Arc<dyn JobRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub fn freshness_policy(&self) -> &FreshnessPolicy {
        &self.policy
    }

    fn runner_available(&self) -> bool {
        self.runner.as_ref().is_some_and(|r| r.is_available())
    }

    pub async fn get_or_compute(&self, request: DashboardRequest) -> DashboardResponse {
        let key = request.cache_key();
        let response = self.resolve(&key, &request).await;
        metrics::counter!("dashboard.responses", "status" => response.status.as_str()).increment(1);
        debug!(
            key = %key,
            status = response.status.as_str(),
            age_seconds = ?response.age_seconds,
            "Dashboard request resolved"
        );
        response
    }

    async fn resolve(&self, key: &CacheKey, request: &DashboardRequest) -> DashboardResponse {
        if request.force_refresh {
            info!(key = %key, "Forced refresh requested");
            return self.compute_or_join(key, request).await;
        }

        let entry = self.store.get(key).await;
        let age = entry.as_ref().map(|e| e.age(self.store.clock().as_ref()));
        match (entry, self.policy.evaluate(age, request.max_age)) {
            (Some(entry), _) if entry.is_error() => self.serve_cached(key, &entry, ResponseStatus::Error),
            (Some(entry), Freshness::Fresh) => self.serve_cached(key, &entry, ResponseStatus::Fresh),
            (Some(entry), Freshness::Stale) => self.serve_stale(key, &entry, request).await,
            _ => match self.serve_fallback_copy(key, request).await {
                Some(response) => response,
                None => self.compute_or_join(key, request).await,
            },
        }
    }

    fn serve_cached(&self, key: &CacheKey, entry: &CacheEntry, status: ResponseStatus) -> DashboardResponse {
        let age = entry.age(self.store.clock().as_ref());
        let mut response = DashboardResponse::new(status, key);
        response.age_seconds = Some(age.as_secs());
        response.stale_hint = self.policy.is_telemetry_stale(age);
        if entry.is_error() {
            response.error = entry.error.clone();
        } else {
            response.payload = Some(entry.payload.clone());
        }
        response
    }

    async fn serve_stale(
        &self,
        key: &CacheKey,
        entry: &CacheEntry,
        request: &DashboardRequest,
    ) -> DashboardResponse {
        if request.stale_strategy == StaleStrategy::ServeThenRefresh && self.runner_available() {
            let mut response = self.serve_cached(key, entry, ResponseStatus::Stale);
            response.job_ref = self.trigger_refresh(key, request).await;
            return response;
        }

        // Recompute inline. If someone else is already computing, the stale
        // payload is still a better answer than waiting.
        match self.store.try_lock(key, self.config.lock_ttl()).await {
            LockOutcome::Acquired(token) => {
                let guard = ProcessingGuard::new(self.store.clone(), key.clone(), token);
                if let Some(response) = self.cached_after_lock(key, request).await {
                    guard.release().await;
                    return response;
                }
                self.compute_inline(key, request, &guard).await
            }
            LockOutcome::Held => {
                let mut response = self.serve_cached(key, entry, ResponseStatus::Stale);
                response.job_ref = self.in_flight_job(key);
                response
            }
        }
    }

    /// On a miss, serve the long-lived `:stale` copy while a background job
    /// recomputes. Only when a runner can do that refresh.
    async fn serve_fallback_copy(
        &self,
        key: &CacheKey,
        request: &DashboardRequest,
    ) -> Option<DashboardResponse> {
        if !self.runner_available() {
            return None;
        }
        let copy = self.store.get_entry(&key.stale_key()).await?;
        if copy.is_error() {
            return None;
        }
        metrics::counter!("dashboard.stale_fallback").increment(1);
        let mut response = self.serve_cached(key, &copy, ResponseStatus::Stale);
        response.job_ref = self.trigger_refresh(key, request).await;
        Some(response)
    }

    async fn compute_or_join(&self, key: &CacheKey, request: &DashboardRequest) -> DashboardResponse {
        let token = match self.store.try_lock(key, self.config.lock_ttl()).await {
            LockOutcome::Acquired(token) => token,
            LockOutcome::Held => {
                let mut response = DashboardResponse::new(ResponseStatus::Processing, key);
                response.job_ref = self.in_flight_job(key);
                return response;
            }
        };
        let guard = Arc::new(ProcessingGuard::new(self.store.clone(), key.clone(), token));

        if !request.force_refresh {
            if let Some(response) = self.cached_after_lock(key, request).await {
                guard.release().await;
                return response;
            }
        }

        if self.runner_available() {
            let partial = if request.immediate_partial.unwrap_or(self.config.immediate_partial) {
                self.compute
                    .compute_partial(&request.namespace, &request.filters)
                    .await
            } else {
                None
            };
            match self.submit_compute(key, request, guard) {
                Ok(job_ref) => {
                    let mut response = DashboardResponse::new(ResponseStatus::Processing, key);
                    response.payload = partial;
                    response.job_ref = Some(job_ref);
                    return response;
                }
                Err(guard) => return self.compute_inline(key, request, &guard).await,
            }
        }

        self.compute_inline(key, request, &guard).await
    }

    /// Start a background refresh if nobody holds the lock. Returns the job
    /// doing the refresh, ours or an existing one known to this process.
    async fn trigger_refresh(&self, key: &CacheKey, request: &DashboardRequest) -> Option<JobRef> {
        match self.store.try_lock(key, self.config.lock_ttl()).await {
            LockOutcome::Acquired(token) => {
                let guard = Arc::new(ProcessingGuard::new(self.store.clone(), key.clone(), token));
                if self.cached_after_lock(key, request).await.is_some() {
                    debug!(key = %key, "Refreshed while waiting for the lock, skipping refresh");
                    guard.release().await;
                    return None;
                }
                match self.submit_compute(key, request, guard) {
                    Ok(job_ref) => Some(job_ref),
                    Err(guard) => {
                        // Nothing will refresh this key; let the next caller try.
                        guard.release().await;
                        None
                    }
                }
            }
            LockOutcome::Held => self.in_flight_job(key),
        }
    }

    /// Re-read the cache once the lock is ours. A computation that finished
    /// between our read and the lock has already stored a usable answer.
    async fn cached_after_lock(&self, key: &CacheKey, request: &DashboardRequest) -> Option<DashboardResponse> {
        let entry = self.store.get(key).await?;
        if entry.is_error() {
            return Some(self.serve_cached(key, &entry, ResponseStatus::Error));
        }
        let age = entry.age(self.store.clock().as_ref());
        match self.policy.evaluate(Some(age), request.max_age) {
            Freshness::Fresh => {
                metrics::counter!("dashboard.lock.recheck_hit").increment(1);
                Some(self.serve_cached(key, &entry, ResponseStatus::Fresh))
            }
            _ => None,
        }
    }

    /// Hand the computation to the runner. The job owns the guard; on
    /// rejection the guard is handed back so the caller can compute inline.
    fn submit_compute(
        &self,
        key: &CacheKey,
        request: &DashboardRequest,
        guard: Arc<ProcessingGuard>,
    ) -> Result<JobRef, Arc<ProcessingGuard>> {
        let Some(runner) = self.runner.clone() else {
            return Err(guard);
        };
        self.prune_finished_jobs();

        let orchestrator = self.clone();
        let job_key = key.clone();
        let namespace = request.namespace.clone();
        let filters = request.filters.clone();
        let job_guard = guard.clone();

        let job = Job::new(format!("compute:{key}"), move |attempt: JobAttempt| {
            let orchestrator = orchestrator.clone();
            let key = job_key.clone();
            let namespace = namespace.clone();
            let filters = filters.clone();
            let guard = job_guard.clone();
            async move {
                let outcome = orchestrator.run_compute(&namespace, &filters).await;
                match outcome {
                    Ok(payload) => {
                        orchestrator.persist_result(&key, payload).await;
                        orchestrator.finish(&key, &guard).await;
                        Ok(())
                    }
                    Err(e) if e.transient && !attempt.is_final() => {
                        Err(JobFailure::transient(e.message))
                    }
                    Err(e) => {
                        orchestrator.persist_error(&key, &e).await;
                        orchestrator.finish(&key, &guard).await;
                        Err(JobFailure::permanent(e.message))
                    }
                }
            }
        });

        match runner.submit(job) {
            Ok(handle) => {
                let job_ref = handle.reference().clone();
                self.in_flight.insert(key.to_string(), job_ref.clone());
                self.jobs.insert(handle.id(), handle);
                info!(key = %key, job_id = %job_ref.id, "Background compute submitted");
                Ok(job_ref)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Job runner rejected compute");
                Err(guard)
            }
        }
    }

    async fn finish(&self, key: &CacheKey, guard: &ProcessingGuard) {
        self.in_flight.remove(key.as_str());
        guard.release().await;
    }

    async fn compute_inline(
        &self,
        key: &CacheKey,
        request: &DashboardRequest,
        guard: &ProcessingGuard,
    ) -> DashboardResponse {
        let outcome = self.run_compute(&request.namespace, &request.filters).await;
        let response = match outcome {
            Ok(payload) => {
                self.persist_result(key, payload.clone()).await;
                let mut response = DashboardResponse::new(ResponseStatus::Computed, key);
                response.payload = Some(payload);
                response.age_seconds = Some(0);
                response
            }
            Err(e) => {
                self.persist_error(key, &e).await;
                let mut response = DashboardResponse::new(ResponseStatus::Error, key);
                response.error = Some(e.message);
                response
            }
        };
        guard.release().await;
        response
    }

    /// Invoke the compute capability on its own task so a panic surfaces as
    /// a failure instead of unwinding through the caller.
    async fn run_compute(&self, namespace: &Namespace, filters: &FilterSet) -> ComputeOutcome {
        metrics::counter!("dashboard.compute.invocations").increment(1);
        let compute = self.compute.clone();
        let task_namespace = namespace.clone();
        let task_filters = filters.clone();
        let outcome = tokio::spawn(async move { compute.compute(&task_namespace, &task_filters).await })
            .await
            .unwrap_or_else(|e| {
                let reason = if e.is_panic() { "panicked" } else { "was cancelled" };
                Err(ComputeError::permanent(format!("compute for {namespace} {reason}")))
            });
        if let Err(e) = &outcome {
            metrics::counter!("dashboard.compute.failures").increment(1);
            let error = CacheError::ComputeFailure(e.message.clone());
            warn!(namespace = %namespace, error = %error, transient = e.transient, "Compute failed");
        }
        outcome
    }

    async fn persist_result(&self, key: &CacheKey, payload: Value) {
        let now = self.store.clock().now();
        let entry = CacheEntry::result(payload, now, self.config.ttl_for(key.namespace()));
        self.store.set(key, &entry).await;
        self.store
            .put_entry(&key.stale_key(), &entry.with_ttl(self.config.stale_fallback_ttl()))
            .await;
        debug!(key = %key, ttl_secs = entry.ttl_secs, "Result cached");
    }

    /// The `:stale` copy is left alone so a later miss can still be served.
    async fn persist_error(&self, key: &CacheKey, error: &ComputeError) {
        let now = self.store.clock().now();
        let entry = CacheEntry::error(error.message.clone(), now, self.config.error_ttl());
        self.store.set(key, &entry).await;
    }

    /// The job computing `key`, if this process started it and it is still
    /// running. Another process may hold the lock with no job known here.
    fn in_flight_job(&self, key: &CacheKey) -> Option<JobRef> {
        let job_ref = self.in_flight.get(key.as_str()).map(|r| r.value().clone())?;
        match self.job_status(job_ref.id) {
            Some(status) if !status.is_terminal() => Some(job_ref),
            _ => None,
        }
    }

    fn prune_finished_jobs(&self) {
        self.jobs.retain(|_, handle| !handle.status().is_terminal());
        self.in_flight.retain(|_, job_ref| self.jobs.contains_key(&job_ref.id));
    }

    /// Status of a job submitted by this orchestrator, while it is tracked.
    pub fn job_status(&self, id: Uuid) -> Option<JobStatus> {
        self.jobs.get(&id).map(|handle| handle.status())
    }

    pub async fn wait_for(&self, id: Uuid) -> Option<JobStatus> {
        let handle = self.jobs.get(&id).map(|h| h.value().clone())?;
        Some(handle.wait().await)
    }
}
