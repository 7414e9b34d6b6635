//! Smart router: selects a provider adapter per request from intent,
//! complexity, preferences, and health; falls back on recoverable failures;
//! records one routing decision per final request.
//!
//! The decision procedure follows four steps: complexity estimation,
//! provider-class selection (local / cloud / hybrid), cloud tie-break, and
//! the month-to-date budget guard. Hybrid mode issues the local request and
//! escalates to cloud when the first token misses its deadline.

pub mod db;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::catalog::ModelCatalog;
use crate::chat::{ChatDelta, ChatRequest, ChatResponse, Complexity, Intent};
use crate::error::{ZekeError, ZekeResult};
use crate::providers::{Provider, ProviderKind};
use db::{RoutingDb, RoutingDecision, RoutingPrefs};

/// Rolling window used for the success-rate tie break.
const SUCCESS_RATE_WINDOW: u32 = 100;

/// Routing mode set by `router switch`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouterMode {
    /// Talk to provider APIs directly.
    Direct,
    /// Send everything through the aggregating proxy.
    Proxy,
    /// Pick per request (default).
    Auto,
}

impl std::str::FromStr for RouterMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "direct" => Ok(RouterMode::Direct),
            "proxy" => Ok(RouterMode::Proxy),
            "auto" => Ok(RouterMode::Auto),
            _ => Err(format!("unknown router mode: {s} (use direct, proxy, auto)")),
        }
    }
}

/// Router knobs. All durations configurable; defaults follow the daemon's
/// timeout table.
#[derive(Clone, Debug)]
pub struct RouterConfig {
    pub prefer_local_for: Vec<Intent>,
    pub first_token_timeout: Duration,
    pub fallback_enabled: bool,
    pub overall_cloud: Duration,
    pub overall_local: Duration,
    pub budget_guard: bool,
    pub mode: RouterMode,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            prefer_local_for: vec![
                Intent::Code,
                Intent::Completion,
                Intent::Refactor,
                Intent::Tests,
            ],
            first_token_timeout: Duration::from_millis(2000),
            fallback_enabled: true,
            overall_cloud: Duration::from_secs(30),
            overall_local: Duration::from_secs(60),
            budget_guard: true,
            mode: RouterMode::Auto,
        }
    }
}

/// Provider class chosen in step 2 of the decision procedure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteClass {
    Local,
    Cloud,
    Hybrid,
}

/// Phases of one streaming request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamPhase {
    Idle,
    Dispatching,
    FirstTokenWait,
    Streaming,
    Escalating,
    Done,
    Failing,
    Cancelled,
}

impl StreamPhase {
    /// Transition table; anything not listed is a bug.
    pub fn can_transition(self, next: StreamPhase) -> bool {
        use StreamPhase::*;
        match (self, next) {
            (Idle, Dispatching) => true,
            (Dispatching, FirstTokenWait) => true,
            (FirstTokenWait, Streaming) => true,
            (Streaming, Done) => true,
            (FirstTokenWait, Escalating) => true,
            (Escalating, Dispatching) => true,
            (_, Failing) => !matches!(self, Done),
            (_, Cancelled) => !matches!(self, Done),
            _ => false,
        }
    }
}

/// One dispatchable `(provider, model)` pair.
#[derive(Clone, Debug)]
struct Candidate {
    kind: ProviderKind,
    model: String,
}

/// Stable project identifier: hex prefix of the SHA-256 of the canonical
/// project root path.
pub fn project_id(path: &std::path::Path) -> String {
    use sha2::{Digest, Sha256};
    let canonical = path
        .canonicalize()
        .unwrap_or_else(|_| path.to_path_buf());
    let digest = Sha256::digest(canonical.to_string_lossy().as_bytes());
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}

/// Step 1: complexity from explicit hint, then intent, then size heuristics.
pub fn estimate_complexity(req: &ChatRequest) -> Complexity {
    if let Some(c) = req.tags.complexity {
        return c;
    }
    match req.tags.intent {
        Intent::Completion => return Complexity::Simple,
        Intent::Architecture | Intent::Reason => return Complexity::Complex,
        _ => {}
    }
    let prompt_len = req.prompt_len();
    let max_tokens = req.max_tokens.unwrap_or(1024);
    if prompt_len < 200 && max_tokens <= 512 {
        Complexity::Simple
    } else if prompt_len > 2000 || max_tokens > 2048 {
        Complexity::Complex
    } else {
        Complexity::Medium
    }
}

/// The smart router. Shared by every connection; adapters are immutable
/// after construction and each in-flight request owns its own invocation.
pub struct SmartRouter {
    providers: HashMap<ProviderKind, Arc<dyn Provider>>,
    /// Cloud preference order when the tie break is otherwise even.
    cloud_order: Vec<ProviderKind>,
    catalog: Arc<ModelCatalog>,
    db: RoutingDb,
    config: RouterConfig,
}

impl SmartRouter {
    pub fn new(
        providers: Vec<Arc<dyn Provider>>,
        catalog: Arc<ModelCatalog>,
        db: RoutingDb,
        config: RouterConfig,
    ) -> Self {
        let cloud_order = providers
            .iter()
            .map(|p| p.kind())
            .filter(|k| !k.is_local())
            .collect();
        let providers = providers.into_iter().map(|p| (p.kind(), p)).collect();
        Self {
            providers,
            cloud_order,
            catalog,
            db,
            config,
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn set_mode(&mut self, mode: RouterMode) {
        self.config.mode = mode;
    }

    pub fn db(&self) -> &RoutingDb {
        &self.db
    }

    pub fn catalog(&self) -> &Arc<ModelCatalog> {
        &self.catalog
    }

    pub fn provider(&self, kind: ProviderKind) -> Option<Arc<dyn Provider>> {
        self.providers.get(&kind).cloned()
    }

    pub fn provider_kinds(&self) -> Vec<ProviderKind> {
        let mut kinds: Vec<ProviderKind> = self.providers.keys().copied().collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }

    fn local_provider(&self) -> Option<&Arc<dyn Provider>> {
        self.providers.get(&ProviderKind::Ollama)
    }

    /// Local adapter health from the catalog: unknown (no records) counts
    /// as healthy; all-unavailable counts as down.
    fn local_healthy(&self) -> bool {
        let records = self.catalog.list_provider(ProviderKind::Ollama.as_str());
        records.is_empty() || records.iter().any(|r| r.available)
    }

    /// Step 2: local / cloud / hybrid.
    fn select_class(&self, req: &ChatRequest, complexity: Complexity, prefs: &RoutingPrefs) -> RouteClass {
        let local_available =
            self.local_provider().is_some() && prefs.prefer_local && self.local_healthy();
        if complexity == Complexity::Complex || !local_available {
            return RouteClass::Cloud;
        }
        if self.config.prefer_local_for.contains(&req.tags.intent)
            && complexity == Complexity::Simple
        {
            return RouteClass::Local;
        }
        if complexity == Complexity::Medium && self.config.fallback_enabled {
            return RouteClass::Hybrid;
        }
        RouteClass::Local
    }

    /// Step 3: ordered cloud candidates.
    async fn cloud_candidates(
        &self,
        req: &ChatRequest,
        prefs: &RoutingPrefs,
    ) -> ZekeResult<Vec<Candidate>> {
        // Proxy mode collapses the cloud to the aggregator.
        if self.config.mode == RouterMode::Proxy {
            if let Some(p) = self.providers.get(&ProviderKind::Proxy) {
                return Ok(vec![Candidate {
                    kind: ProviderKind::Proxy,
                    model: req.model.clone().unwrap_or_else(|| p.default_model()),
                }]);
            }
        }

        // (a) Explicit provider/model pins the head of the list.
        if let Some(explicit) = &req.provider {
            let kind: ProviderKind = explicit
                .parse()
                .map_err(ZekeError::InvalidArgument)?;
            let provider = self.providers.get(&kind).ok_or_else(|| {
                ZekeError::NotFound(format!("provider not configured: {kind}"))
            })?;
            return Ok(vec![Candidate {
                kind,
                model: req.model.clone().unwrap_or_else(|| provider.default_model()),
            }]);
        }

        // (b)+(c): per provider, cheapest capable model from the catalog,
        // scored by recent success rate; (d) prefs order breaks remaining ties.
        let mut scored: Vec<(usize, f64, f64, Candidate)> = Vec::new();
        for (order, kind) in self.cloud_order.iter().enumerate() {
            let Some(provider) = self.providers.get(kind) else {
                continue;
            };
            let model = match req.model.clone() {
                Some(m) => m,
                None => self
                    .catalog
                    .candidates_for(kind.as_str(), req.tags.intent)
                    .first()
                    .map(|r| r.name.clone())
                    .unwrap_or_else(|| provider.default_model()),
            };
            let cost = self
                .catalog
                .get(&format!("{kind}:{model}"))
                .map(|r| r.blended_cost())
                .unwrap_or_else(|| {
                    let (cin, cout) = provider.cost_per_token();
                    (cin + cout) / 2.0
                });
            let rate = self
                .db
                .success_rate(&model, SUCCESS_RATE_WINDOW)
                .await
                .unwrap_or(1.0);
            let prefs_boost = if prefs.last_model.as_deref() == Some(model.as_str()) {
                0
            } else {
                1
            };
            scored.push((
                order + prefs_boost,
                cost,
                rate,
                Candidate { kind: *kind, model },
            ));
        }
        scored.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal))
                .then(a.0.cmp(&b.0))
        });
        Ok(scored.into_iter().map(|(_, _, _, c)| c).collect())
    }

    fn local_candidate(&self, req: &ChatRequest) -> Option<Candidate> {
        self.local_provider().map(|p| Candidate {
            kind: p.kind(),
            model: req.model.clone().unwrap_or_else(|| p.default_model()),
        })
    }

    /// Step 4: the budget guard. Cloud candidates are excluded once the
    /// month-to-date spend exceeds the cap, unless intent=architecture.
    async fn apply_budget_guard(
        &self,
        req: &ChatRequest,
        prefs: &RoutingPrefs,
        project: &str,
        cloud: Vec<Candidate>,
    ) -> ZekeResult<Vec<Candidate>> {
        if !self.config.budget_guard
            || cloud.is_empty()
            || req.tags.intent == Intent::Architecture
        {
            return Ok(cloud);
        }
        let spent = self.db.month_cost_cents(project).await.unwrap_or(0.0);
        if spent as i64 >= prefs.max_cloud_cost_cents {
            if self.local_provider().is_none() {
                return Err(ZekeError::BudgetExceeded {
                    spent_cents: spent as i64,
                    limit_cents: prefs.max_cloud_cost_cents,
                });
            }
            tracing::warn!(
                spent_cents = spent as i64,
                limit = prefs.max_cloud_cost_cents,
                "cloud budget exhausted; excluding cloud candidates"
            );
            return Ok(Vec::new());
        }
        Ok(cloud)
    }

    /// Builds the final ordered candidate list and the route class.
    async fn plan(
        &self,
        req: &ChatRequest,
        project: &str,
    ) -> ZekeResult<(RouteClass, Vec<Candidate>, Complexity, RoutingPrefs)> {
        let prefs = self
            .db
            .get_prefs(project)
            .await?
            .unwrap_or_else(|| RoutingPrefs::defaults(project));
        let complexity = estimate_complexity(req);
        let class = self.select_class(req, complexity, &prefs);

        let cloud = self.cloud_candidates(req, &prefs).await?;
        let cloud = self
            .apply_budget_guard(req, &prefs, project, cloud)
            .await?;
        let local = self.local_candidate(req);

        let mut candidates = Vec::new();
        match class {
            RouteClass::Local => {
                candidates.extend(local);
                if self.config.fallback_enabled {
                    candidates.extend(cloud);
                }
            }
            RouteClass::Hybrid => {
                candidates.extend(local);
                candidates.extend(cloud);
            }
            RouteClass::Cloud => {
                candidates.extend(cloud);
                // Cloudless installs still get the local model.
                if candidates.is_empty() {
                    candidates.extend(local);
                }
            }
        }
        if candidates.is_empty() {
            return Err(ZekeError::NotFound("no provider configured".into()));
        }
        Ok((class, candidates, complexity, prefs))
    }

    fn overall_timeout(&self, kind: ProviderKind) -> Duration {
        if kind.is_local() {
            self.config.overall_local
        } else {
            self.config.overall_cloud
        }
    }

    fn cost_cents_for(&self, candidate: &Candidate, resp: &ChatResponse) -> f64 {
        if candidate.kind.is_local() {
            return 0.0;
        }
        let (cin, cout) = self
            .catalog
            .get(&format!("{}:{}", candidate.kind, candidate.model))
            .map(|r| (r.cost_in_per_1k, r.cost_out_per_1k))
            .or_else(|| {
                self.providers
                    .get(&candidate.kind)
                    .map(|p| p.cost_per_token())
            })
            .unwrap_or((0.0, 0.0));
        (resp.tokens_in as f64 / 1000.0 * cin + resp.tokens_out as f64 / 1000.0 * cout) * 100.0
    }

    async fn record(
        &self,
        req: &ChatRequest,
        project: &str,
        request_id: &str,
        candidate: &Candidate,
        complexity: Complexity,
        first_token_ms: u64,
        started: Instant,
        escalated: bool,
        outcome: &ZekeResult<ChatResponse>,
    ) {
        let (tokens_in, tokens_out, cost_cents, success, error_code) = match outcome {
            Ok(resp) => (
                resp.tokens_in,
                resp.tokens_out,
                self.cost_cents_for(candidate, resp),
                true,
                None,
            ),
            Err(e) => (0, 0, 0.0, false, Some(e.code_str().to_string())),
        };
        let decision = RoutingDecision {
            request_id: request_id.to_string(),
            project: project.to_string(),
            alias: req.model_alias.clone(),
            model: candidate.model.clone(),
            provider: candidate.kind.as_str().to_string(),
            intent: req.tags.intent.as_str().to_string(),
            size_hint: complexity.as_str().to_string(),
            latency_first_token_ms: first_token_ms,
            total_duration_ms: started.elapsed().as_millis() as u64,
            tokens_in,
            tokens_out,
            cost_cents,
            success,
            error_code,
            escalated,
        };
        if let Err(e) = self.db.record_decision(decision).await {
            tracing::error!("failed to record routing decision: {e}");
        }
        self.catalog.record_outcome(
            &format!("{}:{}", candidate.kind, candidate.model),
            started.elapsed().as_millis() as u64,
            success,
        );
    }

    /// Non-streaming entry point. Tries candidates in order; `RateLimited`
    /// moves on, `Unauthorised` surfaces immediately, `Timeout`/`Network`/
    /// `Server` fall back once. Exactly one stats row is written for the
    /// final attempt.
    pub async fn complete(
        &self,
        req: &ChatRequest,
        project: &str,
    ) -> ZekeResult<ChatResponse> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let (class, candidates, complexity, _prefs) = self.plan(req, project).await?;
        let started = Instant::now();
        let mut escalated = false;
        let mut fallbacks_left: u32 = 1;

        for (i, candidate) in candidates.iter().enumerate() {
            let provider = match self.providers.get(&candidate.kind) {
                Some(p) => p.clone(),
                None => continue,
            };
            let mut attempt_req = req.clone();
            attempt_req.model = Some(candidate.model.clone());

            // Hybrid: the local attempt gets the first-token deadline, not
            // the full local budget.
            let deadline = if class == RouteClass::Hybrid && candidate.kind.is_local() {
                self.config.first_token_timeout
            } else {
                self.overall_timeout(candidate.kind)
            };

            let outcome = match tokio::time::timeout(deadline, provider.complete(&attempt_req))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(ZekeError::Timeout(format!(
                    "{} did not answer within {deadline:?}",
                    candidate.kind
                ))),
            };

            match outcome {
                Ok(resp) => {
                    self.record(
                        req, project, &request_id, candidate, complexity,
                        resp.latency_ms, started, escalated, &Ok(resp.clone()),
                    )
                    .await;
                    return Ok(resp);
                }
                Err(e @ ZekeError::Unauthorised { .. })
                | Err(e @ ZekeError::ReAuthRequired { .. }) => {
                    self.record(
                        req, project, &request_id, candidate, complexity, 0, started,
                        escalated, &Err(e),
                    )
                    .await;
                    return Err(unauthorised_for(candidate.kind));
                }
                Err(e) => {
                    let is_last = i + 1 == candidates.len();
                    let may_continue = match &e {
                        ZekeError::RateLimited { .. } => true,
                        _ if e.recoverable_by_fallback() && fallbacks_left > 0 => {
                            fallbacks_left -= 1;
                            true
                        }
                        _ => false,
                    };
                    if is_last || !may_continue {
                        let failure: ZekeResult<ChatResponse> = Err(e);
                        self.record(
                            req, project, &request_id, candidate, complexity, 0, started,
                            escalated, &failure,
                        )
                        .await;
                        return failure.map_err(|e| describe_final(candidate, e));
                    }
                    tracing::debug!("candidate {} failed ({e}); trying next", candidate.kind);
                    escalated = true;
                }
            }
        }
        Err(ZekeError::NotFound("no provider available".into()))
    }

    /// Streaming entry point. Deltas reach `tx` in adapter order; the final
    /// delta has `finished: true`. Hybrid escalation discards anything the
    /// stalled local stream produced.
    pub async fn stream(
        &self,
        req: &ChatRequest,
        project: &str,
        stream_id: &str,
        tx: mpsc::Sender<ChatDelta>,
        cancel: CancellationToken,
    ) -> ZekeResult<ChatResponse> {
        let request_id = stream_id.to_string();
        let (class, candidates, complexity, _prefs) = self.plan(req, project).await?;
        let started = Instant::now();
        let mut phase = StreamPhase::Idle;
        advance(&mut phase, StreamPhase::Dispatching);
        let mut escalated = false;

        for (i, candidate) in candidates.iter().enumerate() {
            let provider = match self.providers.get(&candidate.kind) {
                Some(p) => p.clone(),
                None => continue,
            };
            let mut attempt_req = req.clone();
            attempt_req.model = Some(candidate.model.clone());
            let first_token_deadline = (class == RouteClass::Hybrid
                && candidate.kind.is_local())
            .then_some(self.config.first_token_timeout);

            advance(&mut phase, StreamPhase::FirstTokenWait);
            let attempt = self
                .stream_one(
                    &provider,
                    &attempt_req,
                    stream_id,
                    &tx,
                    &cancel,
                    first_token_deadline,
                    self.overall_timeout(candidate.kind),
                    &mut phase,
                )
                .await;

            match attempt {
                Ok((resp, first_token_ms)) => {
                    advance(&mut phase, StreamPhase::Done);
                    self.record(
                        req, project, &request_id, candidate, complexity, first_token_ms,
                        started, escalated, &Ok(resp.clone()),
                    )
                    .await;
                    return Ok(resp);
                }
                Err(ZekeError::Cancelled) => {
                    advance(&mut phase, StreamPhase::Cancelled);
                    let cancel_err: ZekeResult<ChatResponse> = Err(ZekeError::Cancelled);
                    self.record(
                        req, project, &request_id, candidate, complexity, 0, started,
                        escalated, &cancel_err,
                    )
                    .await;
                    // Terminal frame still reaches the client.
                    let _ = tx.send(ChatDelta::end(stream_id)).await;
                    return Err(ZekeError::Cancelled);
                }
                Err(e @ ZekeError::Unauthorised { .. })
                | Err(e @ ZekeError::ReAuthRequired { .. }) => {
                    advance(&mut phase, StreamPhase::Failing);
                    self.record(
                        req, project, &request_id, candidate, complexity, 0, started,
                        escalated, &Err(e),
                    )
                    .await;
                    return Err(unauthorised_for(candidate.kind));
                }
                Err(e) => {
                    // Once a delta reached the client the stream cannot be
                    // replayed against another candidate.
                    let streamed = phase == StreamPhase::Streaming;
                    let is_last = i + 1 == candidates.len();
                    if streamed
                        || is_last
                        || !(e.recoverable_by_fallback() && self.config.fallback_enabled)
                    {
                        advance(&mut phase, StreamPhase::Failing);
                        let failure: ZekeResult<ChatResponse> = Err(e);
                        self.record(
                            req, project, &request_id, candidate, complexity, 0, started,
                            escalated, &failure,
                        )
                        .await;
                        return failure.map_err(|e| describe_final(candidate, e));
                    }
                    tracing::debug!(
                        "stream candidate {} failed ({e}); escalating",
                        candidate.kind
                    );
                    advance(&mut phase, StreamPhase::Escalating);
                    advance(&mut phase, StreamPhase::Dispatching);
                    escalated = true;
                }
            }
        }
        Err(ZekeError::NotFound("no provider available".into()))
    }

    /// Runs one candidate's stream behind an internal channel so that a
    /// stalled first token can be abandoned without leaking deltas to the
    /// client.
    #[allow(clippy::too_many_arguments)]
    async fn stream_one(
        &self,
        provider: &Arc<dyn Provider>,
        req: &ChatRequest,
        stream_id: &str,
        tx: &mpsc::Sender<ChatDelta>,
        cancel: &CancellationToken,
        first_token_deadline: Option<Duration>,
        overall: Duration,
        phase: &mut StreamPhase,
    ) -> ZekeResult<(ChatResponse, u64)> {
        let (itx, mut irx) = mpsc::channel::<ChatDelta>(64);
        let attempt_cancel = cancel.child_token();
        let provider = provider.clone();
        let attempt_req = req.clone();
        let attempt_id = stream_id.to_string();
        let task_cancel = attempt_cancel.clone();
        let handle = tokio::spawn(async move {
            provider
                .stream(&attempt_req, &attempt_id, itx, &task_cancel)
                .await
        });
        let attempt_started = Instant::now();

        // First token, under the hybrid deadline when present.
        let first = match first_token_deadline {
            Some(d) => match tokio::time::timeout(d, irx.recv()).await {
                Ok(first) => first,
                Err(_) => {
                    attempt_cancel.cancel();
                    handle.abort();
                    return Err(ZekeError::Timeout("first token".into()));
                }
            },
            None => match tokio::time::timeout(overall, irx.recv()).await {
                Ok(first) => first,
                Err(_) => {
                    attempt_cancel.cancel();
                    handle.abort();
                    return Err(ZekeError::Timeout("first token".into()));
                }
            },
        };
        let first_token_ms = attempt_started.elapsed().as_millis() as u64;

        let Some(first) = first else {
            // Stream closed without a delta: surface the provider's error.
            return match handle.await {
                Ok(Ok(resp)) => {
                    advance(phase, StreamPhase::Streaming);
                    Ok((resp, first_token_ms))
                }
                Ok(Err(e)) => Err(e),
                Err(e) => Err(ZekeError::Network(format!("stream task: {e}"))),
            };
        };
        advance(phase, StreamPhase::Streaming);
        if tx.send(first).await.is_err() {
            attempt_cancel.cancel();
            return Err(ZekeError::Cancelled);
        }

        // Forward the rest under the overall deadline.
        let deadline = tokio::time::Instant::now() + overall;
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    attempt_cancel.cancel();
                    return Err(ZekeError::Cancelled);
                }
                _ = tokio::time::sleep_until(deadline) => {
                    attempt_cancel.cancel();
                    return Err(ZekeError::Timeout("overall request".into()));
                }
                next = irx.recv() => next,
            };
            match next {
                Some(delta) => {
                    if tx.send(delta).await.is_err() {
                        attempt_cancel.cancel();
                        return Err(ZekeError::Cancelled);
                    }
                }
                None => break,
            }
        }
        match handle.await {
            Ok(Ok(resp)) => Ok((resp, first_token_ms)),
            Ok(Err(e)) => Err(e),
            Err(e) => Err(ZekeError::Network(format!("stream task: {e}"))),
        }
    }
}

fn advance(phase: &mut StreamPhase, next: StreamPhase) {
    debug_assert!(
        phase.can_transition(next),
        "invalid stream transition {phase:?} -> {next:?}"
    );
    tracing::trace!("stream phase {:?} -> {:?}", phase, next);
    *phase = next;
}

fn unauthorised_for(kind: ProviderKind) -> ZekeError {
    ZekeError::Unauthorised {
        provider: kind.as_str().to_string(),
    }
}

fn describe_final(candidate: &Candidate, e: ZekeError) -> ZekeError {
    tracing::warn!("request failed on {} ({})", candidate.kind, e.code_str());
    e
}
