// rate_limit.rs - Per-route fixed-window request accounting
// Three independent limiters (general API, query endpoint, auth endpoint) share
// one counting-store abstraction so a multi-instance deployment can swap the
// in-memory map for an external store.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::warn;

use crate::core::config::{RateLimitConfig, WindowConfig};
use crate::core::error::ApiError;

/// Snapshot of one client's window after a read or an increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowState {
    pub count: u32,
    /// Time left until the window resets.
    pub resets_in: Duration,
}

/// Storage for fixed-window counters.
///
/// Implementations must make `increment` atomic per key: two interleaved
/// requests from the same client must never observe the same count.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Adds one hit to `key`, opening a new window first if the current one
    /// has elapsed.
    async fn increment(&self, key: &str, window: Duration) -> WindowState;

    /// Gives back one hit taken by `increment`. No-op once the window elapsed.
    async fn release(&self, key: &str);

    /// Current count for `key` without adding a hit. Elapsed windows read as zero.
    async fn current(&self, key: &str, window: Duration) -> WindowState;

    async fn reset(&self, key: &str);
}

// Above this many tracked keys, expired windows are dropped on the next write.
const SWEEP_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone, Copy)]
struct Slot {
    expires: Instant,
    count: u32,
}

impl Slot {
    fn open(now: Instant, window: Duration) -> Self {
        Self {
            expires: now + window,
            count: 0,
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        now < self.expires
    }

    fn state(&self, now: Instant) -> WindowState {
        WindowState {
            count: self.count,
            resets_in: self.expires.saturating_duration_since(now),
        }
    }
}

/// Process-local store. Counters are not shared across instances.
///
/// Windows are fixed: a client can burst up to twice the threshold across a
/// window boundary. Each slot carries its own expiry, so limiters with
/// different windows can share one store.
#[derive(Debug, Default)]
pub struct InMemoryCounterStore {
    slots: Mutex<HashMap<String, Slot>>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn sweep(slots: &mut HashMap<String, Slot>, now: Instant) {
        if slots.len() > SWEEP_THRESHOLD {
            slots.retain(|_, s| s.is_live(now));
        }
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> WindowState {
        let now = Instant::now();
        let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        Self::sweep(&mut slots, now);

        let slot = slots
            .entry(key.to_string())
            .or_insert_with(|| Slot::open(now, window));
        if !slot.is_live(now) {
            *slot = Slot::open(now, window);
        }
        slot.count = slot.count.saturating_add(1);
        slot.state(now)
    }

    async fn release(&self, key: &str) {
        let now = Instant::now();
        let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(slot) = slots.get_mut(key).filter(|s| s.is_live(now)) {
            slot.count = slot.count.saturating_sub(1);
        }
    }

    async fn current(&self, key: &str, window: Duration) -> WindowState {
        let now = Instant::now();
        let slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        match slots.get(key) {
            Some(slot) if slot.is_live(now) => slot.state(now),
            _ => WindowState {
                count: 0,
                resets_in: window,
            },
        }
    }

    async fn reset(&self, key: &str) {
        let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        slots.remove(key);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountMode {
    /// Every request counts toward the threshold.
    AllRequests,
    /// Only responses with status >= 400 count (failed login attempts).
    FailuresOnly,
}

pub struct RateLimiter {
    name: &'static str,
    code: &'static str,
    message: &'static str,
    config: WindowConfig,
    mode: CountMode,
    trust_proxy: bool,
    store: Arc<dyn CounterStore>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("mode", &self.mode)
            .field("trust_proxy", &self.trust_proxy)
            .finish()
    }
}

impl RateLimiter {
    pub fn general(config: WindowConfig, store: Arc<dyn CounterStore>) -> Self {
        Self {
            name: "general",
            code: "TOO_MANY_REQUESTS",
            message: "Too many requests, please try again later",
            config,
            mode: CountMode::AllRequests,
            trust_proxy: false,
            store,
        }
    }

    pub fn query(config: WindowConfig, store: Arc<dyn CounterStore>) -> Self {
        Self {
            name: "query",
            code: "QUERY_RATE_LIMIT_EXCEEDED",
            message: "Query rate limit exceeded, please slow down",
            config,
            mode: CountMode::AllRequests,
            trust_proxy: false,
            store,
        }
    }

    pub fn auth(config: WindowConfig, store: Arc<dyn CounterStore>) -> Self {
        Self {
            name: "auth",
            code: "TOO_MANY_AUTH_ATTEMPTS",
            message: "Too many failed login attempts, please try again later",
            config,
            mode: CountMode::FailuresOnly,
            trust_proxy: false,
            store,
        }
    }

    /// Keys clients on the first `X-Forwarded-For` hop instead of the peer.
    pub fn trusting_proxy(mut self, trust_proxy: bool) -> Self {
        self.trust_proxy = trust_proxy;
        self
    }

    fn key(&self, client: &str) -> String {
        format!("{}:{}", self.name, client)
    }

    fn rejection(&self, state: WindowState) -> ApiError {
        ApiError::TooManyRequests {
            code: self.code,
            message: self.message.to_string(),
            retry_after_secs: state.resets_in.as_secs().max(1),
        }
    }

    /// Admission check for `client`.
    ///
    /// Every admitted request takes a hit up front, so concurrent requests
    /// can never overshoot the threshold. Failure-only limiters hand the hit
    /// back in [`record_outcome`](Self::record_outcome) when the request
    /// succeeds, and immediately when it is rejected.
    pub async fn check(&self, client: &str) -> Result<WindowState, ApiError> {
        let key = self.key(client);
        let state = self.store.increment(&key, self.config.window).await;
        if state.count > self.config.max {
            if self.mode == CountMode::FailuresOnly {
                self.store.release(&key).await;
            }
            warn!(limiter = self.name, client, "rate limit exceeded");
            return Err(self.rejection(state));
        }
        Ok(state)
    }

    /// Settles the hit taken by an admitted request.
    pub async fn record_outcome(&self, client: &str, failed: bool) {
        if self.mode == CountMode::FailuresOnly && !failed {
            self.store.release(&self.key(client)).await;
        }
    }

    fn remaining(&self, state: WindowState) -> u32 {
        self.config.max.saturating_sub(state.count)
    }
}

/// The three limiters wired into the router.
#[derive(Debug, Clone)]
pub struct RateLimiters {
    pub general: Arc<RateLimiter>,
    pub query: Arc<RateLimiter>,
    pub auth: Arc<RateLimiter>,
}

impl RateLimiters {
    pub fn new(config: &RateLimitConfig, store: Arc<dyn CounterStore>) -> Self {
        let trust = config.trust_proxy;
        Self {
            general: Arc::new(RateLimiter::general(config.general, store.clone()).trusting_proxy(trust)),
            query: Arc::new(RateLimiter::query(config.query, store.clone()).trusting_proxy(trust)),
            auth: Arc::new(RateLimiter::auth(config.auth, store).trusting_proxy(trust)),
        }
    }

    pub fn in_memory(config: &RateLimitConfig) -> Self {
        Self::new(config, Arc::new(InMemoryCounterStore::new()))
    }
}

/// Client identity: the socket address, or the first `X-Forwarded-For` hop
/// when the deployment trusts its proxy.
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>, trust_proxy: bool) -> String {
    if trust_proxy {
        if let Some(forwarded) = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
        {
            return forwarded.to_string();
        }
    }
    peer.map(|p| p.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// axum middleware: `middleware::from_fn_with_state(limiter, rate_limit::enforce)`.
pub async fn enforce(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client = client_key(request.headers(), peer, limiter.trust_proxy);

    let state = match limiter.check(&client).await {
        Ok(state) => state,
        Err(rejection) => return rejection.into_response(),
    };

    let mut response = next.run(request).await;
    let failed = response.status().is_client_error() || response.status().is_server_error();
    limiter.record_outcome(&client, failed).await;

    let headers = response.headers_mut();
    if let Ok(v) = HeaderValue::from_str(&limiter.config.max.to_string()) {
        headers.insert("ratelimit-limit", v);
    }
    if let Ok(v) = HeaderValue::from_str(&limiter.remaining(state).to_string()) {
        headers.insert("ratelimit-remaining", v);
    }
    response
}
