//! Rate limiting for the subscription endpoints.
//!
//! Limits are applied per caller identity (user id, or IP for webhooks)
//! and per endpoint. Webhooks carry a higher budget because the sender is
//! the billing authority, not an end user.
//!
//! Tiers (requests per minute, configurable via environment):
//! - initiate: 10
//! - verify-purchase: 5
//! - status: 20
//! - cancel: 5
//! - webhook: 100
//!
//! A limiter that cannot reach its counter store fails OPEN: legitimate
//! traffic is never blocked by limiter breakage, the anomaly is logged.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Endpoints with independent budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Initiate,
    VerifyPurchase,
    Status,
    Cancel,
    Webhook,
}

impl Endpoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initiate => "initiate",
            Self::VerifyPurchase => "verify-purchase",
            Self::Status => "status",
            Self::Cancel => "cancel",
            Self::Webhook => "webhook",
        }
    }
}

/// Per-minute budgets for each endpoint.
#[derive(Debug, Clone, Copy)]
pub struct RateBudgets {
    pub initiate: u32,
    pub verify_purchase: u32,
    pub status: u32,
    pub cancel: u32,
    pub webhook: u32,
}

impl Default for RateBudgets {
    fn default() -> Self {
        Self {
            initiate: 10,
            verify_purchase: 5,
            status: 20,
            cancel: 5,
            webhook: 100,
        }
    }
}

impl RateBudgets {
    fn for_endpoint(&self, endpoint: Endpoint) -> u32 {
        match endpoint {
            Endpoint::Initiate => self.initiate,
            Endpoint::VerifyPurchase => self.verify_purchase,
            Endpoint::Status => self.status,
            Endpoint::Cancel => self.cancel,
            Endpoint::Webhook => self.webhook,
        }
    }
}

/// Outcome of a rate limit check, carrying everything the handler needs
/// for `X-RateLimit-*` and `Retry-After` headers.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Seconds until the current window resets.
    pub reset_secs: u64,
    /// Seconds the caller should wait before retrying (0 when allowed).
    pub retry_after_secs: u64,
}

impl RateLimitDecision {
    fn open(limit: u32) -> Self {
        Self {
            allowed: true,
            limit,
            remaining: limit,
            reset_secs: 0,
            retry_after_secs: 0,
        }
    }
}

/// Interchangeable counting strategy keyed by `(identifier, endpoint)`.
///
/// This trait is also the seam for a shared backing store in a
/// multi-instance deployment: swap the in-memory maps for a networked
/// TTL-capable store and the algorithm is unchanged.
pub trait RateLimitStrategy: Send + Sync {
    fn check(&self, identifier: &str, endpoint: &str, limit: u32, window: Duration)
        -> RateLimitDecision;
}

// ============ Fixed window ============

struct WindowCounter {
    count: u32,
    window_start: Instant,
}

/// Counter reset at window boundaries. Cheap, but permits up to 2x the
/// budget straddling a boundary.
#[derive(Default)]
pub struct FixedWindowLimiter {
    counters: Mutex<HashMap<(String, String), WindowCounter>>,
}

impl FixedWindowLimiter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RateLimitStrategy for FixedWindowLimiter {
    fn check(
        &self,
        identifier: &str,
        endpoint: &str,
        limit: u32,
        window: Duration,
    ) -> RateLimitDecision {
        let mut counters = match self.counters.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("Rate limit counter store poisoned; failing open");
                poisoned.into_inner()
            }
        };

        let key = (identifier.to_string(), endpoint.to_string());
        let now = Instant::now();
        let entry = counters.entry(key).or_insert(WindowCounter {
            count: 0,
            window_start: now,
        });

        let elapsed = now.duration_since(entry.window_start);
        if elapsed >= window {
            entry.count = 0;
            entry.window_start = now;
        }

        entry.count += 1;
        let remaining_window = window.saturating_sub(now.duration_since(entry.window_start));
        let reset_secs = remaining_window.as_secs().max(1);

        if entry.count > limit {
            RateLimitDecision {
                allowed: false,
                limit,
                remaining: 0,
                reset_secs,
                retry_after_secs: reset_secs,
            }
        } else {
            RateLimitDecision {
                allowed: true,
                limit,
                remaining: limit - entry.count,
                reset_secs,
                retry_after_secs: 0,
            }
        }
    }
}

// ============ Sliding window ============

/// Timestamp-list strategy: smoother than fixed windows, memory
/// proportional to the request rate.
#[derive(Default)]
pub struct SlidingWindowLimiter {
    requests: Mutex<HashMap<(String, String), Vec<Instant>>>,
}

impl SlidingWindowLimiter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RateLimitStrategy for SlidingWindowLimiter {
    fn check(
        &self,
        identifier: &str,
        endpoint: &str,
        limit: u32,
        window: Duration,
    ) -> RateLimitDecision {
        let mut requests = match self.requests.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("Rate limit timestamp store poisoned; failing open");
                poisoned.into_inner()
            }
        };

        let key = (identifier.to_string(), endpoint.to_string());
        let now = Instant::now();
        let timestamps = requests.entry(key).or_default();
        timestamps.retain(|t| now.duration_since(*t) < window);

        if timestamps.len() as u32 >= limit {
            // Oldest surviving request determines when capacity frees up.
            let retry = timestamps
                .first()
                .map(|t| window.saturating_sub(now.duration_since(*t)).as_secs().max(1))
                .unwrap_or(1);
            return RateLimitDecision {
                allowed: false,
                limit,
                remaining: 0,
                reset_secs: retry,
                retry_after_secs: retry,
            };
        }

        timestamps.push(now);
        RateLimitDecision {
            allowed: true,
            limit,
            remaining: limit - timestamps.len() as u32,
            reset_secs: window.as_secs(),
            retry_after_secs: 0,
        }
    }
}

// ============ Adaptive scaling ============

/// Resource pressure readings in `[0, 1]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourcePressure {
    pub cpu: f64,
    pub memory: f64,
    pub db_connections: f64,
}

/// Source of pressure readings. Process-local by default; a deployment
/// with an external monitor plugs in here.
pub trait PressureProbe: Send + Sync {
    fn sample(&self) -> ResourcePressure;
}

/// Probe that always reports an idle system.
pub struct IdleProbe;

impl PressureProbe for IdleProbe {
    fn sample(&self) -> ResourcePressure {
        ResourcePressure::default()
    }
}

/// Thresholds above which each resource shrinks the effective limit.
#[derive(Debug, Clone, Copy)]
pub struct PressureThresholds {
    pub cpu: f64,
    pub memory: f64,
    pub db_connections: f64,
}

impl Default for PressureThresholds {
    fn default() -> Self {
        Self {
            cpu: 0.8,
            memory: 0.85,
            db_connections: 0.9,
        }
    }
}

/// Effective limit after pressure scaling: CPU pressure scales by 0.7,
/// memory by 0.6, DB connection pressure by 0.5, compounding, floor 1.
pub fn scaled_limit(base: u32, pressure: ResourcePressure, thresholds: PressureThresholds) -> u32 {
    let mut limit = base as f64;
    if pressure.cpu > thresholds.cpu {
        limit *= 0.7;
    }
    if pressure.memory > thresholds.memory {
        limit *= 0.6;
    }
    if pressure.db_connections > thresholds.db_connections {
        limit *= 0.5;
    }
    (limit.floor() as u32).max(1)
}

// ============ Front door ============

/// Per-endpoint limiter handed to handlers via AppState.
pub struct RateLimiter {
    strategy: Box<dyn RateLimitStrategy>,
    probe: Box<dyn PressureProbe>,
    budgets: RateBudgets,
    thresholds: PressureThresholds,
    window: Duration,
}

impl RateLimiter {
    pub fn new(budgets: RateBudgets) -> Self {
        Self {
            strategy: Box::new(FixedWindowLimiter::new()),
            probe: Box::new(IdleProbe),
            budgets,
            thresholds: PressureThresholds::default(),
            window: Duration::from_secs(60),
        }
    }

    pub fn with_strategy(mut self, strategy: Box<dyn RateLimitStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_probe(mut self, probe: Box<dyn PressureProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Check and consume one request slot for `identifier` on `endpoint`.
    pub fn check(&self, endpoint: Endpoint, identifier: &str) -> RateLimitDecision {
        let base = self.budgets.for_endpoint(endpoint);
        let limit = scaled_limit(base, self.probe.sample(), self.thresholds);
        let decision = self
            .strategy
            .check(identifier, endpoint.as_str(), limit, self.window);

        if !decision.allowed {
            tracing::warn!(
                endpoint = endpoint.as_str(),
                identifier,
                limit,
                "Rate limit exceeded"
            );
        }
        decision
    }

    /// Fail-open wrapper used when the caller treats limiter trouble as
    /// non-fatal (which is all of them).
    pub fn check_or_open(&self, endpoint: Endpoint, identifier: &str) -> RateLimitDecision {
        let base = self.budgets.for_endpoint(endpoint);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.check(endpoint, identifier)
        }));
        match result {
            Ok(decision) => decision,
            Err(_) => {
                tracing::error!(
                    endpoint = endpoint.as_str(),
                    "Rate limiter failure; failing open"
                );
                RateLimitDecision::open(base)
            }
        }
    }
}
