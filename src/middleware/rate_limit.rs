//! Sliding-window rate limiting
//!
//! Each `RateLimiter` owns its bucket map, so independent policies (inbound
//! calls, registrations, logins) never share state. Buckets are created on
//! first use and pruned lazily on each access; there is no background sweep,
//! so keys that stop calling keep a small (at most `limit`) allocation.

use crate::config::RateLimitRule;
use crate::error::AppError;
use axum::{body::Body, extract::ConnectInfo, http::Request};
use std::{
    collections::{HashMap, VecDeque},
    net::{IpAddr, SocketAddr},
    sync::{Mutex, PoisonError},
    time::{Duration, Instant},
};

/// Outcome of one admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Whether the call is admitted
    pub allowed: bool,
    /// Admissions left in the current window after this call
    pub remaining: usize,
    /// Time until the oldest retained admission leaves the window (denials only)
    pub retry_after: Option<Duration>,
}

impl RateLimitDecision {
    /// Whole seconds to wait, rounded up, for the `Retry-After` header
    pub fn retry_after_secs(&self) -> Option<u64> {
        self.retry_after.map(|d| {
            let secs = d.as_secs();
            if d.subsec_nanos() > 0 {
                secs + 1
            } else {
                secs
            }
        })
    }
}

/// At most `limit` admissions per rolling `window`, per key
#[derive(Debug)]
pub struct RateLimiter {
    name: &'static str,
    limit: usize,
    window: Duration,
    buckets: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(name: &'static str, limit: usize, window: Duration) -> Self {
        Self {
            name,
            limit,
            window,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_rule(name: &'static str, rule: RateLimitRule) -> Self {
        Self::new(name, rule.requests, rule.window)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Check and record a call. Returns `true` if admitted.
    pub fn allow(&self, key: &str) -> bool {
        self.check(key).allowed
    }

    pub fn check(&self, key: &str) -> RateLimitDecision {
        self.check_at(key, Instant::now())
    }

    /// Prune, count and append as one step under the lock.
    pub fn check_at(&self, key: &str, now: Instant) -> RateLimitDecision {
        let mut buckets = self
            .buckets
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let timestamps = buckets.entry(key.to_string()).or_default();

        // Evict admissions that have left the window
        while let Some(&oldest) = timestamps.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                timestamps.pop_front();
            } else {
                break;
            }
        }

        if timestamps.len() >= self.limit {
            let retry_after = timestamps
                .front()
                .map(|&oldest| self.window.saturating_sub(now.saturating_duration_since(oldest)))
                .unwrap_or(self.window);
            return RateLimitDecision {
                allowed: false,
                remaining: 0,
                retry_after: Some(retry_after),
            };
        }

        timestamps.push_back(now);
        RateLimitDecision {
            allowed: true,
            remaining: self.limit - timestamps.len(),
            retry_after: None,
        }
    }

    /// Like `check`, but a denial becomes a `RateLimited` error carrying `message`
    pub fn enforce(&self, key: &str, message: &str) -> Result<RateLimitDecision, AppError> {
        let decision = self.check(key);
        if decision.allowed {
            return Ok(decision);
        }

        metrics::counter!("taskgate_rate_limit_throttled_total", "limiter" => self.name)
            .increment(1);
        tracing::warn!(limiter = self.name, key = %key, "Rate limit exceeded");
        Err(AppError::RateLimited {
            message: message.to_string(),
            retry_after_secs: decision.retry_after_secs(),
        })
    }

    /// Number of keys that currently own a bucket
    pub fn tracked_keys(&self) -> usize {
        self.buckets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Header a trusted proxy uses to pass on the caller address
pub const REAL_IP_HEADER: &str = "x-real-ip";

/// Caller address used as the inbound rate-limit key (host only, no port).
///
/// The socket address recorded by `axum::serve` wins unless `trust_forwarded`
/// is set, in which case an `X-Real-IP` from the gateway is preferred. Either
/// source is the fallback for the other.
pub fn client_ip(request: &Request<Body>, trust_forwarded: bool) -> Option<IpAddr> {
    let socket = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let forwarded = request
        .headers()
        .get(REAL_IP_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse().ok());

    if trust_forwarded {
        forwarded.or(socket)
    } else {
        socket.or(forwarded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_twelve_calls_in_one_second() {
        let limiter = RateLimiter::new("inbound", 10, Duration::from_secs(60));
        let start = Instant::now();

        let results: Vec<bool> = (0..12)
            .map(|i| {
                limiter
                    .check_at("ip1", start + Duration::from_millis(i * 50))
                    .allowed
            })
            .collect();

        assert!(results[..10].iter().all(|&allowed| allowed));
        assert!(!results[10]);
        assert!(!results[11]);
    }

    #[test]
    fn test_window_slides() {
        let limiter = RateLimiter::new("t", 2, Duration::from_secs(10));
        let t0 = Instant::now();

        assert!(limiter.check_at("k", t0).allowed);
        assert!(limiter.check_at("k", t0 + Duration::from_secs(4)).allowed);
        assert!(!limiter.check_at("k", t0 + Duration::from_secs(9)).allowed);
        // first admission leaves the window at t0 + 10s
        assert!(limiter.check_at("k", t0 + Duration::from_secs(10)).allowed);
        assert!(!limiter.check_at("k", t0 + Duration::from_secs(13)).allowed);
        assert!(limiter.check_at("k", t0 + Duration::from_secs(14)).allowed);
    }

    #[test]
    fn test_denials_are_not_recorded() {
        let limiter = RateLimiter::new("t", 1, Duration::from_secs(10));
        let t0 = Instant::now();

        assert!(limiter.check_at("k", t0).allowed);
        for s in 1..10 {
            assert!(!limiter.check_at("k", t0 + Duration::from_secs(s)).allowed);
        }
        assert!(limiter.check_at("k", t0 + Duration::from_secs(10)).allowed);
    }

    #[test]
    fn test_admissions_never_exceed_limit_in_any_window() {
        let limit = 5;
        let window = Duration::from_millis(1000);
        let limiter = RateLimiter::new("t", limit, window);
        let t0 = Instant::now();

        // irregular arrival pattern over ~6 windows
        let mut admitted = Vec::new();
        for i in 0u64..400 {
            let at = t0 + Duration::from_millis(i * 17 + (i % 7) * 3);
            if limiter.check_at("k", at).allowed {
                admitted.push(at);
            }
        }

        assert!(!admitted.is_empty());
        for (idx, &start) in admitted.iter().enumerate() {
            let in_window = admitted[idx..]
                .iter()
                .take_while(|&&t| t.saturating_duration_since(start) < window)
                .count();
            assert!(in_window <= limit, "window starting at #{} admitted {}", idx, in_window);
        }
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = RateLimiter::new("t", 1, Duration::from_secs(60));
        assert!(limiter.allow("a"));
        assert!(!limiter.allow("a"));
        assert!(limiter.allow("b"));
        assert_eq!(limiter.tracked_keys(), 2);
    }

    #[test]
    fn test_instances_are_independent() {
        let register = RateLimiter::new("register", 1, Duration::from_secs(60));
        let login = RateLimiter::new("login", 1, Duration::from_secs(60));
        assert!(register.allow("a@example.com"));
        assert!(login.allow("a@example.com"));
        assert!(!register.allow("a@example.com"));
    }

    #[test]
    fn test_remaining_and_retry_after() {
        let limiter = RateLimiter::new("t", 3, Duration::from_secs(60));
        let t0 = Instant::now();

        assert_eq!(limiter.check_at("k", t0).remaining, 2);
        assert_eq!(limiter.check_at("k", t0).remaining, 1);
        assert_eq!(limiter.check_at("k", t0).remaining, 0);

        let denied = limiter.check_at("k", t0 + Duration::from_millis(20_500));
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after, Some(Duration::from_millis(39_500)));
        assert_eq!(denied.retry_after_secs(), Some(40));
    }

    #[test]
    fn test_enforce_maps_denial_to_error() {
        let limiter = RateLimiter::new("login", 1, Duration::from_secs(60));
        assert!(limiter.enforce("a@example.com", "slow down").is_ok());

        match limiter.enforce("a@example.com", "slow down") {
            Err(AppError::RateLimited {
                message,
                retry_after_secs,
            }) => {
                assert_eq!(message, "slow down");
                assert!(matches!(retry_after_secs, Some(s) if s > 0 && s <= 60));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_zero_limit_denies_everything() {
        let limiter = RateLimiter::new("t", 0, Duration::from_secs(1));
        assert!(!limiter.allow("k"));
    }

    #[test]
    fn test_concurrent_callers_share_the_limit() {
        let limiter = Arc::new(RateLimiter::new("t", 50, Duration::from_secs(60)));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || (0..20).filter(|_| limiter.allow("shared")).count())
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 50);
    }

    #[test]
    fn test_client_ip_from_connect_info() {
        let mut request = Request::builder().uri("/").body(Body::empty()).unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 7], 51234))));
        assert_eq!(client_ip(&request, false), Some(IpAddr::from([10, 0, 0, 7])));
        assert_eq!(client_ip(&request, true), Some(IpAddr::from([10, 0, 0, 7])));
    }

    #[test]
    fn test_client_ip_from_real_ip_header() {
        let request = Request::builder()
            .uri("/")
            .header("x-real-ip", "192.168.1.20")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_ip(&request, false), Some(IpAddr::from([192, 168, 1, 20])));

        let bare = Request::builder().uri("/").body(Body::empty()).unwrap();
        assert_eq!(client_ip(&bare, false), None);
    }

    #[test]
    fn test_forwarded_address_wins_only_when_trusted() {
        let mut request = Request::builder()
            .uri("/")
            .header(REAL_IP_HEADER, "203.0.113.9")
            .body(Body::empty())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 1], 40000))));

        assert_eq!(client_ip(&request, false), Some(IpAddr::from([10, 0, 0, 1])));
        assert_eq!(client_ip(&request, true), Some(IpAddr::from([203, 0, 113, 9])));
    }
}
