//! Per-client sliding-window rate limiting for the iterate endpoints.
//!
//! Every admitted request records its arrival time; a client is refused once
//! it has `capacity` arrivals inside the trailing window.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::{debug, warn};

use crate::api::ErrorBody;

/// Above this many tracked clients, idle ones are purged on the next check.
const MAX_TRACKED_CLIENTS: usize = 10_000;

/// The outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub limit: usize,
    pub remaining: usize,
    /// Epoch seconds at which the window frees up.
    pub reset_at: u64,
    /// Set only on rejection.
    pub retry_after_secs: Option<u64>,
}

/// Sliding-window limiter keyed by client identity.
///
/// Held briefly under a `std::sync::Mutex`; never across an await.
pub struct RateLimiter {
    capacity: usize,
    window: Duration,
    clients: Mutex<HashMap<String, Vec<f64>>>,
}

impl RateLimiter {
    pub fn new(capacity: usize, window: Duration) -> Self {
        Self {
            capacity,
            window,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Check and record a request arriving now.
    pub fn check(&self, client: &str) -> Decision {
        let now = chrono::Utc::now().timestamp_millis() as f64 / 1000.0;
        self.check_at(client, now)
    }

    /// Check and record a request arriving at `now` (epoch seconds).
    pub fn check_at(&self, client: &str, now: f64) -> Decision {
        let window = self.window.as_secs_f64();
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());

        if clients.len() > MAX_TRACKED_CLIENTS {
            clients.retain(|_, stamps| stamps.last().is_some_and(|t| now - t < window));
        }

        let stamps = clients.entry(client.to_string()).or_default();
        stamps.retain(|t| now - t < window);

        if stamps.len() >= self.capacity {
            let oldest = stamps.first().copied().unwrap_or(now);
            let retry_after = (window - (now - oldest)).ceil().max(1.0) as u64;
            return Decision {
                allowed: false,
                limit: self.capacity,
                remaining: 0,
                reset_at: (oldest + window).ceil() as u64,
                retry_after_secs: Some(retry_after),
            };
        }

        let remaining = self.capacity - stamps.len() - 1;
        stamps.push(now);
        Decision {
            allowed: true,
            limit: self.capacity,
            remaining,
            reset_at: (now + window) as u64,
            retry_after_secs: None,
        }
    }
}

/// Identify the caller: first `X-Forwarded-For` hop, then `X-Real-IP`,
/// then the socket peer.
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    if let Some(forwarded) = header("x-forwarded-for") {
        if let Some(first) = forwarded.split(',').map(str::trim).find(|s| !s.is_empty()) {
            return first.to_string();
        }
    }
    if let Some(real_ip) = header("x-real-ip") {
        return real_ip.to_string();
    }
    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn apply_headers(headers: &mut HeaderMap, decision: &Decision) {
    let pairs = [
        ("x-ratelimit-limit", Some(decision.limit as u64)),
        ("x-ratelimit-remaining", Some(decision.remaining as u64)),
        ("x-ratelimit-reset", Some(decision.reset_at)),
        ("retry-after", decision.retry_after_secs),
    ];
    for (name, value) in pairs {
        if let Some(value) = value {
            headers.insert(HeaderName::from_static(name), HeaderValue::from(value));
        }
    }
}

/// Middleware guarding the iterate routes. Returns 429 once the client's
/// window is full; rate-limit headers are attached either way.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    req: Request,
    next: Next,
) -> Response {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client = client_key(req.headers(), peer);
    let decision = limiter.check(&client);

    if !decision.allowed {
        let retry_after = decision.retry_after_secs.unwrap_or_default();
        warn!(client = %client, retry_after, path = %req.uri().path(), "Rate limit exceeded");
        let body = ErrorBody {
            detail: format!(
                "Rate limit exceeded. Maximum {} iterations per hour. Try again in {retry_after} seconds.",
                decision.limit
            ),
        };
        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
        apply_headers(response.headers_mut(), &decision);
        return response;
    }

    debug!(client = %client, remaining = decision.remaining, "Rate limit check passed");
    let mut response = next.run(req).await;
    apply_headers(response.headers_mut(), &decision);
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn admits_up_to_capacity_then_rejects() {
        let limiter = RateLimiter::new(10, HOUR);
        let t0 = 1_700_000_000.0;

        for i in 0..10 {
            let decision = limiter.check_at("1.2.3.4", t0 + i as f64);
            assert!(decision.allowed, "request {i} refused");
            assert_eq!(decision.remaining, 9 - i);
            assert_eq!(decision.reset_at, (t0 + i as f64 + 3600.0) as u64);
        }

        let rejected = limiter.check_at("1.2.3.4", t0 + 100.0);
        assert!(!rejected.allowed);
        assert_eq!(rejected.remaining, 0);
        let retry_after = rejected.retry_after_secs.unwrap();
        assert!(retry_after <= 3600);
        assert_eq!(retry_after, 3500);
    }

    #[test]
    fn admitted_again_once_retry_after_elapses() {
        let limiter = RateLimiter::new(10, HOUR);
        let t0 = 1_700_000_000.0;
        for i in 0..10 {
            limiter.check_at("c", t0 + i as f64 * 0.5);
        }

        let rejected = limiter.check_at("c", t0 + 60.25);
        let wait = rejected.retry_after_secs.unwrap() as f64;
        assert!(!limiter.check_at("c", t0 + 60.25 + wait - 1.0).allowed);
        assert!(limiter.check_at("c", t0 + 60.25 + wait).allowed);
    }

    #[test]
    fn rejections_are_not_recorded() {
        let limiter = RateLimiter::new(1, HOUR);
        let t0 = 1_700_000_000.0;
        assert!(limiter.check_at("c", t0).allowed);
        for i in 1..50 {
            assert!(!limiter.check_at("c", t0 + i as f64).allowed);
        }
        assert!(limiter.check_at("c", t0 + 3600.0).allowed);
    }

    #[test]
    fn clients_are_independent() {
        let limiter = RateLimiter::new(1, HOUR);
        assert!(limiter.check_at("a", 0.0).allowed);
        assert!(!limiter.check_at("a", 1.0).allowed);
        assert!(limiter.check_at("b", 1.0).allowed);
    }

    #[test]
    fn client_key_precedence() {
        let peer: SocketAddr = "10.0.0.9:5555".parse().unwrap();

        let mut headers = HeaderMap::new();
        assert_eq!(client_key(&headers, None), "unknown");
        assert_eq!(client_key(&headers, Some(peer)), "10.0.0.9");

        headers.insert("x-real-ip", HeaderValue::from_static("172.16.0.1"));
        assert_eq!(client_key(&headers, Some(peer)), "172.16.0.1");

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static(" 203.0.113.7 , 70.41.3.18"),
        );
        assert_eq!(client_key(&headers, Some(peer)), "203.0.113.7");
    }

    #[test]
    fn headers_written_for_rejection() {
        let mut headers = HeaderMap::new();
        apply_headers(
            &mut headers,
            &Decision {
                allowed: false,
                limit: 10,
                remaining: 0,
                reset_at: 1_700_003_600,
                retry_after_secs: Some(42),
            },
        );
        assert_eq!(headers["x-ratelimit-limit"], "10");
        assert_eq!(headers["x-ratelimit-remaining"], "0");
        assert_eq!(headers["x-ratelimit-reset"], "1700003600");
        assert_eq!(headers["retry-after"], "42");
    }
}
