//! Per-client token-bucket rate limiting.
//!
//! Each client IP owns a bucket holding up to `burst` tokens, refilled at
//! `per_minute / 60` tokens per second of elapsed time. A request spends one
//! token; an empty bucket answers 429. Time comes from an injected [`Clock`].

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use parking_lot::Mutex;
use tracing::warn;

use crate::response::error_response;

/// Source of monotonic time for refills.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// The process clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock()
    }
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Buckets beyond this count trigger a sweep of idle, full buckets.
const PRUNE_THRESHOLD: usize = 10_000;

/// Token buckets keyed by client address.
pub struct RateLimiter {
    clock: Arc<dyn Clock>,
    capacity: f64,
    refill_per_sec: f64,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    pub fn new(per_minute: u32, burst: u32, clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            capacity: f64::from(burst.max(1)),
            refill_per_sec: f64::from(per_minute) / 60.0,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Spend one token for `key`.
    ///
    /// On refusal returns how long until a token is available.
    pub fn check(&self, key: &str) -> Result<(), Duration> {
        let now = self.clock.now();
        let mut buckets = self.buckets.lock();
        if buckets.len() > PRUNE_THRESHOLD {
            self.prune(&mut buckets, now);
        }

        let bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            tokens: self.capacity,
            last_refill: now,
        });
        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else if self.refill_per_sec > 0.0 {
            Err(Duration::from_secs_f64((1.0 - bucket.tokens) / self.refill_per_sec))
        } else {
            Err(Duration::MAX)
        }
    }

    /// Number of tracked clients.
    pub fn tracked(&self) -> usize {
        self.buckets.lock().len()
    }

    fn prune(&self, buckets: &mut HashMap<String, Bucket>, now: Instant) {
        buckets.retain(|_, b| {
            let elapsed = now.saturating_duration_since(b.last_refill).as_secs_f64();
            b.tokens + elapsed * self.refill_per_sec < self.capacity
        });
    }
}

/// Client address: first `X-Forwarded-For` hop, `X-Real-IP`, then the peer.
pub fn client_ip(req: &Request) -> String {
    if let Some(first) = header(req, "x-forwarded-for")
        .and_then(|xff| xff.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return first.to_string();
    }
    if let Some(real) = header(req, "x-real-ip") {
        return real.to_string();
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn header<'a>(req: &'a Request, name: &str) -> Option<&'a str> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Rejects requests from clients whose bucket is empty.
pub async fn rate_limit(State(limiter): State<Arc<RateLimiter>>, req: Request, next: Next) -> Response {
    let ip = client_ip(&req);
    match limiter.check(&ip) {
        Ok(()) => next.run(req).await,
        Err(retry_after) => {
            warn!(client = %ip, "rate limit exceeded");
            let secs = retry_after.as_secs().clamp(1, 3600);
            let mut resp = error_response("rate limit exceeded", StatusCode::TOO_MANY_REQUESTS);
            if let Ok(value) = secs.to_string().parse() {
                resp.headers_mut().insert("retry-after", value);
            }
            resp
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn limiter(per_minute: u32, burst: u32) -> (Arc<ManualClock>, RateLimiter) {
        let clock = Arc::new(ManualClock::new());
        let limiter = RateLimiter::new(per_minute, burst, clock.clone());
        (clock, limiter)
    }

    #[test]
    fn burst_then_refuse() {
        let (_, rl) = limiter(60, 3);
        assert!(rl.check("1.1.1.1").is_ok());
        assert!(rl.check("1.1.1.1").is_ok());
        assert!(rl.check("1.1.1.1").is_ok());
        let retry = rl.check("1.1.1.1").unwrap_err();
        assert!(retry <= Duration::from_secs(1));
    }

    #[test]
    fn refills_with_elapsed_time() {
        let (clock, rl) = limiter(60, 1);
        assert!(rl.check("a").is_ok());
        assert!(rl.check("a").is_err());

        clock.advance(Duration::from_millis(500));
        assert!(rl.check("a").is_err());
        clock.advance(Duration::from_millis(500));
        assert!(rl.check("a").is_ok());
    }

    #[test]
    fn refill_is_capped_at_burst() {
        let (clock, rl) = limiter(60, 2);
        clock.advance(Duration::from_secs(3600));
        assert!(rl.check("a").is_ok());
        assert!(rl.check("a").is_ok());
        assert!(rl.check("a").is_err());
    }

    #[test]
    fn clients_are_independent() {
        let (_, rl) = limiter(60, 1);
        assert!(rl.check("a").is_ok());
        assert!(rl.check("a").is_err());
        assert!(rl.check("b").is_ok());
        assert_eq!(rl.tracked(), 2);
    }

    #[test]
    fn client_ip_precedence() {
        let req = axum::http::Request::builder()
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .header("x-real-ip", "198.51.100.2")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_ip(&req), "203.0.113.7");

        let req = axum::http::Request::builder()
            .header("x-real-ip", "198.51.100.2")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_ip(&req), "198.51.100.2");

        let mut req = axum::http::Request::builder().body(Body::empty()).unwrap();
        req.extensions_mut()
            .insert(ConnectInfo("192.0.2.9:4000".parse::<SocketAddr>().unwrap()));
        assert_eq!(client_ip(&req), "192.0.2.9");
    }
}
