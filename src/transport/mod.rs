//! Rate-limited HTTP transport.
//!
//! Every outbound request goes through [`RestClient::send`], which enforces
//! the global and per-route cooldown windows, classifies transient failures,
//! and retries with exponential backoff and jitter. The transport knows
//! nothing about the purge pipeline; it is a pure cross-cutting policy layer.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use rand::Rng;
use reqwest::header::{HeaderMap, AUTHORIZATION};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, warn};
use url::Url;

use crate::constants::{DEFAULT_BACKOFF_MS, MAX_BACKOFF_MS};

/// Rate-limit bucket: one HTTP method plus URL path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteKey {
    pub method: Method,
    pub path: String,
}

impl RouteKey {
    fn new(method: &Method, url: &Url) -> Self {
        Self {
            method: method.clone(),
            path: url.path().to_string(),
        }
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// Key into the cooldown map: a specific route, or the cross-route global
/// limit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CooldownKey {
    Global,
    Route(RouteKey),
}

/// Retry tuning for the transport. Defaults follow the production backoff
/// ladder; tests shrink the delays.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// First step of the exponential backoff ladder.
    pub base_backoff: Duration,
    /// Ceiling for exponential backoff.
    pub max_backoff: Duration,
    /// Attempt budget for network failures and 5xx responses.
    pub max_attempts: u32,
    /// Floor applied to any server-suggested rate-limit wait.
    pub min_ratelimit_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_backoff: Duration::from_millis(DEFAULT_BACKOFF_MS),
            max_backoff: Duration::from_millis(MAX_BACKOFF_MS),
            max_attempts: 3,
            min_ratelimit_wait: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// `min(base * 2^attempt, max)`, monotonically non-decreasing in
    /// `attempt`.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff
            .saturating_mul(2u32.saturating_pow(attempt.min(16)))
            .min(self.max_backoff)
    }
}

/// A fully-buffered HTTP response.
///
/// Buffering lets retry metadata be read from headers and body without
/// consuming a live response stream.
#[derive(Debug)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl ApiResponse {
    /// Deserialize the body as JSON, or `None` if it does not parse.
    #[must_use]
    pub fn json<T: DeserializeOwned>(&self) -> Option<T> {
        serde_json::from_str(&self.body).ok()
    }

    /// The `message` field of a Discord error body, if present.
    #[must_use]
    pub fn api_message(&self) -> Option<String> {
        let value: serde_json::Value = self.json()?;
        value.get("message")?.as_str().map(String::from)
    }

    fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Whether the response signals a global-scope rate limit.
    #[must_use]
    pub fn is_global_ratelimit(&self) -> bool {
        self.header_str("x-ratelimit-global")
            .is_some_and(|v| !v.is_empty())
    }
}

/// Parse a retry value into milliseconds.
///
/// Values below 1000 are interpreted as seconds (Discord's convention) and
/// converted with a ceiling; larger magnitudes are taken as milliseconds.
#[must_use]
pub fn parse_retry_ms(raw: &str) -> Option<u64> {
    let n: f64 = raw.trim().parse().ok()?;
    if !n.is_finite() || n < 0.0 {
        return None;
    }
    if n < 1000.0 {
        Some((n * 1000.0).ceil() as u64)
    } else {
        Some(n.ceil() as u64)
    }
}

/// Extract the server-suggested retry interval from a 429 response.
///
/// Sources, in priority order: `Retry-After`, `X-RateLimit-Reset-After`,
/// `X-RateLimit-Reset`, then the JSON body fields `retry_after` and
/// `retry_after_ms`.
#[must_use]
pub fn retry_ms_from(resp: &ApiResponse) -> Option<u64> {
    for name in ["retry-after", "x-ratelimit-reset-after", "x-ratelimit-reset"] {
        if let Some(ms) = resp.header_str(name).and_then(parse_retry_ms) {
            return Some(ms);
        }
    }
    let value: serde_json::Value = resp.json()?;
    let candidate = value.get("retry_after").or_else(|| value.get("retry_after_ms"))?;
    match candidate {
        serde_json::Value::Number(n) => {
            let raw = n.to_string();
            parse_retry_ms(&raw)
        }
        serde_json::Value::String(s) => parse_retry_ms(s),
        _ => None,
    }
}

/// HTTP client that owns the auth token and the cooldown map.
///
/// The cooldown map lives for the process lifetime of the client. Timestamps
/// in the past have no effect; only future timestamps gate requests.
#[derive(Debug)]
pub struct RestClient {
    http: Client,
    token: String,
    policy: RetryPolicy,
    cooldowns: Mutex<HashMap<CooldownKey, Instant>>,
}

impl RestClient {
    /// Create a client with the default retry policy.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(token: &str) -> Result<Self> {
        Self::with_policy(token, RetryPolicy::default())
    }

    /// Create a client with a custom retry policy.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn with_policy(token: &str, policy: RetryPolicy) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            token: token.to_string(),
            policy,
            cooldowns: Mutex::new(HashMap::new()),
        })
    }

    /// `GET` through the rate-limited transport.
    pub async fn get(&self, url: Url) -> Option<ApiResponse> {
        self.send(Method::GET, url).await
    }

    /// `DELETE` through the rate-limited transport.
    pub async fn delete(&self, url: Url) -> Option<ApiResponse> {
        self.send(Method::DELETE, url).await
    }

    /// Issue a request, honoring cooldowns and retrying transient failures.
    ///
    /// Returns `None` after the network retry budget is exhausted, which is
    /// distinct from an HTTP error response: those are returned as-is once
    /// any applicable retries are spent. A 429 arms the route (or global)
    /// cooldown and is handed back to the caller; the next request on that
    /// key waits out the cooldown before firing.
    pub async fn send(&self, method: Method, url: Url) -> Option<ApiResponse> {
        let route = RouteKey::new(&method, &url);
        let mut attempt: u32 = 0;
        loop {
            self.wait_for_cooldown(&CooldownKey::Global).await;
            self.wait_for_cooldown(&CooldownKey::Route(route.clone())).await;

            let result = self
                .http
                .request(method.clone(), url.clone())
                .header(AUTHORIZATION, &self.token)
                .send()
                .await;

            let resp = match result {
                Ok(resp) => {
                    let status = resp.status();
                    let headers = resp.headers().clone();
                    match resp.text().await {
                        Ok(body) => ApiResponse {
                            status,
                            headers,
                            body,
                        },
                        Err(e) => {
                            // A truncated body counts as a network failure.
                            if !self.retry_network(&route, attempt, &e).await {
                                return None;
                            }
                            attempt += 1;
                            continue;
                        }
                    }
                }
                Err(e) => {
                    if !self.retry_network(&route, attempt, &e).await {
                        return None;
                    }
                    attempt += 1;
                    continue;
                }
            };

            if resp.status == StatusCode::TOO_MANY_REQUESTS {
                let wait = self.ratelimit_wait(&resp, attempt);
                let key = if resp.is_global_ratelimit() {
                    CooldownKey::Global
                } else {
                    CooldownKey::Route(route.clone())
                };
                self.set_cooldown(key.clone(), wait);
                warn!(
                    route = %route,
                    wait_ms = wait.as_millis(),
                    global = matches!(key, CooldownKey::Global),
                    "429 received, cooldown armed"
                );
                return Some(resp);
            }

            if resp.status.is_server_error() && attempt < self.policy.max_attempts {
                let backoff = self.policy.backoff(attempt)
                    + Duration::from_millis(rand::thread_rng().gen_range(0..500));
                warn!(
                    route = %route,
                    status = resp.status.as_u16(),
                    message = resp.api_message().as_deref().unwrap_or("Server error"),
                    backoff_ms = backoff.as_millis(),
                    "Server error, retrying"
                );
                sleep(backoff).await;
                attempt += 1;
                continue;
            }

            return Some(resp);
        }
    }

    /// Remaining cooldown for a key, if one is active.
    #[must_use]
    pub fn cooldown_remaining(&self, key: &CooldownKey) -> Option<Duration> {
        let deadline = *self.cooldowns.lock().expect("cooldown map poisoned").get(key)?;
        deadline.checked_duration_since(Instant::now())
    }

    fn set_cooldown(&self, key: CooldownKey, wait: Duration) {
        self.cooldowns
            .lock()
            .expect("cooldown map poisoned")
            .insert(key, Instant::now() + wait);
    }

    async fn wait_for_cooldown(&self, key: &CooldownKey) {
        if let Some(remaining) = self.cooldown_remaining(key) {
            match key {
                CooldownKey::Global => {
                    warn!(wait_ms = remaining.as_millis(), "Global rate limit active, waiting");
                }
                CooldownKey::Route(route) => {
                    warn!(route = %route, wait_ms = remaining.as_millis(), "Route rate-limited, waiting");
                }
            }
            sleep(remaining).await;
        }
    }

    /// Server-suggested 429 wait with ±10% jitter, floored at the policy
    /// minimum; falls back to the exponential ladder when nothing parses.
    fn ratelimit_wait(&self, resp: &ApiResponse, attempt: u32) -> Duration {
        let base_ms = retry_ms_from(resp)
            .unwrap_or_else(|| self.policy.backoff(attempt).as_millis() as u64);
        let jitter = (rand::thread_rng().gen::<f64>() - 0.5) * 0.2 * base_ms as f64;
        let with_jitter = (base_ms as f64 + jitter).max(0.0) as u64;
        Duration::from_millis(with_jitter).max(self.policy.min_ratelimit_wait)
    }

    async fn retry_network(
        &self,
        route: &RouteKey,
        attempt: u32,
        error: &dyn std::error::Error,
    ) -> bool {
        if attempt >= self.policy.max_attempts {
            error!(route = %route, error = %error, "Request failed after exhausting retries");
            return false;
        }
        let backoff = self.policy.backoff(attempt)
            + Duration::from_millis(rand::thread_rng().gen_range(0..250));
        warn!(
            route = %route,
            error = %error,
            backoff_ms = backoff.as_millis(),
            "Network error, retrying"
        );
        sleep(backoff).await;
        debug!(route = %route, attempt = attempt + 1, "Retrying request");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, headers: &[(&str, &str)], body: &str) -> ApiResponse {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.insert(
                reqwest::header::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                value.parse().unwrap(),
            );
        }
        ApiResponse {
            status: StatusCode::from_u16(status).unwrap(),
            headers: map,
            body: body.to_string(),
        }
    }

    #[test]
    fn test_parse_retry_ms_seconds_heuristic() {
        // Below 1000 means seconds, converted with a ceiling.
        assert_eq!(parse_retry_ms("2"), Some(2000));
        assert_eq!(parse_retry_ms("0.5"), Some(500));
        assert_eq!(parse_retry_ms("1.234"), Some(1234));
        // At or above 1000 the value is already milliseconds.
        assert_eq!(parse_retry_ms("1000"), Some(1000));
        assert_eq!(parse_retry_ms("1500.2"), Some(1501));
    }

    #[test]
    fn test_parse_retry_ms_rejects_garbage() {
        assert_eq!(parse_retry_ms("soon"), None);
        assert_eq!(parse_retry_ms(""), None);
        assert_eq!(parse_retry_ms("-1"), None);
        assert_eq!(parse_retry_ms("NaN"), None);
    }

    #[test]
    fn test_retry_ms_header_priority() {
        let resp = response(
            429,
            &[("retry-after", "2"), ("x-ratelimit-reset-after", "5")],
            "",
        );
        assert_eq!(retry_ms_from(&resp), Some(2000));
    }

    #[test]
    fn test_retry_ms_falls_back_to_body() {
        let resp = response(429, &[], r#"{"retry_after": 1.5}"#);
        assert_eq!(retry_ms_from(&resp), Some(1500));

        let resp = response(429, &[], r#"{"retry_after_ms": 2500}"#);
        assert_eq!(retry_ms_from(&resp), Some(2500));
    }

    #[test]
    fn test_retry_ms_missing() {
        let resp = response(429, &[], "not json");
        assert_eq!(retry_ms_from(&resp), None);
    }

    #[test]
    fn test_backoff_ladder() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_millis(1000));
        assert_eq!(policy.backoff(1), Duration::from_millis(2000));
        assert_eq!(policy.backoff(2), Duration::from_millis(4000));
        // Capped at the ceiling, monotonically non-decreasing.
        assert_eq!(policy.backoff(6), Duration::from_millis(60_000));
        assert_eq!(policy.backoff(30), Duration::from_millis(60_000));
        let mut last = Duration::ZERO;
        for attempt in 0..40 {
            let b = policy.backoff(attempt);
            assert!(b >= last);
            last = b;
        }
    }

    #[test]
    fn test_global_ratelimit_header() {
        assert!(response(429, &[("x-ratelimit-global", "true")], "").is_global_ratelimit());
        assert!(!response(429, &[], "").is_global_ratelimit());
    }

    #[test]
    fn test_api_message() {
        let resp = response(403, &[], r#"{"message": "Missing Access", "code": 50001}"#);
        assert_eq!(resp.api_message().as_deref(), Some("Missing Access"));
        assert_eq!(response(403, &[], "").api_message(), None);
    }

    #[tokio::test]
    async fn test_cooldown_gating() {
        let client = RestClient::new("token").unwrap();
        let key = CooldownKey::Global;
        assert!(client.cooldown_remaining(&key).is_none());

        client.set_cooldown(key.clone(), Duration::from_millis(50));
        let remaining = client.cooldown_remaining(&key).unwrap();
        assert!(remaining <= Duration::from_millis(50));

        let start = Instant::now();
        client.wait_for_cooldown(&key).await;
        assert!(start.elapsed() >= Duration::from_millis(30));

        // An expired cooldown has no effect.
        let start = Instant::now();
        client.wait_for_cooldown(&key).await;
        assert!(start.elapsed() < Duration::from_millis(20));
    }
}
