//! Integration tests for the rate-limited transport.

use std::time::{Duration, Instant};

use reqwest::Method;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use discord_purge::transport::{CooldownKey, RestClient, RetryPolicy, RouteKey};

/// A retry policy with delays shrunk so tests stay fast.
fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        base_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(20),
        max_attempts: 3,
        min_ratelimit_wait: Duration::from_millis(1),
    }
}

fn client() -> RestClient {
    RestClient::with_policy("test-token", fast_policy()).unwrap()
}

fn url(server: &MockServer, p: &str) -> Url {
    Url::parse(&format!("{}{p}", server.uri())).unwrap()
}

#[tokio::test]
async fn test_plain_success_passes_through() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ok"))
        .respond_with(ResponseTemplate::new(200).set_body_string("hello"))
        .expect(1)
        .mount(&server)
        .await;

    let resp = client().get(url(&server, "/ok")).await.unwrap();
    assert_eq!(resp.status.as_u16(), 200);
    assert_eq!(resp.body, "hello");
}

#[tokio::test]
async fn test_429_arms_route_cooldown_and_gates_next_request() {
    let server = MockServer::start().await;
    // 50ms suggested (0.05 seconds); ±10% jitter bounds the wait.
    Mock::given(method("GET"))
        .and(path("/limited"))
        .respond_with(ResponseTemplate::new(429).append_header("Retry-After", "0.05"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/limited"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = client();
    let resp = client.get(url(&server, "/limited")).await.unwrap();
    // The 429 itself comes back to the caller.
    assert_eq!(resp.status.as_u16(), 429);
    let key = CooldownKey::Route(RouteKey {
        method: Method::GET,
        path: "/limited".to_string(),
    });
    let remaining = client.cooldown_remaining(&key).unwrap();
    assert!(remaining <= Duration::from_millis(60));

    // The next request on the same route waits the cooldown out.
    let start = Instant::now();
    let resp = client.get(url(&server, "/limited")).await.unwrap();
    assert_eq!(resp.status.as_u16(), 200);
    assert!(start.elapsed() >= Duration::from_millis(40));
}

#[tokio::test]
async fn test_429_interval_from_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/limited"))
        .respond_with(
            ResponseTemplate::new(429).set_body_json(serde_json::json!({"retry_after": 0.05})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client();
    let resp = client.get(url(&server, "/limited")).await.unwrap();
    assert_eq!(resp.status.as_u16(), 429);
    let key = CooldownKey::Route(RouteKey {
        method: Method::GET,
        path: "/limited".to_string(),
    });
    let remaining = client.cooldown_remaining(&key).unwrap();
    assert!(remaining >= Duration::from_millis(40));
    assert!(remaining <= Duration::from_millis(60));
}

#[tokio::test]
async fn test_429_without_interval_falls_back_to_backoff() {
    let server = MockServer::start().await;
    // No parseable retry source anywhere; the cooldown comes from the
    // production backoff ladder (1000ms base, ±10% jitter).
    Mock::given(method("GET"))
        .and(path("/limited"))
        .respond_with(ResponseTemplate::new(429))
        .expect(1)
        .mount(&server)
        .await;

    let client = RestClient::new("test-token").unwrap();
    let resp = client.get(url(&server, "/limited")).await.unwrap();
    assert_eq!(resp.status.as_u16(), 429);
    let key = CooldownKey::Route(RouteKey {
        method: Method::GET,
        path: "/limited".to_string(),
    });
    let remaining = client.cooldown_remaining(&key).unwrap();
    assert!(remaining >= Duration::from_millis(800));
    assert!(remaining <= Duration::from_millis(1200));
}

#[tokio::test]
async fn test_global_429_arms_global_cooldown() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/limited"))
        .respond_with(
            ResponseTemplate::new(429)
                .append_header("Retry-After", "0.05")
                .append_header("X-RateLimit-Global", "true"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client();
    let resp = client.get(url(&server, "/limited")).await.unwrap();
    assert_eq!(resp.status.as_u16(), 429);
    assert!(client.cooldown_remaining(&CooldownKey::Global).is_some());
    let route = CooldownKey::Route(RouteKey {
        method: Method::GET,
        path: "/limited".to_string(),
    });
    assert!(client.cooldown_remaining(&route).is_none());
}

#[tokio::test]
async fn test_server_error_retried_then_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let resp = client().get(url(&server, "/flaky")).await.unwrap();
    assert_eq!(resp.status.as_u16(), 200);
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_server_error_returned_after_exhausted_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(
            ResponseTemplate::new(500).set_body_json(serde_json::json!({"message": "oops"})),
        )
        .mount(&server)
        .await;

    let resp = client().get(url(&server, "/broken")).await.unwrap();
    // Terminal error is handed back to the caller as-is.
    assert_eq!(resp.status.as_u16(), 500);
    assert_eq!(resp.api_message().as_deref(), Some("oops"));
    // Initial attempt plus max_attempts retries.
    assert_eq!(server.received_requests().await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_network_failure_returns_none() {
    // Nothing listens here; connection is refused on every attempt.
    let target = Url::parse("http://127.0.0.1:9/unreachable").unwrap();
    let resp = client().send(Method::GET, target).await;
    assert!(resp.is_none());
}

#[tokio::test]
async fn test_4xx_returned_unmodified() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/forbidden"))
        .respond_with(
            ResponseTemplate::new(403)
                .set_body_json(serde_json::json!({"message": "Missing Access"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let resp = client().get(url(&server, "/forbidden")).await.unwrap();
    assert_eq!(resp.status.as_u16(), 403);
    assert_eq!(resp.api_message().as_deref(), Some("Missing Access"));
}
