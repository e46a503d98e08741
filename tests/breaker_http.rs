use std::time::Duration;

use devvisor::{BreakerConfig, BreakerState, Config, HealthCheckSpec, HealthChecker, HealthStatus};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn breaker_config(threshold: u32) -> Config {
    Config {
        breaker: BreakerConfig {
            enabled: true,
            failure_threshold: threshold,
            recovery_timeout: Duration::from_secs(3600),
        },
        ..Config::default()
    }
}

#[tokio::test]
async fn three_server_errors_open_the_circuit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let checker = HealthChecker::builder(breaker_config(3)).build();
    let spec = HealthCheckSpec::http(format!("{}/health", server.uri()));

    for attempt in 1..=3 {
        let result = checker.check("api", &spec).await;
        assert_eq!(result.status, HealthStatus::Unhealthy, "attempt {attempt}");
    }
    assert_eq!(checker.breaker_state("api").await, Some(BreakerState::Open));

    let short_circuited = checker.check("api", &spec).await;
    assert_eq!(short_circuited.status, HealthStatus::Unhealthy);
    assert_eq!(short_circuited.error.as_deref(), Some("circuit open"));

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 3);
}

#[tokio::test]
async fn breaker_stays_closed_below_threshold() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let checker = HealthChecker::builder(breaker_config(3)).build();
    let spec = HealthCheckSpec::http(format!("{}/health", server.uri()));

    checker.check("api", &spec).await;
    checker.check("api", &spec).await;
    assert!(checker.check("api", &spec).await.is_healthy());
    assert_eq!(checker.breaker_state("api").await, Some(BreakerState::Closed));
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn disabled_features_probe_every_time() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let checker = HealthChecker::builder(Config::default()).build();
    let spec = HealthCheckSpec::http(server.uri());
    for _ in 0..6 {
        assert_eq!(checker.check("api", &spec).await.status, HealthStatus::Unhealthy);
    }
    assert_eq!(checker.breaker_state("api").await, None);
    assert_eq!(server.received_requests().await.unwrap().len(), 6);
}
