//! # Health probes.
//!
//! A [`Probe`] executes one strategy-specific check and reports `Ok(())` for
//! healthy or a [`CheckError`]. It never applies its own deadline: the
//! [`HealthChecker`](super::HealthChecker) bounds every call.
//!
//! ```text
//! StrategyProbe ──┬─ Http    ─► HttpProbe    (reqwest, redirects not followed)
//!                 ├─ Tcp     ─► TcpProbe     (tokio TcpStream::connect)
//!                 └─ Process ─► ProcessProbe (LivenessSource + OS process table)
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::warn;

use crate::error::CheckError;
use crate::model::{HealthStrategy, HttpMethod, LifecycleState, StatusRange};
use crate::process::pid_alive;

/// Upper bound on the response body read by the HTTP probe.
pub const MAX_BODY_BYTES: usize = 1 << 20;

/// # Strategy-specific health probe.
///
/// Implement this to plug in a custom strategy, or to observe calls in tests.
#[async_trait]
pub trait Probe: Send + Sync + 'static {
    async fn check(&self, service: &str, strategy: &HealthStrategy) -> Result<(), CheckError>;
}

/// Lifecycle view of supervised services, consumed by process checks.
#[async_trait]
pub trait LivenessSource: Send + Sync + 'static {
    /// Current state and OS pid of `service`, or `None` if it is not supervised.
    async fn lifecycle(&self, service: &str) -> Option<(LifecycleState, Option<u32>)>;
}

/// HTTP strategy.
#[derive(Clone, Debug)]
pub struct HttpProbe {
    client: reqwest::Client,
}

impl Default for HttpProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpProbe {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "http client setup failed, using defaults");
                reqwest::Client::new()
            });
        Self { client }
    }

    pub async fn check(
        &self,
        url: &str,
        method: HttpMethod,
        success: StatusRange,
    ) -> Result<(), CheckError> {
        let request = match method {
            HttpMethod::Get => self.client.get(url),
            HttpMethod::Head => self.client.head(url),
        };
        let mut response = request.send().await.map_err(classify)?;

        let status = response.status();
        if !success.contains(status.as_u16()) {
            return Err(CheckError::UnexpectedStatus {
                status: status.as_u16(),
            });
        }
        if method == HttpMethod::Head || !status.is_success() {
            return Ok(());
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(classify)? {
            let room = MAX_BODY_BYTES - body.len();
            body.extend_from_slice(&chunk[..chunk.len().min(room)]);
            if body.len() >= MAX_BODY_BYTES {
                break;
            }
        }
        match reported_status(&body) {
            Some(reported) if matches!(reported.as_str(), "unhealthy" | "down" | "error") => {
                Err(CheckError::ReportedUnhealthy { reported })
            }
            _ => Ok(()),
        }
    }
}

/// `status` field of a JSON object body, lowercased.
fn reported_status(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    value
        .get("status")
        .and_then(|s| s.as_str())
        .map(str::to_ascii_lowercase)
}

fn classify(err: reqwest::Error) -> CheckError {
    if err.is_connect() {
        CheckError::ConnectionRefused {
            reason: err.to_string(),
        }
    } else {
        CheckError::Request {
            reason: err.to_string(),
        }
    }
}

/// TCP strategy.
#[derive(Clone, Copy, Debug, Default)]
pub struct TcpProbe;

impl TcpProbe {
    pub async fn check(&self, address: &str) -> Result<(), CheckError> {
        TcpStream::connect(address)
            .await
            .map(drop)
            .map_err(|e| CheckError::ConnectionRefused {
                reason: format!("{address}: {e}"),
            })
    }
}

/// Process-liveness strategy.
#[derive(Clone)]
pub struct ProcessProbe {
    source: Arc<dyn LivenessSource>,
}

impl ProcessProbe {
    pub fn new(source: Arc<dyn LivenessSource>) -> Self {
        Self { source }
    }

    pub async fn check(&self, service: &str) -> Result<(), CheckError> {
        match self.source.lifecycle(service).await {
            None => Err(CheckError::ProcessNotRunning {
                reason: "service is not supervised".into(),
            }),
            Some((LifecycleState::Running, Some(pid))) if !pid_alive(pid) => {
                Err(CheckError::ProcessNotRunning {
                    reason: format!("pid {pid} is gone"),
                })
            }
            Some((LifecycleState::Running, _)) => Ok(()),
            Some((state, _)) => Err(CheckError::ProcessNotRunning {
                reason: format!("service is {state}"),
            }),
        }
    }
}

/// Dispatches on [`HealthStrategy`] to the built-in probes.
#[derive(Clone)]
pub struct StrategyProbe {
    http: HttpProbe,
    tcp: TcpProbe,
    process: Option<ProcessProbe>,
}

impl StrategyProbe {
    /// Process checks fail with `ProcessNotRunning` when `liveness` is `None`.
    pub fn new(liveness: Option<Arc<dyn LivenessSource>>) -> Self {
        Self {
            http: HttpProbe::new(),
            tcp: TcpProbe,
            process: liveness.map(ProcessProbe::new),
        }
    }
}

#[async_trait]
impl Probe for StrategyProbe {
    async fn check(&self, service: &str, strategy: &HealthStrategy) -> Result<(), CheckError> {
        match strategy {
            HealthStrategy::Http {
                url,
                method,
                success,
            } => self.http.check(url, *method, *success).await,
            HealthStrategy::Tcp { address } => self.tcp.check(address).await,
            HealthStrategy::Process => match &self.process {
                Some(probe) => probe.check(service).await,
                None => Err(CheckError::ProcessNotRunning {
                    reason: "no process supervisor attached".into(),
                }),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tokio::net::TcpListener;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Fixed(HashMap<String, (LifecycleState, Option<u32>)>);

    #[async_trait]
    impl LivenessSource for Fixed {
        async fn lifecycle(&self, service: &str) -> Option<(LifecycleState, Option<u32>)> {
            self.0.get(service).copied()
        }
    }

    #[tokio::test]
    async fn http_success_range_and_body_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "ok"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "DOWN"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/moved"))
            .respond_with(ResponseTemplate::new(302).insert_header("location", "/nowhere"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/boom"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let probe = HttpProbe::new();
        let range = StatusRange::default();
        let url = |p: &str| format!("{}{p}", server.uri());

        assert_eq!(probe.check(&url("/ok"), HttpMethod::Get, range).await, Ok(()));
        assert_eq!(probe.check(&url("/moved"), HttpMethod::Get, range).await, Ok(()));
        assert_eq!(
            probe.check(&url("/down"), HttpMethod::Get, range).await,
            Err(CheckError::ReportedUnhealthy {
                reported: "down".into()
            })
        );
        assert_eq!(
            probe.check(&url("/boom"), HttpMethod::Get, range).await,
            Err(CheckError::UnexpectedStatus { status: 503 })
        );
    }

    #[tokio::test]
    async fn http_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = HttpProbe::new()
            .check(&format!("http://{addr}/health"), HttpMethod::Get, StatusRange::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CheckError::ConnectionRefused { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn tcp_connects_to_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        assert_eq!(TcpProbe.check(&addr).await, Ok(()));

        drop(listener);
        assert!(TcpProbe.check(&addr).await.is_err());
    }

    #[tokio::test]
    async fn process_probe_requires_running_state() {
        let own = std::process::id();
        let source = Fixed(HashMap::from([
            ("api".to_string(), (LifecycleState::Running, Some(own))),
            ("web".to_string(), (LifecycleState::Crashed, None)),
        ]));
        let probe = ProcessProbe::new(Arc::new(source));

        assert_eq!(probe.check("api").await, Ok(()));
        assert!(matches!(probe.check("web").await, Err(CheckError::ProcessNotRunning { .. })));
        assert!(matches!(probe.check("db").await, Err(CheckError::ProcessNotRunning { .. })));
    }

    #[test]
    fn body_status_parsing() {
        assert_eq!(reported_status(br#"{"status":"Healthy"}"#).as_deref(), Some("healthy"));
        assert_eq!(reported_status(b"not json"), None);
        assert_eq!(reported_status(br#"{"state":"down"}"#), None);
    }
}
