//! # ProcessSupervisor: start, stop and monitor service processes.
//!
//! ```text
//! start(spec, token)
//!   ├─ validate working dir, build explicit env, spawn (own process group)
//!   ├─ readers (TaskTracker): stdout/stderr lines ─► LineHandler (errors logged)
//!   ├─ monitor task owns the Child:
//!   │     select {
//!   │       child.wait()        ─► unexpected exit
//!   │       stop requested(g)   ─► SIGINT group ─► wait g ─► SIGKILL
//!   │     }
//!   │     join readers (leftover group: SIGINT ─► wait g ─► SIGKILL)
//!   │     status = stopped | crashed ─► publish
//!   └─ watcher: token.cancelled() ─► request stop(stop_grace)
//! ```
//!
//! Every transition of one service is published from a single task in order,
//! so per-service events are totally ordered.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::RwLock;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::env::Environment;
use super::handler::{LineHandler, OutputStream, TracingLines};
use super::os;
use super::service::{ExitReport, ServiceProcess};
use crate::error::ProcessError;
use crate::events::{Bus, Event, EventKind};
use crate::health::LivenessSource;
use crate::model::{LifecycleState, ServiceSpec};

/// Starts, stops and tracks service processes.
pub struct ProcessSupervisor {
    bus: Bus,
    handler: Arc<dyn LineHandler>,
    stop_grace: Duration,
    shared_env: RwLock<Vec<(String, String)>>,
    services: RwLock<HashMap<String, Arc<ServiceProcess>>>,
}

impl ProcessSupervisor {
    /// Creates a supervisor that logs child output through `tracing`.
    pub fn new(bus: Bus, stop_grace: Duration) -> Self {
        Self {
            bus,
            handler: Arc::new(TracingLines),
            stop_grace,
            shared_env: RwLock::new(Vec::new()),
            services: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_line_handler(mut self, handler: Arc<dyn LineHandler>) -> Self {
        self.handler = handler;
        self
    }

    /// Replaces overrides applied to every child started from now on.
    pub async fn set_shared_env(&self, vars: Vec<(String, String)>) {
        *self.shared_env.write().await = vars;
    }

    pub async fn shared_env(&self) -> Vec<(String, String)> {
        self.shared_env.read().await.clone()
    }

    /// Environment a child of `spec` would receive.
    pub async fn environment(&self, spec: &ServiceSpec) -> Environment {
        let shared = self.shared_env.read().await.clone();
        Environment::inherit()
            .layer(shared)
            .layer(spec.env.iter().cloned())
    }

    /// Launches `spec`; the process is stopped when `token` is cancelled.
    ///
    /// # Errors
    /// - [`ProcessError::SpawnFailed`] for a missing executable or invalid working directory
    /// - [`ProcessError::Cancelled`] if `token` is already cancelled
    pub async fn start(
        &self,
        spec: &ServiceSpec,
        token: &CancellationToken,
    ) -> Result<Arc<ServiceProcess>, ProcessError> {
        if token.is_cancelled() {
            return Err(ProcessError::Cancelled {
                service: spec.name.clone(),
            });
        }
        self.bus
            .publish(Event::now(EventKind::ServiceStarting).with_service(spec.name.as_str()));

        let child = match self.spawn(spec).await {
            Ok(child) => child,
            Err(reason) => {
                error!(service = %spec.name, %reason, "spawn failed");
                self.bus.publish(
                    Event::now(EventKind::ServiceSpawnFailed)
                        .with_service(spec.name.as_str())
                        .with_reason(reason.as_str()),
                );
                return Err(ProcessError::SpawnFailed {
                    service: spec.name.clone(),
                    reason,
                });
            }
        };

        let process = Arc::new(ServiceProcess::new(spec.name.clone(), child.id()));
        info!(service = %spec.name, pid = ?process.pid(), "service running");
        self.bus.publish(
            Event::now(EventKind::ServiceRunning)
                .with_service(spec.name.as_str())
                .with_pid(process.pid()),
        );
        self.services
            .write()
            .await
            .insert(spec.name.clone(), Arc::clone(&process));

        tokio::spawn(monitor(
            child,
            Arc::clone(&process),
            Arc::clone(&self.handler),
            self.bus.clone(),
            self.stop_grace,
        ));

        let watched = Arc::clone(&process);
        let token = token.clone();
        let grace = self.stop_grace;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    watched.request_stop(grace);
                }
                _ = watched.exited() => {}
            }
        });

        Ok(process)
    }

    /// Stops `process`: SIGINT, up to `grace`, then SIGKILL.
    ///
    /// Returns once the process has exited and its output readers are joined.
    /// Stopping an already exited process returns its report.
    pub async fn stop(&self, process: &ServiceProcess, grace: Duration) -> ExitReport {
        if process.request_stop(grace) {
            debug!(service = process.name(), grace_ms = grace.as_millis() as u64, "stop requested");
        }
        process.exited().await
    }

    /// Blocks until `process` exits.
    ///
    /// # Errors
    /// [`ProcessError::Cancelled`] when `token` is cancelled first; the process
    /// has been stopped with the configured stop grace by then.
    pub async fn wait(
        &self,
        process: &ServiceProcess,
        token: &CancellationToken,
    ) -> Result<ExitReport, ProcessError> {
        tokio::select! {
            report = process.exited() => Ok(report),
            _ = token.cancelled() => {
                self.stop(process, self.stop_grace).await;
                Err(ProcessError::Cancelled { service: process.name().to_string() })
            }
        }
    }

    /// Handle of the most recent process of `service`.
    pub async fn get(&self, service: &str) -> Option<Arc<ServiceProcess>> {
        self.services.read().await.get(service).cloned()
    }

    /// All tracked processes, sorted by service name.
    pub async fn processes(&self) -> Vec<Arc<ServiceProcess>> {
        let mut all: Vec<_> = self.services.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.name().cmp(b.name()));
        all
    }

    async fn spawn(&self, spec: &ServiceSpec) -> Result<Child, String> {
        match tokio::fs::metadata(&spec.working_dir).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Err(format!("{} is not a directory", spec.working_dir.display())),
            Err(e) => return Err(format!("working directory {}: {e}", spec.working_dir.display())),
        }

        let env = self.environment(spec).await;
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&spec.working_dir)
            .env_clear()
            .envs(env.iter())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        debug!(service = %spec.name, program = %spec.program, args = ?spec.args, "spawning");
        cmd.spawn()
            .map_err(|e| format!("{}: {e}", spec.program))
    }
}

#[async_trait]
impl LivenessSource for ProcessSupervisor {
    async fn lifecycle(&self, service: &str) -> Option<(LifecycleState, Option<u32>)> {
        let process = self.get(service).await?;
        Some((process.state(), process.pid()))
    }
}

async fn monitor(
    mut child: Child,
    process: Arc<ServiceProcess>,
    handler: Arc<dyn LineHandler>,
    bus: Bus,
    stop_grace: Duration,
) {
    let name = process.name().to_string();
    let pgid = child.id();
    let readers = TaskTracker::new();
    if let Some(stdout) = child.stdout.take() {
        readers.spawn(read_lines(stdout, name.clone(), OutputStream::Stdout, Arc::clone(&handler)));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.spawn(read_lines(stderr, name.clone(), OutputStream::Stderr, handler));
    }
    readers.close();

    let mut stop_rx = process.stop_receiver();
    let status = tokio::select! {
        status = child.wait() => status,
        grace = requested_grace(&mut stop_rx) => {
            process.set_status(LifecycleState::Stopping, None);
            bus.publish(
                Event::now(EventKind::ServiceStopping)
                    .with_service(name.as_str())
                    .with_pid(process.pid()),
            );
            terminate(&mut child, &name, grace).await
        }
    };

    let code = match status {
        Ok(status) => status.code(),
        Err(e) => {
            error!(service = %name, error = %e, "failed to wait for process");
            None
        }
    };
    join_readers(&readers, pgid, &name, stop_grace).await;

    let report = ExitReport {
        code,
        expected: process.stop_requested(),
    };
    let state = report.state();

    let kind = if state == LifecycleState::Crashed {
        warn!(service = %name, ?code, "service crashed");
        EventKind::ServiceCrashed
    } else {
        info!(service = %name, ?code, expected = report.expected, "service stopped");
        EventKind::ServiceStopped
    };
    bus.publish(
        Event::now(kind)
            .with_service(name.as_str())
            .with_exit_code(code)
            .with_reason(if report.expected { "expected" } else { "unexpected" }),
    );
    process.set_status(state, Some(report));
}

/// Waits for the output readers. Descendants that outlive the leader keep
/// the pipes open, so the rest of the group is interrupted, then killed.
async fn join_readers(readers: &TaskTracker, pgid: Option<u32>, name: &str, grace: Duration) {
    if readers.is_empty() {
        return;
    }
    if let Some(pgid) = pgid {
        if let Err(e) = os::interrupt_group(pgid) {
            warn!(service = name, error = %e, "failed to interrupt leftover processes");
        }
    }
    if time::timeout(grace, readers.wait()).await.is_ok() {
        return;
    }

    warn!(service = name, grace_ms = grace.as_millis() as u64, "output pipes still open, killing group");
    if let Some(pgid) = pgid {
        if let Err(e) = os::kill_group(pgid) {
            error!(service = name, error = %e, "failed to kill leftover processes");
        }
    }
    if time::timeout(grace, readers.wait()).await.is_err() {
        warn!(service = name, "output readers left detached");
    }
}

async fn requested_grace(rx: &mut tokio::sync::watch::Receiver<Option<Duration>>) -> Duration {
    loop {
        if let Some(grace) = *rx.borrow_and_update() {
            return grace;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

async fn terminate(
    child: &mut Child,
    name: &str,
    grace: Duration,
) -> std::io::Result<std::process::ExitStatus> {
    if let Err(e) = os::interrupt(child) {
        warn!(service = name, error = %e, "failed to interrupt process");
    }
    match time::timeout(grace, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            warn!(service = name, grace_ms = grace.as_millis() as u64, "grace exceeded, killing");
            if let Err(e) = os::force_kill(child) {
                error!(service = name, error = %e, "failed to kill process");
            }
            child.wait().await
        }
    }
}

async fn read_lines<R>(pipe: R, service: String, stream: OutputStream, handler: Arc<dyn LineHandler>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(trim_eol(&buf));
                if let Err(e) = handler.on_line(&service, stream, &line) {
                    warn!(service = %service, %stream, error = %e, "line handler failed");
                }
            }
            Err(e) => {
                debug!(service = %service, %stream, error = %e, "output reader stopped");
                break;
            }
        }
    }
}

fn trim_eol(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::process::HandlerError;
    use std::sync::Mutex;

    fn sh(name: &str, script: &str) -> ServiceSpec {
        ServiceSpec::new(name, "sh").with_args(["-c", script])
    }

    fn collecting() -> (Arc<Mutex<Vec<String>>>, Arc<dyn LineHandler>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&lines);
        let handler = move |_: &str, stream: OutputStream, line: &str| -> Result<(), HandlerError> {
            sink.lock().unwrap().push(format!("{stream}:{line}"));
            Ok(())
        };
        (lines, Arc::new(handler))
    }

    #[tokio::test]
    async fn missing_executable_is_spawn_failure() {
        let sup = ProcessSupervisor::new(Bus::new(16), Duration::from_secs(1));
        let spec = ServiceSpec::new("ghost", "definitely-not-a-real-binary-4242");
        let err = sup.start(&spec, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ProcessError::SpawnFailed { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn invalid_working_dir_is_spawn_failure() {
        let sup = ProcessSupervisor::new(Bus::new(16), Duration::from_secs(1));
        let spec = sh("api", "true").with_working_dir("/definitely/not/here");
        let err = sup.start(&spec, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ProcessError::SpawnFailed { .. }));
    }

    #[tokio::test]
    async fn output_is_delivered_and_readers_joined() {
        let (lines, handler) = collecting();
        let sup = ProcessSupervisor::new(Bus::new(16), Duration::from_secs(1)).with_line_handler(handler);
        let spec = sh("echo", "echo one; echo two 1>&2; exit 3");

        let process = sup.start(&spec, &CancellationToken::new()).await.unwrap();
        let report = sup.wait(&process, &CancellationToken::new()).await.unwrap();

        assert_eq!(report, ExitReport { code: Some(3), expected: false });
        assert_eq!(process.state(), LifecycleState::Crashed);
        let mut got = lines.lock().unwrap().clone();
        got.sort();
        assert_eq!(got, vec!["stderr:two".to_string(), "stdout:one".to_string()]);
    }

    #[tokio::test]
    async fn handler_errors_do_not_interrupt_the_stream() {
        let seen = Arc::new(Mutex::new(0usize));
        let count = Arc::clone(&seen);
        let handler = move |_: &str, _: OutputStream, _: &str| -> Result<(), HandlerError> {
            *count.lock().unwrap() += 1;
            Err("consumer is broken".into())
        };
        let sup = ProcessSupervisor::new(Bus::new(16), Duration::from_secs(1))
            .with_line_handler(Arc::new(handler));

        let process = sup
            .start(&sh("noisy", "for i in 1 2 3 4 5; do echo $i; done"), &CancellationToken::new())
            .await
            .unwrap();
        let report = process.exited().await;
        assert_eq!(report.code, Some(0));
        assert_eq!(*seen.lock().unwrap(), 5);
    }

    #[tokio::test]
    async fn child_receives_explicit_environment() {
        let (lines, handler) = collecting();
        let sup = ProcessSupervisor::new(Bus::new(16), Duration::from_secs(1)).with_line_handler(handler);
        sup.set_shared_env(vec![("SHARED_FLAG".into(), "shared".into())]).await;
        let spec = sh("env", "echo $SHARED_FLAG-$OWN_FLAG-${PATH:+has_path}").with_env("OWN_FLAG", "own");

        let process = sup.start(&spec, &CancellationToken::new()).await.unwrap();
        process.exited().await;
        assert_eq!(*lines.lock().unwrap(), vec!["stdout:shared-own-has_path".to_string()]);
    }

    #[tokio::test]
    async fn stop_escalates_to_kill_after_grace() {
        let sup = ProcessSupervisor::new(Bus::new(16), Duration::from_secs(1));
        let process = sup
            .start(&sh("stubborn", "trap '' INT; sleep 30"), &CancellationToken::new())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = std::time::Instant::now();
        let report = sup.stop(&process, Duration::from_millis(300)).await;
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(report.expected);
        assert_eq!(process.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn cancellation_stops_process_and_reports_cancelled() {
        let bus = Bus::new(64);
        let mut rx = bus.subscribe();
        let sup = ProcessSupervisor::new(bus, Duration::from_secs(2));
        let token = CancellationToken::new();
        let process = sup.start(&sh("sleepy", "sleep 30"), &token).await.unwrap();
        let pid = process.pid().unwrap();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });
        let err = sup.wait(&process, &token).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(process.exit().is_some_and(|r| r.expected));
        assert!(!os::pid_alive(pid));

        let mut kinds = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            kinds.push(ev.kind);
        }
        assert_eq!(
            kinds,
            vec![
                EventKind::ServiceStarting,
                EventKind::ServiceRunning,
                EventKind::ServiceStopping,
                EventKind::ServiceStopped,
            ]
        );
    }

    #[tokio::test]
    async fn liveness_reflects_lifecycle() {
        let sup = ProcessSupervisor::new(Bus::new(16), Duration::from_secs(1));
        assert_eq!(sup.lifecycle("api").await, None);

        let process = sup.start(&sh("api", "sleep 30"), &CancellationToken::new()).await.unwrap();
        assert_eq!(sup.lifecycle("api").await, Some((LifecycleState::Running, process.pid())));

        sup.stop(&process, Duration::from_secs(1)).await;
        assert_eq!(sup.lifecycle("api").await.map(|(s, _)| s), Some(LifecycleState::Stopped));
    }

    #[tokio::test]
    async fn undecodable_bytes_do_not_stop_the_reader() {
        let (lines, handler) = collecting();
        let sup = ProcessSupervisor::new(Bus::new(16), Duration::from_secs(1)).with_line_handler(handler);
        let script = "printf 'caf\\351\\r\\n'; i=0; while [ $i -lt 2000 ]; do echo line-$i; i=$((i+1)); done";

        let process = sup.start(&sh("latin1", script), &CancellationToken::new()).await.unwrap();
        let report = process.exited().await;

        assert_eq!(report.code, Some(0));
        assert_eq!(process.state(), LifecycleState::Stopped);
        let got = lines.lock().unwrap();
        assert_eq!(got.len(), 2001);
        assert_eq!(got[0], "stdout:caf\u{FFFD}");
        assert_eq!(got[2000], "stdout:line-1999");
    }

    #[tokio::test]
    async fn exit_is_reported_while_a_descendant_holds_the_pipes() {
        let sup = ProcessSupervisor::new(Bus::new(16), Duration::from_millis(500));
        let process = sup
            .start(&sh("forked", "sleep 20 & exit 7"), &CancellationToken::new())
            .await
            .unwrap();

        let report = tokio::time::timeout(Duration::from_secs(5), process.exited())
            .await
            .expect("exit observed before the descendant ends");
        assert_eq!(report, ExitReport { code: Some(7), expected: false });
        assert_eq!(process.state(), LifecycleState::Crashed);
    }

    #[test]
    fn line_endings_are_trimmed() {
        assert_eq!(trim_eol(b"a\r\n"), b"a");
        assert_eq!(trim_eol(b"a\n"), b"a");
        assert_eq!(trim_eol(b"a"), b"a");
        assert_eq!(trim_eol(b"\n"), b"");
    }
}
