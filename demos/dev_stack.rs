//! A three-step dev stack: check tools, "install", then run two services.
//!
//! ```text
//! cargo run --example dev_stack --features logging
//! ```
//!
//! Every snapshot pushed by the hub is printed to stdout as JSON; logs go to
//! stderr. Press Ctrl-C to stop.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use devvisor::{
    ActionFn, BackoffPolicy, Config, HealthCheckSpec, JitterPolicy, RestartPolicy, Runtime,
    ServiceSpec, Task, TaskError,
};

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    devvisor::init_tracing("devvisor=info");

    let mut cfg = Config::default();
    cfg.grace = Duration::from_secs(10);
    cfg.poll_interval = Duration::from_secs(1);
    cfg.breaker.enabled = true;
    cfg.breaker.failure_threshold = 3;
    cfg.breaker.recovery_timeout = Duration::from_secs(5);
    cfg.rate_limit = 2.0;

    let rt = Runtime::builder(cfg).build();

    rt.register(Task::new(
        "reqs",
        ActionFn::arc(|_ctx: CancellationToken| async move {
            which("sh").map_err(TaskError::fail)
        }),
    ))
    .await?;
    rt.register(
        Task::new(
            "deps",
            ActionFn::arc(|ctx: CancellationToken| async move {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(300)) => Ok(()),
                    _ = ctx.cancelled() => Err(TaskError::Canceled),
                }
            }),
        )
        .with_deps(["reqs"]),
    )
    .await?;

    let ticker = ServiceSpec::new("ticker", "sh")
        .with_args(["-c", "while true; do echo \"tick via $SERVICE_URL_TICKER\"; sleep 2; done"])
        .with_port(4000)
        .with_health(HealthCheckSpec::process());
    let flaky = ServiceSpec::new("flaky", "sh")
        .with_args(["-c", "echo starting; sleep 3; echo 'boom' >&2; exit 1"])
        .with_health(HealthCheckSpec::process())
        .with_restart(
            RestartPolicy::OnFailure { max_restarts: 5 },
            BackoffPolicy::exponential(Duration::from_millis(500), Duration::from_secs(8))
                .with_jitter(JitterPolicy::Equal),
        );
    rt.register(rt.service_task("run", ["deps"], vec![ticker, flaky]))
        .await?;

    let mut updates = rt.hub().subscribe();
    tokio::spawn(async move {
        while let Some(snap) = updates.recv().await {
            match snap.to_json() {
                Ok(json) => println!("{json}"),
                Err(e) => eprintln!("snapshot not serializable: {e}"),
            }
        }
    });

    match rt.run("run").await {
        Ok(()) => eprintln!("dev stack stopped gracefully"),
        Err(e) => eprintln!("dev stack stopped with error: {e}"),
    }
    Ok(())
}

fn which(program: &str) -> Result<(), String> {
    let path = std::env::var_os("PATH").unwrap_or_default();
    std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
        .map(drop)
        .ok_or_else(|| format!("{program} not found on PATH"))
}
