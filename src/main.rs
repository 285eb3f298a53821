use std::sync::Arc;
use std::time::Duration;

use task_supervisor::{
    HandlerContext, HandlerError, Payload, Supervisor, SupervisorConfig, Task, TaskHandler,
};
use tokio::sync::broadcast::error::RecvError;

const DEFAULT_REQUEST: &str = "Review the code in the parser module and validate the test suite";

/// Demo handler: simulates work proportional to the task priority.
struct DemoHandler {
    label: &'static str,
}

#[async_trait::async_trait]
impl TaskHandler for DemoHandler {
    async fn handle(
        &self,
        ctx: HandlerContext,
        task: Task,
    ) -> Result<serde_json::Value, HandlerError> {
        let work = Duration::from_millis(50 * task.priority.clamp(1, 10) as u64);
        tokio::select! {
            _ = ctx.cancelled() => return Err(HandlerError::Cancelled),
            _ = tokio::time::sleep(work) => {}
        }

        Ok(serde_json::json!({
            "handler": self.label,
            "description": task.description(),
            "worker": ctx.worker_id,
            "attempt": ctx.attempt,
        }))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let request = if args.is_empty() {
        DEFAULT_REQUEST.to_string()
    } else {
        args.join(" ")
    };

    let config = SupervisorConfig::from_env()?;

    eprintln!("Task Supervisor v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Workers: {}", config.worker_count);
    eprintln!("   Capabilities: {}", config.worker_capabilities.join(", "));
    eprintln!("   Queue capacity: {}", config.queue_capacity);
    eprintln!("   Request: {}\n", request);

    let supervisor = Supervisor::new(config)?;
    for (task_type, label) in [
        ("analysis", "analyzer"),
        ("generation", "generator"),
        ("testing", "tester"),
    ] {
        supervisor
            .register_handler(task_type, Arc::new(DemoHandler { label }))
            .await;
    }

    let mut results = supervisor.subscribe_results();
    supervisor.start().await?;

    let mut context = Payload::new();
    context.insert("source".into(), "cli".into());
    let ids = supervisor.submit_request(&request, &context).await?;
    eprintln!("   Submitted {} tasks\n", ids.len());

    let mut remaining = ids.len();
    while remaining > 0 {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                eprintln!("Interrupted");
                break;
            }
            received = results.recv() => match received {
                Ok(result) => {
                    if ids.contains(&result.task_id) {
                        remaining -= 1;
                    }
                    println!("{}", serde_json::to_string(&result)?);
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Result subscriber lagged");
                    remaining = remaining.saturating_sub(skipped as usize);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    let status = supervisor.system_status().await;
    println!("{}", serde_json::to_string_pretty(&status)?);

    supervisor.stop().await;
    Ok(())
}
