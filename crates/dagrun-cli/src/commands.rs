//! Command implementations: run, validate, replay.

use anyhow::Context;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use dagrun_core::{
    format_divergences, load_from_file, replay_and_compare, save_to_file, AgentInput, AgentOutput,
    Engine, Manifest, Registry, ReplayError,
};

/// Registers one deterministic stub agent per manifest binding. Each stub
/// wraps its input payload in a small JSON envelope, so runs are pure
/// functions of their input and replay cleanly.
fn stub_registry(manifest: &Manifest) -> anyhow::Result<Registry> {
    let registry = Registry::new();
    for binding in &manifest.agents {
        let agent_id = binding.id.clone();
        registry
            .register(&binding.id, move |input: AgentInput| {
                let agent_id = agent_id.clone();
                async move {
                    let payload = serde_json::json!({
                        "agent": agent_id,
                        "input": String::from_utf8_lossy(&input.payload),
                    });
                    Ok(AgentOutput::new(
                        input.request_id.clone(),
                        payload.to_string().into_bytes(),
                    ))
                }
            })
            .with_context(|| format!("register agent {:?}", binding.id))?;
    }
    Ok(registry)
}

pub async fn run(
    manifest_path: &Path,
    payload: &str,
    trace_out: Option<&Path>,
) -> anyhow::Result<()> {
    let manifest = Manifest::load(manifest_path).context("load manifest")?;
    let registry = stub_registry(&manifest)?;
    let engine = Engine::new(registry, manifest.router_config());

    let plan = manifest
        .to_execution_plan("task_demo", payload.as_bytes())
        .context("build execution plan")?;

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            signal_cancel.cancel();
        }
    });

    let report = engine.run_plan(&cancel, plan).await;

    println!(
        "router executed {} invocation(s) from {}",
        report.results.len(),
        manifest_path.display()
    );
    for result in &report.results {
        match &result.error {
            Some(error) => println!(
                "- {} ({}): error={}",
                result.invocation.id, result.invocation.agent_id, error
            ),
            None => println!(
                "- {} ({}): ok duration={:?}",
                result.invocation.id, result.invocation.agent_id, result.output.duration
            ),
        }
    }

    if let Some(path) = trace_out {
        save_to_file(path, &report.trace).context("write trace")?;
        info!(path = %path.display(), steps = report.trace.steps.len(), "trace written");
    }

    if let Some(error) = report.error {
        anyhow::bail!("run failed: {error}");
    }
    Ok(())
}

pub fn validate(manifest_path: &Path) -> anyhow::Result<()> {
    let manifest = Manifest::load(manifest_path).context("validate manifest")?;
    println!(
        "manifest OK: {} agent(s), {} pipeline step(s)",
        manifest.agents.len(),
        manifest.pipeline.len()
    );
    Ok(())
}

pub async fn replay(trace_path: &Path, manifest_path: &Path) -> anyhow::Result<()> {
    let trace = load_from_file(trace_path).context("load trace")?;
    let manifest = Manifest::load(manifest_path).context("load manifest")?;
    let registry = stub_registry(&manifest)?;

    match replay_and_compare(&trace, Duration::ZERO, &registry).await {
        Ok(()) => {
            println!(
                "replay OK: {} invocation(s) matched the recorded trace",
                trace.steps.len()
            );
            Ok(())
        }
        Err(ReplayError::Divergence {
            invocation,
            field,
            expected,
            actual,
        }) => {
            let divergence = dagrun_core::Divergence {
                invocation_id: invocation,
                field,
                expected,
                actual,
            };
            eprintln!("{}", format_divergences(&[divergence]));
            anyhow::bail!("replay diverged from the recorded trace");
        }
        Err(error) => Err(error).context("replay trace"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    const MANIFEST: &str = r#"
router:
  worker_pool_size: 2
  default_timeout: 5s
agents:
  - id: summarize_agent
  - id: classify_agent
pipeline:
  - step: summarize_agent
  - step: classify_agent
    depends_on: summarize_agent
"#;

    fn write_manifest() -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(MANIFEST.as_bytes()).unwrap();
        (dir, path)
    }

    #[test]
    fn validate_accepts_the_example_shape() {
        let (_dir, path) = write_manifest();
        validate(&path).unwrap();
    }

    #[tokio::test]
    async fn run_writes_a_replayable_trace() {
        let (_dir, manifest_path) = write_manifest();
        let trace_dir = tempfile::tempdir().unwrap();
        let trace_path = trace_dir.path().join("trace.json");

        run(&manifest_path, r#"{"message":"hi"}"#, Some(&trace_path))
            .await
            .unwrap();
        replay(&trace_path, &manifest_path).await.unwrap();
    }
}
