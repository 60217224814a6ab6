//! Vera daemon - command orchestration engine.
//!
//! Answers one operational question from the command line and prints the
//! grounded answer. Argument parsing beyond "the rest is the question" is
//! a front-end concern and lives elsewhere.

use std::time::Duration;

use anyhow::{bail, Result};
use tracing::{info, warn, Level};

use vera_common::{Config, SystemContext};
use verad::{OllamaOracle, Orchestrator, ShellSession};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    let question: String = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if question.trim().is_empty() {
        bail!("usage: verad <question about this machine>");
    }

    info!("verad v{} starting", env!("CARGO_PKG_VERSION"));

    let config = Config::load();
    let system = SystemContext::detect();
    info!("System: {} ({})", system.os_key(), system.package_manager);

    let oracle = OllamaOracle::new(&config.oracle);
    if !oracle.is_available().await {
        warn!(
            "Reasoning oracle not reachable at {}; only pattern-matched questions will work",
            config.oracle.url
        );
    }

    let mut session = ShellSession::new(
        &config.engine.shell,
        Duration::from_secs(config.engine.command_timeout_secs),
        config.engine.max_output_bytes,
    );
    if let Some(dir) = &config.engine.working_dir {
        session = session.with_working_dir(dir.into());
    }
    session.start()?;

    let mut orchestrator = Orchestrator::new(config, system, Box::new(oracle), Box::new(session));
    let result = orchestrator.run(&question).await;

    match &result.direct_answer {
        Some(answer) => println!("{}", answer),
        None => println!("No answer could be produced ({})", result.status.as_str()),
    }
    info!(
        "{} commands, {} iterations, {} ms, status: {}",
        result.results.len(),
        result.iterations,
        result.duration_ms,
        result.status.as_str()
    );

    Ok(())
}
