//! Single-command execution step.
//!
//! Pops one command off the plan queue and runs it through the full
//! pipeline: safety validation, cache lookup, backend execution, cache
//! store on success. Every attempt — success, failure, timeout or block —
//! is recorded on the context unconditionally so the loop always advances
//! and `executed_commands` stays 1:1 with `results`. No automatic retries;
//! failures are the evaluator's problem.

use std::time::Instant;

use tracing::{info, warn};

use vera_common::{CommandResult, EngineError, ExecutionContext};

use crate::backend::CommandBackend;
use crate::cache::{CacheKey, ResultCache};
use crate::safety::CommandGuard;

/// Owns the validator and cache for one orchestrator
pub struct Executor {
    guard: CommandGuard,
    cache: ResultCache,
}

impl Executor {
    pub fn new(cache: ResultCache) -> Self {
        Self {
            guard: CommandGuard::new(),
            cache,
        }
    }

    /// Run the next queued command, if any. Returns whether a command was
    /// processed.
    pub async fn execute_next(
        &mut self,
        ctx: &mut ExecutionContext,
        backend: &mut dyn CommandBackend,
    ) -> bool {
        let command = match ctx.next_command() {
            Some(command) => command,
            None => return false,
        };

        // Safety first: a blocked command yields a skipped result and
        // never reaches a backend.
        let verdict = self.guard.validate(&command);
        if !verdict.allowed {
            let reason = verdict.reason.unwrap_or_else(|| "denied".to_string());
            warn!("Blocked command: {} ({})", command, reason);
            ctx.metadata.blocked_commands.push(command.clone());
            ctx.record(CommandResult::skipped(&command, &reason));
            return true;
        }

        let key = CacheKey::new(&command, &ctx.system.os_key(), &ctx.intent);
        if let Some(cached) = self.cache.get(&key) {
            info!("Cache hit: {}", command);
            ctx.metadata.cache_hits += 1;
            ctx.record(cached);
            return true;
        }

        let started = Instant::now();
        let result = match backend.run(&command).await {
            Ok(output) => CommandResult {
                command: command.clone(),
                stdout: output.stdout,
                stderr: output.stderr,
                exit_code: output.exit_code,
                from_cache: false,
                truncated: output.truncated,
                skipped_reason: None,
                timing_ms: started.elapsed().as_millis() as u64,
            },
            Err(EngineError::CommandTimeout(secs)) => CommandResult::failed(
                &command,
                &format!("timed out after {}s", secs),
                started.elapsed().as_millis() as u64,
            ),
            Err(e) => CommandResult::failed(
                &command,
                &e.to_string(),
                started.elapsed().as_millis() as u64,
            ),
        };

        if result.succeeded() {
            self.cache.insert(key, result.clone());
        }
        ctx.record(result);
        true
    }

    /// Drop expired cache entries.
    pub fn sweep_cache(&mut self) {
        self.cache.sweep();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::FakeBackend;
    use std::time::Duration;
    use vera_common::SystemContext;

    fn executor() -> Executor {
        Executor::new(ResultCache::new(Duration::from_secs(60)))
    }

    fn ctx_with(commands: &[&str]) -> ExecutionContext {
        let mut ctx = ExecutionContext::new("test", SystemContext::default());
        ctx.push_commands(commands.iter().map(|c| c.to_string()));
        ctx
    }

    #[tokio::test]
    async fn test_blocked_command_never_reaches_backend() {
        let mut executor = executor();
        let mut backend = FakeBackend::new();
        let mut ctx = ctx_with(&["rm -rf /"]);

        assert!(executor.execute_next(&mut ctx, &mut backend).await);

        assert_eq!(backend.total_calls(), 0);
        assert_eq!(ctx.results.len(), 1);
        assert!(ctx.results[0].skipped_reason.is_some());
        assert_eq!(ctx.metadata.blocked_commands, vec!["rm -rf /"]);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_backend() {
        let mut executor = executor();
        let mut backend = FakeBackend::new().with_output("uptime", "up 3 days");
        let mut ctx = ctx_with(&["uptime"]);

        executor.execute_next(&mut ctx, &mut backend).await;
        ctx.push_commands(["uptime".to_string()]);
        executor.execute_next(&mut ctx, &mut backend).await;

        assert_eq!(backend.total_calls(), 1);
        assert_eq!(ctx.metadata.cache_hits, 1);
        assert!(!ctx.results[0].from_cache);
        assert!(ctx.results[1].from_cache);
        assert_eq!(ctx.results[1].stdout, "up 3 days");
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let mut executor = executor();
        let mut backend =
            FakeBackend::new().with_response("broken", crate::backend::FakeResponse::error("no", 1));
        let mut ctx = ctx_with(&["broken"]);

        executor.execute_next(&mut ctx, &mut backend).await;
        ctx.push_commands(["broken".to_string()]);
        executor.execute_next(&mut ctx, &mut backend).await;

        assert_eq!(backend.total_calls(), 2);
        assert_eq!(ctx.metadata.cache_hits, 0);
    }

    #[tokio::test]
    async fn test_results_stay_in_lockstep() {
        let mut executor = executor();
        let mut backend = FakeBackend::new().with_output("df -h", "disk stuff");
        let mut ctx = ctx_with(&["rm -rf /", "df -h", "missing"]);

        while executor.execute_next(&mut ctx, &mut backend).await {}

        assert_eq!(ctx.executed_commands.len(), 3);
        assert_eq!(ctx.results.len(), 3);
        assert!(ctx.current_plan.is_empty());
    }

    #[tokio::test]
    async fn test_empty_queue_is_a_noop() {
        let mut executor = executor();
        let mut backend = FakeBackend::new();
        let mut ctx = ctx_with(&[]);
        assert!(!executor.execute_next(&mut ctx, &mut backend).await);
        assert!(ctx.results.is_empty());
    }
}
