//! The orchestration engine.
//!
//! One `Orchestrator` owns everything a run needs — oracle, backend,
//! validator, cache, pattern library — as instance fields, so concurrent
//! runs in one process never share state. The run itself is the
//! Plan → Execute ⇄ Evaluate → Synthesize machine: exactly one command in
//! flight at a time, budgets checked on every pass, and synthesis always
//! reached, even when a budget expires with partial data.

use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use vera_common::{Config, ExecutionContext, RunResult, RunStatus, SystemContext};

use crate::backend::CommandBackend;
use crate::cache::ResultCache;
use crate::evaluator;
use crate::executor::Executor;
use crate::oracle::ReasoningOracle;
use crate::patterns::{PatternLibrary, PatternPlan};
use crate::planner;
use crate::synthesizer;

/// Per-run orchestration engine
pub struct Orchestrator {
    config: Config,
    system: SystemContext,
    oracle: Box<dyn ReasoningOracle>,
    backend: Box<dyn CommandBackend>,
    patterns: PatternLibrary,
    executor: Executor,
}

impl Orchestrator {
    pub fn new(
        config: Config,
        system: SystemContext,
        oracle: Box<dyn ReasoningOracle>,
        backend: Box<dyn CommandBackend>,
    ) -> Self {
        let cache = ResultCache::new(Duration::from_secs(config.engine.cache_ttl_secs));
        Self {
            config,
            system,
            oracle,
            backend,
            patterns: PatternLibrary::standard(),
            executor: Executor::new(cache),
        }
    }

    /// Answer one question. Never panics, never hangs past the configured
    /// budgets, and always returns whatever partial data exists.
    pub async fn run(&mut self, question: &str) -> RunResult {
        let started = Instant::now();
        let run_id = Uuid::new_v4().to_string();
        info!("Run {}: {}", run_id, question);

        let mut ctx = ExecutionContext::new(question, self.system.clone());

        // Deterministic pattern first; the oracle only plans when no
        // pattern matches.
        let mut pattern_plan: Option<PatternPlan> = self.patterns.match_question(question);
        match &pattern_plan {
            Some(plan) => {
                ctx.intent = plan.intent().to_string();
                let first = plan.next_commands(&ctx.memory);
                ctx.push_commands(first);
            }
            None => {
                ctx.metadata.ai_calls += 1;
                match planner::plan(self.oracle.as_ref(), question, &self.system).await {
                    Ok(plan) => {
                        ctx.intent = plan.intent.clone();
                        ctx.push_commands(plan.commands);
                    }
                    Err(e) => {
                        warn!("Run {} aborted: {}", run_id, e);
                        return self.build_result(run_id, ctx, RunStatus::PlanningFailed, started);
                    }
                }
            }
        }

        let max_iterations = self.config.engine.max_iterations;
        let budget = Duration::from_secs(self.config.engine.max_execution_secs);
        let mut status = RunStatus::Complete;

        loop {
            if ctx.iteration >= max_iterations {
                warn!("Run {}: iteration limit reached", run_id);
                status = RunStatus::IterationLimit;
                break;
            }
            if started.elapsed() >= budget {
                warn!("Run {}: time budget exhausted", run_id);
                status = RunStatus::TimeBudget;
                break;
            }
            ctx.iteration += 1;

            // Execute phase: one queued command per pass.
            if !ctx.current_plan.is_empty() {
                self.executor
                    .execute_next(&mut ctx, self.backend.as_mut())
                    .await;

                // Working memory update: the owning pattern step (or any
                // known extractor) pulls data out of the fresh output.
                if let Some(result) = ctx.results.last() {
                    let command = result.command.clone();
                    let stdout = result.stdout.clone();
                    match &mut pattern_plan {
                        Some(plan) => {
                            plan.record(&command, &stdout, &mut ctx.memory);
                        }
                        None => {
                            self.patterns
                                .apply_known_extractors(&command, &stdout, &mut ctx.memory);
                        }
                    }
                }
                if let Some(plan) = &pattern_plan {
                    let next = plan.next_commands(&ctx.memory);
                    ctx.push_commands(next);
                }
                continue;
            }

            // Evaluate phase: queue is empty.
            if let Some(plan) = &pattern_plan {
                if plan.is_complete(&ctx.memory) {
                    ctx.is_complete = true;
                    break;
                }
                let next = plan.next_commands(&ctx.memory);
                if next.is_empty() {
                    status = RunStatus::Stalled;
                    break;
                }
                ctx.push_commands(next);
                continue;
            }

            ctx.metadata.ai_calls += 1;
            match evaluator::evaluate(self.oracle.as_ref(), &ctx).await {
                Ok(evaluation) => {
                    if evaluation.question_answered {
                        ctx.direct_answer = evaluation.answer;
                        ctx.is_complete = true;
                        break;
                    }
                    if evaluation.next_commands.is_empty() {
                        status = RunStatus::Stalled;
                        break;
                    }
                    info!(
                        "Run {}: evaluator queued {} more commands",
                        run_id,
                        evaluation.next_commands.len()
                    );
                    ctx.push_commands(evaluation.next_commands);
                }
                Err(e) => {
                    // The commands already succeeded; degrade to the
                    // deterministic answer instead of surfacing an error.
                    warn!("Run {}: {}; synthesizing from partial data", run_id, e);
                    status = RunStatus::Stalled;
                    break;
                }
            }
        }

        // Synthesize phase: always reached, partial data included.
        let aggregate = pattern_plan
            .as_ref()
            .and_then(|plan| plan.aggregate(&ctx.memory));
        let (mut answer, synth_calls) =
            synthesizer::final_answer(self.oracle.as_ref(), &ctx, aggregate.as_ref()).await;
        ctx.metadata.ai_calls += synth_calls;

        match status {
            RunStatus::IterationLimit => {
                answer.push_str("\n\n[Note: iteration limit reached; answer uses partial data.]")
            }
            RunStatus::TimeBudget => {
                answer.push_str("\n\n[Note: time budget exhausted; answer uses partial data.]")
            }
            _ => {}
        }
        ctx.direct_answer = Some(answer);

        self.executor.sweep_cache();
        self.build_result(run_id, ctx, status, started)
    }

    fn build_result(
        &self,
        run_id: String,
        ctx: ExecutionContext,
        status: RunStatus,
        started: Instant,
    ) -> RunResult {
        let success = ctx.is_complete
            || (status != RunStatus::PlanningFailed && ctx.results.iter().any(|r| r.succeeded()));
        info!(
            "Run {} finished: status={}, {} commands, {} iterations, {} oracle calls",
            run_id,
            status.as_str(),
            ctx.results.len(),
            ctx.iteration,
            ctx.metadata.ai_calls
        );
        RunResult {
            id: run_id,
            success,
            question: ctx.question,
            direct_answer: ctx.direct_answer,
            executed_commands: ctx.executed_commands,
            results: ctx.results,
            iterations: ctx.iteration,
            duration_ms: started.elapsed().as_millis() as u64,
            status,
            metadata: ctx.metadata,
            completed_at: Utc::now(),
        }
    }
}
