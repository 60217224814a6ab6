//! Per-run working memory and execution context.
//!
//! `WorkingMemory` is the structured extraction state the loop accumulates
//! across iterations: entity lists discovered in command output, per-entity
//! values, pending follow-ups, and categorized extracted data. It is
//! mutated only by the orchestration loop, never concurrently.
//!
//! `ExecutionContext` owns everything one run touches. It is constructed
//! per run and discarded afterwards; nothing here is process-global.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::context::SystemContext;
use crate::result::{CommandResult, RunMetadata};

/// A per-entity follow-up command that must execute before the run may
/// declare completion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingFollowUp {
    pub entity: String,
    pub command: String,
    pub category: String,
}

/// Entities discovered in command output
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Discovered {
    /// Entity names in discovery order
    pub lists: Vec<String>,
    /// Entity name -> extracted value (count or attribute)
    pub entities: BTreeMap<String, String>,
    /// Follow-ups not yet executed; drained as their commands run
    pub needs_iteration: Vec<PendingFollowUp>,
}

/// Mutable extraction state for one run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkingMemory {
    pub discovered: Discovered,
    pub hypothesis: String,
    /// Category -> values pulled out of command output
    pub data_extracted: BTreeMap<String, Vec<String>>,
}

impl WorkingMemory {
    /// Record a discovered entity list along with the follow-up command
    /// each entity requires. Re-discovery of a known entity is a no-op so
    /// cached re-runs do not duplicate follow-ups.
    pub fn record_list(&mut self, category: &str, names: &[String], follow_up_template: &str) {
        for name in names {
            if self.discovered.lists.iter().any(|n| n == name) {
                continue;
            }
            self.discovered.lists.push(name.clone());
            self.discovered.needs_iteration.push(PendingFollowUp {
                entity: name.clone(),
                command: follow_up_template.replace("{entity}", name),
                category: category.to_string(),
            });
        }
    }

    /// Record the value extracted from one entity's follow-up output.
    pub fn record_entity_value(&mut self, entity: &str, value: &str) {
        self.discovered
            .entities
            .insert(entity.to_string(), value.to_string());
    }

    /// Record a categorized extracted value.
    pub fn record_data(&mut self, category: &str, value: &str) {
        self.data_extracted
            .entry(category.to_string())
            .or_default()
            .push(value.to_string());
    }

    /// Mark any pending follow-up satisfied by this command.
    pub fn mark_followed_up(&mut self, command: &str) {
        self.discovered
            .needs_iteration
            .retain(|f| f.command != command);
    }

    /// Follow-ups that still have to run before completion.
    pub fn pending_follow_ups(&self) -> &[PendingFollowUp] {
        &self.discovered.needs_iteration
    }

    /// Sum per-entity values that parse as integers.
    /// Returns (total, per-entity breakdown) when at least one parses.
    pub fn numeric_totals(&self) -> Option<(i64, Vec<(String, i64)>)> {
        let breakdown: Vec<(String, i64)> = self
            .discovered
            .entities
            .iter()
            .filter_map(|(name, value)| value.trim().parse::<i64>().ok().map(|n| (name.clone(), n)))
            .collect();
        if breakdown.is_empty() {
            return None;
        }
        let total = breakdown.iter().map(|(_, n)| n).sum();
        Some((total, breakdown))
    }

    /// Compact text block for evaluator and synthesizer prompts.
    pub fn summary_block(&self) -> String {
        let mut out = String::new();
        if !self.discovered.lists.is_empty() {
            out.push_str(&format!(
                "Discovered entities: {}\n",
                self.discovered.lists.join(", ")
            ));
        }
        for (name, value) in &self.discovered.entities {
            out.push_str(&format!("  {} = {}\n", name, value));
        }
        if !self.discovered.needs_iteration.is_empty() {
            let pending: Vec<&str> = self
                .discovered
                .needs_iteration
                .iter()
                .map(|f| f.entity.as_str())
                .collect();
            out.push_str(&format!("Entities not yet inspected: {}\n", pending.join(", ")));
        }
        for (category, values) in &self.data_extracted {
            out.push_str(&format!("{}: {}\n", category, values.join("; ")));
        }
        if !self.hypothesis.is_empty() {
            out.push_str(&format!("Hypothesis: {}\n", self.hypothesis));
        }
        out
    }
}

/// Everything one orchestration run owns
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub question: String,
    pub system: SystemContext,
    pub executed_commands: Vec<String>,
    pub results: Vec<CommandResult>,
    /// Pending queue of commands still to run
    pub current_plan: VecDeque<String>,
    pub iteration: usize,
    pub is_complete: bool,
    pub direct_answer: Option<String>,
    pub intent: String,
    pub memory: WorkingMemory,
    pub metadata: RunMetadata,
}

impl ExecutionContext {
    pub fn new(question: &str, system: SystemContext) -> Self {
        Self {
            question: question.to_string(),
            system,
            executed_commands: Vec::new(),
            results: Vec::new(),
            current_plan: VecDeque::new(),
            iteration: 0,
            is_complete: false,
            direct_answer: None,
            intent: "unknown".to_string(),
            memory: WorkingMemory::default(),
            metadata: RunMetadata::default(),
        }
    }

    /// Append a result. This is the only way results enter the context, so
    /// executed_commands and results stay 1:1 by construction.
    pub fn record(&mut self, result: CommandResult) {
        self.executed_commands.push(result.command.clone());
        self.memory.mark_followed_up(&result.command);
        self.results.push(result);
    }

    /// Queue commands, skipping ones already queued.
    pub fn push_commands<I: IntoIterator<Item = String>>(&mut self, commands: I) {
        for command in commands {
            if self.current_plan.iter().any(|c| c == &command) {
                continue;
            }
            self.current_plan.push_back(command);
        }
    }

    pub fn next_command(&mut self) -> Option<String> {
        self.current_plan.pop_front()
    }

    pub fn has_executed(&self, command: &str) -> bool {
        self.executed_commands.iter().any(|c| c == command)
    }

    /// Tail of the execution history rendered for oracle prompts, most
    /// recent last, outputs clipped to keep prompts small.
    pub fn history_block(&self, max_results: usize, max_chars: usize) -> String {
        let start = self.results.len().saturating_sub(max_results);
        let mut out = String::new();
        for result in &self.results[start..] {
            let status = match &result.skipped_reason {
                Some(reason) => format!("skipped ({})", reason),
                None => format!("exit {}", result.exit_code),
            };
            let combined = result.combined();
            let clipped: String = combined.chars().take(max_chars).collect();
            let suffix = if combined.chars().count() > max_chars {
                "..."
            } else {
                ""
            };
            out.push_str(&format!(
                "$ {}\n[{}]\n{}{}\n\n",
                result.command, status, clipped, suffix
            ));
        }
        out
    }
}
