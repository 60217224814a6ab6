//! Oracle response schemas.
//!
//! The oracle returns loosely structured JSON; these types pin it down
//! immediately after parsing. Anything that violates the required-field
//! schema becomes a typed failure at the parse site instead of ad hoc
//! field access later. Parsing is forgiving about nulls and missing
//! optional fields, strict about the fields a run cannot proceed without.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Initial plan returned by the oracle for one question
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OraclePlan {
    pub intent: String,
    pub data_needed: Vec<String>,
    pub commands: Vec<String>,
    pub success_criteria: String,
}

impl OraclePlan {
    /// Validate a parsed JSON value against the plan schema.
    ///
    /// `commands` must be a non-empty array of non-empty strings; a plan
    /// without commands is no plan at all.
    pub fn from_value(v: &Value) -> Result<Self, String> {
        let commands = match v.get("commands") {
            Some(Value::Array(items)) => {
                let commands: Vec<String> = items
                    .iter()
                    .filter_map(|c| c.as_str())
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty())
                    .collect();
                if commands.is_empty() {
                    return Err("plan has an empty commands array".to_string());
                }
                commands
            }
            Some(_) => return Err("plan commands field is not an array".to_string()),
            None => return Err("plan is missing the commands field".to_string()),
        };

        Ok(Self {
            intent: str_field(v, "intent").unwrap_or_else(|| "unknown".to_string()),
            data_needed: string_array(v.get("data_needed")),
            commands,
            success_criteria: str_field(v, "success_criteria").unwrap_or_default(),
        })
    }
}

/// Progress judgment returned by the oracle once the plan queue is empty
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    pub question_answered: bool,
    pub answer: Option<String>,
    pub next_commands: Vec<String>,
    pub reasoning: String,
}

impl Evaluation {
    /// Validate a parsed JSON value against the evaluation schema.
    ///
    /// `question_answered` must be present as a boolean; an evaluation
    /// that cannot say whether the question is answered is unusable.
    pub fn from_value(v: &Value) -> Result<Self, String> {
        let question_answered = match v.get("question_answered").and_then(|x| x.as_bool()) {
            Some(b) => b,
            None => return Err("evaluation is missing question_answered".to_string()),
        };

        Ok(Self {
            question_answered,
            answer: str_field(v, "answer"),
            next_commands: string_array(v.get("next_commands")),
            reasoning: str_field(v, "reasoning").unwrap_or_default(),
        })
    }

    /// Apply the consistency rules the loop relies on:
    ///
    /// - answered + more commands is contradictory; treat as not answered
    ///   rather than trusting either half of the judgment
    /// - an answer without `question_answered` is discarded
    pub fn normalized(mut self) -> Self {
        if self.question_answered && !self.next_commands.is_empty() {
            self.question_answered = false;
            self.answer = None;
        }
        if !self.question_answered {
            self.answer = None;
        }
        self
    }
}

fn str_field(v: &Value, key: &str) -> Option<String> {
    v.get(key)
        .and_then(|x| x.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn string_array(v: Option<&Value>) -> Vec<String> {
    v.and_then(|x| x.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|c| c.as_str())
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect()
        })
        .unwrap_or_default()
}
