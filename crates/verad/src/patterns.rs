//! Deterministic pattern library.
//!
//! Known question shapes map to multi-step plans that bypass the oracle
//! entirely: zero latency, no parsing risk. Each step declares what to
//! pull from its output into working memory; steps whose command contains
//! `{entity}` expand to one command per entity discovered by an earlier
//! step, and the plan is complete only when every expansion has run.
//!
//! The extractors double as a shared vocabulary: oracle-planned commands
//! that happen to match a known step get the same extraction applied, so
//! entity lists are discovered no matter who planned the command.

use std::collections::BTreeSet;

use regex::Regex;
use tracing::{debug, info};

use vera_common::WorkingMemory;

/// What a step pulls out of its output
pub enum Extract {
    /// Capture group 1 names entities (comma/whitespace separated, one or
    /// more matches). Each entity gets a follow-up command from the
    /// dependent per-entity step.
    EntityList {
        pattern: &'static str,
        category: &'static str,
    },
    /// Capture group 1 is the value for the entity this expansion ran for
    EntityValue { pattern: &'static str },
    /// Capture group 1 is a categorized standalone value
    Value {
        pattern: &'static str,
        category: &'static str,
    },
}

/// One step of a deterministic plan
pub struct Step {
    pub id: &'static str,
    /// Command template; `{entity}` marks a per-entity step
    pub command: &'static str,
    pub depends_on: &'static [&'static str],
    pub extract: Extract,
}

impl Step {
    fn is_per_entity(&self) -> bool {
        self.command.contains("{entity}")
    }
}

/// A known question shape
pub struct Pattern {
    pub intent: &'static str,
    /// Question matches when all keywords appear (case-insensitive)
    pub keywords: &'static [&'static str],
    /// Noun used when aggregating per-entity counts
    pub unit: &'static str,
    pub steps: &'static [Step],
}

static PATTERNS: &[Pattern] = &[
    Pattern {
        intent: "fail2ban_banned",
        keywords: &["fail2ban", "banned"],
        unit: "banned IPs",
        steps: &[
            Step {
                id: "jails",
                command: "fail2ban-client status",
                depends_on: &[],
                extract: Extract::EntityList {
                    pattern: r"Jail list:\s*(.+)",
                    category: "jails",
                },
            },
            Step {
                id: "jail_status",
                command: "fail2ban-client status {entity}",
                depends_on: &["jails"],
                extract: Extract::EntityValue {
                    pattern: r"Currently banned:\s*(\d+)",
                },
            },
        ],
    },
    Pattern {
        intent: "failed_services",
        keywords: &["failed", "services"],
        unit: "failed units",
        steps: &[
            Step {
                id: "failed_units",
                command: "systemctl --failed --no-legend --plain",
                depends_on: &[],
                extract: Extract::EntityList {
                    pattern: r"(?m)^\s*([A-Za-z0-9@._-]+\.service)",
                    category: "failed_units",
                },
            },
            Step {
                id: "unit_status",
                command: "systemctl status {entity} --no-pager -n 5",
                depends_on: &["failed_units"],
                extract: Extract::EntityValue {
                    pattern: r"Active:\s*(\S+)",
                },
            },
        ],
    },
    Pattern {
        intent: "disk_usage",
        keywords: &["disk", "space"],
        unit: "filesystems",
        steps: &[Step {
            id: "df",
            command: "df -h --total",
            depends_on: &[],
            extract: Extract::Value {
                pattern: r"(?m)^total\s+\S+\s+\S+\s+\S+\s+(\S+)",
                category: "disk_used_percent",
            },
        }],
    },
    Pattern {
        intent: "memory_usage",
        keywords: &["memory", "usage"],
        unit: "memory",
        steps: &[Step {
            id: "free",
            command: "free -h",
            depends_on: &[],
            extract: Extract::Value {
                pattern: r"(?m)^Mem:\s+\S+\s+(\S+)",
                category: "memory_used",
            },
        }],
    },
];

/// Match a command against a step template.
/// Returns None on no match, Some(None) for an exact base-step match, and
/// Some(Some(entity)) for a per-entity expansion.
fn template_matches(template: &str, command: &str) -> Option<Option<String>> {
    match template.find("{entity}") {
        Some(idx) => {
            let prefix = &template[..idx];
            let suffix = &template[idx + "{entity}".len()..];
            let entity = command.strip_prefix(prefix)?.strip_suffix(suffix)?;
            if entity.is_empty() || entity.contains(' ') {
                return None;
            }
            Some(Some(entity.to_string()))
        }
        None => (template == command).then_some(None),
    }
}

impl Pattern {
    /// Apply one step's extraction rule to its output.
    fn apply_extraction(
        &self,
        step: &Step,
        entity: Option<&str>,
        output: &str,
        memory: &mut WorkingMemory,
    ) {
        match &step.extract {
            Extract::EntityList { pattern, category } => {
                let re = match Regex::new(pattern) {
                    Ok(re) => re,
                    Err(_) => return,
                };
                let names: Vec<String> = re
                    .captures_iter(output)
                    .filter_map(|c| c.get(1))
                    .flat_map(|m| {
                        m.as_str()
                            .split(|c: char| c == ',' || c.is_whitespace())
                            .filter(|s| !s.is_empty())
                            .map(|s| s.to_string())
                            .collect::<Vec<_>>()
                    })
                    .collect();
                if names.is_empty() {
                    return;
                }
                // Every discovered entity needs its follow-up before the
                // plan may complete.
                if let Some(follow_up) = self
                    .steps
                    .iter()
                    .find(|s| s.is_per_entity() && s.depends_on.contains(&step.id))
                {
                    debug!("Discovered {} {}: {:?}", names.len(), category, names);
                    memory.record_list(category, &names, follow_up.command);
                } else {
                    for name in &names {
                        memory.record_data(category, name);
                    }
                }
            }
            Extract::EntityValue { pattern } => {
                let entity = match entity {
                    Some(entity) => entity,
                    None => return,
                };
                if let Some(value) = capture_first(pattern, output) {
                    memory.record_entity_value(entity, &value);
                }
            }
            Extract::Value { pattern, category } => {
                if let Some(value) = capture_first(pattern, output) {
                    memory.record_data(category, &value);
                }
            }
        }
    }
}

fn capture_first(pattern: &str, output: &str) -> Option<String> {
    let re = Regex::new(pattern).ok()?;
    re.captures(output)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Per-entity totals folded into one summary
#[derive(Debug, Clone)]
pub struct Aggregate {
    pub total: i64,
    pub breakdown: Vec<(String, i64)>,
    pub unit: String,
}

/// Runtime state of one matched pattern
pub struct PatternPlan {
    pattern: &'static Pattern,
    executed_steps: BTreeSet<&'static str>,
}

impl PatternPlan {
    fn new(pattern: &'static Pattern) -> Self {
        Self {
            pattern,
            executed_steps: BTreeSet::new(),
        }
    }

    pub fn intent(&self) -> &str {
        self.pattern.intent
    }

    /// Commands whose dependencies are satisfied: unexecuted base steps
    /// plus every pending per-entity follow-up.
    pub fn next_commands(&self, memory: &WorkingMemory) -> Vec<String> {
        let mut out: Vec<String> = self
            .pattern
            .steps
            .iter()
            .filter(|s| !s.is_per_entity())
            .filter(|s| !self.executed_steps.contains(s.id))
            .filter(|s| s.depends_on.iter().all(|d| self.executed_steps.contains(d)))
            .map(|s| s.command.to_string())
            .collect();
        out.extend(memory.pending_follow_ups().iter().map(|f| f.command.clone()));
        out
    }

    /// Record an executed command. Marks the owning step satisfied and
    /// runs its extraction rule. Returns false when the command belongs to
    /// no step of this plan.
    pub fn record(&mut self, command: &str, output: &str, memory: &mut WorkingMemory) -> bool {
        for step in self.pattern.steps {
            if let Some(entity) = template_matches(step.command, command) {
                if entity.is_none() {
                    self.executed_steps.insert(step.id);
                }
                self.pattern
                    .apply_extraction(step, entity.as_deref(), output, memory);
                return true;
            }
        }
        false
    }

    /// True only when every base step has executed and no per-entity
    /// follow-up remains.
    pub fn is_complete(&self, memory: &WorkingMemory) -> bool {
        let base_done = self
            .pattern
            .steps
            .iter()
            .filter(|s| !s.is_per_entity())
            .all(|s| self.executed_steps.contains(s.id));
        base_done && memory.pending_follow_ups().is_empty()
    }

    /// Fold per-entity extracted values into a total plus breakdown.
    pub fn aggregate(&self, memory: &WorkingMemory) -> Option<Aggregate> {
        memory.numeric_totals().map(|(total, breakdown)| Aggregate {
            total,
            breakdown,
            unit: self.pattern.unit.to_string(),
        })
    }
}

/// Intent-to-plan mapping checked before the oracle
pub struct PatternLibrary {
    patterns: &'static [Pattern],
}

impl Default for PatternLibrary {
    fn default() -> Self {
        Self::standard()
    }
}

impl PatternLibrary {
    pub fn standard() -> Self {
        Self { patterns: PATTERNS }
    }

    /// Deterministic match: the pattern whose keywords all appear in the
    /// question, most specific (most keywords) first.
    pub fn match_question(&self, question: &str) -> Option<PatternPlan> {
        let q = question.to_lowercase();
        let matched = self
            .patterns
            .iter()
            .filter(|p| p.keywords.iter().all(|k| q.contains(k)))
            .max_by_key(|p| p.keywords.len())?;
        info!("Pattern match: {} (skipping oracle planner)", matched.intent);
        Some(PatternPlan::new(matched))
    }

    /// Apply the extraction rule of any known step this command matches.
    /// Used on oracle-planned commands so entity enumeration is discovered
    /// regardless of who planned the command.
    pub fn apply_known_extractors(
        &self,
        command: &str,
        output: &str,
        memory: &mut WorkingMemory,
    ) -> bool {
        for pattern in self.patterns {
            for step in pattern.steps {
                if let Some(entity) = template_matches(step.command, command) {
                    pattern.apply_extraction(step, entity.as_deref(), output, memory);
                    return true;
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JAIL_STATUS: &str = "Status\n|- Number of jail:\t2\n`- Jail list:\tsshd, apache";
    const SSHD_STATUS: &str =
        "Status for the jail: sshd\n|- Filter\n`- Actions\n   |- Currently banned:\t3";
    const APACHE_STATUS: &str =
        "Status for the jail: apache\n|- Filter\n`- Actions\n   |- Currently banned:\t2";

    #[test]
    fn test_match_question() {
        let library = PatternLibrary::standard();
        let plan = library
            .match_question("how many IPs are banned in fail2ban?")
            .unwrap();
        assert_eq!(plan.intent(), "fail2ban_banned");

        assert!(library.match_question("what's the weather like?").is_none());
    }

    #[test]
    fn test_template_matching() {
        assert_eq!(
            template_matches("fail2ban-client status", "fail2ban-client status"),
            Some(None)
        );
        assert_eq!(
            template_matches(
                "fail2ban-client status {entity}",
                "fail2ban-client status sshd"
            ),
            Some(Some("sshd".to_string()))
        );
        assert_eq!(
            template_matches("fail2ban-client status {entity}", "df -h"),
            None
        );
        // base template does not swallow the per-entity form
        assert_eq!(
            template_matches("fail2ban-client status", "fail2ban-client status sshd"),
            None
        );
    }

    #[test]
    fn test_entity_discovery_creates_follow_ups() {
        let library = PatternLibrary::standard();
        let mut plan = library.match_question("banned IPs in fail2ban").unwrap();
        let mut memory = WorkingMemory::default();

        assert_eq!(
            plan.next_commands(&memory),
            vec!["fail2ban-client status".to_string()]
        );

        assert!(plan.record("fail2ban-client status", JAIL_STATUS, &mut memory));
        assert!(!plan.is_complete(&memory));

        let next = plan.next_commands(&memory);
        assert_eq!(
            next,
            vec![
                "fail2ban-client status sshd".to_string(),
                "fail2ban-client status apache".to_string(),
            ]
        );
    }

    #[test]
    fn test_full_iteration_then_aggregate() {
        let library = PatternLibrary::standard();
        let mut plan = library.match_question("banned IPs in fail2ban").unwrap();
        let mut memory = WorkingMemory::default();

        plan.record("fail2ban-client status", JAIL_STATUS, &mut memory);
        plan.record("fail2ban-client status sshd", SSHD_STATUS, &mut memory);
        memory.mark_followed_up("fail2ban-client status sshd");
        assert!(!plan.is_complete(&memory));

        plan.record("fail2ban-client status apache", APACHE_STATUS, &mut memory);
        memory.mark_followed_up("fail2ban-client status apache");
        assert!(plan.is_complete(&memory));

        let aggregate = plan.aggregate(&memory).unwrap();
        assert_eq!(aggregate.total, 5);
        assert_eq!(aggregate.breakdown.len(), 2);
        assert_eq!(aggregate.unit, "banned IPs");
    }

    #[test]
    fn test_value_extraction() {
        let library = PatternLibrary::standard();
        let mut plan = library.match_question("how much disk space is left?").unwrap();
        let mut memory = WorkingMemory::default();

        let df = "Filesystem  Size  Used Avail Use% Mounted on\n\
                  /dev/sda1   100G   50G   50G  50% /\n\
                  total       100G   50G   50G  50% -";
        plan.record("df -h --total", df, &mut memory);
        assert!(plan.is_complete(&memory));
        assert_eq!(
            memory.data_extracted.get("disk_used_percent"),
            Some(&vec!["50%".to_string()])
        );
    }

    #[test]
    fn test_known_extractors_apply_to_oracle_commands() {
        let library = PatternLibrary::standard();
        let mut memory = WorkingMemory::default();

        // The oracle planned this command itself; extraction still runs.
        assert!(library.apply_known_extractors(
            "fail2ban-client status",
            JAIL_STATUS,
            &mut memory
        ));
        assert_eq!(memory.discovered.lists, vec!["sshd", "apache"]);
        assert_eq!(memory.pending_follow_ups().len(), 2);

        assert!(!library.apply_known_extractors("uptime", "up 3 days", &mut memory));
    }

    #[test]
    fn test_failed_services_enumeration() {
        let library = PatternLibrary::standard();
        let mut plan = library
            .match_question("which services failed on this host?")
            .unwrap();
        let mut memory = WorkingMemory::default();

        let failed = "  nginx.service loaded failed failed A high performance web server\n\
                      fail2ban.service loaded failed failed Ban hosts\n";
        plan.record("systemctl --failed --no-legend --plain", failed, &mut memory);
        assert_eq!(memory.discovered.lists.len(), 2);
        assert!(memory
            .pending_follow_ups()
            .iter()
            .any(|f| f.command == "systemctl status nginx.service --no-pager -n 5"));
    }
}
