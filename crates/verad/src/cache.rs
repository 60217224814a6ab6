//! Result cache with TTL expiry.
//!
//! Memoizes successful command results within one run so a re-planned
//! identical command is not executed twice. Keyed by (command, OS, intent)
//! so the same command asked for a different purpose on a different system
//! never collides. The cache is a field of the orchestrator, never a
//! process-wide global.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::debug;
use vera_common::CommandResult;

/// Cache key: command text plus the system and intent it ran under
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct CacheKey {
    pub command: String,
    pub os: String,
    pub intent: String,
}

impl CacheKey {
    pub fn new(command: &str, os: &str, intent: &str) -> Self {
        Self {
            command: command.to_string(),
            os: os.to_string(),
            intent: intent.to_string(),
        }
    }
}

struct CacheEntry {
    result: CommandResult,
    stored_at: Instant,
}

/// Time-bounded memo of command results
pub struct ResultCache {
    entries: HashMap<CacheKey, CacheEntry>,
    ttl: Duration,
}

impl ResultCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    /// Look up a fresh entry. Expired entries are treated as absent and
    /// removed on the next sweep.
    pub fn get(&self, key: &CacheKey) -> Option<CommandResult> {
        let entry = self.entries.get(key)?;
        if entry.stored_at.elapsed() > self.ttl {
            debug!("Cache entry expired: {}", key.command);
            return None;
        }
        let mut result = entry.result.clone();
        result.from_cache = true;
        Some(result)
    }

    /// Store a result. The executor only stores successes; this does not
    /// re-check.
    pub fn insert(&mut self, key: CacheKey, result: CommandResult) {
        self.entries.insert(
            key,
            CacheEntry {
                result,
                stored_at: Instant::now(),
            },
        );
    }

    /// Drop entries past their TTL.
    pub fn sweep(&mut self) {
        let ttl = self.ttl;
        self.entries.retain(|_, e| e.stored_at.elapsed() <= ttl);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_result(command: &str) -> CommandResult {
        CommandResult {
            command: command.to_string(),
            stdout: "out".to_string(),
            stderr: String::new(),
            exit_code: 0,
            from_cache: false,
            truncated: false,
            skipped_reason: None,
            timing_ms: 5,
        }
    }

    #[test]
    fn test_hit_is_marked_from_cache() {
        let mut cache = ResultCache::new(Duration::from_secs(60));
        let key = CacheKey::new("df -h", "Linux/arch", "disk_usage");
        cache.insert(key.clone(), ok_result("df -h"));

        let hit = cache.get(&key).unwrap();
        assert!(hit.from_cache);
        assert_eq!(hit.stdout, "out");
    }

    #[test]
    fn test_key_includes_intent_and_os() {
        let mut cache = ResultCache::new(Duration::from_secs(60));
        cache.insert(
            CacheKey::new("df -h", "Linux/arch", "disk_usage"),
            ok_result("df -h"),
        );
        assert!(cache
            .get(&CacheKey::new("df -h", "Linux/debian", "disk_usage"))
            .is_none());
        assert!(cache
            .get(&CacheKey::new("df -h", "Linux/arch", "memory"))
            .is_none());
    }

    #[test]
    fn test_expiry() {
        let mut cache = ResultCache::new(Duration::from_millis(0));
        let key = CacheKey::new("uptime", "Linux/arch", "load");
        cache.insert(key.clone(), ok_result("uptime"));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get(&key).is_none());

        cache.sweep();
        assert!(cache.is_empty());
    }
}
