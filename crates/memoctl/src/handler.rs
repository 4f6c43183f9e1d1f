//! Command handler

use std::time::Duration;

use anyhow::Result;
use memocache::{KeyPattern, MemoCache};

use crate::Command;

/// Runs operator commands against one opened cache
pub struct CommandHandler {
    cache: MemoCache,
}

impl CommandHandler {
    pub fn new(cache: MemoCache) -> Self {
        Self { cache }
    }

    /// Execute `cmd`, returning the text to print
    pub fn handle(&self, cmd: &Command) -> Result<String> {
        match cmd {
            Command::Stats { json } => self.handle_stats(*json),
            Command::Clear => Ok(format!("removed {} entries", self.cache.clear())),
            Command::Invalidate { pattern, prefix } => {
                let pattern = if *prefix {
                    KeyPattern::prefix(pattern.as_str())
                } else {
                    KeyPattern::substring(pattern.as_str())
                };
                Ok(format!(
                    "invalidated {} entries",
                    self.cache.invalidate_matching(pattern)
                ))
            }
            Command::Sweep => Ok(format!("swept {} entries", self.cache.sweep())),
        }
    }

    fn handle_stats(&self, json: bool) -> Result<String> {
        let stats = self.cache.stats();
        let config = self.cache.config();

        if json {
            let mut value = serde_json::to_value(&stats)?;
            value["hit_rate"] = serde_json::json!(stats.hit_rate());
            value["fast_hit_rate"] = serde_json::json!(stats.fast_hit_rate());
            value["durable_hit_rate"] = serde_json::json!(stats.durable_hit_rate());
            value["avg_fast_hit_ms"] = serde_json::json!(millis(stats.avg_fast_hit_time));
            value["avg_durable_hit_ms"] = serde_json::json!(millis(stats.avg_durable_hit_time));
            value["avg_compute_ms"] = serde_json::json!(millis(stats.avg_compute_time));
            value["storage_root"] = serde_json::json!(config.storage_root);
            value["durable_max_bytes"] = serde_json::json!(config.durable_max_bytes);
            return Ok(serde_json::to_string_pretty(&value)?);
        }

        Ok(format!(
            "# Storage\n\
             storage_root:{}\n\
             durable_entries:{}\n\
             durable_bytes:{}\n\
             durable_max_bytes:{}\n\
             # Stats\n\
             fast_hits:{}\n\
             durable_hits:{}\n\
             misses:{}\n\
             invalidations:{}\n\
             evictions:{}\n\
             hit_rate:{:.2}\n\
             fast_hit_rate:{:.2}\n\
             durable_hit_rate:{:.2}\n\
             avg_fast_hit_ms:{:.3}\n\
             avg_durable_hit_ms:{:.3}\n\
             avg_compute_ms:{:.3}",
            config.storage_root.display(),
            stats.durable_entries,
            stats.durable_bytes,
            config.durable_max_bytes,
            stats.fast_hits,
            stats.durable_hits,
            stats.misses,
            stats.invalidations,
            stats.evictions,
            stats.hit_rate(),
            stats.fast_hit_rate(),
            stats.durable_hit_rate(),
            millis(stats.avg_fast_hit_time),
            millis(stats.avg_durable_hit_time),
            millis(stats.avg_compute_time),
        ))
    }
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use memocache::{CacheConfig, EntryOptions, ManualClock};
    use std::convert::Infallible;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn seed(dir: &TempDir, keys: &[&str]) {
        let cache = MemoCache::open(CacheConfig::new(dir.path())).unwrap();
        for key in keys {
            cache
                .get_or_compute(key, || Ok::<_, Infallible>(key.len()))
                .unwrap();
        }
    }

    fn handler(dir: &TempDir) -> CommandHandler {
        CommandHandler::new(MemoCache::open(CacheConfig::new(dir.path())).unwrap())
    }

    #[test]
    fn test_stats_text() {
        let dir = TempDir::new().unwrap();
        seed(&dir, &["a", "b"]);

        let out = handler(&dir)
            .handle(&Command::Stats { json: false })
            .unwrap();
        assert!(out.contains("durable_entries:2"));
        assert!(out.contains("\nhit_rate:0.00"));
        assert!(out.contains("fast_hit_rate:0.00"));
        assert!(out.contains("avg_durable_hit_ms:0.000"));
    }

    #[test]
    fn test_stats_json() {
        let dir = TempDir::new().unwrap();
        seed(&dir, &["a"]);

        let out = handler(&dir).handle(&Command::Stats { json: true }).unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["durable_entries"], 1);
        assert_eq!(value["fast_entries"], 0);
        assert_eq!(value["durable_hit_rate"], 0.0);
        assert!(value["avg_fast_hit_ms"].is_number());
    }

    #[test]
    fn test_stats_report_tier_rates() {
        let dir = TempDir::new().unwrap();
        let cache = MemoCache::open(CacheConfig::new(dir.path()).with_fast_capacity(1)).unwrap();
        for key in ["a", "a", "b", "a"] {
            cache
                .get_or_compute(key, || Ok::<_, Infallible>(0u8))
                .unwrap();
        }

        let out = CommandHandler::new(cache)
            .handle(&Command::Stats { json: false })
            .unwrap();
        assert!(out.contains("fast_hit_rate:0.25"));
        assert!(out.contains("durable_hit_rate:0.25"));
        assert!(out.contains("\nhit_rate:0.50"));
    }

    #[test]
    fn test_invalidate_prefix_and_substring() {
        let dir = TempDir::new().unwrap();
        seed(&dir, &["parse:a", "parse:b", "lint:parse"]);
        let handler = handler(&dir);

        let out = handler
            .handle(&Command::Invalidate {
                pattern: "parse:".to_string(),
                prefix: true,
            })
            .unwrap();
        assert_eq!(out, "invalidated 2 entries");

        let out = handler
            .handle(&Command::Invalidate {
                pattern: "parse".to_string(),
                prefix: false,
            })
            .unwrap();
        assert_eq!(out, "invalidated 1 entries");
    }

    #[test]
    fn test_clear() {
        let dir = TempDir::new().unwrap();
        seed(&dir, &["a", "b", "c"]);

        assert_eq!(
            handler(&dir).handle(&Command::Clear).unwrap(),
            "removed 3 entries"
        );
        assert_eq!(
            handler(&dir).handle(&Command::Clear).unwrap(),
            "removed 0 entries"
        );
    }

    #[test]
    fn test_sweep_uses_real_time() {
        let dir = TempDir::new().unwrap();
        // Written an hour in the past with a one-minute TTL.
        let clock = Arc::new(ManualClock::new(Utc::now() - chrono::Duration::hours(1)));
        let cache = MemoCache::open(CacheConfig::new(dir.path()))
            .unwrap()
            .with_clock(clock);
        let options = EntryOptions::new().ttl(Duration::from_secs(60));
        cache
            .get_or_compute_with("old", &options, || Ok::<_, Infallible>(1))
            .unwrap();
        cache
            .get_or_compute("fresh", || Ok::<_, Infallible>(2))
            .unwrap();
        drop(cache);

        assert_eq!(
            handler(&dir).handle(&Command::Sweep).unwrap(),
            "swept 1 entries"
        );
    }
}
