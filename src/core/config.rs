//! Configuration record injected at daemon startup.
//!
//! Loading this struct from a file, environment, or CLI flags is the job of
//! the (out-of-scope) CLI front-end; this crate only consumes the
//! constructed record.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

fn default_root_dir() -> PathBuf {
    std::env::var("PORT42_ROOT_OVERRIDE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs_home().join(".port42")
        })
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Process-wide configuration, constructed once and passed by reference into
/// every store and handler that needs it. Never accessed via a module-level
/// singleton.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base directory for all storage (objects, metadata, relations, commands).
    pub root_dir: PathBuf,
    /// Primary listening port.
    pub tcp_port: u16,
    /// Secondary port attempted once if the primary fails to bind.
    pub fallback_port: u16,
    /// Provider model name (the provider API key itself is read by the
    /// out-of-scope AI client, not this crate).
    pub ai_model: String,
    /// Default TTL for cached URL artifacts, in seconds.
    pub url_cache_ttl_secs: u64,
    /// Per-artifact body cap in bytes.
    pub url_cache_max_bytes: usize,
    /// Aggregate AI context budget in bytes.
    pub ai_context_budget_bytes: usize,
    /// Accepted prompt length in characters.
    pub prompt_max_chars: usize,
    /// Active -> Idle inactivity threshold, in seconds.
    pub session_idle_after_secs: u64,
    /// Log verbosity passed to `tracing_subscriber`'s env filter.
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            tcp_port: 42,
            fallback_port: 4242,
            ai_model: "default".to_string(),
            url_cache_ttl_secs: 24 * 60 * 60,
            url_cache_max_bytes: 50_000,
            ai_context_budget_bytes: 8_192,
            prompt_max_chars: 5_000,
            session_idle_after_secs: 30 * 60,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn objects_dir(&self) -> PathBuf {
        self.root_dir.join("objects")
    }

    pub fn metadata_dir(&self) -> PathBuf {
        self.root_dir.join("metadata")
    }

    pub fn relations_dir(&self) -> PathBuf {
        self.root_dir.join("relations")
    }

    pub fn commands_dir(&self) -> PathBuf {
        self.root_dir.join("commands")
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.root_dir.join("sessions")
    }

    pub fn indices_dir(&self) -> PathBuf {
        self.root_dir.join("indices")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ports() {
        let cfg = Config::default();
        assert_eq!(cfg.tcp_port, 42);
        assert_eq!(cfg.fallback_port, 4242);
    }

    #[test]
    fn test_default_budgets() {
        let cfg = Config::default();
        assert_eq!(cfg.ai_context_budget_bytes, 8_192);
        assert_eq!(cfg.prompt_max_chars, 5_000);
        assert_eq!(cfg.url_cache_max_bytes, 50_000);
        assert_eq!(cfg.session_idle_after_secs, 1_800);
        assert_eq!(cfg.url_cache_ttl_secs, 86_400);
    }

    #[test]
    fn test_derived_paths() {
        let mut cfg = Config::default();
        cfg.root_dir = PathBuf::from("/tmp/p42-test");
        assert_eq!(cfg.objects_dir(), PathBuf::from("/tmp/p42-test/objects"));
        assert_eq!(cfg.commands_dir(), PathBuf::from("/tmp/p42-test/commands"));
    }
}
