//! In-memory ring buffers of recent activity, plus the `ContextData` record
//! the RPC `get_context` handler returns.
//!
//! One mutex per buffer, the same "never a single global lock" shape as
//! `db::get_db_lock`'s per-path lock map.

use crate::core::rules::SpawnOutcome;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;

const MAX_RECENT_COMMANDS: usize = 20;
const MAX_RECENT_TOOLS: usize = 10;

#[derive(Debug, Clone, Serialize)]
pub struct RecentCommand {
    pub name: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecentTool {
    pub name: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContextData {
    pub active_session: Option<String>,
    pub recent_commands: Vec<RecentCommandAge>,
    pub created_tools: Vec<RecentTool>,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecentCommandAge {
    pub name: String,
    pub age_secs: i64,
}

/// Bounded, newest-first activity log backing `ContextData`.
pub struct ContextCollector {
    commands: Mutex<VecDeque<RecentCommand>>,
    tools: Mutex<VecDeque<RecentTool>>,
}

impl Default for ContextCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextCollector {
    pub fn new() -> Self {
        Self {
            commands: Mutex::new(VecDeque::with_capacity(MAX_RECENT_COMMANDS)),
            tools: Mutex::new(VecDeque::with_capacity(MAX_RECENT_TOOLS)),
        }
    }

    pub fn record_command(&self, name: impl Into<String>, at: DateTime<Utc>) {
        let mut commands = self.commands.lock().unwrap_or_else(|e| e.into_inner());
        commands.push_front(RecentCommand { name: name.into(), at });
        commands.truncate(MAX_RECENT_COMMANDS);
    }

    pub fn record_tool_created(&self, name: impl Into<String>, at: DateTime<Utc>) {
        let mut tools = self.tools.lock().unwrap_or_else(|e| e.into_inner());
        tools.push_front(RecentTool { name: name.into(), at });
        tools.truncate(MAX_RECENT_TOOLS);
    }

    /// Builds a `ContextData` snapshot. `suggestions` surfaces rule-engine
    /// spawn outcomes from the triggering declaration, if any.
    pub fn snapshot(&self, active_session: Option<String>, spawn_outcomes: &[SpawnOutcome]) -> ContextData {
        let now = crate::core::time::now_utc();
        let commands = self.commands.lock().unwrap_or_else(|e| e.into_inner());
        let tools = self.tools.lock().unwrap_or_else(|e| e.into_inner());

        let recent_commands = commands
            .iter()
            .map(|c| RecentCommandAge {
                name: c.name.clone(),
                age_secs: now.signed_duration_since(c.at).num_seconds().max(0),
            })
            .collect();
        let created_tools = tools.iter().cloned().collect();

        let suggestions = spawn_outcomes
            .iter()
            .filter_map(|o| match o {
                SpawnOutcome::Spawned(id) => Some(format!("spawned companion tool: {id}")),
                SpawnOutcome::Failed { rule, reason } => Some(format!("rule {rule} failed: {reason}")),
                SpawnOutcome::SkippedExists { .. } => None,
            })
            .collect();

        ContextData {
            active_session,
            recent_commands,
            created_tools,
            suggestions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::now_utc;

    #[test]
    fn test_ring_buffer_truncates_to_capacity() {
        let collector = ContextCollector::new();
        for i in 0..30 {
            collector.record_command(format!("cmd-{i}"), now_utc());
        }
        let snapshot = collector.snapshot(None, &[]);
        assert_eq!(snapshot.recent_commands.len(), MAX_RECENT_COMMANDS);
    }

    #[test]
    fn test_newest_first_ordering() {
        let collector = ContextCollector::new();
        collector.record_command("first", now_utc());
        collector.record_command("second", now_utc());
        let snapshot = collector.snapshot(None, &[]);
        assert_eq!(snapshot.recent_commands[0].name, "second");
        assert_eq!(snapshot.recent_commands[1].name, "first");
    }

    #[test]
    fn test_suggestions_from_spawn_outcomes() {
        let collector = ContextCollector::new();
        let outcomes = vec![
            SpawnOutcome::Spawned("relation-tool-a-aaaaaa".to_string()),
            SpawnOutcome::SkippedExists { rule: "GitToolsRule".to_string() },
        ];
        let snapshot = collector.snapshot(None, &outcomes);
        assert_eq!(snapshot.suggestions.len(), 1);
    }
}
