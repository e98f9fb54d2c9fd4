//! Conversational session/memory store.
//!
//! A session tracks one agent's conversation across a state machine
//! (`Active -> Idle -> {Completed | Abandoned}`), indexed under the object
//! store/metadata index like any other stored entity so the VFS's
//! `/memory/...` views fall out of the same machinery as `/commands/...`.

use crate::core::db;
use crate::core::error::PortError;
use crate::core::metadata::{Lifecycle, Metadata};
use crate::core::schemas;
use crate::core::store::ObjectStore;
use crate::core::time::{new_event_id, now_utc};
use crate::core::metadata::MetadataIndex;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Active,
    Idle,
    Completed,
    Abandoned,
}

impl SessionState {
    fn as_str(&self) -> &'static str {
        match self {
            SessionState::Active => "active",
            SessionState::Idle => "idle",
            SessionState::Completed => "completed",
            SessionState::Abandoned => "abandoned",
        }
    }

    /// Only `Completed` sessions are `stable`; `Abandoned` maps to
    /// `archived`; `Active`/`Idle` map to `active`/`draft` respectively.
    fn lifecycle(&self) -> Lifecycle {
        match self {
            SessionState::Active => Lifecycle::Active,
            SessionState::Idle => Lifecycle::Draft,
            SessionState::Completed => Lifecycle::Stable,
            SessionState::Abandoned => Lifecycle::Archived,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub agent: String,
    pub state: SessionState,
    pub messages: Vec<Message>,
    pub tags: Vec<String>,
    pub command_generated: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// Lowercases, strips a leading `@`, and collapses whitespace/`/` into `-`
/// so an agent handle is always safe to use as a VFS path segment.
pub fn sanitize_agent(agent: &str) -> String {
    let trimmed = agent.trim().trim_start_matches('@').to_lowercase();
    let mut out = String::with_capacity(trimmed.len());
    let mut prev_dash = false;
    for c in trimmed.chars() {
        if c.is_whitespace() || c == '/' {
            if !prev_dash && !out.is_empty() {
                out.push('-');
                prev_dash = true;
            }
        } else {
            out.push(c);
            prev_dash = false;
        }
    }
    out.trim_matches('-').to_string()
}

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "if", "so", "to", "of", "in", "on", "at", "by", "for",
    "with", "from", "is", "are", "was", "were", "be", "been", "being", "this", "that", "these",
    "those", "it", "its", "i", "you", "he", "she", "we", "they", "do", "does", "did", "can",
    "could", "would", "should", "will", "shall", "not", "no", "yes", "please", "me", "my", "your",
];

/// First 10 distinct non-stopword tokens of length >= 3, in first-seen order.
pub fn extract_tags(messages: &[Message]) -> Vec<String> {
    let stopwords: HashSet<&str> = STOPWORDS.iter().copied().collect();
    let mut seen = HashSet::new();
    let mut tags = Vec::new();
    for message in messages {
        for word in message.content.split(|c: char| !c.is_alphanumeric()) {
            if tags.len() >= 10 {
                return tags;
            }
            let lowered = word.to_lowercase();
            if lowered.len() < 3 || stopwords.contains(lowered.as_str()) {
                continue;
            }
            if seen.insert(lowered.clone()) {
                tags.push(lowered);
            }
        }
    }
    tags
}

fn session_path(id: &str) -> String {
    format!("/memory/sessions/{id}")
}

fn alias_path(id: &str) -> String {
    format!("/memory/{id}")
}

fn by_date_path(date: &str, id: &str) -> String {
    format!("/memory/sessions/by-date/{date}/{id}")
}

fn by_agent_path(agent: &str, id: &str) -> String {
    format!("/memory/sessions/by-agent/{agent}/{id}")
}

pub struct SessionStore {
    store: ObjectStore,
    index: MetadataIndex,
    db_path: PathBuf,
    idle_after: Duration,
}

impl SessionStore {
    pub fn new(store: ObjectStore, index: MetadataIndex, root: impl AsRef<std::path::Path>, idle_after: Duration) -> Self {
        Self {
            store,
            index,
            db_path: root.as_ref().join("indices").join(schemas::SESSION_DB_NAME),
            idle_after,
        }
    }

    fn init(&self) -> Result<(), PortError> {
        db::with_conn(&self.db_path, |conn| {
            conn.execute(schemas::SESSION_DB_SCHEMA_SESSIONS, [])?;
            conn.execute(schemas::SESSION_DB_INDEX_AGENT, [])?;
            conn.execute(schemas::SESSION_DB_INDEX_DATE, [])?;
            conn.execute(schemas::SESSION_DB_INDEX_STATE, [])?;
            Ok(())
        })
    }

    pub fn create(&self, agent: &str) -> Result<Session, PortError> {
        let now = now_utc();
        let session = Session {
            id: format!("session-{}", new_event_id().to_lowercase()),
            agent: agent.to_string(),
            state: SessionState::Active,
            messages: Vec::new(),
            tags: Vec::new(),
            command_generated: None,
            created_at: now,
            last_activity: now,
        };
        self.persist(&session)?;
        Ok(session)
    }

    /// Loads a session, lazily flipping `Active -> Idle` if the inactivity
    /// threshold has elapsed since `last_activity`.
    pub fn get(&self, id: &str) -> Result<Session, PortError> {
        let mut session = self.load_raw(id)?;
        if session.state == SessionState::Active {
            let elapsed = now_utc().signed_duration_since(session.last_activity);
            if elapsed.to_std().unwrap_or(Duration::ZERO) > self.idle_after {
                session.state = SessionState::Idle;
                self.persist(&session)?;
            }
        }
        Ok(session)
    }

    fn load_raw(&self, id: &str) -> Result<Session, PortError> {
        let path = session_path(id);
        let object_id = self
            .index
            .lookup_path(&path)?
            .ok_or_else(|| PortError::NotFound(format!("session {id}")))?;
        let bytes = self.store.read(&object_id)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn add_message(&self, id: &str, role: &str, content: &str) -> Result<Session, PortError> {
        let mut session = self.load_raw(id)?;
        if matches!(session.state, SessionState::Completed | SessionState::Abandoned) {
            return Err(PortError::Session(format!(
                "session {id} is {} and cannot accept new messages",
                session.state.as_str()
            )));
        }
        session.messages.push(Message {
            role: role.to_string(),
            content: content.to_string(),
            timestamp: now_utc(),
        });
        session.tags = extract_tags(&session.messages);
        session.state = SessionState::Active;
        session.last_activity = now_utc();
        self.persist(&session)?;
        Ok(session)
    }

    pub fn complete(&self, id: &str, command_generated: Option<String>) -> Result<Session, PortError> {
        let mut session = self.load_raw(id)?;
        session.state = SessionState::Completed;
        session.command_generated = command_generated;
        session.last_activity = now_utc();
        self.persist(&session)?;
        Ok(session)
    }

    pub fn abandon(&self, id: &str) -> Result<Session, PortError> {
        let mut session = self.load_raw(id)?;
        session.state = SessionState::Abandoned;
        session.last_activity = now_utc();
        self.persist(&session)?;
        Ok(session)
    }

    fn persist(&self, session: &Session) -> Result<(), PortError> {
        self.init()?;
        let sanitized_agent = sanitize_agent(&session.agent);
        let date = session.created_at.format("%Y-%m-%d").to_string();
        let paths = vec![
            session_path(&session.id),
            alias_path(&session.id),
            by_date_path(&date, &session.id),
            by_agent_path(&sanitized_agent, &session.id),
        ];

        let mut meta = Metadata::new("session")
            .with_paths(paths)
            .with_tags(session.tags.clone());
        meta.title = session.id.clone();
        meta.agent = Some(sanitized_agent.clone());
        meta.session = Some(session.id.clone());
        meta.created = session.created_at;
        meta.lifecycle = session.state.lifecycle();

        let bytes = serde_json::to_vec_pretty(session)?;
        self.store.store_with_metadata(&bytes, meta)?;

        db::with_conn(&self.db_path, |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO sessions (id, agent, state, created_at, last_activity, command_generated)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    session.id,
                    sanitized_agent,
                    session.state.as_str(),
                    session.created_at.to_rfc3339(),
                    session.last_activity.to_rfc3339(),
                    session.command_generated,
                ],
            )?;
            Ok(())
        })
    }

    pub fn list_by_state(&self, state: SessionState) -> Result<Vec<String>, PortError> {
        self.init()?;
        db::with_conn(&self.db_path, |conn| {
            let mut stmt = conn.prepare("SELECT id FROM sessions WHERE state = ?1 ORDER BY last_activity DESC")?;
            let ids = stmt
                .query_map([state.as_str()], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(ids)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn new_store(dir: &std::path::Path) -> SessionStore {
        SessionStore::new(
            ObjectStore::new(dir),
            MetadataIndex::new(dir),
            dir,
            Duration::from_secs(1800),
        )
    }

    #[test]
    fn test_sanitize_agent() {
        assert_eq!(sanitize_agent("@Claude Code"), "claude-code");
        assert_eq!(sanitize_agent("team/ops"), "team-ops");
        assert_eq!(sanitize_agent("  Bare  "), "bare");
    }

    #[test]
    fn test_extract_tags_filters_stopwords_and_dedupes() {
        let messages = vec![Message {
            role: "user".to_string(),
            content: "Please fix the git status tool for the team please".to_string(),
            timestamp: now_utc(),
        }];
        let tags = extract_tags(&messages);
        assert!(tags.contains(&"git".to_string()));
        assert!(tags.contains(&"status".to_string()));
        assert!(!tags.contains(&"the".to_string()));
        assert!(!tags.contains(&"please".to_string()));
    }

    #[test]
    fn test_create_then_get_roundtrip() {
        let dir = tempdir().unwrap();
        let store = new_store(dir.path());
        let session = store.create("agent-1").unwrap();
        let loaded = store.get(&session.id).unwrap();
        assert_eq!(loaded.id, session.id);
        assert_eq!(loaded.state, SessionState::Active);
    }

    #[test]
    fn test_add_message_updates_tags_and_activity() {
        let dir = tempdir().unwrap();
        let store = new_store(dir.path());
        let session = store.create("agent-1").unwrap();
        let updated = store.add_message(&session.id, "user", "help me debug the kubernetes deployment").unwrap();
        assert_eq!(updated.messages.len(), 1);
        assert!(updated.tags.contains(&"kubernetes".to_string()));
    }

    #[test]
    fn test_complete_then_reject_new_messages() {
        let dir = tempdir().unwrap();
        let store = new_store(dir.path());
        let session = store.create("agent-1").unwrap();
        store.complete(&session.id, Some("git-status".to_string())).unwrap();
        let err = store.add_message(&session.id, "user", "more").unwrap_err();
        assert!(matches!(err, PortError::Session(_)));
    }

    #[test]
    fn test_idle_transition_on_read() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(
            ObjectStore::new(dir.path()),
            MetadataIndex::new(dir.path()),
            dir.path(),
            Duration::from_millis(1),
        );
        let session = store.create("agent-1").unwrap();
        std::thread::sleep(Duration::from_millis(10));
        let reloaded = store.get(&session.id).unwrap();
        assert_eq!(reloaded.state, SessionState::Idle);
    }

    #[test]
    fn test_completed_session_gets_stable_lifecycle() {
        let dir = tempdir().unwrap();
        let store = new_store(dir.path());
        let session = store.create("agent-1").unwrap();
        store.complete(&session.id, None).unwrap();

        let object_id = store
            .index
            .lookup_path(&session_path(&session.id))
            .unwrap()
            .unwrap();
        let meta = store.store.load_metadata(&object_id).unwrap();
        assert_eq!(meta.lifecycle, crate::core::metadata::Lifecycle::Stable);
    }

    #[test]
    fn test_abandoned_session_gets_archived_lifecycle() {
        let dir = tempdir().unwrap();
        let store = new_store(dir.path());
        let session = store.create("agent-1").unwrap();
        store.abandon(&session.id).unwrap();

        let object_id = store
            .index
            .lookup_path(&session_path(&session.id))
            .unwrap()
            .unwrap();
        let meta = store.store.load_metadata(&object_id).unwrap();
        assert_eq!(meta.lifecycle, crate::core::metadata::Lifecycle::Archived);
    }

    #[test]
    fn test_list_by_state() {
        let dir = tempdir().unwrap();
        let store = new_store(dir.path());
        let a = store.create("agent-1").unwrap();
        store.create("agent-2").unwrap();
        store.complete(&a.id, None).unwrap();
        let completed = store.list_by_state(SessionState::Completed).unwrap();
        assert_eq!(completed, vec![a.id]);
    }
}
