//! Metadata sidecar record and its derived SQLite reverse index.
//!
//! The JSON sidecars under `metadata/<id>.json` are the source of truth.
//! `MetadataIndex` is a rebuildable cache over them that answers the
//! by-tag/by-agent/by-date/by-session/by-type lookups the VFS needs without
//! scanning every sidecar on every request.

use crate::core::db;
use crate::core::error::PortError;
use crate::core::schemas;
use crate::core::store::{ObjectId, ObjectStore};
use crate::core::time::now_utc;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectType {
    Command,
    Session,
    Artifact,
    Document,
    Relation,
}

impl ObjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Command => "command",
            ObjectType::Session => "session",
            ObjectType::Artifact => "artifact",
            ObjectType::Document => "document",
            ObjectType::Relation => "relation",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    Draft,
    Active,
    Stable,
    Archived,
    Deprecated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Importance {
    Low,
    Normal,
    High,
}

/// Sidecar metadata record keyed by `ObjectId`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub id: ObjectId,
    #[serde(rename = "type")]
    pub object_type: ObjectType,
    pub subtype: Option<String>,
    pub title: String,
    pub description: String,
    pub paths: Vec<String>,
    pub tags: Vec<String>,
    pub lifecycle: Lifecycle,
    pub importance: Importance,
    pub created: DateTime<Utc>,
    pub accessed: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    pub session: Option<String>,
    pub agent: Option<String>,
    pub size: u64,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl Metadata {
    pub fn new(object_type_name: impl AsRef<str>) -> Self {
        let object_type = match object_type_name.as_ref() {
            "session" => ObjectType::Session,
            "artifact" => ObjectType::Artifact,
            "document" => ObjectType::Document,
            "relation" => ObjectType::Relation,
            _ => ObjectType::Command,
        };
        let now = now_utc();
        Self {
            id: String::new(),
            object_type,
            subtype: None,
            title: String::new(),
            description: String::new(),
            paths: Vec::new(),
            tags: Vec::new(),
            lifecycle: Lifecycle::Draft,
            importance: Importance::Normal,
            created: now,
            accessed: now,
            modified: now,
            session: None,
            agent: None,
            size: 0,
            attributes: Map::new(),
        }
    }

    pub fn with_paths(mut self, paths: impl IntoIterator<Item = String>) -> Self {
        let mut seen = std::collections::BTreeSet::new();
        let mut ordered = Vec::new();
        for p in paths {
            if seen.insert(p.clone()) {
                ordered.push(p);
            }
        }
        self.paths = ordered;
        self
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = String>) -> Self {
        self.tags = tags.into_iter().collect();
        self
    }
}

/// Derived SQLite reverse index over `MetadataIndex`-visible fields.
#[derive(Clone)]
pub struct MetadataIndex {
    db_path: PathBuf,
}

impl MetadataIndex {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            db_path: root.as_ref().join("indices").join(schemas::METADATA_DB_NAME),
        }
    }

    fn init(&self) -> Result<(), PortError> {
        db::with_conn(&self.db_path, |conn| {
            conn.execute(schemas::METADATA_DB_SCHEMA_OBJECTS, [])?;
            conn.execute(schemas::METADATA_DB_SCHEMA_PATHS, [])?;
            conn.execute(schemas::METADATA_DB_SCHEMA_TAGS, [])?;
            conn.execute(schemas::METADATA_DB_INDEX_PATHS_OBJECT, [])?;
            conn.execute(schemas::METADATA_DB_INDEX_TAGS_OBJECT, [])?;
            conn.execute(schemas::METADATA_DB_INDEX_TAGS_TAG, [])?;
            conn.execute(schemas::METADATA_DB_INDEX_OBJECTS_TYPE, [])?;
            conn.execute(schemas::METADATA_DB_INDEX_OBJECTS_AGENT, [])?;
            conn.execute(schemas::METADATA_DB_INDEX_OBJECTS_SESSION, [])?;
            conn.execute(schemas::METADATA_DB_INDEX_OBJECTS_CREATED, [])?;
            Ok(())
        })
    }

    /// Rebuild the index from scratch by scanning every metadata sidecar in
    /// `store`. Safe to call whenever the index file is missing or stale.
    pub fn rebuild(&self, store: &ObjectStore) -> Result<(), PortError> {
        self.init()?;
        db::with_conn(&self.db_path, |conn| {
            conn.execute("DELETE FROM objects", [])?;
            conn.execute("DELETE FROM paths", [])?;
            conn.execute("DELETE FROM tags", [])?;
            for id in store.list()? {
                if let Ok(meta) = store.load_metadata(&id) {
                    insert_meta(conn, &meta)?;
                }
            }
            Ok(())
        })
    }

    pub fn upsert(&self, meta: &Metadata) -> Result<(), PortError> {
        self.init()?;
        db::with_conn(&self.db_path, |conn| {
            conn.execute("DELETE FROM paths WHERE object_id = ?1", [&meta.id])?;
            conn.execute("DELETE FROM tags WHERE object_id = ?1", [&meta.id])?;
            insert_meta(conn, meta)
        })
    }

    pub fn remove(&self, id: &str) -> Result<(), PortError> {
        db::with_conn(&self.db_path, |conn| {
            conn.execute("DELETE FROM objects WHERE id = ?1", [id])?;
            conn.execute("DELETE FROM paths WHERE object_id = ?1", [id])?;
            conn.execute("DELETE FROM tags WHERE object_id = ?1", [id])?;
            Ok(())
        })
    }

    /// Removes a single virtual path mapping without touching the object
    /// or its other paths (`DeletePath` unmaps a view; it never deletes
    /// immutable content).
    pub fn remove_path(&self, path: &str) -> Result<(), PortError> {
        db::with_conn(&self.db_path, |conn| {
            conn.execute("DELETE FROM paths WHERE path = ?1", [path])?;
            Ok(())
        })
    }

    pub fn lookup_path(&self, path: &str) -> Result<Option<ObjectId>, PortError> {
        db::with_conn(&self.db_path, |conn| {
            let mut stmt = conn.prepare("SELECT object_id FROM paths WHERE path = ?1")?;
            let mut rows = stmt.query([path])?;
            if let Some(row) = rows.next()? {
                Ok(Some(row.get(0)?))
            } else {
                Ok(None)
            }
        })
    }

    /// Paths directly nested one level under `prefix` (prefix must end with `/`).
    pub fn list_children(&self, prefix: &str) -> Result<Vec<String>, PortError> {
        db::with_conn(&self.db_path, |conn| {
            let mut stmt = conn.prepare("SELECT path FROM paths WHERE path LIKE ?1")?;
            let like = format!("{}%", prefix.replace('%', "\\%").replace('_', "\\_"));
            let mut rows = stmt.query([like])?;
            let mut children = std::collections::BTreeSet::new();
            while let Some(row) = rows.next()? {
                let path: String = row.get(0)?;
                let rest = &path[prefix.len()..];
                let first_segment = rest.split('/').next().unwrap_or("");
                if !first_segment.is_empty() {
                    children.insert(first_segment.to_string());
                }
            }
            Ok(children.into_iter().collect())
        })
    }

    pub fn by_tag(&self, tag: &str) -> Result<Vec<ObjectId>, PortError> {
        db::with_conn(&self.db_path, |conn| {
            let mut stmt = conn.prepare("SELECT DISTINCT object_id FROM tags WHERE tag = ?1")?;
            let ids = stmt
                .query_map([tag], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(ids)
        })
    }

    pub fn by_agent(&self, agent: &str) -> Result<Vec<ObjectId>, PortError> {
        self.by_column("agent", agent)
    }

    pub fn by_session(&self, session: &str) -> Result<Vec<ObjectId>, PortError> {
        self.by_column("session", session)
    }

    pub fn by_type(&self, object_type: &str) -> Result<Vec<ObjectId>, PortError> {
        self.by_column("type", object_type)
    }

    /// `date` is `YYYY-MM-DD`; matches objects whose `created` falls on that day.
    pub fn by_date(&self, date: &str) -> Result<Vec<ObjectId>, PortError> {
        db::with_conn(&self.db_path, |conn| {
            let like = format!("{date}%");
            let mut stmt = conn.prepare("SELECT id FROM objects WHERE created LIKE ?1")?;
            let ids = stmt
                .query_map([like], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(ids)
        })
    }

    fn by_column(&self, column: &str, value: &str) -> Result<Vec<ObjectId>, PortError> {
        db::with_conn(&self.db_path, |conn| {
            let sql = format!("SELECT id FROM objects WHERE {column} = ?1");
            let mut stmt = conn.prepare(&sql)?;
            let ids = stmt
                .query_map([value], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(ids)
        })
    }

    pub fn all_ids(&self) -> Result<Vec<ObjectId>, PortError> {
        db::with_conn(&self.db_path, |conn| {
            let mut stmt = conn.prepare("SELECT id FROM objects")?;
            let ids = stmt
                .query_map([], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(ids)
        })
    }
}

fn insert_meta(conn: &rusqlite::Connection, meta: &Metadata) -> Result<(), PortError> {
    conn.execute(
        "INSERT OR REPLACE INTO objects
            (id, type, subtype, title, description, lifecycle, importance, created, accessed, modified, session, agent, size)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        rusqlite::params![
            meta.id,
            meta.object_type.as_str(),
            meta.subtype,
            meta.title,
            meta.description,
            format!("{:?}", meta.lifecycle).to_lowercase(),
            format!("{:?}", meta.importance).to_lowercase(),
            meta.created.to_rfc3339(),
            meta.accessed.to_rfc3339(),
            meta.modified.to_rfc3339(),
            meta.session,
            meta.agent,
            meta.size as i64,
        ],
    )?;
    for path in &meta.paths {
        conn.execute(
            "INSERT OR REPLACE INTO paths (path, object_id) VALUES (?1, ?2)",
            rusqlite::params![path, meta.id],
        )?;
    }
    for tag in &meta.tags {
        conn.execute(
            "INSERT INTO tags (object_id, tag) VALUES (?1, ?2)",
            rusqlite::params![meta.id, tag],
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_meta(id: &str) -> Metadata {
        let mut m = Metadata::new("command")
            .with_paths(vec![format!("/commands/{id}")])
            .with_tags(vec!["git".to_string(), "status".to_string()]);
        m.id = id.to_string();
        m
    }

    #[test]
    fn test_upsert_and_lookup_path() {
        let dir = tempdir().unwrap();
        let index = MetadataIndex::new(dir.path());
        let meta = sample_meta("abc123");
        index.upsert(&meta).unwrap();
        assert_eq!(
            index.lookup_path("/commands/abc123").unwrap(),
            Some("abc123".to_string())
        );
    }

    #[test]
    fn test_by_tag() {
        let dir = tempdir().unwrap();
        let index = MetadataIndex::new(dir.path());
        index.upsert(&sample_meta("abc123")).unwrap();
        let ids = index.by_tag("git").unwrap();
        assert_eq!(ids, vec!["abc123".to_string()]);
    }

    #[test]
    fn test_list_children() {
        let dir = tempdir().unwrap();
        let index = MetadataIndex::new(dir.path());
        index.upsert(&sample_meta("abc123")).unwrap();
        index.upsert(&sample_meta("def456")).unwrap();
        let children = index.list_children("/commands/").unwrap();
        assert_eq!(children, vec!["abc123".to_string(), "def456".to_string()]);
    }

    #[test]
    fn test_remove() {
        let dir = tempdir().unwrap();
        let index = MetadataIndex::new(dir.path());
        index.upsert(&sample_meta("abc123")).unwrap();
        index.remove("abc123").unwrap();
        assert_eq!(index.lookup_path("/commands/abc123").unwrap(), None);
    }

    #[test]
    fn test_remove_path_leaves_object_and_other_paths() {
        let dir = tempdir().unwrap();
        let index = MetadataIndex::new(dir.path());
        let mut meta = sample_meta("abc123");
        meta.paths.push("/artifacts/alias/abc123".to_string());
        index.upsert(&meta).unwrap();

        index.remove_path("/commands/abc123").unwrap();
        assert_eq!(index.lookup_path("/commands/abc123").unwrap(), None);
        assert_eq!(
            index.lookup_path("/artifacts/alias/abc123").unwrap(),
            Some("abc123".to_string())
        );
    }
}
