//! Declarative relations: the "intent to exist" records that the
//! materializer and rule engine act on.
//!
//! Relations are stored as JSON files under `relations/` (source of truth)
//! with a derived SQLite index backing `load_by_type`/`load_by_property`.

use crate::core::db;
use crate::core::error::PortError;
use crate::core::schemas;
use crate::core::time::{new_short_id, now_utc};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum RelationType {
    Tool,
    Artifact,
    #[serde(rename = "URLArtifact")]
    URLArtifact,
    Memory,
}

impl RelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::Tool => "Tool",
            RelationType::Artifact => "Artifact",
            RelationType::URLArtifact => "URLArtifact",
            RelationType::Memory => "Memory",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Tool" => Some(RelationType::Tool),
            "Artifact" => Some(RelationType::Artifact),
            "URLArtifact" => Some(RelationType::URLArtifact),
            "Memory" => Some(RelationType::Memory),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    pub id: String,
    #[serde(rename = "type")]
    pub relation_type: RelationType,
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default)]
    pub content: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Relation {
    pub fn new(relation_type: RelationType, name: impl Into<String>) -> Self {
        let now = now_utc();
        let name = name.into();
        let id = format!(
            "relation-{}-{}-{}",
            relation_type.as_str().to_lowercase(),
            slugify(&name),
            new_short_id()
        );
        let mut properties = Map::new();
        properties.insert("name".to_string(), Value::String(name));
        Self {
            id,
            relation_type,
            properties,
            content: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn name(&self) -> &str {
        self.properties
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("")
    }

    pub fn transforms(&self) -> Vec<String> {
        self.properties
            .get("transforms")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .map(|s| s.to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn with_transforms(mut self, transforms: impl IntoIterator<Item = String>) -> Self {
        self.properties.insert(
            "transforms".to_string(),
            Value::Array(transforms.into_iter().map(Value::String).collect()),
        );
        self
    }

    pub fn auto_spawned(&self) -> bool {
        self.properties
            .get("auto_spawned")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn mark_auto_spawned(mut self, parent_id: &str) -> Self {
        self.properties
            .insert("auto_spawned".to_string(), Value::Bool(true));
        self.properties
            .insert("parent".to_string(), Value::String(parent_id.to_string()));
        self
    }

    pub fn parent(&self) -> Option<String> {
        self.properties
            .get("parent")
            .and_then(Value::as_str)
            .map(|s| s.to_string())
    }
}

fn slugify(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect()
}

/// File-backed relation store with a derived SQLite index.
#[derive(Clone)]
pub struct RelationStore {
    relations_dir: PathBuf,
    db_path: PathBuf,
}

impl RelationStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            relations_dir: root.join("relations"),
            db_path: root.join("indices").join(schemas::RELATION_DB_NAME),
        }
    }

    fn init(&self) -> Result<(), PortError> {
        db::with_conn(&self.db_path, |conn| {
            conn.execute(schemas::RELATION_DB_SCHEMA_RELATIONS, [])?;
            conn.execute(schemas::RELATION_DB_SCHEMA_PROPERTIES, [])?;
            conn.execute(schemas::RELATION_DB_INDEX_TYPE, [])?;
            conn.execute(schemas::RELATION_DB_INDEX_NAME, [])?;
            conn.execute(schemas::RELATION_DB_INDEX_PROPERTIES_KEY, [])?;
            conn.execute(schemas::RELATION_DB_INDEX_PROPERTIES_VALUE, [])?;
            Ok(())
        })
    }

    fn file_path(&self, relation: &Relation) -> PathBuf {
        self.relations_dir.join(format!("{}.json", relation.id))
    }

    /// Upsert: if `id` already exists on disk, `created_at` is preserved and
    /// `updated_at` refreshed; otherwise both are set to now.
    pub fn save(&self, mut relation: Relation) -> Result<Relation, PortError> {
        self.init()?;
        if let Ok(existing) = self.load(&relation.id) {
            relation.created_at = existing.created_at;
        }
        relation.updated_at = now_utc();

        fs::create_dir_all(&self.relations_dir)?;
        let path = self.file_path(&relation);
        fs::write(&path, serde_json::to_vec_pretty(&relation)?)?;
        self.index(&relation)?;
        Ok(relation)
    }

    fn index(&self, relation: &Relation) -> Result<(), PortError> {
        db::with_conn(&self.db_path, |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO relations (id, type, name, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    relation.id,
                    relation.relation_type.as_str(),
                    relation.name(),
                    relation.created_at.to_rfc3339(),
                    relation.updated_at.to_rfc3339(),
                ],
            )?;
            conn.execute(
                "DELETE FROM relation_properties WHERE relation_id = ?1",
                [&relation.id],
            )?;
            for (key, value) in &relation.properties {
                let text = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                conn.execute(
                    "INSERT INTO relation_properties (relation_id, key, value) VALUES (?1, ?2, ?3)",
                    rusqlite::params![relation.id, key, text],
                )?;
            }
            Ok(())
        })
    }

    pub fn load(&self, id: &str) -> Result<Relation, PortError> {
        let path = self.relations_dir.join(format!("{id}.json"));
        let bytes = fs::read(&path).map_err(|_| PortError::NotFound(format!("relation {id}")))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn delete(&self, id: &str) -> Result<(), PortError> {
        self.init()?;
        let path = self.relations_dir.join(format!("{id}.json"));
        if path.exists() {
            fs::remove_file(&path)?;
        }
        db::with_conn(&self.db_path, |conn| {
            conn.execute("DELETE FROM relations WHERE id = ?1", [id])?;
            conn.execute("DELETE FROM relation_properties WHERE relation_id = ?1", [id])?;
            Ok(())
        })
    }

    pub fn list(&self) -> Result<Vec<Relation>, PortError> {
        self.init()?;
        let ids: Vec<String> = db::with_conn(&self.db_path, |conn| {
            let mut stmt = conn.prepare("SELECT id FROM relations ORDER BY id")?;
            let ids = stmt
                .query_map([], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(ids)
        })?;
        ids.iter().map(|id| self.load(id)).collect()
    }

    pub fn load_by_type(&self, relation_type: RelationType) -> Result<Vec<Relation>, PortError> {
        self.init()?;
        let ids: Vec<String> = db::with_conn(&self.db_path, |conn| {
            let mut stmt = conn.prepare("SELECT id FROM relations WHERE type = ?1 ORDER BY id")?;
            let ids = stmt
                .query_map([relation_type.as_str()], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(ids)
        })?;
        ids.iter().map(|id| self.load(id)).collect()
    }

    pub fn load_by_property(&self, key: &str, value: &str) -> Result<Vec<Relation>, PortError> {
        self.init()?;
        let ids: Vec<String> = db::with_conn(&self.db_path, |conn| {
            let mut stmt = conn.prepare(
                "SELECT relation_id FROM relation_properties WHERE key = ?1 AND value = ?2",
            )?;
            let ids = stmt
                .query_map(rusqlite::params![key, value], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(ids)
        })?;
        ids.iter().map(|id| self.load(id)).collect()
    }

    pub fn find_by_name(&self, name: &str) -> Result<Option<Relation>, PortError> {
        Ok(self.load_by_property("name", name)?.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_save_is_upsert_preserving_created_at() {
        let dir = tempdir().unwrap();
        let store = RelationStore::new(dir.path());
        let relation = Relation::new(RelationType::Tool, "git-simple");
        let saved = store.save(relation).unwrap();
        let first_created = saved.created_at;

        std::thread::sleep(std::time::Duration::from_millis(5));
        let mut updated = saved.clone();
        updated
            .properties
            .insert("language".to_string(), Value::String("bash".to_string()));
        let saved_again = store.save(updated).unwrap();

        assert_eq!(saved_again.created_at, first_created);
        assert!(saved_again.updated_at >= first_created);
    }

    #[test]
    fn test_load_by_type() {
        let dir = tempdir().unwrap();
        let store = RelationStore::new(dir.path());
        store.save(Relation::new(RelationType::Tool, "a")).unwrap();
        store.save(Relation::new(RelationType::Artifact, "b")).unwrap();
        let tools = store.load_by_type(RelationType::Tool).unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name(), "a");
    }

    #[test]
    fn test_load_by_property() {
        let dir = tempdir().unwrap();
        let store = RelationStore::new(dir.path());
        let relation = Relation::new(RelationType::Tool, "log-analyzer")
            .with_transforms(vec!["logs".to_string(), "analysis".to_string()]);
        store.save(relation).unwrap();
        let found = store.find_by_name("log-analyzer").unwrap();
        assert!(found.is_some());
    }

    #[test]
    fn test_delete() {
        let dir = tempdir().unwrap();
        let store = RelationStore::new(dir.path());
        let saved = store.save(Relation::new(RelationType::Tool, "throwaway")).unwrap();
        store.delete(&saved.id).unwrap();
        assert!(store.load(&saved.id).is_err());
    }
}
