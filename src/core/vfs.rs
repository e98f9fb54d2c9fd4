//! Virtual filesystem overlay: many human-readable paths resolving to one
//! content-addressed object, plus synthetic cross-cutting views computed
//! on the fly from the metadata and relation indices.

use crate::core::error::PortError;
use crate::core::metadata::Metadata;
use crate::core::metadata::MetadataIndex;
use crate::core::relation::{Relation, RelationStore, RelationType};
use crate::core::store::ObjectStore;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Normalizes a VFS path: trims whitespace, collapses repeated `/`, and
/// strips a trailing `/` (except for the root). Rejects paths that do not
/// begin with `/`. This is a pure fixed-point function: `normalize(p)` is
/// idempotent under further normalization.
pub fn normalize_path(path: &str) -> Result<String, PortError> {
    let trimmed = path.trim();
    if !trimmed.starts_with('/') {
        return Err(PortError::Validation(format!(
            "path must begin with '/': {trimmed}"
        )));
    }
    let mut collapsed = String::with_capacity(trimmed.len());
    let mut prev_slash = false;
    for c in trimmed.chars() {
        if c == '/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        collapsed.push(c);
    }
    if collapsed.len() > 1 && collapsed.ends_with('/') {
        collapsed.pop();
    }
    Ok(collapsed)
}

#[derive(Debug, Clone, Serialize)]
pub struct VfsEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub entry_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messages: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

impl VfsEntry {
    fn dir(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entry_type: "directory".to_string(),
            size: None,
            created: None,
            messages: None,
            state: None,
        }
    }

    fn file_from_meta(name: impl Into<String>, meta: &Metadata) -> Self {
        Self {
            name: name.into(),
            entry_type: "file".to_string(),
            size: Some(meta.size),
            created: Some(meta.created),
            messages: None,
            state: None,
        }
    }
}

const ROOT_ENTRIES: &[&str] = &[
    "commands",
    "tools",
    "memory",
    "artifacts",
    "relations",
    "by-date",
    "by-agent",
    "similar",
    "embeddings",
];

/// Composes the object store, metadata index, and relation store into the
/// listing/read/info/search surface the RPC layer calls.
#[derive(Clone)]
pub struct Vfs {
    pub store: ObjectStore,
    pub index: MetadataIndex,
    pub relations: RelationStore,
}

impl Vfs {
    pub fn new(store: ObjectStore, index: MetadataIndex, relations: RelationStore) -> Self {
        Self { store, index, relations }
    }

    pub fn list(&self, path: &str) -> Result<Vec<VfsEntry>, PortError> {
        let path = normalize_path(path)?;
        let segments: Vec<&str> = path.trim_start_matches('/').split('/').filter(|s| !s.is_empty()).collect();

        match segments.as_slice() {
            [] => Ok(ROOT_ENTRIES.iter().map(|n| VfsEntry::dir(*n)).collect()),
            ["commands"] => self.list_object_children("/commands/"),
            ["tools"] => self.list_tools_root(),
            ["tools", "by-name"] => self.list_tool_names(),
            ["tools", "by-name", name] => self.list_tool_detail(name),
            ["tools", "by-transform"] => self.list_transforms(),
            ["tools", "by-transform", transform] => self.list_tools_with_transform(transform),
            ["tools", "transforms"] => self.list_transforms(),
            ["tools", "transforms", transform] => self.list_tools_with_transform(transform),
            ["tools", "spawned-by"] => self.list_spawn_parents(),
            ["tools", "spawned-by", parent] => self.list_spawn_children(parent),
            ["tools", name] => self.list_tool_detail(name),
            ["tools", name, "spawned"] => self.list_spawn_children(name),
            ["tools", name, "parents"] => self.list_tool_parent(name),
            ["memory"] => self.list_memory_root(),
            ["memory", "sessions"] => self.list_memory_sessions(),
            ["memory", "sessions", "by-date"] => self.list_distinct_dates(),
            ["memory", "sessions", "by-date", date] => self.list_ids_by_date(date, "session"),
            ["memory", "sessions", "by-agent"] => self.list_distinct_agents(),
            ["memory", "sessions", "by-agent", agent] => self.list_ids_by_agent(agent),
            ["by-date"] => self.list_distinct_dates(),
            ["by-date", date] => self.list_distinct_types_on_date(date),
            ["by-date", date, object_type] => self.list_ids_by_date(date, object_type),
            ["by-agent"] => self.list_distinct_agents(),
            ["by-agent", agent] => self.list_ids_by_agent(agent),
            ["artifacts"] => self.list_distinct_subtypes(),
            ["artifacts", subtype] => self.list_artifacts_with_subtype(subtype),
            ["relations"] => self.list_relations_root(),
            ["similar", name] => self.list_similar(name),
            _ => self.list_object_children(&format!("{path}/")),
        }
    }

    fn list_object_children(&self, prefix: &str) -> Result<Vec<VfsEntry>, PortError> {
        let names = self.index.list_children(prefix)?;
        let mut entries = Vec::new();
        for name in names {
            let full_path = format!("{prefix}{name}");
            if let Ok(Some(id)) = self.index.lookup_path(&full_path) {
                if let Ok(meta) = self.store.load_metadata(&id) {
                    entries.push(VfsEntry::file_from_meta(name, &meta));
                    continue;
                }
            }
            entries.push(VfsEntry::dir(name));
        }
        Ok(entries)
    }

    fn list_tools_root(&self) -> Result<Vec<VfsEntry>, PortError> {
        let mut entries = vec![
            VfsEntry::dir("by-name"),
            VfsEntry::dir("by-transform"),
            VfsEntry::dir("spawned-by"),
            VfsEntry::dir("transforms"),
        ];
        for relation in self.relations.load_by_type(RelationType::Tool)? {
            entries.push(VfsEntry::dir(relation.name().to_string()));
        }
        Ok(entries)
    }

    fn list_tool_names(&self) -> Result<Vec<VfsEntry>, PortError> {
        Ok(self
            .relations
            .load_by_type(RelationType::Tool)?
            .into_iter()
            .map(|r| VfsEntry::dir(r.name().to_string()))
            .collect())
    }

    fn list_tool_detail(&self, name: &str) -> Result<Vec<VfsEntry>, PortError> {
        match self.relations.find_by_name(name)? {
            Some(_) => Ok(vec![
                VfsEntry::dir("definition"),
                VfsEntry::dir("executable"),
                VfsEntry::dir("spawned"),
                VfsEntry::dir("parents"),
            ]),
            None => Ok(Vec::new()),
        }
    }

    fn list_transforms(&self) -> Result<Vec<VfsEntry>, PortError> {
        let mut transforms = std::collections::BTreeSet::new();
        for relation in self.relations.load_by_type(RelationType::Tool)? {
            transforms.extend(relation.transforms());
        }
        Ok(transforms.into_iter().map(VfsEntry::dir).collect())
    }

    fn list_tools_with_transform(&self, transform: &str) -> Result<Vec<VfsEntry>, PortError> {
        Ok(self
            .relations
            .load_by_type(RelationType::Tool)?
            .into_iter()
            .filter(|r| r.transforms().iter().any(|t| t == transform))
            .map(|r| VfsEntry::dir(r.name().to_string()))
            .collect())
    }

    fn list_spawn_parents(&self) -> Result<Vec<VfsEntry>, PortError> {
        let mut parents = std::collections::BTreeSet::new();
        for relation in self.relations.load_by_type(RelationType::Tool)? {
            if let Some(parent) = relation.parent() {
                parents.insert(parent);
            }
        }
        Ok(parents.into_iter().map(VfsEntry::dir).collect())
    }

    fn list_spawn_children(&self, parent: &str) -> Result<Vec<VfsEntry>, PortError> {
        Ok(self
            .relations
            .load_by_property("parent", parent)?
            .into_iter()
            .map(|r| VfsEntry::dir(r.name().to_string()))
            .collect())
    }

    fn list_tool_parent(&self, name: &str) -> Result<Vec<VfsEntry>, PortError> {
        match self.relations.find_by_name(name)?.and_then(|r| r.parent()) {
            Some(parent) => Ok(vec![VfsEntry::dir(parent)]),
            None => Ok(Vec::new()),
        }
    }

    fn list_memory_root(&self) -> Result<Vec<VfsEntry>, PortError> {
        let mut entries = vec![VfsEntry::dir("sessions")];
        entries.extend(self.sessions_as_entries()?);
        Ok(entries)
    }

    fn list_memory_sessions(&self) -> Result<Vec<VfsEntry>, PortError> {
        let mut entries = vec![VfsEntry::dir("by-date"), VfsEntry::dir("by-agent")];
        entries.extend(self.sessions_as_entries()?);
        Ok(entries)
    }

    fn sessions_as_entries(&self) -> Result<Vec<VfsEntry>, PortError> {
        let mut entries = Vec::new();
        for id in self.index.by_type("session")? {
            if let Ok(meta) = self.store.load_metadata(&id) {
                entries.push(VfsEntry::file_from_meta(id, &meta));
            }
        }
        Ok(entries)
    }

    fn list_distinct_dates(&self) -> Result<Vec<VfsEntry>, PortError> {
        let mut dates = std::collections::BTreeSet::new();
        for id in self.index.all_ids()? {
            if let Ok(meta) = self.store.load_metadata(&id) {
                dates.insert(meta.created.format("%Y-%m-%d").to_string());
            }
        }
        Ok(dates.into_iter().map(VfsEntry::dir).collect())
    }

    fn list_distinct_types_on_date(&self, date: &str) -> Result<Vec<VfsEntry>, PortError> {
        let mut types = std::collections::BTreeSet::new();
        for id in self.index.by_date(date)? {
            if let Ok(meta) = self.store.load_metadata(&id) {
                types.insert(meta.object_type.as_str().to_string());
            }
        }
        Ok(types.into_iter().map(VfsEntry::dir).collect())
    }

    fn list_ids_by_date(&self, date: &str, object_type: &str) -> Result<Vec<VfsEntry>, PortError> {
        let mut entries = Vec::new();
        for id in self.index.by_date(date)? {
            if let Ok(meta) = self.store.load_metadata(&id) {
                if meta.object_type.as_str() == object_type {
                    entries.push(VfsEntry::file_from_meta(id, &meta));
                }
            }
        }
        Ok(entries)
    }

    fn list_distinct_agents(&self) -> Result<Vec<VfsEntry>, PortError> {
        let mut agents = std::collections::BTreeSet::new();
        for id in self.index.all_ids()? {
            if let Ok(meta) = self.store.load_metadata(&id) {
                if let Some(agent) = meta.agent {
                    agents.insert(agent);
                }
            }
        }
        Ok(agents.into_iter().map(VfsEntry::dir).collect())
    }

    fn list_ids_by_agent(&self, agent: &str) -> Result<Vec<VfsEntry>, PortError> {
        let mut entries = Vec::new();
        for id in self.index.by_agent(agent)? {
            if let Ok(meta) = self.store.load_metadata(&id) {
                entries.push(VfsEntry::file_from_meta(id, &meta));
            }
        }
        Ok(entries)
    }

    fn list_distinct_subtypes(&self) -> Result<Vec<VfsEntry>, PortError> {
        let mut subtypes = std::collections::BTreeSet::new();
        for id in self.index.by_type("artifact")? {
            if let Ok(meta) = self.store.load_metadata(&id) {
                if let Some(subtype) = meta.subtype {
                    subtypes.insert(subtype);
                }
            }
        }
        Ok(subtypes.into_iter().map(VfsEntry::dir).collect())
    }

    fn list_artifacts_with_subtype(&self, subtype: &str) -> Result<Vec<VfsEntry>, PortError> {
        let mut entries = Vec::new();
        for id in self.index.by_type("artifact")? {
            if let Ok(meta) = self.store.load_metadata(&id) {
                if meta.subtype.as_deref() == Some(subtype) {
                    entries.push(VfsEntry::file_from_meta(meta.title.clone(), &meta));
                }
            }
        }
        Ok(entries)
    }

    fn list_relations_root(&self) -> Result<Vec<VfsEntry>, PortError> {
        Ok(self
            .relations
            .list()?
            .into_iter()
            .map(|r| VfsEntry::dir(r.id))
            .collect())
    }

    /// Relations sharing >=1 transform with `name`, ordered by Jaccard
    /// similarity descending, ties broken by `created_at` descending then by
    /// relation id ascending for total determinism.
    fn list_similar(&self, name: &str) -> Result<Vec<VfsEntry>, PortError> {
        let origin = match self.relations.find_by_name(name)? {
            Some(r) => r,
            None => return Ok(Vec::new()),
        };
        let origin_transforms: std::collections::BTreeSet<String> =
            origin.transforms().into_iter().collect();

        let mut scored: Vec<(f64, Relation)> = Vec::new();
        for relation in self.relations.list()? {
            if relation.id == origin.id {
                continue;
            }
            let candidate_transforms: std::collections::BTreeSet<String> =
                relation.transforms().into_iter().collect();
            let intersection = origin_transforms.intersection(&candidate_transforms).count();
            if intersection == 0 {
                continue;
            }
            let union = origin_transforms.union(&candidate_transforms).count();
            let score = intersection as f64 / union as f64;
            scored.push((score, relation));
        }
        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap()
                .then_with(|| b.1.created_at.cmp(&a.1.created_at))
                .then_with(|| a.1.id.cmp(&b.1.id))
        });
        Ok(scored.into_iter().map(|(_, r)| VfsEntry::dir(r.name().to_string())).collect())
    }

    pub fn read(&self, path: &str) -> Result<Vec<u8>, PortError> {
        let path = normalize_path(path)?;
        if let Some(id) = self.index.lookup_path(&path)? {
            self.touch_accessed(&id)?;
            return self.store.read(&id);
        }
        // alias: /tools/<name>/executable and /tools/<name>/definition
        let segments: Vec<&str> = path.trim_start_matches('/').split('/').filter(|s| !s.is_empty()).collect();
        if let ["tools", name, leaf @ ("executable" | "definition")] = segments.as_slice() {
            if let Some(relation) = self.relations.find_by_name(name)? {
                if *leaf == "definition" {
                    return Ok(serde_json::to_vec_pretty(&relation)?);
                }
                if let Some(object_id) = relation.properties.get("content_hash").and_then(|v| v.as_str()) {
                    self.touch_accessed(object_id)?;
                    return self.store.read(object_id);
                }
            }
        }
        Err(PortError::NotFound(format!("path {path}")))
    }

    pub fn info(&self, path: &str) -> Result<Metadata, PortError> {
        let path = normalize_path(path)?;
        let id = self
            .index
            .lookup_path(&path)?
            .ok_or_else(|| PortError::NotFound(format!("path {path}")))?;
        self.store.load_metadata(&id)
    }

    fn touch_accessed(&self, id: &str) -> Result<(), PortError> {
        if let Ok(mut meta) = self.store.load_metadata(id) {
            meta.accessed = crate::core::time::now_utc();
            let _ = self.store.save_metadata(meta);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_is_fixed_point() {
        let once = normalize_path("/commands//test/").unwrap();
        let twice = normalize_path(&once).unwrap();
        assert_eq!(once, twice);
        assert_eq!(once, "/commands/test");
    }

    #[test]
    fn test_normalize_equivalent_variants() {
        assert_eq!(normalize_path("/commands/").unwrap(), "/commands");
        assert_eq!(normalize_path("/commands").unwrap(), "/commands");
        assert_eq!(normalize_path("//commands").unwrap(), "/commands");
    }

    #[test]
    fn test_normalize_root_stays_root() {
        assert_eq!(normalize_path("/").unwrap(), "/");
    }

    #[test]
    fn test_normalize_rejects_relative_path() {
        assert!(normalize_path("commands").is_err());
    }
}
