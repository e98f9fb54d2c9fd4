//! Turns declarative `Tool` relations into physical, executable artifacts.
//!
//! Selection is first-match over a small set of materializer
//! implementations, matching spec's polymorphism note: a capability set
//! `{can_materialize, materialize, dematerialize}` dispatched explicitly
//! rather than through dynamic global state.

use crate::core::ai::AiProvider;
use crate::core::error::PortError;
use crate::core::metadata::Metadata;
use crate::core::relation::{Relation, RelationType};
use crate::core::store::ObjectStore;
use crate::core::time::now_utc;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaterializationStatus {
    Success,
    Failed,
    Pending,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaterializedEntity {
    pub relation_id: String,
    pub physical_path: Option<PathBuf>,
    pub metadata: Option<Metadata>,
    pub status: MaterializationStatus,
    pub created_at: DateTime<Utc>,
}

pub trait Materializer {
    fn can_materialize(&self, relation: &Relation) -> bool;
    fn materialize(&self, relation: &Relation) -> Result<MaterializedEntity, PortError>;
    fn dematerialize(&self, entity: &MaterializedEntity) -> Result<(), PortError>;
}

const BASH_KEYWORDS: &[&str] = &[
    "git", "file", "directory", "filesystem", "pipe", "stream", "filter", "system", "process",
    "service", "commit", "branch", "status",
];
const PYTHON_KEYWORDS: &[&str] = &[
    "json", "xml", "yaml", "data", "analyze", "stats", "calculate", "parse", "validate",
    "transform", "http", "api", "client", "error", "handling", "patterns",
];
const NODE_KEYWORDS: &[&str] = &[
    "web", "server", "rest", "api", "frontend", "ui", "interactive", "dashboard", "real-time",
    "graphql",
];

/// Highest-scoring language wins; ties broken bash > python > node.
pub fn select_language(transforms: &[String]) -> &'static str {
    let lowered: Vec<String> = transforms.iter().map(|t| t.to_lowercase()).collect();
    let score = |keywords: &[&str]| -> usize {
        lowered
            .iter()
            .filter(|t| keywords.contains(&t.as_str()))
            .count()
    };
    let bash_score = score(BASH_KEYWORDS);
    let python_score = score(PYTHON_KEYWORDS);
    let node_score = score(NODE_KEYWORDS);

    if bash_score >= python_score && bash_score >= node_score {
        "bash"
    } else if python_score >= node_score {
        "python"
    } else {
        "node"
    }
}

/// Data-driven transform -> inferred package table.
pub fn infer_dependencies(transforms: &[String]) -> Vec<String> {
    let mut deps = std::collections::BTreeSet::new();
    for transform in transforms {
        let t = transform.to_lowercase();
        if t.contains("git") {
            deps.insert("git".to_string());
        }
        if t.contains("json") {
            deps.insert("jq".to_string());
        }
        if t.contains("rainbow") || t.contains("color") {
            deps.insert("lolcat".to_string());
        }
        if t.contains("banner") || t.contains("ascii") {
            deps.insert("figlet".to_string());
        }
        if t.contains("search") || t.contains("grep") {
            deps.insert("ripgrep".to_string());
        }
    }
    deps.into_iter().collect()
}

fn validate_implementation(implementation: &str, language: &str) -> bool {
    !implementation.trim().is_empty() && matches!(language, "bash" | "python" | "node")
}

/// Materializer for `Tool` relations: requests an implementation from the
/// AI provider, validates it (retrying once with stricter guidance on
/// failure), and writes the executable under `commands_dir`.
pub struct ToolMaterializer<'a> {
    pub store: &'a ObjectStore,
    pub ai: &'a dyn AiProvider,
    pub commands_dir: PathBuf,
}

impl<'a> ToolMaterializer<'a> {
    pub fn new(store: &'a ObjectStore, ai: &'a dyn AiProvider, commands_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            ai,
            commands_dir: commands_dir.into(),
        }
    }
}

impl<'a> Materializer for ToolMaterializer<'a> {
    fn can_materialize(&self, relation: &Relation) -> bool {
        relation.relation_type == RelationType::Tool
    }

    fn materialize(&self, relation: &Relation) -> Result<MaterializedEntity, PortError> {
        let name = relation.name().to_string();
        let transforms = relation.transforms();
        let language = select_language(&transforms);
        let dependencies = infer_dependencies(&transforms);

        let system_prompt = format!(
            "Generate a {language} tool named `{name}` implementing transforms: {}.",
            transforms.join(", ")
        );
        let mut attempt_prompt = system_prompt.clone();
        let mut last_err: Option<PortError> = None;

        for attempt in 0..2 {
            match self.ai.complete(&attempt_prompt, &[]) {
                Ok(completion) => {
                    if let Some(tool_call) = completion.tool_calls.into_iter().next() {
                        if validate_implementation(&tool_call.implementation, &tool_call.language) {
                            return self.write_materialization(relation, &name, &tool_call, &dependencies);
                        }
                        last_err = Some(PortError::Provider(
                            "empty or unsupported implementation".to_string(),
                        ));
                    } else {
                        last_err = Some(PortError::Provider("no tool_call returned".to_string()));
                    }
                }
                Err(e) => last_err = Some(e),
            }
            if attempt == 0 {
                attempt_prompt = format!(
                    "{system_prompt}\nThe previous attempt was invalid. Return a non-empty implementation in bash, python, or node."
                );
                tracing::warn!(tool = %name, "materialization attempt 1 failed, retrying with stricter prompt");
            }
        }

        tracing::warn!(tool = %name, error = ?last_err, "tool materialization failed after retry");
        Ok(MaterializedEntity {
            relation_id: relation.id.clone(),
            physical_path: None,
            metadata: None,
            status: MaterializationStatus::Failed,
            created_at: now_utc(),
        })
    }

    fn dematerialize(&self, entity: &MaterializedEntity) -> Result<(), PortError> {
        if let Some(path) = &entity.physical_path {
            if path.exists() {
                std::fs::remove_file(path)?;
            }
        }
        Ok(())
    }
}

impl<'a> ToolMaterializer<'a> {
    fn write_materialization(
        &self,
        relation: &Relation,
        name: &str,
        tool_call: &crate::core::ai::ToolCall,
        dependencies: &[String],
    ) -> Result<MaterializedEntity, PortError> {
        std::fs::create_dir_all(&self.commands_dir)?;
        let physical_path = self.commands_dir.join(name);
        std::fs::write(&physical_path, &tool_call.implementation)?;
        std::fs::set_permissions(&physical_path, std::fs::Permissions::from_mode(0o755))?;

        let transforms = relation.transforms();
        let mut paths = vec![
            format!("/commands/{name}"),
            format!("/tools/by-name/{name}/executable"),
        ];
        for t in &transforms {
            paths.push(format!("/tools/by-transform/{t}/{name}"));
        }

        let meta = Metadata::new("command")
            .with_paths(paths)
            .with_tags(transforms.clone());
        let content_hash = self
            .store
            .store_with_metadata(tool_call.implementation.as_bytes(), meta.clone())?;
        let loaded = self.store.load_metadata(&content_hash)?;

        tracing::debug!(tool = %name, language = %tool_call.language, dependencies = ?dependencies, "materialized tool");

        Ok(MaterializedEntity {
            relation_id: relation.id.clone(),
            physical_path: Some(physical_path),
            metadata: Some(loaded),
            status: MaterializationStatus::Success,
            created_at: now_utc(),
        })
    }
}
