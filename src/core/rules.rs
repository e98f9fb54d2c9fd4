//! Condition-action rules that auto-spawn companion tools when a relation
//! is declared. Recursion prevention relies on `auto_spawned`: rules never
//! run against relations that are themselves the product of a rule.

use crate::core::error::PortError;
use crate::core::relation::{Relation, RelationStore, RelationType};

pub enum SpawnOutcome {
    Spawned(String),
    Failed { rule: String, reason: String },
    SkippedExists { rule: String },
}

pub trait Rule: Send + Sync {
    fn name(&self) -> &'static str;
    fn condition(&self, relation: &Relation) -> bool;
    /// Returns the relations to spawn. Called only when `condition` holds.
    fn action(&self, relation: &Relation, relations: &RelationStore) -> Result<Vec<Relation>, PortError>;
}

fn has_any_transform(relation: &Relation, needles: &[&str]) -> bool {
    let transforms = relation.transforms();
    let name = relation.name().to_lowercase();
    let description = relation
        .properties
        .get("description")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_lowercase();
    needles.iter().any(|needle| {
        transforms.iter().any(|t| t.eq_ignore_ascii_case(needle))
            || name.contains(needle)
            || description.contains(needle)
    })
}

pub struct ViewerRule;
impl Rule for ViewerRule {
    fn name(&self) -> &'static str {
        "ViewerRule"
    }
    fn condition(&self, relation: &Relation) -> bool {
        relation.relation_type == RelationType::Tool
            && has_any_transform(relation, &["analysis", "analyze", "metrics", "logs", "reporting"])
    }
    fn action(&self, relation: &Relation, _relations: &RelationStore) -> Result<Vec<Relation>, PortError> {
        let mut transforms = relation.transforms();
        transforms.push("view".to_string());
        transforms.push("display".to_string());
        let child = Relation::new(RelationType::Tool, format!("{}-viewer", relation.name()))
            .with_transforms(transforms)
            .mark_auto_spawned(relation.name());
        Ok(vec![child])
    }
}

pub struct DocumentationRule;
impl Rule for DocumentationRule {
    fn name(&self) -> &'static str {
        "DocumentationRule"
    }
    fn condition(&self, relation: &Relation) -> bool {
        relation.relation_type == RelationType::Tool && relation.transforms().len() > 3
    }
    fn action(&self, relation: &Relation, _relations: &RelationStore) -> Result<Vec<Relation>, PortError> {
        let child = Relation::new(RelationType::Tool, format!("{}-docs", relation.name()))
            .mark_auto_spawned(relation.name());
        Ok(vec![child])
    }
}

pub struct GitToolsRule;
impl Rule for GitToolsRule {
    fn name(&self) -> &'static str {
        "GitToolsRule"
    }
    fn condition(&self, relation: &Relation) -> bool {
        has_any_transform(relation, &["git", "commit", "branch"])
    }
    fn action(&self, relation: &Relation, relations: &RelationStore) -> Result<Vec<Relation>, PortError> {
        spawn_singleton_if_absent(relation, relations, "git-status-enhanced")
    }
}

pub struct TestSuiteRule;
impl Rule for TestSuiteRule {
    fn name(&self) -> &'static str {
        "TestSuiteRule"
    }
    fn condition(&self, relation: &Relation) -> bool {
        has_any_transform(relation, &["test", "spec", "unit"])
    }
    fn action(&self, relation: &Relation, relations: &RelationStore) -> Result<Vec<Relation>, PortError> {
        spawn_singleton_if_absent(relation, relations, "test-runner-enhanced")
    }
}

pub struct DocumentationEmergenceRule;
impl Rule for DocumentationEmergenceRule {
    fn name(&self) -> &'static str {
        "DocumentationEmergenceRule"
    }
    fn condition(&self, relation: &Relation) -> bool {
        has_any_transform(relation, &["docs", "wiki", "readme", "manual", "documentation"])
    }
    fn action(&self, relation: &Relation, relations: &RelationStore) -> Result<Vec<Relation>, PortError> {
        let mut spawned = Vec::new();
        for singleton in ["doc-template-generator", "doc-validator", "doc-site-builder"] {
            if let Some(r) = spawn_singleton_if_absent(relation, relations, singleton)?.into_iter().next() {
                spawned.push(r);
            }
        }
        Ok(spawned)
    }
}

fn spawn_singleton_if_absent(
    origin: &Relation,
    relations: &RelationStore,
    singleton_name: &str,
) -> Result<Vec<Relation>, PortError> {
    if relations.find_by_name(singleton_name)?.is_some() {
        return Ok(Vec::new());
    }
    let child = Relation::new(RelationType::Tool, singleton_name).mark_auto_spawned(origin.name());
    Ok(vec![child])
}

pub fn default_ruleset() -> Vec<Box<dyn Rule>> {
    vec![
        Box::new(ViewerRule),
        Box::new(DocumentationRule),
        Box::new(GitToolsRule),
        Box::new(TestSuiteRule),
        Box::new(DocumentationEmergenceRule),
    ]
}

/// Fires every rule against `origin` in registration order. Spawned
/// relations are saved but never re-trigger the rule set (recursion
/// prevention via `auto_spawned`, checked before any rule runs).
pub fn fire(
    origin: &Relation,
    ruleset: &[Box<dyn Rule>],
    relations: &RelationStore,
) -> Vec<SpawnOutcome> {
    if origin.auto_spawned() {
        return Vec::new();
    }
    let mut outcomes = Vec::new();
    for rule in ruleset {
        if !rule.condition(origin) {
            continue;
        }
        match rule.action(origin, relations) {
            Ok(children) => {
                if children.is_empty() {
                    outcomes.push(SpawnOutcome::SkippedExists { rule: rule.name().to_string() });
                    continue;
                }
                for child in children {
                    let name = child.name().to_string();
                    match relations.save(child) {
                        Ok(saved) => outcomes.push(SpawnOutcome::Spawned(saved.id)),
                        Err(e) => outcomes.push(SpawnOutcome::Failed {
                            rule: rule.name().to_string(),
                            reason: e.to_string(),
                        }),
                    }
                    tracing::debug!(rule = rule.name(), spawned = %name, "rule spawned relation");
                }
            }
            Err(e) => {
                tracing::warn!(rule = rule.name(), error = %e, "rule action failed");
                outcomes.push(SpawnOutcome::Failed {
                    rule: rule.name().to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_auto_spawn_log_analyzer_viewer_only() {
        let dir = tempdir().unwrap();
        let relations = RelationStore::new(dir.path());
        let ruleset = default_ruleset();

        let origin = Relation::new(RelationType::Tool, "log-analyzer").with_transforms(vec![
            "logs".to_string(),
            "analysis".to_string(),
            "parsing".to_string(),
        ]);
        relations.save(origin.clone()).unwrap();

        let outcomes = fire(&origin, &ruleset, &relations);
        let spawned: Vec<_> = outcomes
            .iter()
            .filter_map(|o| match o {
                SpawnOutcome::Spawned(id) => Some(id.clone()),
                _ => None,
            })
            .collect();

        // ViewerRule fires on logs/analysis. DocumentationRule needs more than
        // 3 transforms, so it stays quiet at exactly 3. No other rule matches.
        assert_eq!(spawned.len(), 1);
        let all = relations.list().unwrap();
        let viewer = all.iter().find(|r| r.name() == "log-analyzer-viewer");
        assert!(viewer.is_some());
        assert!(viewer.unwrap().auto_spawned());
        assert_eq!(viewer.unwrap().parent().as_deref(), Some("log-analyzer"));
        assert!(all.iter().all(|r| r.name() != "log-analyzer-docs"));
    }

    #[test]
    fn test_auto_spawned_relations_never_retrigger() {
        let dir = tempdir().unwrap();
        let relations = RelationStore::new(dir.path());
        let ruleset = default_ruleset();

        let spawned_relation = Relation::new(RelationType::Tool, "log-analyzer-viewer")
            .with_transforms(vec!["logs".to_string(), "analysis".to_string(), "view".to_string()])
            .mark_auto_spawned("log-analyzer");

        let outcomes = fire(&spawned_relation, &ruleset, &relations);
        assert!(outcomes.is_empty());
    }

    #[test]
    fn test_git_tools_rule_is_singleton() {
        let dir = tempdir().unwrap();
        let relations = RelationStore::new(dir.path());
        let ruleset: Vec<Box<dyn Rule>> = vec![Box::new(GitToolsRule)];

        let a = Relation::new(RelationType::Tool, "git-a").with_transforms(vec!["git".to_string()]);
        relations.save(a.clone()).unwrap();
        fire(&a, &ruleset, &relations);

        let b = Relation::new(RelationType::Tool, "git-b").with_transforms(vec!["commit".to_string()]);
        relations.save(b.clone()).unwrap();
        let outcomes = fire(&b, &ruleset, &relations);

        assert!(matches!(outcomes[0], SpawnOutcome::SkippedExists { .. }));
        let matches = relations.find_by_name("git-status-enhanced").unwrap();
        assert!(matches.is_some());
    }
}
