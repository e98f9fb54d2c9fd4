//! Cross-module integration tests wiring the object store, VFS, relation
//! store, materializer, and rule engine together the way the RPC server
//! does, without going through the TCP layer.

use port42::core::ai::StaticAiProvider;
use port42::core::materializer::{MaterializationStatus, Materializer, ToolMaterializer};
use port42::core::metadata::{Metadata, MetadataIndex};
use port42::core::relation::{Relation, RelationStore, RelationType};
use port42::core::rules::{self, SpawnOutcome};
use port42::core::store::ObjectStore;
use port42::core::url_cache::UrlArtifactCache;
use port42::core::vfs::Vfs;
use std::time::Duration;
use tempfile::tempdir;

fn wired(dir: &std::path::Path) -> (ObjectStore, MetadataIndex, RelationStore, Vfs) {
    let store = ObjectStore::new(dir);
    let index = MetadataIndex::new(dir);
    let relations = RelationStore::new(dir);
    let vfs = Vfs::new(store.clone(), index.clone(), relations.clone());
    (store, index, relations, vfs)
}

#[test]
fn identical_content_dedupes_to_one_object_regardless_of_path() {
    let dir = tempdir().unwrap();
    let (store, index, _relations, _vfs) = wired(dir.path());

    let body = b"#!/bin/bash\necho same\n";
    let a = store
        .store_with_metadata(body, Metadata::new("command").with_paths(vec!["/commands/a".to_string()]))
        .unwrap();
    let meta_a = store.load_metadata(&a).unwrap();
    index.upsert(&meta_a).unwrap();

    let b = store
        .store_with_metadata(body, Metadata::new("command").with_paths(vec!["/commands/b".to_string()]))
        .unwrap();

    assert_eq!(a, b, "identical bytes must hash to the same object id");
    assert!(store.exists(&a));
}

#[test]
fn declaring_a_multi_transform_git_tool_spawns_viewer_docs_and_git_status() {
    let dir = tempdir().unwrap();
    let (store, _index, relations, _vfs) = wired(dir.path());
    let ai = StaticAiProvider;
    let commands_dir = dir.path().join("commands");

    let relation = Relation::new(RelationType::Tool, "git-log-analyzer").with_transforms(vec![
        "git".to_string(),
        "analyze".to_string(),
        "reporting".to_string(),
        "parsing".to_string(),
    ]);
    let saved = relations.save(relation).unwrap();

    let materializer = ToolMaterializer::new(&store, &ai, &commands_dir);
    let entity = materializer.materialize(&saved).unwrap();
    assert_eq!(entity.status, MaterializationStatus::Success);
    assert!(entity.physical_path.unwrap().exists());

    let outcomes = rules::fire(&saved, &rules::default_ruleset(), &relations);
    let spawned_names: Vec<String> = relations
        .load_by_property("parent", saved.name())
        .unwrap()
        .into_iter()
        .map(|r| r.name().to_string())
        .collect();

    assert!(spawned_names.iter().any(|n| n == "git-log-analyzer-viewer"));
    assert!(spawned_names.iter().any(|n| n == "git-log-analyzer-docs"));
    assert!(spawned_names.iter().any(|n| n == "git-status-enhanced"));
    assert!(outcomes.iter().any(|o| matches!(o, SpawnOutcome::Spawned(_))));
}

#[test]
fn auto_spawned_relations_never_trigger_further_spawns() {
    let dir = tempdir().unwrap();
    let (_store, _index, relations, _vfs) = wired(dir.path());

    let origin = Relation::new(RelationType::Tool, "origin").with_transforms(vec!["git".to_string()]);
    let saved_origin = relations.save(origin).unwrap();
    let first_round = rules::fire(&saved_origin, &rules::default_ruleset(), &relations);
    assert!(!first_round.is_empty());

    let spawned = relations
        .load_by_property("parent", "origin")
        .unwrap()
        .into_iter()
        .next()
        .expect("at least one relation spawned from origin");
    assert!(spawned.auto_spawned());

    let second_round = rules::fire(&spawned, &rules::default_ruleset(), &relations);
    assert!(second_round.is_empty(), "auto-spawned relations must not themselves spawn");
}

#[test]
fn firing_the_same_git_tool_twice_only_spawns_the_singleton_once() {
    let dir = tempdir().unwrap();
    let (_store, _index, relations, _vfs) = wired(dir.path());
    let ruleset = rules::default_ruleset();

    let first = Relation::new(RelationType::Tool, "git-helper-one").with_transforms(vec!["git".to_string()]);
    let saved_first = relations.save(first).unwrap();
    rules::fire(&saved_first, &ruleset, &relations);

    let second = Relation::new(RelationType::Tool, "git-helper-two").with_transforms(vec!["commit".to_string()]);
    let saved_second = relations.save(second).unwrap();
    let outcomes = rules::fire(&saved_second, &ruleset, &relations);

    let status_exists = relations.find_by_name("git-status-enhanced").unwrap().is_some();
    assert!(status_exists, "singleton tool must have spawned exactly once across multiple origins");
    assert!(outcomes
        .iter()
        .any(|o| matches!(o, SpawnOutcome::SkippedExists { rule } if rule == "GitToolsRule")));
}

#[test]
fn vfs_list_normalizes_trailing_and_repeated_slashes() {
    let dir = tempdir().unwrap();
    let (_store, _index, _relations, vfs) = wired(dir.path());

    let a = vfs.list("/commands/").unwrap();
    let b = vfs.list("/commands").unwrap();
    let c = vfs.list("//commands").unwrap();
    assert_eq!(a.len(), b.len());
    assert_eq!(b.len(), c.len());
}

#[test]
fn url_cache_returns_a_fresh_hit_for_a_previously_stored_url() {
    let dir = tempdir().unwrap();
    let (_store, _index, relations, _vfs) = wired(dir.path());
    let cache = UrlArtifactCache::new(relations, Duration::from_secs(3600));

    let raw_url = "https://example.com/page?b=1&a=2";
    let normalized = port42::core::url_cache::normalize_url(raw_url).unwrap();
    cache
        .store(raw_url, &normalized, "<html>hello</html>", 200, "text/html")
        .unwrap();

    let hit = cache.get(&normalized).unwrap();
    assert!(hit.is_some());
    let artifact = hit.unwrap();
    assert!(artifact.from_cache);
    assert_eq!(artifact.content, "<html>hello</html>");
}

#[test]
fn url_cache_rejects_oversized_bodies_via_should_cache_policy() {
    let dir = tempdir().unwrap();
    let (_store, _index, relations, _vfs) = wired(dir.path());
    let cache = UrlArtifactCache::new(relations, Duration::from_secs(3600));

    let raw_url = "https://example.com/huge";
    let normalized = port42::core::url_cache::normalize_url(raw_url).unwrap();
    let oversized_body = "x".repeat(60_000);
    let result = cache.store(raw_url, &normalized, &oversized_body, 200, "text/plain");
    assert!(result.is_err());
}
