//! Deterministic keyword search over metadata, with optional content
//! scanning. No embeddings, no ranking model: a reproducible TF-weighted
//! score so the same query always returns the same order.

use crate::core::error::PortError;
use crate::core::metadata::Metadata;
use crate::core::vfs::Vfs;
use chrono::{DateTime, Utc};
use std::collections::HashSet;

#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub query: Option<String>,
    pub path_prefix: Option<String>,
    pub object_type: Option<String>,
    pub tags: Vec<String>,
    pub agent: Option<String>,
    pub after: Option<DateTime<Utc>>,
    pub before: Option<DateTime<Utc>>,
    pub limit: usize,
}

#[derive(Debug, Clone)]
pub struct SearchResult {
    pub id: String,
    pub path: String,
    pub object_type: String,
    pub title: String,
    pub score: f64,
}

const TITLE_WEIGHT: f64 = 3.0;
const DESCRIPTION_WEIGHT: f64 = 2.0;
const TAG_WEIGHT: f64 = 1.0;
const CONTENT_WEIGHT: f64 = 1.0;
const MAX_CONTENT_SCAN_BYTES: usize = 64 * 1024;

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_lowercase())
        .collect()
}

fn score_metadata(meta: &Metadata, terms: &[String], content_tokens: Option<&HashSet<String>>) -> f64 {
    if terms.is_empty() {
        return 1.0;
    }
    let title_tokens: HashSet<String> = tokenize(&meta.title).into_iter().collect();
    let description_tokens: HashSet<String> = tokenize(&meta.description).into_iter().collect();
    let tag_tokens: HashSet<String> = meta.tags.iter().map(|t| t.to_lowercase()).collect();

    let mut score = 0.0;
    for term in terms {
        if title_tokens.contains(term) {
            score += TITLE_WEIGHT;
        }
        if description_tokens.contains(term) {
            score += DESCRIPTION_WEIGHT;
        }
        if tag_tokens.contains(term) {
            score += TAG_WEIGHT;
        }
        if let Some(tokens) = content_tokens {
            if tokens.contains(term) {
                score += CONTENT_WEIGHT;
            }
        }
    }
    score
}

/// Runs `filters` against every indexed object. Results with a zero score
/// when `query` is set are dropped; with no `query`, every object matching
/// the structural filters scores 1.0 and ordering falls back to recency.
pub fn search(vfs: &Vfs, filters: &SearchFilters) -> Result<Vec<SearchResult>, PortError> {
    let terms: Vec<String> = filters
        .query
        .as_deref()
        .map(tokenize)
        .unwrap_or_default();

    let candidate_ids: Vec<String> = if let Some(object_type) = &filters.object_type {
        vfs.index.by_type(object_type)?
    } else if let Some(tag) = filters.tags.first() {
        vfs.index.by_tag(tag)?
    } else if let Some(agent) = &filters.agent {
        vfs.index.by_agent(agent)?
    } else {
        vfs.index.all_ids()?
    };

    let mut results = Vec::new();
    for id in candidate_ids {
        let Ok(meta) = vfs.store.load_metadata(&id) else {
            continue;
        };
        if let Some(object_type) = &filters.object_type {
            if meta.object_type.as_str() != object_type {
                continue;
            }
        }
        if !filters.tags.is_empty()
            && !filters
                .tags
                .iter()
                .all(|want| meta.tags.iter().any(|t| t.eq_ignore_ascii_case(want)))
        {
            continue;
        }
        if let Some(agent) = &filters.agent {
            if meta.agent.as_deref() != Some(agent.as_str()) {
                continue;
            }
        }
        if let Some(prefix) = &filters.path_prefix {
            if !meta.paths.iter().any(|p| p.starts_with(prefix.as_str())) {
                continue;
            }
        }
        if let Some(after) = filters.after {
            if meta.created < after {
                continue;
            }
        }
        if let Some(before) = filters.before {
            if meta.created > before {
                continue;
            }
        }

        let content_tokens = if terms.is_empty() {
            None
        } else {
            vfs.store.read(&id).ok().map(|bytes| {
                let text = String::from_utf8_lossy(&bytes[..bytes.len().min(MAX_CONTENT_SCAN_BYTES)]);
                tokenize(&text).into_iter().collect::<HashSet<String>>()
            })
        };

        let score = score_metadata(&meta, &terms, content_tokens.as_ref());
        if !terms.is_empty() && score <= 0.0 {
            continue;
        }

        let path = meta.paths.first().cloned().unwrap_or_else(|| format!("/objects/{id}"));
        results.push((
            SearchResult {
                id: id.clone(),
                path,
                object_type: meta.object_type.as_str().to_string(),
                title: meta.title.clone(),
                score,
            },
            meta.modified,
        ));
    }

    results.sort_by(|a, b| {
        b.0.score
            .partial_cmp(&a.0.score)
            .unwrap()
            .then_with(|| b.1.cmp(&a.1))
            .then_with(|| a.0.id.cmp(&b.0.id))
    });

    let mut ranked: Vec<SearchResult> = results.into_iter().map(|(r, _)| r).collect();
    if filters.limit > 0 {
        ranked.truncate(filters.limit);
    }
    Ok(ranked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::metadata::MetadataIndex;
    use crate::core::relation::RelationStore;
    use crate::core::store::ObjectStore;
    use tempfile::tempdir;

    fn sample_vfs(dir: &std::path::Path) -> Vfs {
        Vfs::new(ObjectStore::new(dir), MetadataIndex::new(dir), RelationStore::new(dir))
    }

    fn store_doc(vfs: &Vfs, title: &str, body: &[u8]) -> String {
        let meta = Metadata::new("command").with_paths(vec![format!("/commands/{title}")]);
        let id = vfs.store.store_with_metadata(body, meta).unwrap();
        let mut meta = vfs.store.load_metadata(&id).unwrap();
        meta.title = title.to_string();
        vfs.store.save_metadata(meta.clone()).unwrap();
        vfs.index.upsert(&meta).unwrap();
        id
    }

    #[test]
    fn test_search_scores_title_above_content_only_match() {
        let dir = tempdir().unwrap();
        let vfs = sample_vfs(dir.path());
        let high = store_doc(&vfs, "git-status-enhanced", b"#!/bin/bash\necho status");
        let low = store_doc(&vfs, "unrelated-tool", b"#!/bin/bash\necho git status here");

        let filters = SearchFilters {
            query: Some("git status".to_string()),
            limit: 10,
            ..Default::default()
        };
        let results = search(&vfs, &filters).unwrap();
        assert_eq!(results[0].id, high);
        assert!(results.iter().any(|r| r.id == low));
        assert!(results[0].score > results.iter().find(|r| r.id == low).unwrap().score);
    }

    #[test]
    fn test_search_empty_query_returns_everything_with_score_one() {
        let dir = tempdir().unwrap();
        let vfs = sample_vfs(dir.path());
        store_doc(&vfs, "a", b"x");
        store_doc(&vfs, "b", b"y");
        let results = search(&vfs, &SearchFilters { limit: 10, ..Default::default() }).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.score == 1.0));
    }

    #[test]
    fn test_search_no_match_excludes_result() {
        let dir = tempdir().unwrap();
        let vfs = sample_vfs(dir.path());
        store_doc(&vfs, "alpha", b"nothing interesting");
        let results = search(
            &vfs,
            &SearchFilters { query: Some("zzzznomatch".to_string()), limit: 10, ..Default::default() },
        )
        .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_tokenize_lowercases_and_splits_on_punctuation() {
        assert_eq!(tokenize("Git-Status, enhanced!"), vec!["git", "status", "enhanced"]);
    }
}
