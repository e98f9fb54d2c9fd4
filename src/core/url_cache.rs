//! URL artifact cache: deterministic ids, TTL-governed freshness, and a
//! `ShouldCache` policy gate. Backed by `URLArtifact` relations so the
//! cached body survives restarts.

use crate::core::error::PortError;
use crate::core::relation::{Relation, RelationStore, RelationType};
use crate::core::time::now_utc;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::RwLock;
use std::time::Duration;
use url::Url;

pub struct CachedArtifact {
    pub content: String,
    pub fetched_at: DateTime<Utc>,
    pub content_type: String,
    pub status_code: u16,
    pub from_cache: bool,
}

/// Normalizes a URL for cache-key purposes: lowercases the host, drops the
/// fragment, and re-encodes query parameters in sorted order.
pub fn normalize_url(raw: &str) -> Result<String, PortError> {
    let mut parsed = Url::parse(raw).map_err(|e| PortError::Validation(format!("invalid url: {e}")))?;
    parsed.set_fragment(None);
    if let Some(host) = parsed.host_str() {
        let lowered = host.to_lowercase();
        let _ = parsed.set_host(Some(&lowered));
    }
    let mut pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();
    if pairs.is_empty() {
        parsed.set_query(None);
    } else {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (k, v) in &pairs {
            serializer.append_pair(k, v);
        }
        parsed.set_query(Some(&serializer.finish()));
    }
    Ok(parsed.to_string())
}

/// `url-artifact-<hex(sha256(normalized_url))[0:16]>`.
pub fn artifact_id(normalized_url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized_url.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("url-artifact-{}", &digest[0..16])
}

/// Rejects caching for oversized, erroring, or streaming responses.
pub fn should_cache(status: u16, content_length: usize, content_type: &str) -> bool {
    status < 400 && content_length <= 50_000 && !content_type.contains("text/event-stream")
}

fn ttl_for(content_type: &str, default_ttl: Duration) -> Duration {
    if content_type.contains("application/json") {
        Duration::from_secs(4 * 60 * 60)
    } else if content_type.contains("text/html") {
        Duration::from_secs(12 * 60 * 60)
    } else {
        default_ttl
    }
}

pub struct UrlArtifactCache {
    relations: RelationStore,
    default_ttl: Duration,
    lock: RwLock<()>,
}

impl UrlArtifactCache {
    pub fn new(relations: RelationStore, default_ttl: Duration) -> Self {
        Self {
            relations,
            default_ttl,
            lock: RwLock::new(()),
        }
    }

    /// Looks up a fresh cached artifact for `normalized_url`. Returns `None`
    /// on a miss or expiry (caller then fetches and calls `store`).
    pub fn get(&self, normalized_url: &str) -> Result<Option<CachedArtifact>, PortError> {
        let _guard = self.lock.read().unwrap_or_else(|e| e.into_inner());
        let id = artifact_id(normalized_url);
        let relation = match self.relations.load(&id) {
            Ok(r) => r,
            Err(_) => return Ok(None),
        };
        let fetched_at = relation
            .properties
            .get("fetched_at")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));
        let content_type = relation
            .properties
            .get("content_type")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let Some(fetched_at) = fetched_at else {
            return Ok(None);
        };
        let ttl = ttl_for(&content_type, self.default_ttl);
        let age = now_utc().signed_duration_since(fetched_at);
        if age.to_std().unwrap_or(Duration::MAX) > ttl {
            return Ok(None);
        }
        let status_code = relation
            .properties
            .get("status_code")
            .and_then(Value::as_u64)
            .unwrap_or(200) as u16;
        let content = relation.content.clone().unwrap_or_default();
        self.touch_access_fire_and_forget(&id);
        Ok(Some(CachedArtifact {
            content,
            fetched_at,
            content_type,
            status_code,
            from_cache: true,
        }))
    }

    /// Stores a freshly fetched body as a `URLArtifact` relation, subject to
    /// the `ShouldCache` policy. Returns `Err(PolicyRejection)` if rejected.
    pub fn store(
        &self,
        raw_url: &str,
        normalized_url: &str,
        content: &str,
        status_code: u16,
        content_type: &str,
    ) -> Result<(), PortError> {
        if !should_cache(status_code, content.len(), content_type) {
            return Err(PortError::PolicyRejection(format!(
                "url artifact not cached: status={status_code} len={} type={content_type}",
                content.len()
            )));
        }
        let _guard = self.lock.write().unwrap_or_else(|e| e.into_inner());
        let id = artifact_id(normalized_url);
        let mut relation = self.relations.load(&id).unwrap_or_else(|_| {
            let mut r = Relation::new(RelationType::URLArtifact, id.clone());
            r.id = id.clone();
            r
        });
        relation.content = Some(content.to_string());
        relation
            .properties
            .insert("source_url".to_string(), Value::String(raw_url.to_string()));
        relation
            .properties
            .insert("fetched_at".to_string(), Value::String(now_utc().to_rfc3339()));
        relation.properties.insert(
            "content_length".to_string(),
            Value::Number(content.len().into()),
        );
        relation.properties.insert(
            "status_code".to_string(),
            Value::Number(status_code.into()),
        );
        relation
            .properties
            .insert("content_type".to_string(), Value::String(content_type.to_string()));
        relation
            .properties
            .entry("access_count")
            .or_insert(Value::Number(0.into()));
        self.relations.save(relation)?;
        Ok(())
    }

    /// Fire-and-forget `last_accessed`/`access_count` bump. Must never block
    /// the caller or surface an error.
    fn touch_access_fire_and_forget(&self, id: &str) {
        let relations = self.relations.clone();
        let id = id.to_string();
        std::thread::spawn(move || {
            if let Ok(mut relation) = relations.load(&id) {
                let count = relation
                    .properties
                    .get("access_count")
                    .and_then(Value::as_u64)
                    .unwrap_or(0);
                relation
                    .properties
                    .insert("access_count".to_string(), Value::Number((count + 1).into()));
                relation.properties.insert(
                    "last_accessed".to_string(),
                    Value::String(now_utc().to_rfc3339()),
                );
                let _ = relations.save(relation);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_normalize_stable_under_fragment_and_query_order() {
        let a = normalize_url("https://example.com/a?b=1&a=2").unwrap();
        let b = normalize_url("https://example.com/a?a=2&b=1#frag").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_artifact_id_stable_for_equivalent_urls() {
        let a = artifact_id(&normalize_url("https://example.com/a?b=1&a=2").unwrap());
        let b = artifact_id(&normalize_url("https://example.com/a?a=2&b=1#frag").unwrap());
        assert_eq!(a, b);
        assert!(a.starts_with("url-artifact-"));
        assert_eq!(a.len(), "url-artifact-".len() + 16);
    }

    #[test]
    fn test_should_cache_rejects_oversized_and_errors() {
        assert!(!should_cache(404, 10, "text/plain"));
        assert!(!should_cache(200, 60_000, "text/plain"));
        assert!(!should_cache(200, 10, "text/event-stream"));
        assert!(should_cache(200, 10, "text/html"));
    }

    #[test]
    fn test_cache_store_then_hit() {
        let dir = tempdir().unwrap();
        let relations = RelationStore::new(dir.path());
        let cache = UrlArtifactCache::new(relations, Duration::from_secs(86_400));

        let raw = "https://example.com/a?b=1&a=2";
        let normalized = normalize_url(raw).unwrap();
        cache.store(raw, &normalized, "hello", 200, "text/plain").unwrap();

        let hit = cache.get(&normalized).unwrap();
        assert!(hit.is_some());
        assert_eq!(hit.unwrap().content, "hello");
    }

    #[test]
    fn test_cache_rejects_oversized_store() {
        let dir = tempdir().unwrap();
        let relations = RelationStore::new(dir.path());
        let cache = UrlArtifactCache::new(relations, Duration::from_secs(86_400));
        let big = "x".repeat(60_000);
        let err = cache
            .store("https://example.com/big", "https://example.com/big", &big, 200, "text/plain")
            .unwrap_err();
        assert!(matches!(err, PortError::PolicyRejection(_)));
    }
}
