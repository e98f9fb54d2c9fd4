//! RPC server: accepts local TCP connections and dispatches line-delimited
//! JSON requests to the core subsystems. One thread per connection; no
//! connection pool, no async runtime (matches the reference resolver's own
//! worker-thread-per-call shape rather than introducing a second model).

use crate::core::ai::{AiProvider, StaticAiProvider};
use crate::core::config::Config;
use crate::core::context::ContextCollector;
use crate::core::error::PortError;
use crate::core::materializer::{
    infer_dependencies, select_language, MaterializationStatus, MaterializedEntity, Materializer, ToolMaterializer,
};
use crate::core::metadata::{Metadata, MetadataIndex};
use crate::core::prompt::{self, AgentProfile, GuidanceType, PromptGuidance};
use crate::core::protocol::{Request, RequestType, Response};
use crate::core::reference::{self, Reference};
use crate::core::relation::{Relation, RelationStore, RelationType};
use crate::core::rules::{self, Rule, SpawnOutcome};
use crate::core::search::{self, SearchFilters};
use crate::core::session::SessionStore;
use crate::core::store::ObjectStore;
use crate::core::time::now_utc;
use crate::core::url_cache::UrlArtifactCache;
use crate::core::validate;
use crate::core::vfs::Vfs;
use chrono::DateTime;
use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn str_field<'a>(payload: &'a Value, key: &str) -> Option<&'a str> {
    payload.get(key).and_then(Value::as_str)
}

fn str_vec_field(payload: &Value, key: &str) -> Vec<String> {
    payload
        .get(key)
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

fn require_str<'a>(payload: &'a Value, key: &str) -> Result<&'a str, PortError> {
    str_field(payload, key).ok_or_else(|| PortError::Validation(format!("missing required field: {key}")))
}

/// Composes the object store, relation store, session store, VFS, URL
/// cache, rule engine, and AI provider seam into the single handle the RPC
/// loop dispatches against.
pub struct Server {
    config: Config,
    store: ObjectStore,
    index: MetadataIndex,
    relations: RelationStore,
    sessions: SessionStore,
    vfs: Vfs,
    url_cache: UrlArtifactCache,
    context: ContextCollector,
    ruleset: Vec<Box<dyn Rule>>,
    ai: Box<dyn AiProvider>,
    started_at: Instant,
    request_count: AtomicU64,
    bound_port: AtomicU16,
}

impl Server {
    pub fn new(config: Config) -> Result<Self, PortError> {
        std::fs::create_dir_all(&config.root_dir)?;
        let store = ObjectStore::new(config.root_dir.clone());
        let index = MetadataIndex::new(&config.root_dir);
        let relations = RelationStore::new(&config.root_dir);
        let sessions = SessionStore::new(
            store.clone(),
            index.clone(),
            &config.root_dir,
            Duration::from_secs(config.session_idle_after_secs),
        );
        let vfs = Vfs::new(store.clone(), index.clone(), relations.clone());
        let url_cache = UrlArtifactCache::new(relations.clone(), Duration::from_secs(config.url_cache_ttl_secs));
        Ok(Self {
            store,
            index,
            relations,
            sessions,
            vfs,
            url_cache,
            context: ContextCollector::new(),
            ruleset: rules::default_ruleset(),
            ai: Box::new(StaticAiProvider),
            started_at: Instant::now(),
            request_count: AtomicU64::new(0),
            bound_port: AtomicU16::new(0),
            config,
        })
    }

    /// Binds `tcp_port`, falling back to `fallback_port` once, then accepts
    /// connections until the process is killed.
    pub fn run(self: Arc<Self>) -> Result<(), PortError> {
        let listener = match TcpListener::bind(("127.0.0.1", self.config.tcp_port)) {
            Ok(listener) => listener,
            Err(primary_err) => {
                tracing::warn!(
                    port = self.config.tcp_port,
                    error = %primary_err,
                    "primary port unavailable, falling back"
                );
                TcpListener::bind(("127.0.0.1", self.config.fallback_port))?
            }
        };
        let bound_port = listener.local_addr()?.port();
        self.bound_port.store(bound_port, Ordering::Relaxed);
        tracing::info!(port = bound_port, "port42d listening");

        for incoming in listener.incoming() {
            let stream = match incoming {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to accept connection");
                    continue;
                }
            };
            let server = Arc::clone(&self);
            std::thread::spawn(move || server.handle_connection(stream));
        }
        Ok(())
    }

    fn handle_connection(&self, stream: TcpStream) {
        let peer = stream.peer_addr().map(|a| a.to_string()).unwrap_or_else(|_| "unknown".to_string());
        let mut writer = match stream.try_clone() {
            Ok(w) => w,
            Err(e) => {
                tracing::warn!(peer = %peer, error = %e, "failed to clone connection");
                return;
            }
        };
        let reader = BufReader::new(stream);

        for line in reader.lines() {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    tracing::warn!(peer = %peer, error = %e, "connection read error");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            let (response, should_close) = match serde_json::from_str::<Request>(&line) {
                Ok(request) => {
                    self.request_count.fetch_add(1, Ordering::Relaxed);
                    let is_end = request.request_type == RequestType::End;
                    (self.dispatch(request), is_end)
                }
                Err(e) => (Response::err("unknown", format!("malformed request: {e}")), false),
            };

            if Self::write_response(&mut writer, &response).is_err() || should_close {
                break;
            }
        }
    }

    fn write_response(writer: &mut TcpStream, response: &Response) -> std::io::Result<()> {
        let mut bytes = serde_json::to_vec(response).unwrap_or_default();
        bytes.push(b'\n');
        writer.write_all(&bytes)
    }

    fn dispatch(&self, request: Request) -> Response {
        let id = request.id.clone();
        let result = match request.request_type {
            RequestType::Status => Ok(self.handle_status()),
            RequestType::Possess => self.handle_possess(&request),
            RequestType::DeclareTool => self.handle_declare_tool(&request),
            RequestType::DeclareArtifact => self.handle_declare_artifact(&request),
            RequestType::ListPath => self.handle_list_path(&request),
            RequestType::ReadPath => self.handle_read_path(&request),
            RequestType::StorePath => self.handle_store_path(&request),
            RequestType::UpdatePath => self.handle_update_path(&request),
            RequestType::DeletePath => self.handle_delete_path(&request),
            RequestType::GetMetadata => self.handle_get_metadata(&request),
            RequestType::Search => self.handle_search(&request),
            RequestType::GetContext => Ok(self.handle_get_context(&request)),
            RequestType::CreateMemory => self.handle_create_memory(&request),
            RequestType::End => Ok(json!({ "closed": true })),
        };
        match result {
            Ok(data) => Response::ok(id, data),
            Err(e) => Response::err(id, e.to_string()),
        }
    }

    fn handle_status(&self) -> Value {
        let object_count = self.index.all_ids().map(|ids| ids.len()).unwrap_or(0);
        let relation_count = self.relations.list().map(|r| r.len()).unwrap_or(0);
        let session_count = self.index.by_type("session").map(|ids| ids.len()).unwrap_or(0);
        json!({
            "uptime_secs": self.started_at.elapsed().as_secs(),
            "request_count": self.request_count.load(Ordering::Relaxed),
            "port": self.bound_port.load(Ordering::Relaxed),
            "object_count": object_count,
            "relation_count": relation_count,
            "session_count": session_count,
        })
    }

    fn resolved_references(&self, request: &Request) -> Result<Vec<Reference>, PortError> {
        let prompt = str_field(&request.payload, "prompt");
        validate::validate_request(prompt, &request.references, &self.config)
    }

    fn handle_possess(&self, request: &Request) -> Result<Value, PortError> {
        let references = self.resolved_references(request)?;
        let resolved: Vec<_> = references
            .iter()
            .map(|r| reference::resolve(r, &self.vfs, &self.url_cache, &self.config))
            .collect();
        let ai_context = reference::format_ai_context(&resolved, self.config.ai_context_budget_bytes);

        let is_creation = str_field(&request.payload, "agent_type") != Some("execution");
        let agent = AgentProfile {
            name: str_field(&request.payload, "agent").unwrap_or("@ai-engineer").to_string(),
            personality: "a precise systems engineer".to_string(),
            style: "direct".to_string(),
            guidance_type: if is_creation { GuidanceType::CreationAgent } else { GuidanceType::ExecutionAgent },
            custom_prompt: str_field(&request.payload, "custom_prompt").map(str::to_string),
        };
        let guidance = PromptGuidance {
            base_template: "You are {name}, {personality}, speaking in a {style} style.".to_string(),
            discovery_and_navigation_guidance:
                "Use p42 references to inspect existing tools and memory before declaring new ones.".to_string(),
            tool_creation_guidance:
                "When a request describes a capability that does not exist yet, declare a tool for it.".to_string(),
            unified_execution_guidance:
                "Prefer an existing command over a new one whenever the transforms already match.".to_string(),
            artifact_guidance: "Store generated documents and data as artifacts, not commands.".to_string(),
            conversation_context: ai_context.clone(),
        };
        let available_commands = self
            .relations
            .load_by_type(RelationType::Tool)?
            .into_iter()
            .map(|r| r.name().to_string())
            .collect::<Vec<_>>();
        let system_prompt = prompt::assemble_system_prompt(&agent, &guidance, &available_commands);

        let session_id = str_field(&request.payload, "session_id");
        let messages = match session_id {
            Some(id) => self.sessions.get(id)?.messages,
            None => Vec::new(),
        };

        let completion = self.ai.complete(&system_prompt, &messages)?;

        if let Some(id) = session_id {
            if let Some(content) = str_field(&request.payload, "prompt") {
                self.sessions.add_message(id, "user", content)?;
            }
            self.sessions.add_message(id, "assistant", &completion.text)?;
        }

        Ok(json!({
            "text": completion.text,
            "tool_calls": completion.tool_calls,
            "references_resolved": resolved.iter().filter(|r| r.success).count(),
            "references_failed": resolved.iter().filter(|r| !r.success).count(),
        }))
    }

    fn handle_declare_tool(&self, request: &Request) -> Result<Value, PortError> {
        self.resolved_references(request)?;
        let name = require_str(&request.payload, "name")?;
        let transforms = str_vec_field(&request.payload, "transforms");

        // Re-declaring an existing name updates that relation in place
        // (preserving created_at via RelationStore::save) rather than minting
        // a fresh id, so the prior materialization can be found and torn down.
        let relation = match self.relations.find_by_name(name)? {
            Some(existing) => existing,
            None => Relation::new(RelationType::Tool, name),
        };
        let prior_physical_path = relation
            .properties
            .get("physical_path")
            .and_then(Value::as_str)
            .map(PathBuf::from);
        let relation = relation.with_transforms(transforms.clone());
        let mut saved = self.relations.save(relation)?;

        let materializer = ToolMaterializer::new(&self.store, self.ai.as_ref(), self.config.commands_dir());
        if let Some(physical_path) = prior_physical_path {
            materializer.dematerialize(&MaterializedEntity {
                relation_id: saved.id.clone(),
                physical_path: Some(physical_path),
                metadata: None,
                status: MaterializationStatus::Success,
                created_at: saved.created_at,
            })?;
        }
        let entity = materializer.materialize(&saved)?;

        let mut spawn_outcomes = Vec::new();
        if entity.status == MaterializationStatus::Success {
            let language = select_language(&transforms);
            let dependencies = infer_dependencies(&transforms);
            if let Some(meta) = &entity.metadata {
                saved.properties.insert("content_hash".to_string(), json!(meta.id));
            }
            if let Some(path) = &entity.physical_path {
                saved.properties.insert("physical_path".to_string(), json!(path.to_string_lossy()));
            }
            saved.properties.insert("language".to_string(), json!(language));
            saved.properties.insert("dependencies".to_string(), json!(dependencies));
            saved = self.relations.save(saved)?;

            self.context.record_command(name, now_utc());
            self.context.record_tool_created(name, now_utc());
            spawn_outcomes = rules::fire(&saved, &self.ruleset, &self.relations);
        }

        Ok(json!({
            "relation_id": saved.id,
            "status": format!("{:?}", entity.status).to_lowercase(),
            "physical_path": entity.physical_path.map(|p| p.to_string_lossy().to_string()),
            "spawned": summarize_spawns(&spawn_outcomes),
        }))
    }

    fn handle_declare_artifact(&self, request: &Request) -> Result<Value, PortError> {
        self.resolved_references(request)?;
        let name = require_str(&request.payload, "name")?;
        let content = require_str(&request.payload, "content")?;
        let subtype = str_field(&request.payload, "subtype").unwrap_or("document");

        let paths = vec![format!("/artifacts/{subtype}/{name}")];
        let mut meta = Metadata::new("artifact").with_paths(paths).with_tags(vec![subtype.to_string()]);
        meta.subtype = Some(subtype.to_string());
        let object_id = self.store.store_with_metadata(content.as_bytes(), meta)?;
        let loaded = self.store.load_metadata(&object_id)?;
        self.index.upsert(&loaded)?;

        // Same reuse-by-name rule as `handle_declare_tool`: update the
        // existing relation in place so `created_at` survives a re-declare.
        let mut relation = match self.relations.find_by_name(name)? {
            Some(existing) => existing,
            None => Relation::new(RelationType::Artifact, name),
        };
        relation.properties.insert("content_hash".to_string(), json!(object_id));
        relation.properties.insert("subtype".to_string(), json!(subtype));
        let saved = self.relations.save(relation)?;

        Ok(json!({
            "relation_id": saved.id,
            "object_id": object_id,
            "path": loaded.paths.first().cloned(),
        }))
    }

    fn handle_list_path(&self, request: &Request) -> Result<Value, PortError> {
        let path = require_str(&request.payload, "path")?;
        let entries = self.vfs.list(path)?;
        Ok(json!({ "entries": entries }))
    }

    fn handle_read_path(&self, request: &Request) -> Result<Value, PortError> {
        let path = require_str(&request.payload, "path")?;
        let bytes = self.vfs.read(path)?;
        Ok(json!({ "content": String::from_utf8_lossy(&bytes) }))
    }

    fn handle_store_path(&self, request: &Request) -> Result<Value, PortError> {
        let path = require_str(&request.payload, "path")?;
        let content = require_str(&request.payload, "content")?;
        let object_type = str_field(&request.payload, "object_type").unwrap_or("document");
        let tags = str_vec_field(&request.payload, "tags");

        let meta = Metadata::new(object_type).with_paths(vec![path.to_string()]).with_tags(tags);
        let object_id = self.store.store_with_metadata(content.as_bytes(), meta)?;
        let loaded = self.store.load_metadata(&object_id)?;
        self.index.upsert(&loaded)?;
        Ok(json!({ "object_id": object_id }))
    }

    fn handle_update_path(&self, request: &Request) -> Result<Value, PortError> {
        let path = require_str(&request.payload, "path")?;
        let content = require_str(&request.payload, "content")?;
        let existing = self.vfs.info(path)?;

        let mut meta = Metadata::new(existing.object_type.as_str())
            .with_paths(existing.paths.clone())
            .with_tags(existing.tags.clone());
        meta.subtype = existing.subtype;
        meta.session = existing.session;
        meta.agent = existing.agent;
        let object_id = self.store.store_with_metadata(content.as_bytes(), meta)?;
        let loaded = self.store.load_metadata(&object_id)?;
        self.index.upsert(&loaded)?;
        Ok(json!({ "object_id": object_id }))
    }

    fn handle_delete_path(&self, request: &Request) -> Result<Value, PortError> {
        let path = require_str(&request.payload, "path")?;
        self.index.remove_path(path)?;
        Ok(json!({ "deleted": path }))
    }

    fn handle_get_metadata(&self, request: &Request) -> Result<Value, PortError> {
        let path = require_str(&request.payload, "path")?;
        let meta = self.vfs.info(path)?;
        Ok(serde_json::to_value(meta)?)
    }

    fn handle_search(&self, request: &Request) -> Result<Value, PortError> {
        let payload = &request.payload;
        let parse_date = |key: &str| -> Result<Option<DateTime<chrono::Utc>>, PortError> {
            match str_field(payload, key) {
                Some(raw) => DateTime::parse_from_rfc3339(raw)
                    .map(|dt| Some(dt.with_timezone(&chrono::Utc)))
                    .map_err(|e| PortError::Validation(format!("invalid {key}: {e}"))),
                None => Ok(None),
            }
        };
        let filters = SearchFilters {
            query: str_field(payload, "query").map(str::to_string),
            path_prefix: str_field(payload, "path_prefix").map(str::to_string),
            object_type: str_field(payload, "object_type").map(str::to_string),
            tags: str_vec_field(payload, "tags"),
            agent: str_field(payload, "agent").map(str::to_string),
            after: parse_date("after")?,
            before: parse_date("before")?,
            limit: payload.get("limit").and_then(Value::as_u64).unwrap_or(20) as usize,
        };
        let results = search::search(&self.vfs, &filters)?;
        Ok(json!({ "results": results.iter().map(|r| json!({
            "id": r.id,
            "path": r.path,
            "type": r.object_type,
            "title": r.title,
            "score": r.score,
        })).collect::<Vec<_>>() }))
    }

    fn handle_get_context(&self, request: &Request) -> Value {
        let session_id = str_field(&request.payload, "session_id").map(str::to_string);
        let snapshot = self.context.snapshot(session_id, &[]);
        serde_json::to_value(snapshot).unwrap_or(Value::Null)
    }

    fn handle_create_memory(&self, request: &Request) -> Result<Value, PortError> {
        let action = str_field(&request.payload, "action").unwrap_or("create");
        match action {
            "create" => {
                let agent = require_str(&request.payload, "agent")?;
                let session = self.sessions.create(agent)?;
                Ok(json!({ "session_id": session.id }))
            }
            "add_message" => {
                let id = require_str(&request.payload, "session_id")?;
                let role = str_field(&request.payload, "role").unwrap_or("user");
                let content = require_str(&request.payload, "content")?;
                let session = self.sessions.add_message(id, role, content)?;
                Ok(json!({ "session_id": session.id, "messages": session.messages.len() }))
            }
            "complete" => {
                let id = require_str(&request.payload, "session_id")?;
                let command_generated = str_field(&request.payload, "command_generated").map(str::to_string);
                let session = self.sessions.complete(id, command_generated)?;
                Ok(json!({ "session_id": session.id, "state": "completed" }))
            }
            "abandon" => {
                let id = require_str(&request.payload, "session_id")?;
                let session = self.sessions.abandon(id)?;
                Ok(json!({ "session_id": session.id, "state": "abandoned" }))
            }
            other => Err(PortError::Validation(format!("unknown create_memory action: {other}"))),
        }
    }
}

fn summarize_spawns(outcomes: &[SpawnOutcome]) -> Vec<Value> {
    outcomes
        .iter()
        .map(|o| match o {
            SpawnOutcome::Spawned(id) => json!({ "spawned": id }),
            SpawnOutcome::Failed { rule, reason } => json!({ "failed": rule, "reason": reason }),
            SpawnOutcome::SkippedExists { rule } => json!({ "skipped": rule }),
        })
        .collect()
}
