//! Centralized SQL schema definitions for Port 42's derived reverse indices.
//!
//! Every table here is rebuildable from the JSON files under the store
//! root; losing the index loses no data (see `db::rebuild_if_stale`).

// --- Metadata index (reverse indices over metadata/<id>.json) ---
pub const METADATA_DB_NAME: &str = "metadata_index.db";

pub const METADATA_DB_SCHEMA_OBJECTS: &str = "
    CREATE TABLE IF NOT EXISTS objects (
        id TEXT PRIMARY KEY,
        type TEXT NOT NULL,
        subtype TEXT,
        title TEXT NOT NULL DEFAULT '',
        description TEXT NOT NULL DEFAULT '',
        lifecycle TEXT NOT NULL DEFAULT 'draft',
        importance TEXT NOT NULL DEFAULT 'normal',
        created TEXT NOT NULL,
        accessed TEXT NOT NULL,
        modified TEXT NOT NULL,
        session TEXT,
        agent TEXT,
        size INTEGER NOT NULL DEFAULT 0
    )
";

pub const METADATA_DB_SCHEMA_PATHS: &str = "
    CREATE TABLE IF NOT EXISTS paths (
        path TEXT PRIMARY KEY,
        object_id TEXT NOT NULL,
        FOREIGN KEY(object_id) REFERENCES objects(id)
    )
";

pub const METADATA_DB_SCHEMA_TAGS: &str = "
    CREATE TABLE IF NOT EXISTS tags (
        object_id TEXT NOT NULL,
        tag TEXT NOT NULL,
        FOREIGN KEY(object_id) REFERENCES objects(id)
    )
";

pub const METADATA_DB_INDEX_PATHS_OBJECT: &str =
    "CREATE INDEX IF NOT EXISTS idx_paths_object ON paths(object_id)";
pub const METADATA_DB_INDEX_TAGS_OBJECT: &str =
    "CREATE INDEX IF NOT EXISTS idx_tags_object ON tags(object_id)";
pub const METADATA_DB_INDEX_TAGS_TAG: &str =
    "CREATE INDEX IF NOT EXISTS idx_tags_tag ON tags(tag)";
pub const METADATA_DB_INDEX_OBJECTS_TYPE: &str =
    "CREATE INDEX IF NOT EXISTS idx_objects_type ON objects(type)";
pub const METADATA_DB_INDEX_OBJECTS_AGENT: &str =
    "CREATE INDEX IF NOT EXISTS idx_objects_agent ON objects(agent)";
pub const METADATA_DB_INDEX_OBJECTS_SESSION: &str =
    "CREATE INDEX IF NOT EXISTS idx_objects_session ON objects(session)";
pub const METADATA_DB_INDEX_OBJECTS_CREATED: &str =
    "CREATE INDEX IF NOT EXISTS idx_objects_created ON objects(created)";

// --- Relation index (reverse indices over relations/*.json) ---
pub const RELATION_DB_NAME: &str = "relation_index.db";

pub const RELATION_DB_SCHEMA_RELATIONS: &str = "
    CREATE TABLE IF NOT EXISTS relations (
        id TEXT PRIMARY KEY,
        type TEXT NOT NULL,
        name TEXT NOT NULL DEFAULT '',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
";

pub const RELATION_DB_SCHEMA_PROPERTIES: &str = "
    CREATE TABLE IF NOT EXISTS relation_properties (
        relation_id TEXT NOT NULL,
        key TEXT NOT NULL,
        value TEXT NOT NULL,
        FOREIGN KEY(relation_id) REFERENCES relations(id)
    )
";

pub const RELATION_DB_INDEX_TYPE: &str =
    "CREATE INDEX IF NOT EXISTS idx_relations_type ON relations(type)";
pub const RELATION_DB_INDEX_NAME: &str =
    "CREATE INDEX IF NOT EXISTS idx_relations_name ON relations(name)";
pub const RELATION_DB_INDEX_PROPERTIES_KEY: &str =
    "CREATE INDEX IF NOT EXISTS idx_relation_properties_key ON relation_properties(relation_id, key)";
pub const RELATION_DB_INDEX_PROPERTIES_VALUE: &str =
    "CREATE INDEX IF NOT EXISTS idx_relation_properties_value ON relation_properties(key, value)";

// --- Session index (reverse indices over session objects) ---
pub const SESSION_DB_NAME: &str = "session_index.db";

pub const SESSION_DB_SCHEMA_SESSIONS: &str = "
    CREATE TABLE IF NOT EXISTS sessions (
        id TEXT PRIMARY KEY,
        agent TEXT NOT NULL,
        state TEXT NOT NULL,
        created_at TEXT NOT NULL,
        last_activity TEXT NOT NULL,
        command_generated TEXT
    )
";

pub const SESSION_DB_INDEX_AGENT: &str =
    "CREATE INDEX IF NOT EXISTS idx_sessions_agent ON sessions(agent)";
pub const SESSION_DB_INDEX_DATE: &str =
    "CREATE INDEX IF NOT EXISTS idx_sessions_created ON sessions(created_at)";
pub const SESSION_DB_INDEX_STATE: &str =
    "CREATE INDEX IF NOT EXISTS idx_sessions_state ON sessions(state)";
