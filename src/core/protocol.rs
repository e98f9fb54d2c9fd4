//! Wire protocol: line-delimited JSON request/response envelopes over the
//! local TCP socket.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The fourteen request kinds this daemon answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    Status,
    Possess,
    DeclareTool,
    DeclareArtifact,
    ListPath,
    ReadPath,
    StorePath,
    UpdatePath,
    DeletePath,
    GetMetadata,
    Search,
    GetContext,
    CreateMemory,
    End,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceWire {
    #[serde(rename = "type")]
    pub ref_type: String,
    pub target: String,
    #[serde(default)]
    pub context: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    #[serde(rename = "type")]
    pub request_type: RequestType,
    pub id: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub references: Vec<ReferenceWire>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Response {
    pub id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn ok(id: impl Into<String>, data: Value) -> Self {
        Self { id: id.into(), success: true, data: Some(data), error: None }
    }

    pub fn err(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self { id: id.into(), success: false, data: None, error: Some(error.into()) }
    }
}
