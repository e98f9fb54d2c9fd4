//! Seam for the out-of-scope AI provider client.
//!
//! The real provider is injected by the CLI front-end; this module defines
//! the trait boundary and ships a deterministic test double so the crate
//! builds and tests standalone.

use crate::core::error::PortError;
use crate::core::session::Message;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub language: String,
    pub implementation: String,
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AiCompletion {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

/// `complete(system_prompt, messages) -> {text, tool_calls}`, the only
/// interface this crate needs from an AI provider.
pub trait AiProvider: Send + Sync {
    fn complete(&self, system_prompt: &str, messages: &[Message]) -> Result<AiCompletion, PortError>;
}

/// Deterministic test double: returns a canned implementation for the
/// requested language so the materializer's happy path is exercisable
/// without a live network call.
pub struct StaticAiProvider;

/// Reads the `Generate a {language} tool ...` prefix the materializer's
/// prompt always starts with. Falls back to bash if the prompt doesn't
/// match that shape.
fn requested_language(system_prompt: &str) -> &'static str {
    for candidate in ["bash", "python", "node"] {
        if system_prompt.contains(&format!("Generate a {candidate} tool")) {
            return candidate;
        }
    }
    "bash"
}

fn canned_implementation(language: &str) -> String {
    match language {
        "python" => "#!/usr/bin/env python3\nprint(\"generated\")\n".to_string(),
        "node" => "#!/usr/bin/env node\nconsole.log(\"generated\");\n".to_string(),
        _ => "#!/bin/bash\necho \"generated\"\n".to_string(),
    }
}

impl AiProvider for StaticAiProvider {
    fn complete(&self, system_prompt: &str, _messages: &[Message]) -> Result<AiCompletion, PortError> {
        let language = requested_language(system_prompt);
        Ok(AiCompletion {
            text: "generated".to_string(),
            tool_calls: vec![ToolCall {
                name: "generated-tool".to_string(),
                language: language.to_string(),
                implementation: canned_implementation(language),
                dependencies: vec![],
            }],
        })
    }
}

/// Test double that always fails, used to exercise the materializer's
/// retry-once-on-`ProviderError` path.
pub struct FailingAiProvider;

impl AiProvider for FailingAiProvider {
    fn complete(&self, _system_prompt: &str, _messages: &[Message]) -> Result<AiCompletion, PortError> {
        Err(PortError::Provider("no completion produced".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_provider_varies_by_requested_language() {
        let provider = StaticAiProvider;
        let python = provider
            .complete("Generate a python tool named `x` implementing transforms: parse.", &[])
            .unwrap();
        assert_eq!(python.tool_calls[0].language, "python");
        assert!(python.tool_calls[0].implementation.contains("python3"));

        let bash = provider
            .complete("Generate a bash tool named `x` implementing transforms: git.", &[])
            .unwrap();
        assert_eq!(bash.tool_calls[0].language, "bash");
    }
}
