//! Agent system-prompt assembly: template substitution plus conditional
//! guidance blocks, in the fixed order spec's §4.8 algorithm requires.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuidanceType {
    CreationAgent,
    ExecutionAgent,
}

#[derive(Debug, Clone)]
pub struct AgentProfile {
    pub name: String,
    pub personality: String,
    pub style: String,
    pub guidance_type: GuidanceType,
    pub custom_prompt: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PromptGuidance {
    pub base_template: String,
    pub discovery_and_navigation_guidance: String,
    pub tool_creation_guidance: String,
    pub unified_execution_guidance: String,
    pub artifact_guidance: String,
    pub conversation_context: String,
}

/// Builds the full system prompt for `agent` per spec's 6-step algorithm:
/// template substitution, universal blocks, conditional creation guidance,
/// execution guidance + routing sentence, custom role details, then the
/// list of currently available commands.
pub fn assemble_system_prompt(agent: &AgentProfile, guidance: &PromptGuidance, available_commands: &[String]) -> String {
    let mut prompt = guidance
        .base_template
        .replace("{name}", &agent.name)
        .replace("{personality}", &agent.personality)
        .replace("{style}", &agent.style);

    prompt.push_str("\n\n");
    prompt.push_str(&guidance.discovery_and_navigation_guidance);
    prompt.push_str("\n\n");
    prompt.push_str(&guidance.conversation_context);
    prompt.push_str("\n\n");
    prompt.push_str(&guidance.artifact_guidance);

    if agent.guidance_type == GuidanceType::CreationAgent {
        prompt.push_str("\n\n");
        prompt.push_str(&guidance.tool_creation_guidance);
    }

    prompt.push_str("\n\n");
    prompt.push_str(&guidance.unified_execution_guidance);
    prompt.push('\n');
    prompt.push_str(&routing_sentence(agent.guidance_type));

    if let Some(custom) = &agent.custom_prompt {
        prompt.push_str("\n\n<role_details>\n");
        prompt.push_str(custom);
        prompt.push_str("\n</role_details>");
    }

    prompt.push_str("\n\nCurrently available commands:\n");
    if available_commands.is_empty() {
        prompt.push_str("(none yet)");
    } else {
        for command in available_commands {
            prompt.push_str("- ");
            prompt.push_str(command);
            prompt.push('\n');
        }
    }

    prompt
}

fn routing_sentence(guidance_type: GuidanceType) -> &'static str {
    match guidance_type {
        GuidanceType::CreationAgent => {
            "Route requests that describe a new capability through tool declaration; route everything else through direct execution."
        }
        GuidanceType::ExecutionAgent => {
            "Route every request through direct execution using the commands already available."
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_guidance() -> PromptGuidance {
        PromptGuidance {
            base_template: "You are {name}, {personality}, speaking in a {style} style.".to_string(),
            discovery_and_navigation_guidance: "DISCOVERY".to_string(),
            tool_creation_guidance: "CREATION".to_string(),
            unified_execution_guidance: "EXECUTION".to_string(),
            artifact_guidance: "ARTIFACTS".to_string(),
            conversation_context: "CONTEXT".to_string(),
        }
    }

    #[test]
    fn test_template_substitution() {
        let agent = AgentProfile {
            name: "Glyph".to_string(),
            personality: "curious".to_string(),
            style: "terse".to_string(),
            guidance_type: GuidanceType::ExecutionAgent,
            custom_prompt: None,
        };
        let prompt = assemble_system_prompt(&agent, &sample_guidance(), &[]);
        assert!(prompt.starts_with("You are Glyph, curious, speaking in a terse style."));
    }

    #[test]
    fn test_creation_agent_includes_tool_creation_guidance() {
        let agent = AgentProfile {
            name: "Glyph".to_string(),
            personality: "curious".to_string(),
            style: "terse".to_string(),
            guidance_type: GuidanceType::CreationAgent,
            custom_prompt: None,
        };
        let prompt = assemble_system_prompt(&agent, &sample_guidance(), &[]);
        assert!(prompt.contains("CREATION"));
    }

    #[test]
    fn test_execution_agent_excludes_tool_creation_guidance() {
        let agent = AgentProfile {
            name: "Glyph".to_string(),
            personality: "curious".to_string(),
            style: "terse".to_string(),
            guidance_type: GuidanceType::ExecutionAgent,
            custom_prompt: None,
        };
        let prompt = assemble_system_prompt(&agent, &sample_guidance(), &[]);
        assert!(!prompt.contains("CREATION"));
    }

    #[test]
    fn test_custom_prompt_wrapped_in_role_details() {
        let agent = AgentProfile {
            name: "Glyph".to_string(),
            personality: "curious".to_string(),
            style: "terse".to_string(),
            guidance_type: GuidanceType::ExecutionAgent,
            custom_prompt: Some("Always answer in haiku.".to_string()),
        };
        let prompt = assemble_system_prompt(&agent, &sample_guidance(), &[]);
        assert!(prompt.contains("<role_details>\nAlways answer in haiku.\n</role_details>"));
    }

    #[test]
    fn test_available_commands_listed() {
        let agent = AgentProfile {
            name: "Glyph".to_string(),
            personality: "curious".to_string(),
            style: "terse".to_string(),
            guidance_type: GuidanceType::ExecutionAgent,
            custom_prompt: None,
        };
        let commands = vec!["git-status".to_string(), "log-analyzer".to_string()];
        let prompt = assemble_system_prompt(&agent, &sample_guidance(), &commands);
        assert!(prompt.contains("- git-status"));
        assert!(prompt.contains("- log-analyzer"));
    }
}
