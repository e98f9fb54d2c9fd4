//! Request validation: prompt bounds and reference grammar, aggregated
//! into a single error rather than failing fast on the first problem.

use crate::core::config::Config;
use crate::core::error::PortError;
use crate::core::protocol::ReferenceWire;
use crate::core::reference::Reference;

fn validate_prompt(prompt: &str, max_chars: usize) -> Result<(), String> {
    if prompt.chars().count() > max_chars {
        return Err(format!("prompt exceeds {max_chars} characters"));
    }
    Ok(())
}

fn validate_references(raw: &[ReferenceWire]) -> (Vec<Reference>, Vec<String>) {
    let mut parsed = Vec::new();
    let mut errors = Vec::new();
    for wire in raw {
        let encoded = match &wire.context {
            Some(context) => format!("{}:{}:{}", wire.ref_type, wire.target, context),
            None => format!("{}:{}", wire.ref_type, wire.target),
        };
        match Reference::parse(&encoded) {
            Ok(reference) => parsed.push(reference),
            Err(e) => errors.push(e.to_string()),
        }
    }
    (parsed, errors)
}

/// Validates an optional prompt and a reference list together, returning
/// every problem found rather than stopping at the first.
pub fn validate_request(
    prompt: Option<&str>,
    references: &[ReferenceWire],
    config: &Config,
) -> Result<Vec<Reference>, PortError> {
    let mut errors = Vec::new();

    if let Some(prompt) = prompt {
        if let Err(e) = validate_prompt(prompt, config.prompt_max_chars) {
            errors.push(e);
        }
    }

    let (parsed_references, reference_errors) = validate_references(references);
    errors.extend(reference_errors);

    if errors.is_empty() {
        Ok(parsed_references)
    } else {
        Err(PortError::Validation(errors.join("; ")))
    }
}
