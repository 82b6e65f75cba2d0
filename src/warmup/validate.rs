//! Structural checks a candidate config must pass before it can be bundled
//! into an orchestrator.

use std::collections::HashSet;

use regex::Regex;

use crate::archive::CandidateConfig;
use crate::error::ValidationError;

/// Placeholders every instance template may use without declaring them.
pub const BUILTIN_PLACEHOLDERS: &[&str] = &["problem_statement", "working_dir"];

pub struct ConfigValidator {
    tool_name: Regex,
    argument_name: Regex,
    placeholder: Regex,
}

impl ConfigValidator {
    /// Compile the validation patterns once.
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            tool_name: Regex::new(r"^[a-z][a-z0-9_]{1,63}$")?,
            argument_name: Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$")?,
            placeholder: Regex::new(r"\{\{\s*([^{}]*?)\s*\}\}")?,
        })
    }

    /// Check schema well-formedness and the consistency between name,
    /// signature, arguments and templates. Returns the first problem found.
    pub fn validate_config(&self, config: &CandidateConfig) -> Result<(), ValidationError> {
        if !self.tool_name.is_match(&config.name) {
            return Err(ValidationError::InvalidName(config.name.clone()));
        }

        for (field, value) in [
            ("signature", &config.signature),
            ("docstring", &config.docstring),
            ("system_template", &config.system_template),
            ("instance_template", &config.instance_template),
        ] {
            if value.trim().is_empty() {
                return Err(ValidationError::EmptyField(field));
            }
        }

        let mut declared = HashSet::new();
        for arg in &config.arguments {
            if !self.argument_name.is_match(&arg.name) {
                return Err(ValidationError::InvalidArgumentName(arg.name.clone()));
            }
            if !declared.insert(arg.name.as_str()) {
                return Err(ValidationError::DuplicateArgument(arg.name.clone()));
            }
        }

        let tokens = identifiers(&config.signature);
        if tokens.first() != Some(&config.name.as_str()) {
            return Err(ValidationError::SignatureName {
                signature: config.signature.clone(),
                name: config.name.clone(),
            });
        }
        if let Some(missing) = config
            .arguments
            .iter()
            .filter(|a| a.required)
            .find(|a| !tokens[1..].contains(&a.name.as_str()))
        {
            return Err(ValidationError::SignatureMissingArgument(missing.name.clone()));
        }

        for caps in self.placeholder.captures_iter(&config.instance_template) {
            let name = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            if !declared.contains(name) && !BUILTIN_PLACEHOLDERS.contains(&name) {
                return Err(ValidationError::UnknownPlaceholder(name.to_string()));
            }
        }

        Ok(())
    }
}

/// Identifier-like tokens of a signature, in order.
fn identifiers(signature: &str) -> Vec<&str> {
    signature
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .collect()
}
