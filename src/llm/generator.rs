use async_trait::async_trait;
use serde::Deserialize;

use super::prompts::{GENERATOR_SYSTEM, generation_prompt};
use super::safety::ContentFilter;
use super::{LlmClient, extract_json};
use crate::archive::{CandidateConfig, ToolArgument};
use crate::collab::{GenerationContext, SubagentGenerator};
use crate::error::GenerationError;

/// Shape of the generator's JSON answer.
#[derive(Debug, Deserialize)]
struct GeneratedTool {
    name: String,
    signature: String,
    docstring: String,
    #[serde(default)]
    arguments: Vec<ToolArgument>,
    system_template: String,
    instance_template: String,
}

pub struct LlmGenerator {
    llm: LlmClient,
    filter: ContentFilter,
}

impl LlmGenerator {
    pub fn new(llm: LlmClient) -> Result<Self, regex::Error> {
        Ok(Self {
            llm,
            filter: ContentFilter::with_defaults()?,
        })
    }
}

#[async_trait]
impl SubagentGenerator for LlmGenerator {
    async fn generate(
        &self,
        context: &GenerationContext,
    ) -> Result<CandidateConfig, GenerationError> {
        let prompt = generation_prompt(context);
        let response = self.llm.complete(GENERATOR_SYSTEM, &prompt).await?;
        tracing::debug!(iteration = context.iteration, response = %response, "Generator response");

        let value = extract_json(&response)?;
        let tool: GeneratedTool = serde_json::from_value(value)
            .map_err(|e| GenerationError::Malformed(format!("unexpected shape: {e}")))?;

        let existing: Vec<&str> = context.existing.iter().map(|c| c.name.as_str()).collect();
        let config = into_config(tool, &existing);

        for text in [&config.docstring, &config.system_template, &config.instance_template] {
            if let Some(reason) = self.filter.check(text) {
                return Err(GenerationError::Unsafe(reason.to_string()));
            }
        }
        Ok(config)
    }
}

/// Normalize the generated tool and rename it if the name is taken. A
/// renamed tool gets its signature rewritten to match.
fn into_config(tool: GeneratedTool, existing: &[&str]) -> CandidateConfig {
    let name = tool.name.trim().to_string();
    let unique = deduplicate_name(&name, existing);
    let signature = tool.signature.trim();
    let signature = match signature.strip_prefix(name.as_str()) {
        Some(rest) if unique != name => format!("{unique}{rest}"),
        _ => signature.to_string(),
    };

    CandidateConfig {
        name: unique,
        signature,
        docstring: tool.docstring.trim().to_string(),
        arguments: tool.arguments,
        system_template: tool.system_template,
        instance_template: tool.instance_template,
    }
}

/// `name`, or `name_01`, `name_02`, ... until unused.
pub fn deduplicate_name(name: &str, existing: &[&str]) -> String {
    if !existing.contains(&name) {
        return name.to_string();
    }
    (1u32..)
        .map(|i| format!("{name}_{i:02}"))
        .find(|candidate| !existing.contains(&candidate.as_str()))
        .unwrap_or_else(|| name.to_string())
}
