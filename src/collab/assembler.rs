//! Pure orchestrator assembly.
//!
//! The orchestrator is a base agent template plus one tool bundle and one
//! sub-agent spec per selected candidate. Selected bundles are placed in
//! front of any bundles the base template already declares.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::OrchestratorAssembler;
use crate::archive::{Candidate, CandidateId, ToolArgument};

/// The tool the orchestrator sees for one candidate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolBundle {
    pub candidate_id: CandidateId,
    pub name: String,
    pub signature: String,
    pub docstring: String,
    pub arguments: Vec<ToolArgument>,
    pub subagent: bool,
}

/// How the sub-agent behind a tool is prompted. Each invocation is a pure
/// call: arguments in, result out, no shared history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubagentSpec {
    pub name: String,
    pub system_template: String,
    pub instance_template: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub settings: Value,
}

/// Orchestrator configuration handed to the executor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunnableAgentConfig {
    pub agent: Value,
    pub tools: Vec<ToolBundle>,
    pub subagents: Vec<SubagentSpec>,
}

impl RunnableAgentConfig {
    /// Candidate ids wired into this orchestrator, in bundle order.
    pub fn candidate_ids(&self) -> Vec<CandidateId> {
        self.tools.iter().map(|t| t.candidate_id).collect()
    }
}

/// Assembles orchestrators from a base agent template.
#[derive(Clone, Debug)]
pub struct BundleAssembler {
    base_agent: Value,
    subagent_settings: Value,
}

impl Default for BundleAssembler {
    fn default() -> Self {
        Self::new(json!({ "tools": { "bundles": [] } }), Value::Null)
    }
}

impl BundleAssembler {
    pub fn new(base_agent: Value, subagent_settings: Value) -> Self {
        Self {
            base_agent,
            subagent_settings,
        }
    }

    /// Load the base template from a JSON file of the form
    /// `{ "agent": {...}, "subagent": {...} }`. Missing keys fall back to defaults.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read agent template {}", path.display()))?;
        let mut value: Value = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse agent template {}", path.display()))?;

        let agent = value
            .get_mut("agent")
            .map(Value::take)
            .unwrap_or_else(|| json!({ "tools": { "bundles": [] } }));
        let settings = value.get_mut("subagent").map(Value::take).unwrap_or(Value::Null);
        Ok(Self::new(agent, settings))
    }
}

impl OrchestratorAssembler for BundleAssembler {
    fn assemble(&self, selected: &[Candidate]) -> RunnableAgentConfig {
        let tools: Vec<ToolBundle> = selected
            .iter()
            .map(|c| ToolBundle {
                candidate_id: c.id,
                name: c.config.name.clone(),
                signature: c.config.signature.clone(),
                docstring: c.config.docstring.clone(),
                arguments: c.config.arguments.clone(),
                subagent: true,
            })
            .collect();

        let subagents = selected
            .iter()
            .map(|c| SubagentSpec {
                name: c.config.name.clone(),
                system_template: c.config.system_template.clone(),
                instance_template: c.config.instance_template.clone(),
                settings: self.subagent_settings.clone(),
            })
            .collect();

        let mut agent = self.base_agent.clone();
        let existing = agent
            .pointer("/tools/bundles")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let mut bundles: Vec<Value> = tools
            .iter()
            .map(|t| json!({ "name": t.name, "candidate_id": t.candidate_id }))
            .collect();
        bundles.extend(existing);

        if !agent.is_object() {
            agent = json!({});
        }
        if !agent["tools"].is_object() {
            agent["tools"] = json!({});
        }
        agent["tools"]["bundles"] = Value::Array(bundles);

        RunnableAgentConfig {
            agent,
            tools,
            subagents,
        }
    }
}
