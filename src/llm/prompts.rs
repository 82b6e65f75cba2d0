//! Prompt text for the generator, refiner and judge.
//!
//! Every prompt asks for a single JSON object so responses go through
//! [`super::extract_json`].

use std::fmt::Write;

use crate::archive::{Candidate, CandidateConfig};
use crate::collab::GenerationContext;

pub const GENERATOR_SYSTEM: &str = "\
You design sub-agent tools for an autonomous coding agent that fixes GitHub \
issues in Python repositories. The main agent calls a sub-agent like a \
function: it passes arguments, the sub-agent works in a fresh context with no \
shared history, and returns a single text result.

Respond with one JSON object inside a ```json fence, with exactly these keys:
  name               snake_case tool name, 2-64 chars, starting with a letter
  signature          the call form, starting with the name, e.g. \"find_callers <symbol>\"
  docstring          when and why the main agent should call this tool
  arguments          list of {\"name\", \"type\", \"description\", \"required\"}
  system_template    system prompt for the sub-agent
  instance_template  task prompt for the sub-agent; may use {{argument}} placeholders \
plus {{problem_statement}} and {{working_dir}}

Never instruct the sub-agent to use sudo, push to remotes, or delete files \
outside the repository.";

pub const REFINER_SYSTEM: &str = "\
You improve sub-agent tools for an autonomous coding agent. You are shown one \
sub-agent's current configuration and transcripts of the main agent using it \
on a few tasks. Fix anything that made the main agent misuse the tool or made \
the sub-agent's answers less useful: an ambiguous docstring, an unclear \
argument description, or an instance template that omits needed context.

Respond with one JSON object inside a ```json fence:
{\"updates\": {\"docstring\": ..., \"context_description\": ..., \"instance_template\": ...}}
Include only the keys you want to change. Keep every {{placeholder}} that the \
template needs and introduce no new ones.";

pub const JUDGE_SYSTEM: &str = "\
You evaluate whether a sub-agent tool helped an autonomous coding agent on one \
task. You are given the tool's description and the agent's full trajectory \
with its final outcome. Judge the tool's contribution, not the outcome alone: \
a tool can help on a failed task and be useless on a solved one.

Respond with one JSON object inside a ```json fence:
{\"score\": <number between 0 and 1>, \"rationale\": \"<one or two sentences>\"}
0 means the tool was useless or harmful, 1 means it was decisive.";

/// User prompt for minting a new candidate. Includes the exemplar feedback
/// and the full list of existing tools so the model avoids duplicates.
pub fn generation_prompt(context: &GenerationContext) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Design a new sub-agent tool (iteration {}).\n", context.iteration);

    if context.existing.is_empty() {
        out.push_str("No tools exist yet.\n");
        return out;
    }

    if !context.exemplars.is_empty() {
        let _ = writeln!(out, "Complete configs for {} sampled tools:\n", context.exemplars.len());
    }
    for exemplar in &context.exemplars {
        write_config(&mut out, &exemplar.config);
        if exemplar.pull_count > 0 {
            let _ = writeln!(
                out,
                "RESULTS: mean helpfulness {:.2} over {} observations",
                exemplar.mean_reward, exemplar.pull_count
            );
        } else {
            out.push_str("RESULTS: N/A (no observations yet)\n");
        }
        if exemplar.average_tokens > 0.0 {
            let _ = writeln!(
                out,
                "TOKEN USAGE: average {:.0} tokens per use",
                exemplar.average_tokens
            );
        }
        out.push('\n');
    }

    out.push_str("CRITICAL: create a sub-agent DIFFERENT from all existing tools:\n");
    for summary in &context.existing {
        let _ = writeln!(out, "{}: {}", summary.name, summary.docstring);
    }
    out
}

/// User prompt for one warmup refinement round.
pub fn refinement_prompt(candidate: &Candidate, transcripts: &str) -> String {
    let mut out = String::from("=== SUB-AGENT TO IMPROVE ===\n\n");
    write_config(&mut out, &candidate.config);
    out.push_str("\n=== TRAJECTORIES ===\n\n");
    out.push_str(transcripts);
    out
}

/// User prompt for judging one (instance, candidate) pair.
pub fn judge_prompt(candidate: &Candidate, rendered_trajectory: &str) -> String {
    let mut out = String::from("=== TOOL UNDER EVALUATION ===\n\n");
    let _ = writeln!(out, "Tool: {}", candidate.config.name);
    let _ = writeln!(out, "Signature: {}", candidate.config.signature);
    let _ = writeln!(out, "Docstring: {}", candidate.config.docstring);
    out.push_str("\n=== TRAJECTORY ===\n\n");
    out.push_str(rendered_trajectory);
    let _ = write!(
        out,
        "\nHow much did `{}` help in this trajectory?\n",
        candidate.config.name
    );
    out
}

fn write_config(out: &mut String, config: &CandidateConfig) {
    let _ = writeln!(out, "Tool: {}", config.name);
    let _ = writeln!(out, "Signature: {}", config.signature);
    let _ = writeln!(out, "Docstring: {}", config.docstring);
    for arg in &config.arguments {
        let _ = writeln!(
            out,
            "Argument: {} ({}{}) {}",
            arg.name,
            arg.arg_type,
            if arg.required { ", required" } else { "" },
            arg.description
        );
    }
    let _ = writeln!(out, "System template: {}", config.system_template);
    let _ = writeln!(out, "Instance template: {}", config.instance_template);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::CandidateId;
    use crate::archive::tests::sample_config;
    use crate::collab::{CandidateSummary, Exemplar};

    #[test]
    fn empty_archive_prompt_is_short() {
        let ctx = GenerationContext {
            iteration: 1,
            existing: vec![],
            exemplars: vec![],
        };
        let prompt = generation_prompt(&ctx);
        assert!(prompt.contains("No tools exist yet"));
        assert!(!prompt.contains("CRITICAL"));
    }

    #[test]
    fn feedback_lists_exemplars_and_existing_tools() {
        let ctx = GenerationContext {
            iteration: 4,
            existing: vec![
                CandidateSummary {
                    id: CandidateId(1),
                    name: "find_callers".into(),
                    docstring: "Lists call sites".into(),
                },
                CandidateSummary {
                    id: CandidateId(2),
                    name: "run_tests".into(),
                    docstring: "Runs a test file".into(),
                },
            ],
            exemplars: vec![Exemplar {
                id: CandidateId(1),
                config: sample_config("find_callers"),
                pull_count: 8,
                mean_reward: 0.75,
                average_tokens: 1520.0,
            }],
        };
        let prompt = generation_prompt(&ctx);
        assert!(prompt.contains("Signature: find_callers <context>"));
        assert!(prompt.contains("mean helpfulness 0.75 over 8 observations"));
        assert!(prompt.contains("average 1520 tokens"));
        assert!(prompt.contains("run_tests: Runs a test file"));
    }
}
