use async_trait::async_trait;
use serde_json::Value;

use super::prompts::{JUDGE_SYSTEM, judge_prompt};
use super::{LlmClient, extract_json};
use crate::archive::Candidate;
use crate::collab::{Judge, Judgement};
use crate::error::JudgeError;
use crate::experiment::Trajectory;
use crate::experiment::render::render_trajectory;

/// Hindsight judge backed by a chat model.
pub struct LlmJudge {
    llm: LlmClient,
}

impl LlmJudge {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Judge for LlmJudge {
    async fn score(
        &self,
        trajectory: &Trajectory,
        resolved: bool,
        candidate: &Candidate,
    ) -> Result<Judgement, JudgeError> {
        let rendered = render_trajectory(trajectory, resolved);
        let prompt = judge_prompt(candidate, &rendered);

        let response = self.llm.complete(JUDGE_SYSTEM, &prompt).await?;
        let value = extract_json(&response)?;
        parse_judgement(&value)
    }
}

/// Read `score` and `rationale` from the judge's JSON. Scores given as
/// numeric strings are accepted; anything outside `[0, 1]` is rejected.
fn parse_judgement(value: &Value) -> Result<Judgement, JudgeError> {
    let score = match value.get("score") {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| JudgeError::Malformed(format!("missing numeric `score` in {value}")))?;

    if !(0.0..=1.0).contains(&score) {
        return Err(JudgeError::OutOfRange(score));
    }

    let rationale = value
        .get("rationale")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();

    Ok(Judgement { score, rationale })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_score_and_rationale() {
        let j = parse_judgement(&json!({"score": 0.8, "rationale": " Found the bug. "})).unwrap();
        assert_eq!(j.score, 0.8);
        assert_eq!(j.rationale, "Found the bug.");
    }

    #[test]
    fn accepts_string_scores_and_missing_rationale() {
        let j = parse_judgement(&json!({"score": "0.25"})).unwrap();
        assert_eq!(j.score, 0.25);
        assert!(j.rationale.is_empty());
    }

    #[test]
    fn rejects_missing_and_out_of_range_scores() {
        assert!(matches!(
            parse_judgement(&json!({"rationale": "n/a"})),
            Err(JudgeError::Malformed(_))
        ));
        assert!(matches!(
            parse_judgement(&json!({"score": 7})),
            Err(JudgeError::OutOfRange(s)) if s == 7.0
        ));
        assert!(matches!(
            parse_judgement(&json!({"score": -0.1})),
            Err(JudgeError::OutOfRange(_))
        ));
    }
}
