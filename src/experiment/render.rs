//! Plain-text rendering of trajectories for LLM prompts.
//!
//! Long tool results are cut to [`MAX_WORDS`] words and at most
//! [`MAX_STEPS`] steps are shown, with a banner when steps were dropped.

use super::Trajectory;

pub const MAX_WORDS: usize = 180;
pub const MAX_STEPS: usize = 60;

/// Truncate `text` to `max_words` whitespace-separated words.
pub fn truncate_words(text: &str, max_words: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= max_words {
        return text.to_string();
    }
    format!(
        "{} [truncated - {} words total]",
        words[..max_words].join(" "),
        words.len()
    )
}

/// Render a trajectory with its final outcome.
pub fn render_trajectory(trajectory: &Trajectory, resolved: bool) -> String {
    let mut out = String::with_capacity(4096);
    let total = trajectory.steps.len();

    if total > MAX_STEPS {
        out.push_str(&format!(
            "[TRAJECTORY TRUNCATED: showing first {MAX_STEPS} of {total} steps]\n\n"
        ));
    }

    for (i, step) in trajectory.steps.iter().take(MAX_STEPS).enumerate() {
        let args = if step.arguments.is_null() {
            String::new()
        } else {
            step.arguments.to_string()
        };
        out.push_str(&format!("STEP {}: {}({})\n", i + 1, step.tool, args));
        if !step.result.is_empty() {
            out.push_str(&truncate_words(&step.result, MAX_WORDS));
            out.push('\n');
        }
        out.push('\n');
    }

    if let Some(submission) = &trajectory.submission {
        out.push_str("SUBMISSION:\n");
        out.push_str(submission);
        out.push('\n');
    }

    out.push_str(if resolved {
        "OUTCOME: resolved\n"
    } else {
        "OUTCOME: not resolved\n"
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::TrajectoryStep;

    fn step(tool: &str, result: &str) -> TrajectoryStep {
        TrajectoryStep {
            tool: tool.to_string(),
            candidate_id: None,
            arguments: serde_json::json!({ "context": "look at utils.py" }),
            result: result.to_string(),
            tokens: None,
        }
    }

    #[test]
    fn short_text_is_untouched() {
        assert_eq!(truncate_words("a b c", 5), "a b c");
    }

    #[test]
    fn long_text_is_truncated_with_note() {
        let text = (0..200).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        let cut = truncate_words(&text, 10);
        assert!(cut.starts_with("w0 w1"));
        assert!(cut.contains("[truncated - 200 words total]"));
        assert!(!cut.contains("w10 "));
    }

    #[test]
    fn renders_steps_submission_and_outcome() {
        let traj = Trajectory {
            steps: vec![step("locate_bug", "Found it in utils.py"), step("bash", "")],
            submission: Some("diff --git a/x b/x".into()),
        };
        let text = render_trajectory(&traj, true);

        assert!(text.contains("STEP 1: locate_bug("));
        assert!(text.contains("Found it in utils.py"));
        assert!(text.contains("STEP 2: bash"));
        assert!(text.contains("SUBMISSION:\ndiff --git"));
        assert!(text.ends_with("OUTCOME: resolved\n"));
    }

    #[test]
    fn caps_number_of_steps() {
        let traj = Trajectory {
            steps: (0..MAX_STEPS + 5).map(|_| step("bash", "ok")).collect(),
            submission: None,
        };
        let text = render_trajectory(&traj, false);
        assert!(text.starts_with("[TRAJECTORY TRUNCATED"));
        assert!(text.contains(&format!("STEP {MAX_STEPS}:")));
        assert!(!text.contains(&format!("STEP {}:", MAX_STEPS + 1)));
        assert!(text.ends_with("OUTCOME: not resolved\n"));
    }
}
