//! Judgment prompts and response parsing.

use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use super::error::JudgeError;
use super::JudgeConfig;
use crate::domain::result::TestOutcome;
use crate::domain::task::Rubric;
use crate::text::{excerpt, truncate_utf8};

/// Output bytes of each test outcome quoted in the prompt.
const TEST_OUTPUT_EXCERPT_BYTES: usize = 600;

pub const SYSTEM_PROMPT: &str = r#"You are a strict but fair reviewer grading the work of an autonomous coding agent against ONE rubric criterion.

Score how well the agent's change satisfies the criterion using this scale:
- 1.0: fully met
- 0.75: mostly met
- 0.5: partially met
- 0.25: minimally met
- 0.0: not met

Intermediate values are allowed. Judge the change itself. Test results, when present, are corroborating evidence only: they may be incomplete or wrong.

Respond with a single JSON object and nothing else:
{"score": <number between 0 and 1>, "reasoning": "<2-4 sentences>", "evidence": ["<file, hunk or test cited>", ...], "suggestions": ["<concrete improvement>", ...]}"#;

/// A repository file quoted in the prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextFile {
    pub path: String,
    pub contents: String,
}

/// Everything a judgment sees besides the rubric itself. Shared by every
/// rubric in a batch.
#[derive(Debug, Clone, Default)]
pub struct JudgeContext {
    pub instructions: String,
    pub diff: String,
    pub test_outcomes: Vec<TestOutcome>,
    pub files: Vec<ContextFile>,
}

impl JudgeContext {
    /// Context with the diff truncated to the configured budget.
    pub fn new(instructions: impl Into<String>, diff: &str, config: &JudgeConfig) -> Self {
        Self {
            instructions: instructions.into(),
            diff: excerpt(diff, config.max_diff_bytes),
            test_outcomes: Vec::new(),
            files: Vec::new(),
        }
    }

    pub fn with_test_outcomes(mut self, outcomes: &[TestOutcome]) -> Self {
        self.test_outcomes = outcomes.to_vec();
        self
    }

    pub fn with_files(mut self, files: Vec<ContextFile>) -> Self {
        self.files = files;
        self
    }
}

/// Read up to `max_context_files` of the changed files from the workspace.
///
/// Paths that resolve outside `root`, directories and unreadable files are
/// skipped.
pub fn collect_context_files(root: &Path, changed: &[String], config: &JudgeConfig) -> Vec<ContextFile> {
    let Ok(canonical_root) = root.canonicalize() else {
        return Vec::new();
    };

    changed
        .iter()
        .filter_map(|rel| {
            let resolved = root.join(rel).canonicalize().ok()?;
            if !resolved.starts_with(&canonical_root) || !resolved.is_file() {
                debug!(path = %rel, "skipping context file");
                return None;
            }
            let bytes = std::fs::read(&resolved).ok()?;
            let text = String::from_utf8_lossy(&bytes);
            Some(ContextFile {
                path: rel.clone(),
                contents: excerpt(&text, config.max_file_bytes),
            })
        })
        .take(config.max_context_files)
        .collect()
}

/// User prompt for one rubric.
pub fn build_user_prompt(ctx: &JudgeContext, rubric: &Rubric) -> String {
    let mut prompt = String::new();

    prompt.push_str("## Task Instructions\n");
    prompt.push_str(ctx.instructions.trim());
    prompt.push_str("\n\n");

    prompt.push_str("## Rubric\n");
    prompt.push_str(&format!("Rubric id: {}\n", rubric.id));
    prompt.push_str(&format!("Criterion: {}\n\n", rubric.criterion.trim()));

    prompt.push_str("## Agent Diff\n");
    if ctx.diff.trim().is_empty() {
        prompt.push_str("(the agent made no changes)\n\n");
    } else {
        prompt.push_str("```diff\n");
        prompt.push_str(ctx.diff.trim_end());
        prompt.push_str("\n```\n\n");
    }

    if !ctx.test_outcomes.is_empty() {
        prompt.push_str("## Test Results (corroborating evidence, not ground truth)\n");
        for outcome in &ctx.test_outcomes {
            let verdict = if outcome.success { "PASS" } else { "FAIL" };
            prompt.push_str(&format!(
                "- {} [{}] (rubric {})\n",
                outcome.path, verdict, outcome.rubric_id
            ));
            let output = truncate_utf8(outcome.output.trim(), TEST_OUTPUT_EXCERPT_BYTES);
            if !output.is_empty() {
                prompt.push_str("```\n");
                prompt.push_str(output);
                prompt.push_str("\n```\n");
            }
        }
        prompt.push('\n');
    }

    if !ctx.files.is_empty() {
        prompt.push_str("## Repository Files\n");
        for file in &ctx.files {
            prompt.push_str(&format!("### {}\n```\n{}\n```\n", file.path, file.contents.trim_end()));
        }
        prompt.push('\n');
    }

    prompt.push_str("Grade the change against the rubric criterion and respond with the JSON object.");
    prompt
}

/// Judgment fields returned by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedJudgment {
    pub score: f64,
    pub reasoning: String,
    pub evidence: Vec<String>,
    pub suggestions: Vec<String>,
}

#[derive(Deserialize)]
struct RawJudgment {
    score: serde_json::Value,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    evidence: Vec<serde_json::Value>,
    #[serde(default)]
    suggestions: Vec<serde_json::Value>,
}

/// Locate the outermost JSON object in a model response, tolerating code
/// fences and surrounding prose.
pub fn extract_json_object(response: &str) -> Option<&str> {
    let start = response.find('{')?;
    let end = response.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&response[start..=end])
}

/// Parse and validate a model response.
pub fn parse_judgment(response: &str) -> Result<ParsedJudgment, JudgeError> {
    let json = extract_json_object(response)
        .ok_or_else(|| JudgeError::MalformedOutput("no JSON object in response".to_string()))?;
    let raw: RawJudgment = serde_json::from_str(json)
        .map_err(|e| JudgeError::MalformedOutput(e.to_string()))?;

    let score = match &raw.score {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| JudgeError::MalformedOutput(format!("score is not a number: {}", raw.score)))?;

    if !score.is_finite() || !(0.0..=1.0).contains(&score) {
        return Err(JudgeError::ScoreOutOfRange(score));
    }

    Ok(ParsedJudgment {
        score,
        reasoning: raw.reasoning.trim().to_string(),
        evidence: stringify_all(raw.evidence),
        suggestions: stringify_all(raw.suggestions),
    })
}

fn stringify_all(values: Vec<serde_json::Value>) -> Vec<String> {
    values
        .into_iter()
        .map(|v| match v {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rubric() -> Rubric {
        Rubric::new("r1", "Parser handles empty input", 1.0)
    }

    #[test]
    fn test_parse_plain_json() {
        let parsed = parse_judgment(
            r#"{"score": 0.75, "reasoning": "mostly", "evidence": ["src/parser.rs"], "suggestions": []}"#,
        )
        .unwrap();
        assert_eq!(parsed.score, 0.75);
        assert_eq!(parsed.reasoning, "mostly");
        assert_eq!(parsed.evidence, vec!["src/parser.rs".to_string()]);
    }

    #[test]
    fn test_parse_fenced_json_with_prose() {
        let response = "Here is my verdict:\n```json\n{\"score\": \"0.5\", \"reasoning\": \"half\"}\n```\nThanks";
        let parsed = parse_judgment(response).unwrap();
        assert_eq!(parsed.score, 0.5);
        assert!(parsed.suggestions.is_empty());
    }

    #[test]
    fn test_parse_rejects_out_of_range() {
        let err = parse_judgment(r#"{"score": 1.5}"#).unwrap_err();
        assert_eq!(err, JudgeError::ScoreOutOfRange(1.5));
        let err = parse_judgment(r#"{"score": -0.1}"#).unwrap_err();
        assert!(matches!(err, JudgeError::ScoreOutOfRange(_)));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            parse_judgment("I cannot grade this."),
            Err(JudgeError::MalformedOutput(_))
        ));
        assert!(matches!(
            parse_judgment(r#"{"score": "high"}"#),
            Err(JudgeError::MalformedOutput(_))
        ));
        assert!(matches!(
            parse_judgment(r#"{"reasoning": "no score"}"#),
            Err(JudgeError::MalformedOutput(_))
        ));
    }

    #[test]
    fn test_user_prompt_sections() {
        let config = JudgeConfig::default();
        let ctx = JudgeContext::new("Fix the parser.", "+fn parse() {}\n", &config)
            .with_test_outcomes(&[TestOutcome::failed("tests/test_a.sh", "r1", "boom".to_string())])
            .with_files(vec![ContextFile {
                path: "src/parser.rs".to_string(),
                contents: "fn parse() {}".to_string(),
            }]);

        let prompt = build_user_prompt(&ctx, &rubric());
        assert!(prompt.contains("Fix the parser."));
        assert!(prompt.contains("Rubric id: r1"));
        assert!(prompt.contains("Criterion: Parser handles empty input"));
        assert!(prompt.contains("```diff\n+fn parse() {}\n```"));
        assert!(prompt.contains("corroborating evidence, not ground truth"));
        assert!(prompt.contains("- tests/test_a.sh [FAIL] (rubric r1)"));
        assert!(prompt.contains("### src/parser.rs"));
    }

    #[test]
    fn test_user_prompt_empty_diff() {
        let ctx = JudgeContext::new("Do it.", "", &JudgeConfig::default());
        let prompt = build_user_prompt(&ctx, &rubric());
        assert!(prompt.contains("(the agent made no changes)"));
        assert!(!prompt.contains("## Test Results"));
    }

    #[test]
    fn test_diff_truncated_to_budget() {
        let config = JudgeConfig {
            max_diff_bytes: 10,
            ..JudgeConfig::default()
        };
        let ctx = JudgeContext::new("x", &"+line\n".repeat(100), &config);
        assert!(ctx.diff.contains("[... truncated"));
    }

    #[test]
    fn test_collect_context_files_stays_in_root() {
        let outer = tempfile::tempdir().unwrap();
        let root = outer.path().join("repo");
        std::fs::create_dir_all(root.join("src")).unwrap();
        std::fs::write(root.join("src/lib.rs"), "pub fn x() {}").unwrap();
        std::fs::write(outer.path().join("secret.txt"), "secret").unwrap();

        let config = JudgeConfig {
            max_context_files: 5,
            ..JudgeConfig::default()
        };
        let changed = vec![
            "../secret.txt".to_string(),
            "missing.rs".to_string(),
            "src".to_string(),
            "src/lib.rs".to_string(),
        ];
        let files = collect_context_files(&root, &changed, &config);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "src/lib.rs");
        assert_eq!(files[0].contents, "pub fn x() {}");
    }

    #[test]
    fn test_collect_context_files_respects_limit() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.txt", "b.txt", "c.txt"] {
            std::fs::write(dir.path().join(name), name).unwrap();
        }
        let config = JudgeConfig {
            max_context_files: 2,
            ..JudgeConfig::default()
        };
        let changed: Vec<String> = ["a.txt", "b.txt", "c.txt"].iter().map(|s| s.to_string()).collect();
        assert_eq!(collect_context_files(dir.path(), &changed, &config).len(), 2);
    }
}
