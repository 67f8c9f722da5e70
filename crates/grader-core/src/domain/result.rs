//! Evaluation outcomes and the durable result record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::artifacts::BaselineComparison;
use super::keyed::{self, Keyed};

/// Suggestion attached to every degraded judgment.
pub const MANUAL_REVIEW_SUGGESTION: &str = "manual review recommended";

/// Outcome of running one test script.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestOutcome {
    #[serde(skip)]
    pub path: String,

    #[serde(default)]
    pub rubric_id: String,

    pub success: bool,

    #[serde(default)]
    pub output: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl TestOutcome {
    /// A test that was never executed; `reason` becomes its output.
    pub fn failed(path: impl Into<String>, rubric_id: impl Into<String>, reason: String) -> Self {
        Self {
            path: path.into(),
            rubric_id: rubric_id.into(),
            success: false,
            output: reason,
            exit_code: None,
            duration_ms: None,
        }
    }
}

impl Keyed for TestOutcome {
    fn key(&self) -> &str {
        &self.path
    }

    fn with_key(mut self, key: String) -> Self {
        self.path = key;
        self
    }
}

/// Deterministic score for one rubric.
///
/// `score` is `None` when no test is tied to the rubric: unmeasured is not
/// the same as measured-and-failing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RubricResult {
    #[serde(skip)]
    pub rubric_id: String,

    pub criterion: String,
    pub weight: f64,
    pub score: Option<f64>,
    pub weighted_score: Option<f64>,

    #[serde(default)]
    pub tests_passed: usize,

    #[serde(default)]
    pub test_count: usize,
}

impl Keyed for RubricResult {
    fn key(&self) -> &str {
        &self.rubric_id
    }

    fn with_key(mut self, key: String) -> Self {
        self.rubric_id = key;
        self
    }
}

/// Rubric table plus the single total score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Evaluation {
    #[serde(with = "keyed")]
    pub rubrics: Vec<RubricResult>,
    pub total_score: f64,
}

/// The `evaluation` section of the result record.
///
/// A reused prior result is carried as raw JSON so it is written back
/// byte-for-byte as it was read.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum EvaluationRecord {
    Scored(Evaluation),
    Reused(serde_json::Value),
}

impl EvaluationRecord {
    pub fn total_score(&self) -> f64 {
        match self {
            EvaluationRecord::Scored(eval) => eval.total_score,
            EvaluationRecord::Reused(raw) => raw
                .get("total_score")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0),
        }
    }

    /// Typed rubric rows; for a reused record this is best-effort.
    pub fn rubrics(&self) -> Vec<RubricResult> {
        match self {
            EvaluationRecord::Scored(eval) => eval.rubrics.clone(),
            EvaluationRecord::Reused(raw) => serde_json::from_value::<Evaluation>(raw.clone())
                .map(|e| e.rubrics)
                .unwrap_or_default(),
        }
    }
}

/// One model judgment for one rubric.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LmJudgment {
    pub rubric_id: String,

    #[serde(default)]
    pub criterion: String,

    #[serde(default)]
    pub weight: f64,

    pub score: f64,

    #[serde(default)]
    pub reasoning: String,

    #[serde(default)]
    pub evidence: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub degraded: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LmJudgment {
    /// Substitute judgment for a rubric whose judgment failed.
    pub fn degraded(
        rubric_id: impl Into<String>,
        criterion: impl Into<String>,
        weight: f64,
        cause: impl Into<String>,
    ) -> Self {
        let cause = cause.into();
        Self {
            rubric_id: rubric_id.into(),
            criterion: criterion.into(),
            weight,
            score: 0.0,
            reasoning: format!("judgment failed: {cause}"),
            evidence: Vec::new(),
            suggestions: vec![MANUAL_REVIEW_SUGGESTION.to_string()],
            degraded: true,
            error: Some(cause),
        }
    }
}

/// Reduced batch of model judgments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LmEvaluation {
    #[serde(default)]
    pub model: String,
    pub weighted_score: f64,
    pub rubric_scores: Vec<LmJudgment>,
    #[serde(default)]
    pub degraded_count: usize,
}

/// Agent cost/effort metrics scraped from run logs.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AgentMetrics {
    pub tokens_total: u64,
    pub tokens_events: u64,
    pub tokens_transcript: u64,
    pub tool_calls_total: u64,
    pub tool_calls_transcript: u64,
    pub tool_calls_events: u64,
    pub time_taken_seconds: f64,
    pub money_spent_usd: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_finished_at: Option<DateTime<Utc>>,
}

/// Which path produced `evaluation.total_score`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScoringMethod {
    /// Test scripts executed against the materialized workspace.
    Deterministic,
    /// No test scripts; the model judge is the sole scorer.
    LmJudge,
    /// A prior container-computed result was reused verbatim.
    PriorResult,
}

impl std::fmt::Display for ScoringMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScoringMethod::Deterministic => write!(f, "deterministic"),
            ScoringMethod::LmJudge => write!(f, "lm_judge"),
            ScoringMethod::PriorResult => write!(f, "prior_result"),
        }
    }
}

/// How the agent's diff ended up in the workspace.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PatchStatus {
    /// The diff was empty; nothing to apply.
    Empty,
    /// `git apply` succeeded.
    Clean,
    /// Plain apply failed, `git apply --3way` succeeded.
    ThreeWay,
    /// Both attempts failed; the workspace is the unpatched baseline.
    Failed,
    /// No workspace was materialized.
    NotApplied,
}

impl std::fmt::Display for PatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PatchStatus::Empty => "empty",
            PatchStatus::Clean => "clean",
            PatchStatus::ThreeWay => "three_way",
            PatchStatus::Failed => "failed",
            PatchStatus::NotApplied => "not_applied",
        };
        f.write_str(s)
    }
}

/// The single durable artifact of an evaluation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluationResult {
    pub task_id: String,
    pub run_id: String,
    #[serde(default)]
    pub task_digest: String,
    pub scoring_method: ScoringMethod,
    pub patch_status: PatchStatus,
    pub evaluation: EvaluationRecord,
    #[serde(with = "keyed", default)]
    pub test_results: Vec<TestOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lm_evaluation: Option<LmEvaluation>,
    pub agent_metrics: AgentMetrics,
    pub diff_lines: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_comparison: Option<BaselineComparison>,
}

impl EvaluationResult {
    pub fn total_score(&self) -> f64 {
        self.evaluation.total_score()
    }

    pub fn tests_passed(&self) -> usize {
        self.test_results.iter().filter(|t| t.success).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rubric(id: &str, score: Option<f64>) -> RubricResult {
        RubricResult {
            rubric_id: id.to_string(),
            criterion: format!("criterion {id}"),
            weight: 0.5,
            score,
            weighted_score: score.map(|s| s * 0.5),
            tests_passed: 0,
            test_count: usize::from(score.is_some()),
        }
    }

    #[test]
    fn test_rubric_map_keeps_input_order_and_null_scores() {
        let eval = Evaluation {
            rubrics: vec![rubric("zeta", Some(1.0)), rubric("alpha", None)],
            total_score: 1.0,
        };

        let raw = serde_json::to_string(&eval).unwrap();
        let zeta = raw.find("\"zeta\"").unwrap();
        let alpha = raw.find("\"alpha\"").unwrap();
        assert!(zeta < alpha, "rubric order must follow input order: {raw}");

        let v: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(v["rubrics"]["alpha"]["score"].is_null());
        assert!(v["rubrics"]["alpha"]["weighted_score"].is_null());
        assert_eq!(v["rubrics"]["zeta"]["score"], json!(1.0));
    }

    #[test]
    fn test_evaluation_restores_keys_on_read() {
        let raw = json!({
            "rubrics": {
                "r1": {"criterion": "c1", "weight": 1.0, "score": 0.5, "weighted_score": 0.5,
                       "tests_passed": 1, "test_count": 2}
            },
            "total_score": 0.5
        });
        let eval: Evaluation = serde_json::from_value(raw).unwrap();
        assert_eq!(eval.rubrics[0].rubric_id, "r1");
        assert_eq!(eval.rubrics[0].test_count, 2);
    }

    #[test]
    fn test_reused_record_serializes_verbatim() {
        let raw = json!({"rubrics": {"b": {"score": 1}, "a": {"score": 0}}, "total_score": 1, "extra": "kept"});
        let record = EvaluationRecord::Reused(raw.clone());
        assert_eq!(serde_json::to_value(&record).unwrap(), raw);
        assert_eq!(record.total_score(), 1.0);
    }

    #[test]
    fn test_degraded_judgment_carries_cause() {
        let j = LmJudgment::degraded("r1", "c", 2.0, "timeout");
        assert_eq!(j.score, 0.0);
        assert!(j.degraded);
        assert_eq!(j.error.as_deref(), Some("timeout"));
        assert!(j.reasoning.contains("timeout"));
        assert_eq!(j.suggestions, vec![MANUAL_REVIEW_SUGGESTION.to_string()]);
    }

    #[test]
    fn test_genuine_judgment_omits_degraded_flags() {
        let j = LmJudgment {
            rubric_id: "r1".to_string(),
            criterion: "c".to_string(),
            weight: 1.0,
            score: 0.8,
            reasoning: "good".to_string(),
            evidence: vec!["src/lib.rs".to_string()],
            suggestions: vec![],
            degraded: false,
            error: None,
        };
        let v = serde_json::to_value(&j).unwrap();
        let obj = v.as_object().unwrap();
        assert!(!obj.contains_key("degraded"));
        assert!(!obj.contains_key("error"));
        assert!(!obj.contains_key("suggestions"));
    }

    #[test]
    fn test_result_record_has_expected_keys() {
        let result = EvaluationResult {
            task_id: "t".to_string(),
            run_id: "run-1".to_string(),
            task_digest: "abc".to_string(),
            scoring_method: ScoringMethod::Deterministic,
            patch_status: PatchStatus::Clean,
            evaluation: EvaluationRecord::Scored(Evaluation {
                rubrics: vec![rubric("r1", Some(1.0))],
                total_score: 1.0,
            }),
            test_results: vec![TestOutcome::failed("tests/a.sh", "r1", "boom".to_string())],
            lm_evaluation: None,
            agent_metrics: AgentMetrics::default(),
            diff_lines: 3,
            baseline_comparison: None,
        };

        let v = serde_json::to_value(&result).unwrap();
        let obj = v.as_object().unwrap();
        for key in [
            "task_id",
            "run_id",
            "evaluation",
            "test_results",
            "agent_metrics",
            "diff_lines",
            "scoring_method",
            "patch_status",
        ] {
            assert!(obj.contains_key(key), "missing key: {key}");
        }
        assert!(!obj.contains_key("lm_evaluation"));
        assert_eq!(v["test_results"]["tests/a.sh"]["success"], json!(false));
        assert_eq!(v["scoring_method"], json!("deterministic"));

        let back: EvaluationResult = serde_json::from_value(v).unwrap();
        assert_eq!(back.test_results[0].path, "tests/a.sh");
        assert_eq!(back.total_score(), 1.0);
    }
}
