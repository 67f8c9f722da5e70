//! agent-grader core library
//!
//! Scoring building blocks for completed autonomous-agent runs: task specs,
//! run artifacts, workspace materialization, rubric aggregation, the LM
//! rubric judge, agent metrics extraction and report rendering.

pub mod aggregate;
pub mod domain;
pub mod git;
pub mod judge;
pub mod metrics;
pub mod obs;
pub mod reporting;
pub mod run_metrics;
pub mod telemetry;
pub mod text;

pub use aggregate::{aggregate_test_outcomes, evaluation_from_judgments, lm_weighted_score, total_score};

pub use domain::{
    AgentMetrics, BaselineComparison, EvalError, Evaluation, EvaluationRecord, EvaluationResult,
    EvaluationSpec, LmEvaluation, LmJudgment, PatchStatus, PriorResult, RepoPin, Result, Rubric,
    RubricResult, RunArtifacts, ScoringMethod, TaskSpec, TestOutcome, TestScript,
    MANUAL_REVIEW_SUGGESTION,
};

pub use git::{capture_head_sha, materialize, MaterializeConfig, Workspace};

pub use judge::{
    ContextFile, JudgeBackend, JudgeConfig, JudgeContext, JudgeError, OpenAiCompatibleBackend,
    RubricJudge,
};

pub use metrics::METRICS;
pub use run_metrics::{extract_metrics, MetricsConfig};
pub use telemetry::init_tracing;
