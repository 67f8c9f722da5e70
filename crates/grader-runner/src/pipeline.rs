//! Evaluation pipeline: one task, one run directory, one result record.
//!
//! The pipeline is an explicit state machine. From `Start` it takes exactly
//! one scoring path (prior-result reuse, LM-only or deterministic) and ends
//! in `Done` with a numeric total score, or `Fatal` when no score can be
//! produced.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use grader_core::domain::artifacts::{self, REPORT_FILE, RESULT_FILE};
use grader_core::judge::prompt::collect_context_files;
use grader_core::metrics::METRICS;
use grader_core::obs;
use grader_core::reporting::{write_report_md, write_result_json};
use grader_core::{
    aggregate_test_outcomes, evaluation_from_judgments, extract_metrics, materialize, EvalError,
    EvaluationRecord, EvaluationResult, JudgeBackend, JudgeConfig, JudgeContext, JudgeError,
    LmEvaluation, MaterializeConfig, MetricsConfig, PatchStatus, PriorResult, RubricJudge,
    RunArtifacts, ScoringMethod, TaskSpec, TestOutcome, Workspace,
};
use tracing::{debug, info, warn, Instrument};

use crate::runner::{TestRunner, DEFAULT_MAX_OUTPUT_BYTES};

/// Pipeline settings, built once by the caller.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Where to write outputs; defaults to the run directory.
    pub output_dir: Option<PathBuf>,
    /// Ignore a prior result and re-score.
    pub force: bool,
    /// Also run the LM judge when test scripts exist.
    pub lm_judge: bool,
    pub test_timeout_secs: u64,
    pub max_output_bytes: usize,
    pub materialize: MaterializeConfig,
    pub metrics: MetricsConfig,
    pub judge: JudgeConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_dir: None,
            force: false,
            lm_judge: false,
            test_timeout_secs: 300,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            materialize: MaterializeConfig::default(),
            metrics: MetricsConfig::default(),
            judge: JudgeConfig::default(),
        }
    }
}

/// Where an evaluation stands.
#[derive(Debug)]
pub enum EvaluationState {
    Start,
    /// A prior result exists and will be reused verbatim.
    PriorResult(PriorResult),
    /// No test scripts: the LM judge is the sole scorer.
    LmOnly,
    /// Test scripts exist: materialize, run, aggregate.
    Deterministic,
    Done(Box<EvaluationResult>),
    Fatal(EvalError),
}

impl EvaluationState {
    pub fn name(&self) -> &'static str {
        match self {
            EvaluationState::Start => "start",
            EvaluationState::PriorResult(_) => "prior_result",
            EvaluationState::LmOnly => "lm_only",
            EvaluationState::Deterministic => "deterministic",
            EvaluationState::Done(_) => "done",
            EvaluationState::Fatal(_) => "fatal",
        }
    }
}

/// Result of a full pipeline invocation.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub result: EvaluationResult,
    pub result_path: PathBuf,
    pub report_path: PathBuf,
    pub duration_ms: u64,
}

/// Evaluation orchestrator.
pub struct EvaluationPipeline {
    config: PipelineConfig,
    judge_backend: Option<Arc<dyn JudgeBackend>>,
}

impl EvaluationPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            judge_backend: None,
        }
    }

    /// Use `backend` instead of the HTTP client built from `JudgeConfig`.
    pub fn with_judge_backend(mut self, backend: Arc<dyn JudgeBackend>) -> Self {
        self.judge_backend = Some(backend);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Load inputs, evaluate, and write `evaluation_result.json` and
    /// `report.md`.
    pub async fn run(&self, task_path: &Path, run_dir: &Path) -> anyhow::Result<PipelineOutcome> {
        let start = Instant::now();
        let task = TaskSpec::load(task_path)
            .with_context(|| format!("load task spec {}", task_path.display()))?;
        let artifacts = RunArtifacts::load(run_dir)
            .with_context(|| format!("load run directory {}", run_dir.display()))?;

        let result = match self.evaluate(&task, &artifacts).await {
            Ok(result) => result,
            Err(e) => {
                obs::emit_evaluation_failed(&artifacts.run_id, &e);
                METRICS.flush();
                return Err(e).context("evaluation failed");
            }
        };

        let out_dir = self
            .config
            .output_dir
            .clone()
            .unwrap_or_else(|| run_dir.to_path_buf());
        std::fs::create_dir_all(&out_dir)
            .with_context(|| format!("create output dir {}", out_dir.display()))?;
        let result_path = out_dir.join(RESULT_FILE);
        let report_path = out_dir.join(REPORT_FILE);
        write_result_json(&result_path, &result)?;
        write_report_md(&report_path, &result, &artifacts.diff)?;

        let duration_ms = start.elapsed().as_millis() as u64;
        obs::emit_evaluation_finished(
            &result.run_id,
            result.scoring_method,
            result.total_score(),
            duration_ms,
        );
        METRICS.flush();

        Ok(PipelineOutcome {
            result,
            result_path,
            report_path,
            duration_ms,
        })
    }

    /// Score one run against one task. Writes nothing.
    pub async fn evaluate(
        &self,
        task: &TaskSpec,
        artifacts: &RunArtifacts,
    ) -> Result<EvaluationResult, EvalError> {
        let span = obs::evaluation_span(&artifacts.run_id, &task.task_id);
        self.drive(task, artifacts).instrument(span).await
    }

    async fn drive(
        &self,
        task: &TaskSpec,
        artifacts: &RunArtifacts,
    ) -> Result<EvaluationResult, EvalError> {
        obs::emit_evaluation_started(
            &artifacts.run_id,
            &task.task_id,
            task.rubrics().len(),
            task.test_scripts().len(),
        );

        let mut state = EvaluationState::Start;
        loop {
            debug!(state = state.name(), "evaluation state");
            state = match state {
                EvaluationState::Start => self.choose_path(task, artifacts),
                EvaluationState::PriorResult(prior) => {
                    match self.reuse_prior(task, artifacts, prior) {
                        Ok(result) => EvaluationState::Done(Box::new(result)),
                        Err(e) => EvaluationState::Fatal(e),
                    }
                }
                EvaluationState::LmOnly => match self.score_lm_only(task, artifacts).await {
                    Ok(result) => EvaluationState::Done(Box::new(result)),
                    Err(e) => EvaluationState::Fatal(e),
                },
                EvaluationState::Deterministic => {
                    match self.score_deterministic(task, artifacts).await {
                        Ok(result) => EvaluationState::Done(Box::new(result)),
                        Err(e) => EvaluationState::Fatal(e),
                    }
                }
                EvaluationState::Done(result) => return Ok(*result),
                EvaluationState::Fatal(e) => return Err(e),
            };
        }
    }

    fn choose_path(&self, task: &TaskSpec, artifacts: &RunArtifacts) -> EvaluationState {
        let next = match &artifacts.prior_result {
            Some(prior) if !self.config.force => EvaluationState::PriorResult(prior.clone()),
            _ if task.has_test_scripts() => EvaluationState::Deterministic,
            _ => EvaluationState::LmOnly,
        };
        if artifacts.prior_result.is_some() && self.config.force {
            info!(file = artifacts::PRIOR_RESULT_FILE, "ignoring prior result (--force)");
        }
        next
    }

    fn reuse_prior(
        &self,
        task: &TaskSpec,
        artifacts: &RunArtifacts,
        prior: PriorResult,
    ) -> Result<EvaluationResult, EvalError> {
        obs::emit_scoring_path(&artifacts.run_id, ScoringMethod::PriorResult);
        info!(total_score = prior.total_score, "reusing prior result");
        self.assemble(
            task,
            artifacts,
            ScoringMethod::PriorResult,
            PatchStatus::NotApplied,
            EvaluationRecord::Reused(prior.evaluation),
            prior.test_results,
            prior.lm_evaluation,
        )
    }

    async fn score_lm_only(
        &self,
        task: &TaskSpec,
        artifacts: &RunArtifacts,
    ) -> Result<EvaluationResult, EvalError> {
        obs::emit_scoring_path(&artifacts.run_id, ScoringMethod::LmJudge);
        let judge = self
            .judge()
            .map_err(|e| EvalError::JudgeUnavailable(e.to_string()))?;

        // Only used for context files; a failure here costs context, not the score.
        let context_config = self.context_materialize_config();
        let workspace = match materialize(task.repo.as_ref(), &artifacts.diff, &context_config).await {
            Ok(ws) => {
                obs::emit_workspace_ready(&artifacts.run_id, ws.patch_status());
                Some(ws)
            }
            Err(e) => {
                warn!(error = %e, "workspace unavailable for judge context");
                None
            }
        };

        let ctx = self.judge_context(task, artifacts, workspace.as_ref(), &[]);
        let lm = judge
            .judge_all(task.rubrics(), &ctx)
            .await
            .map_err(|e| EvalError::JudgeUnavailable(e.to_string()))?;
        let evaluation = evaluation_from_judgments(task.rubrics(), &lm.rubric_scores);
        let patch_status = workspace
            .as_ref()
            .map(Workspace::patch_status)
            .unwrap_or(PatchStatus::NotApplied);

        self.assemble(
            task,
            artifacts,
            ScoringMethod::LmJudge,
            patch_status,
            EvaluationRecord::Scored(evaluation),
            Vec::new(),
            Some(lm),
        )
    }

    async fn score_deterministic(
        &self,
        task: &TaskSpec,
        artifacts: &RunArtifacts,
    ) -> Result<EvaluationResult, EvalError> {
        obs::emit_scoring_path(&artifacts.run_id, ScoringMethod::Deterministic);
        let workspace = materialize(task.repo.as_ref(), &artifacts.diff, &self.config.materialize).await?;
        obs::emit_workspace_ready(&artifacts.run_id, workspace.patch_status());

        let runner = TestRunner::new(workspace.root(), self.config.test_timeout_secs)
            .with_max_output_bytes(self.config.max_output_bytes);
        let outcomes = runner.run_all(task.test_scripts()).await;
        let evaluation = aggregate_test_outcomes(task.rubrics(), &outcomes);

        let lm_evaluation = if self.config.lm_judge {
            self.optional_judgment(task, artifacts, &workspace, &outcomes).await
        } else {
            None
        };

        self.assemble(
            task,
            artifacts,
            ScoringMethod::Deterministic,
            workspace.patch_status(),
            EvaluationRecord::Scored(evaluation),
            outcomes,
            lm_evaluation,
        )
    }

    /// LM judgment alongside tests; unavailability only drops the section.
    async fn optional_judgment(
        &self,
        task: &TaskSpec,
        artifacts: &RunArtifacts,
        workspace: &Workspace,
        outcomes: &[TestOutcome],
    ) -> Option<LmEvaluation> {
        let judge = match self.judge() {
            Ok(judge) => judge,
            Err(e) => {
                warn!(error = %e, "LM judge unavailable; omitting lm_evaluation");
                return None;
            }
        };
        let ctx = self.judge_context(task, artifacts, Some(workspace), outcomes);
        match judge.judge_all(task.rubrics(), &ctx).await {
            Ok(lm) => Some(lm),
            Err(e) => {
                warn!(error = %e, "LM judge unavailable; omitting lm_evaluation");
                None
            }
        }
    }

    /// Workspace settings for the LM-only path, which only reads files.
    fn context_materialize_config(&self) -> MaterializeConfig {
        MaterializeConfig {
            install_dependencies: false,
            ..self.config.materialize.clone()
        }
    }

    fn judge(&self) -> Result<RubricJudge, JudgeError> {
        match &self.judge_backend {
            Some(backend) => Ok(RubricJudge::new(self.config.judge.clone(), Arc::clone(backend))),
            None => RubricJudge::from_config(self.config.judge.clone()),
        }
    }

    fn judge_context(
        &self,
        task: &TaskSpec,
        artifacts: &RunArtifacts,
        workspace: Option<&Workspace>,
        outcomes: &[TestOutcome],
    ) -> JudgeContext {
        let files = workspace
            .map(|ws| collect_context_files(ws.root(), &artifacts.changed_files(), &self.config.judge))
            .unwrap_or_default();
        JudgeContext::new(task.instructions.clone(), &artifacts.diff, &self.config.judge)
            .with_test_outcomes(outcomes)
            .with_files(files)
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        &self,
        task: &TaskSpec,
        artifacts: &RunArtifacts,
        scoring_method: ScoringMethod,
        patch_status: PatchStatus,
        evaluation: EvaluationRecord,
        test_results: Vec<TestOutcome>,
        lm_evaluation: Option<LmEvaluation>,
    ) -> Result<EvaluationResult, EvalError> {
        Ok(EvaluationResult {
            task_id: task.task_id.clone(),
            run_id: artifacts.run_id.clone(),
            task_digest: task.digest()?,
            scoring_method,
            patch_status,
            evaluation,
            test_results,
            lm_evaluation,
            agent_metrics: extract_metrics(&artifacts.run_dir, &self.config.metrics),
            diff_lines: artifacts.diff_lines(),
            baseline_comparison: artifacts.baseline.clone(),
        })
    }
}
