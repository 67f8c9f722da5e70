//! Structured observability hooks for the evaluation lifecycle.
//!
//! - `evaluation_span`: span tagging everything inside an evaluation with
//!   its run and task ids
//! - `emit_*`: one `info!` (or `warn!`) event per lifecycle step
//!
//! Verbosity follows `RUST_LOG`; pass `--json` to the CLI for JSON lines.

use tracing::{info, warn};

use crate::domain::result::{PatchStatus, ScoringMethod};

/// Evaluation-scoped span. Attach it to the evaluation future with
/// `tracing::Instrument` so it stays correct across `.await` points.
///
/// ```ignore
/// pipeline.evaluate(&task, &artifacts)
///     .instrument(evaluation_span("run-12345", "fix-parser"))
///     .await
/// // every event inside carries run_id and task_id
/// ```
pub fn evaluation_span(run_id: &str, task_id: &str) -> tracing::Span {
    tracing::info_span!("grader.evaluation", run_id = %run_id, task_id = %task_id)
}

/// Emit event: evaluation started.
pub fn emit_evaluation_started(run_id: &str, task_id: &str, rubrics: usize, test_scripts: usize) {
    info!(
        event = "evaluation.started",
        run_id = %run_id,
        task_id = %task_id,
        rubrics = rubrics,
        test_scripts = test_scripts,
    );
}

/// Emit event: the state machine chose a scoring path.
pub fn emit_scoring_path(run_id: &str, method: ScoringMethod) {
    info!(event = "evaluation.path", run_id = %run_id, scoring_method = %method);
}

/// Emit event: workspace ready with the given patch status.
pub fn emit_workspace_ready(run_id: &str, patch_status: PatchStatus) {
    if patch_status == PatchStatus::Failed {
        warn!(event = "workspace.ready", run_id = %run_id, patch_status = %patch_status);
    } else {
        info!(event = "workspace.ready", run_id = %run_id, patch_status = %patch_status);
    }
}

/// Emit event: one test script finished (or was rejected).
pub fn emit_test_completed(path: &str, rubric_id: &str, success: bool, duration_ms: u64) {
    info!(
        event = "test.completed",
        path = %path,
        rubric_id = %rubric_id,
        success = success,
        duration_ms = duration_ms,
    );
}

/// Emit event: one rubric judgment resolved.
pub fn emit_judgment_completed(rubric_id: &str, score: f64, degraded: bool) {
    if degraded {
        warn!(event = "judgment.completed", rubric_id = %rubric_id, score = score, degraded = true);
    } else {
        info!(event = "judgment.completed", rubric_id = %rubric_id, score = score, degraded = false);
    }
}

/// Emit event: evaluation finished with a score.
pub fn emit_evaluation_finished(
    run_id: &str,
    method: ScoringMethod,
    total_score: f64,
    duration_ms: u64,
) {
    info!(
        event = "evaluation.finished",
        run_id = %run_id,
        scoring_method = %method,
        total_score = total_score,
        duration_ms = duration_ms,
    );
}

/// Emit event: the evaluation could not produce a score.
pub fn emit_evaluation_failed(run_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "evaluation.failed", run_id = %run_id, error = %error);
}
