//! Concurrent per-rubric judgment.
//!
//! [`RubricJudge::judge_all`] spawns one task per rubric into a `JoinSet`.
//! Each task returns an owned `(index, outcome)` pair which lands in its
//! slot; the slots are reduced once the batch resolves or its deadline
//! passes.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, warn, Instrument};
use uuid::Uuid;

use super::backend::{JudgeBackend, OpenAiCompatibleBackend};
use super::error::JudgeError;
use super::prompt::{build_user_prompt, parse_judgment, JudgeContext, ParsedJudgment, SYSTEM_PROMPT};
use super::JudgeConfig;
use crate::aggregate::lm_weighted_score;
use crate::domain::result::{LmEvaluation, LmJudgment};
use crate::domain::task::Rubric;
use crate::metrics::METRICS;
use crate::obs;

/// Judges every rubric of a task against one shared context.
pub struct RubricJudge {
    backend: Arc<dyn JudgeBackend>,
    config: JudgeConfig,
}

impl RubricJudge {
    pub fn new(config: JudgeConfig, backend: Arc<dyn JudgeBackend>) -> Self {
        Self { backend, config }
    }

    /// Judge backed by the OpenAI-compatible client described by `config`.
    pub fn from_config(config: JudgeConfig) -> Result<Self, JudgeError> {
        let backend = OpenAiCompatibleBackend::new(&config)?;
        Ok(Self::new(config, Arc::new(backend)))
    }

    pub fn model(&self) -> &str {
        self.backend.model()
    }

    pub fn config(&self) -> &JudgeConfig {
        &self.config
    }

    /// Judge all rubrics concurrently.
    ///
    /// Individual failures degrade only their own rubric. Returns
    /// `JudgeError::Unavailable` when every judgment failed for a transport
    /// reason, since such a batch says nothing about the agent's work.
    pub async fn judge_all(
        &self,
        rubrics: &[Rubric],
        ctx: &JudgeContext,
    ) -> Result<LmEvaluation, JudgeError> {
        let ctx = Arc::new(ctx.clone());
        let request_timeout = Duration::from_secs(self.config.request_timeout_secs);
        // An unrepresentable deadline means the batch is unbounded.
        let deadline = Instant::now().checked_add(Duration::from_secs(self.config.batch_timeout_secs));

        let mut join_set = JoinSet::new();
        for (idx, rubric) in rubrics.iter().cloned().enumerate() {
            let backend = Arc::clone(&self.backend);
            let ctx = Arc::clone(&ctx);
            METRICS.inc_judgments_dispatched();
            join_set.spawn(
                async move {
                    let outcome = judge_one(backend.as_ref(), &ctx, &rubric, request_timeout).await;
                    (idx, outcome)
                }
                .instrument(tracing::Span::current()),
            );
        }

        let mut slots: Vec<Option<Result<ParsedJudgment, JudgeError>>> = vec![None; rubrics.len()];
        let mut deadline_hit = false;
        loop {
            let next = match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, join_set.join_next()).await,
                None => Ok(join_set.join_next().await),
            };
            match next {
                Ok(Some(Ok((idx, outcome)))) => slots[idx] = Some(outcome),
                Ok(Some(Err(e))) => warn!(error = %e, "judgment task join error"),
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        pending = join_set.len(),
                        batch_timeout_secs = self.config.batch_timeout_secs,
                        "judgment batch deadline reached"
                    );
                    join_set.abort_all();
                    deadline_hit = true;
                    break;
                }
            }
        }

        let mut judgments = Vec::with_capacity(rubrics.len());
        let mut transport_failures = 0usize;
        for (rubric, slot) in rubrics.iter().zip(slots) {
            let outcome = slot.unwrap_or_else(|| {
                Err(if deadline_hit {
                    JudgeError::BatchDeadline
                } else {
                    JudgeError::Transport("judgment task aborted".to_string())
                })
            });
            let judgment = match outcome {
                Ok(parsed) => LmJudgment {
                    rubric_id: rubric.id.clone(),
                    criterion: rubric.criterion.clone(),
                    weight: rubric.weight,
                    score: parsed.score,
                    reasoning: parsed.reasoning,
                    evidence: parsed.evidence,
                    suggestions: parsed.suggestions,
                    degraded: false,
                    error: None,
                },
                Err(e) => {
                    if e.is_transport() {
                        transport_failures += 1;
                    }
                    METRICS.inc_judgments_degraded();
                    LmJudgment::degraded(&rubric.id, &rubric.criterion, rubric.weight, e.to_string())
                }
            };
            obs::emit_judgment_completed(&judgment.rubric_id, judgment.score, judgment.degraded);
            judgments.push(judgment);
        }

        if !rubrics.is_empty() && transport_failures == rubrics.len() {
            let cause = judgments
                .first()
                .and_then(|j| j.error.clone())
                .unwrap_or_default();
            return Err(JudgeError::Unavailable(format!(
                "all {} judgments failed; first cause: {cause}",
                rubrics.len()
            )));
        }

        let degraded_count = judgments.iter().filter(|j| j.degraded).count();
        Ok(LmEvaluation {
            model: self.backend.model().to_string(),
            weighted_score: lm_weighted_score(&judgments),
            rubric_scores: judgments,
            degraded_count,
        })
    }
}

async fn judge_one(
    backend: &dyn JudgeBackend,
    ctx: &JudgeContext,
    rubric: &Rubric,
    request_timeout: Duration,
) -> Result<ParsedJudgment, JudgeError> {
    let request_id = Uuid::new_v4();
    debug!(%request_id, rubric_id = %rubric.id, "dispatching judgment");

    let user = build_user_prompt(ctx, rubric);
    let response = tokio::time::timeout(request_timeout, backend.complete(SYSTEM_PROMPT, &user))
        .await
        .map_err(|_| JudgeError::Timeout(request_timeout.as_secs()))??;

    let parsed = parse_judgment(&response);
    if let Err(e) = &parsed {
        debug!(%request_id, rubric_id = %rubric.id, error = %e, "judgment rejected");
    }
    parsed
}
