//! Rubric aggregation: test outcomes to weighted rubric scores and a total.
//!
//! Two reductions live here and they deliberately disagree on "unmeasured":
//!
//! - [`aggregate_test_outcomes`] leaves a rubric with no tests at
//!   `score: None`, and excludes it from the total. If nothing was measured the
//!   total is `0.0`, never absent.
//! - [`lm_weighted_score`] averages over every rubric, because every rubric
//!   always receives a (possibly degraded) judgment.

use crate::domain::result::{Evaluation, LmJudgment, RubricResult, TestOutcome};
use crate::domain::task::Rubric;

/// Score each rubric from its tests and compute the total score.
///
/// Outcomes are matched to rubrics by `rubric_id`. Result order follows
/// `rubrics`.
pub fn aggregate_test_outcomes(rubrics: &[Rubric], outcomes: &[TestOutcome]) -> Evaluation {
    let results: Vec<RubricResult> = rubrics
        .iter()
        .map(|rubric| {
            let tied: Vec<&TestOutcome> = outcomes
                .iter()
                .filter(|o| o.rubric_id == rubric.id)
                .collect();
            let test_count = tied.len();
            let tests_passed = tied.iter().filter(|o| o.success).count();

            let score = if test_count > 0 {
                Some(tests_passed as f64 / test_count as f64)
            } else {
                None
            };

            RubricResult {
                rubric_id: rubric.id.clone(),
                criterion: rubric.criterion.clone(),
                weight: rubric.weight,
                score,
                weighted_score: score.map(|s| s * rubric.weight),
                tests_passed,
                test_count,
            }
        })
        .collect();

    let total_score = total_score(&results);
    Evaluation {
        rubrics: results,
        total_score,
    }
}

/// `Σ weighted_score / Σ weight` over rubrics with a score; `0.0` when none.
pub fn total_score(results: &[RubricResult]) -> f64 {
    let (weighted_sum, weight_sum) = results
        .iter()
        .filter_map(|r| r.weighted_score.map(|ws| (ws, r.weight)))
        .fold((0.0_f64, 0.0_f64), |(ws_acc, w_acc), (ws, w)| {
            (ws_acc + ws, w_acc + w)
        });

    if weight_sum > 0.0 {
        weighted_sum / weight_sum
    } else {
        0.0
    }
}

/// `Σ(score·weight) / Σ(weight)` over all judgments.
///
/// Falls back to the unweighted mean when every weight is zero, and to `0.0`
/// for an empty batch.
pub fn lm_weighted_score(judgments: &[LmJudgment]) -> f64 {
    if judgments.is_empty() {
        return 0.0;
    }

    let weight_sum: f64 = judgments.iter().map(|j| j.weight).sum();
    if weight_sum > 0.0 {
        judgments.iter().map(|j| j.score * j.weight).sum::<f64>() / weight_sum
    } else {
        judgments.iter().map(|j| j.score).sum::<f64>() / judgments.len() as f64
    }
}

/// Rubric table for the LM-only path: each rubric scored by its judgment.
pub fn evaluation_from_judgments(rubrics: &[Rubric], judgments: &[LmJudgment]) -> Evaluation {
    let results = rubrics
        .iter()
        .map(|rubric| {
            let score = judgments
                .iter()
                .find(|j| j.rubric_id == rubric.id)
                .map(|j| j.score)
                .unwrap_or(0.0);
            RubricResult {
                rubric_id: rubric.id.clone(),
                criterion: rubric.criterion.clone(),
                weight: rubric.weight,
                score: Some(score),
                weighted_score: Some(score * rubric.weight),
                tests_passed: 0,
                test_count: 0,
            }
        })
        .collect();

    Evaluation {
        rubrics: results,
        total_score: lm_weighted_score(judgments),
    }
}
