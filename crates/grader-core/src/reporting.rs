use anyhow::{Context, Result};
use std::path::Path;

use crate::domain::result::{EvaluationResult, LmEvaluation, RubricResult};
use crate::text::excerpt;

const SCORE_BAR_WIDTH: usize = 20;
const DIFF_EXCERPT_BYTES: usize = 4_000;
const REASONING_EXCERPT_BYTES: usize = 600;

/// Write evaluation_result.json in pretty JSON format.
pub fn write_result_json(path: &Path, result: &EvaluationResult) -> Result<()> {
    let content = serde_json::to_string_pretty(result).context("serialize evaluation result")?;
    std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

/// Write report.md.
pub fn write_report_md(path: &Path, result: &EvaluationResult, diff: &str) -> Result<()> {
    let md = render_report_md(result, diff);
    std::fs::write(path, md).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

/// `[#####---------------]` for a score in `[0, 1]`.
pub fn score_bar(score: f64) -> String {
    let clamped = if score.is_finite() { score.clamp(0.0, 1.0) } else { 0.0 };
    let filled = (clamped * SCORE_BAR_WIDTH as f64).round() as usize;
    format!(
        "[{}{}]",
        "#".repeat(filled),
        "-".repeat(SCORE_BAR_WIDTH - filled)
    )
}

fn cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

fn opt2(value: Option<f64>) -> String {
    value.map(|v| format!("{v:.2}")).unwrap_or_else(|| "n/a".to_string())
}

/// Render the human-readable report for one evaluation.
pub fn render_report_md(result: &EvaluationResult, diff: &str) -> String {
    let total = result.total_score();
    let mut out = String::new();

    out.push_str(&format!("# Evaluation Report: {}\n\n", result.task_id));
    out.push_str(&format!(
        "- run: `{}`\n- scoring method: {}\n- patch status: {}\n\n",
        result.run_id, result.scoring_method, result.patch_status
    ));

    out.push_str("## Score\n\n");
    out.push_str(&format!("`{}` {:.1}%\n\n", score_bar(total), total * 100.0));

    let rubrics = result.evaluation.rubrics();
    if !rubrics.is_empty() {
        render_rubric_table(&mut out, &rubrics);
    }

    if !result.test_results.is_empty() {
        out.push_str("## Tests\n\n| Test | Rubric | Result |\n|---|---|---|\n");
        for t in &result.test_results {
            out.push_str(&format!(
                "| `{}` | {} | {} |\n",
                cell(&t.path),
                cell(&t.rubric_id),
                if t.success { "pass" } else { "fail" }
            ));
        }
        out.push('\n');
    }

    if let Some(lm) = &result.lm_evaluation {
        render_lm_section(&mut out, lm);
    }

    out.push_str("## Diff Excerpt\n\n");
    if diff.trim().is_empty() {
        out.push_str("_No changes._\n\n");
    } else {
        out.push_str("```diff\n");
        out.push_str(excerpt(diff, DIFF_EXCERPT_BYTES).trim_end());
        out.push_str("\n```\n\n");
    }

    let m = &result.agent_metrics;
    out.push_str("## Summary\n\n| Metric | Value |\n|---|---|\n");
    out.push_str(&format!("| total score | {total:.4} |\n"));
    out.push_str(&format!(
        "| tests passed | {}/{} |\n",
        result.tests_passed(),
        result.test_results.len()
    ));
    out.push_str(&format!("| diff lines | {} |\n", result.diff_lines));
    out.push_str(&format!("| tokens | {} |\n", m.tokens_total));
    out.push_str(&format!("| tool calls | {} |\n", m.tool_calls_total));
    out.push_str(&format!("| time taken (s) | {:.1} |\n", m.time_taken_seconds));
    out.push_str(&format!("| cost (USD) | {:.4} |\n", m.money_spent_usd));
    if let Some(baseline) = &result.baseline_comparison {
        out.push_str(&format!("| baseline before | {} |\n", opt2(baseline.before_score)));
        out.push_str(&format!("| baseline after | {} |\n", opt2(baseline.after_score)));
        if let Some(delta) = baseline.delta() {
            out.push_str(&format!("| baseline delta | {delta:+.2} |\n"));
        }
        if let Some(lift) = baseline.relative_lift {
            out.push_str(&format!("| relative lift | {lift:+.2} |\n"));
        }
    }
    out
}

fn render_rubric_table(out: &mut String, rubrics: &[RubricResult]) {
    out.push_str("## Rubrics\n\n");
    out.push_str("| Rubric | Criterion | Weight | Tests | Score | Weighted |\n");
    out.push_str("|---|---|---|---|---|---|\n");
    for r in rubrics {
        out.push_str(&format!(
            "| {} | {} | {:.2} | {}/{} | {} | {} |\n",
            cell(&r.rubric_id),
            cell(&r.criterion),
            r.weight,
            r.tests_passed,
            r.test_count,
            opt2(r.score),
            opt2(r.weighted_score)
        ));
    }
    out.push('\n');
}

fn render_lm_section(out: &mut String, lm: &LmEvaluation) {
    out.push_str(&format!("## LM Judge ({})\n\n", lm.model));
    out.push_str(&format!(
        "- weighted score: {:.2}\n- degraded judgments: {}\n\n",
        lm.weighted_score, lm.degraded_count
    ));
    for j in &lm.rubric_scores {
        let flag = if j.degraded { " (degraded)" } else { "" };
        out.push_str(&format!("### {}: {:.2}{}\n\n", j.rubric_id, j.score, flag));
        let reasoning = excerpt(j.reasoning.trim(), REASONING_EXCERPT_BYTES);
        if !reasoning.is_empty() {
            for line in reasoning.lines() {
                out.push_str(&format!("> {line}\n"));
            }
            out.push('\n');
        }
        for e in &j.evidence {
            out.push_str(&format!("- evidence: {e}\n"));
        }
        for s in &j.suggestions {
            out.push_str(&format!("- suggestion: {s}\n"));
        }
        if !j.evidence.is_empty() || !j.suggestions.is_empty() {
            out.push('\n');
        }
    }
}
