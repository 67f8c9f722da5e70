//! Agent cost/effort metrics scraped from run logs.
//!
//! Two independent sources are scanned: the free-text transcript and the
//! JSONL event log. Counts from each are summed separately, then added.
//! Extraction never fails; a missing or malformed source counts as zero.

use std::fmt::Display;
use std::path::Path;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::domain::artifacts::{EVENTS_FILE, REPORT_FILE, RESULT_FILE, TRANSCRIPT_FILE};
use crate::domain::result::AgentMetrics;

/// Default price applied to every token.
pub const DEFAULT_USD_PER_TOKEN: f64 = 0.00001;

const TOOL_EVENT_TYPES: &[&str] = &[
    "tool_call",
    "function_call",
    "tool_use",
    "exec_command_begin",
    "mcp_tool_call_begin",
];

#[derive(Debug, Clone)]
pub struct MetricsConfig {
    pub usd_per_token: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            usd_per_token: DEFAULT_USD_PER_TOKEN,
        }
    }
}

/// Token and tool-call counts from one source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceCounts {
    pub tokens: u64,
    pub tool_calls: u64,
}

/// Unwrap a per-source result, logging the failure once and yielding zeros.
fn or_default<T: Default, E: Display>(source: &str, result: Result<T, E>) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            warn!(source, error = %e, "metrics source unusable; counting as zero");
            T::default()
        }
    }
}

/// Read a log file; `Ok(None)` when it does not exist.
fn read_source(path: &Path) -> std::io::Result<Option<String>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "metrics source absent");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Line scanner for transcript markers.
struct TranscriptScanner {
    tokens: Regex,
    tool_call: Regex,
}

impl TranscriptScanner {
    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            tokens: Regex::new(r#"(?i)(?:tokens used|"?total_tokens"?)\s*:\s*([0-9][0-9,]*)"#)?,
            tool_call: Regex::new(r"(?i)tool call|tool_call|tool_use|function_call")?,
        })
    }

    fn scan(&self, text: &str) -> SourceCounts {
        let mut counts = SourceCounts::default();
        for line in text.lines() {
            for cap in self.tokens.captures_iter(line) {
                let digits: String = cap[1].chars().filter(|c| *c != ',').collect();
                counts.tokens = counts.tokens.saturating_add(digits.parse::<u64>().unwrap_or(0));
            }
            if self.tool_call.is_match(line) {
                counts.tool_calls = counts.tool_calls.saturating_add(1);
            }
        }
        counts
    }
}

/// Count transcript markers.
pub fn scan_transcript(text: &str) -> Result<SourceCounts, regex::Error> {
    Ok(TranscriptScanner::new()?.scan(text))
}

/// Count structured-event markers. Lines that are not JSON objects are skipped.
pub fn scan_events(text: &str) -> SourceCounts {
    let mut counts = SourceCounts::default();
    let mut malformed = 0usize;

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let event: Value = match serde_json::from_str(line) {
            Ok(v @ Value::Object(_)) => v,
            _ => {
                malformed += 1;
                continue;
            }
        };
        counts.tokens = counts.tokens.saturating_add(event_tokens(&event));
        if is_tool_event(&event) {
            counts.tool_calls = counts.tool_calls.saturating_add(1);
        }
    }

    if malformed > 0 {
        debug!(malformed, "skipped non-JSON event lines");
    }
    counts
}

fn event_tokens(event: &Value) -> u64 {
    [
        "/usage/total_tokens",
        "/payload/usage/total_tokens",
        "/info/total_token_usage/total_tokens",
        "/total_tokens",
    ]
    .iter()
    .find_map(|ptr| event.pointer(ptr).and_then(Value::as_u64))
    .unwrap_or(0)
}

fn is_tool_event(event: &Value) -> bool {
    ["/type", "/payload/type"]
        .iter()
        .filter_map(|ptr| event.pointer(ptr).and_then(Value::as_str))
        .any(|t| TOOL_EVENT_TYPES.contains(&t))
}

/// Earliest and latest modification time among the run directory's entries.
///
/// Files the grader itself writes are ignored so re-scoring a run does not
/// stretch its elapsed time.
fn mtime_span(run_dir: &Path) -> std::io::Result<Option<(SystemTime, SystemTime)>> {
    let mut span: Option<(SystemTime, SystemTime)> = None;
    for entry in std::fs::read_dir(run_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if name == RESULT_FILE || name == REPORT_FILE {
            continue;
        }
        let modified = entry.metadata()?.modified()?;
        span = Some(match span {
            None => (modified, modified),
            Some((lo, hi)) => (lo.min(modified), hi.max(modified)),
        });
    }
    Ok(span)
}

/// Extract metrics from a run directory. Never fails.
pub fn extract_metrics(run_dir: &Path, config: &MetricsConfig) -> AgentMetrics {
    if !run_dir.is_dir() {
        debug!(run_dir = %run_dir.display(), "no run directory; metrics are zero");
        return AgentMetrics::default();
    }

    let transcript = or_default(
        TRANSCRIPT_FILE,
        read_source(&run_dir.join(TRANSCRIPT_FILE))
            .map_err(|e| e.to_string())
            .and_then(|text| match text {
                Some(text) => scan_transcript(&text).map_err(|e| e.to_string()),
                None => Ok(SourceCounts::default()),
            }),
    );

    let events = or_default(
        EVENTS_FILE,
        read_source(&run_dir.join(EVENTS_FILE))
            .map(|text| text.map(|t| scan_events(&t)).unwrap_or_default()),
    );

    let span = or_default("run_dir", mtime_span(run_dir));
    let (time_taken_seconds, run_started_at, run_finished_at) = match span {
        Some((lo, hi)) => (
            hi.duration_since(lo).map(|d| d.as_secs_f64()).unwrap_or(0.0),
            Some(DateTime::<Utc>::from(lo)),
            Some(DateTime::<Utc>::from(hi)),
        ),
        None => (0.0, None, None),
    };

    // Counts come from untrusted logs; clamp instead of overflowing.
    let tokens_total = transcript.tokens.saturating_add(events.tokens);
    AgentMetrics {
        tokens_total,
        tokens_events: events.tokens,
        tokens_transcript: transcript.tokens,
        tool_calls_total: transcript.tool_calls.saturating_add(events.tool_calls),
        tool_calls_transcript: transcript.tool_calls,
        tool_calls_events: events.tool_calls,
        time_taken_seconds,
        money_spent_usd: tokens_total as f64 * config.usd_per_token,
        run_started_at,
        run_finished_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcript_tokens_and_tool_calls() {
        let text = "\
starting agent
tokens used: 1,200
Tool Call: read_file src/lib.rs
{\"total_tokens\": 300}
total_tokens: 50
function_call edit_file
nothing to see
";
        let counts = scan_transcript(text).unwrap();
        assert_eq!(counts.tokens, 1550);
        assert_eq!(counts.tool_calls, 2);
    }

    #[test]
    fn test_events_tokens_and_tool_calls() {
        let text = r#"{"type":"token_count","info":{"total_token_usage":{"total_tokens":400}}}
{"type":"tool_call","name":"shell"}
{"payload":{"type":"exec_command_begin","usage":{"total_tokens":25}}}
not json at all
{"type":"message","usage":{"total_tokens":75}}
{"type":"agent_message","total_tokens":5}
[1,2,3]
"#;
        let counts = scan_events(text);
        assert_eq!(counts.tokens, 505);
        assert_eq!(counts.tool_calls, 2);
    }

    #[test]
    fn test_sources_combine_additively() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(TRANSCRIPT_FILE), "tokens used: 100\ntool_use x\n").unwrap();
        std::fs::write(
            dir.path().join(EVENTS_FILE),
            "{\"usage\":{\"total_tokens\":50},\"type\":\"tool_use\"}\n",
        )
        .unwrap();

        let m = extract_metrics(dir.path(), &MetricsConfig::default());
        assert_eq!(m.tokens_transcript, 100);
        assert_eq!(m.tokens_events, 50);
        assert_eq!(m.tokens_total, 150);
        assert_eq!(m.tool_calls_total, 2);
        assert!((m.money_spent_usd - 0.0015).abs() < 1e-12);
        assert!(m.time_taken_seconds >= 0.0);
        assert!(m.run_started_at.is_some());
    }

    #[test]
    fn test_missing_logs_yield_zero() {
        let dir = tempfile::tempdir().unwrap();
        let m = extract_metrics(dir.path(), &MetricsConfig::default());
        assert_eq!(m.tokens_total, 0);
        assert_eq!(m.tool_calls_total, 0);
        assert_eq!(m.money_spent_usd, 0.0);
        assert_eq!(m.time_taken_seconds, 0.0);
        assert!(m.run_started_at.is_none());
    }

    #[test]
    fn test_missing_run_dir_yields_zero() {
        let m = extract_metrics(Path::new("/nonexistent/run"), &MetricsConfig::default());
        assert_eq!(m, AgentMetrics::default());
    }

    #[test]
    fn test_huge_token_counts_saturate() {
        let counts = scan_transcript("tokens used: 18446744073709551615\ntokens used: 1\n").unwrap();
        assert_eq!(counts.tokens, u64::MAX);

        let events = scan_events("{\"total_tokens\":18446744073709551615}\n{\"total_tokens\":7}\n");
        assert_eq!(events.tokens, u64::MAX);

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(TRANSCRIPT_FILE), "tokens used: 18446744073709551615\n").unwrap();
        std::fs::write(dir.path().join(EVENTS_FILE), "{\"total_tokens\":5}\n").unwrap();
        let m = extract_metrics(dir.path(), &MetricsConfig::default());
        assert_eq!(m.tokens_transcript, u64::MAX);
        assert_eq!(m.tokens_events, 5);
        assert_eq!(m.tokens_total, u64::MAX);
        assert!(m.money_spent_usd.is_finite());
    }

    #[test]
    fn test_custom_price() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(TRANSCRIPT_FILE), "tokens used: 1000\n").unwrap();
        let m = extract_metrics(dir.path(), &MetricsConfig { usd_per_token: 0.002 });
        assert!((m.money_spent_usd - 2.0).abs() < 1e-9);
    }
}
