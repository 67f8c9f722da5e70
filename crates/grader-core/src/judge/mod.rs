//! LM rubric judge.
//!
//! Every rubric is judged independently and concurrently against the task
//! instructions, the agent's diff, the deterministic test outcomes and a few
//! files from the workspace. A failing judgment degrades only its own rubric.

pub mod backend;
pub mod error;
pub mod fanout;
pub mod prompt;

pub use backend::{JudgeBackend, OpenAiCompatibleBackend};
pub use error::JudgeError;
pub use fanout::RubricJudge;
pub use prompt::{ContextFile, JudgeContext, ParsedJudgment};

pub const DEFAULT_JUDGE_MODEL: &str = "gpt-4o-mini";

/// Judge settings, fixed at construction. The judge reads no environment.
#[derive(Debug, Clone)]
pub struct JudgeConfig {
    pub model: String,
    pub temperature: f32,
    /// Base URL of an OpenAI-compatible API, e.g. `https://api.openai.com/v1`.
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    /// Deadline for one judgment request.
    pub request_timeout_secs: u64,
    /// Deadline for the whole fan-out batch.
    pub batch_timeout_secs: u64,
    pub max_diff_bytes: usize,
    pub max_context_files: usize,
    pub max_file_bytes: usize,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_JUDGE_MODEL.to_string(),
            temperature: 0.0,
            endpoint: None,
            api_key: None,
            request_timeout_secs: 120,
            batch_timeout_secs: 600,
            max_diff_bytes: 24_000,
            max_context_files: 5,
            max_file_bytes: 6_000,
        }
    }
}
