//! agent-grader runner
//!
//! Executes a task's test scripts inside a materialized workspace and drives
//! one evaluation from inputs to the written result record:
//! - `stage`: interpreter selection per test script
//! - `runner`: path-safe, isolated, time-bounded test execution
//! - `pipeline`: the evaluation state machine

pub mod pipeline;
pub mod runner;
pub mod stage;

// Re-export key types
pub use pipeline::{EvaluationPipeline, EvaluationState, PipelineConfig, PipelineOutcome};
pub use runner::{TestRunner, DEFAULT_MAX_OUTPUT_BYTES};
pub use stage::{Interpreter, TestStage};
