//! agent-grader CLI
//!
//! The `grader` command scores a completed autonomous-agent run against a
//! task's rubrics.
//!
//! ## Commands
//!
//! - `evaluate`: score one run directory and write `evaluation_result.json`
//!   and `report.md`
//! - `validate`: load and check a task spec without scoring anything

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use grader_core::judge::DEFAULT_JUDGE_MODEL;
use grader_core::run_metrics::DEFAULT_USD_PER_TOKEN;
use grader_core::{JudgeConfig, MaterializeConfig, MetricsConfig, TaskSpec};
use grader_runner::{EvaluationPipeline, PipelineConfig, PipelineOutcome, DEFAULT_MAX_OUTPUT_BYTES};
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "grader")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Score autonomous coding agent runs against task rubrics", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score a completed run directory
    Evaluate(EvaluateArgs),

    /// Load and validate a task spec
    Validate {
        /// Task spec file (JSON or YAML)
        #[arg(long)]
        task: PathBuf,
    },
}

#[derive(Args, Debug)]
struct EvaluateArgs {
    /// Run directory containing the agent's diff and logs
    #[arg(long)]
    run_dir: PathBuf,

    /// Task spec file (JSON or YAML)
    #[arg(long)]
    task: PathBuf,

    /// Write outputs here instead of the run directory
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Re-score even when a prior result exists
    #[arg(long)]
    force: bool,

    /// Also run the LM judge when test scripts exist
    #[arg(long)]
    lm_judge: bool,

    /// Judge model name
    #[arg(long, env = "GRADER_JUDGE_MODEL", default_value = DEFAULT_JUDGE_MODEL)]
    judge_model: String,

    /// Judge sampling temperature
    #[arg(long, env = "GRADER_JUDGE_TEMPERATURE", default_value_t = 0.0)]
    judge_temperature: f32,

    /// Base URL of an OpenAI-compatible API
    #[arg(long, env = "GRADER_JUDGE_ENDPOINT")]
    judge_endpoint: Option<String>,

    /// API key for the judge endpoint
    #[arg(long, env = "GRADER_JUDGE_API_KEY", hide_env_values = true)]
    judge_api_key: Option<String>,

    /// Per-judgment request timeout
    #[arg(long, env = "GRADER_JUDGE_TIMEOUT_SECS", default_value_t = 120)]
    judge_timeout_secs: u64,

    /// Deadline for the whole judgment batch
    #[arg(long, env = "GRADER_JUDGE_BATCH_TIMEOUT_SECS", default_value_t = 600)]
    batch_timeout_secs: u64,

    /// Per-test-script timeout
    #[arg(long, default_value_t = 300)]
    test_timeout_secs: u64,

    /// Skip dependency installation in the workspace
    #[arg(long)]
    skip_install: bool,

    /// Price per token for the money estimate
    #[arg(long, default_value_t = DEFAULT_USD_PER_TOKEN)]
    usd_per_token: f64,
}

impl EvaluateArgs {
    fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            output_dir: self.output_dir.clone(),
            force: self.force,
            lm_judge: self.lm_judge,
            test_timeout_secs: self.test_timeout_secs,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            materialize: MaterializeConfig {
                install_dependencies: !self.skip_install,
                ..MaterializeConfig::default()
            },
            metrics: MetricsConfig {
                usd_per_token: self.usd_per_token,
            },
            judge: JudgeConfig {
                model: self.judge_model.clone(),
                temperature: self.judge_temperature,
                endpoint: self.judge_endpoint.clone(),
                api_key: self.judge_api_key.clone(),
                request_timeout_secs: self.judge_timeout_secs,
                batch_timeout_secs: self.batch_timeout_secs,
                ..JudgeConfig::default()
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    grader_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Evaluate(args) => cmd_evaluate(&args).await,
        Commands::Validate { task } => cmd_validate(&task),
    }
}

async fn cmd_evaluate(args: &EvaluateArgs) -> Result<()> {
    let pipeline = EvaluationPipeline::new(args.pipeline_config());
    let outcome = pipeline
        .run(&args.task, &args.run_dir)
        .await
        .with_context(|| format!("Failed to evaluate run {}", args.run_dir.display()))?;

    info!(
        result = %outcome.result_path.display(),
        report = %outcome.report_path.display(),
        "evaluation written"
    );
    print_outcome(&outcome);
    Ok(())
}

fn print_outcome(outcome: &PipelineOutcome) {
    let result = &outcome.result;
    println!("Task:    {}", result.task_id);
    println!("Run:     {}", result.run_id);
    println!("Method:  {}", result.scoring_method);
    println!("Patch:   {}", result.patch_status);
    println!("Score:   {:.3}", result.total_score());
    if !result.test_results.is_empty() {
        println!(
            "Tests:   {}/{} passed",
            result.tests_passed(),
            result.test_results.len()
        );
    }
    if let Some(lm) = &result.lm_evaluation {
        println!(
            "Judge:   {:.3} ({}, {} degraded)",
            lm.weighted_score, lm.model, lm.degraded_count
        );
    }
    println!("Result:  {}", outcome.result_path.display());
    println!("Report:  {}", outcome.report_path.display());
}

fn cmd_validate(task: &Path) -> Result<()> {
    let spec = TaskSpec::load(task)
        .with_context(|| format!("Invalid task spec {}", task.display()))?;

    println!("Task:    {}", spec.task_id);
    match &spec.repo {
        Some(repo) => println!(
            "Repo:    {}{}",
            repo.url,
            repo.commit
                .as_deref()
                .map(|c| format!(" @ {c}"))
                .unwrap_or_default()
        ),
        None => println!("Repo:    (none, empty workspace)"),
    }
    println!("Rubrics: {}", spec.rubrics().len());
    for rubric in spec.rubrics() {
        let tests = spec
            .test_scripts()
            .iter()
            .filter(|s| s.rubric_id == rubric.id)
            .count();
        println!(
            "  {} (weight {}, {} test{}): {}",
            rubric.id,
            rubric.weight,
            tests,
            if tests == 1 { "" } else { "s" },
            rubric.criterion
        );
    }
    let path = if spec.has_test_scripts() {
        "deterministic"
    } else {
        "lm_judge"
    };
    println!("Scoring: {path}");
    println!("Digest:  {}", spec.digest()?);
    Ok(())
}
