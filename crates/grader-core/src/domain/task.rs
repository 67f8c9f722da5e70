//! Task specification: instructions, repository pin, rubrics and test scripts.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::error::{EvalError, Result};

/// Repository the agent worked against.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepoPin {
    /// Clone URL (any URL or local path `git clone` accepts).
    pub url: String,

    /// Branch to clone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    /// Commit to check out after cloning.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
}

/// A weighted qualitative criterion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rubric {
    pub id: String,
    pub criterion: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

impl Rubric {
    pub fn new(id: impl Into<String>, criterion: impl Into<String>, weight: f64) -> Self {
        Self {
            id: id.into(),
            criterion: criterion.into(),
            weight,
        }
    }
}

/// A deterministic check tied to exactly one rubric.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestScript {
    /// Path relative to the workspace root.
    pub path: String,
    pub rubric_id: String,
    pub content: String,
}

impl TestScript {
    pub fn new(
        path: impl Into<String>,
        rubric_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            rubric_id: rubric_id.into(),
            content: content.into(),
        }
    }
}

/// The `evaluation` section of a task spec.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EvaluationSpec {
    #[serde(default)]
    pub rubrics: Vec<Rubric>,
    #[serde(default)]
    pub test_scripts: Vec<TestScript>,
}

/// Immutable description of the task an agent was asked to solve.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskSpec {
    #[serde(default)]
    pub task_id: String,

    #[serde(default)]
    pub instructions: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<RepoPin>,

    #[serde(default)]
    pub evaluation: EvaluationSpec,
}

impl TaskSpec {
    /// Create an empty task spec with the given id and instructions.
    pub fn new(task_id: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            instructions: instructions.into(),
            repo: None,
            evaluation: EvaluationSpec::default(),
        }
    }

    /// Pin the repository.
    pub fn with_repo(mut self, repo: RepoPin) -> Self {
        self.repo = Some(repo);
        self
    }

    /// Add a rubric.
    pub fn add_rubric(mut self, rubric: Rubric) -> Self {
        self.evaluation.rubrics.push(rubric);
        self
    }

    /// Add a test script.
    pub fn add_test_script(mut self, script: TestScript) -> Self {
        self.evaluation.test_scripts.push(script);
        self
    }

    /// Load and validate a task spec from a JSON or YAML file.
    ///
    /// `.json` is parsed as JSON, `.yaml`/`.yml` as YAML; any other extension
    /// is tried as JSON first and then YAML. A missing `task_id` defaults to
    /// the file stem.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| EvalError::TaskSpecIo {
            path: path.to_path_buf(),
            source,
        })?;

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        let parsed = match ext.as_deref() {
            Some("json") => serde_json::from_str::<TaskSpec>(&raw).map_err(|e| e.to_string()),
            Some("yaml") | Some("yml") => {
                serde_yaml::from_str::<TaskSpec>(&raw).map_err(|e| e.to_string())
            }
            _ => serde_json::from_str::<TaskSpec>(&raw).or_else(|json_err| {
                serde_yaml::from_str::<TaskSpec>(&raw)
                    .map_err(|yaml_err| format!("not JSON ({json_err}) nor YAML ({yaml_err})"))
            }),
        };

        let mut spec = parsed.map_err(|reason| EvalError::TaskSpecParse {
            path: path.to_path_buf(),
            reason,
        })?;

        if spec.task_id.trim().is_empty() {
            spec.task_id = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "task".to_string());
        }

        spec.validate()?;
        Ok(spec)
    }

    /// Check structural invariants the scoring path relies on.
    pub fn validate(&self) -> Result<()> {
        if self.evaluation.rubrics.is_empty() {
            return Err(EvalError::InvalidTaskSpec(
                "evaluation.rubrics must not be empty".to_string(),
            ));
        }

        let mut ids = HashSet::new();
        for rubric in &self.evaluation.rubrics {
            if rubric.id.trim().is_empty() {
                return Err(EvalError::InvalidTaskSpec(
                    "rubric id must not be empty".to_string(),
                ));
            }
            if !ids.insert(rubric.id.as_str()) {
                return Err(EvalError::InvalidTaskSpec(format!(
                    "duplicate rubric id: {}",
                    rubric.id
                )));
            }
            if !rubric.weight.is_finite() || rubric.weight < 0.0 {
                return Err(EvalError::InvalidTaskSpec(format!(
                    "rubric {} has invalid weight {}",
                    rubric.id, rubric.weight
                )));
            }
        }

        let mut paths = HashSet::new();
        for script in &self.evaluation.test_scripts {
            if script.path.trim().is_empty() {
                return Err(EvalError::InvalidTaskSpec(
                    "test script path must not be empty".to_string(),
                ));
            }
            if !ids.contains(script.rubric_id.as_str()) {
                return Err(EvalError::InvalidTaskSpec(format!(
                    "test script {} references unknown rubric {}",
                    script.path, script.rubric_id
                )));
            }
            if !paths.insert(script.path.as_str()) {
                return Err(EvalError::InvalidTaskSpec(format!(
                    "duplicate test script path: {}",
                    script.path
                )));
            }
        }

        Ok(())
    }

    pub fn rubrics(&self) -> &[Rubric] {
        &self.evaluation.rubrics
    }

    pub fn test_scripts(&self) -> &[TestScript] {
        &self.evaluation.test_scripts
    }

    /// Whether the deterministic scoring path applies.
    pub fn has_test_scripts(&self) -> bool {
        !self.evaluation.test_scripts.is_empty()
    }

    /// Look up a rubric by id.
    pub fn rubric(&self, id: &str) -> Option<&Rubric> {
        self.evaluation.rubrics.iter().find(|r| r.id == id)
    }

    /// SHA-256 hex digest of the canonical JSON encoding.
    pub fn digest(&self) -> Result<String> {
        let bytes = serde_json::to_vec(self)?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(hex::encode(hasher.finalize()))
    }
}
