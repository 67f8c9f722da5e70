//! Ensures every workspace crate inherits the workspace version and that
//! internal crates are wired through `[workspace.dependencies]`.

use std::path::{Path, PathBuf};

const CRATES: &[&str] = &[
    "crates/grader-core",
    "crates/grader-runner",
    "crates/grader-cli",
];

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .to_path_buf()
}

fn manifest(dir: &Path) -> toml::Value {
    let raw = std::fs::read_to_string(dir.join("Cargo.toml"))
        .unwrap_or_else(|e| panic!("failed to read {}: {}", dir.display(), e));
    raw.parse().unwrap()
}

#[test]
fn all_crates_use_workspace_version() {
    let root = workspace_root();
    for krate in CRATES {
        let doc = manifest(&root.join(krate));
        let inherited = doc["package"]["version"]
            .get("workspace")
            .and_then(|v| v.as_bool());
        assert_eq!(
            inherited,
            Some(true),
            "{} should use version.workspace = true",
            krate
        );
    }
}

#[test]
fn workspace_members_match_crate_list() {
    let doc = manifest(&workspace_root());
    let members: Vec<&str> = doc["workspace"]["members"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|m| m.as_str())
        .collect();
    assert_eq!(members, CRATES);
}

#[test]
fn internal_dependencies_pin_workspace_version() {
    let doc = manifest(&workspace_root());
    let version = doc["workspace"]["package"]["version"].as_str().unwrap();
    for name in ["grader-core", "grader-runner"] {
        let dep = &doc["workspace"]["dependencies"][name];
        assert_eq!(
            dep["version"].as_str(),
            Some(version),
            "{} must pin the workspace version",
            name
        );
        assert!(dep.get("path").is_some(), "{} must be a path dependency", name);
    }
}

#[test]
fn test_only_crates_stay_dev_dependencies() {
    let root = workspace_root();
    for krate in ["crates/grader-runner", "crates/grader-cli"] {
        let doc = manifest(&root.join(krate));
        assert!(
            doc["dependencies"].get("serde_json").is_none(),
            "{} only uses serde_json in tests",
            krate
        );
        assert!(doc["dev-dependencies"].get("serde_json").is_some());
    }
}

#[test]
fn workspace_version_matches_cargo_pkg() {
    let doc = manifest(&workspace_root());
    let ws_version = doc["workspace"]["package"]["version"].as_str().unwrap();
    assert_eq!(ws_version, env!("CARGO_PKG_VERSION"));
}
