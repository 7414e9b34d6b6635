//! Project analyzer: manifest parse, dependency enumeration, module count,
//! and a blended health score.
//!
//! Scoring per dependency is a heuristic behind [`DependencyScorer`] so a
//! real advisory feed can be plugged in later without touching callers.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ZekeError, ZekeResult};

/// Basic facts about the project.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub name: String,
    pub version: Option<String>,
    pub kind: String,
    pub path: String,
}

/// One top-level dependency with its heuristic security score (0..=1).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DependencyInfo {
    pub name: String,
    pub version: String,
    pub security_score: f64,
}

/// Rolled-up verdict.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub health_score: f64,
    pub readiness: String,
    pub recommendations: Vec<String>,
}

/// Full analysis result returned by `project.analyze`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProjectAnalysis {
    pub project_info: ProjectInfo,
    pub dependencies: Vec<DependencyInfo>,
    pub build_issues: Vec<String>,
    pub module_count: usize,
    pub summary: AnalysisSummary,
}

/// Pluggable per-dependency scorer.
pub trait DependencyScorer: Send + Sync {
    fn score(&self, name: &str, version: &str) -> f64;
}

/// Default heuristic: wildcard and git requirements are risky, pre-1.0
/// versions slightly less trusted, everything else fine.
pub struct HeuristicScorer;

impl DependencyScorer for HeuristicScorer {
    fn score(&self, _name: &str, version: &str) -> f64 {
        if version == "*" || version.contains("git") {
            0.3
        } else if version.trim_start_matches(['^', '~', '=', ' ']).starts_with("0.") {
            0.7
        } else {
            0.9
        }
    }
}

#[derive(Deserialize, Default)]
struct CargoManifest {
    package: Option<CargoPackage>,
    #[serde(default)]
    dependencies: toml::Table,
    profile: Option<CargoProfiles>,
    workspace: Option<toml::Table>,
}

#[derive(Deserialize)]
struct CargoPackage {
    name: String,
    version: Option<toml::Value>,
}

#[derive(Deserialize, Default)]
struct CargoProfiles {
    release: Option<toml::Table>,
}

fn dependency_version(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        toml::Value::Table(t) => {
            if t.contains_key("git") {
                "git".to_string()
            } else {
                t.get("version")
                    .and_then(|v| v.as_str())
                    .unwrap_or("*")
                    .to_string()
            }
        }
        _ => "*".to_string(),
    }
}

fn count_source_files(dir: &Path) -> usize {
    let mut count = 0;
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&current) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.extension().and_then(|e| e.to_str()) == Some("rs") {
                count += 1;
            }
        }
    }
    count
}

/// Analyzes the project rooted at `path`. The manifest must be a Cargo one;
/// a missing manifest is `NotFound`.
pub fn analyze_project(
    path: &Path,
    scorer: &dyn DependencyScorer,
) -> ZekeResult<ProjectAnalysis> {
    let manifest_path = path.join("Cargo.toml");
    let content = match std::fs::read_to_string(&manifest_path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ZekeError::NotFound(format!(
                "project manifest: {}",
                manifest_path.display()
            )))
        }
        Err(e) => return Err(ZekeError::Io(e)),
    };
    let manifest: CargoManifest = toml::from_str(&content)
        .map_err(|e| ZekeError::InvalidResponse(format!("manifest parse: {e}")))?;

    let mut build_issues = Vec::new();
    let (name, version) = match &manifest.package {
        Some(p) => (
            p.name.clone(),
            p.version.as_ref().and_then(|v| v.as_str().map(String::from)),
        ),
        None if manifest.workspace.is_some() => (
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "workspace".into()),
            None,
        ),
        None => {
            build_issues.push("manifest has neither [package] nor [workspace]".to_string());
            ("unknown".to_string(), None)
        }
    };

    let dependencies: Vec<DependencyInfo> = manifest
        .dependencies
        .iter()
        .map(|(dep_name, value)| {
            let dep_version = dependency_version(value);
            let security_score = scorer.score(dep_name, &dep_version);
            DependencyInfo {
                name: dep_name.clone(),
                version: dep_version,
                security_score,
            }
        })
        .collect();

    for dep in &dependencies {
        if dep.version == "*" {
            build_issues.push(format!("dependency {} uses a wildcard version", dep.name));
        }
    }

    let src_dir = path.join("src");
    let module_count = count_source_files(&src_dir);
    if module_count == 0 && manifest.workspace.is_none() {
        build_issues.push("no source files under src/".to_string());
    }

    let has_release_tuning = manifest
        .profile
        .as_ref()
        .and_then(|p| p.release.as_ref())
        .map(|r| r.contains_key("lto") || r.contains_key("opt-level"))
        .unwrap_or(false);

    // Health blends release tuning, dependency weight, and dependency trust.
    let dep_penalty = (dependencies.len() as f64 / 50.0).min(0.3);
    let avg_security = if dependencies.is_empty() {
        1.0
    } else {
        dependencies.iter().map(|d| d.security_score).sum::<f64>() / dependencies.len() as f64
    };
    let health_score = ((if has_release_tuning { 0.2 } else { 0.1 })
        + 0.4 * avg_security
        + (0.4 - dep_penalty))
        .clamp(0.0, 1.0);

    let mut recommendations = Vec::new();
    if !has_release_tuning {
        recommendations.push("add a tuned [profile.release] (lto, opt-level)".to_string());
    }
    if avg_security < 0.8 {
        recommendations.push("pin loosely-versioned dependencies".to_string());
    }
    if dependencies.len() > 40 {
        recommendations.push("audit the dependency tree for unused crates".to_string());
    }

    let readiness = if health_score >= 0.8 && build_issues.is_empty() {
        "ready"
    } else if health_score >= 0.5 {
        "needs-attention"
    } else {
        "not-ready"
    };

    Ok(ProjectAnalysis {
        project_info: ProjectInfo {
            name,
            version,
            kind: "cargo".to_string(),
            path: path.display().to_string(),
        },
        dependencies,
        build_issues,
        module_count,
        summary: AnalysisSummary {
            health_score,
            readiness: readiness.to_string(),
            recommendations,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_project(manifest: &str, sources: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), manifest).unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir_all(&src).unwrap();
        for s in sources {
            std::fs::write(src.join(s), "fn placeholder() {}\n").unwrap();
        }
        dir
    }

    #[test]
    fn missing_manifest_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            analyze_project(dir.path(), &HeuristicScorer),
            Err(ZekeError::NotFound(_))
        ));
    }

    #[test]
    fn counts_modules_and_dependencies() {
        let dir = write_project(
            r#"
[package]
name = "demo"
version = "0.1.0"

[dependencies]
serde = "1.0"
tokio = { version = "1", features = ["full"] }
"#,
            &["main.rs", "lib.rs", "util.rs"],
        );
        let analysis = analyze_project(dir.path(), &HeuristicScorer).unwrap();
        assert_eq!(analysis.project_info.name, "demo");
        assert_eq!(analysis.module_count, 3);
        assert_eq!(analysis.dependencies.len(), 2);
    }

    #[test]
    fn wildcard_dependency_flags_issue_and_lowers_score() {
        let dir = write_project(
            r#"
[package]
name = "risky"
version = "0.1.0"

[dependencies]
leftpad = "*"
"#,
            &["main.rs"],
        );
        let analysis = analyze_project(dir.path(), &HeuristicScorer).unwrap();
        assert!(analysis
            .build_issues
            .iter()
            .any(|i| i.contains("wildcard")));
        assert!(analysis.dependencies[0].security_score < 0.5);
        assert_ne!(analysis.summary.readiness, "ready");
    }

    #[test]
    fn release_tuning_improves_health() {
        let base = r#"
[package]
name = "a"
version = "1.0.0"
"#;
        let tuned = r#"
[package]
name = "a"
version = "1.0.0"

[profile.release]
lto = true
"#;
        let plain = analyze_project(write_project(base, &["main.rs"]).path(), &HeuristicScorer)
            .unwrap();
        let optimized =
            analyze_project(write_project(tuned, &["main.rs"]).path(), &HeuristicScorer).unwrap();
        assert!(optimized.summary.health_score > plain.summary.health_score);
    }

    #[test]
    fn scorer_is_pluggable() {
        struct Paranoid;
        impl DependencyScorer for Paranoid {
            fn score(&self, _: &str, _: &str) -> f64 {
                0.0
            }
        }
        let dir = write_project(
            "[package]\nname = \"x\"\nversion = \"1.0.0\"\n\n[dependencies]\nserde = \"1\"\n",
            &["main.rs"],
        );
        let analysis = analyze_project(dir.path(), &Paranoid).unwrap();
        assert_eq!(analysis.dependencies[0].security_score, 0.0);
    }
}
