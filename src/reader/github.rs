//! GitHub repository reader.
//!
//! Clones the repository with the `git` CLI into a temporary directory,
//! walks its files through include/exclude globs and returns one raw item
//! per UTF-8 file. The clone lives only for the duration of
//! [`Reader::load_raw`]; the temporary directory is removed when it returns.
//!
//! # Metadata
//!
//! | Key | Value |
//! |-----|-------|
//! | `file_name` | base name, e.g. `main.rs` |
//! | `file_path` | repo-relative path, e.g. `src/main.rs` |
//! | `repo` | `owner/repo` |
//! | `branch` | cloned branch |
//! | `commit_sha` | `HEAD` of the clone |
//! | `url` | browsable GitHub URL pinned to the commit |

use std::path::Path;
use std::process::Command;

use async_trait::async_trait;
use context_pipeline_core::models::Metadata;
use context_pipeline_core::{PipelineError, Result};
use globset::GlobSet;
use walkdir::WalkDir;

use super::{build_globset, RawItem, Reader, FILE_NAME_KEY, FILE_PATH_KEY};
use crate::config::GithubConfig;
use crate::payload::{AssetType, GithubReaderArgs};

const DEFAULT_EXCLUDES: &[&str] = &["**/.git/**", "**/target/**", "**/node_modules/**"];

#[derive(Clone)]
pub struct GithubReader {
    args: GithubReaderArgs,
    config: GithubConfig,
    include: GlobSet,
    exclude: GlobSet,
}

impl GithubReader {
    pub fn new(args: GithubReaderArgs, config: GithubConfig) -> Result<Self> {
        let include = build_globset(&config.include_globs)?;
        let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
        excludes.extend(config.exclude_globs.clone());
        let exclude = build_globset(&excludes)?;

        Ok(Self {
            args,
            config,
            include,
            exclude,
        })
    }

    /// Clone URL, with the token embedded when one was supplied.
    fn clone_url(&self) -> String {
        let base = self.config.api_base.trim_end_matches('/');
        let path = format!("{}/{}", self.args.owner, self.args.repo);
        match &self.args.github_token {
            Some(token) if !token.is_empty() => match base.split_once("://") {
                Some((scheme, host)) => format!("{}://{}@{}/{}", scheme, token, host, path),
                None => format!("{}/{}", base, path),
            },
            _ => format!("{}/{}", base, path),
        }
    }

    fn unavailable(&self, message: impl Into<String>) -> PipelineError {
        let mut message = message.into();
        if let Some(token) = self.args.github_token.as_deref().filter(|t| !t.is_empty()) {
            message = message.replace(token, "***");
        }
        PipelineError::SourceUnavailable {
            source_kind: "github".to_string(),
            message,
        }
    }

    fn clone_and_walk(&self) -> Result<Vec<RawItem>> {
        let workdir = tempfile::tempdir()
            .map_err(|e| self.unavailable(format!("failed to create clone directory: {}", e)))?;
        let dest = workdir.path().join("repo");

        git_clone(&self.clone_url(), &self.args.branch, self.config.shallow, &dest)
            .map_err(|e| self.unavailable(e))?;
        let head_sha = git_head_sha(&dest).unwrap_or_else(|_| "unknown".to_string());

        let repo = format!("{}/{}", self.args.owner, self.args.repo);
        let items = collect_files(&dest, &self.include, &self.exclude, |rel_path| {
            let mut metadata = Metadata::new();
            metadata.insert("repo".into(), repo.clone().into());
            metadata.insert("branch".into(), self.args.branch.clone().into());
            metadata.insert("commit_sha".into(), head_sha.clone().into());
            metadata.insert(
                "url".into(),
                build_web_url(&self.config.api_base, &repo, &head_sha, rel_path).into(),
            );
            metadata
        })?;

        tracing::info!(
            repo = %repo,
            branch = %self.args.branch,
            commit = %head_sha,
            files = items.len(),
            "repository read"
        );
        Ok(items)
    }
}

#[async_trait]
impl Reader for GithubReader {
    fn asset_type(&self) -> AssetType {
        AssetType::Github
    }

    async fn load_raw(&self) -> Result<Vec<RawItem>> {
        let reader = self.clone();
        tokio::task::spawn_blocking(move || reader.clone_and_walk())
            .await
            .map_err(|e| PipelineError::WorkerFailed {
                stage: "reading".to_string(),
                message: e.to_string(),
            })?
    }
}

fn git_clone(url: &str, branch: &str, shallow: bool, dest: &Path) -> std::result::Result<(), String> {
    let mut cmd = Command::new("git");
    cmd.args(["clone", "--branch", branch, "--single-branch"]);
    if shallow {
        cmd.args(["--depth", "1"]);
    }
    cmd.arg(url);
    cmd.arg(dest);
    cmd.env("GIT_TERMINAL_PROMPT", "0");

    let output = cmd
        .output()
        .map_err(|e| format!("failed to execute 'git clone' (is git installed?): {}", e))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!("git clone failed: {}", stderr.trim()));
    }
    Ok(())
}

fn git_head_sha(repo_dir: &Path) -> std::result::Result<String, String> {
    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(repo_dir)
        .output()
        .map_err(|e| e.to_string())?;

    if !output.status.success() {
        return Err("git rev-parse HEAD failed".to_string());
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Walk `root`, returning one item per matching UTF-8 file. `extra` adds
/// source-specific metadata for a repo-relative path.
pub(crate) fn collect_files<F>(
    root: &Path,
    include: &GlobSet,
    exclude: &GlobSet,
    extra: F,
) -> Result<Vec<RawItem>>
where
    F: Fn(&str) -> Metadata,
{
    let mut items = Vec::new();

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| PipelineError::SourceUnavailable {
            source_kind: "github".to_string(),
            message: format!("failed to walk {}: {}", root.display(), e),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude.is_match(&rel_str) || !include.is_match(&rel_str) {
            continue;
        }

        let text = match std::fs::read(path).map(String::from_utf8) {
            Ok(Ok(text)) => text,
            Ok(Err(_)) => {
                tracing::debug!(path = %rel_str, "skipping non-UTF-8 file");
                continue;
            }
            Err(e) => {
                tracing::warn!(path = %rel_str, error = %e, "failed to read file");
                continue;
            }
        };

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let mut metadata = extra(&rel_str);
        metadata.insert(FILE_NAME_KEY.into(), file_name.into());
        metadata.insert(FILE_PATH_KEY.into(), rel_str.clone().into());

        items.push(RawItem { text, metadata });
    }

    Ok(items)
}

/// Browsable URL of a file pinned to a commit.
fn build_web_url(api_base: &str, repo: &str, sha: &str, relative_path: &str) -> String {
    format!(
        "{}/{}/blob/{}/{}",
        api_base.trim_end_matches('/'),
        repo,
        sha,
        relative_path
    )
}
