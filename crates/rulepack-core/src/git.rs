//! Repository transport backed by the system `git` binary.
//!
//! Remote packs are mirror-cloned once into a per-user cache and refreshed
//! on every resolution, so repeated installs only pay for an incremental
//! fetch. Files are read straight out of the mirror at a pinned commit;
//! no working tree is ever checked out.

use semver::{Version, VersionReq};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use tracing::debug;

/// Errors that can occur during repository operations.
#[derive(Error, Debug)]
pub enum GitError {
    #[error("could not determine user cache directory")]
    CacheDir,

    #[error("create cache directory {path}: {source}")]
    Cache {
        path: String,
        source: std::io::Error,
    },

    #[error("run git: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("git {command} failed: {detail}")]
    Command { command: String, detail: String },

    #[error("invalid version constraint \"{constraint}\": {reason}")]
    InvalidConstraint { constraint: String, reason: String },

    #[error("no tags satisfy constraint \"{0}\"")]
    NoMatchingTag(String),
}

/// The outcome of resolving a dependency reference to a commit.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// The literal user input: ref, semver constraint, or `HEAD`.
    pub requested: String,
    /// The selected version when semver resolution ran.
    pub resolved_version: Option<String>,
    /// The pinned commit SHA.
    pub commit: String,
}

/// Client for the per-user mirror cache of remote rule packs.
pub struct GitClient {
    cache_root: PathBuf,
}

impl GitClient {
    /// Create a client rooted at the platform cache directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache directory cannot be determined or
    /// created.
    pub fn new() -> Result<Self, GitError> {
        let root = dirs::cache_dir().ok_or(GitError::CacheDir)?.join("rulepack");
        std::fs::create_dir_all(&root).map_err(|source| GitError::Cache {
            path: root.display().to_string(),
            source,
        })?;
        Ok(Self { cache_root: root })
    }

    /// Create a client rooted at an explicit cache directory.
    #[must_use]
    pub fn with_cache_root(root: impl Into<PathBuf>) -> Self {
        Self {
            cache_root: root.into(),
        }
    }

    /// The cache root this client writes mirrors under.
    #[must_use]
    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    /// Mirror-clone a repository into the cache, or refresh the existing
    /// mirror's tags and remote heads.
    ///
    /// # Errors
    ///
    /// Returns an error if the repository is unreachable or the clone or
    /// fetch fails.
    pub fn ensure_repo(&self, uri: &str) -> Result<PathBuf, GitError> {
        let digest = Sha256::digest(uri.as_bytes());
        let repo_dir = self
            .cache_root
            .join(&hex::encode(digest)[..12])
            .join("repo.git");
        let repo = repo_dir.to_string_lossy().into_owned();
        if repo_dir.exists() {
            debug!(uri, repo = %repo_dir.display(), "refreshing mirror");
            run_git(&["--git-dir", &repo, "fetch", "--force", "--tags", "origin"])?;
            run_git(&[
                "--git-dir",
                &repo,
                "fetch",
                "--force",
                "origin",
                "+refs/heads/*:refs/remotes/origin/*",
            ])?;
            return Ok(repo_dir);
        }
        if let Some(parent) = repo_dir.parent() {
            std::fs::create_dir_all(parent).map_err(|source| GitError::Cache {
                path: parent.display().to_string(),
                source,
            })?;
        }
        debug!(uri, repo = %repo_dir.display(), "mirror cloning");
        run_git(&["clone", "--mirror", uri, &repo])?;
        Ok(repo_dir)
    }

    /// Resolve a ref or semver constraint to a commit.
    ///
    /// Policy: an explicit ref wins, then a semver constraint over the tag
    /// list, then `HEAD`.
    ///
    /// # Errors
    ///
    /// Returns an error if the ref does not exist or no tag satisfies the
    /// constraint.
    pub fn resolve(
        &self,
        repo_dir: &Path,
        reference: Option<&str>,
        version: Option<&str>,
    ) -> Result<Resolution, GitError> {
        if let Some(reference) = reference.filter(|r| !r.is_empty()) {
            let commit = self.rev_parse(repo_dir, reference)?;
            return Ok(Resolution {
                requested: reference.to_string(),
                resolved_version: None,
                commit,
            });
        }
        if let Some(constraint) = version.filter(|v| !v.is_empty()) {
            let tags = self.list_tags(repo_dir)?;
            let (selected, tag) = select_tag(&tags, constraint)?;
            let commit = self.rev_parse(repo_dir, &tag)?;
            return Ok(Resolution {
                requested: constraint.to_string(),
                resolved_version: Some(selected.to_string()),
                commit,
            });
        }
        let commit = self.rev_parse(repo_dir, "HEAD")?;
        Ok(Resolution {
            requested: "HEAD".to_string(),
            resolved_version: None,
            commit,
        })
    }

    /// List all tags in a mirror.
    ///
    /// # Errors
    ///
    /// Returns an error if the tag listing fails.
    pub fn list_tags(&self, repo_dir: &Path) -> Result<Vec<String>, GitError> {
        let repo = repo_dir.to_string_lossy().into_owned();
        let output = run_git(&["--git-dir", &repo, "tag", "--list"])?;
        Ok(output.split_whitespace().map(str::to_string).collect())
    }

    /// Read one file's bytes at a commit, without checking out a tree.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit or path does not exist.
    pub fn show_file(&self, repo_dir: &Path, commit: &str, path: &str) -> Result<Vec<u8>, GitError> {
        let repo = repo_dir.to_string_lossy().into_owned();
        let spec = format!("{commit}:{path}");
        let output = run_git_bytes(&["--git-dir", &repo, "show", &spec])?;
        Ok(output)
    }

    fn rev_parse(&self, repo_dir: &Path, reference: &str) -> Result<String, GitError> {
        let repo = repo_dir.to_string_lossy().into_owned();
        let spec = format!("{reference}^{{commit}}");
        let output = run_git(&["--git-dir", &repo, "rev-parse", &spec])?;
        Ok(output.trim().to_string())
    }
}

/// Pick the greatest tag satisfying a semver constraint.
///
/// Tags may carry a leading `v`; unparseable tags are skipped.
///
/// # Errors
///
/// Returns an error if the constraint is invalid or nothing matches.
pub fn select_tag(tags: &[String], constraint: &str) -> Result<(Version, String), GitError> {
    let req = VersionReq::parse(constraint).map_err(|e| GitError::InvalidConstraint {
        constraint: constraint.to_string(),
        reason: e.to_string(),
    })?;
    let mut matches: Vec<(Version, String)> = tags
        .iter()
        .filter_map(|tag| {
            let normalized = tag.strip_prefix('v').unwrap_or(tag);
            let version = Version::parse(normalized).ok()?;
            req.matches(&version).then(|| (version, tag.clone()))
        })
        .collect();
    if matches.is_empty() {
        return Err(GitError::NoMatchingTag(constraint.to_string()));
    }
    matches.sort_by(|a, b| b.0.cmp(&a.0));
    Ok(matches.remove(0))
}

fn run_git(args: &[&str]) -> Result<String, GitError> {
    let bytes = run_git_bytes(args)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn run_git_bytes(args: &[&str]) -> Result<Vec<u8>, GitError> {
    let output = Command::new("git").args(args).output()?;
    if !output.status.success() {
        return Err(GitError::Command {
            command: args.join(" "),
            detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output.stdout)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| (*v).to_string()).collect()
    }

    #[test]
    fn select_tag_picks_highest_match() {
        let tags = tags(&["v1.0.0", "v1.2.3", "v2.0.0"]);
        let (version, tag) = select_tag(&tags, "^1.0.0").unwrap();
        assert_eq!(version.to_string(), "1.2.3");
        assert_eq!(tag, "v1.2.3");
    }

    #[test]
    fn select_tag_accepts_unprefixed_tags() {
        let tags = tags(&["0.9.0", "1.1.0"]);
        let (version, tag) = select_tag(&tags, ">=1").unwrap();
        assert_eq!(version.to_string(), "1.1.0");
        assert_eq!(tag, "1.1.0");
    }

    #[test]
    fn select_tag_skips_unparseable_tags() {
        let tags = tags(&["nightly", "v1.0.0", "release-candidate"]);
        let (_, tag) = select_tag(&tags, "^1").unwrap();
        assert_eq!(tag, "v1.0.0");
    }

    #[test]
    fn select_tag_fails_without_match() {
        let tags = tags(&["v1.0.0"]);
        let err = select_tag(&tags, "^2.0.0").unwrap_err();
        assert!(matches!(err, GitError::NoMatchingTag(_)));
        assert!(err.to_string().contains("no tags satisfy constraint"));
    }

    #[test]
    fn select_tag_rejects_invalid_constraint() {
        let err = select_tag(&tags(&["v1.0.0"]), "not a constraint").unwrap_err();
        assert!(matches!(err, GitError::InvalidConstraint { .. }));
    }

    #[test]
    fn cache_root_is_injectable() {
        let dir = tempfile::TempDir::new().unwrap();
        let client = GitClient::with_cache_root(dir.path());
        assert_eq!(client.cache_root(), dir.path());
    }
}
