//! Dependency resolution: pinning every manifest dependency to an exact
//! identity and emitting the lockfile.

use crate::config::{
    Dependency, LockedSource, Lockfile, Ruleset, SourceKind, LOCAL_COMMIT, PROFILE_COMMIT,
    RULESET_FILE,
};
use crate::git::{GitClient, GitError};
use crate::pack::{expand_dependency, CommitFileReader, DirFileReader, PackError};
use crate::profile::{ProfileError, ProfileStore};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Errors that can occur during dependency resolution.
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("prepare {uri}: {source}")]
    Prepare { uri: String, source: GitError },

    #[error("resolve {uri}: {source}")]
    Resolve { uri: String, source: GitError },

    #[error(transparent)]
    Pack(#[from] PackError),

    #[error(transparent)]
    Profile(#[from] ProfileError),

    #[error("local dependency path \"{path}\": {reason}")]
    LocalPath { path: String, reason: String },
}

/// One row of the install report.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedRow {
    pub index: usize,
    pub source: SourceKind,
    #[serde(rename = "ref")]
    pub reference: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub export: String,
    pub resolved: String,
    pub hash: String,
}

/// The result of resolving a full manifest.
#[derive(Debug, Clone)]
pub struct InstallOutcome {
    pub lockfile: Lockfile,
    pub rows: Vec<ResolvedRow>,
    pub counts: BTreeMap<String, usize>,
}

/// Resolve every dependency in manifest order and produce a lockfile.
///
/// Each git dependency gets one validating expansion so malformed pack
/// manifests fail at install time rather than at build time.
///
/// # Errors
///
/// Returns the first resolution, expansion, or profile-store failure.
pub fn install(
    manifest: &Ruleset,
    manifest_dir: &Path,
    git: &GitClient,
    profiles: &ProfileStore,
) -> Result<InstallOutcome, ResolveError> {
    let mut lockfile = Lockfile::new();
    let mut rows = Vec::with_capacity(manifest.dependencies.len());
    let mut counts: BTreeMap<String, usize> =
        [("git", 0), ("local", 0), ("profile", 0)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();

    for (index, dep) in manifest.dependencies.iter().enumerate() {
        debug!(index, source = %dep.kind(), reference = dep.reference(), "resolving dependency");
        let export = dep.export().unwrap_or("");
        match dep {
            Dependency::Git {
                uri,
                version,
                reference,
                ..
            } => {
                let repo_dir = git.ensure_repo(uri).map_err(|source| ResolveError::Prepare {
                    uri: uri.clone(),
                    source,
                })?;
                let resolution = git
                    .resolve(&repo_dir, reference.as_deref(), version.as_deref())
                    .map_err(|source| ResolveError::Resolve {
                        uri: uri.clone(),
                        source,
                    })?;
                let reader = CommitFileReader::new(git, &repo_dir, &resolution.commit);
                expand_dependency(&reader, export, &resolution.commit)?;
                rows.push(ResolvedRow {
                    index: index + 1,
                    source: SourceKind::Git,
                    reference: uri.clone(),
                    export: export.to_string(),
                    resolved: resolution.requested.clone(),
                    hash: crate::config::short12(&resolution.commit).to_string(),
                });
                lockfile.resolved.push(LockedSource {
                    source: SourceKind::Git,
                    uri: uri.clone(),
                    requested: resolution.requested,
                    resolved_version: resolution.resolved_version.unwrap_or_default(),
                    commit: resolution.commit,
                    export: export.to_string(),
                    ..LockedSource::default()
                });
                *counts.entry("git".to_string()).or_default() += 1;
            }
            Dependency::Local { path, .. } => {
                let (abs_path, rel_path) = resolve_local_path(manifest_dir, path)?;
                let reader = DirFileReader::new(&abs_path);
                let expansion = expand_dependency(&reader, export, LOCAL_COMMIT)?;
                rows.push(ResolvedRow {
                    index: index + 1,
                    source: SourceKind::Local,
                    reference: rel_path.clone(),
                    export: export.to_string(),
                    resolved: LOCAL_COMMIT.to_string(),
                    hash: crate::config::short12(&expansion.content_hash).to_string(),
                });
                lockfile.resolved.push(LockedSource {
                    source: SourceKind::Local,
                    path: rel_path,
                    commit: LOCAL_COMMIT.to_string(),
                    content_hash: expansion.content_hash,
                    export: export.to_string(),
                    ..LockedSource::default()
                });
                *counts.entry("local".to_string()).or_default() += 1;
            }
            Dependency::Profile { profile, .. } => {
                let export = if export.is_empty() { "default" } else { export };
                let (meta, profile_dir) = profiles.resolve(profile)?;
                let reader = DirFileReader::new(&profile_dir);
                let expansion = expand_dependency(&reader, export, PROFILE_COMMIT)?;
                rows.push(ResolvedRow {
                    index: index + 1,
                    source: SourceKind::Profile,
                    reference: meta.id.clone(),
                    export: export.to_string(),
                    resolved: PROFILE_COMMIT.to_string(),
                    hash: crate::config::short12(&expansion.content_hash).to_string(),
                });
                lockfile.resolved.push(LockedSource {
                    source: SourceKind::Profile,
                    profile: meta.id,
                    commit: PROFILE_COMMIT.to_string(),
                    content_hash: expansion.content_hash,
                    export: export.to_string(),
                    ..LockedSource::default()
                });
                *counts.entry("profile".to_string()).or_default() += 1;
            }
        }
    }

    Ok(InstallOutcome {
        lockfile,
        rows,
        counts,
    })
}

/// Normalize a local dependency path against the manifest directory.
///
/// Returns the absolute pack root and the manifest-relative path with
/// forward slashes (the form persisted in the lockfile).
///
/// # Errors
///
/// Returns an error if the path does not exist, is not a directory, or
/// does not contain a pack manifest.
pub fn resolve_local_path(
    manifest_dir: &Path,
    dep_path: &str,
) -> Result<(PathBuf, String), ResolveError> {
    if dep_path.is_empty() {
        return Err(ResolveError::LocalPath {
            path: dep_path.to_string(),
            reason: "local source requires path".to_string(),
        });
    }
    let candidate = Path::new(dep_path);
    let abs_path = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        manifest_dir.join(candidate)
    };
    let abs_path = clean_path(&abs_path);
    let metadata = std::fs::metadata(&abs_path).map_err(|e| ResolveError::LocalPath {
        path: dep_path.to_string(),
        reason: e.to_string(),
    })?;
    if !metadata.is_dir() {
        return Err(ResolveError::LocalPath {
            path: dep_path.to_string(),
            reason: "not a directory".to_string(),
        });
    }
    if !abs_path.join(RULESET_FILE).exists() {
        return Err(ResolveError::LocalPath {
            path: dep_path.to_string(),
            reason: format!("missing {RULESET_FILE} at {}", abs_path.display()),
        });
    }
    let rel = relative_to(&clean_path(manifest_dir), &abs_path);
    let rel = if rel.is_empty() { ".".to_string() } else { rel };
    Ok((abs_path, rel))
}

/// Lexically clean a path: resolve `.` and `..` components without touching
/// the filesystem.
fn clean_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Compute `target` relative to `base`, with forward slashes.
fn relative_to(base: &Path, target: &Path) -> String {
    let base_parts: Vec<_> = base.components().collect();
    let target_parts: Vec<_> = target.components().collect();
    let common = base_parts
        .iter()
        .zip(target_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let mut parts: Vec<String> = Vec::new();
    for _ in common..base_parts.len() {
        parts.push("..".to_string());
    }
    for component in &target_parts[common..] {
        parts.push(component.as_os_str().to_string_lossy().into_owned());
    }
    parts.join("/")
}
