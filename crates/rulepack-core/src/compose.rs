//! Lock-aligned module composition.
//!
//! Build re-expands every dependency at its pinned identity, asserts that
//! nothing drifted since install, applies overrides, rejects duplicate
//! module ids, and emits the final deterministic sequence.

use crate::config::{
    short12, Dependency, LockedSource, Lockfile, Override, Ruleset, LOCAL_COMMIT, PROFILE_COMMIT,
};
use crate::git::GitClient;
use crate::pack::{expand_dependency, CommitFileReader, DirFileReader, Module, PackError};
use crate::profile::{ProfileError, ProfileStore};
use crate::resolver::{resolve_local_path, ResolveError};
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur while composing modules from a lockfile.
#[derive(Error, Debug)]
pub enum ComposeError {
    #[error("lockfile mismatch: run rulepack deps install")]
    LengthMismatch,

    #[error("lockfile mismatch at index {index} ({left} != {right})")]
    EntryMismatch {
        index: usize,
        left: String,
        right: String,
    },

    #[error("local dependency changed; run rulepack deps install")]
    LocalDrift,

    #[error("profile snapshot drift detected; run rulepack deps install")]
    ProfileDrift,

    #[error(
        "duplicate module id \"{id}\" after composition: \
         first(pack={first_pack} version={first_version} commit={first_commit}) \
         second(pack={second_pack} version={second_version} commit={second_commit})"
    )]
    DuplicateId {
        id: String,
        first_pack: String,
        first_version: String,
        first_commit: String,
        second_pack: String,
        second_version: String,
        second_commit: String,
    },

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Pack(#[from] PackError),

    #[error(transparent)]
    Profile(#[from] ProfileError),
}

/// Compose the final module sequence for a project.
///
/// # Errors
///
/// Returns an error if the lockfile does not align with the manifest, a
/// pinned source drifted, an expansion fails, or two modules share an id.
pub fn compose(
    manifest: &Ruleset,
    manifest_dir: &std::path::Path,
    lock: &Lockfile,
    git: &GitClient,
    profiles: &ProfileStore,
) -> Result<Vec<Module>, ComposeError> {
    if manifest.dependencies.len() != lock.resolved.len() {
        return Err(ComposeError::LengthMismatch);
    }

    let mut modules = Vec::new();
    for (index, dep) in manifest.dependencies.iter().enumerate() {
        let locked = &lock.resolved[index];
        if dep.kind() != locked.source {
            return Err(ComposeError::EntryMismatch {
                index,
                left: dep.kind().to_string(),
                right: locked.source.to_string(),
            });
        }
        let export = dep.export().unwrap_or("");
        match dep {
            Dependency::Git { uri, .. } => {
                if uri != &locked.uri {
                    return Err(ComposeError::EntryMismatch {
                        index,
                        left: uri.clone(),
                        right: locked.uri.clone(),
                    });
                }
                let repo_dir = git
                    .ensure_repo(uri)
                    .map_err(|source| ResolveError::Prepare {
                        uri: uri.clone(),
                        source,
                    })?;
                let reader = CommitFileReader::new(git, &repo_dir, &locked.commit);
                let expansion = expand_dependency(&reader, export, &locked.commit)?;
                modules.extend(expansion.modules);
            }
            Dependency::Local { path, .. } => {
                let (abs_path, rel_path) = resolve_local_path(manifest_dir, path)?;
                if rel_path != locked.path {
                    return Err(ComposeError::EntryMismatch {
                        index,
                        left: rel_path,
                        right: locked.path.clone(),
                    });
                }
                let reader = DirFileReader::new(&abs_path);
                let expansion = expand_dependency(&reader, export, LOCAL_COMMIT)?;
                if expansion.content_hash != locked.content_hash {
                    return Err(ComposeError::LocalDrift);
                }
                modules.extend(expansion.modules);
            }
            Dependency::Profile { profile, .. } => {
                let export = if export.is_empty() { "default" } else { export };
                let (meta, profile_dir) = profiles.resolve(profile)?;
                if !locked.profile.is_empty() && meta.id != locked.profile {
                    return Err(ComposeError::EntryMismatch {
                        index,
                        left: meta.id,
                        right: locked.profile.clone(),
                    });
                }
                let reader = DirFileReader::new(&profile_dir);
                let expansion = expand_dependency(&reader, export, PROFILE_COMMIT)?;
                if expansion.content_hash != locked.content_hash {
                    return Err(ComposeError::ProfileDrift);
                }
                modules.extend(expansion.modules);
            }
        }
    }

    let mut modules = apply_overrides(modules, &manifest.overrides);
    check_duplicate_ids(&modules)?;
    sort_modules(&mut modules);
    Ok(modules)
}

/// Apply priority overrides by exact module id. Unknown ids are silently
/// ignored for forward compatibility.
#[must_use]
pub fn apply_overrides(mut modules: Vec<Module>, overrides: &[Override]) -> Vec<Module> {
    let index: HashMap<&str, &Override> =
        overrides.iter().map(|o| (o.id.as_str(), o)).collect();
    for module in &mut modules {
        if let Some(o) = index.get(module.id.as_str()) {
            if let Some(priority) = o.priority {
                module.priority = priority;
            }
        }
    }
    modules
}

/// Reject module sequences carrying the same id twice, naming both
/// provenances.
///
/// # Errors
///
/// Returns [`ComposeError::DuplicateId`] on the first collision.
pub fn check_duplicate_ids(modules: &[Module]) -> Result<(), ComposeError> {
    let mut seen: HashMap<&str, &Module> = HashMap::new();
    for module in modules {
        if let Some(first) = seen.get(module.id.as_str()) {
            return Err(ComposeError::DuplicateId {
                id: module.id.clone(),
                first_pack: first.pack_name.clone(),
                first_version: first.pack_version.clone(),
                first_commit: short12(&first.commit).to_string(),
                second_pack: module.pack_name.clone(),
                second_version: module.pack_version.clone(),
                second_commit: short12(&module.commit).to_string(),
            });
        }
        seen.insert(&module.id, module);
    }
    Ok(())
}

/// Sort modules by (priority asc, id asc).
pub fn sort_modules(modules: &mut [Module]) {
    modules.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
}
