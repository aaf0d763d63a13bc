//! Top-level operations sequencing the resolver, composer, profile store,
//! and renderers.
//!
//! Operations return typed, serializable results for the command surface to
//! render. Anything risky (replacing files a user authored, refreshing a
//! profile in place) is surfaced as facts in a plan; this module never
//! prompts, and writes happen in a single shot at the end of each
//! operation.

use crate::compose::{self, ComposeError};
use crate::config::{
    short12, Dependency, LockedSource, Lockfile, Ruleset, SourceKind, LOCAL_COMMIT, LOCK_FILE,
    PROFILE_COMMIT, RULESET_FILE,
};
use crate::git::{GitClient, GitError};
use crate::pack::{
    expand_dependency, id_matches_any, CommitFileReader, DirFileReader, Module, PackError,
};
use crate::profile::{self, Metadata, ProfileError, ProfileStore, SaveInput, SourceSnapshot};
use crate::render::{self, CursorTarget, RenderError};
use crate::resolver::{self, resolve_local_path, ResolveError, ResolvedRow};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Errors surfaced by driver operations.
#[derive(Error, Debug)]
pub enum OpError {
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Pack(#[from] PackError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Compose(#[from] ComposeError),

    #[error(transparent)]
    Profile(#[from] ProfileError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("target \"{0}\" not configured")]
    TargetNotConfigured(String),

    #[error("unsupported target \"{0}\"")]
    UnsupportedTarget(String),

    #[error("dependency selector \"{0}\" not found")]
    SelectorNotFound(String),

    #[error("selector \"{0}\" matched multiple dependencies")]
    SelectorAmbiguous(String),

    #[error("dependency index {0} out of range")]
    SelectorOutOfRange(i64),

    #[error("cannot save profile: dependency not installed; run rulepack deps install")]
    NotInstalled,

    #[error("rule {0} not found in refreshed source")]
    RuleNotFound(String),

    #[error("no rules matched --rule selectors")]
    NoRulesMatched,

    #[error("profile {0} local source is not absolute; cannot refresh safely")]
    ProfileSourceNotAbsolute(String),
}

/// Result of `deps install`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallOutput {
    pub lock_file: String,
    pub resolved: Vec<ResolvedRow>,
    pub counts: BTreeMap<String, usize>,
}

/// Resolve every dependency and write the lockfile.
///
/// # Errors
///
/// Returns the first resolution failure; the lockfile is untouched on
/// error.
pub fn install(
    manifest_dir: &Path,
    git: &GitClient,
    profiles: &ProfileStore,
) -> Result<InstallOutput, OpError> {
    let manifest = Ruleset::load(manifest_dir.join(RULESET_FILE))?;
    let outcome = resolver::install(&manifest, manifest_dir, git, profiles)?;
    outcome.lockfile.save(manifest_dir.join(LOCK_FILE))?;
    info!(dependencies = outcome.rows.len(), "lockfile written");
    Ok(InstallOutput {
        lock_file: LOCK_FILE.to_string(),
        resolved: outcome.rows,
        counts: outcome.counts,
    })
}

/// One row of the build report.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildTargetRow {
    pub target: String,
    pub output: String,
    pub status: String,
}

/// Result of `build`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildOutput {
    pub module_count: usize,
    pub targets: Vec<BuildTargetRow>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// A composed build ready to write, carrying the risk facts the caller
/// must gate on.
#[derive(Debug)]
pub struct BuildPlan {
    manifest_dir: PathBuf,
    manifest: Ruleset,
    target_names: Vec<String>,
    pub modules: Vec<Module>,
    /// Existing output files that are not managed by this tool.
    pub unmanaged_overwrites: Vec<String>,
    pub warnings: Vec<String>,
}

/// Compose modules and preflight every requested target without writing
/// anything.
///
/// # Errors
///
/// Returns an error on lockfile misalignment, source drift, duplicate
/// module ids, an unconfigured target, or an invalid apply mode.
pub fn plan_build(
    manifest_dir: &Path,
    git: &GitClient,
    profiles: &ProfileStore,
    target: &str,
) -> Result<BuildPlan, OpError> {
    let manifest = Ruleset::load(manifest_dir.join(RULESET_FILE))?;
    let lock = Lockfile::load(manifest_dir.join(LOCK_FILE))?;
    let modules = compose::compose(&manifest, manifest_dir, &lock, git, profiles)?;

    let target_names = resolve_targets(target);
    let mut unmanaged = Vec::new();
    let mut warnings = Vec::new();
    for name in &target_names {
        let entry = manifest
            .targets
            .get(name)
            .ok_or_else(|| OpError::TargetNotConfigured(name.clone()))?;
        if name == "cursor" {
            let cursor = CursorTarget::from_entry(manifest_dir, entry);
            for path in render::cursor_unmanaged_overwrites(&cursor, &modules)? {
                let display = path.display().to_string();
                warnings.push(format!(
                    "cursor output will overwrite existing non-rulepack file: {display}"
                ));
                unmanaged.push(display);
            }
        }
    }

    Ok(BuildPlan {
        manifest_dir: manifest_dir.to_path_buf(),
        manifest,
        target_names,
        modules,
        unmanaged_overwrites: unmanaged,
        warnings,
    })
}

/// Write every target in a planned build.
///
/// # Errors
///
/// Returns an error on an unsupported target or a write failure.
pub fn execute_build(plan: BuildPlan) -> Result<BuildOutput, OpError> {
    let mut rows = Vec::with_capacity(plan.target_names.len());
    for name in &plan.target_names {
        let entry = plan
            .manifest
            .targets
            .get(name)
            .ok_or_else(|| OpError::TargetNotConfigured(name.clone()))?;
        match name.as_str() {
            "cursor" => {
                let cursor = CursorTarget::from_entry(&plan.manifest_dir, entry);
                render::write_cursor(&cursor, &plan.modules)?;
                let output = if entry.out_dir.is_empty() {
                    ".cursor/rules".to_string()
                } else {
                    entry.out_dir.clone()
                };
                rows.push(BuildTargetRow {
                    target: name.clone(),
                    output,
                    status: "ok".to_string(),
                });
            }
            "copilot" | "codex" => {
                if entry.out_file.is_empty() {
                    return Err(RenderError::MissingOutFile.into());
                }
                let out_file = plan.manifest_dir.join(&entry.out_file);
                render::write_merged(&out_file, &plan.modules)?;
                rows.push(BuildTargetRow {
                    target: name.clone(),
                    output: entry.out_file.clone(),
                    status: "ok".to_string(),
                });
            }
            other => return Err(OpError::UnsupportedTarget(other.to_string())),
        }
    }
    info!(modules = plan.modules.len(), targets = rows.len(), "build written");
    Ok(BuildOutput {
        module_count: plan.modules.len(),
        targets: rows,
        warnings: plan.warnings,
    })
}

fn resolve_targets(target: &str) -> Vec<String> {
    let target = target.to_lowercase();
    if target.is_empty() || target == "all" {
        return vec!["cursor".into(), "copilot".into(), "codex".into()];
    }
    vec![target]
}

/// One row of the outdated report.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutdatedEntry {
    pub index: usize,
    pub source: String,
    pub reference: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub locked: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub latest: String,
    pub update_status: String,
}

/// Result of `deps outdated`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutdatedOutput {
    pub checked_at: String,
    pub dependencies: Vec<OutdatedEntry>,
    pub outdated_count: usize,
}

/// Check whether git dependencies have newer resolvable revisions. Local
/// and profile sources report `n/a`; per-dependency transport failures are
/// recorded in the row instead of failing the run.
///
/// # Errors
///
/// Returns an error if the project files cannot be loaded or are
/// misaligned.
pub fn outdated(manifest_dir: &Path, git: &GitClient) -> Result<OutdatedOutput, OpError> {
    let manifest = Ruleset::load(manifest_dir.join(RULESET_FILE))?;
    let lock = Lockfile::load(manifest_dir.join(LOCK_FILE))?;
    if manifest.dependencies.len() != lock.resolved.len() {
        return Err(ComposeError::LengthMismatch.into());
    }

    let mut rows = Vec::with_capacity(manifest.dependencies.len());
    let mut outdated_count = 0;
    for (index, dep) in manifest.dependencies.iter().enumerate() {
        let locked = &lock.resolved[index];
        let mut entry = OutdatedEntry {
            index: index + 1,
            source: dep.kind().to_string(),
            reference: dep.reference().to_string(),
            ..OutdatedEntry::default()
        };
        match dep {
            Dependency::Git {
                uri,
                version,
                reference,
                ..
            } => {
                let latest = git.ensure_repo(uri).and_then(|repo_dir| {
                    git.resolve(&repo_dir, reference.as_deref(), version.as_deref())
                });
                match latest {
                    Ok(resolution) => {
                        entry.locked = short12(&locked.commit).to_string();
                        entry.latest = short12(&resolution.commit).to_string();
                        if !locked.commit.is_empty() && resolution.commit != locked.commit {
                            entry.update_status = "outdated".to_string();
                            outdated_count += 1;
                        } else {
                            entry.update_status = "up-to-date".to_string();
                        }
                    }
                    Err(e) => {
                        entry.update_status = "error".to_string();
                        entry.latest = e.to_string();
                    }
                }
            }
            Dependency::Local { .. } | Dependency::Profile { .. } => {
                entry.locked = locked.display_reference();
                entry.latest = "-".to_string();
                entry.update_status = "n/a".to_string();
            }
        }
        rows.push(entry);
    }

    Ok(OutdatedOutput {
        checked_at: chrono::Utc::now().to_rfc3339(),
        dependencies: rows,
        outdated_count,
    })
}

/// One environment check.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DoctorCheck {
    pub name: String,
    pub status: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub details: String,
}

/// Result of `doctor`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DoctorOutput {
    pub checks: Vec<DoctorCheck>,
}

/// Validate the environment, project files, and profile store. Never
/// fails; every problem becomes a check row.
#[must_use]
pub fn doctor(manifest_dir: &Path) -> DoctorOutput {
    let mut checks = Vec::new();
    let check = |name: &str, status: &str, details: String| DoctorCheck {
        name: name.to_string(),
        status: status.to_string(),
        details,
    };

    let ruleset_path = manifest_dir.join(RULESET_FILE);
    if ruleset_path.exists() {
        checks.push(check("ruleset file", "ok", String::new()));
    } else {
        checks.push(check("ruleset file", "fail", "not found".to_string()));
    }
    let manifest = Ruleset::load(&ruleset_path);
    match &manifest {
        Ok(_) => checks.push(check("ruleset parse", "ok", String::new())),
        Err(e) => checks.push(check("ruleset parse", "fail", e.to_string())),
    }
    match Lockfile::load(manifest_dir.join(LOCK_FILE)) {
        Ok(lock) => {
            checks.push(check("lockfile", "ok", String::new()));
            if let Ok(manifest) = &manifest {
                if manifest.dependencies.len() == lock.resolved.len() {
                    checks.push(check("lock alignment", "ok", String::new()));
                } else {
                    checks.push(check(
                        "lock alignment",
                        "fail",
                        "dependency count differs from lockfile".to_string(),
                    ));
                }
            }
        }
        Err(e) => checks.push(check("lockfile", "warn", e.to_string())),
    }
    match ProfileStore::open_default() {
        Ok(store) => {
            let root = store.root().display().to_string();
            if store.root().exists() {
                checks.push(check("profile store", "ok", root));
            } else {
                checks.push(check("profile store", "warn", format!("{root} (not created yet)")));
            }
        }
        Err(e) => checks.push(check("profile store", "fail", e.to_string())),
    }
    match GitClient::new() {
        Ok(_) => checks.push(check("git client", "ok", String::new())),
        Err(e) => checks.push(check("git client", "fail", e.to_string())),
    }

    DoctorOutput { checks }
}

/// Scope of a profile save.
#[derive(Debug, Clone)]
pub enum SaveScope {
    /// Snapshot every dependency into one combined profile.
    All,
    /// Snapshot a single dependency picked by selector.
    Dep(String),
}

/// One dependency switched to a profile source by `profile save --switch`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencySwitch {
    pub index: usize,
    pub old_ref: String,
    pub profile_id: String,
}

/// Result of `profile save`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSaveOutput {
    pub profile: Metadata,
    pub switched: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dependency_index: Option<usize>,
    pub scope: String,
    pub source_count: usize,
    pub combined: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub updated_dependencies: Vec<DependencySwitch>,
}

/// Save resolved dependencies as a global profile snapshot, optionally
/// switching the project to depend on the snapshot.
///
/// # Errors
///
/// Returns an error if the project is not installed, the selected
/// dependency drifted since install, or the store rejects the save.
pub fn profile_save(
    manifest_dir: &Path,
    git: &GitClient,
    profiles: &ProfileStore,
    scope: &SaveScope,
    alias: Option<String>,
    switch: bool,
) -> Result<ProfileSaveOutput, OpError> {
    let mut manifest = Ruleset::load(manifest_dir.join(RULESET_FILE))?;
    let lock = Lockfile::load(manifest_dir.join(LOCK_FILE))?;
    if manifest.dependencies.len() != lock.resolved.len() {
        return Err(OpError::NotInstalled);
    }

    let mut updated = Vec::new();
    let (meta, scope_name, source_count, combined, dependency_index) = match scope {
        SaveScope::Dep(selector) => {
            let index = find_dependency_index(&manifest, selector)?;
            let dep = manifest.dependencies[index].clone();
            let (modules, source) =
                expand_dependency_for_snapshot(manifest_dir, git, profiles, &dep, &lock.resolved[index])?;
            let hash = profile::content_hash(&modules, dep.export().unwrap_or(""));
            let meta = profiles.save(SaveInput {
                id: None,
                alias,
                sources: vec![source],
                content_hash: hash,
                modules,
            })?;
            if switch {
                updated.push(DependencySwitch {
                    index: index + 1,
                    old_ref: dep.reference().to_string(),
                    profile_id: meta.id.clone(),
                });
                manifest.dependencies[index] = Dependency::Profile {
                    profile: meta.id.clone(),
                    export: Some("default".to_string()),
                };
            }
            (meta, "dep", 1, false, Some(index))
        }
        SaveScope::All => {
            let mut modules = Vec::new();
            let mut sources = Vec::with_capacity(manifest.dependencies.len());
            for (index, dep) in manifest.dependencies.iter().enumerate() {
                let (expanded, source) = expand_dependency_for_snapshot(
                    manifest_dir,
                    git,
                    profiles,
                    dep,
                    &lock.resolved[index],
                )?;
                modules.extend(expanded);
                sources.push(source);
            }
            let modules = compose::apply_overrides(modules, &manifest.overrides);
            compose::check_duplicate_ids(&modules)?;
            let mut modules = modules;
            compose::sort_modules(&mut modules);
            let hash = profile::content_hash(&modules, "default");
            let source_count = sources.len();
            let meta = profiles.save(SaveInput {
                id: None,
                alias,
                sources,
                content_hash: hash,
                modules,
            })?;
            if switch {
                for (index, dep) in manifest.dependencies.iter().enumerate() {
                    updated.push(DependencySwitch {
                        index: index + 1,
                        old_ref: dep.reference().to_string(),
                        profile_id: meta.id.clone(),
                    });
                }
                manifest.dependencies = vec![Dependency::Profile {
                    profile: meta.id.clone(),
                    export: Some("default".to_string()),
                }];
            }
            (meta, "all", source_count, true, None)
        }
    };

    if switch {
        manifest.save(manifest_dir.join(RULESET_FILE))?;
        let outcome = resolver::install(&manifest, manifest_dir, git, profiles)?;
        outcome.lockfile.save(manifest_dir.join(LOCK_FILE))?;
    }

    Ok(ProfileSaveOutput {
        profile: meta,
        switched: switch,
        dependency_index: dependency_index.map(|i| i + 1),
        scope: scope_name.to_string(),
        source_count,
        combined,
        updated_dependencies: updated,
    })
}

/// Result of `profile use`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUseOutput {
    pub profile_id: String,
    pub action: String,
    pub ruleset_file: String,
}

/// Add or update a dependency pointing at a saved profile.
///
/// # Errors
///
/// Returns an error if the profile cannot be resolved or the ruleset
/// cannot be written.
pub fn profile_use(
    manifest_dir: &Path,
    profiles: &ProfileStore,
    reference: &str,
) -> Result<ProfileUseOutput, OpError> {
    let (meta, _) = profiles.resolve(reference)?;
    let mut manifest = Ruleset::load(manifest_dir.join(RULESET_FILE))?;
    let dep = Dependency::Profile {
        profile: meta.id.clone(),
        export: Some("default".to_string()),
    };
    let mut action = "added";
    let existing = manifest
        .dependencies
        .iter()
        .position(|d| matches!(d, Dependency::Profile { profile, .. } if profile == &meta.id));
    if let Some(index) = existing {
        manifest.dependencies[index] = dep;
        action = "updated";
    } else {
        manifest.dependencies.push(dep);
    }
    manifest.save(manifest_dir.join(RULESET_FILE))?;
    Ok(ProfileUseOutput {
        profile_id: meta.id,
        action: action.to_string(),
        ruleset_file: RULESET_FILE.to_string(),
    })
}

/// A profile source that could not be re-resolved during a best-effort
/// diff or refresh.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedSource {
    pub source: String,
    pub reason: String,
}

/// Result of `profile diff`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileDiffOutput {
    pub profile_id: String,
    pub source_type: String,
    pub source_ref: String,
    pub current_hash: String,
    pub fresh_hash: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub changed_modules: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub added_modules: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub removed_modules: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub refreshed_sources: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped_sources: Vec<SkippedSource>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rule_selectors: Vec<String>,
    pub updated_at: String,
}

/// Compare a saved snapshot with its current sources, best effort: sources
/// that fail to resolve are reported as skipped and their modules treated
/// as unchanged.
///
/// # Errors
///
/// Returns an error if the profile cannot be resolved or its snapshot
/// cannot be expanded.
pub fn profile_diff(
    git: &GitClient,
    profiles: &ProfileStore,
    reference: &str,
    rules: &[String],
) -> Result<ProfileDiffOutput, OpError> {
    let (meta, profile_dir) = profiles.resolve(reference)?;
    let reader = DirFileReader::new(&profile_dir);
    let current = expand_dependency(&reader, "default", PROFILE_COMMIT)?.modules;
    let (fresh, refreshed_sources, skipped_sources) =
        resolve_fresh_modules(git, profiles, &meta, &current);

    let (current, fresh) = if rules.is_empty() {
        (current, fresh)
    } else {
        (
            filter_modules(current, rules),
            filter_modules(fresh, rules),
        )
    };
    let (changed, added, removed) = diff_modules(&current, &fresh);

    Ok(ProfileDiffOutput {
        profile_id: meta.id.clone(),
        source_type: "combined".to_string(),
        source_ref: meta.source_summary(),
        current_hash: profile::content_hash(&current, "default"),
        fresh_hash: profile::content_hash(&fresh, "default"),
        changed_modules: changed,
        added_modules: added,
        removed_modules: removed,
        refreshed_sources,
        skipped_sources,
        rule_selectors: rules.to_vec(),
        updated_at: chrono::Utc::now().to_rfc3339(),
    })
}

/// Result of `profile refresh`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileRefreshOutput {
    pub old_profile_id: String,
    pub new_profile_id: String,
    #[serde(rename = "refreshedRules", skip_serializing_if = "Vec::is_empty")]
    pub refreshed_rules: Vec<String>,
    pub source: String,
    pub in_place: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub dry_run: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub refreshed_sources: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped_sources: Vec<SkippedSource>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub changed_modules: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub added_modules: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub removed_modules: Vec<String>,
}

/// A refresh ready to execute, with the in-place-with-diff risk fact.
#[derive(Debug)]
pub struct ProfileRefreshPlan {
    pub meta: Metadata,
    pub merged_modules: Vec<Module>,
    pub refreshed_rules: Vec<String>,
    pub changed_modules: Vec<String>,
    pub added_modules: Vec<String>,
    pub removed_modules: Vec<String>,
    pub refreshed_sources: Vec<String>,
    pub skipped_sources: Vec<SkippedSource>,
    pub new_id: bool,
    pub dry_run: bool,
}

impl ProfileRefreshPlan {
    /// True when executing would rewrite an existing snapshot in place
    /// with module changes.
    #[must_use]
    pub fn in_place_with_diff(&self) -> bool {
        !self.new_id
            && !self.dry_run
            && (!self.changed_modules.is_empty()
                || !self.added_modules.is_empty()
                || !self.removed_modules.is_empty())
    }

    /// Preview lines describing the pending module changes.
    #[must_use]
    pub fn preview(&self) -> Vec<String> {
        let mut out = Vec::new();
        for id in &self.changed_modules {
            out.push(format!("changed: {id}"));
        }
        for id in &self.added_modules {
            out.push(format!("added: {id}"));
        }
        for id in &self.removed_modules {
            out.push(format!("removed: {id}"));
        }
        out
    }
}

/// Re-resolve a snapshot's sources and merge fresh content, without
/// writing anything.
///
/// With `rules`, only matching modules are replaced or added; everything
/// else is preserved from the snapshot.
///
/// # Errors
///
/// Returns an error if the profile cannot be resolved, a rule names a
/// module absent from the refreshed sources, or no rule matches.
pub fn plan_profile_refresh(
    git: &GitClient,
    profiles: &ProfileStore,
    reference: &str,
    new_id: bool,
    rules: &[String],
    dry_run: bool,
) -> Result<ProfileRefreshPlan, OpError> {
    let (meta, profile_dir) = profiles.resolve(reference)?;
    let reader = DirFileReader::new(&profile_dir);
    let old = expand_dependency(&reader, "default", PROFILE_COMMIT)?.modules;
    let (fresh, refreshed_sources, skipped_sources) =
        resolve_fresh_modules(git, profiles, &meta, &old);

    let (merged, refreshed_rules) = merge_refreshed_modules(&old, fresh, rules)?;
    let (changed, added, removed) = diff_modules(&old, &merged);

    Ok(ProfileRefreshPlan {
        meta,
        merged_modules: merged,
        refreshed_rules,
        changed_modules: changed,
        added_modules: added,
        removed_modules: removed,
        refreshed_sources,
        skipped_sources,
        new_id,
        dry_run,
    })
}

/// Persist a planned refresh (or report it, for a dry run).
///
/// # Errors
///
/// Returns an error if the snapshot cannot be written.
pub fn execute_profile_refresh(
    profiles: &ProfileStore,
    plan: ProfileRefreshPlan,
) -> Result<ProfileRefreshOutput, OpError> {
    let new_hash = profile::content_hash(&plan.merged_modules, "default");
    let new_profile_id = if plan.dry_run {
        if plan.new_id {
            "dry-run:new-id".to_string()
        } else {
            plan.meta.id.clone()
        }
    } else {
        let alias = if plan.meta.alias.is_empty() {
            None
        } else {
            Some(plan.meta.alias.clone())
        };
        let saved = profiles.save(SaveInput {
            id: (!plan.new_id).then(|| plan.meta.id.clone()),
            alias,
            sources: plan.meta.sources.clone(),
            content_hash: new_hash,
            modules: plan.merged_modules.clone(),
        })?;
        saved.id
    };

    Ok(ProfileRefreshOutput {
        old_profile_id: plan.meta.id.clone(),
        new_profile_id,
        refreshed_rules: plan.refreshed_rules,
        source: plan.meta.source_summary(),
        in_place: !plan.new_id,
        dry_run: plan.dry_run,
        refreshed_sources: plan.refreshed_sources,
        skipped_sources: plan.skipped_sources,
        changed_modules: plan.changed_modules,
        added_modules: plan.added_modules,
        removed_modules: plan.removed_modules,
    })
}

/// Resolve a dependency selector: a 1-based index or a unique source
/// reference.
///
/// # Errors
///
/// Returns an error when nothing (or more than one dependency) matches.
pub fn find_dependency_index(manifest: &Ruleset, selector: &str) -> Result<usize, OpError> {
    if let Ok(n) = selector.parse::<i64>() {
        let len = manifest.dependencies.len() as i64;
        if n >= 1 && n <= len {
            return Ok((n - 1) as usize);
        }
        if n >= 0 && n < len {
            return Ok(n as usize);
        }
        return Err(OpError::SelectorOutOfRange(n));
    }
    let mut found = None;
    for (index, dep) in manifest.dependencies.iter().enumerate() {
        if dep.reference() == selector {
            if found.is_some() {
                return Err(OpError::SelectorAmbiguous(selector.to_string()));
            }
            found = Some(index);
        }
    }
    found.ok_or_else(|| OpError::SelectorNotFound(selector.to_string()))
}

fn expand_dependency_for_snapshot(
    manifest_dir: &Path,
    git: &GitClient,
    profiles: &ProfileStore,
    dep: &Dependency,
    locked: &LockedSource,
) -> Result<(Vec<Module>, SourceSnapshot), OpError> {
    if dep.kind() != locked.source {
        return Err(OpError::NotInstalled);
    }
    let export = dep.export().unwrap_or("");
    match dep {
        Dependency::Git {
            uri,
            version,
            reference,
            ..
        } => {
            if uri != &locked.uri {
                return Err(OpError::NotInstalled);
            }
            let repo_dir = git.ensure_repo(uri)?;
            let reader = CommitFileReader::new(git, &repo_dir, &locked.commit);
            let expansion = expand_dependency(&reader, export, &locked.commit)?;
            let request_type = if version.is_some() {
                "version"
            } else if reference.is_some() {
                "ref"
            } else {
                "head"
            };
            let mut provenance = BTreeMap::new();
            provenance.insert("commit".to_string(), locked.commit.clone());
            provenance.insert("requested".to_string(), locked.requested.clone());
            provenance.insert(
                "resolvedVersion".to_string(),
                locked.resolved_version.clone(),
            );
            provenance.insert("requestType".to_string(), request_type.to_string());
            let source = snapshot_source(SourceKind::Git, uri, export, provenance, &expansion.modules);
            Ok((expansion.modules, source))
        }
        Dependency::Local { path, .. } => {
            let (abs_path, rel_path) = resolve_local_path(manifest_dir, path)?;
            if !locked.path.is_empty() && rel_path != locked.path {
                return Err(OpError::NotInstalled);
            }
            let reader = DirFileReader::new(&abs_path);
            let expansion = expand_dependency(&reader, export, LOCAL_COMMIT)?;
            if !locked.content_hash.is_empty() && expansion.content_hash != locked.content_hash {
                return Err(OpError::NotInstalled);
            }
            let mut provenance = BTreeMap::new();
            provenance.insert("path".to_string(), rel_path);
            provenance.insert("contentHash".to_string(), expansion.content_hash.clone());
            let source = snapshot_source(
                SourceKind::Local,
                &abs_path.display().to_string(),
                export,
                provenance,
                &expansion.modules,
            );
            Ok((expansion.modules, source))
        }
        Dependency::Profile { profile, .. } => {
            let export = if export.is_empty() { "default" } else { export };
            let (meta, profile_dir) = profiles.resolve(profile)?;
            if !locked.profile.is_empty() && meta.id != locked.profile {
                return Err(OpError::NotInstalled);
            }
            let reader = DirFileReader::new(&profile_dir);
            let expansion = expand_dependency(&reader, export, PROFILE_COMMIT)?;
            if !locked.content_hash.is_empty() && expansion.content_hash != locked.content_hash {
                return Err(OpError::NotInstalled);
            }
            let mut provenance = BTreeMap::new();
            provenance.insert("profile".to_string(), meta.id.clone());
            provenance.insert("contentHash".to_string(), expansion.content_hash.clone());
            let source = snapshot_source(
                SourceKind::Profile,
                &meta.id,
                export,
                provenance,
                &expansion.modules,
            );
            Ok((expansion.modules, source))
        }
    }
}

fn snapshot_source(
    source_type: SourceKind,
    source_ref: &str,
    export: &str,
    provenance: BTreeMap<String, String>,
    modules: &[Module],
) -> SourceSnapshot {
    let mut module_ids: Vec<String> = modules.iter().map(|m| m.id.clone()).collect();
    module_ids.sort();
    SourceSnapshot {
        source_type,
        source_ref: source_ref.to_string(),
        source_export: export.to_string(),
        provenance,
        module_ids,
    }
}

fn dependency_from_source(source: &SourceSnapshot, profile_id: &str) -> Result<Dependency, OpError> {
    let export = if source.source_export.is_empty() {
        None
    } else {
        Some(source.source_export.clone())
    };
    match source.source_type {
        SourceKind::Git => {
            let requested = source.provenance.get("requested").cloned().unwrap_or_default();
            let request_type = source
                .provenance
                .get("requestType")
                .map(String::as_str)
                .unwrap_or_default();
            let (version, reference) = match request_type {
                "version" => (Some(requested), None),
                "ref" => (None, Some(requested)),
                // Older snapshots carry no requestType; a non-HEAD request
                // can only have been a ref.
                _ => {
                    if requested.is_empty() || requested == "HEAD" {
                        (None, None)
                    } else {
                        (None, Some(requested))
                    }
                }
            };
            Ok(Dependency::Git {
                uri: source.source_ref.clone(),
                version,
                reference,
                export,
            })
        }
        SourceKind::Local => {
            if !Path::new(&source.source_ref).is_absolute() {
                return Err(OpError::ProfileSourceNotAbsolute(profile_id.to_string()));
            }
            Ok(Dependency::Local {
                path: source.source_ref.clone(),
                export,
            })
        }
        SourceKind::Profile => Ok(Dependency::Profile {
            profile: source.source_ref.clone(),
            export,
        }),
    }
}

fn resolve_modules_for_dependency(
    git: &GitClient,
    profiles: &ProfileStore,
    dep: &Dependency,
) -> Result<Vec<Module>, OpError> {
    let export = dep.export().unwrap_or("");
    match dep {
        Dependency::Git {
            uri,
            version,
            reference,
            ..
        } => {
            let repo_dir = git.ensure_repo(uri)?;
            let resolution = git.resolve(&repo_dir, reference.as_deref(), version.as_deref())?;
            let reader = CommitFileReader::new(git, &repo_dir, &resolution.commit);
            Ok(expand_dependency(&reader, export, &resolution.commit)?.modules)
        }
        Dependency::Local { path, .. } => {
            let reader = DirFileReader::new(Path::new(path));
            Ok(expand_dependency(&reader, export, LOCAL_COMMIT)?.modules)
        }
        Dependency::Profile { profile, .. } => {
            let (_, profile_dir) = profiles.resolve(profile)?;
            let reader = DirFileReader::new(&profile_dir);
            Ok(expand_dependency(&reader, "default", PROFILE_COMMIT)?.modules)
        }
    }
}

/// Re-resolve every recorded source of a snapshot, best effort.
///
/// A source that fails keeps its current modules and lands in the skipped
/// list with the failure reason.
fn resolve_fresh_modules(
    git: &GitClient,
    profiles: &ProfileStore,
    meta: &Metadata,
    current: &[Module],
) -> (Vec<Module>, Vec<String>, Vec<SkippedSource>) {
    let mut fresh = Vec::new();
    let mut refreshed = Vec::new();
    let mut skipped = Vec::new();
    for source in &meta.sources {
        let resolved = dependency_from_source(source, &meta.id)
            .and_then(|dep| resolve_modules_for_dependency(git, profiles, &dep));
        match resolved {
            Ok(modules) => {
                fresh.extend(modules);
                refreshed.push(source.summary());
            }
            Err(e) => {
                let ids: HashSet<&str> = source.module_ids.iter().map(String::as_str).collect();
                fresh.extend(
                    current
                        .iter()
                        .filter(|m| ids.contains(m.id.as_str()))
                        .cloned(),
                );
                skipped.push(SkippedSource {
                    source: source.summary(),
                    reason: e.to_string(),
                });
            }
        }
    }
    (fresh, refreshed, skipped)
}

/// Merge freshly resolved modules into a snapshot's current list.
///
/// Without rules the fresh list wins wholesale. With rules, matching
/// modules are replaced (or added) and the rest are preserved.
fn merge_refreshed_modules(
    current: &[Module],
    mut fresh: Vec<Module>,
    rules: &[String],
) -> Result<(Vec<Module>, Vec<String>), OpError> {
    if rules.is_empty() {
        let mut refreshed: Vec<String> = fresh.iter().map(|m| m.id.clone()).collect();
        refreshed.sort();
        compose::sort_modules(&mut fresh);
        return Ok((fresh, refreshed));
    }

    let fresh_by_id: HashMap<&str, &Module> =
        fresh.iter().map(|m| (m.id.as_str(), m)).collect();
    let mut changed: HashSet<String> = HashSet::new();
    let mut out = Vec::with_capacity(current.len());
    for module in current {
        if id_matches_any(&module.id, rules) {
            let Some(replacement) = fresh_by_id.get(module.id.as_str()) else {
                return Err(OpError::RuleNotFound(module.id.clone()));
            };
            out.push((*replacement).clone());
            changed.insert(module.id.clone());
        } else {
            out.push(module.clone());
        }
    }
    for module in &fresh {
        if changed.contains(&module.id) {
            continue;
        }
        if id_matches_any(&module.id, rules) {
            out.push(module.clone());
            changed.insert(module.id.clone());
        }
    }
    if changed.is_empty() {
        return Err(OpError::NoRulesMatched);
    }
    compose::sort_modules(&mut out);
    let mut refreshed: Vec<String> = changed.into_iter().collect();
    refreshed.sort();
    Ok((out, refreshed))
}

fn filter_modules(modules: Vec<Module>, patterns: &[String]) -> Vec<Module> {
    modules
        .into_iter()
        .filter(|m| id_matches_any(&m.id, patterns))
        .collect()
}

/// Diff two module lists by content digest, returning sorted
/// (changed, added, removed) id lists.
fn diff_modules(current: &[Module], fresh: &[Module]) -> (Vec<String>, Vec<String>, Vec<String>) {
    let current_by_id: HashMap<&str, &Module> =
        current.iter().map(|m| (m.id.as_str(), m)).collect();
    let fresh_by_id: HashMap<&str, &Module> = fresh.iter().map(|m| (m.id.as_str(), m)).collect();

    let mut changed = Vec::new();
    let mut removed = Vec::new();
    for (id, old) in &current_by_id {
        match fresh_by_id.get(id) {
            Some(new) => {
                if module_digest(old) != module_digest(new) {
                    changed.push((*id).to_string());
                }
            }
            None => removed.push((*id).to_string()),
        }
    }
    let mut added: Vec<String> = fresh_by_id
        .keys()
        .filter(|id| !current_by_id.contains_key(**id))
        .map(|id| (*id).to_string())
        .collect();
    changed.sort();
    added.sort();
    removed.sort();
    (changed, added, removed)
}

fn module_digest(module: &Module) -> String {
    let apply_json = serde_json::to_string(&module.apply).unwrap_or_default();
    let input = format!(
        "{}|{}|{}|{}",
        module.id, module.priority, module.content, apply_json
    );
    hex::encode(Sha256::digest(input.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        git: GitClient,
        profiles: ProfileStore,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let git = GitClient::with_cache_root(dir.path().join("cache"));
            let profiles = ProfileStore::with_root(dir.path().join("profile-store"));
            Self { dir, git, profiles }
        }

        fn project(&self) -> PathBuf {
            let project = self.dir.path().join("project");
            fs::create_dir_all(&project).unwrap();
            project
        }

        fn write_pack(&self, name: &str, modules: &[(&str, i32, &str)]) -> PathBuf {
            let pack_dir = self.dir.path().join(name);
            fs::create_dir_all(pack_dir.join("mods")).unwrap();
            let entries: Vec<String> = modules
                .iter()
                .map(|(id, priority, _)| {
                    format!(
                        r#"    {{"id": "{id}", "path": "mods/{}.md", "priority": {priority}}}"#,
                        crate::pack::sanitize_module_id(id)
                    )
                })
                .collect();
            fs::write(
                pack_dir.join(RULESET_FILE),
                format!(
                    "{{\n  \"specVersion\": \"0.1\",\n  \"name\": \"{name}\",\n  \"version\": \"1.0.0\",\n  \"modules\": [\n{}\n  ]\n}}\n",
                    entries.join(",\n")
                ),
            )
            .unwrap();
            for (id, _, content) in modules {
                fs::write(
                    pack_dir
                        .join("mods")
                        .join(format!("{}.md", crate::pack::sanitize_module_id(id))),
                    content,
                )
                .unwrap();
            }
            pack_dir
        }

        fn write_project(&self, project: &Path, dep_paths: &[&str]) {
            let mut manifest = Ruleset::starter("test-project");
            for path in dep_paths {
                manifest.dependencies.push(Dependency::Local {
                    path: (*path).to_string(),
                    export: None,
                });
            }
            manifest.save(project.join(RULESET_FILE)).unwrap();
        }
    }

    #[test]
    fn install_then_build_writes_all_targets() {
        let fx = Fixture::new();
        let project = fx.project();
        fx.write_pack("pack-a", &[("a.base", 100, "alpha\n")]);
        fx.write_project(&project, &["../pack-a"]);

        install(&project, &fx.git, &fx.profiles).unwrap();
        let plan = plan_build(&project, &fx.git, &fx.profiles, "all").unwrap();
        assert!(plan.unmanaged_overwrites.is_empty());
        let output = execute_build(plan).unwrap();

        assert_eq!(output.module_count, 1);
        assert_eq!(output.targets.len(), 3);
        assert!(project.join(".cursor/rules/100-a_base.mdc").exists());
        assert!(project.join(".github/copilot-instructions.md").exists());
        assert!(project.join(".codex/rules.md").exists());
    }

    #[test]
    fn build_flags_unmanaged_collision_and_overwrites_after_execute() {
        let fx = Fixture::new();
        let project = fx.project();
        fx.write_pack("pack-a", &[("python.base", 100, "managed\n")]);
        fx.write_project(&project, &["../pack-a"]);
        install(&project, &fx.git, &fx.profiles).unwrap();

        let rules_dir = project.join(".cursor/rules");
        fs::create_dir_all(&rules_dir).unwrap();
        fs::write(rules_dir.join("100-python_base.mdc"), "manual rule\n").unwrap();

        let plan = plan_build(&project, &fx.git, &fx.profiles, "cursor").unwrap();
        assert_eq!(plan.unmanaged_overwrites.len(), 1);
        assert!(plan.unmanaged_overwrites[0].ends_with("100-python_base.mdc"));

        execute_build(plan).unwrap();
        let replaced = fs::read_to_string(rules_dir.join("100-python_base.mdc")).unwrap();
        assert!(render::is_managed_content(&replaced));

        // The managed file is no longer a collision on the next plan.
        let plan = plan_build(&project, &fx.git, &fx.profiles, "cursor").unwrap();
        assert!(plan.unmanaged_overwrites.is_empty());
    }

    #[test]
    fn unconfigured_target_fails_planning() {
        let fx = Fixture::new();
        let project = fx.project();
        fx.write_project(&project, &[]);
        install(&project, &fx.git, &fx.profiles).unwrap();

        let mut manifest = Ruleset::load(project.join(RULESET_FILE)).unwrap();
        manifest.targets.remove("codex");
        manifest.save(project.join(RULESET_FILE)).unwrap();

        let err = plan_build(&project, &fx.git, &fx.profiles, "codex").unwrap_err();
        assert!(matches!(err, OpError::TargetNotConfigured(_)));
    }

    #[test]
    fn profile_save_single_dep_and_switch_round_trips_through_build() {
        let fx = Fixture::new();
        let project = fx.project();
        fx.write_pack("pack-a", &[("a.base", 100, "alpha\n")]);
        fx.write_project(&project, &["../pack-a"]);
        install(&project, &fx.git, &fx.profiles).unwrap();

        let output = profile_save(
            &project,
            &fx.git,
            &fx.profiles,
            &SaveScope::Dep("1".to_string()),
            Some("base".to_string()),
            true,
        )
        .unwrap();
        assert!(output.switched);
        assert_eq!(output.scope, "dep");
        assert_eq!(output.profile.sources.len(), 1);
        assert_eq!(output.profile.module_count, 1);

        // The project now depends on the profile and still builds.
        let manifest = Ruleset::load(project.join(RULESET_FILE)).unwrap();
        assert!(matches!(
            manifest.dependencies[0],
            Dependency::Profile { .. }
        ));
        let plan = plan_build(&project, &fx.git, &fx.profiles, "copilot").unwrap();
        let built = execute_build(plan).unwrap();
        assert_eq!(built.module_count, 1);
    }

    #[test]
    fn profile_save_all_combines_sources() {
        let fx = Fixture::new();
        let project = fx.project();
        fx.write_pack("pack-a", &[("a.base", 100, "alpha\n")]);
        fx.write_pack("pack-b", &[("b.base", 200, "beta\n")]);
        fx.write_project(&project, &["../pack-a", "../pack-b"]);
        install(&project, &fx.git, &fx.profiles).unwrap();

        let output = profile_save(
            &project,
            &fx.git,
            &fx.profiles,
            &SaveScope::All,
            Some("combined".to_string()),
            false,
        )
        .unwrap();
        assert!(output.combined);
        assert_eq!(output.source_count, 2);
        assert_eq!(output.profile.module_count, 2);
        assert_eq!(output.profile.sources.len(), 2);
    }

    #[test]
    fn profile_save_requires_install() {
        let fx = Fixture::new();
        let project = fx.project();
        fx.write_pack("pack-a", &[("a.base", 100, "alpha\n")]);
        fx.write_project(&project, &["../pack-a"]);

        Lockfile::new().save(project.join(LOCK_FILE)).unwrap();
        let err = profile_save(
            &project,
            &fx.git,
            &fx.profiles,
            &SaveScope::All,
            Some("x".to_string()),
            false,
        )
        .unwrap_err();
        assert!(matches!(err, OpError::NotInstalled));
    }

    #[test]
    fn selective_refresh_merges_matching_rules_only() {
        let fx = Fixture::new();
        let project = fx.project();
        fx.write_pack(
            "pack-a",
            &[("python.base", 100, "old python\n"), ("ml.safety", 200, "safety\n")],
        );
        fx.write_project(&project, &["../pack-a"]);
        install(&project, &fx.git, &fx.profiles).unwrap();
        profile_save(
            &project,
            &fx.git,
            &fx.profiles,
            &SaveScope::Dep("1".to_string()),
            Some("py".to_string()),
            false,
        )
        .unwrap();

        // Source gains a new module and changes an existing one.
        fx.write_pack(
            "pack-a",
            &[
                ("python.base", 100, "new python\n"),
                ("ml.safety", 200, "safety\n"),
                ("python.new", 150, "fresh\n"),
            ],
        );

        let plan = plan_profile_refresh(
            &fx.git,
            &fx.profiles,
            "py",
            false,
            &["python.*".to_string()],
            false,
        )
        .unwrap();
        assert_eq!(plan.refreshed_rules, vec!["python.base", "python.new"]);
        assert!(plan.in_place_with_diff());

        let output = execute_profile_refresh(&fx.profiles, plan).unwrap();
        assert_eq!(output.old_profile_id, output.new_profile_id);

        let (meta, dir) = fx.profiles.resolve("py").unwrap();
        assert_eq!(meta.module_count, 3);
        let refreshed = fs::read_to_string(dir.join("modules/100-python_base.md")).unwrap();
        assert_eq!(refreshed, "new python\n");
        let preserved = fs::read_to_string(dir.join("modules/200-ml_safety.md")).unwrap();
        assert_eq!(preserved, "safety\n");
        assert!(dir.join("modules/150-python_new.md").exists());
    }

    #[test]
    fn refresh_rule_missing_from_source_fails() {
        let fx = Fixture::new();
        let project = fx.project();
        fx.write_pack("pack-a", &[("python.base", 100, "python\n")]);
        fx.write_project(&project, &["../pack-a"]);
        install(&project, &fx.git, &fx.profiles).unwrap();
        profile_save(
            &project,
            &fx.git,
            &fx.profiles,
            &SaveScope::Dep("1".to_string()),
            Some("py".to_string()),
            false,
        )
        .unwrap();

        fx.write_pack("pack-a", &[("renamed.base", 100, "python\n")]);
        let err = plan_profile_refresh(
            &fx.git,
            &fx.profiles,
            "py",
            false,
            &["python.*".to_string()],
            false,
        )
        .unwrap_err();
        assert!(matches!(err, OpError::RuleNotFound(_)));
    }

    #[test]
    fn diff_reports_skipped_sources_best_effort() {
        let fx = Fixture::new();
        let project = fx.project();
        fx.write_pack("pack-a", &[("a.base", 100, "alpha\n")]);
        fx.write_pack("pack-b", &[("b.base", 200, "beta\n")]);
        fx.write_project(&project, &["../pack-a", "../pack-b"]);
        install(&project, &fx.git, &fx.profiles).unwrap();
        profile_save(
            &project,
            &fx.git,
            &fx.profiles,
            &SaveScope::All,
            Some("combined".to_string()),
            false,
        )
        .unwrap();

        // One source survives with a change, the other disappears.
        fx.write_pack("pack-a", &[("a.base", 100, "alpha v2\n")]);
        fs::remove_dir_all(fx.dir.path().join("pack-b")).unwrap();

        let output = profile_diff(&fx.git, &fx.profiles, "combined", &[]).unwrap();
        assert_eq!(output.refreshed_sources.len(), 1);
        assert_eq!(output.skipped_sources.len(), 1);
        assert!(!output.skipped_sources[0].reason.is_empty());
        assert_eq!(output.changed_modules, vec!["a.base"]);
        assert!(output.removed_modules.is_empty(), "skipped source modules are preserved");
        assert_ne!(output.current_hash, output.fresh_hash);
    }

    #[test]
    fn profile_use_adds_then_updates() {
        let fx = Fixture::new();
        let project = fx.project();
        fx.write_pack("pack-a", &[("a.base", 100, "alpha\n")]);
        fx.write_project(&project, &["../pack-a"]);
        install(&project, &fx.git, &fx.profiles).unwrap();
        let saved = profile_save(
            &project,
            &fx.git,
            &fx.profiles,
            &SaveScope::Dep("1".to_string()),
            Some("base".to_string()),
            false,
        )
        .unwrap();

        let first = profile_use(&project, &fx.profiles, "base").unwrap();
        assert_eq!(first.action, "added");
        assert_eq!(first.profile_id, saved.profile.id);
        let second = profile_use(&project, &fx.profiles, "base").unwrap();
        assert_eq!(second.action, "updated");

        let manifest = Ruleset::load(project.join(RULESET_FILE)).unwrap();
        assert_eq!(manifest.dependencies.len(), 2);
    }

    #[test]
    fn outdated_marks_local_sources_not_applicable() {
        let fx = Fixture::new();
        let project = fx.project();
        fx.write_pack("pack-a", &[("a.base", 100, "alpha\n")]);
        fx.write_project(&project, &["../pack-a"]);
        install(&project, &fx.git, &fx.profiles).unwrap();

        let output = outdated(&project, &fx.git).unwrap();
        assert_eq!(output.dependencies.len(), 1);
        assert_eq!(output.dependencies[0].update_status, "n/a");
        assert_eq!(output.outdated_count, 0);
    }

    #[test]
    fn selector_resolution_by_index_and_reference() {
        let mut manifest = Ruleset::starter("test");
        manifest.dependencies.push(Dependency::Local {
            path: "packs/a".to_string(),
            export: None,
        });
        manifest.dependencies.push(Dependency::Local {
            path: "packs/b".to_string(),
            export: None,
        });

        assert_eq!(find_dependency_index(&manifest, "1").unwrap(), 0);
        assert_eq!(find_dependency_index(&manifest, "packs/b").unwrap(), 1);
        assert!(matches!(
            find_dependency_index(&manifest, "9"),
            Err(OpError::SelectorOutOfRange(9))
        ));
        assert!(matches!(
            find_dependency_index(&manifest, "packs/c"),
            Err(OpError::SelectorNotFound(_))
        ));
    }

    #[test]
    fn doctor_reports_missing_project_files() {
        let fx = Fixture::new();
        let project = fx.project();
        let output = doctor(&project);
        let ruleset = output.checks.iter().find(|c| c.name == "ruleset file").unwrap();
        assert_eq!(ruleset.status, "fail");
        let lock = output.checks.iter().find(|c| c.name == "lockfile").unwrap();
        assert_eq!(lock.status, "warn");
    }
}
