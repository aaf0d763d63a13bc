//! Implementation of the `rulepack deps` subcommands.

use crate::confirm::confirm_risk_action;
use crate::output::{Event, HumanPayload, Renderer, Table};
use anyhow::bail;
use clap::{Args, Subcommand};
use rulepack_core::config::{Dependency, Lockfile, Ruleset, LOCK_FILE, RULESET_FILE};
use rulepack_core::git::GitClient;
use rulepack_core::ops;
use rulepack_core::profile::ProfileStore;
use rulepack_core::resolver::resolve_local_path;
use serde::Serialize;
use std::path::{Component, Path};

#[derive(Subcommand)]
pub enum DepsCommand {
    /// Add a dependency to rulepack.json
    Add(AddArgs),

    /// List dependencies configured in rulepack.json
    List,

    /// Remove one or more dependencies from rulepack.json
    #[command(alias = "uninstall")]
    Remove(RemoveArgs),

    /// Resolve dependencies and write rulepack.lock.json
    Install,

    /// Check whether dependencies have newer resolvable revisions
    Outdated,
}

impl DepsCommand {
    pub fn name(&self) -> String {
        match self {
            Self::Add(_) => "add".to_string(),
            Self::List => "deps.list".to_string(),
            Self::Remove(_) => "remove".to_string(),
            Self::Install => "install".to_string(),
            Self::Outdated => "outdated".to_string(),
        }
    }
}

#[derive(Args)]
pub struct AddArgs {
    /// Git repository URL
    git_url: Option<String>,

    /// Local rulepack path
    #[arg(long)]
    local: Option<String>,

    /// Export name from rulepack
    #[arg(long)]
    export: Option<String>,

    /// Semver range
    #[arg(long)]
    version: Option<String>,

    /// Ref (commit/tag/branch)
    #[arg(long = "ref")]
    reference: Option<String>,

    /// Confirm risky replacement without prompting
    #[arg(long)]
    yes: bool,
}

#[derive(Args)]
pub struct RemoveArgs {
    /// Dependency selectors (index or source ref)
    #[arg(required = true)]
    selectors: Vec<String>,

    /// Confirm dependency removal without prompting
    #[arg(long)]
    yes: bool,
}

pub fn run(manifest_dir: &Path, renderer: &Renderer, command: DepsCommand) -> anyhow::Result<()> {
    match command {
        DepsCommand::Add(args) => run_add(manifest_dir, renderer, args),
        DepsCommand::List => run_list(manifest_dir, renderer),
        DepsCommand::Remove(args) => run_remove(manifest_dir, renderer, args),
        DepsCommand::Install => run_install(manifest_dir, renderer),
        DepsCommand::Outdated => run_outdated(manifest_dir, renderer),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AddOutput {
    ruleset_file: String,
    action: String,
    dependency: Dependency,
}

fn run_add(manifest_dir: &Path, renderer: &Renderer, args: AddArgs) -> anyhow::Result<()> {
    let has_git = args.git_url.is_some();
    let has_local = args
        .local
        .as_deref()
        .is_some_and(|p| !p.trim().is_empty());
    match (has_git, has_local) {
        (true, true) => bail!("use either <git-url> or --local <path>, not both"),
        (false, false) => bail!("missing source: provide <git-url> or --local <path>"),
        _ => {}
    }
    if has_local && (args.version.is_some() || args.reference.is_some()) {
        bail!("--version and --ref are only supported for git dependencies");
    }
    if args.version.is_some() && args.reference.is_some() {
        bail!("use only one of --version or --ref");
    }

    let ruleset_path = manifest_dir.join(RULESET_FILE);
    let mut manifest = if ruleset_path.exists() {
        Ruleset::load(&ruleset_path)?
    } else {
        let name = manifest_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "rulepack".to_string());
        Ruleset::starter(&name)
    };

    let dep = if let Some(local) = args.local.as_deref().filter(|p| !p.trim().is_empty()) {
        let (_, normalized) = resolve_local_path(manifest_dir, local)?;
        Dependency::Local {
            path: normalized,
            export: args.export,
        }
    } else {
        Dependency::Git {
            uri: args.git_url.unwrap_or_default(),
            version: args.version,
            reference: args.reference,
            export: args.export,
        }
    };
    let key = match_key(&dep);

    let mut action = "added";
    let mut old = None;
    for existing in &mut manifest.dependencies {
        if existing.kind() == dep.kind() && match_key(existing) == key {
            old = Some(existing.clone());
            *existing = dep.clone();
            action = "replaced";
            break;
        }
    }
    if old.is_none() {
        manifest.dependencies.push(dep.clone());
    }

    confirm_risk_action(
        renderer.json_mode(),
        args.yes,
        old.is_some(),
        &format!("add would replace existing dependency \"{key}\""),
        &format!("Replace existing dependency \"{key}\" in {RULESET_FILE}?"),
        &[
            format!("old {}", dep_summary(old.as_ref())),
            format!("new {}", dep_summary(Some(&dep))),
        ],
        "add",
    )?;

    manifest.save(&ruleset_path)?;

    let output = AddOutput {
        ruleset_file: RULESET_FILE.to_string(),
        action: action.to_string(),
        dependency: dep.clone(),
    };
    let old_fields = dep_fields(old.as_ref());
    let new_fields = dep_fields(Some(&dep));
    let rows = ["source", "uri", "path", "export", "version", "ref"]
        .iter()
        .enumerate()
        .map(|(i, field)| {
            vec![
                (*field).to_string(),
                old_fields[i].clone(),
                new_fields[i].clone(),
            ]
        })
        .collect();
    renderer.emit(
        "add",
        &output,
        HumanPayload {
            title: "Dependency Updated",
            events: vec![Event::info(format!("Action: {action}"))],
            tables: vec![Table {
                title: "Dependency Diff",
                columns: vec!["Field", "Old", "New"],
                rows,
            }],
            done: "Updated rulepack.json",
            ..HumanPayload::default()
        },
    )
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DepsListRow {
    index: usize,
    source: String,
    #[serde(rename = "ref")]
    reference: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    export: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    locked: String,
}

#[derive(Serialize)]
struct DepsListOutput {
    dependencies: Vec<DepsListRow>,
}

fn run_list(manifest_dir: &Path, renderer: &Renderer) -> anyhow::Result<()> {
    let manifest = Ruleset::load(manifest_dir.join(RULESET_FILE))?;
    let lock_path = manifest_dir.join(LOCK_FILE);
    let lock = if lock_path.exists() {
        Lockfile::load(&lock_path).unwrap_or_default()
    } else {
        Lockfile::default()
    };

    let rows: Vec<DepsListRow> = manifest
        .dependencies
        .iter()
        .enumerate()
        .map(|(i, dep)| {
            let reference = if dep.reference().is_empty() {
                "-".to_string()
            } else {
                dep.reference().to_string()
            };
            DepsListRow {
                index: i + 1,
                source: dep.kind().to_string(),
                reference,
                export: dep.export().unwrap_or_default().to_string(),
                locked: lock
                    .resolved
                    .get(i)
                    .map(|l| l.display_reference())
                    .unwrap_or_default(),
            }
        })
        .collect();

    let table_rows = rows
        .iter()
        .map(|r| {
            vec![
                r.index.to_string(),
                r.source.clone(),
                r.reference.clone(),
                r.export.clone(),
                r.locked.clone(),
            ]
        })
        .collect();
    renderer.emit(
        "deps.list",
        &DepsListOutput { dependencies: rows },
        HumanPayload {
            title: "Dependencies",
            tables: vec![Table {
                title: "Configured Dependencies",
                columns: vec!["#", "Source", "Ref/Path/Profile", "Export", "Locked"],
                rows: table_rows,
            }],
            done: "Dependency listing complete",
            ..HumanPayload::default()
        },
    )
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RemovedRow {
    index: usize,
    source: String,
    #[serde(rename = "ref")]
    reference: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    export: String,
    dependency: Dependency,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RemoveOutput {
    ruleset_file: String,
    removed: Vec<RemovedRow>,
    remaining: usize,
}

fn run_remove(manifest_dir: &Path, renderer: &Renderer, args: RemoveArgs) -> anyhow::Result<()> {
    let ruleset_path = manifest_dir.join(RULESET_FILE);
    let mut manifest = Ruleset::load(&ruleset_path)?;

    let mut to_remove = std::collections::BTreeSet::new();
    for selector in &args.selectors {
        to_remove.insert(ops::find_dependency_index(&manifest, selector)?);
    }

    let mut removed = Vec::with_capacity(to_remove.len());
    let mut kept = Vec::with_capacity(manifest.dependencies.len() - to_remove.len());
    for (index, dep) in manifest.dependencies.iter().enumerate() {
        if to_remove.contains(&index) {
            removed.push(RemovedRow {
                index: index + 1,
                source: dep.kind().to_string(),
                reference: dep.reference().to_string(),
                export: dep.export().unwrap_or_default().to_string(),
                dependency: dep.clone(),
            });
        } else {
            kept.push(dep.clone());
        }
    }

    let preview: Vec<String> = removed
        .iter()
        .map(|r| format!("#{} {} {} export={}", r.index, r.source, r.reference, r.export))
        .collect();
    confirm_risk_action(
        renderer.json_mode(),
        args.yes,
        !removed.is_empty(),
        &format!(
            "remove would delete {} dependency entries from {RULESET_FILE}",
            removed.len()
        ),
        &format!(
            "Remove {} dependency entries from {RULESET_FILE}?",
            removed.len()
        ),
        &preview,
        "remove",
    )?;

    manifest.dependencies = kept;
    manifest.save(&ruleset_path)?;

    let remaining = manifest.dependencies.len();
    let rows = removed
        .iter()
        .map(|r| {
            vec![
                r.index.to_string(),
                r.source.clone(),
                r.reference.clone(),
                r.export.clone(),
            ]
        })
        .collect();
    let mut events = Vec::new();
    if removed.len() > 1 {
        events.push(Event::info(format!("Removed {} dependencies", removed.len())));
    }
    renderer.emit(
        "remove",
        &RemoveOutput {
            ruleset_file: RULESET_FILE.to_string(),
            removed,
            remaining,
        },
        HumanPayload {
            title: "Dependencies Removed",
            events,
            tables: vec![Table {
                title: "Removed Dependencies",
                columns: vec!["#", "Source", "Ref/Path/Profile", "Export"],
                rows,
            }],
            summary: [("remaining", remaining.to_string())].into_iter().collect(),
            done: "Updated rulepack.json",
        },
    )
}

fn run_install(manifest_dir: &Path, renderer: &Renderer) -> anyhow::Result<()> {
    let git = GitClient::new()?;
    let profiles = ProfileStore::open_default()?;
    let output = ops::install(manifest_dir, &git, &profiles)?;

    let rows = output
        .resolved
        .iter()
        .map(|r| {
            vec![
                r.index.to_string(),
                r.source.to_string(),
                r.reference.clone(),
                r.export.clone(),
                r.resolved.clone(),
                r.hash.clone(),
            ]
        })
        .collect();
    let mut summary: std::collections::BTreeMap<&'static str, String> = [
        ("lock file", LOCK_FILE.to_string()),
    ]
    .into_iter()
    .collect();
    summary.insert("git", output.counts["git"].to_string());
    summary.insert("local", output.counts["local"].to_string());
    summary.insert("profile", output.counts["profile"].to_string());
    renderer.emit(
        "install",
        &output,
        HumanPayload {
            title: "Install Dependencies",
            tables: vec![Table {
                title: "Resolved Dependencies",
                columns: vec!["#", "Source", "Ref/Path/Profile", "Export", "Resolved", "Hash/Commit"],
                rows,
            }],
            summary,
            done: "Install complete",
            ..HumanPayload::default()
        },
    )
}

fn run_outdated(manifest_dir: &Path, renderer: &Renderer) -> anyhow::Result<()> {
    let git = GitClient::new()?;
    let output = ops::outdated(manifest_dir, &git)?;

    let rows = output
        .dependencies
        .iter()
        .map(|r| {
            vec![
                r.index.to_string(),
                r.source.clone(),
                r.reference.clone(),
                r.locked.clone(),
                r.latest.clone(),
                r.update_status.clone(),
            ]
        })
        .collect();
    renderer.emit(
        "outdated",
        &output,
        HumanPayload {
            title: "Dependency Update Check",
            tables: vec![Table {
                title: "Dependency Status",
                columns: vec!["#", "Source", "Ref/Path/Profile", "Locked", "Latest", "Status"],
                rows,
            }],
            summary: [
                ("outdated", output.outdated_count.to_string()),
                ("total", output.dependencies.len().to_string()),
            ]
            .into_iter()
            .collect(),
            done: "Outdated check complete",
            ..HumanPayload::default()
        },
    )
}

/// Key used to detect that an added dependency replaces an existing one.
fn match_key(dep: &Dependency) -> String {
    match dep {
        Dependency::Local { path, .. } => clean_slash(path),
        _ => dep.reference().to_string(),
    }
}

fn clean_slash(path: &str) -> String {
    let mut parts: Vec<String> = Vec::new();
    for component in Path::new(&path.replace('\\', "/")).components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if parts.last().is_some_and(|p| p != "..") {
                    parts.pop();
                } else {
                    parts.push("..".to_string());
                }
            }
            other => parts.push(other.as_os_str().to_string_lossy().into_owned()),
        }
    }
    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

fn dep_fields(dep: Option<&Dependency>) -> [String; 6] {
    let Some(dep) = dep else {
        return std::array::from_fn(|_| String::new());
    };
    let mut fields: [String; 6] = std::array::from_fn(|_| String::new());
    fields[0] = dep.kind().to_string();
    fields[3] = dep.export().unwrap_or_default().to_string();
    match dep {
        Dependency::Git {
            uri,
            version,
            reference,
            ..
        } => {
            fields[1] = uri.clone();
            fields[4] = version.clone().unwrap_or_default();
            fields[5] = reference.clone().unwrap_or_default();
        }
        Dependency::Local { path, .. } => fields[2] = path.clone(),
        Dependency::Profile { profile, .. } => fields[1] = profile.clone(),
    }
    fields
}

fn dep_summary(dep: Option<&Dependency>) -> String {
    let fields = dep_fields(dep);
    format!(
        "source={:?} uri={:?} path={:?} export={:?} version={:?} ref={:?}",
        fields[0], fields[1], fields[2], fields[3], fields[4], fields[5]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_slash_normalizes_lexically() {
        assert_eq!(clean_slash("packs/./a/"), "packs/a");
        assert_eq!(clean_slash("packs/../shared"), "shared");
        assert_eq!(clean_slash("."), ".");
    }

    #[test]
    fn match_key_uses_reference_for_git() {
        let dep = Dependency::Git {
            uri: "https://example.com/a.git".to_string(),
            version: None,
            reference: None,
            export: None,
        };
        assert_eq!(match_key(&dep), "https://example.com/a.git");
    }
}
