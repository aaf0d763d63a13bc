//! Implementation of the `rulepack profile` subcommands.

use crate::confirm::confirm_risk_action;
use crate::output::{Event, HumanPayload, Renderer, Table};
use anyhow::bail;
use clap::{Args, Subcommand};
use rulepack_core::config::short12;
use rulepack_core::git::GitClient;
use rulepack_core::ops::{self, SaveScope};
use rulepack_core::profile::{Metadata, ProfileStore};
use serde::Serialize;
use std::io::{BufRead, IsTerminal, Write};
use std::path::Path;

#[derive(Subcommand)]
pub enum ProfileCommand {
    /// Save dependencies as a globally reusable local profile snapshot
    Save(SaveArgs),

    /// List globally saved profiles in a table
    List,

    /// Show details for a saved profile
    Show {
        /// Profile id or alias
        reference: String,
    },

    /// Add/update dependency to use a saved global profile
    Use {
        /// Profile id or alias
        reference: String,
    },

    /// Remove one or all saved profiles
    #[command(alias = "delete")]
    Remove(RemoveArgs),

    /// Compare a saved profile snapshot with its current source
    Diff(DiffArgs),

    /// Refresh a saved profile from its original source
    Refresh(RefreshArgs),
}

impl ProfileCommand {
    pub fn name(&self) -> String {
        match self {
            Self::Save(_) => "profile.save".to_string(),
            Self::List => "profile.list".to_string(),
            Self::Show { .. } => "profile.show".to_string(),
            Self::Use { .. } => "profile.use".to_string(),
            Self::Remove(_) => "profile.remove".to_string(),
            Self::Diff(_) => "profile.diff".to_string(),
            Self::Refresh(_) => "profile.refresh".to_string(),
        }
    }
}

#[derive(Args)]
pub struct SaveArgs {
    /// Dependency selector (index or source ref); omit to snapshot all
    #[arg(long)]
    dep: Option<String>,

    /// Profile alias (required; prompts in interactive terminals)
    #[arg(long)]
    alias: Option<String>,

    /// Switch dependency config to saved profile source
    #[arg(long)]
    switch: bool,
}

#[derive(Args)]
pub struct RemoveArgs {
    /// Profile id or alias
    reference: Option<String>,

    /// Remove all saved profiles
    #[arg(long)]
    all: bool,

    /// Confirm deletion without prompting
    #[arg(long)]
    yes: bool,
}

#[derive(Args)]
pub struct DiffArgs {
    /// Profile id or alias
    reference: String,

    /// Diff only specific module IDs/patterns
    #[arg(long = "rule")]
    rules: Vec<String>,
}

#[derive(Args)]
pub struct RefreshArgs {
    /// Profile id or alias
    reference: String,

    /// Create a new profile ID instead of updating in place
    #[arg(long)]
    new_id: bool,

    /// Refresh only specific module IDs/patterns
    #[arg(long = "rule")]
    rules: Vec<String>,

    /// Preview refresh result without writing profile files
    #[arg(long)]
    dry_run: bool,

    /// Confirm risky in-place refresh without prompting
    #[arg(long)]
    yes: bool,
}

pub fn run(manifest_dir: &Path, renderer: &Renderer, command: ProfileCommand) -> anyhow::Result<()> {
    match command {
        ProfileCommand::Save(args) => run_save(manifest_dir, renderer, args),
        ProfileCommand::List => run_list(renderer),
        ProfileCommand::Show { reference } => run_show(renderer, &reference),
        ProfileCommand::Use { reference } => run_use(manifest_dir, renderer, &reference),
        ProfileCommand::Remove(args) => run_remove(renderer, args),
        ProfileCommand::Diff(args) => run_diff(renderer, args),
        ProfileCommand::Refresh(args) => run_refresh(renderer, args),
    }
}

fn run_save(manifest_dir: &Path, renderer: &Renderer, args: SaveArgs) -> anyhow::Result<()> {
    let alias = resolve_alias(renderer, args.alias)?;
    let git = GitClient::new()?;
    let profiles = ProfileStore::open_default()?;
    let scope = match args.dep {
        Some(selector) => SaveScope::Dep(selector),
        None => SaveScope::All,
    };
    let output = ops::profile_save(
        manifest_dir,
        &git,
        &profiles,
        &scope,
        Some(alias),
        args.switch,
    )?;

    let meta = &output.profile;
    let mut events = vec![Event::info(format!("Scope: {}", output.scope))];
    if output.switched {
        events.push(Event::info(
            "Switched dependencies to profile source and refreshed lockfile",
        ));
    }
    let mut tables = vec![Table {
        title: "Snapshot",
        columns: vec!["Profile ID", "Alias", "Source", "Export", "Modules", "Content Hash"],
        rows: vec![vec![
            meta.id.clone(),
            meta.alias.clone(),
            meta.source_summary(),
            "default".to_string(),
            meta.module_count.to_string(),
            short12(&meta.content_hash).to_string(),
        ]],
    }];
    if !output.updated_dependencies.is_empty() {
        tables.push(Table {
            title: "Dependency Updates",
            columns: vec!["#", "Old Ref", "Profile ID"],
            rows: output
                .updated_dependencies
                .iter()
                .map(|u| vec![u.index.to_string(), u.old_ref.clone(), u.profile_id.clone()])
                .collect(),
        });
    }
    renderer.emit(
        "profile.save",
        &output,
        HumanPayload {
            title: "Profile Saved",
            events,
            tables,
            done: "Profile save complete",
            ..HumanPayload::default()
        },
    )
}

fn resolve_alias(renderer: &Renderer, alias: Option<String>) -> anyhow::Result<String> {
    if let Some(alias) = alias.map(|a| a.trim().to_string()).filter(|a| !a.is_empty()) {
        return Ok(alias);
    }
    if renderer.json_mode() || !std::io::stdin().is_terminal() {
        bail!("profile save requires --alias in non-interactive mode");
    }
    let mut stderr = std::io::stderr();
    let stdin = std::io::stdin();
    loop {
        let _ = write!(stderr, "Enter profile alias: ");
        let _ = stderr.flush();
        let mut line = String::new();
        stdin.lock().read_line(&mut line)?;
        let line = line.trim();
        if !line.is_empty() {
            return Ok(line.to_string());
        }
        let _ = writeln!(stderr, "Alias cannot be empty");
    }
}

#[derive(Serialize)]
struct ProfileListOutput {
    profiles: Vec<Metadata>,
}

fn run_list(renderer: &Renderer) -> anyhow::Result<()> {
    let profiles = ProfileStore::open_default()?;
    let all = profiles.list()?;

    let rows = all
        .iter()
        .map(|p| {
            vec![
                p.id.clone(),
                if p.alias.is_empty() {
                    "-".to_string()
                } else {
                    p.alias.clone()
                },
                p.source_summary(),
                "default".to_string(),
                p.module_count.to_string(),
                p.created_at.clone(),
            ]
        })
        .collect();
    let mut events = Vec::new();
    if all.is_empty() {
        events.push(Event::info("No saved profiles"));
    }
    renderer.emit(
        "profile.list",
        &ProfileListOutput { profiles: all },
        HumanPayload {
            title: "Saved Profiles",
            events,
            tables: vec![Table {
                title: "Profiles",
                columns: vec!["Profile ID", "Alias", "Source", "Export", "Modules", "Created"],
                rows,
            }],
            done: "List complete",
            ..HumanPayload::default()
        },
    )
}

#[derive(Serialize)]
struct ProfileShowOutput {
    profile: Metadata,
    path: String,
}

fn run_show(renderer: &Renderer, reference: &str) -> anyhow::Result<()> {
    let profiles = ProfileStore::open_default()?;
    let (meta, path) = profiles.resolve(reference)?;
    let path = path.display().to_string();

    let rows = vec![
        vec!["id".to_string(), meta.id.clone()],
        vec!["alias".to_string(), meta.alias.clone()],
        vec!["sources".to_string(), meta.source_summary()],
        vec!["createdAt".to_string(), meta.created_at.clone()],
        vec!["contentHash".to_string(), short12(&meta.content_hash).to_string()],
        vec!["moduleCount".to_string(), meta.module_count.to_string()],
        vec!["path".to_string(), path.clone()],
    ];
    renderer.emit(
        "profile.show",
        &ProfileShowOutput {
            profile: meta,
            path,
        },
        HumanPayload {
            title: "Profile Details",
            tables: vec![Table {
                title: "Profile",
                columns: vec!["Field", "Value"],
                rows,
            }],
            done: "Profile details shown",
            ..HumanPayload::default()
        },
    )
}

fn run_use(manifest_dir: &Path, renderer: &Renderer, reference: &str) -> anyhow::Result<()> {
    let profiles = ProfileStore::open_default()?;
    let output = ops::profile_use(manifest_dir, &profiles, reference)?;
    renderer.emit(
        "profile.use",
        &output,
        HumanPayload {
            title: "Profile Applied",
            events: vec![
                Event::info(format!("Action: {}", output.action)),
                Event::info(format!("Profile: {}", output.profile_id)),
            ],
            done: "Updated rulepack.json",
            ..HumanPayload::default()
        },
    )
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RemovedProfileRow {
    profile_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    alias: String,
    path: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProfileRemoveOutput {
    count: usize,
    removed_profiles: Vec<RemovedProfileRow>,
}

fn run_remove(renderer: &Renderer, args: RemoveArgs) -> anyhow::Result<()> {
    if args.all && args.reference.is_some() {
        bail!("profile remove --all does not accept an id or alias");
    }
    if !args.all && args.reference.is_none() {
        bail!("profile remove requires an id or alias (or --all)");
    }
    let profiles = ProfileStore::open_default()?;

    let (fact, prompt) = if args.all {
        (
            "profile remove would delete all saved profiles".to_string(),
            "Remove all saved profiles?".to_string(),
        )
    } else {
        let reference = args.reference.as_deref().unwrap_or_default();
        (
            format!("profile remove would delete saved profile \"{reference}\""),
            format!("Remove saved profile \"{reference}\"?"),
        )
    };
    confirm_risk_action(
        renderer.json_mode(),
        args.yes,
        true,
        &fact,
        &prompt,
        &[],
        "profile remove",
    )?;

    let removed: Vec<RemovedProfileRow> = if args.all {
        let root = profiles.root().to_path_buf();
        profiles
            .remove_all()?
            .into_iter()
            .map(|meta| RemovedProfileRow {
                path: root.join(&meta.id).display().to_string(),
                profile_id: meta.id,
                alias: meta.alias,
            })
            .collect()
    } else {
        let (meta, path) = profiles.remove(args.reference.as_deref().unwrap_or_default())?;
        vec![RemovedProfileRow {
            profile_id: meta.id,
            alias: meta.alias,
            path: path.display().to_string(),
        }]
    };

    let rows = removed
        .iter()
        .map(|r| vec![r.profile_id.clone(), r.alias.clone(), r.path.clone()])
        .collect();
    let mut events = Vec::new();
    if args.all {
        events.push(Event::warn("Removed all saved profiles"));
    }
    let count = removed.len();
    renderer.emit(
        "profile.remove",
        &ProfileRemoveOutput {
            count,
            removed_profiles: removed,
        },
        HumanPayload {
            title: "Profiles Removed",
            events,
            tables: vec![Table {
                title: "Removed Profiles",
                columns: vec!["Profile ID", "Alias", "Path"],
                rows,
            }],
            summary: [("count", count.to_string())].into_iter().collect(),
            done: "Profile removal complete",
        },
    )
}

fn run_diff(renderer: &Renderer, args: DiffArgs) -> anyhow::Result<()> {
    let git = GitClient::new()?;
    let profiles = ProfileStore::open_default()?;
    let output = ops::profile_diff(&git, &profiles, &args.reference, &args.rules)?;

    let mut rows = Vec::new();
    for id in &output.changed_modules {
        rows.push(vec!["changed".to_string(), id.clone()]);
    }
    for id in &output.added_modules {
        rows.push(vec!["added".to_string(), id.clone()]);
    }
    for id in &output.removed_modules {
        rows.push(vec!["removed".to_string(), id.clone()]);
    }
    let mut events = Vec::new();
    if !args.rules.is_empty() {
        events.push(Event::info(format!(
            "Filtered by selectors: {}",
            args.rules.join(", ")
        )));
    }
    for skipped in &output.skipped_sources {
        events.push(Event::warn(format!(
            "Skipped source {}: {}",
            skipped.source, skipped.reason
        )));
    }
    if rows.is_empty() {
        events.push(Event::info("No differences found"));
    }
    renderer.emit(
        "profile.diff",
        &output,
        HumanPayload {
            title: "Profile Diff",
            events,
            tables: vec![Table {
                title: "Module Changes",
                columns: vec!["Type", "Module ID"],
                rows,
            }],
            summary: [
                ("profile", output.profile_id.clone()),
                ("source", output.source_ref.clone()),
                ("currentHash", short12(&output.current_hash).to_string()),
                ("freshHash", short12(&output.fresh_hash).to_string()),
            ]
            .into_iter()
            .collect(),
            done: "Profile diff complete",
        },
    )
}

fn run_refresh(renderer: &Renderer, args: RefreshArgs) -> anyhow::Result<()> {
    let git = GitClient::new()?;
    let profiles = ProfileStore::open_default()?;
    let plan = ops::plan_profile_refresh(
        &git,
        &profiles,
        &args.reference,
        args.new_id,
        &args.rules,
        args.dry_run,
    )?;

    let preview = plan.preview();
    confirm_risk_action(
        renderer.json_mode(),
        args.yes,
        plan.in_place_with_diff(),
        &format!(
            "profile refresh would update profile \"{}\" in place with module diffs",
            plan.meta.id
        ),
        &format!(
            "Refresh profile \"{}\" in place with {} module change(s)?",
            plan.meta.id,
            preview.len()
        ),
        &preview,
        "profile refresh",
    )?;

    let dry_run = plan.dry_run;
    let output = ops::execute_profile_refresh(&profiles, plan)?;

    let mut tables = vec![Table {
        title: "Refresh Result",
        columns: vec!["Old Profile", "New Profile", "In Place", "Source"],
        rows: vec![vec![
            output.old_profile_id.clone(),
            output.new_profile_id.clone(),
            if output.in_place { "yes" } else { "no" }.to_string(),
            output.source.clone(),
        ]],
    }];
    if !output.refreshed_rules.is_empty() {
        tables.push(Table {
            title: "Refreshed Rules",
            columns: vec!["Module ID"],
            rows: output
                .refreshed_rules
                .iter()
                .map(|id| vec![id.clone()])
                .collect(),
        });
    }
    if !output.skipped_sources.is_empty() {
        tables.push(Table {
            title: "Skipped Sources",
            columns: vec!["Source", "Reason"],
            rows: output
                .skipped_sources
                .iter()
                .map(|s| vec![s.source.clone(), s.reason.clone()])
                .collect(),
        });
    }
    let message = if dry_run {
        "Dry run only; no profile files were written"
    } else {
        "Profile files updated"
    };
    renderer.emit(
        "profile.refresh",
        &output,
        HumanPayload {
            title: "Profile Refreshed",
            events: vec![Event::info(message)],
            tables,
            done: "Profile refresh complete",
            ..HumanPayload::default()
        },
    )
}
