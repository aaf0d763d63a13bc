//! Implementation of `rulepack build`.

use crate::confirm::confirm_risk_action;
use crate::output::{Event, HumanPayload, Renderer, Table};
use clap::Args;
use rulepack_core::git::GitClient;
use rulepack_core::ops;
use rulepack_core::profile::ProfileStore;
use std::path::Path;

#[derive(Args)]
pub struct BuildArgs {
    /// Target: cursor|copilot|codex|all
    #[arg(long, default_value = "all")]
    target: String,

    /// Confirm risky overwrites without prompting
    #[arg(long)]
    yes: bool,
}

pub fn run(manifest_dir: &Path, renderer: &Renderer, args: BuildArgs) -> anyhow::Result<()> {
    let git = GitClient::new()?;
    let profiles = ProfileStore::open_default()?;
    let plan = ops::plan_build(manifest_dir, &git, &profiles, &args.target)?;

    let collisions = plan.unmanaged_overwrites.len();
    confirm_risk_action(
        renderer.json_mode(),
        args.yes,
        collisions > 0,
        &format!("build detected {collisions} unmanaged cursor overwrite collision(s)"),
        &format!("Build will overwrite {collisions} existing non-rulepack cursor file(s). Continue?"),
        &plan.unmanaged_overwrites,
        "build",
    )?;

    let output = ops::execute_build(plan)?;

    let rows = output
        .targets
        .iter()
        .map(|r| vec![r.target.clone(), r.output.clone(), r.status.clone()])
        .collect();
    let events = output.warnings.iter().map(Event::warn).collect();
    renderer.emit(
        "build",
        &output,
        HumanPayload {
            title: "Build Outputs",
            events,
            tables: vec![Table {
                title: "Build Targets",
                columns: vec!["Target", "Output", "Status"],
                rows,
            }],
            summary: [
                ("moduleCount", output.module_count.to_string()),
                ("duplicates", "none".to_string()),
            ]
            .into_iter()
            .collect(),
            done: "Build complete",
        },
    )
}
