//! Implementation of `rulepack doctor`.

use crate::output::{HumanPayload, Renderer, Table};
use rulepack_core::ops;
use std::path::Path;

pub fn run(manifest_dir: &Path, renderer: &Renderer) -> anyhow::Result<()> {
    let output = ops::doctor(manifest_dir);

    let rows = output
        .checks
        .iter()
        .map(|c| vec![c.name.clone(), c.status.clone(), c.details.clone()])
        .collect();
    renderer.emit(
        "doctor",
        &output,
        HumanPayload {
            title: "Diagnostics",
            tables: vec![Table {
                title: "Checks",
                columns: vec!["Check", "Status", "Details"],
                rows,
            }],
            done: "Doctor run complete",
            ..HumanPayload::default()
        },
    )
}
