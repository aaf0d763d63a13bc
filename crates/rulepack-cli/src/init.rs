//! Implementation of `rulepack init`.

use crate::output::{Event, HumanPayload, Renderer, Table};
use anyhow::bail;
use clap::Args;
use rulepack_core::config::{Dependency, Ruleset, RULESET_FILE};
use serde::Serialize;
use std::path::Path;

#[derive(Args)]
pub struct InitArgs {
    /// Rulepack name (defaults to the directory name)
    #[arg(long)]
    name: Option<String>,

    /// Init template: rulepack
    #[arg(long)]
    template: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InitOutput {
    ruleset_file: String,
    name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    template_files: Vec<String>,
}

#[derive(Debug)]
struct TemplateFile {
    path: &'static str,
    content: &'static str,
}

pub fn run(manifest_dir: &Path, renderer: &Renderer, args: InitArgs) -> anyhow::Result<()> {
    let ruleset_path = manifest_dir.join(RULESET_FILE);
    if ruleset_path.exists() {
        bail!("{RULESET_FILE} already exists");
    }
    let name = match args.name {
        Some(name) => name,
        None => manifest_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "rulepack".to_string()),
    };

    let (ruleset, files) = template(&name, args.template.as_deref())?;
    for file in &files {
        if manifest_dir.join(file.path).exists() {
            bail!("template file already exists: {}", file.path);
        }
    }
    for file in &files {
        let full = manifest_dir.join(file.path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(full, file.content)?;
    }
    ruleset.save(&ruleset_path)?;

    let template_files: Vec<String> = files.iter().map(|f| f.path.to_string()).collect();
    let output = InitOutput {
        ruleset_file: RULESET_FILE.to_string(),
        name: name.clone(),
        template_files: template_files.clone(),
    };
    renderer.emit(
        "init",
        &output,
        HumanPayload {
            title: "Initialize Rulepack",
            events: vec![Event::info(format!("Created {RULESET_FILE}"))],
            tables: vec![Table {
                title: "Scaffolded Files",
                columns: vec!["Path"],
                rows: template_files.into_iter().map(|p| vec![p]).collect(),
            }],
            done: "Initialization complete",
            ..HumanPayload::default()
        },
    )
}

fn template(name: &str, template: Option<&str>) -> anyhow::Result<(Ruleset, Vec<TemplateFile>)> {
    let mut ruleset = Ruleset::starter(name);
    match template.unwrap_or_default() {
        "" | "default" => Ok((ruleset, Vec::new())),
        "rulepack" => {
            ruleset.dependencies.push(Dependency::Local {
                path: ".rulepack/packs/rule-authoring".to_string(),
                export: Some("default".to_string()),
            });
            Ok((ruleset, authoring_template()))
        }
        other => bail!("unknown template \"{other}\" (supported: rulepack)"),
    }
}

fn authoring_template() -> Vec<TemplateFile> {
    vec![
        TemplateFile {
            path: ".rulepack/packs/rule-authoring/rulepack.json",
            content: r#"{
  "specVersion": "0.1",
  "name": "rule-authoring",
  "version": "0.1.0",
  "modules": [
    {
      "id": "authoring.basics",
      "path": "modules/authoring/basics.md",
      "priority": 100
    },
    {
      "id": "authoring.tests",
      "path": "modules/authoring/tests.md",
      "priority": 110
    }
  ],
  "exports": {
    "default": {
      "include": ["authoring.*"]
    }
  }
}
"#,
        },
        TemplateFile {
            path: ".rulepack/packs/rule-authoring/modules/authoring/basics.md",
            content: "# Rule Authoring Basics\n\n- Keep each rule scoped to one behavior.\n- Prefer examples that show correct and incorrect usage.\n- Write rules as actionable constraints, not abstract advice.\n",
        },
        TemplateFile {
            path: ".rulepack/packs/rule-authoring/modules/authoring/tests.md",
            content: "# Rule Authoring Testability\n\n- Add at least one acceptance criterion for each rule module.\n- Validate generated outputs in CI with deterministic checks.\n- Fail builds when local rule dependencies drift without reinstall.\n",
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_template_is_rejected() {
        let err = template("demo", Some("fancy")).unwrap_err();
        assert!(err.to_string().contains("unknown template"));
    }

    #[test]
    fn rulepack_template_adds_local_dependency() {
        let (ruleset, files) = template("demo", Some("rulepack")).unwrap();
        assert_eq!(ruleset.dependencies.len(), 1);
        assert_eq!(files.len(), 3);
    }
}
