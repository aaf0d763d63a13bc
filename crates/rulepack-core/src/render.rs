//! Target renderers: cursor per-module files, merged copilot/codex files,
//! and the unmanaged-overwrite preflight.
//!
//! Every file this module writes carries (or, for merged copilot/codex
//! output, deliberately omits) the provenance comment that marks a file as
//! managed. The preflight never prompts; it only reports the paths whose
//! existing content is not managed, and the caller decides.

use crate::config::{short12, TargetEntry};
use crate::pack::{sanitize_module_id, Module};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while rendering targets.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("unsupported cursor apply mode \"{mode}\" for module {module}")]
    UnsupportedMode { mode: String, module: String },

    #[error("cursor apply mode glob requires globs for module {0}")]
    GlobRequiresGlobs(String),

    #[error("cursor target with perModule=false does not support apply mode \"{mode}\" for module {module}")]
    ModeNeedsPerModule { mode: String, module: String },

    #[error("missing output file")]
    MissingOutFile,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Terminal apply decision for one module on the cursor target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMode {
    Always,
    Never,
    Agent,
    Glob,
    Manual,
}

impl ApplyMode {
    fn parse(mode: &str, module: &str) -> Result<Self, RenderError> {
        match mode {
            "" | "always" => Ok(Self::Always),
            "never" => Ok(Self::Never),
            "agent" => Ok(Self::Agent),
            "glob" => Ok(Self::Glob),
            "manual" => Ok(Self::Manual),
            other => Err(RenderError::UnsupportedMode {
                mode: other.to_string(),
                module: module.to_string(),
            }),
        }
    }
}

/// A fully resolved cursor apply rule.
#[derive(Debug, Clone)]
struct CursorRule {
    mode: ApplyMode,
    description: String,
    globs: Vec<String>,
}

/// Effective cursor render configuration with defaults applied and paths
/// resolved against the project directory.
#[derive(Debug, Clone)]
pub struct CursorTarget {
    pub out_dir: PathBuf,
    pub out_file: Option<PathBuf>,
    pub per_module: bool,
    pub ext: String,
}

impl CursorTarget {
    /// Build the effective configuration from a target entry.
    #[must_use]
    pub fn from_entry(base: &Path, entry: &TargetEntry) -> Self {
        let out_dir: &str = if entry.out_dir.is_empty() {
            ".cursor/rules"
        } else {
            entry.out_dir.as_str()
        };
        let ext = if entry.ext.is_empty() {
            ".mdc".to_string()
        } else {
            entry.ext.clone()
        };
        let out_file = if entry.out_file.is_empty() {
            None
        } else {
            Some(join_base(base, &entry.out_file))
        };
        Self {
            out_dir: join_base(base, out_dir),
            out_file,
            per_module: entry.per_module,
            ext,
        }
    }

    fn merged_out_file(&self) -> PathBuf {
        self.out_file
            .clone()
            .unwrap_or_else(|| self.out_dir.join(format!("rules{}", self.ext)))
    }
}

fn join_base(base: &Path, path: &str) -> PathBuf {
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        base.join(candidate)
    }
}

fn resolve_cursor_rule(module: &Module) -> Result<CursorRule, RenderError> {
    let rule = module
        .apply
        .targets
        .get("cursor")
        .or(module.apply.default.as_ref());
    let (mode_str, description, globs) = match rule {
        Some(rule) => (
            rule.mode.trim().to_lowercase(),
            rule.description.trim().to_string(),
            rule.globs.clone(),
        ),
        None => (String::new(), String::new(), Vec::new()),
    };
    let mode = ApplyMode::parse(&mode_str, &module.id)?;
    if mode == ApplyMode::Glob && globs.is_empty() {
        return Err(RenderError::GlobRequiresGlobs(module.id.clone()));
    }
    let globs = match mode {
        ApplyMode::Always | ApplyMode::Never => Vec::new(),
        _ => globs,
    };
    Ok(CursorRule {
        mode,
        description,
        globs,
    })
}

fn cursor_modules<'a>(modules: &'a [Module]) -> Result<Vec<(&'a Module, CursorRule)>, RenderError> {
    let mut out = Vec::with_capacity(modules.len());
    for module in modules {
        let rule = resolve_cursor_rule(module)?;
        if rule.mode == ApplyMode::Never {
            continue;
        }
        out.push((module, rule));
    }
    Ok(out)
}

/// The paths a cursor render would write, in module order.
///
/// # Errors
///
/// Returns an error on an invalid apply mode, including modes that require
/// per-module output when `perModule` is off.
pub fn cursor_write_paths(
    target: &CursorTarget,
    modules: &[Module],
) -> Result<Vec<PathBuf>, RenderError> {
    let selected = cursor_modules(modules)?;
    if target.per_module {
        return Ok(selected
            .iter()
            .map(|(m, _)| target.out_dir.join(module_file_name(m, &target.ext)))
            .collect());
    }
    require_mergeable(&selected)?;
    Ok(vec![target.merged_out_file()])
}

/// Report intended cursor output paths whose existing content is not
/// managed by this tool.
///
/// # Errors
///
/// Returns an error on an invalid apply mode or an unreadable existing
/// file.
pub fn cursor_unmanaged_overwrites(
    target: &CursorTarget,
    modules: &[Module],
) -> Result<Vec<PathBuf>, RenderError> {
    let mut out = Vec::new();
    for path in cursor_write_paths(target, modules)? {
        match std::fs::read_to_string(&path) {
            Ok(existing) => {
                if !is_managed_content(&existing) {
                    out.push(path);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(out)
}

/// Render the cursor target.
///
/// # Errors
///
/// Returns an error on an invalid apply mode or a write failure.
pub fn write_cursor(target: &CursorTarget, modules: &[Module]) -> Result<(), RenderError> {
    std::fs::create_dir_all(&target.out_dir)?;
    let selected = cursor_modules(modules)?;
    if target.per_module {
        for (module, rule) in &selected {
            let path = target.out_dir.join(module_file_name(module, &target.ext));
            let content = per_module_content(&target.ext, module, rule);
            std::fs::write(path, normalize(&content))?;
        }
        return Ok(());
    }
    require_mergeable(&selected)?;
    let merged: Vec<&Module> = selected.iter().map(|(m, _)| *m).collect();
    std::fs::write(target.merged_out_file(), normalize(&merge(&merged, true)))?;
    Ok(())
}

/// Write a merged single-file target (copilot, codex): module contents
/// concatenated without provenance headers or frontmatter.
///
/// # Errors
///
/// Returns an error on a missing output file or a write failure.
pub fn write_merged(out_file: &Path, modules: &[Module]) -> Result<(), RenderError> {
    if out_file.as_os_str().is_empty() {
        return Err(RenderError::MissingOutFile);
    }
    if let Some(parent) = out_file.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let refs: Vec<&Module> = modules.iter().collect();
    std::fs::write(out_file, normalize(&merge(&refs, false)))?;
    Ok(())
}

/// True when content carries the provenance marker and is therefore safe
/// to overwrite.
#[must_use]
pub fn is_managed_content(content: &str) -> bool {
    content.contains("<!-- pack=") && content.contains(" module=") && content.contains(" priority=")
}

/// The provenance comment stamped into managed outputs.
#[must_use]
pub fn provenance_header(module: &Module) -> String {
    format!(
        "<!-- pack={} version={} commit={} module={} priority={} -->",
        module.pack_name,
        module.pack_version,
        short12(&module.commit),
        module.id,
        module.priority
    )
}

fn require_mergeable(selected: &[(&Module, CursorRule)]) -> Result<(), RenderError> {
    for (module, rule) in selected {
        if matches!(rule.mode, ApplyMode::Glob | ApplyMode::Agent | ApplyMode::Manual) {
            return Err(RenderError::ModeNeedsPerModule {
                mode: mode_name(rule.mode).to_string(),
                module: module.id.clone(),
            });
        }
    }
    Ok(())
}

fn mode_name(mode: ApplyMode) -> &'static str {
    match mode {
        ApplyMode::Always => "always",
        ApplyMode::Never => "never",
        ApplyMode::Agent => "agent",
        ApplyMode::Glob => "glob",
        ApplyMode::Manual => "manual",
    }
}

fn module_file_name(module: &Module, ext: &str) -> String {
    format!(
        "{:03}-{}{}",
        module.priority,
        sanitize_module_id(&module.id),
        ext
    )
}

fn per_module_content(ext: &str, module: &Module, rule: &CursorRule) -> String {
    let mut out = String::new();
    if ext.eq_ignore_ascii_case(".mdc") {
        out.push_str(&frontmatter(rule, module));
        out.push('\n');
    }
    out.push_str(&provenance_header(module));
    out.push('\n');
    out.push('\n');
    out.push_str(&module.content);
    out
}

fn merge(modules: &[&Module], include_provenance: bool) -> String {
    let mut out = String::new();
    for (i, module) in modules.iter().enumerate() {
        if include_provenance {
            out.push_str(&provenance_header(module));
            out.push('\n');
        }
        out.push_str(&module.content);
        if i != modules.len() - 1 {
            out.push('\n');
        }
    }
    out
}

fn frontmatter(rule: &CursorRule, module: &Module) -> String {
    let mut out = String::from("---\n");
    match rule.mode {
        ApplyMode::Always | ApplyMode::Never => out.push_str("alwaysApply: true\n"),
        ApplyMode::Agent => {
            out.push_str("alwaysApply: false\n");
            let description = if rule.description.is_empty() {
                format!("Apply when relevant: {}", module.id)
            } else {
                rule.description.clone()
            };
            out.push_str(&format!("description: {}\n", quote_yaml(&description)));
        }
        ApplyMode::Manual => {
            out.push_str("alwaysApply: false\n");
            let description = if rule.description.is_empty() {
                format!("Apply manually via @ mention: {}", module.id)
            } else {
                rule.description.clone()
            };
            out.push_str(&format!("description: {}\n", quote_yaml(&description)));
        }
        ApplyMode::Glob => {
            out.push_str("alwaysApply: false\n");
            if !rule.description.is_empty() {
                out.push_str(&format!("description: {}\n", quote_yaml(&rule.description)));
            }
            out.push_str("globs:\n");
            let mut globs = rule.globs.clone();
            globs.sort();
            for glob in globs {
                out.push_str(&format!("  - {}\n", quote_yaml(&glob)));
            }
        }
    }
    out.push_str("---\n");
    out
}

fn quote_yaml(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

fn normalize(content: &str) -> String {
    crate::pack::normalize_newlines(content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pack::{ApplyConfig, ApplyRule};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn module(id: &str, priority: i32, apply: ApplyConfig) -> Module {
        Module {
            pack_name: "pack".to_string(),
            pack_version: "1.0.0".to_string(),
            commit: "0123456789abcdef".to_string(),
            id: id.to_string(),
            priority,
            content: format!("{id} content\n"),
            apply,
        }
    }

    fn cursor_apply(rule: ApplyRule) -> ApplyConfig {
        let mut targets = BTreeMap::new();
        targets.insert("cursor".to_string(), rule);
        ApplyConfig {
            default: None,
            targets,
        }
    }

    fn per_module_target(dir: &TempDir) -> CursorTarget {
        CursorTarget {
            out_dir: dir.path().join("rules"),
            out_file: None,
            per_module: true,
            ext: ".mdc".to_string(),
        }
    }

    #[test]
    fn apply_modes_render_expected_frontmatter() {
        let dir = TempDir::new().unwrap();
        let target = per_module_target(&dir);
        let modules = vec![
            module("a.default", 100, ApplyConfig::default()),
            module(
                "b.glob",
                110,
                cursor_apply(ApplyRule {
                    mode: "glob".to_string(),
                    description: "Python files only".to_string(),
                    globs: vec!["**/*.py".to_string()],
                }),
            ),
            module(
                "c.never",
                120,
                cursor_apply(ApplyRule {
                    mode: "never".to_string(),
                    ..ApplyRule::default()
                }),
            ),
        ];

        write_cursor(&target, &modules).unwrap();

        let entries: Vec<_> = std::fs::read_dir(target.out_dir.clone())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(entries.len(), 2, "never module must be omitted");

        let always = std::fs::read_to_string(target.out_dir.join("100-a_default.mdc")).unwrap();
        assert!(always.contains("alwaysApply: true"));
        assert!(is_managed_content(&always));

        let glob = std::fs::read_to_string(target.out_dir.join("110-b_glob.mdc")).unwrap();
        assert!(glob.contains("alwaysApply: false"));
        assert!(glob.contains("globs:"));
        assert!(glob.contains("\"**/*.py\""));
        assert!(glob.contains("description: \"Python files only\""));
    }

    #[test]
    fn agent_mode_gets_generated_description() {
        let dir = TempDir::new().unwrap();
        let target = per_module_target(&dir);
        let modules = vec![module(
            "a.agent",
            100,
            cursor_apply(ApplyRule {
                mode: "agent".to_string(),
                ..ApplyRule::default()
            }),
        )];
        write_cursor(&target, &modules).unwrap();
        let content = std::fs::read_to_string(target.out_dir.join("100-a_agent.mdc")).unwrap();
        assert!(content.contains("description: \"Apply when relevant: a.agent\""));
    }

    #[test]
    fn glob_mode_without_globs_is_fatal() {
        let dir = TempDir::new().unwrap();
        let target = per_module_target(&dir);
        let modules = vec![module(
            "bad.glob",
            100,
            cursor_apply(ApplyRule {
                mode: "glob".to_string(),
                ..ApplyRule::default()
            }),
        )];
        let err = write_cursor(&target, &modules).unwrap_err();
        assert!(matches!(err, RenderError::GlobRequiresGlobs(_)));
    }

    #[test]
    fn unknown_mode_is_fatal() {
        let dir = TempDir::new().unwrap();
        let target = per_module_target(&dir);
        let modules = vec![module(
            "bad.mode",
            100,
            cursor_apply(ApplyRule {
                mode: "sometimes".to_string(),
                ..ApplyRule::default()
            }),
        )];
        let err = write_cursor(&target, &modules).unwrap_err();
        assert!(err
            .to_string()
            .contains("unsupported cursor apply mode \"sometimes\""));
    }

    #[test]
    fn merged_cursor_rejects_per_file_modes() {
        let dir = TempDir::new().unwrap();
        let target = CursorTarget {
            out_dir: dir.path().join("rules"),
            out_file: None,
            per_module: false,
            ext: ".mdc".to_string(),
        };
        let modules = vec![module(
            "a.agent",
            100,
            cursor_apply(ApplyRule {
                mode: "agent".to_string(),
                ..ApplyRule::default()
            }),
        )];
        let err = write_cursor(&target, &modules).unwrap_err();
        assert!(matches!(err, RenderError::ModeNeedsPerModule { .. }));
    }

    #[test]
    fn merged_cursor_writes_provenance_comments() {
        let dir = TempDir::new().unwrap();
        let target = CursorTarget {
            out_dir: dir.path().join("rules"),
            out_file: None,
            per_module: false,
            ext: ".mdc".to_string(),
        };
        let modules = vec![
            module("a.one", 100, ApplyConfig::default()),
            module("b.two", 200, ApplyConfig::default()),
        ];
        write_cursor(&target, &modules).unwrap();
        let content = std::fs::read_to_string(target.out_dir.join("rules.mdc")).unwrap();
        assert!(is_managed_content(&content));
        assert!(content.contains("a.one content"));
        assert!(content.contains("b.two content"));
    }

    #[test]
    fn unmanaged_collision_is_reported_and_managed_is_not() {
        let dir = TempDir::new().unwrap();
        let target = per_module_target(&dir);
        std::fs::create_dir_all(&target.out_dir).unwrap();
        std::fs::write(target.out_dir.join("100-python_base.mdc"), "manual rule\n").unwrap();

        let modules = vec![module("python.base", 100, ApplyConfig::default())];
        let collisions = cursor_unmanaged_overwrites(&target, &modules).unwrap();
        assert_eq!(collisions.len(), 1);
        assert!(collisions[0].ends_with("100-python_base.mdc"));

        // After a managed write the same path is no longer flagged.
        write_cursor(&target, &modules).unwrap();
        let replaced =
            std::fs::read_to_string(target.out_dir.join("100-python_base.mdc")).unwrap();
        assert!(is_managed_content(&replaced));
        let collisions = cursor_unmanaged_overwrites(&target, &modules).unwrap();
        assert!(collisions.is_empty());
    }

    #[test]
    fn never_modules_produce_no_collision_paths() {
        let dir = TempDir::new().unwrap();
        let target = per_module_target(&dir);
        let modules = vec![module(
            "a.never",
            100,
            cursor_apply(ApplyRule {
                mode: "never".to_string(),
                ..ApplyRule::default()
            }),
        )];
        let paths = cursor_write_paths(&target, &modules).unwrap();
        assert!(paths.is_empty());
    }

    #[test]
    fn merged_targets_omit_provenance() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out/instructions.md");
        let modules = vec![
            module("a.one", 100, ApplyConfig::default()),
            module("b.two", 200, ApplyConfig::default()),
        ];
        write_merged(&out, &modules).unwrap();
        let content = std::fs::read_to_string(&out).unwrap();
        assert!(!content.contains("<!-- pack="));
        assert!(content.contains("a.one content"));
        assert!(content.ends_with('\n'));
    }

    #[test]
    fn build_twice_is_idempotent_on_outputs() {
        let dir = TempDir::new().unwrap();
        let target = per_module_target(&dir);
        let modules = vec![module("a.one", 100, ApplyConfig::default())];
        write_cursor(&target, &modules).unwrap();
        let first = std::fs::read_to_string(target.out_dir.join("100-a_one.mdc")).unwrap();
        write_cursor(&target, &modules).unwrap();
        let second = std::fs::read_to_string(target.out_dir.join("100-a_one.mdc")).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn empty_module_sequence_renders_well_formed_outputs() {
        let dir = TempDir::new().unwrap();
        let target = per_module_target(&dir);
        write_cursor(&target, &[]).unwrap();
        assert!(target.out_dir.exists());

        let out = dir.path().join("merged.md");
        write_merged(&out, &[]).unwrap();
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "\n");
    }
}
