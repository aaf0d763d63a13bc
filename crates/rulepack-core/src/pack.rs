//! Rule pack manifests, module selection, and deterministic expansion.
//!
//! A pack is a directory (or a commit in a remote mirror) whose root holds a
//! `rulepack.json` declaring modules and named exports. Expansion reads the
//! manifest through a [`FileReader`], selects modules via an export
//! selector, normalizes their content, and computes a hash that is a pure
//! function of the selection.

use crate::config::RULESET_FILE;
use crate::git::{GitClient, GitError};
use globset::Glob;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while expanding a pack.
#[derive(Error, Debug)]
pub enum PackError {
    #[error("read rulepack.json: {0}")]
    ReadManifest(String),

    #[error("parse rulepack.json: {0}")]
    ParseManifest(#[from] serde_json::Error),

    #[error("invalid rulepack metadata")]
    InvalidMetadata,

    #[error("missing export \"{export}\" in {pack}")]
    MissingExport { export: String, pack: String },

    #[error("read module {id} ({path}): {detail}")]
    ReadModule {
        id: String,
        path: String,
        detail: String,
    },

    #[error("path \"{0}\" escapes rulepack root")]
    PathEscape(String),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A pack manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RulePack {
    #[serde(default)]
    pub spec_version: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub modules: Vec<ModuleEntry>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub exports: BTreeMap<String, ExportSelector>,
}

/// One module declaration inside a pack manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleEntry {
    pub id: String,
    pub path: String,
    pub priority: i32,
    #[serde(default, rename = "appliesTo", skip_serializing_if = "Vec::is_empty")]
    pub applies_to: Vec<String>,
    #[serde(default, skip_serializing_if = "ApplyConfig::is_empty")]
    pub apply: ApplyConfig,
}

/// A named selector choosing a subset of a pack's modules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportSelector {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub folders: Vec<String>,
    #[serde(default, rename = "appliesTo", skip_serializing_if = "Vec::is_empty")]
    pub applies_to: Vec<String>,
}

/// Target-agnostic apply rule plus per-target overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<ApplyRule>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub targets: BTreeMap<String, ApplyRule>,
}

impl ApplyConfig {
    /// True when no rule is configured at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.default.is_none() && self.targets.is_empty()
    }
}

/// How a downstream tool should surface one module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyRule {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mode: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub globs: Vec<String>,
}

/// One composed unit of instruction text, as flowed to the renderers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    pub pack_name: String,
    pub pack_version: String,
    /// Opaque revision fingerprint: a git SHA, `"local"`, or `"profile"`.
    pub commit: String,
    pub id: String,
    pub priority: i32,
    /// LF-normalized content with exactly one trailing newline.
    pub content: String,
    pub apply: ApplyConfig,
}

/// The result of expanding one dependency.
#[derive(Debug, Clone)]
pub struct Expansion {
    pub modules: Vec<Module>,
    /// Deterministic hash over the selection (see module docs).
    pub content_hash: String,
}

/// Abstract file access so git, local, and profile sources share one
/// expansion path.
pub trait FileReader {
    /// Read a pack-relative file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist or cannot be read.
    fn read_file(&self, path: &str) -> Result<Vec<u8>, PackError>;
}

/// Reads files at a pinned commit inside a cached mirror.
pub struct CommitFileReader<'a> {
    client: &'a GitClient,
    repo_dir: &'a Path,
    commit: &'a str,
}

impl<'a> CommitFileReader<'a> {
    #[must_use]
    pub fn new(client: &'a GitClient, repo_dir: &'a Path, commit: &'a str) -> Self {
        Self {
            client,
            repo_dir,
            commit,
        }
    }
}

impl FileReader for CommitFileReader<'_> {
    fn read_file(&self, path: &str) -> Result<Vec<u8>, PackError> {
        Ok(self.client.show_file(self.repo_dir, self.commit, path)?)
    }
}

/// Reads files under a local pack root, refusing paths that escape it.
pub struct DirFileReader {
    root: PathBuf,
}

impl DirFileReader {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl FileReader for DirFileReader {
    fn read_file(&self, path: &str) -> Result<Vec<u8>, PackError> {
        let full = safe_join(&self.root, path)?;
        Ok(std::fs::read(full)?)
    }
}

/// Expand one dependency: parse the pack manifest, select modules for the
/// export, read and normalize their content, and compute the expansion hash.
///
/// `export` is the literal requested export name (empty when the caller did
/// not ask for one); `commit` is the revision fingerprint stamped on each
/// module.
///
/// # Errors
///
/// Returns an error on a malformed manifest, a missing export, an
/// unreadable module file, or a module path escaping the pack root.
pub fn expand_dependency(
    reader: &dyn FileReader,
    export: &str,
    commit: &str,
) -> Result<Expansion, PackError> {
    let pack = load_rule_pack(reader)?;
    let selector = export_selector(&pack, export)?;
    let selected = select_modules(&pack.modules, &selector);

    let mut modules = Vec::with_capacity(selected.len());
    let mut hasher = ExpansionHasher::new(&pack.name, &pack.version, export);
    for entry in selected {
        let bytes = reader
            .read_file(&entry.path)
            .map_err(|e| PackError::ReadModule {
                id: entry.id.clone(),
                path: entry.path.clone(),
                detail: e.to_string(),
            })?;
        let content = normalize_newlines(&String::from_utf8_lossy(&bytes));
        let apply_json = serde_json::to_string(&entry.apply)?;
        hasher.add_module(&entry.id, &entry.path, entry.priority, &content, &apply_json);
        modules.push(Module {
            pack_name: pack.name.clone(),
            pack_version: pack.version.clone(),
            commit: commit.to_string(),
            id: entry.id.clone(),
            priority: entry.priority,
            content,
            apply: entry.apply.clone(),
        });
    }

    Ok(Expansion {
        modules,
        content_hash: hasher.finish(),
    })
}

fn load_rule_pack(reader: &dyn FileReader) -> Result<RulePack, PackError> {
    let bytes = reader
        .read_file(RULESET_FILE)
        .map_err(|e| PackError::ReadManifest(e.to_string()))?;
    let pack: RulePack = serde_json::from_slice(&bytes)?;
    if pack.spec_version.is_empty() || pack.name.is_empty() || pack.version.is_empty() {
        return Err(PackError::InvalidMetadata);
    }
    Ok(pack)
}

fn export_selector(pack: &RulePack, name: &str) -> Result<ExportSelector, PackError> {
    if name.is_empty() {
        if let Some(selector) = pack.exports.get("default") {
            return Ok(selector.clone());
        }
        return Ok(ExportSelector {
            include: vec!["**".to_string()],
            ..ExportSelector::default()
        });
    }
    if let Some(selector) = pack.exports.get(name) {
        return Ok(selector.clone());
    }
    // Convenience fallback: an undeclared export selects by folder name, so
    // `--export standards` picks up modules under modules/standards/.
    if has_modules_in_folder(&pack.modules, name) {
        return Ok(ExportSelector {
            folders: vec![name.to_string()],
            ..ExportSelector::default()
        });
    }
    Err(PackError::MissingExport {
        export: name.to_string(),
        pack: pack.name.clone(),
    })
}

fn select_modules(modules: &[ModuleEntry], selector: &ExportSelector) -> Vec<ModuleEntry> {
    let mut include = selector.include.clone();
    let folders = normalize_folders(&selector.folders);
    if include.is_empty() && folders.is_empty() {
        include.push("**".to_string());
    }
    let mut out: Vec<ModuleEntry> = modules
        .iter()
        .filter(|m| {
            if !id_matches_any(&m.id, &include) && !matches_any_folder(&m.path, &folders) {
                return false;
            }
            if !selector.applies_to.is_empty()
                && !m.applies_to.is_empty()
                && !m.applies_to.iter().any(|l| selector.applies_to.contains(l))
            {
                return false;
            }
            true
        })
        .cloned()
        .collect();
    out.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
    out
}

/// Match a module id against user-supplied patterns.
///
/// Supports exact ids, the wildcard-all forms `*`/`**`, glob syntax, and a
/// trailing-star prefix form (`foo*`).
#[must_use]
pub fn id_matches_any(id: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|pattern| {
        if pattern == id || pattern == "*" || pattern == "**" {
            return true;
        }
        if let Ok(glob) = Glob::new(pattern) {
            if glob.compile_matcher().is_match(id) {
                return true;
            }
        }
        pattern
            .strip_suffix('*')
            .is_some_and(|prefix| id.starts_with(prefix))
    })
}

fn normalize_folders(folders: &[String]) -> Vec<String> {
    folders
        .iter()
        .filter_map(|raw| {
            let mut folder = raw.replace('\\', "/").trim().trim_matches('/').to_string();
            if folder.is_empty() {
                return None;
            }
            // Folders may be written dot-separated: languages.python.
            if folder.contains('.') && !folder.contains('/') {
                folder = folder.replace('.', "/");
            }
            Some(folder)
        })
        .collect()
}

fn matches_any_folder(module_path: &str, folders: &[String]) -> bool {
    if folders.is_empty() {
        return false;
    }
    let path = module_path.replace('\\', "/");
    let path = path.trim().trim_matches('/');
    folders.iter().any(|folder| {
        let prefixed = format!("modules/{folder}");
        path == prefixed
            || path.starts_with(&format!("{prefixed}/"))
            || path == folder.as_str()
            || path.starts_with(&format!("{folder}/"))
    })
}

fn has_modules_in_folder(modules: &[ModuleEntry], folder: &str) -> bool {
    let folders = normalize_folders(&[folder.to_string()]);
    modules.iter().any(|m| matches_any_folder(&m.path, &folders))
}

/// Normalize newlines: CRLF and bare CR become LF, trailing blank lines are
/// stripped, and exactly one trailing LF is appended.
#[must_use]
pub fn normalize_newlines(content: &str) -> String {
    let unified = content.replace("\r\n", "\n").replace('\r', "\n");
    let mut out = unified.trim_end_matches('\n').to_string();
    out.push('\n');
    out
}

/// Sanitize a module id for use in a file name: dots become underscores and
/// anything outside `[a-zA-Z0-9_-]` is replaced with `_`.
#[must_use]
pub fn sanitize_module_id(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn safe_join(root: &Path, relative: &str) -> Result<PathBuf, PackError> {
    let normalized = relative.replace('\\', "/");
    let mut depth: i32 = 0;
    let mut cleaned = PathBuf::new();
    for part in normalized.split('/') {
        match part {
            "" | "." => continue,
            ".." => {
                depth -= 1;
                if depth < 0 {
                    return Err(PackError::PathEscape(relative.to_string()));
                }
                cleaned.pop();
            }
            other => {
                depth += 1;
                cleaned.push(other);
            }
        }
    }
    Ok(root.join(cleaned))
}

struct ExpansionHasher {
    buffer: String,
}

impl ExpansionHasher {
    fn new(pack_name: &str, pack_version: &str, export: &str) -> Self {
        Self {
            buffer: format!("pack:{pack_name}\nversion:{pack_version}\nexport:{export}"),
        }
    }

    fn add_module(&mut self, id: &str, path: &str, priority: i32, content: &str, apply_json: &str) {
        self.buffer.push_str(&format!(
            "\nmodule:{id}\npath:{path}\npriority:{priority}\ncontent:\n{content}\napply:\n{apply_json}"
        ));
    }

    fn finish(self) -> String {
        hex::encode(Sha256::digest(self.buffer.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_pack(manifest: &str) -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(RULESET_FILE), manifest).unwrap();
        dir
    }

    fn write_module(dir: &TempDir, path: &str, content: &str) {
        let full = dir.path().join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, content).unwrap();
    }

    const TWO_MODULE_PACK: &str = r#"{
  "specVersion": "0.1",
  "name": "local-pack",
  "version": "1.0.0",
  "modules": [
    {"id": "a.alpha", "path": "mods/a.md", "priority": 100},
    {"id": "b.beta", "path": "mods/b.md", "priority": 200}
  ],
  "exports": {
    "default": {"include": ["a.*"]},
    "all": {"include": ["**"]}
  }
}"#;

    #[test]
    fn default_export_selects_and_hashes_deterministically() {
        let dir = write_pack(TWO_MODULE_PACK);
        write_module(&dir, "mods/a.md", "A\n");
        write_module(&dir, "mods/b.md", "B\n");
        let reader = DirFileReader::new(dir.path());

        let first = expand_dependency(&reader, "default", "local").unwrap();
        let second = expand_dependency(&reader, "default", "local").unwrap();

        assert_eq!(first.modules.len(), 1);
        assert_eq!(first.modules[0].id, "a.alpha");
        assert_eq!(first.content_hash, second.content_hash);
        assert_eq!(first.modules, second.modules);
    }

    #[test]
    fn hash_drifts_when_content_changes() {
        let dir = write_pack(TWO_MODULE_PACK);
        write_module(&dir, "mods/a.md", "A\n");
        write_module(&dir, "mods/b.md", "B\n");
        let reader = DirFileReader::new(dir.path());

        let before = expand_dependency(&reader, "all", "local").unwrap();
        assert_eq!(before.modules.len(), 2);

        write_module(&dir, "mods/a.md", "A changed\n");
        let after = expand_dependency(&reader, "all", "local").unwrap();
        assert_ne!(before.content_hash, after.content_hash);
    }

    #[test]
    fn missing_named_export_fails_with_pack_name() {
        let dir = write_pack(
            r#"{
  "specVersion": "0.1",
  "name": "local-pack",
  "version": "1.0.0",
  "modules": [
    {"id": "standards.style", "path": "docs/standards/style.md", "priority": 100}
  ],
  "exports": {"default": {"include": ["**"]}}
}"#,
        );
        write_module(&dir, "docs/standards/style.md", "S\n");
        let reader = DirFileReader::new(dir.path());

        let err = expand_dependency(&reader, "tasks", "local").unwrap_err();
        assert_eq!(err.to_string(), "missing export \"tasks\" in local-pack");
    }

    #[test]
    fn undeclared_export_falls_back_to_folder() {
        let dir = write_pack(
            r#"{
  "specVersion": "0.1",
  "name": "local-pack",
  "version": "1.0.0",
  "modules": [
    {"id": "standards.style", "path": "modules/standards/style.md", "priority": 100},
    {"id": "tasks.setup", "path": "modules/tasks/setup.md", "priority": 200}
  ]
}"#,
        );
        write_module(&dir, "modules/standards/style.md", "S\n");
        write_module(&dir, "modules/tasks/setup.md", "T\n");
        let reader = DirFileReader::new(dir.path());

        let expansion = expand_dependency(&reader, "standards", "local").unwrap();
        assert_eq!(expansion.modules.len(), 1);
        assert_eq!(expansion.modules[0].id, "standards.style");
    }

    #[test]
    fn folder_selector_accepts_nested_and_dotted_folders() {
        let dir = write_pack(
            r#"{
  "specVersion": "0.1",
  "name": "local-pack",
  "version": "1.0.0",
  "modules": [
    {"id": "standards.style", "path": "modules/standards/style.md", "priority": 100},
    {"id": "languages.python.patterns", "path": "modules/languages/python/patterns.md", "priority": 200},
    {"id": "tasks.setup", "path": "modules/tasks/setup.md", "priority": 300}
  ],
  "exports": {
    "python-core": {"folders": ["standards", "languages.python"]}
  }
}"#,
        );
        write_module(&dir, "modules/standards/style.md", "S\n");
        write_module(&dir, "modules/languages/python/patterns.md", "P\n");
        write_module(&dir, "modules/tasks/setup.md", "T\n");
        let reader = DirFileReader::new(dir.path());

        let expansion = expand_dependency(&reader, "python-core", "local").unwrap();
        let ids: Vec<&str> = expansion.modules.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["standards.style", "languages.python.patterns"]);
    }

    #[test]
    fn applies_to_filter_passes_unlabeled_modules() {
        let dir = write_pack(
            r#"{
  "specVersion": "0.1",
  "name": "local-pack",
  "version": "1.0.0",
  "modules": [
    {"id": "a.core", "path": "mods/a.md", "priority": 100},
    {"id": "b.backend", "path": "mods/b.md", "priority": 200, "appliesTo": ["backend"]},
    {"id": "c.frontend", "path": "mods/c.md", "priority": 300, "appliesTo": ["frontend"]}
  ],
  "exports": {
    "backend": {"include": ["**"], "appliesTo": ["backend"]}
  }
}"#,
        );
        write_module(&dir, "mods/a.md", "A\n");
        write_module(&dir, "mods/b.md", "B\n");
        write_module(&dir, "mods/c.md", "C\n");
        let reader = DirFileReader::new(dir.path());

        let expansion = expand_dependency(&reader, "backend", "local").unwrap();
        let ids: Vec<&str> = expansion.modules.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["a.core", "b.backend"]);
    }

    #[test]
    fn module_path_escaping_root_is_fatal() {
        let dir = write_pack(
            r#"{
  "specVersion": "0.1",
  "name": "local-pack",
  "version": "1.0.0",
  "modules": [
    {"id": "evil", "path": "../outside.md", "priority": 100}
  ]
}"#,
        );
        let reader = DirFileReader::new(dir.path());
        let err = expand_dependency(&reader, "", "local").unwrap_err();
        assert!(err.to_string().contains("escapes rulepack root"));
    }

    #[test]
    fn empty_export_name_without_default_selects_everything() {
        let dir = write_pack(
            r#"{
  "specVersion": "0.1",
  "name": "local-pack",
  "version": "1.0.0",
  "modules": [
    {"id": "a", "path": "mods/a.md", "priority": 2},
    {"id": "b", "path": "mods/b.md", "priority": 1}
  ]
}"#,
        );
        write_module(&dir, "mods/a.md", "A\n");
        write_module(&dir, "mods/b.md", "B\n");
        let reader = DirFileReader::new(dir.path());

        let expansion = expand_dependency(&reader, "", "local").unwrap();
        let ids: Vec<&str> = expansion.modules.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn missing_pack_metadata_is_rejected() {
        let dir = write_pack(r#"{"specVersion": "0.1", "name": "", "version": "1.0.0"}"#);
        let reader = DirFileReader::new(dir.path());
        let err = expand_dependency(&reader, "", "local").unwrap_err();
        assert!(matches!(err, PackError::InvalidMetadata));
    }

    #[test]
    fn normalize_newlines_handles_crlf_and_trailing_blanks() {
        assert_eq!(normalize_newlines("a\r\nb\r"), "a\nb\n");
        assert_eq!(normalize_newlines("a\n\n\n"), "a\n");
        assert_eq!(normalize_newlines("a"), "a\n");
    }

    #[test]
    fn id_patterns_support_glob_and_prefix_star() {
        let patterns = vec!["python.*".to_string()];
        assert!(id_matches_any("python.base", &patterns));
        assert!(!id_matches_any("ml.safety", &patterns));

        let prefix = vec!["py*".to_string()];
        assert!(id_matches_any("python.base", &prefix));

        let exact = vec!["ml.safety".to_string()];
        assert!(id_matches_any("ml.safety", &exact));

        let all = vec!["**".to_string()];
        assert!(id_matches_any("anything.at.all", &all));
    }

    #[test]
    fn sanitize_module_id_replaces_dots() {
        assert_eq!(sanitize_module_id("python.base"), "python_base");
        assert_eq!(sanitize_module_id("a/b c"), "a_b_c");
        assert_eq!(sanitize_module_id("safe-id_9"), "safe-id_9");
    }
}
