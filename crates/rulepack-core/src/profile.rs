//! Content-addressed global store of composed-module snapshots.
//!
//! A profile freezes a resolved composition into a directory under
//! `~/.rulepack/profiles/<id>/` that is itself a valid rule pack, so it can
//! feed back into the resolver as a dependency source. The id is a pure
//! function of the source identities and the content hash, which makes
//! repeated saves of identical input land on the same directory.

use crate::config::SourceKind;
use crate::pack::{sanitize_module_id, ApplyConfig, ExportSelector, Module, ModuleEntry, RulePack};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Errors that can occur in the profile store.
#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("could not determine home directory")]
    HomeDir,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invalid profile metadata at {0}")]
    InvalidMetadata(String),

    #[error("profile \"{0}\" not found locally")]
    NotFound(String),

    #[error("alias \"{0}\" resolves to multiple profiles")]
    AmbiguousAlias(String),

    #[error("unsupported profile format: missing sources; re-save profile with current CLI")]
    LegacyFormat,

    #[error("profile alias \"{alias}\" already used by profile {existing}")]
    AliasTaken { alias: String, existing: String },

    #[error("missing profile content hash")]
    MissingContentHash,

    #[error("serialize profile metadata: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// One source that contributed modules to a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceSnapshot {
    pub source_type: SourceKind,
    pub source_ref: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source_export: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub provenance: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub module_ids: Vec<String>,
}

impl SourceSnapshot {
    /// Short `type:ref` form used in listings and skip reports.
    #[must_use]
    pub fn summary(&self) -> String {
        format!("{}:{}", self.source_type, self.source_ref)
    }
}

/// Persisted sidecar metadata of one snapshot directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub alias: String,
    pub sources: Vec<SourceSnapshot>,
    pub created_at: String,
    pub content_hash: String,
    pub module_count: usize,
}

impl Metadata {
    /// One-line description of the snapshot's sources.
    #[must_use]
    pub fn source_summary(&self) -> String {
        if self.sources.len() == 1 {
            self.sources[0].summary()
        } else {
            format!("{} sources", self.sources.len())
        }
    }
}

/// Raw metadata shape that tolerates the legacy single-source layout long
/// enough to report it as unsupported.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawMetadata {
    id: String,
    alias: String,
    sources: Option<Vec<SourceSnapshot>>,
    created_at: String,
    content_hash: String,
    module_count: usize,
}

impl RawMetadata {
    fn into_metadata(self) -> Result<Metadata, ProfileError> {
        let sources = self.sources.ok_or(ProfileError::LegacyFormat)?;
        Ok(Metadata {
            id: self.id,
            alias: self.alias,
            sources,
            created_at: self.created_at,
            content_hash: self.content_hash,
            module_count: self.module_count,
        })
    }
}

/// Input to [`ProfileStore::save`].
#[derive(Debug, Clone, Default)]
pub struct SaveInput {
    /// Reuse an existing id (in-place refresh) instead of deriving one.
    pub id: Option<String>,
    pub alias: Option<String>,
    pub sources: Vec<SourceSnapshot>,
    pub content_hash: String,
    pub modules: Vec<Module>,
}

/// The per-user profile store.
pub struct ProfileStore {
    root: PathBuf,
}

impl ProfileStore {
    /// Open the store at its default location under the home directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined.
    pub fn open_default() -> Result<Self, ProfileError> {
        let home = dirs::home_dir().ok_or(ProfileError::HomeDir)?;
        Ok(Self {
            root: home.join(".rulepack").join("profiles"),
        })
    }

    /// Open a store rooted at an explicit directory.
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The store root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persist a snapshot, returning its metadata.
    ///
    /// A prior snapshot at the same id keeps its `createdAt` and, when no
    /// new alias is given, its alias.
    ///
    /// # Errors
    ///
    /// Returns an error on a missing content hash, an alias already used by
    /// a different profile, or an IO failure.
    pub fn save(&self, input: SaveInput) -> Result<Metadata, ProfileError> {
        if input.content_hash.is_empty() {
            return Err(ProfileError::MissingContentHash);
        }
        let id = input
            .id
            .clone()
            .unwrap_or_else(|| derive_id(&input.sources, &input.content_hash));
        if let Some(alias) = input.alias.as_deref().filter(|a| !a.is_empty()) {
            self.check_alias_free(alias, &id)?;
        }
        let profile_dir = self.root.join(&id);
        std::fs::create_dir_all(profile_dir.join("modules"))?;
        debug!(id = %id, dir = %profile_dir.display(), "saving profile snapshot");

        let mut entries = Vec::with_capacity(input.modules.len());
        for module in &input.modules {
            let name = format!("{:03}-{}.md", module.priority, sanitize_module_id(&module.id));
            let rel_path = format!("modules/{name}");
            std::fs::write(profile_dir.join(&rel_path), &module.content)?;
            entries.push(ModuleEntry {
                id: module.id.clone(),
                path: rel_path,
                priority: module.priority,
                applies_to: Vec::new(),
                apply: module.apply.clone(),
            });
        }
        entries.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));

        let mut exports = BTreeMap::new();
        exports.insert(
            "default".to_string(),
            ExportSelector {
                include: vec!["**".to_string()],
                ..ExportSelector::default()
            },
        );
        let snapshot = RulePack {
            spec_version: "0.1".to_string(),
            name: format!("saved-profile-{id}"),
            version: "1.0.0".to_string(),
            modules: entries,
            exports,
        };
        write_json(&profile_dir.join(crate::config::RULESET_FILE), &snapshot)?;

        let mut meta = Metadata {
            id: id.clone(),
            alias: input.alias.unwrap_or_default(),
            sources: input.sources,
            created_at: chrono::Utc::now().to_rfc3339(),
            content_hash: input.content_hash,
            module_count: input.modules.len(),
        };
        // Re-saving an existing id keeps its original creation time.
        if let Ok(existing) = self.read_raw(&profile_dir) {
            if !existing.created_at.is_empty() {
                meta.created_at = existing.created_at;
            }
            if meta.alias.is_empty() {
                meta.alias = existing.alias;
            }
        }
        write_json(&profile_dir.join("profile.json"), &meta)?;
        Ok(meta)
    }

    /// Enumerate all readable snapshots, sorted by id. A missing store root
    /// yields an empty list.
    ///
    /// # Errors
    ///
    /// Returns an error only on directory enumeration failures.
    pub fn list(&self) -> Result<Vec<Metadata>, ProfileError> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut out = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Ok(raw) = self.read_raw(&entry.path()) else {
                continue;
            };
            if let Ok(meta) = raw.into_metadata() {
                out.push(meta);
            }
        }
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    /// Resolve an id or alias to a snapshot and its directory.
    ///
    /// Ids win over aliases; an alias matching two profiles is fatal. A
    /// legacy snapshot (metadata without `sources[]`) is reported as
    /// unsupported even when reached via alias.
    ///
    /// # Errors
    ///
    /// Returns an error if nothing matches, the alias is ambiguous, or the
    /// matched snapshot uses the legacy format.
    pub fn resolve(&self, reference: &str) -> Result<(Metadata, PathBuf), ProfileError> {
        let direct = self.root.join(reference);
        if let Ok(raw) = self.read_raw(&direct) {
            return Ok((raw.into_metadata()?, direct));
        }

        let mut matches: Vec<(RawMetadata, PathBuf)> = Vec::new();
        if let Ok(entries) = std::fs::read_dir(&self.root) {
            for entry in entries.flatten() {
                let path = entry.path();
                let Ok(raw) = self.read_raw(&path) else {
                    continue;
                };
                if raw.alias == reference {
                    matches.push((raw, path));
                }
            }
        }
        match matches.len() {
            0 => Err(ProfileError::NotFound(reference.to_string())),
            1 => {
                let (raw, path) = matches.remove(0);
                Ok((raw.into_metadata()?, path))
            }
            _ => Err(ProfileError::AmbiguousAlias(reference.to_string())),
        }
    }

    /// Remove one snapshot by id or alias, returning its metadata and path.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be resolved or deleted.
    pub fn remove(&self, reference: &str) -> Result<(Metadata, PathBuf), ProfileError> {
        let (meta, path) = self.resolve(reference)?;
        std::fs::remove_dir_all(&path)?;
        debug!(id = %meta.id, "removed profile snapshot");
        Ok((meta, path))
    }

    /// Remove every readable snapshot, returning the removed metadata.
    ///
    /// # Errors
    ///
    /// Returns an error if a snapshot directory cannot be deleted.
    pub fn remove_all(&self) -> Result<Vec<Metadata>, ProfileError> {
        let all = self.list()?;
        for meta in &all {
            std::fs::remove_dir_all(self.root.join(&meta.id))?;
        }
        Ok(all)
    }

    fn check_alias_free(&self, alias: &str, id: &str) -> Result<(), ProfileError> {
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return Ok(());
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(raw) = self.read_raw(&path) else {
                continue;
            };
            if raw.alias == alias && raw.id != id {
                return Err(ProfileError::AliasTaken {
                    alias: alias.to_string(),
                    existing: raw.id,
                });
            }
        }
        Ok(())
    }

    fn read_raw(&self, profile_dir: &Path) -> Result<RawMetadata, ProfileError> {
        let path = profile_dir.join("profile.json");
        let content = std::fs::read_to_string(&path)?;
        let raw: RawMetadata = serde_json::from_str(&content)
            .map_err(|_| ProfileError::InvalidMetadata(path.display().to_string()))?;
        if raw.id.is_empty() {
            return Err(ProfileError::InvalidMetadata(path.display().to_string()));
        }
        Ok(raw)
    }
}

/// Derive the content-addressed snapshot id.
///
/// `sourceDigest12` is the first 12 hex chars of SHA-256 over the sorted,
/// `;`-joined `<type>|<ref>|<export>` keys of all sources; the suffix is
/// the first 8 chars of the content hash.
#[must_use]
pub fn derive_id(sources: &[SourceSnapshot], content_hash: &str) -> String {
    let mut keys: Vec<String> = sources
        .iter()
        .map(|s| format!("{}|{}|{}", s.source_type, s.source_ref, s.source_export))
        .collect();
    keys.sort();
    let digest = Sha256::digest(keys.join(";").as_bytes());
    let source_digest = &hex::encode(digest)[..12];
    let hash_prefix = if content_hash.len() > 8 {
        &content_hash[..8]
    } else {
        content_hash
    };
    format!("{source_digest}__default__{hash_prefix}")
}

/// Hash the final composed module list.
///
/// Unlike the pack expansion hash this includes each module's pack name,
/// pack version, and commit, and it sorts the input internally so the
/// result is permutation-invariant.
#[must_use]
pub fn content_hash(modules: &[Module], export: &str) -> String {
    let mut sorted: Vec<&Module> = modules.iter().collect();
    sorted.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
    let mut buffer = format!("export:{export}");
    for module in sorted {
        let apply_json = serde_json::to_string(&module.apply).unwrap_or_default();
        buffer.push_str(&format!(
            "\nmodule:{}\npriority:{}\npack:{}\nversion:{}\ncommit:{}\ncontent:\n{}\napply:\n{}",
            module.id,
            module.priority,
            module.pack_name,
            module.pack_version,
            module.commit,
            module.content,
            apply_json
        ));
    }
    hex::encode(Sha256::digest(buffer.as_bytes()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), ProfileError> {
    let mut text = serde_json::to_string_pretty(value)?;
    text.push('\n');
    std::fs::write(path, text)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_modules() -> Vec<Module> {
        vec![Module {
            pack_name: "x".to_string(),
            pack_version: "1.0.0".to_string(),
            commit: "abc".to_string(),
            id: "a".to_string(),
            priority: 10,
            content: "a\n".to_string(),
            apply: ApplyConfig::default(),
        }]
    }

    fn git_source(uri: &str) -> SourceSnapshot {
        SourceSnapshot {
            source_type: SourceKind::Git,
            source_ref: uri.to_string(),
            source_export: "python".to_string(),
            provenance: BTreeMap::new(),
            module_ids: vec!["a".to_string()],
        }
    }

    fn save_input(store_alias: &str, uri: &str, modules: Vec<Module>) -> SaveInput {
        let hash = content_hash(&modules, "python");
        SaveInput {
            id: None,
            alias: Some(store_alias.to_string()),
            sources: vec![git_source(uri)],
            content_hash: hash,
            modules,
        }
    }

    #[test]
    fn save_list_resolve_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = ProfileStore::with_root(dir.path());

        let meta = store
            .save(save_input("py", "https://example.com/a.git", sample_modules()))
            .unwrap();
        assert!(!meta.id.is_empty());

        let all = store.list().unwrap();
        assert_eq!(all.len(), 1);

        let (resolved, path) = store.resolve("py").unwrap();
        assert_eq!(resolved.id, meta.id);
        assert!(path.join(crate::config::RULESET_FILE).exists());
        assert!(path.join("modules/010-a.md").exists());
    }

    #[test]
    fn identical_saves_reuse_id_and_created_at() {
        let dir = TempDir::new().unwrap();
        let store = ProfileStore::with_root(dir.path());

        let first = store
            .save(save_input("py", "https://example.com/a.git", sample_modules()))
            .unwrap();
        let second = store
            .save(save_input("py", "https://example.com/a.git", sample_modules()))
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.created_at, second.created_at);
    }

    #[test]
    fn derive_id_is_a_pure_function_of_sources_and_hash() {
        let hash = content_hash(&sample_modules(), "python");
        let a = derive_id(&[git_source("https://example.com/a.git")], &hash);
        let b = derive_id(&[git_source("https://example.com/a.git")], &hash);
        let c = derive_id(&[git_source("https://example.com/b.git")], &hash);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.contains("__default__"));
        assert!(a.ends_with(&hash[..8]));
    }

    #[test]
    fn content_hash_is_permutation_invariant() {
        let mut modules = sample_modules();
        modules.push(Module {
            pack_name: "y".to_string(),
            pack_version: "2.0.0".to_string(),
            commit: "def".to_string(),
            id: "b".to_string(),
            priority: 5,
            content: "b\n".to_string(),
            apply: ApplyConfig::default(),
        });
        let forward = content_hash(&modules, "default");
        modules.reverse();
        let backward = content_hash(&modules, "default");
        assert_eq!(forward, backward);
    }

    #[test]
    fn alias_collision_on_save_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = ProfileStore::with_root(dir.path());

        store
            .save(save_input("python", "https://example.com/a.git", sample_modules()))
            .unwrap();
        let other = vec![Module {
            pack_name: "y".to_string(),
            pack_version: "1.0.0".to_string(),
            commit: "def".to_string(),
            id: "b".to_string(),
            priority: 1,
            content: "b\n".to_string(),
            apply: ApplyConfig::default(),
        }];
        let err = store
            .save(save_input("python", "https://example.com/b.git", other))
            .unwrap_err();
        assert!(matches!(err, ProfileError::AliasTaken { .. }));
    }

    #[test]
    fn ambiguous_alias_on_resolve_is_fatal() {
        let dir = TempDir::new().unwrap();
        let store = ProfileStore::with_root(dir.path());

        store
            .save(save_input("py", "https://example.com/a.git", sample_modules()))
            .unwrap();
        // Second profile sneaks in the same alias by writing metadata
        // directly, simulating a store mutated by an older tool.
        let rogue_dir = dir.path().join("rogue-id");
        std::fs::create_dir_all(&rogue_dir).unwrap();
        std::fs::write(
            rogue_dir.join("profile.json"),
            r#"{"id":"rogue-id","alias":"py","sources":[],"createdAt":"2024-01-01T00:00:00Z","contentHash":"x","moduleCount":0}"#,
        )
        .unwrap();

        let err = store.resolve("py").unwrap_err();
        assert!(matches!(err, ProfileError::AmbiguousAlias(_)));
    }

    #[test]
    fn legacy_metadata_is_unsupported_even_via_alias() {
        let dir = TempDir::new().unwrap();
        let store = ProfileStore::with_root(dir.path());
        let legacy_dir = dir.path().join("legacy-id");
        std::fs::create_dir_all(&legacy_dir).unwrap();
        std::fs::write(
            legacy_dir.join("profile.json"),
            r#"{"id":"legacy-id","alias":"old","sourceType":"git","sourceRef":"https://example.com/a.git","createdAt":"2024-01-01T00:00:00Z","contentHash":"x","moduleCount":1}"#,
        )
        .unwrap();

        let by_id = store.resolve("legacy-id").unwrap_err();
        assert!(by_id.to_string().contains("unsupported profile format"));
        let by_alias = store.resolve("old").unwrap_err();
        assert!(by_alias.to_string().contains("unsupported profile format"));
    }

    #[test]
    fn missing_root_lists_empty() {
        let dir = TempDir::new().unwrap();
        let store = ProfileStore::with_root(dir.path().join("never-created"));
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn remove_returns_metadata_and_deletes_directory() {
        let dir = TempDir::new().unwrap();
        let store = ProfileStore::with_root(dir.path());
        let meta = store
            .save(save_input("py", "https://example.com/a.git", sample_modules()))
            .unwrap();

        let (removed, path) = store.remove("py").unwrap();
        assert_eq!(removed.id, meta.id);
        assert!(!path.exists());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn remove_all_clears_the_store() {
        let dir = TempDir::new().unwrap();
        let store = ProfileStore::with_root(dir.path());
        store
            .save(save_input("a", "https://example.com/a.git", sample_modules()))
            .unwrap();
        let removed = store.remove_all().unwrap();
        assert_eq!(removed.len(), 1);
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn unknown_reference_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = ProfileStore::with_root(dir.path());
        let err = store.resolve("nope").unwrap_err();
        assert_eq!(err.to_string(), "profile \"nope\" not found locally");
    }
}
