//! Project ruleset (`rulepack.json`) and lockfile (`rulepack.lock.json`)
//! parsing, validation, and deterministic writes.
//!
//! Both files are version-controlled artifacts that consumers diff, so every
//! write uses two-space indentation, struct-declared key order, and a
//! trailing newline.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// The project manifest filename.
pub const RULESET_FILE: &str = "rulepack.json";

/// The lockfile filename.
pub const LOCK_FILE: &str = "rulepack.lock.json";

/// Lockfile format version written by install.
pub const LOCK_VERSION: &str = "0.1";

/// Commit placeholder recorded for local dependencies.
pub const LOCAL_COMMIT: &str = "local";

/// Commit placeholder recorded for profile dependencies.
pub const PROFILE_COMMIT: &str = "profile";

/// Errors that can occur when working with the ruleset or lockfile.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("parse {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },

    #[error("rulepack missing specVersion")]
    MissingSpecVersion,

    #[error("invalid dependency: {0}")]
    InvalidDependency(String),

    #[error("write {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
}

/// The kind of dependency source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Remote versioned repository.
    #[default]
    Git,
    /// Directory on the local filesystem.
    Local,
    /// Saved profile snapshot.
    Profile,
}

impl SourceKind {
    /// Returns the kind as a string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Git => "git",
            Self::Local => "local",
            Self::Profile => "profile",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A dependency on a rule pack.
///
/// Exactly one source kind dictates which fields are legal; cross-shape
/// field contamination is rejected at parse time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawDependency", into = "RawDependency")]
pub enum Dependency {
    /// Remote repository pinned by ref or semver constraint.
    Git {
        uri: String,
        version: Option<String>,
        reference: Option<String>,
        export: Option<String>,
    },
    /// Pack rooted in a local directory.
    Local { path: String, export: Option<String> },
    /// Saved profile snapshot, referenced by id or alias.
    Profile {
        profile: String,
        export: Option<String>,
    },
}

impl Dependency {
    /// The source kind of this dependency.
    #[must_use]
    pub fn kind(&self) -> SourceKind {
        match self {
            Self::Git { .. } => SourceKind::Git,
            Self::Local { .. } => SourceKind::Local,
            Self::Profile { .. } => SourceKind::Profile,
        }
    }

    /// The requested export name, if any.
    #[must_use]
    pub fn export(&self) -> Option<&str> {
        match self {
            Self::Git { export, .. } | Self::Local { export, .. } | Self::Profile { export, .. } => {
                export.as_deref()
            }
        }
    }

    /// The user-facing source reference (uri, path, or profile id/alias).
    #[must_use]
    pub fn reference(&self) -> &str {
        match self {
            Self::Git { uri, .. } => uri,
            Self::Local { path, .. } => path,
            Self::Profile { profile, .. } => profile,
        }
    }
}

/// Serde surface for [`Dependency`] matching the on-disk JSON shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawDependency {
    source: String,
    uri: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    path: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    profile: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    version: String,
    #[serde(rename = "ref", skip_serializing_if = "String::is_empty")]
    reference: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    export: String,
}

impl TryFrom<RawDependency> for Dependency {
    type Error = ConfigError;

    fn try_from(raw: RawDependency) -> Result<Self, Self::Error> {
        let invalid = |reason: &str| ConfigError::InvalidDependency(reason.to_string());
        // Backward compatibility: older artifacts omitted source for git.
        let source = if raw.source.is_empty() {
            "git"
        } else {
            raw.source.as_str()
        };
        let none_if_empty = |s: String| if s.is_empty() { None } else { Some(s) };
        match source {
            "git" => {
                if raw.uri.is_empty() {
                    return Err(invalid("git source requires uri"));
                }
                if !raw.path.is_empty() || !raw.profile.is_empty() {
                    return Err(invalid("git source does not support path/profile"));
                }
                if !raw.reference.is_empty() && !raw.version.is_empty() {
                    return Err(invalid("use only one of version or ref"));
                }
                Ok(Self::Git {
                    uri: raw.uri,
                    version: none_if_empty(raw.version),
                    reference: none_if_empty(raw.reference),
                    export: none_if_empty(raw.export),
                })
            }
            "local" => {
                if raw.path.is_empty() {
                    return Err(invalid("local source requires path"));
                }
                if !raw.uri.is_empty() || !raw.profile.is_empty() {
                    return Err(invalid("local source does not support uri/profile"));
                }
                if !raw.reference.is_empty() || !raw.version.is_empty() {
                    return Err(invalid("local source does not support version or ref"));
                }
                Ok(Self::Local {
                    path: raw.path,
                    export: none_if_empty(raw.export),
                })
            }
            "profile" => {
                if raw.profile.is_empty() {
                    return Err(invalid("profile source requires profile id"));
                }
                if !raw.uri.is_empty() || !raw.path.is_empty() {
                    return Err(invalid("profile source does not support uri/path"));
                }
                if !raw.reference.is_empty() || !raw.version.is_empty() {
                    return Err(invalid("profile source does not support version or ref"));
                }
                Ok(Self::Profile {
                    profile: raw.profile,
                    export: none_if_empty(raw.export),
                })
            }
            other => Err(ConfigError::InvalidDependency(format!(
                "unsupported source \"{other}\""
            ))),
        }
    }
}

impl From<Dependency> for RawDependency {
    fn from(dep: Dependency) -> Self {
        let mut raw = Self {
            source: dep.kind().as_str().to_string(),
            ..Self::default()
        };
        match dep {
            Dependency::Git {
                uri,
                version,
                reference,
                export,
            } => {
                raw.uri = uri;
                raw.version = version.unwrap_or_default();
                raw.reference = reference.unwrap_or_default();
                raw.export = export.unwrap_or_default();
            }
            Dependency::Local { path, export } => {
                raw.path = path;
                raw.export = export.unwrap_or_default();
            }
            Dependency::Profile { profile, export } => {
                raw.profile = profile;
                raw.export = export.unwrap_or_default();
            }
        }
        raw
    }
}

/// A priority override keyed by module id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Override {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
}

/// Render configuration for one target.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TargetEntry {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub out_dir: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub out_file: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub per_module: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ext: String,
}

/// The project manifest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ruleset {
    #[serde(default)]
    pub spec_version: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<Dependency>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overrides: Vec<Override>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub targets: BTreeMap<String, TargetEntry>,
}

impl Ruleset {
    /// A starter ruleset with the three built-in targets preconfigured.
    #[must_use]
    pub fn starter(name: &str) -> Self {
        let mut targets = BTreeMap::new();
        targets.insert(
            "cursor".to_string(),
            TargetEntry {
                out_dir: ".cursor/rules".to_string(),
                per_module: true,
                ext: ".mdc".to_string(),
                ..TargetEntry::default()
            },
        );
        targets.insert(
            "copilot".to_string(),
            TargetEntry {
                out_file: ".github/copilot-instructions.md".to_string(),
                ..TargetEntry::default()
            },
        );
        targets.insert(
            "codex".to_string(),
            TargetEntry {
                out_file: ".codex/rules.md".to_string(),
                ..TargetEntry::default()
            },
        );
        Self {
            spec_version: "0.1".to_string(),
            name: name.to_string(),
            targets,
            ..Self::default()
        }
    }

    /// Load and validate a ruleset from a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or fails
    /// dependency shape validation.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = read_file(path)?;
        let ruleset: Self = parse_json(path, &content)?;
        if ruleset.spec_version.is_empty() {
            return Err(ConfigError::MissingSpecVersion);
        }
        Ok(ruleset)
    }

    /// Write the ruleset with deterministic formatting.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        write_json(path.as_ref(), self)
    }
}

/// One resolved dependency entry, positionally aligned with the manifest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LockedSource {
    pub source: SourceKind,
    pub uri: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub profile: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub requested: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub resolved_version: String,
    pub commit: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub content_hash: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub export: String,
}

impl LockedSource {
    /// The source key this entry pins (uri, path, or profile id).
    #[must_use]
    pub fn key(&self) -> &str {
        match self.source {
            SourceKind::Git => &self.uri,
            SourceKind::Local => &self.path,
            SourceKind::Profile => &self.profile,
        }
    }

    /// Short human-readable reference for listings.
    #[must_use]
    pub fn display_reference(&self) -> String {
        let pick = match self.source {
            SourceKind::Git => &self.commit,
            SourceKind::Local | SourceKind::Profile => {
                if self.content_hash.is_empty() {
                    &self.commit
                } else {
                    &self.content_hash
                }
            }
        };
        if pick.is_empty() {
            "-".to_string()
        } else {
            short12(pick).to_string()
        }
    }
}

/// The lockfile written by install.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lockfile {
    #[serde(default)]
    pub lock_version: String,
    #[serde(default)]
    pub resolved: Vec<LockedSource>,
}

impl Lockfile {
    /// A new empty lockfile at the current format version.
    #[must_use]
    pub fn new() -> Self {
        Self {
            lock_version: LOCK_VERSION.to_string(),
            resolved: Vec::new(),
        }
    }

    /// Load a lockfile from a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = read_file(path)?;
        parse_json(path, &content)
    }

    /// Write the lockfile with deterministic formatting.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        write_json(path.as_ref(), self)
    }
}

/// First 12 characters of a hash or commit, for display.
#[must_use]
pub fn short12(value: &str) -> &str {
    if value.len() > 12 {
        &value[..12]
    } else {
        value
    }
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })
}

fn parse_json<T: serde::de::DeserializeOwned>(path: &Path, content: &str) -> Result<T, ConfigError> {
    serde_json::from_str(content).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), ConfigError> {
    // Stable key ordering comes from struct field declaration order.
    let mut text = serde_json::to_string_pretty(value).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })?;
    text.push('\n');
    std::fs::write(path, text).map_err(|source| ConfigError::Write {
        path: path.display().to_string(),
        source,
    })
}
