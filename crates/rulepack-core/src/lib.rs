//! Core engine for composing rule packs into target-native rule outputs.
//!
//! This crate provides:
//! - Parsing and validation of `rulepack.json` rulesets and pack manifests
//! - Dependency resolution over git, local, and profile sources
//! - Lockfile generation and drift detection for reproducible builds
//! - Deterministic module composition (overrides, duplicate checks, ordering)
//! - A content-addressed global profile store for snapshot reuse
//! - Target renderers for cursor, copilot, and codex outputs

pub mod compose;
pub mod config;
pub mod git;
pub mod ops;
pub mod pack;
pub mod profile;
pub mod render;
pub mod resolver;

pub use compose::{compose, ComposeError};
pub use config::{
    ConfigError, Dependency, LockedSource, Lockfile, Override, Ruleset, SourceKind, TargetEntry,
    LOCAL_COMMIT, LOCK_FILE, LOCK_VERSION, PROFILE_COMMIT, RULESET_FILE,
};
pub use git::{select_tag, GitClient, GitError, Resolution};
pub use pack::{
    expand_dependency, sanitize_module_id, ApplyConfig, ApplyRule, DirFileReader, Expansion,
    ExportSelector, FileReader, Module, ModuleEntry, PackError, RulePack,
};
pub use profile::{Metadata, ProfileError, ProfileStore, SaveInput, SourceSnapshot};
pub use render::{CursorTarget, RenderError};
pub use resolver::{install, InstallOutcome, ResolveError, ResolvedRow};
