//! autocommit core library — domain types, configuration, and the pure
//! decision functions of the auto-commit engine.
//!
//! - [`types`] — newtypes and domain structs
//! - [`config`] — YAML configuration load / save / per-repo overlay
//! - [`filter`] — glob change filter
//! - [`gate`] — diagnostic commit gate
//! - [`message`] — commit message assembly
//! - [`enablement`] — attach/detach decisions
//! - [`state`] — observable engine state and activity guards
//! - [`branch_store`] — persisted per-branch enablement

pub mod branch_store;
pub mod config;
pub mod enablement;
pub mod error;
pub mod filter;
pub mod gate;
pub mod message;
pub mod state;
pub mod types;

pub use config::{AiConfig, Config};
pub use error::ConfigError;
pub use filter::FileFilter;
pub use message::{Clock, FixedClock, MessageFormat, SystemClock};
pub use state::{Activity, ActivityGuard, EngineState, StateField, StateStore};
pub use types::{
    AutoPull, AutoPush, ChangeKind, ChangeRecord, CommitInfo, CommitOptions, Diagnostic,
    DiagnosticMap, GitRef, PushMode, RefKind, RepoHandle, RepoId, Severity, ValidationLevel,
};
