#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Project-scoped authorization and sync windows.
//!
//! A [`Project`] decides which repositories applications may be sourced
//! from, which clusters and namespaces they may deploy to, which resource
//! kinds they may create, which roles may act on them, and when they may be
//! synced.

pub mod backoff;
pub mod destination;
pub mod duration;
pub mod glob;
pub mod group_kind;
pub mod project;
pub mod rbac;
pub mod schedule;
mod source;
pub mod sync_window;
pub mod validation;

pub use self::{
    backoff::{Backoff, BackoffError, RetryStrategy},
    destination::{Cluster, ClusterLister, Destination},
    group_kind::GroupKind,
    project::{Project, ProjectDraft, SharedProject},
    rbac::{JwtToken, PolicyError, PolicyStatement, Role},
    schedule::Schedule,
    sync_window::{Application, SyncWindow, SyncWindows, WindowError, WindowKind, WindowUpdate},
    validation::ValidationError,
};
