use crate::{rbac::PolicyError, sync_window::WindowError, WindowKind};

/// Errors describing why a project, or a change to one, is rejected.
#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("source repository has an invalid format, '{0}'")]
    InvalidSourceRepo(String),

    #[error("source repository '{0}' already exists")]
    DuplicateSourceRepo(String),

    #[error("source namespace '{0}' already exists")]
    DuplicateSourceNamespace(String),

    #[error("destination {field} has an invalid format, '{value}'")]
    InvalidDestination { field: &'static str, value: String },

    #[error("destination {0} already exists")]
    DuplicateDestination(String),

    #[error("invalid role name '{0}': must consist of alphanumeric characters or '-', and must start and end with an alphanumeric character")]
    InvalidRoleName(String),

    #[error("role '{0}' already exists")]
    DuplicateRole(String),

    #[error("role '{0}' does not exist in project")]
    RoleNotFound(String),

    #[error("invalid group name '{group}': {reason}")]
    InvalidGroupName { group: String, reason: &'static str },

    #[error("group '{group}' already exists in role '{role}'")]
    DuplicateGroup { role: String, group: String },

    #[error("policy '{policy}' already exists in role '{role}'")]
    DuplicatePolicy { role: String, policy: String },

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error("window '{kind}':'{schedule}':'{duration}' requires one of application, cluster or namespace")]
    MissingWindowSelector {
        kind: WindowKind,
        schedule: String,
        duration: String,
    },

    #[error("window '{kind}':'{schedule}':'{duration}' already exists, update or edit")]
    DuplicateWindow {
        kind: WindowKind,
        schedule: String,
        duration: String,
    },

    #[error("no window found at index {0}")]
    WindowNotFound(usize),

    #[error(transparent)]
    Window(#[from] WindowError),
}
