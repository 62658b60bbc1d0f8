use crate::{
    destination::Destination,
    glob,
    group_kind::GroupKind,
    rbac::Role,
    sync_window::{SyncWindow, SyncWindows, WindowUpdate},
    validation::ValidationError,
};
use ahash::AHashSet;
use parking_lot::RwLock;
use std::{
    ops::{Deref, DerefMut},
    sync::Arc,
};

/// A project groups applications and bounds what they may do: where their
/// manifests come from, where they deploy, which resource kinds they may
/// create, who may act on them, and when they may sync.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Project {
    pub name: String,
    pub description: String,
    pub source_repos: Vec<String>,
    /// Namespaces in which applications of this project may live.
    pub source_namespaces: Vec<String>,
    pub destinations: Vec<Destination>,
    pub cluster_resource_whitelist: Vec<GroupKind>,
    pub cluster_resource_blacklist: Vec<GroupKind>,
    /// `None` permits every namespaced kind; `Some(vec![])` permits none.
    pub namespace_resource_whitelist: Option<Vec<GroupKind>>,
    pub namespace_resource_blacklist: Vec<GroupKind>,
    pub permit_only_project_scoped_clusters: bool,
    pub roles: Vec<Role>,
    pub sync_windows: SyncWindows,
}

/// A copy of a project that is being edited. It becomes a [`Project`] again
/// only once it validates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProjectDraft(Project);

/// The current configuration of a project, replaced wholesale on update.
///
/// Readers take a cheap snapshot with [`SharedProject::load`] and are never
/// affected by a concurrent update.
#[derive(Clone, Debug)]
pub struct SharedProject(Arc<RwLock<Arc<Project>>>);

// === impl Project ===

impl Project {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Checks the project's invariants, reporting the first violation.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut repos = AHashSet::new();
        for repo in &self.source_repos {
            let pattern = repo.strip_prefix('!').unwrap_or(repo);
            if repo == "!*" || glob::Glob::with_separator(pattern, '/').is_err() {
                return Err(ValidationError::InvalidSourceRepo(repo.clone()));
            }
            if !repos.insert(repo.as_str()) {
                return Err(ValidationError::DuplicateSourceRepo(repo.clone()));
            }
        }

        let mut namespaces = AHashSet::new();
        for ns in &self.source_namespaces {
            if !namespaces.insert(ns.as_str()) {
                return Err(ValidationError::DuplicateSourceNamespace(ns.clone()));
            }
        }

        let mut destinations = AHashSet::new();
        for dst in &self.destinations {
            dst.validate()?;
            if !destinations.insert(dst) {
                return Err(ValidationError::DuplicateDestination(dst.to_string()));
            }
        }

        let mut roles = AHashSet::new();
        for role in &self.roles {
            if !roles.insert(role.name.as_str()) {
                return Err(ValidationError::DuplicateRole(role.name.clone()));
            }
            role.validate(&self.name)?;
        }

        let mut windows = AHashSet::new();
        for window in &self.sync_windows {
            if !windows.insert(window) {
                return Err(duplicate_window(window));
            }
            validate_window(window)?;
        }

        Ok(())
    }

    /// Returns the servers of all destinations, in order.
    pub fn destination_clusters(&self) -> Vec<String> {
        self.destinations.iter().map(|d| d.server.clone()).collect()
    }

    pub fn draft(&self) -> ProjectDraft {
        ProjectDraft(self.clone())
    }
}

fn validate_window(window: &SyncWindow) -> Result<(), ValidationError> {
    if window.applications.is_empty() && window.namespaces.is_empty() && window.clusters.is_empty()
    {
        return Err(ValidationError::MissingWindowSelector {
            kind: window.kind,
            schedule: window.schedule.clone(),
            duration: window.duration.clone(),
        });
    }
    window.validate()?;
    Ok(())
}

fn duplicate_window(window: &SyncWindow) -> ValidationError {
    ValidationError::DuplicateWindow {
        kind: window.kind,
        schedule: window.schedule.clone(),
        duration: window.duration.clone(),
    }
}

// === impl ProjectDraft ===

impl ProjectDraft {
    pub fn new(project: Project) -> Self {
        Self(project)
    }

    /// Appends a window after checking that it is well-formed and not
    /// already present.
    pub fn add_window(&mut self, window: SyncWindow) -> Result<(), ValidationError> {
        validate_window(&window)?;
        if self.0.sync_windows.iter().any(|w| *w == window) {
            return Err(duplicate_window(&window));
        }
        tracing::debug!(project = %self.0.name, kind = %window.kind, schedule = %window.schedule, "Adding sync window");
        self.0.sync_windows.push(window);
        Ok(())
    }

    pub fn delete_window(&mut self, index: usize) -> Result<SyncWindow, ValidationError> {
        self.0
            .sync_windows
            .remove(index)
            .ok_or(ValidationError::WindowNotFound(index))
    }

    pub fn update_window(
        &mut self,
        index: usize,
        update: WindowUpdate,
    ) -> Result<(), ValidationError> {
        let window = self
            .0
            .sync_windows
            .get_mut(index)
            .ok_or(ValidationError::WindowNotFound(index))?;
        window.update(update)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.0.validate()
    }

    /// Returns the edited project if it is valid.
    pub fn finish(self) -> Result<Project, ValidationError> {
        self.0.validate()?;
        Ok(self.0)
    }
}

impl Deref for ProjectDraft {
    type Target = Project;

    fn deref(&self) -> &Project {
        &self.0
    }
}

impl DerefMut for ProjectDraft {
    fn deref_mut(&mut self) -> &mut Project {
        &mut self.0
    }
}

impl From<Project> for ProjectDraft {
    fn from(project: Project) -> Self {
        Self(project)
    }
}

// === impl SharedProject ===

impl SharedProject {
    pub fn new(project: Project) -> Result<Self, ValidationError> {
        project.validate()?;
        Ok(Self(Arc::new(RwLock::new(Arc::new(project)))))
    }

    pub fn load(&self) -> Arc<Project> {
        self.0.read().clone()
    }

    /// Edits a copy of the current project and installs it if the result is
    /// valid. On error, the current project is left untouched.
    pub fn update<T, E>(
        &self,
        edit: impl FnOnce(&mut ProjectDraft) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<ValidationError>,
    {
        let mut current = self.0.write();
        let mut draft = current.draft();
        let out = edit(&mut draft)?;
        let project = draft.finish()?;
        tracing::debug!(project = %project.name, "Updated project");
        *current = Arc::new(project);
        Ok(out)
    }
}
