use crate::{glob, project::Project, validation::ValidationError};
use anyhow::{Context, Result};
use std::fmt;

/// A cluster and namespace an application may deploy to. Each field is a
/// glob pattern and may be negated with a leading `!`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Destination {
    pub server: String,
    pub namespace: String,
    pub name: String,
}

/// A cluster known to the control plane, identified by its API server URL
/// and its name. Either may be empty.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Cluster {
    pub server: String,
    pub name: String,
}

/// Lists the clusters scoped to a project.
#[async_trait::async_trait]
pub trait ClusterLister {
    async fn list_project_clusters(&self, project: &str) -> Result<Vec<Cluster>>;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Verdict {
    Allow,
    Deny,
    Skip,
}

// === impl Destination ===

impl Destination {
    pub fn new(
        server: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            server: server.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// `!*` denies everything, which is never meaningful in an allow list.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (field, value) in [
            ("server", &self.server),
            ("name", &self.name),
            ("namespace", &self.namespace),
        ] {
            let pattern = value.strip_prefix('!').unwrap_or(value);
            if value == "!*" || glob::Glob::new(pattern).is_err() {
                return Err(ValidationError::InvalidDestination {
                    field,
                    value: value.clone(),
                });
            }
        }
        Ok(())
    }

    fn evaluate(&self, cluster: &Cluster, namespace: &str) -> Verdict {
        let server_matched =
            !cluster.server.is_empty() && glob::matches(&self.server, &cluster.server, true);
        let name_matched =
            !cluster.name.is_empty() && glob::matches(&self.name, &cluster.name, true);
        let namespace_matched = glob::matches(&self.namespace, namespace, true);
        let cluster_matched = server_matched || name_matched;

        if cluster_matched && namespace_matched {
            return Verdict::Allow;
        }

        // A negated field only rejects a value that is present.
        let server_rejected = glob::is_deny_pattern(&self.server)
            && !cluster.server.is_empty()
            && !server_matched;
        let name_rejected =
            glob::is_deny_pattern(&self.name) && !cluster.name.is_empty() && !name_matched;
        let namespace_rejected = glob::is_deny_pattern(&self.namespace) && !namespace_matched;

        if name_rejected
            || (server_rejected && namespace_matched)
            || (namespace_rejected && cluster_matched)
        {
            Verdict::Deny
        } else {
            Verdict::Skip
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "server '{}', name '{}', namespace '{}'",
            self.server, self.name, self.namespace
        )
    }
}

// === impl Cluster ===

impl Cluster {
    pub fn new(server: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            name: name.into(),
        }
    }

    fn is_listed(&self, clusters: &[Cluster]) -> bool {
        clusters.iter().any(|c| {
            (!self.server.is_empty() && c.server == self.server)
                || (!self.name.is_empty() && c.name == self.name)
        })
    }
}

// === impl ClusterLister ===

#[async_trait::async_trait]
impl<F> ClusterLister for F
where
    F: Fn(&str) -> Result<Vec<Cluster>> + Send + Sync,
{
    async fn list_project_clusters(&self, project: &str) -> Result<Vec<Cluster>> {
        (self)(project)
    }
}

// === impl Project ===

impl Project {
    /// Returns true if the project permits deploying to `namespace` on
    /// `cluster`.
    ///
    /// Destinations are evaluated in order and the last one that allows or
    /// denies the target decides. A negated pattern that rejects the target
    /// denies it. When no destination decides, the target is denied.
    pub async fn is_destination_permitted<L>(
        &self,
        cluster: &Cluster,
        namespace: &str,
        lister: &L,
    ) -> Result<bool>
    where
        L: ClusterLister + ?Sized + Sync,
    {
        if self.permit_only_project_scoped_clusters {
            let clusters = lister
                .list_project_clusters(&self.name)
                .await
                .context("could not retrieve project clusters")?;
            if !cluster.is_listed(&clusters) {
                tracing::debug!(
                    project = %self.name,
                    server = %cluster.server,
                    cluster = %cluster.name,
                    "Cluster is not scoped to project"
                );
                return Ok(false);
            }
        }

        let mut permitted = false;
        for destination in &self.destinations {
            match destination.evaluate(cluster, namespace) {
                Verdict::Allow => permitted = true,
                Verdict::Deny => permitted = false,
                Verdict::Skip => {}
            }
        }
        Ok(permitted)
    }

    /// Returns true if applications may be defined in `namespace`. The
    /// controller's own namespace is always permitted; other namespaces must
    /// match one of the project's source namespace patterns.
    pub fn is_app_namespace_permitted(&self, namespace: &str, controller_namespace: &str) -> bool {
        if namespace.is_empty() || namespace == controller_namespace {
            return true;
        }
        self.source_namespaces
            .iter()
            .any(|p| glob::is_match(p, namespace))
    }
}
