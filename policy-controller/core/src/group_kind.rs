use crate::{glob, project::Project};
use std::fmt;

/// An API group and kind. In allow and deny lists, both fields are glob
/// patterns.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct GroupKind {
    pub group: String,
    pub kind: String,
}

// === impl GroupKind ===

impl GroupKind {
    pub fn new(group: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            kind: kind.into(),
        }
    }

    fn selects(&self, gk: &GroupKind) -> bool {
        glob::is_match(&self.group, &gk.group) && glob::is_match(&self.kind, &gk.kind)
    }
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            f.write_str(&self.kind)
        } else {
            write!(f, "{}/{}", self.group, self.kind)
        }
    }
}

// === impl Project ===

impl Project {
    /// Returns true if resources of the given kind may be deployed.
    ///
    /// Namespaced kinds are permitted unless the namespace allow list is set
    /// and excludes them. Cluster-scoped kinds must be on the cluster allow
    /// list. In both cases the corresponding deny list wins.
    pub fn is_group_kind_permitted(&self, gk: &GroupKind, namespaced: bool) -> bool {
        let selected = |list: &[GroupKind]| list.iter().any(|entry| entry.selects(gk));

        if namespaced {
            let allowed = self
                .namespace_resource_whitelist
                .as_deref()
                .map_or(true, |list| selected(list));
            allowed && !selected(self.namespace_resource_blacklist.as_slice())
        } else {
            selected(self.cluster_resource_whitelist.as_slice())
                && !selected(self.cluster_resource_blacklist.as_slice())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gks(entries: &[(&str, &str)]) -> Vec<GroupKind> {
        entries.iter().map(|(g, k)| GroupKind::new(*g, *k)).collect()
    }

    #[test]
    fn namespace_allow_list() {
        let p = Project {
            namespace_resource_whitelist: Some(gks(&[("apps", "Deployment")])),
            ..Project::default()
        };
        assert!(p.is_group_kind_permitted(&GroupKind::new("apps", "Deployment"), true));
        assert!(!p.is_group_kind_permitted(&GroupKind::new("apps", "ReplicaSet"), true));
    }

    #[test]
    fn empty_namespace_allow_list_permits_nothing() {
        let p = Project {
            namespace_resource_whitelist: Some(vec![]),
            namespace_resource_blacklist: gks(&[("apps", "Deployment")]),
            ..Project::default()
        };
        assert!(!p.is_group_kind_permitted(&GroupKind::new("apps", "ReplicaSet"), true));
    }

    #[test]
    fn namespace_deny_list() {
        let p = Project {
            namespace_resource_blacklist: gks(&[("apps", "Deployment")]),
            ..Project::default()
        };
        assert!(!p.is_group_kind_permitted(&GroupKind::new("apps", "Deployment"), true));
        assert!(p.is_group_kind_permitted(&GroupKind::new("apps", "ReplicaSet"), true));
    }

    #[test]
    fn wildcards() {
        let p = Project {
            namespace_resource_whitelist: Some(gks(&[("apps", "*")])),
            namespace_resource_blacklist: gks(&[("*", "Secret")]),
            cluster_resource_whitelist: gks(&[("*.k8s.io", "*")]),
            ..Project::default()
        };
        assert!(p.is_group_kind_permitted(&GroupKind::new("apps", "StatefulSet"), true));
        assert!(!p.is_group_kind_permitted(&GroupKind::new("", "ConfigMap"), true));
        assert!(!p.is_group_kind_permitted(&GroupKind::new("apps", "Secret"), true));
        assert!(p.is_group_kind_permitted(
            &GroupKind::new("rbac.authorization.k8s.io", "ClusterRole"),
            false
        ));
        assert!(!p.is_group_kind_permitted(&GroupKind::new("", "Namespace"), false));
    }

    #[test]
    fn deny_list_wins() {
        let p = Project {
            cluster_resource_whitelist: gks(&[("*", "*")]),
            cluster_resource_blacklist: gks(&[("*", "*")]),
            ..Project::default()
        };
        assert!(!p.is_group_kind_permitted(&GroupKind::new("", "Namespace"), false));
        assert!(p.is_group_kind_permitted(&GroupKind::new("apps", "Action"), true));
    }

    #[test]
    fn cluster_scope_requires_allow_list() {
        let empty = Project {
            cluster_resource_whitelist: vec![],
            namespace_resource_whitelist: Some(gks(&[("*", "*")])),
            ..Project::default()
        };
        assert!(!empty.is_group_kind_permitted(&GroupKind::new("", "Namespace"), false));
        assert!(empty.is_group_kind_permitted(&GroupKind::new("apps", "Action"), true));

        let unset = Project::default();
        assert!(!unset.is_group_kind_permitted(&GroupKind::new("", "Namespace"), false));
        assert!(unset.is_group_kind_permitted(&GroupKind::new("apps", "Action"), true));
    }

    #[test]
    fn display() {
        assert_eq!(GroupKind::new("", "Namespace").to_string(), "Namespace");
        assert_eq!(GroupKind::new("apps", "Deployment").to_string(), "apps/Deployment");
    }
}
