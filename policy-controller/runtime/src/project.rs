use crate::{
    core::{Destination, GroupKind, JwtToken, Project, Role, SyncWindow, SyncWindows, WindowKind},
    k8s::{app_project as api, AppProjectSpec},
};
use anyhow::{Context, Result};

/// Builds a core project from an `AppProject` spec. The result is not
/// validated.
pub(crate) fn from_spec(name: &str, spec: AppProjectSpec) -> Result<Project> {
    let AppProjectSpec {
        description,
        source_repos,
        source_namespaces,
        destinations,
        cluster_resource_whitelist,
        cluster_resource_blacklist,
        namespace_resource_whitelist,
        namespace_resource_blacklist,
        roles,
        sync_windows,
        permit_only_project_scoped_clusters,
    } = spec;

    let sync_windows = sync_windows
        .into_iter()
        .enumerate()
        .map(|(i, w)| sync_window(w).with_context(|| format!("invalid sync window at index {i}")))
        .collect::<Result<SyncWindows>>()?;

    Ok(Project {
        name: name.to_string(),
        description: description.unwrap_or_default(),
        source_repos,
        source_namespaces,
        destinations: destinations.into_iter().map(destination).collect(),
        cluster_resource_whitelist: group_kinds(cluster_resource_whitelist),
        cluster_resource_blacklist: group_kinds(cluster_resource_blacklist),
        namespace_resource_whitelist: namespace_resource_whitelist.map(group_kinds),
        namespace_resource_blacklist: group_kinds(namespace_resource_blacklist),
        permit_only_project_scoped_clusters,
        roles: roles.into_iter().map(role).collect(),
        sync_windows,
    })
}

fn destination(dst: api::ApplicationDestination) -> Destination {
    let api::ApplicationDestination {
        server,
        namespace,
        name,
    } = dst;
    Destination::new(
        server.unwrap_or_default(),
        namespace.unwrap_or_default(),
        name.unwrap_or_default(),
    )
}

fn group_kinds(gks: Vec<api::GroupKind>) -> Vec<GroupKind> {
    gks.into_iter()
        .map(|api::GroupKind { group, kind }| GroupKind::new(group, kind))
        .collect()
}

fn role(role: api::ProjectRole) -> Role {
    Role {
        name: role.name,
        description: role.description.unwrap_or_default(),
        policies: role.policies,
        groups: role.groups,
        jwt_tokens: role
            .jwt_tokens
            .into_iter()
            .map(|t| JwtToken {
                id: t.id.unwrap_or_default(),
                issued_at: t.iat,
                expires_at: t.exp.unwrap_or_default(),
            })
            .collect(),
    }
}

fn sync_window(w: api::SyncWindow) -> Result<SyncWindow> {
    let kind = w.kind.parse::<WindowKind>()?;
    Ok(SyncWindow::new(kind, w.schedule, w.duration)
        .with_applications(w.applications)
        .with_namespaces(w.namespaces)
        .with_clusters(w.clusters)
        .with_time_zone(w.time_zone.unwrap_or_default())
        .with_manual_sync(w.manual_sync)
        .with_and_operator(w.use_and_operator)
        .with_description(w.description.unwrap_or_default()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(value: serde_json::Value) -> AppProjectSpec {
        serde_json::from_value(value).expect("spec must deserialize")
    }

    #[test]
    fn converts_spec() {
        let project = from_spec(
            "team",
            spec(serde_json::json!({
                "sourceRepos": ["https://github.com/example/*"],
                "destinations": [{ "server": "https://kubernetes.default.svc", "namespace": "team-*" }],
                "namespaceResourceWhitelist": [],
                "clusterResourceWhitelist": [{ "group": "", "kind": "Namespace" }],
                "roles": [{
                    "name": "ci",
                    "policies": ["p, proj:team:ci, applications, sync, team/*, allow"],
                    "jwtTokens": [{ "iat": 1700000000 }],
                }],
                "syncWindows": [{
                    "kind": "deny",
                    "schedule": "0 22 * * *",
                    "duration": "8h",
                    "namespaces": ["team-prod"],
                    "manualSync": true,
                }],
            })),
        )
        .unwrap();

        assert_eq!(project.name, "team");
        assert_eq!(
            project.destinations,
            vec![Destination::new("https://kubernetes.default.svc", "team-*", "")]
        );
        assert_eq!(project.namespace_resource_whitelist, Some(vec![]));
        assert_eq!(
            project.cluster_resource_whitelist,
            vec![GroupKind::new("", "Namespace")]
        );
        assert_eq!(project.roles[0].jwt_tokens[0].issued_at, 1700000000);
        assert_eq!(project.roles[0].jwt_tokens[0].expires_at, 0);

        let window = project.sync_windows.get(0).unwrap();
        assert!(window.is_deny());
        assert!(window.manual_sync);
        assert_eq!(window.time_zone, "");

        assert_eq!(project.validate(), Ok(()));
        assert!(project.is_source_permitted("https://github.com/example/app.git"));
    }

    #[test]
    fn rejects_unknown_window_kind() {
        let error = from_spec(
            "team",
            spec(serde_json::json!({
                "syncWindows": [{
                    "kind": "maybe",
                    "schedule": "* * * * *",
                    "duration": "1h",
                    "applications": ["*"],
                }],
            })),
        )
        .unwrap_err();
        assert_eq!(error.to_string(), "invalid sync window at index 0");
        assert_eq!(
            format!("{error:#}"),
            "invalid sync window at index 0: invalid window kind 'maybe': must be 'allow' or 'deny'"
        );
    }
}
