//! Project roles and the policy rules attached to them.
//!
//! A project role grants permissions through policy rules of the form
//!
//! ```text
//! p, proj:<project>:<role>, <resource>, <action>, <object>, <allow|deny>
//! ```
//!
//! and is bound to identity-provider groups.

use crate::{project::Project, validation::ValidationError};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::{fmt, str::FromStr};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Role {
    pub name: String,
    pub description: String,
    pub policies: Vec<String>,
    pub groups: Vec<String>,
    pub jwt_tokens: Vec<JwtToken>,
}

/// A token issued for a role. Times are seconds since the Unix epoch; an
/// `expires_at` of zero never expires.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct JwtToken {
    pub id: String,
    pub issued_at: i64,
    pub expires_at: i64,
}

/// A parsed and validated policy rule.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PolicyStatement {
    pub subject: String,
    pub resource: Resource,
    pub action: String,
    pub object: String,
    pub effect: Effect,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Resource {
    Applications,
    ApplicationSets,
    Repositories,
    Clusters,
    Exec,
    Logs,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Effect {
    Allow,
    Deny,
}

#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("invalid policy rule '{policy}': must be of the form: 'p, sub, res, act, obj, eft'")]
    Form { policy: String },

    #[error("invalid policy rule '{policy}': policy subject must be: '{expected}', not '{subject}'")]
    Subject {
        policy: String,
        expected: String,
        subject: String,
    },

    #[error("invalid policy rule '{policy}': project resource must be: 'applications', 'applicationsets', 'repositories', 'clusters', 'exec' or 'logs', not '{resource}'")]
    Resource { policy: String, resource: String },

    #[error("invalid policy rule '{policy}': invalid action '{action}'")]
    Action { policy: String, action: String },

    #[error("invalid policy rule '{policy}': object must be of form '{project}/*', '{project}[/<NAMESPACE>]/<APPNAME>' or '{project}/<APPNAME>', not '{object}'")]
    Object {
        policy: String,
        project: String,
        object: String,
    },

    #[error("invalid policy rule '{policy}': effect must be: 'allow' or 'deny'")]
    Effect { policy: String },
}

const ACTIONS: &[&str] = &[
    "get", "create", "update", "delete", "sync", "override", "action", "invoke", "*",
];

// Actions that may be qualified with a resource path, e.g. `update/*/Pod/*`.
const ACTION_PREFIXES: &[&str] = &["action/", "update/", "delete/"];

static ROLE_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9]([-a-zA-Z0-9]*[a-zA-Z0-9])?$").expect("role name regex must compile")
});

/// The part of a policy object after the project name.
static OBJECT_SUFFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(/[*\w-]+)?/[*\w.-]+$").expect("policy object regex must compile")
});

// === impl PolicyStatement ===

impl PolicyStatement {
    /// Parses a policy rule belonging to `role` in `project`.
    pub fn parse(policy: &str, project: &str, role: &str) -> Result<Self, PolicyError> {
        let fields = policy.split(',').map(|f| f.trim_matches(' ')).collect::<Vec<_>>();
        let &["p", subject, resource, action, object, effect] = fields.as_slice() else {
            return Err(PolicyError::Form {
                policy: policy.to_string(),
            });
        };

        let expected = format!("proj:{project}:{role}");
        if subject != expected {
            return Err(PolicyError::Subject {
                policy: policy.to_string(),
                expected,
                subject: subject.to_string(),
            });
        }

        let resource = resource.parse::<Resource>().map_err(|_| PolicyError::Resource {
            policy: policy.to_string(),
            resource: resource.to_string(),
        })?;

        if !is_valid_action(action) {
            return Err(PolicyError::Action {
                policy: policy.to_string(),
                action: action.to_string(),
            });
        }

        if !is_valid_object(project, object) {
            return Err(PolicyError::Object {
                policy: policy.to_string(),
                project: project.to_string(),
                object: object.to_string(),
            });
        }

        let effect = effect.parse::<Effect>().map_err(|_| PolicyError::Effect {
            policy: policy.to_string(),
        })?;

        Ok(Self {
            subject: subject.to_string(),
            resource,
            action: action.to_string(),
            object: object.to_string(),
            effect,
        })
    }
}

impl fmt::Display for PolicyStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "p, {}, {}, {}, {}, {}",
            self.subject, self.resource, self.action, self.object, self.effect
        )
    }
}

// === impl Resource ===

impl Resource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applications => "applications",
            Self::ApplicationSets => "applicationsets",
            Self::Repositories => "repositories",
            Self::Clusters => "clusters",
            Self::Exec => "exec",
            Self::Logs => "logs",
        }
    }
}

impl FromStr for Resource {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "applications" => Ok(Self::Applications),
            "applicationsets" => Ok(Self::ApplicationSets),
            "repositories" => Ok(Self::Repositories),
            "clusters" => Ok(Self::Clusters),
            "exec" => Ok(Self::Exec),
            "logs" => Ok(Self::Logs),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// === impl Effect ===

impl FromStr for Effect {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allow" => Ok(Self::Allow),
            "deny" => Ok(Self::Deny),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allow => f.write_str("allow"),
            Self::Deny => f.write_str("deny"),
        }
    }
}

// === impl JwtToken ===

impl JwtToken {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > 0 && self.expires_at <= now.timestamp()
    }
}

// === impl Role ===

impl Role {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Finds a token by its id or, for tokens issued without one, by its
    /// issue time.
    pub fn token(&self, id: &str) -> Option<&JwtToken> {
        self.jwt_tokens
            .iter()
            .find(|t| t.id == id || t.issued_at.to_string() == id)
    }

    /// Validates the role's name, policies and groups in the context of the
    /// given project.
    pub fn validate(&self, project: &str) -> Result<(), ValidationError> {
        validate_role_name(&self.name)?;

        let mut policies = ahash::AHashSet::with_capacity(self.policies.len());
        for policy in &self.policies {
            if !policies.insert(policy.as_str()) {
                return Err(ValidationError::DuplicatePolicy {
                    role: self.name.clone(),
                    policy: policy.clone(),
                });
            }
            PolicyStatement::parse(policy, project, &self.name)?;
        }

        let mut groups = ahash::AHashSet::with_capacity(self.groups.len());
        for group in &self.groups {
            if !groups.insert(group.as_str()) {
                return Err(ValidationError::DuplicateGroup {
                    role: self.name.clone(),
                    group: group.clone(),
                });
            }
            validate_group_name(group)?;
        }

        Ok(())
    }
}

// === impl Project ===

impl Project {
    pub fn role(&self, name: &str) -> Result<(usize, &Role), ValidationError> {
        self.roles
            .iter()
            .enumerate()
            .find(|(_, r)| r.name == name)
            .ok_or_else(|| ValidationError::RoleNotFound(name.to_string()))
    }

    fn role_mut(&mut self, name: &str) -> Result<&mut Role, ValidationError> {
        self.roles
            .iter_mut()
            .find(|r| r.name == name)
            .ok_or_else(|| ValidationError::RoleNotFound(name.to_string()))
    }

    /// Binds a group to a role. Returns false if the group was already bound.
    pub fn add_group_to_role(&mut self, role: &str, group: &str) -> Result<bool, ValidationError> {
        let role = self.role_mut(role)?;
        if role.groups.iter().any(|g| g == group) {
            return Ok(false);
        }
        role.groups.push(group.to_string());
        Ok(true)
    }

    /// Unbinds a group from a role. Returns false if the group was not bound.
    pub fn remove_group_from_role(
        &mut self,
        role: &str,
        group: &str,
    ) -> Result<bool, ValidationError> {
        let role = self.role_mut(role)?;
        let before = role.groups.len();
        role.groups.retain(|g| g != group);
        Ok(role.groups.len() != before)
    }

    pub fn jwt_token(&self, role: &str, id: &str) -> Result<Option<&JwtToken>, ValidationError> {
        let (_, role) = self.role(role)?;
        Ok(role.token(id))
    }

    /// Renders the project's roles as policy lines: each role's policy rules,
    /// followed by a `g, <group>, proj:<project>:<role>` line per bound group.
    pub fn policy_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for role in &self.roles {
            lines.extend(role.policies.iter().cloned());
            let subject = format!("proj:{}:{}", self.name, role.name);
            lines.extend(role.groups.iter().map(|g| format!("g, {g}, {subject}")));
        }
        lines
    }
}

/// Checks a policy rule for `role` in `project` without keeping the parsed
/// statement.
pub fn validate_policy(project: &str, role: &str, policy: &str) -> Result<(), PolicyError> {
    PolicyStatement::parse(policy, project, role).map(|_| ())
}

pub fn is_valid_action(action: &str) -> bool {
    ACTIONS.contains(&action) || ACTION_PREFIXES.iter().any(|p| action.starts_with(p))
}

/// Returns true if `object` names applications within `project`:
/// `<project>/<app>` or `<project>/<namespace>/<app>`, where segments may
/// contain `*` wildcards.
pub fn is_valid_object(project: &str, object: &str) -> bool {
    object
        .strip_prefix(project)
        .is_some_and(|rest| OBJECT_SUFFIX.is_match(rest))
}

pub fn validate_role_name(name: &str) -> Result<(), ValidationError> {
    if ROLE_NAME.is_match(name) {
        Ok(())
    } else {
        Err(ValidationError::InvalidRoleName(name.to_string()))
    }
}

/// Group names are passed through to policy lines verbatim, so they may not
/// contain separators unless quoted.
pub fn validate_group_name(group: &str) -> Result<(), ValidationError> {
    let invalid = |reason| {
        Err(ValidationError::InvalidGroupName {
            group: group.to_string(),
            reason,
        })
    };

    if group.is_empty() {
        return invalid("must not be empty");
    }
    if group.trim() != group {
        return invalid("must not have leading or trailing whitespace");
    }
    if group.contains(['\n', '\r', '\t']) {
        return invalid("must not contain line breaks or tabs");
    }

    let quoted = group.len() > 1 && group.starts_with('"') && group.ends_with('"');
    if quoted {
        let inner = &group[1..group.len() - 1];
        if inner.is_empty() || inner.contains('"') {
            return invalid("must quote a non-empty value without inner quotes");
        }
    } else if group.contains([',', '"']) {
        return invalid("must be quoted if it contains a comma or quote");
    }

    Ok(())
}
