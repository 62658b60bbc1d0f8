use crate::{duration, glob, schedule::Schedule};
use chrono::{DateTime, TimeDelta, Utc};
use chrono_tz::Tz;
use sha2::{Digest, Sha256};
use std::{fmt, str::FromStr};

/// A recurring period, defined by a cron schedule and a duration, during
/// which syncs of matching applications are either allowed or denied.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct SyncWindow {
    pub kind: WindowKind,
    pub schedule: String,
    pub duration: String,
    /// An IANA time zone name. Empty means UTC.
    pub time_zone: String,
    pub applications: Vec<String>,
    pub namespaces: Vec<String>,
    pub clusters: Vec<String>,
    /// Allows manual syncs while a deny window is active, or while an allow
    /// window is inactive.
    pub manual_sync: bool,
    /// Requires every non-empty selector to match, rather than any of them.
    pub use_and_operator: bool,
    pub description: String,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum WindowKind {
    #[default]
    Allow,
    Deny,
}

/// An ordered set of sync windows.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncWindows(Vec<SyncWindow>);

/// The parts of an application that sync windows select on.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Application {
    pub name: String,
    /// The destination namespace.
    pub namespace: String,
    pub server: String,
    pub cluster_name: String,
}

/// Changes to apply to a window. Empty fields leave the window unchanged.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WindowUpdate {
    pub schedule: String,
    pub duration: String,
    pub applications: Vec<String>,
    pub namespaces: Vec<String>,
    pub clusters: Vec<String>,
    pub time_zone: String,
    pub description: String,
}

#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum WindowError {
    #[error("invalid window kind '{0}': must be 'allow' or 'deny'")]
    Kind(String),

    #[error("cannot parse schedule '{schedule}': {source}")]
    Schedule {
        schedule: String,
        #[source]
        source: crate::schedule::ScheduleError,
    },

    #[error("cannot parse duration '{duration}': {source}")]
    Duration {
        duration: String,
        #[source]
        source: duration::DurationError,
    },

    #[error("unknown time zone '{0}'")]
    TimeZone(String),

    #[error("cannot update: require one or more of schedule, duration, application, namespace, cluster or description")]
    EmptyUpdate,
}

// === impl WindowKind ===

impl WindowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
        }
    }
}

impl FromStr for WindowKind {
    type Err = WindowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allow" => Ok(Self::Allow),
            "deny" => Ok(Self::Deny),
            s => Err(WindowError::Kind(s.to_string())),
        }
    }
}

impl fmt::Display for WindowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// === impl SyncWindow ===

impl SyncWindow {
    pub fn new(
        kind: WindowKind,
        schedule: impl Into<String>,
        duration: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            schedule: schedule.into(),
            duration: duration.into(),
            ..Self::default()
        }
    }

    pub fn with_applications<I, S>(mut self, applications: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.applications = applications.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_namespaces<I, S>(mut self, namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.namespaces = namespaces.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_clusters<I, S>(mut self, clusters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.clusters = clusters.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_time_zone(mut self, time_zone: impl Into<String>) -> Self {
        self.time_zone = time_zone.into();
        self
    }

    pub fn with_manual_sync(mut self, manual_sync: bool) -> Self {
        self.manual_sync = manual_sync;
        self
    }

    pub fn with_and_operator(mut self, use_and_operator: bool) -> Self {
        self.use_and_operator = use_and_operator;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Checks that the schedule, duration and time zone all parse.
    pub fn validate(&self) -> Result<(), WindowError> {
        self.parse_schedule()?;
        self.parse_duration()?;
        self.parse_time_zone()?;
        Ok(())
    }

    pub fn is_allow(&self) -> bool {
        self.kind == WindowKind::Allow
    }

    pub fn is_deny(&self) -> bool {
        self.kind == WindowKind::Deny
    }

    /// Returns true if a firing of the schedule at `t` satisfies
    /// `t <= now < t + duration`.
    pub fn active_at(&self, now: DateTime<Utc>) -> Result<bool, WindowError> {
        let schedule = self.parse_schedule()?;
        let tz = self.parse_time_zone()?;
        let length = self.parse_duration()?;
        let length = TimeDelta::from_std(length).map_err(|_| self.duration_overflow())?;

        let Some(since) = now.checked_sub_signed(length) else {
            return Err(self.duration_overflow());
        };
        let active = schedule
            .next_after(&since.with_timezone(&tz))
            .is_some_and(|next| next <= now);
        Ok(active)
    }

    pub fn active(&self) -> Result<bool, WindowError> {
        self.active_at(Utc::now())
    }

    /// Returns true if the window selects the given application.
    ///
    /// Cluster patterns match either the destination server or the cluster
    /// name. A window with no selectors matches nothing.
    pub fn matches(&self, app: &Application) -> bool {
        fn any_match(patterns: &[String], candidates: &[&str]) -> bool {
            patterns.iter().any(|p| {
                candidates
                    .iter()
                    .any(|c| !c.is_empty() && glob::is_match(p, c))
            })
        }

        let selectors = [
            (
                self.applications.is_empty(),
                any_match(&self.applications, &[app.name.as_str()]),
            ),
            (
                self.namespaces.is_empty(),
                any_match(&self.namespaces, &[app.namespace.as_str()]),
            ),
            (
                self.clusters.is_empty(),
                any_match(
                    &self.clusters,
                    &[app.server.as_str(), app.cluster_name.as_str()],
                ),
            ),
        ];
        let mut constrained = selectors
            .iter()
            .filter(|(empty, _)| !empty)
            .map(|(_, matched)| *matched)
            .peekable();

        if self.use_and_operator {
            constrained.peek().is_some() && constrained.all(|matched| matched)
        } else {
            constrained.any(|matched| matched)
        }
    }

    /// Applies an update in place. Empty fields leave the window unchanged.
    /// The updated window is not validated.
    pub fn update(&mut self, update: WindowUpdate) -> Result<(), WindowError> {
        let WindowUpdate {
            schedule,
            duration,
            applications,
            namespaces,
            clusters,
            time_zone,
            description,
        } = update;

        if schedule.is_empty()
            && duration.is_empty()
            && applications.is_empty()
            && namespaces.is_empty()
            && clusters.is_empty()
            && description.is_empty()
        {
            return Err(WindowError::EmptyUpdate);
        }

        if !schedule.is_empty() {
            self.schedule = schedule;
        }
        if !duration.is_empty() {
            self.duration = duration;
        }
        if !applications.is_empty() {
            self.applications = applications;
        }
        if !namespaces.is_empty() {
            self.namespaces = namespaces;
        }
        if !clusters.is_empty() {
            self.clusters = clusters;
        }
        if !time_zone.is_empty() {
            self.time_zone = time_zone;
        }
        if !description.is_empty() {
            self.description = description;
        }
        Ok(())
    }

    /// A stable identity for the window across processes and restarts.
    ///
    /// Two windows share an identity when they agree on kind, schedule,
    /// duration, time zone, selectors and operator, regardless of
    /// `manual_sync` and `description`.
    pub fn hash_identity(&self) -> u64 {
        fn write_str(hasher: &mut Sha256, s: &str) {
            hasher.update((s.len() as u64).to_be_bytes());
            hasher.update(s.as_bytes());
        }

        fn write_list(hasher: &mut Sha256, items: &[String]) {
            hasher.update((items.len() as u64).to_be_bytes());
            for item in items {
                write_str(hasher, item);
            }
        }

        let mut hasher = Sha256::new();
        write_str(&mut hasher, self.kind.as_str());
        write_str(&mut hasher, &self.schedule);
        write_str(&mut hasher, &self.duration);
        write_str(&mut hasher, &self.time_zone);
        write_list(&mut hasher, &self.applications);
        write_list(&mut hasher, &self.namespaces);
        write_list(&mut hasher, &self.clusters);
        hasher.update([u8::from(self.use_and_operator)]);

        let digest = hasher.finalize();
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        u64::from_be_bytes(prefix)
    }

    fn parse_schedule(&self) -> Result<Schedule, WindowError> {
        Schedule::parse(&self.schedule).map_err(|source| WindowError::Schedule {
            schedule: self.schedule.clone(),
            source,
        })
    }

    fn parse_duration(&self) -> Result<std::time::Duration, WindowError> {
        duration::parse(&self.duration).map_err(|source| WindowError::Duration {
            duration: self.duration.clone(),
            source,
        })
    }

    fn parse_time_zone(&self) -> Result<Tz, WindowError> {
        if self.time_zone.is_empty() {
            return Ok(Tz::UTC);
        }
        self.time_zone
            .parse::<Tz>()
            .map_err(|_| WindowError::TimeZone(self.time_zone.clone()))
    }

    fn duration_overflow(&self) -> WindowError {
        WindowError::Duration {
            duration: self.duration.clone(),
            source: duration::DurationError::Overflow(self.duration.clone()),
        }
    }
}

// === impl SyncWindows ===

impl SyncWindows {
    pub fn new(windows: Vec<SyncWindow>) -> Self {
        Self(windows)
    }

    pub fn has_windows(&self) -> bool {
        !self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SyncWindow> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&SyncWindow> {
        self.0.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut SyncWindow> {
        self.0.get_mut(index)
    }

    pub fn push(&mut self, window: SyncWindow) {
        self.0.push(window);
    }

    pub fn remove(&mut self, index: usize) -> Option<SyncWindow> {
        (index < self.0.len()).then(|| self.0.remove(index))
    }

    /// Returns the windows active at `now`, in order.
    pub fn active_at(&self, now: DateTime<Utc>) -> Result<Self, WindowError> {
        let mut active = Vec::new();
        for window in &self.0 {
            if window.active_at(now)? {
                active.push(window.clone());
            }
        }
        Ok(Self(active))
    }

    pub fn active(&self) -> Result<Self, WindowError> {
        self.active_at(Utc::now())
    }

    /// Returns the allow windows that are not active at `now`, in order.
    pub fn inactive_allows_at(&self, now: DateTime<Utc>) -> Result<Self, WindowError> {
        let mut inactive = Vec::new();
        for window in self.0.iter().filter(|w| w.is_allow()) {
            if !window.active_at(now)? {
                inactive.push(window.clone());
            }
        }
        Ok(Self(inactive))
    }

    pub fn inactive_allows(&self) -> Result<Self, WindowError> {
        self.inactive_allows_at(Utc::now())
    }

    /// Returns the windows that select the given application, in order.
    pub fn matches(&self, app: &Application) -> Self {
        Self(self.0.iter().filter(|w| w.matches(app)).cloned().collect())
    }

    /// Returns whether any deny window exists and, if so, whether every deny
    /// window permits manual syncs.
    pub fn has_deny(&self) -> (bool, bool) {
        let mut found = false;
        let mut manual = true;
        for window in self.0.iter().filter(|w| w.is_deny()) {
            found = true;
            manual &= window.manual_sync;
        }
        (found, found && manual)
    }

    pub fn has_allow(&self) -> bool {
        self.0.iter().any(SyncWindow::is_allow)
    }

    /// Decides whether a sync may proceed at `now`.
    ///
    /// An active deny window blocks syncs, unless the sync is manual and
    /// every active deny window permits manual syncs. Otherwise an active
    /// allow window permits syncs. Otherwise, if allow windows exist but
    /// none is active, only manual syncs proceed, and only if every inactive
    /// allow window permits them.
    pub fn can_sync_at(&self, is_manual: bool, now: DateTime<Utc>) -> Result<bool, WindowError> {
        if !self.has_windows() {
            return Ok(true);
        }

        let active = self.active_at(now)?;
        let (active_deny, deny_allows_manual) = active.has_deny();
        if active_deny {
            return Ok(is_manual && deny_allows_manual);
        }

        if active.has_allow() {
            return Ok(true);
        }

        let inactive_allows = self.inactive_allows_at(now)?;
        if inactive_allows.has_windows() {
            return Ok(is_manual && inactive_allows.iter().all(|w| w.manual_sync));
        }

        Ok(true)
    }

    pub fn can_sync(&self, is_manual: bool) -> Result<bool, WindowError> {
        self.can_sync_at(is_manual, Utc::now())
    }
}

impl From<Vec<SyncWindow>> for SyncWindows {
    fn from(windows: Vec<SyncWindow>) -> Self {
        Self(windows)
    }
}

impl FromIterator<SyncWindow> for SyncWindows {
    fn from_iter<T: IntoIterator<Item = SyncWindow>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for SyncWindows {
    type Item = SyncWindow;
    type IntoIter = std::vec::IntoIter<SyncWindow>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a SyncWindows {
    type Item = &'a SyncWindow;
    type IntoIter = std::slice::Iter<'a, SyncWindow>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
