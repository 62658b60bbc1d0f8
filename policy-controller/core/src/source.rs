use crate::{glob, project::Project};

impl Project {
    /// Returns true if applications may be sourced from `repo_url`.
    ///
    /// Patterns are matched in order, and `*` does not cross a `/` (use `**`
    /// for that). A negated pattern that matches blocks the repository,
    /// unless a literal `*` entry follows it. Negated patterns never permit
    /// a repository on their own.
    pub fn is_source_permitted(&self, repo_url: &str) -> bool {
        let candidate = normalize_repo_url(repo_url);

        let mut any_positive_match = false;
        let mut negative_blocked = false;
        for (i, pattern) in self.source_repos.iter().enumerate() {
            match pattern.strip_prefix('!') {
                Some(negated) => {
                    let negated = normalize_repo_url(negated);
                    if glob::is_match_with_separator(&negated, &candidate, '/') {
                        let rescued = self.source_repos[i + 1..].iter().any(|p| p == "*");
                        if !rescued {
                            tracing::trace!(%repo_url, %pattern, "Source repository denied");
                            negative_blocked = true;
                        }
                    }
                }
                None => {
                    if pattern == "*"
                        || glob::is_match_with_separator(
                            &normalize_repo_url(pattern),
                            &candidate,
                            '/',
                        )
                    {
                        any_positive_match = true;
                    }
                }
            }
        }

        any_positive_match && !negative_blocked
    }
}

/// Trims the URL and lower-cases its host, which is case-insensitive. Paths
/// are left untouched.
///
/// Handles both `scheme://[user@]host[:port]/path` and scp-style
/// `user@host:path` forms.
pub(crate) fn normalize_repo_url(url: &str) -> String {
    let url = url.trim();

    let (prefix, rest) = match url.find("://") {
        Some(i) => url.split_at(i + 3),
        None if url.contains('@') => ("", url),
        None => return url.to_string(),
    };

    let authority_end = rest.find('/').unwrap_or(rest.len());
    let authority = &rest[..authority_end];
    let host_start = authority.rfind('@').map_or(0, |i| i + 1);
    let host_end = authority[host_start..]
        .find(':')
        .map_or(authority.len(), |i| host_start + i);

    let mut normalized = String::with_capacity(url.len());
    normalized.push_str(prefix);
    normalized.push_str(&rest[..host_start]);
    normalized.push_str(&rest[host_start..host_end].to_ascii_lowercase());
    normalized.push_str(&rest[host_end..]);
    normalized
}
