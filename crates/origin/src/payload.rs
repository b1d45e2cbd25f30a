//! Provider agnostic view of a push webhook.
//!
//! GitHub, GitLab and Gitea describe the same push with different JSON
//! layouts. Every normalized field is looked up through an ordered chain of
//! JSON pointers, the first non-empty string wins:
//!
//! | field          | chain                                                                                   |
//! |----------------|-----------------------------------------------------------------------------------------|
//! | project name   | `repository.name`, `project.name`, `repository.full_name`, `project.path_with_namespace` |
//! | branch         | `ref` (required)                                                                        |
//! | commit hash    | last commit `id`, last commit `sha`, `checkout_sha`                                     |
//! | commit message | last commit `message`                                                                   |
//! | committer      | last commit `committer.name`, `author.name`, `user_name`, `pusher.name`, `pusher.login`, `user.name` |
//!
//! The commit list is `commits`, or `[head_commit]` when `commits` is empty.
//! A missing branch or project aborts normalization, everything else falls
//! back to [`UNKNOWN`] or an empty string.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::PayloadError;

/// Sentinel used for optional fields the payload did not carry.
pub const UNKNOWN: &str = "unknown";

const BRANCH_PREFIX: &str = "refs/heads/";
const TAG_PREFIX: &str = "refs/tags/";

#[derive(Clone, Copy)]
enum Scope {
    /// Relative to the most recent commit of the push.
    Commit,
    /// Relative to the payload root.
    Payload,
}

const PROJECT_NAME: &[&str] = &[
    "/repository/name",
    "/project/name",
    "/repository/full_name",
    "/project/path_with_namespace",
];

const COMMIT_HASH: &[(Scope, &str)] = &[
    (Scope::Commit, "/id"),
    (Scope::Commit, "/sha"),
    (Scope::Payload, "/checkout_sha"),
];

const COMMITTER: &[(Scope, &str)] = &[
    (Scope::Commit, "/committer/name"),
    (Scope::Commit, "/author/name"),
    (Scope::Payload, "/user_name"),
    (Scope::Payload, "/pusher/name"),
    (Scope::Payload, "/pusher/login"),
    (Scope::Payload, "/user/name"),
];

const MERGE_PREFIXES: [&str; 2] = ["merge branch", "merge pull request"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum EventKind {
    Push,
    Commit,
    Merge,
    TagPush,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedEvent {
    pub project_name: String,
    pub branch_name: String,
    pub commit_hash: String,
    pub committer_name: String,
    pub event_kind: EventKind,
    pub commit_message: String,
}

impl NormalizedEvent {
    pub fn from_payload(payload: &Value) -> Result<Self, PayloadError> {
        let reference = non_empty(payload.pointer("/ref")).ok_or(PayloadError::MissingBranchRef)?;
        let branch_name = strip_ref(reference);
        if branch_name.is_empty() {
            return Err(PayloadError::MissingBranchRef);
        }

        let project_name = project_name(payload).ok_or(PayloadError::MissingProjectName)?;

        let commits = commits(payload);
        let last_commit = commits.last().copied();

        let commit_hash = lookup(payload, last_commit, COMMIT_HASH).unwrap_or(UNKNOWN);
        let committer_name = lookup(payload, last_commit, COMMITTER).unwrap_or(UNKNOWN);
        let commit_message = last_commit
            .and_then(|commit| commit.get("message"))
            .and_then(Value::as_str)
            .unwrap_or_default();

        let event_kind = match last_commit {
            Some(commit) => classify_commit(commit, commit_message),
            None if reference.starts_with(TAG_PREFIX) => EventKind::TagPush,
            None => EventKind::Push,
        };

        Ok(Self {
            project_name: project_name.to_string(),
            branch_name: branch_name.to_string(),
            commit_hash: commit_hash.to_string(),
            committer_name: committer_name.to_string(),
            event_kind,
            commit_message: commit_message.to_string(),
        })
    }

    /// Abbreviated commit hash as shown by git.
    pub fn short_hash(&self) -> &str {
        self.commit_hash
            .char_indices()
            .nth(7)
            .map_or(self.commit_hash.as_str(), |(end, _)| &self.commit_hash[..end])
    }
}

/// Best effort project name, also used to annotate rejected deliveries.
pub fn project_name(payload: &Value) -> Option<&str> {
    PROJECT_NAME
        .iter()
        .find_map(|pointer| non_empty(payload.pointer(pointer)))
}

/// Strips the `refs/heads/` or `refs/tags/` prefix from a git reference.
pub fn strip_ref(reference: &str) -> &str {
    reference
        .strip_prefix(BRANCH_PREFIX)
        .or_else(|| reference.strip_prefix(TAG_PREFIX))
        .unwrap_or(reference)
}

fn commits(payload: &Value) -> Vec<&Value> {
    match payload.get("commits").and_then(Value::as_array) {
        Some(commits) if !commits.is_empty() => commits.iter().collect(),
        _ => payload
            .get("head_commit")
            .filter(|commit| commit.is_object())
            .into_iter()
            .collect(),
    }
}

fn lookup<'a>(
    payload: &'a Value,
    commit: Option<&'a Value>,
    chain: &[(Scope, &str)],
) -> Option<&'a str> {
    chain.iter().find_map(|(scope, pointer)| match scope {
        Scope::Commit => commit.and_then(|commit| non_empty(commit.pointer(pointer))),
        Scope::Payload => non_empty(payload.pointer(pointer)),
    })
}

fn classify_commit(commit: &Value, message: &str) -> EventKind {
    let parents = commit
        .get("parents")
        .and_then(Value::as_array)
        .map_or(0, Vec::len);
    if parents > 1 {
        return EventKind::Merge;
    }

    let message = message.to_lowercase();
    if MERGE_PREFIXES
        .iter()
        .any(|prefix| message.starts_with(prefix))
    {
        EventKind::Merge
    } else {
        EventKind::Commit
    }
}

fn non_empty(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.is_empty())
}

#[cfg(test)]
#[path = "payload_tests.rs"]
mod tests;
