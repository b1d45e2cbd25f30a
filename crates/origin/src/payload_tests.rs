use super::*;
use serde_json::json;

#[test]
fn github_push_is_normalized() {
    let payload = json!({
        "ref": "refs/heads/main",
        "repository": { "name": "website", "full_name": "acme/website" },
        "pusher": { "name": "octocat" },
        "commits": [
            { "id": "1111111aaaa", "message": "first", "committer": { "name": "alice" } },
            { "id": "2222222bbbb", "message": "Fix typo", "committer": { "name": "bob" } }
        ]
    });

    let event = NormalizedEvent::from_payload(&payload).unwrap();

    assert_eq!(event.project_name, "website");
    assert_eq!(event.branch_name, "main");
    assert_eq!(event.commit_hash, "2222222bbbb");
    assert_eq!(event.short_hash(), "2222222");
    assert_eq!(event.committer_name, "bob");
    assert_eq!(event.commit_message, "Fix typo");
    assert_eq!(event.event_kind, EventKind::Commit);
}

#[test]
fn gitlab_push_uses_project_and_user_name() {
    let payload = json!({
        "object_kind": "push",
        "ref": "refs/heads/develop",
        "checkout_sha": "da1560886d4f094c3e6c9ef40349f7d38b5d27d7",
        "user_name": "John Smith",
        "project": { "name": "Diaspora", "path_with_namespace": "mike/diaspora" },
        "commits": [
            { "id": "b6568db1bc1dcd7f8b4d5a946b0b91f9dacd7327", "message": "Update Catalan translation", "author": { "name": "Jordi Mallach" } }
        ]
    });

    let event = NormalizedEvent::from_payload(&payload).unwrap();

    assert_eq!(event.project_name, "Diaspora");
    assert_eq!(event.branch_name, "develop");
    assert_eq!(event.commit_hash, "b6568db1bc1dcd7f8b4d5a946b0b91f9dacd7327");
    assert_eq!(event.committer_name, "Jordi Mallach");
}

#[test]
fn gitlab_push_without_commits_falls_back_to_checkout_sha() {
    let payload = json!({
        "ref": "refs/heads/main",
        "checkout_sha": "da1560886d4f094c3e6c9ef40349f7d38b5d27d7",
        "user_name": "John Smith",
        "project": { "path_with_namespace": "mike/diaspora" },
        "commits": []
    });

    let event = NormalizedEvent::from_payload(&payload).unwrap();

    assert_eq!(event.project_name, "mike/diaspora");
    assert_eq!(event.commit_hash, "da1560886d4f094c3e6c9ef40349f7d38b5d27d7");
    assert_eq!(event.committer_name, "John Smith");
    assert_eq!(event.event_kind, EventKind::Push);
    assert_eq!(event.commit_message, "");
}

#[test]
fn head_commit_is_used_when_commit_list_is_empty() {
    let payload = json!({
        "ref": "refs/heads/main",
        "repository": { "name": "api" },
        "commits": [],
        "head_commit": { "id": "abc123", "message": "Merge branch 'hotfix'", "author": { "name": "carol" } }
    });

    let event = NormalizedEvent::from_payload(&payload).unwrap();

    assert_eq!(event.commit_hash, "abc123");
    assert_eq!(event.committer_name, "carol");
    assert_eq!(event.event_kind, EventKind::Merge);
}

#[test]
fn gitea_commit_sha_and_pusher_login() {
    let payload = json!({
        "ref": "refs/heads/main",
        "repository": { "full_name": "gitea/webhooks" },
        "pusher": { "login": "gitea" },
        "commits": [ { "sha": "feed", "message": "ok" } ]
    });

    let event = NormalizedEvent::from_payload(&payload).unwrap();

    assert_eq!(event.project_name, "gitea/webhooks");
    assert_eq!(event.commit_hash, "feed");
    assert_eq!(event.committer_name, "gitea");
}

#[test]
fn tag_push_without_commits() {
    let payload = json!({
        "ref": "refs/tags/v1.0",
        "repository": { "name": "api" },
        "user": { "name": "release-bot" }
    });

    let event = NormalizedEvent::from_payload(&payload).unwrap();

    assert_eq!(event.branch_name, "v1.0");
    assert_eq!(event.event_kind, EventKind::TagPush);
    assert_eq!(event.commit_hash, UNKNOWN);
    assert_eq!(event.committer_name, "release-bot");
}

#[test]
fn merge_detected_from_parent_count() {
    let payload = json!({
        "ref": "refs/heads/main",
        "repository": { "name": "api" },
        "commits": [ { "id": "a1", "parents": ["p1", "p2"], "message": "integrate" } ]
    });

    let event = NormalizedEvent::from_payload(&payload).unwrap();
    assert_eq!(event.event_kind, EventKind::Merge);
}

#[test]
fn merge_detected_from_message() {
    let payload = json!({
        "ref": "refs/heads/main",
        "repository": { "name": "api" },
        "commits": [ { "id": "a1", "parents": ["p1"], "message": "Merge pull request #4 from acme/feature" } ]
    });

    let event = NormalizedEvent::from_payload(&payload).unwrap();
    assert_eq!(event.event_kind, EventKind::Merge);
}

#[test]
fn single_parent_commit_is_a_commit() {
    let payload = json!({
        "ref": "refs/heads/main",
        "repository": { "name": "api" },
        "commits": [ { "id": "a1", "parents": ["p1"], "message": "Bump version" } ]
    });

    let event = NormalizedEvent::from_payload(&payload).unwrap();
    assert_eq!(event.event_kind, EventKind::Commit);
    assert_eq!(event.committer_name, UNKNOWN);
}

#[test]
fn missing_ref_is_terminal() {
    let payload = json!({ "repository": { "name": "api" } });
    assert_eq!(
        NormalizedEvent::from_payload(&payload),
        Err(PayloadError::MissingBranchRef)
    );

    let payload = json!({ "ref": "refs/heads/", "repository": { "name": "api" } });
    assert_eq!(
        NormalizedEvent::from_payload(&payload),
        Err(PayloadError::MissingBranchRef)
    );
}

#[test]
fn missing_project_is_terminal() {
    let payload = json!({ "ref": "refs/heads/main", "repository": { "name": "" } });
    assert_eq!(
        NormalizedEvent::from_payload(&payload),
        Err(PayloadError::MissingProjectName)
    );
}

#[test]
fn strip_ref_only_removes_leading_prefix() {
    assert_eq!(strip_ref("refs/heads/main"), "main");
    assert_eq!(strip_ref("refs/tags/v1.0"), "v1.0");
    assert_eq!(strip_ref("refs/heads/feature/refs/heads/x"), "feature/refs/heads/x");
    assert_eq!(strip_ref("main"), "main");
}

#[test]
fn short_hash_keeps_short_values() {
    let payload = json!({ "ref": "main", "repository": { "name": "api" } });
    let event = NormalizedEvent::from_payload(&payload).unwrap();

    assert_eq!(event.short_hash(), "unknown");
}
