#![cfg(feature = "inmem-store")]

use askboard::models::{ContentKind, ContentPatch, NewContent, UserDraft, VoteValue};
use askboard::repo::{inmem::InMemRepo, RepoError, DUPLICATE_ACCEPTED_ANSWER};
use askboard::visibility::Visibility;
// Bring trait method namespaces into scope so calls on InMemRepo resolve.
use askboard::repo::{ContentRepo, TagRepo, UserRepo, VoteRepo};

/// Helper that returns a fresh, empty repository for every test run.
fn repo() -> InMemRepo {
    InMemRepo::ephemeral()
}

fn draft(name: &str) -> UserDraft {
    UserDraft { username: name.into(), email: String::new(), password_hash: format!("hash-of-{name}") }
}

#[tokio::test]
async fn users_and_tags_are_unique() {
    let r = repo();
    r.create_user(draft("alice")).await.unwrap();
    assert!(matches!(r.create_user(draft("alice")).await, Err(RepoError::Conflict)));

    r.create_tag("Rust".into(), "rust".into()).await.unwrap();
    assert!(matches!(r.create_tag("rust".into(), "rust".into()).await, Err(RepoError::Conflict)));
    assert!(matches!(r.get_tag("go").await, Err(RepoError::NotFound)));

    // unknown slugs are skipped
    let found = r.tags_by_slugs(&["rust".into(), "go".into()]).await.unwrap();
    assert_eq!(found.len(), 1);
}

#[tokio::test]
async fn content_requires_existing_author_and_parent() {
    let r = repo();
    let u = r.create_user(draft("alice")).await.unwrap();
    let err = r.create_content(NewContent::answer(u.id, 12345, "orphan".into())).await.unwrap_err();
    assert!(matches!(err, RepoError::NotFound));
    let err = r
        .create_content(NewContent::question(999, "Who?".into(), "who".into(), String::new(), vec![]))
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::NotFound));
}

#[tokio::test]
async fn update_patch_touches_only_given_fields() {
    let r = repo();
    let u = r.create_user(draft("alice")).await.unwrap();
    r.create_tag("Rust".into(), "rust".into()).await.unwrap();
    let q = r
        .create_content(NewContent::question(u.id, "Title?".into(), "title".into(), "body".into(), vec!["rust".into(), "nope".into()]))
        .await
        .unwrap();
    assert_eq!(q.tags, vec!["rust".to_string()]);

    let q = r.update_content(q.id, ContentPatch { text: Some("edited".into()), ..Default::default() }).await.unwrap();
    assert_eq!(q.title, "Title?");
    assert_eq!(q.text, "edited");
    assert_eq!(q.tags, vec!["rust".to_string()]);

    let q = r.update_content(q.id, ContentPatch { tags: Some(vec![]), ..Default::default() }).await.unwrap();
    assert!(q.tags.is_empty());
}

#[tokio::test]
async fn second_accepted_answer_is_an_integrity_error() {
    let r = repo();
    let u = r.create_user(draft("alice")).await.unwrap();
    let q = r.create_content(NewContent::question(u.id, "Q?".into(), "q".into(), String::new(), vec![])).await.unwrap();
    let a1 = r.create_content(NewContent::answer(u.id, q.id, "one".into())).await.unwrap();
    let a2 = r.create_content(NewContent::answer(u.id, q.id, "two".into())).await.unwrap();

    r.set_accepted(a1.id, true).await.unwrap();
    // idempotent on the same answer
    r.set_accepted(a1.id, true).await.unwrap();
    match r.set_accepted(a2.id, true).await {
        Err(RepoError::Integrity(msg)) => assert_eq!(msg, DUPLICATE_ACCEPTED_ANSWER),
        other => panic!("expected integrity error, got {other:?}"),
    }
    assert!(!r.get_content(a2.id).await.unwrap().is_accepted);
    // the rejected accept leaves the first one in place
    assert!(r.get_content(a1.id).await.unwrap().is_accepted);

    r.set_accepted(a1.id, false).await.unwrap();
    r.set_accepted(a2.id, true).await.unwrap();
}

#[tokio::test]
async fn toggle_vote_keeps_one_row_per_user() {
    let r = repo();
    let u = r.create_user(draft("alice")).await.unwrap();
    let q = r.create_content(NewContent::question(u.id, "Q?".into(), "q".into(), String::new(), vec![])).await.unwrap();

    r.toggle_vote(u.id, q.id, VoteValue::Up).await.unwrap();
    r.toggle_vote(u.id, q.id, VoteValue::Down).await.unwrap();
    assert_eq!(r.vote_rows(q.id), 1);
    let votes = r.votes_for(u.id, &[q.id]).await.unwrap();
    assert_eq!(votes.get(&q.id), Some(&VoteValue::Down));

    let out = r.toggle_vote(u.id, q.id, VoteValue::Down).await.unwrap();
    assert_eq!(out.user_vote, None);
    assert_eq!(r.vote_rows(q.id), 0);
    assert_eq!(r.get_content(q.id).await.unwrap().points, 0);

    assert!(matches!(r.toggle_vote(u.id, 777, VoteValue::Up).await, Err(RepoError::NotFound)));
    assert!(matches!(r.toggle_vote(777, q.id, VoteValue::Up).await, Err(RepoError::NotFound)));
}

#[tokio::test]
async fn snapshot_survives_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");

    let (user_id, question_id) = {
        let r = InMemRepo::at(path.clone());
        let u = r.create_user(draft("alice")).await.unwrap();
        let q = r.create_content(NewContent::question(u.id, "Kept?".into(), "kept".into(), String::new(), vec![])).await.unwrap();
        r.create_content(NewContent::comment(u.id, q.id, "note".into())).await.unwrap();
        r.toggle_vote(u.id, q.id, VoteValue::Up).await.unwrap();
        (u.id, q.id)
    };

    let r = InMemRepo::at(path);
    let u = r.get_user_by_username("alice").await.unwrap();
    assert_eq!(u.id, user_id);
    assert_eq!(u.password_hash, "hash-of-alice");
    let q = r.get_content(question_id).await.unwrap();
    assert_eq!(q.up, 1);
    assert_eq!(r.vote_rows(question_id), 1);
    let comments = r.list_children(question_id, ContentKind::Comment, Visibility::Public).await.unwrap();
    assert_eq!(comments.len(), 1);

    // ids keep increasing after reload
    let next = r.create_user(draft("bob")).await.unwrap();
    assert!(next.id > question_id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writes_leave_a_complete_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("state.json");
    let r = InMemRepo::at(path.clone());

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let r = r.clone();
            tokio::spawn(async move { r.create_user(draft(&format!("user{i}"))).await })
        })
        .collect();
    for h in handles {
        h.await.unwrap().unwrap();
    }

    assert!(!path.with_extension("json.tmp").exists());
    let reloaded = InMemRepo::at(path);
    assert_eq!(reloaded.list_users().await.unwrap().len(), 16);
}
