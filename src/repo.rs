use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;

use crate::models::*;
use crate::visibility::Visibility;
use crate::voting;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")] NotFound,
    #[error("conflict")] Conflict,
    #[error("integrity: {0}")] Integrity(String),
    #[error("internal: {0}")] Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

pub const DUPLICATE_ACCEPTED_ANSWER: &str = "Question can't have more than one accepted answer";

/// Filter/order for question listings.
#[derive(Debug, Clone)]
pub struct QuestionQuery {
    pub order: ListOrder,
    pub filter: QuestionFilter,
    pub tag: Option<String>,
    pub visibility: Visibility,
}

use async_trait::async_trait;

#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn create_user(&self, draft: UserDraft) -> RepoResult<User>;
    async fn get_user_by_username(&self, username: &str) -> RepoResult<User>;
    async fn list_users(&self) -> RepoResult<Vec<User>>;
}

#[async_trait]
pub trait TagRepo: Send + Sync {
    async fn list_tags(&self) -> RepoResult<Vec<Tag>>;
    async fn create_tag(&self, name: String, slug: String) -> RepoResult<Tag>;
    async fn get_tag(&self, slug: &str) -> RepoResult<Tag>;
    /// Tags for the given slugs; unknown slugs are skipped.
    async fn tags_by_slugs(&self, slugs: &[String]) -> RepoResult<Vec<Tag>>;
}

#[async_trait]
pub trait ContentRepo: Send + Sync {
    async fn create_content(&self, new: NewContent) -> RepoResult<Content>;
    async fn get_content(&self, id: Id) -> RepoResult<Content>;
    async fn update_content(&self, id: Id, patch: ContentPatch) -> RepoResult<Content>;
    async fn set_hidden(&self, id: Id, hidden: bool) -> RepoResult<Content>;
    async fn set_deleted(&self, id: Id, deleted: bool) -> RepoResult<Content>;
    /// Fails with `Integrity` when accepting and a sibling answer is already accepted.
    async fn set_accepted(&self, id: Id, accepted: bool) -> RepoResult<Content>;
    async fn record_view(&self, id: Id) -> RepoResult<Content>;
    /// Children of one kind, newest first.
    async fn list_children(&self, parent_id: Id, kind: ContentKind, vis: Visibility) -> RepoResult<Vec<Content>>;
    async fn list_by_user(&self, user_id: Id, kind: ContentKind, vis: Visibility) -> RepoResult<Vec<Content>>;
    async fn list_questions(&self, query: &QuestionQuery) -> RepoResult<Vec<Content>>;
}

#[async_trait]
pub trait VoteRepo: Send + Sync {
    /// Apply the toggle state machine and recompute the score as one unit.
    async fn toggle_vote(&self, user_id: Id, content_id: Id, value: VoteValue) -> RepoResult<VoteOutcome>;
    async fn votes_for(&self, user_id: Id, content_ids: &[Id]) -> RepoResult<HashMap<Id, VoteValue>>;
}

pub trait Repo: UserRepo + TagRepo + ContentRepo + VoteRepo {}

impl<T> Repo for T where T: UserRepo + TagRepo + ContentRepo + VoteRepo {}

/// Sort key shared by both stores. Ties break on id, newest first.
pub fn sort_questions(items: &mut [Content], order: ListOrder) {
    match order {
        ListOrder::Hot => items.sort_by(|a, b| b.timepoints.cmp(&a.timepoints).then(b.id.cmp(&a.id))),
        ListOrder::New => items.sort_by(|a, b| b.created.cmp(&a.created).then(b.id.cmp(&a.id))),
        ListOrder::Top => items.sort_by(|a, b| b.points.cmp(&a.points).then(b.id.cmp(&a.id))),
    }
}

#[cfg(feature = "inmem-store")]
pub mod inmem {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::path::{Path, PathBuf};

    /// File name of the snapshot inside the data directory.
    pub const SNAPSHOT_FILE: &str = "state.json";

    #[derive(Default, Serialize, Deserialize)]
    struct State {
        users: HashMap<Id, User>,
        tags: HashMap<Id, Tag>,
        content: HashMap<Id, Content>,
        votes: HashMap<Id, HashMap<Id, VoteValue>>, // content id -> user id -> value
        // password hashes never serialize with `User`
        #[serde(default)]
        credentials: HashMap<Id, String>,
        next_id: Id,
    }

    impl State {
        fn next_id(&mut self) -> Id {
            self.next_id += 1;
            self.next_id
        }

        fn public_answers(&self, question_id: Id) -> impl Iterator<Item = &Content> {
            self.content.values().filter(move |c| {
                c.parent_id == Some(question_id) && c.kind == ContentKind::Answer && c.is_public()
            })
        }

        fn matches_filter(&self, q: &Content, filter: QuestionFilter) -> bool {
            match filter {
                QuestionFilter::All => true,
                QuestionFilter::WithAnswers => self.public_answers(q.id).next().is_some(),
                QuestionFilter::WithoutAnswers => self.public_answers(q.id).next().is_none(),
                QuestionFilter::WithoutAcceptedAnswer => !self.public_answers(q.id).any(|a| a.is_accepted),
            }
        }
    }

    /// Map-backed store with an optional JSON snapshot on disk.
    #[derive(Clone)]
    pub struct InMemRepo {
        state: Arc<RwLock<State>>,
        snapshot_path: Option<Arc<PathBuf>>,
        // held from serialize to rename so snapshots land in order
        snapshot_lock: Arc<Mutex<()>>,
    }

    impl InMemRepo {
        pub fn at(path: PathBuf) -> Self {
            let state = Self::load_state_from(&path);
            Self { state: Arc::new(RwLock::new(state)), snapshot_path: Some(Arc::new(path)), snapshot_lock: Arc::default() }
        }

        /// No snapshot; state lives as long as the process.
        pub fn ephemeral() -> Self {
            Self { state: Arc::new(RwLock::new(State::default())), snapshot_path: None, snapshot_lock: Arc::default() }
        }

        fn load_state_from(path: &Path) -> State {
            match std::fs::read(path) {
                Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                    Ok(mut s) => {
                        let State { users, credentials, .. } = &mut s;
                        for (id, user) in users.iter_mut() {
                            if let Some(hash) = credentials.get(id) {
                                user.password_hash = hash.clone();
                            }
                        }
                        log::info!("loaded snapshot '{}'", path.display());
                        s
                    }
                    Err(e) => {
                        log::warn!("failed to parse snapshot '{}': {e}; starting empty", path.display());
                        State::default()
                    }
                },
                Err(e) => {
                    log::info!("no snapshot at '{}': {e}; starting empty", path.display());
                    State::default()
                }
            }
        }

        fn read(&self) -> RepoResult<RwLockReadGuard<'_, State>> {
            self.state.read().map_err(|_| RepoError::Internal("state lock poisoned".into()))
        }

        fn write(&self) -> RepoResult<RwLockWriteGuard<'_, State>> {
            self.state.write().map_err(|_| RepoError::Internal("state lock poisoned".into()))
        }

        /// Write the current state to the snapshot file via a temp file and rename.
        fn persist(&self) {
            let Some(path) = self.snapshot_path.as_deref() else { return };
            let Ok(_guard) = self.snapshot_lock.lock() else {
                log::error!("snapshot lock poisoned; skipping write");
                return;
            };
            let bytes = match self.read().map(|s| serde_json::to_vec_pretty(&*s)) {
                Ok(Ok(b)) => b,
                Ok(Err(e)) => {
                    log::error!("failed to serialize snapshot: {e}");
                    return;
                }
                Err(e) => {
                    log::error!("failed to read state for snapshot: {e}");
                    return;
                }
            };
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                if let Err(e) = std::fs::create_dir_all(dir) {
                    log::error!("failed to create snapshot dir '{}': {e}", dir.display());
                    return;
                }
            }
            let tmp = path.with_extension("json.tmp");
            if let Err(e) = std::fs::write(&tmp, bytes).and_then(|_| std::fs::rename(&tmp, path)) {
                log::error!("failed to write snapshot '{}': {e}", path.display());
            }
        }

        fn update_with<F>(&self, id: Id, f: F) -> RepoResult<Content>
        where
            F: FnOnce(&mut Content),
        {
            let mut s = self.write()?;
            let item = s.content.get_mut(&id).ok_or(RepoError::NotFound)?;
            f(item);
            let updated = item.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }
    }

    #[async_trait]
    impl UserRepo for InMemRepo {
        async fn create_user(&self, draft: UserDraft) -> RepoResult<User> {
            let mut s = self.write()?;
            if s.users.values().any(|u| u.username == draft.username) {
                return Err(RepoError::Conflict);
            }
            let id = s.next_id();
            let user = User {
                id,
                username: draft.username,
                email: draft.email,
                password_hash: draft.password_hash,
                created: Utc::now(),
            };
            s.credentials.insert(id, user.password_hash.clone());
            s.users.insert(id, user.clone());
            drop(s);
            self.persist();
            Ok(user)
        }

        async fn get_user_by_username(&self, username: &str) -> RepoResult<User> {
            let s = self.read()?;
            s.users.values().find(|u| u.username == username).cloned().ok_or(RepoError::NotFound)
        }

        async fn list_users(&self) -> RepoResult<Vec<User>> {
            let s = self.read()?;
            let mut v: Vec<_> = s.users.values().cloned().collect();
            v.sort_by(|a, b| a.username.cmp(&b.username));
            Ok(v)
        }
    }

    #[async_trait]
    impl TagRepo for InMemRepo {
        async fn list_tags(&self) -> RepoResult<Vec<Tag>> {
            let s = self.read()?;
            let mut v: Vec<_> = s.tags.values().cloned().collect();
            v.sort_by(|a, b| a.slug.cmp(&b.slug));
            Ok(v)
        }

        async fn create_tag(&self, name: String, slug: String) -> RepoResult<Tag> {
            let mut s = self.write()?;
            if s.tags.values().any(|t| t.slug == slug) {
                return Err(RepoError::Conflict);
            }
            let id = s.next_id();
            let tag = Tag { id, name, slug };
            s.tags.insert(id, tag.clone());
            drop(s);
            self.persist();
            Ok(tag)
        }

        async fn get_tag(&self, slug: &str) -> RepoResult<Tag> {
            let s = self.read()?;
            s.tags.values().find(|t| t.slug == slug).cloned().ok_or(RepoError::NotFound)
        }

        async fn tags_by_slugs(&self, slugs: &[String]) -> RepoResult<Vec<Tag>> {
            let s = self.read()?;
            let mut v: Vec<_> = s.tags.values().filter(|t| slugs.contains(&t.slug)).cloned().collect();
            v.sort_by(|a, b| a.slug.cmp(&b.slug));
            Ok(v)
        }
    }

    #[async_trait]
    impl ContentRepo for InMemRepo {
        async fn create_content(&self, new: NewContent) -> RepoResult<Content> {
            let mut s = self.write()?;
            if !s.users.contains_key(&new.user_id) {
                return Err(RepoError::NotFound);
            }
            if let Some(pid) = new.parent_id {
                if !s.content.contains_key(&pid) {
                    return Err(RepoError::NotFound);
                }
            }
            let mut tags: Vec<String> = new.tags.into_iter().filter(|slug| s.tags.values().any(|t| &t.slug == slug)).collect();
            tags.sort();
            tags.dedup();
            let id = s.next_id();
            let created = Utc::now();
            let score = voting::from_counts(0, 0, created);
            let item = Content {
                id,
                kind: new.kind,
                parent_id: new.parent_id,
                user_id: Some(new.user_id),
                slug: new.slug,
                title: new.title,
                text: new.text,
                tags,
                is_hidden: false,
                is_deleted: false,
                is_accepted: false,
                up: score.up,
                down: score.down,
                points: score.points,
                timepoints: score.timepoints,
                views: 0,
                created,
            };
            s.content.insert(id, item.clone());
            drop(s);
            self.persist();
            Ok(item)
        }

        async fn get_content(&self, id: Id) -> RepoResult<Content> {
            self.read()?.content.get(&id).cloned().ok_or(RepoError::NotFound)
        }

        async fn update_content(&self, id: Id, patch: ContentPatch) -> RepoResult<Content> {
            let mut s = self.write()?;
            let known_tags = patch.tags.map(|slugs| {
                let mut v: Vec<String> = slugs.into_iter().filter(|slug| s.tags.values().any(|t| &t.slug == slug)).collect();
                v.sort();
                v.dedup();
                v
            });
            let item = s.content.get_mut(&id).ok_or(RepoError::NotFound)?;
            if let Some(title) = patch.title { item.title = title; }
            if let Some(slug) = patch.slug { item.slug = slug; }
            if let Some(text) = patch.text { item.text = text; }
            if let Some(tags) = known_tags { item.tags = tags; }
            let updated = item.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }

        async fn set_hidden(&self, id: Id, hidden: bool) -> RepoResult<Content> {
            self.update_with(id, |c| c.is_hidden = hidden)
        }

        async fn set_deleted(&self, id: Id, deleted: bool) -> RepoResult<Content> {
            self.update_with(id, |c| c.is_deleted = deleted)
        }

        async fn set_accepted(&self, id: Id, accepted: bool) -> RepoResult<Content> {
            let mut s = self.write()?;
            let parent_id = s.content.get(&id).ok_or(RepoError::NotFound)?.parent_id;
            if accepted {
                let taken = s.content.values().any(|c| {
                    c.id != id && c.kind == ContentKind::Answer && c.parent_id.is_some() && c.parent_id == parent_id && c.is_accepted
                });
                if taken {
                    return Err(RepoError::Integrity(DUPLICATE_ACCEPTED_ANSWER.into()));
                }
            }
            let item = s.content.get_mut(&id).ok_or(RepoError::NotFound)?;
            item.is_accepted = accepted;
            let updated = item.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }

        async fn record_view(&self, id: Id) -> RepoResult<Content> {
            self.update_with(id, |c| c.views += 1)
        }

        async fn list_children(&self, parent_id: Id, kind: ContentKind, vis: Visibility) -> RepoResult<Vec<Content>> {
            let s = self.read()?;
            let mut v: Vec<_> = s.content.values()
                .filter(|c| c.parent_id == Some(parent_id) && c.kind == kind && vis.admits(c))
                .cloned()
                .collect();
            v.sort_by(|a, b| b.id.cmp(&a.id));
            Ok(v)
        }

        async fn list_by_user(&self, user_id: Id, kind: ContentKind, vis: Visibility) -> RepoResult<Vec<Content>> {
            let s = self.read()?;
            let mut v: Vec<_> = s.content.values()
                .filter(|c| c.is_owned_by(user_id) && c.kind == kind && vis.admits(c))
                .cloned()
                .collect();
            v.sort_by(|a, b| b.id.cmp(&a.id));
            Ok(v)
        }

        async fn list_questions(&self, query: &QuestionQuery) -> RepoResult<Vec<Content>> {
            let s = self.read()?;
            let mut v: Vec<_> = s.content.values()
                .filter(|c| c.kind == ContentKind::Question && query.visibility.admits(c))
                .filter(|c| query.tag.as_ref().map_or(true, |t| c.tags.contains(t)))
                .filter(|c| s.matches_filter(c, query.filter))
                .cloned()
                .collect();
            sort_questions(&mut v, query.order);
            Ok(v)
        }
    }

    #[async_trait]
    impl VoteRepo for InMemRepo {
        async fn toggle_vote(&self, user_id: Id, content_id: Id, value: VoteValue) -> RepoResult<VoteOutcome> {
            let mut guard = self.write()?;
            let state = &mut *guard;
            if !state.users.contains_key(&user_id) {
                return Err(RepoError::NotFound);
            }
            let created = state.content.get(&content_id).ok_or(RepoError::NotFound)?.created;
            let ledger = state.votes.entry(content_id).or_default();
            let change = voting::toggle(ledger.get(&user_id).copied(), value);
            match change.resulting() {
                Some(v) => { ledger.insert(user_id, v); }
                None => { ledger.remove(&user_id); }
            }
            let score = voting::tally(ledger.values().copied(), created);
            if ledger.is_empty() {
                state.votes.remove(&content_id);
            }
            let item = state.content.get_mut(&content_id).ok_or(RepoError::NotFound)?;
            item.apply_score(&score);
            drop(guard);
            self.persist();
            tracing::debug!(user_id, content_id, ?change, points = score.points, "vote toggled");
            Ok(VoteOutcome { content_id, user_vote: change.resulting(), score })
        }

        async fn votes_for(&self, user_id: Id, content_ids: &[Id]) -> RepoResult<HashMap<Id, VoteValue>> {
            let s = self.read()?;
            Ok(content_ids
                .iter()
                .filter_map(|cid| s.votes.get(cid).and_then(|l| l.get(&user_id)).map(|v| (*cid, *v)))
                .collect())
        }
    }

    impl InMemRepo {
        /// Number of ledger rows on one content item.
        pub fn vote_rows(&self, content_id: Id) -> usize {
            self.read().map(|s| s.votes.get(&content_id).map_or(0, HashMap::len)).unwrap_or(0)
        }
    }
}

// Postgres implementation (feature = "postgres-store")
#[cfg(feature = "postgres-store")]
pub mod pg {
    use super::*;
    use chrono::{DateTime, Utc};
    use sqlx::{Pool, Postgres, QueryBuilder};

    const ACCEPTED_INDEX: &str = "content_one_accepted_answer";

    const CONTENT_SELECT: &str = r#"
        SELECT c.id, c.kind, c.parent_id, c.user_id, c.slug, c.title, c.text,
               c.is_hidden, c.is_deleted, c.is_accepted,
               c.up, c.down, c.points, c.timepoints, c.views, c.created,
               ARRAY(SELECT t.slug FROM content_tags ct JOIN tags t ON t.id = ct.tag_id
                     WHERE ct.content_id = c.id ORDER BY t.slug)::text[] AS tags
        FROM content c
    "#;

    #[derive(Clone)]
    pub struct PgRepo { pool: Pool<Postgres> }

    impl PgRepo {
        pub fn new(pool: Pool<Postgres>) -> Self { Self { pool } }

        pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
            sqlx::migrate!("./migrations").run(&self.pool).await
        }
    }

    #[derive(sqlx::FromRow)]
    struct ContentRow {
        id: Id,
        kind: String,
        parent_id: Option<Id>,
        user_id: Option<Id>,
        slug: String,
        title: String,
        text: String,
        is_hidden: bool,
        is_deleted: bool,
        is_accepted: bool,
        up: i64,
        down: i64,
        points: i64,
        timepoints: i64,
        views: i64,
        created: DateTime<Utc>,
        tags: Vec<String>,
    }

    impl TryFrom<ContentRow> for Content {
        type Error = RepoError;

        fn try_from(r: ContentRow) -> Result<Self, Self::Error> {
            let kind = ContentKind::parse(&r.kind)
                .ok_or_else(|| RepoError::Internal(format!("unknown content kind '{}'", r.kind)))?;
            Ok(Content {
                id: r.id,
                kind,
                parent_id: r.parent_id,
                user_id: r.user_id,
                slug: r.slug,
                title: r.title,
                text: r.text,
                tags: r.tags,
                is_hidden: r.is_hidden,
                is_deleted: r.is_deleted,
                is_accepted: r.is_accepted,
                up: r.up,
                down: r.down,
                points: r.points,
                timepoints: r.timepoints,
                views: r.views,
                created: r.created,
            })
        }
    }

    #[derive(sqlx::FromRow)]
    struct UserRow {
        id: Id,
        username: String,
        email: String,
        password_hash: String,
        created: DateTime<Utc>,
    }

    impl From<UserRow> for User {
        fn from(r: UserRow) -> Self {
            User { id: r.id, username: r.username, email: r.email, password_hash: r.password_hash, created: r.created }
        }
    }

    #[derive(sqlx::FromRow)]
    struct TagRow { id: Id, name: String, slug: String }

    impl From<TagRow> for Tag {
        fn from(r: TagRow) -> Self { Tag { id: r.id, name: r.name, slug: r.slug } }
    }

    fn map_err(e: sqlx::Error) -> RepoError {
        match &e {
            sqlx::Error::RowNotFound => RepoError::NotFound,
            sqlx::Error::Database(db) => match db.code().as_deref() {
                Some("23505") if db.constraint() == Some(ACCEPTED_INDEX) => {
                    RepoError::Integrity(DUPLICATE_ACCEPTED_ANSWER.into())
                }
                Some("23505") => RepoError::Conflict,
                Some("23503") => RepoError::NotFound,
                _ => RepoError::Internal(e.to_string()),
            },
            _ => RepoError::Internal(e.to_string()),
        }
    }

    fn push_visibility(qb: &mut QueryBuilder<'_, Postgres>, vis: Visibility) {
        match vis {
            Visibility::All => { qb.push("TRUE"); }
            Visibility::Public => { qb.push("(NOT c.is_hidden AND NOT c.is_deleted)"); }
            Visibility::ViewableBy(uid) => {
                qb.push("(c.user_id = ").push_bind(uid).push(" OR (NOT c.is_hidden AND NOT c.is_deleted))");
            }
        }
    }

    fn rows_into(rows: Vec<ContentRow>) -> RepoResult<Vec<Content>> {
        rows.into_iter().map(Content::try_from).collect()
    }

    async fn replace_tags(tx: &mut sqlx::PgConnection, content_id: Id, slugs: &[String]) -> RepoResult<()> {
        sqlx::query("DELETE FROM content_tags WHERE content_id = $1")
            .bind(content_id)
            .execute(&mut *tx).await.map_err(map_err)?;
        sqlx::query(
            "INSERT INTO content_tags (content_id, tag_id) SELECT $1, id FROM tags WHERE slug = ANY($2) ON CONFLICT DO NOTHING",
        )
        .bind(content_id)
        .bind(slugs)
        .execute(&mut *tx).await.map_err(map_err)?;
        Ok(())
    }

    impl PgRepo {
        async fn fetch_content(&self, id: Id) -> RepoResult<Content> {
            let row = sqlx::query_as::<_, ContentRow>(&format!("{CONTENT_SELECT} WHERE c.id = $1"))
                .bind(id)
                .fetch_one(&self.pool).await.map_err(map_err)?;
            row.try_into()
        }

        async fn set_flag(&self, id: Id, column: &'static str, value: bool) -> RepoResult<Content> {
            let sql = format!("UPDATE content SET {column} = $2 WHERE id = $1 RETURNING id");
            sqlx::query_scalar::<_, Id>(&sql)
                .bind(id)
                .bind(value)
                .fetch_optional(&self.pool).await.map_err(map_err)?
                .ok_or(RepoError::NotFound)?;
            self.fetch_content(id).await
        }
    }

    #[async_trait]
    impl UserRepo for PgRepo {
        async fn create_user(&self, draft: UserDraft) -> RepoResult<User> {
            let row = sqlx::query_as::<_, UserRow>(
                "INSERT INTO users (username, email, password_hash) VALUES ($1,$2,$3) RETURNING id, username, email, password_hash, created",
            )
            .bind(&draft.username).bind(&draft.email).bind(&draft.password_hash)
            .fetch_one(&self.pool).await.map_err(map_err)?;
            Ok(row.into())
        }

        async fn get_user_by_username(&self, username: &str) -> RepoResult<User> {
            let row = sqlx::query_as::<_, UserRow>("SELECT id, username, email, password_hash, created FROM users WHERE username = $1")
                .bind(username)
                .fetch_one(&self.pool).await.map_err(map_err)?;
            Ok(row.into())
        }

        async fn list_users(&self) -> RepoResult<Vec<User>> {
            let rows = sqlx::query_as::<_, UserRow>("SELECT id, username, email, password_hash, created FROM users ORDER BY username")
                .fetch_all(&self.pool).await.map_err(map_err)?;
            Ok(rows.into_iter().map(User::from).collect())
        }
    }

    #[async_trait]
    impl TagRepo for PgRepo {
        async fn list_tags(&self) -> RepoResult<Vec<Tag>> {
            let rows = sqlx::query_as::<_, TagRow>("SELECT id, name, slug FROM tags ORDER BY slug")
                .fetch_all(&self.pool).await.map_err(map_err)?;
            Ok(rows.into_iter().map(Tag::from).collect())
        }

        async fn create_tag(&self, name: String, slug: String) -> RepoResult<Tag> {
            let row = sqlx::query_as::<_, TagRow>("INSERT INTO tags (name, slug) VALUES ($1,$2) RETURNING id, name, slug")
                .bind(&name).bind(&slug)
                .fetch_one(&self.pool).await.map_err(map_err)?;
            Ok(row.into())
        }

        async fn get_tag(&self, slug: &str) -> RepoResult<Tag> {
            let row = sqlx::query_as::<_, TagRow>("SELECT id, name, slug FROM tags WHERE slug = $1")
                .bind(slug)
                .fetch_one(&self.pool).await.map_err(map_err)?;
            Ok(row.into())
        }

        async fn tags_by_slugs(&self, slugs: &[String]) -> RepoResult<Vec<Tag>> {
            let rows = sqlx::query_as::<_, TagRow>("SELECT id, name, slug FROM tags WHERE slug = ANY($1) ORDER BY slug")
                .bind(slugs)
                .fetch_all(&self.pool).await.map_err(map_err)?;
            Ok(rows.into_iter().map(Tag::from).collect())
        }
    }

    #[async_trait]
    impl ContentRepo for PgRepo {
        async fn create_content(&self, new: NewContent) -> RepoResult<Content> {
            let mut tx = self.pool.begin().await.map_err(map_err)?;
            let created = Utc::now();
            let score = voting::from_counts(0, 0, created);
            let id: Id = sqlx::query_scalar(
                r#"INSERT INTO content (kind, parent_id, user_id, slug, title, text, timepoints, created)
                   VALUES ($1,$2,$3,$4,$5,$6,$7,$8) RETURNING id"#,
            )
            .bind(new.kind.as_str())
            .bind(new.parent_id)
            .bind(new.user_id)
            .bind(&new.slug)
            .bind(&new.title)
            .bind(&new.text)
            .bind(score.timepoints)
            .bind(created)
            .fetch_one(&mut *tx).await.map_err(map_err)?;
            if !new.tags.is_empty() {
                replace_tags(&mut *tx, id, &new.tags).await?;
            }
            tx.commit().await.map_err(map_err)?;
            self.fetch_content(id).await
        }

        async fn get_content(&self, id: Id) -> RepoResult<Content> {
            self.fetch_content(id).await
        }

        async fn update_content(&self, id: Id, patch: ContentPatch) -> RepoResult<Content> {
            let mut tx = self.pool.begin().await.map_err(map_err)?;
            sqlx::query_scalar::<_, Id>(
                "UPDATE content SET title = COALESCE($2, title), slug = COALESCE($3, slug), text = COALESCE($4, text) WHERE id = $1 RETURNING id",
            )
            .bind(id)
            .bind(patch.title.as_ref())
            .bind(patch.slug.as_ref())
            .bind(patch.text.as_ref())
            .fetch_optional(&mut *tx).await.map_err(map_err)?
            .ok_or(RepoError::NotFound)?;
            if let Some(tags) = patch.tags.as_ref() {
                replace_tags(&mut *tx, id, tags).await?;
            }
            tx.commit().await.map_err(map_err)?;
            self.fetch_content(id).await
        }

        async fn set_hidden(&self, id: Id, hidden: bool) -> RepoResult<Content> {
            self.set_flag(id, "is_hidden", hidden).await
        }

        async fn set_deleted(&self, id: Id, deleted: bool) -> RepoResult<Content> {
            self.set_flag(id, "is_deleted", deleted).await
        }

        async fn set_accepted(&self, id: Id, accepted: bool) -> RepoResult<Content> {
            let mut tx = self.pool.begin().await.map_err(map_err)?;
            let parent_id: Option<Id> = sqlx::query_scalar("SELECT parent_id FROM content WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx).await.map_err(map_err)?
                .ok_or(RepoError::NotFound)?;
            if accepted {
                let taken: bool = sqlx::query_scalar(
                    "SELECT EXISTS (SELECT 1 FROM content WHERE parent_id = $1 AND kind = 'answer' AND is_accepted AND id <> $2)",
                )
                .bind(parent_id)
                .bind(id)
                .fetch_one(&mut *tx).await.map_err(map_err)?;
                if taken {
                    return Err(RepoError::Integrity(DUPLICATE_ACCEPTED_ANSWER.into()));
                }
            }
            // the partial unique index rejects a concurrent second accept
            sqlx::query("UPDATE content SET is_accepted = $2 WHERE id = $1")
                .bind(id)
                .bind(accepted)
                .execute(&mut *tx).await.map_err(map_err)?;
            tx.commit().await.map_err(map_err)?;
            self.fetch_content(id).await
        }

        async fn record_view(&self, id: Id) -> RepoResult<Content> {
            sqlx::query_scalar::<_, Id>("UPDATE content SET views = views + 1 WHERE id = $1 RETURNING id")
                .bind(id)
                .fetch_optional(&self.pool).await.map_err(map_err)?
                .ok_or(RepoError::NotFound)?;
            self.fetch_content(id).await
        }

        async fn list_children(&self, parent_id: Id, kind: ContentKind, vis: Visibility) -> RepoResult<Vec<Content>> {
            let mut qb = QueryBuilder::new(CONTENT_SELECT);
            qb.push(" WHERE c.parent_id = ").push_bind(parent_id);
            qb.push(" AND c.kind = ").push_bind(kind.as_str());
            qb.push(" AND ");
            push_visibility(&mut qb, vis);
            qb.push(" ORDER BY c.id DESC");
            let rows = qb.build_query_as::<ContentRow>().fetch_all(&self.pool).await.map_err(map_err)?;
            rows_into(rows)
        }

        async fn list_by_user(&self, user_id: Id, kind: ContentKind, vis: Visibility) -> RepoResult<Vec<Content>> {
            let mut qb = QueryBuilder::new(CONTENT_SELECT);
            qb.push(" WHERE c.user_id = ").push_bind(user_id);
            qb.push(" AND c.kind = ").push_bind(kind.as_str());
            qb.push(" AND ");
            push_visibility(&mut qb, vis);
            qb.push(" ORDER BY c.id DESC");
            let rows = qb.build_query_as::<ContentRow>().fetch_all(&self.pool).await.map_err(map_err)?;
            rows_into(rows)
        }

        async fn list_questions(&self, query: &QuestionQuery) -> RepoResult<Vec<Content>> {
            const PUBLIC_ANSWERS: &str =
                "SELECT 1 FROM content a WHERE a.parent_id = c.id AND a.kind = 'answer' AND NOT a.is_hidden AND NOT a.is_deleted";
            let mut qb = QueryBuilder::new(CONTENT_SELECT);
            qb.push(" WHERE c.kind = 'question' AND ");
            push_visibility(&mut qb, query.visibility);
            if let Some(tag) = query.tag.as_ref() {
                qb.push(" AND EXISTS (SELECT 1 FROM content_tags ct JOIN tags t ON t.id = ct.tag_id WHERE ct.content_id = c.id AND t.slug = ")
                    .push_bind(tag.clone())
                    .push(")");
            }
            match query.filter {
                QuestionFilter::All => {}
                QuestionFilter::WithAnswers => { qb.push(format!(" AND EXISTS ({PUBLIC_ANSWERS})")); }
                QuestionFilter::WithoutAnswers => { qb.push(format!(" AND NOT EXISTS ({PUBLIC_ANSWERS})")); }
                QuestionFilter::WithoutAcceptedAnswer => {
                    qb.push(format!(" AND NOT EXISTS ({PUBLIC_ANSWERS} AND a.is_accepted)"));
                }
            }
            qb.push(match query.order {
                ListOrder::Hot => " ORDER BY c.timepoints DESC, c.id DESC",
                ListOrder::New => " ORDER BY c.created DESC, c.id DESC",
                ListOrder::Top => " ORDER BY c.points DESC, c.id DESC",
            });
            let rows = qb.build_query_as::<ContentRow>().fetch_all(&self.pool).await.map_err(map_err)?;
            rows_into(rows)
        }
    }

    #[async_trait]
    impl VoteRepo for PgRepo {
        async fn toggle_vote(&self, user_id: Id, content_id: Id, value: VoteValue) -> RepoResult<VoteOutcome> {
            let mut tx = self.pool.begin().await.map_err(map_err)?;
            // row lock serializes every vote on this item until commit
            let created: DateTime<Utc> = sqlx::query_scalar("SELECT created FROM content WHERE id = $1 FOR UPDATE")
                .bind(content_id)
                .fetch_optional(&mut *tx).await.map_err(map_err)?
                .ok_or(RepoError::NotFound)?;
            let current: Option<i16> = sqlx::query_scalar("SELECT value FROM votes WHERE user_id = $1 AND content_id = $2")
                .bind(user_id)
                .bind(content_id)
                .fetch_optional(&mut *tx).await.map_err(map_err)?;
            let current = current.map(VoteValue::try_from).transpose().map_err(RepoError::Internal)?;
            let change = voting::toggle(current, value);
            match change {
                voting::VoteChange::Insert(v) => {
                    sqlx::query("INSERT INTO votes (user_id, content_id, value) VALUES ($1,$2,$3)")
                        .bind(user_id).bind(content_id).bind(i16::from(v))
                        .execute(&mut *tx).await.map_err(map_err)?;
                }
                voting::VoteChange::Update(v) => {
                    sqlx::query("UPDATE votes SET value = $3 WHERE user_id = $1 AND content_id = $2")
                        .bind(user_id).bind(content_id).bind(i16::from(v))
                        .execute(&mut *tx).await.map_err(map_err)?;
                }
                voting::VoteChange::Delete => {
                    sqlx::query("DELETE FROM votes WHERE user_id = $1 AND content_id = $2")
                        .bind(user_id).bind(content_id)
                        .execute(&mut *tx).await.map_err(map_err)?;
                }
            }
            let (up, down): (i64, i64) = sqlx::query_as(
                "SELECT COUNT(*) FILTER (WHERE value = 1), COUNT(*) FILTER (WHERE value = -1) FROM votes WHERE content_id = $1",
            )
            .bind(content_id)
            .fetch_one(&mut *tx).await.map_err(map_err)?;
            let score = voting::from_counts(up, down, created);
            sqlx::query("UPDATE content SET up = $2, down = $3, points = $4, timepoints = $5 WHERE id = $1")
                .bind(content_id)
                .bind(score.up)
                .bind(score.down)
                .bind(score.points)
                .bind(score.timepoints)
                .execute(&mut *tx).await.map_err(map_err)?;
            tx.commit().await.map_err(map_err)?;
            tracing::debug!(user_id, content_id, ?change, points = score.points, "vote toggled");
            Ok(VoteOutcome { content_id, user_vote: change.resulting(), score })
        }

        async fn votes_for(&self, user_id: Id, content_ids: &[Id]) -> RepoResult<HashMap<Id, VoteValue>> {
            let rows: Vec<(Id, i16)> = sqlx::query_as("SELECT content_id, value FROM votes WHERE user_id = $1 AND content_id = ANY($2)")
                .bind(user_id)
                .bind(content_ids)
                .fetch_all(&self.pool).await.map_err(map_err)?;
            rows.into_iter()
                .map(|(cid, v)| VoteValue::try_from(v).map(|v| (cid, v)).map_err(RepoError::Internal))
                .collect()
        }
    }
}
