//! Core forum operations.
//!
//! Every operation receives the acting user explicitly. Visibility rules are
//! applied on every fetch, so hidden or deleted content a caller does not own
//! is reported as [`ForumError::NotFound`].

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::auth::{hash_password, verify_password, Role};
use crate::models::*;
use crate::repo::{QuestionQuery, Repo, RepoError};
use crate::tree;
use crate::validation::{self, FieldErrors};
use crate::visibility::Visibility;

#[derive(thiserror::Error, Debug)]
pub enum ForumError {
    #[error("validation failed")] Validation(FieldErrors),
    #[error("integrity: {0}")] Integrity(String),
    #[error("not found")] NotFound,
    #[error("authentication required")] Unauthenticated,
    #[error("invalid credentials")] InvalidCredentials,
    #[error("forbidden")] Forbidden,
    #[error("conflict")] Conflict,
    #[error("internal: {0}")] Internal(String),
}

impl From<RepoError> for ForumError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::NotFound => ForumError::NotFound,
            RepoError::Conflict => ForumError::Conflict,
            RepoError::Integrity(msg) => ForumError::Integrity(msg),
            RepoError::Internal(msg) => ForumError::Internal(msg),
        }
    }
}

impl From<FieldErrors> for ForumError {
    fn from(e: FieldErrors) -> Self { ForumError::Validation(e) }
}

impl From<tree::Orphaned> for ForumError {
    fn from(e: tree::Orphaned) -> Self { ForumError::Integrity(e.to_string()) }
}

pub type ForumResult<T> = Result<T, ForumError>;

/// The authenticated user on whose behalf an operation runs.
#[derive(Debug, Clone)]
pub struct Actor {
    pub user_id: Id,
    pub username: String,
    pub roles: Vec<Role>,
}

impl Actor {
    pub fn is_admin(&self) -> bool {
        self.roles.contains(&Role::Admin)
    }
}

fn viewer_id(viewer: Option<&Actor>) -> Option<Id> {
    viewer.map(|a| a.user_id)
}

#[derive(Debug, Clone, Default)]
pub struct ListParams {
    pub order: ListOrder,
    pub filter: QuestionFilter,
    pub tag: Option<String>,
}

#[derive(Clone)]
pub struct Forum {
    repo: Arc<dyn Repo>,
}

impl Forum {
    pub fn new(repo: Arc<dyn Repo>) -> Self {
        Self { repo }
    }

    // ---------------- users -----------------------------------------

    pub async fn register(&self, new: NewUser) -> ForumResult<User> {
        let username = new.username.trim().to_string();
        let email = new.email.trim().to_string();
        let mut errors = FieldErrors::new();
        validation::check_username(&username, &mut errors);
        validation::check_email(&email, &mut errors);
        validation::check_password(&new.password, &mut errors);
        errors.into_result()?;

        let draft = UserDraft { username, email, password_hash: hash_password(&new.password) };
        let user = self.repo.create_user(draft).await?;
        info!(user_id = user.id, username = %user.username, "user registered");
        Ok(user)
    }

    /// Check credentials. Unknown users and wrong passwords look the same.
    pub async fn authenticate(&self, username: &str, password: &str) -> ForumResult<User> {
        let user = match self.repo.get_user_by_username(username).await {
            Ok(u) => u,
            Err(RepoError::NotFound) => return Err(ForumError::InvalidCredentials),
            Err(e) => return Err(e.into()),
        };
        if verify_password(password, &user.password_hash) {
            Ok(user)
        } else {
            Err(ForumError::InvalidCredentials)
        }
    }

    pub async fn list_users(&self) -> ForumResult<Vec<User>> {
        Ok(self.repo.list_users().await?)
    }

    pub async fn user_profile(&self, viewer: Option<&Actor>, username: &str) -> ForumResult<UserProfile> {
        let user = self.repo.get_user_by_username(username).await?;
        let vis = Visibility::for_viewer(viewer_id(viewer));
        let questions = self.repo.list_by_user(user.id, ContentKind::Question, vis).await?;
        let questions = self.annotate(viewer, questions).await?;
        Ok(UserProfile { user, questions })
    }

    // ---------------- content creation & edits ------------------------

    pub async fn ask(&self, actor: &Actor, new: NewQuestion) -> ForumResult<Content> {
        let title = new.title.trim().to_string();
        let mut errors = FieldErrors::new();
        validation::check_question_title(&title, &mut errors);
        validation::check_text(&new.text, false, &mut errors);
        let tags = self.resolve_tags(&new.tags, &mut errors).await?;
        errors.into_result()?;

        let slug = validation::slugify(&title);
        let item = self.repo.create_content(NewContent::question(actor.user_id, title, slug, new.text, tags)).await?;
        info!(content_id = item.id, user_id = actor.user_id, "question published");
        Ok(item)
    }

    pub async fn update_question(&self, actor: &Actor, id: Id, upd: UpdateQuestion) -> ForumResult<Content> {
        let current = self.fetch_owned(actor, id, ContentKind::Question).await?;
        let mut errors = FieldErrors::new();
        let title = upd.title.map(|t| t.trim().to_string());
        if let Some(title) = title.as_deref() {
            validation::check_question_title(title, &mut errors);
        }
        if let Some(text) = upd.text.as_deref() {
            validation::check_text(text, false, &mut errors);
        }
        let tags = match upd.tags.as_ref() {
            Some(t) => Some(self.resolve_tags(t, &mut errors).await?),
            None => None,
        };
        errors.into_result()?;

        let patch = ContentPatch {
            slug: title.as_deref().map(validation::slugify),
            title,
            text: upd.text,
            tags,
        };
        Ok(self.repo.update_content(current.id, patch).await?)
    }

    pub async fn answer(&self, actor: &Actor, question_id: Id, body: TextBody) -> ForumResult<Content> {
        let question = self.fetch_viewable(Some(actor.user_id), question_id).await?;
        if question.kind != ContentKind::Question {
            return Err(ForumError::NotFound);
        }
        let mut errors = FieldErrors::new();
        validation::check_text(&body.text, true, &mut errors);
        errors.into_result()?;

        let item = self.repo.create_content(NewContent::answer(actor.user_id, question.id, body.text)).await?;
        info!(content_id = item.id, question_id, user_id = actor.user_id, "answer published");
        Ok(item)
    }

    pub async fn update_answer(&self, actor: &Actor, id: Id, body: TextBody) -> ForumResult<Content> {
        self.update_text(actor, id, ContentKind::Answer, body).await
    }

    pub async fn comment(&self, actor: &Actor, parent_id: Id, body: TextBody) -> ForumResult<Content> {
        let parent = self.fetch_viewable(Some(actor.user_id), parent_id).await?;
        let mut errors = FieldErrors::new();
        if !parent.kind.accepts_child(ContentKind::Comment) {
            errors.add("parent", "Only questions and answers have comments.");
        }
        validation::check_text(&body.text, true, &mut errors);
        errors.into_result()?;

        let item = self.repo.create_content(NewContent::comment(actor.user_id, parent.id, body.text)).await?;
        info!(content_id = item.id, parent_id, user_id = actor.user_id, "comment published");
        Ok(item)
    }

    pub async fn update_comment(&self, actor: &Actor, id: Id, body: TextBody) -> ForumResult<Content> {
        self.update_text(actor, id, ContentKind::Comment, body).await
    }

    async fn update_text(&self, actor: &Actor, id: Id, kind: ContentKind, body: TextBody) -> ForumResult<Content> {
        let current = self.fetch_owned(actor, id, kind).await?;
        let mut errors = FieldErrors::new();
        validation::check_text(&body.text, true, &mut errors);
        errors.into_result()?;
        let patch = ContentPatch { text: Some(body.text), ..ContentPatch::default() };
        Ok(self.repo.update_content(current.id, patch).await?)
    }

    // ---------------- flags -------------------------------------------

    pub async fn set_hidden(&self, actor: &Actor, id: Id, hidden: bool) -> ForumResult<Content> {
        let item = self.repo.get_content(id).await?;
        if !item.is_owned_by(actor.user_id) {
            return Err(ForumError::NotFound);
        }
        Ok(self.repo.set_hidden(id, hidden).await?)
    }

    pub async fn set_deleted(&self, actor: &Actor, id: Id, deleted: bool) -> ForumResult<Content> {
        if !actor.is_admin() {
            return Err(ForumError::Forbidden);
        }
        let item = self.repo.set_deleted(id, deleted).await?;
        info!(content_id = id, admin = actor.user_id, deleted, "moderation flag changed");
        Ok(item)
    }

    /// Only the asker of the parent question may accept or unaccept an answer.
    pub async fn set_accepted(&self, actor: &Actor, answer_id: Id, accepted: bool) -> ForumResult<Content> {
        let answer = self.fetch_viewable(Some(actor.user_id), answer_id).await?;
        if answer.kind != ContentKind::Answer {
            return Err(FieldErrors::single("content", "Only answers can be accepted.").into());
        }
        let question = self.get_question(&answer).await?;
        if !question.is_owned_by(actor.user_id) {
            return Err(ForumError::Forbidden);
        }
        match self.repo.set_accepted(answer.id, accepted).await {
            Err(RepoError::Integrity(msg)) => {
                warn!(answer_id, question_id = question.id, "rejected second accepted answer");
                Err(ForumError::Integrity(msg))
            }
            other => Ok(other?),
        }
    }

    // ---------------- voting ------------------------------------------

    /// Toggle the actor's vote. Anonymous callers are rejected before any state is read.
    pub async fn vote(&self, actor: Option<&Actor>, content_id: Id, value: VoteValue) -> ForumResult<VoteOutcome> {
        let actor = actor.ok_or(ForumError::Unauthenticated)?;
        let item = self.fetch_viewable(Some(actor.user_id), content_id).await?;
        Ok(self.repo.toggle_vote(actor.user_id, item.id, value).await?)
    }

    // ---------------- tree navigation ---------------------------------

    /// Root question of any content item.
    pub async fn get_question(&self, item: &Content) -> ForumResult<Content> {
        let mut ancestors = Vec::with_capacity(2);
        let mut next = item.parent_id;
        while ancestors.len() < tree::max_depth(item.kind) {
            let Some(pid) = next else { break };
            let parent = match self.repo.get_content(pid).await {
                Ok(p) => p,
                Err(RepoError::NotFound) => break,
                Err(e) => return Err(e.into()),
            };
            next = parent.parent_id;
            ancestors.push(parent);
        }
        Ok(tree::question_of(item, &ancestors)?.clone())
    }

    pub async fn answers(&self, question: &Content, vis: Visibility) -> ForumResult<Vec<Content>> {
        if question.kind != ContentKind::Question {
            return Err(FieldErrors::single("content", "Only questions have answers.").into());
        }
        Ok(self.repo.list_children(question.id, ContentKind::Answer, vis).await?)
    }

    pub async fn comments(&self, item: &Content, vis: Visibility) -> ForumResult<Vec<Content>> {
        if !item.kind.accepts_child(ContentKind::Comment) {
            return Err(FieldErrors::single("content", "Only questions and answers have comments.").into());
        }
        Ok(self.repo.list_children(item.id, ContentKind::Comment, vis).await?)
    }

    // ---------------- listings ----------------------------------------

    pub async fn list_questions(&self, viewer: Option<&Actor>, params: ListParams) -> ForumResult<Vec<ContentView>> {
        let query = QuestionQuery {
            order: params.order,
            filter: params.filter,
            tag: params.tag,
            visibility: Visibility::for_viewer(viewer_id(viewer)),
        };
        let items = self.repo.list_questions(&query).await?;
        self.annotate(viewer, items).await
    }

    pub async fn questions_with_answers(&self, viewer: Option<&Actor>) -> ForumResult<Vec<ContentView>> {
        self.list_questions(viewer, ListParams { filter: QuestionFilter::WithAnswers, ..Default::default() }).await
    }

    pub async fn questions_without_answers(&self, viewer: Option<&Actor>) -> ForumResult<Vec<ContentView>> {
        self.list_questions(viewer, ListParams { filter: QuestionFilter::WithoutAnswers, ..Default::default() }).await
    }

    pub async fn questions_without_accepted_answer(&self, viewer: Option<&Actor>) -> ForumResult<Vec<ContentView>> {
        self.list_questions(viewer, ListParams { filter: QuestionFilter::WithoutAcceptedAnswer, ..Default::default() }).await
    }

    /// Question with its answers and comments; counts one view.
    pub async fn question_detail(&self, viewer: Option<&Actor>, id: Id) -> ForumResult<QuestionDetail> {
        let question = self.fetch_viewable(viewer_id(viewer), id).await?;
        if question.kind != ContentKind::Question {
            return Err(ForumError::NotFound);
        }
        let question = self.repo.record_view(question.id).await?;
        let vis = Visibility::for_viewer(viewer_id(viewer));

        let comments = self.comments(&question, vis).await?;
        let answers = self.answers(&question, vis).await?;
        let mut answer_comments = Vec::with_capacity(answers.len());
        for a in &answers {
            answer_comments.push(self.comments(a, vis).await?);
        }

        let mut ids = vec![question.id];
        ids.extend(comments.iter().map(|c| c.id));
        ids.extend(answers.iter().map(|a| a.id));
        ids.extend(answer_comments.iter().flatten().map(|c| c.id));
        let votes = self.user_votes(viewer, &ids).await?;
        let view = |c: Content| ContentView { user_vote: votes.get(&c.id).copied(), content: c };

        Ok(QuestionDetail {
            question: view(question),
            comments: comments.into_iter().map(view).collect(),
            answers: answers
                .into_iter()
                .zip(answer_comments)
                .map(|(a, cs)| AnswerThread { answer: view(a), comments: cs.into_iter().map(view).collect() })
                .collect(),
        })
    }

    // ---------------- tags --------------------------------------------

    pub async fn list_tags(&self) -> ForumResult<Vec<Tag>> {
        Ok(self.repo.list_tags().await?)
    }

    pub async fn create_tag(&self, actor: &Actor, new: NewTag) -> ForumResult<Tag> {
        if !actor.is_admin() {
            return Err(ForumError::Forbidden);
        }
        let name = new.name.trim().to_string();
        let mut errors = FieldErrors::new();
        validation::check_tag_name(&name, &mut errors);
        errors.into_result()?;
        let slug = validation::slugify(&name);
        Ok(self.repo.create_tag(name, slug).await?)
    }

    pub async fn tag_detail(&self, viewer: Option<&Actor>, slug: &str) -> ForumResult<TagDetail> {
        let tag = self.repo.get_tag(slug).await?;
        let params = ListParams { order: ListOrder::New, tag: Some(tag.slug.clone()), ..Default::default() };
        let questions = self.list_questions(viewer, params).await?;
        Ok(TagDetail { tag, questions })
    }

    // ---------------- helpers -----------------------------------------

    async fn fetch_viewable(&self, viewer: Option<Id>, id: Id) -> ForumResult<Content> {
        let item = self.repo.get_content(id).await?;
        if Visibility::for_viewer(viewer).admits(&item) {
            Ok(item)
        } else {
            Err(ForumError::NotFound)
        }
    }

    /// Owner edits: anything else, including a kind mismatch, is not found.
    async fn fetch_owned(&self, actor: &Actor, id: Id, kind: ContentKind) -> ForumResult<Content> {
        let item = self.repo.get_content(id).await?;
        if item.kind != kind || !item.is_owned_by(actor.user_id) {
            return Err(ForumError::NotFound);
        }
        Ok(item)
    }

    async fn resolve_tags(&self, slugs: &[String], errors: &mut FieldErrors) -> ForumResult<Vec<String>> {
        let mut wanted: Vec<String> = slugs.iter().map(|s| s.trim().to_lowercase()).filter(|s| !s.is_empty()).collect();
        wanted.sort();
        wanted.dedup();
        if wanted.is_empty() {
            return Ok(wanted);
        }
        let known = self.repo.tags_by_slugs(&wanted).await?;
        for slug in &wanted {
            if !known.iter().any(|t| &t.slug == slug) {
                errors.add("tags", format!("Unknown tag: {slug}"));
            }
        }
        Ok(known.into_iter().map(|t| t.slug).collect())
    }

    async fn user_votes(&self, viewer: Option<&Actor>, ids: &[Id]) -> ForumResult<HashMap<Id, VoteValue>> {
        match viewer {
            Some(a) if !ids.is_empty() => Ok(self.repo.votes_for(a.user_id, ids).await?),
            _ => Ok(HashMap::new()),
        }
    }

    async fn annotate(&self, viewer: Option<&Actor>, items: Vec<Content>) -> ForumResult<Vec<ContentView>> {
        let ids: Vec<Id> = items.iter().map(|c| c.id).collect();
        let votes = self.user_votes(viewer, &ids).await?;
        Ok(items
            .into_iter()
            .map(|c| ContentView { user_vote: votes.get(&c.id).copied(), content: c })
            .collect())
    }
}
