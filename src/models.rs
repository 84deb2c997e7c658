use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub type Id = i64;

/// Discriminator of the single content table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Question,
    Answer,
    Comment,
}

impl ContentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentKind::Question => "question",
            ContentKind::Answer => "answer",
            ContentKind::Comment => "comment",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "question" => Some(ContentKind::Question),
            "answer" => Some(ContentKind::Answer),
            "comment" => Some(ContentKind::Comment),
            _ => None,
        }
    }

    /// Questions take answers and comments, answers take comments, comments take nothing.
    pub fn accepts_child(self, child: ContentKind) -> bool {
        matches!(
            (self, child),
            (ContentKind::Question, ContentKind::Answer)
                | (ContentKind::Question, ContentKind::Comment)
                | (ContentKind::Answer, ContentKind::Comment)
        )
    }
}

/// A user's opinion on one content item. Serialized as `1` / `-1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i16", try_from = "i16")]
pub enum VoteValue {
    Up,
    Down,
}

impl From<VoteValue> for i16 {
    fn from(v: VoteValue) -> i16 {
        match v {
            VoteValue::Up => 1,
            VoteValue::Down => -1,
        }
    }
}

impl TryFrom<i16> for VoteValue {
    type Error = String;

    fn try_from(v: i16) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(VoteValue::Up),
            -1 => Ok(VoteValue::Down),
            other => Err(format!("invalid vote value {other}")),
        }
    }
}

/// Derived score fields, always recomputed from the vote ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Score {
    pub up: i64,
    pub down: i64,
    pub points: i64,
    pub timepoints: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Content {
    pub id: Id,
    pub kind: ContentKind,
    pub parent_id: Option<Id>,
    pub user_id: Option<Id>,
    pub slug: String,
    pub title: String,
    pub text: String,
    pub tags: Vec<String>, // tag slugs, questions only
    pub is_hidden: bool,   // by owner
    pub is_deleted: bool,  // by admin
    pub is_accepted: bool, // by asker, answers only
    pub up: i64,
    pub down: i64,
    pub points: i64,
    pub timepoints: i64,
    pub views: i64,
    pub created: DateTime<Utc>,
}

impl Content {
    pub fn is_public(&self) -> bool {
        !self.is_hidden && !self.is_deleted
    }

    pub fn is_owned_by(&self, user_id: Id) -> bool {
        self.user_id == Some(user_id)
    }

    pub fn apply_score(&mut self, score: &Score) {
        self.up = score.up;
        self.down = score.down;
        self.points = score.points;
        self.timepoints = score.timepoints;
    }
}

impl fmt::Display for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ContentKind::Question => write!(f, "Question {}: \"{}\"", self.id, self.title),
            ContentKind::Answer => write!(f, "Answer {}", self.id),
            ContentKind::Comment => write!(f, "Comment {}", self.id),
        }
    }
}

/// Validated insert for the content table. Build through the per-kind constructors.
#[derive(Debug, Clone)]
pub struct NewContent {
    pub kind: ContentKind,
    pub parent_id: Option<Id>,
    pub user_id: Id,
    pub slug: String,
    pub title: String,
    pub text: String,
    pub tags: Vec<String>,
}

impl NewContent {
    pub fn question(user_id: Id, title: String, slug: String, text: String, tags: Vec<String>) -> Self {
        Self { kind: ContentKind::Question, parent_id: None, user_id, slug, title, text, tags }
    }

    pub fn answer(user_id: Id, question_id: Id, text: String) -> Self {
        Self {
            kind: ContentKind::Answer,
            parent_id: Some(question_id),
            user_id,
            slug: String::new(),
            title: String::new(),
            text,
            tags: Vec::new(),
        }
    }

    pub fn comment(user_id: Id, parent_id: Id, text: String) -> Self {
        Self {
            kind: ContentKind::Comment,
            parent_id: Some(parent_id),
            user_id,
            slug: String::new(),
            title: String::new(),
            text,
            tags: Vec::new(),
        }
    }
}

/// Field replacement for owner edits; `None` keeps the stored value.
#[derive(Debug, Clone, Default)]
pub struct ContentPatch {
    pub title: Option<String>,
    pub slug: Option<String>,
    pub text: Option<String>,
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewQuestion {
    pub title: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateQuestion {
    pub title: Option<String>,
    pub text: Option<String>,
    pub tags: Option<Vec<String>>,
}

/// Body of answer/comment creation and edits.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TextBody {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Tag {
    pub id: Id,
    pub name: String,
    pub slug: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewTag {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct User {
    pub id: Id,
    pub username: String,
    pub email: String,
    #[serde(skip)]
    pub password_hash: String,
    pub created: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewUser {
    pub username: String,
    #[serde(default)]
    pub email: String,
    pub password: String,
}

/// Insert for the users table; the password is already hashed.
#[derive(Debug, Clone)]
pub struct UserDraft {
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ListOrder {
    #[default]
    Hot,
    New,
    Top,
}

impl ListOrder {
    /// Unknown or missing values fall back to `hot`.
    pub fn parse_or_default(s: Option<&str>) -> Self {
        match s {
            Some("new") => ListOrder::New,
            Some("top") => ListOrder::Top,
            _ => ListOrder::Hot,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum QuestionFilter {
    #[default]
    All,
    WithAnswers,
    WithoutAnswers,
    WithoutAcceptedAnswer,
}

impl QuestionFilter {
    pub fn parse_or_default(s: Option<&str>) -> Self {
        match s {
            Some("with_answers") => QuestionFilter::WithAnswers,
            Some("without_answers") => QuestionFilter::WithoutAnswers,
            Some("without_accepted_answer") => QuestionFilter::WithoutAcceptedAnswer,
            _ => QuestionFilter::All,
        }
    }
}

/// A content item annotated with the viewer's own vote.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ContentView {
    #[serde(flatten)]
    pub content: Content,
    #[schema(value_type = Option<i16>)]
    pub user_vote: Option<VoteValue>,
}

impl ContentView {
    pub fn is_upvoted(&self) -> bool {
        self.user_vote == Some(VoteValue::Up)
    }

    pub fn is_downvoted(&self) -> bool {
        self.user_vote == Some(VoteValue::Down)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AnswerThread {
    pub answer: ContentView,
    pub comments: Vec<ContentView>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct QuestionDetail {
    pub question: ContentView,
    pub comments: Vec<ContentView>,
    pub answers: Vec<AnswerThread>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TagDetail {
    pub tag: Tag,
    pub questions: Vec<ContentView>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserProfile {
    pub user: User,
    pub questions: Vec<ContentView>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct VoteOutcome {
    pub content_id: Id,
    #[schema(value_type = Option<i16>)]
    pub user_vote: Option<VoteValue>,
    pub score: Score,
}
